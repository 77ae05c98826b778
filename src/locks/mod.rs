//! Per-key serialized execution and locking.
//!
//! Every key gets, on first use:
//! - a FIFO job channel drained by a worker thread of its own, so work for
//!   one key runs one piece at a time in submission order while different
//!   keys proceed in parallel. The thread exits once the key has been idle
//!   for a while and is started again by the next job;
//! - a [`KeyLock`], the binary lock that guards the key's directory.
//!
//! Jobs submitted with [`KeyLockManager::run_locked`] take the lock right
//! before they run and give it back right after. A [`Session`] takes it
//! once and keeps it until it is closed or dropped, so while a session is
//! open the key's worker blocks on the lock instead of skipping ahead.
//!
//! [`Session`]: crate::session::Session

mod manager;
mod types;

pub use manager::{KeyLockManager, DEFAULT_WORKER_IDLE};
pub use types::{Completion, KeyLock, LockPermit};
