//! # Slot Archive
//!
//! A local, file-backed versioned key-value store. Every key owns a chain
//! of opaque byte blobs: a current value plus archived former values.
//!
//! ## Core Concepts
//!
//! - **Slots**: numbered files per key; `0` is current, `1..=N` archives
//!   with `N` the newest
//! - **Crash-consistent writes**: the old value is moved aside before a
//!   slot is replaced and is read back if the new one never lands
//! - **Retention**: `keep` evicts the oldest archives and renumbers the
//!   rest contiguously
//! - **Per-key serialization**: one FIFO channel and one lock per key;
//!   different keys run in parallel
//! - **Sessions**: a key lock held open across many reads
//!
//! ## Example
//!
//! ```ignore
//! use slot_archive::{Archive, ArchiveConfig, JsonCodec};
//!
//! let archive = Archive::open(ArchiveConfig::at("./archive"))?;
//!
//! archive.archive_current_value::<JsonCodec<u32>>("age", &1).wait()?;
//! archive.archive_current_value::<JsonCodec<u32>>("age", &2).wait()?;
//! assert_eq!(archive.get_all_values::<JsonCodec<u32>>("age").wait()?, vec![2, 1]);
//!
//! // Read the history while holding the key.
//! if let Some(mut session) = archive.acquire_session("age").wait()? {
//!     while let Ok(bytes) = session.next_bytes().wait() {
//!         println!("{:?}", bytes);
//!     }
//!     session.close();
//! }
//! ```

pub mod codec;
pub mod error;
pub mod locks;
pub mod retention;
pub mod session;
pub mod slots;
pub mod store;
pub mod types;

// Re-exports
pub use codec::{Codec, JsonCodec, MessagePackCodec, RawCodec};
pub use error::{ArchiveError, Result};
pub use locks::{Completion, KeyLock, KeyLockManager, LockPermit};
pub use retention::RetentionPlan;
pub use session::Session;
pub use slots::SlotStorage;
pub use store::{Archive, ArchiveConfig};
pub use types::*;
