//! Per-key slot files.
//!
//! Each key owns a directory holding its version chain: `0.dat` is the
//! current value, `1.dat..N.dat` are archives (N newest). A `<n>.tmp`
//! file is the fallback copy of slot `n` while it is being replaced.

mod storage;

pub use storage::SlotStorage;
