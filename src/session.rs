//! Sessions: a key lock held across many reads.
//!
//! A [`Session`] walks a key's version chain newest first: the current
//! value, then the archives from the newest down to the oldest. The number
//! of archives is fixed when the session is acquired, so archiving that
//! happens later (it cannot happen while the session holds the lock, but
//! may be queued behind it) never changes what the session visits.
//!
//! Each `next_*` call advances the cursor on the caller's thread and hands
//! the read to the session's own reader thread. Reads do not go through the
//! key's channel: that channel may be stuck on a job waiting for the very
//! lock this session holds.
//!
//! Close sessions explicitly. Dropping one releases the lock too, but only
//! whenever the value happens to be dropped.

use crate::codec::{Codec, RawCodec};
use crate::error::{ArchiveError, Result};
use crate::locks::{Completion, LockPermit};
use crate::slots::SlotStorage;
use crate::types::CURRENT_SLOT;
use crossbeam_channel::{unbounded, Sender};
use std::thread;
use tracing::debug;

type ReadJob = Box<dyn FnOnce() + Send + 'static>;

/// Position of a session in the chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Cursor {
    Fresh,
    At(usize),
    Finished,
}

/// Exclusive, long-lived read access to one key.
pub struct Session {
    key: String,
    archives: usize,
    cursor: Cursor,
    permit: LockPermit,
    slots: SlotStorage,
    reader: Sender<ReadJob>,
}

impl Session {
    /// Wrap a held key lock. Called on the key's worker.
    pub(crate) fn open(key: String, slots: SlotStorage, permit: LockPermit) -> Result<Self> {
        let (reader, jobs) = unbounded::<ReadJob>();

        thread::Builder::new()
            .name(format!("archive-session:{}", key))
            .spawn(move || {
                for job in jobs {
                    job();
                }
            })
            .map_err(ArchiveError::Io)?;

        let archives = slots.archive_count();
        debug!(key = %key, archives, "Session acquired");

        Ok(Self {
            key,
            archives,
            cursor: Cursor::Fresh,
            permit,
            slots,
            reader,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Archive count snapshotted when the session was acquired.
    pub fn archives_at_acquisition(&self) -> usize {
        self.archives
    }

    pub fn is_finished(&self) -> bool {
        self.cursor == Cursor::Finished
    }

    /// Slot index of the last value handed out, if any.
    pub fn position(&self) -> Option<usize> {
        match self.cursor {
            Cursor::At(index) => Some(index),
            _ => None,
        }
    }

    /// Read the next version as raw bytes.
    pub fn next_bytes(&mut self) -> Completion<Vec<u8>> {
        self.next_value::<RawCodec>()
    }

    /// Read and decode the next version.
    ///
    /// Once the chain is exhausted the lock is released and this and every
    /// later call report `SessionAlreadyFinished`.
    pub fn next_value<C: Codec>(&mut self) -> Completion<C::Value> {
        let index = match self.advance() {
            Some(index) => index,
            None => return Completion::ready(Err(ArchiveError::SessionAlreadyFinished)),
        };

        let (completer, completion) = Completion::channel();
        let slots = self.slots.clone();
        let key = self.key.clone();
        let job: ReadJob = Box::new(move || {
            let result = slots.read::<C>(index).and_then(|value| {
                value.ok_or_else(|| match index {
                    CURRENT_SLOT => ArchiveError::NotFound { key },
                    _ => ArchiveError::SlotMissing {
                        path: slots.primary_path(index),
                    },
                })
            });
            completer.complete(result);
        });

        // A closed channel drops the completer: the caller sees `WorkerGone`.
        let _ = self.reader.send(job);
        completion
    }

    /// Release the lock and finish the session. Later calls are no-ops.
    pub fn close(&mut self) {
        if self.cursor != Cursor::Finished {
            debug!(key = %self.key, "Session closed");
        }
        self.finish();
    }

    /// Move the cursor one step; `None` once the chain is exhausted.
    fn advance(&mut self) -> Option<usize> {
        let next = match self.cursor {
            Cursor::Fresh => Some(CURRENT_SLOT),
            Cursor::At(CURRENT_SLOT) if self.archives == 0 => None,
            Cursor::At(CURRENT_SLOT) => Some(self.archives),
            Cursor::At(1) => None,
            Cursor::At(index) => Some(index - 1),
            Cursor::Finished => None,
        };

        match next {
            Some(index) => self.cursor = Cursor::At(index),
            None => self.finish(),
        }
        next
    }

    fn finish(&mut self) {
        self.cursor = Cursor::Finished;
        self.permit.release();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.permit.is_held() {
            debug!(key = %self.key, "Session dropped while open; releasing lock");
            self.finish();
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("key", &self.key)
            .field("archives", &self.archives)
            .field("cursor", &self.cursor)
            .finish()
    }
}
