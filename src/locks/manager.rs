//! Key lock manager.

use crate::error::Result;
use crate::session::Session;
use crate::slots::SlotStorage;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, SendError, Sender};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

use super::types::{Completion, KeyLock};

/// How long a key worker waits for work before exiting.
pub const DEFAULT_WORKER_IDLE: Duration = Duration::from_secs(30);

/// Work queued on a key's channel.
type Job = Box<dyn FnOnce() + Send + 'static>;

/// Channel and lock of one key.
struct LockEntry {
    key: String,

    /// Sender of the running worker, `None` while no worker is running.
    /// Jobs are only ever sent with this mutex held.
    worker: Mutex<Option<Sender<Job>>>,

    lock: Arc<KeyLock>,
    slots: SlotStorage,
}

/// Owns the key -> (channel, lock) table.
///
/// Entries are created lazily on first use and kept until the manager is
/// dropped, even after the key's directory is deleted. An entry costs a
/// map slot and a lock; its worker thread only lives while the key has
/// work, exiting after being idle for the configured timeout and being
/// started again by the next submission. Dropping the manager closes every
/// channel and lets the workers exit once their queues are drained.
pub struct KeyLockManager {
    /// Root directory; one subdirectory per key.
    root: PathBuf,

    /// Passed on to every key's slot storage.
    sync_writes: bool,

    /// Idle time after which a key's worker exits.
    worker_idle: Duration,

    entries: RwLock<HashMap<String, Arc<LockEntry>>>,
}

impl KeyLockManager {
    pub fn new(root: impl AsRef<Path>, sync_writes: bool) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            sync_writes,
            worker_idle: DEFAULT_WORKER_IDLE,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Override how long idle key workers linger.
    pub fn with_worker_idle(mut self, idle: Duration) -> Self {
        self.worker_idle = idle;
        self
    }

    /// Slot storage for a key, without creating its entry.
    ///
    /// Only safe for lock-free metadata queries.
    pub fn slots(&self, key: &str) -> SlotStorage {
        SlotStorage::new(self.root.join(key), self.sync_writes)
    }

    /// Whether the key has been touched through this manager.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Number of keys with a live entry.
    pub fn entry_count(&self) -> usize {
        self.entries.read().len()
    }

    /// Number of keys whose worker thread is currently running.
    pub fn worker_count(&self) -> usize {
        self.entries
            .read()
            .values()
            .filter(|entry| entry.worker.lock().is_some())
            .count()
    }

    /// Whether the key's lock is currently held.
    pub fn is_locked(&self, key: &str) -> bool {
        self.entries
            .read()
            .get(key)
            .map(|entry| entry.lock.is_held())
            .unwrap_or(false)
    }

    /// Queue `work` on the key's channel, holding the key lock while it runs.
    pub fn run_locked<T, F>(&self, key: &str, work: F) -> Completion<T>
    where
        T: Send + 'static,
        F: FnOnce(&SlotStorage) -> Result<T> + Send + 'static,
    {
        let entry = self.entry(key);

        let (completer, completion) = Completion::channel();
        let lock = Arc::clone(&entry.lock);
        let slots = entry.slots.clone();

        self.submit(
            &entry,
            Box::new(move || {
                let permit = lock.acquire();
                let result = work(&slots);
                drop(permit);
                completer.complete(result);
            }),
        );

        completion
    }

    /// Queue acquisition of a session on the key.
    ///
    /// Resolves to `None` when the key has nothing on disk: at once, without
    /// queueing, for a key never touched; otherwise once the lock is taken.
    pub fn acquire_session(&self, key: &str) -> Completion<Option<Session>> {
        if !self.contains(key) && self.slots(key).is_empty() {
            return Completion::ready(Ok(None));
        }

        let entry = self.entry(key);

        let (completer, completion) = Completion::channel();
        let lock = Arc::clone(&entry.lock);
        let slots = entry.slots.clone();
        let key = key.to_string();

        self.submit(
            &entry,
            Box::new(move || {
                let permit = lock.acquire();
                // The key may have been deleted by a job queued ahead of us.
                if slots.is_empty() {
                    drop(permit);
                    completer.complete(Ok(None));
                    return;
                }
                // On failure the permit is dropped here and the lock released.
                completer.complete(Session::open(key, slots, permit).map(Some));
            }),
        );

        completion
    }

    /// Get or create the entry for a key.
    fn entry(&self, key: &str) -> Arc<LockEntry> {
        if let Some(entry) = self.entries.read().get(key) {
            return Arc::clone(entry);
        }

        let mut entries = self.entries.write();
        // Another caller may have created it between the two locks.
        if let Some(entry) = entries.get(key) {
            return Arc::clone(entry);
        }

        let entry = Arc::new(LockEntry {
            key: key.to_string(),
            worker: Mutex::new(None),
            lock: Arc::new(KeyLock::new()),
            slots: self.slots(key),
        });
        entries.insert(key.to_string(), Arc::clone(&entry));
        entry
    }

    /// Send a job to the key's worker, starting one if none is running.
    fn submit(&self, entry: &Arc<LockEntry>, job: Job) {
        let mut worker = entry.worker.lock();

        let job = match worker.as_ref() {
            Some(sender) => match sender.send(job) {
                Ok(()) => return,
                Err(SendError(job)) => job,
            },
            None => job,
        };

        match self.spawn_worker(entry) {
            Ok(sender) => {
                // The receiver was just handed to the new thread.
                let _ = sender.send(job);
                *worker = Some(sender);
            }
            // Dropping the job drops its completer: the caller sees `WorkerGone`.
            Err(e) => warn!(key = %entry.key, error = %e, "Could not spawn key worker"),
        }
    }

    fn spawn_worker(&self, entry: &Arc<LockEntry>) -> std::io::Result<Sender<Job>> {
        let (sender, receiver) = unbounded::<Job>();
        let weak = Arc::downgrade(entry);
        let idle = self.worker_idle;

        thread::Builder::new()
            .name(format!("archive-key:{}", entry.key))
            .spawn(move || Self::run_worker(weak, receiver, idle))?;

        debug!(key = %entry.key, "Spawned key worker");
        Ok(sender)
    }

    fn run_worker(entry: Weak<LockEntry>, jobs: Receiver<Job>, idle: Duration) {
        loop {
            match jobs.recv_timeout(idle) {
                Ok(job) => job(),
                Err(RecvTimeoutError::Disconnected) => return,
                Err(RecvTimeoutError::Timeout) => {
                    let entry = match entry.upgrade() {
                        Some(entry) => entry,
                        None => return,
                    };
                    let mut worker = entry.worker.lock();
                    // Senders hold this mutex, so an empty queue stays empty.
                    if jobs.is_empty() {
                        *worker = None;
                        debug!(key = %entry.key, "Key worker idle; exiting");
                        return;
                    }
                }
            }
        }
    }
}
