//! Lock and completion primitives.

use crate::error::{ArchiveError, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;

/// Binary lock whose acquire and release may happen on different threads.
///
/// Unlike a mutex guard, the [`LockPermit`] it hands out can be moved to
/// another thread and released there.
#[derive(Default)]
pub struct KeyLock {
    held: Mutex<bool>,
    released: Condvar,
}

impl KeyLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the lock is free, then take it.
    pub fn acquire(self: &Arc<Self>) -> LockPermit {
        let mut held = self.held.lock();
        while *held {
            self.released.wait(&mut held);
        }
        *held = true;

        LockPermit {
            lock: Arc::clone(self),
            held: true,
        }
    }

    /// Take the lock if it is free.
    pub fn try_acquire(self: &Arc<Self>) -> Option<LockPermit> {
        let mut held = self.held.lock();
        if *held {
            return None;
        }
        *held = true;

        Some(LockPermit {
            lock: Arc::clone(self),
            held: true,
        })
    }

    pub fn is_held(&self) -> bool {
        *self.held.lock()
    }

    fn release(&self) {
        *self.held.lock() = false;
        self.released.notify_one();
    }
}

/// Proof of holding a [`KeyLock`]. Released on `release()` or drop.
pub struct LockPermit {
    lock: Arc<KeyLock>,
    held: bool,
}

impl LockPermit {
    /// Give the lock back. Only the first call has an effect.
    pub fn release(&mut self) {
        if self.held {
            self.held = false;
            self.lock.release();
        }
    }

    pub fn is_held(&self) -> bool {
        self.held
    }
}

impl Drop for LockPermit {
    fn drop(&mut self) {
        self.release();
    }
}

/// Handle to the result of an operation running on a key worker.
///
/// The result is delivered once: after a `wait_*`/`try_wait` has returned
/// it, later calls report `WorkerGone`.
#[must_use = "the operation runs regardless, but its result is only visible through the Completion"]
pub struct Completion<T> {
    receiver: Receiver<Result<T>>,
}

/// Sending half of a [`Completion`].
pub(crate) struct Completer<T> {
    sender: Sender<Result<T>>,
}

impl<T> Completer<T> {
    pub(crate) fn complete(self, result: Result<T>) {
        // The caller may have dropped its Completion.
        let _ = self.sender.send(result);
    }
}

impl<T> Completion<T> {
    pub(crate) fn channel() -> (Completer<T>, Self) {
        let (sender, receiver) = bounded(1);
        (Completer { sender }, Self { receiver })
    }

    /// A completion that is already resolved.
    pub fn ready(result: Result<T>) -> Self {
        let (completer, completion) = Self::channel();
        completer.complete(result);
        completion
    }

    /// Block until the operation finishes.
    pub fn wait(self) -> Result<T> {
        self.receiver
            .recv()
            .unwrap_or(Err(ArchiveError::WorkerGone))
    }

    /// Block for at most `timeout`. Returns `None` if it elapsed first.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(ArchiveError::WorkerGone)),
        }
    }

    /// Return the result if the operation already finished.
    pub fn try_wait(&self) -> Option<Result<T>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(ArchiveError::WorkerGone)),
        }
    }

    /// Whether a result is waiting to be picked up.
    pub fn is_ready(&self) -> bool {
        !self.receiver.is_empty()
    }
}
