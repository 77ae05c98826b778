//! Main Archive struct tying all components together.

use crate::codec::{Codec, RawCodec};
use crate::error::{ArchiveError, Result};
use crate::locks::{Completion, KeyLockManager};
use crate::retention;
use crate::session::Session;
use crate::slots::SlotStorage;
use crate::types::{ArchiveOutcome, EvictionSummary, CURRENT_SLOT};
use fs2::FileExt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Directory created under the platform data directory by default.
const DEFAULT_DIR_NAME: &str = "data_archive";

/// Lock file guarding a root against a second `Archive`.
const LOCK_FILE_NAME: &str = ".archive.lock";

/// Archive configuration.
#[derive(Clone, Debug)]
pub struct ArchiveConfig {
    /// Root directory; one subdirectory per key.
    pub root: PathBuf,

    /// Whether to fsync every slot write.
    pub sync_writes: bool,
}

impl ArchiveConfig {
    /// Default configuration rooted at `root`.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        let base = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            root: base.join(DEFAULT_DIR_NAME),
            sync_writes: true,
        }
    }
}

/// A file-backed versioned key-value store.
///
/// Each key has a current value and a chain of archived values. All data
/// operations are queued on the key's channel and return a [`Completion`];
/// operations on one key run one at a time in submission order, operations
/// on different keys run in parallel.
///
/// ```ignore
/// let archive = Archive::open(ArchiveConfig::at("./archive"))?;
///
/// archive.archive_current_value::<JsonCodec<Person>>("person", &person).wait()?;
/// let history = archive.get_all_values::<JsonCodec<Person>>("person").wait()?;
/// ```
pub struct Archive {
    /// Archive configuration.
    config: ArchiveConfig,

    /// Lock file for exclusive access to the root.
    _lock_file: File,

    /// Per-key channels and locks.
    locks: KeyLockManager,
}

impl Archive {
    /// Open (creating if needed) the archive at `config.root`.
    pub fn open(config: ArchiveConfig) -> Result<Self> {
        fs::create_dir_all(&config.root)?;
        let lock_file = Self::acquire_lock(&config.root)?;
        let locks = KeyLockManager::new(&config.root, config.sync_writes);

        debug!(root = %config.root.display(), "Opened archive");

        Ok(Self {
            config,
            _lock_file: lock_file,
            locks,
        })
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    pub fn config(&self) -> &ArchiveConfig {
        &self.config
    }

    // --- Writes ---

    /// Replace the current value of a key with raw bytes.
    pub fn set_bytes(&self, key: &str, bytes: impl Into<Vec<u8>>) -> Completion<()> {
        let bytes = bytes.into();
        self.locks
            .run_locked(key, move |slots| slots.write(CURRENT_SLOT, &bytes))
    }

    /// Replace the current value of a key with an encoded value.
    pub fn set_value<C: Codec>(&self, key: &str, value: &C::Value) -> Completion<()> {
        match C::encode(value) {
            Ok(bytes) => self.set_bytes(key, bytes),
            Err(e) => Completion::ready(Err(e)),
        }
    }

    /// Move the current value to a new newest archive slot, then set `bytes`
    /// as the current value.
    pub fn archive_current_bytes(
        &self,
        key: &str,
        bytes: impl Into<Vec<u8>>,
    ) -> Completion<ArchiveOutcome> {
        let bytes = bytes.into();
        let owned_key = key.to_string();
        self.locks.run_locked(key, move |slots| {
            let outcome = Self::archive_current_slot(slots);
            if !outcome.is_complete() {
                warn!(key = %owned_key, %outcome, "Setting new current without archiving");
            }
            slots.write(CURRENT_SLOT, &bytes)?;
            Ok(outcome)
        })
    }

    /// Encoded-value variant of [`archive_current_bytes`](Self::archive_current_bytes).
    pub fn archive_current_value<C: Codec>(
        &self,
        key: &str,
        value: &C::Value,
    ) -> Completion<ArchiveOutcome> {
        match C::encode(value) {
            Ok(bytes) => self.archive_current_bytes(key, bytes),
            Err(e) => Completion::ready(Err(e)),
        }
    }

    /// Keep at most `limit` archives of a key, dropping the oldest.
    pub fn keep(&self, key: &str, limit: usize) -> Completion<EvictionSummary> {
        if limit == 0 {
            return Completion::ready(Err(ArchiveError::InvalidLimit(limit)));
        }
        self.locks
            .run_locked(key, move |slots| retention::keep(slots, limit))
    }

    /// Remove a key with its whole history.
    pub fn delete(&self, key: &str) -> Completion<()> {
        self.locks.run_locked(key, |slots| slots.remove_all())
    }

    // --- Reads ---

    /// Current value of a key as raw bytes.
    pub fn get_bytes(&self, key: &str) -> Completion<Vec<u8>> {
        self.get_value::<RawCodec>(key)
    }

    /// Current value of a key, decoded.
    pub fn get_value<C: Codec>(&self, key: &str) -> Completion<C::Value> {
        let owned_key = key.to_string();
        self.locks.run_locked(key, move |slots| {
            slots
                .read::<C>(CURRENT_SLOT)?
                .ok_or(ArchiveError::NotFound { key: owned_key })
        })
    }

    /// Current value followed by every archive, newest first, as raw bytes.
    pub fn get_all_bytes(&self, key: &str) -> Completion<Vec<Vec<u8>>> {
        self.get_all_values::<RawCodec>(key)
    }

    /// Current value followed by every archive, newest first, decoded.
    pub fn get_all_values<C: Codec>(&self, key: &str) -> Completion<Vec<C::Value>> {
        self.locks
            .run_locked(key, |slots| Self::read_chain::<C>(slots))
    }

    /// Acquire a session holding the key's lock until it is closed.
    ///
    /// Resolves to `None` if the key has never been used and has no data.
    pub fn acquire_session(&self, key: &str) -> Completion<Option<Session>> {
        self.locks.acquire_session(key)
    }

    // --- Metadata ---

    /// Number of archives of a key. Not ordered against queued writes.
    pub fn archive_count(&self, key: &str) -> usize {
        self.locks.slots(key).archive_count()
    }

    /// Names of all keys with a directory under the root, sorted.
    pub fn list_keys(&self) -> Vec<String> {
        let entries = match fs::read_dir(&self.config.root) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let mut keys: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| !name.starts_with('.'))
            .collect();
        keys.sort();
        keys
    }

    /// Move slot 0 to the next archive index.
    ///
    /// If a write was interrupted after slot 0 was moved aside, the value
    /// on its fallback path is the current one and is archived instead.
    fn archive_current_slot(slots: &SlotStorage) -> ArchiveOutcome {
        let recovered = if slots.has_primary(CURRENT_SLOT) {
            false
        } else if slots.has_fallback(CURRENT_SLOT) && slots.read_bytes(CURRENT_SLOT).is_some() {
            true
        } else {
            return ArchiveOutcome::FirstVersion;
        };

        let index = slots.archive_count() + 1;
        let (from, moved) = if recovered {
            let from = slots.fallback_path(CURRENT_SLOT);
            debug!(path = %from.display(), "Archiving recovered fallback");
            (from, slots.promote_fallback(CURRENT_SLOT, index))
        } else {
            (
                slots.primary_path(CURRENT_SLOT),
                slots.rename(CURRENT_SLOT, index),
            )
        };

        match moved {
            Ok(()) => ArchiveOutcome::Archived { index },
            Err(e) => {
                warn!(error = %e, "Could not archive current value");
                ArchiveOutcome::ArchivedPartially {
                    from,
                    to: slots.primary_path(index),
                }
            }
        }
    }

    /// Read slot 0 then `count..=1`, stopping at the first missing slot.
    fn read_chain<C: Codec>(slots: &SlotStorage) -> Result<Vec<C::Value>> {
        let count = slots.archive_count();
        let mut values = Vec::with_capacity(count + 1);

        match slots.read::<C>(CURRENT_SLOT)? {
            Some(value) => values.push(value),
            None if count == 0 => return Ok(values),
            None => {
                return Err(ArchiveError::SlotMissing {
                    path: slots.primary_path(CURRENT_SLOT),
                })
            }
        }

        for index in (1..=count).rev() {
            let value = slots
                .read::<C>(index)?
                .ok_or_else(|| ArchiveError::SlotMissing {
                    path: slots.primary_path(index),
                })?;
            values.push(value);
        }

        Ok(values)
    }

    /// Acquire an exclusive lock on the root.
    fn acquire_lock(root: &Path) -> Result<File> {
        let lock_file = File::create(root.join(LOCK_FILE_NAME))?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| ArchiveError::Locked)?;

        Ok(lock_file)
    }
}
