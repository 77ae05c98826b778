//! Slot storage implementation.

use crate::codec::{Codec, RawCodec};
use crate::error::{ArchiveError, Result};
use crate::types::SlotFile;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Magic bytes for slot files.
const SLOT_MAGIC: &[u8; 4] = b"SLT\0";

/// Current slot format version.
const SLOT_VERSION: u8 = 1;

/// Magic + version + payload length.
const HEADER_LEN: usize = 4 + 1 + 8;

/// Trailing CRC32 of the payload.
const TRAILER_LEN: usize = 4;

/// The version chain of a single key.
///
/// `SlotStorage` does no locking of its own; callers must hold the key's
/// lock before touching the directory.
#[derive(Clone, Debug)]
pub struct SlotStorage {
    /// Key directory.
    dir: PathBuf,

    /// Whether to fsync primary writes.
    sync_writes: bool,
}

impl SlotStorage {
    /// Bind to a key directory. Nothing is created until the first write.
    pub fn new(dir: impl Into<PathBuf>, sync_writes: bool) -> Self {
        Self {
            dir: dir.into(),
            sync_writes,
        }
    }

    /// The key directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of one file of a slot pair.
    pub fn slot_path(&self, index: usize, file: SlotFile) -> PathBuf {
        self.dir.join(format!("{}.{}", index, file.extension()))
    }

    pub fn primary_path(&self, index: usize) -> PathBuf {
        self.slot_path(index, SlotFile::Primary)
    }

    pub fn fallback_path(&self, index: usize) -> PathBuf {
        self.slot_path(index, SlotFile::Fallback)
    }

    /// Whether the primary file of a slot exists.
    pub fn has_primary(&self, index: usize) -> bool {
        self.primary_path(index).is_file()
    }

    /// Replace the contents of a slot.
    ///
    /// An existing primary is moved to the fallback path first so a crash
    /// before the new primary lands still leaves the previous value
    /// readable. If that move fails the write goes ahead anyway.
    pub fn write(&self, index: usize, bytes: &[u8]) -> Result<()> {
        let primary = self.primary_path(index);

        fs::create_dir_all(&self.dir).map_err(|source| ArchiveError::WriteFailed {
            path: self.dir.clone(),
            source,
        })?;

        let fallback = self.fallback_path(index);
        let mut moved = false;
        if primary.is_file() {
            match fs::rename(&primary, &fallback) {
                Ok(()) => moved = true,
                Err(e) => warn!(
                    path = %primary.display(),
                    error = %e,
                    "Could not move slot to fallback; overwriting in place"
                ),
            }
        }

        self.write_framed(&primary, bytes)
            .map_err(|source| ArchiveError::WriteFailed {
                path: primary.clone(),
                source,
            })?;

        if moved {
            if let Err(e) = fs::remove_file(&fallback) {
                debug!(path = %fallback.display(), error = %e, "Leaving stale fallback file");
            }
        }

        Ok(())
    }

    /// Read and decode a slot, preferring the primary over the fallback.
    ///
    /// Returns `Ok(None)` when neither file is readable. If a file is
    /// readable but no candidate decodes, the last path that failed to
    /// decode is reported.
    pub fn read<C: Codec>(&self, index: usize) -> Result<Option<C::Value>> {
        let mut undecodable = None;

        for file in [SlotFile::Primary, SlotFile::Fallback] {
            let path = self.slot_path(index, file);
            let payload = match Self::read_payload(&path) {
                Some(payload) => payload,
                None => continue,
            };
            match C::decode(&payload) {
                Some(value) => return Ok(Some(value)),
                None => {
                    warn!(path = %path.display(), codec = C::NAME, "Slot did not decode");
                    undecodable = Some(path);
                }
            }
        }

        match undecodable {
            Some(path) => Err(ArchiveError::DecodeFailed {
                path,
                codec: C::NAME,
            }),
            None => Ok(None),
        }
    }

    /// Read the raw bytes of a slot.
    pub fn read_bytes(&self, index: usize) -> Option<Vec<u8>> {
        self.read::<RawCodec>(index).ok().flatten()
    }

    /// Move archive `from` to index `to`.
    pub fn rename(&self, from: usize, to: usize) -> Result<()> {
        Self::move_file(self.primary_path(from), self.primary_path(to))
    }

    /// Move a slot's primary onto its fallback path, freeing the index
    /// without destroying the data.
    pub fn park(&self, index: usize) -> Result<()> {
        Self::move_file(self.primary_path(index), self.fallback_path(index))
    }

    /// Move a slot's fallback file to the primary path of index `to`.
    ///
    /// Used to archive a value that only survives on its fallback path.
    pub fn promote_fallback(&self, from: usize, to: usize) -> Result<()> {
        Self::move_file(self.fallback_path(from), self.primary_path(to))
    }

    /// Whether the fallback file of a slot exists.
    pub fn has_fallback(&self, index: usize) -> bool {
        self.fallback_path(index).is_file()
    }

    /// Delete a file previously moved aside by [`park`](Self::park).
    pub fn discard_parked(&self, index: usize) -> Result<()> {
        Self::remove_file(self.fallback_path(index))
    }

    /// Delete a slot's primary file.
    pub fn delete(&self, index: usize) -> Result<()> {
        Self::remove_file(self.primary_path(index))
    }

    /// Remove the whole key directory. A missing directory is not an error.
    pub fn remove_all(&self) -> Result<()> {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(ArchiveError::DeleteKeyFailed {
                path: self.dir.clone(),
                source,
            }),
        }
    }

    /// Number of archive primary files (index >= 1) on disk.
    ///
    /// Not synchronized with in-flight writes.
    pub fn archive_count(&self) -> usize {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(_) => return 0,
        };

        entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter(|entry| {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                matches!(
                    parse_slot_name(&name),
                    Some((index, SlotFile::Primary)) if index >= 1
                )
            })
            .count()
    }

    /// Whether the key directory is absent or holds no entries.
    pub fn is_empty(&self) -> bool {
        fs::read_dir(&self.dir)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(true)
    }

    fn write_framed(&self, path: &Path, payload: &[u8]) -> io::Result<()> {
        let mut file = File::create(path)?;

        // Header
        file.write_all(SLOT_MAGIC)?;
        file.write_all(&[SLOT_VERSION])?;
        file.write_all(&(payload.len() as u64).to_le_bytes())?;

        file.write_all(payload)?;

        // Checksum
        let checksum = crc32fast::hash(payload);
        file.write_all(&checksum.to_le_bytes())?;

        if self.sync_writes {
            file.sync_all()?;
        }
        Ok(())
    }

    fn read_payload(path: &Path) -> Option<Vec<u8>> {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not read slot file");
                return None;
            }
        };

        match unframe(&data) {
            Ok(payload) => Some(payload.to_vec()),
            Err(reason) => {
                warn!(path = %path.display(), reason, "Ignoring damaged slot file");
                None
            }
        }
    }

    /// Move a file, refusing to replace anything already at `to`.
    ///
    /// Callers hold the key lock, so nothing else creates `to` between the
    /// check and the rename.
    fn move_file(from: PathBuf, to: PathBuf) -> Result<()> {
        if fs::symlink_metadata(&to).is_ok() {
            let source = io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", to.display()),
            );
            return Err(ArchiveError::MoveFailed { from, to, source });
        }
        fs::rename(&from, &to).map_err(|source| ArchiveError::MoveFailed { from, to, source })
    }

    fn remove_file(path: PathBuf) -> Result<()> {
        fs::remove_file(&path).map_err(|source| ArchiveError::DeleteFailed { path, source })
    }
}

/// Split `"<index>.<ext>"` into its parts.
fn parse_slot_name(name: &str) -> Option<(usize, SlotFile)> {
    let (stem, ext) = name.split_once('.')?;
    let index = stem.parse().ok()?;
    let file = match ext {
        e if e == SlotFile::Primary.extension() => SlotFile::Primary,
        e if e == SlotFile::Fallback.extension() => SlotFile::Fallback,
        _ => return None,
    };
    Some((index, file))
}

/// Verify a slot file and return its payload.
fn unframe(data: &[u8]) -> std::result::Result<&[u8], &'static str> {
    if data.len() < HEADER_LEN + TRAILER_LEN {
        return Err("truncated");
    }
    if &data[0..4] != SLOT_MAGIC {
        return Err("bad magic");
    }
    if data[4] != SLOT_VERSION {
        return Err("unsupported version");
    }

    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&data[5..HEADER_LEN]);
    let len = u64::from_le_bytes(len_bytes) as usize;
    if data.len() - HEADER_LEN - TRAILER_LEN != len {
        return Err("length mismatch");
    }

    let payload = &data[HEADER_LEN..HEADER_LEN + len];
    let mut crc_bytes = [0u8; 4];
    crc_bytes.copy_from_slice(&data[HEADER_LEN + len..]);
    if u32::from_le_bytes(crc_bytes) != crc32fast::hash(payload) {
        return Err("checksum mismatch");
    }

    Ok(payload)
}
