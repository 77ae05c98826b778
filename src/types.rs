//! Core types for the archive.

use std::fmt;
use std::path::PathBuf;

/// Index of the current value in a key's version chain.
pub const CURRENT_SLOT: usize = 0;

/// Which file of a slot pair a path refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotFile {
    /// The authoritative file for the slot.
    Primary,
    /// The transient copy kept while the primary is being replaced.
    Fallback,
}

impl SlotFile {
    /// File extension used on disk.
    pub fn extension(self) -> &'static str {
        match self {
            SlotFile::Primary => "dat",
            SlotFile::Fallback => "tmp",
        }
    }
}

/// Result of a successful `archive_current`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArchiveOutcome {
    /// The previous current moved to archive slot `index`.
    Archived { index: usize },
    /// There was no current value yet; the new value became the first version.
    FirstVersion,
    /// The new current was written but the previous one could not be archived.
    ArchivedPartially { from: PathBuf, to: PathBuf },
}

impl ArchiveOutcome {
    /// Whether the previous value (if any) is safely in the archive.
    pub fn is_complete(&self) -> bool {
        !matches!(self, ArchiveOutcome::ArchivedPartially { .. })
    }
}

impl fmt::Display for ArchiveOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveOutcome::Archived { index } => write!(f, "archived to slot {}", index),
            ArchiveOutcome::FirstVersion => write!(f, "first version"),
            ArchiveOutcome::ArchivedPartially { from, to } => write!(
                f,
                "set new current but could not archive {} to {}",
                from.display(),
                to.display()
            ),
        }
    }
}

/// What a `keep` call did to a key's archives.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EvictionSummary {
    /// Archives removed (the oldest ones).
    pub evicted: usize,
    /// Archives left, renumbered from 1.
    pub retained: usize,
}
