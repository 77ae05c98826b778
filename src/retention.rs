//! Archive retention.
//!
//! Eviction keeps the `limit` newest archives of a key and renumbers them
//! contiguously from 1. It runs in three passes over the slot files:
//!
//! 1. park slots `1..=evict` on their fallback paths,
//! 2. slide slots `evict+1..=count` down by `evict`,
//! 3. delete the parked files.
//!
//! Each pass finishes before the next starts. The first failing step
//! aborts the whole eviction and nothing is rolled back, so after a failed
//! `keep` the numbering of the chain may have gaps. No step ever moves a
//! file onto an existing one, so a failed `keep` loses no archive.

use crate::error::{ArchiveError, Result};
use crate::slots::SlotStorage;
use crate::types::EvictionSummary;
use std::ops::RangeInclusive;
use tracing::debug;

/// Index arithmetic for one eviction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetentionPlan {
    count: usize,
    limit: usize,
}

impl RetentionPlan {
    /// Plan an eviction of `count` archives down to `limit`.
    pub fn new(count: usize, limit: usize) -> Result<Self> {
        if limit == 0 {
            return Err(ArchiveError::InvalidLimit(limit));
        }
        Ok(Self { count, limit })
    }

    /// Number of archives that will be removed.
    pub fn to_evict(&self) -> usize {
        self.count.saturating_sub(self.limit)
    }

    pub fn is_noop(&self) -> bool {
        self.to_evict() == 0
    }

    /// Slots parked in pass 1 and deleted in pass 3.
    pub fn evicted(&self) -> RangeInclusive<usize> {
        1..=self.to_evict()
    }

    /// `(from, to)` renames of pass 2, oldest survivor first.
    pub fn moves(&self) -> impl Iterator<Item = (usize, usize)> {
        let evict = self.to_evict();
        // Nothing moves when nothing is evicted.
        let last = if evict == 0 { 0 } else { self.count };
        (evict + 1..=last).map(move |index| (index, index - evict))
    }

    pub fn summary(&self) -> EvictionSummary {
        EvictionSummary {
            evicted: self.to_evict(),
            retained: self.count.min(self.limit),
        }
    }
}

/// Evict all but the `limit` newest archives of a key.
///
/// The caller must hold the key's lock.
pub fn keep(slots: &SlotStorage, limit: usize) -> Result<EvictionSummary> {
    let plan = RetentionPlan::new(slots.archive_count(), limit)?;
    if plan.is_noop() {
        return Ok(plan.summary());
    }

    for index in plan.evicted() {
        slots.park(index)?;
    }

    for (from, to) in plan.moves() {
        slots.rename(from, to)?;
    }

    for index in plan.evicted() {
        slots.discard_parked(index)?;
    }

    let summary = plan.summary();
    debug!(
        dir = %slots.dir().display(),
        evicted = summary.evicted,
        retained = summary.retained,
        "Evicted archives"
    );
    Ok(summary)
}
