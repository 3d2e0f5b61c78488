//! Log reader abstraction consumed by catch-up replication.
//!
//! The storage engine behind a partition's log is not part of this crate;
//! replication only needs a cursor that can seek by position and read entries
//! forward. `MemoryLog` is an in-memory implementation used by embedders that
//! keep a bounded tail of the log in memory, and by the tests.

use bytes::Bytes;
use std::sync::{Arc, PoisonError, RwLock};
use tdm_core::{Result, TandemError};
use tracing::info;

/// An application-level entry as stored in a partition's log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedEntry {
    pub position: i64,
    pub data: Bytes,
}

impl LoggedEntry {
    pub fn new(position: i64, data: impl Into<Bytes>) -> Self {
        Self {
            position,
            data: data.into(),
        }
    }
}

/// Forward-only cursor over a partition's log.
///
/// A reader is not shareable between concurrent requests; whoever owns it
/// serializes access.
pub trait LogStreamReader {
    /// Position the cursor before the first retained entry.
    fn seek_to_first(&mut self);

    /// Position the cursor so the next entry read is the one at `position`.
    ///
    /// Returns false if no entry exists at exactly that position; the cursor is
    /// then left before the first entry with a greater position.
    fn seek(&mut self, position: i64) -> bool;

    fn has_next(&mut self) -> bool;

    /// Read the entry under the cursor and advance past it.
    fn next_entry(&mut self) -> Option<LoggedEntry>;

    /// Position of the entry most recently returned by `next_entry`, or -1.
    fn current_position(&self) -> i64;
}

/// In-memory, append-only log with strictly increasing positions.
#[derive(Debug, Clone, Default)]
pub struct MemoryLog {
    entries: Arc<RwLock<Vec<LoggedEntry>>>,
}

impl MemoryLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry. Positions are never reused, so the new position must
    /// be greater than the last one.
    pub fn append(&self, position: i64, data: impl Into<Bytes>) -> Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(last) = entries.last() {
            if position <= last.position {
                return Err(TandemError::InvalidData(format!(
                    "position {position} does not follow last position {}",
                    last.position
                )));
            }
        }
        entries.push(LoggedEntry::new(position, data));
        Ok(())
    }

    #[must_use]
    pub fn first_position(&self) -> Option<i64> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.first().map(|e| e.position)
    }

    #[must_use]
    pub fn last_position(&self) -> Option<i64> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.last().map(|e| e.position)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry at or below `position`.
    pub fn compact_to(&self, position: i64) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let cut = entries.partition_point(|e| e.position <= position);
        entries.drain(..cut);

        info!(
            target: "tandem::log",
            compacted_to = position,
            removed = cut,
            retained = entries.len(),
            "Compacted in-memory log"
        );
    }

    /// Open a new cursor positioned before the first entry.
    #[must_use]
    pub fn reader(&self) -> MemoryLogReader {
        MemoryLogReader {
            log: self.clone(),
            next_from: i64::MIN,
            current: -1,
        }
    }

    fn find_from(&self, lower_bound: i64) -> Option<LoggedEntry> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let idx = entries.partition_point(|e| e.position < lower_bound);
        entries.get(idx).cloned()
    }

    fn contains(&self, position: i64) -> bool {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .binary_search_by_key(&position, |e| e.position)
            .is_ok()
    }
}

/// Cursor over a [`MemoryLog`].
///
/// The cursor tracks the lowest position it may return next, so it stays
/// valid across concurrent appends and compactions.
#[derive(Debug)]
pub struct MemoryLogReader {
    log: MemoryLog,
    next_from: i64,
    current: i64,
}

impl LogStreamReader for MemoryLogReader {
    fn seek_to_first(&mut self) {
        self.next_from = i64::MIN;
    }

    fn seek(&mut self, position: i64) -> bool {
        self.next_from = position;
        self.log.contains(position)
    }

    fn has_next(&mut self) -> bool {
        self.log.find_from(self.next_from).is_some()
    }

    fn next_entry(&mut self) -> Option<LoggedEntry> {
        let entry = self.log.find_from(self.next_from)?;
        self.current = entry.position;
        self.next_from = entry.position.saturating_add(1);
        Some(entry)
    }

    fn current_position(&self) -> i64 {
        self.current
    }
}
