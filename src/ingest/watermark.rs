// src/ingest/watermark.rs
//! Ledger deciding which cursor is safe to persist.
//!
//! Records and cursor checkpoints are appended in processing order. After a
//! flush has resolved every record appended so far, [`Watermark::settle`]
//! walks the ledger: a checkpoint is adopted only if no record before it
//! failed. Once a record fails the watermark stops for the rest of the run.

use std::collections::{BTreeSet, VecDeque};

use crate::error::{HarvestError, Result};
use crate::ingest::cursor::{HarvestCursor, ScanDirection};

#[derive(Debug, Clone, PartialEq)]
enum Entry {
    Record(String),
    Checkpoint(HarvestCursor),
}

#[derive(Debug)]
pub struct Watermark {
    direction: ScanDirection,
    entries: VecDeque<Entry>,
    safe: HarvestCursor,
    blocked_by: Option<String>,
}

impl Watermark {
    pub fn new(start: HarvestCursor, direction: ScanDirection) -> Self {
        Self {
            direction,
            entries: VecDeque::new(),
            safe: start,
            blocked_by: None,
        }
    }

    pub fn record(&mut self, id: impl Into<String>) {
        self.entries.push_back(Entry::Record(id.into()));
    }

    /// Append a checkpoint. A checkpoint behind the current safe cursor means
    /// the run changed direction, which is rejected.
    pub fn checkpoint(&mut self, cursor: HarvestCursor) -> Result<()> {
        if cursor.is_behind(&self.safe, self.direction)? {
            return Err(HarvestError::CursorDirection(format!(
                "checkpoint {} is behind {}",
                cursor.label(),
                self.safe.label()
            )));
        }
        self.entries.push_back(Entry::Checkpoint(cursor));
        Ok(())
    }

    /// Resolve every pending entry given the ids that failed to flush.
    pub fn settle(&mut self, failed: &BTreeSet<String>) -> Result<()> {
        while let Some(entry) = self.entries.pop_front() {
            match entry {
                Entry::Record(id) => {
                    if self.blocked_by.is_none() && failed.contains(&id) {
                        self.blocked_by = Some(id);
                    }
                }
                Entry::Checkpoint(c) => {
                    if self.blocked_by.is_none() && c.is_ahead_of(&self.safe, self.direction)? {
                        self.safe = c;
                    }
                }
            }
        }
        Ok(())
    }

    pub fn safe(&self) -> &HarvestCursor {
        &self.safe
    }

    /// First record that failed to flush, if any.
    pub fn blocked_by(&self) -> Option<&str> {
        self.blocked_by.as_deref()
    }
}
