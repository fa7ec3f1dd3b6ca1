//! Local undo/redo stack of surface snapshots.
//!
//! History never touches the shared event log and is not propagated to
//! other participants.

use crate::config::DEFAULT_MAX_HISTORY;

/// Snapshot stack with a cursor. Entry 0 is the state before any gesture.
#[derive(Debug, Clone)]
pub struct HistoryStack<S> {
    entries: Vec<S>,
    index: usize,
    max_entries: usize,
}

impl<S> HistoryStack<S> {
    pub fn new(initial: S) -> Self {
        Self::with_limit(initial, DEFAULT_MAX_HISTORY)
    }

    /// Keep at most `max_entries` snapshots (at least one); the oldest go first.
    pub fn with_limit(initial: S, max_entries: usize) -> Self {
        Self {
            entries: vec![initial],
            index: 0,
            max_entries: max_entries.max(1),
        }
    }

    /// Record the state after a completed gesture, discarding any redo entries.
    pub fn push(&mut self, snapshot: S) {
        self.entries.truncate(self.index + 1);
        self.entries.push(snapshot);
        if self.entries.len() > self.max_entries {
            let excess = self.entries.len() - self.max_entries;
            self.entries.drain(..excess);
        }
        self.index = self.entries.len() - 1;
    }

    /// Step back. Returns the snapshot to restore, or `None` at the bottom.
    pub fn undo(&mut self) -> Option<&S> {
        if !self.can_undo() {
            return None;
        }
        self.index -= 1;
        self.entries.get(self.index)
    }

    /// Step forward. Returns the snapshot to restore, or `None` at the top.
    pub fn redo(&mut self) -> Option<&S> {
        if !self.can_redo() {
            return None;
        }
        self.index += 1;
        self.entries.get(self.index)
    }

    pub fn can_undo(&self) -> bool {
        self.index > 0
    }

    pub fn can_redo(&self) -> bool {
        self.index + 1 < self.entries.len()
    }

    pub fn current(&self) -> &S {
        &self.entries[self.index]
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop everything and start again from `initial`.
    pub fn reset(&mut self, initial: S) {
        self.entries.clear();
        self.entries.push(initial);
        self.index = 0;
    }
}
