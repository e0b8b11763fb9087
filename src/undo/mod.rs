//! Undo/redo history
//!
//! Every mutating edit records the operation that reverses it. Operations
//! recorded while a group is open are nested into that group, so one user
//! action becomes one undo step regardless of how many primitive edits it
//! fans out into.

use std::collections::{BTreeSet, VecDeque};

use crate::models::{BeatKey, BeatTree, OpusChannel, OpusLine};

pub const DEFAULT_HISTORY_SIZE: usize = 256;

/// A primitive edit that reverses an earlier one
#[derive(Clone, Debug, PartialEq)]
pub enum UndoOp {
    /// Put `tree` back at `position` of the beat
    ReplaceTree {
        beat_key: BeatKey,
        position: Vec<usize>,
        tree: BeatTree,
    },
    /// Insert a beat column, optionally with one tree per line in channel/line order
    InsertBeat {
        index: usize,
        column: Option<Vec<BeatTree>>,
    },
    RemoveBeat {
        index: usize,
    },
    InsertLine {
        channel: usize,
        line_offset: usize,
        line: OpusLine,
        /// Percussion instrument the line was mapped to
        instrument: Option<i32>,
    },
    RemoveLine {
        channel: usize,
        line_offset: usize,
    },
    /// Restore a removed channel with its original uuid
    InsertChannel {
        index: usize,
        channel: OpusChannel,
    },
    RemoveChannel {
        uuid: u32,
    },
    RestoreLinkPools {
        pools: Vec<BTreeSet<BeatKey>>,
    },
    SetLineVolume {
        channel: usize,
        line_offset: usize,
        volume: u8,
    },
    SetChannelInstrument {
        channel: usize,
        bank: u8,
        program: u8,
    },
    SetPercussionInstrument {
        line_offset: usize,
        instrument: Option<i32>,
    },
    SetProjectName(String),
    SetTempo(f32),
    SetTranspose(i32),
}

/// One node of the history tree
#[derive(Clone, Debug, PartialEq)]
pub enum HistoryEntry {
    Op(UndoOp),
    /// Operations applied together, undone in reverse order
    Group(Vec<HistoryEntry>),
    /// Marks the state at the last save
    SavePoint,
}

/// Which stack closed entries are pushed onto
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Recording {
    /// A fresh user edit; invalidates the redo stack
    Forward,
    /// Inverses recorded while replaying an undo
    Undoing,
    /// Inverses recorded while replaying a redo
    Redoing,
}

#[derive(Clone, Debug)]
pub struct HistoryCache {
    undo: VecDeque<HistoryEntry>,
    redo: Vec<HistoryEntry>,
    /// Groups currently being built, innermost last
    open: Vec<Vec<HistoryEntry>>,
    lock: usize,
    recording: Recording,
    max_size: usize,
}

impl Default for HistoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_SIZE)
    }
}

impl HistoryCache {
    /// Create a history keeping at most `max_size` undo steps
    pub fn new(max_size: usize) -> Self {
        Self {
            undo: VecDeque::new(),
            redo: Vec::new(),
            open: Vec::new(),
            lock: 0,
            recording: Recording::Forward,
            max_size: max_size.max(1),
        }
    }

    pub fn is_locked(&self) -> bool {
        self.lock > 0
    }

    /// Suppress recording until the matching `unlock`
    pub fn lock(&mut self) {
        self.lock += 1;
    }

    pub fn unlock(&mut self) {
        self.lock = self.lock.saturating_sub(1);
    }

    pub fn set_recording(&mut self, recording: Recording) {
        self.recording = recording;
    }

    pub fn open_multi(&mut self) {
        if self.is_locked() {
            return;
        }
        self.open.push(Vec::new());
    }

    /// Close the innermost group. Empty groups are dropped and single-entry groups unwrapped.
    pub fn close_multi(&mut self) {
        if self.is_locked() {
            return;
        }
        let Some(mut group) = self.open.pop() else {
            return;
        };

        let entry = match group.len() {
            0 => return,
            1 => group.remove(0),
            _ => HistoryEntry::Group(group),
        };
        self.push(entry);
    }

    /// Drop the innermost group, handing back what it recorded so far
    pub fn cancel_multi(&mut self) -> Option<HistoryEntry> {
        if self.is_locked() {
            return None;
        }
        let group = self.open.pop()?;
        if group.is_empty() {
            None
        } else {
            Some(HistoryEntry::Group(group))
        }
    }

    pub fn append_undoer(&mut self, op: UndoOp) {
        if self.is_locked() {
            return;
        }
        self.push(HistoryEntry::Op(op));
    }

    pub fn push_save_point(&mut self) {
        if self.is_locked() {
            return;
        }
        self.push(HistoryEntry::SavePoint);
    }

    fn push(&mut self, entry: HistoryEntry) {
        if let Some(group) = self.open.last_mut() {
            group.push(entry);
            return;
        }

        match self.recording {
            Recording::Undoing => self.redo.push(entry),
            Recording::Forward | Recording::Redoing => {
                if self.recording == Recording::Forward && !matches!(entry, HistoryEntry::SavePoint) {
                    self.redo.clear();
                }
                self.undo.push_back(entry);
                while self.undo.len() > self.max_size {
                    self.undo.pop_front();
                }
            }
        }
    }

    pub fn pop(&mut self) -> Option<HistoryEntry> {
        self.undo.pop_back()
    }

    pub fn peek(&self) -> Option<&HistoryEntry> {
        self.undo.back()
    }

    pub fn pop_redo(&mut self) -> Option<HistoryEntry> {
        self.redo.pop()
    }

    /// Put back an entry whose undo failed
    pub fn reinstate_undo(&mut self, entry: HistoryEntry) {
        self.undo.push_back(entry);
    }

    /// Put back an entry whose redo failed
    pub fn reinstate_redo(&mut self, entry: HistoryEntry) {
        self.redo.push(entry);
    }

    pub fn has_history(&self) -> bool {
        self.undo.iter().any(|entry| !matches!(entry, HistoryEntry::SavePoint))
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn undo_count(&self) -> usize {
        self.undo.len()
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
        self.open.clear();
        self.lock = 0;
        self.recording = Recording::Forward;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tempo(bpm: f32) -> UndoOp {
        UndoOp::SetTempo(bpm)
    }

    #[test]
    fn test_group_collects_nested_ops() {
        let mut cache = HistoryCache::default();
        cache.open_multi();
        cache.append_undoer(tempo(90.0));
        cache.open_multi();
        cache.append_undoer(tempo(100.0));
        cache.append_undoer(tempo(110.0));
        cache.close_multi();
        cache.close_multi();

        assert_eq!(cache.undo_count(), 1);
        match cache.pop() {
            Some(HistoryEntry::Group(entries)) => {
                assert_eq!(entries.len(), 2);
                assert_eq!(entries[0], HistoryEntry::Op(tempo(90.0)));
                assert!(matches!(entries[1], HistoryEntry::Group(_)));
            }
            other => panic!("unexpected entry {:?}", other),
        }
    }

    #[test]
    fn test_single_entry_group_is_unwrapped() {
        let mut cache = HistoryCache::default();
        cache.open_multi();
        cache.append_undoer(tempo(90.0));
        cache.close_multi();
        assert_eq!(cache.peek(), Some(&HistoryEntry::Op(tempo(90.0))));
    }

    #[test]
    fn test_empty_group_is_dropped() {
        let mut cache = HistoryCache::default();
        cache.open_multi();
        cache.close_multi();
        assert!(!cache.has_history());
    }

    #[test]
    fn test_lock_suppresses_recording() {
        let mut cache = HistoryCache::default();
        cache.lock();
        cache.open_multi();
        cache.append_undoer(tempo(90.0));
        cache.close_multi();
        cache.unlock();
        assert_eq!(cache.undo_count(), 0);
    }

    #[test]
    fn test_cancel_returns_partial_group() {
        let mut cache = HistoryCache::default();
        cache.open_multi();
        cache.append_undoer(tempo(90.0));
        let cancelled = cache.cancel_multi();
        assert_eq!(cancelled, Some(HistoryEntry::Group(vec![HistoryEntry::Op(tempo(90.0))])));
        assert!(!cache.has_history());
    }

    #[test]
    fn test_forward_edit_clears_redo() {
        let mut cache = HistoryCache::default();
        cache.set_recording(Recording::Undoing);
        cache.append_undoer(tempo(90.0));
        cache.set_recording(Recording::Forward);
        assert!(cache.can_redo());

        cache.push_save_point();
        assert!(cache.can_redo());

        cache.append_undoer(tempo(100.0));
        assert!(!cache.can_redo());
    }

    #[test]
    fn test_max_size_drops_oldest() {
        let mut cache = HistoryCache::new(2);
        for bpm in [60.0, 70.0, 80.0] {
            cache.append_undoer(tempo(bpm));
        }
        assert_eq!(cache.undo_count(), 2);
        assert_eq!(cache.pop(), Some(HistoryEntry::Op(tempo(80.0))));
        assert_eq!(cache.pop(), Some(HistoryEntry::Op(tempo(70.0))));
        assert_eq!(cache.pop(), None);
    }
}
