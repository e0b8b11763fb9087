//! Undo and redo replay
//!
//! Recorded operations are applied straight to the core: link pools are
//! restored from their own snapshots rather than fanned out again. Applying an
//! operation yields its inverse, which is recorded onto the opposite stack.

use super::errors::Result;
use super::manager::OpusManager;
use crate::undo::{HistoryEntry, Recording, UndoOp};

impl OpusManager {
    /// Apply one primitive operation, returning the operation that reverses it
    fn apply_op(&mut self, op: UndoOp) -> Result<UndoOp> {
        let core = &mut self.core;
        let inverse = match op {
            UndoOp::ReplaceTree {
                beat_key,
                position,
                tree,
            } => {
                let current = core.get_tree(beat_key, &position)?.to_tree();
                core.replace_tree(beat_key, &position, tree)?;
                UndoOp::ReplaceTree {
                    beat_key,
                    position,
                    tree: current,
                }
            }
            UndoOp::InsertBeat { index, column } => {
                core.insert_beat(index, column)?;
                UndoOp::RemoveBeat { index }
            }
            UndoOp::RemoveBeat { index } => {
                let column = core.remove_beat(index)?;
                UndoOp::InsertBeat {
                    index,
                    column: Some(column),
                }
            }
            UndoOp::InsertLine {
                channel,
                line_offset,
                line,
                instrument,
            } => {
                core.insert_line(channel, line_offset, line, instrument)?;
                UndoOp::RemoveLine { channel, line_offset }
            }
            UndoOp::RemoveLine { channel, line_offset } => {
                let (line, instrument) = core.remove_line(channel, line_offset)?;
                UndoOp::InsertLine {
                    channel,
                    line_offset,
                    line,
                    instrument,
                }
            }
            UndoOp::InsertChannel { index, channel } => {
                let uuid = channel.uuid;
                core.insert_channel(index, channel)?;
                UndoOp::RemoveChannel { uuid }
            }
            UndoOp::RemoveChannel { uuid } => {
                let (index, channel) = core.remove_channel_by_uuid(uuid)?;
                UndoOp::InsertChannel { index, channel }
            }
            UndoOp::RestoreLinkPools { pools } => {
                let current = self.links.snapshot();
                self.links.restore(pools);
                UndoOp::RestoreLinkPools { pools: current }
            }
            UndoOp::SetLineVolume {
                channel,
                line_offset,
                volume,
            } => UndoOp::SetLineVolume {
                channel,
                line_offset,
                volume: core.set_line_volume(channel, line_offset, volume)?,
            },
            UndoOp::SetChannelInstrument { channel, bank, program } => {
                let (bank, program) = core.set_channel_instrument(channel, bank, program)?;
                UndoOp::SetChannelInstrument { channel, bank, program }
            }
            UndoOp::SetPercussionInstrument {
                line_offset,
                instrument,
            } => UndoOp::SetPercussionInstrument {
                line_offset,
                instrument: core.set_percussion_instrument(line_offset, instrument)?,
            },
            UndoOp::SetProjectName(name) => UndoOp::SetProjectName(core.set_project_name(name)),
            UndoOp::SetTempo(tempo) => UndoOp::SetTempo(core.set_tempo(tempo)),
            UndoOp::SetTranspose(transpose) => UndoOp::SetTranspose(core.set_transpose(transpose)),
        };
        Ok(inverse)
    }

    /// Replay an entry, groups last-to-first, recording each inverse
    fn apply_entry(&mut self, entry: HistoryEntry) -> Result<()> {
        match entry {
            HistoryEntry::Op(op) => {
                let inverse = self.apply_op(op)?;
                self.history.append_undoer(inverse);
                Ok(())
            }
            HistoryEntry::Group(entries) => self.remember(|manager| {
                for entry in entries.into_iter().rev() {
                    manager.apply_entry(entry)?;
                }
                Ok(())
            }),
            HistoryEntry::SavePoint => Ok(()),
        }
    }

    /// Reverse a partially recorded group without recording anything
    pub(super) fn rollback(&mut self, partial: HistoryEntry) {
        let result = self.forget(|manager| manager.apply_entry(partial));
        if let Err(e) = result {
            log::error!("rollback failed, opus may be inconsistent: {}", e);
        }
    }

    /// Undo the most recent step. Returns false when there was nothing to undo.
    pub fn apply_undo(&mut self) -> Result<bool> {
        let entry = loop {
            match self.history.pop() {
                None => return Ok(false),
                Some(HistoryEntry::SavePoint) => self.save_point_popped = true,
                Some(entry) => break entry,
            }
        };

        log::debug!("undo");
        self.history.set_recording(Recording::Undoing);
        let result = self.remember(|manager| manager.apply_entry(entry.clone()));
        self.history.set_recording(Recording::Forward);

        if let Err(e) = result {
            self.history.reinstate_undo(entry);
            return Err(e);
        }
        Ok(true)
    }

    /// Redo the most recently undone step. Returns false when there was nothing to redo.
    pub fn apply_redo(&mut self) -> Result<bool> {
        let Some(entry) = self.history.pop_redo() else {
            return Ok(false);
        };

        log::debug!("redo");
        self.history.set_recording(Recording::Redoing);
        let result = self.remember(|manager| manager.apply_entry(entry.clone()));
        self.history.set_recording(Recording::Forward);

        if let Err(e) = result {
            self.history.reinstate_redo(entry);
            return Err(e);
        }
        Ok(true)
    }

    pub fn has_history(&self) -> bool {
        self.history.has_history()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
        self.save_point_popped = false;
    }

    /// Mark the current state as saved
    pub(super) fn mark_saved(&mut self) {
        self.history.push_save_point();
        self.save_point_popped = false;
    }

    /// Whether any edit has been made, or undone, since the last save
    pub fn has_changed_since_save(&self) -> bool {
        if self.save_point_popped {
            return true;
        }
        !matches!(self.history.peek(), None | Some(HistoryEntry::SavePoint))
    }
}

#[cfg(test)]
mod tests {
    use crate::models::{BeatKey, OpusEvent};
    use crate::opusmanager::OpusManager;

    fn key(channel: usize, line_offset: usize, beat: usize) -> BeatKey {
        BeatKey::new(channel, line_offset, beat)
    }

    #[test]
    fn test_undo_without_history_is_noop() {
        let mut manager = OpusManager::new();
        assert!(!manager.apply_undo().unwrap());
        assert_eq!(manager.beat_count(), 4);
    }

    #[test]
    fn test_undo_redo_tempo() {
        let mut manager = OpusManager::new();
        manager.set_tempo(90.0);
        assert!(manager.apply_undo().unwrap());
        assert_eq!(manager.tempo(), 120.0);
        assert!(manager.apply_redo().unwrap());
        assert_eq!(manager.tempo(), 90.0);
        assert!(manager.apply_undo().unwrap());
        assert_eq!(manager.tempo(), 120.0);
    }

    #[test]
    fn test_undo_restores_split_subtree() {
        let mut manager = OpusManager::new();
        let beat = key(0, 0, 0);
        let event = OpusEvent::absolute(12, 12, 0);
        manager.split_tree(beat, &[], 3).unwrap();
        manager.set_event(beat, &[1], event).unwrap();
        manager.remove(beat, &[1]).unwrap();
        assert_eq!(manager.get_tree(beat, &[]).unwrap().size(), 2);

        manager.apply_undo().unwrap();
        assert_eq!(manager.get_tree(beat, &[]).unwrap().size(), 3);
        assert_eq!(manager.get_tree(beat, &[1]).unwrap().event(), Some(&event));
    }

    #[test]
    fn test_save_point_tracking() {
        let mut manager = OpusManager::new();
        assert!(!manager.has_changed_since_save());
        manager.set_transpose(2);
        assert!(manager.has_changed_since_save());
        manager.mark_saved();
        assert!(!manager.has_changed_since_save());
        manager.apply_undo().unwrap();
        assert!(manager.has_changed_since_save());
        assert_eq!(manager.transpose(), 0);
    }
}
