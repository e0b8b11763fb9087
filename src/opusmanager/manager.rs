//! Linked, recorded editing
//!
//! `OpusManager` composes the primitive core with link pools and the undo
//! history. Every mutating call runs inside a history group: beat-content
//! edits fan out over the link pool of their key, structural edits remap the
//! pools, and each primitive step records the operation that reverses it.
//! A call that fails part way is rolled back before the error is returned.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::ops::Deref;

use super::core::OpusManagerCore;
use super::errors::{OpusError, Result};
use super::links::LinkPools;
use crate::converters::midi_import;
use crate::midi::{Midi, MidiSource};
use crate::models::{BeatKey, BeatTree, OpusEvent, OpusLine};
use crate::renderers::midi::defaults::MAX_ABSOLUTE_NOTE;
use crate::undo::{HistoryCache, UndoOp};

#[derive(Debug, Clone)]
pub struct OpusManager {
    pub(super) core: OpusManagerCore,
    pub(super) links: LinkPools,
    pub(super) history: HistoryCache,
    /// Set once undo has stepped back past the last save point
    pub(super) save_point_popped: bool,
}

impl Default for OpusManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for OpusManager {
    type Target = OpusManagerCore;

    fn deref(&self) -> &OpusManagerCore {
        &self.core
    }
}

impl OpusManager {
    pub fn new() -> Self {
        Self::with_core(OpusManagerCore::new(), HistoryCache::default())
    }

    /// Fresh opus whose undo stack keeps at most `max_size` steps
    pub fn with_history_size(max_size: usize) -> Self {
        Self::with_core(OpusManagerCore::new(), HistoryCache::new(max_size))
    }

    pub(super) fn with_core(core: OpusManagerCore, history: HistoryCache) -> Self {
        Self {
            core,
            links: LinkPools::new(),
            history,
            save_point_popped: false,
        }
    }

    /// Discard everything and start a default opus
    pub fn new_opus(&mut self) {
        self.core.new_opus();
        self.reset_session();
    }

    pub fn clear(&mut self) {
        self.core.clear();
        self.reset_session();
    }

    pub(super) fn reset_session(&mut self) {
        self.links.clear();
        self.history.clear();
        self.save_point_popped = false;
    }

    pub fn core(&self) -> &OpusManagerCore {
        &self.core
    }

    pub fn history(&self) -> &HistoryCache {
        &self.history
    }

    pub fn links(&self) -> &LinkPools {
        &self.links
    }

    // ------------------------------------------------------------------
    // Scopes
    // ------------------------------------------------------------------

    /// Run `f` as one undo step. On failure the steps already taken are reversed.
    pub(super) fn remember<R, F>(&mut self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Self) -> Result<R>,
    {
        self.history.open_multi();
        match f(self) {
            Ok(value) => {
                self.history.close_multi();
                Ok(value)
            }
            Err(e) => {
                if let Some(partial) = self.history.cancel_multi() {
                    log::debug!("rolling back partial edit: {}", e);
                    self.rollback(partial);
                }
                Err(e)
            }
        }
    }

    /// Run `f` without recording history
    pub(super) fn forget<R, F>(&mut self, f: F) -> R
    where
        F: FnOnce(&mut Self) -> R,
    {
        self.history.lock();
        let output = f(self);
        self.history.unlock();
        output
    }

    fn lock_links<R, F>(&mut self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Self) -> Result<R>,
    {
        self.links.lock();
        let output = f(self);
        self.links.unlock();
        output
    }

    /// Apply `edit` to `beat_key` and every key linked to it, recording the
    /// subtree at `record_at` as it was before
    fn edit_linked<F>(&mut self, beat_key: BeatKey, record_at: Vec<usize>, edit: F) -> Result<()>
    where
        F: Fn(&mut OpusManagerCore, BeatKey) -> Result<()>,
    {
        self.remember(|manager| {
            manager.lock_links(|manager| {
                for key in manager.links.get_all_linked(beat_key) {
                    let previous = manager.core.get_tree(key, &record_at)?.to_tree();
                    edit(&mut manager.core, key)?;
                    manager.history.append_undoer(UndoOp::ReplaceTree {
                        beat_key: key,
                        position: record_at.clone(),
                        tree: previous,
                    });
                }
                Ok(())
            })
        })
    }

    fn record_link_pools(&mut self) {
        self.history.append_undoer(UndoOp::RestoreLinkPools {
            pools: self.links.snapshot(),
        });
    }

    /// Move every linked key through `f` after a structural edit
    fn remap_links<F>(&mut self, f: F)
    where
        F: Fn(BeatKey) -> Option<BeatKey>,
    {
        if self.links.is_empty() {
            return;
        }
        self.record_link_pools();
        self.links.remap(f);
    }

    // ------------------------------------------------------------------
    // Beat content
    // ------------------------------------------------------------------

    pub fn set_event(&mut self, beat_key: BeatKey, position: &[usize], event: OpusEvent) -> Result<()> {
        self.edit_linked(beat_key, position.to_vec(), |core, key| core.set_event(key, position, event))
    }

    pub fn set_percussion_event(&mut self, beat_key: BeatKey, position: &[usize]) -> Result<()> {
        self.edit_linked(beat_key, position.to_vec(), |core, key| core.set_percussion_event(key, position))
    }

    pub fn unset(&mut self, beat_key: BeatKey, position: &[usize]) -> Result<()> {
        self.edit_linked(beat_key, position.to_vec(), |core, key| core.unset(key, position))
    }

    pub fn split_tree(&mut self, beat_key: BeatKey, position: &[usize], splits: usize) -> Result<()> {
        self.edit_linked(beat_key, position.to_vec(), |core, key| core.split_tree(key, position, splits))
    }

    pub fn insert(&mut self, beat_key: BeatKey, position: &[usize]) -> Result<()> {
        let (_, parent) = position.split_last().ok_or(OpusError::BadInsertPosition)?;
        self.edit_linked(beat_key, parent.to_vec(), |core, key| core.insert(key, position))
    }

    pub fn insert_after(&mut self, beat_key: BeatKey, position: &[usize]) -> Result<()> {
        let (_, parent) = position.split_last().ok_or(OpusError::BadInsertPosition)?;
        self.edit_linked(beat_key, parent.to_vec(), |core, key| core.insert_after(key, position))
    }

    pub fn remove(&mut self, beat_key: BeatKey, position: &[usize]) -> Result<()> {
        if position.is_empty() {
            self.core.get_beat_tree(beat_key)?;
            return Ok(());
        }
        let removal_root = self.core.get_removal_root(beat_key, position)?;
        self.edit_linked(beat_key, removal_root, |core, key| core.remove(key, position))
    }

    pub fn replace_tree(&mut self, beat_key: BeatKey, position: &[usize], tree: &BeatTree) -> Result<()> {
        self.edit_linked(beat_key, position.to_vec(), |core, key| {
            core.replace_tree(key, position, tree.clone())
        })
    }

    pub fn replace_beat_tree(&mut self, beat_key: BeatKey, tree: &BeatTree) -> Result<()> {
        self.replace_tree(beat_key, &[], tree)
    }

    /// Copy the content of `new_beat` over `old_beat`
    pub fn overwrite_beat(&mut self, old_beat: BeatKey, new_beat: BeatKey) -> Result<()> {
        let tree = self.core.get_beat_tree(new_beat)?.clone();
        self.replace_tree(old_beat, &[], &tree)
    }

    /// Copy the rectangle spanned by two corners so its top-left lands on `beat_key`
    pub fn overwrite_beat_range(&mut self, beat_key: BeatKey, first_corner: BeatKey, second_corner: BeatKey) -> Result<()> {
        let (from, to) = self.core.get_ordered_beat_key_pair(first_corner, second_corner)?;
        let from_line = self.core.get_abs_offset(from.channel, from.line_offset)?;
        let to_line = self.core.get_abs_offset(to.channel, to.line_offset)?;
        let target_line = self.core.get_abs_offset(beat_key.channel, beat_key.line_offset)?;

        // read every source before writing so overlapping ranges copy cleanly
        let mut writes = Vec::new();
        for k in 0..=(to_line - from_line) {
            let (source_channel, source_line) = self.core.get_std_offset(from_line + k)?;
            let (target_channel, target_line) = self.core.get_std_offset(target_line + k)?;
            for b in 0..=(to.beat - from.beat) {
                let source = BeatKey::new(source_channel, source_line, from.beat + b);
                let target = BeatKey::new(target_channel, target_line, beat_key.beat + b);
                self.core.get_beat_tree(target)?;
                writes.push((target, self.core.get_beat_tree(source)?.clone()));
            }
        }

        self.remember(|manager| {
            for (target, tree) in &writes {
                manager.replace_tree(*target, &[], tree)?;
            }
            Ok(())
        })
    }

    /// Move the subtree at one position to another, leaving the source empty
    pub fn move_leaf(
        &mut self,
        beatkey_from: BeatKey,
        position_from: &[usize],
        beatkey_to: BeatKey,
        position_to: &[usize],
    ) -> Result<()> {
        let tree = self.core.get_tree(beatkey_from, position_from)?.to_tree();
        self.remember(|manager| {
            manager.replace_tree(beatkey_to, position_to, &tree)?;
            manager.unset(beatkey_from, position_from)
        })
    }

    /// Rewrite an absolute event as a delta from the nearest resolvable value before it
    pub fn convert_event_to_relative(&mut self, beat_key: BeatKey, position: &[usize]) -> Result<()> {
        let event = self.event_for_conversion(beat_key, position)?;
        if event.relative {
            return Ok(());
        }

        let mut preceding_value = None;
        let mut cursor = self.core.get_preceding_leaf_position(beat_key, position)?;
        while let Some((key, path)) = cursor {
            preceding_value = self.core.get_absolute_value(key, &path)?;
            if preceding_value.is_some() {
                break;
            }
            cursor = self.core.get_preceding_leaf_position(key, &path)?;
        }

        let note = match preceding_value {
            Some(value) => event.note - value,
            None => event.note,
        };
        self.set_event(beat_key, position, OpusEvent::relative(note, event.radix, event.channel))
    }

    /// Resolve a relative event to the absolute note it sounds as
    pub fn convert_event_to_absolute(&mut self, beat_key: BeatKey, position: &[usize]) -> Result<()> {
        let event = self.event_for_conversion(beat_key, position)?;
        if !event.relative {
            return Ok(());
        }

        let value = self.core.get_absolute_value(beat_key, position)?.unwrap_or(event.note);
        if !(0..=MAX_ABSOLUTE_NOTE).contains(&value) {
            return Err(OpusError::NoteOutOfRange(value));
        }
        self.set_event(beat_key, position, OpusEvent::absolute(value, event.radix, event.channel))
    }

    fn event_for_conversion(&self, beat_key: BeatKey, position: &[usize]) -> Result<OpusEvent> {
        self.core
            .get_tree(beat_key, position)?
            .event()
            .copied()
            .ok_or_else(|| OpusError::NonEventConversion {
                beat_key,
                position: position.to_vec(),
            })
    }

    // ------------------------------------------------------------------
    // Beat columns
    // ------------------------------------------------------------------

    pub fn insert_beat(&mut self, index: usize, column: Option<Vec<BeatTree>>) -> Result<()> {
        self.remember(|manager| {
            manager.core.insert_beat(index, column)?;
            manager.history.append_undoer(UndoOp::RemoveBeat { index });
            manager.remap_links(|key| {
                if key.beat >= index {
                    Some(key.with_beat(key.beat + 1))
                } else {
                    Some(key)
                }
            });
            Ok(())
        })
    }

    pub fn insert_beats(&mut self, index: usize, count: usize) -> Result<()> {
        self.remember(|manager| {
            for _ in 0..count {
                manager.insert_beat(index, None)?;
            }
            Ok(())
        })
    }

    pub fn remove_beat(&mut self, index: usize) -> Result<()> {
        self.remember(|manager| {
            let column = manager.core.remove_beat(index)?;
            manager.history.append_undoer(UndoOp::InsertBeat {
                index,
                column: Some(column),
            });
            manager.remap_links(|key| match key.beat.cmp(&index) {
                Ordering::Less => Some(key),
                Ordering::Equal => None,
                Ordering::Greater => Some(key.with_beat(key.beat - 1)),
            });
            Ok(())
        })
    }

    pub fn remove_beats(&mut self, index: usize, count: usize) -> Result<()> {
        self.remember(|manager| {
            for _ in 0..count {
                manager.remove_beat(index)?;
            }
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Lines
    // ------------------------------------------------------------------

    pub fn new_line(&mut self, channel: usize, line_offset: Option<usize>) -> Result<usize> {
        self.remember(|manager| {
            let offset = manager.core.new_line(channel, line_offset)?;
            manager.history.append_undoer(UndoOp::RemoveLine {
                channel,
                line_offset: offset,
            });
            manager.remap_links(shift_lines_from(channel, offset));
            Ok(offset)
        })
    }

    pub fn new_lines(&mut self, channel: usize, line_offset: Option<usize>, count: usize) -> Result<()> {
        self.remember(|manager| {
            for _ in 0..count {
                manager.new_line(channel, line_offset)?;
            }
            Ok(())
        })
    }

    pub fn insert_line(
        &mut self,
        channel: usize,
        line_offset: usize,
        line: OpusLine,
        instrument: Option<i32>,
    ) -> Result<()> {
        self.remember(|manager| {
            manager.core.insert_line(channel, line_offset, line, instrument)?;
            manager.history.append_undoer(UndoOp::RemoveLine { channel, line_offset });
            manager.remap_links(shift_lines_from(channel, line_offset));
            Ok(())
        })
    }

    pub fn remove_line(&mut self, channel: usize, line_offset: usize) -> Result<OpusLine> {
        self.remember(|manager| {
            let (line, instrument) = manager.core.remove_line(channel, line_offset)?;
            manager.history.append_undoer(UndoOp::InsertLine {
                channel,
                line_offset,
                line: line.clone(),
                instrument,
            });
            manager.remap_links(move |key| {
                if key.channel != channel || key.line_offset < line_offset {
                    Some(key)
                } else if key.line_offset == line_offset {
                    None
                } else {
                    Some(BeatKey::new(channel, key.line_offset - 1, key.beat))
                }
            });
            Ok(line)
        })
    }

    /// Move a line so it sits at `line_new` of `channel_new`. Links on the moved
    /// line follow it. A channel left without lines gets a fresh empty one.
    pub fn move_line(&mut self, channel_old: usize, line_old: usize, channel_new: usize, line_new: usize) -> Result<()> {
        self.core.check_line_move(channel_old, line_old, channel_new, line_new)?;
        if channel_old == channel_new && (line_new == line_old || line_new == line_old + 1) {
            return Ok(());
        }

        self.remember(|manager| {
            if manager.core.channel(channel_old)?.line_count() == 1 {
                manager.new_line(channel_old, None)?;
            }
            let target = manager.core.resolve_move_target(channel_old, line_old, channel_new, line_new);

            let (line, instrument) = manager.core.remove_line(channel_old, line_old)?;
            manager.history.append_undoer(UndoOp::InsertLine {
                channel: channel_old,
                line_offset: line_old,
                line: line.clone(),
                instrument,
            });
            manager.core.insert_line(channel_new, target, line, instrument)?;
            manager.history.append_undoer(UndoOp::RemoveLine {
                channel: channel_new,
                line_offset: target,
            });

            manager.remap_links(move |key| {
                if key.channel == channel_old && key.line_offset == line_old {
                    return Some(BeatKey::new(channel_new, target, key.beat));
                }
                let mut moved = key;
                if moved.channel == channel_old && moved.line_offset > line_old {
                    moved.line_offset -= 1;
                }
                if moved.channel == channel_new && moved.line_offset >= target {
                    moved.line_offset += 1;
                }
                Some(moved)
            });
            log::debug!("moved line ({}, {}) to ({}, {})", channel_old, line_old, channel_new, target);
            Ok(())
        })
    }

    pub fn set_line_volume(&mut self, channel: usize, line_offset: usize, volume: u8) -> Result<()> {
        let previous = self.core.set_line_volume(channel, line_offset, volume)?;
        self.history.append_undoer(UndoOp::SetLineVolume {
            channel,
            line_offset,
            volume: previous,
        });
        Ok(())
    }

    pub fn set_percussion_instrument(&mut self, line_offset: usize, instrument: i32) -> Result<()> {
        let previous = self.core.set_percussion_instrument(line_offset, Some(instrument))?;
        self.history.append_undoer(UndoOp::SetPercussionInstrument {
            line_offset,
            instrument: previous,
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Channels
    // ------------------------------------------------------------------

    /// Add a channel before the percussion channel, returning its index
    pub fn new_channel(&mut self, index: Option<usize>, lines: usize, uuid: Option<u32>) -> Result<usize> {
        self.remember(|manager| {
            let index = manager.core.new_channel(index, lines, uuid);
            let uuid = manager.core.channel(index)?.uuid;
            manager.history.append_undoer(UndoOp::RemoveChannel { uuid });
            manager.remap_links(move |key| {
                if key.channel >= index {
                    Some(BeatKey::new(key.channel + 1, key.line_offset, key.beat))
                } else {
                    Some(key)
                }
            });
            Ok(index)
        })
    }

    pub fn remove_channel(&mut self, index: usize) -> Result<()> {
        self.remember(|manager| {
            let channel = manager.core.remove_channel(index)?;
            manager.history.append_undoer(UndoOp::InsertChannel { index, channel });
            manager.remap_links(move |key| match key.channel.cmp(&index) {
                Ordering::Less => Some(key),
                Ordering::Equal => None,
                Ordering::Greater => Some(BeatKey::new(key.channel - 1, key.line_offset, key.beat)),
            });
            Ok(())
        })
    }

    pub fn remove_channel_by_uuid(&mut self, uuid: u32) -> Result<()> {
        let index = self.core.channel_index_of(uuid)?;
        self.remove_channel(index)
    }

    pub fn set_channel_instrument(&mut self, channel: usize, bank: u8, program: u8) -> Result<()> {
        let (previous_bank, previous_program) = self.core.set_channel_instrument(channel, bank, program)?;
        self.history.append_undoer(UndoOp::SetChannelInstrument {
            channel,
            bank: previous_bank,
            program: previous_program,
        });
        Ok(())
    }

    pub fn set_channel_program(&mut self, channel: usize, program: u8) -> Result<()> {
        let (bank, _) = self.core.get_channel_instrument(channel)?;
        self.set_channel_instrument(channel, bank, program)
    }

    pub fn set_channel_bank(&mut self, channel: usize, bank: u8) -> Result<()> {
        let (_, program) = self.core.get_channel_instrument(channel)?;
        self.set_channel_instrument(channel, bank, program)
    }

    // ------------------------------------------------------------------
    // Project settings
    // ------------------------------------------------------------------

    pub fn set_tempo(&mut self, tempo: f32) {
        let previous = self.core.set_tempo(tempo);
        self.history.append_undoer(UndoOp::SetTempo(previous));
    }

    pub fn set_transpose(&mut self, transpose: i32) {
        let previous = self.core.set_transpose(transpose);
        self.history.append_undoer(UndoOp::SetTranspose(previous));
    }

    pub fn set_project_name(&mut self, name: &str) {
        let previous = self.core.set_project_name(name.to_string());
        self.history.append_undoer(UndoOp::SetProjectName(previous));
    }

    // ------------------------------------------------------------------
    // Links
    // ------------------------------------------------------------------

    pub fn get_all_linked(&self, beat_key: BeatKey) -> Vec<BeatKey> {
        self.links.get_all_linked(beat_key)
    }

    pub fn is_networked(&self, beat_key: BeatKey) -> bool {
        self.links.is_networked(beat_key)
    }

    pub fn linked_have_preceding_absolute_event(&self, beat_key: BeatKey, position: &[usize]) -> Result<bool> {
        for key in self.links.get_all_linked(beat_key) {
            if !self.core.has_preceding_absolute_event(key, position)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Link `beat_key` to `target`. `beat_key` (and its pool) takes the content of `target`.
    pub fn link_beats(&mut self, beat_key: BeatKey, target: BeatKey) -> Result<()> {
        if beat_key == target {
            return Err(OpusError::SelfLink(beat_key));
        }
        self.core.get_beat_tree(beat_key)?;
        self.core.get_beat_tree(target)?;

        let beat_pool = self.links.pool_of(beat_key);
        let target_pool = self.links.pool_of(target);
        if beat_pool.is_some() && beat_pool == target_pool {
            return Ok(());
        }

        self.remember(|manager| {
            manager.record_link_pools();
            manager.overwrite_beat(beat_key, target)?;
            match (beat_pool, target_pool) {
                (Some(first), Some(second)) => manager.links.merge_pools(first, second),
                (Some(pool), None) => manager.links.link_into(target, pool),
                (None, Some(pool)) => manager.links.link_into(beat_key, pool),
                (None, None) => manager.links.create_pool([beat_key, target]),
            }
            Ok(())
        })
    }

    pub fn batch_link_beats(&mut self, pairs: &[(BeatKey, BeatKey)]) -> Result<()> {
        self.remember(|manager| {
            for (beat_key, target) in pairs {
                manager.link_beats(*beat_key, *target)?;
            }
            Ok(())
        })
    }

    /// Link the rectangle spanned by two corners to an equally sized one starting at `beat`
    pub fn link_beat_range(&mut self, beat: BeatKey, target_a: BeatKey, target_b: BeatKey) -> Result<()> {
        let (from, to) = self
            .core
            .get_ordered_beat_key_pair(target_a, target_b)
            .map_err(|_| OpusError::InvalidBeatKeyRange(target_a, target_b))?;
        let from_line = self.core.get_abs_offset(from.channel, from.line_offset)?;
        let to_line = self.core.get_abs_offset(to.channel, to.line_offset)?;
        let start_line = self.core.get_abs_offset(beat.channel, beat.line_offset)?;
        let line_span = to_line - from_line;
        let width = to.beat - from.beat;

        if (from.beat..=to.beat).contains(&beat.beat) && (from_line..=to_line).contains(&start_line) {
            return Err(OpusError::LinkRangeOverlap { from, to, start: beat });
        }
        if beat.beat + width >= self.core.beat_count() || start_line + line_span >= self.core.get_total_line_count() {
            return Err(OpusError::LinkRangeOverflow { from, to, start: beat });
        }

        let mut pairs = Vec::new();
        for k in 0..=line_span {
            let (target_channel, target_line) = self.core.get_std_offset(start_line + k)?;
            let (source_channel, source_line) = self.core.get_std_offset(from_line + k)?;
            for b in 0..=width {
                pairs.push((
                    BeatKey::new(target_channel, target_line, beat.beat + b),
                    BeatKey::new(source_channel, source_line, from.beat + b),
                ));
            }
        }
        self.batch_link_beats(&pairs)
    }

    /// Link every beat of column `column` to `beat_key`
    pub fn link_column(&mut self, beat_key: BeatKey, column: usize) -> Result<()> {
        if column >= self.core.beat_count() {
            return Err(OpusError::BadBeatIndex(column));
        }
        let mut keys = Vec::new();
        for (channel, opus_channel) in self.core.channels().iter().enumerate() {
            for line_offset in 0..opus_channel.line_count() {
                keys.push(BeatKey::new(channel, line_offset, column));
            }
        }
        self.link_keys_to(beat_key, keys)
    }

    /// Link every beat of one line to `beat_key`
    pub fn link_row(&mut self, beat_key: BeatKey, channel: usize, line_offset: usize) -> Result<()> {
        self.core.get_beat_tree(BeatKey::new(channel, line_offset, 0))?;
        let keys = (0..self.core.beat_count())
            .map(|beat| BeatKey::new(channel, line_offset, beat))
            .collect();
        self.link_keys_to(beat_key, keys)
    }

    fn link_keys_to(&mut self, beat_key: BeatKey, keys: Vec<BeatKey>) -> Result<()> {
        self.core.get_beat_tree(beat_key)?;
        self.remember(|manager| {
            manager.record_link_pools();
            for key in &keys {
                if *key != beat_key {
                    manager.overwrite_beat(*key, beat_key)?;
                }
            }
            let mut pool: BTreeSet<BeatKey> = keys.into_iter().collect();
            pool.insert(beat_key);
            manager.links.create_pool(pool);
            Ok(())
        })
    }

    pub fn unlink_beat(&mut self, beat_key: BeatKey) {
        if !self.links.is_networked(beat_key) {
            return;
        }
        self.record_link_pools();
        self.links.unlink(beat_key);
    }

    pub fn clear_link_pool(&mut self, beat_key: BeatKey) {
        if !self.links.is_networked(beat_key) {
            return;
        }
        self.record_link_pools();
        self.links.clear_pool(beat_key);
    }

    /// Unlink every key inside the rectangle spanned by two corners
    pub fn clear_link_pools_by_range(&mut self, first_key: BeatKey, second_key: BeatKey) -> Result<()> {
        let keys = self.core.get_beatkeys_in_range(first_key, second_key)?;
        if !keys.iter().any(|key| self.links.is_networked(*key)) {
            return Ok(());
        }
        self.record_link_pools();
        for key in keys {
            self.links.unlink(key);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // MIDI
    // ------------------------------------------------------------------

    /// Replace the opus with one built from `midi`. The active opus is kept if the import fails.
    pub fn import_midi<M: MidiSource>(&mut self, midi: &M) -> Result<()> {
        let core = midi_import::import_midi(midi)?;
        self.core = core;
        self.reset_session();
        Ok(())
    }

    pub fn import_midi_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let midi = Midi::from_bytes(bytes)?;
        self.import_midi(&midi)
    }

    pub fn export_midi_bytes(&self) -> Result<Vec<u8>> {
        Ok(self.core.get_midi(0, None).to_bytes()?)
    }
}

/// Remap for a line inserted at (`channel`, `line_offset`)
fn shift_lines_from(channel: usize, line_offset: usize) -> impl Fn(BeatKey) -> Option<BeatKey> {
    move |key| {
        if key.channel == channel && key.line_offset >= line_offset {
            Some(BeatKey::new(channel, key.line_offset + 1, key.beat))
        } else {
            Some(key)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(channel: usize, line_offset: usize, beat: usize) -> BeatKey {
        BeatKey::new(channel, line_offset, beat)
    }

    fn event(note: i32) -> OpusEvent {
        OpusEvent::absolute(note, 12, 0)
    }

    #[test]
    fn test_failed_edit_records_nothing() {
        let mut manager = OpusManager::new();
        assert!(manager.set_event(key(1, 0, 0), &[], event(3)).is_err());
        assert!(!manager.history().has_history());
    }

    #[test]
    fn test_linked_edit_fans_out() {
        let mut manager = OpusManager::new();
        manager.link_beats(key(0, 0, 0), key(0, 0, 2)).unwrap();
        manager.split_tree(key(0, 0, 2), &[], 2).unwrap();
        manager.set_event(key(0, 0, 0), &[1], event(5)).unwrap();

        let mirrored = manager.get_tree(key(0, 0, 2), &[1]).unwrap().event().copied();
        assert_eq!(mirrored, Some(event(5)));
    }

    #[test]
    fn test_self_link_rejected() {
        let mut manager = OpusManager::new();
        assert!(matches!(
            manager.link_beats(key(0, 0, 1), key(0, 0, 1)),
            Err(OpusError::SelfLink(_))
        ));
    }

    #[test]
    fn test_remove_beat_drops_links() {
        let mut manager = OpusManager::new();
        manager.link_beats(key(0, 0, 0), key(0, 0, 3)).unwrap();
        manager.remove_beat(3).unwrap();
        assert!(!manager.is_networked(key(0, 0, 0)));
    }

    #[test]
    fn test_insert_beat_shifts_links() {
        let mut manager = OpusManager::new();
        manager.link_beats(key(0, 0, 1), key(0, 0, 3)).unwrap();
        manager.insert_beat(2, None).unwrap();
        assert_eq!(manager.get_all_linked(key(0, 0, 1)), vec![key(0, 0, 1), key(0, 0, 4)]);
    }

    #[test]
    fn test_move_line_carries_links() {
        let mut manager = OpusManager::new();
        manager.new_line(0, None).unwrap();
        manager.set_event(key(0, 1, 0), &[], event(9)).unwrap();
        manager.link_beats(key(0, 1, 1), key(0, 1, 0)).unwrap();

        manager.move_line(0, 1, 0, 0).unwrap();
        assert_eq!(manager.get_tree(key(0, 0, 0), &[]).unwrap().event(), Some(&event(9)));
        assert_eq!(manager.get_all_linked(key(0, 0, 0)), vec![key(0, 0, 0), key(0, 0, 1)]);
    }

    #[test]
    fn test_move_line_across_percussion_rejected() {
        let mut manager = OpusManager::new();
        assert!(matches!(
            manager.move_line(0, 0, 1, 0),
            Err(OpusError::IncompatibleChannel { from: 0, to: 1 })
        ));
    }

    #[test]
    fn test_convert_event_round_trip() {
        let mut manager = OpusManager::new();
        manager.set_event(key(0, 0, 0), &[], event(10)).unwrap();
        manager.set_event(key(0, 0, 1), &[], event(14)).unwrap();

        manager.convert_event_to_relative(key(0, 0, 1), &[]).unwrap();
        let relative = manager.get_tree(key(0, 0, 1), &[]).unwrap().event().copied();
        assert_eq!(relative, Some(OpusEvent::relative(4, 12, 0)));

        manager.convert_event_to_absolute(key(0, 0, 1), &[]).unwrap();
        let absolute = manager.get_tree(key(0, 0, 1), &[]).unwrap().event().copied();
        assert_eq!(absolute, Some(event(14)));
    }

    #[test]
    fn test_convert_non_event_fails() {
        let mut manager = OpusManager::new();
        assert!(matches!(
            manager.convert_event_to_relative(key(0, 0, 0), &[]),
            Err(OpusError::NonEventConversion { .. })
        ));
    }

    #[test]
    fn test_link_range_geometry_errors() {
        let mut manager = OpusManager::new();
        assert!(matches!(
            manager.link_beat_range(key(0, 0, 1), key(0, 0, 0), key(0, 0, 2)),
            Err(OpusError::LinkRangeOverlap { .. })
        ));
        assert!(matches!(
            manager.link_beat_range(key(0, 0, 3), key(0, 0, 0), key(0, 0, 1)),
            Err(OpusError::LinkRangeOverflow { .. })
        ));
    }
}
