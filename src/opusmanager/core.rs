//! Primitive opus editing
//!
//! `OpusManagerCore` owns the channel grid and performs single, unlinked,
//! unrecorded edits. Link propagation and undo recording are layered on top
//! by `OpusManager`.

use std::path::PathBuf;

use super::errors::{OpusError, Result};
use crate::models::{BeatKey, BeatTree, OpusChannel, OpusEvent, OpusLine};
use crate::parse::check_radix;
use crate::renderers::midi::defaults::{
    next_available_midi_channel, DEFAULT_PERCUSSION, DEFAULT_PROGRAM, DEFAULT_RADIX, DEFAULT_TEMPO_BPM,
    PERCUSSION_BANK, PERCUSSION_MIDI_CHANNEL,
};
use crate::structure::{NodeId, OpusTree, Subtree};

pub const DEFAULT_PROJECT_NAME: &str = "New Opus";

/// Beats a freshly created opus starts with
pub const DEFAULT_BEAT_COUNT: usize = 4;

#[derive(Debug, Clone)]
pub struct OpusManagerCore {
    channels: Vec<OpusChannel>,
    beat_count: usize,
    tempo: f32,
    transpose: i32,
    radix: u32,
    project_name: String,
    path: Option<PathBuf>,
    channel_uuid_generator: u32,
}

impl Default for OpusManagerCore {
    fn default() -> Self {
        Self {
            channels: Vec::new(),
            beat_count: 0,
            tempo: DEFAULT_TEMPO_BPM,
            transpose: 0,
            radix: DEFAULT_RADIX,
            project_name: DEFAULT_PROJECT_NAME.to_string(),
            path: None,
            channel_uuid_generator: 0,
        }
    }
}

impl OpusManagerCore {
    /// A percussion channel plus one pitched channel, four beats long
    pub fn new() -> Self {
        let mut core = Self::default();
        core.new_opus();
        core
    }

    /// Replace the current content with a fresh default opus
    pub fn new_opus(&mut self) {
        self.clear();
        self.new_channel(None, 1, None);
        self.new_channel(None, 1, None);
        self.set_beat_count(DEFAULT_BEAT_COUNT);
        log::info!("created new opus");
    }

    /// Drop every channel and reset project settings. Channel uuids keep counting.
    pub fn clear(&mut self) {
        self.channels.clear();
        self.beat_count = 0;
        self.tempo = DEFAULT_TEMPO_BPM;
        self.transpose = 0;
        self.radix = DEFAULT_RADIX;
        self.project_name = DEFAULT_PROJECT_NAME.to_string();
        self.path = None;
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn channels(&self) -> &[OpusChannel] {
        &self.channels
    }

    pub fn beat_count(&self) -> usize {
        self.beat_count
    }

    pub fn tempo(&self) -> f32 {
        self.tempo
    }

    pub fn transpose(&self) -> i32 {
        self.transpose
    }

    pub fn radix(&self) -> u32 {
        self.radix
    }

    pub(crate) fn set_radix(&mut self, radix: u32) -> Result<()> {
        self.radix = check_radix(radix)?;
        Ok(())
    }

    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }

    pub fn set_path(&mut self, path: Option<PathBuf>) {
        self.path = path;
    }

    pub fn channel(&self, channel: usize) -> Result<&OpusChannel> {
        self.channels.get(channel).ok_or(OpusError::BadChannel(channel))
    }

    fn channel_mut(&mut self, channel: usize) -> Result<&mut OpusChannel> {
        self.channels.get_mut(channel).ok_or(OpusError::BadChannel(channel))
    }

    /// The percussion channel is always the last one
    pub fn is_percussion(&self, channel: usize) -> bool {
        channel + 1 == self.channels.len()
    }

    pub fn percussion_channel(&self) -> Option<usize> {
        self.channels.len().checked_sub(1)
    }

    pub fn get_channel_line_counts(&self) -> Vec<usize> {
        self.channels.iter().map(OpusChannel::line_count).collect()
    }

    pub fn get_total_line_count(&self) -> usize {
        self.channels.iter().map(OpusChannel::line_count).sum()
    }

    pub fn get_line_volume(&self, channel: usize, line_offset: usize) -> Result<u8> {
        self.channel(channel)?
            .lines
            .get(line_offset)
            .map(|line| line.volume)
            .ok_or(OpusError::BadBeatKey(BeatKey::new(channel, line_offset, 0)))
    }

    pub fn get_percussion_instrument(&self, line_offset: usize) -> i32 {
        self.channels
            .last()
            .and_then(|channel| channel.get_mapped_line_offset(line_offset))
            .unwrap_or(DEFAULT_PERCUSSION)
    }

    pub fn get_channel_instrument(&self, channel: usize) -> Result<(u8, u8)> {
        Ok(self.channel(channel)?.get_instrument())
    }

    pub fn channel_index_of(&self, uuid: u32) -> Result<usize> {
        self.channels
            .iter()
            .position(|channel| channel.uuid == uuid)
            .ok_or(OpusError::InvalidChannelUuid(uuid))
    }

    // ------------------------------------------------------------------
    // Tree lookup
    // ------------------------------------------------------------------

    pub fn get_beat_tree(&self, beat_key: BeatKey) -> Result<&BeatTree> {
        self.channels
            .get(beat_key.channel)
            .and_then(|channel| channel.get_tree(beat_key.line_offset, beat_key.beat))
            .ok_or(OpusError::BadBeatKey(beat_key))
    }

    pub(crate) fn get_beat_tree_mut(&mut self, beat_key: BeatKey) -> Result<&mut BeatTree> {
        self.channels
            .get_mut(beat_key.channel)
            .and_then(|channel| channel.get_tree_mut(beat_key.line_offset, beat_key.beat))
            .ok_or(OpusError::BadBeatKey(beat_key))
    }

    pub fn get_tree(&self, beat_key: BeatKey, position: &[usize]) -> Result<Subtree<'_, OpusEvent>> {
        let tree = self.get_beat_tree(beat_key)?;
        let id = tree.node_at(position)?;
        Ok(tree.view(id))
    }

    /// Mutable beat tree plus the node at `position`
    fn locate_mut(&mut self, beat_key: BeatKey, position: &[usize]) -> Result<(&mut BeatTree, NodeId)> {
        let tree = self.get_beat_tree_mut(beat_key)?;
        let id = tree.node_at(position)?;
        Ok((tree, id))
    }

    /// Path of the first leaf at or below `position`
    pub fn get_first_position(&self, beat_key: BeatKey, position: &[usize]) -> Result<Vec<usize>> {
        let mut output = position.to_vec();
        let mut tree = self.get_tree(beat_key, position)?;
        while let Some(first) = tree.get(0) {
            output.push(0);
            tree = first;
        }
        Ok(output)
    }

    // ------------------------------------------------------------------
    // Traversal
    // ------------------------------------------------------------------

    /// Nearest leaf before `position`, crossing back into earlier beats of the same line
    pub fn get_preceding_leaf_position(
        &self,
        beat_key: BeatKey,
        position: &[usize],
    ) -> Result<Option<(BeatKey, Vec<usize>)>> {
        let mut working_key = beat_key;
        let mut working_position = position.to_vec();

        loop {
            match working_position.pop() {
                Some(index) if index > 0 => {
                    working_position.push(index - 1);
                    break;
                }
                Some(_) => {}
                None if working_key.beat > 0 => {
                    working_key.beat -= 1;
                    break;
                }
                None => return Ok(None),
            }
        }

        let mut tree = self.get_tree(working_key, &working_position)?;
        while !tree.is_leaf() {
            let last = tree.size() - 1;
            working_position.push(last);
            tree = match tree.get(last) {
                Some(child) => child,
                None => break,
            };
        }
        Ok(Some((working_key, working_position)))
    }

    /// Nearest leaf after `position`, crossing into later beats of the same line
    pub fn get_proceding_leaf_position(
        &self,
        beat_key: BeatKey,
        position: &[usize],
    ) -> Result<Option<(BeatKey, Vec<usize>)>> {
        let mut working_key = beat_key;
        let mut working_position = position.to_vec();
        self.get_tree(working_key, &working_position)?;

        loop {
            if let Some(index) = working_position.pop() {
                let parent = self.get_tree(working_key, &working_position)?;
                if index + 1 < parent.size() {
                    working_position.push(index + 1);
                    break;
                }
            } else if working_key.beat + 1 < self.beat_count {
                working_key.beat += 1;
                break;
            } else {
                return Ok(None);
            }
        }

        let mut tree = self.get_tree(working_key, &working_position)?;
        while let Some(first) = tree.get(0) {
            working_position.push(0);
            tree = first;
        }
        Ok(Some((working_key, working_position)))
    }

    pub fn get_preceding_leaf(&self, beat_key: BeatKey, position: &[usize]) -> Result<Option<Subtree<'_, OpusEvent>>> {
        match self.get_preceding_leaf_position(beat_key, position)? {
            Some((key, path)) => Ok(Some(self.get_tree(key, &path)?)),
            None => Ok(None),
        }
    }

    pub fn get_proceding_leaf(&self, beat_key: BeatKey, position: &[usize]) -> Result<Option<Subtree<'_, OpusEvent>>> {
        match self.get_proceding_leaf_position(beat_key, position)? {
            Some((key, path)) => Ok(Some(self.get_tree(key, &path)?)),
            None => Ok(None),
        }
    }

    /// Nearest event before `position` on the same line
    pub fn get_preceding_event(&self, beat_key: BeatKey, position: &[usize]) -> Result<Option<OpusEvent>> {
        let mut cursor = self.get_preceding_leaf_position(beat_key, position)?;
        while let Some((key, path)) = cursor {
            if let Some(event) = self.get_tree(key, &path)?.event() {
                return Ok(Some(*event));
            }
            cursor = self.get_preceding_leaf_position(key, &path)?;
        }
        Ok(None)
    }

    /// Resolve the sounding note at `position`. Relative events accumulate backwards
    /// until an absolute event anchors them; `None` if there is no event or no anchor.
    pub fn get_absolute_value(&self, beat_key: BeatKey, position: &[usize]) -> Result<Option<i32>> {
        let event = match self.get_tree(beat_key, position)?.event() {
            Some(event) => *event,
            None => return Ok(None),
        };
        if !event.relative {
            return Ok(Some(event.note));
        }

        let mut value = event.note;
        let mut cursor = self.get_preceding_leaf_position(beat_key, position)?;
        while let Some((key, path)) = cursor {
            if let Some(preceding) = self.get_tree(key, &path)?.event() {
                value += preceding.note;
                if !preceding.relative {
                    return Ok(Some(value));
                }
            }
            cursor = self.get_preceding_leaf_position(key, &path)?;
        }
        Ok(None)
    }

    pub fn has_preceding_absolute_event(&self, beat_key: BeatKey, position: &[usize]) -> Result<bool> {
        let mut cursor = self.get_preceding_leaf_position(beat_key, position)?;
        while let Some((key, path)) = cursor {
            if let Some(event) = self.get_tree(key, &path)?.event() {
                if !event.relative {
                    return Ok(true);
                }
            }
            cursor = self.get_preceding_leaf_position(key, &path)?;
        }
        Ok(false)
    }

    // ------------------------------------------------------------------
    // Line geometry
    // ------------------------------------------------------------------

    /// Index of a line when every channel's lines are laid end to end
    pub fn get_abs_offset(&self, channel: usize, line_offset: usize) -> Result<usize> {
        let line_count = self.channel(channel)?.line_count();
        if line_offset >= line_count {
            return Err(OpusError::BadBeatKey(BeatKey::new(channel, line_offset, 0)));
        }
        let before: usize = self.channels[..channel].iter().map(OpusChannel::line_count).sum();
        Ok(before + line_offset)
    }

    /// Inverse of `get_abs_offset`
    pub fn get_std_offset(&self, absolute: usize) -> Result<(usize, usize)> {
        let mut remaining = absolute;
        for (index, channel) in self.channels.iter().enumerate() {
            if remaining < channel.line_count() {
                return Ok((index, remaining));
            }
            remaining -= channel.line_count();
        }
        Err(OpusError::BadBeatKey(BeatKey::new(self.channels.len(), absolute, 0)))
    }

    /// (line distance, beat distance) from `a` to `b`
    pub fn get_abs_difference(&self, a: BeatKey, b: BeatKey) -> Result<(isize, isize)> {
        let a_line = self.get_abs_offset(a.channel, a.line_offset)? as isize;
        let b_line = self.get_abs_offset(b.channel, b.line_offset)? as isize;
        Ok((b_line - a_line, b.beat as isize - a.beat as isize))
    }

    /// Normalise two corners into (top-left, bottom-right)
    pub fn get_ordered_beat_key_pair(&self, a: BeatKey, b: BeatKey) -> Result<(BeatKey, BeatKey)> {
        self.get_beat_tree(a)?;
        self.get_beat_tree(b)?;
        let a_line = self.get_abs_offset(a.channel, a.line_offset)?;
        let b_line = self.get_abs_offset(b.channel, b.line_offset)?;
        let (top, bottom) = if a_line <= b_line { (a, b) } else { (b, a) };
        Ok((
            BeatKey::new(top.channel, top.line_offset, a.beat.min(b.beat)),
            BeatKey::new(bottom.channel, bottom.line_offset, a.beat.max(b.beat)),
        ))
    }

    /// Every key in the rectangle spanned by two corners, line by line
    pub fn get_beatkeys_in_range(&self, first_corner: BeatKey, second_corner: BeatKey) -> Result<Vec<BeatKey>> {
        let (from, to) = self.get_ordered_beat_key_pair(first_corner, second_corner)?;
        let first_line = self.get_abs_offset(from.channel, from.line_offset)?;
        let last_line = self.get_abs_offset(to.channel, to.line_offset)?;

        let mut output = Vec::new();
        for absolute in first_line..=last_line {
            let (channel, line_offset) = self.get_std_offset(absolute)?;
            for beat in from.beat..=to.beat {
                output.push(BeatKey::new(channel, line_offset, beat));
            }
        }
        Ok(output)
    }

    // ------------------------------------------------------------------
    // Tree edits
    // ------------------------------------------------------------------

    pub fn set_event(&mut self, beat_key: BeatKey, position: &[usize], event: OpusEvent) -> Result<()> {
        self.get_beat_tree(beat_key)?;
        if self.is_percussion(beat_key.channel) {
            return Err(OpusError::NonPercussionEventSet);
        }
        if !event.relative && event.note < 0 {
            return Err(OpusError::NoteOutOfRange(event.note));
        }
        let (tree, id) = self.locate_mut(beat_key, position)?;
        tree.set_event(id, event);
        Ok(())
    }

    /// Place the line's percussion instrument at `position`
    pub fn set_percussion_event(&mut self, beat_key: BeatKey, position: &[usize]) -> Result<()> {
        self.get_beat_tree(beat_key)?;
        if !self.is_percussion(beat_key.channel) {
            return Err(OpusError::PercussionEventSet);
        }
        let event = OpusEvent::absolute(
            self.get_percussion_instrument(beat_key.line_offset),
            self.radix,
            self.channels[beat_key.channel].midi_channel,
        );
        let (tree, id) = self.locate_mut(beat_key, position)?;
        tree.set_event(id, event);
        Ok(())
    }

    pub fn unset(&mut self, beat_key: BeatKey, position: &[usize]) -> Result<()> {
        let (tree, id) = self.locate_mut(beat_key, position)?;
        tree.empty(id);
        Ok(())
    }

    /// Split a leaf or node into `splits` empty children, keeping an existing event in the first
    pub fn split_tree(&mut self, beat_key: BeatKey, position: &[usize], splits: usize) -> Result<()> {
        let (tree, id) = self.locate_mut(beat_key, position)?;
        match tree.unset_event(id) {
            Some(event) if splits > 0 => {
                tree.set_size(id, splits, false)?;
                let first = tree.get(id, 0)?;
                tree.set_event(first, event);
            }
            Some(event) => tree.set_event(id, event),
            None => tree.set_size(id, splits, false)?,
        }
        Ok(())
    }

    /// Insert an empty sibling at `position`
    pub fn insert(&mut self, beat_key: BeatKey, position: &[usize]) -> Result<()> {
        let (index, parent_position) = position.split_last().ok_or(OpusError::BadInsertPosition)?;
        let (tree, parent) = self.locate_mut(beat_key, parent_position)?;
        tree.insert(parent, *index, OpusTree::new())?;
        Ok(())
    }

    /// Insert an empty sibling right after `position`
    pub fn insert_after(&mut self, beat_key: BeatKey, position: &[usize]) -> Result<()> {
        let (index, parent_position) = position.split_last().ok_or(OpusError::BadInsertPosition)?;
        let (tree, parent) = self.locate_mut(beat_key, parent_position)?;
        tree.node_at(position)?;
        tree.insert(parent, index + 1, OpusTree::new())?;
        Ok(())
    }

    /// Path of the subtree a `remove` at `position` rewrites
    pub fn get_removal_root(&self, beat_key: BeatKey, position: &[usize]) -> Result<Vec<usize>> {
        self.get_tree(beat_key, position)?;
        let mut working = position.to_vec();
        while let Some((_, parent_position)) = working.split_last() {
            let parent_position = parent_position.to_vec();
            if self.get_tree(beat_key, &parent_position)?.size() == 1 && !parent_position.is_empty() {
                working = parent_position;
            } else {
                return Ok(parent_position);
            }
        }
        Ok(working)
    }

    /// Remove the node at `position`. A parent left with one child is replaced by
    /// that child; a parent left with none is removed in turn. No-op on a beat root.
    pub fn remove(&mut self, beat_key: BeatKey, position: &[usize]) -> Result<()> {
        let Some((_, parent_position)) = position.split_last() else {
            return Ok(());
        };
        let parent_size = self.get_tree(beat_key, parent_position)?.size();
        self.get_tree(beat_key, position)?;

        if parent_size == 1 && !parent_position.is_empty() {
            return self.remove(beat_key, parent_position);
        }

        let (tree, id) = self.locate_mut(beat_key, position)?;
        let parent = tree.node_at(parent_position)?;
        tree.detach(id)?;
        if parent_size == 2 {
            let sibling = tree.get(parent, 0)?;
            let promoted = tree.detach(sibling)?;
            tree.replace(parent, promoted);
        }
        Ok(())
    }

    pub fn replace_tree(&mut self, beat_key: BeatKey, position: &[usize], subtree: BeatTree) -> Result<()> {
        let (tree, id) = self.locate_mut(beat_key, position)?;
        tree.replace(id, subtree);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Beat columns
    // ------------------------------------------------------------------

    pub(crate) fn set_beat_count(&mut self, beat_count: usize) {
        self.beat_count = beat_count;
        for channel in &mut self.channels {
            channel.set_beat_count(beat_count);
        }
    }

    /// Insert a column of beats. `column` supplies one tree per line in channel/line order.
    pub fn insert_beat(&mut self, index: usize, column: Option<Vec<BeatTree>>) -> Result<()> {
        if index > self.beat_count {
            return Err(OpusError::BadBeatIndex(index));
        }

        let mut column = column.map(Vec::into_iter);
        for channel in &mut self.channels {
            for line in &mut channel.lines {
                let tree = column.as_mut().and_then(Iterator::next).unwrap_or_default();
                line.beats.insert(index, tree);
            }
        }
        self.set_beat_count(self.beat_count + 1);
        Ok(())
    }

    /// Remove a column, returning its trees in channel/line order
    pub fn remove_beat(&mut self, index: usize) -> Result<Vec<BeatTree>> {
        if self.beat_count <= 1 {
            return Err(OpusError::RemovingLastBeat);
        }
        if index >= self.beat_count {
            return Err(OpusError::BadBeatIndex(index));
        }

        let mut removed = Vec::new();
        for channel in &mut self.channels {
            for line in &mut channel.lines {
                removed.push(line.beats.remove(index));
            }
        }
        self.set_beat_count(self.beat_count - 1);
        Ok(removed)
    }

    // ------------------------------------------------------------------
    // Channels
    // ------------------------------------------------------------------

    fn gen_channel_uuid(&mut self) -> u32 {
        let uuid = self.channel_uuid_generator;
        self.channel_uuid_generator += 1;
        uuid
    }

    /// Add a channel with `lines` empty lines. The first channel of an opus becomes the
    /// percussion channel; later channels always land before it. Returns the new index.
    pub fn new_channel(&mut self, index: Option<usize>, lines: usize, uuid: Option<u32>) -> usize {
        let uuid = match uuid {
            Some(uuid) => {
                self.channel_uuid_generator = self.channel_uuid_generator.max(uuid + 1);
                uuid
            }
            None => self.gen_channel_uuid(),
        };

        let mut channel = if self.channels.is_empty() {
            let mut percussion = OpusChannel::new_percussion(uuid, self.beat_count);
            percussion.midi_channel = PERCUSSION_MIDI_CHANNEL;
            percussion.set_instrument(PERCUSSION_BANK, DEFAULT_PROGRAM);
            percussion
        } else {
            let used: Vec<u8> = self.channels.iter().map(|channel| channel.midi_channel).collect();
            let mut pitched = OpusChannel::new(uuid, self.beat_count);
            pitched.midi_channel = next_available_midi_channel(&used);
            pitched
        };
        for _ in 0..lines.max(1) {
            channel.new_line(None);
        }

        let index = match self.percussion_channel() {
            Some(last) => index.unwrap_or(last).min(last),
            None => 0,
        };
        self.channels.insert(index, channel);
        log::debug!("new channel {} (uuid {})", index, uuid);
        index
    }

    /// Put back a channel taken out by `remove_channel`
    pub fn insert_channel(&mut self, index: usize, mut channel: OpusChannel) -> Result<()> {
        channel.set_beat_count(self.beat_count);
        self.channel_uuid_generator = self.channel_uuid_generator.max(channel.uuid + 1);
        let index = if channel.is_percussion() || self.channels.is_empty() {
            self.channels.len()
        } else {
            index.min(self.channels.len() - 1)
        };
        self.channels.insert(index, channel);
        Ok(())
    }

    pub fn remove_channel(&mut self, index: usize) -> Result<OpusChannel> {
        self.channel(index)?;
        if self.is_percussion(index) {
            return Err(OpusError::RemovingPercussionChannel);
        }
        Ok(self.channels.remove(index))
    }

    pub fn remove_channel_by_uuid(&mut self, uuid: u32) -> Result<(usize, OpusChannel)> {
        let index = self.channel_index_of(uuid)?;
        Ok((index, self.remove_channel(index)?))
    }

    pub fn set_channel_instrument(&mut self, channel: usize, bank: u8, program: u8) -> Result<(u8, u8)> {
        let channel = self.channel_mut(channel)?;
        let previous = channel.get_instrument();
        channel.set_instrument(bank, program);
        Ok(previous)
    }

    // ------------------------------------------------------------------
    // Lines
    // ------------------------------------------------------------------

    pub fn new_line(&mut self, channel: usize, line_offset: Option<usize>) -> Result<usize> {
        self.channel_mut(channel)?
            .new_line(line_offset)
            .ok_or(OpusError::BadBeatKey(BeatKey::new(channel, line_offset.unwrap_or(0), 0)))
    }

    pub fn insert_line(
        &mut self,
        channel: usize,
        line_offset: usize,
        line: OpusLine,
        instrument: Option<i32>,
    ) -> Result<()> {
        self.channel_mut(channel)?
            .insert_line(line_offset, line, instrument)
            .ok_or(OpusError::BadBeatKey(BeatKey::new(channel, line_offset, 0)))
    }

    /// Remove a line, returning it with its percussion instrument
    pub fn remove_line(&mut self, channel: usize, line_offset: usize) -> Result<(OpusLine, Option<i32>)> {
        let opus_channel = self.channel_mut(channel)?;
        if line_offset >= opus_channel.line_count() {
            return Err(OpusError::BadBeatKey(BeatKey::new(channel, line_offset, 0)));
        }
        if opus_channel.line_count() == 1 {
            return Err(OpusError::RemovingLastLine(channel));
        }
        opus_channel
            .remove_line(line_offset)
            .ok_or(OpusError::BadBeatKey(BeatKey::new(channel, line_offset, 0)))
    }

    /// Where a line moved from (`channel_old`, `line_old`) lands once it has been
    /// taken out: offsets past the old slot shift up by one within the same channel
    pub fn resolve_move_target(&self, channel_old: usize, line_old: usize, channel_new: usize, line_new: usize) -> usize {
        if channel_old == channel_new && line_old < line_new {
            line_new - 1
        } else {
            line_new
        }
    }

    pub fn check_line_move(&self, channel_old: usize, line_old: usize, channel_new: usize, line_new: usize) -> Result<()> {
        self.get_beat_tree(BeatKey::new(channel_old, line_old, 0))?;
        let target_lines = self.channel(channel_new)?.line_count();
        if line_new > target_lines {
            return Err(OpusError::BadBeatKey(BeatKey::new(channel_new, line_new, 0)));
        }
        if self.is_percussion(channel_old) != self.is_percussion(channel_new) {
            return Err(OpusError::IncompatibleChannel {
                from: channel_old,
                to: channel_new,
            });
        }
        Ok(())
    }

    pub fn set_line_volume(&mut self, channel: usize, line_offset: usize, volume: u8) -> Result<u8> {
        let line = self
            .channel_mut(channel)?
            .lines
            .get_mut(line_offset)
            .ok_or(OpusError::BadBeatKey(BeatKey::new(channel, line_offset, 0)))?;
        Ok(std::mem::replace(&mut line.volume, volume))
    }

    /// Map a percussion line to an instrument, returning the previous mapping
    pub fn set_percussion_instrument(&mut self, line_offset: usize, instrument: Option<i32>) -> Result<Option<i32>> {
        let percussion = self.percussion_channel().ok_or(OpusError::PercussionEventSet)?;
        if let Some(note) = instrument.filter(|note| *note < 0) {
            return Err(OpusError::NoteOutOfRange(note));
        }
        let channel = &mut self.channels[percussion];
        if line_offset >= channel.line_count() {
            return Err(OpusError::BadBeatKey(BeatKey::new(percussion, line_offset, 0)));
        }
        let previous = channel.get_mapped_line_offset(line_offset);
        channel.map_line(line_offset, instrument);
        Ok(previous)
    }

    // ------------------------------------------------------------------
    // Project settings
    // ------------------------------------------------------------------

    pub fn set_tempo(&mut self, tempo: f32) -> f32 {
        std::mem::replace(&mut self.tempo, tempo)
    }

    pub fn set_transpose(&mut self, transpose: i32) -> i32 {
        std::mem::replace(&mut self.transpose, transpose)
    }

    pub fn set_project_name(&mut self, name: String) -> String {
        std::mem::replace(&mut self.project_name, name)
    }
}
