//! Channels and their lines
//!
//! A channel carries its MIDI assignment and an ordered list of lines. The
//! percussion channel additionally maps each line to an instrument code.

use std::collections::BTreeMap;

use super::BeatTree;
use crate::renderers::midi::defaults::{DEFAULT_PROGRAM, DEFAULT_VOLUME};

/// One row of beat trees inside a channel
#[derive(Debug, Clone, PartialEq)]
pub struct OpusLine {
    pub beats: Vec<BeatTree>,

    /// NoteOn velocity for every event on the line
    pub volume: u8,
}

impl OpusLine {
    pub fn new(beat_count: usize) -> Self {
        Self {
            beats: (0..beat_count).map(|_| BeatTree::new()).collect(),
            volume: DEFAULT_VOLUME,
        }
    }

    /// Grow or shrink to `beat_count` trees, padding with empty beats
    pub fn resize(&mut self, beat_count: usize) {
        self.beats.resize_with(beat_count, BeatTree::new);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OpusChannel {
    /// Stable identity that survives channel insertion and removal
    pub uuid: u32,

    pub lines: Vec<OpusLine>,

    pub midi_channel: u8,
    pub midi_bank: u8,
    pub midi_program: u8,

    /// Percussion instrument per line offset, only present on the percussion channel
    pub line_map: Option<BTreeMap<usize, i32>>,

    beat_count: usize,
}

impl OpusChannel {
    pub fn new(uuid: u32, beat_count: usize) -> Self {
        Self {
            uuid,
            lines: Vec::new(),
            midi_channel: 0,
            midi_bank: 0,
            midi_program: DEFAULT_PROGRAM,
            line_map: None,
            beat_count,
        }
    }

    pub fn new_percussion(uuid: u32, beat_count: usize) -> Self {
        Self {
            line_map: Some(BTreeMap::new()),
            ..Self::new(uuid, beat_count)
        }
    }

    pub fn is_percussion(&self) -> bool {
        self.line_map.is_some()
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    pub fn beat_count(&self) -> usize {
        self.beat_count
    }

    pub fn set_beat_count(&mut self, beat_count: usize) {
        self.beat_count = beat_count;
        for line in &mut self.lines {
            line.resize(beat_count);
        }
    }

    pub fn get_instrument(&self) -> (u8, u8) {
        (self.midi_bank, self.midi_program)
    }

    pub fn set_instrument(&mut self, bank: u8, program: u8) {
        self.midi_bank = bank;
        self.midi_program = program;
    }

    pub fn get_tree(&self, line_offset: usize, beat: usize) -> Option<&BeatTree> {
        self.lines.get(line_offset)?.beats.get(beat)
    }

    pub fn get_tree_mut(&mut self, line_offset: usize, beat: usize) -> Option<&mut BeatTree> {
        self.lines.get_mut(line_offset)?.beats.get_mut(beat)
    }

    /// Append or insert an empty line sized to the channel, returning its offset
    pub fn new_line(&mut self, line_offset: Option<usize>) -> Option<usize> {
        let offset = line_offset.unwrap_or(self.lines.len());
        let line = OpusLine::new(self.beat_count);
        self.insert_line(offset, line, None)?;
        Some(offset)
    }

    /// Insert an existing line. Lines mapped at or after `line_offset` shift down by one.
    pub fn insert_line(&mut self, line_offset: usize, mut line: OpusLine, instrument: Option<i32>) -> Option<()> {
        if line_offset > self.lines.len() {
            return None;
        }
        line.resize(self.beat_count);
        self.lines.insert(line_offset, line);

        if let Some(map) = self.line_map.as_mut() {
            *map = map
                .iter()
                .map(|(offset, code)| if *offset >= line_offset { (offset + 1, *code) } else { (*offset, *code) })
                .collect();
            if let Some(code) = instrument {
                map.insert(line_offset, code);
            }
        }
        Some(())
    }

    /// Remove a line, returning it with its percussion instrument if mapped
    pub fn remove_line(&mut self, line_offset: usize) -> Option<(OpusLine, Option<i32>)> {
        if line_offset >= self.lines.len() {
            return None;
        }
        let line = self.lines.remove(line_offset);

        let instrument = match self.line_map.as_mut() {
            Some(map) => {
                let removed = map.remove(&line_offset);
                *map = map
                    .iter()
                    .map(|(offset, code)| if *offset > line_offset { (offset - 1, *code) } else { (*offset, *code) })
                    .collect();
                removed
            }
            None => None,
        };
        Some((line, instrument))
    }

    pub fn get_mapped_line_offset(&self, line_offset: usize) -> Option<i32> {
        self.line_map.as_ref()?.get(&line_offset).copied()
    }

    /// Set or clear the instrument of a percussion line. Ignored on pitched channels.
    pub fn map_line(&mut self, line_offset: usize, instrument: Option<i32>) {
        if let Some(map) = self.line_map.as_mut() {
            match instrument {
                Some(code) => map.insert(line_offset, code),
                None => map.remove(&line_offset),
            };
        }
    }
}
