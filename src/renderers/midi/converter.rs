//! Opus-to-MIDI conversion
//!
//! Walks every channel, line and beat, dividing each beat's ticks evenly among
//! the children of every node, and emits a NoteOn/NoteOff pair per event.

use std::collections::BTreeSet;

use crate::midi::{Midi, MidiEvent};
use crate::models::{BeatTree, OpusEvent};
use crate::opusmanager::OpusManagerCore;
use crate::structure::NodeId;
use super::defaults::{bpm_to_mpqn, DEFAULT_PPQN, PERCUSSION_NOTE_OFFSET, PITCHED_NOTE_OFFSET};

impl OpusManagerCore {
    /// Render beats `start_beat..end_beat` (the whole opus when `end_beat` is `None`)
    pub fn get_midi(&self, start_beat: usize, end_beat: Option<usize>) -> Midi {
        opus_to_midi(self, start_beat, end_beat, DEFAULT_PPQN)
    }
}

/// Convert an opus to a MIDI event stream
///
/// # Arguments
/// * `core` - The opus to render
/// * `start_beat` - First beat to include; it lands on tick 0
/// * `end_beat` - Beat to stop before, clamped to the opus length
/// * `ppqn` - Ticks per beat
pub fn opus_to_midi(core: &OpusManagerCore, start_beat: usize, end_beat: Option<usize>, ppqn: usize) -> Midi {
    let end_beat = end_beat.unwrap_or(core.beat_count()).min(core.beat_count());
    let mut midi = Midi::new(ppqn);

    midi.insert_event(0, MidiEvent::SetTempo { mpqn: bpm_to_mpqn(core.tempo()) });

    let mut position_pointers = BTreeSet::new();
    for (channel_index, channel) in core.channels().iter().enumerate() {
        midi.insert_event(
            0,
            MidiEvent::BankSelect {
                channel: channel.midi_channel,
                bank: channel.midi_bank,
            },
        );
        midi.insert_event(
            0,
            MidiEvent::ProgramChange {
                channel: channel.midi_channel,
                program: channel.midi_program,
            },
        );

        let percussion = core.is_percussion(channel_index);
        for (line_offset, line) in channel.lines.iter().enumerate() {
            let mut writer = LineWriter {
                midi: &mut midi,
                channel: channel.midi_channel,
                velocity: line.volume,
                fixed_note: percussion.then(|| core.get_percussion_instrument(line_offset) + PERCUSSION_NOTE_OFFSET),
                base_note: PITCHED_NOTE_OFFSET + core.transpose(),
                previous_note: None,
            };

            let mut tick = 0;
            for (beat_index, beat) in line.beats.iter().enumerate() {
                let in_range = (start_beat..end_beat).contains(&beat_index);
                if in_range {
                    position_pointers.insert((beat_index, tick));
                }
                writer.write_node(beat, beat.root(), tick, ppqn, in_range);
                if in_range {
                    tick += ppqn;
                }
            }
        }
    }

    for (beat, tick) in position_pointers {
        midi.insert_event(tick, MidiEvent::SongPositionPointer { beat: beat as u16 });
    }
    midi
}

/// Per-line emission state
struct LineWriter<'a> {
    midi: &'a mut Midi,
    channel: u8,
    velocity: u8,
    /// Key used for every event on a percussion line
    fixed_note: Option<i32>,
    /// Key absolute note 0 sounds as
    base_note: i32,
    /// Last key resolved on this line, anchoring relative events
    previous_note: Option<i32>,
}

impl<'a> LineWriter<'a> {
    fn write_node(&mut self, tree: &BeatTree, id: NodeId, offset: usize, span: usize, emit: bool) {
        if let Some(event) = tree.event(id) {
            let note = self.resolve(event);
            self.previous_note = Some(note);
            if emit {
                self.emit(note, offset, span);
            }
            return;
        }

        let size = tree.size(id);
        if size == 0 {
            return;
        }
        let child_span = span / size;
        for (index, child) in tree.children(id).iter().enumerate() {
            self.write_node(tree, *child, offset + child_span * index, child_span, emit);
        }
    }

    fn resolve(&self, event: &OpusEvent) -> i32 {
        if let Some(note) = self.fixed_note {
            note
        } else if event.relative {
            self.previous_note.unwrap_or(self.base_note) + event.note
        } else {
            self.base_note + event.note
        }
    }

    fn emit(&mut self, note: i32, offset: usize, span: usize) {
        let Ok(key) = u8::try_from(note) else {
            log::warn!("skipping note {} outside the midi range", note);
            return;
        };
        if key > 127 {
            log::warn!("skipping note {} outside the midi range", note);
            return;
        }

        self.midi.insert_event(
            offset,
            MidiEvent::NoteOn {
                channel: self.channel,
                note: key,
                velocity: self.velocity,
            },
        );
        self.midi.insert_event(
            offset + span,
            MidiEvent::NoteOff {
                channel: self.channel,
                note: key,
                velocity: self.velocity,
            },
        );
    }
}
