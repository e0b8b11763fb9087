//! MIDI-to-opus conversion
//!
//! Import runs in two passes. The first lays every NoteOn onto a flat tree per
//! beat, one leaf per tick. The second snaps each flat beat onto the coarsest
//! tuplet grid that keeps its onsets in place and reduces the result. The
//! quantized beats are then distributed over channels and lines.

use std::collections::{BTreeSet, HashMap};

use crate::midi::{MidiError, MidiEvent, MidiSource};
use crate::models::{BeatKey, OpusEvent};
use crate::opusmanager::{OpusManagerCore, Result};
use crate::renderers::midi::defaults::{
    mpqn_to_bpm, DEFAULT_RADIX, DEFAULT_TEMPO_BPM, MAX_ABSOLUTE_NOTE, PERCUSSION_MIDI_CHANNEL,
    PERCUSSION_NOTE_OFFSET, PITCHED_NOTE_OFFSET, QUANTIZATION_DIVISORS,
};
use crate::structure::OpusTree;

/// One beat of simultaneous events, each leaf holding every onset that snapped to it
pub type EventSetTree = OpusTree<BTreeSet<OpusEvent>>;

/// Bank or program change found in the stream, keyed by MIDI channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentChange {
    Bank { channel: u8, bank: u8 },
    Program { channel: u8, program: u8 },
}

/// Quantized content of a MIDI stream before it is assigned to lines
#[derive(Debug, Clone)]
pub struct ImportedBeats {
    pub beats: Vec<EventSetTree>,
    pub tempo: f32,
    pub instruments: Vec<InstrumentChange>,
}

/// Read a MIDI stream into quantized beat trees
///
/// Events carry the note as the opus sees it: pitched keys counted from A0,
/// percussion keys counted from key 27.
pub fn tree_from_midi<M: MidiSource>(midi: &M) -> Result<ImportedBeats> {
    let ppqn = midi.get_ppqn();
    if ppqn == 0 {
        return Err(MidiError::BadPpqn(0).into());
    }

    let mut beat_size = ppqn;
    let mut denominator = 4.0_f32;
    let mut total_beat_offset = 0;
    let mut last_time_signature = 0;
    let mut tempo = DEFAULT_TEMPO_BPM;
    let mut instruments = Vec::new();
    let mut flat_beats: Vec<EventSetTree> = Vec::new();
    let mut pressed: HashMap<(u8, u8), usize> = HashMap::new();

    for (tick, event) in midi.get_all_events() {
        let elapsed = tick.saturating_sub(last_time_signature);
        let beat_index = elapsed / beat_size + total_beat_offset;
        let inner = elapsed % beat_size;

        match event {
            MidiEvent::NoteOn { channel, note, velocity } if velocity > 0 => {
                while flat_beats.len() <= beat_index {
                    let mut beat = OpusTree::new();
                    let root = beat.root();
                    beat.set_size(root, beat_size, false)?;
                    flat_beats.push(beat);
                }

                let offset = if channel == PERCUSSION_MIDI_CHANNEL {
                    PERCUSSION_NOTE_OFFSET
                } else {
                    PITCHED_NOTE_OFFSET
                };
                let tree = &mut flat_beats[beat_index];
                let leaf = tree.get(tree.root(), inner)?;
                let mut events = tree.unset_event(leaf).unwrap_or_default();
                events.insert(OpusEvent::absolute(note as i32 - offset, DEFAULT_RADIX, channel));
                tree.set_event(leaf, events);
                pressed.insert((channel, note), beat_index);
            }
            MidiEvent::NoteOn { channel, note, .. } | MidiEvent::NoteOff { channel, note, .. } => {
                pressed.remove(&(channel, note));
            }
            MidiEvent::TimeSignature { denominator: power, .. } => {
                total_beat_offset += elapsed / beat_size;
                last_time_signature = tick;
                denominator = 2_f32.powi(power as i32);
                beat_size = ((ppqn * 4) >> power.min(16)).max(1);
            }
            MidiEvent::SetTempo { mpqn } => {
                if tick == 0 {
                    tempo = mpqn_to_bpm(mpqn) * (denominator / 4.0);
                }
            }
            MidiEvent::ProgramChange { channel, program } => {
                instruments.push(InstrumentChange::Program { channel, program });
            }
            MidiEvent::BankSelect { channel, bank } => {
                instruments.push(InstrumentChange::Bank { channel, bank });
            }
            MidiEvent::SongPositionPointer { .. } => {}
        }
    }

    if !pressed.is_empty() {
        log::debug!("{} notes were never released", pressed.len());
    }

    Ok(ImportedBeats {
        beats: quantize_beats(&flat_beats)?,
        tempo,
        instruments,
    })
}

/// Snap each flat beat onto a tuplet grid. Onsets rounding past the end of a
/// beat open the next one.
fn quantize_beats(flat_beats: &[EventSetTree]) -> Result<Vec<EventSetTree>> {
    let mut output = Vec::with_capacity(flat_beats.len());
    let mut overflow: BTreeSet<OpusEvent> = BTreeSet::new();

    for flat in flat_beats {
        let flat_root = flat.root();
        let map = flat.get_quantization_map(flat_root, &QUANTIZATION_DIVISORS);

        let mut beat = OpusTree::new();
        let root = beat.root();
        beat.set_size(root, map.size, false)?;
        if !overflow.is_empty() {
            let first = beat.get(root, 0)?;
            beat.set_event(first, std::mem::take(&mut overflow));
        }

        for (slot, indices) in &map.groups {
            let mut events = BTreeSet::new();
            for index in indices {
                if let Some(found) = flat.event(flat.get(flat_root, *index)?) {
                    events.extend(found.iter().copied());
                }
            }

            if *slot == map.size {
                overflow.extend(events);
                continue;
            }
            let leaf = beat.get(root, *slot)?;
            if let Some(existing) = beat.unset_event(leaf) {
                events.extend(existing);
            }
            beat.set_event(leaf, events);
        }

        beat.reduce(root);
        beat.clear_singles(root);
        output.push(beat);
    }

    if !overflow.is_empty() {
        output.push(OpusTree::leaf(overflow));
    }
    Ok(output)
}

/// Build a new opus from a MIDI stream
///
/// Pitched channels keep the order they first sound in and get as many lines as
/// they ever have simultaneous notes; higher notes take lower lines. The
/// percussion channel gets one line per distinct drum. A percussion channel is
/// created even when the stream has no drums.
pub fn import_midi<M: MidiSource>(midi: &M) -> Result<OpusManagerCore> {
    let imported = tree_from_midi(midi)?;

    // (beat, path, events sorted high to low)
    let mut placements: Vec<(usize, Vec<(usize, usize)>, Vec<OpusEvent>)> = Vec::new();
    let mut pitched_channels: Vec<u8> = Vec::new();
    let mut line_counts: HashMap<u8, usize> = HashMap::new();
    let mut drums: Vec<i32> = Vec::new();

    for (beat_index, beat) in imported.beats.iter().enumerate() {
        for (path, events) in beat.get_events_mapped(beat.root()) {
            let mut events: Vec<OpusEvent> = events.iter().copied().collect();
            events.sort_by(|a, b| b.note.cmp(&a.note));

            let mut counts: HashMap<u8, usize> = HashMap::new();
            for event in &events {
                if event.channel == PERCUSSION_MIDI_CHANNEL {
                    if !drums.contains(&event.note) {
                        drums.push(event.note);
                    }
                    continue;
                }
                if !pitched_channels.contains(&event.channel) {
                    pitched_channels.push(event.channel);
                }
                *counts.entry(event.channel).or_default() += 1;
            }
            for (channel, count) in counts {
                let lines = line_counts.entry(channel).or_default();
                *lines = (*lines).max(count);
            }

            placements.push((beat_index, path, events));
        }
    }

    let mut core = OpusManagerCore::default();
    core.set_tempo(imported.tempo);
    let percussion = core.new_channel(None, drums.len().max(1), None);
    core.set_beat_count(imported.beats.len().max(1));

    let mut channel_map: HashMap<u8, usize> = HashMap::new();
    for (order, midi_channel) in pitched_channels.iter().enumerate() {
        let lines = line_counts.get(midi_channel).copied().unwrap_or(1);
        let index = core.new_channel(Some(order), lines, None);
        channel_map.insert(*midi_channel, index);
    }
    let percussion = percussion + pitched_channels.len();
    channel_map.insert(PERCUSSION_MIDI_CHANNEL, percussion);

    for (line_offset, drum) in drums.iter().enumerate() {
        core.set_percussion_instrument(line_offset, Some(*drum))?;
    }

    for (beat_index, path, events) in placements {
        let mut line_cursor: HashMap<u8, usize> = HashMap::new();

        for event in events {
            let Some(channel) = channel_map.get(&event.channel).copied() else {
                continue;
            };
            let line_offset = if channel == percussion {
                drums.iter().position(|drum| *drum == event.note).unwrap_or(0)
            } else {
                let cursor = line_cursor.entry(event.channel).or_default();
                *cursor += 1;
                *cursor - 1
            };
            let beat_key = BeatKey::new(channel, line_offset, beat_index);

            let mut working = Vec::with_capacity(path.len());
            for (index, size) in &path {
                if core.get_tree(beat_key, &working)?.size() != *size {
                    core.split_tree(beat_key, &working, *size)?;
                }
                working.push(*index);
            }

            if channel == percussion {
                core.set_percussion_event(beat_key, &working)?;
            } else if (0..=MAX_ABSOLUTE_NOTE).contains(&event.note) {
                let midi_channel = core.channel(channel)?.midi_channel;
                core.set_event(
                    beat_key,
                    &working,
                    OpusEvent::absolute(event.note, DEFAULT_RADIX, midi_channel),
                )?;
            } else {
                log::warn!("skipping imported note {} outside the opus range", event.note);
            }
        }
    }

    for change in &imported.instruments {
        let (midi_channel, bank, program) = match *change {
            InstrumentChange::Bank { channel, bank } => (channel, Some(bank), None),
            InstrumentChange::Program { channel, program } => (channel, None, Some(program)),
        };
        let Some(channel) = channel_map.get(&midi_channel).copied() else {
            continue;
        };
        let (current_bank, current_program) = core.get_channel_instrument(channel)?;
        core.set_channel_instrument(
            channel,
            bank.unwrap_or(current_bank),
            program.unwrap_or(current_program),
        )?;
    }

    log::info!(
        "imported midi: {} channels, {} beats",
        core.channels().len(),
        core.beat_count()
    );
    Ok(core)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::Midi;

    fn note(midi: &mut Midi, start: usize, end: usize, channel: u8, key: u8) {
        midi.insert_event(start, MidiEvent::NoteOn { channel, note: key, velocity: 100 });
        midi.insert_event(end, MidiEvent::NoteOff { channel, note: key, velocity: 0 });
    }

    #[test]
    fn test_eighth_notes_split_beat() {
        let mut midi = Midi::new(120);
        note(&mut midi, 0, 60, 0, 60);
        note(&mut midi, 60, 120, 0, 64);

        let core = import_midi(&midi).unwrap();
        let beat = BeatKey::new(0, 0, 0);
        assert_eq!(core.beat_count(), 1);
        assert_eq!(core.get_tree(beat, &[]).unwrap().size(), 2);
        assert_eq!(core.get_tree(beat, &[0]).unwrap().event().map(|e| e.note), Some(39));
        assert_eq!(core.get_tree(beat, &[1]).unwrap().event().map(|e| e.note), Some(43));
    }

    #[test]
    fn test_chord_spreads_over_lines() {
        let mut midi = Midi::new(96);
        note(&mut midi, 0, 96, 0, 60);
        note(&mut midi, 0, 96, 0, 64);

        let core = import_midi(&midi).unwrap();
        assert_eq!(core.get_channel_line_counts(), vec![2, 1]);
        let top = core.get_tree(BeatKey::new(0, 0, 0), &[]).unwrap();
        let bottom = core.get_tree(BeatKey::new(0, 1, 0), &[]).unwrap();
        assert_eq!(top.event().map(|e| e.note), Some(43));
        assert_eq!(bottom.event().map(|e| e.note), Some(39));
    }

    #[test]
    fn test_triplets() {
        let mut midi = Midi::new(120);
        note(&mut midi, 0, 40, 1, 50);
        note(&mut midi, 40, 80, 1, 52);
        note(&mut midi, 81, 120, 1, 53);

        let core = import_midi(&midi).unwrap();
        let beat = BeatKey::new(0, 0, 0);
        assert_eq!(core.get_tree(beat, &[]).unwrap().size(), 3);
        assert_eq!(core.get_tree(beat, &[2]).unwrap().event().map(|e| e.note), Some(32));
    }

    #[test]
    fn test_percussion_moves_last() {
        let mut midi = Midi::new(120);
        note(&mut midi, 0, 120, 9, 36);
        note(&mut midi, 120, 240, 9, 38);
        note(&mut midi, 120, 240, 2, 70);
        midi.insert_event(0, MidiEvent::ProgramChange { channel: 2, program: 33 });

        let core = import_midi(&midi).unwrap();
        assert_eq!(core.channels().len(), 2);
        assert!(core.is_percussion(1));
        assert_eq!(core.get_channel_line_counts(), vec![1, 2]);
        assert_eq!(core.get_percussion_instrument(0), 9);
        assert_eq!(core.get_percussion_instrument(1), 11);
        assert!(core.get_tree(BeatKey::new(1, 1, 1), &[]).unwrap().is_event());
        assert_eq!(core.get_channel_instrument(0).unwrap().1, 33);
    }

    #[test]
    fn test_late_onset_opens_new_beat() {
        let mut midi = Midi::new(120);
        note(&mut midi, 119, 130, 0, 45);

        let core = import_midi(&midi).unwrap();
        assert_eq!(core.beat_count(), 2);
        assert!(!core.get_tree(BeatKey::new(0, 0, 0), &[]).unwrap().is_event());
        assert_eq!(core.get_tree(BeatKey::new(0, 0, 1), &[]).unwrap().event().map(|e| e.note), Some(24));
    }

    #[test]
    fn test_tempo_and_empty_percussion() {
        let mut midi = Midi::new(120);
        midi.insert_event(0, MidiEvent::SetTempo { mpqn: 600_000 });
        note(&mut midi, 0, 120, 0, 60);

        let core = import_midi(&midi).unwrap();
        assert_eq!(core.tempo(), 100.0);
        assert_eq!(core.channels().len(), 2);
        assert!(core.is_percussion(1));
    }

    #[test]
    fn test_zero_ppqn_rejected() {
        let midi = Midi::new(0);
        assert!(import_midi(&midi).is_err());
    }
}
