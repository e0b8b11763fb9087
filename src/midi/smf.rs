//! Standard MIDI File adapter
//!
//! Reads every track of an SMF into one absolute-tick `Midi` stream and
//! writes a `Midi` back out as a single-track file.

use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};

use super::{Midi, MidiError, MidiEvent, MidiSource, Result};

const SONG_POSITION_STATUS: u8 = 0xF2;
const BANK_SELECT_CONTROLLER: u8 = 0;

impl Midi {
    /// Parse SMF bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Midi> {
        let smf = Smf::parse(bytes)?;
        let ppqn = match smf.header.timing {
            Timing::Metrical(ticks) => ticks.as_int() as usize,
            Timing::Timecode(..) => return Err(MidiError::UnsupportedTiming),
        };

        let mut midi = Midi::new(ppqn);
        for track in &smf.tracks {
            let mut tick = 0usize;
            for event in track {
                tick += event.delta.as_int() as usize;
                if let Some(parsed) = read_event(&event.kind) {
                    midi.insert_event(tick, parsed);
                }
            }
        }
        log::debug!("read {} midi events at {} ppqn", midi.len(), ppqn);
        Ok(midi)
    }

    /// Encode as a single-track SMF
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let ppqn = u16::try_from(self.get_ppqn())
            .ok()
            .filter(|ppqn| *ppqn < 0x8000)
            .ok_or(MidiError::BadPpqn(self.get_ppqn()))?;

        let events = self.get_all_events();
        let positions: Vec<[u8; 3]> = events
            .iter()
            .filter_map(|(_, event)| match event {
                MidiEvent::SongPositionPointer { beat } => {
                    Some([SONG_POSITION_STATUS, (beat & 0x7F) as u8, ((beat >> 7) & 0x7F) as u8])
                }
                _ => None,
            })
            .collect();

        let mut track = Vec::with_capacity(events.len() + 1);
        let mut positions = positions.iter();
        let mut previous = 0usize;
        for (tick, event) in &events {
            let kind = match write_event(event) {
                Some(kind) => kind,
                None => match positions.next() {
                    Some(bytes) => TrackEventKind::Escape(&bytes[..]),
                    None => continue,
                },
            };
            track.push(TrackEvent {
                delta: (tick.saturating_sub(previous) as u32).into(),
                kind,
            });
            previous = *tick;
        }
        track.push(TrackEvent {
            delta: 0.into(),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        });

        let smf = Smf {
            header: Header::new(Format::SingleTrack, Timing::Metrical(ppqn.into())),
            tracks: vec![track],
        };
        let mut out = Vec::new();
        smf.write(&mut out)
            .map_err(|e| MidiError::Write(e.to_string()))?;
        Ok(out)
    }
}

fn read_event(kind: &TrackEventKind<'_>) -> Option<MidiEvent> {
    match kind {
        TrackEventKind::Midi { channel, message } => {
            let channel = channel.as_int();
            match message {
                MidiMessage::NoteOn { key, vel } if vel.as_int() == 0 => Some(MidiEvent::NoteOff {
                    channel,
                    note: key.as_int(),
                    velocity: 0,
                }),
                MidiMessage::NoteOn { key, vel } => Some(MidiEvent::NoteOn {
                    channel,
                    note: key.as_int(),
                    velocity: vel.as_int(),
                }),
                MidiMessage::NoteOff { key, vel } => Some(MidiEvent::NoteOff {
                    channel,
                    note: key.as_int(),
                    velocity: vel.as_int(),
                }),
                MidiMessage::ProgramChange { program } => Some(MidiEvent::ProgramChange {
                    channel,
                    program: program.as_int(),
                }),
                MidiMessage::Controller { controller, value } if controller.as_int() == BANK_SELECT_CONTROLLER => {
                    Some(MidiEvent::BankSelect {
                        channel,
                        bank: value.as_int(),
                    })
                }
                _ => None,
            }
        }
        TrackEventKind::Meta(MetaMessage::Tempo(mpqn)) => Some(MidiEvent::SetTempo { mpqn: mpqn.as_int() }),
        TrackEventKind::Meta(MetaMessage::TimeSignature(numerator, denominator, clocks, thirty_seconds)) => {
            Some(MidiEvent::TimeSignature {
                numerator: *numerator,
                denominator: *denominator,
                clocks_per_click: *clocks,
                thirty_seconds_per_quarter: *thirty_seconds,
            })
        }
        TrackEventKind::Escape(bytes) if bytes.len() >= 3 && bytes[0] == SONG_POSITION_STATUS => {
            Some(MidiEvent::SongPositionPointer {
                beat: (bytes[1] as u16 & 0x7F) | ((bytes[2] as u16 & 0x7F) << 7),
            })
        }
        _ => None,
    }
}

/// Channel and meta events; song position pointers have no direct encoding
fn write_event(event: &MidiEvent) -> Option<TrackEventKind<'static>> {
    let midi = |channel: u8, message: MidiMessage| TrackEventKind::Midi {
        channel: (channel & 0x0F).into(),
        message,
    };
    let kind = match *event {
        MidiEvent::NoteOn { channel, note, velocity } => midi(
            channel,
            MidiMessage::NoteOn {
                key: note.min(127).into(),
                vel: velocity.min(127).into(),
            },
        ),
        MidiEvent::NoteOff { channel, note, velocity } => midi(
            channel,
            MidiMessage::NoteOff {
                key: note.min(127).into(),
                vel: velocity.min(127).into(),
            },
        ),
        MidiEvent::ProgramChange { channel, program } => midi(
            channel,
            MidiMessage::ProgramChange {
                program: program.min(127).into(),
            },
        ),
        MidiEvent::BankSelect { channel, bank } => midi(
            channel,
            MidiMessage::Controller {
                controller: BANK_SELECT_CONTROLLER.into(),
                value: bank.min(127).into(),
            },
        ),
        MidiEvent::TimeSignature {
            numerator,
            denominator,
            clocks_per_click,
            thirty_seconds_per_quarter,
        } => TrackEventKind::Meta(MetaMessage::TimeSignature(
            numerator,
            denominator,
            clocks_per_click,
            thirty_seconds_per_quarter,
        )),
        MidiEvent::SetTempo { mpqn } => TrackEventKind::Meta(MetaMessage::Tempo(mpqn.min(0xFF_FFFF).into())),
        MidiEvent::SongPositionPointer { .. } => return None,
    };
    Some(kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_header() {
        let mut midi = Midi::new(120);
        midi.insert_event(0, MidiEvent::NoteOn { channel: 0, note: 60, velocity: 64 });
        midi.insert_event(120, MidiEvent::NoteOff { channel: 0, note: 60, velocity: 64 });

        let bytes = midi.to_bytes().unwrap();
        assert_eq!(&bytes[0..4], b"MThd");
    }

    #[test]
    fn test_bytes_round_trip() {
        let mut midi = Midi::new(240);
        midi.insert_event(0, MidiEvent::SetTempo { mpqn: 600_000 });
        midi.insert_event(0, MidiEvent::ProgramChange { channel: 2, program: 33 });
        midi.insert_event(0, MidiEvent::SongPositionPointer { beat: 0 });
        midi.insert_event(0, MidiEvent::NoteOn { channel: 2, note: 45, velocity: 90 });
        midi.insert_event(240, MidiEvent::SongPositionPointer { beat: 1 });
        midi.insert_event(240, MidiEvent::NoteOff { channel: 2, note: 45, velocity: 90 });

        let parsed = Midi::from_bytes(&midi.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed.get_ppqn(), 240);
        assert_eq!(parsed.get_all_events(), midi.get_all_events());
    }

    #[test]
    fn test_zero_velocity_note_on_is_note_off() {
        let kind = TrackEventKind::Midi {
            channel: 3.into(),
            message: MidiMessage::NoteOn { key: 50.into(), vel: 0.into() },
        };
        assert_eq!(
            read_event(&kind),
            Some(MidiEvent::NoteOff { channel: 3, note: 50, velocity: 0 })
        );
    }

    #[test]
    fn test_bad_ppqn_rejected() {
        let midi = Midi::new(70_000);
        assert!(matches!(midi.to_bytes(), Err(MidiError::BadPpqn(70_000))));
    }
}
