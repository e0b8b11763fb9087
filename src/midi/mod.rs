//! Semantic MIDI events
//!
//! The opus converts to and from a flat list of timestamped events. Byte-level
//! encoding is kept apart in `smf`, so import can consume any `MidiSource`.

pub mod smf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MidiError {
    #[error("could not parse midi data: {0}")]
    Parse(#[from] midly::Error),

    #[error("could not write midi data: {0}")]
    Write(String),

    #[error("timecode-based midi timing is not supported")]
    UnsupportedTiming,

    #[error("ppqn {0} does not fit a midi header")]
    BadPpqn(usize),
}

pub type Result<T> = std::result::Result<T, MidiError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiEvent {
    NoteOn { channel: u8, note: u8, velocity: u8 },
    NoteOff { channel: u8, note: u8, velocity: u8 },
    ProgramChange { channel: u8, program: u8 },
    BankSelect { channel: u8, bank: u8 },
    TimeSignature {
        numerator: u8,
        /// Power of two: 2 means a quarter note
        denominator: u8,
        clocks_per_click: u8,
        thirty_seconds_per_quarter: u8,
    },
    /// Microseconds per quarter note
    SetTempo { mpqn: u32 },
    SongPositionPointer { beat: u16 },
}

impl MidiEvent {
    /// Order of events sharing a tick: setup first, releases before attacks
    fn rank(&self) -> u8 {
        match self {
            MidiEvent::SetTempo { .. } | MidiEvent::TimeSignature { .. } => 0,
            MidiEvent::BankSelect { .. } => 1,
            MidiEvent::ProgramChange { .. } => 2,
            MidiEvent::SongPositionPointer { .. } => 3,
            MidiEvent::NoteOff { .. } => 4,
            MidiEvent::NoteOn { .. } => 5,
        }
    }
}

/// Anything that can hand over a tick-ordered event stream
pub trait MidiSource {
    fn get_all_events(&self) -> Vec<(usize, MidiEvent)>;
    fn get_ppqn(&self) -> usize;
}

/// In-memory event stream
#[derive(Debug, Clone, PartialEq)]
pub struct Midi {
    ppqn: usize,
    events: Vec<(usize, MidiEvent)>,
}

impl Midi {
    pub fn new(ppqn: usize) -> Self {
        Self {
            ppqn,
            events: Vec::new(),
        }
    }

    pub fn insert_event(&mut self, tick: usize, event: MidiEvent) {
        self.events.push((tick, event));
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl MidiSource for Midi {
    fn get_all_events(&self) -> Vec<(usize, MidiEvent)> {
        let mut events = self.events.clone();
        events.sort_by_key(|(tick, event)| (*tick, event.rank()));
        events
    }

    fn get_ppqn(&self) -> usize {
        self.ppqn
    }
}
