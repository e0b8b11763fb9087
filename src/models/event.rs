use serde::{Deserialize, Serialize};
use std::fmt;

/// A note placed on a leaf of a beat tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OpusEvent {
    /// Absolute pitch index, signed delta when `relative`, or percussion instrument code
    pub note: i32,

    /// Base used to write `note` in beat strings
    pub radix: u32,

    /// MIDI channel the event sounds on
    pub channel: u8,

    /// Whether `note` is a delta against the nearest preceding resolvable event
    pub relative: bool,
}

impl OpusEvent {
    pub fn new(note: i32, radix: u32, channel: u8, relative: bool) -> Self {
        Self {
            note,
            radix,
            channel,
            relative,
        }
    }

    pub fn absolute(note: i32, radix: u32, channel: u8) -> Self {
        Self::new(note, radix, channel, false)
    }

    pub fn relative(delta: i32, radix: u32, channel: u8) -> Self {
        Self::new(delta, radix, channel, true)
    }
}

/// Address of one beat tree: channel index, line within the channel, beat column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BeatKey {
    pub channel: usize,
    pub line_offset: usize,
    pub beat: usize,
}

impl BeatKey {
    pub fn new(channel: usize, line_offset: usize, beat: usize) -> Self {
        Self {
            channel,
            line_offset,
            beat,
        }
    }

    pub fn with_beat(self, beat: usize) -> Self {
        Self { beat, ..self }
    }
}

impl fmt::Display for BeatKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.channel, self.line_offset, self.beat)
    }
}
