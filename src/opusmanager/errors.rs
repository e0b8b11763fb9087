//! Error types for opus editing

use thiserror::Error;

use crate::midi::MidiError;
use crate::models::BeatKey;
use crate::parse::ParseError;
use crate::structure::TreeError;

#[derive(Debug, Error)]
pub enum OpusError {
    /// Channel, line or beat of a key is out of range
    #[error("no beat tree at {0}")]
    BadBeatKey(BeatKey),

    #[error("channel {0} does not exist")]
    BadChannel(usize),

    #[error("beat index {0} is out of range")]
    BadBeatIndex(usize),

    /// Relative/absolute conversion requested on a node without an event
    #[error("no event at {beat_key} {position:?} to convert")]
    NonEventConversion { beat_key: BeatKey, position: Vec<usize> },

    #[error("note {0} is outside the representable range")]
    NoteOutOfRange(i32),

    #[error("pitched events cannot be placed on the percussion channel")]
    NonPercussionEventSet,

    #[error("percussion events can only be placed on the percussion channel")]
    PercussionEventSet,

    #[error("no path to save the project to")]
    EmptyPath,

    #[error("cannot insert beside the root of a beat")]
    BadInsertPosition,

    #[error("cannot remove the only beat")]
    RemovingLastBeat,

    #[error("cannot remove the only line of channel {0}")]
    RemovingLastLine(usize),

    #[error("the percussion channel cannot be removed")]
    RemovingPercussionChannel,

    /// Line moves may not cross the percussion boundary
    #[error("cannot move a line from channel {from} to channel {to}")]
    IncompatibleChannel { from: usize, to: usize },

    #[error("{0} cannot be linked to itself")]
    SelfLink(BeatKey),

    #[error("range {from} .. {to} contains its target {start}")]
    LinkRangeOverlap { from: BeatKey, to: BeatKey, start: BeatKey },

    #[error("range {from} .. {to} placed at {start} runs past the opus")]
    LinkRangeOverflow { from: BeatKey, to: BeatKey, start: BeatKey },

    #[error("{0} .. {1} is not a valid range")]
    InvalidBeatKeyRange(BeatKey, BeatKey),

    /// A channel uuid no longer refers to a live channel
    #[error("no channel with uuid {0}")]
    InvalidChannelUuid(u32),

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Midi(#[from] MidiError),

    #[error("invalid project json: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, OpusError>;
