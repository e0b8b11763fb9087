//! MIDI export
//!
//! Renders an opus to a `Midi` event stream. Defaults shared with import and
//! the project model live in `defaults`.
//!
//! # Usage
//! ```rust,ignore
//! let midi = opus.get_midi(0, None);
//! let bytes = midi.to_bytes()?;
//! ```

pub mod converter;
pub mod defaults;

pub use converter::opus_to_midi;
pub use defaults::{DEFAULT_PPQN, DEFAULT_PROGRAM, DEFAULT_TEMPO_BPM, DEFAULT_VOLUME};
