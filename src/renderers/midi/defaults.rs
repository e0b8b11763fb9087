//! Default values for MIDI conversion and new projects
//!
//! Tempo, resolution, note offsets and channel assignment shared by export,
//! import and the project model.

/// Default tempo in beats per minute
pub const DEFAULT_TEMPO_BPM: f32 = 120.0;

/// Default line volume, written as NoteOn velocity (0-127)
pub const DEFAULT_VOLUME: u8 = 64;

/// Default MIDI program (0 = Acoustic Grand Piano in General MIDI)
pub const DEFAULT_PROGRAM: u8 = 0;

/// Default ticks per quarter note for exported streams
pub const DEFAULT_PPQN: usize = 120;

/// Numeric base used to encode notes in beat strings
pub const DEFAULT_RADIX: u32 = 12;

/// Percussion instrument assigned to a line that has none
pub const DEFAULT_PERCUSSION: i32 = 0;

/// Absolute note 0 sounds as MIDI key 21 (A0)
pub const PITCHED_NOTE_OFFSET: i32 = 21;

/// Percussion instrument 0 sounds as MIDI key 27
pub const PERCUSSION_NOTE_OFFSET: i32 = 27;

/// General MIDI drum channel (10 in 1-indexed terms)
pub const PERCUSSION_MIDI_CHANNEL: u8 = 9;

/// Bank select value used by the percussion channel
pub const PERCUSSION_BANK: u8 = 128;

/// Highest absolute note an event may resolve to
pub const MAX_ABSOLUTE_NOTE: i32 = 95;

/// Subdivisions tried, in combination, when quantizing imported beats
pub const QUANTIZATION_DIVISORS: [usize; 6] = [2, 2, 2, 3, 5, 7];

/// Lowest MIDI channel not already taken, never handing out the drum channel.
/// Falls back to channel 0 once all fifteen melodic channels are used.
pub fn next_available_midi_channel(used: &[u8]) -> u8 {
    (0..16u8)
        .filter(|channel| *channel != PERCUSSION_MIDI_CHANNEL)
        .find(|channel| !used.contains(channel))
        .unwrap_or(0)
}

/// Microseconds per quarter note for a tempo in BPM
pub fn bpm_to_mpqn(bpm: f32) -> u32 {
    if bpm <= 0.0 {
        return 500_000;
    }
    (60_000_000.0 / bpm).round() as u32
}

pub fn mpqn_to_bpm(mpqn: u32) -> f32 {
    if mpqn == 0 {
        return DEFAULT_TEMPO_BPM;
    }
    60_000_000.0 / mpqn as f32
}
