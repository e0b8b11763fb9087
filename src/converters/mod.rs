//! Format converters
//!
//! Conversions into the opus model from external formats.

pub mod midi_import;

pub use midi_import::{import_midi, tree_from_midi, ImportedBeats, InstrumentChange};
