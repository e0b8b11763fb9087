//! Opus WASM API
//!
//! JavaScript-facing functions over a single module-owned opus.
//!
//! # Module Structure
//!
//! - `helpers`: Logging, serialization and access to the owned opus
//! - `core`: Project, beat content, grid shape, link and history operations
//! - `export`: MIDI import and export

pub mod helpers;
pub mod core;
pub mod export;

pub use self::core::*;
pub use export::{export_midi, import_midi};
