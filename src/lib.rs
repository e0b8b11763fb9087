//! Opus WASM Module
//!
//! Editing core for nested-tuplet music notation: beat trees, a channel/line
//! grid of them, linked beats, undo/redo, a JSON project format and MIDI
//! exchange. The `api` module exposes it to JavaScript.

pub mod structure;
pub mod models;
pub mod parse;
pub mod undo;
pub mod opusmanager;
pub mod midi;
pub mod renderers;
pub mod converters;
pub mod api;

// Re-export commonly used types
pub use models::{BeatKey, BeatTree, OpusChannel, OpusEvent, OpusLine};
pub use opusmanager::{OpusError, OpusManager, OpusManagerCore};
pub use structure::{NodeId, OpusTree};

use wasm_bindgen::prelude::*;

// This is like the `main` function, but for WASM modules.
#[wasm_bindgen(start)]
pub fn main() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();

    #[cfg(feature = "console_log")]
    console_log::init_with_level(log::Level::Debug).expect("failed to initialize logger");

    log::info!("Opus WASM module initialized");
}
