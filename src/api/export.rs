//! WASM API for MIDI exchange

use wasm_bindgen::prelude::*;

use crate::api::helpers::with_opus;
use crate::wasm_info;

/// Render the whole opus as a Standard MIDI File
///
/// # Returns
/// MIDI file as Uint8Array
#[wasm_bindgen(js_name = exportMidi)]
pub fn export_midi() -> Result<js_sys::Uint8Array, JsValue> {
    let midi_bytes = with_opus(|opus| opus.export_midi_bytes())?;
    wasm_info!("exportMidi: {} bytes", midi_bytes.len());

    let uint8_array = js_sys::Uint8Array::new_with_length(midi_bytes.len() as u32);
    uint8_array.copy_from(&midi_bytes);
    Ok(uint8_array)
}

/// Replace the loaded opus with a quantized import of `bytes`.
/// The current opus is kept when the file cannot be read.
#[wasm_bindgen(js_name = importMidi)]
pub fn import_midi(bytes: &[u8]) -> Result<(), JsValue> {
    wasm_info!("importMidi called: {} bytes", bytes.len());
    with_opus(|opus| opus.import_midi_bytes(bytes))
}
