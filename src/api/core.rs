//! WASM API for opus editing
//!
//! Every call edits the module-owned opus through `OpusManager`, so edits are
//! link-aware and undoable. Positions arrive as JavaScript arrays of child
//! indices; beat keys as `{channel, line_offset, beat}` objects.

use serde::Serialize;
use wasm_bindgen::prelude::*;

use crate::api::helpers::{deserialize, serialize, with_opus};
use crate::models::{BeatKey, OpusEvent};
use crate::opusmanager::OpusManager;
use crate::{wasm_info, wasm_log};

/// Summary of the loaded opus for the UI
#[derive(Serialize, Clone, Debug)]
pub struct OpusInfo {
    pub name: String,
    pub tempo: f32,
    pub transpose: i32,
    pub beat_count: usize,
    pub line_counts: Vec<usize>,
    pub can_undo: bool,
    pub can_redo: bool,
    pub changed: bool,
}

impl OpusInfo {
    fn from_manager(opus: &OpusManager) -> Self {
        Self {
            name: opus.project_name().to_string(),
            tempo: opus.tempo(),
            transpose: opus.transpose(),
            beat_count: opus.beat_count(),
            line_counts: opus.get_channel_line_counts(),
            can_undo: opus.has_history(),
            can_redo: opus.can_redo(),
            changed: opus.has_changed_since_save(),
        }
    }
}

fn parse_position(value: JsValue) -> Result<Vec<usize>, JsValue> {
    if value.is_undefined() || value.is_null() {
        return Ok(Vec::new());
    }
    deserialize(value, "Invalid position")
}

// ============================================================================
// Project
// ============================================================================

#[wasm_bindgen(js_name = newOpus)]
pub fn new_opus() -> Result<(), JsValue> {
    wasm_info!("newOpus called");
    with_opus(|opus| {
        opus.new_opus();
        Ok(())
    })
}

#[wasm_bindgen(js_name = loadJson)]
pub fn load_json(json: &str) -> Result<(), JsValue> {
    wasm_info!("loadJson called: {} bytes", json.len());
    with_opus(|opus| opus.load_json(json))
}

#[wasm_bindgen(js_name = toJson)]
pub fn to_json() -> Result<String, JsValue> {
    with_opus(|opus| opus.to_json())
}

#[wasm_bindgen(js_name = getOpusInfo)]
pub fn get_opus_info() -> Result<JsValue, JsValue> {
    let info = with_opus(|opus| Ok(OpusInfo::from_manager(opus)))?;
    serialize(&info, "Failed to serialize opus info")
}

/// Beat tree at `channel`/`line`/`beat` in the project's beat-string form
#[wasm_bindgen(js_name = getBeatString)]
pub fn get_beat_string(channel: usize, line: usize, beat: usize) -> Result<String, JsValue> {
    with_opus(|opus| {
        let radix = opus.radix();
        let tree = opus.get_beat_tree(BeatKey::new(channel, line, beat))?;
        Ok(crate::parse::to_string(tree, tree.root(), radix)?)
    })
}

#[wasm_bindgen(js_name = setTempo)]
pub fn set_tempo(tempo: f32) -> Result<(), JsValue> {
    with_opus(|opus| {
        opus.set_tempo(tempo);
        Ok(())
    })
}

#[wasm_bindgen(js_name = setTranspose)]
pub fn set_transpose(transpose: i32) -> Result<(), JsValue> {
    with_opus(|opus| {
        opus.set_transpose(transpose);
        Ok(())
    })
}

#[wasm_bindgen(js_name = setProjectName)]
pub fn set_project_name(name: &str) -> Result<(), JsValue> {
    with_opus(|opus| {
        opus.set_project_name(name);
        Ok(())
    })
}

// ============================================================================
// Beat content
// ============================================================================

#[wasm_bindgen(js_name = setEvent)]
pub fn set_event(
    channel: usize,
    line: usize,
    beat: usize,
    position_js: JsValue,
    note: i32,
    relative: bool,
) -> Result<(), JsValue> {
    let position = parse_position(position_js)?;
    wasm_log!("setEvent {}:{}:{} {:?} note={} relative={}", channel, line, beat, position, note, relative);
    with_opus(|opus| {
        let beat_key = BeatKey::new(channel, line, beat);
        let midi_channel = opus.channel(channel)?.midi_channel;
        let event = OpusEvent::new(note, opus.radix(), midi_channel, relative);
        opus.set_event(beat_key, &position, event)
    })
}

#[wasm_bindgen(js_name = setPercussionEvent)]
pub fn set_percussion_event(line: usize, beat: usize, position_js: JsValue) -> Result<(), JsValue> {
    let position = parse_position(position_js)?;
    with_opus(|opus| {
        let channel = opus.percussion_channel().unwrap_or(0);
        opus.set_percussion_event(BeatKey::new(channel, line, beat), &position)
    })
}

#[wasm_bindgen(js_name = unsetEvent)]
pub fn unset_event(channel: usize, line: usize, beat: usize, position_js: JsValue) -> Result<(), JsValue> {
    let position = parse_position(position_js)?;
    with_opus(|opus| opus.unset(BeatKey::new(channel, line, beat), &position))
}

#[wasm_bindgen(js_name = splitTree)]
pub fn split_tree(channel: usize, line: usize, beat: usize, position_js: JsValue, splits: usize) -> Result<(), JsValue> {
    let position = parse_position(position_js)?;
    with_opus(|opus| opus.split_tree(BeatKey::new(channel, line, beat), &position, splits))
}

#[wasm_bindgen(js_name = insertAfter)]
pub fn insert_after(channel: usize, line: usize, beat: usize, position_js: JsValue) -> Result<(), JsValue> {
    let position = parse_position(position_js)?;
    with_opus(|opus| opus.insert_after(BeatKey::new(channel, line, beat), &position))
}

#[wasm_bindgen(js_name = removeNode)]
pub fn remove_node(channel: usize, line: usize, beat: usize, position_js: JsValue) -> Result<(), JsValue> {
    let position = parse_position(position_js)?;
    with_opus(|opus| opus.remove(BeatKey::new(channel, line, beat), &position))
}

// ============================================================================
// Grid shape
// ============================================================================

#[wasm_bindgen(js_name = insertBeat)]
pub fn insert_beat(index: usize) -> Result<(), JsValue> {
    with_opus(|opus| opus.insert_beat(index, None))
}

#[wasm_bindgen(js_name = removeBeat)]
pub fn remove_beat(index: usize) -> Result<(), JsValue> {
    with_opus(|opus| opus.remove_beat(index))
}

#[wasm_bindgen(js_name = newLine)]
pub fn new_line(channel: usize) -> Result<usize, JsValue> {
    with_opus(|opus| opus.new_line(channel, None))
}

#[wasm_bindgen(js_name = removeLine)]
pub fn remove_line(channel: usize, line: usize) -> Result<(), JsValue> {
    with_opus(|opus| opus.remove_line(channel, line).map(|_| ()))
}

#[wasm_bindgen(js_name = newChannel)]
pub fn new_channel() -> Result<usize, JsValue> {
    with_opus(|opus| opus.new_channel(None, 1, None))
}

#[wasm_bindgen(js_name = removeChannel)]
pub fn remove_channel(index: usize) -> Result<(), JsValue> {
    with_opus(|opus| opus.remove_channel(index))
}

#[wasm_bindgen(js_name = setChannelInstrument)]
pub fn set_channel_instrument(channel: usize, bank: u8, program: u8) -> Result<(), JsValue> {
    with_opus(|opus| opus.set_channel_instrument(channel, bank, program))
}

// ============================================================================
// Links
// ============================================================================

#[wasm_bindgen(js_name = linkBeats)]
pub fn link_beats(beat_js: JsValue, target_js: JsValue) -> Result<(), JsValue> {
    let beat: BeatKey = deserialize(beat_js, "Invalid beat key")?;
    let target: BeatKey = deserialize(target_js, "Invalid target key")?;
    with_opus(|opus| opus.link_beats(beat, target))
}

#[wasm_bindgen(js_name = unlinkBeat)]
pub fn unlink_beat(beat_js: JsValue) -> Result<(), JsValue> {
    let beat: BeatKey = deserialize(beat_js, "Invalid beat key")?;
    with_opus(|opus| {
        opus.unlink_beat(beat);
        Ok(())
    })
}

#[wasm_bindgen(js_name = getAllLinked)]
pub fn get_all_linked(beat_js: JsValue) -> Result<JsValue, JsValue> {
    let beat: BeatKey = deserialize(beat_js, "Invalid beat key")?;
    let linked = with_opus(|opus| Ok(opus.get_all_linked(beat)))?;
    serialize(&linked, "Failed to serialize linked beats")
}

// ============================================================================
// History
// ============================================================================

/// Returns whether anything was undone
#[wasm_bindgen]
pub fn undo() -> Result<bool, JsValue> {
    with_opus(|opus| opus.apply_undo())
}

#[wasm_bindgen]
pub fn redo() -> Result<bool, JsValue> {
    with_opus(|opus| opus.apply_redo())
}
