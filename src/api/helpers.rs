//! Shared helpers for WASM API operations
//!
//! Logging macros, serde bridges and access to the single opus owned by the
//! module.

use std::sync::{Mutex, MutexGuard};

use lazy_static::lazy_static;
use serde::de::DeserializeOwned;
use serde::Serialize;
use wasm_bindgen::prelude::*;

use crate::opusmanager::{OpusError, OpusManager};

// WASM-owned opus (canonical source of truth)
lazy_static! {
    static ref OPUS: Mutex<Option<OpusManager>> = Mutex::new(None);
}

// ============================================================================
// Logging Macros
// ============================================================================

/// Log a debug message with [WASM] prefix
#[macro_export]
macro_rules! wasm_log {
    ($($arg:tt)*) => {
        log::debug!("[WASM] {}", format!($($arg)*))
    };
}

#[macro_export]
macro_rules! wasm_info {
    ($($arg:tt)*) => {
        log::info!("[WASM] {}", format!($($arg)*))
    };
}

/// Log an error message with [WASM] ❌ prefix
#[macro_export]
macro_rules! wasm_error {
    ($($arg:tt)*) => {
        log::error!("[WASM] ❌ {}", format!($($arg)*))
    };
}

// ============================================================================
// Opus access
// ============================================================================

pub fn lock_opus() -> Result<MutexGuard<'static, Option<OpusManager>>, JsValue> {
    OPUS.lock().map_err(|e| {
        wasm_error!("Opus lock poisoned: {}", e);
        JsValue::from_str("Opus lock poisoned")
    })
}

/// Run `f` against the loaded opus, creating a default one on first use
pub fn with_opus<R, F>(f: F) -> Result<R, JsValue>
where
    F: FnOnce(&mut OpusManager) -> Result<R, OpusError>,
{
    let mut guard = lock_opus()?;
    let opus = guard.get_or_insert_with(OpusManager::new);
    f(opus).map_err(to_js_error)
}

pub fn to_js_error(error: OpusError) -> JsValue {
    wasm_error!("{}", error);
    JsValue::from_str(&error.to_string())
}

// ============================================================================
// Serialization/Deserialization Helpers
// ============================================================================

/// Deserialize a value from JavaScript with automatic error handling
pub fn deserialize<T: DeserializeOwned>(value: JsValue, error_context: &str) -> Result<T, JsValue> {
    serde_wasm_bindgen::from_value(value).map_err(|e| {
        let msg = format!("{}: {}", error_context, e);
        wasm_error!("{}", msg);
        JsValue::from_str(&msg)
    })
}

/// Serialize a value to JavaScript with automatic error handling
pub fn serialize<T: Serialize>(value: &T, error_context: &str) -> Result<JsValue, JsValue> {
    serde_wasm_bindgen::to_value(value).map_err(|e| {
        let msg = format!("{}: {}", error_context, e);
        wasm_error!("{}", msg);
        JsValue::from_str(&msg)
    })
}
