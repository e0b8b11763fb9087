//! Opus editing
//!
//! `OpusManagerCore` holds the channel grid and applies primitive edits.
//! `OpusManager` wraps it with link pools and undo history and is the type
//! callers edit through.

pub mod core;
pub mod errors;
mod history;
pub mod links;
pub mod manager;
pub mod project;

pub use self::core::OpusManagerCore;
pub use errors::{OpusError, Result};
pub use links::LinkPools;
pub use manager::OpusManager;
pub use project::{ChannelData, ProjectData};
