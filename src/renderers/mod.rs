//! Renderers module
//!
//! Export logic converting an opus into output formats.

pub mod midi;
