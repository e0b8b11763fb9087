//! Data model of an opus
//!
//! Events and beat keys are small value types; channels own their lines and
//! every line owns one beat tree per beat column.

pub mod channel;
pub mod event;

pub use channel::{OpusChannel, OpusLine};
pub use event::{BeatKey, OpusEvent};

use crate::structure::OpusTree;

/// The tree rooted at one (channel, line, beat) cell
pub type BeatTree = OpusTree<OpusEvent>;
