//! Textual beat grammar
//!
//! Beat trees are persisted as compact radix strings, one string per beat,
//! joined with `|` per line.

pub mod beat_string;

pub use beat_string::{
    check_radix, from_string, get_number_string, line_from_string, line_to_string, to_string, ParseError,
};
