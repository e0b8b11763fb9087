//! Radix beat strings
//!
//! Grammar (whitespace and `_` are ignored):
//!
//! ```text
//! beat   := list
//! list   := item ("," item)*
//! item   := "[" list "]" | event | <empty>
//! event  := digits                 absolute note, written with at least two digits
//!         | ("+" | "-") digits     relative step
//!         | ("^" | "v") digits     relative step scaled by the radix
//!         | "~"                    repeat the previous relative step
//! ```
//!
//! Digits come from `0-9A-Z`, limited to the radix in use.

use thiserror::Error;

use crate::models::{BeatTree, OpusEvent};
use crate::structure::{NodeId, OpusTree};

pub const DIGITS: &str = "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Separator between beats of one line
pub const BEAT_SEPARATOR: char = '|';

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("'{ch}' at {position} is not a digit in radix {radix}")]
    InvalidDigit { ch: char, radix: u32, position: usize },

    /// Two items followed each other without a separating comma
    #[error("expected ',' before '{ch}' at {position}")]
    MissingComma { ch: char, position: usize },

    #[error("'[' at {0} is never closed")]
    UnclosedGroup(usize),

    #[error("unexpected ']' at {0}")]
    UnexpectedClose(usize),

    #[error("'{sigil}' at {position} is not followed by a digit")]
    MissingDigits { sigil: char, position: usize },

    #[error("radix {0} is outside 2..=36")]
    UnsupportedRadix(u32),

    #[error("number at {0} does not fit in a note")]
    NumberTooLarge(usize),

    /// Absolute notes are written as bare digits, so they cannot be negative
    #[error("absolute note {0} cannot be written")]
    NegativeAbsolute(i32),
}

pub type Result<T> = std::result::Result<T, ParseError>;

pub fn check_radix(radix: u32) -> Result<u32> {
    if (2..=36).contains(&radix) {
        Ok(radix)
    } else {
        Err(ParseError::UnsupportedRadix(radix))
    }
}

/// `number` in `radix`, left-padded with zeros to `min_digits`
pub fn get_number_string(number: u32, radix: u32, min_digits: usize) -> Result<String> {
    let radix = check_radix(radix)?;
    let alphabet: Vec<char> = DIGITS.chars().collect();
    let mut digits = Vec::new();
    let mut remaining = number;
    loop {
        digits.push(alphabet[(remaining % radix) as usize]);
        remaining /= radix;
        if remaining == 0 {
            break;
        }
    }
    while digits.len() < min_digits {
        digits.push('0');
    }
    Ok(digits.iter().rev().collect())
}

fn event_to_string(event: &OpusEvent, radix: u32) -> Result<String> {
    if !event.relative {
        if event.note < 0 {
            return Err(ParseError::NegativeAbsolute(event.note));
        }
        return get_number_string(event.note.unsigned_abs(), radix, 2);
    }

    let magnitude = event.note.unsigned_abs();
    if event.note == 0 || magnitude % radix != 0 {
        let sigil = if event.note < 0 { '-' } else { '+' };
        Ok(format!("{}{}", sigil, get_number_string(magnitude, radix, 1)?))
    } else {
        let sigil = if event.note < 0 { 'v' } else { '^' };
        Ok(format!("{}{}", sigil, get_number_string(magnitude / radix, radix, 1)?))
    }
}

/// Write the subtree at `id` in `radix`. Events are rewritten in that radix
/// whatever radix they were entered in.
pub fn to_string(tree: &BeatTree, id: NodeId, radix: u32) -> Result<String> {
    let radix = check_radix(radix)?;
    if let Some(event) = tree.event(id) {
        return event_to_string(event, radix);
    }
    if tree.is_leaf(id) {
        return Ok("__".to_string());
    }

    let inner = tree
        .children(id)
        .iter()
        .map(|child| to_string(tree, *child, radix))
        .collect::<Result<Vec<_>>>()?;
    if inner.len() > 1 {
        Ok(format!("[{}]", inner.join(",")))
    } else {
        Ok(inner.join(","))
    }
}

pub fn line_to_string(beats: &[BeatTree], radix: u32) -> Result<String> {
    Ok(beats
        .iter()
        .map(|beat| to_string(beat, beat.root(), radix))
        .collect::<Result<Vec<_>>>()?
        .join(&BEAT_SEPARATOR.to_string()))
}

/// Parse one beat string. Single-child wrappers are collapsed in the result.
pub fn from_string(input: &str, radix: u32, channel: u8) -> Result<BeatTree> {
    let radix = check_radix(radix)?;

    let mut parser = Parser {
        chars: input
            .chars()
            .enumerate()
            .filter(|(_, ch)| !ch.is_whitespace() && *ch != '_')
            .collect(),
        index: 0,
        radix,
        channel,
        last_relative: None,
    };

    let mut items = parser.parse_list(None)?;
    let mut tree = if items.len() == 1 {
        items.remove(0)
    } else {
        OpusTree::from_children(items)
    };
    let root = tree.root();
    tree.clear_singles(root);
    Ok(tree)
}

pub fn line_from_string(input: &str, radix: u32, channel: u8) -> Result<Vec<BeatTree>> {
    input
        .split(BEAT_SEPARATOR)
        .map(|beat| from_string(beat, radix, channel))
        .collect()
}

struct Parser {
    chars: Vec<(usize, char)>,
    index: usize,
    radix: u32,
    channel: u8,
    last_relative: Option<i32>,
}

impl Parser {
    fn peek(&self) -> Option<(usize, char)> {
        self.chars.get(self.index).copied()
    }

    fn advance(&mut self) {
        self.index += 1;
    }

    fn parse_list(&mut self, opened_at: Option<usize>) -> Result<Vec<BeatTree>> {
        let mut items = Vec::new();
        loop {
            items.push(self.parse_item()?);
            match (self.peek(), opened_at) {
                (None, None) => return Ok(items),
                (None, Some(open)) => return Err(ParseError::UnclosedGroup(open)),
                (Some((_, ',')), _) => self.advance(),
                (Some((_, ']')), Some(_)) => {
                    self.advance();
                    return Ok(items);
                }
                (Some((position, ']')), None) => return Err(ParseError::UnexpectedClose(position)),
                (Some((position, ch)), _) => return Err(ParseError::MissingComma { ch, position }),
            }
        }
    }

    fn parse_item(&mut self) -> Result<BeatTree> {
        let Some((position, ch)) = self.peek() else {
            return Ok(OpusTree::new());
        };

        match ch {
            '[' => {
                self.advance();
                let children = self.parse_list(Some(position))?;
                Ok(OpusTree::from_children(children))
            }
            '+' | '-' | '^' | 'v' => {
                self.advance();
                let magnitude = self
                    .parse_digits()?
                    .ok_or(ParseError::MissingDigits { sigil: ch, position })?;
                let delta = match ch {
                    '+' => Some(magnitude),
                    '-' => Some(-magnitude),
                    '^' => magnitude.checked_mul(self.radix as i32),
                    _ => magnitude.checked_mul(-(self.radix as i32)),
                }
                .ok_or(ParseError::NumberTooLarge(position))?;
                self.last_relative = Some(delta);
                Ok(OpusTree::leaf(OpusEvent::relative(delta, self.radix, self.channel)))
            }
            '~' => {
                self.advance();
                let delta = self.last_relative.unwrap_or(0);
                Ok(OpusTree::leaf(OpusEvent::relative(delta, self.radix, self.channel)))
            }
            _ if DIGITS.contains(ch) => {
                let note = self.parse_digits()?.unwrap_or(0);
                Ok(OpusTree::leaf(OpusEvent::absolute(note, self.radix, self.channel)))
            }
            ',' | ']' => Ok(OpusTree::new()),
            _ => Err(ParseError::InvalidDigit {
                ch,
                radix: self.radix,
                position,
            }),
        }
    }

    /// Consume a run of digits, failing on any digit outside the radix
    fn parse_digits(&mut self) -> Result<Option<i32>> {
        let start = self.peek().map(|(position, _)| position).unwrap_or(0);
        let mut value: Option<i32> = None;
        while let Some((position, ch)) = self.peek() {
            let Some(digit) = DIGITS.find(ch) else {
                break;
            };
            if digit as u32 >= self.radix {
                return Err(ParseError::InvalidDigit {
                    ch,
                    radix: self.radix,
                    position,
                });
            }
            self.advance();
            let next = value
                .unwrap_or(0)
                .checked_mul(self.radix as i32)
                .and_then(|shifted| shifted.checked_add(digit as i32))
                .ok_or(ParseError::NumberTooLarge(start))?;
            value = Some(next);
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf_events(tree: &BeatTree) -> Vec<OpusEvent> {
        tree.get_events_mapped(tree.root())
            .into_iter()
            .map(|(_, event)| *event)
            .collect()
    }

    #[test]
    fn test_number_string() {
        assert_eq!(get_number_string(12, 12, 2).unwrap(), "10");
        assert_eq!(get_number_string(5, 12, 2).unwrap(), "05");
        assert_eq!(get_number_string(11, 12, 1).unwrap(), "B");
        assert_eq!(get_number_string(0, 12, 1).unwrap(), "0");
    }

    #[test]
    fn test_number_string_rejects_bad_radix() {
        assert_eq!(get_number_string(5, 0, 1), Err(ParseError::UnsupportedRadix(0)));
        assert_eq!(get_number_string(5, 1, 1), Err(ParseError::UnsupportedRadix(1)));
        assert_eq!(get_number_string(5, 37, 1), Err(ParseError::UnsupportedRadix(37)));
    }

    #[test]
    fn test_parse_absolute_and_nesting() {
        let tree = from_string("[10,[05,__,+2]]", 12, 0).unwrap();
        let root = tree.root();
        assert_eq!(tree.size(root), 2);
        assert_eq!(tree.event(tree.get(root, 0).unwrap()), Some(&OpusEvent::absolute(12, 12, 0)));
        let inner = tree.get(root, 1).unwrap();
        assert_eq!(tree.size(inner), 3);
        assert!(!tree.is_event(tree.get(inner, 1).unwrap()));
        assert_eq!(tree.event(tree.get(inner, 2).unwrap()), Some(&OpusEvent::relative(2, 12, 0)));
    }

    #[test]
    fn test_parse_sigils() {
        let tree = from_string("[^1,v2,-3,~]", 12, 4).unwrap();
        let notes: Vec<i32> = leaf_events(&tree).iter().map(|event| event.note).collect();
        assert_eq!(notes, vec![12, -24, -3, -3]);
    }

    #[test]
    fn test_empty_string_is_empty_leaf() {
        let tree = from_string("", 12, 0).unwrap();
        assert!(tree.is_leaf(tree.root()));
        assert!(!tree.is_event(tree.root()));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(from_string("[10,05", 12, 0), Err(ParseError::UnclosedGroup(0)));
        assert_eq!(from_string("10]", 12, 0), Err(ParseError::UnexpectedClose(2)));
        assert_eq!(
            from_string("10[05]", 12, 0),
            Err(ParseError::MissingComma { ch: '[', position: 2 })
        );
        assert_eq!(
            from_string("1C", 12, 0),
            Err(ParseError::InvalidDigit { ch: 'C', radix: 12, position: 1 })
        );
        assert_eq!(
            from_string("[+,1]", 12, 0),
            Err(ParseError::MissingDigits { sigil: '+', position: 1 })
        );
    }

    #[test]
    fn test_round_trip() {
        let source = "[[10,+1,__],v1,[-D,0A,^0]]";
        let tree = from_string(source, 16, 2).unwrap();
        let written = to_string(&tree, tree.root(), 16).unwrap();
        let reparsed = from_string(&written, 16, 2).unwrap();
        assert_eq!(leaf_events(&tree), leaf_events(&reparsed));
        assert_eq!(tree, reparsed);
    }

    #[test]
    fn test_relative_multi_digit_round_trip() {
        let tree = OpusTree::from_children(vec![
            OpusTree::leaf(OpusEvent::relative(13, 12, 0)),
            OpusTree::leaf(OpusEvent::relative(-144, 12, 0)),
            OpusTree::leaf(OpusEvent::absolute(100, 12, 0)),
        ]);
        let written = to_string(&tree, tree.root(), 12).unwrap();
        assert_eq!(written, "[+11,v10,84]");
        assert_eq!(from_string(&written, 12, 0).unwrap(), tree);
    }

    #[test]
    fn test_line_round_trip() {
        let beats = line_from_string("10|__|[05,06]", 12, 0).unwrap();
        assert_eq!(beats.len(), 3);
        assert_eq!(line_to_string(&beats, 12).unwrap(), "10|__|[05,06]");
    }

    #[test]
    fn test_long_numbers_are_rejected() {
        assert_eq!(from_string("ZZZZZZZZZZZZZZ", 36, 0), Err(ParseError::NumberTooLarge(0)));
        assert_eq!(from_string("[10,+ZZZZZZZZ]", 36, 0), Err(ParseError::NumberTooLarge(5)));
        assert_eq!(from_string("^ZZZZZ", 36, 0), Err(ParseError::NumberTooLarge(0)));
    }

    #[test]
    fn test_events_written_in_target_radix() {
        let tree = OpusTree::from_children(vec![
            OpusTree::leaf(OpusEvent::absolute(26, 10, 0)),
            OpusTree::leaf(OpusEvent::relative(-12, 10, 0)),
        ]);
        let written = to_string(&tree, tree.root(), 12).unwrap();
        assert_eq!(written, "[22,v1]");

        let reparsed = from_string(&written, 12, 0).unwrap();
        let notes: Vec<i32> = leaf_events(&reparsed).iter().map(|event| event.note).collect();
        assert_eq!(notes, vec![26, -12]);
    }

    #[test]
    fn test_negative_absolute_is_not_written() {
        let tree = OpusTree::leaf(OpusEvent::absolute(-3, 12, 0));
        assert_eq!(to_string(&tree, tree.root(), 12), Err(ParseError::NegativeAbsolute(-3)));
    }
}
