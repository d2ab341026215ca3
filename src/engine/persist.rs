//! Helpers for the line-oriented, tag-prefixed project format.
//!
//! Every record is one line, starting with an upper-case tag.
//! Readers skip anything they don't recognise.

use std::iter::Peekable;
use std::str::{FromStr, Lines};

/// Cursor over the lines of a project file.
pub struct LineReader<'a> {
    lines: Peekable<Lines<'a>>,
}
impl<'a> LineReader<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            lines: text.lines().peekable(),
        }
    }

    /// Next line, without surrounding whitespace.
    pub fn next_line(&mut self) -> Option<&'a str> {
        self.lines.next().map(str::trim)
    }

    /// The line [`Self::next_line`] would return, without consuming it.
    pub fn peek_line(&mut self) -> Option<&'a str> {
        self.lines.peek().copied().map(str::trim)
    }

    /// Consume lines up to and including `end_tag`.
    pub fn skip_past(&mut self, end_tag: &str) {
        while let Some(line) = self.next_line() {
            if line == end_tag {
                break;
            }
        }
    }
}

/// Split a line into its tag and the remainder.
pub fn split_tag(line: &str) -> (&str, &str) {
    match line.split_once(char::is_whitespace) {
        Some((tag, rest)) => (tag, rest.trim_start()),
        None => (line, ""),
    }
}

/// Parse the first whitespace-separated value.
pub fn parse_first<T: FromStr>(rest: &str) -> Option<T> {
    rest.split_whitespace().next()?.parse().ok()
}

/// Parse a `0|1` flag. Any non-zero integer counts as set.
pub fn parse_flag(rest: &str) -> Option<bool> {
    parse_first::<i64>(rest).map(|v| v != 0)
}

/// Text between the first pair of double quotes.
pub fn quoted(line: &str) -> Option<&str> {
    let start = line.find('"')? + 1;
    let len = line[start..].find('"')?;
    Some(&line[start..start + len])
}

/// Text following the closing quote of [`quoted`].
pub fn after_quoted(line: &str) -> Option<&str> {
    let start = line.find('"')? + 1;
    let len = line[start..].find('"')?;
    Some(line[start + len + 1..].trim())
}

pub fn flag(value: bool) -> u8 {
    u8::from(value)
}
