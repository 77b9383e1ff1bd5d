//! Positions, spans, and line lookup.
//!
//! # Design
//!
//! - `Position` — byte offset plus 1-based line, carried on every token and
//!   AST node
//! - `Span` — half-open `[begin, end)` pair of positions
//! - `line_info` — recovers the text, column, and on-screen length of a
//!   span's line for underlined diagnostics
//!
//! Columns are 1-based and tab-aware: a tab advances the column to the next
//! multiple of `TAB_WIDTH`.

use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

/// How many spaces a tab is considered to occupy.
pub const TAB_WIDTH: usize = 4;

/// A location in a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    /// Byte offset from the start of the input.
    pub offset: usize,
    /// 1-based line number.
    pub line: usize,
}

impl Position {
    /// Create a position.
    pub fn new(offset: usize, line: usize) -> Self {
        Self { offset, line }
    }

    /// The position of the start of input.
    pub fn start() -> Self {
        Self { offset: 0, line: 1 }
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::start()
    }
}

/// A half-open byte range with cached line numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    /// Start position (inclusive).
    pub begin: Position,
    /// End position (exclusive).
    pub end: Position,
}

impl Span {
    /// Create a span from two positions.
    pub fn new(begin: Position, end: Position) -> Self {
        debug_assert!(begin.offset <= end.offset, "malformed span");
        debug_assert!(begin.line <= end.line, "malformed span lines");
        Self { begin, end }
    }

    /// Create a zero-length span at a position.
    pub fn at(position: Position) -> Self {
        Self {
            begin: position,
            end: position,
        }
    }

    /// Length of the span in bytes.
    pub fn len(&self) -> usize {
        self.end.offset - self.begin.offset
    }

    /// Whether the span covers no input.
    pub fn is_empty(&self) -> bool {
        self.begin.offset == self.end.offset
    }

    /// The smallest span covering both `self` and `other`.
    pub fn merge(&self, other: &Span) -> Span {
        let begin = if self.begin.offset <= other.begin.offset {
            self.begin
        } else {
            other.begin
        };
        let end = if self.end.offset >= other.end.offset {
            self.end
        } else {
            other.end
        };
        Span { begin, end }
    }
}

/// The line surrounding a source position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineInfo {
    /// The text of the line, without its trailing newline.
    pub text: String,
    /// 1-based, tab-expanded column of the position within the line.
    pub column: usize,
    /// On-screen length of the region starting at the position, clamped to
    /// the end of the line.
    pub length: usize,
}

/// Compute the line text, column, and underline length for a byte range.
///
/// `offset` may be anywhere in `source`, including one past the end (EOF
/// diagnostics point just past the last character).
pub fn line_info(source: &str, offset: usize, length: usize) -> LineInfo {
    let offset = offset.min(source.len());
    let start = source[..offset].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let end = source[offset..]
        .find('\n')
        .map(|i| offset + i)
        .unwrap_or(source.len());

    let text = source[start..end].trim_end_matches('\r').to_string();

    let mut column = 1;
    for grapheme in source[start..offset].graphemes(true) {
        if grapheme == "\t" {
            column += TAB_WIDTH - ((column - 1) % TAB_WIDTH);
        } else {
            column += 1;
        }
    }

    let underline_end = (offset + length).min(end);
    let underline = source[offset..underline_end].graphemes(true).count();

    LineInfo {
        text,
        column,
        length: underline.max(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_start() {
        let position = Position::start();
        assert_eq!(position.offset, 0);
        assert_eq!(position.line, 1);
    }

    #[test]
    fn span_merge_covers_both() {
        let a = Span::new(Position::new(4, 1), Position::new(10, 1));
        let b = Span::new(Position::new(8, 1), Position::new(20, 2));
        let merged = a.merge(&b);
        assert_eq!(merged.begin.offset, 4);
        assert_eq!(merged.end.offset, 20);
        assert_eq!(merged.end.line, 2);
    }

    #[test]
    fn line_info_middle_line() {
        let source = "first\nsecond line\nthird";
        let info = line_info(source, 13, 4);
        assert_eq!(info.text, "second line");
        assert_eq!(info.column, 8);
        assert_eq!(info.length, 4);
    }

    #[test]
    fn line_info_tab_column() {
        let source = "\tx = 1";
        let info = line_info(source, 1, 1);
        assert_eq!(info.column, 5);
    }

    #[test]
    fn line_info_at_eof() {
        let source = "abc";
        let info = line_info(source, 3, 1);
        assert_eq!(info.text, "abc");
        assert_eq!(info.column, 4);
        assert_eq!(info.length, 1);
    }

    #[test]
    fn line_info_clamps_underline_to_line() {
        let source = "ab\ncd";
        let info = line_info(source, 0, 10);
        assert_eq!(info.length, 2);
    }
}
