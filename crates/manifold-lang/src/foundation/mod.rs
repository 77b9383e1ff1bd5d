//! Source location tracking shared by the lexer, parser, and diagnostics.

mod span;

pub use span::{line_info, LineInfo, Position, Span, TAB_WIDTH};
