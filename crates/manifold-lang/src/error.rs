//! Error taxonomy for the compiler.
//!
//! Each compilation phase has its own error type carrying the source
//! location granularity that phase can produce: a single position for the
//! lexer, a half-open span for the parser, and a span plus evaluation
//! backtrace for the evaluator. `CompilationError` is the user-facing
//! wrapper that resolves locations against source text so it can render an
//! underlined snippet.

use crate::ast::AstContext;
use crate::foundation::{line_info, Position, Span};
use std::fmt;
use thiserror::Error;

/// A frame of the language-level call stack, captured into errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BacktraceFrame {
    /// What was being evaluated (`class foo`, `function bar`, `<toplevel>`).
    pub name: String,
    /// Source path, if the frame came from a tree.
    pub path: Option<String>,
    /// Line of the frame's current expression.
    pub line: usize,
}

impl fmt::Display for BacktraceFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "in {} at {}:{}", self.name, path, self.line),
            None => write!(f, "in {}", self.name),
        }
    }
}

/// Tokenization failure at a single position.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct LexerError {
    /// Human-readable explanation.
    pub message: String,
    /// Where lexing failed.
    pub position: Position,
}

impl LexerError {
    pub fn new(message: impl Into<String>, position: Position) -> Self {
        Self {
            message: message.into(),
            position,
        }
    }
}

/// Syntax failure over a half-open source range.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ParseError {
    /// Human-readable explanation.
    pub message: String,
    /// The offending range.
    pub span: Span,
}

impl ParseError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }

    /// Promote a lexer error to a parse error with an empty span.
    pub fn from_lexer(error: LexerError) -> Self {
        Self {
            message: error.message,
            span: Span::at(error.position),
        }
    }
}

/// Failure raised while evaluating the AST.
///
/// Carries the AST context of the offending expression (when known) and the
/// language-level backtrace at the point of failure.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct EvaluationError {
    pub message: String,
    pub context: Option<AstContext>,
    pub backtrace: Vec<BacktraceFrame>,
}

impl EvaluationError {
    /// An error with no source context.
    pub fn new(message: impl Into<String>, backtrace: Vec<BacktraceFrame>) -> Self {
        Self {
            message: message.into(),
            context: None,
            backtrace,
        }
    }

    /// An error pointing at an AST context.
    pub fn with_context(
        message: impl Into<String>,
        context: AstContext,
        backtrace: Vec<BacktraceFrame>,
    ) -> Self {
        Self {
            message: message.into(),
            context: Some(context),
            backtrace,
        }
    }
}

/// Failure raised by a function or operator for a specific argument.
///
/// The index maps the failure back to the argument's source expression at
/// the call site.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ArgumentError {
    pub message: String,
    /// 0-based index of the offending argument.
    pub index: usize,
}

impl ArgumentError {
    pub fn new(message: impl Into<String>, index: usize) -> Self {
        Self {
            message: message.into(),
            index,
        }
    }
}

/// Failure raised when instantiating a parameterized type.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct InstantiationError {
    pub message: String,
}

impl InstantiationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Failure raised when a value cannot be converted by the formatter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ConversionError {
    pub message: String,
}

impl ConversionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// User-facing compilation failure.
///
/// Wraps any phase error together with the path, line, column, and line
/// text needed to print an underlined snippet.
#[derive(Debug, Clone)]
pub struct CompilationError {
    pub message: String,
    pub path: String,
    pub line: usize,
    pub column: usize,
    pub length: usize,
    pub text: String,
    pub backtrace: Vec<BacktraceFrame>,
}

impl CompilationError {
    /// Wrap a bare message with no location.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: String::new(),
            line: 0,
            column: 0,
            length: 0,
            text: String::new(),
            backtrace: Vec::new(),
        }
    }

    /// Wrap a lexer error, resolving the position against the source text.
    pub fn from_lexer(error: LexerError, path: &str, source: &str) -> Self {
        let info = line_info(source, error.position.offset, 1);
        Self {
            message: error.message,
            path: path.to_string(),
            line: error.position.line,
            column: info.column,
            length: info.length,
            text: info.text,
            backtrace: Vec::new(),
        }
    }

    /// Wrap a parse error, resolving the span against the source text.
    pub fn from_parse(error: ParseError, path: &str, source: &str) -> Self {
        let info = line_info(source, error.span.begin.offset, error.span.len());
        Self {
            message: error.message,
            path: path.to_string(),
            line: error.span.begin.line,
            column: info.column,
            length: info.length,
            text: info.text,
            backtrace: Vec::new(),
        }
    }

    /// Wrap an evaluation error, resolving its AST context if present.
    pub fn from_evaluation(error: EvaluationError) -> Self {
        let mut wrapped = Self {
            message: error.message,
            path: String::new(),
            line: 0,
            column: 0,
            length: 0,
            text: String::new(),
            backtrace: error.backtrace,
        };
        if let Some(context) = error.context {
            let span = context.span;
            let info = line_info(context.tree.source(), span.begin.offset, span.len());
            wrapped.path = context.tree.path().to_string();
            wrapped.line = span.begin.line;
            wrapped.column = info.column;
            wrapped.length = info.length;
            wrapped.text = info.text;
        }
        wrapped
    }

    /// Render the full diagnostic with the underlined source line.
    pub fn to_diagnostic(&self) -> String {
        let mut out = String::new();
        if self.path.is_empty() {
            out.push_str(&format!("error: {}\n", self.message));
        } else {
            out.push_str(&format!(
                "error: {}\n  --> {}:{}:{}\n",
                self.message, self.path, self.line, self.column
            ));
            if !self.text.is_empty() {
                out.push_str(&format!("   | {}\n", self.text));
                let underline = " ".repeat(self.column.saturating_sub(1))
                    + &"^".repeat(self.length.max(1));
                out.push_str(&format!("   | {}\n", underline));
            }
        }
        for frame in &self.backtrace {
            out.push_str(&format!("   {}\n", frame));
        }
        out
    }
}

impl std::error::Error for CompilationError {}

// Display shows the single-line form; to_diagnostic renders the snippet.
impl fmt::Display for CompilationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(
                f,
                "{}:{}:{}: {}",
                self.path, self.line, self.column, self.message
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_from_lexer_keeps_position() {
        let lexer = LexerError::new("unexpected character", Position::new(3, 1));
        let parse = ParseError::from_lexer(lexer);
        assert_eq!(parse.span.begin.offset, 3);
        assert!(parse.span.is_empty());
    }

    #[test]
    fn compilation_error_resolves_line_text() {
        let source = "$a = 1\n$a = 2\n";
        let error = ParseError::new(
            "cannot reassign $a",
            Span::new(Position::new(7, 2), Position::new(9, 2)),
        );
        let wrapped = CompilationError::from_parse(error, "site.pp", source);
        assert_eq!(wrapped.line, 2);
        assert_eq!(wrapped.column, 1);
        assert_eq!(wrapped.text, "$a = 2");
        assert_eq!(wrapped.length, 2);
    }

    #[test]
    fn diagnostic_underlines_span() {
        let source = "notice undefined";
        let error = ParseError::new(
            "unknown statement",
            Span::new(Position::new(7, 1), Position::new(16, 1)),
        );
        let wrapped = CompilationError::from_parse(error, "x.pp", source);
        let rendered = wrapped.to_diagnostic();
        assert!(rendered.contains("x.pp:1:8"));
        assert!(rendered.contains("^^^^^^^^^"));
    }
}
