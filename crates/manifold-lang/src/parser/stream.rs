//! Token stream wrapper for the hand-written parser.

use crate::error::ParseError;
use crate::foundation::{Position, Span};
use crate::lexer::{Token, TokenKind};

/// Token stream with lookahead and span tracking.
pub struct TokenStream {
    tokens: Vec<Token>,
    pos: usize,
    /// Position just past the last character of input, for EOF diagnostics.
    end: Position,
}

impl TokenStream {
    pub fn new(tokens: Vec<Token>, end: Position) -> Self {
        Self {
            tokens,
            pos: 0,
            end,
        }
    }

    /// Current token without consuming it.
    pub fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    /// Current token's kind.
    pub fn peek_kind(&self) -> Option<TokenKind> {
        self.peek().map(|t| t.kind)
    }

    /// The nth token ahead (0 = current).
    pub fn peek_nth(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.pos + n)
    }

    /// Consume and return the current token.
    pub fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Whether the current token has the given kind.
    pub fn check(&self, kind: TokenKind) -> bool {
        self.peek_kind() == Some(kind)
    }

    /// Consume the current token if it has the given kind.
    pub fn eat(&mut self, kind: TokenKind) -> Option<Token> {
        if self.check(kind) {
            self.advance()
        } else {
            None
        }
    }

    /// Consume a token of the given kind or fail with an "expected" error.
    pub fn expect(&mut self, kind: TokenKind) -> Result<Token, ParseError> {
        if self.check(kind) {
            Ok(self.advance().expect("checked token must exist"))
        } else {
            Err(self.expected(kind.description()))
        }
    }

    /// An "expected X but found Y" error at the current token.
    pub fn expected(&self, what: &str) -> ParseError {
        match self.peek() {
            Some(token) => ParseError::new(
                format!(
                    "syntax error: expected {} but found {}.",
                    what, token.kind
                ),
                token.span,
            ),
            None => ParseError::new(
                format!("syntax error: expected {} but found end of input.", what),
                Span::at(self.end),
            ),
        }
    }

    /// An "unexpected X" error at the current token.
    pub fn unexpected(&self) -> ParseError {
        match self.peek() {
            Some(token) => ParseError::new(
                format!("syntax error: unexpected {}.", token.kind),
                token.span,
            ),
            None => ParseError::new("unexpected end of input.", Span::at(self.end)),
        }
    }

    /// Whether all tokens have been consumed.
    pub fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    /// Span of the current token, or an empty span at EOF.
    pub fn current_span(&self) -> Span {
        match self.peek() {
            Some(token) => token.span,
            None => Span::at(self.end),
        }
    }

    /// Span of the most recently consumed token.
    pub fn previous_span(&self) -> Span {
        if self.pos == 0 {
            return Span::at(Position::start());
        }
        self.tokens[self.pos - 1].span
    }
}
