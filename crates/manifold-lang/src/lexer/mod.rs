//! Lexical analysis.
//!
//! # Design
//!
//! - `Lexer` — a cursor over the source producing [`Token`]s lazily
//! - Heredoc bodies are read out-of-band: the cursor keeps lexing the rest
//!   of the sentinel line and hops over the consumed body when it next
//!   crosses a line break
//! - A `/` is division when the previous token can end an operand,
//!   otherwise a regex literal is attempted with division as the fallback
//! - Whitespace and comments are consumed and tracked for position but
//!   never emitted
//!
//! String and heredoc bodies have their escapes applied here, except `\$`,
//! which is left for the interpolator (see `StringToken::escaped`).

mod token;

pub use token::{
    NumberValue, NumericBase, StringToken, Token, TokenKind, TokenValue, STATEMENT_CALLS,
};

use crate::error::LexerError;
use crate::foundation::{Position, Span, TAB_WIDTH};

/// The escape characters a heredoc may enable.
const HEREDOC_ESCAPES: &str = "trnsuL$";

/// A lexer warning: a non-fatal oddity at a position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexerWarning {
    pub position: Position,
    pub message: String,
}

/// Tokenizer for a single source string.
///
/// Iterate to receive `Result<Token, LexerError>`; iteration fuses after
/// the first error. Warnings accumulate and can be drained afterwards.
pub struct Lexer<'src> {
    source: &'src str,
    offset: usize,
    line: usize,
    /// Continuation position past consumed heredoc bodies; applied when the
    /// cursor next consumes a line break.
    continuation: Option<Position>,
    /// Kind of the previously emitted token, for slash disambiguation.
    previous: Option<TokenKind>,
    /// Whether trivia was consumed immediately before the current token.
    spaced: bool,
    warnings: Vec<LexerWarning>,
    failed: bool,
}

impl<'src> Lexer<'src> {
    pub fn new(source: &'src str) -> Self {
        Self {
            source,
            offset: 0,
            line: 1,
            continuation: None,
            previous: None,
            spaced: false,
            warnings: Vec::new(),
            failed: false,
        }
    }

    /// Lex the entire input eagerly.
    pub fn tokenize(source: &'src str) -> Result<(Vec<Token>, Vec<LexerWarning>), LexerError> {
        let mut lexer = Lexer::new(source);
        let mut tokens = Vec::new();
        for token in &mut lexer {
            tokens.push(token?);
        }
        Ok((tokens, lexer.warnings))
    }

    /// Warnings recorded so far.
    pub fn warnings(&self) -> &[LexerWarning] {
        &self.warnings
    }

    fn position(&self) -> Position {
        Position::new(self.offset, self.line)
    }

    fn rest(&self) -> &'src str {
        &self.source[self.offset..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        let mut chars = self.rest().chars();
        chars.next();
        chars.next()
    }

    /// Consume one character, hopping over heredoc bodies at line breaks.
    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        if c == '\n' {
            if let Some(next) = self.continuation.take() {
                self.offset = next.offset;
                self.line = next.line;
                return Some(c);
            }
            self.line += 1;
        }
        self.offset += c.len_utf8();
        Some(c)
    }

    /// Consume `n` bytes of known-ASCII content.
    fn bump_ascii(&mut self, n: usize) {
        self.offset += n;
    }

    fn warn(&mut self, position: Position, message: impl Into<String>) {
        self.warnings.push(LexerWarning {
            position,
            message: message.into(),
        });
    }

    fn error(&mut self, position: Position, message: impl Into<String>) -> LexerError {
        self.failed = true;
        LexerError::new(message, position)
    }

    /// Skip whitespace and comments, remembering whether anything was
    /// consumed (array-literal disambiguation).
    fn skip_trivia(&mut self) -> Result<(), LexerError> {
        self.spaced = false;
        loop {
            match self.peek() {
                Some(c) if c.is_ascii_whitespace() => {
                    self.spaced = true;
                    self.bump();
                }
                Some('#') => {
                    self.spaced = true;
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some('/') if self.peek_second() == Some('*') => {
                    self.spaced = true;
                    let start = Lexer::position(self);
                    self.bump();
                    self.bump();
                    loop {
                        match self.peek() {
                            None => {
                                return Err(self.error(start, "unterminated block comment."));
                            }
                            Some('*') if self.peek_second() == Some('/') => {
                                self.bump();
                                self.bump();
                                break;
                            }
                            _ => {
                                self.bump();
                            }
                        }
                    }
                }
                _ => break,
            }
        }
        Ok(())
    }

    fn next_token(&mut self) -> Option<Result<Token, LexerError>> {
        if self.failed {
            return None;
        }
        if let Err(error) = self.skip_trivia() {
            return Some(Err(error));
        }
        let begin = Lexer::position(self);
        let c = self.peek()?;

        let result = match c {
            '@' => self.lex_at(begin),
            '$' => self.lex_variable(begin),
            '\'' => self.lex_single_quoted(begin),
            '"' => self.lex_double_quoted(begin),
            '/' => Ok(self.lex_slash(begin)),
            '0'..='9' => self.lex_number(begin),
            c if c.is_alphabetic() || c == '_' || c == ':' => Ok(self.lex_word(begin)),
            _ => self.lex_operator(begin),
        };
        Some(result.map(|token| {
            self.previous = Some(token.kind);
            token
        }))
    }

    fn simple(&mut self, kind: TokenKind, begin: Position, len: usize) -> Token {
        self.bump_ascii(len);
        Token::simple(kind, Span::new(begin, Lexer::position(self)))
    }

    fn lex_operator(&mut self, begin: Position) -> Result<Token, LexerError> {
        let rest = self.rest();

        // Longest operators first.
        const OPERATORS: &[(&str, TokenKind)] = &[
            ("<<|", TokenKind::LeftDoubleCollect),
            ("|>>", TokenKind::RightDoubleCollect),
            ("+=", TokenKind::Append),
            ("-=", TokenKind::Remove),
            ("==", TokenKind::Equals),
            ("!=", TokenKind::NotEquals),
            ("=~", TokenKind::Match),
            ("!~", TokenKind::NotMatch),
            (">=", TokenKind::GreaterEquals),
            ("<=", TokenKind::LessEquals),
            ("=>", TokenKind::FatArrow),
            ("+>", TokenKind::PlusArrow),
            ("<<", TokenKind::LeftShift),
            ("<|", TokenKind::LeftCollect),
            (">>", TokenKind::RightShift),
            ("|>", TokenKind::RightCollect),
            ("->", TokenKind::InEdge),
            ("~>", TokenKind::InEdgeSub),
            ("<-", TokenKind::OutEdge),
            ("<~", TokenKind::OutEdgeSub),
            ("[", TokenKind::LeftBracket),
            ("]", TokenKind::RightBracket),
            ("{", TokenKind::LeftBrace),
            ("}", TokenKind::RightBrace),
            ("(", TokenKind::LeftParen),
            (")", TokenKind::RightParen),
            ("=", TokenKind::Assign),
            (">", TokenKind::Greater),
            ("<", TokenKind::Less),
            ("+", TokenKind::Plus),
            ("-", TokenKind::Minus),
            ("*", TokenKind::Multiply),
            ("%", TokenKind::Modulo),
            ("!", TokenKind::Not),
            (".", TokenKind::Dot),
            ("|", TokenKind::Pipe),
            (":", TokenKind::Colon),
            (",", TokenKind::Comma),
            (";", TokenKind::Semicolon),
            ("?", TokenKind::Question),
            ("~", TokenKind::Tilde),
        ];

        for (text, kind) in OPERATORS {
            if rest.starts_with(text) {
                let kind = if *kind == TokenKind::LeftBracket && self.spaced {
                    TokenKind::ArrayStart
                } else {
                    *kind
                };
                return Ok(self.simple(kind, begin, text.len()));
            }
        }

        let c = self.peek().unwrap_or('\0');
        Err(self.error(begin, format!("unexpected character '{}'.", c)))
    }

    fn lex_at(&mut self, begin: Position) -> Result<Token, LexerError> {
        let rest = self.rest();
        if rest.starts_with("@@") {
            return Ok(self.simple(TokenKind::AtAt, begin, 2));
        }
        if rest.starts_with("@(") {
            if let Some(token) = self.lex_heredoc(begin)? {
                return Ok(token);
            }
        }
        Ok(self.simple(TokenKind::At, begin, 1))
    }

    fn lex_slash(&mut self, begin: Position) -> Token {
        // A regex cannot follow a completed operand; also a literal that
        // starts with '*' would be a comment opener, never a regex.
        let allow_regex = !self.previous.map(TokenKind::ends_operand).unwrap_or(false);
        if allow_regex {
            let body = &self.rest()[1..];
            if !body.starts_with('*') {
                if let Some(close) = body.find(|c| c == '/' || c == '\n') {
                    if body.as_bytes()[close] == b'/' {
                        let text = body[..close].to_string();
                        self.bump_ascii(1);
                        self.offset += close + 1;
                        return Token {
                            kind: TokenKind::Regex,
                            span: Span::new(begin, Lexer::position(self)),
                            value: TokenValue::Text(text),
                        };
                    }
                }
            }
        }
        self.simple(TokenKind::Divide, begin, 1)
    }

    fn lex_variable(&mut self, begin: Position) -> Result<Token, LexerError> {
        // $(::)?(\w+::)*\w+
        self.bump_ascii(1);
        let rest = self.rest();
        let mut len = 0;
        if rest.starts_with("::") {
            len += 2;
        }
        loop {
            let run: usize = rest[len..]
                .chars()
                .take_while(|c| c.is_alphanumeric() || *c == '_')
                .map(char::len_utf8)
                .sum();
            if run == 0 {
                break;
            }
            len += run;
            if rest[len..].starts_with("::")
                && rest[len + 2..]
                    .chars()
                    .next()
                    .map(|c| c.is_alphanumeric() || c == '_')
                    .unwrap_or(false)
            {
                len += 2;
            } else {
                break;
            }
        }
        if len == 0 || rest[..len].ends_with(':') {
            return Err(self.error(begin, "unexpected character '$'."));
        }
        let text = rest[..len].to_string();
        self.bump_ascii(len);
        Ok(Token {
            kind: TokenKind::Variable,
            span: Span::new(begin, Lexer::position(self)),
            value: TokenValue::Text(text),
        })
    }

    fn lex_word(&mut self, begin: Position) -> Token {
        let rest = self.rest();

        let leading_colons = rest.starts_with("::");
        let head_start = if leading_colons { 2 } else { 0 };
        let head = rest[head_start..].chars().next().unwrap_or('\0');

        if head.is_uppercase() {
            return self.lex_type_name(begin);
        }
        if leading_colons && !head.is_lowercase() {
            // "::" not followed by a name or type segment.
            return self.simple(TokenKind::Colon, begin, 1);
        }
        if !head.is_alphabetic() && head != '_' {
            // A bare ":" reaches here when followed by another ":".
            return self.simple(TokenKind::Colon, begin, 1);
        }

        let word_len = |s: &str| -> usize {
            s.chars()
                .take_while(|c| c.is_alphanumeric() || *c == '_')
                .map(char::len_utf8)
                .sum()
        };

        let mut len = head_start + word_len(&rest[head_start..]);
        let mut qualified = leading_colons;

        // Consume `::segment` runs while segments start with a lowercase
        // letter; this is what makes `class::foo` a name, not a keyword.
        while rest[len..].starts_with("::")
            && rest[len + 2..]
                .chars()
                .next()
                .map(|c| c.is_lowercase())
                .unwrap_or(false)
        {
            qualified = true;
            len += 2 + word_len(&rest[len + 2..]);
        }

        // Hyphenated runs are bare words; a trailing hyphen is not
        // consumed.
        let mut bare = head == '_';
        if !qualified {
            let mut extended = len;
            loop {
                let tail = &rest[extended..];
                if tail.starts_with('-') {
                    let run = word_len(&tail[1..]);
                    if run > 0 {
                        bare = true;
                        extended += 1 + run;
                        continue;
                    }
                }
                break;
            }
            len = extended;
        }

        let text = &rest[..len];
        let kind = if qualified || bare {
            if bare {
                TokenKind::BareWord
            } else {
                TokenKind::Name
            }
        } else {
            match text {
                "and" => TokenKind::KeywordAnd,
                "attr" => TokenKind::KeywordAttr,
                "case" => TokenKind::KeywordCase,
                "class" => TokenKind::KeywordClass,
                "default" => TokenKind::KeywordDefault,
                "define" => TokenKind::KeywordDefine,
                "else" => TokenKind::KeywordElse,
                "elsif" => TokenKind::KeywordElsif,
                "false" => TokenKind::KeywordFalse,
                "function" => TokenKind::KeywordFunction,
                "if" => TokenKind::KeywordIf,
                "in" => TokenKind::KeywordIn,
                "inherits" => TokenKind::KeywordInherits,
                "node" => TokenKind::KeywordNode,
                "or" => TokenKind::KeywordOr,
                "private" => TokenKind::KeywordPrivate,
                "true" => TokenKind::KeywordTrue,
                "type" => TokenKind::KeywordType,
                "undef" => TokenKind::KeywordUndef,
                "unless" => TokenKind::KeywordUnless,
                _ if STATEMENT_CALLS.contains(&text) => TokenKind::StatementCall,
                _ => TokenKind::Name,
            }
        };

        let value = match kind {
            TokenKind::Name | TokenKind::BareWord | TokenKind::StatementCall => {
                TokenValue::Text(text.to_string())
            }
            _ => TokenValue::None,
        };
        self.bump_ascii(len);
        Token {
            kind,
            span: Span::new(begin, Lexer::position(self)),
            value,
        }
    }

    fn lex_type_name(&mut self, begin: Position) -> Token {
        let rest = self.rest();
        let word_len = |s: &str| -> usize {
            s.chars()
                .take_while(|c| c.is_alphanumeric() || *c == '_')
                .map(char::len_utf8)
                .sum()
        };

        let mut len = if rest.starts_with("::") { 2 } else { 0 };
        len += word_len(&rest[len..]);
        while rest[len..].starts_with("::")
            && rest[len + 2..]
                .chars()
                .next()
                .map(char::is_uppercase)
                .unwrap_or(false)
        {
            len += 2 + word_len(&rest[len + 2..]);
        }

        let text = rest[..len].to_string();
        self.bump_ascii(len);
        Token {
            kind: TokenKind::TypeName,
            span: Span::new(begin, Lexer::position(self)),
            value: TokenValue::Text(text),
        }
    }

    fn lex_number(&mut self, begin: Position) -> Result<Token, LexerError> {
        let rest = self.rest();
        let bytes = rest.as_bytes();

        let digits = |s: &str, pred: fn(&char) -> bool| -> usize {
            s.chars().take_while(pred).count()
        };

        // Hexadecimal.
        if rest.starts_with("0x") || rest.starts_with("0X") {
            let run = digits(&rest[2..], |c| c.is_ascii_hexdigit());
            let tail = digits(&rest[2 + run..], |c| c.is_ascii_alphabetic());
            if run == 0 || tail > 0 {
                return Ok(self.invalid_number(begin, 2 + run + tail));
            }
            let text = &rest[..2 + run];
            let value = i64::from_str_radix(&text[2..], 16)
                .map_err(|_| self.error(begin, format!("number '{}' is out of range.", text)))?;
            return Ok(self.number(begin, 2 + run, NumberValue::Integer(value), NumericBase::Hexadecimal));
        }

        let int_run = digits(rest, |c| c.is_ascii_digit());
        let mut len = int_run;
        let mut float = false;

        // Fraction: a '.' must be followed by a digit to belong to the
        // number; otherwise it is the '.' operator.
        if bytes.get(len) == Some(&b'.')
            && rest[len + 1..]
                .chars()
                .next()
                .map(|c| c.is_ascii_digit())
                .unwrap_or(false)
        {
            float = true;
            len += 1 + digits(&rest[len + 1..], |c| c.is_ascii_digit());
        }

        // Exponent; the sign may only be '-'.
        if matches!(bytes.get(len), Some(b'e') | Some(b'E')) {
            let mut exp = len + 1;
            if bytes.get(exp) == Some(&b'-') {
                exp += 1;
            }
            let run = digits(&rest[exp..], |c| c.is_ascii_digit());
            if run > 0 {
                float = true;
                len = exp + run;
            }
        }

        // Trailing letters make the whole thing a diagnosable bad number.
        let tail = digits(&rest[len..], |c| c.is_ascii_alphabetic());
        if tail > 0 {
            return Ok(self.invalid_number(begin, len + tail));
        }

        let text = &rest[..len];
        if float {
            let value: f64 = text
                .parse()
                .map_err(|_| self.error(begin, format!("number '{}' is not a valid float.", text)))?;
            if !value.is_finite() {
                return Err(self.error(begin, format!("number '{}' is out of range.", text)));
            }
            return Ok(self.number(begin, len, NumberValue::Float(value), NumericBase::Decimal));
        }

        // Octal: a leading zero with only octal digits.
        if int_run > 1 && text.starts_with('0') && text[1..].chars().all(|c| ('0'..='7').contains(&c))
        {
            let value = i64::from_str_radix(&text[1..], 8)
                .map_err(|_| self.error(begin, format!("number '{}' is out of range.", text)))?;
            return Ok(self.number(begin, len, NumberValue::Integer(value), NumericBase::Octal));
        }

        let value: i64 = text
            .parse()
            .map_err(|_| self.error(begin, format!("number '{}' is out of range.", text)))?;
        Ok(self.number(begin, len, NumberValue::Integer(value), NumericBase::Decimal))
    }

    fn number(&mut self, begin: Position, len: usize, value: NumberValue, base: NumericBase) -> Token {
        self.bump_ascii(len);
        Token {
            kind: TokenKind::Number,
            span: Span::new(begin, Lexer::position(self)),
            value: TokenValue::Number { value, base },
        }
    }

    fn invalid_number(&mut self, begin: Position, len: usize) -> Token {
        let text = self.rest()[..len].to_string();
        self.bump_ascii(len);
        Token {
            kind: TokenKind::InvalidNumber,
            span: Span::new(begin, Lexer::position(self)),
            value: TokenValue::Text(text),
        }
    }

    fn lex_single_quoted(&mut self, begin: Position) -> Result<Token, LexerError> {
        let content = self.scan_quoted(begin, '\'')?;
        let text = self.decode(&content, "\\'", 0, begin);
        Ok(Token {
            kind: TokenKind::SingleQuotedString,
            span: Span::new(begin, Lexer::position(self)),
            value: TokenValue::String(StringToken {
                position: begin,
                text,
                format: None,
                interpolated: false,
                escaped: false,
            }),
        })
    }

    fn lex_double_quoted(&mut self, begin: Position) -> Result<Token, LexerError> {
        let content = self.scan_quoted(begin, '"')?;
        // '$' stays escaped until interpolation; '\n' enables the escaped
        // line break.
        let text = self.decode(&content, "\\\"'nrtsu\n", 0, begin);
        Ok(Token {
            kind: TokenKind::DoubleQuotedString,
            span: Span::new(begin, Lexer::position(self)),
            value: TokenValue::String(StringToken {
                position: begin,
                text,
                format: None,
                interpolated: true,
                escaped: true,
            }),
        })
    }

    /// Consume a quoted literal and return its raw content (without the
    /// quotes, escapes still in place). Strings may span lines.
    fn scan_quoted(&mut self, begin: Position, quote: char) -> Result<String, LexerError> {
        self.bump();
        let mut content = String::new();
        loop {
            match self.peek() {
                None => {
                    return Err(self.error(
                        begin,
                        format!("could not find a matching closing quote ({}).", quote),
                    ));
                }
                Some(c) if c == quote => {
                    self.bump();
                    return Ok(content);
                }
                Some('\\') => {
                    content.push('\\');
                    self.bump();
                    if let Some(next) = self.bump() {
                        content.push(next);
                    }
                }
                Some(c) => {
                    content.push(c);
                    self.bump();
                }
            }
        }
    }

    /// Apply escape sequences and margin stripping to a string body.
    ///
    /// `escapes` lists the characters that may follow a backslash; `\\` is
    /// always implied by a non-empty list, `\n` in the list enables the
    /// escaped line break, and `$` is never processed here. An empty list
    /// disables escape processing entirely (heredocs without `/`).
    fn decode(&mut self, body: &str, escapes: &str, margin: usize, base: Position) -> String {
        let mut out = String::new();
        let mut chars = body.char_indices().peekable();
        let mut line = base.line;
        let mut current_margin = margin;

        loop {
            while current_margin > 0 {
                match chars.peek() {
                    Some((_, ' ')) => {
                        current_margin -= 1;
                        chars.next();
                    }
                    Some((_, '\t')) => {
                        current_margin -= current_margin.min(TAB_WIDTH);
                        chars.next();
                    }
                    _ => break,
                }
            }
            let Some((i, c)) = chars.next() else { break };
            current_margin = 0;

            if c == '\n' {
                line += 1;
                current_margin = margin;
                out.push('\n');
                continue;
            }
            if c != '\\' || escapes.is_empty() {
                out.push(c);
                continue;
            }

            // Collapse \<CR><LF> into \<LF> before matching.
            if matches!(chars.peek(), Some((_, '\r'))) {
                let mut ahead = chars.clone();
                ahead.next();
                if matches!(ahead.peek(), Some((_, '\n'))) {
                    chars.next();
                }
            }

            match chars.peek().copied() {
                Some((_, next)) if escapes.contains(next) => {
                    chars.next();
                    match next {
                        'r' => out.push('\r'),
                        'n' => out.push('\n'),
                        't' => out.push('\t'),
                        's' => out.push(' '),
                        'u' => match self.decode_unicode(&mut chars) {
                            Some(decoded) => out.push(decoded),
                            None => {
                                self.warn(
                                    Position::new(base.offset + i, line),
                                    "invalid unicode escape sequence; it will be ignored.",
                                );
                            }
                        },
                        '\n' => {
                            // Escaped line break: swallow it and restart the
                            // margin on the next line.
                            line += 1;
                            current_margin = margin;
                        }
                        other => out.push(other),
                    }
                }
                Some((_, '$')) => {
                    // Left for the interpolator.
                    out.push('\\');
                }
                Some((_, other)) => {
                    self.warn(
                        Position::new(base.offset + i, line),
                        format!("unexpected escape sequence '\\{}'.", other),
                    );
                    out.push('\\');
                }
                None => out.push('\\'),
            }
        }
        out
    }

    /// Decode `\uXXXX` or `\u{1-6 hex}`; the caller has consumed the `u`.
    fn decode_unicode(
        &mut self,
        chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
    ) -> Option<char> {
        let mut hex = String::new();
        if matches!(chars.peek(), Some((_, '{'))) {
            chars.next();
            while let Some((_, c)) = chars.peek().copied() {
                if c == '}' {
                    chars.next();
                    break;
                }
                if !c.is_ascii_hexdigit() || hex.len() >= 6 {
                    return None;
                }
                hex.push(c);
                chars.next();
            }
            if hex.is_empty() {
                return None;
            }
        } else {
            for _ in 0..4 {
                match chars.peek().copied() {
                    Some((_, c)) if c.is_ascii_hexdigit() => {
                        hex.push(c);
                        chars.next();
                    }
                    _ => return None,
                }
            }
        }
        u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32)
    }

    /// Attempt a heredoc at `@(`; `Ok(None)` means the sentinel did not
    /// parse and the `@` should be emitted alone.
    fn lex_heredoc(&mut self, begin: Position) -> Result<Option<Token>, LexerError> {
        let rest = self.rest();
        let Some(sentinel) = parse_sentinel(rest) else {
            return Ok(None);
        };

        let Sentinel {
            consumed,
            mut tag,
            format,
            escapes: escape_list,
        } = sentinel;

        // A tag in double quotes is interpolated.
        let mut interpolated = false;
        let mut escaped = true;
        if tag.starts_with('"') && tag.ends_with('"') && tag.len() >= 2 {
            interpolated = true;
            tag = tag[1..tag.len() - 1].trim().to_string();
        }

        // Build the escape set: empty `/` enables everything, `$` only
        // affects interpolation, `L` is the escaped line break.
        let mut escapes = String::new();
        match escape_list {
            None => {}
            Some(list) if list.is_empty() => {
                escapes = HEREDOC_ESCAPES.replace('L', "\n").replace('$', "");
                escapes.push('\\');
            }
            Some(list) => {
                for c in list.chars() {
                    if !HEREDOC_ESCAPES.contains(c) {
                        return Err(self.error(
                            begin,
                            format!(
                                "invalid heredoc escapes '{}': only t, r, n, s, u, L, and $ are allowed.",
                                list
                            ),
                        ));
                    }
                }
                if list.contains('$') {
                    escapes = list.replace('$', "");
                } else {
                    escaped = false;
                    escapes = list;
                }
                escapes = escapes.replace('L', "\n");
                escapes.push('\\');
            }
        }

        // The body begins after the current line, or at the continuation
        // left by a previous heredoc on this line.
        let (body_begin, body_line) = match self.continuation.take() {
            Some(position) => (position.offset, position.line),
            None => {
                let after_sentinel = self.offset + consumed;
                match self.source[after_sentinel..].find('\n') {
                    Some(i) => (after_sentinel + i + 1, self.line + 1),
                    None => {
                        return Err(self.heredoc_eof(begin, &tag));
                    }
                }
            }
        };

        // Scan line by line for the end tag.
        let mut line_start = body_begin;
        let mut line_number = body_line;
        let found = loop {
            if line_start >= self.source.len() {
                return Err(self.heredoc_eof(begin, &tag));
            }
            let line_end = self.source[line_start..]
                .find('\n')
                .map(|i| line_start + i)
                .unwrap_or(self.source.len());
            let line = &self.source[line_start..line_end];

            if let Some(tag_line) = match_end_tag(line, &tag) {
                break (tag_line, line_end);
            }

            if line_end >= self.source.len() {
                return Err(self.heredoc_eof(begin, &tag));
            }
            line_start = line_end + 1;
            line_number += 1;
        };

        let (tag_line, tag_line_end) = found;

        // Continue the outer stream after the end tag's line.
        let next_offset = (tag_line_end + 1).min(self.source.len());
        self.continuation = Some(Position::new(next_offset, line_number + 1));

        let body = &self.source[body_begin..line_start];
        let margin = if tag_line.has_margin { tag_line.margin } else { 0 };
        let mut text = self.decode(
            &body.to_string(),
            &escapes,
            margin,
            Position::new(body_begin, body_line),
        );

        if tag_line.remove_break {
            if text.ends_with('\n') {
                text.pop();
            }
            if text.ends_with('\r') {
                text.pop();
            }
        }

        self.bump_ascii(consumed);
        Ok(Some(Token {
            kind: TokenKind::Heredoc,
            span: Span::new(begin, Lexer::position(self)),
            value: TokenValue::String(StringToken {
                position: begin,
                text,
                format,
                interpolated,
                escaped,
            }),
        }))
    }

    fn heredoc_eof(&mut self, begin: Position, tag: &str) -> LexerError {
        self.error(
            begin,
            format!(
                "unexpected end of input while looking for heredoc end tag '{}'.",
                tag
            ),
        )
    }
}

impl<'src> Iterator for Lexer<'src> {
    type Item = Result<Token, LexerError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_token()
    }
}

/// A parsed heredoc sentinel `@( tag [: format] [/ escapes] )`.
struct Sentinel {
    /// Bytes consumed, including the closing parenthesis.
    consumed: usize,
    tag: String,
    format: Option<String>,
    escapes: Option<String>,
}

fn parse_sentinel(rest: &str) -> Option<Sentinel> {
    debug_assert!(rest.starts_with("@("));
    let bytes = rest.as_bytes();
    let mut i = 2;

    let skip_space = |i: &mut usize| {
        while matches!(bytes.get(*i), Some(b' ') | Some(b'\t')) {
            *i += 1;
        }
    };

    skip_space(&mut i);
    let tag_start = i;
    while let Some(&b) = bytes.get(i) {
        if matches!(b, b')' | b':' | b'/' | b'\r' | b'\n') {
            break;
        }
        i += 1;
    }
    let tag = rest[tag_start..i].trim().to_string();
    if tag.is_empty() {
        return None;
    }

    let mut format = None;
    if bytes.get(i) == Some(&b':') {
        i += 1;
        skip_space(&mut i);
        let start = i;
        if !bytes
            .get(i)
            .map(|b| b.is_ascii_lowercase())
            .unwrap_or(false)
        {
            return None;
        }
        while bytes
            .get(i)
            .map(|b| b.is_ascii_alphanumeric() || *b == b'_' || *b == b'+')
            .unwrap_or(false)
        {
            i += 1;
        }
        format = Some(rest[start..i].to_string());
        skip_space(&mut i);
    }

    let mut escapes = None;
    if bytes.get(i) == Some(&b'/') {
        i += 1;
        skip_space(&mut i);
        let start = i;
        while bytes
            .get(i)
            .map(|b| b.is_ascii_alphanumeric() || *b == b'_' || *b == b'|' || *b == b'$')
            .unwrap_or(false)
        {
            i += 1;
        }
        escapes = Some(rest[start..i].trim().to_string());
        skip_space(&mut i);
    }

    if bytes.get(i) != Some(&b')') {
        return None;
    }
    Some(Sentinel {
        consumed: i + 1,
        tag,
        format,
        escapes,
    })
}

/// Result of matching a candidate heredoc end-tag line.
struct EndTagLine {
    margin: usize,
    has_margin: bool,
    remove_break: bool,
}

/// Check whether `line` (without its newline) ends a heredoc with `tag`.
fn match_end_tag(line: &str, tag: &str) -> Option<EndTagLine> {
    let bytes = line.as_bytes();
    let mut i = 0;
    let mut margin = 0;
    while let Some(&b) = bytes.get(i) {
        match b {
            b' ' => margin += 1,
            b'\t' => margin += TAB_WIDTH,
            _ => break,
        }
        i += 1;
    }

    let mut has_margin = false;
    if bytes.get(i) == Some(&b'|') {
        has_margin = true;
        i += 1;
        while matches!(bytes.get(i), Some(b' ') | Some(b'\t')) {
            i += 1;
        }
    }

    let mut remove_break = false;
    if bytes.get(i) == Some(&b'-') {
        remove_break = true;
        i += 1;
        while matches!(bytes.get(i), Some(b' ') | Some(b'\t')) {
            i += 1;
        }
    }

    if !line[i..].starts_with(tag) {
        return None;
    }
    i += tag.len();
    while matches!(bytes.get(i), Some(b' ') | Some(b'\t')) {
        i += 1;
    }
    if bytes.get(i) == Some(&b'\r') {
        i += 1;
    }
    if i != line.len() {
        return None;
    }
    Some(EndTagLine {
        margin,
        has_margin,
        remove_break,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(source: &str) -> Vec<Token> {
        Lexer::tokenize(source).expect("lexing failed").0
    }

    fn kinds(source: &str) -> Vec<TokenKind> {
        lex(source).into_iter().map(|t| t.kind).collect()
    }

    fn lex_error(source: &str) -> LexerError {
        let mut lexer = Lexer::new(source);
        for token in &mut lexer {
            if let Err(error) = token {
                return error;
            }
        }
        panic!("expected a lexer error for {:?}", source);
    }

    #[test]
    fn keywords_and_names() {
        assert_eq!(
            kinds("class inherits node unless undef"),
            vec![
                TokenKind::KeywordClass,
                TokenKind::KeywordInherits,
                TokenKind::KeywordNode,
                TokenKind::KeywordUnless,
                TokenKind::KeywordUndef,
            ]
        );
        let tokens = lex("foo foo::bar ::foo class::foo");
        assert!(tokens.iter().all(|t| t.kind == TokenKind::Name));
        assert_eq!(tokens[1].text(), Some("foo::bar"));
        assert_eq!(tokens[2].text(), Some("::foo"));
        assert_eq!(tokens[3].text(), Some("class::foo"));
    }

    #[test]
    fn statement_calls() {
        let tokens = lex("include notice fail");
        assert!(tokens.iter().all(|t| t.kind == TokenKind::StatementCall));
        assert_eq!(tokens[1].text(), Some("notice"));
    }

    #[test]
    fn bare_words() {
        let tokens = lex("_private foo-bar present");
        assert_eq!(tokens[0].kind, TokenKind::BareWord);
        assert_eq!(tokens[1].kind, TokenKind::BareWord);
        assert_eq!(tokens[1].text(), Some("foo-bar"));
        assert_eq!(tokens[2].kind, TokenKind::Name);
    }

    #[test]
    fn type_names() {
        let tokens = lex("File Foo::Bar ::Type");
        assert!(tokens.iter().all(|t| t.kind == TokenKind::TypeName));
        assert_eq!(tokens[1].text(), Some("Foo::Bar"));
    }

    #[test]
    fn variables() {
        let tokens = lex("$x $::foo $foo::bar $0");
        assert!(tokens.iter().all(|t| t.kind == TokenKind::Variable));
        assert_eq!(tokens[0].text(), Some("x"));
        assert_eq!(tokens[1].text(), Some("::foo"));
        assert_eq!(tokens[2].text(), Some("foo::bar"));
        assert_eq!(tokens[3].text(), Some("0"));
    }

    #[test]
    fn numbers() {
        let tokens = lex("42 0x1f 010 3.14 5e-3 1e2");
        let values: Vec<_> = tokens
            .iter()
            .map(|t| match t.value {
                TokenValue::Number { value, .. } => value,
                _ => panic!("expected number"),
            })
            .collect();
        assert_eq!(values[0], NumberValue::Integer(42));
        assert_eq!(values[1], NumberValue::Integer(31));
        assert_eq!(values[2], NumberValue::Integer(8));
        assert_eq!(values[3], NumberValue::Float(3.14));
        assert_eq!(values[4], NumberValue::Float(5e-3));
        assert_eq!(values[5], NumberValue::Float(1e2));
    }

    #[test]
    fn invalid_number_suffix_is_one_token() {
        let tokens = lex("123abc");
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].kind, TokenKind::InvalidNumber);
        assert_eq!(tokens[0].text(), Some("123abc"));
    }

    #[test]
    fn number_followed_by_dot_call() {
        assert_eq!(
            kinds("1.each"),
            vec![TokenKind::Number, TokenKind::Dot, TokenKind::Name]
        );
    }

    #[test]
    fn operators_longest_match() {
        assert_eq!(
            kinds("<<| |>> <| |> << >> <= < <- <~"),
            vec![
                TokenKind::LeftDoubleCollect,
                TokenKind::RightDoubleCollect,
                TokenKind::LeftCollect,
                TokenKind::RightCollect,
                TokenKind::LeftShift,
                TokenKind::RightShift,
                TokenKind::LessEquals,
                TokenKind::Less,
                TokenKind::OutEdge,
                TokenKind::OutEdgeSub,
            ]
        );
        assert_eq!(
            kinds("-> ~> => +> += -="),
            vec![
                TokenKind::InEdge,
                TokenKind::InEdgeSub,
                TokenKind::FatArrow,
                TokenKind::PlusArrow,
                TokenKind::Append,
                TokenKind::Remove,
            ]
        );
    }

    #[test]
    fn array_start_after_whitespace() {
        assert_eq!(
            kinds("$x [1]"),
            vec![
                TokenKind::Variable,
                TokenKind::ArrayStart,
                TokenKind::Number,
                TokenKind::RightBracket,
            ]
        );
        assert_eq!(
            kinds("$x[1]"),
            vec![
                TokenKind::Variable,
                TokenKind::LeftBracket,
                TokenKind::Number,
                TokenKind::RightBracket,
            ]
        );
    }

    #[test]
    fn division_after_operands() {
        // All three slashes are division, not regexes.
        assert_eq!(
            kinds("$a = 1 / 2 / 3"),
            vec![
                TokenKind::Variable,
                TokenKind::Assign,
                TokenKind::Number,
                TokenKind::Divide,
                TokenKind::Number,
                TokenKind::Divide,
                TokenKind::Number,
            ]
        );
    }

    #[test]
    fn regex_after_match_operator() {
        let tokens = lex(r"$x =~ /\d+/");
        assert_eq!(tokens[2].kind, TokenKind::Regex);
        assert_eq!(tokens[2].text(), Some(r"\d+"));
    }

    #[test]
    fn empty_regex() {
        let tokens = lex("if // { }");
        assert_eq!(tokens[1].kind, TokenKind::Regex);
        assert_eq!(tokens[1].text(), Some(""));
    }

    #[test]
    fn regex_not_across_lines() {
        assert_eq!(
            kinds("$a = $b / 2\n$c = $d / 2"),
            vec![
                TokenKind::Variable,
                TokenKind::Assign,
                TokenKind::Variable,
                TokenKind::Divide,
                TokenKind::Number,
                TokenKind::Variable,
                TokenKind::Assign,
                TokenKind::Variable,
                TokenKind::Divide,
                TokenKind::Number,
            ]
        );
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            kinds("1 # comment\n/* block\ncomment */ 2"),
            vec![TokenKind::Number, TokenKind::Number]
        );
    }

    #[test]
    fn unterminated_block_comment_fails() {
        let error = lex_error("/* never closed");
        assert!(error.message.contains("unterminated block comment"));
    }

    #[test]
    fn single_quoted_escapes() {
        let tokens = lex(r"'it\'s \\ fine'");
        let string = tokens[0].string().unwrap();
        assert_eq!(string.text, r"it's \ fine");
        assert!(!string.interpolated);
    }

    #[test]
    fn single_quoted_unknown_escape_warns() {
        let mut lexer = Lexer::new(r"'a\nb'");
        let token = lexer.next().unwrap().unwrap();
        assert_eq!(token.string().unwrap().text, "a\\nb");
        assert_eq!(lexer.warnings().len(), 1);
        assert!(lexer.warnings()[0].message.contains("\\n"));
    }

    #[test]
    fn double_quoted_escapes() {
        let tokens = lex(r#""a\tb\nc\s""#);
        let string = tokens[0].string().unwrap();
        assert_eq!(string.text, "a\tb\nc ");
        assert!(string.interpolated);
        assert!(string.escaped);
    }

    #[test]
    fn double_quoted_keeps_escaped_dollar() {
        let tokens = lex(r#""cost: \$5""#);
        assert_eq!(tokens[0].string().unwrap().text, r"cost: \$5");
    }

    #[test]
    fn double_quoted_unicode_escape() {
        let tokens = lex(r#""\u263A and \u{1F600}""#);
        assert_eq!(tokens[0].string().unwrap().text, "\u{263A} and \u{1F600}");
    }

    #[test]
    fn unclosed_quote_fails() {
        let error = lex_error("'never closed");
        assert!(error.message.contains("closing quote"));
        assert_eq!(error.position.offset, 0);
    }

    #[test]
    fn heredoc_basic() {
        let source = "$x = @(END)\nline one\nline two\nEND\n$y = 2\n";
        let tokens = lex(source);
        assert_eq!(tokens[2].kind, TokenKind::Heredoc);
        let string = tokens[2].string().unwrap();
        assert_eq!(string.text, "line one\nline two\n");
        assert!(!string.interpolated);
        // Lexing continues after the end tag line.
        assert_eq!(tokens[3].kind, TokenKind::Variable);
        assert_eq!(tokens[3].text(), Some("y"));
        assert_eq!(tokens[3].span.begin.line, 5);
    }

    #[test]
    fn heredoc_interpolated_tag() {
        let source = "@(\"END\")\nvalue: ${x}\nEND\n";
        let tokens = lex(source);
        let string = tokens[0].string().unwrap();
        assert!(string.interpolated);
        assert_eq!(string.text, "value: ${x}\n");
    }

    #[test]
    fn heredoc_margin() {
        let source = "@(END)\n    indented\n      more\n    | END\n";
        let tokens = lex(source);
        assert_eq!(tokens[0].string().unwrap().text, "indented\n  more\n");
    }

    #[test]
    fn heredoc_strip_break() {
        let source = "@(END)\ncontent\n- END\n";
        let tokens = lex(source);
        assert_eq!(tokens[0].string().unwrap().text, "content");
    }

    #[test]
    fn heredoc_escapes_subset() {
        // Only t and n are enabled; the margin marker was not supplied, so
        // leading whitespace stays.
        let source = "$s = @(\"TAG\"/tn)\n  \\tindented\n  TAG\n";
        let tokens = lex(source);
        let string = tokens[2].string().unwrap();
        assert_eq!(string.text, "  \tindented\n");
        assert!(!string.escaped);
    }

    #[test]
    fn heredoc_format() {
        let source = "@(END:json)\n{}\nEND\n";
        let tokens = lex(source);
        assert_eq!(tokens[0].string().unwrap().format.as_deref(), Some("json"));
    }

    #[test]
    fn heredoc_rest_of_line_continues() {
        // The comma after the sentinel belongs to the enclosing stream.
        let source = "foo(@(ONE), @(TWO))\nfirst\nONE\nsecond\nTWO\n";
        let tokens = lex(source);
        assert_eq!(tokens[0].kind, TokenKind::Name);
        assert_eq!(tokens[1].kind, TokenKind::LeftParen);
        assert_eq!(tokens[2].string().unwrap().text, "first\n");
        assert_eq!(tokens[3].kind, TokenKind::Comma);
        assert_eq!(tokens[4].string().unwrap().text, "second\n");
        assert_eq!(tokens[5].kind, TokenKind::RightParen);
    }

    #[test]
    fn heredoc_missing_end_tag_fails() {
        let error = lex_error("@(END)\nno end in sight");
        assert!(error.message.contains("heredoc end tag 'END'"));
    }

    #[test]
    fn heredoc_invalid_escapes_fail() {
        let error = lex_error("@(END/xq)\nbody\nEND\n");
        assert!(error.message.contains("invalid heredoc escapes"));
    }

    #[test]
    fn token_spans_match_source() {
        let source = "notice('hello')";
        for token in lex(source) {
            let text = &source[token.span.begin.offset..token.span.end.offset];
            match token.kind {
                TokenKind::StatementCall => assert_eq!(text, "notice"),
                TokenKind::SingleQuotedString => assert_eq!(text, "'hello'"),
                _ => {}
            }
        }
    }

    #[test]
    fn line_positions() {
        let tokens = lex("1\n 2\n  3");
        assert_eq!(tokens[0].span.begin.line, 1);
        assert_eq!(tokens[1].span.begin.line, 2);
        assert_eq!(tokens[2].span.begin.line, 3);
    }

    #[test]
    fn unexpected_character_fails() {
        let error = lex_error("1 ` 2");
        assert!(error.message.contains("unexpected character '`'"));
        assert_eq!(error.position.offset, 2);
    }
}
