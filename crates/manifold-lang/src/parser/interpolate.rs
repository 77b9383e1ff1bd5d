//! The interpolated-string sub-grammar.
//!
//! Interpolated bodies arrive from the lexer as a single processed string;
//! this module splits them into literal fragments and embedded
//! interpolations. `${ ... }` content is re-lexed lazily (stopping at the
//! matching brace, since the text beyond it is arbitrary string data) and
//! parsed as statements. A braced interpolation consisting of one bare
//! name (possibly subscripted) is variable lookup: `${foo}` means `$foo`.

use super::stmt;
use super::stream::TokenStream;
use crate::ast::{Expression, InterpolationPart, Statement};
use crate::error::ParseError;
use crate::foundation::{Position, Span};
use crate::lexer::{Lexer, StringToken, Token, TokenKind};

/// Build the expression for a string-like token.
pub fn parse_string_literal(string: &StringToken, span: Span) -> Result<Expression, ParseError> {
    if !string.interpolated {
        return Ok(Expression::String {
            span,
            value: string.text.clone(),
        });
    }
    let parts = split_parts(&string.text, string.escaped, span)?;

    // Collapse bodies with no interpolations into plain strings.
    if parts.is_empty() {
        return Ok(Expression::String {
            span,
            value: String::new(),
        });
    }
    if parts.len() == 1 {
        if let InterpolationPart::Literal(text) = &parts[0] {
            return Ok(Expression::String {
                span,
                value: text.clone(),
            });
        }
    }
    Ok(Expression::Interpolated {
        span,
        parts,
        format: string.format.clone(),
    })
}

fn split_parts(
    text: &str,
    escaped: bool,
    span: Span,
) -> Result<Vec<InterpolationPart>, ParseError> {
    let mut parts = Vec::new();
    let mut literal = String::new();
    let bytes = text.as_bytes();
    let mut i = 0;

    let mut flush = |literal: &mut String, parts: &mut Vec<InterpolationPart>| {
        if !literal.is_empty() {
            parts.push(InterpolationPart::Literal(std::mem::take(literal)));
        }
    };

    while i < bytes.len() {
        let c = bytes[i];
        if c == b'\\' && escaped && bytes.get(i + 1) == Some(&b'$') {
            literal.push('$');
            i += 2;
            continue;
        }
        if c != b'$' {
            let ch = text[i..].chars().next().expect("in-bounds character");
            literal.push(ch);
            i += ch.len_utf8();
            continue;
        }

        // At a '$': braced interpolation or a direct variable reference.
        if bytes.get(i + 1) == Some(&b'{') {
            flush(&mut literal, &mut parts);
            let (statements, consumed) = parse_braced(text, i + 1, span)?;
            parts.push(InterpolationPart::Interpolation(statements));
            i = i + 1 + consumed;
            continue;
        }

        let name_len = scan_variable_name(&text[i + 1..]);
        if name_len == 0 {
            literal.push('$');
            i += 1;
            continue;
        }
        flush(&mut literal, &mut parts);
        let name = text[i + 1..i + 1 + name_len].to_string();
        let var_span = Span::at(Position::new(
            span.begin.offset + i,
            span.begin.line,
        ));
        parts.push(InterpolationPart::Interpolation(vec![Statement::Expression(
            Expression::Variable {
                span: var_span,
                name,
            },
        )]));
        i += 1 + name_len;
    }
    flush(&mut literal, &mut parts);
    Ok(parts)
}

/// Parse `{ statements }` starting at `start` (the brace). Returns the
/// parsed statements and the number of bytes consumed including the
/// closing brace.
fn parse_braced(
    text: &str,
    start: usize,
    span: Span,
) -> Result<(Vec<Statement>, usize), ParseError> {
    let sub = &text[start..];
    let mut lexer = Lexer::new(sub);
    let mut tokens: Vec<Token> = Vec::new();
    let mut depth = 0usize;
    let mut consumed = sub.len();

    for token in &mut lexer {
        let token = token.map_err(|e| {
            ParseError::new(
                e.message,
                Span::at(Position::new(
                    span.begin.offset + start + e.position.offset,
                    span.begin.line + e.position.line - 1,
                )),
            )
        })?;
        match token.kind {
            TokenKind::LeftBrace => depth += 1,
            TokenKind::RightBrace => {
                depth -= 1;
                if depth == 0 {
                    consumed = token.span.end.offset;
                    tokens.push(token);
                    break;
                }
            }
            _ => {}
        }
        tokens.push(token);
    }

    if depth != 0 {
        return Err(ParseError::new(
            "unbalanced braces in string interpolation.",
            span,
        ));
    }

    // Drop the outer braces and shift spans into the enclosing source.
    let end_position = tokens
        .last()
        .map(|t| t.span.end)
        .unwrap_or_else(Position::start);
    let mut inner: Vec<Token> = tokens[1..tokens.len() - 1].to_vec();
    for token in &mut inner {
        token.span = adjust_span(token.span, span, start);
    }

    let mut stream = TokenStream::new(inner, end_position);
    let mut statements = stmt::parse_statements(&mut stream)?;
    if !stream.at_end() {
        return Err(stream.unexpected());
    }

    // `${name}` and `${name[index]}` mean variable lookup.
    if statements.len() == 1 {
        if let Statement::Expression(expression) = &statements[0] {
            if let Some(transformed) = to_variable(expression) {
                statements = vec![Statement::Expression(transformed)];
            }
        }
    }

    Ok((statements, consumed))
}

fn adjust_span(inner: Span, outer: Span, start: usize) -> Span {
    let begin = Position::new(
        outer.begin.offset + start + inner.begin.offset,
        outer.begin.line + inner.begin.line - 1,
    );
    let end = Position::new(
        outer.begin.offset + start + inner.end.offset,
        outer.begin.line + inner.end.line - 1,
    );
    Span::new(begin, end)
}

/// Rewrite a bare name (possibly under subscripts) into a variable
/// reference; returns `None` when the expression is not name-headed.
fn to_variable(expression: &Expression) -> Option<Expression> {
    match expression {
        Expression::Name { span, name } => Some(Expression::Variable {
            span: *span,
            name: name.clone(),
        }),
        Expression::Access {
            span,
            target,
            arguments,
        } => to_variable(target).map(|target| Expression::Access {
            span: *span,
            target: Box::new(target),
            arguments: arguments.clone(),
        }),
        _ => None,
    }
}

/// Length of a `(::)?(\w+::)*\w+` run, or 0.
fn scan_variable_name(text: &str) -> usize {
    let mut len = 0;
    if text.starts_with("::") {
        len = 2;
    }
    let word = |s: &str| -> usize {
        s.chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_')
            .map(char::len_utf8)
            .sum()
    };
    let first = word(&text[len..]);
    if first == 0 {
        return 0;
    }
    len += first;
    while text[len..].starts_with("::") {
        let run = word(&text[len + 2..]);
        if run == 0 {
            break;
        }
        len += 2 + run;
    }
    len
}
