//! Expression parsing via precedence climbing.
//!
//! Binding powers, loosest to tightest: edge operators, assignment
//! (right-associative), `or`, `and`, equality, comparison, shifts,
//! additive, multiplicative, match, `in`; then unary prefix operators and
//! postfix forms (`[]` access, `.` method calls, `?{}` selectors).

use super::interpolate;
use super::stmt;
use super::stream::TokenStream;
use crate::ast::*;
use crate::error::ParseError;
use crate::foundation::Span;
use crate::lexer::{NumberValue, TokenKind, TokenValue};

/// Parse a full expression.
pub fn parse_expression(stream: &mut TokenStream) -> Result<Expression, ParseError> {
    let lhs = parse_unary(stream)?;
    parse_binary_with(stream, lhs, 0)
}

/// Parse a comma-separated expression list with an optional trailing comma,
/// stopping before `terminator`.
pub fn parse_expressions(
    stream: &mut TokenStream,
    terminator: TokenKind,
) -> Result<Vec<Expression>, ParseError> {
    let mut expressions = Vec::new();
    loop {
        if stream.check(terminator) {
            break;
        }
        expressions.push(parse_expression(stream)?);
        if stream.eat(TokenKind::Comma).is_none() {
            break;
        }
    }
    Ok(expressions)
}

fn binding_power(kind: TokenKind) -> Option<(BinaryOperator, u8, bool)> {
    use BinaryOperator::*;
    use TokenKind as T;
    // (operator, left binding power, right-associative)
    let entry = match kind {
        T::InEdge => (InEdge, 1, false),
        T::InEdgeSub => (InEdgeSubscribe, 1, false),
        T::OutEdge => (OutEdge, 1, false),
        T::OutEdgeSub => (OutEdgeSubscribe, 1, false),
        T::Assign => (Assign, 2, true),
        T::KeywordOr => (Or, 3, false),
        T::KeywordAnd => (And, 4, false),
        T::Equals => (Equal, 5, false),
        T::NotEquals => (NotEqual, 5, false),
        T::Less => (LessThan, 6, false),
        T::LessEquals => (LessEqual, 6, false),
        T::Greater => (GreaterThan, 6, false),
        T::GreaterEquals => (GreaterEqual, 6, false),
        T::LeftShift => (LeftShift, 7, false),
        T::RightShift => (RightShift, 7, false),
        T::Plus => (Plus, 8, false),
        T::Minus => (Minus, 8, false),
        T::Multiply => (Multiply, 9, false),
        T::Divide => (Divide, 9, false),
        T::Modulo => (Modulo, 9, false),
        T::Match => (Match, 10, false),
        T::NotMatch => (NotMatch, 10, false),
        T::KeywordIn => (In, 11, false),
        _ => return None,
    };
    Some(entry)
}

/// Continue a binary-operator chain from an already-parsed left operand.
pub fn parse_binary_with(
    stream: &mut TokenStream,
    mut lhs: Expression,
    min_bp: u8,
) -> Result<Expression, ParseError> {
    while let Some(kind) = stream.peek_kind() {
        let Some((operator, lbp, right_assoc)) = binding_power(kind) else {
            break;
        };
        if lbp < min_bp {
            break;
        }
        let operator_span = stream.advance().expect("operator token").span;
        let rhs = parse_unary(stream)?;
        let next_bp = if right_assoc { lbp } else { lbp + 1 };
        let rhs = parse_binary_with(stream, rhs, next_bp)?;
        lhs = Expression::Binary {
            operator,
            operator_span,
            left: Box::new(lhs),
            right: Box::new(rhs),
        };
    }
    Ok(lhs)
}

fn parse_unary(stream: &mut TokenStream) -> Result<Expression, ParseError> {
    let operator = match stream.peek_kind() {
        Some(TokenKind::Minus) => Some(UnaryOperator::Negate),
        Some(TokenKind::Not) => Some(UnaryOperator::LogicalNot),
        Some(TokenKind::Multiply) => Some(UnaryOperator::Splat),
        _ => None,
    };
    if let Some(operator) = operator {
        let span = stream.advance().expect("unary operator").span;
        let operand = parse_unary(stream)?;
        let span = span.merge(&operand.span());
        return Ok(Expression::Unary {
            span,
            operator,
            operand: Box::new(operand),
        });
    }
    parse_postfix(stream)
}

/// Parse a primary expression followed by any number of postfix forms.
pub fn parse_postfix(stream: &mut TokenStream) -> Result<Expression, ParseError> {
    let mut expression = parse_primary(stream)?;
    loop {
        match stream.peek_kind() {
            // A '[' preceded by whitespace is an array literal, never a
            // subscript; only an adjacent '[' continues the postfix chain.
            Some(TokenKind::LeftBracket) => {
                stream.advance();
                let arguments = parse_expressions(stream, TokenKind::RightBracket)?;
                let close = stream.expect(TokenKind::RightBracket)?;
                let span = expression.span().merge(&close.span);
                expression = Expression::Access {
                    span,
                    target: Box::new(expression),
                    arguments,
                };
            }
            Some(TokenKind::Dot) => {
                stream.advance();
                let name_token = match stream.peek_kind() {
                    Some(TokenKind::Name) | Some(TokenKind::StatementCall) => {
                        stream.advance().expect("name token")
                    }
                    _ => return Err(stream.expected("method name")),
                };
                let name = name_token.text().unwrap_or_default().to_string();
                let mut arguments = Vec::new();
                let mut end_span = name_token.span;
                if stream.eat(TokenKind::LeftParen).is_some() {
                    arguments = parse_expressions(stream, TokenKind::RightParen)?;
                    end_span = stream.expect(TokenKind::RightParen)?.span;
                }
                let lambda = parse_optional_lambda(stream)?;
                if let Some(lambda) = &lambda {
                    end_span = lambda.span;
                }
                let span = expression.span().merge(&end_span);
                expression = Expression::MethodCall(Box::new(MethodCallExpression {
                    span,
                    target: expression,
                    name,
                    name_span: name_token.span,
                    arguments,
                    lambda,
                }));
            }
            Some(TokenKind::Question) => {
                stream.advance();
                stream.expect(TokenKind::LeftBrace)?;
                let cases = parse_pairs(stream)?;
                let close = stream.expect(TokenKind::RightBrace)?;
                let span = expression.span().merge(&close.span);
                expression = Expression::Selector(Box::new(SelectorExpression {
                    span,
                    target: expression,
                    cases,
                }));
            }
            _ => break,
        }
    }
    Ok(expression)
}

/// `key => value` pairs with an optional trailing comma, up to `}`.
fn parse_pairs(stream: &mut TokenStream) -> Result<Vec<(Expression, Expression)>, ParseError> {
    let mut pairs = Vec::new();
    loop {
        if stream.check(TokenKind::RightBrace) {
            break;
        }
        let key = parse_expression(stream)?;
        stream.expect(TokenKind::FatArrow)?;
        let value = parse_expression(stream)?;
        pairs.push((key, value));
        if stream.eat(TokenKind::Comma).is_none() {
            break;
        }
    }
    Ok(pairs)
}

fn parse_primary(stream: &mut TokenStream) -> Result<Expression, ParseError> {
    let Some(token) = stream.peek().cloned() else {
        return Err(stream.unexpected());
    };
    match token.kind {
        TokenKind::KeywordUndef => {
            stream.advance();
            Ok(Expression::Undef(token.span))
        }
        TokenKind::KeywordDefault => {
            stream.advance();
            Ok(Expression::Default(token.span))
        }
        TokenKind::KeywordTrue | TokenKind::KeywordFalse => {
            stream.advance();
            Ok(Expression::Boolean {
                span: token.span,
                value: token.kind == TokenKind::KeywordTrue,
            })
        }
        TokenKind::Number => {
            stream.advance();
            let value = match token.value {
                TokenValue::Number { value, .. } => value,
                _ => NumberValue::Integer(0),
            };
            Ok(Expression::Number {
                span: token.span,
                value,
            })
        }
        TokenKind::InvalidNumber => Err(ParseError::new(
            format!(
                "'{}' is not a valid number.",
                token.text().unwrap_or_default()
            ),
            token.span,
        )),
        TokenKind::SingleQuotedString | TokenKind::DoubleQuotedString | TokenKind::Heredoc => {
            stream.advance();
            let string = token.string().expect("string token has a payload").clone();
            interpolate::parse_string_literal(&string, token.span)
        }
        TokenKind::Regex => {
            stream.advance();
            Ok(Expression::Regex {
                span: token.span,
                pattern: token.text().unwrap_or_default().to_string(),
            })
        }
        TokenKind::Variable => {
            stream.advance();
            Ok(Expression::Variable {
                span: token.span,
                name: token.text().unwrap_or_default().to_string(),
            })
        }
        TokenKind::Name | TokenKind::StatementCall => {
            stream.advance();
            let name = token.text().unwrap_or_default().to_string();
            if stream.check(TokenKind::LeftParen) {
                stream.advance();
                let arguments = parse_expressions(stream, TokenKind::RightParen)?;
                let close = stream.expect(TokenKind::RightParen)?;
                let lambda = parse_optional_lambda(stream)?;
                let end = lambda.as_ref().map(|l| l.span).unwrap_or(close.span);
                return Ok(Expression::FunctionCall(Box::new(FunctionCallExpression {
                    span: token.span.merge(&end),
                    name,
                    name_span: token.span,
                    arguments,
                    lambda,
                })));
            }
            Ok(Expression::Name {
                span: token.span,
                name,
            })
        }
        TokenKind::BareWord => {
            stream.advance();
            Ok(Expression::BareWord {
                span: token.span,
                word: token.text().unwrap_or_default().to_string(),
            })
        }
        TokenKind::TypeName => {
            stream.advance();
            let name = token.text().unwrap_or_default().to_string();
            match stream.peek_kind() {
                Some(TokenKind::LeftCollect) => {
                    parse_collector(stream, name, token.span, false)
                }
                Some(TokenKind::LeftDoubleCollect) => {
                    parse_collector(stream, name, token.span, true)
                }
                _ => Ok(Expression::TypeName {
                    span: token.span,
                    name,
                }),
            }
        }
        TokenKind::ArrayStart | TokenKind::LeftBracket => {
            stream.advance();
            let elements = parse_expressions(stream, TokenKind::RightBracket)?;
            let close = stream.expect(TokenKind::RightBracket)?;
            Ok(Expression::Array {
                span: token.span.merge(&close.span),
                elements,
            })
        }
        TokenKind::LeftBrace => {
            stream.advance();
            let entries = parse_pairs(stream)?;
            let close = stream.expect(TokenKind::RightBrace)?;
            Ok(Expression::Hash {
                span: token.span.merge(&close.span),
                entries,
            })
        }
        TokenKind::LeftParen => {
            stream.advance();
            let expression = parse_expression(stream)?;
            let close = stream.expect(TokenKind::RightParen)?;
            Ok(Expression::Nested {
                span: token.span.merge(&close.span),
                expression: Box::new(expression),
            })
        }
        TokenKind::KeywordIf => parse_if(stream),
        TokenKind::KeywordUnless => parse_unless(stream),
        TokenKind::KeywordCase => parse_case(stream),
        _ => Err(stream.unexpected()),
    }
}

fn parse_if(stream: &mut TokenStream) -> Result<Expression, ParseError> {
    let keyword = stream.expect(TokenKind::KeywordIf)?;
    let condition = parse_expression(stream)?;
    let body = parse_block(stream)?;
    let mut elsifs = Vec::new();
    let mut else_body = None;
    let mut end = stream.previous_span();
    loop {
        if stream.check(TokenKind::KeywordElsif) {
            stream.advance();
            let condition = parse_expression(stream)?;
            let body = parse_block(stream)?;
            end = stream.previous_span();
            elsifs.push((condition, body));
        } else if stream.check(TokenKind::KeywordElse) {
            stream.advance();
            else_body = Some(parse_block(stream)?);
            end = stream.previous_span();
            break;
        } else {
            break;
        }
    }
    Ok(Expression::If(Box::new(IfExpression {
        span: keyword.span.merge(&end),
        condition,
        body,
        elsifs,
        else_body,
    })))
}

fn parse_unless(stream: &mut TokenStream) -> Result<Expression, ParseError> {
    let keyword = stream.expect(TokenKind::KeywordUnless)?;
    let condition = parse_expression(stream)?;
    let body = parse_block(stream)?;
    let mut else_body = None;
    if stream.check(TokenKind::KeywordElse) {
        stream.advance();
        else_body = Some(parse_block(stream)?);
    }
    let span = keyword.span.merge(&stream.previous_span());
    Ok(Expression::Unless(Box::new(UnlessExpression {
        span,
        condition,
        body,
        else_body,
    })))
}

fn parse_case(stream: &mut TokenStream) -> Result<Expression, ParseError> {
    let keyword = stream.expect(TokenKind::KeywordCase)?;
    let expression = parse_expression(stream)?;
    stream.expect(TokenKind::LeftBrace)?;
    let mut propositions = Vec::new();
    while !stream.check(TokenKind::RightBrace) {
        let start = stream.current_span();
        let mut options = vec![parse_expression(stream)?];
        while stream.eat(TokenKind::Comma).is_some() {
            if stream.check(TokenKind::Colon) {
                break;
            }
            options.push(parse_expression(stream)?);
        }
        stream.expect(TokenKind::Colon)?;
        let body = parse_block(stream)?;
        propositions.push(CaseProposition {
            span: start.merge(&stream.previous_span()),
            options,
            body,
        });
    }
    if propositions.is_empty() {
        return Err(stream.expected("at least one case proposition"));
    }
    let close = stream.expect(TokenKind::RightBrace)?;
    Ok(Expression::Case(Box::new(CaseExpression {
        span: keyword.span.merge(&close.span),
        expression,
        propositions,
    })))
}

/// A `{ statements }` block.
pub fn parse_block(stream: &mut TokenStream) -> Result<Vec<Statement>, ParseError> {
    stream.expect(TokenKind::LeftBrace)?;
    let statements = stmt::parse_statements(stream)?;
    stream.expect(TokenKind::RightBrace)?;
    Ok(statements)
}

/// A lambda if `|` follows.
pub fn parse_optional_lambda(stream: &mut TokenStream) -> Result<Option<Lambda>, ParseError> {
    if !stream.check(TokenKind::Pipe) {
        return Ok(None);
    }
    let open = stream.advance().expect("pipe token");
    let parameters = parse_parameters(stream, TokenKind::Pipe)?;
    stream.expect(TokenKind::Pipe)?;
    let body = parse_block(stream)?;
    let span = open.span.merge(&stream.previous_span());
    Ok(Some(Lambda {
        span,
        parameters,
        body,
    }))
}

/// A parameter list up to (not including) `terminator`.
pub fn parse_parameters(
    stream: &mut TokenStream,
    terminator: TokenKind,
) -> Result<Vec<Parameter>, ParseError> {
    let mut parameters = Vec::new();
    loop {
        if stream.check(terminator) {
            break;
        }
        parameters.push(parse_parameter(stream)?);
        if stream.eat(TokenKind::Comma).is_none() {
            break;
        }
    }
    Ok(parameters)
}

fn parse_parameter(stream: &mut TokenStream) -> Result<Parameter, ParseError> {
    let start = stream.current_span();

    // Optional type restriction: a type name with optional accesses.
    let mut type_expression = None;
    if stream.check(TokenKind::TypeName) {
        let token = stream.advance().expect("type token");
        let mut expression = Expression::TypeName {
            span: token.span,
            name: token.text().unwrap_or_default().to_string(),
        };
        while stream.check(TokenKind::LeftBracket) {
            stream.advance();
            let arguments = parse_expressions(stream, TokenKind::RightBracket)?;
            let close = stream.expect(TokenKind::RightBracket)?;
            let span = expression.span().merge(&close.span);
            expression = Expression::Access {
                span,
                target: Box::new(expression),
                arguments,
            };
        }
        type_expression = Some(expression);
    }

    let captures = stream.eat(TokenKind::Multiply).is_some();
    let variable = stream.expect(TokenKind::Variable)?;
    let name = variable.text().unwrap_or_default().to_string();

    let mut default = None;
    if stream.eat(TokenKind::Assign).is_some() {
        default = Some(parse_expression(stream)?);
    }

    Ok(Parameter {
        span: start.merge(&stream.previous_span()),
        type_expression,
        captures,
        name,
        default,
    })
}

fn parse_collector(
    stream: &mut TokenStream,
    type_name: String,
    type_span: Span,
    exported: bool,
) -> Result<Expression, ParseError> {
    let (open, close) = if exported {
        (TokenKind::LeftDoubleCollect, TokenKind::RightDoubleCollect)
    } else {
        (TokenKind::LeftCollect, TokenKind::RightCollect)
    };
    stream.expect(open)?;
    let query = if stream.check(close) {
        None
    } else {
        Some(parse_collector_query(stream)?)
    };
    let end = stream.expect(close)?;
    Ok(Expression::Collector(Box::new(CollectorExpression {
        span: type_span.merge(&end.span),
        type_name,
        type_span,
        exported,
        query,
    })))
}

fn parse_collector_query(stream: &mut TokenStream) -> Result<CollectorQuery, ParseError> {
    let mut query = parse_query_operand(stream)?;
    loop {
        match stream.peek_kind() {
            Some(TokenKind::KeywordAnd) => {
                stream.advance();
                let rhs = parse_query_operand(stream)?;
                query = CollectorQuery::And(Box::new(query), Box::new(rhs));
            }
            Some(TokenKind::KeywordOr) => {
                stream.advance();
                let rhs = parse_query_operand(stream)?;
                query = CollectorQuery::Or(Box::new(query), Box::new(rhs));
            }
            _ => break,
        }
    }
    Ok(query)
}

fn parse_query_operand(stream: &mut TokenStream) -> Result<CollectorQuery, ParseError> {
    if stream.eat(TokenKind::LeftParen).is_some() {
        let inner = parse_collector_query(stream)?;
        stream.expect(TokenKind::RightParen)?;
        return Ok(inner);
    }
    let name_token = stream.expect(TokenKind::Name)?;
    let name = name_token.text().unwrap_or_default().to_string();
    let equals = match stream.peek_kind() {
        Some(TokenKind::Equals) => {
            stream.advance();
            true
        }
        Some(TokenKind::NotEquals) => {
            stream.advance();
            false
        }
        _ => return Err(stream.expected("'==' or '!='")),
    };
    let value = parse_query_value(stream)?;
    let span = name_token.span.merge(&value.span());
    Ok(CollectorQuery::Attribute {
        span,
        name,
        equals,
        value,
    })
}

/// Collector query values are restricted to literal forms.
fn parse_query_value(stream: &mut TokenStream) -> Result<Expression, ParseError> {
    match stream.peek_kind() {
        Some(
            TokenKind::KeywordUndef
            | TokenKind::KeywordDefault
            | TokenKind::KeywordTrue
            | TokenKind::KeywordFalse
            | TokenKind::Number
            | TokenKind::SingleQuotedString
            | TokenKind::DoubleQuotedString
            | TokenKind::Heredoc
            | TokenKind::Regex
            | TokenKind::Variable
            | TokenKind::Name
            | TokenKind::BareWord
            | TokenKind::TypeName
            | TokenKind::ArrayStart
            | TokenKind::LeftBracket
            | TokenKind::LeftBrace,
        ) => parse_postfix(stream),
        _ => Err(stream.expected("an attribute query value")),
    }
}
