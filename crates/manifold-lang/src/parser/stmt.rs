//! Statement parsing: definitions, catalog statements, and expression
//! statements.
//!
//! Statement dispatch is keyword-driven; the ambiguous heads (a name or
//! type reference followed by `{`) are resolved the way the language
//! defines them: `name {` declares resources, `Type {` sets defaults,
//! `Type[...]  {` and `$ref {` override, and `class {` declares classes as
//! resources.

use super::expr;
use super::stream::TokenStream;
use crate::ast::*;
use crate::error::ParseError;
use crate::lexer::{TokenKind, TokenValue};
use std::sync::Arc;

/// Parse statements until end of input or a closing `}`; stray semicolons
/// between statements are permitted.
pub fn parse_statements(stream: &mut TokenStream) -> Result<Vec<Statement>, ParseError> {
    let mut statements = Vec::new();
    loop {
        while stream.eat(TokenKind::Semicolon).is_some() {}
        if stream.at_end() || stream.check(TokenKind::RightBrace) {
            break;
        }
        statements.push(parse_statement(stream)?);
    }
    Ok(statements)
}

fn parse_statement(stream: &mut TokenStream) -> Result<Statement, ParseError> {
    match stream.peek_kind() {
        Some(TokenKind::KeywordClass) => {
            if stream.peek_nth(1).map(|t| t.kind) == Some(TokenKind::LeftBrace) {
                // `class { 'name': ... }` declares classes like resources.
                let keyword = stream.advance().expect("class keyword");
                return parse_resource_bodies(
                    stream,
                    ResourceStatus::Realized,
                    "class".to_string(),
                    keyword.span,
                    keyword.span,
                );
            }
            parse_class(stream)
        }
        Some(TokenKind::KeywordDefine) => parse_defined_type(stream),
        Some(TokenKind::KeywordNode) => parse_node(stream),
        Some(TokenKind::KeywordFunction) => parse_function(stream),
        Some(TokenKind::KeywordType)
            if stream.peek_nth(1).map(|t| t.kind) == Some(TokenKind::TypeName)
                && stream.peek_nth(2).map(|t| t.kind) == Some(TokenKind::Assign) =>
        {
            parse_type_alias(stream)
        }
        Some(TokenKind::At) => {
            let prefix = stream.advance().expect("'@' token");
            parse_resource(stream, ResourceStatus::Virtualized, prefix.span)
        }
        Some(TokenKind::AtAt) => {
            let prefix = stream.advance().expect("'@@' token");
            parse_resource(stream, ResourceStatus::Exported, prefix.span)
        }
        Some(TokenKind::StatementCall)
            if stream.peek_nth(1).map(|t| t.kind) != Some(TokenKind::LeftParen) =>
        {
            parse_statement_call(stream)
        }
        Some(TokenKind::Name)
            if stream.peek_nth(1).map(|t| t.kind) == Some(TokenKind::LeftBrace) =>
        {
            let name = stream.advance().expect("name token");
            let type_name = name.text().unwrap_or_default().to_string();
            parse_resource_bodies(
                stream,
                ResourceStatus::Realized,
                type_name,
                name.span,
                name.span,
            )
        }
        Some(TokenKind::TypeName) | Some(TokenKind::Variable) => {
            let target = expr::parse_postfix(stream)?;
            if stream.check(TokenKind::LeftBrace) {
                return parse_defaults_or_override(stream, target);
            }
            let expression = expr::parse_binary_with(stream, target, 0)?;
            Ok(Statement::Expression(expression))
        }
        _ => {
            let expression = expr::parse_expression(stream)?;
            Ok(Statement::Expression(expression))
        }
    }
}

/// `notice 'message', ...` — a statement call without parentheses.
fn parse_statement_call(stream: &mut TokenStream) -> Result<Statement, ParseError> {
    let name_token = stream.advance().expect("statement call token");
    let name = name_token.text().unwrap_or_default().to_string();

    let mut arguments = vec![expr::parse_expression(stream)?];
    while stream.eat(TokenKind::Comma).is_some() {
        arguments.push(expr::parse_expression(stream)?);
    }
    let lambda = expr::parse_optional_lambda(stream)?;

    let end = lambda
        .as_ref()
        .map(|l| l.span)
        .unwrap_or_else(|| stream.previous_span());
    Ok(Statement::Expression(Expression::FunctionCall(Box::new(
        FunctionCallExpression {
            span: name_token.span.merge(&end),
            name,
            name_span: name_token.span,
            arguments,
            lambda,
        },
    ))))
}

/// After a postfix target and a peeked `{`: defaults for a bare type name,
/// an override for an access expression or variable.
fn parse_defaults_or_override(
    stream: &mut TokenStream,
    target: Expression,
) -> Result<Statement, ParseError> {
    match target {
        Expression::TypeName { span, name } => {
            stream.expect(TokenKind::LeftBrace)?;
            let operations = parse_attributes(stream)?;
            let close = stream.expect(TokenKind::RightBrace)?;
            Ok(Statement::ResourceDefaults(ResourceDefaults {
                span: span.merge(&close.span),
                type_name: name,
                type_span: span,
                operations,
            }))
        }
        Expression::Access { .. } | Expression::Variable { .. } => {
            stream.expect(TokenKind::LeftBrace)?;
            let operations = parse_attributes(stream)?;
            let close = stream.expect(TokenKind::RightBrace)?;
            let span = target.span().merge(&close.span);
            Ok(Statement::ResourceOverride(ResourceOverride {
                span,
                target,
                operations,
            }))
        }
        other => Err(ParseError::new(
            format!(
                "syntax error: unexpected '{{' after {}.",
                other.description()
            ),
            stream.current_span(),
        )),
    }
}

/// `[@|@@] name { bodies }` after the status prefix has been consumed.
fn parse_resource(
    stream: &mut TokenStream,
    status: ResourceStatus,
    start: crate::foundation::Span,
) -> Result<Statement, ParseError> {
    let type_token = match stream.peek_kind() {
        Some(TokenKind::Name) => stream.advance().expect("name token"),
        _ => return Err(stream.expected("resource type name")),
    };
    let type_name = type_token.text().unwrap_or_default().to_string();
    parse_resource_bodies(stream, status, type_name, type_token.span, start)
}

fn parse_resource_bodies(
    stream: &mut TokenStream,
    status: ResourceStatus,
    type_name: String,
    type_span: crate::foundation::Span,
    start: crate::foundation::Span,
) -> Result<Statement, ParseError> {
    stream.expect(TokenKind::LeftBrace)?;
    let mut bodies = Vec::new();
    loop {
        if stream.check(TokenKind::RightBrace) {
            break;
        }
        let body_start = stream.current_span();
        let title = expr::parse_postfix(stream)?;
        stream.expect(TokenKind::Colon)?;
        let operations = if stream.check(TokenKind::RightBrace) || stream.check(TokenKind::Semicolon)
        {
            Vec::new()
        } else {
            parse_attributes(stream)?
        };
        bodies.push(ResourceBody {
            span: body_start.merge(&stream.previous_span()),
            title,
            operations,
        });
        if stream.eat(TokenKind::Semicolon).is_none() {
            break;
        }
    }
    let close = stream.expect(TokenKind::RightBrace)?;
    Ok(Statement::Resource(ResourceDeclaration {
        span: start.merge(&close.span),
        status,
        type_name,
        type_span,
        bodies,
    }))
}

/// Attribute operations with an optional trailing comma, up to `}` (or
/// `;` between resource bodies).
fn parse_attributes(stream: &mut TokenStream) -> Result<Vec<AttributeOperation>, ParseError> {
    let mut operations = Vec::new();
    loop {
        if stream.check(TokenKind::RightBrace) || stream.check(TokenKind::Semicolon) {
            break;
        }
        operations.push(parse_attribute(stream)?);
        if stream.eat(TokenKind::Comma).is_none() {
            break;
        }
    }
    Ok(operations)
}

fn parse_attribute(stream: &mut TokenStream) -> Result<AttributeOperation, ParseError> {
    let Some(token) = stream.peek().cloned() else {
        return Err(stream.expected("attribute name"));
    };
    // Names, statement calls, keywords, and '*' (splat) are acceptable
    // attribute names.
    let name = match (&token.kind, &token.value) {
        (TokenKind::Name | TokenKind::StatementCall, TokenValue::Text(text)) => text.clone(),
        (TokenKind::Multiply, _) => "*".to_string(),
        (kind, _) if is_keyword_name(*kind) => keyword_text(*kind).to_string(),
        _ => return Err(stream.expected("attribute name")),
    };
    stream.advance();

    let operator = match stream.peek_kind() {
        Some(TokenKind::FatArrow) => {
            stream.advance();
            AttributeOperator::Assign
        }
        Some(TokenKind::PlusArrow) => {
            stream.advance();
            AttributeOperator::Append
        }
        _ => return Err(stream.expected("'=>' or '+>'")),
    };
    let value = expr::parse_expression(stream)?;
    Ok(AttributeOperation {
        name,
        name_span: token.span,
        operator,
        value,
    })
}

fn is_keyword_name(kind: TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::KeywordAnd
            | TokenKind::KeywordAttr
            | TokenKind::KeywordCase
            | TokenKind::KeywordClass
            | TokenKind::KeywordDefault
            | TokenKind::KeywordDefine
            | TokenKind::KeywordElse
            | TokenKind::KeywordElsif
            | TokenKind::KeywordFunction
            | TokenKind::KeywordIf
            | TokenKind::KeywordIn
            | TokenKind::KeywordInherits
            | TokenKind::KeywordNode
            | TokenKind::KeywordOr
            | TokenKind::KeywordPrivate
            | TokenKind::KeywordType
            | TokenKind::KeywordUndef
            | TokenKind::KeywordUnless
    )
}

fn keyword_text(kind: TokenKind) -> &'static str {
    match kind {
        TokenKind::KeywordAnd => "and",
        TokenKind::KeywordAttr => "attr",
        TokenKind::KeywordCase => "case",
        TokenKind::KeywordClass => "class",
        TokenKind::KeywordDefault => "default",
        TokenKind::KeywordDefine => "define",
        TokenKind::KeywordElse => "else",
        TokenKind::KeywordElsif => "elsif",
        TokenKind::KeywordFunction => "function",
        TokenKind::KeywordIf => "if",
        TokenKind::KeywordIn => "in",
        TokenKind::KeywordInherits => "inherits",
        TokenKind::KeywordNode => "node",
        TokenKind::KeywordOr => "or",
        TokenKind::KeywordPrivate => "private",
        TokenKind::KeywordType => "type",
        TokenKind::KeywordUndef => "undef",
        TokenKind::KeywordUnless => "unless",
        _ => unreachable!("not a keyword"),
    }
}

fn parse_class(stream: &mut TokenStream) -> Result<Statement, ParseError> {
    let keyword = stream.expect(TokenKind::KeywordClass)?;
    let name_token = stream.expect(TokenKind::Name)?;
    let name = name_token.text().unwrap_or_default().to_string();

    let parameters = parse_optional_parameters(stream)?;

    let mut parent = None;
    if stream.eat(TokenKind::KeywordInherits).is_some() {
        let parent_token = stream.expect(TokenKind::Name)?;
        parent = Some((
            parent_token.text().unwrap_or_default().to_string(),
            parent_token.span,
        ));
    }

    let body = expr::parse_block(stream)?;
    Ok(Statement::Class(Arc::new(ClassStatement {
        span: keyword.span.merge(&stream.previous_span()),
        name,
        name_span: name_token.span,
        parameters,
        parent,
        body,
    })))
}

fn parse_defined_type(stream: &mut TokenStream) -> Result<Statement, ParseError> {
    let keyword = stream.expect(TokenKind::KeywordDefine)?;
    let name_token = stream.expect(TokenKind::Name)?;
    let name = name_token.text().unwrap_or_default().to_string();
    let parameters = parse_optional_parameters(stream)?;
    let body = expr::parse_block(stream)?;
    Ok(Statement::DefinedType(Arc::new(DefinedTypeStatement {
        span: keyword.span.merge(&stream.previous_span()),
        name,
        name_span: name_token.span,
        parameters,
        body,
    })))
}

fn parse_optional_parameters(stream: &mut TokenStream) -> Result<Vec<Parameter>, ParseError> {
    if stream.eat(TokenKind::LeftParen).is_none() {
        return Ok(Vec::new());
    }
    let parameters = expr::parse_parameters(stream, TokenKind::RightParen)?;
    stream.expect(TokenKind::RightParen)?;
    Ok(parameters)
}

fn parse_node(stream: &mut TokenStream) -> Result<Statement, ParseError> {
    let keyword = stream.expect(TokenKind::KeywordNode)?;
    let mut hostnames = vec![parse_hostname(stream)?];
    while stream.eat(TokenKind::Comma).is_some() {
        if stream.check(TokenKind::LeftBrace) {
            break;
        }
        hostnames.push(parse_hostname(stream)?);
    }
    let body = expr::parse_block(stream)?;
    Ok(Statement::Node(Arc::new(NodeStatement {
        span: keyword.span.merge(&stream.previous_span()),
        hostnames,
        body,
    })))
}

fn parse_hostname(stream: &mut TokenStream) -> Result<Hostname, ParseError> {
    let Some(token) = stream.peek().cloned() else {
        return Err(stream.expected("hostname"));
    };
    match token.kind {
        TokenKind::KeywordDefault => {
            stream.advance();
            Ok(Hostname::Default { span: token.span })
        }
        TokenKind::Regex => {
            stream.advance();
            Ok(Hostname::Regex {
                span: token.span,
                pattern: token.text().unwrap_or_default().to_string(),
            })
        }
        TokenKind::SingleQuotedString | TokenKind::DoubleQuotedString => {
            stream.advance();
            let string = token.string().expect("string token has a payload");
            Ok(Hostname::Literal {
                span: token.span,
                name: string.text.clone(),
            })
        }
        TokenKind::Name | TokenKind::BareWord | TokenKind::Number => {
            // Dotted segments, e.g. `db.example.com` or `192.168.0.1`.
            let start = token.span;
            let mut end = token.span;
            let mut name = hostname_segment(&stream.advance().expect("hostname segment"));
            while stream.check(TokenKind::Dot) {
                stream.advance();
                match stream.peek_kind() {
                    Some(TokenKind::Name | TokenKind::BareWord | TokenKind::Number) => {
                        let segment = stream.advance().expect("hostname segment");
                        end = segment.span;
                        name.push('.');
                        name.push_str(&hostname_segment(&segment));
                    }
                    _ => return Err(stream.expected("hostname segment")),
                }
            }
            Ok(Hostname::Literal {
                span: start.merge(&end),
                name,
            })
        }
        _ => Err(stream.expected("hostname")),
    }
}

fn hostname_segment(token: &crate::lexer::Token) -> String {
    match &token.value {
        TokenValue::Text(text) => text.clone(),
        TokenValue::Number { value, .. } => match value {
            crate::lexer::NumberValue::Integer(i) => i.to_string(),
            crate::lexer::NumberValue::Float(f) => f.to_string(),
        },
        _ => String::new(),
    }
}

fn parse_function(stream: &mut TokenStream) -> Result<Statement, ParseError> {
    let keyword = stream.expect(TokenKind::KeywordFunction)?;
    let name_token = stream.expect(TokenKind::Name)?;
    let name = name_token.text().unwrap_or_default().to_string();
    let parameters = parse_optional_parameters(stream)?;
    let body = expr::parse_block(stream)?;
    Ok(Statement::Function(Arc::new(FunctionStatement {
        span: keyword.span.merge(&stream.previous_span()),
        name,
        name_span: name_token.span,
        parameters,
        body,
    })))
}

fn parse_type_alias(stream: &mut TokenStream) -> Result<Statement, ParseError> {
    let keyword = stream.expect(TokenKind::KeywordType)?;
    let alias_token = stream.expect(TokenKind::TypeName)?;
    let alias = alias_token.text().unwrap_or_default().to_string();
    stream.expect(TokenKind::Assign)?;
    let type_expression = expr::parse_expression(stream)?;
    Ok(Statement::TypeAlias(Arc::new(TypeAliasStatement {
        span: keyword.span.merge(&type_expression.span()),
        alias,
        alias_span: alias_token.span,
        type_expression,
    })))
}
