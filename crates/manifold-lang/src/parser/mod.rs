//! Hand-written recursive descent parser.
//!
//! # Design
//!
//! - `stream`: token stream wrapper with lookahead and rewind
//! - `expr`: precedence-climbing expression parser
//! - `stmt`: keyword-dispatched statement parsers
//! - `interpolate`: the interpolated-string sub-grammar
//! - `validate`: post-parse structural validation
//!
//! The public entry points run the lexer eagerly, parse, validate, and
//! return the tree together with any lexer warnings.

mod expr;
mod interpolate;
mod stmt;
mod stream;
mod validate;

use crate::ast::{Expression, Statement, SyntaxTree};
use crate::error::ParseError;
use crate::foundation::Position;
use crate::lexer::{Lexer, LexerWarning, Token};
use stream::TokenStream;

/// A successfully parsed file.
#[derive(Debug)]
pub struct ParsedFile {
    pub tree: SyntaxTree,
    pub warnings: Vec<LexerWarning>,
}

fn tokenize(source: &str) -> Result<(Vec<Token>, Vec<LexerWarning>, Position), ParseError> {
    let (tokens, warnings) = Lexer::tokenize(source).map_err(ParseError::from_lexer)?;
    let end = Position::new(source.len(), source.lines().count().max(1));
    Ok((tokens, warnings, end))
}

/// Parse a source file into a validated syntax tree.
pub fn parse(path: &str, source: &str) -> Result<ParsedFile, ParseError> {
    let (tokens, warnings, end) = tokenize(source)?;
    let mut stream = TokenStream::new(tokens, end);
    let statements = stmt::parse_statements(&mut stream)?;
    if !stream.at_end() {
        return Err(stream.unexpected());
    }
    validate::validate(&statements)?;
    Ok(ParsedFile {
        tree: SyntaxTree::new(path, source, statements),
        warnings,
    })
}

/// Parse a single expression (REPL input).
pub fn parse_expression(source: &str) -> Result<Expression, ParseError> {
    let (tokens, _, end) = tokenize(source)?;
    let mut stream = TokenStream::new(tokens, end);
    let expression = expr::parse_expression(&mut stream)?;
    if !stream.at_end() {
        return Err(stream.unexpected());
    }
    Ok(expression)
}

/// Parse statements (REPL input that may declare resources or classes).
pub fn parse_statements(source: &str) -> Result<Vec<Statement>, ParseError> {
    let (tokens, _, end) = tokenize(source)?;
    let mut stream = TokenStream::new(tokens, end);
    let statements = stmt::parse_statements(&mut stream)?;
    if !stream.at_end() {
        return Err(stream.unexpected());
    }
    validate::validate(&statements)?;
    Ok(statements)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::*;
    use crate::lexer::NumberValue;

    fn parse_ok(source: &str) -> Vec<Statement> {
        parse("test.pp", source)
            .unwrap_or_else(|e| panic!("parse failed for {:?}: {}", source, e.message))
            .tree
            .statements
    }

    fn parse_err(source: &str) -> ParseError {
        match parse("test.pp", source) {
            Ok(_) => panic!("expected a parse error for {:?}", source),
            Err(error) => error,
        }
    }

    fn single_expression(source: &str) -> Expression {
        let mut statements = parse_ok(source);
        assert_eq!(statements.len(), 1, "expected one statement");
        match statements.remove(0) {
            Statement::Expression(expression) => expression,
            other => panic!("expected an expression statement, got {:?}", other),
        }
    }

    #[test]
    fn arithmetic_precedence() {
        let expression = single_expression("1 + 2 * 3");
        let Expression::Binary {
            operator, right, ..
        } = expression
        else {
            panic!("expected binary expression");
        };
        assert_eq!(operator, BinaryOperator::Plus);
        assert!(matches!(
            *right,
            Expression::Binary {
                operator: BinaryOperator::Multiply,
                ..
            }
        ));
    }

    #[test]
    fn assignment_is_right_associative() {
        let expression = single_expression("$a = $b = 1");
        let Expression::Binary {
            operator, right, ..
        } = expression
        else {
            panic!("expected binary expression");
        };
        assert_eq!(operator, BinaryOperator::Assign);
        assert!(matches!(
            *right,
            Expression::Binary {
                operator: BinaryOperator::Assign,
                ..
            }
        ));
    }

    #[test]
    fn comparison_binds_tighter_than_and() {
        let expression = single_expression("$a == 1 and $b == 2");
        let Expression::Binary { operator, .. } = expression else {
            panic!("expected binary expression");
        };
        assert_eq!(operator, BinaryOperator::And);
    }

    #[test]
    fn in_binds_tightest() {
        let expression = single_expression("'a' in $list == true");
        // ('a' in $list) == true
        let Expression::Binary { operator, left, .. } = expression else {
            panic!("expected binary expression");
        };
        assert_eq!(operator, BinaryOperator::Equal);
        assert!(matches!(
            *left,
            Expression::Binary {
                operator: BinaryOperator::In,
                ..
            }
        ));
    }

    #[test]
    fn subscript_vs_array_literal() {
        // Adjacent bracket is access.
        let access = single_expression("$x[0]");
        assert!(matches!(access, Expression::Access { .. }));
        // Array literal in primary position.
        let array = single_expression("[1, 2, 3]");
        let Expression::Array { elements, .. } = array else {
            panic!("expected array literal");
        };
        assert_eq!(elements.len(), 3);
    }

    #[test]
    fn selector_expression() {
        let expression = single_expression("$x ? { 'a' => 1, default => 2 }");
        let Expression::Selector(selector) = expression else {
            panic!("expected selector");
        };
        assert_eq!(selector.cases.len(), 2);
        assert!(matches!(selector.cases[1].0, Expression::Default(_)));
    }

    #[test]
    fn method_call_with_lambda() {
        let expression = single_expression("$list.each |$item| { notice $item }");
        let Expression::MethodCall(call) = expression else {
            panic!("expected method call");
        };
        assert_eq!(call.name, "each");
        let lambda = call.lambda.as_ref().expect("lambda expected");
        assert_eq!(lambda.parameters.len(), 1);
        assert_eq!(lambda.parameters[0].name, "item");
    }

    #[test]
    fn function_call_expression() {
        let expression = single_expression("split('a,b', ',')");
        let Expression::FunctionCall(call) = expression else {
            panic!("expected function call");
        };
        assert_eq!(call.name, "split");
        assert_eq!(call.arguments.len(), 2);
    }

    #[test]
    fn statement_call_without_parens() {
        let statements = parse_ok("notice 'hello', 'world'");
        let Statement::Expression(Expression::FunctionCall(call)) = &statements[0] else {
            panic!("expected function call statement");
        };
        assert_eq!(call.name, "notice");
        assert_eq!(call.arguments.len(), 2);
    }

    #[test]
    fn resource_declaration() {
        let statements = parse_ok("file { '/tmp/x': ensure => file, mode => '0644' }");
        let Statement::Resource(resource) = &statements[0] else {
            panic!("expected resource declaration");
        };
        assert_eq!(resource.type_name, "file");
        assert_eq!(resource.status, ResourceStatus::Realized);
        assert_eq!(resource.bodies.len(), 1);
        assert_eq!(resource.bodies[0].operations.len(), 2);
        assert_eq!(resource.bodies[0].operations[0].name, "ensure");
    }

    #[test]
    fn virtual_and_exported_resources() {
        let statements = parse_ok("@file { '/a': }\n@@file { '/b': }");
        let Statement::Resource(first) = &statements[0] else {
            panic!("expected resource");
        };
        let Statement::Resource(second) = &statements[1] else {
            panic!("expected resource");
        };
        assert_eq!(first.status, ResourceStatus::Virtualized);
        assert_eq!(second.status, ResourceStatus::Exported);
    }

    #[test]
    fn multiple_bodies_separated_by_semicolon() {
        let statements = parse_ok("file { '/a': ensure => file; '/b': ensure => absent }");
        let Statement::Resource(resource) = &statements[0] else {
            panic!("expected resource");
        };
        assert_eq!(resource.bodies.len(), 2);
    }

    #[test]
    fn class_resource_declaration() {
        let statements = parse_ok("class { 'apache': port => 80 }");
        let Statement::Resource(resource) = &statements[0] else {
            panic!("expected resource declaration");
        };
        assert_eq!(resource.type_name, "class");
    }

    #[test]
    fn keyword_attribute_names() {
        let statements = parse_ok("file { '/a': unless => 'x', require => File['/b'] }");
        let Statement::Resource(resource) = &statements[0] else {
            panic!("expected resource");
        };
        assert_eq!(resource.bodies[0].operations[0].name, "unless");
        assert_eq!(resource.bodies[0].operations[1].name, "require");
    }

    #[test]
    fn resource_defaults() {
        let statements = parse_ok("File { mode => '0600' }");
        let Statement::ResourceDefaults(defaults) = &statements[0] else {
            panic!("expected resource defaults");
        };
        assert_eq!(defaults.type_name, "File");
        assert_eq!(defaults.operations[0].name, "mode");
    }

    #[test]
    fn resource_override() {
        let statements = parse_ok("File['/tmp/x'] { mode => '0600', owner +> 'root' }");
        let Statement::ResourceOverride(override_) = &statements[0] else {
            panic!("expected resource override");
        };
        assert!(matches!(override_.target, Expression::Access { .. }));
        assert_eq!(override_.operations[1].operator, AttributeOperator::Append);
    }

    #[test]
    fn class_definition() {
        let statements = parse_ok("class foo::bar($x, Integer $y = 2) inherits foo { notice 'hi' }");
        let Statement::Class(class) = &statements[0] else {
            panic!("expected class statement");
        };
        assert_eq!(class.name, "foo::bar");
        assert_eq!(class.parameters.len(), 2);
        assert!(class.parameters[1].type_expression.is_some());
        assert_eq!(class.parent.as_ref().unwrap().0, "foo");
        assert_eq!(class.body.len(), 1);
    }

    #[test]
    fn defined_type_definition() {
        let statements = parse_ok("define mymod::thing($ensure = present) { }");
        let Statement::DefinedType(defined) = &statements[0] else {
            panic!("expected defined type");
        };
        assert_eq!(defined.name, "mymod::thing");
        assert!(defined.parameters[0].default.is_some());
    }

    #[test]
    fn node_definitions() {
        let statements = parse_ok("node 'web01.example.com', /^db\\d+$/, default { }");
        let Statement::Node(node) = &statements[0] else {
            panic!("expected node statement");
        };
        assert_eq!(node.hostnames.len(), 3);
        assert!(matches!(node.hostnames[1], Hostname::Regex { .. }));
        assert!(node.hostnames[2].is_default());
    }

    #[test]
    fn dotted_bare_hostname() {
        let statements = parse_ok("node db.example.com { }");
        let Statement::Node(node) = &statements[0] else {
            panic!("expected node statement");
        };
        let Hostname::Literal { name, .. } = &node.hostnames[0] else {
            panic!("expected literal hostname");
        };
        assert_eq!(name, "db.example.com");
    }

    #[test]
    fn function_definition() {
        let statements = parse_ok("function mymod::double($x) { $x * 2 }");
        let Statement::Function(function) = &statements[0] else {
            panic!("expected function statement");
        };
        assert_eq!(function.name, "mymod::double");
    }

    #[test]
    fn type_alias() {
        let statements = parse_ok("type Port = Integer[0, 65535]");
        let Statement::TypeAlias(alias) = &statements[0] else {
            panic!("expected type alias");
        };
        assert_eq!(alias.alias, "Port");
        assert!(matches!(alias.type_expression, Expression::Access { .. }));
    }

    #[test]
    fn collectors() {
        let statements = parse_ok("File <| |> User <<| name == 'x' or uid == 0 |>>");
        let Statement::Expression(Expression::Collector(plain)) = &statements[0] else {
            panic!("expected collector");
        };
        assert!(!plain.exported);
        assert!(plain.query.is_none());
        let Statement::Expression(Expression::Collector(exported)) = &statements[1] else {
            panic!("expected collector");
        };
        assert!(exported.exported);
        assert!(matches!(
            exported.query.as_ref().unwrap(),
            CollectorQuery::Or(_, _)
        ));
    }

    #[test]
    fn relationship_chain() {
        let expression = single_expression("File['/a'] -> File['/b'] ~> Service['c']");
        let Expression::Binary { operator, .. } = expression else {
            panic!("expected binary expression");
        };
        assert_eq!(operator, BinaryOperator::InEdgeSubscribe);
    }

    #[test]
    fn interpolated_string_parts() {
        let expression = single_expression(r#""a ${1 + 2} b $x c""#);
        let Expression::Interpolated { parts, .. } = expression else {
            panic!("expected interpolated string");
        };
        assert_eq!(parts.len(), 5);
        assert!(matches!(&parts[0], InterpolationPart::Literal(s) if s == "a "));
        assert!(matches!(&parts[2], InterpolationPart::Literal(s) if s == " b "));
        assert!(matches!(&parts[4], InterpolationPart::Literal(s) if s == " c"));
    }

    #[test]
    fn braced_name_is_variable_lookup() {
        let expression = single_expression(r#""${foo}""#);
        let Expression::Interpolated { parts, .. } = expression else {
            panic!("expected interpolated string");
        };
        let InterpolationPart::Interpolation(statements) = &parts[0] else {
            panic!("expected interpolation part");
        };
        assert!(matches!(
            &statements[0],
            Statement::Expression(Expression::Variable { name, .. }) if name == "foo"
        ));
    }

    #[test]
    fn escaped_dollar_stays_literal() {
        let expression = single_expression(r#""costs \$5""#);
        let Expression::String { value, .. } = expression else {
            panic!("expected plain string, escaped dollar is not an interpolation");
        };
        assert_eq!(value, "costs $5");
    }

    #[test]
    fn plain_double_quoted_collapses_to_string() {
        let expression = single_expression(r#""hello world""#);
        assert!(matches!(expression, Expression::String { .. }));
    }

    #[test]
    fn case_expression() {
        let expression = single_expression(
            "case $os {\n  'linux', 'freebsd': { 1 }\n  /win/: { 2 }\n  default: { 3 }\n}",
        );
        let Expression::Case(case) = expression else {
            panic!("expected case expression");
        };
        assert_eq!(case.propositions.len(), 3);
        assert_eq!(case.propositions[0].options.len(), 2);
    }

    #[test]
    fn if_elsif_else() {
        let expression = single_expression("if $a { 1 } elsif $b { 2 } else { 3 }");
        let Expression::If(if_) = expression else {
            panic!("expected if expression");
        };
        assert_eq!(if_.elsifs.len(), 1);
        assert!(if_.else_body.is_some());
    }

    #[test]
    fn unless_expression() {
        let expression = single_expression("unless $a { 1 } else { 2 }");
        assert!(matches!(expression, Expression::Unless(_)));
    }

    #[test]
    fn splat_unary() {
        let expression = single_expression("notice(*$args)");
        let Expression::FunctionCall(call) = expression else {
            panic!("expected call");
        };
        assert!(matches!(
            call.arguments[0],
            Expression::Unary {
                operator: UnaryOperator::Splat,
                ..
            }
        ));
    }

    #[test]
    fn invalid_number_is_parse_error() {
        let error = parse_err("$x = 123abc");
        assert!(error.message.contains("not a valid number"));
    }

    #[test]
    fn duplicate_parameter_rejected() {
        let error = parse_err("class foo($a, $a) { }");
        assert!(error.message.contains("already exists"));
    }

    #[test]
    fn capture_parameter_rejected_for_classes() {
        let error = parse_err("class foo(*$args) { }");
        assert!(error.message.contains("cannot be a capture parameter"));
    }

    #[test]
    fn capture_parameter_must_be_last() {
        let error = parse_err("function foo(*$args, $x) { }");
        assert!(error.message.contains("not the last parameter"));
    }

    #[test]
    fn reserved_resource_parameters_rejected() {
        let error = parse_err("define foo($title) { }");
        assert!(error.message.contains("reserved"));
    }

    #[test]
    fn nested_class_in_defined_type_rejected() {
        let error = parse_err("define foo { class bar { } }");
        assert!(error.message.contains("classes can only be defined"));
    }

    #[test]
    fn function_must_be_top_level() {
        let error = parse_err("class foo { function bar { } }");
        assert!(error.message.contains("top-level"));
    }

    #[test]
    fn assignment_to_match_variable_rejected() {
        let error = parse_err("$0 = 1");
        assert!(error.message.contains("match variable"));
    }

    #[test]
    fn assignment_to_qualified_variable_rejected() {
        let error = parse_err("$foo::bar = 1");
        assert!(error.message.contains("local to the current scope"));
    }

    #[test]
    fn assignment_to_literal_rejected() {
        let error = parse_err("1 = 2");
        assert!(error.message.contains("illegal assignment"));
    }

    #[test]
    fn type_alias_conflicts_with_builtin() {
        let error = parse_err("type String = Integer");
        assert!(error.message.contains("conflicts with a built-in type"));
    }

    #[test]
    fn statement_positions_are_monotonic() {
        let statements = parse_ok("$a = 1\n$b = 2\n$c = 3");
        let mut last = 0;
        for statement in &statements {
            let span = statement.span();
            assert!(span.begin.offset >= last);
            assert!(span.begin.offset <= span.end.offset);
            assert!(span.begin.line <= span.end.line);
            last = span.begin.offset;
        }
    }

    #[test]
    fn heredoc_in_expression_position() {
        let statements = parse_ok("$config = @(SETTINGS)\nkey = value\nSETTINGS\nnotice $config");
        assert_eq!(statements.len(), 2);
        let Statement::Expression(Expression::Binary { right, .. }) = &statements[0] else {
            panic!("expected assignment");
        };
        let Expression::String { value, .. } = right.as_ref() else {
            panic!("expected string value");
        };
        assert_eq!(value, "key = value\n");
    }

    #[test]
    fn parse_expression_entry_point() {
        let expression = parse_expression("1 + 2").expect("should parse");
        assert!(matches!(
            expression,
            Expression::Binary {
                operator: BinaryOperator::Plus,
                ..
            }
        ));
        assert!(parse_expression("1 +").is_err());
    }

    #[test]
    fn number_literals() {
        let expression = single_expression("0x10");
        assert!(
            matches!(expression, Expression::Number { value: NumberValue::Integer(16), .. })
        );
    }

    #[test]
    fn trailing_garbage_rejected() {
        let error = parse_err("$a = 1 )");
        assert!(error.message.contains("unexpected"));
    }
}
