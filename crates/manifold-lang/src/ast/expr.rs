//! Expressions: the operator tree, control-flow forms, calls, lambdas,
//! and collectors. Binary precedence is resolved by the parser, so nodes
//! here are already shaped.

use super::statement::Statement;
use crate::foundation::Span;
use crate::lexer::NumberValue;
use std::fmt;

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Negate,
    LogicalNot,
    Splat,
}

impl fmt::Display for UnaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            UnaryOperator::Negate => "-",
            UnaryOperator::LogicalNot => "!",
            UnaryOperator::Splat => "*",
        };
        write!(f, "{}", text)
    }
}

/// Binary operators, including assignment and the edge operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOperator {
    In,
    Match,
    NotMatch,
    Multiply,
    Divide,
    Modulo,
    Plus,
    Minus,
    LeftShift,
    RightShift,
    LessThan,
    LessEqual,
    GreaterThan,
    GreaterEqual,
    Equal,
    NotEqual,
    And,
    Or,
    Assign,
    /// `->`: left comes before right.
    InEdge,
    /// `~>`: left notifies right.
    InEdgeSubscribe,
    /// `<-`: right comes before left.
    OutEdge,
    /// `<~`: right notifies left.
    OutEdgeSubscribe,
}

impl BinaryOperator {
    /// Whether this operator creates a catalog relationship.
    pub fn is_edge(self) -> bool {
        matches!(
            self,
            BinaryOperator::InEdge
                | BinaryOperator::InEdgeSubscribe
                | BinaryOperator::OutEdge
                | BinaryOperator::OutEdgeSubscribe
        )
    }
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            BinaryOperator::In => "in",
            BinaryOperator::Match => "=~",
            BinaryOperator::NotMatch => "!~",
            BinaryOperator::Multiply => "*",
            BinaryOperator::Divide => "/",
            BinaryOperator::Modulo => "%",
            BinaryOperator::Plus => "+",
            BinaryOperator::Minus => "-",
            BinaryOperator::LeftShift => "<<",
            BinaryOperator::RightShift => ">>",
            BinaryOperator::LessThan => "<",
            BinaryOperator::LessEqual => "<=",
            BinaryOperator::GreaterThan => ">",
            BinaryOperator::GreaterEqual => ">=",
            BinaryOperator::Equal => "==",
            BinaryOperator::NotEqual => "!=",
            BinaryOperator::And => "and",
            BinaryOperator::Or => "or",
            BinaryOperator::Assign => "=",
            BinaryOperator::InEdge => "->",
            BinaryOperator::InEdgeSubscribe => "~>",
            BinaryOperator::OutEdge => "<-",
            BinaryOperator::OutEdgeSubscribe => "<~",
        };
        write!(f, "{}", text)
    }
}

/// A fragment of an interpolated string.
#[derive(Debug, Clone)]
pub enum InterpolationPart {
    /// Literal text between interpolations.
    Literal(String),
    /// A `$name`, `${name}`, or `${ ... }` insertion. The braced form
    /// admits statements; the rendered value is the last one's.
    Interpolation(Vec<Statement>),
}

/// Expressions.
#[derive(Debug, Clone)]
pub enum Expression {
    Undef(Span),
    Default(Span),
    Boolean {
        span: Span,
        value: bool,
    },
    Number {
        span: Span,
        value: NumberValue,
    },
    /// A non-interpolated string with escapes already applied.
    String {
        span: Span,
        value: String,
    },
    /// An interpolated string body, split into parts by the parser.
    Interpolated {
        span: Span,
        parts: Vec<InterpolationPart>,
        /// Heredoc format specifier, if the source was a heredoc.
        format: Option<String>,
    },
    Regex {
        span: Span,
        pattern: String,
    },
    Variable {
        span: Span,
        name: String,
    },
    /// An unquoted name (`file`, `foo::bar`); evaluates to its text.
    Name {
        span: Span,
        name: String,
    },
    /// An unquoted bare word (`present`, `foo-bar`).
    BareWord {
        span: Span,
        word: String,
    },
    /// A capitalized type reference (`File`, `Integer`).
    TypeName {
        span: Span,
        name: String,
    },
    Array {
        span: Span,
        elements: Vec<Expression>,
    },
    Hash {
        span: Span,
        entries: Vec<(Expression, Expression)>,
    },
    /// Parenthesized subexpression, kept for position fidelity.
    Nested {
        span: Span,
        expression: Box<Expression>,
    },
    Unary {
        span: Span,
        operator: UnaryOperator,
        operand: Box<Expression>,
    },
    Binary {
        operator: BinaryOperator,
        operator_span: Span,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    If(Box<IfExpression>),
    Unless(Box<UnlessExpression>),
    Case(Box<CaseExpression>),
    /// Postfix `?{}` selector.
    Selector(Box<SelectorExpression>),
    /// `target[arguments]` subscript or type parameterization.
    Access {
        span: Span,
        target: Box<Expression>,
        arguments: Vec<Expression>,
    },
    /// `name(arguments) [|params| { ... }]`.
    FunctionCall(Box<FunctionCallExpression>),
    /// `target.name(arguments) [|params| { ... }]`.
    MethodCall(Box<MethodCallExpression>),
    /// `Type <| query |>` or `Type <<| query |>>`.
    Collector(Box<CollectorExpression>),
}

/// `if`/`elsif`/`else`.
#[derive(Debug, Clone)]
pub struct IfExpression {
    pub span: Span,
    pub condition: Expression,
    pub body: Vec<Statement>,
    pub elsifs: Vec<(Expression, Vec<Statement>)>,
    pub else_body: Option<Vec<Statement>>,
}

/// `unless`/`else`.
#[derive(Debug, Clone)]
pub struct UnlessExpression {
    pub span: Span,
    pub condition: Expression,
    pub body: Vec<Statement>,
    pub else_body: Option<Vec<Statement>>,
}

/// `case` with propositions; `default` arms are literal `default`
/// expressions among the options.
#[derive(Debug, Clone)]
pub struct CaseExpression {
    pub span: Span,
    pub expression: Expression,
    pub propositions: Vec<CaseProposition>,
}

/// One `options: { body }` arm of a case expression.
#[derive(Debug, Clone)]
pub struct CaseProposition {
    pub span: Span,
    pub options: Vec<Expression>,
    pub body: Vec<Statement>,
}

/// `target ? { option => result, ... }`.
#[derive(Debug, Clone)]
pub struct SelectorExpression {
    pub span: Span,
    pub target: Expression,
    pub cases: Vec<(Expression, Expression)>,
}

/// A call by name.
#[derive(Debug, Clone)]
pub struct FunctionCallExpression {
    pub span: Span,
    pub name: String,
    pub name_span: Span,
    pub arguments: Vec<Expression>,
    pub lambda: Option<Lambda>,
}

/// A call on a target value.
#[derive(Debug, Clone)]
pub struct MethodCallExpression {
    pub span: Span,
    pub target: Expression,
    pub name: String,
    pub name_span: Span,
    pub arguments: Vec<Expression>,
    pub lambda: Option<Lambda>,
}

/// `|$a, $b = 1| { ... }`.
#[derive(Debug, Clone)]
pub struct Lambda {
    pub span: Span,
    pub parameters: Vec<Parameter>,
    pub body: Vec<Statement>,
}

/// A class, defined type, function, or lambda parameter.
#[derive(Debug, Clone)]
pub struct Parameter {
    pub span: Span,
    /// Optional type restriction expression (evaluated to a type).
    pub type_expression: Option<Expression>,
    /// Whether this is a `*$captures` parameter.
    pub captures: bool,
    pub name: String,
    pub default: Option<Expression>,
}

/// A collector and its optional attribute query.
#[derive(Debug, Clone)]
pub struct CollectorExpression {
    pub span: Span,
    pub type_name: String,
    pub type_span: Span,
    /// True for `<<| |>>` (collects exported resources).
    pub exported: bool,
    pub query: Option<CollectorQuery>,
}

/// Attribute query grammar: comparisons joined by `and`/`or` with
/// parenthesized grouping.
#[derive(Debug, Clone)]
pub enum CollectorQuery {
    Attribute {
        span: Span,
        name: String,
        equals: bool,
        value: Expression,
    },
    And(Box<CollectorQuery>, Box<CollectorQuery>),
    Or(Box<CollectorQuery>, Box<CollectorQuery>),
}

impl Expression {
    /// The source span of this expression.
    pub fn span(&self) -> Span {
        match self {
            Expression::Undef(span) | Expression::Default(span) => *span,
            Expression::Boolean { span, .. }
            | Expression::Number { span, .. }
            | Expression::String { span, .. }
            | Expression::Interpolated { span, .. }
            | Expression::Regex { span, .. }
            | Expression::Variable { span, .. }
            | Expression::Name { span, .. }
            | Expression::BareWord { span, .. }
            | Expression::TypeName { span, .. }
            | Expression::Array { span, .. }
            | Expression::Hash { span, .. }
            | Expression::Nested { span, .. }
            | Expression::Unary { span, .. }
            | Expression::Access { span, .. } => *span,
            Expression::Binary { left, right, .. } => left.span().merge(&right.span()),
            Expression::If(e) => e.span,
            Expression::Unless(e) => e.span,
            Expression::Case(e) => e.span,
            Expression::Selector(e) => e.span,
            Expression::FunctionCall(e) => e.span,
            Expression::MethodCall(e) => e.span,
            Expression::Collector(e) => e.span,
        }
    }

    /// Whether this expression may appear as the target of an assignment.
    pub fn is_assignable_target(&self) -> bool {
        match self {
            Expression::Variable { .. } => true,
            Expression::Array { elements, .. } => {
                elements.iter().all(Expression::is_assignable_target)
            }
            _ => false,
        }
    }

    /// A short description for diagnostics ("string", "resource collector").
    pub fn description(&self) -> &'static str {
        match self {
            Expression::Undef(_) => "undef",
            Expression::Default(_) => "default",
            Expression::Boolean { .. } => "boolean",
            Expression::Number { .. } => "number",
            Expression::String { .. } | Expression::Interpolated { .. } => "string",
            Expression::Regex { .. } => "regex",
            Expression::Variable { .. } => "variable",
            Expression::Name { .. } => "name",
            Expression::BareWord { .. } => "bare word",
            Expression::TypeName { .. } => "type name",
            Expression::Array { .. } => "array",
            Expression::Hash { .. } => "hash",
            Expression::Nested { .. } => "expression",
            Expression::Unary { .. } => "unary expression",
            Expression::Binary { .. } => "binary expression",
            Expression::If(_) => "if expression",
            Expression::Unless(_) => "unless expression",
            Expression::Case(_) => "case expression",
            Expression::Selector(_) => "selector",
            Expression::Access { .. } => "access expression",
            Expression::FunctionCall(_) => "function call",
            Expression::MethodCall(_) => "method call",
            Expression::Collector(_) => "resource collector",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::Position;

    fn span(a: usize, b: usize) -> Span {
        Span::new(Position::new(a, 1), Position::new(b, 1))
    }

    #[test]
    fn binary_span_covers_operands() {
        let expression = Expression::Binary {
            operator: BinaryOperator::Plus,
            operator_span: span(2, 3),
            left: Box::new(Expression::Number {
                span: span(0, 1),
                value: NumberValue::Integer(1),
            }),
            right: Box::new(Expression::Number {
                span: span(4, 5),
                value: NumberValue::Integer(2),
            }),
        };
        let covering = expression.span();
        assert_eq!(covering.begin.offset, 0);
        assert_eq!(covering.end.offset, 5);
    }

    #[test]
    fn assignment_targets() {
        let variable = Expression::Variable {
            span: span(0, 2),
            name: "x".into(),
        };
        assert!(variable.is_assignable_target());
        let array = Expression::Array {
            span: span(0, 6),
            elements: vec![variable],
        };
        assert!(array.is_assignable_target());
        let number = Expression::Number {
            span: span(0, 1),
            value: NumberValue::Integer(3),
        };
        assert!(!number.is_assignable_target());
    }

    #[test]
    fn edge_operators() {
        assert!(BinaryOperator::InEdge.is_edge());
        assert!(BinaryOperator::OutEdgeSubscribe.is_edge());
        assert!(!BinaryOperator::Plus.is_edge());
    }
}
