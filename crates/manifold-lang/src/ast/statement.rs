//! Statements: catalog declarations (resources, overrides, defaults) and
//! the statement enum tying the tree together.

use super::declaration::{
    ClassStatement, DefinedTypeStatement, FunctionStatement, NodeStatement, TypeAliasStatement,
};
use super::expr::Expression;
use crate::foundation::Span;
use std::sync::Arc;

/// Resource virtualization state introduced by declaration syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceStatus {
    /// Declared without a prefix; goes into the catalog immediately.
    Realized,
    /// `@type { ... }`; stays out of the catalog until collected.
    Virtualized,
    /// `@@type { ... }`; virtual and marked for export.
    Exported,
}

/// `=>` or `+>` in a resource body or override.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeOperator {
    Assign,
    Append,
}

/// One attribute operation inside a resource body.
#[derive(Debug, Clone)]
pub struct AttributeOperation {
    pub name: String,
    pub name_span: Span,
    pub operator: AttributeOperator,
    pub value: Expression,
}

/// One `title: attributes` body of a resource declaration.
#[derive(Debug, Clone)]
pub struct ResourceBody {
    pub span: Span,
    pub title: Expression,
    pub operations: Vec<AttributeOperation>,
}

/// `[@|@@] type { title: attrs; ... }`, including `class { 'name': }`.
#[derive(Debug, Clone)]
pub struct ResourceDeclaration {
    pub span: Span,
    pub status: ResourceStatus,
    /// The resource type name as written (`file`, `foo::bar`, or `class`).
    pub type_name: String,
    pub type_span: Span,
    pub bodies: Vec<ResourceBody>,
}

/// `Type[title] { attrs }`.
#[derive(Debug, Clone)]
pub struct ResourceOverride {
    pub span: Span,
    /// The access expression selecting the resources to override.
    pub target: Expression,
    pub operations: Vec<AttributeOperation>,
}

/// `Type { attrs }` — scope-wide attribute defaults.
#[derive(Debug, Clone)]
pub struct ResourceDefaults {
    pub span: Span,
    pub type_name: String,
    pub type_span: Span,
    pub operations: Vec<AttributeOperation>,
}

/// Statements.
#[derive(Debug, Clone)]
pub enum Statement {
    Expression(Expression),
    Class(Arc<ClassStatement>),
    DefinedType(Arc<DefinedTypeStatement>),
    Node(Arc<NodeStatement>),
    Function(Arc<FunctionStatement>),
    TypeAlias(Arc<TypeAliasStatement>),
    Resource(ResourceDeclaration),
    ResourceOverride(ResourceOverride),
    ResourceDefaults(ResourceDefaults),
}

impl Statement {
    /// The source span of this statement.
    pub fn span(&self) -> Span {
        match self {
            Statement::Expression(e) => e.span(),
            Statement::Class(s) => s.span,
            Statement::DefinedType(s) => s.span,
            Statement::Node(s) => s.span,
            Statement::Function(s) => s.span,
            Statement::TypeAlias(s) => s.span,
            Statement::Resource(s) => s.span,
            Statement::ResourceOverride(s) => s.span,
            Statement::ResourceDefaults(s) => s.span,
        }
    }
}
