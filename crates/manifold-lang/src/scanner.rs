//! Definition scanning.
//!
//! Walks a validated syntax tree and registers classes, defined types,
//! node definitions, functions, and type aliases. Nested class names are
//! qualified by their enclosing class. Conflicts surface as parse errors
//! that point at the earlier definition site.

use crate::ast::{ClassStatement, Statement, SyntaxTree};
use crate::error::ParseError;
use crate::logging::{Level, LogEntry, Logger};
use crate::registry::{
    self, ClassDefinition, DefinedTypeDefinition, FunctionDefinition, NodeDefinition, Registry,
    TypeAliasDefinition,
};
use std::sync::Arc;

pub struct Scanner<'a> {
    logger: &'a Logger,
    registry: &'a mut Registry,
}

impl<'a> Scanner<'a> {
    pub fn new(logger: &'a Logger, registry: &'a mut Registry) -> Self {
        Self { logger, registry }
    }

    /// Scan a tree; returns whether any definition was registered.
    pub fn scan(&mut self, tree: &Arc<SyntaxTree>) -> Result<bool, ParseError> {
        let mut registered = false;
        self.scan_statements(tree, &tree.statements, None, &mut registered)?;
        Ok(registered)
    }

    fn scan_statements(
        &mut self,
        tree: &Arc<SyntaxTree>,
        statements: &[Statement],
        parent: Option<&str>,
        registered: &mut bool,
    ) -> Result<(), ParseError> {
        for statement in statements {
            match statement {
                Statement::Class(class) => {
                    let name = self.register_class(tree, class, parent)?;
                    *registered = true;
                    self.scan_statements(tree, &class.body, Some(&name), registered)?;
                }
                Statement::DefinedType(defined) => {
                    let name = qualify(parent, &defined.name);
                    self.debug(tree, defined.span.begin.line, "defined type", &name);
                    self.check_definition_conflicts(tree, &name, defined.name_span, "defined type")?;
                    if let Some(existing) = self.registry.find_defined_type(&name) {
                        return Err(ParseError::new(
                            format!(
                                "defined type '{}' was previously defined at {}:{}.",
                                existing.name,
                                existing.tree.path(),
                                existing.statement.span.begin.line
                            ),
                            defined.name_span,
                        ));
                    }
                    self.registry.register_defined_type(DefinedTypeDefinition {
                        name,
                        tree: tree.clone(),
                        statement: defined.clone(),
                    });
                    *registered = true;
                }
                Statement::Node(node) => {
                    self.debug(tree, node.span.begin.line, "node definition", "");
                    let definition = NodeDefinition {
                        tree: tree.clone(),
                        statement: node.clone(),
                    };
                    if let Some(existing) = self.registry.find_conflicting_node(&definition.statement)
                    {
                        return Err(ParseError::new(
                            format!(
                                "a conflicting node definition was previously defined at {}:{}.",
                                existing.tree.path(),
                                existing.statement.span.begin.line
                            ),
                            node.span,
                        ));
                    }
                    self.registry
                        .register_node(definition)
                        .map_err(|message| ParseError::new(message, node.span))?;
                    *registered = true;
                }
                Statement::Function(function) => {
                    let name = registry::normalize(&function.name);
                    self.debug(tree, function.span.begin.line, "function", &name);
                    if crate::eval::functions::is_builtin(&name) {
                        return Err(ParseError::new(
                            format!(
                                "cannot define function '{}' because it conflicts with a built-in function of the same name.",
                                function.name
                            ),
                            function.name_span,
                        ));
                    }
                    if let Some(existing) = self.registry.find_function(&name) {
                        return Err(ParseError::new(
                            format!(
                                "cannot define function '{}' because it conflicts with a previous definition at {}:{}.",
                                function.name,
                                existing.tree.path(),
                                existing.statement.span.begin.line
                            ),
                            function.name_span,
                        ));
                    }
                    self.registry.register_function(FunctionDefinition {
                        name,
                        tree: tree.clone(),
                        statement: function.clone(),
                    });
                    *registered = true;
                }
                Statement::TypeAlias(alias) => {
                    let name = registry::normalize(&alias.alias);
                    self.debug(tree, alias.span.begin.line, "type alias", &name);
                    if let Some(existing) = self.registry.find_type_alias(&name) {
                        return Err(ParseError::new(
                            format!(
                                "type alias '{}' was previously defined at {}:{}.",
                                alias.alias,
                                existing.tree.path(),
                                existing.statement.span.begin.line
                            ),
                            alias.alias_span,
                        ));
                    }
                    if let Some(defined) = self.registry.find_defined_type(&name) {
                        return Err(ParseError::new(
                            format!(
                                "type alias '{}' conflicts with a defined type of the same name defined at {}:{}.",
                                alias.alias,
                                defined.tree.path(),
                                defined.statement.span.begin.line
                            ),
                            alias.alias_span,
                        ));
                    }
                    self.check_resource_type_conflict(&name, alias.alias_span, "type alias")?;
                    self.registry.register_type_alias(TypeAliasDefinition {
                        name,
                        tree: tree.clone(),
                        statement: alias.clone(),
                    });
                    *registered = true;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn register_class(
        &mut self,
        tree: &Arc<SyntaxTree>,
        class: &Arc<ClassStatement>,
        parent: Option<&str>,
    ) -> Result<String, ParseError> {
        let name = qualify(parent, &class.name);
        self.debug(tree, class.span.begin.line, "class", &name);

        if let Some(existing) = self.registry.find_class(&name) {
            return Err(ParseError::new(
                format!(
                    "class '{}' was previously defined at {}:{}.",
                    existing.name,
                    existing.tree.path(),
                    existing.statement.span.begin.line
                ),
                class.name_span,
            ));
        }
        if let Some(existing) = self.registry.find_defined_type(&name) {
            return Err(ParseError::new(
                format!(
                    "'{}' was previously defined as a defined type at {}:{}.",
                    existing.name,
                    existing.tree.path(),
                    existing.statement.span.begin.line
                ),
                class.name_span,
            ));
        }
        self.check_resource_type_conflict(&name, class.name_span, "class")?;

        self.registry.register_class(ClassDefinition {
            name: name.clone(),
            tree: tree.clone(),
            statement: class.clone(),
        });
        Ok(name)
    }

    /// Classes and defined types share a namespace with each other and
    /// with resource types.
    fn check_definition_conflicts(
        &self,
        _tree: &Arc<SyntaxTree>,
        name: &str,
        span: crate::foundation::Span,
        kind: &str,
    ) -> Result<(), ParseError> {
        if let Some(existing) = self.registry.find_class(name) {
            return Err(ParseError::new(
                format!(
                    "'{}' was previously defined as a class at {}:{}.",
                    existing.name,
                    existing.tree.path(),
                    existing.statement.span.begin.line
                ),
                span,
            ));
        }
        self.check_resource_type_conflict(name, span, kind)
    }

    fn check_resource_type_conflict(
        &self,
        name: &str,
        span: crate::foundation::Span,
        kind: &str,
    ) -> Result<(), ParseError> {
        let Some(existing) = self.registry.find_resource_type(name) else {
            return Ok(());
        };
        if existing.is_builtin() {
            return Err(ParseError::new(
                format!(
                    "{} '{}' conflicts with a built-in resource type of the same name.",
                    kind, name
                ),
                span,
            ));
        }
        Err(ParseError::new(
            format!(
                "{} '{}' conflicts with a resource type of the same name defined at {}:{}.",
                kind, name, existing.file, existing.line
            ),
            span,
        ))
    }

    fn debug(&self, tree: &Arc<SyntaxTree>, line: usize, kind: &str, name: &str) {
        if !self.logger.would_log(Level::Debug) {
            return;
        }
        let message = if name.is_empty() {
            format!("found {} at {}:{}.", kind, tree.path(), line)
        } else {
            format!("found {} '{}' at {}:{}.", kind, name, tree.path(), line)
        };
        self.logger.log(LogEntry::bare(Level::Debug, message));
    }
}

fn qualify(parent: Option<&str>, name: &str) -> String {
    let normalized = registry::normalize(name);
    match parent {
        Some(parent) => format!("{}::{}", parent, normalized),
        None => normalized,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::MemorySink;
    use crate::parser;

    fn scan_source(registry: &mut Registry, source: &str) -> Result<bool, ParseError> {
        let parsed = parser::parse("test.pp", source).expect("parse should succeed");
        let tree = Arc::new(parsed.tree);
        let logger = Logger::new(MemorySink::new());
        let mut scanner = Scanner::new(&logger, registry);
        scanner.scan(&tree)
    }

    #[test]
    fn registers_top_level_definitions() {
        let mut registry = Registry::new();
        let registered = scan_source(
            &mut registry,
            "class foo { }\ndefine bar($x) { }\nfunction baz() { 1 }\ntype Port = Integer",
        )
        .unwrap();
        assert!(registered);
        assert!(registry.find_class("foo").is_some());
        assert!(registry.find_defined_type("bar").is_some());
        assert!(registry.find_function("baz").is_some());
        assert!(registry.find_type_alias("port").is_some());
    }

    #[test]
    fn nested_classes_are_qualified() {
        let mut registry = Registry::new();
        scan_source(&mut registry, "class outer { class inner { } }").unwrap();
        assert!(registry.find_class("outer").is_some());
        assert!(registry.find_class("outer::inner").is_some());
        assert!(registry.find_class("inner").is_none());
    }

    #[test]
    fn duplicate_class_reports_original_site() {
        let mut registry = Registry::new();
        scan_source(&mut registry, "class foo { }").unwrap();
        let error = scan_source(&mut registry, "class foo { }").expect_err("conflict expected");
        assert!(error.message.contains("previously defined at test.pp:1"));
    }

    #[test]
    fn class_conflicts_with_defined_type() {
        let mut registry = Registry::new();
        scan_source(&mut registry, "define widget($x) { }").unwrap();
        let error = scan_source(&mut registry, "class widget { }").expect_err("conflict expected");
        assert!(error.message.contains("previously defined as a defined type"));
    }

    #[test]
    fn class_conflicts_with_builtin_resource_type() {
        let mut registry = Registry::new();
        let error = scan_source(&mut registry, "class file { }").expect_err("conflict expected");
        assert!(error
            .message
            .contains("conflicts with a built-in resource type"));
    }

    #[test]
    fn builtin_function_conflict() {
        let mut registry = Registry::new();
        let error =
            scan_source(&mut registry, "function split($a) { }").expect_err("conflict expected");
        assert!(error.message.contains("built-in function"));
    }

    #[test]
    fn overlapping_nodes_conflict() {
        let mut registry = Registry::new();
        scan_source(&mut registry, "node 'web' { }").unwrap();
        let error = scan_source(&mut registry, "node 'web', 'db' { }").expect_err("conflict");
        assert!(error.message.contains("conflicting node definition"));
        // Non-overlapping is fine.
        scan_source(&mut registry, "node 'db' { }").unwrap();
    }

    #[test]
    fn expression_only_trees_register_nothing() {
        let mut registry = Registry::new();
        let registered = scan_source(&mut registry, "$x = 1 + 2\nnotice $x").unwrap();
        assert!(!registered);
    }
}
