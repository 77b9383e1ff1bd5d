//! The per-environment definition registry.
//!
//! Insertion-only stores for classes, defined types, node definitions,
//! type aliases, functions, and resource type schemas. The registry is not
//! itself thread safe; the environment serializes access with its mutex.

use crate::ast::{
    ClassStatement, DefinedTypeStatement, FunctionStatement, Hostname, NodeStatement,
    SyntaxTree, TypeAliasStatement,
};
use crate::value::ValueRegex;
use std::collections::HashMap;
use std::sync::Arc;

/// Normalize a class/defined-type/type-alias/function name for lookup:
/// lowercase without a leading `::`.
pub fn normalize(name: &str) -> String {
    name.trim_start_matches("::").to_lowercase()
}

/// A registered class definition.
#[derive(Debug, Clone)]
pub struct ClassDefinition {
    pub name: String,
    pub tree: Arc<SyntaxTree>,
    pub statement: Arc<ClassStatement>,
}

/// A registered defined type.
#[derive(Debug, Clone)]
pub struct DefinedTypeDefinition {
    pub name: String,
    pub tree: Arc<SyntaxTree>,
    pub statement: Arc<DefinedTypeStatement>,
}

/// A registered node definition.
#[derive(Debug, Clone)]
pub struct NodeDefinition {
    pub tree: Arc<SyntaxTree>,
    pub statement: Arc<NodeStatement>,
}

/// A registered type alias.
#[derive(Debug, Clone)]
pub struct TypeAliasDefinition {
    pub name: String,
    pub tree: Arc<SyntaxTree>,
    pub statement: Arc<TypeAliasStatement>,
}

/// A registered language function.
#[derive(Debug, Clone)]
pub struct FunctionDefinition {
    pub name: String,
    pub tree: Arc<SyntaxTree>,
    pub statement: Arc<FunctionStatement>,
}

/// A resource type parameter or property.
#[derive(Debug, Clone)]
pub struct ResourceTypeParameter {
    pub name: String,
    /// Acceptable literal string values, if restricted.
    pub values: Vec<String>,
    /// Acceptable value patterns, if restricted.
    pub regexes: Vec<ValueRegex>,
    /// Whether this parameter defaults to the resource title.
    pub namevar: bool,
}

impl ResourceTypeParameter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: Vec::new(),
            regexes: Vec::new(),
            namevar: false,
        }
    }

    pub fn namevar(mut self) -> Self {
        self.namevar = true;
        self
    }

    pub fn with_values(mut self, values: &[&str]) -> Self {
        self.values = values.iter().map(|v| v.to_string()).collect();
        self
    }
}

/// A resource type schema (built-in or imported over the extension
/// channel).
#[derive(Debug, Clone)]
pub struct ResourceTypeDefinition {
    pub name: String,
    /// Defining file; empty for built-ins.
    pub file: String,
    pub line: usize,
    pub properties: Vec<ResourceTypeParameter>,
    pub parameters: Vec<ResourceTypeParameter>,
}

impl ResourceTypeDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            file: String::new(),
            line: 0,
            properties: Vec::new(),
            parameters: Vec::new(),
        }
    }

    pub fn is_builtin(&self) -> bool {
        self.file.is_empty()
    }

    /// The namevar parameter, if the schema declares one.
    pub fn namevar(&self) -> Option<&ResourceTypeParameter> {
        self.parameters
            .iter()
            .chain(self.properties.iter())
            .find(|parameter| parameter.namevar)
    }

    fn property(mut self, parameter: ResourceTypeParameter) -> Self {
        self.properties.push(parameter);
        self
    }

    fn parameter(mut self, parameter: ResourceTypeParameter) -> Self {
        self.parameters.push(parameter);
        self
    }
}

/// The registry.
#[derive(Debug, Default)]
pub struct Registry {
    classes: HashMap<String, ClassDefinition>,
    defined_types: HashMap<String, DefinedTypeDefinition>,
    nodes: Vec<NodeDefinition>,
    named_nodes: HashMap<String, usize>,
    regex_nodes: Vec<(ValueRegex, usize)>,
    default_node: Option<usize>,
    aliases: HashMap<String, TypeAliasDefinition>,
    functions: HashMap<String, FunctionDefinition>,
    resource_types: HashMap<String, ResourceTypeDefinition>,
}

impl Registry {
    pub fn new() -> Self {
        let mut registry = Self::default();
        registry.register_builtin_resource_types();
        registry
    }

    /// The resource types known without any module or extension support.
    fn register_builtin_resource_types(&mut self) {
        let ensure = || ResourceTypeParameter::new("ensure");
        let builtins = vec![
            ResourceTypeDefinition::new("stage"),
            ResourceTypeDefinition::new("class"),
            ResourceTypeDefinition::new("node"),
            ResourceTypeDefinition::new("file")
                .parameter(ResourceTypeParameter::new("path").namevar())
                .parameter(ResourceTypeParameter::new("backup"))
                .parameter(ResourceTypeParameter::new("force"))
                .parameter(ResourceTypeParameter::new("source"))
                .property(ensure().with_values(&[
                    "present", "absent", "file", "directory", "link",
                ]))
                .property(ResourceTypeParameter::new("content"))
                .property(ResourceTypeParameter::new("mode"))
                .property(ResourceTypeParameter::new("owner"))
                .property(ResourceTypeParameter::new("group"))
                .property(ResourceTypeParameter::new("target")),
            ResourceTypeDefinition::new("notify")
                .parameter(ResourceTypeParameter::new("name").namevar())
                .property(ResourceTypeParameter::new("message"))
                .property(ResourceTypeParameter::new("withpath")),
            ResourceTypeDefinition::new("exec")
                .parameter(ResourceTypeParameter::new("command").namevar())
                .parameter(ResourceTypeParameter::new("cwd"))
                .parameter(ResourceTypeParameter::new("creates"))
                .parameter(ResourceTypeParameter::new("user"))
                .parameter(ResourceTypeParameter::new("onlyif"))
                .parameter(ResourceTypeParameter::new("unless"))
                .property(ResourceTypeParameter::new("returns")),
            ResourceTypeDefinition::new("package")
                .parameter(ResourceTypeParameter::new("name").namevar())
                .parameter(ResourceTypeParameter::new("provider"))
                .parameter(ResourceTypeParameter::new("source"))
                .property(ensure().with_values(&[
                    "present", "absent", "installed", "latest", "held",
                ])),
            ResourceTypeDefinition::new("service")
                .parameter(ResourceTypeParameter::new("name").namevar())
                .parameter(ResourceTypeParameter::new("provider"))
                .property(ensure().with_values(&["running", "stopped", "true", "false"]))
                .property(ResourceTypeParameter::new("enable")),
            ResourceTypeDefinition::new("user")
                .parameter(ResourceTypeParameter::new("name").namevar())
                .property(ensure().with_values(&["present", "absent", "role"]))
                .property(ResourceTypeParameter::new("uid"))
                .property(ResourceTypeParameter::new("gid"))
                .property(ResourceTypeParameter::new("home"))
                .property(ResourceTypeParameter::new("shell")),
            ResourceTypeDefinition::new("group")
                .parameter(ResourceTypeParameter::new("name").namevar())
                .property(ensure().with_values(&["present", "absent"]))
                .property(ResourceTypeParameter::new("gid")),
            ResourceTypeDefinition::new("host")
                .parameter(ResourceTypeParameter::new("name").namevar())
                .property(ensure().with_values(&["present", "absent"]))
                .property(ResourceTypeParameter::new("ip"))
                .property(ResourceTypeParameter::new("host_aliases")),
            ResourceTypeDefinition::new("cron")
                .parameter(ResourceTypeParameter::new("name").namevar())
                .property(ensure().with_values(&["present", "absent"]))
                .property(ResourceTypeParameter::new("command"))
                .property(ResourceTypeParameter::new("minute"))
                .property(ResourceTypeParameter::new("hour"))
                .property(ResourceTypeParameter::new("month"))
                .property(ResourceTypeParameter::new("monthday"))
                .property(ResourceTypeParameter::new("weekday"))
                .property(ResourceTypeParameter::new("user")),
            ResourceTypeDefinition::new("mount")
                .parameter(ResourceTypeParameter::new("name").namevar())
                .property(ensure().with_values(&[
                    "defined", "present", "unmounted", "absent", "mounted",
                ]))
                .property(ResourceTypeParameter::new("device"))
                .property(ResourceTypeParameter::new("fstype"))
                .property(ResourceTypeParameter::new("options")),
        ];
        for definition in builtins {
            self.resource_types.insert(definition.name.clone(), definition);
        }
    }

    pub fn find_class(&self, name: &str) -> Option<&ClassDefinition> {
        self.classes.get(name)
    }

    pub fn register_class(&mut self, definition: ClassDefinition) {
        self.classes.insert(definition.name.clone(), definition);
    }

    pub fn find_defined_type(&self, name: &str) -> Option<&DefinedTypeDefinition> {
        self.defined_types.get(name)
    }

    pub fn register_defined_type(&mut self, definition: DefinedTypeDefinition) {
        self.defined_types.insert(definition.name.clone(), definition);
    }

    pub fn has_nodes(&self) -> bool {
        !self.nodes.is_empty()
    }

    /// Find the node definition matching a conflicting hostname of the
    /// given statement, for duplicate diagnostics.
    pub fn find_conflicting_node(&self, statement: &NodeStatement) -> Option<&NodeDefinition> {
        for hostname in &statement.hostnames {
            let index = match hostname {
                Hostname::Literal { name, .. } => {
                    self.named_nodes.get(&name.to_lowercase()).copied()
                }
                Hostname::Regex { pattern, .. } => self
                    .regex_nodes
                    .iter()
                    .find(|(existing, _)| existing.pattern() == pattern)
                    .map(|(_, index)| *index),
                Hostname::Default { .. } => self.default_node,
            };
            if let Some(index) = index {
                return Some(&self.nodes[index]);
            }
        }
        None
    }

    /// Register a node definition; the caller must have checked conflicts.
    pub fn register_node(&mut self, definition: NodeDefinition) -> Result<(), String> {
        let index = self.nodes.len();
        for hostname in &definition.statement.hostnames {
            match hostname {
                Hostname::Literal { name, .. } => {
                    self.named_nodes.insert(name.to_lowercase(), index);
                }
                Hostname::Regex { pattern, .. } => {
                    let regex = ValueRegex::new(pattern.clone())
                        .map_err(|e| format!("invalid node regex /{}/: {}.", pattern, e))?;
                    self.regex_nodes.push((regex, index));
                }
                Hostname::Default { .. } => {
                    self.default_node = Some(index);
                }
            }
        }
        self.nodes.push(definition);
        Ok(())
    }

    /// Match a node's names against the registered definitions: literal
    /// hostnames first, then regexes in insertion order, then `default`.
    /// Each candidate name is tried whole; returns the definition and the
    /// matched name.
    pub fn find_node<'a>(
        &self,
        names: impl Iterator<Item = &'a str> + Clone,
    ) -> Option<(&NodeDefinition, String)> {
        for name in names.clone() {
            if let Some(index) = self.named_nodes.get(name) {
                return Some((&self.nodes[*index], name.to_string()));
            }
        }
        for (regex, index) in &self.regex_nodes {
            for name in names.clone() {
                if regex.is_match(name) {
                    return Some((&self.nodes[*index], name.to_string()));
                }
            }
        }
        self.default_node
            .map(|index| (&self.nodes[index], "default".to_string()))
    }

    pub fn find_type_alias(&self, name: &str) -> Option<&TypeAliasDefinition> {
        self.aliases.get(name)
    }

    pub fn register_type_alias(&mut self, definition: TypeAliasDefinition) {
        self.aliases.insert(definition.name.clone(), definition);
    }

    pub fn find_function(&self, name: &str) -> Option<&FunctionDefinition> {
        self.functions.get(name)
    }

    pub fn register_function(&mut self, definition: FunctionDefinition) {
        self.functions.insert(definition.name.clone(), definition);
    }

    pub fn find_resource_type(&self, name: &str) -> Option<&ResourceTypeDefinition> {
        self.resource_types.get(name)
    }

    pub fn register_resource_type(&mut self, definition: ResourceTypeDefinition) {
        self.resource_types.insert(definition.name.clone(), definition);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::{Position, Span};

    fn node_statement(hostnames: Vec<Hostname>) -> NodeDefinition {
        let span = Span::at(Position::start());
        NodeDefinition {
            tree: Arc::new(SyntaxTree::new("test.pp", "", vec![])),
            statement: Arc::new(NodeStatement {
                span,
                hostnames,
                body: vec![],
            }),
        }
    }

    fn literal(name: &str) -> Hostname {
        Hostname::Literal {
            span: Span::at(Position::start()),
            name: name.to_string(),
        }
    }

    #[test]
    fn normalization() {
        assert_eq!(normalize("::Foo::Bar"), "foo::bar");
        assert_eq!(normalize("simple"), "simple");
    }

    #[test]
    fn builtin_resource_types() {
        let registry = Registry::new();
        let file = registry.find_resource_type("file").unwrap();
        assert!(file.is_builtin());
        assert_eq!(file.namevar().unwrap().name, "path");
        assert!(registry.find_resource_type("nonexistent").is_none());
    }

    #[test]
    fn node_matching_order() {
        let mut registry = Registry::new();
        registry
            .register_node(node_statement(vec![literal("web01.example.com")]))
            .unwrap();
        registry
            .register_node(node_statement(vec![Hostname::Regex {
                span: Span::at(Position::start()),
                pattern: "^web".to_string(),
            }]))
            .unwrap();
        registry
            .register_node(node_statement(vec![Hostname::Default {
                span: Span::at(Position::start()),
            }]))
            .unwrap();

        // Literal match wins over the regex.
        let names = ["web01.example.com", "web01"];
        let (_, matched) = registry.find_node(names.iter().copied()).unwrap();
        assert_eq!(matched, "web01.example.com");

        // Regex match.
        let names = ["web02.example.com"];
        let (_, matched) = registry.find_node(names.iter().copied()).unwrap();
        assert_eq!(matched, "web02.example.com");

        // Default fallback.
        let names = ["db01"];
        let (_, matched) = registry.find_node(names.iter().copied()).unwrap();
        assert_eq!(matched, "default");
    }

    #[test]
    fn conflicting_nodes_are_detected() {
        let mut registry = Registry::new();
        registry
            .register_node(node_statement(vec![literal("db")]))
            .unwrap();
        let conflict = node_statement(vec![literal("DB")]);
        assert!(registry.find_conflicting_node(&conflict.statement).is_some());
        let fresh = node_statement(vec![literal("web")]);
        assert!(registry.find_conflicting_node(&fresh.statement).is_none());
    }
}
