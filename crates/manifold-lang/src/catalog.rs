//! The catalog: the resource store and relationship graph produced by one
//! compilation.
//!
//! # Design
//!
//! - Resources live in an arena (`Vec`) and are referred to by index;
//!   identity is `(lowercased type name, title)` and is unique
//! - Attributes are insertion-ordered and carry the source contexts of
//!   their name and value for conflict diagnostics
//! - Explicit `relate` edges (containment, collected relationships) and
//!   the edges derived from relationship metaparameters both land in the
//!   edge list during `populate_graph`

use crate::ast::AstContext;
use crate::error::EvaluationError;
use crate::types::capitalize_type_name;
use crate::value::{SharedValue, Value};
use indexmap::IndexMap;
use serde_json::json;

/// Resource metaparameter names.
const METAPARAMETERS: &[&str] = &[
    "alias",
    "audit",
    "before",
    "loglevel",
    "noop",
    "notify",
    "require",
    "schedule",
    "stage",
    "subscribe",
    "tag",
];

/// Whether a parameter name is reserved for a metaparameter.
pub fn is_metaparameter(name: &str) -> bool {
    METAPARAMETERS.contains(&name)
}

/// Identifier of a resource within its catalog.
pub type ResourceIndex = usize;

/// Virtualization state of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    Realized,
    Virtualized,
    Exported,
}

/// The kinds of edges in the catalog graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relationship {
    /// Containment (stages contain classes, classes contain resources).
    Contains,
    /// Source is applied before target.
    Before,
    /// Source is applied before target because target requires it.
    Require,
    /// Source notifies target (before + refresh).
    Notify,
    /// Target subscribes to source.
    Subscribe,
}

impl Relationship {
    /// The name used in catalog serialization.
    pub fn name(self) -> &'static str {
        match self {
            Relationship::Contains => "contains",
            Relationship::Before => "before",
            Relationship::Require => "require",
            Relationship::Notify => "notify",
            Relationship::Subscribe => "subscribe",
        }
    }
}

/// A resource attribute with provenance.
#[derive(Debug, Clone)]
pub struct Attribute {
    pub name: String,
    pub value: SharedValue,
    pub name_context: Option<AstContext>,
    pub value_context: Option<AstContext>,
}

impl Attribute {
    pub fn new(
        name: impl Into<String>,
        value: SharedValue,
        name_context: Option<AstContext>,
        value_context: Option<AstContext>,
    ) -> Self {
        Self {
            name: name.into(),
            value,
            name_context,
            value_context,
        }
    }
}

/// A declared resource.
#[derive(Debug)]
pub struct Resource {
    type_name: String,
    title: String,
    container: Option<ResourceIndex>,
    state: ResourceState,
    attributes: IndexMap<String, Attribute>,
    tags: Vec<String>,
    /// Source path of the declaration, if known.
    path: Option<String>,
    line: usize,
}

impl Resource {
    /// The lowercased resource type name.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// `Type[title]` rendering.
    pub fn reference(&self) -> String {
        format!("{}[{}]", capitalize_type_name(&self.type_name), self.title)
    }

    pub fn container(&self) -> Option<ResourceIndex> {
        self.container
    }

    pub fn state(&self) -> ResourceState {
        self.state
    }

    /// Whether the resource has not been realized.
    pub fn is_virtual(&self) -> bool {
        !matches!(self.state, ResourceState::Realized)
    }

    pub fn is_exported(&self) -> bool {
        matches!(self.state, ResourceState::Exported)
    }

    pub fn is_class(&self) -> bool {
        self.type_name == "class"
    }

    pub fn is_stage(&self) -> bool {
        self.type_name == "stage"
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn line(&self) -> usize {
        self.line
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn add_tag(&mut self, tag: impl Into<String>) {
        let tag = tag.into();
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
    }

    pub fn get(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(name)
    }

    pub fn attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.values()
    }

    /// Set an attribute; an undef value removes it.
    pub fn set(&mut self, attribute: Attribute) {
        if attribute.value.is_undef() {
            self.attributes.shift_remove(&attribute.name);
            return;
        }
        self.attributes.insert(attribute.name.clone(), attribute);
    }

    /// Append to an attribute: existing arrays are extended, other
    /// existing values become the head of a new array.
    pub fn append(&mut self, attribute: Attribute) {
        let mut elements = match self.attributes.shift_remove(&attribute.name) {
            Some(previous) => match previous.value.as_array() {
                Some(existing) => existing.to_vec(),
                None => vec![previous.value.as_ref().clone()],
            },
            None => Vec::new(),
        };
        match attribute.value.as_array() {
            Some(additions) => elements.extend(additions.iter().cloned()),
            None => elements.push(attribute.value.as_ref().clone()),
        }
        self.attributes.insert(
            attribute.name.clone(),
            Attribute {
                name: attribute.name,
                value: SharedValue::new(Value::Array(elements)),
                name_context: attribute.name_context,
                value_context: attribute.value_context,
            },
        );
    }
}

/// The catalog under construction for one node.
#[derive(Debug)]
pub struct Catalog {
    node_name: String,
    environment_name: String,
    resources: Vec<Resource>,
    index: IndexMap<(String, String), ResourceIndex>,
    edges: Vec<(Relationship, ResourceIndex, ResourceIndex)>,
}

impl Catalog {
    pub fn new(node_name: impl Into<String>, environment_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            environment_name: environment_name.into(),
            resources: Vec::new(),
            index: IndexMap::new(),
            edges: Vec::new(),
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    fn key(type_name: &str, title: &str) -> (String, String) {
        (type_name.to_lowercase(), title.to_string())
    }

    /// Find a resource by identity.
    pub fn find(&self, type_name: &str, title: &str) -> Option<ResourceIndex> {
        self.index.get(&Self::key(type_name, title)).copied()
    }

    pub fn get(&self, index: ResourceIndex) -> &Resource {
        &self.resources[index]
    }

    pub fn get_mut(&mut self, index: ResourceIndex) -> &mut Resource {
        &mut self.resources[index]
    }

    /// Number of resources, in declaration order.
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn resources(&self) -> impl Iterator<Item = (ResourceIndex, &Resource)> {
        self.resources.iter().enumerate()
    }

    /// Add a resource; `Err` holds the index of the existing resource with
    /// the same identity.
    pub fn add(
        &mut self,
        type_name: &str,
        title: &str,
        container: Option<ResourceIndex>,
        state: ResourceState,
        context: Option<&AstContext>,
    ) -> Result<ResourceIndex, ResourceIndex> {
        let key = Self::key(type_name, title);
        if let Some(existing) = self.index.get(&key) {
            return Err(*existing);
        }
        let index = self.resources.len();
        self.resources.push(Resource {
            type_name: key.0.clone(),
            title: key.1.clone(),
            container,
            state,
            attributes: IndexMap::new(),
            tags: Vec::new(),
            path: context.map(|c| c.tree.path().to_string()),
            line: context.map(|c| c.span.begin.line).unwrap_or(0),
        });
        self.index.insert(key, index);
        if let Some(container) = container {
            self.relate(Relationship::Contains, container, index);
        }
        Ok(index)
    }

    /// Record an explicit relationship edge.
    pub fn relate(&mut self, relationship: Relationship, source: ResourceIndex, target: ResourceIndex) {
        let edge = (relationship, source, target);
        if !self.edges.contains(&edge) {
            self.edges.push(edge);
        }
    }

    /// Mark a virtual resource as realized.
    pub fn realize(&mut self, index: ResourceIndex) {
        self.resources[index].state = ResourceState::Realized;
    }

    /// Turn the relationship metaparameters of every realized resource
    /// into edges.
    pub fn populate_graph(&mut self) -> Result<(), EvaluationError> {
        const RELATIONSHIPS: &[(&str, Relationship, bool)] = &[
            // (metaparameter, relationship, resource-is-source)
            ("before", Relationship::Before, true),
            ("notify", Relationship::Notify, true),
            ("require", Relationship::Require, false),
            ("subscribe", Relationship::Subscribe, false),
        ];

        let mut additions = Vec::new();
        let failure: std::cell::RefCell<Option<String>> = std::cell::RefCell::new(None);

        for (index, resource) in self.resources.iter().enumerate() {
            if resource.is_virtual() {
                continue;
            }
            for (name, relationship, source_first) in RELATIONSHIPS {
                let Some(attribute) = resource.get(name) else {
                    continue;
                };
                attribute.value.each_resource(
                    &mut |type_name, title| {
                        match self.find(&type_name, &title) {
                            Some(other) => {
                                if *source_first {
                                    additions.push((*relationship, index, other));
                                } else {
                                    additions.push((*relationship, other, index));
                                }
                            }
                            None => {
                                let mut failure = failure.borrow_mut();
                                if failure.is_none() {
                                    *failure = Some(format!(
                                        "cannot create relationship from '{}' of resource {}: resource {}[{}] does not exist in the catalog.",
                                        name,
                                        resource.reference(),
                                        capitalize_type_name(&type_name),
                                        title
                                    ));
                                }
                            }
                        }
                    },
                    &mut |message| {
                        let mut failure = failure.borrow_mut();
                        if failure.is_none() {
                            *failure = Some(format!(
                                "cannot create relationship from '{}' of resource {}: {}",
                                name,
                                resource.reference(),
                                message
                            ));
                        }
                    },
                );
            }
        }
        let failure = failure.into_inner();

        if let Some(message) = failure {
            return Err(EvaluationError::new(message, Vec::new()));
        }
        for (relationship, source, target) in additions {
            self.relate(relationship, source, target);
        }
        Ok(())
    }

    /// Serialize to the conventional JSON document.
    ///
    /// Virtual and exported resources are omitted, as are containment-only
    /// bookkeeping attributes.
    pub fn to_json(&self) -> serde_json::Value {
        let resources: Vec<serde_json::Value> = self
            .resources
            .iter()
            .filter(|resource| !resource.is_virtual())
            .map(|resource| {
                let mut parameters = serde_json::Map::new();
                for attribute in resource.attributes() {
                    parameters.insert(attribute.name.clone(), attribute.value.to_json());
                }
                json!({
                    "type": capitalize_type_name(&resource.type_name),
                    "title": resource.title,
                    "tags": resource.tags,
                    "file": resource.path.clone().unwrap_or_default(),
                    "line": resource.line,
                    "parameters": serde_json::Value::Object(parameters),
                })
            })
            .collect();

        let edges: Vec<serde_json::Value> = self
            .edges
            .iter()
            .filter(|(_, source, target)| {
                !self.resources[*source].is_virtual() && !self.resources[*target].is_virtual()
            })
            .map(|(relationship, source, target)| {
                json!({
                    "source": self.resources[*source].reference(),
                    "target": self.resources[*target].reference(),
                    "relationship": relationship.name(),
                })
            })
            .collect();

        json!({
            "name": self.node_name,
            "environment": self.environment_name,
            "resources": resources,
            "edges": edges,
            "version": 1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn catalog() -> Catalog {
        Catalog::new("web01", "production")
    }

    fn attribute(name: &str, value: Value) -> Attribute {
        Attribute::new(name, Arc::new(value), None, None)
    }

    #[test]
    fn identity_is_case_insensitive_on_type() {
        let mut catalog = catalog();
        let index = catalog
            .add("File", "/tmp/x", None, ResourceState::Realized, None)
            .unwrap();
        assert_eq!(catalog.find("file", "/tmp/x"), Some(index));
        assert_eq!(catalog.find("FILE", "/tmp/x"), Some(index));
        assert!(catalog.add("file", "/tmp/x", None, ResourceState::Realized, None).is_err());
    }

    #[test]
    fn containment_adds_edge() {
        let mut catalog = catalog();
        let stage = catalog
            .add("stage", "main", None, ResourceState::Realized, None)
            .unwrap();
        let class = catalog
            .add("class", "main", Some(stage), ResourceState::Realized, None)
            .unwrap();
        assert_eq!(catalog.get(class).container(), Some(stage));
        let json = catalog.to_json();
        let edges = json["edges"].as_array().unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0]["relationship"], "contains");
        assert_eq!(edges[0]["source"], "Stage[main]");
    }

    #[test]
    fn set_and_append_attributes() {
        let mut catalog = catalog();
        let index = catalog
            .add("file", "/x", None, ResourceState::Realized, None)
            .unwrap();
        let resource = catalog.get_mut(index);
        resource.set(attribute("mode", Value::string("0644")));
        assert_eq!(
            resource.get("mode").unwrap().value.as_string(),
            Some("0644")
        );

        resource.append(attribute("tag", Value::string("a")));
        resource.append(attribute("tag", Value::Array(vec![Value::string("b")])));
        assert_eq!(
            resource.get("tag").unwrap().value.as_array().unwrap().len(),
            2
        );

        // Setting undef removes.
        resource.set(attribute("mode", Value::Undef));
        assert!(resource.get("mode").is_none());
    }

    #[test]
    fn populate_graph_from_metaparameters() {
        let mut catalog = catalog();
        let a = catalog
            .add("file", "/a", None, ResourceState::Realized, None)
            .unwrap();
        let b = catalog
            .add("service", "svc", None, ResourceState::Realized, None)
            .unwrap();
        catalog.get_mut(b).set(attribute(
            "require",
            Value::Type(Box::new(crate::types::Type::Resource {
                type_name: Some("file".into()),
                title: Some("/a".into()),
            })),
        ));
        catalog.populate_graph().unwrap();
        let json = catalog.to_json();
        let edges = json["edges"].as_array().unwrap();
        assert!(edges.iter().any(|edge| {
            edge["relationship"] == "require"
                && edge["source"] == "File[/a]"
                && edge["target"] == "Service[svc]"
        }));
        let _ = a;
    }

    #[test]
    fn missing_relationship_target_fails() {
        let mut catalog = catalog();
        let index = catalog
            .add("service", "svc", None, ResourceState::Realized, None)
            .unwrap();
        catalog
            .get_mut(index)
            .set(attribute("before", Value::string("File[/nope]")));
        assert!(catalog.populate_graph().is_err());
    }

    #[test]
    fn virtual_resources_are_not_serialized() {
        let mut catalog = catalog();
        catalog
            .add("file", "/visible", None, ResourceState::Realized, None)
            .unwrap();
        catalog
            .add("file", "/hidden", None, ResourceState::Virtualized, None)
            .unwrap();
        let json = catalog.to_json();
        assert_eq!(json["resources"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn metaparameters() {
        assert!(is_metaparameter("before"));
        assert!(is_metaparameter("stage"));
        assert!(!is_metaparameter("ensure"));
    }
}
