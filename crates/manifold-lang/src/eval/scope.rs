//! Lexical scopes.
//!
//! Scopes form a tree rooted at the top scope, which wraps the node's
//! facts. Variables are write-once per scope; the prior assignment's
//! source context is surfaced on redefinition. Each scope also carries the
//! attribute defaults (`File { mode => ... }`) established within it.

use crate::ast::{AstContext, AttributeOperator};
use crate::catalog::{Attribute, ResourceIndex};
use crate::facts::Facts;
use crate::value::{SharedValue, Value};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

pub type ScopeRef = Rc<RefCell<Scope>>;

/// One default operation recorded by a resource-defaults statement.
#[derive(Debug, Clone)]
pub struct DefaultOperation {
    pub operator: AttributeOperator,
    pub attribute: Attribute,
}

#[derive(Debug)]
pub struct Scope {
    parent: Option<ScopeRef>,
    /// The resource this scope belongs to (class, defined type instance,
    /// or node resource).
    resource: Option<ResourceIndex>,
    variables: HashMap<String, (SharedValue, Option<AstContext>)>,
    /// Attribute defaults keyed by lowercased resource type name.
    defaults: HashMap<String, Vec<DefaultOperation>>,
    /// Facts, on the top scope only.
    facts: Option<Arc<Facts>>,
}

impl Scope {
    /// The top scope over a facts provider.
    pub fn top(facts: Arc<Facts>) -> ScopeRef {
        Rc::new(RefCell::new(Scope {
            parent: None,
            resource: None,
            variables: HashMap::new(),
            defaults: HashMap::new(),
            facts: Some(facts),
        }))
    }

    /// A child scope, optionally owned by a resource.
    pub fn child(parent: ScopeRef, resource: Option<ResourceIndex>) -> ScopeRef {
        Rc::new(RefCell::new(Scope {
            parent: Some(parent),
            resource,
            variables: HashMap::new(),
            defaults: HashMap::new(),
            facts: None,
        }))
    }

    pub fn parent(&self) -> Option<&ScopeRef> {
        self.parent.as_ref()
    }

    pub fn resource(&self) -> Option<ResourceIndex> {
        self.resource
    }

    pub fn set_resource(&mut self, resource: ResourceIndex) {
        self.resource = Some(resource);
    }

    /// Set a variable; returns the previous assignment's context on
    /// failure.
    pub fn set(
        &mut self,
        name: impl Into<String>,
        value: SharedValue,
        context: Option<AstContext>,
    ) -> Result<(), Option<AstContext>> {
        let name = name.into();
        if let Some((_, previous)) = self.variables.get(&name) {
            return Err(previous.clone());
        }
        self.variables.insert(name, (value, context));
        Ok(())
    }

    /// Get a variable from this scope only (no parent walk).
    pub fn get_local(&self, name: &str) -> Option<SharedValue> {
        if let Some((value, _)) = self.variables.get(name) {
            return Some(value.clone());
        }
        // The top scope exposes facts as variables.
        if let Some(facts) = &self.facts {
            if name == "facts" {
                return Some(Arc::new(Value::Hash(facts.to_hash())));
            }
            if let Some(value) = facts.get(name) {
                return Some(Arc::new(value.clone()));
            }
        }
        None
    }

    /// Record a defaults operation for a resource type.
    pub fn add_default(&mut self, type_name: &str, operation: DefaultOperation) {
        self.defaults
            .entry(type_name.to_lowercase())
            .or_default()
            .push(operation);
    }

    /// This scope's defaults for a type (no parent walk).
    pub fn local_defaults(&self, type_name: &str) -> Option<&Vec<DefaultOperation>> {
        self.defaults.get(type_name)
    }
}

/// Walk the scope chain for a variable.
pub fn lookup(scope: &ScopeRef, name: &str) -> Option<SharedValue> {
    let mut current = scope.clone();
    loop {
        if let Some(value) = current.borrow().get_local(name) {
            return Some(value);
        }
        let parent = current.borrow().parent().cloned();
        match parent {
            Some(parent) => current = parent,
            None => return None,
        }
    }
}

/// Collect the defaults for a resource type, nearest scope first; a
/// nearer scope's default for an attribute wins.
pub fn collect_defaults(scope: &ScopeRef, type_name: &str) -> Vec<DefaultOperation> {
    let type_name = type_name.to_lowercase();
    let mut seen: Vec<String> = Vec::new();
    let mut result = Vec::new();
    let mut current = scope.clone();
    loop {
        {
            let borrowed = current.borrow();
            if let Some(operations) = borrowed.local_defaults(&type_name) {
                for operation in operations {
                    if seen.contains(&operation.attribute.name) {
                        continue;
                    }
                    seen.push(operation.attribute.name.clone());
                    result.push(operation.clone());
                }
            }
        }
        let parent = current.borrow().parent().cloned();
        match parent {
            Some(parent) => current = parent,
            None => return result,
        }
    }
}

/// The resource owning the nearest enclosing scope with one.
pub fn nearest_resource(scope: &ScopeRef) -> Option<ResourceIndex> {
    let mut current = scope.clone();
    loop {
        if let Some(resource) = current.borrow().resource() {
            return Some(resource);
        }
        let parent = current.borrow().parent().cloned();
        match parent {
            Some(parent) => current = parent,
            None => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn top() -> ScopeRef {
        let mut facts = Facts::new();
        facts.set("hostname", Value::string("web01"));
        Scope::top(Arc::new(facts))
    }

    #[test]
    fn write_once_semantics() {
        let scope = top();
        assert!(scope
            .borrow_mut()
            .set("x", Arc::new(Value::Integer(1)), None)
            .is_ok());
        assert!(scope
            .borrow_mut()
            .set("x", Arc::new(Value::Integer(2)), None)
            .is_err());
    }

    #[test]
    fn lookup_walks_parents_and_facts() {
        let top = top();
        top.borrow_mut()
            .set("site", Arc::new(Value::string("primary")), None)
            .unwrap();
        let child = Scope::child(top.clone(), None);
        let grandchild = Scope::child(child, None);
        assert_eq!(
            lookup(&grandchild, "site").unwrap().as_string(),
            Some("primary")
        );
        assert_eq!(
            lookup(&grandchild, "hostname").unwrap().as_string(),
            Some("web01")
        );
        assert!(lookup(&grandchild, "missing").is_none());
        // $facts is synthesized at the top scope.
        assert!(lookup(&grandchild, "facts").unwrap().as_hash().is_some());
    }

    #[test]
    fn shadowing_in_child_scope() {
        let top = top();
        top.borrow_mut()
            .set("x", Arc::new(Value::Integer(1)), None)
            .unwrap();
        let child = Scope::child(top, None);
        child
            .borrow_mut()
            .set("x", Arc::new(Value::Integer(2)), None)
            .unwrap();
        assert_eq!(lookup(&child, "x").unwrap().as_integer(), Some(2));
    }

    #[test]
    fn nearest_default_wins() {
        let top = top();
        let attribute = |value: &str| {
            Attribute::new("mode", Arc::new(Value::string(value)), None, None)
        };
        top.borrow_mut().add_default(
            "file",
            DefaultOperation {
                operator: AttributeOperator::Assign,
                attribute: attribute("0644"),
            },
        );
        let child = Scope::child(top, None);
        child.borrow_mut().add_default(
            "file",
            DefaultOperation {
                operator: AttributeOperator::Assign,
                attribute: attribute("0600"),
            },
        );
        let defaults = collect_defaults(&child, "File");
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults[0].attribute.value.as_string(), Some("0600"));
    }
}
