//! The evaluation context: scopes, stacks, deferred work, and the catalog
//! handle for one compilation.

use super::collector::Collector;
use super::frame::StackFrame;
use super::scope::{self, Scope, ScopeRef};
use crate::ast::{AstContext, AttributeOperator};
use crate::catalog::{Attribute, Catalog, ResourceIndex, ResourceState};
use crate::environment::Environment;
use crate::error::{BacktraceFrame, EvaluationError};
use crate::facts::Facts;
use crate::foundation::line_info;
use crate::logging::{Level, LogEntry, Logger};
use crate::registry::DefinedTypeDefinition;
use crate::types::AliasType;
use crate::value::SharedValue;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::sync::Arc;

/// Maximum language call stack depth.
pub const MAX_STACK_DEPTH: usize = 1000;

/// A defined type instance awaiting evaluation at finalization.
#[derive(Debug, Clone)]
pub struct DeclaredDefinedType {
    pub resource: ResourceIndex,
    pub definition: DefinedTypeDefinition,
}

/// A resource override awaiting its target.
#[derive(Debug, Clone)]
pub struct PendingOverride {
    pub type_name: String,
    pub title: String,
    pub context: AstContext,
    pub operations: Vec<(AttributeOperator, Attribute)>,
    /// The scope the override was written in; `None` for overrides applied
    /// by collectors.
    pub scope: Option<ScopeRef>,
}

/// A relationship recorded by an edge operator, evaluated at
/// finalization.
#[derive(Debug, Clone)]
pub struct PendingRelationship {
    pub relationship: crate::catalog::Relationship,
    pub source: crate::value::Value,
    pub source_context: AstContext,
    pub target: crate::value::Value,
    pub target_context: AstContext,
}

/// The evaluation context.
pub struct EvaluationContext<'a> {
    pub environment: Arc<Environment>,
    pub logger: Logger,
    catalog: &'a mut Catalog,
    top_scope: ScopeRef,
    node_scope: Option<ScopeRef>,
    named_scopes: HashMap<String, ScopeRef>,
    match_stack: Vec<Option<Rc<Vec<SharedValue>>>>,
    call_stack: Vec<StackFrame>,
    declared_classes: HashSet<String>,
    pub(super) defined_types: Vec<DeclaredDefinedType>,
    overrides: HashMap<(String, String), Vec<PendingOverride>>,
    pub(super) relationships: Vec<PendingRelationship>,
    pub(super) collectors: Vec<Rc<RefCell<Collector>>>,
    resolved_aliases: HashMap<String, AliasType>,
}

impl<'a> EvaluationContext<'a> {
    pub fn new(
        environment: Arc<Environment>,
        logger: Logger,
        catalog: &'a mut Catalog,
        facts: Arc<Facts>,
    ) -> Self {
        Self {
            environment,
            logger,
            catalog,
            top_scope: Scope::top(facts),
            node_scope: None,
            named_scopes: HashMap::new(),
            match_stack: Vec::new(),
            call_stack: Vec::new(),
            declared_classes: HashSet::new(),
            defined_types: Vec::new(),
            overrides: HashMap::new(),
            relationships: Vec::new(),
            collectors: Vec::new(),
            resolved_aliases: HashMap::new(),
        }
    }

    pub fn catalog(&mut self) -> &mut Catalog {
        self.catalog
    }

    pub fn catalog_ref(&self) -> &Catalog {
        self.catalog
    }

    // ---- scopes ----

    pub fn top_scope(&self) -> ScopeRef {
        self.top_scope.clone()
    }

    pub fn node_scope(&self) -> Option<ScopeRef> {
        self.node_scope.clone()
    }

    pub fn set_node_scope(&mut self, scope: ScopeRef) {
        self.node_scope = Some(scope);
    }

    pub fn clear_node_scope(&mut self) {
        self.node_scope = None;
    }

    /// The node scope if there is one, otherwise the top scope.
    pub fn node_or_top(&self) -> ScopeRef {
        self.node_scope.clone().unwrap_or_else(|| self.top_scope())
    }

    /// The scope of the innermost stack frame, or the top scope.
    pub fn current_scope(&self) -> ScopeRef {
        self.call_stack
            .last()
            .map(|frame| frame.scope.clone())
            .unwrap_or_else(|| self.top_scope())
    }

    /// Register a class scope by name.
    pub fn add_scope(&mut self, name: impl Into<String>, scope: ScopeRef) {
        self.named_scopes.insert(name.into(), scope);
    }

    pub fn find_scope(&self, name: &str) -> Option<ScopeRef> {
        if name.is_empty() {
            return Some(self.top_scope());
        }
        self.named_scopes.get(name).cloned()
    }

    // ---- match scopes ----

    pub fn push_match_scope(&mut self) {
        self.match_stack.push(None);
    }

    pub fn pop_match_scope(&mut self) {
        self.match_stack.pop();
    }

    /// Set regex capture groups into the active match scope. A scope that
    /// has been captured by a closure is replaced, not mutated, so the
    /// closure keeps its snapshot.
    pub fn set_matches(&mut self, captures: Vec<String>) {
        let Some(slot) = self.match_stack.last_mut() else {
            return;
        };
        let values: Vec<SharedValue> = captures
            .into_iter()
            .map(|capture| Arc::new(crate::value::Value::String(capture)))
            .collect();
        match slot {
            Some(existing) if Rc::strong_count(existing) == 1 => {
                *Rc::get_mut(existing).expect("sole owner") = values;
            }
            _ => *slot = Some(Rc::new(values)),
        }
    }

    /// Look up a match variable by index, walking the match scope stack.
    pub fn lookup_match(&self, index: usize) -> Option<SharedValue> {
        for slot in self.match_stack.iter().rev() {
            if let Some(matches) = slot {
                return matches.get(index).cloned();
            }
        }
        None
    }

    /// Snapshot the current match scope for a closure.
    pub fn snapshot_matches(&self) -> Option<Rc<Vec<SharedValue>>> {
        self.match_stack.iter().rev().flatten().next().cloned()
    }

    /// Push a match scope seeded with a closure's snapshot.
    pub fn push_match_snapshot(&mut self, snapshot: Option<Rc<Vec<SharedValue>>>) {
        self.match_stack.push(snapshot);
    }

    // ---- call stack ----

    pub fn push_frame(&mut self, frame: StackFrame) -> Result<(), EvaluationError> {
        if self.call_stack.len() >= MAX_STACK_DEPTH {
            return Err(EvaluationError::new(
                format!("cannot call '{}': maximum stack depth reached.", frame.name),
                self.backtrace(),
            ));
        }
        self.call_stack.push(frame);
        self.push_match_scope();
        Ok(())
    }

    pub fn pop_frame(&mut self) {
        self.pop_match_scope();
        self.call_stack.pop();
    }

    /// Update the innermost frame's current AST context.
    pub fn set_current_context(&mut self, context: AstContext) {
        if let Some(frame) = self.call_stack.last_mut() {
            frame.context = Some(context);
        }
    }

    pub fn backtrace(&self) -> Vec<BacktraceFrame> {
        self.call_stack
            .iter()
            .rev()
            .map(StackFrame::to_backtrace_frame)
            .collect()
    }

    pub fn call_depth(&self) -> usize {
        self.call_stack.len()
    }

    // ---- diagnostics ----

    /// Build an evaluation error at a context with the current backtrace.
    pub fn raise(&self, message: impl Into<String>, context: Option<AstContext>) -> EvaluationError {
        match context {
            Some(context) => EvaluationError::with_context(message, context, self.backtrace()),
            None => EvaluationError::new(message, self.backtrace()),
        }
    }

    /// Log a message with optional source context.
    pub fn log(&self, level: Level, message: impl Into<String>, context: Option<&AstContext>) {
        if !self.logger.would_log(level) {
            return;
        }
        let message = message.into();
        match context {
            Some(context) => {
                let info = line_info(
                    context.tree.source(),
                    context.span.begin.offset,
                    context.span.len(),
                );
                self.logger.log(LogEntry {
                    level,
                    message,
                    path: Some(context.tree.path().to_string()),
                    line: Some(context.span.begin.line),
                    column: Some(info.column),
                    text: Some(info.text),
                });
            }
            None => self.logger.log(LogEntry::bare(level, message)),
        }
    }

    // ---- classes and aliases ----

    /// Record that a class's body has been evaluated; returns false if it
    /// already was.
    pub fn mark_class_declared(&mut self, name: &str) -> bool {
        self.declared_classes.insert(name.to_string())
    }

    /// The shared alias slot for a type alias name, created on first use.
    pub fn alias_slot(&mut self, display_name: &str, normalized: &str) -> (AliasType, bool) {
        if let Some(existing) = self.resolved_aliases.get(normalized) {
            return (existing.clone(), false);
        }
        let alias = AliasType::new(display_name);
        self.resolved_aliases
            .insert(normalized.to_string(), alias.clone());
        (alias, true)
    }

    // ---- deferred work ----

    pub fn add_defined_type(&mut self, declared: DeclaredDefinedType) {
        self.defined_types.push(declared);
    }

    pub fn add_collector(&mut self, collector: Rc<RefCell<Collector>>) {
        self.collectors.push(collector);
    }

    pub fn add_relationship(&mut self, relationship: PendingRelationship) {
        self.relationships.push(relationship);
    }

    /// Add a resource override. If the target already exists, pending and
    /// new overrides for it evaluate immediately; otherwise it is indexed
    /// for the target's creation.
    pub fn add_override(&mut self, pending: PendingOverride) -> Result<(), EvaluationError> {
        let key = (pending.type_name.to_lowercase(), pending.title.clone());
        if self.catalog.find(&key.0, &key.1).is_none() {
            self.overrides.entry(key).or_default().push(pending);
            return Ok(());
        }
        self.evaluate_overrides(&key.0, &key.1)?;
        self.apply_override(pending)
    }

    /// Apply any pending overrides for a newly created resource.
    pub fn evaluate_overrides(
        &mut self,
        type_name: &str,
        title: &str,
    ) -> Result<(), EvaluationError> {
        let key = (type_name.to_lowercase(), title.to_string());
        let Some(pending) = self.overrides.remove(&key) else {
            return Ok(());
        };
        for entry in pending {
            self.apply_override(entry)?;
        }
        Ok(())
    }

    fn apply_override(&mut self, pending: PendingOverride) -> Result<(), EvaluationError> {
        let Some(index) = self.catalog.find(&pending.type_name, &pending.title) else {
            return Err(self.raise(
                format!(
                    "resource {}[{}] does not exist in the catalog.",
                    crate::types::capitalize_type_name(&pending.type_name),
                    pending.title
                ),
                Some(pending.context.clone()),
            ));
        };

        // Overrides from a scope that does not inherit the resource's
        // container cannot modify attributes that are already set.
        let mut allowed = true;
        if let Some(override_scope) = &pending.scope {
            allowed = false;
            let container = self.catalog.get(index).container();
            let mut current = override_scope.borrow().parent().cloned();
            while let Some(scope) = current {
                let (resource, parent) = {
                    let borrowed = scope.borrow();
                    (borrowed.resource(), borrowed.parent().cloned())
                };
                if parent.is_some() {
                    if resource.is_some() && resource == container {
                        allowed = true;
                        break;
                    }
                }
                current = parent;
            }
        }

        if !allowed {
            for (operator, attribute) in &pending.operations {
                let Some(previous) = self.catalog.get(index).get(&attribute.name) else {
                    continue;
                };
                let action = match operator {
                    AttributeOperator::Assign if attribute.value.is_undef() => "remove",
                    AttributeOperator::Assign => "set",
                    AttributeOperator::Append => "append",
                };
                let location = previous
                    .name_context
                    .as_ref()
                    .map(|context| {
                        format!(
                            " that was previously set at {}:{}",
                            context.tree.path(),
                            context.span.begin.line
                        )
                    })
                    .unwrap_or_default();
                let reference = self.catalog.get(index).reference();
                return Err(self.raise(
                    format!(
                        "cannot {} attribute '{}' from resource {}{}.",
                        action, attribute.name, reference, location
                    ),
                    attribute.name_context.clone(),
                ));
            }
        }

        let resource = self.catalog.get_mut(index);
        for (operator, attribute) in pending.operations {
            match operator {
                AttributeOperator::Assign => resource.set(attribute),
                AttributeOperator::Append => resource.append(attribute),
            }
        }
        Ok(())
    }

    /// Apply overrides whose targets exist; drop the rest silently.
    pub(super) fn finish_overrides(&mut self) -> Result<(), EvaluationError> {
        let keys: Vec<(String, String)> = self.overrides.keys().cloned().collect();
        for key in keys {
            if self.catalog.find(&key.0, &key.1).is_some() {
                self.evaluate_overrides(&key.0, &key.1)?;
            } else {
                self.overrides.remove(&key);
            }
        }
        Ok(())
    }

    /// Create the implicit skeleton: `Stage[main]`, `Class[settings]` (with
    /// the environment settings in scope), and `Class[main]` owning the top
    /// scope.
    pub fn initialize(&mut self) -> Result<(), EvaluationError> {
        let stage = self
            .catalog
            .add("stage", "main", None, ResourceState::Realized, None)
            .map_err(|_| EvaluationError::new("expected main stage to not be present.", vec![]))?;

        let settings = self
            .catalog
            .add("class", "settings", Some(stage), ResourceState::Realized, None)
            .map_err(|_| {
                EvaluationError::new("expected settings class to not be present.", vec![])
            })?;
        let settings_scope = Scope::child(self.top_scope(), Some(settings));
        for (name, value) in self.environment.settings().to_values() {
            let _ = settings_scope
                .borrow_mut()
                .set(name, Arc::new(value), None);
        }
        self.add_scope("settings", settings_scope);

        let main = self
            .catalog
            .add("class", "main", Some(stage), ResourceState::Realized, None)
            .map_err(|_| EvaluationError::new("expected main class to not be present.", vec![]))?;
        self.top_scope.borrow_mut().set_resource(main);
        self.add_scope("", self.top_scope());
        self.add_scope("main", self.top_scope());
        Ok(())
    }

    /// Look up a variable by (possibly qualified) name.
    pub fn lookup_variable(
        &mut self,
        name: &str,
        context: Option<&AstContext>,
        warn: bool,
    ) -> Option<SharedValue> {
        // Match variables are all digits.
        if !name.is_empty() && name.chars().all(|c| c.is_ascii_digit()) {
            return self.lookup_match(name.parse().ok()?);
        }

        let Some(position) = name.rfind("::") else {
            return scope::lookup(&self.current_scope(), name);
        };

        // Split into a namespace and variable name; strip a leading `::`.
        // `$::x` has an empty namespace and resolves in the top scope.
        let global = name.starts_with("::");
        let namespace_start = if global { 2 } else { 0 };
        let namespace = if position <= namespace_start {
            String::new()
        } else {
            crate::registry::normalize(&name[namespace_start..position])
        };
        let variable = &name[position + 2..];

        if let Some(scope) = self.find_scope(&namespace) {
            return scope.borrow().get_local(variable);
        }

        if warn {
            let message = match self.environment.find_class(&self.logger, &namespace) {
                Ok(Some(_)) => Some(format!(
                    "could not look up variable ${} because class '{}' has not been declared.",
                    name, namespace
                )),
                Ok(None) => Some(format!(
                    "could not look up variable ${} because class '{}' is not defined.",
                    name, namespace
                )),
                Err(_) => None,
            };
            if let Some(message) = message {
                self.log(Level::Warning, message, context);
            }
        }
        None
    }
}
