//! Collectors: deferred realization of virtual and exported resources.
//!
//! Two kinds exist. Query collectors (`Type <| query |>` and
//! `Type <<| query |>>`) realize every matching resource of their type
//! each time they run. List collectors are created by `realize` for
//! explicit references and report an error at finalization for references
//! that never appeared in the catalog.

use super::context::EvaluationContext;
use super::scope::ScopeRef;
use crate::ast::{AstContext, AttributeOperator, CollectorQuery, SyntaxTree};
use crate::catalog::{Attribute, ResourceIndex};
use crate::error::EvaluationError;
use crate::types::capitalize_type_name;
use std::sync::Arc;

/// A deferred collector.
#[derive(Debug)]
pub enum Collector {
    Query(QueryCollector),
    List(ListCollector),
}

#[derive(Debug)]
pub struct QueryCollector {
    /// Lowercased resource type to collect.
    pub type_name: String,
    /// Whether this collects exported resources.
    pub exported: bool,
    pub query: Option<CollectorQuery>,
    /// Scope for evaluating query values.
    pub scope: ScopeRef,
    pub tree: Arc<SyntaxTree>,
    pub context: AstContext,
    /// Attribute operations applied to collected resources (collector
    /// override blocks are not supported; used by exported attributes).
    pub attributes: Vec<(AttributeOperator, Attribute)>,
    /// Resources collected so far.
    pub resources: Vec<ResourceIndex>,
}

#[derive(Debug)]
pub struct ListCollector {
    /// `(lowercased type name, title)` references to realize.
    pub references: Vec<(String, String)>,
    pub context: AstContext,
    /// References satisfied so far.
    pub found: Vec<bool>,
}

impl Collector {
    /// Run one collection pass.
    pub fn collect(&mut self, context: &mut EvaluationContext<'_>) -> Result<(), EvaluationError> {
        match self {
            Collector::Query(query) => query.collect(context),
            Collector::List(list) => list.collect(context),
        }
    }

    /// Report references that never appeared; run after the finalization
    /// loop converges.
    pub fn detect_uncollected(
        &self,
        context: &EvaluationContext<'_>,
    ) -> Result<(), EvaluationError> {
        match self {
            Collector::Query(_) => Ok(()),
            Collector::List(list) => list.detect_uncollected(context),
        }
    }
}

impl QueryCollector {
    fn collect(&mut self, context: &mut EvaluationContext<'_>) -> Result<(), EvaluationError> {
        // Gather eligible resources first; evaluating queries and
        // realizing both need the context.
        let candidates: Vec<ResourceIndex> = context
            .catalog_ref()
            .resources()
            .filter(|(index, resource)| {
                if resource.type_name() != self.type_name {
                    return false;
                }
                if self.exported {
                    resource.is_exported() || self.resources.contains(index)
                } else {
                    !resource.is_exported()
                }
            })
            .map(|(index, _)| index)
            .collect();

        let mut matches = Vec::new();
        for index in candidates {
            let matched = match &self.query {
                None => true,
                Some(query) => self.matches(context, index, query)?,
            };
            if matched {
                matches.push(index);
            }
        }

        for index in matches {
            let (type_name, title) = {
                let resource = context.catalog_ref().get(index);
                (resource.type_name().to_string(), resource.title().to_string())
            };
            context.catalog().realize(index);
            context.evaluate_overrides(&type_name, &title)?;
            let resource = context.catalog().get_mut(index);
            for (operator, attribute) in &self.attributes {
                match operator {
                    AttributeOperator::Assign => resource.set(attribute.clone()),
                    AttributeOperator::Append => resource.append(attribute.clone()),
                }
            }
            if !self.resources.contains(&index) {
                self.resources.push(index);
            }
        }
        Ok(())
    }

    fn matches(
        &self,
        context: &mut EvaluationContext<'_>,
        index: ResourceIndex,
        query: &CollectorQuery,
    ) -> Result<bool, EvaluationError> {
        match query {
            CollectorQuery::And(left, right) => Ok(self.matches(context, index, left)?
                && self.matches(context, index, right)?),
            CollectorQuery::Or(left, right) => Ok(self.matches(context, index, left)?
                || self.matches(context, index, right)?),
            CollectorQuery::Attribute {
                name,
                equals,
                value,
                ..
            } => {
                let expected = super::evaluator::evaluate_in_scope(
                    context,
                    self.tree.clone(),
                    self.scope.clone(),
                    value,
                )?;
                let resource = context.catalog_ref().get(index);
                let matched = match name.as_str() {
                    "title" => super::operators::values_equal(
                        &crate::value::Value::string(resource.title()),
                        &expected,
                    ),
                    "tag" => match expected.as_string() {
                        Some(tag) => resource.tags().iter().any(|t| t == tag),
                        None => false,
                    },
                    attribute => match resource.get(attribute) {
                        Some(attribute) => {
                            super::operators::values_equal(&attribute.value, &expected)
                        }
                        None => false,
                    },
                };
                Ok(if *equals { matched } else { !matched })
            }
        }
    }
}

impl ListCollector {
    pub fn new(references: Vec<(String, String)>, context: AstContext) -> Self {
        let found = vec![false; references.len()];
        Self {
            references,
            context,
            found,
        }
    }

    fn collect(&mut self, context: &mut EvaluationContext<'_>) -> Result<(), EvaluationError> {
        for (i, (type_name, title)) in self.references.iter().enumerate() {
            if self.found[i] {
                continue;
            }
            if let Some(index) = context.catalog_ref().find(type_name, title) {
                context.catalog().realize(index);
                context.evaluate_overrides(type_name, title)?;
                self.found[i] = true;
            }
        }
        Ok(())
    }

    fn detect_uncollected(&self, context: &EvaluationContext<'_>) -> Result<(), EvaluationError> {
        for (i, (type_name, title)) in self.references.iter().enumerate() {
            if !self.found[i] {
                return Err(context.raise(
                    format!(
                        "cannot realize resource {}[{}]: the resource does not exist in the catalog.",
                        capitalize_type_name(type_name),
                        title
                    ),
                    Some(self.context.clone()),
                ));
            }
        }
        Ok(())
    }
}
