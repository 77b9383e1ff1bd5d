//! Compilation target nodes.
//!
//! A node is the host a catalog is compiled for: a set of names derived
//! from its most specific name (`a.b.c` also answers to `a.b` and `a`),
//! its facts, and the environment it compiles against. `compile` runs the
//! whole pipeline and returns the finished catalog.

use crate::catalog::Catalog;
use crate::environment::Environment;
use crate::error::CompilationError;
use crate::eval::{self, EvaluationContext, Evaluator, StackFrame};
use crate::facts::Facts;
use crate::logging::{Level, Logger};
use crate::types::capitalize_type_name;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

pub struct Node {
    logger: Logger,
    /// All names the node answers to, ordered least to most specific.
    names: BTreeSet<String>,
    environment: Arc<Environment>,
    facts: Arc<Facts>,
}

impl Node {
    /// Create a node; its name defaults from the `hostname`/`fqdn` facts
    /// when not given.
    pub fn new(
        logger: Logger,
        name: Option<&str>,
        environment: Arc<Environment>,
        facts: Arc<Facts>,
    ) -> Result<Self, CompilationError> {
        let name = match name {
            Some(name) => name.to_string(),
            None => facts
                .get("fqdn")
                .or_else(|| facts.get("hostname"))
                .and_then(|value| value.as_string().map(str::to_string))
                .unwrap_or_else(|| "localhost".to_string()),
        };

        // Each leading dotted prefix is a name: a.b.c also yields a.b
        // and a.
        let mut names = BTreeSet::new();
        let lowered = name.to_lowercase();
        let mut end = 0;
        for segment in lowered.split('.') {
            if segment.is_empty() {
                continue;
            }
            end += segment.len() + if end == 0 { 0 } else { 1 };
            names.insert(lowered[..end].to_string());
        }
        if names.is_empty() {
            return Err(CompilationError::message(
                "cannot create a node with an empty name.",
            ));
        }

        Ok(Self {
            logger,
            names,
            environment,
            facts,
        })
    }

    /// The most specific name.
    pub fn name(&self) -> &str {
        self.names.iter().next_back().expect("names are non-empty")
    }

    /// Names from most to least specific.
    pub fn each_name(&self) -> impl Iterator<Item = &str> + Clone {
        self.names.iter().rev().map(String::as_str)
    }

    pub fn environment(&self) -> &Arc<Environment> {
        &self.environment
    }

    pub fn facts(&self) -> &Arc<Facts> {
        &self.facts
    }

    /// Compile a catalog for this node. With no explicit manifests, the
    /// environment's initial manifests are evaluated.
    pub fn compile(&self, manifests: &[PathBuf]) -> Result<Catalog, CompilationError> {
        let mut catalog = Catalog::new(self.name(), self.environment.name());

        let result = self.compile_into(&mut catalog, manifests);
        result.map(|()| catalog)
    }

    fn compile_into(
        &self,
        catalog: &mut Catalog,
        manifests: &[PathBuf],
    ) -> Result<(), CompilationError> {
        let mut context = EvaluationContext::new(
            self.environment.clone(),
            self.logger.clone(),
            catalog,
            self.facts.clone(),
        );
        context
            .initialize()
            .map_err(CompilationError::from_evaluation)?;

        // Import the initial manifests (or the explicitly given ones).
        let trees = if manifests.is_empty() {
            self.environment.import_initial_manifests(&self.logger)?
        } else {
            let mut trees = Vec::new();
            for manifest in manifests {
                if manifest.is_dir() {
                    let finder = crate::finder::Finder::new(manifest.clone(), Some("."));
                    for path in finder.each_file(crate::finder::FindKind::Manifest) {
                        trees.push(self.environment.import_manifest(&self.logger, &path)?);
                    }
                } else {
                    trees.push(self.environment.import_manifest(&self.logger, manifest)?);
                }
            }
            trees
        };

        let result = (|| {
            // Evaluate the trees under the main frame.
            context.push_frame(StackFrame::new("<class main>", context.top_scope()))?;
            let evaluation = (|| {
                for tree in &trees {
                    context.logger.emit(
                        Level::Debug,
                        format!("evaluating the syntax tree for '{}'.", tree.path()),
                    );
                    let mut evaluator = Evaluator::new(&mut context, tree.clone());
                    evaluator.evaluate_tree()?;
                }
                Ok(())
            })();
            context.pop_frame();
            evaluation?;

            // Evaluate the matching node definition, if any are defined.
            let definition = self
                .environment
                .find_node_definition(self.each_name())
                .map_err(|e| context.raise(e.message, None))?;
            if let Some((definition, resource_name)) = definition {
                let main = context
                    .catalog_ref()
                    .find("class", "main")
                    .expect("the main class always exists");
                let index = context
                    .catalog()
                    .add(
                        "node",
                        &resource_name,
                        Some(main),
                        crate::catalog::ResourceState::Realized,
                        Some(&crate::ast::AstContext::new(
                            definition.statement.span,
                            definition.tree.clone(),
                        )),
                    )
                    .map_err(|_| context.raise("failed to add the node resource.", None))?;

                context.logger.emit(
                    Level::Debug,
                    format!("evaluating node definition for node '{}'.", self.name()),
                );
                let scope = eval::Scope::child(context.top_scope(), Some(index));
                context.set_node_scope(scope.clone());
                context.push_frame(StackFrame::new(
                    format!("<node {}>", capitalize_type_name(&resource_name)),
                    scope,
                ))?;
                let body = definition.statement.body.clone();
                let evaluation = (|| {
                    let mut evaluator = Evaluator::new(&mut context, definition.tree.clone());
                    evaluator.evaluate_statements(&body)?;
                    Ok(())
                })();
                context.pop_frame();
                evaluation?;
            }

            // Run the deferred-work fixed point and populate the graph.
            eval::finalize(&mut context)?;
            context.catalog().populate_graph()?;
            Ok(())
        })();

        result.map_err(CompilationError::from_evaluation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::MemorySink;

    #[test]
    fn node_names_include_dotted_prefixes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("manifests")).unwrap();
        let logger = Logger::new(MemorySink::new());
        let environment = Environment::create(
            dir.path(),
            crate::environment::Settings::default(),
            &logger,
            None,
        )
        .unwrap();
        let node = Node::new(
            logger,
            Some("Web01.Example.Com"),
            environment,
            Arc::new(Facts::new()),
        )
        .unwrap();
        assert_eq!(node.name(), "web01.example.com");
        let names: Vec<&str> = node.each_name().collect();
        assert_eq!(names, vec!["web01.example.com", "web01.example", "web01"]);
    }

    #[test]
    fn node_name_falls_back_to_facts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("manifests")).unwrap();
        let logger = Logger::new(MemorySink::new());
        let environment = Environment::create(
            dir.path(),
            crate::environment::Settings::default(),
            &logger,
            None,
        )
        .unwrap();
        let mut facts = Facts::new();
        facts.set("hostname", crate::value::Value::string("db01"));
        let node = Node::new(logger, None, environment, Arc::new(facts)).unwrap();
        assert_eq!(node.name(), "db01");
    }
}
