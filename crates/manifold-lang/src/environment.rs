//! Environments: a named root of modules, manifests, and configuration.
//!
//! # Design
//!
//! - One mutex guards the registry and parse cache for the environment's
//!   lifetime; find/import operations hold it for their full duration
//!   because any other compilation may insert concurrently
//! - Definitions are resolved lazily: a lookup miss maps the name to a
//!   module file, imports it (parse, validate, scan), and retries the
//!   registry
//! - Functions and resource types additionally fall back to the remote
//!   extension channel when the environment was created with one

use crate::ast::SyntaxTree;
use crate::error::CompilationError;
use crate::extension::{Described, DescribeKind, ExtensionChannel, FunctionDescriptor};
use crate::finder::{is_valid_module_name, FindKind, Finder};
use crate::logging::{Level, LogEntry, Logger};
use crate::parser;
use crate::registry::{
    ClassDefinition, DefinedTypeDefinition, FunctionDefinition, NodeDefinition, Registry,
    ResourceTypeDefinition, TypeAliasDefinition,
};
use crate::scanner::Scanner;
use crate::value::Value;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Compiler settings for an environment.
#[derive(Debug, Clone)]
pub struct Settings {
    /// The environment name.
    pub environment: String,
    /// Path-separated list of module directories, relative to the
    /// environment root unless absolute.
    pub module_path: String,
    /// The initial-manifest file or directory, relative to the root.
    pub manifest: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            environment: "production".to_string(),
            module_path: "modules".to_string(),
            manifest: "manifests".to_string(),
        }
    }
}

impl Settings {
    /// Read `environment.conf` (simple `key = value` lines) over these
    /// settings; unrecognized keys are ignored.
    fn load_configuration(&mut self, directory: &Path, logger: &Logger) {
        let path = directory.join("environment.conf");
        let Ok(content) = std::fs::read_to_string(&path) else {
            logger.emit(
                Level::Debug,
                format!(
                    "environment configuration file '{}' was not found.",
                    path.display()
                ),
            );
            return;
        };
        logger.emit(
            Level::Debug,
            format!("loading environment settings from '{}'.", path.display()),
        );
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim().trim_matches('"').to_string();
            match key {
                "modulepath" => {
                    logger.emit(
                        Level::Debug,
                        format!("using module path '{}' from environment configuration file.", value),
                    );
                    self.module_path = value;
                }
                "manifest" => {
                    logger.emit(
                        Level::Debug,
                        format!("using main manifest '{}' from environment configuration file.", value),
                    );
                    self.manifest = value;
                }
                other => {
                    logger.emit(
                        Level::Debug,
                        format!("ignoring unrecognized environment setting '{}'.", other),
                    );
                }
            }
        }
    }

    /// The settings as values, for the settings scope.
    pub fn to_values(&self) -> Vec<(String, Value)> {
        vec![
            ("environment".to_string(), Value::string(self.environment.clone())),
            ("modulepath".to_string(), Value::string(self.module_path.clone())),
            ("manifest".to_string(), Value::string(self.manifest.clone())),
        ]
    }
}

/// A module: a named directory of manifests, functions, types, and files.
#[derive(Debug)]
pub struct Module {
    name: String,
    finder: Finder,
}

impl Module {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn directory(&self) -> &Path {
        self.finder.directory()
    }

    pub fn find_by_name(&self, kind: FindKind, name: &str) -> Option<PathBuf> {
        self.finder.find_by_name(kind, name)
    }

    pub fn find_by_path(&self, kind: FindKind, relative: &str) -> Option<PathBuf> {
        self.finder.find_by_path(kind, relative)
    }
}

/// A located function: defined in the language or described remotely.
#[derive(Debug, Clone)]
pub enum FoundFunction {
    Local(FunctionDefinition),
    Remote(FunctionDescriptor),
}

#[derive(Debug, Default)]
struct State {
    registry: Registry,
    parsed: HashMap<PathBuf, Arc<SyntaxTree>>,
    initial_manifests: Vec<Arc<SyntaxTree>>,
    initial_imported: bool,
}

/// A compilation environment.
pub struct Environment {
    name: String,
    directory: PathBuf,
    settings: Settings,
    finder: Finder,
    modules: Vec<Module>,
    module_index: HashMap<String, usize>,
    channel: Option<Arc<dyn ExtensionChannel>>,
    state: Mutex<State>,
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("name", &self.name)
            .field("directory", &self.directory)
            .finish_non_exhaustive()
    }
}

impl Environment {
    /// Create an environment rooted at a directory.
    pub fn create(
        directory: impl Into<PathBuf>,
        mut settings: Settings,
        logger: &Logger,
        channel: Option<Arc<dyn ExtensionChannel>>,
    ) -> Result<Arc<Environment>, CompilationError> {
        let directory = directory.into();
        if settings.environment.is_empty() {
            return Err(CompilationError::message(
                "cannot create an environment with an empty name.",
            ));
        }
        if !directory.is_dir() {
            return Err(CompilationError::message(format!(
                "environment directory '{}' does not exist.",
                directory.display()
            )));
        }

        settings.load_configuration(&directory, logger);

        let mut environment = Environment {
            name: settings.environment.clone(),
            finder: Finder::new(directory.clone(), Some(&settings.manifest)),
            directory,
            settings,
            modules: Vec::new(),
            module_index: HashMap::new(),
            channel,
            state: Mutex::new(State {
                registry: Registry::new(),
                ..State::default()
            }),
        };
        environment.add_modules(logger);
        Ok(Arc::new(environment))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn find_module(&self, name: &str) -> Option<&Module> {
        self.module_index.get(name).map(|i| &self.modules[*i])
    }

    fn add_modules(&mut self, logger: &Logger) {
        let module_path = self.settings.module_path.clone();
        logger.emit(
            Level::Debug,
            format!("searching for modules using module path '{}'.", module_path),
        );
        for entry in module_path.split(':') {
            if entry.is_empty() {
                continue;
            }
            let path = if Path::new(entry).is_absolute() {
                PathBuf::from(entry)
            } else {
                self.directory.join(entry)
            };
            if !path.is_dir() {
                logger.emit(
                    Level::Debug,
                    format!(
                        "skipping module directory '{}' because it is not a directory.",
                        path.display()
                    ),
                );
                continue;
            }
            self.add_modules_from(&path, logger);
        }
    }

    fn add_modules_from(&mut self, directory: &Path, logger: &Logger) {
        let Ok(entries) = std::fs::read_dir(directory) else {
            return;
        };
        let mut candidates: Vec<(PathBuf, String)> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                (entry.path(), name)
            })
            .collect();
        candidates.sort_by(|a, b| a.1.cmp(&b.1));

        for (path, name) in candidates {
            if name == "lib" {
                logger.emit(
                    Level::Warning,
                    format!(
                        "found module named 'lib' at '{}': this may indicate the module search path is incorrect.",
                        path.display()
                    ),
                );
                continue;
            }
            if !is_valid_module_name(&name) {
                logger.emit(
                    Level::Warning,
                    format!(
                        "found module with invalid name '{}' at '{}': module will be ignored.",
                        name,
                        path.display()
                    ),
                );
                continue;
            }
            if let Some(existing) = self.find_module(&name) {
                logger.emit(
                    Level::Warning,
                    format!(
                        "module '{}' at '{}' conflicts with existing module at '{}' and will be ignored.",
                        name,
                        path.display(),
                        existing.directory().display()
                    ),
                );
                continue;
            }
            logger.emit(
                Level::Debug,
                format!("found module '{}' at '{}'.", name, path.display()),
            );
            self.modules.push(Module {
                name: name.clone(),
                finder: Finder::new(path, None),
            });
            self.module_index.insert(name, self.modules.len() - 1);
        }
    }

    /// Import every manifest under the environment's manifest root, in
    /// deterministic order; idempotent.
    pub fn import_initial_manifests(
        &self,
        logger: &Logger,
    ) -> Result<Vec<Arc<SyntaxTree>>, CompilationError> {
        let mut state = self.state.lock();
        if state.initial_imported {
            return Ok(state.initial_manifests.clone());
        }
        state.initial_imported = true;
        for path in self.finder.each_file(FindKind::Manifest) {
            let tree = self.import(&mut state, logger, &path)?;
            state.initial_manifests.push(tree);
        }
        Ok(state.initial_manifests.clone())
    }

    /// Import one manifest by path.
    pub fn import_manifest(
        &self,
        logger: &Logger,
        path: &Path,
    ) -> Result<Arc<SyntaxTree>, CompilationError> {
        let mut state = self.state.lock();
        self.import(&mut state, logger, path)
    }

    /// Parse, validate, and scan in-memory source; if any definition was
    /// registered, the tree is retained as an initial manifest.
    pub fn import_source(
        &self,
        logger: &Logger,
        source: &str,
        path: &str,
    ) -> Result<Arc<SyntaxTree>, CompilationError> {
        let mut state = self.state.lock();
        let parsed = parser::parse(path, source)
            .map_err(|error| CompilationError::from_parse(error, path, source))?;
        self.report_warnings(logger, path, source, &parsed.warnings);
        let tree = Arc::new(parsed.tree);
        let mut scanner = Scanner::new(logger, &mut state.registry);
        let registered = scanner
            .scan(&tree)
            .map_err(|error| CompilationError::from_parse(error, path, source))?;
        if registered {
            state.initial_manifests.push(tree.clone());
        }
        Ok(tree)
    }

    fn report_warnings(
        &self,
        logger: &Logger,
        path: &str,
        source: &str,
        warnings: &[crate::lexer::LexerWarning],
    ) {
        for warning in warnings {
            let info = crate::foundation::line_info(source, warning.position.offset, 1);
            logger.log(LogEntry {
                level: Level::Warning,
                message: warning.message.clone(),
                path: Some(path.to_string()),
                line: Some(warning.position.line),
                column: Some(info.column),
                text: Some(info.text),
            });
        }
    }

    fn import(
        &self,
        state: &mut State,
        logger: &Logger,
        path: &Path,
    ) -> Result<Arc<SyntaxTree>, CompilationError> {
        if let Some(tree) = state.parsed.get(path) {
            logger.emit(
                Level::Debug,
                format!(
                    "using cached syntax tree for '{}' in environment '{}'.",
                    path.display(),
                    self.name
                ),
            );
            return Ok(tree.clone());
        }

        logger.emit(
            Level::Debug,
            format!("importing '{}' into environment '{}'.", path.display(), self.name),
        );
        let display = path.to_string_lossy().to_string();
        let source = std::fs::read_to_string(path).map_err(|e| {
            CompilationError::message(format!("cannot read file '{}': {}.", display, e))
        })?;
        let parsed = parser::parse(&display, &source)
            .map_err(|error| CompilationError::from_parse(error, &display, &source))?;
        self.report_warnings(logger, &display, &source, &parsed.warnings);
        let tree = Arc::new(parsed.tree);
        state.parsed.insert(path.to_path_buf(), tree.clone());

        let mut scanner = Scanner::new(logger, &mut state.registry);
        scanner
            .scan(&tree)
            .map_err(|error| CompilationError::from_parse(error, &display, &source))?;
        Ok(tree)
    }

    /// Map a qualified name to a defining file: `foo::bar` resolves inside
    /// module `foo`; the bare module name maps to its `init` file; the
    /// `environment` namespace resolves against the environment root.
    fn resolve_name(&self, logger: &Logger, name: &str, kind: FindKind) -> Option<PathBuf> {
        match name.split_once("::") {
            None => {
                // Only manifests can be loaded by bare module name.
                if kind != FindKind::Manifest || name == "environment" {
                    return None;
                }
                match self.find_module(name) {
                    Some(module) => module.find_by_name(kind, "init"),
                    None => {
                        logger.emit(
                            Level::Debug,
                            format!(
                                "could not load 'init.pp' for module '{}' because the module does not exist.",
                                name
                            ),
                        );
                        None
                    }
                }
            }
            Some((namespace, subname)) => {
                if namespace == "environment" {
                    if kind == FindKind::Manifest {
                        return None;
                    }
                    return self.finder.find_by_name(kind, subname);
                }
                match self.find_module(namespace) {
                    Some(module) => module.find_by_name(kind, subname),
                    None => {
                        logger.emit(
                            Level::Debug,
                            format!(
                                "could not load a file for '{}' because module '{}' does not exist.",
                                name, namespace
                            ),
                        );
                        None
                    }
                }
            }
        }
    }

    /// Resolve a kind-relative path: the first segment is `environment` or
    /// a module name, the rest is relative to the kind directory.
    pub fn resolve_path(&self, logger: &Logger, kind: FindKind, path: &str) -> Option<PathBuf> {
        let absolute = Path::new(path);
        if absolute.is_absolute() {
            return absolute.is_file().then(|| absolute.to_path_buf());
        }
        let (namespace, rest) = path.split_once('/')?;
        if namespace == "environment" {
            return self.finder.find_by_path(kind, rest);
        }
        match self.find_module(namespace) {
            Some(module) => module.find_by_path(kind, rest),
            None => {
                logger.emit(
                    Level::Debug,
                    format!(
                        "could not resolve file '{}' because module '{}' does not exist.",
                        path, namespace
                    ),
                );
                None
            }
        }
    }

    pub fn find_class(
        &self,
        logger: &Logger,
        name: &str,
    ) -> Result<Option<ClassDefinition>, CompilationError> {
        let mut state = self.state.lock();
        if let Some(definition) = state.registry.find_class(name) {
            return Ok(Some(definition.clone()));
        }
        logger.emit(
            Level::Debug,
            format!("attempting import of class '{}' into environment '{}'.", name, self.name),
        );
        let Some(path) = self.resolve_name(logger, name, FindKind::Manifest) else {
            return Ok(None);
        };
        self.import(&mut state, logger, &path)?;
        Ok(state.registry.find_class(name).cloned())
    }

    pub fn find_defined_type(
        &self,
        logger: &Logger,
        name: &str,
    ) -> Result<Option<DefinedTypeDefinition>, CompilationError> {
        let mut state = self.state.lock();
        if let Some(definition) = state.registry.find_defined_type(name) {
            return Ok(Some(definition.clone()));
        }
        logger.emit(
            Level::Debug,
            format!(
                "attempting import of defined type '{}' into environment '{}'.",
                name, self.name
            ),
        );
        let Some(path) = self.resolve_name(logger, name, FindKind::Manifest) else {
            return Ok(None);
        };
        self.import(&mut state, logger, &path)?;
        Ok(state.registry.find_defined_type(name).cloned())
    }

    pub fn find_type_alias(
        &self,
        logger: &Logger,
        name: &str,
    ) -> Result<Option<TypeAliasDefinition>, CompilationError> {
        let mut state = self.state.lock();
        if let Some(definition) = state.registry.find_type_alias(name) {
            return Ok(Some(definition.clone()));
        }
        logger.emit(
            Level::Debug,
            format!(
                "attempting import of type alias '{}' into environment '{}'.",
                name, self.name
            ),
        );
        let Some(path) = self.resolve_name(logger, name, FindKind::Type) else {
            return Ok(None);
        };
        self.import(&mut state, logger, &path)?;
        Ok(state.registry.find_type_alias(name).cloned())
    }

    /// Find a function by name: the registry, then module function files,
    /// then the remote extension channel.
    pub fn find_function(
        &self,
        logger: &Logger,
        name: &str,
    ) -> Result<Option<FoundFunction>, CompilationError> {
        let mut state = self.state.lock();
        if let Some(definition) = state.registry.find_function(name) {
            return Ok(Some(FoundFunction::Local(definition.clone())));
        }
        logger.emit(
            Level::Debug,
            format!(
                "attempting import of function '{}' into environment '{}'.",
                name, self.name
            ),
        );
        if let Some(path) = self.resolve_name(logger, name, FindKind::Function) {
            self.import(&mut state, logger, &path)?;
            if let Some(definition) = state.registry.find_function(name) {
                return Ok(Some(FoundFunction::Local(definition.clone())));
            }
        }
        if let Some(channel) = &self.channel {
            match channel
                .describe(DescribeKind::Function, &self.name, name)
                .map_err(|e| CompilationError::message(e.to_string()))?
            {
                Described::Function(descriptor) => {
                    return Ok(Some(FoundFunction::Remote(descriptor)));
                }
                _ => return Ok(None),
            }
        }
        Ok(None)
    }

    /// Find a resource type schema, importing from the remote extension
    /// channel on a registry miss.
    pub fn find_resource_type(
        &self,
        logger: &Logger,
        name: &str,
    ) -> Result<Option<ResourceTypeDefinition>, CompilationError> {
        let mut state = self.state.lock();
        if let Some(definition) = state.registry.find_resource_type(name) {
            return Ok(Some(definition.clone()));
        }
        if let Some(channel) = &self.channel {
            logger.emit(
                Level::Debug,
                format!(
                    "attempting import of resource type '{}' into environment '{}'.",
                    name, self.name
                ),
            );
            if let Described::ResourceType(definition) = channel
                .describe(DescribeKind::ResourceType, &self.name, name)
                .map_err(|e| CompilationError::message(e.to_string()))?
            {
                state.registry.register_resource_type(definition.clone());
                return Ok(Some(definition));
            }
        }
        Ok(None)
    }

    /// The extension channel, for remote function invocation.
    pub fn channel(&self) -> Option<&Arc<dyn ExtensionChannel>> {
        self.channel.as_ref()
    }

    /// Match a node's names against the registered node definitions.
    ///
    /// With no node definitions at all, compilation proceeds without one;
    /// otherwise a match is required.
    pub fn find_node_definition<'a>(
        &self,
        names: impl Iterator<Item = &'a str> + Clone,
    ) -> Result<Option<(NodeDefinition, String)>, CompilationError> {
        let state = self.state.lock();
        if !state.registry.has_nodes() {
            return Ok(None);
        }
        match state.registry.find_node(names.clone()) {
            Some((definition, matched)) => Ok(Some((definition.clone(), matched))),
            None => {
                let list: Vec<&str> = names.collect();
                Err(CompilationError::message(format!(
                    "could not find a default node definition or a node definition for the following hostnames: {}.",
                    list.join(", ")
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::MemorySink;
    use std::fs;

    fn environment_fixture() -> (tempfile::TempDir, Arc<Environment>, MemorySink) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("manifests")).unwrap();
        fs::create_dir_all(root.join("modules/apache/manifests")).unwrap();
        fs::create_dir_all(root.join("modules/apache/types")).unwrap();
        fs::create_dir_all(root.join("modules/apache/files")).unwrap();
        fs::create_dir_all(root.join("modules/lib")).unwrap();
        fs::create_dir_all(root.join("modules/Bad-Name")).unwrap();
        fs::write(root.join("manifests/site.pp"), "notice 'site'").unwrap();
        fs::write(
            root.join("modules/apache/manifests/init.pp"),
            "class apache { }",
        )
        .unwrap();
        fs::write(
            root.join("modules/apache/manifests/vhost.pp"),
            "define apache::vhost($port) { }",
        )
        .unwrap();
        fs::write(
            root.join("modules/apache/types/port.pp"),
            "type Apache::Port = Integer[0, 65535]",
        )
        .unwrap();
        fs::write(root.join("modules/apache/files/httpd.conf"), "conf").unwrap();

        let sink = MemorySink::new();
        let logger = Logger::new(sink.clone());
        let environment =
            Environment::create(root, Settings::default(), &logger, None).unwrap();
        (dir, environment, sink)
    }

    #[test]
    fn discovers_valid_modules_only() {
        let (_dir, environment, sink) = environment_fixture();
        assert!(environment.find_module("apache").is_some());
        assert!(environment.find_module("Bad-Name").is_none());
        assert!(environment.find_module("lib").is_none());
        let warnings = sink.messages(Level::Warning);
        assert!(warnings.iter().any(|w| w.contains("'lib'")));
        assert!(warnings.iter().any(|w| w.contains("invalid name")));
    }

    #[test]
    fn lazily_imports_classes() {
        let (_dir, environment, sink) = environment_fixture();
        let logger = Logger::new(sink);
        let class = environment.find_class(&logger, "apache").unwrap();
        assert!(class.is_some());
        assert_eq!(class.unwrap().name, "apache");
        assert!(environment.find_class(&logger, "missing").unwrap().is_none());
    }

    #[test]
    fn lazily_imports_defined_types_and_aliases() {
        let (_dir, environment, sink) = environment_fixture();
        let logger = Logger::new(sink);
        let defined = environment
            .find_defined_type(&logger, "apache::vhost")
            .unwrap();
        assert!(defined.is_some());
        let alias = environment.find_type_alias(&logger, "apache::port").unwrap();
        assert!(alias.is_some());
    }

    #[test]
    fn initial_manifests_are_idempotent() {
        let (_dir, environment, sink) = environment_fixture();
        let logger = Logger::new(sink);
        let first = environment.import_initial_manifests(&logger).unwrap();
        assert_eq!(first.len(), 1);
        let second = environment.import_initial_manifests(&logger).unwrap();
        assert_eq!(second.len(), 1);
    }

    #[test]
    fn resolve_path_maps_namespaces() {
        let (_dir, environment, sink) = environment_fixture();
        let logger = Logger::new(sink);
        assert!(environment
            .resolve_path(&logger, FindKind::File, "apache/httpd.conf")
            .is_some());
        assert!(environment
            .resolve_path(&logger, FindKind::File, "missing/httpd.conf")
            .is_none());
    }

    #[test]
    fn import_source_retains_definition_trees() {
        let (_dir, environment, sink) = environment_fixture();
        let logger = Logger::new(sink);
        environment
            .import_source(&logger, "class inline { }", "<string>")
            .unwrap();
        let class = environment.find_class(&logger, "inline").unwrap();
        assert!(class.is_some());
    }

    #[test]
    fn parse_errors_carry_the_path() {
        let (dir, environment, sink) = environment_fixture();
        let logger = Logger::new(sink);
        let bad = dir.path().join("manifests/bad.pp");
        fs::write(&bad, "class { ").unwrap();
        let error = environment.import_manifest(&logger, &bad).expect_err("parse failure");
        assert!(error.path.contains("bad.pp"));
    }
}
