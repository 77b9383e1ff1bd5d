//! File resolution within an environment or module directory.
//!
//! A finder knows one root directory and resolves files by kind, either by
//! qualified name (`foo::bar` maps through the kind's subdirectory) or by
//! relative path (for `files` and `templates`). Lookups never follow
//! symlinks out of the root and never report non-files.

use std::fs;
use std::path::{Path, PathBuf};

/// The kinds of files a finder can locate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindKind {
    Manifest,
    Function,
    Type,
    File,
    Template,
}

impl FindKind {
    /// Subdirectory for the kind.
    pub fn directory(self) -> &'static str {
        match self {
            FindKind::Manifest => "manifests",
            FindKind::Function => "functions",
            FindKind::Type => "types",
            FindKind::File => "files",
            FindKind::Template => "templates",
        }
    }

    /// File extension for named lookups, if the kind has one.
    pub fn extension(self) -> Option<&'static str> {
        match self {
            FindKind::Manifest | FindKind::Function | FindKind::Type => Some("pp"),
            FindKind::File | FindKind::Template => None,
        }
    }
}

/// Resolves files under one root directory.
#[derive(Debug, Clone)]
pub struct Finder {
    directory: PathBuf,
    /// Override for the manifests location (the `manifest` setting);
    /// relative to the root.
    manifest: Option<PathBuf>,
}

impl Finder {
    pub fn new(directory: impl Into<PathBuf>, manifest: Option<&str>) -> Self {
        Self {
            directory: directory.into(),
            manifest: manifest.map(PathBuf::from),
        }
    }

    /// The finder's root directory.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn kind_directory(&self, kind: FindKind) -> PathBuf {
        if kind == FindKind::Manifest {
            if let Some(manifest) = &self.manifest {
                return self.directory.join(manifest);
            }
        }
        self.directory.join(kind.directory())
    }

    fn accept(&self, path: PathBuf) -> Option<PathBuf> {
        // Resolve symlinks and require the real path to stay in the root.
        let canonical = path.canonicalize().ok()?;
        let root = self.directory.canonicalize().ok()?;
        if !canonical.starts_with(&root) {
            return None;
        }
        if !canonical.is_file() {
            return None;
        }
        Some(path)
    }

    /// Find by qualified name: `bar::baz` maps to `<kind>/bar/baz.<ext>`;
    /// callers pass `init` for the module's own name.
    pub fn find_by_name(&self, kind: FindKind, name: &str) -> Option<PathBuf> {
        let extension = kind.extension()?;
        let mut path = self.kind_directory(kind);
        for segment in name.split("::") {
            if segment.is_empty() || segment.contains(['/', '\\', '.']) {
                return None;
            }
            path.push(segment);
        }
        path.set_extension(extension);
        self.accept(path)
    }

    /// Find by relative path (the `files` and `templates` kinds).
    pub fn find_by_path(&self, kind: FindKind, relative: &str) -> Option<PathBuf> {
        let relative = Path::new(relative);
        if relative
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return None;
        }
        self.accept(self.kind_directory(kind).join(relative))
    }

    /// Visit every file of a kind in deterministic (lexicographic) order,
    /// recursing into subdirectories. Returns the visited paths.
    pub fn each_file(&self, kind: FindKind) -> Vec<PathBuf> {
        let mut results = Vec::new();
        let root = self.kind_directory(kind);
        // A manifest setting may also point directly at one file.
        if root.is_file() {
            results.push(root);
            return results;
        }
        collect_files(&root, kind.extension(), &mut results);
        results
    }
}

fn collect_files(directory: &Path, extension: Option<&str>, results: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(directory) else {
        return;
    };
    let mut entries: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    entries.sort_by_key(|path| path.file_name().map(|n| n.to_os_string()));

    for path in entries {
        if path.is_dir() {
            collect_files(&path, extension, results);
        } else if path.is_file() {
            let matches = extension
                .map(|ext| path.extension().map(|e| e == ext).unwrap_or(false))
                .unwrap_or(true);
            if matches {
                results.push(path);
            }
        }
    }
}

/// Whether a directory name is a valid module name.
pub fn is_valid_module_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_lowercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("temp dir");
        let root = dir.path();
        fs::create_dir_all(root.join("manifests/sub")).unwrap();
        fs::create_dir_all(root.join("files/config")).unwrap();
        fs::write(root.join("manifests/init.pp"), "class m { }").unwrap();
        fs::write(root.join("manifests/other.pp"), "").unwrap();
        fs::write(root.join("manifests/sub/deep.pp"), "").unwrap();
        fs::write(root.join("manifests/readme.txt"), "").unwrap();
        fs::write(root.join("files/config/app.conf"), "k=v").unwrap();
        dir
    }

    #[test]
    fn find_by_name_maps_namespaces() {
        let dir = fixture();
        let finder = Finder::new(dir.path(), None);
        assert!(finder.find_by_name(FindKind::Manifest, "init").is_some());
        assert!(finder
            .find_by_name(FindKind::Manifest, "sub::deep")
            .is_some());
        assert!(finder.find_by_name(FindKind::Manifest, "missing").is_none());
        // Traversal characters are rejected.
        assert!(finder
            .find_by_name(FindKind::Manifest, "..::init")
            .is_none());
    }

    #[test]
    fn find_by_path_resolves_files() {
        let dir = fixture();
        let finder = Finder::new(dir.path(), None);
        assert!(finder
            .find_by_path(FindKind::File, "config/app.conf")
            .is_some());
        assert!(finder.find_by_path(FindKind::File, "missing.conf").is_none());
        assert!(finder
            .find_by_path(FindKind::File, "../manifests/init.pp")
            .is_none());
    }

    #[test]
    fn each_file_is_sorted_and_filtered() {
        let dir = fixture();
        let finder = Finder::new(dir.path(), None);
        let files = finder.each_file(FindKind::Manifest);
        let names: Vec<String> = files
            .iter()
            .map(|p| {
                p.strip_prefix(dir.path().join("manifests"))
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/")
            })
            .collect();
        assert_eq!(names, vec!["init.pp", "other.pp", "sub/deep.pp"]);
    }

    #[test]
    fn manifest_setting_overrides_directory() {
        let dir = fixture();
        let finder = Finder::new(dir.path(), Some("manifests/init.pp"));
        let files = finder.each_file(FindKind::Manifest);
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn module_names() {
        assert!(is_valid_module_name("apache"));
        assert!(is_valid_module_name("foo_bar2"));
        assert!(!is_valid_module_name("Apache"));
        assert!(!is_valid_module_name("2fast"));
        assert!(!is_valid_module_name(""));
        assert!(!is_valid_module_name("has-dash"));
    }
}
