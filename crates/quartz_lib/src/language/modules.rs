//! Module symbols and import path search.

use std::path::{Path, PathBuf};

use super::scopes::ScopeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    /// The module's file is currently being elaborated; importing it again
    /// from below is a cycle.
    Importing,
    Ready,
}

pub struct Module {
    pub name: String,
    pub qualified_name: String,
    pub path: PathBuf,
    pub scope: ScopeId,
    pub state: ModuleState,
    pub parent: Option<super::symbol::ModuleId>,
}

/// Locate the file for an import path segment list. For every candidate
/// directory both `a/b.qr` and `a/b/module.qr` are acceptable; the first
/// hit wins. Search order: the importing file's directory, then each
/// configured import path, then the built-in library path.
pub fn search_import_paths(
    segments: &[String],
    relative_to: Option<&Path>,
    import_paths: &[PathBuf],
    library_path: Option<&Path>,
) -> Option<PathBuf> {
    let mut roots: Vec<PathBuf> = Vec::new();
    if let Some(dir) = relative_to {
        roots.push(dir.to_path_buf());
    }
    roots.extend(import_paths.iter().cloned());
    if let Some(lib) = library_path {
        roots.push(lib.to_path_buf());
    }

    for root in roots {
        let mut base = root;
        for segment in &segments[..segments.len() - 1] {
            base.push(segment);
        }

        let last = &segments[segments.len() - 1];

        let file = base.join(format!("{last}.qr"));
        if file.is_file() {
            return Some(file);
        }

        let package = base.join(last).join("module.qr");
        if package.is_file() {
            return Some(package);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("quartz-import-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_search_finds_plain_file() {
        let dir = scratch_dir("plain");
        fs::write(dir.join("util.qr"), "").unwrap();

        let found = search_import_paths(&["util".into()], Some(&dir), &[], None);
        assert_eq!(found, Some(dir.join("util.qr")));
    }

    #[test]
    fn test_search_finds_package_entry() {
        let dir = scratch_dir("package");
        fs::create_dir_all(dir.join("net")).unwrap();
        fs::write(dir.join("net/module.qr"), "").unwrap();

        let found = search_import_paths(&["net".into()], Some(&dir), &[], None);
        assert_eq!(found, Some(dir.join("net/module.qr")));
    }

    #[test]
    fn test_search_walks_nested_segments() {
        let dir = scratch_dir("nested");
        fs::create_dir_all(dir.join("core")).unwrap();
        fs::write(dir.join("core/mem.qr"), "").unwrap();

        let segments = vec!["core".to_string(), "mem".to_string()];
        let found = search_import_paths(&segments, Some(&dir), &[], None);
        assert_eq!(found, Some(dir.join("core/mem.qr")));
    }

    #[test]
    fn test_search_prefers_relative_directory() {
        let relative = scratch_dir("rel");
        let import = scratch_dir("imp");
        fs::write(relative.join("a.qr"), "").unwrap();
        fs::write(import.join("a.qr"), "").unwrap();

        let found = search_import_paths(&["a".into()], Some(&relative), &[import], None);
        assert_eq!(found, Some(relative.join("a.qr")));
    }
}
