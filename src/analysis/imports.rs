//! Import-to-file resolution.
//!
//! Mapping an import string to project files properly needs each language's
//! module rules. The default resolver is a path-suffix heuristic that is
//! right for the common layouts and silent about the rest.

use crate::index::Import;

pub trait ImportResolver: Send + Sync {
    /// Project files (relative paths) that `import`, written in `importer`,
    /// refers to. Empty when the import is external or unknown.
    fn resolve(&self, import: &Import, importer: &str, files: &[String]) -> Vec<String>;
}

/// Matches the import path, normalised to slash-separated segments, against
/// file stems and directories by segment suffix in either direction
/// (`example.com/proj/util` finds `util/strings.go`). If nothing matches,
/// trailing segments are dropped one at a time (`crate::graph::Graph` finds
/// `src/graph/mod.rs`).
#[derive(Debug, Clone, Copy, Default)]
pub struct SubstringImportResolver;

impl ImportResolver for SubstringImportResolver {
    fn resolve(&self, import: &Import, importer: &str, files: &[String]) -> Vec<String> {
        let Some(needle) = normalize(&import.path, importer) else {
            return Vec::new();
        };

        let mut segments: Vec<&str> = needle.split('/').filter(|s| !s.is_empty()).collect();
        while !segments.is_empty() {
            let candidate = segments.join("/");
            let matches: Vec<String> = files
                .iter()
                .filter(|f| f.as_str() != importer && file_matches(f, &candidate))
                .cloned()
                .collect();
            if !matches.is_empty() {
                return matches;
            }
            segments.pop();
        }

        Vec::new()
    }
}

/// Slash-separated module path, with relative Python imports anchored at
/// the importer's directory
fn normalize(path: &str, importer: &str) -> Option<String> {
    let dots = path.chars().take_while(|c| *c == '.').count();
    let rest = &path[dots..];

    let mut module = rest
        .replace("::", "/")
        .replace('.', "/")
        .trim_matches('/')
        .to_string();
    for prefix in ["crate/", "self/", "super/"] {
        if let Some(stripped) = module.strip_prefix(prefix) {
            module = stripped.to_string();
        }
    }

    if dots > 0 {
        let mut base: Vec<&str> = importer.split('/').collect();
        base.pop();
        for _ in 1..dots {
            base.pop()?;
        }
        let mut anchored = base.join("/");
        if !module.is_empty() {
            if !anchored.is_empty() {
                anchored.push('/');
            }
            anchored.push_str(&module);
        }
        module = anchored;
    }

    if module.is_empty() {
        None
    } else {
        Some(module)
    }
}

fn file_matches(file: &str, needle: &str) -> bool {
    let stem = match file.rsplit_once('.') {
        Some((stem, ext)) if !ext.contains('/') && !stem.ends_with('/') => stem,
        _ => file,
    };
    // Package entry files stand for their directory
    let module = ["/mod", "/__init__", "/index"]
        .iter()
        .find_map(|entry| stem.strip_suffix(entry))
        .unwrap_or(stem);
    let dir = file.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");

    ends_with_segments(module, needle)
        || (!dir.is_empty() && (ends_with_segments(dir, needle) || ends_with_segments(needle, dir)))
}

/// `a/b/c` ends with `b/c` but not with `/c` or `x/b/c`
fn ends_with_segments(path: &str, suffix: &str) -> bool {
    path == suffix
        || path
            .strip_suffix(suffix)
            .map(|head| head.ends_with('/'))
            .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn import(path: &str) -> Import {
        Import {
            path: path.to_string(),
            ..Default::default()
        }
    }

    fn files() -> Vec<String> {
        [
            "main.go",
            "util/strings.go",
            "pkg/models/user.py",
            "pkg/models/__init__.py",
            "pkg/service.py",
            "src/graph/mod.rs",
            "src/config.rs",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    #[test]
    fn test_go_package_resolves_to_directory_files() {
        let resolver = SubstringImportResolver;
        let resolved = resolver.resolve(&import("example.com/proj/util"), "main.go", &files());
        assert_eq!(resolved, vec!["util/strings.go"]);
    }

    #[test]
    fn test_python_dotted_and_relative_imports() {
        let resolver = SubstringImportResolver;
        assert_eq!(
            resolver.resolve(&import("pkg.models.user"), "pkg/service.py", &files()),
            vec!["pkg/models/user.py"]
        );
        // No sibling module, so the package itself
        assert_eq!(
            resolver.resolve(&import(".service"), "pkg/models/user.py", &files()),
            vec!["pkg/models/__init__.py"]
        );
        assert_eq!(
            resolver.resolve(&import("..service"), "pkg/models/user.py", &files()),
            vec!["pkg/service.py"]
        );
    }

    #[test]
    fn test_rust_paths_drop_item_segments() {
        let resolver = SubstringImportResolver;
        assert_eq!(
            resolver.resolve(&import("crate::graph::Graph"), "src/config.rs", &files()),
            vec!["src/graph/mod.rs"]
        );
        assert_eq!(
            resolver.resolve(&import("crate::config::Config"), "src/graph/mod.rs", &files()),
            vec!["src/config.rs"]
        );
    }

    #[test]
    fn test_external_imports_stay_unresolved() {
        let resolver = SubstringImportResolver;
        assert!(resolver.resolve(&import("fmt"), "main.go", &files()).is_empty());
        assert!(resolver.resolve(&import("serde::Serialize"), "src/config.rs", &files()).is_empty());
    }

    #[test]
    fn test_segment_suffix_needs_boundary() {
        assert!(ends_with_segments("a/b/c", "b/c"));
        assert!(ends_with_segments("c", "c"));
        assert!(!ends_with_segments("a/xb/c", "b/c"));
    }
}
