//! Whole-project semantic checks and a quality score.
//!
//! None of this is a type checker. Undefined references, unused symbols and
//! file cycles are approximations over the name-keyed graph the extractors
//! produce, and every report says so.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info};

use super::imports::{ImportResolver, SubstringImportResolver};
use super::{Finding, Severity};
use crate::index::db::IndexDatabase;
use crate::index::{Import, Reference, RelationshipType, Symbol, SymbolKind};

pub const HEURISTICS_NOTE: &str = "import resolution and unused-symbol detection are heuristics \
    over names; expect some false positives and misses";

/// Names that are entry points by convention and never flagged as unused
const ENTRY_POINTS: &[&str] = &["main", "init", "__init__", "__main__", "setUp", "tearDown"];

#[derive(Debug, Clone, Serialize)]
pub struct CircularDependency {
    /// Files in dependency order; the last imports the first
    pub files: Vec<String>,
    pub description: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, Serialize)]
pub struct SemanticReport {
    pub project_id: i64,
    pub total_files: usize,
    pub total_symbols: usize,
    pub type_errors: Vec<Finding>,
    pub undefined_references: Vec<Finding>,
    pub unused_symbols: Vec<Finding>,
    pub circular_deps: Vec<CircularDependency>,
    pub quality_score: f64,
    pub warnings: Vec<String>,
    pub notes: Vec<String>,
}

/// `100 - (5*type_errors + 10*undefined + unused + 15*circular) / files`,
/// clamped to [0, 100]. An empty project scores 100.
pub fn quality_score(
    type_errors: usize,
    undefined: usize,
    unused: usize,
    circular: usize,
    total_files: usize,
) -> f64 {
    if total_files == 0 {
        return 100.0;
    }
    let penalty = (5 * type_errors + 10 * undefined + unused + 15 * circular) as f64;
    (100.0 - penalty / total_files as f64).clamp(0.0, 100.0)
}

pub struct SemanticAnalyzer {
    db: IndexDatabase,
    resolver: Box<dyn ImportResolver>,
}

impl SemanticAnalyzer {
    pub fn new(db: IndexDatabase) -> Self {
        Self {
            db,
            resolver: Box::new(SubstringImportResolver),
        }
    }

    pub fn with_resolver(mut self, resolver: Box<dyn ImportResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn analyze_project(&self, project_id: i64) -> Result<SemanticReport> {
        let files: Vec<String> = self
            .db
            .list_files(project_id)?
            .into_iter()
            .map(|f| f.relative_path)
            .collect();
        let symbols = self.db.symbols_for_project(project_id)?;
        let references = self.db.references_for_project(project_id)?;
        let relationships = self.db.relationships_for_project(project_id)?;
        let imports = self.db.imports_for_project(project_id)?;

        info!(
            "Analysing project {}: {} files, {} symbols, {} references",
            project_id,
            files.len(),
            symbols.len(),
            references.len()
        );

        let by_id: HashMap<i64, &Symbol> = symbols.iter().map(|s| (s.id, s)).collect();
        let mut by_name: HashMap<&str, Vec<&Symbol>> = HashMap::new();
        for symbol in &symbols {
            by_name.entry(symbol.name.as_str()).or_default().push(symbol);
        }
        let mut imports_by_file: HashMap<&str, Vec<&Import>> = HashMap::new();
        for import in &imports {
            imports_by_file.entry(import.file_path.as_str()).or_default().push(import);
        }

        let mut warnings = Vec::new();

        let unused_symbols = find_unused(&symbols, &references);
        let undefined_references = find_undefined(&references, &by_name, &imports_by_file);

        let mut type_errors = Vec::new();
        for rel in relationships
            .iter()
            .filter(|r| matches!(r.kind, RelationshipType::Extends | RelationshipType::Implements))
        {
            let target = match rel.target_symbol_id {
                Some(id) => by_id.get(&id).copied(),
                None => match by_name.get(rel.target_symbol.as_str()) {
                    Some(candidates) if candidates.len() == 1 => Some(candidates[0]),
                    _ => None,
                },
            };
            if let Some(target) = target {
                if !target.kind.is_type_like() {
                    type_errors.push(
                        Finding::new(
                            Severity::Error,
                            format!(
                                "'{}' {} '{}', which is a {} and not a type",
                                rel.source_symbol,
                                rel.kind.as_str(),
                                target.name,
                                target.kind.as_str()
                            ),
                        )
                        .symbol(&rel.source_symbol)
                        .at(&rel.file_path, rel.line),
                    );
                }
            }
        }

        // File-level import graph
        let mut adjacency: BTreeMap<&str, BTreeSet<String>> =
            files.iter().map(|f| (f.as_str(), BTreeSet::new())).collect();
        let mut unresolved = 0usize;
        for import in &imports {
            let targets = self.resolver.resolve(import, &import.file_path, &files);
            if targets.is_empty() {
                unresolved += 1;
                debug!("Unresolved import '{}' in {}", import.path, import.file_path);
                continue;
            }
            if let Some(edges) = adjacency.get_mut(import.file_path.as_str()) {
                edges.extend(targets.into_iter().filter(|t| t != &import.file_path));
            }
        }
        if unresolved > 0 {
            warnings.push(format!(
                "{unresolved} import(s) did not resolve to project files and were left out of cycle detection"
            ));
        }
        let circular_deps = find_cycles(&adjacency);

        // Names matched only by name while defined more than once
        let mut ambiguous: BTreeSet<&str> = BTreeSet::new();
        for reference in references.iter().filter(|r| r.target_symbol_id.is_none()) {
            if by_name
                .get(reference.target_symbol_name.as_str())
                .map_or(false, |defs| defs.len() > 1)
            {
                ambiguous.insert(reference.target_symbol_name.as_str());
            }
        }
        for name in ambiguous {
            warnings.push(format!(
                "'{}' is defined {} times; references to it are matched by name only",
                name,
                by_name.get(name).map_or(0, Vec::len)
            ));
        }

        let quality_score = quality_score(
            type_errors.len(),
            undefined_references.len(),
            unused_symbols.len(),
            circular_deps.len(),
            files.len(),
        );

        Ok(SemanticReport {
            project_id,
            total_files: files.len(),
            total_symbols: symbols.len(),
            type_errors,
            undefined_references,
            unused_symbols,
            circular_deps,
            quality_score,
            warnings,
            notes: vec![HEURISTICS_NOTE.to_string()],
        })
    }
}

/// Non-exported symbols whose only references, if any, come from themselves
fn find_unused(symbols: &[Symbol], references: &[Reference]) -> Vec<Finding> {
    let mut by_id: HashMap<i64, Vec<&Reference>> = HashMap::new();
    let mut by_name: HashMap<&str, Vec<&Reference>> = HashMap::new();
    for reference in references {
        match reference.target_symbol_id {
            Some(id) => by_id.entry(id).or_default().push(reference),
            None => by_name
                .entry(reference.target_symbol_name.as_str())
                .or_default()
                .push(reference),
        }
    }

    symbols
        .iter()
        .filter(|s| !s.is_exported())
        .filter(|s| !matches!(s.kind, SymbolKind::Field | SymbolKind::Module))
        .filter(|s| !ENTRY_POINTS.contains(&s.name.as_str()) && !s.name.starts_with("test"))
        .filter(|s| {
            let resolved = by_id.get(&s.id).into_iter().flatten();
            let named = by_name.get(s.name.as_str()).into_iter().flatten();
            resolved
                .chain(named)
                .all(|r| r.source_symbol_id == Some(s.id))
        })
        .map(|s| {
            Finding::new(
                Severity::Warning,
                format!("{} '{}' is never used", s.kind.as_str(), s.name),
            )
            .symbol(&s.name)
            .at(&s.file_path, s.range.start_line)
        })
        .collect()
}

/// Unqualified references with no definition in the project and no import
/// that could bind the name. Qualified references are member or package
/// accesses whose receiver type is unknown, so they are not judged.
fn find_undefined(
    references: &[Reference],
    by_name: &HashMap<&str, Vec<&Symbol>>,
    imports_by_file: &HashMap<&str, Vec<&Import>>,
) -> Vec<Finding> {
    let mut findings = Vec::new();
    let mut seen: HashSet<(&str, &str, usize)> = HashSet::new();

    for reference in references {
        if reference.target_symbol_id.is_some() || reference.qualifier.is_some() {
            continue;
        }
        let name = reference.target_symbol_name.as_str();
        if by_name.contains_key(name) {
            continue;
        }

        let covered = imports_by_file
            .get(reference.file_path.as_str())
            .map_or(false, |imports| {
                imports.iter().any(|i| {
                    i.is_wildcard
                        || i.binding_name() == name
                        || i.imported_names.iter().any(|n| n == name)
                })
            });
        if covered {
            continue;
        }

        if seen.insert((reference.file_path.as_str(), name, reference.line)) {
            findings.push(
                Finding::new(Severity::Error, format!("undefined reference to '{name}'"))
                    .symbol(name)
                    .at(&reference.file_path, reference.line),
            );
        }
    }

    findings
}

/// DFS over the file graph with an explicit stack of the current path; an
/// edge back into the path closes a cycle. Each cycle is reported once,
/// rotated to start at its smallest file.
fn find_cycles(adjacency: &BTreeMap<&str, BTreeSet<String>>) -> Vec<CircularDependency> {
    let mut done: HashSet<&str> = HashSet::new();
    let mut seen_cycles: HashSet<Vec<String>> = HashSet::new();
    let mut cycles = Vec::new();

    for &start in adjacency.keys() {
        if done.contains(start) {
            continue;
        }

        // (node, successors not yet visited)
        let mut stack: Vec<(&str, Vec<&str>)> = vec![(start, successors(adjacency, start))];
        let mut on_path: Vec<&str> = vec![start];

        while let Some((_, pending)) = stack.last_mut() {
            let Some(next) = pending.pop() else {
                if let Some((node, _)) = stack.pop() {
                    done.insert(node);
                }
                on_path.pop();
                continue;
            };

            if let Some(pos) = on_path.iter().position(|n| *n == next) {
                let cycle = canonical(&on_path[pos..]);
                if seen_cycles.insert(cycle.clone()) {
                    let mut description = cycle.clone();
                    description.push(cycle[0].clone());
                    cycles.push(CircularDependency {
                        description: description.join(" -> "),
                        files: cycle,
                        severity: Severity::Warning,
                    });
                }
            } else if !done.contains(next) {
                stack.push((next, successors(adjacency, next)));
                on_path.push(next);
            }
        }
    }

    cycles
}

fn successors<'a>(adjacency: &'a BTreeMap<&str, BTreeSet<String>>, node: &str) -> Vec<&'a str> {
    // Reversed so popping visits them in sorted order
    adjacency
        .get(node)
        .map(|targets| targets.iter().rev().map(String::as_str).collect())
        .unwrap_or_default()
}

fn canonical(path: &[&str]) -> Vec<String> {
    let min = path
        .iter()
        .enumerate()
        .min_by_key(|(_, n)| **n)
        .map_or(0, |(i, _)| i);
    path[min..]
        .iter()
        .chain(path[..min].iter())
        .map(|s| s.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph<'a>(edges: &[(&'a str, &str)]) -> BTreeMap<&'a str, BTreeSet<String>> {
        let mut adjacency: BTreeMap<&str, BTreeSet<String>> = BTreeMap::new();
        for (from, to) in edges {
            adjacency.entry(*from).or_default().insert(to.to_string());
        }
        adjacency
    }

    #[test]
    fn test_quality_score_formula() {
        assert_eq!(quality_score(0, 0, 0, 0, 0), 100.0);
        assert_eq!(quality_score(0, 0, 0, 0, 3), 100.0);
        assert_eq!(quality_score(1, 1, 5, 0, 2), 90.0);
        assert_eq!(quality_score(0, 0, 0, 10, 1), 0.0);
    }

    #[test]
    fn test_three_file_cycle_found_once() {
        let adjacency = graph(&[
            ("a.py", "b.py"),
            ("b.py", "c.py"),
            ("c.py", "a.py"),
            ("d.py", "a.py"),
        ]);
        let cycles = find_cycles(&adjacency);

        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].files, vec!["a.py", "b.py", "c.py"]);
        assert_eq!(cycles[0].description, "a.py -> b.py -> c.py -> a.py");
        assert_eq!(cycles[0].severity, Severity::Warning);
    }

    #[test]
    fn test_acyclic_graph_has_no_cycles() {
        let adjacency = graph(&[("a.go", "b.go"), ("b.go", "c.go"), ("a.go", "c.go")]);
        assert!(find_cycles(&adjacency).is_empty());
    }

    #[test]
    fn test_two_separate_cycles() {
        let adjacency = graph(&[
            ("a", "b"),
            ("b", "a"),
            ("x", "y"),
            ("y", "x"),
        ]);
        let cycles = find_cycles(&adjacency);
        let described: Vec<_> = cycles.iter().map(|c| c.description.as_str()).collect();
        assert_eq!(described, vec!["a -> b -> a", "x -> y -> x"]);
    }

    #[test]
    fn test_canonical_rotation() {
        assert_eq!(canonical(&["c", "a", "b"]), vec!["a", "b", "c"]);
    }
}
