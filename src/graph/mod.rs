//! Symbol dependency graphs.
//!
//! Edges always point from the dependent symbol to its dependency. Traversal
//! state lives in the call, so a builder can be shared freely.

use std::collections::{BTreeMap, HashSet};

use anyhow::Result;
use serde::Serialize;
use tracing::debug;

use crate::error::AnalysisError;
use crate::index::db::IndexDatabase;
use crate::index::{Reference, RelationshipType, Symbol, SymbolKind};

/// Depth used when the caller does not pass one
pub const DEFAULT_MAX_DEPTH: usize = 5;

#[derive(Debug, Clone, Serialize)]
pub struct GraphNode {
    pub id: i64,
    pub name: String,
    pub kind: SymbolKind,
    pub file_path: String,
    pub line: usize,
    /// Distance from the root in BFS levels
    pub depth: usize,
}

impl GraphNode {
    pub(crate) fn new(symbol: &Symbol, depth: usize) -> Self {
        Self {
            id: symbol.id,
            name: symbol.name.clone(),
            kind: symbol.kind,
            file_path: symbol.file_path.clone(),
            line: symbol.range.start_line,
            depth,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct GraphEdge {
    /// Dependent symbol id
    pub from: i64,
    /// Dependency symbol id
    pub to: i64,
    pub kind: RelationshipType,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Graph {
    pub root: Option<i64>,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub warnings: Vec<String>,
}

impl Graph {
    pub fn node(&self, id: i64) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    fn add_edge(&mut self, seen: &mut HashSet<GraphEdge>, edge: GraphEdge) {
        if seen.insert(edge.clone()) {
            self.edges.push(edge);
        }
    }
}

/// Both directions around one symbol plus a coupling score
#[derive(Debug, Clone, Serialize)]
pub struct DependencyChain {
    pub symbol: String,
    pub dependencies: Vec<Symbol>,
    pub dependents: Vec<Symbol>,
    /// dependents / (dependencies + 1)
    pub coupling_score: f64,
}

pub struct DependencyGraphBuilder {
    db: IndexDatabase,
    default_depth: usize,
}

impl DependencyGraphBuilder {
    pub fn new(db: IndexDatabase) -> Self {
        Self {
            db,
            default_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_default_depth(mut self, depth: usize) -> Self {
        self.default_depth = depth.max(1);
        self
    }

    /// Bounded BFS over relationships in both directions from `name`.
    ///
    /// A symbol reached twice is not expanded again, but the edge that
    /// reached it is still recorded, so cycles terminate without duplicate
    /// nodes.
    pub fn build_symbol_dependency_graph(&self, name: &str, max_depth: Option<usize>) -> Result<Graph> {
        let max_depth = max_depth.unwrap_or(self.default_depth);
        let mut graph = Graph::default();

        let candidates = self.db.find_symbols_by_name(name)?;
        let Some(root) = candidates.first().cloned() else {
            return Err(AnalysisError::SymbolNotFound(name.to_string()).into());
        };
        if candidates.len() > 1 {
            graph.warnings.push(ambiguity_warning(name, &candidates));
        }

        let mut visited = HashSet::from([root.id]);
        let mut seen_edges = HashSet::new();
        let mut warned = HashSet::from([name.to_string()]);

        graph.root = Some(root.id);
        graph.nodes.push(GraphNode::new(&root, 0));
        let mut frontier = vec![root];

        for depth in 1..=max_depth {
            let mut next = Vec::new();

            for symbol in &frontier {
                // symbol depends on each target
                for rel in self.db.relationships_from(&symbol.name, Some(symbol.id))? {
                    let Some(dep) = self.endpoint(
                        &rel.target_symbol,
                        rel.target_symbol_id,
                        &mut graph,
                        &mut warned,
                    )?
                    else {
                        continue;
                    };
                    graph.add_edge(
                        &mut seen_edges,
                        GraphEdge {
                            from: symbol.id,
                            to: dep.id,
                            kind: rel.kind,
                        },
                    );
                    if visited.insert(dep.id) {
                        graph.nodes.push(GraphNode::new(&dep, depth));
                        next.push(dep);
                    }
                }

                // each source depends on symbol
                for rel in self.db.relationships_to(&symbol.name, Some(symbol.id))? {
                    let Some(dependent) = self.endpoint(
                        &rel.source_symbol,
                        rel.source_symbol_id,
                        &mut graph,
                        &mut warned,
                    )?
                    else {
                        continue;
                    };
                    graph.add_edge(
                        &mut seen_edges,
                        GraphEdge {
                            from: dependent.id,
                            to: symbol.id,
                            kind: rel.kind,
                        },
                    );
                    if visited.insert(dependent.id) {
                        graph.nodes.push(GraphNode::new(&dependent, depth));
                        next.push(dependent);
                    }
                }
            }

            if next.is_empty() {
                break;
            }
            frontier = next;
        }

        debug!(
            "Dependency graph for {}: {} nodes, {} edges",
            name,
            graph.nodes.len(),
            graph.edges.len()
        );
        Ok(graph)
    }

    /// Symbols the named symbol depends on, through its outgoing relationships
    pub fn get_dependencies_for(&self, name: &str) -> Result<Vec<Symbol>> {
        let owners = self.db.find_symbols_by_name(name)?;
        let own_ids: HashSet<i64> = owners.iter().map(|s| s.id).collect();
        let mut seen = HashSet::new();
        let mut dependencies = Vec::new();

        for owner in &owners {
            for rel in self.db.relationships_from(&owner.name, Some(owner.id))? {
                let resolved = match rel.target_symbol_id {
                    Some(id) => self.db.get_symbol(id)?,
                    // Same policy as graph endpoints: first definition by path and line
                    None => self.db.find_symbols_by_name(&rel.target_symbol)?.into_iter().next(),
                };
                if let Some(dep) = resolved {
                    if !own_ids.contains(&dep.id) && seen.insert(dep.id) {
                        dependencies.push(dep);
                    }
                }
            }
        }

        Ok(dependencies)
    }

    /// Symbols that reference the named symbol.
    ///
    /// Each reference is attributed to the first symbol in its file whose
    /// line range contains the reference line.
    pub fn get_dependents_for(&self, name: &str) -> Result<Vec<Symbol>> {
        let targets = self.db.find_symbols_by_name(name)?;
        self.dependents_of(&targets)
    }

    /// Dependents of a concrete set of symbols, excluding the set itself
    pub fn dependents_of(&self, targets: &[Symbol]) -> Result<Vec<Symbol>> {
        let target_ids: HashSet<i64> = targets.iter().map(|s| s.id).collect();
        let references = self.references_to_all(targets)?;

        let mut by_file: BTreeMap<&str, Vec<&Reference>> = BTreeMap::new();
        for reference in &references {
            by_file.entry(reference.file_path.as_str()).or_default().push(reference);
        }

        let mut seen = HashSet::new();
        let mut dependents = Vec::new();
        for (file, refs) in by_file {
            let symbols = self.db.find_symbols_by_file(file)?;
            for reference in refs {
                let enclosing = symbols.iter().find(|s| s.range.contains_line(reference.line));
                if let Some(symbol) = enclosing {
                    if !target_ids.contains(&symbol.id) && seen.insert(symbol.id) {
                        dependents.push(symbol.clone());
                    }
                }
            }
        }

        Ok(dependents)
    }

    /// References to any of `targets`, each reported once
    pub fn references_to_all(&self, targets: &[Symbol]) -> Result<Vec<Reference>> {
        let mut references = Vec::new();
        let mut seen = HashSet::new();
        for target in targets {
            for reference in self.db.references_to(&target.name, Some(target.id))? {
                if seen.insert(reference.id) {
                    references.push(reference);
                }
            }
        }
        Ok(references)
    }

    pub fn analyze_dependency_chain(&self, name: &str) -> Result<DependencyChain> {
        let dependencies = self.get_dependencies_for(name)?;
        let dependents = self.get_dependents_for(name)?;

        Ok(DependencyChain {
            symbol: name.to_string(),
            coupling_score: coupling_score(dependents.len(), dependencies.len()),
            dependencies,
            dependents,
        })
    }

    /// Resolve one end of an edge. Unresolved names pick the first
    /// definition and warn once when the name is ambiguous; names with no
    /// definition in the index are external and yield None.
    fn endpoint(
        &self,
        name: &str,
        id: Option<i64>,
        graph: &mut Graph,
        warned: &mut HashSet<String>,
    ) -> Result<Option<Symbol>> {
        if let Some(id) = id {
            return self.db.get_symbol(id);
        }

        let candidates = self.db.find_symbols_by_name(name)?;
        if candidates.len() > 1 && warned.insert(name.to_string()) {
            graph.warnings.push(ambiguity_warning(name, &candidates));
        }
        Ok(candidates.into_iter().next())
    }
}

pub fn coupling_score(dependents: usize, dependencies: usize) -> f64 {
    dependents as f64 / (dependencies as f64 + 1.0)
}

fn ambiguity_warning(name: &str, candidates: &[Symbol]) -> String {
    let locations: Vec<String> = candidates
        .iter()
        .map(|s| format!("{}:{}", s.file_path, s.range.start_line))
        .collect();
    format!(
        "'{}' is defined {} times ({}); using the first",
        name,
        candidates.len(),
        locations.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::persist::{persist_file, resolve_links, upsert_project};
    use crate::index::{ExtractedReference, File, ParseResult, Range, ReferenceType, Relationship};
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        _dir: TempDir,
        db: IndexDatabase,
        project_id: i64,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempdir().unwrap();
            let db = IndexDatabase::new(dir.path().join("graph.db")).unwrap();
            let conn = db.get_conn().unwrap();
            let project = upsert_project(&conn, "/proj", "proj").unwrap();
            Self {
                _dir: dir,
                db,
                project_id: project.id,
            }
        }

        fn write(&self, rel: &str, parse: ParseResult) {
            let file = File {
                id: 0,
                project_id: self.project_id,
                path: format!("/proj/{rel}"),
                relative_path: rel.to_string(),
                language: "go".to_string(),
                size: 1,
                lines_of_code: 1,
                hash: format!("{rel}-hash"),
                last_modified: 0,
                last_indexed: 0,
            };
            let mut conn = self.db.get_conn().unwrap();
            persist_file(&mut conn, self.project_id, &file, &parse).unwrap();
            resolve_links(&mut conn, self.project_id).unwrap();
        }
    }

    fn func(name: &str, rel: &str, start: usize, end: usize) -> Symbol {
        let mut symbol = Symbol::new(
            name,
            SymbolKind::Function,
            rel,
            Range {
                start_line: start,
                end_line: end,
                ..Default::default()
            },
        );
        symbol.content_hash = format!("{name}-{start}");
        symbol
    }

    fn call(source: &str, target: &str, rel: &str, line: usize) -> (Relationship, ExtractedReference) {
        (
            Relationship::new(RelationshipType::Calls, source, target, rel, line),
            ExtractedReference {
                source_symbol: Some(source.to_string()),
                target_symbol_name: target.to_string(),
                qualifier: None,
                reference_type: ReferenceType::Call,
                line,
                column: 5,
            },
        )
    }

    fn file_with(symbols: Vec<Symbol>, calls: Vec<(Relationship, ExtractedReference)>) -> ParseResult {
        let (relationships, references) = calls.into_iter().unzip();
        ParseResult {
            symbols,
            relationships,
            references,
            ..Default::default()
        }
    }

    #[test]
    fn test_cycle_terminates_without_duplicate_nodes() {
        let fx = Fixture::new();
        fx.write(
            "cycle.go",
            file_with(
                vec![
                    func("A", "cycle.go", 1, 3),
                    func("B", "cycle.go", 5, 7),
                    func("C", "cycle.go", 9, 11),
                ],
                vec![
                    call("A", "B", "cycle.go", 2),
                    call("B", "C", "cycle.go", 6),
                    call("C", "A", "cycle.go", 10),
                ],
            ),
        );

        let builder = DependencyGraphBuilder::new(fx.db.clone());
        let graph = builder.build_symbol_dependency_graph("A", Some(5)).unwrap();

        assert_eq!(graph.nodes.len(), 3);
        assert_eq!(graph.edges.len(), 3);
        assert!(graph.warnings.is_empty());

        let id = |name: &str| graph.nodes.iter().find(|n| n.name == name).unwrap().id;
        assert!(graph.edges.contains(&GraphEdge {
            from: id("C"),
            to: id("A"),
            kind: RelationshipType::Calls,
        }));
    }

    #[test]
    fn test_depth_bounds_the_walk() {
        let fx = Fixture::new();
        fx.write(
            "chain.go",
            file_with(
                vec![
                    func("A", "chain.go", 1, 2),
                    func("B", "chain.go", 3, 4),
                    func("C", "chain.go", 5, 6),
                    func("D", "chain.go", 7, 8),
                ],
                vec![
                    call("A", "B", "chain.go", 1),
                    call("B", "C", "chain.go", 3),
                    call("C", "D", "chain.go", 5),
                ],
            ),
        );

        let builder = DependencyGraphBuilder::new(fx.db.clone());
        let graph = builder.build_symbol_dependency_graph("A", Some(1)).unwrap();
        let names: Vec<_> = graph.nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B"]);

        let full = builder.build_symbol_dependency_graph("A", None).unwrap();
        assert_eq!(full.nodes.len(), 4);
        assert_eq!(full.node(full.edges[2].to).unwrap().depth, 3);
    }

    #[test]
    fn test_missing_root_is_typed_error() {
        let fx = Fixture::new();
        let builder = DependencyGraphBuilder::new(fx.db.clone());

        let err = builder.build_symbol_dependency_graph("Nope", None).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AnalysisError>(),
            Some(AnalysisError::SymbolNotFound(_))
        ));
    }

    #[test]
    fn test_ambiguous_root_warns() {
        let fx = Fixture::new();
        fx.write("a.go", file_with(vec![func("Init", "a.go", 1, 2)], vec![]));
        fx.write("b.go", file_with(vec![func("Init", "b.go", 1, 2)], vec![]));

        let builder = DependencyGraphBuilder::new(fx.db.clone());
        let graph = builder.build_symbol_dependency_graph("Init", None).unwrap();
        assert_eq!(graph.nodes.len(), 1);
        assert_eq!(graph.warnings.len(), 1);
        assert!(graph.warnings[0].contains("a.go:1"));
    }

    #[test]
    fn test_ambiguous_dependency_matches_graph_endpoint() {
        let fx = Fixture::new();
        fx.write("a.go", file_with(vec![func("Init", "a.go", 1, 2)], vec![]));
        fx.write("b.go", file_with(vec![func("Init", "b.go", 1, 2)], vec![]));
        fx.write(
            "main.go",
            file_with(vec![func("main", "main.go", 1, 3)], vec![call("main", "Init", "main.go", 2)]),
        );

        let builder = DependencyGraphBuilder::new(fx.db.clone());
        let dependencies = builder.get_dependencies_for("main").unwrap();
        assert_eq!(dependencies.len(), 1);
        assert_eq!(dependencies[0].file_path, "a.go");

        let graph = builder.build_symbol_dependency_graph("main", Some(1)).unwrap();
        assert_eq!(graph.warnings.len(), 1);
        let targets: Vec<i64> = graph.edges.iter().map(|e| e.to).collect();
        assert_eq!(targets, vec![dependencies[0].id]);
    }

    #[test]
    fn test_dependents_use_enclosing_symbols() {
        let fx = Fixture::new();
        fx.write("a.go", file_with(vec![func("Foo", "a.go", 1, 3)], vec![]));
        fx.write(
            "b.go",
            file_with(
                vec![func("Bar", "b.go", 1, 5), func("Baz", "b.go", 7, 9)],
                vec![
                    call("Bar", "Foo", "b.go", 2),
                    call("Bar", "Foo", "b.go", 3),
                    call("Baz", "Foo", "b.go", 8),
                ],
            ),
        );

        let builder = DependencyGraphBuilder::new(fx.db.clone());
        let dependents: Vec<_> = builder
            .get_dependents_for("Foo")
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(dependents, vec!["Bar", "Baz"]);

        let chain = builder.analyze_dependency_chain("Bar").unwrap();
        assert_eq!(chain.dependencies.len(), 1);
        assert_eq!(chain.dependencies[0].name, "Foo");
        assert!(chain.dependents.is_empty());
        assert_eq!(chain.coupling_score, 0.0);

        let foo = builder.analyze_dependency_chain("Foo").unwrap();
        assert_eq!(foo.coupling_score, 2.0);
    }

    #[test]
    fn test_unreferenced_symbol_has_no_dependents() {
        let fx = Fixture::new();
        fx.write("a.go", file_with(vec![func("Lonely", "a.go", 1, 3)], vec![]));

        let builder = DependencyGraphBuilder::new(fx.db.clone());
        assert!(builder.get_dependents_for("Lonely").unwrap().is_empty());
        assert_eq!(builder.analyze_dependency_chain("Lonely").unwrap().coupling_score, 0.0);
    }

    #[test]
    fn test_coupling_score_formula() {
        assert_eq!(coupling_score(0, 0), 0.0);
        assert_eq!(coupling_score(4, 1), 2.0);
        assert_eq!(coupling_score(3, 2), 1.0);
    }
}
