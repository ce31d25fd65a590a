// Query execution engine

use anyhow::Result;
use serde::Serialize;
use std::collections::HashSet;

use crate::graph::DependencyGraphBuilder;
use crate::index::db::IndexDatabase;
use crate::index::{Relationship, RelationshipType, Symbol, SymbolKind};

/// Query result
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    /// None for names with no definition in the index
    pub symbol_id: Option<i64>,
    pub name: String,
    pub kind: String,
    pub file: String,
    pub line: usize,
    pub signature: Option<String>,
}

impl QueryResult {
    fn from_symbol(symbol: &Symbol) -> Self {
        Self {
            symbol_id: Some(symbol.id),
            name: symbol.name.clone(),
            kind: symbol.kind.as_str().to_string(),
            file: symbol.file_path.clone(),
            line: symbol.range.start_line,
            signature: symbol.signature.clone(),
        }
    }
}

/// Query engine
pub struct QueryEngine {
    db: IndexDatabase,
}

impl QueryEngine {
    pub fn new(db: IndexDatabase) -> Self {
        Self { db }
    }

    /// Find all callers of a symbol
    pub fn find_callers(&self, target_symbol: &str) -> Result<Vec<QueryResult>> {
        let mut results = Vec::new();
        let mut seen = HashSet::new();

        for symbol in self.db.find_symbols_by_name(target_symbol)? {
            for rel in self.db.relationships_to(&symbol.name, Some(symbol.id))? {
                if rel.kind != RelationshipType::Calls || !seen.insert(rel.id) {
                    continue;
                }
                results.push(self.endpoint(&rel.source_symbol, rel.source_symbol_id, &rel)?);
            }
        }

        Ok(results)
    }

    /// Find all callees of a symbol, including external ones
    pub fn find_callees(&self, target_symbol: &str) -> Result<Vec<QueryResult>> {
        let mut results = Vec::new();
        let mut seen = HashSet::new();

        for symbol in self.db.find_symbols_by_name(target_symbol)? {
            for rel in self.db.relationships_from(&symbol.name, Some(symbol.id))? {
                if rel.kind != RelationshipType::Calls || !seen.insert(rel.id) {
                    continue;
                }
                results.push(self.endpoint(&rel.target_symbol, rel.target_symbol_id, &rel)?);
            }
        }

        Ok(results)
    }

    /// Find all use-sites of a symbol. Each result is the referencing
    /// location, named after its enclosing symbol.
    pub fn find_references(&self, target_symbol: &str) -> Result<Vec<QueryResult>> {
        let targets = self.db.find_symbols_by_name(target_symbol)?;
        let graph = DependencyGraphBuilder::new(self.db.clone());

        let mut results = Vec::new();
        for reference in graph.references_to_all(&targets)? {
            let source = match reference.source_symbol_id {
                Some(id) => self.db.get_symbol(id)?,
                None => None,
            };
            results.push(QueryResult {
                symbol_id: source.as_ref().map(|s| s.id),
                name: source
                    .as_ref()
                    .map(|s| s.name.clone())
                    .unwrap_or_else(|| "<top level>".to_string()),
                kind: reference.reference_type.as_str().to_string(),
                file: reference.file_path,
                line: reference.line,
                signature: None,
            });
        }

        Ok(results)
    }

    /// Find what a symbol depends on
    pub fn find_dependencies(&self, target_symbol: &str) -> Result<Vec<QueryResult>> {
        let graph = DependencyGraphBuilder::new(self.db.clone());
        Ok(graph
            .get_dependencies_for(target_symbol)?
            .iter()
            .map(QueryResult::from_symbol)
            .collect())
    }

    /// Full-text search over names, signatures and docs
    pub fn search_symbols(&self, query: &str, kind: Option<SymbolKind>, limit: usize) -> Result<Vec<QueryResult>> {
        // Over-fetch so a kind filter still fills the page
        let fetch = if kind.is_some() { limit.saturating_mul(4) } else { limit };
        let symbols = self.db.search_symbols(query, fetch)?;

        Ok(symbols
            .iter()
            .filter(|s| kind.map_or(true, |k| s.kind == k))
            .take(limit)
            .map(QueryResult::from_symbol)
            .collect())
    }

    /// The symbol at one end of an edge, or a bare entry for external names.
    /// The reported line is the edge's.
    fn endpoint(&self, name: &str, id: Option<i64>, rel: &Relationship) -> Result<QueryResult> {
        let symbol = match id {
            Some(id) => self.db.get_symbol(id)?,
            None => {
                let mut candidates = self.db.find_symbols_by_name(name)?;
                if candidates.len() == 1 {
                    candidates.pop()
                } else {
                    None
                }
            }
        };

        Ok(match symbol {
            Some(symbol) => QueryResult {
                line: rel.line,
                file: rel.file_path.clone(),
                ..QueryResult::from_symbol(&symbol)
            },
            None => QueryResult {
                symbol_id: None,
                name: name.to_string(),
                kind: "external".to_string(),
                file: rel.file_path.clone(),
                line: rel.line,
                signature: None,
            },
        })
    }
}
