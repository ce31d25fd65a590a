//! Change-impact and risk analysis for a single symbol.

use std::collections::{BTreeSet, HashSet};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::AnalysisError;
use crate::graph::{DependencyGraphBuilder, GraphNode};
use crate::index::db::IndexDatabase;
use crate::index::{Reference, Symbol};

/// Dependents walk depth behind indirect references
pub const DEFAULT_IMPACT_DEPTH: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

/// Risk from reference spread. Thresholds are strict: 50 references alone
/// is still medium.
pub fn assess_risk(exported: bool, direct_refs: usize, affected_files: usize) -> RiskLevel {
    if direct_refs > 50 || affected_files > 20 {
        RiskLevel::High
    } else if exported && (direct_refs > 20 || affected_files > 10) {
        RiskLevel::High
    } else if exported && (direct_refs > 5 || affected_files > 3) {
        RiskLevel::Medium
    } else if direct_refs > 10 || affected_files > 5 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

/// What changing a symbol would touch
#[derive(Debug, Clone, Serialize)]
pub struct Impact {
    pub symbol: String,
    pub exported: bool,
    pub direct_references: usize,
    pub indirect_references: usize,
    /// Distinct files holding a direct reference, sorted
    pub affected_files: Vec<String>,
    /// Transitive dependents; `depth` 1 are the direct ones
    pub affected_symbols: Vec<GraphNode>,
    pub risk_level: RiskLevel,
    pub suggestions: Vec<String>,
    pub breaking_changes: Vec<String>,
    pub is_breaking: bool,
    pub warnings: Vec<String>,
    #[serde(skip)]
    pub references: Vec<Reference>,
}

pub struct ImpactAnalyzer {
    db: IndexDatabase,
    graph: DependencyGraphBuilder,
    depth: usize,
}

impl ImpactAnalyzer {
    pub fn new(db: IndexDatabase) -> Self {
        Self {
            graph: DependencyGraphBuilder::new(db.clone()),
            db,
            depth: DEFAULT_IMPACT_DEPTH,
        }
    }

    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth.max(1);
        self
    }

    /// Every definition of `name`, or `SymbolNotFound`
    pub(crate) fn definitions(&self, name: &str) -> Result<Vec<Symbol>> {
        let symbols = self.db.find_symbols_by_name(name)?;
        if symbols.is_empty() {
            return Err(AnalysisError::SymbolNotFound(name.to_string()).into());
        }
        Ok(symbols)
    }

    pub fn analyze_change_impact(&self, name: &str) -> Result<Impact> {
        let targets = self.definitions(name)?;
        self.impact_of(name, &targets)
    }

    pub(crate) fn impact_of(&self, name: &str, targets: &[Symbol]) -> Result<Impact> {
        let exported = targets.iter().any(Symbol::is_exported);
        let references = self.graph.references_to_all(targets)?;
        let direct_ids: HashSet<i64> = references.iter().map(|r| r.id).collect();

        let affected_files: Vec<String> = references
            .iter()
            .map(|r| r.file_path.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut warnings = Vec::new();
        if targets.len() > 1 {
            warnings.push(format!(
                "'{}' is defined {} times; references are combined",
                name,
                targets.len()
            ));
        }

        // Transitive dependents, level by level
        let mut visited: HashSet<i64> = targets.iter().map(|s| s.id).collect();
        let mut affected_symbols = Vec::new();
        let mut dependents = Vec::new();
        let mut frontier = targets.to_vec();
        for depth in 1..=self.depth {
            let mut next = Vec::new();
            for symbol in self.graph.dependents_of(&frontier)? {
                if visited.insert(symbol.id) {
                    affected_symbols.push(GraphNode::new(&symbol, depth));
                    next.push(symbol);
                }
            }
            if next.is_empty() {
                break;
            }
            dependents.extend(next.iter().cloned());
            frontier = next;
        }

        let indirect_references = self
            .graph
            .references_to_all(&dependents)?
            .into_iter()
            .filter(|r| !direct_ids.contains(&r.id))
            .count();

        let direct_references = references.len();
        let risk_level = assess_risk(exported, direct_references, affected_files.len());
        let is_breaking = exported && direct_references >= 1;

        let breaking_changes = if is_breaking {
            affected_files
                .iter()
                .map(|file| {
                    let count = references.iter().filter(|r| &r.file_path == file).count();
                    format!("{file}: {count} reference(s) to exported '{name}'")
                })
                .collect()
        } else {
            Vec::new()
        };

        let suggestions = suggestions(name, risk_level, direct_references, &affected_files, exported);

        debug!(
            "Impact of {}: {} direct, {} indirect, {} files, risk {}",
            name,
            direct_references,
            indirect_references,
            affected_files.len(),
            risk_level.as_str()
        );

        Ok(Impact {
            symbol: name.to_string(),
            exported,
            direct_references,
            indirect_references,
            affected_files,
            affected_symbols,
            risk_level,
            suggestions,
            breaking_changes,
            is_breaking,
            warnings,
            references,
        })
    }
}

fn suggestions(
    name: &str,
    risk: RiskLevel,
    direct: usize,
    files: &[String],
    exported: bool,
) -> Vec<String> {
    let mut out = Vec::new();
    if direct == 0 {
        out.push(format!("No references to '{name}' were found; the change is local"));
        return out;
    }

    match risk {
        RiskLevel::High => {
            out.push("Split the change into smaller steps and land them separately".to_string());
            out.push(format!("Review all {} affected files before merging", files.len()));
        }
        RiskLevel::Medium => {
            out.push(format!("Update the {direct} reference(s) in the same change"));
        }
        RiskLevel::Low => {
            out.push(format!("Update {} in {}", plural(direct, "reference"), files.join(", ")));
        }
    }
    if exported {
        out.push(format!(
            "'{name}' is exported; keep a deprecated alias if external code may use it"
        ));
    }
    out
}

fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("1 {word}")
    } else {
        format!("{n} {word}s")
    }
}
