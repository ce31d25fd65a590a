use anyhow::{bail, Result};
use std::path::PathBuf;

use super::{open_index, print_json, OutputFormat};
use crate::graph::{DependencyGraphBuilder, Graph};
use crate::index::SymbolKind;
use crate::query::engine::{QueryEngine, QueryResult};

pub async fn query_index(
    query_type: String,
    target: String,
    project: PathBuf,
    kind: Option<String>,
    limit: usize,
    format: OutputFormat,
) -> Result<()> {
    let index = open_index(&project)?;
    let query_engine = QueryEngine::new(index.db.clone());

    let kind = match kind.as_deref() {
        Some(raw) => match SymbolKind::parse(raw) {
            Some(kind) => Some(kind),
            None => bail!("Unknown symbol kind: {}", raw),
        },
        None => None,
    };

    let results = match query_type.as_str() {
        "callers" => query_engine.find_callers(&target)?,
        "callees" => query_engine.find_callees(&target)?,
        "references" => query_engine.find_references(&target)?,
        "dependencies" | "deps" => query_engine.find_dependencies(&target)?,
        "search" => query_engine.search_symbols(&target, kind, limit)?,
        _ => bail!(
            "Unknown query type: {} (expected callers, callees, references, dependencies or search)",
            query_type
        ),
    };

    match format {
        OutputFormat::Json => print_json(&results)?,
        OutputFormat::Text => print_results(&query_type, &target, &results),
    }

    Ok(())
}

pub async fn show_deps(
    symbol: String,
    depth: Option<usize>,
    project: PathBuf,
    format: OutputFormat,
) -> Result<()> {
    let index = open_index(&project)?;
    let builder =
        DependencyGraphBuilder::new(index.db.clone()).with_default_depth(index.config.analysis.max_depth);

    let graph = builder.build_symbol_dependency_graph(&symbol, depth)?;
    let chain = builder.analyze_dependency_chain(&symbol)?;

    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "graph": graph,
            "chain": chain,
        }))?,
        OutputFormat::Text => {
            print_graph(&symbol, &graph);
            println!(
                "\nDependencies: {}  Dependents: {}  Coupling: {:.2}",
                chain.dependencies.len(),
                chain.dependents.len(),
                chain.coupling_score
            );
        }
    }

    Ok(())
}

fn print_results(query_type: &str, target: &str, results: &[QueryResult]) {
    if results.is_empty() {
        println!("No results found for {} of '{}'", query_type, target);
        return;
    }

    println!("Found {} results:", results.len());
    for result in results {
        println!("  {}:{} - {} ({})", result.file, result.line, result.name, result.kind);
        if let Some(signature) = &result.signature {
            println!("      {}", signature);
        }
    }
}

fn print_graph(symbol: &str, graph: &Graph) {
    println!("Dependency graph of '{}': {} nodes, {} edges", symbol, graph.nodes.len(), graph.edges.len());

    for node in &graph.nodes {
        let indent = "  ".repeat(node.depth + 1);
        println!(
            "{}{} ({}) {}:{}",
            indent,
            node.name,
            node.kind.as_str(),
            node.file_path,
            node.line
        );
    }

    for edge in &graph.edges {
        let from = graph.node(edge.from).map_or("?", |n| n.name.as_str());
        let to = graph.node(edge.to).map_or("?", |n| n.name.as_str());
        println!("  {} -{}-> {}", from, edge.kind.as_str(), to);
    }

    for warning in &graph.warnings {
        println!("⚠️  {}", warning);
    }
}
