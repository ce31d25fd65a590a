use anyhow::Result;
use serde::Serialize;
use std::path::{Path, PathBuf};

use super::{open_index, print_json, OutputFormat};
use crate::index::db::IndexStats;
use crate::index::Project;

#[derive(Serialize)]
struct StatsView<'a> {
    project: &'a Project,
    stats: IndexStats,
    index_size_mb: f64,
    symbols_by_kind: Vec<(String, usize)>,
    files_by_language: Vec<(String, usize)>,
    relationships_by_type: Vec<(String, usize)>,
}

pub async fn show_stats(project: PathBuf, verbose: bool, format: OutputFormat) -> Result<()> {
    let index = open_index(&project)?;
    let db = &index.db;

    let view = StatsView {
        project: &index.project,
        stats: db.get_stats()?,
        index_size_mb: get_db_size(db.db_path())?,
        symbols_by_kind: db.group_counts("symbols", "kind")?,
        files_by_language: db.group_counts("files", "language")?,
        relationships_by_type: db.group_counts("relationships", "type")?,
    };

    if format == OutputFormat::Json {
        return print_json(&view);
    }

    println!("Project: {} ({})", view.project.name, view.project.path);
    if let Some(ts) = view.project.last_indexed {
        if let Some(when) = chrono::DateTime::from_timestamp(ts, 0) {
            println!("Last indexed: {}", when.format("%Y-%m-%d %H:%M:%S UTC"));
        }
    }

    println!("\n📊 Index Statistics:");
    println!("  Total files: {}", view.stats.total_files);
    println!("  Total symbols: {}", view.stats.total_symbols);
    println!("  Total imports: {}", view.stats.total_imports);
    println!("  Total relationships: {}", view.stats.total_relationships);
    println!("  Total references: {}", view.stats.total_references);
    println!("  Index size: {:.2} MB", view.index_size_mb);

    if verbose {
        println!("\n📈 Detailed Statistics:");
        print_counts("Symbols by kind", &view.symbols_by_kind, "");
        print_counts("Languages", &view.files_by_language, " files");
        print_counts("Relationships by type", &view.relationships_by_type, "");
    }

    Ok(())
}

fn get_db_size(db_path: &Path) -> Result<f64> {
    let metadata = std::fs::metadata(db_path)?;
    Ok(metadata.len() as f64 / (1024.0 * 1024.0))
}

fn print_counts(title: &str, rows: &[(String, usize)], suffix: &str) {
    if rows.is_empty() {
        return;
    }
    println!("  {}:", title);
    for (label, count) in rows {
        println!("    {}: {}{}", label, count, suffix);
    }
}
