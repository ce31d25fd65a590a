use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::{print_json, OutputFormat};
use crate::indexer::pipeline::{IndexReport, IndexReportView};
use crate::indexer::watcher::start_watcher;
use crate::indexer::Indexer;

pub async fn index_project(
    project: PathBuf,
    rebuild: bool,
    workers: Option<usize>,
    watch: bool,
    format: OutputFormat,
) -> Result<()> {
    let mut indexer = Indexer::open(&project).await?;

    let mut options = indexer.options();
    options.force = rebuild;
    if let Some(workers) = workers {
        options.workers = workers.max(1);
    }

    let cancel = options.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, cancelling indexing");
            cancel.cancel();
        }
    });

    if format == OutputFormat::Text {
        println!("symgraph {}", env!("CARGO_PKG_VERSION"));
        println!("Project: {}", indexer.root().display());
        println!("Languages: {}", indexer.config().enabled_languages().join(", "));
        println!("Workers: {}  Rebuild: {}", options.workers, rebuild);
        options.progress = Some(spinner());
    }

    let report = indexer.index_all(options).await?;

    match format {
        OutputFormat::Json => print_json(&IndexReportView::from(&report))?,
        OutputFormat::Text => print_report(&report),
    }

    let should_watch = watch || indexer.config().indexing.watch;
    if should_watch && !report.cancelled {
        if format == OutputFormat::Text {
            println!("\n👀 Watching for changes. Press Ctrl+C to stop.");
        }
        start_watcher(Arc::new(indexer)).await?;
    }

    Ok(())
}

/// Watch an already-indexed project, keeping the index current
pub async fn watch_project(project: PathBuf) -> Result<()> {
    let indexer = Indexer::open(&project).await?;
    println!("👀 Watching {}. Press Ctrl+C to stop.", indexer.root().display());
    start_watcher(Arc::new(indexer)).await
}

fn spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {pos} files {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

fn print_report(report: &IndexReport) {
    if report.cancelled {
        println!("\n⚠️  Indexing cancelled after {} files", report.files_seen);
    } else {
        println!("\n✅ Indexing complete in {}ms", report.elapsed_ms);
    }

    println!("  Files indexed:   {}", report.files_indexed);
    println!("  Files unchanged: {}", report.files_unchanged);
    println!("  Files skipped:   {}", report.files_skipped);
    println!("  Files removed:   {}", report.files_removed);
    println!(
        "  Symbols: {} inserted, {} updated, {} moved, {} unchanged, {} removed",
        report.stats.symbols_inserted,
        report.stats.symbols_updated,
        report.stats.symbols_moved,
        report.stats.symbols_unchanged,
        report.stats.symbols_removed
    );
    println!(
        "  Imports: {}  Relationships: {}  References: {}",
        report.stats.imports_written, report.stats.relationships_written, report.stats.references_written
    );
    println!("  Links resolved: {}", report.links_resolved);

    if report.has_errors() {
        println!("\n❌ {} file(s) failed:", report.errors.len());
        for err in &report.errors {
            println!("  {} [{}]", err, err.kind());
        }
    }
}
