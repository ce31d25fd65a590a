use anyhow::Result;
use std::path::PathBuf;

use super::{open_index, print_json, OutputFormat};
use crate::analysis::semantic::{SemanticAnalyzer, SemanticReport};
use crate::analysis::Finding;

pub async fn analyze_project(project: PathBuf, format: OutputFormat) -> Result<()> {
    let index = open_index(&project)?;
    let report = SemanticAnalyzer::new(index.db.clone()).analyze_project(index.project.id)?;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text => print_report(&index.project.name, &report),
    }

    Ok(())
}

fn print_report(name: &str, report: &SemanticReport) {
    println!("Semantic analysis of {}", name);
    println!("  Files: {}  Symbols: {}", report.total_files, report.total_symbols);
    println!("  Quality score: {:.1}", report.quality_score);

    print_findings("Type errors", &report.type_errors);
    print_findings("Undefined references", &report.undefined_references);
    print_findings("Unused symbols", &report.unused_symbols);

    if !report.circular_deps.is_empty() {
        println!("\n🔁 Circular dependencies ({}):", report.circular_deps.len());
        for cycle in &report.circular_deps {
            println!("  [{}] {}", cycle.severity.as_str(), cycle.description);
        }
    }

    for warning in &report.warnings {
        println!("⚠️  {}", warning);
    }
    for note in &report.notes {
        println!("note: {}", note);
    }
}

fn print_findings(title: &str, findings: &[Finding]) {
    if findings.is_empty() {
        return;
    }

    println!("\n{} ({}):", title, findings.len());
    for finding in findings {
        match finding.location() {
            Some(location) => println!("  [{}] {} {}", finding.severity.as_str(), location, finding.message),
            None => println!("  [{}] {}", finding.severity.as_str(), finding.message),
        }
    }
}
