use anyhow::{bail, Context, Result};
use std::path::PathBuf;

use super::{open_index, print_json, OutputFormat};
use crate::analysis::change::{ChangeImpactResult, ChangeTracker, SymbolChange};
use crate::analysis::RiskLevel;

pub async fn analyze_impact(
    change_type: String,
    target: String,
    to: Option<String>,
    project: PathBuf,
    format: OutputFormat,
) -> Result<()> {
    let index = open_index(&project)?;
    let tracker = ChangeTracker::new(index.db.clone()).with_impact_depth(index.config.analysis.impact_depth);

    let change = match change_type.as_str() {
        "rename" => {
            let new_name = to.context("--to <NEW_NAME> is required for rename")?;
            SymbolChange::rename(&target, &new_name)
        }
        "delete" => SymbolChange::delete(&target),
        "modify" => {
            let signature = to.context("--to <SIGNATURE> is required for modify")?;
            let mut declaration = index
                .db
                .find_symbols_by_name(&target)?
                .into_iter()
                .next()
                .with_context(|| format!("symbol not found: {}", target))?;
            declaration.signature = Some(signature);
            SymbolChange::modify(&target, declaration)
        }
        _ => bail!("Unknown change type: {} (expected rename, delete or modify)", change_type),
    };

    let result = tracker.analyze_symbol_change(&change)?;

    match format {
        OutputFormat::Json => print_json(&result)?,
        OutputFormat::Text => print_result(&result),
    }

    Ok(())
}

fn print_result(result: &ChangeImpactResult) {
    let impact = &result.impact;
    let badge = match impact.risk_level {
        RiskLevel::Low => "🟢",
        RiskLevel::Medium => "🟡",
        RiskLevel::High => "🔴",
    };

    println!("Impact of {} on '{}'", result.change.change.as_str(), impact.symbol);
    println!("  Risk: {} {}", badge, impact.risk_level.as_str());
    println!("  Exported: {}", impact.exported);
    println!("  Direct references: {}", impact.direct_references);
    println!("  Indirect references: {}", impact.indirect_references);
    println!("  Affected files: {}", impact.affected_files.len());
    for file in &impact.affected_files {
        println!("    {}", file);
    }

    if !impact.affected_symbols.is_empty() {
        println!("\n  Affected symbols:");
        for node in &impact.affected_symbols {
            println!("    [{}] {} {}:{}", node.depth, node.name, node.file_path, node.line);
        }
    }

    if !result.broken_references.is_empty() {
        println!("\n❌ {} broken references:", result.broken_references.len());
        for broken in &result.broken_references {
            println!(
                "  {}:{}:{} - {}",
                broken.reference.file_path, broken.reference.line, broken.reference.column, broken.reason
            );
        }
    }

    if !result.validation_errors.is_empty() {
        println!("\nValidation:");
        for err in &result.validation_errors {
            match (&err.file_path, err.line) {
                (Some(file), Some(line)) => {
                    println!("  [{}] {}:{} {}", err.severity.as_str(), file, line, err.message)
                }
                _ => println!("  [{}] {}", err.severity.as_str(), err.message),
            }
        }
    }

    if !result.required_updates.is_empty() {
        println!("\n📍 {} required updates:", result.required_updates.len());
        for update in &result.required_updates {
            let mode = if update.automatic { "auto" } else { "manual" };
            println!("  {}:{} ({}) {}", update.file_path, update.line, mode, update.description);
        }
    }

    for warning in &impact.warnings {
        println!("⚠️  {}", warning);
    }

    if !impact.suggestions.is_empty() {
        println!("\n💡 Suggestions:");
        for suggestion in &impact.suggestions {
            println!("  {}", suggestion);
        }
    }

    println!(
        "\nAuto-fix: {}",
        if result.can_auto_fix {
            format!("yes ({} edits)", result.auto_fix_suggestions.len())
        } else {
            "no".to_string()
        }
    );
}
