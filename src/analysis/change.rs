//! Rename, delete and modify analysis on top of the impact analyzer.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::impact::{Impact, ImpactAnalyzer, RiskLevel};
use super::Severity;
use crate::index::db::IndexDatabase;
use crate::index::{Reference, ReferenceType, Symbol, Visibility};

/// Confidence attached to textual rename edits
pub const RENAME_CONFIDENCE: f64 = 0.95;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeType {
    Rename { new_name: String },
    Delete,
    /// Replace the stored declaration with `new`
    Modify { new: Box<Symbol> },
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Rename { .. } => "rename",
            ChangeType::Delete => "delete",
            ChangeType::Modify { .. } => "modify",
        }
    }
}

/// A hypothetical change to the symbol called `symbol`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolChange {
    pub symbol: String,
    pub change: ChangeType,
}

impl SymbolChange {
    pub fn rename(symbol: &str, new_name: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            change: ChangeType::Rename {
                new_name: new_name.to_string(),
            },
        }
    }

    pub fn delete(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            change: ChangeType::Delete,
        }
    }

    pub fn modify(symbol: &str, new: Symbol) -> Self {
        Self {
            symbol: symbol.to_string(),
            change: ChangeType::Modify { new: Box::new(new) },
        }
    }
}

/// A use-site that stops compiling after the change
#[derive(Debug, Clone, Serialize)]
pub struct BrokenReference {
    pub reference: Reference,
    pub reason: String,
    pub severity: Severity,
}

/// An edit the change forces on a use-site
#[derive(Debug, Clone, Serialize)]
pub struct RequiredUpdate {
    pub file_path: String,
    pub line: usize,
    pub column: usize,
    pub description: String,
    pub old_text: String,
    pub new_text: Option<String>,
    /// The edit is mechanical and needs no review
    pub automatic: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationError {
    pub message: String,
    pub severity: Severity,
    pub file_path: Option<String>,
    pub line: Option<usize>,
}

impl ValidationError {
    fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity,
            file_path: None,
            line: None,
        }
    }

    fn at(mut self, file_path: &str, line: usize) -> Self {
        self.file_path = Some(file_path.to_string());
        self.line = Some(line);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AutoFixSuggestion {
    pub file_path: String,
    pub line: usize,
    pub column: usize,
    pub description: String,
    pub old_text: String,
    pub new_text: String,
    pub confidence: f64,
    pub safe: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChangeImpactResult {
    pub change: SymbolChange,
    pub impact: Impact,
    pub broken_references: Vec<BrokenReference>,
    pub required_updates: Vec<RequiredUpdate>,
    pub validation_errors: Vec<ValidationError>,
    pub auto_fix_suggestions: Vec<AutoFixSuggestion>,
    pub can_auto_fix: bool,
}

impl ChangeImpactResult {
    pub fn has_errors(&self) -> bool {
        self.validation_errors
            .iter()
            .any(|e| e.severity == Severity::Error)
    }
}

/// A change that could not be analysed at all
#[derive(Debug, Clone, Serialize)]
pub struct ChangeFailure {
    pub symbol: String,
    pub change: &'static str,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkImpactReport {
    pub results: Vec<ChangeImpactResult>,
    pub failures: Vec<ChangeFailure>,
    pub total_broken_references: usize,
    pub total_required_updates: usize,
    pub highest_risk: RiskLevel,
    pub can_auto_fix_all: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationError>,
    pub failures: Vec<ChangeFailure>,
}

pub struct ChangeTracker {
    impact: ImpactAnalyzer,
    db: IndexDatabase,
}

impl ChangeTracker {
    pub fn new(db: IndexDatabase) -> Self {
        Self {
            impact: ImpactAnalyzer::new(db.clone()),
            db,
        }
    }

    pub fn with_impact_depth(mut self, depth: usize) -> Self {
        self.impact = self.impact.with_depth(depth);
        self
    }

    pub fn analyze_symbol_change(&self, change: &SymbolChange) -> Result<ChangeImpactResult> {
        let targets = self.impact.definitions(&change.symbol)?;
        let impact = self.impact.impact_of(&change.symbol, &targets)?;
        let declaration = &targets[0];

        let mut result = ChangeImpactResult {
            change: change.clone(),
            broken_references: Vec::new(),
            required_updates: Vec::new(),
            validation_errors: Vec::new(),
            auto_fix_suggestions: Vec::new(),
            can_auto_fix: false,
            impact,
        };

        match &change.change {
            ChangeType::Delete => self.check_delete(declaration, &mut result),
            ChangeType::Rename { new_name } => self.check_rename(declaration, new_name, &mut result)?,
            ChangeType::Modify { new } => self.check_modify(declaration, new, &mut result),
        }

        let deleting_used = matches!(change.change, ChangeType::Delete)
            && !result.impact.references.is_empty();
        result.can_auto_fix = !deleting_used
            && !result.auto_fix_suggestions.is_empty()
            && !result.has_errors()
            && result.auto_fix_suggestions.iter().all(|s| s.safe);

        debug!(
            "{} {}: {} broken, {} updates, {} validation errors, auto-fix {}",
            change.change.as_str(),
            change.symbol,
            result.broken_references.len(),
            result.required_updates.len(),
            result.validation_errors.len(),
            result.can_auto_fix
        );
        Ok(result)
    }

    /// Analyse each change on its own; a failing change is recorded and the
    /// rest still run
    pub fn analyze_bulk_impact(&self, changes: &[SymbolChange]) -> BulkImpactReport {
        let mut results = Vec::new();
        let mut failures = Vec::new();

        for change in changes {
            match self.analyze_symbol_change(change) {
                Ok(result) => results.push(result),
                Err(e) => {
                    warn!("Could not analyse {} of {}: {:#}", change.change.as_str(), change.symbol, e);
                    failures.push(failure(change, &e));
                }
            }
        }

        BulkImpactReport {
            total_broken_references: results.iter().map(|r| r.broken_references.len()).sum(),
            total_required_updates: results.iter().map(|r| r.required_updates.len()).sum(),
            highest_risk: results
                .iter()
                .map(|r| r.impact.risk_level)
                .max()
                .unwrap_or(RiskLevel::Low),
            can_auto_fix_all: failures.is_empty() && results.iter().all(|r| r.can_auto_fix),
            results,
            failures,
        }
    }

    /// Collect validation errors across changes. Valid means no change
    /// failed and none produced an error-severity finding.
    pub fn validate_changes(&self, changes: &[SymbolChange]) -> ValidationReport {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut failures = Vec::new();

        for change in changes {
            match self.analyze_symbol_change(change) {
                Ok(result) => {
                    for err in result.validation_errors {
                        match err.severity {
                            Severity::Error => errors.push(err),
                            Severity::Warning => warnings.push(err),
                        }
                    }
                    for broken in result.broken_references {
                        if broken.severity == Severity::Error {
                            errors.push(
                                ValidationError::new(Severity::Error, broken.reason)
                                    .at(&broken.reference.file_path, broken.reference.line),
                            );
                        }
                    }
                }
                Err(e) => failures.push(failure(change, &e)),
            }
        }

        ValidationReport {
            valid: errors.is_empty() && failures.is_empty(),
            errors,
            warnings,
            failures,
        }
    }

    fn check_delete(&self, declaration: &Symbol, result: &mut ChangeImpactResult) {
        let name = &declaration.name;

        for reference in &result.impact.references {
            result.broken_references.push(BrokenReference {
                reference: reference.clone(),
                reason: format!("references deleted symbol '{name}'"),
                severity: Severity::Error,
            });
            result.required_updates.push(RequiredUpdate {
                file_path: reference.file_path.clone(),
                line: reference.line,
                column: reference.column,
                description: format!("Remove or replace the use of '{name}'"),
                old_text: name.clone(),
                new_text: None,
                automatic: false,
            });
        }

        if result.impact.references.is_empty() {
            result.auto_fix_suggestions.push(AutoFixSuggestion {
                file_path: declaration.file_path.clone(),
                line: declaration.range.start_line,
                column: declaration.range.start_column,
                description: format!(
                    "Remove the declaration of '{}' (lines {}-{})",
                    name, declaration.range.start_line, declaration.range.end_line
                ),
                old_text: declaration.signature.clone().unwrap_or_else(|| name.clone()),
                new_text: String::new(),
                confidence: 1.0,
                safe: true,
            });
        }
    }

    fn check_rename(&self, declaration: &Symbol, new_name: &str, result: &mut ChangeImpactResult) -> Result<()> {
        let old_name = &declaration.name;

        if new_name == old_name {
            result
                .validation_errors
                .push(ValidationError::new(Severity::Warning, format!("'{old_name}' is already named '{new_name}'")));
            return Ok(());
        }
        if !is_identifier(new_name) {
            result.validation_errors.push(ValidationError::new(
                Severity::Error,
                format!("'{new_name}' is not a valid identifier"),
            ));
        }
        for existing in self.db.find_symbols_by_name(new_name)? {
            result.validation_errors.push(
                ValidationError::new(
                    Severity::Error,
                    format!("naming conflict: '{new_name}' already exists as a {}", existing.kind.as_str()),
                )
                .at(&existing.file_path, existing.range.start_line),
            );
        }

        for reference in &result.impact.references {
            result.required_updates.push(RequiredUpdate {
                file_path: reference.file_path.clone(),
                line: reference.line,
                column: reference.column,
                description: format!("Rename '{old_name}' to '{new_name}'"),
                old_text: old_name.clone(),
                new_text: Some(new_name.to_string()),
                automatic: true,
            });
            result.auto_fix_suggestions.push(rename_edit(
                &reference.file_path,
                reference.line,
                reference.column,
                old_name,
                new_name,
            ));
        }

        // The declaration site itself
        result.auto_fix_suggestions.push(rename_edit(
            &declaration.file_path,
            declaration.range.start_line,
            declaration.range.start_column,
            old_name,
            new_name,
        ));
        Ok(())
    }

    fn check_modify(&self, stored: &Symbol, proposed: &Symbol, result: &mut ChangeImpactResult) {
        let name = &stored.name;

        if stored.signature != proposed.signature {
            let old_sig = stored.signature.clone().unwrap_or_default();
            let new_sig = proposed.signature.clone().unwrap_or_default();
            result.validation_errors.push(
                ValidationError::new(
                    Severity::Warning,
                    format!("signature of '{name}' changes from `{old_sig}` to `{new_sig}`"),
                )
                .at(&stored.file_path, stored.range.start_line),
            );
            for reference in result
                .impact
                .references
                .iter()
                .filter(|r| r.reference_type == ReferenceType::Call)
            {
                result.required_updates.push(RequiredUpdate {
                    file_path: reference.file_path.clone(),
                    line: reference.line,
                    column: reference.column,
                    description: format!("Check the call to '{name}' against the new signature"),
                    old_text: old_sig.clone(),
                    new_text: Some(new_sig.clone()),
                    automatic: false,
                });
            }
        }

        if stored.kind != proposed.kind {
            result.validation_errors.push(ValidationError::new(
                Severity::Warning,
                format!(
                    "'{name}' changes kind from {} to {}",
                    stored.kind.as_str(),
                    proposed.kind.as_str()
                ),
            ));
        }

        if stored.visibility == Visibility::Public && proposed.visibility != Visibility::Public {
            for reference in result
                .impact
                .references
                .iter()
                .filter(|r| r.file_path != stored.file_path)
            {
                let reason = format!(
                    "'{name}' becomes {} but is used from {}",
                    proposed.visibility.as_str(),
                    reference.file_path
                );
                result.validation_errors.push(
                    ValidationError::new(Severity::Error, reason.clone())
                        .at(&reference.file_path, reference.line),
                );
                result.broken_references.push(BrokenReference {
                    reference: reference.clone(),
                    reason,
                    severity: Severity::Error,
                });
            }
        }

        if stored.is_exported() && !proposed.is_exported() {
            result.validation_errors.push(
                ValidationError::new(
                    Severity::Error,
                    format!("breaking API change: '{name}' is no longer exported"),
                )
                .at(&stored.file_path, stored.range.start_line),
            );
        }
    }
}

fn rename_edit(file_path: &str, line: usize, column: usize, old: &str, new: &str) -> AutoFixSuggestion {
    AutoFixSuggestion {
        file_path: file_path.to_string(),
        line,
        column,
        description: format!("Replace '{old}' with '{new}'"),
        old_text: old.to_string(),
        new_text: new.to_string(),
        confidence: RENAME_CONFIDENCE,
        safe: true,
    }
}

fn failure(change: &SymbolChange, err: &anyhow::Error) -> ChangeFailure {
    ChangeFailure {
        symbol: change.symbol.clone(),
        change: change.change.as_str(),
        error: format!("{err:#}"),
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => chars.all(|c| c.is_alphanumeric() || c == '_'),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_identifier() {
        assert!(is_identifier("NewName"));
        assert!(is_identifier("_private2"));
        assert!(!is_identifier("2fast"));
        assert!(!is_identifier("has-dash"));
        assert!(!is_identifier(""));
    }

    #[test]
    fn test_change_type_serializes_tagged() {
        let change = SymbolChange::rename("Foo", "Bar");
        let json = serde_json::to_value(&change).unwrap();
        assert_eq!(json["change"]["type"], "rename");
        assert_eq!(json["change"]["new_name"], "Bar");
        assert_eq!(SymbolChange::delete("Foo").change.as_str(), "delete");
    }
}
