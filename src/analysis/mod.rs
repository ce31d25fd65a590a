//! Read-only analyses over the persisted symbol graph.

pub mod change;
pub mod impact;
pub mod imports;
pub mod semantic;

use serde::{Deserialize, Serialize};

pub use change::{ChangeImpactResult, ChangeTracker, ChangeType, SymbolChange};
pub use impact::{Impact, ImpactAnalyzer, RiskLevel};
pub use imports::{ImportResolver, SubstringImportResolver};
pub use semantic::{SemanticAnalyzer, SemanticReport};

/// Only `Error` blocks automatic fixes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

/// A located diagnostic produced by an analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub severity: Severity,
    pub message: String,
    pub symbol: Option<String>,
    pub file_path: Option<String>,
    pub line: Option<usize>,
}

impl Finding {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            symbol: None,
            file_path: None,
            line: None,
        }
    }

    pub fn at(mut self, file_path: &str, line: usize) -> Self {
        self.file_path = Some(file_path.to_string());
        self.line = Some(line);
        self
    }

    pub fn symbol(mut self, name: &str) -> Self {
        self.symbol = Some(name.to_string());
        self
    }

    /// `file:line` when both are known
    pub fn location(&self) -> Option<String> {
        match (&self.file_path, self.line) {
            (Some(file), Some(line)) => Some(format!("{file}:{line}")),
            (Some(file), None) => Some(file.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finding_location() {
        let finding = Finding::new(Severity::Error, "undefined: Foo")
            .symbol("Foo")
            .at("b.go", 7);
        assert_eq!(finding.location().as_deref(), Some("b.go:7"));
        assert_eq!(finding.symbol.as_deref(), Some("Foo"));

        assert!(Finding::new(Severity::Warning, "x").location().is_none());
    }

    #[test]
    fn test_severity_orders_error_highest() {
        assert!(Severity::Error > Severity::Warning);
        assert_eq!(serde_json::to_string(&Severity::Error).unwrap(), "\"error\"");
    }
}
