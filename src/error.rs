//! Typed errors.
//!
//! Operations that abort return `anyhow::Error`. The two enums here are the
//! failures callers match on: per-file indexing errors, which are collected
//! into the index report while the run continues, and analysis lookups.

use std::path::PathBuf;
use thiserror::Error;

/// A single file failed to index. Never aborts a run.
#[derive(Debug, Error)]
pub enum FileError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("failed to store {}: {message}", path.display())]
    Store { path: PathBuf, message: String },

    #[error("worker failed on {}: {message}", path.display())]
    Worker { path: PathBuf, message: String },
}

impl FileError {
    pub fn path(&self) -> &PathBuf {
        match self {
            FileError::Read { path, .. }
            | FileError::Parse { path, .. }
            | FileError::Store { path, .. }
            | FileError::Worker { path, .. } => path,
        }
    }

    /// Short category label for reports
    pub fn kind(&self) -> &'static str {
        match self {
            FileError::Read { .. } => "read",
            FileError::Parse { .. } => "parse",
            FileError::Store { .. } => "store",
            FileError::Worker { .. } => "worker",
        }
    }
}

/// Analysis lookups that can fail on user input
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("symbol not found: {0}")]
    SymbolNotFound(String),
}
