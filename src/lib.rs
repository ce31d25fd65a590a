//! Incremental code-symbol index with dependency, impact and semantic analysis.
//!
//! Source files are parsed with tree-sitter into symbols, imports,
//! relationships and references, stored in a per-project SQLite database and
//! kept current by hash-gated re-indexing and an optional file watcher.

pub mod analysis;
pub mod cli;
pub mod config;
pub mod error;
pub mod graph;
pub mod index;
pub mod indexer;
pub mod query;

pub use config::Config;
pub use error::{AnalysisError, FileError};
pub use indexer::Indexer;
