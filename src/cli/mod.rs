// CLI command implementations

pub mod analyze;
pub mod impact;
pub mod index;
pub mod languages;
pub mod query;
pub mod stats;

use std::path::Path;

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::Serialize;

use crate::config::{Config, DB_FILE};
use crate::index::db::IndexDatabase;
use crate::index::Project;

/// How command results are printed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

pub(crate) fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Read-only handle on an existing index
pub(crate) struct OpenIndex {
    pub db: IndexDatabase,
    pub project: Project,
    pub config: Config,
}

/// Open the database of an already-indexed project without spawning a writer
pub(crate) fn open_index(project_dir: &Path) -> Result<OpenIndex> {
    let root = project_dir
        .canonicalize()
        .with_context(|| format!("Project root not found: {}", project_dir.display()))?;
    let db_path = root.join(DB_FILE);
    if !db_path.exists() {
        anyhow::bail!(
            "No index at {}; run `symgraph index -p {}` first",
            db_path.display(),
            project_dir.display()
        );
    }

    let db = IndexDatabase::new(&db_path)?;
    let project = db
        .get_project_by_path(&root.to_string_lossy())?
        .with_context(|| format!("Project {} is not registered in its index", root.display()))?;
    let config = Config::from_project_dir(&root);

    Ok(OpenIndex { db, project, config })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_index_requires_database() {
        let dir = tempdir().unwrap();
        let err = open_index(dir.path()).err().unwrap();
        assert!(err.to_string().contains("symgraph index"));
    }
}
