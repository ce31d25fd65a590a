// Code indexing and file watching

pub mod extract;
pub mod pipeline;
pub mod watcher;
pub mod writer;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::config::{Config, DB_FILE};
use crate::error::FileError;
use crate::index::db::IndexDatabase;
use crate::index::persist::SymbolWorkflow;
use crate::index::Project;
use extract::ExtractorRegistry;
use pipeline::{relative_path, FileOutcome, IndexOptions, IndexReport, WorkerContext};
use writer::{StoreWriter, WriterClosed, WriterHandle};

/// Coordinates extraction and storage for one project root
pub struct Indexer {
    root: PathBuf,
    config: Config,
    db: IndexDatabase,
    registry: ExtractorRegistry,
    writer: WriterHandle,
    project: Project,
}

impl Indexer {
    /// Open (or create) the index for `root`, reading `.symgraph.toml` if present
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let config = Config::from_project_dir(root.as_ref());
        Self::with_config(root, config).await
    }

    pub async fn with_config(root: impl AsRef<Path>, config: Config) -> Result<Self> {
        let root = root
            .as_ref()
            .canonicalize()
            .with_context(|| format!("Project root not found: {}", root.as_ref().display()))?;

        let db = IndexDatabase::new(root.join(DB_FILE))?;
        let registry = ExtractorRegistry::with_languages(&config.enabled_languages());
        let writer = StoreWriter::spawn(db.clone())?;

        let name = if config.project.name.is_empty() {
            root.file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "project".to_string())
        } else {
            config.project.name.clone()
        };
        let project = writer
            .upsert_project(&root.to_string_lossy(), &name)
            .await
            .context("Failed to register project")?;

        debug!("Opened project {} (id {})", project.name, project.id);

        Ok(Self {
            root,
            config,
            db,
            registry,
            writer,
            project,
        })
    }

    /// Default run options derived from the loaded config
    pub fn options(&self) -> IndexOptions {
        IndexOptions::from_config(&self.config)
    }

    /// Index the whole project
    pub async fn index_all(&mut self, options: IndexOptions) -> Result<IndexReport> {
        let ctx = WorkerContext {
            root: self.root.clone(),
            project_id: self.project.id,
            registry: self.registry.clone(),
            known_hashes: self.db.file_hashes(self.project.id)?,
            force: options.force,
        };

        let report = pipeline::run(&self.config, ctx, &self.writer, &options).await?;
        if let Some(project) = &report.project {
            self.project = project.clone();
        }
        Ok(report)
    }

    /// Index a single file through the same read/hash/parse/persist path as a full run
    pub async fn index_file(&self, path: impl AsRef<Path>) -> Result<FileOutcome> {
        let path = self.absolute(path.as_ref());
        let rel = relative_path(&self.root, &path);

        if !self.config.should_index_file(&rel) {
            return Ok(FileOutcome::Unsupported { relative_path: rel });
        }

        let mut known_hashes = HashMap::new();
        if let Some(file) = self.db.get_file(self.project.id, &rel)? {
            known_hashes.insert(rel.clone(), file.hash);
        }
        let ctx = WorkerContext {
            root: self.root.clone(),
            project_id: self.project.id,
            registry: self.registry.clone(),
            known_hashes,
            force: false,
        };

        let outcome = tokio::task::spawn_blocking(move || ctx.process(&path))
            .await
            .context("Parser task failed")?;

        let FileOutcome::Parsed { file, parse } = outcome else {
            return Ok(outcome);
        };

        match self.writer.persist(self.project.id, *file, *parse).await {
            Ok(stats) => {
                self.writer.resolve_links(self.project.id).await?;
                info!(
                    "Indexed {}: {} symbols written, {} removed",
                    rel,
                    stats.symbols_written(),
                    stats.symbols_removed
                );
                Ok(FileOutcome::Indexed {
                    relative_path: rel,
                    stats,
                })
            }
            Err(e) if e.downcast_ref::<WriterClosed>().is_some() => Err(e),
            Err(e) => Ok(FileOutcome::Failed(FileError::Store {
                path: PathBuf::from(rel),
                message: format!("{e:#}"),
            })),
        }
    }

    /// Drop a file and everything it owns from the index
    pub async fn remove_file(&self, path: impl AsRef<Path>) -> Result<bool> {
        let path = self.absolute(path.as_ref());
        let rel = relative_path(&self.root, &path);

        let removed = self.writer.remove_file(self.project.id, &rel).await?;
        if removed {
            info!("Removed {} from the index", rel);
        }
        Ok(removed)
    }

    /// Set workflow metadata on a symbol. Survives re-indexing.
    pub async fn set_workflow(&self, symbol_id: i64, workflow: SymbolWorkflow) -> Result<bool> {
        self.writer.update_workflow(symbol_id, workflow).await
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn db(&self) -> &IndexDatabase {
        &self.db
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &ExtractorRegistry {
        &self.registry
    }

    fn absolute(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            // Watchers report canonical paths on most platforms, but not for
            // files that were just removed
            path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
        } else {
            self.root.join(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_open_registers_project() {
        let dir = tempdir().unwrap();
        let indexer = Indexer::open(dir.path()).await.unwrap();

        assert!(indexer.root().join(DB_FILE).exists());
        assert_eq!(indexer.project().path, indexer.root().to_string_lossy());
        assert!(indexer.project().last_indexed.is_none());
    }

    #[tokio::test]
    async fn test_open_missing_root_fails() {
        let dir = tempdir().unwrap();
        let result = Indexer::open(dir.path().join("nope")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_index_file_then_remove() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "def foo():\n    return 1\n").unwrap();
        let indexer = Indexer::open(dir.path()).await.unwrap();

        let outcome = indexer.index_file("a.py").await.unwrap();
        assert!(matches!(outcome, FileOutcome::Indexed { ref relative_path, .. } if relative_path == "a.py"));
        assert_eq!(indexer.db().find_symbols_by_name("foo").unwrap().len(), 1);

        let again = indexer.index_file("a.py").await.unwrap();
        assert!(matches!(again, FileOutcome::Unchanged { .. }));

        assert!(indexer.remove_file("a.py").await.unwrap());
        assert!(indexer.db().find_symbols_by_name("foo").unwrap().is_empty());
        assert!(!indexer.remove_file("a.py").await.unwrap());
    }

    #[tokio::test]
    async fn test_index_file_respects_excludes() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("vendor")).unwrap();
        std::fs::write(dir.path().join("vendor/x.go"), "package x\n").unwrap();
        let indexer = Indexer::open(dir.path()).await.unwrap();

        let outcome = indexer.index_file("vendor/x.go").await.unwrap();
        assert!(matches!(outcome, FileOutcome::Unsupported { .. }));
    }
}
