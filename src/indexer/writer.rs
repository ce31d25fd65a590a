//! Single-writer actor for the symbol store.
//!
//! Every mutation of the index goes through one [`StoreWriter`] thread that
//! owns a pooled connection for its whole lifetime. Callers talk to it through
//! a cloneable [`WriterHandle`]; each command carries a oneshot reply, so at
//! most one write transaction is ever in flight.

use std::collections::HashSet;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::index::db::IndexDatabase;
use crate::index::persist::{self, SymbolWorkflow, WriteStats};
use crate::index::{File, ParseResult, Project};

const COMMAND_BUFFER: usize = 64;

type Reply<T> = oneshot::Sender<Result<T>>;

/// The writer thread is gone; no further writes are possible
#[derive(Debug, thiserror::Error)]
#[error("store writer has shut down")]
pub struct WriterClosed;

/// Commands accepted by the writer thread
pub enum WriteCommand {
    UpsertProject {
        path: String,
        name: String,
        reply: Reply<Project>,
    },
    Persist {
        project_id: i64,
        file: Box<File>,
        parse: Box<ParseResult>,
        reply: Reply<WriteStats>,
    },
    RemoveFile {
        project_id: i64,
        relative_path: String,
        reply: Reply<bool>,
    },
    Prune {
        project_id: i64,
        keep: HashSet<String>,
        reply: Reply<usize>,
    },
    ResolveLinks {
        project_id: i64,
        reply: Reply<usize>,
    },
    FinishIndex {
        project_id: i64,
        reply: Reply<Project>,
    },
    UpdateWorkflow {
        symbol_id: i64,
        workflow: SymbolWorkflow,
        reply: Reply<bool>,
    },
}

/// Owner of the write connection
pub struct StoreWriter;

impl StoreWriter {
    /// Start the writer thread and return a handle to it.
    ///
    /// The thread exits once every handle has been dropped.
    pub fn spawn(db: IndexDatabase) -> Result<WriterHandle> {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let conn = db.get_conn().context("Failed to acquire write connection")?;

        let thread = thread::Builder::new()
            .name("symgraph-writer".to_string())
            .spawn(move || run(conn, rx))
            .context("Failed to spawn store writer thread")?;

        debug!("Store writer started for {}", db.db_path().display());
        Ok(WriterHandle {
            tx,
            _thread: std::sync::Arc::new(WriterThread(Some(thread))),
        })
    }
}

fn run(mut conn: crate::index::db::PooledConnection, mut rx: mpsc::Receiver<WriteCommand>) {
    let mut commands = 0usize;

    while let Some(command) = rx.blocking_recv() {
        commands += 1;
        match command {
            WriteCommand::UpsertProject { path, name, reply } => {
                let _ = reply.send(persist::upsert_project(&conn, &path, &name));
            }
            WriteCommand::Persist {
                project_id,
                file,
                parse,
                reply,
            } => {
                let result = persist::persist_file(&mut conn, project_id, &file, &parse)
                    .with_context(|| format!("Failed to persist {}", file.relative_path));
                if let Err(e) = &result {
                    warn!("{:#}", e);
                }
                let _ = reply.send(result);
            }
            WriteCommand::RemoveFile {
                project_id,
                relative_path,
                reply,
            } => {
                let _ = reply.send(persist::remove_file(&conn, project_id, &relative_path));
            }
            WriteCommand::Prune {
                project_id,
                keep,
                reply,
            } => {
                let _ = reply.send(persist::prune_files(&mut conn, project_id, &keep));
            }
            WriteCommand::ResolveLinks { project_id, reply } => {
                let _ = reply.send(persist::resolve_links(&mut conn, project_id));
            }
            WriteCommand::FinishIndex { project_id, reply } => {
                let _ = reply.send(persist::refresh_project_stats(&conn, project_id));
            }
            WriteCommand::UpdateWorkflow {
                symbol_id,
                workflow,
                reply,
            } => {
                let _ = reply.send(persist::update_symbol_workflow(&conn, symbol_id, &workflow));
            }
        }
    }

    info!("Store writer stopped after {} commands", commands);
}

struct WriterThread(Option<JoinHandle<()>>);

impl Drop for WriterThread {
    fn drop(&mut self) {
        // All senders are gone by the time the last handle drops, so the loop
        // has ended or is draining its final command.
        if let Some(handle) = self.0.take() {
            if handle.join().is_err() {
                warn!("Store writer thread panicked");
            }
        }
    }
}

/// Cloneable async front for the writer thread
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<WriteCommand>,
    _thread: std::sync::Arc<WriterThread>,
}

impl WriterHandle {
    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> WriteCommand) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| WriterClosed)?;
        rx.await.map_err(|_| WriterClosed)?
    }

    pub async fn upsert_project(&self, path: &str, name: &str) -> Result<Project> {
        let (path, name) = (path.to_string(), name.to_string());
        self.request(|reply| WriteCommand::UpsertProject { path, name, reply })
            .await
    }

    pub async fn persist(&self, project_id: i64, file: File, parse: ParseResult) -> Result<WriteStats> {
        self.request(|reply| WriteCommand::Persist {
            project_id,
            file: Box::new(file),
            parse: Box::new(parse),
            reply,
        })
        .await
    }

    pub async fn remove_file(&self, project_id: i64, relative_path: &str) -> Result<bool> {
        let relative_path = relative_path.to_string();
        self.request(|reply| WriteCommand::RemoveFile {
            project_id,
            relative_path,
            reply,
        })
        .await
    }

    pub async fn prune(&self, project_id: i64, keep: HashSet<String>) -> Result<usize> {
        self.request(|reply| WriteCommand::Prune {
            project_id,
            keep,
            reply,
        })
        .await
    }

    pub async fn resolve_links(&self, project_id: i64) -> Result<usize> {
        self.request(|reply| WriteCommand::ResolveLinks { project_id, reply })
            .await
    }

    /// Recompute project language stats after the join point
    pub async fn finish_index(&self, project_id: i64) -> Result<Project> {
        self.request(|reply| WriteCommand::FinishIndex { project_id, reply })
            .await
    }

    pub async fn update_workflow(&self, symbol_id: i64, workflow: SymbolWorkflow) -> Result<bool> {
        self.request(|reply| WriteCommand::UpdateWorkflow {
            symbol_id,
            workflow,
            reply,
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{Range, Symbol, SymbolKind};
    use tempfile::tempdir;

    fn file(rel: &str, hash: &str) -> File {
        File {
            id: 0,
            project_id: 0,
            path: format!("/tmp/proj/{rel}"),
            relative_path: rel.to_string(),
            language: "go".to_string(),
            size: 10,
            lines_of_code: 3,
            hash: hash.to_string(),
            last_modified: 0,
            last_indexed: 0,
        }
    }

    fn parse_with(name: &str, hash: &str) -> ParseResult {
        let mut symbol = Symbol::new(
            name,
            SymbolKind::Function,
            "a.go",
            Range {
                start_line: 1,
                end_line: 3,
                ..Default::default()
            },
        );
        symbol.content_hash = hash.to_string();
        ParseResult {
            symbols: vec![symbol],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_writer_persists_and_reports_stats() {
        let dir = tempdir().unwrap();
        let db = IndexDatabase::new(dir.path().join("index.db")).unwrap();
        let writer = StoreWriter::spawn(db.clone()).unwrap();

        let project = writer.upsert_project("/tmp/proj", "proj").await.unwrap();
        let stats = writer
            .persist(project.id, file("a.go", "h1"), parse_with("Foo", "s1"))
            .await
            .unwrap();
        assert_eq!(stats.symbols_inserted, 1);

        let again = writer
            .persist(project.id, file("a.go", "h2"), parse_with("Foo", "s1"))
            .await
            .unwrap();
        assert_eq!(again.symbols_written(), 0);
        assert_eq!(again.symbols_unchanged, 1);

        let project = writer.finish_index(project.id).await.unwrap();
        assert_eq!(project.language_stats.get("go"), Some(&1));
        assert!(project.last_indexed.is_some());

        assert!(writer.remove_file(project.id, "a.go").await.unwrap());
        assert!(db.find_symbols_by_name("Foo").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clones_share_one_writer() {
        let dir = tempdir().unwrap();
        let db = IndexDatabase::new(dir.path().join("index.db")).unwrap();
        let writer = StoreWriter::spawn(db.clone()).unwrap();
        let project = writer.upsert_project("/tmp/proj", "proj").await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..8 {
            let writer = writer.clone();
            tasks.push(tokio::spawn(async move {
                let rel = format!("f{i}.go");
                writer
                    .persist(project.id, file(&rel, "h"), parse_with(&format!("F{i}"), "s"))
                    .await
            }));
        }
        for task in futures::future::join_all(tasks).await {
            task.unwrap().unwrap();
        }

        assert_eq!(db.list_files(project.id).unwrap().len(), 8);
    }
}
