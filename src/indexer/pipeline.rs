//! Full-project indexing pipeline.
//!
//! Stages: walker -> parser workers -> collector -> store writer.
//! Stages are connected by bounded tokio channels, so a slow writer applies
//! backpressure all the way up to the directory walk.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use indicatif::ProgressBar;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::extract::ExtractorRegistry;
use super::writer::{WriterClosed, WriterHandle};
use crate::config::Config;
use crate::error::FileError;
use crate::index::db::now;
use crate::index::persist::WriteStats;
use crate::index::{File, ParseResult, Project};

/// Knobs for one indexing run
#[derive(Clone)]
pub struct IndexOptions {
    pub workers: usize,
    pub channel_capacity: usize,
    /// Re-parse files whose content hash is unchanged
    pub force: bool,
    pub cancel: CancellationToken,
    pub progress: Option<ProgressBar>,
}

impl IndexOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            workers: config.worker_count(),
            channel_capacity: config.indexing.channel_capacity.max(1),
            force: false,
            cancel: CancellationToken::new(),
            progress: None,
        }
    }
}

impl std::fmt::Debug for IndexOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexOptions")
            .field("workers", &self.workers)
            .field("channel_capacity", &self.channel_capacity)
            .field("force", &self.force)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Summary of a full indexing run
#[derive(Debug, Default)]
pub struct IndexReport {
    pub files_seen: usize,
    pub files_indexed: usize,
    pub files_unchanged: usize,
    /// Files with no registered extractor
    pub files_skipped: usize,
    pub files_removed: usize,
    pub links_resolved: usize,
    pub errors: Vec<FileError>,
    pub stats: WriteStats,
    pub cancelled: bool,
    pub elapsed_ms: u128,
    /// Refreshed project row; None when the run was cancelled
    pub project: Option<Project>,
}

impl IndexReport {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// JSON view of a report; file errors are flattened to strings
#[derive(Debug, Serialize)]
pub struct IndexReportView<'a> {
    pub files_seen: usize,
    pub files_indexed: usize,
    pub files_unchanged: usize,
    pub files_skipped: usize,
    pub files_removed: usize,
    pub links_resolved: usize,
    pub errors: Vec<String>,
    pub stats: &'a WriteStats,
    pub cancelled: bool,
    pub elapsed_ms: u128,
    pub project: Option<&'a Project>,
}

impl<'a> From<&'a IndexReport> for IndexReportView<'a> {
    fn from(report: &'a IndexReport) -> Self {
        Self {
            files_seen: report.files_seen,
            files_indexed: report.files_indexed,
            files_unchanged: report.files_unchanged,
            files_skipped: report.files_skipped,
            files_removed: report.files_removed,
            links_resolved: report.links_resolved,
            errors: report.errors.iter().map(|e| e.to_string()).collect(),
            stats: &report.stats,
            cancelled: report.cancelled,
            elapsed_ms: report.elapsed_ms,
            project: report.project.as_ref(),
        }
    }
}

/// What happened to one file
#[derive(Debug)]
pub enum FileOutcome {
    /// Parsed by a worker and waiting for the writer
    Parsed {
        file: Box<File>,
        parse: Box<ParseResult>,
    },
    /// Persisted by the writer
    Indexed {
        relative_path: String,
        stats: WriteStats,
    },
    /// Stored hash matches the file on disk
    Unchanged { relative_path: String },
    /// Excluded by config or no extractor for the language
    Unsupported { relative_path: String },
    Failed(FileError),
}

impl FileOutcome {
    pub fn relative_path(&self) -> &str {
        match self {
            FileOutcome::Parsed { file, .. } => &file.relative_path,
            FileOutcome::Indexed { relative_path, .. }
            | FileOutcome::Unchanged { relative_path }
            | FileOutcome::Unsupported { relative_path } => relative_path,
            FileOutcome::Failed(err) => err.path().to_str().unwrap_or_default(),
        }
    }
}

/// Project-relative path with forward slashes
pub fn relative_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Everything a worker needs to turn a path into a [`FileOutcome`]
pub(crate) struct WorkerContext {
    pub root: PathBuf,
    pub project_id: i64,
    pub registry: ExtractorRegistry,
    /// relative path -> stored file hash
    pub known_hashes: HashMap<String, String>,
    pub force: bool,
}

impl WorkerContext {
    /// Read, hash and parse one file. Blocking.
    pub fn process(&self, path: &Path) -> FileOutcome {
        let rel = relative_path(&self.root, path);

        let Some(language) = self.registry.detect_language(path) else {
            return FileOutcome::Unsupported { relative_path: rel };
        };
        let Some(extractor) = self.registry.get(language) else {
            return FileOutcome::Unsupported { relative_path: rel };
        };

        let content = match std::fs::read(path) {
            Ok(content) => content,
            Err(source) => {
                return FileOutcome::Failed(FileError::Read {
                    path: PathBuf::from(rel),
                    source,
                })
            }
        };

        let hash = blake3::hash(&content).to_hex().to_string();
        if !self.force && self.known_hashes.get(&rel) == Some(&hash) {
            return FileOutcome::Unchanged { relative_path: rel };
        }

        let mut parse = match extractor.parse(&content, &rel) {
            Ok(parse) => parse,
            Err(e) => {
                return FileOutcome::Failed(FileError::Parse {
                    path: PathBuf::from(rel),
                    message: format!("{e:#}"),
                })
            }
        };

        for symbol in &mut parse.symbols {
            if symbol.file_path.is_empty() {
                symbol.file_path = rel.clone();
            }
            if symbol.content_hash.is_empty() {
                let span = content
                    .get(symbol.range.start_byte..symbol.range.end_byte)
                    .unwrap_or_default();
                symbol.content_hash = blake3::hash(span).to_hex().to_string();
            }
        }

        let last_modified = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .map(|t| DateTime::<Utc>::from(t).timestamp())
            .unwrap_or_default();

        let text = String::from_utf8_lossy(&content);
        let file = File {
            id: 0,
            project_id: self.project_id,
            path: path.to_string_lossy().to_string(),
            relative_path: rel,
            language: language.to_string(),
            size: content.len() as u64,
            lines_of_code: text.lines().filter(|l| !l.trim().is_empty()).count(),
            hash,
            last_modified,
            last_indexed: now(),
        };

        FileOutcome::Parsed {
            file: Box::new(file),
            parse: Box::new(parse),
        }
    }
}

/// Walk, parse and persist the whole project
pub(crate) async fn run(
    config: &Config,
    ctx: WorkerContext,
    writer: &WriterHandle,
    options: &IndexOptions,
) -> Result<IndexReport> {
    let started = Instant::now();
    let root = ctx.root.clone();
    let project_id = ctx.project_id;

    if !root.is_dir() {
        bail!("Project root is not a directory: {}", root.display());
    }

    let workers = options.workers.max(1);
    let capacity = options.channel_capacity.max(1);
    info!(
        "Indexing {} with {} workers (force: {})",
        root.display(),
        workers,
        options.force
    );

    let (path_tx, path_rx) = mpsc::channel::<PathBuf>(capacity);
    let (result_tx, mut result_rx) = mpsc::channel::<FileOutcome>(capacity);

    let walk_config = config.clone();
    let walk_root = root.clone();
    let walk_cancel = options.cancel.clone();
    let walker = tokio::task::spawn_blocking(move || {
        walk_project(&walk_root, &walk_config, &path_tx, &walk_cancel)
    });

    let ctx = Arc::new(ctx);
    let path_rx = Arc::new(Mutex::new(path_rx));
    let mut handles = Vec::with_capacity(workers);
    for id in 0..workers {
        handles.push(tokio::spawn(worker_loop(
            id,
            path_rx.clone(),
            result_tx.clone(),
            ctx.clone(),
            options.cancel.clone(),
        )));
    }
    drop(path_rx);
    drop(result_tx);

    let mut report = IndexReport::default();
    let mut keep = HashSet::new();

    while let Some(outcome) = result_rx.recv().await {
        report.files_seen += 1;
        if let Some(pb) = &options.progress {
            pb.inc(1);
            pb.set_message(outcome.relative_path().to_string());
        }

        match outcome {
            FileOutcome::Parsed { file, parse } => {
                let rel = file.relative_path.clone();
                keep.insert(rel.clone());
                match writer.persist(project_id, *file, *parse).await {
                    Ok(stats) => {
                        debug!(
                            "Indexed {}: {} written, {} unchanged, {} removed",
                            rel,
                            stats.symbols_written(),
                            stats.symbols_unchanged,
                            stats.symbols_removed
                        );
                        report.files_indexed += 1;
                        report.stats.merge(&stats);
                    }
                    Err(e) if e.downcast_ref::<WriterClosed>().is_some() => return Err(e),
                    Err(e) => report.errors.push(FileError::Store {
                        path: PathBuf::from(rel),
                        message: format!("{e:#}"),
                    }),
                }
            }
            FileOutcome::Indexed { relative_path, stats } => {
                keep.insert(relative_path);
                report.files_indexed += 1;
                report.stats.merge(&stats);
            }
            FileOutcome::Unchanged { relative_path } => {
                keep.insert(relative_path);
                report.files_unchanged += 1;
            }
            FileOutcome::Unsupported { .. } => report.files_skipped += 1,
            FileOutcome::Failed(err) => {
                warn!("{}", err);
                // The file still exists; keep its previous index rather than pruning it
                keep.insert(err.path().to_string_lossy().to_string());
                report.errors.push(err);
            }
        }
    }

    for (id, result) in futures::future::join_all(handles).await.into_iter().enumerate() {
        if let Err(e) = result {
            warn!("Parser worker {} ended abnormally: {}", id, e);
        }
    }
    let walked = walker.await.context("Directory walk task failed")??;
    debug!("Walker enqueued {} paths", walked);

    report.cancelled = options.cancel.is_cancelled();
    if report.cancelled {
        info!("Indexing cancelled after {} files", report.files_seen);
    } else {
        report.files_removed = writer.prune(project_id, keep).await?;
        report.links_resolved = writer.resolve_links(project_id).await?;
        report.project = Some(writer.finish_index(project_id).await?);
    }

    report.elapsed_ms = started.elapsed().as_millis();
    if let Some(pb) = &options.progress {
        pb.finish_and_clear();
    }

    info!(
        "Indexed {} files ({} unchanged, {} skipped, {} removed, {} errors) in {}ms",
        report.files_indexed,
        report.files_unchanged,
        report.files_skipped,
        report.files_removed,
        report.errors.len(),
        report.elapsed_ms
    );

    Ok(report)
}

/// Enqueue every candidate file under `root`. Runs on a blocking thread.
fn walk_project(
    root: &Path,
    config: &Config,
    tx: &mpsc::Sender<PathBuf>,
    cancel: &CancellationToken,
) -> Result<usize> {
    let mut sent = 0;
    let mut entries = WalkDir::new(root).follow_links(false).into_iter();

    while let Some(entry) = entries.next() {
        if cancel.is_cancelled() {
            break;
        }

        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        if entry.depth() == 0 {
            continue;
        }

        let rel = relative_path(root, entry.path());
        if entry.file_type().is_dir() {
            if config.is_excluded_dir(&rel) {
                debug!("Pruning excluded directory {}", rel);
                entries.skip_current_dir();
            }
            continue;
        }

        if !entry.file_type().is_file() || !config.should_index_file(&rel) {
            continue;
        }

        if tx.blocking_send(entry.into_path()).is_err() {
            // Every worker has stopped
            break;
        }
        sent += 1;
    }

    Ok(sent)
}

async fn worker_loop(
    id: usize,
    rx: Arc<Mutex<mpsc::Receiver<PathBuf>>>,
    tx: mpsc::Sender<FileOutcome>,
    ctx: Arc<WorkerContext>,
    cancel: CancellationToken,
) {
    let mut processed = 0usize;

    loop {
        let next = {
            let mut rx = rx.lock().await;
            tokio::select! {
                _ = cancel.cancelled() => None,
                path = rx.recv() => path,
            }
        };
        let Some(path) = next else { break };

        let worker_ctx = ctx.clone();
        let worker_path = path.clone();
        let outcome = match tokio::task::spawn_blocking(move || worker_ctx.process(&worker_path)).await {
            Ok(outcome) => outcome,
            Err(e) => FileOutcome::Failed(FileError::Worker {
                path: PathBuf::from(relative_path(&ctx.root, &path)),
                message: e.to_string(),
            }),
        };

        processed += 1;
        if tx.send(outcome).await.is_err() {
            break;
        }
    }

    debug!("Parser worker {} finished after {} files", id, processed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn context(root: &Path, known: HashMap<String, String>, force: bool) -> WorkerContext {
        WorkerContext {
            root: root.to_path_buf(),
            project_id: 1,
            registry: ExtractorRegistry::with_defaults(),
            known_hashes: known,
            force,
        }
    }

    #[test]
    fn test_relative_path_uses_forward_slashes() {
        let root = Path::new("/proj");
        assert_eq!(relative_path(root, Path::new("/proj/pkg/a.go")), "pkg/a.go");
        assert_eq!(relative_path(root, Path::new("/proj/a.go")), "a.go");
    }

    #[test]
    fn test_process_parses_and_hashes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.go");
        std::fs::write(&path, "package a\n\nfunc Foo() {}\n").unwrap();

        let outcome = context(dir.path(), HashMap::new(), false).process(&path);
        match outcome {
            FileOutcome::Parsed { file, parse } => {
                assert_eq!(file.relative_path, "a.go");
                assert_eq!(file.language, "go");
                assert_eq!(file.lines_of_code, 2);
                assert!(!file.hash.is_empty());
                assert!(parse.symbols.iter().all(|s| !s.content_hash.is_empty()));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_process_hash_gate_and_force() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.py");
        let content = "def foo():\n    return 1\n";
        std::fs::write(&path, content).unwrap();

        let hash = blake3::hash(content.as_bytes()).to_hex().to_string();
        let known = HashMap::from([("a.py".to_string(), hash)]);

        assert!(matches!(
            context(dir.path(), known.clone(), false).process(&path),
            FileOutcome::Unchanged { .. }
        ));
        assert!(matches!(
            context(dir.path(), known, true).process(&path),
            FileOutcome::Parsed { .. }
        ));
    }

    #[test]
    fn test_process_unsupported_and_unreadable() {
        let dir = tempdir().unwrap();
        let readme = dir.path().join("README.md");
        std::fs::write(&readme, "# hi\n").unwrap();
        let ctx = context(dir.path(), HashMap::new(), false);

        assert!(matches!(ctx.process(&readme), FileOutcome::Unsupported { .. }));
        match ctx.process(&dir.path().join("missing.go")) {
            FileOutcome::Failed(err) => assert_eq!(err.kind(), "read"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_walk_prunes_excluded_dirs() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::create_dir_all(dir.path().join("target/debug")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "fn a() {}\n").unwrap();
        std::fs::write(dir.path().join("target/debug/gen.rs"), "fn b() {}\n").unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        let sent = walk_project(dir.path(), &Config::default(), &tx, &CancellationToken::new()).unwrap();
        drop(tx);

        let mut paths = Vec::new();
        while let Ok(path) = rx.try_recv() {
            paths.push(relative_path(dir.path(), &path));
        }
        assert_eq!(sent, 1);
        assert_eq!(paths, vec!["src/lib.rs"]);
    }

    #[test]
    fn test_walk_failure_is_an_error() {
        let dir = tempdir().unwrap();
        let (tx, _rx) = mpsc::channel(16);
        let err = walk_project(&dir.path().join("gone"), &Config::default(), &tx, &CancellationToken::new())
            .unwrap_err();
        assert!(format!("{err:#}").contains("Failed to walk"));
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_subdirectory_aborts_walk() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let locked = dir.path().join("locked");
        std::fs::create_dir_all(&locked).unwrap();
        std::fs::write(locked.join("a.go"), "package a\n").unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();

        // Permission bits do not bind root
        let readable = std::fs::read_dir(&locked).is_ok();
        let (tx, _rx) = mpsc::channel(16);
        let result = walk_project(dir.path(), &Config::default(), &tx, &CancellationToken::new());
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();

        if !readable {
            assert!(result.is_err());
        }
    }

    #[test]
    fn test_walk_stops_when_cancelled() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.go"), "package a\n").unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let (tx, _rx) = mpsc::channel(16);
        assert_eq!(walk_project(dir.path(), &Config::default(), &tx, &cancel).unwrap(), 0);
    }
}
