// File watcher for incremental updates

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::pipeline::{relative_path, FileOutcome};
use super::writer::WriterClosed;
use crate::indexer::Indexer;

/// Events arriving within this window are coalesced per path
const DEBOUNCE: Duration = Duration::from_millis(200);

/// File watcher for automatic re-indexing
pub struct FileWatcher {
    indexer: Arc<Indexer>,
}

impl FileWatcher {
    pub fn new(indexer: Arc<Indexer>) -> Self {
        Self { indexer }
    }

    /// Watch the project root until `cancel` fires
    pub async fn watch(&self, cancel: CancellationToken) -> Result<()> {
        let root = self.indexer.root().to_path_buf();
        info!("Starting file watcher for: {}", root.display());

        let (tx, mut rx) = mpsc::channel::<Event>(256);

        // notify calls back on its own thread, outside the runtime
        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    if tx.blocking_send(event).is_err() {
                        debug!("Watcher channel closed, dropping event");
                    }
                }
                Err(e) => error!("File watch error: {}", e),
            },
            Config::default(),
        )?;
        watcher.watch(&root, RecursiveMode::Recursive)?;

        info!("File watcher started. Monitoring for changes...");

        loop {
            let first = tokio::select! {
                _ = cancel.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            let mut paths = BTreeSet::new();
            collect_paths(&first, &mut paths);
            tokio::time::sleep(DEBOUNCE).await;
            while let Ok(event) = rx.try_recv() {
                collect_paths(&event, &mut paths);
            }

            for path in paths {
                if !self.is_candidate(&path) {
                    continue;
                }
                if let Err(e) = self.handle_path(&path).await {
                    if e.downcast_ref::<WriterClosed>().is_some() {
                        return Err(e);
                    }
                    error!("Failed to update index for {}: {:#}", path.display(), e);
                }
            }
        }

        info!("File watcher stopped");
        Ok(())
    }

    /// Re-index a path that exists, drop one that does not
    pub async fn handle_path(&self, path: &Path) -> Result<()> {
        if path.is_file() {
            match self.indexer.index_file(path).await? {
                FileOutcome::Failed(err) => warn!("{}", err),
                FileOutcome::Unchanged { relative_path } => {
                    debug!("{} unchanged", relative_path)
                }
                outcome => debug!("Watcher update for {}", outcome.relative_path()),
            }
        } else if !path.exists() {
            self.indexer.remove_file(path).await?;
        }
        Ok(())
    }

    /// Whether a path could hold an indexed file
    fn is_candidate(&self, path: &Path) -> bool {
        let rel = relative_path(self.indexer.root(), path);
        if rel.is_empty() {
            return false;
        }
        self.indexer.registry().detect_language(path).is_some()
            && self.indexer.config().should_index_file(&rel)
    }
}

fn collect_paths(event: &Event, paths: &mut BTreeSet<PathBuf>) {
    match event.kind {
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => {
            paths.extend(event.paths.iter().cloned());
        }
        _ => {}
    }
}

/// Run a watcher for an already-indexed project until Ctrl-C
pub async fn start_watcher(indexer: Arc<Indexer>) -> Result<()> {
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, stopping watcher");
            on_signal.cancel();
        }
    });

    FileWatcher::new(indexer).watch(cancel).await
}
