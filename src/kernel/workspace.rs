//! Workspace operations that cross into the runtime.
//!
//! The open-file table is guarded by an async mutex that is never held
//! across a runtime call; every operation reads or writes through the runtime
//! first and then applies a synchronous table mutation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;

use crate::kernel::diff::{project, DiffProjection};
use crate::kernel::editor::{CommitStart, OpenFileEntry, OpenFileTable};
use crate::kernel::services::host::RuntimeHost;
use crate::kernel::services::ports::file::{normalize_path, parent_path};
use crate::kernel::services::ports::{FsError, PathKind, SandboxRuntime};
use crate::kernel::services::{WorkspaceBusReceiver, WorkspaceBusSender, WorkspaceEvent};
use crate::models::file_tree::{build_tree, collect_paths, TreeNode};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkspaceError {
    #[error("runtime is not available")]
    RuntimeUnavailable,
    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: FsError,
    },
    #[error(transparent)]
    Fs(#[from] FsError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    Opened,
    /// Already open; only focus moved.
    Activated,
    Directory,
    Missing,
    Unreadable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    Clean,
    NotOpen,
}

pub struct Workspace {
    host: Arc<RuntimeHost>,
    root: String,
    table: AsyncMutex<OpenFileTable>,
    tree: Mutex<Arc<Vec<TreeNode>>>,
    refresh_seq: AtomicU64,
    published_seq: Mutex<u64>,
    bus: WorkspaceBusSender,
}

impl Workspace {
    pub fn new(host: Arc<RuntimeHost>, bus: WorkspaceBusSender) -> Self {
        Self::with_root(host, bus, "")
    }

    pub fn with_root(host: Arc<RuntimeHost>, bus: WorkspaceBusSender, root: &str) -> Self {
        Self {
            host,
            root: normalize_path(root),
            table: AsyncMutex::new(OpenFileTable::new()),
            tree: Mutex::new(Arc::new(Vec::new())),
            refresh_seq: AtomicU64::new(0),
            published_seq: Mutex::new(0),
            bus,
        }
    }

    pub fn host(&self) -> &Arc<RuntimeHost> {
        &self.host
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn bus(&self) -> &WorkspaceBusSender {
        &self.bus
    }

    pub fn subscribe(&self) -> WorkspaceBusReceiver {
        self.bus.subscribe()
    }

    pub fn tree(&self) -> Arc<Vec<TreeNode>> {
        match self.tree.lock() {
            Ok(tree) => Arc::clone(&tree),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub async fn entries(&self) -> Vec<OpenFileEntry> {
        self.table.lock().await.entries().to_vec()
    }

    pub async fn entry(&self, path: &str) -> Option<OpenFileEntry> {
        self.table.lock().await.get(&normalize_path(path)).cloned()
    }

    pub async fn active(&self) -> Option<String> {
        self.table.lock().await.active().map(str::to_string)
    }

    pub async fn dirty_paths(&self) -> Vec<String> {
        self.table.lock().await.dirty_paths()
    }

    fn runtime(&self) -> Result<Arc<dyn SandboxRuntime>, WorkspaceError> {
        self.host.runtime().ok_or(WorkspaceError::RuntimeUnavailable)
    }

    fn publish_table(&self, table: &OpenFileTable) {
        self.bus
            .send(WorkspaceEvent::TableChanged(table.entries().to_vec()));
    }

    pub async fn open(&self, path: &str) -> Result<OpenOutcome, WorkspaceError> {
        let path = normalize_path(path);
        let runtime = self.runtime()?;

        let ticket = {
            let mut table = self.table.lock().await;
            if table.activate(&path) {
                self.publish_table(&table);
                return Ok(OpenOutcome::Activated);
            }
            table.begin_activation()
        };

        match runtime.probe(&path).await {
            PathKind::File => {}
            PathKind::Directory => return Ok(OpenOutcome::Directory),
            PathKind::NotFound => return Ok(OpenOutcome::Missing),
        }

        let content = match runtime.read_file(&path).await {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "open: read failed");
                return Ok(OpenOutcome::Unreadable);
            }
        };

        let mut table = self.table.lock().await;
        let focused = table.insert_opened(ticket, &path, content);
        tracing::debug!(path = %path, focused, "file opened");
        self.publish_table(&table);
        Ok(OpenOutcome::Opened)
    }

    pub async fn activate(&self, path: &str) -> bool {
        let mut table = self.table.lock().await;
        let changed = table.activate(&normalize_path(path));
        if changed {
            self.publish_table(&table);
        }
        changed
    }

    /// Replaces the live buffer of the active file.
    pub async fn edit(&self, path: &str, content: impl Into<String>) -> bool {
        let mut table = self.table.lock().await;
        let changed = table.edit(&normalize_path(path), content);
        if changed {
            self.publish_table(&table);
        }
        changed
    }

    pub async fn close(&self, path: &str) -> bool {
        let mut table = self.table.lock().await;
        let closed = table.close(&normalize_path(path));
        if closed {
            self.publish_table(&table);
        }
        closed
    }

    /// Writes the live buffer of a dirty entry. The persisted buffer only
    /// moves after the write succeeded; the tree is left to the change stream.
    pub async fn commit(&self, path: &str) -> Result<CommitOutcome, WorkspaceError> {
        let path = normalize_path(path);
        let runtime = self.runtime()?;

        let snapshot = match self.table.lock().await.begin_commit(&path) {
            CommitStart::NotOpen => return Ok(CommitOutcome::NotOpen),
            CommitStart::Clean => return Ok(CommitOutcome::Clean),
            CommitStart::Write(snapshot) => snapshot,
        };

        let result = runtime.write_file(&path, &snapshot).await;
        let recheck = {
            let mut table = self.table.lock().await;
            let recheck = table.finish_commit(&path, &snapshot, result.is_ok());
            if result.is_ok() {
                self.publish_table(&table);
            }
            recheck
        };

        if recheck && runtime.probe(&path).await == PathKind::NotFound {
            let mut table = self.table.lock().await;
            if table.close(&path) {
                tracing::info!(path = %path, "closed after commit, file is gone");
                self.publish_table(&table);
            }
        }

        match result {
            Ok(()) => {
                tracing::debug!(path = %path, bytes = snapshot.len(), "committed");
                Ok(CommitOutcome::Committed)
            }
            Err(source) => {
                tracing::error!(path = %path, error = %source, "commit failed");
                self.bus.send(WorkspaceEvent::CommitFailed {
                    path: path.clone(),
                    error: source.clone(),
                });
                Err(WorkspaceError::Write { path, source })
            }
        }
    }

    /// Rebuilds the tree and closes open entries whose path disappeared.
    /// Returns the closed paths. A refresh that finishes after a newer one
    /// is discarded.
    pub async fn refresh(&self) -> Result<Vec<String>, WorkspaceError> {
        let runtime = self.runtime()?;
        let seq = self.refresh_seq.fetch_add(1, Ordering::SeqCst) + 1;

        let tree = build_tree(runtime.as_ref(), &self.root).await;
        let current = collect_paths(&tree);

        let mut table = self.table.lock().await;
        {
            let mut published = match self.published_seq.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if seq < *published {
                tracing::debug!(seq, "stale refresh dropped");
                return Ok(Vec::new());
            }
            *published = seq;
        }

        let tree = Arc::new(tree);
        match self.tree.lock() {
            Ok(mut slot) => *slot = Arc::clone(&tree),
            Err(poisoned) => *poisoned.into_inner() = Arc::clone(&tree),
        }
        let closed = table.reconcile(&current);
        self.bus.send(WorkspaceEvent::TreeChanged(tree));
        if !closed.is_empty() {
            tracing::info!(closed = ?closed, "open files removed externally");
            self.publish_table(&table);
        }
        Ok(closed)
    }

    pub async fn create_file(&self, path: &str) -> Result<(), WorkspaceError> {
        let path = normalize_path(path);
        let runtime = self.runtime()?;
        if let Some(parent) = parent_path(&path) {
            runtime.make_dir(parent, true).await?;
        }
        runtime.write_file(&path, "").await?;
        Ok(())
    }

    pub async fn create_folder(&self, path: &str) -> Result<(), WorkspaceError> {
        let runtime = self.runtime()?;
        runtime.make_dir(&normalize_path(path), true).await?;
        Ok(())
    }

    pub async fn remove(&self, path: &str) -> Result<(), WorkspaceError> {
        let runtime = self.runtime()?;
        runtime.remove_path(&normalize_path(path), true).await?;
        Ok(())
    }

    /// Persisted vs live projection of an open entry.
    pub async fn diff(&self, path: &str) -> Option<DiffProjection> {
        let table = self.table.lock().await;
        table
            .get(&normalize_path(path))
            .map(|e| project(&e.persisted_content, &e.live_content))
    }
}

#[cfg(test)]
#[path = "../../tests/unit/kernel/workspace.rs"]
mod tests;
