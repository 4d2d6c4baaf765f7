//! Filesystem contract of the sandboxed runtime.
//!
//! Paths are root-relative and slash-delimited. The empty string is the root
//! namespace; `"."`, leading `"./"` and leading or trailing slashes are
//! tolerated and normalized away by [`normalize_path`]. Whitespace is part of
//! a name and is never trimmed.

use thiserror::Error;
use tokio::sync::mpsc;

pub type Result<T> = std::result::Result<T, FsError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FsError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("not a file: {0}")]
    NotAFile(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("write failed for {path}: {reason}")]
    Write { path: String, reason: String },
    #[error("watch failed for {path}: {reason}")]
    Watch { path: String, reason: String },
    #[error("io error on {path}: {reason}")]
    Io { path: String, reason: String },
}

impl FsError {
    pub fn io(path: impl Into<String>, err: &std::io::Error) -> Self {
        let path = path.into();
        match err.kind() {
            std::io::ErrorKind::NotFound => FsError::NotFound(path),
            std::io::ErrorKind::AlreadyExists => FsError::AlreadyExists(path),
            _ => FsError::Io {
                path,
                reason: err.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryInfo {
    pub name: String,
    pub is_dir: bool,
}

impl DirEntryInfo {
    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_dir: false,
        }
    }

    pub fn dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_dir: true,
        }
    }
}

/// Result of a single existence probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    File,
    Directory,
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsChangeKind {
    Created,
    Modified,
    Removed,
    Renamed,
    Other,
}

/// A change notification. Consumers must not rely on `kind`: the runtime only
/// guarantees that something below `path` changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsChange {
    pub kind: FsChangeKind,
    pub path: String,
}

impl FsChange {
    pub fn new(kind: FsChangeKind, path: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }
}

/// A live change stream. Dropping it (or calling [`unsubscribe`]) detaches
/// from the runtime.
///
/// [`unsubscribe`]: ChangeSubscription::unsubscribe
pub struct ChangeSubscription {
    events: mpsc::UnboundedReceiver<FsChange>,
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl ChangeSubscription {
    pub fn new(
        events: mpsc::UnboundedReceiver<FsChange>,
        cancel: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            events,
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Waits for the next change; `None` once the runtime closed the stream.
    pub async fn next(&mut self) -> Option<FsChange> {
        self.events.recv().await
    }

    pub fn try_next(&mut self) -> Option<FsChange> {
        self.events.try_recv().ok()
    }

    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for ChangeSubscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for ChangeSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeSubscription")
            .field("attached", &self.cancel.is_some())
            .finish()
    }
}

pub fn normalize_path(path: &str) -> String {
    let mut parts = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            _ => parts.push(part),
        }
    }
    parts.join("/")
}

pub fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

pub fn parent_path(path: &str) -> Option<&str> {
    path.rfind('/').map(|idx| &path[..idx])
}

pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[cfg(test)]
#[path = "../../../../tests/unit/kernel/services/ports/file.rs"]
mod tests;
