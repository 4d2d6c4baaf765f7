//! `notify` bridge for [`LocalRuntime`](super::LocalRuntime) change streams.

use notify::event::{ModifyKind, RenameMode};
use notify::{Config, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::kernel::services::ports::{FsChange, FsChangeKind};

const WATCHER_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Starts a watcher on `root/target`, forwarding root-relative changes to `tx`.
/// The returned watcher must be kept alive for the stream to stay attached.
pub fn start_watcher(
    root: &Path,
    target: &Path,
    recursive: bool,
    tx: mpsc::UnboundedSender<FsChange>,
) -> Result<RecommendedWatcher, notify::Error> {
    let root = root.to_path_buf();
    let mut watcher = RecommendedWatcher::new(
        move |res: Result<notify::Event, notify::Error>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(error = %e, "file watcher error");
                    return;
                }
            };
            for (kind, path) in normalize_notify_event(event) {
                let Some(relative) = to_workspace_path(&root, &path) else {
                    continue;
                };
                let _ = tx.send(FsChange::new(kind, relative));
            }
        },
        Config::default().with_poll_interval(WATCHER_POLL_INTERVAL),
    )?;
    let mode = if recursive {
        RecursiveMode::Recursive
    } else {
        RecursiveMode::NonRecursive
    };
    watcher.watch(target, mode)?;
    Ok(watcher)
}

/// Maps an absolute event path to the root-relative slash form, dropping
/// paths outside the root or inside ignored folders.
pub fn to_workspace_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(name) => {
                let name = name.to_string_lossy();
                if should_ignore(&name) {
                    return None;
                }
                parts.push(name.into_owned());
            }
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(parts.join("/"))
}

pub fn should_ignore(name: &str) -> bool {
    matches!(
        name,
        ".DS_Store"
            | ".Spotlight-V100"
            | ".Trashes"
            | ".fseventsd"
            | ".TemporaryItems"
            | "Thumbs.db"
            | "desktop.ini"
            | ".git"
    )
}

fn normalize_notify_event(event: notify::Event) -> Vec<(FsChangeKind, PathBuf)> {
    let kind = match event.kind {
        EventKind::Create(_) => FsChangeKind::Created,
        EventKind::Remove(_) => FsChangeKind::Removed,
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => FsChangeKind::Removed,
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => FsChangeKind::Created,
        EventKind::Modify(ModifyKind::Name(_)) => FsChangeKind::Renamed,
        EventKind::Modify(_) => FsChangeKind::Modified,
        EventKind::Any | EventKind::Other => FsChangeKind::Other,
        EventKind::Access(_) => return Vec::new(),
    };
    event.paths.into_iter().map(|path| (kind, path)).collect()
}

#[cfg(test)]
#[path = "../../../../tests/unit/kernel/services/adapters/file_watcher.rs"]
mod tests;
