use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

use super::ports::FsError;
use crate::kernel::editor::OpenFileEntry;
use crate::kernel::reconciler::ReconcilerState;
use crate::models::TreeNode;

const BUS_CAPACITY: usize = 256;

/// State transitions published to the panels.
#[derive(Debug, Clone)]
pub enum WorkspaceEvent {
    TreeChanged(Arc<Vec<TreeNode>>),
    TableChanged(Vec<OpenFileEntry>),
    CommitFailed { path: String, error: FsError },
    WatchFailed(FsError),
    ReconcilerStateChanged(ReconcilerState),
}

#[derive(Clone)]
pub struct WorkspaceBusSender {
    tx: broadcast::Sender<WorkspaceEvent>,
}

pub struct WorkspaceBusReceiver {
    rx: broadcast::Receiver<WorkspaceEvent>,
}

pub fn workspace_bus() -> WorkspaceBusSender {
    let (tx, _) = broadcast::channel(BUS_CAPACITY);
    WorkspaceBusSender { tx }
}

impl WorkspaceBusSender {
    /// Publishes to every current subscriber; events without subscribers are dropped.
    pub fn send(&self, event: WorkspaceEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> WorkspaceBusReceiver {
        WorkspaceBusReceiver {
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl WorkspaceBusReceiver {
    /// Next event; `None` once every sender is gone. A slow subscriber skips
    /// the events it missed rather than failing.
    pub async fn recv(&mut self) -> Option<WorkspaceEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "workspace subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<WorkspaceEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "workspace subscriber lagged");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }
}
