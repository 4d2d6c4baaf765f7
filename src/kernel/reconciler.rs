//! Change-notification reconciler.
//!
//! Watches the runtime filesystem and keeps the tree snapshot and the
//! open-file table in step with it. Every change event is treated as "something
//! changed": the tree is rebuilt in full and the table pruned against it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};

use crate::kernel::services::host::RuntimeStatus;
use crate::kernel::services::ports::{ChangeSubscription, ReconcilerSettings};
use crate::kernel::services::WorkspaceEvent;
use crate::kernel::workspace::Workspace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchSource {
    Stream,
    Poll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcilerState {
    Unattached,
    Watching(WatchSource),
    Disposed,
}

pub struct ReconcilerHandle {
    state: watch::Receiver<ReconcilerState>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ReconcilerHandle {
    pub fn state(&self) -> ReconcilerState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ReconcilerState> {
        self.state.clone()
    }

    /// Stops watching. Idempotent; the task unsubscribes on its way out.
    pub fn dispose(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }

    /// Waits for the reconciler task to finish.
    pub async fn join(mut self) {
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ReconcilerHandle {
    fn drop(&mut self) {
        self.dispose();
    }
}

pub fn spawn(workspace: Arc<Workspace>, settings: ReconcilerSettings) -> ReconcilerHandle {
    let (state_tx, state_rx) = watch::channel(ReconcilerState::Unattached);
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let task = tokio::spawn(
        Reconciler {
            workspace,
            window: settings.coalesce_window(),
            poll: settings.fallback_poll_interval(),
            state: state_tx,
        }
        .run(shutdown_rx),
    );
    ReconcilerHandle {
        state: state_rx,
        shutdown: Some(shutdown_tx),
        task: Some(task),
    }
}

enum Source {
    Stream(ChangeSubscription),
    Poll(Interval),
}

impl Source {
    fn kind(&self) -> WatchSource {
        match self {
            Source::Stream(_) => WatchSource::Stream,
            Source::Poll(_) => WatchSource::Poll,
        }
    }
}

struct Reconciler {
    workspace: Arc<Workspace>,
    window: Duration,
    poll: Option<Duration>,
    state: watch::Sender<ReconcilerState>,
}

impl Reconciler {
    async fn run(self, mut shutdown: oneshot::Receiver<()>) {
        let mut status = self.workspace.host().watch_status();

        let attached = tokio::select! {
            _ = &mut shutdown => false,
            ready = wait_for_ready(&mut status) => ready,
        };
        if !attached {
            self.set_state(ReconcilerState::Disposed);
            return;
        }

        let source = self.attach().await;
        let Some(mut source) = source else {
            self.set_state(ReconcilerState::Disposed);
            return;
        };
        self.set_state(ReconcilerState::Watching(source.kind()));

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::debug!("reconciler disposed");
                    break;
                }
                changed = status.changed() => {
                    let lost = changed.is_err()
                        || matches!(*status.borrow_and_update(), RuntimeStatus::Failed(_));
                    if lost {
                        tracing::warn!("runtime lost, reconciler stops");
                        break;
                    }
                }
                more = next_change(&mut source) => {
                    if !more {
                        tracing::info!("change stream ended");
                        break;
                    }
                    if let Source::Stream(sub) = &mut source {
                        if !self.coalesce(sub, &mut shutdown).await {
                            break;
                        }
                    }
                    if !self.refresh().await {
                        break;
                    }
                }
            }
        }

        drop(source);
        self.set_state(ReconcilerState::Disposed);
    }

    /// Subscribes and runs the initial refresh. `None` means nothing will
    /// ever refresh again.
    async fn attach(&self) -> Option<Source> {
        let runtime = self.workspace.host().runtime()?;

        let source = match runtime.subscribe(self.workspace.root(), true) {
            Ok(sub) => Some(Source::Stream(sub)),
            Err(e) => {
                tracing::error!(error = %e, "watch failed");
                self.workspace
                    .bus()
                    .send(WorkspaceEvent::WatchFailed(e));
                self.poll.map(|period| {
                    tracing::info!(period_ms = period.as_millis() as u64, "falling back to polling");
                    let mut interval = tokio::time::interval_at(
                        tokio::time::Instant::now() + period,
                        period,
                    );
                    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    Source::Poll(interval)
                })
            }
        };

        if !self.refresh().await {
            return None;
        }
        source
    }

    /// Absorbs events that arrive within the window after the first one.
    /// Returns false if disposal was requested meanwhile.
    async fn coalesce(
        &self,
        sub: &mut ChangeSubscription,
        shutdown: &mut oneshot::Receiver<()>,
    ) -> bool {
        if self.window.is_zero() {
            return true;
        }
        tokio::select! {
            _ = shutdown => return false,
            _ = tokio::time::sleep(self.window) => {}
        }
        let mut absorbed = 0usize;
        while sub.try_next().is_some() {
            absorbed += 1;
        }
        if absorbed > 0 {
            tracing::trace!(absorbed, "coalesced change events");
        }
        true
    }

    async fn refresh(&self) -> bool {
        match self.workspace.refresh().await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(error = %e, "refresh failed, reconciler stops");
                false
            }
        }
    }

    fn set_state(&self, state: ReconcilerState) {
        self.state.send_replace(state);
        self.workspace
            .bus()
            .send(WorkspaceEvent::ReconcilerStateChanged(state));
    }
}

async fn wait_for_ready(status: &mut watch::Receiver<RuntimeStatus>) -> bool {
    loop {
        if matches!(*status.borrow_and_update(), RuntimeStatus::Ready) {
            return true;
        }
        if status.changed().await.is_err() {
            return false;
        }
    }
}

async fn next_change(source: &mut Source) -> bool {
    match source {
        Source::Stream(sub) => sub.next().await.is_some(),
        Source::Poll(interval) => {
            interval.tick().await;
            true
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/kernel/reconciler.rs"]
mod tests;
