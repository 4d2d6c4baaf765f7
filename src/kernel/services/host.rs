//! Runtime lifecycle.
//!
//! One [`RuntimeHost`] per process owns the sandboxed runtime instance. It is
//! booted at most once (concurrent `boot` calls share the first result) and is
//! handed to the workspace and reconciler explicitly.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tokio::sync::{broadcast::error::RecvError, watch};
use tokio::task::JoinHandle;

use super::ports::{RuntimeEvent, SandboxRuntime};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeStatus {
    Uninitialized,
    Booting,
    Ready,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    #[error("runtime boot failed: {0}")]
    Boot(String),
    #[error("runtime is not ready")]
    NotReady,
    #[error("runtime host dropped")]
    Lost,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewUrl {
    pub port: u16,
    pub url: String,
}

#[derive(Default)]
struct Slot {
    runtime: Option<Arc<dyn SandboxRuntime>>,
    listener: Option<JoinHandle<()>>,
}

pub struct RuntimeHost {
    status: watch::Sender<RuntimeStatus>,
    preview: Arc<watch::Sender<Option<PreviewUrl>>>,
    slot: Mutex<Slot>,
    boot_guard: tokio::sync::Mutex<()>,
}

impl RuntimeHost {
    pub fn new() -> Self {
        let (status, _) = watch::channel(RuntimeStatus::Uninitialized);
        let (preview, _) = watch::channel(None);
        Self {
            status,
            preview: Arc::new(preview),
            slot: Mutex::new(Slot::default()),
            boot_guard: tokio::sync::Mutex::new(()),
        }
    }

    pub fn status(&self) -> RuntimeStatus {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<RuntimeStatus> {
        self.status.subscribe()
    }

    pub fn runtime(&self) -> Option<Arc<dyn SandboxRuntime>> {
        self.slot().runtime.clone()
    }

    pub fn preview(&self) -> Option<PreviewUrl> {
        self.preview.borrow().clone()
    }

    pub fn watch_preview(&self) -> watch::Receiver<Option<PreviewUrl>> {
        self.preview.subscribe()
    }

    /// Boots the runtime once. Later calls return the live instance; after a
    /// failure the next call retries.
    pub async fn boot<F, Fut>(&self, boot: F) -> Result<Arc<dyn SandboxRuntime>, RuntimeError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<dyn SandboxRuntime>, String>>,
    {
        let _guard = self.boot_guard.lock().await;
        if let Some(runtime) = self.runtime() {
            return Ok(runtime);
        }

        self.status.send_replace(RuntimeStatus::Booting);
        tracing::info!("runtime booting");

        match boot().await {
            Ok(runtime) => {
                let listener = spawn_preview_listener(&runtime, Arc::clone(&self.preview));
                {
                    let mut slot = self.slot();
                    slot.runtime = Some(Arc::clone(&runtime));
                    slot.listener = Some(listener);
                }
                self.status.send_replace(RuntimeStatus::Ready);
                tracing::info!(runtime = runtime.name(), "runtime ready");
                Ok(runtime)
            }
            Err(reason) => {
                tracing::error!(error = %reason, "runtime boot failed");
                self.status.send_replace(RuntimeStatus::Failed(reason.clone()));
                Err(RuntimeError::Boot(reason))
            }
        }
    }

    /// Installs an already constructed runtime through the same boot guard.
    pub async fn attach(
        &self,
        runtime: Arc<dyn SandboxRuntime>,
    ) -> Result<Arc<dyn SandboxRuntime>, RuntimeError> {
        self.boot(|| async move { Ok(runtime) }).await
    }

    /// Drops the runtime; watchers observe `Failed` and dispose.
    pub fn mark_lost(&self, reason: impl Into<String>) {
        let reason = reason.into();
        {
            let mut slot = self.slot();
            slot.runtime = None;
            if let Some(listener) = slot.listener.take() {
                listener.abort();
            }
        }
        self.preview.send_replace(None);
        tracing::warn!(reason = %reason, "runtime lost");
        self.status.send_replace(RuntimeStatus::Failed(reason));
    }

    /// Resolves once the runtime is ready, or with the failure reason.
    pub async fn wait_ready(&self) -> Result<Arc<dyn SandboxRuntime>, RuntimeError> {
        let mut rx = self.status.subscribe();
        loop {
            let status = rx.borrow_and_update().clone();
            match status {
                RuntimeStatus::Ready => {
                    if let Some(runtime) = self.runtime() {
                        return Ok(runtime);
                    }
                }
                RuntimeStatus::Failed(reason) => return Err(RuntimeError::Boot(reason)),
                RuntimeStatus::Uninitialized | RuntimeStatus::Booting => {}
            }
            if rx.changed().await.is_err() {
                return Err(RuntimeError::Lost);
            }
        }
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for RuntimeHost {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RuntimeHost {
    fn drop(&mut self) {
        if let Some(listener) = self.slot().listener.take() {
            listener.abort();
        }
    }
}

fn spawn_preview_listener(
    runtime: &Arc<dyn SandboxRuntime>,
    preview: Arc<watch::Sender<Option<PreviewUrl>>>,
) -> JoinHandle<()> {
    let mut events = runtime.events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(RuntimeEvent::ServerReady { port, url }) => {
                    tracing::info!(port, url = %url, "preview server ready");
                    preview.send_replace(Some(PreviewUrl { port, url }));
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "runtime events lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
#[path = "../../../tests/unit/kernel/services/host.rs"]
mod tests;
