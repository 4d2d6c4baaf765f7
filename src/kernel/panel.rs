//! Preview server of the runtime panel.

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use crate::kernel::services::ports::{
    CommandSettings, ProcessHandle, ProcessOutput, ProcessSpec, SandboxRuntime,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviewStatus {
    Idle,
    Starting,
    Running,
    Stopped(Option<i32>),
    Failed(String),
}

/// A long-running serve command. Its output goes to the log under the
/// `idex::runtime` target; the preview URL itself arrives through the
/// runtime's `ServerReady` event.
pub struct PreviewServer {
    command: String,
    status: watch::Receiver<PreviewStatus>,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl PreviewServer {
    pub fn idle() -> Self {
        let (_, status) = watch::channel(PreviewStatus::Idle);
        Self {
            command: String::new(),
            status,
            stop: None,
            task: None,
        }
    }

    pub async fn launch(runtime: &dyn SandboxRuntime, command: &CommandSettings) -> Self {
        let spec = ProcessSpec::new(&command.command).args(command.args.iter().cloned());
        let command_line = spec.display();
        let (status_tx, status) = watch::channel(PreviewStatus::Starting);
        tracing::info!(command = %command_line, "launching preview server");

        match runtime.spawn_process(spec).await {
            Ok(handle) => {
                status_tx.send_replace(PreviewStatus::Running);
                let (stop_tx, stop_rx) = oneshot::channel();
                let task = tokio::spawn(forward_output(
                    handle,
                    command_line.clone(),
                    status_tx,
                    stop_rx,
                ));
                Self {
                    command: command_line,
                    status,
                    stop: Some(stop_tx),
                    task: Some(task),
                }
            }
            Err(e) => {
                tracing::error!(command = %command_line, error = %e, "preview server failed to start");
                status_tx.send_replace(PreviewStatus::Failed(e.to_string()));
                Self {
                    command: command_line,
                    status,
                    stop: None,
                    task: None,
                }
            }
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn status(&self) -> PreviewStatus {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<PreviewStatus> {
        self.status.clone()
    }

    /// Kills the serve process and waits for its output pump to finish.
    pub async fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for PreviewServer {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

async fn forward_output(
    mut handle: ProcessHandle,
    command: String,
    status: watch::Sender<PreviewStatus>,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut stop => {
                handle.kill();
                tracing::info!(command = %command, "preview server stopped");
                status.send_replace(PreviewStatus::Stopped(None));
                break;
            }
            output = handle.output.recv() => match output {
                Some(ProcessOutput::Data(text)) => {
                    for line in text.lines().filter(|l| !l.trim().is_empty()) {
                        tracing::info!(target: "idex::runtime", command = %command, "{line}");
                    }
                }
                Some(ProcessOutput::Exited(code)) => {
                    tracing::warn!(command = %command, code = ?code, "preview server exited");
                    status.send_replace(PreviewStatus::Stopped(code));
                    break;
                }
                None => {
                    status.send_replace(PreviewStatus::Stopped(None));
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/kernel/panel.rs"]
mod tests;
