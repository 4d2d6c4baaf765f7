//! Sandbox runtime over a host directory.
//!
//! Virtual paths are resolved below `root`; `..` components are rejected so a
//! caller can never reach outside the workspace.

use std::path::{Component, Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc, oneshot};

use super::file_watcher::{self, should_ignore};
use super::server_ready::detect_server_url;
use crate::kernel::services::ports::file::normalize_path;
use crate::kernel::services::ports::{
    BoxFuture, ChangeSubscription, DirEntryInfo, FsError, FsResult, PathKind, ProcessControl,
    ProcessError, ProcessHandle, ProcessOutput, ProcessSpec, RuntimeEvent, SandboxRuntime,
};

const READ_CHUNK: usize = 4096;

pub struct LocalRuntime {
    root: PathBuf,
    events: broadcast::Sender<RuntimeEvent>,
}

impl LocalRuntime {
    pub fn new(root: &Path) -> Self {
        let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        let (events, _) = broadcast::channel(16);
        Self { root, events }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> FsResult<PathBuf> {
        let normalized = normalize_path(path);
        let relative = Path::new(&normalized);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(FsError::NotFound(normalized));
        }
        Ok(self.root.join(relative))
    }
}

impl SandboxRuntime for LocalRuntime {
    fn name(&self) -> &'static str {
        "local"
    }

    fn read_dir<'a>(&'a self, path: &'a str) -> BoxFuture<'a, FsResult<Vec<DirEntryInfo>>> {
        Box::pin(async move {
            let abs = self.resolve(path)?;
            let mut entries = tokio::fs::read_dir(&abs).await.map_err(|e| {
                if abs.is_file() {
                    FsError::NotADirectory(path.to_string())
                } else {
                    FsError::io(path, &e)
                }
            })?;

            let mut result = Vec::new();
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| FsError::io(path, &e))?
            {
                let name = entry.file_name().to_string_lossy().to_string();
                if should_ignore(&name) {
                    continue;
                }
                if let Ok(file_type) = entry.file_type().await {
                    result.push(DirEntryInfo {
                        name,
                        is_dir: file_type.is_dir(),
                    });
                }
            }
            Ok(result)
        })
    }

    fn read_file<'a>(&'a self, path: &'a str) -> BoxFuture<'a, FsResult<String>> {
        Box::pin(async move {
            let abs = self.resolve(path)?;
            if abs.is_dir() {
                return Err(FsError::NotAFile(path.to_string()));
            }
            tokio::fs::read_to_string(&abs)
                .await
                .map_err(|e| FsError::io(path, &e))
        })
    }

    fn write_file<'a>(&'a self, path: &'a str, content: &'a str) -> BoxFuture<'a, FsResult<()>> {
        Box::pin(async move {
            let abs = self.resolve(path)?;
            tokio::fs::write(&abs, content)
                .await
                .map_err(|e| FsError::Write {
                    path: path.to_string(),
                    reason: e.to_string(),
                })
        })
    }

    fn make_dir<'a>(&'a self, path: &'a str, recursive: bool) -> BoxFuture<'a, FsResult<()>> {
        Box::pin(async move {
            let abs = self.resolve(path)?;
            let result = if recursive {
                tokio::fs::create_dir_all(&abs).await
            } else {
                tokio::fs::create_dir(&abs).await
            };
            result.map_err(|e| FsError::io(path, &e))
        })
    }

    fn remove_path<'a>(&'a self, path: &'a str, recursive: bool) -> BoxFuture<'a, FsResult<()>> {
        Box::pin(async move {
            let abs = self.resolve(path)?;
            let meta = tokio::fs::metadata(&abs)
                .await
                .map_err(|e| FsError::io(path, &e))?;
            let result = match (meta.is_dir(), recursive) {
                (true, true) => tokio::fs::remove_dir_all(&abs).await,
                (true, false) => tokio::fs::remove_dir(&abs).await,
                (false, _) => tokio::fs::remove_file(&abs).await,
            };
            result.map_err(|e| FsError::io(path, &e))
        })
    }

    fn probe<'a>(&'a self, path: &'a str) -> BoxFuture<'a, PathKind> {
        Box::pin(async move {
            let Ok(abs) = self.resolve(path) else {
                return PathKind::NotFound;
            };
            match tokio::fs::metadata(&abs).await {
                Ok(meta) if meta.is_dir() => PathKind::Directory,
                Ok(_) => PathKind::File,
                Err(_) => PathKind::NotFound,
            }
        })
    }

    fn subscribe(&self, path: &str, recursive: bool) -> FsResult<ChangeSubscription> {
        let target = self.resolve(path)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let watcher = file_watcher::start_watcher(&self.root, &target, recursive, tx).map_err(
            |e| FsError::Watch {
                path: path.to_string(),
                reason: e.to_string(),
            },
        )?;
        tracing::debug!(root = %self.root.display(), path, recursive, "watch attached");
        Ok(ChangeSubscription::new(rx, move || drop(watcher)))
    }

    fn spawn_process(
        &self,
        spec: ProcessSpec,
    ) -> BoxFuture<'_, std::result::Result<ProcessHandle, ProcessError>> {
        Box::pin(async move {
            let cwd = match spec.cwd.as_deref() {
                Some(cwd) => self.resolve(cwd).map_err(|e| ProcessError::Spawn {
                    command: spec.command.clone(),
                    reason: e.to_string(),
                })?,
                None => self.root.clone(),
            };

            let mut child = tokio::process::Command::new(&spec.command)
                .args(&spec.args)
                .current_dir(&cwd)
                .env("COLUMNS", spec.cols.to_string())
                .env("LINES", spec.rows.to_string())
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| ProcessError::Spawn {
                    command: spec.display(),
                    reason: e.to_string(),
                })?;

            let (out_tx, out_rx) = mpsc::unbounded_channel();
            let (in_tx, mut in_rx) = mpsc::unbounded_channel::<String>();
            let (kill_tx, kill_rx) = oneshot::channel();

            let mut pumps = Vec::with_capacity(2);
            if let Some(stdout) = child.stdout.take() {
                pumps.push(tokio::spawn(pump_output(
                    stdout,
                    out_tx.clone(),
                    self.events.clone(),
                )));
            }
            if let Some(stderr) = child.stderr.take() {
                pumps.push(tokio::spawn(pump_output(
                    stderr,
                    out_tx.clone(),
                    self.events.clone(),
                )));
            }
            if let Some(mut stdin) = child.stdin.take() {
                tokio::spawn(async move {
                    while let Some(data) = in_rx.recv().await {
                        if stdin.write_all(data.as_bytes()).await.is_err() {
                            break;
                        }
                        let _ = stdin.flush().await;
                    }
                });
            }

            let command = spec.display();
            tokio::spawn(async move {
                let status = tokio::select! {
                    status = child.wait() => status,
                    _ = kill_rx => {
                        let _ = child.start_kill();
                        child.wait().await
                    }
                };
                let code = match status {
                    Ok(status) => status.code(),
                    Err(e) => {
                        tracing::warn!(command = %command, error = %e, "process wait failed");
                        None
                    }
                };
                // Exit is reported after the remaining output has been forwarded.
                for pump in pumps {
                    let _ = pump.await;
                }
                tracing::debug!(command = %command, ?code, "process exited");
                let _ = out_tx.send(ProcessOutput::Exited(code));
            });

            let control = LocalProcess {
                kill: Some(kill_tx),
                size: (spec.cols, spec.rows),
            };
            Ok(ProcessHandle::new(out_rx, in_tx, Box::new(control)))
        })
    }

    fn events(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.events.subscribe()
    }
}

struct LocalProcess {
    kill: Option<oneshot::Sender<()>>,
    size: (u16, u16),
}

impl ProcessControl for LocalProcess {
    // Plain pipes carry no window size; the size is tracked for the next spawn.
    fn resize(&mut self, cols: u16, rows: u16) {
        self.size = (cols, rows);
        tracing::trace!(cols, rows, "process resize");
    }

    fn kill(&mut self) {
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
    }
}

async fn pump_output<R>(
    mut reader: R,
    tx: mpsc::UnboundedSender<ProcessOutput>,
    events: broadcast::Sender<RuntimeEvent>,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    let mut pending = Vec::new();
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::debug!(error = %e, "process output closed");
                break;
            }
        };
        pending.extend_from_slice(&buf[..n]);
        let text = take_utf8(&mut pending);
        if text.is_empty() {
            continue;
        }
        if !forward_text(text, &tx, &events) {
            return;
        }
    }
    if !pending.is_empty() {
        let text = String::from_utf8_lossy(&pending).into_owned();
        forward_text(text, &tx, &events);
    }
}

fn forward_text(
    text: String,
    tx: &mpsc::UnboundedSender<ProcessOutput>,
    events: &broadcast::Sender<RuntimeEvent>,
) -> bool {
    if let Some((port, url)) = detect_server_url(&text) {
        tracing::info!(port, url = %url, "server ready");
        let _ = events.send(RuntimeEvent::ServerReady { port, url });
    }
    tx.send(ProcessOutput::Data(text)).is_ok()
}

/// Decodes the complete UTF-8 prefix of `pending` and leaves a trailing
/// partial sequence in place for the next read. Invalid bytes become U+FFFD.
fn take_utf8(pending: &mut Vec<u8>) -> String {
    let mut out = String::new();
    loop {
        match std::str::from_utf8(pending.as_slice()) {
            Ok(text) => {
                out.push_str(text);
                pending.clear();
                return out;
            }
            Err(e) => {
                let valid = e.valid_up_to();
                out.push_str(&String::from_utf8_lossy(&pending[..valid]));
                match e.error_len() {
                    Some(bad) => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        pending.drain(..valid + bad);
                    }
                    None => {
                        pending.drain(..valid);
                        return out;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "../../../../tests/unit/kernel/services/adapters/local.rs"]
mod tests;
