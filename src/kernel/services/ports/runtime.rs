use std::future::Future;
use std::pin::Pin;

use tokio::sync::broadcast;

use super::file::{ChangeSubscription, DirEntryInfo, PathKind, Result as FsResult};
use super::process::{ProcessError, ProcessHandle, ProcessSpec};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeEvent {
    /// A spawned process started listening on `port`.
    ServerReady { port: u16, url: String },
}

/// The sandboxed runtime: virtual filesystem plus process execution.
pub trait SandboxRuntime: Send + Sync {
    fn name(&self) -> &'static str;

    fn read_dir<'a>(&'a self, path: &'a str) -> BoxFuture<'a, FsResult<Vec<DirEntryInfo>>>;

    fn read_file<'a>(&'a self, path: &'a str) -> BoxFuture<'a, FsResult<String>>;

    fn write_file<'a>(&'a self, path: &'a str, content: &'a str) -> BoxFuture<'a, FsResult<()>>;

    fn make_dir<'a>(&'a self, path: &'a str, recursive: bool) -> BoxFuture<'a, FsResult<()>>;

    fn remove_path<'a>(&'a self, path: &'a str, recursive: bool) -> BoxFuture<'a, FsResult<()>>;

    fn probe<'a>(&'a self, path: &'a str) -> BoxFuture<'a, PathKind>;

    fn subscribe(&self, path: &str, recursive: bool) -> FsResult<ChangeSubscription>;

    fn spawn_process(
        &self,
        spec: ProcessSpec,
    ) -> BoxFuture<'_, std::result::Result<ProcessHandle, ProcessError>>;

    fn events(&self) -> broadcast::Receiver<RuntimeEvent>;
}
