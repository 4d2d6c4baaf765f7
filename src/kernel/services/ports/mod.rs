//! Service ports: traits + data contracts.

pub mod file;
pub mod process;
pub mod runtime;
pub mod settings;

pub use file::{
    ChangeSubscription, DirEntryInfo, FsChange, FsChangeKind, FsError, PathKind,
    Result as FsResult,
};
pub use process::{ProcessControl, ProcessError, ProcessHandle, ProcessOutput, ProcessSpec};
pub use runtime::{BoxFuture, RuntimeEvent, SandboxRuntime};
pub use settings::{CommandSettings, ReconcilerSettings, Settings};
