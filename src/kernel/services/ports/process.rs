//! Process contract of the sandboxed runtime.

use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProcessError {
    #[error("process spawning is not supported by this runtime")]
    Unsupported,
    #[error("failed to spawn `{command}`: {reason}")]
    Spawn { command: String, reason: String },
    #[error("process stdin is closed")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub command: String,
    pub args: Vec<String>,
    /// Root-relative working directory; `None` runs at the root.
    pub cwd: Option<String>,
    pub cols: u16,
    pub rows: u16,
}

impl ProcessSpec {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            cwd: None,
            cols: 80,
            rows: 24,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn size(mut self, cols: u16, rows: u16) -> Self {
        self.cols = cols.max(1);
        self.rows = rows.max(1);
        self
    }

    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.command.clone()
        } else {
            format!("{} {}", self.command, self.args.join(" "))
        }
    }
}

/// Runtime-side controls of a spawned process.
pub trait ProcessControl: Send {
    fn resize(&mut self, cols: u16, rows: u16);

    fn kill(&mut self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutput {
    Data(String),
    Exited(Option<i32>),
}

pub struct ProcessHandle {
    pub output: mpsc::UnboundedReceiver<ProcessOutput>,
    stdin: mpsc::UnboundedSender<String>,
    control: Box<dyn ProcessControl>,
}

impl ProcessHandle {
    pub fn new(
        output: mpsc::UnboundedReceiver<ProcessOutput>,
        stdin: mpsc::UnboundedSender<String>,
        control: Box<dyn ProcessControl>,
    ) -> Self {
        Self {
            output,
            stdin,
            control,
        }
    }

    pub fn write(&self, data: impl Into<String>) -> Result<(), ProcessError> {
        self.stdin
            .send(data.into())
            .map_err(|_| ProcessError::Closed)
    }

    pub fn stdin(&self) -> mpsc::UnboundedSender<String> {
        self.stdin.clone()
    }

    pub fn resize(&mut self, cols: u16, rows: u16) {
        self.control.resize(cols.max(1), rows.max(1));
    }

    pub fn kill(&mut self) {
        self.control.kill();
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("stdin_closed", &self.stdin.is_closed())
            .finish()
    }
}
