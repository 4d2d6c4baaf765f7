use std::collections::VecDeque;

use tokio::sync::mpsc::error::TryRecvError;

use crate::kernel::services::ports::{
    CommandSettings, ProcessError, ProcessHandle, ProcessOutput, ProcessSpec, SandboxRuntime,
};

pub type TerminalId = u64;

const DEFAULT_SCROLLBACK_LINES: usize = 5000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Running,
    Exited(Option<i32>),
    Failed(String),
}

/// Interactive shell attached to a runtime process.
///
/// Output is kept as plain lines; terminal emulation belongs to the surface
/// that renders them.
#[derive(Debug)]
pub struct TerminalSession {
    pub id: TerminalId,
    pub title: String,
    pub cols: u16,
    pub rows: u16,
    pub status: SessionStatus,
    pub dirty: bool,
    scrollback: VecDeque<String>,
    partial: String,
    scrollback_lines: usize,
    handle: Option<ProcessHandle>,
}

impl TerminalSession {
    pub fn new(id: TerminalId, cols: u16, rows: u16, scrollback_lines: usize) -> Self {
        Self {
            id,
            title: format!("terminal-{id}"),
            cols: cols.max(1),
            rows: rows.max(1),
            status: SessionStatus::Idle,
            dirty: true,
            scrollback: VecDeque::new(),
            partial: String::new(),
            scrollback_lines: scrollback_lines.max(1),
            handle: None,
        }
    }

    /// Spawns the shell. A spawn failure is kept in `status` and returned.
    pub async fn start(
        &mut self,
        runtime: &dyn SandboxRuntime,
        shell: &CommandSettings,
    ) -> Result<(), ProcessError> {
        let spec = ProcessSpec::new(&shell.command)
            .args(shell.args.iter().cloned())
            .size(self.cols, self.rows);
        self.title = spec.display();

        match runtime.spawn_process(spec).await {
            Ok(handle) => {
                tracing::info!(id = self.id, shell = %self.title, "terminal started");
                self.handle = Some(handle);
                self.status = SessionStatus::Running;
                self.dirty = true;
                Ok(())
            }
            Err(e) => {
                tracing::error!(id = self.id, error = %e, "terminal spawn failed");
                self.status = SessionStatus::Failed(e.to_string());
                self.dirty = true;
                Err(e)
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == SessionStatus::Running
    }

    pub fn write_input(&self, data: &str) -> Result<(), ProcessError> {
        match (&self.handle, &self.status) {
            (Some(handle), SessionStatus::Running) => handle.write(data),
            _ => Err(ProcessError::Closed),
        }
    }

    pub fn resize(&mut self, cols: u16, rows: u16) -> bool {
        let cols = cols.max(1);
        let rows = rows.max(1);
        if self.cols == cols && self.rows == rows {
            return false;
        }

        self.cols = cols;
        self.rows = rows;
        if let Some(handle) = self.handle.as_mut() {
            handle.resize(cols, rows);
        }
        self.dirty = true;
        true
    }

    /// Pulls everything the process produced so far into the scrollback.
    pub fn drain_output(&mut self) -> bool {
        let mut changed = false;
        loop {
            let Some(handle) = self.handle.as_mut() else {
                break;
            };
            match handle.output.try_recv() {
                Ok(ProcessOutput::Data(text)) => {
                    changed |= self.process_output(&text);
                }
                Ok(ProcessOutput::Exited(code)) => {
                    tracing::info!(id = self.id, code = ?code, "terminal exited");
                    self.finish(code);
                    changed = true;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if self.is_running() {
                        self.finish(None);
                        changed = true;
                    }
                    break;
                }
            }
        }
        changed
    }

    pub fn process_output(&mut self, text: &str) -> bool {
        if text.is_empty() {
            return false;
        }

        self.partial.push_str(text);
        while let Some(idx) = self.partial.find('\n') {
            let mut line: String = self.partial.drain(..=idx).collect();
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
            self.push_line(line);
        }

        self.dirty = true;
        true
    }

    /// Completed lines followed by the unterminated tail, if any.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.scrollback
            .iter()
            .map(String::as_str)
            .chain((!self.partial.is_empty()).then_some(self.partial.as_str()))
    }

    pub fn visible_rows(&self) -> Vec<&str> {
        let all: Vec<&str> = self.lines().collect();
        let start = all.len().saturating_sub(self.rows as usize);
        all[start..].to_vec()
    }

    /// Kills the process. Safe to call more than once.
    pub fn dispose(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.kill();
            tracing::debug!(id = self.id, "terminal disposed");
        }
        if self.is_running() {
            self.status = SessionStatus::Exited(None);
        }
    }

    fn push_line(&mut self, line: String) {
        if self.scrollback.len() >= self.scrollback_lines {
            self.scrollback.pop_front();
        }
        self.scrollback.push_back(line);
    }

    fn finish(&mut self, code: Option<i32>) {
        self.status = SessionStatus::Exited(code);
        self.handle = None;
    }
}

impl Drop for TerminalSession {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[derive(Debug)]
pub struct TerminalState {
    pub sessions: Vec<TerminalSession>,
    pub active: Option<TerminalId>,
    pub next_id: TerminalId,
    pub scrollback_lines: usize,
}

impl Default for TerminalState {
    fn default() -> Self {
        Self::new(DEFAULT_SCROLLBACK_LINES)
    }
}

impl TerminalState {
    pub fn new(scrollback_lines: usize) -> Self {
        Self {
            sessions: Vec::new(),
            active: None,
            next_id: 1,
            scrollback_lines,
        }
    }

    pub fn active_session(&self) -> Option<&TerminalSession> {
        let id = self.active?;
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn active_session_mut(&mut self) -> Option<&mut TerminalSession> {
        let id = self.active?;
        self.sessions.iter_mut().find(|s| s.id == id)
    }

    pub fn session_mut(&mut self, id: TerminalId) -> Option<&mut TerminalSession> {
        self.sessions.iter_mut().find(|s| s.id == id)
    }

    /// Creates a session and makes it active. The caller starts it.
    pub fn open_session(&mut self, cols: u16, rows: u16) -> TerminalId {
        let id = self.next_id;
        self.next_id = self.next_id.saturating_add(1);
        self.sessions
            .push(TerminalSession::new(id, cols, rows, self.scrollback_lines));
        self.active = Some(id);
        id
    }

    /// Disposes and drops a session.
    pub fn remove_session(&mut self, id: TerminalId) -> bool {
        let Some(idx) = self.sessions.iter().position(|s| s.id == id) else {
            return false;
        };
        let mut session = self.sessions.remove(idx);
        session.dispose();
        if self.active == Some(id) {
            self.active = self.sessions.first().map(|s| s.id);
        }
        true
    }

    pub fn drain_all(&mut self) -> bool {
        let mut changed = false;
        for session in &mut self.sessions {
            changed |= session.drain_output();
        }
        changed
    }
}

#[cfg(test)]
#[path = "../../tests/unit/kernel/terminal.rs"]
mod tests;
