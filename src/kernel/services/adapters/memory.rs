//! In-memory sandbox runtime.
//!
//! A virtual filesystem with change notifications and scripted programs. It
//! also exposes fault injection (failing reads, writes and subscriptions,
//! held writes) so the reconciliation logic can be driven through races.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use rustc_hash::{FxHashMap, FxHashSet};
use tokio::sync::{broadcast, mpsc, Semaphore};

use super::server_ready::detect_server_url;
use crate::kernel::services::ports::file::{join_path, normalize_path, parent_path};
use crate::kernel::services::ports::{
    BoxFuture, ChangeSubscription, DirEntryInfo, FsChange, FsChangeKind, FsError, FsResult,
    PathKind, ProcessControl, ProcessError, ProcessHandle, ProcessOutput, ProcessSpec,
    RuntimeEvent, SandboxRuntime,
};

/// Produces the initial output lines of a scripted program.
pub type Program = Arc<dyn Fn(&ProcessSpec) -> Vec<String> + Send + Sync>;

#[derive(Debug, Clone)]
enum MemNode {
    File(String),
    Dir,
}

struct Subscriber {
    root: String,
    recursive: bool,
    tx: mpsc::UnboundedSender<FsChange>,
}

#[derive(Default)]
struct Faults {
    read_dir: FxHashSet<String>,
    read_file: FxHashSet<String>,
    write: FxHashSet<String>,
    subscribe: bool,
    read_gates: FxHashMap<String, Arc<Semaphore>>,
    write_gate: Option<Arc<Semaphore>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessRecord {
    Spawned(String),
    Resized { command: String, cols: u16, rows: u16 },
    Killed(String),
}

#[derive(Default)]
struct State {
    nodes: BTreeMap<String, MemNode>,
    subscribers: FxHashMap<u64, Subscriber>,
    next_subscriber: u64,
    faults: Faults,
    programs: FxHashMap<String, Program>,
    process_log: Vec<ProcessRecord>,
}

pub struct MemoryRuntime {
    state: Arc<Mutex<State>>,
    events: broadcast::Sender<RuntimeEvent>,
}

impl MemoryRuntime {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            state: Arc::new(Mutex::new(State::default())),
            events,
        }
    }

    /// Seeds files (creating parent folders) without emitting change events.
    pub fn with_files<'a, I>(self, files: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        for (path, content) in files {
            self.seed_file(path, content);
        }
        self
    }

    pub fn seed_file(&self, path: &str, content: &str) {
        let path = normalize_path(path);
        let mut state = self.lock();
        ensure_parents(&mut state.nodes, &path);
        state.nodes.insert(path, MemNode::File(content.to_string()));
    }

    pub fn seed_dir(&self, path: &str) {
        let path = normalize_path(path);
        let mut state = self.lock();
        ensure_parents(&mut state.nodes, &path);
        state.nodes.insert(path, MemNode::Dir);
    }

    pub fn file_content(&self, path: &str) -> Option<String> {
        match self.lock().nodes.get(&normalize_path(path)) {
            Some(MemNode::File(content)) => Some(content.clone()),
            _ => None,
        }
    }

    pub fn fail_read_dir(&self, path: &str) {
        self.lock().faults.read_dir.insert(normalize_path(path));
    }

    pub fn fail_read_file(&self, path: &str) {
        self.lock().faults.read_file.insert(normalize_path(path));
    }

    pub fn fail_writes_to(&self, path: &str) {
        self.lock().faults.write.insert(normalize_path(path));
    }

    pub fn clear_write_failures(&self) {
        self.lock().faults.write.clear();
    }

    pub fn fail_subscribe(&self, fail: bool) {
        self.lock().faults.subscribe = fail;
    }

    /// Suspends every `read_file` of `path` until [`release_reads`] is called.
    ///
    /// [`release_reads`]: MemoryRuntime::release_reads
    pub fn hold_reads(&self, path: &str) {
        self.lock()
            .faults
            .read_gates
            .insert(normalize_path(path), Arc::new(Semaphore::new(0)));
    }

    pub fn release_reads(&self, path: &str) {
        if let Some(gate) = self.lock().faults.read_gates.remove(&normalize_path(path)) {
            gate.close();
        }
    }

    /// Suspends every `write_file` until [`release_writes`] is called.
    ///
    /// [`release_writes`]: MemoryRuntime::release_writes
    pub fn hold_writes(&self) {
        self.lock().faults.write_gate = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release_writes(&self) {
        if let Some(gate) = self.lock().faults.write_gate.take() {
            gate.close();
        }
    }

    /// Ends every open change stream, as a runtime teardown would.
    pub fn close_streams(&self) {
        self.lock().subscribers.clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    pub fn register_program<F>(&self, command: &str, program: F)
    where
        F: Fn(&ProcessSpec) -> Vec<String> + Send + Sync + 'static,
    {
        self.lock()
            .programs
            .insert(command.to_string(), Arc::new(program));
    }

    pub fn process_log(&self) -> Vec<ProcessRecord> {
        self.lock().process_log.clone()
    }

    pub fn emit_server_ready(&self, port: u16, url: &str) {
        let _ = self.events.send(RuntimeEvent::ServerReady {
            port,
            url: url.to_string(),
        });
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        lock_state(&self.state)
    }

    fn notify(&self, changes: Vec<FsChange>) {
        notify_subscribers(&mut self.lock(), changes);
    }

    fn read_dir_now(&self, path: &str) -> FsResult<Vec<DirEntryInfo>> {
        let state = self.lock();
        if state.faults.read_dir.contains(path) {
            return Err(FsError::Io {
                path: path.to_string(),
                reason: "permission denied".to_string(),
            });
        }
        match state.nodes.get(path) {
            Some(MemNode::File(_)) => return Err(FsError::NotADirectory(path.to_string())),
            None if !path.is_empty() => return Err(FsError::NotFound(path.to_string())),
            _ => {}
        }

        let entries = state
            .nodes
            .iter()
            .filter(|(key, _)| is_direct_child(path, key))
            .map(|(key, node)| DirEntryInfo {
                name: key.rsplit('/').next().unwrap_or(key).to_string(),
                is_dir: matches!(node, MemNode::Dir),
            })
            .collect();
        Ok(entries)
    }

    fn write_now(&self, path: &str, content: &str) -> FsResult<FsChange> {
        let mut state = self.lock();
        if path.is_empty() || state.faults.write.contains(path) {
            return Err(FsError::Write {
                path: path.to_string(),
                reason: "write rejected".to_string(),
            });
        }
        if let Some(parent) = parent_path(path) {
            if !matches!(state.nodes.get(parent), Some(MemNode::Dir)) {
                return Err(FsError::Write {
                    path: path.to_string(),
                    reason: "parent folder missing".to_string(),
                });
            }
        }
        let kind = match state.nodes.get(path) {
            Some(MemNode::Dir) => {
                return Err(FsError::Write {
                    path: path.to_string(),
                    reason: "path is a folder".to_string(),
                })
            }
            Some(MemNode::File(_)) => FsChangeKind::Modified,
            None => FsChangeKind::Created,
        };
        state
            .nodes
            .insert(path.to_string(), MemNode::File(content.to_string()));
        Ok(FsChange::new(kind, path))
    }

    fn make_dir_now(&self, path: &str, recursive: bool) -> FsResult<Vec<FsChange>> {
        let mut state = self.lock();
        match state.nodes.get(path) {
            Some(MemNode::Dir) if recursive => return Ok(Vec::new()),
            Some(_) => return Err(FsError::AlreadyExists(path.to_string())),
            None if path.is_empty() => return Ok(Vec::new()),
            None => {}
        }

        let mut created = Vec::new();
        if recursive {
            let mut prefix = String::new();
            for part in path.split('/') {
                prefix = join_path(&prefix, part);
                match state.nodes.get(&prefix) {
                    Some(MemNode::Dir) => {}
                    Some(MemNode::File(_)) => return Err(FsError::NotADirectory(prefix)),
                    None => {
                        state.nodes.insert(prefix.clone(), MemNode::Dir);
                        created.push(FsChange::new(FsChangeKind::Created, prefix.clone()));
                    }
                }
            }
        } else {
            if let Some(parent) = parent_path(path) {
                if !matches!(state.nodes.get(parent), Some(MemNode::Dir)) {
                    return Err(FsError::NotFound(parent.to_string()));
                }
            }
            state.nodes.insert(path.to_string(), MemNode::Dir);
            created.push(FsChange::new(FsChangeKind::Created, path));
        }
        Ok(created)
    }

    fn remove_now(&self, path: &str, recursive: bool) -> FsResult<FsChange> {
        let mut state = self.lock();
        let is_dir = match state.nodes.get(path) {
            None => return Err(FsError::NotFound(path.to_string())),
            Some(node) => matches!(node, MemNode::Dir),
        };
        if is_dir {
            let prefix = format!("{path}/");
            let descendants: Vec<String> = state
                .nodes
                .keys()
                .filter(|key| key.starts_with(&prefix))
                .cloned()
                .collect();
            if !descendants.is_empty() && !recursive {
                return Err(FsError::Io {
                    path: path.to_string(),
                    reason: "directory not empty".to_string(),
                });
            }
            for key in descendants {
                state.nodes.remove(&key);
            }
        }
        state.nodes.remove(path);
        Ok(FsChange::new(FsChangeKind::Removed, path))
    }

    fn write_gate(&self) -> Option<Arc<Semaphore>> {
        self.lock().faults.write_gate.clone()
    }

    fn read_gate(&self, path: &str) -> Option<Arc<Semaphore>> {
        self.lock().faults.read_gates.get(path).cloned()
    }
}

impl Default for MemoryRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl SandboxRuntime for MemoryRuntime {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn read_dir<'a>(&'a self, path: &'a str) -> BoxFuture<'a, FsResult<Vec<DirEntryInfo>>> {
        Box::pin(async move { self.read_dir_now(&normalize_path(path)) })
    }

    fn read_file<'a>(&'a self, path: &'a str) -> BoxFuture<'a, FsResult<String>> {
        Box::pin(async move {
            let path = normalize_path(path);
            if let Some(gate) = self.read_gate(&path) {
                let _ = gate.acquire().await;
            }
            let state = self.lock();
            if state.faults.read_file.contains(&path) {
                return Err(FsError::Io {
                    path,
                    reason: "read rejected".to_string(),
                });
            }
            match state.nodes.get(&path) {
                Some(MemNode::File(content)) => Ok(content.clone()),
                Some(MemNode::Dir) => Err(FsError::NotAFile(path)),
                None => Err(FsError::NotFound(path)),
            }
        })
    }

    fn write_file<'a>(&'a self, path: &'a str, content: &'a str) -> BoxFuture<'a, FsResult<()>> {
        Box::pin(async move {
            if let Some(gate) = self.write_gate() {
                let _ = gate.acquire().await;
            }
            let change = self.write_now(&normalize_path(path), content)?;
            self.notify(vec![change]);
            Ok(())
        })
    }

    fn make_dir<'a>(&'a self, path: &'a str, recursive: bool) -> BoxFuture<'a, FsResult<()>> {
        Box::pin(async move {
            let changes = self.make_dir_now(&normalize_path(path), recursive)?;
            self.notify(changes);
            Ok(())
        })
    }

    fn remove_path<'a>(&'a self, path: &'a str, recursive: bool) -> BoxFuture<'a, FsResult<()>> {
        Box::pin(async move {
            let change = self.remove_now(&normalize_path(path), recursive)?;
            self.notify(vec![change]);
            Ok(())
        })
    }

    fn probe<'a>(&'a self, path: &'a str) -> BoxFuture<'a, PathKind> {
        Box::pin(async move {
            let path = normalize_path(path);
            if path.is_empty() {
                return PathKind::Directory;
            }
            match self.lock().nodes.get(&path) {
                Some(MemNode::File(_)) => PathKind::File,
                Some(MemNode::Dir) => PathKind::Directory,
                None => PathKind::NotFound,
            }
        })
    }

    fn subscribe(&self, path: &str, recursive: bool) -> FsResult<ChangeSubscription> {
        let root = normalize_path(path);
        let mut state = self.lock();
        if state.faults.subscribe {
            return Err(FsError::Watch {
                path: root,
                reason: "watcher unavailable".to_string(),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let id = state.next_subscriber;
        state.next_subscriber += 1;
        state.subscribers.insert(
            id,
            Subscriber {
                root,
                recursive,
                tx,
            },
        );

        let shared = Arc::clone(&self.state);
        Ok(ChangeSubscription::new(rx, move || {
            lock_state(&shared).subscribers.remove(&id);
        }))
    }

    fn spawn_process(
        &self,
        spec: ProcessSpec,
    ) -> BoxFuture<'_, std::result::Result<ProcessHandle, ProcessError>> {
        Box::pin(async move {
            let program = {
                let mut state = self.lock();
                let program = state.programs.get(&spec.command).cloned();
                if program.is_some() {
                    state
                        .process_log
                        .push(ProcessRecord::Spawned(spec.command.clone()));
                }
                program
            };
            let Some(program) = program else {
                return Err(ProcessError::Spawn {
                    command: spec.command.clone(),
                    reason: "command not found".to_string(),
                });
            };

            let (out_tx, out_rx) = mpsc::unbounded_channel();
            let (in_tx, mut in_rx) = mpsc::unbounded_channel::<String>();

            for line in program(&spec) {
                if let Some((port, url)) = detect_server_url(&line) {
                    let _ = self.events.send(RuntimeEvent::ServerReady { port, url });
                }
                let _ = out_tx.send(ProcessOutput::Data(line));
            }

            let echo_tx = out_tx.clone();
            tokio::spawn(async move {
                while let Some(input) = in_rx.recv().await {
                    if echo_tx.send(ProcessOutput::Data(input)).is_err() {
                        break;
                    }
                }
            });

            let control = MemoryProcess {
                command: spec.command.clone(),
                state: Arc::clone(&self.state),
                output: Some(out_tx),
            };
            Ok(ProcessHandle::new(out_rx, in_tx, Box::new(control)))
        })
    }

    fn events(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.events.subscribe()
    }
}

struct MemoryProcess {
    command: String,
    state: Arc<Mutex<State>>,
    output: Option<mpsc::UnboundedSender<ProcessOutput>>,
}

impl ProcessControl for MemoryProcess {
    fn resize(&mut self, cols: u16, rows: u16) {
        lock_state(&self.state)
            .process_log
            .push(ProcessRecord::Resized {
                command: self.command.clone(),
                cols,
                rows,
            });
    }

    fn kill(&mut self) {
        if let Some(output) = self.output.take() {
            let _ = output.send(ProcessOutput::Exited(None));
            lock_state(&self.state)
                .process_log
                .push(ProcessRecord::Killed(self.command.clone()));
        }
    }
}

fn lock_state(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn ensure_parents(nodes: &mut BTreeMap<String, MemNode>, path: &str) {
    let mut current = parent_path(path);
    while let Some(dir) = current {
        nodes.entry(dir.to_string()).or_insert(MemNode::Dir);
        current = parent_path(dir);
    }
}

fn is_direct_child(parent: &str, key: &str) -> bool {
    let rest = if parent.is_empty() {
        key
    } else {
        match key
            .strip_prefix(parent)
            .and_then(|rest| rest.strip_prefix('/'))
        {
            Some(rest) => rest,
            None => return false,
        }
    };
    !rest.is_empty() && !rest.contains('/')
}

fn is_within(root: &str, path: &str, recursive: bool) -> bool {
    if root.is_empty() {
        return recursive || !path.contains('/');
    }
    if path == root {
        return true;
    }
    match path.strip_prefix(root).and_then(|rest| rest.strip_prefix('/')) {
        Some(rest) => recursive || !rest.contains('/'),
        None => false,
    }
}

fn notify_subscribers(state: &mut State, changes: Vec<FsChange>) {
    if changes.is_empty() {
        return;
    }
    let mut closed = Vec::new();
    for (id, sub) in &state.subscribers {
        for change in &changes {
            if !is_within(&sub.root, &change.path, sub.recursive) {
                continue;
            }
            if sub.tx.send(change.clone()).is_err() {
                closed.push(*id);
                break;
            }
        }
    }
    for id in closed {
        state.subscribers.remove(&id);
    }
}

#[cfg(test)]
#[path = "../../../../tests/unit/kernel/services/adapters/memory.rs"]
mod tests;
