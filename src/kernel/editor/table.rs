use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;

use crate::kernel::language::language_tag;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpenFileEntry {
    pub path: String,
    pub live_content: String,
    /// Last content known to be on the runtime filesystem.
    pub persisted_content: String,
    pub language_tag: String,
}

impl OpenFileEntry {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        let path = path.into();
        let content = content.into();
        Self {
            language_tag: language_tag(&path),
            live_content: content.clone(),
            persisted_content: content,
            path,
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.live_content != self.persisted_content
    }
}

/// Issued when an open starts; the open may focus its entry only if no later
/// activation happened in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivationTicket(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitStart {
    NotOpen,
    Clean,
    /// Content to write; the path stays in flight until `finish_commit`.
    Write(String),
}

/// Open editor tabs and the active one.
///
/// Pure state: every method is synchronous and the caller serializes access.
#[derive(Debug, Default)]
pub struct OpenFileTable {
    entries: Vec<OpenFileEntry>,
    active: Option<String>,
    activations: u64,
    in_flight: FxHashMap<String, usize>,
    deferred: FxHashSet<String>,
}

impl OpenFileTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[OpenFileEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&OpenFileEntry> {
        self.entries.iter().find(|e| e.path == path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn active_entry(&self) -> Option<&OpenFileEntry> {
        self.active.as_deref().and_then(|p| self.get(p))
    }

    pub fn is_dirty(&self, path: &str) -> bool {
        self.get(path).is_some_and(OpenFileEntry::is_dirty)
    }

    pub fn dirty_paths(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.is_dirty())
            .map(|e| e.path.clone())
            .collect()
    }

    pub fn begin_activation(&mut self) -> ActivationTicket {
        self.activations += 1;
        ActivationTicket(self.activations)
    }

    /// Focuses an open entry. Returns false if `path` is not open.
    pub fn activate(&mut self, path: &str) -> bool {
        if !self.contains(path) {
            return false;
        }
        self.activations += 1;
        self.active = Some(path.to_string());
        true
    }

    /// Inserts the result of an open. An entry opened concurrently under the
    /// same path is kept as is. Returns whether the entry became active.
    pub fn insert_opened(&mut self, ticket: ActivationTicket, path: &str, content: String) -> bool {
        if !self.contains(path) {
            self.entries.push(OpenFileEntry::new(path, content));
        }
        if ticket.0 != self.activations {
            return false;
        }
        self.active = Some(path.to_string());
        true
    }

    /// Replaces the live buffer of the active entry; any other path is ignored.
    pub fn edit(&mut self, path: &str, content: impl Into<String>) -> bool {
        if self.active.as_deref() != Some(path) {
            return false;
        }
        match self.entries.iter_mut().find(|e| e.path == path) {
            Some(entry) => {
                entry.live_content = content.into();
                true
            }
            None => false,
        }
    }

    pub fn close(&mut self, path: &str) -> bool {
        let Some(idx) = self.entries.iter().position(|e| e.path == path) else {
            return false;
        };
        self.entries.remove(idx);
        self.deferred.remove(path);
        if self.active.as_deref() == Some(path) {
            self.active = self.entries.last().map(|e| e.path.clone());
        }
        true
    }

    /// Closes every entry whose path is not in `current`, returning the
    /// closed paths. Entries with a commit in flight are deferred until the
    /// commit settles.
    pub fn reconcile(&mut self, current: &FxHashSet<String>) -> Vec<String> {
        let stale: Vec<String> = self
            .entries
            .iter()
            .filter(|e| !current.contains(&e.path))
            .map(|e| e.path.clone())
            .collect();

        let mut closed = Vec::with_capacity(stale.len());
        for path in stale {
            if self.in_flight.contains_key(&path) {
                self.deferred.insert(path);
                continue;
            }
            self.close(&path);
            closed.push(path);
        }
        closed
    }

    pub fn begin_commit(&mut self, path: &str) -> CommitStart {
        let Some(entry) = self.get(path) else {
            return CommitStart::NotOpen;
        };
        if !entry.is_dirty() {
            return CommitStart::Clean;
        }
        let snapshot = entry.live_content.clone();
        *self.in_flight.entry(path.to_string()).or_insert(0) += 1;
        CommitStart::Write(snapshot)
    }

    /// Settles a commit started with `begin_commit`. On success the written
    /// snapshot becomes the persisted content. Returns true when a reconcile
    /// deferred the path and the caller must re-check that it still exists.
    pub fn finish_commit(&mut self, path: &str, snapshot: &str, written: bool) -> bool {
        if written {
            if let Some(entry) = self.entries.iter_mut().find(|e| e.path == path) {
                entry.persisted_content = snapshot.to_string();
            }
        }

        let settled = match self.in_flight.get_mut(path) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                self.in_flight.remove(path);
                true
            }
            None => false,
        };
        settled && self.deferred.remove(path)
    }

    pub fn commit_in_flight(&self, path: &str) -> bool {
        self.in_flight.contains_key(path)
    }
}

#[cfg(test)]
#[path = "../../../tests/unit/kernel/editor/table.rs"]
mod tests;
