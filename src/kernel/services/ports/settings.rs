use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub reconciler: ReconcilerSettings,
    #[serde(default)]
    pub preview: CommandSettings,
    #[serde(default = "CommandSettings::default_shell")]
    pub shell: CommandSettings,
    #[serde(default = "default_scrollback_lines")]
    pub scrollback_lines: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_filter: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcilerSettings {
    /// Events arriving within this window after the first one share a rebuild.
    /// Zero rebuilds once per event.
    #[serde(default = "default_coalesce_window_ms")]
    pub coalesce_window_ms: u64,
    /// Periodic refresh used when the change stream cannot be established.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_poll_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSettings {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

fn default_coalesce_window_ms() -> u64 {
    16
}

fn default_scrollback_lines() -> usize {
    5000
}

impl ReconcilerSettings {
    pub fn coalesce_window(&self) -> Duration {
        Duration::from_millis(self.coalesce_window_ms)
    }

    pub fn fallback_poll_interval(&self) -> Option<Duration> {
        self.fallback_poll_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            coalesce_window_ms: default_coalesce_window_ms(),
            fallback_poll_ms: None,
        }
    }
}

impl CommandSettings {
    fn default_shell() -> Self {
        Self {
            command: "jsh".to_string(),
            args: Vec::new(),
        }
    }
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            command: "npx".to_string(),
            args: ["-y", "serve", ".", "-l", "3000"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            reconciler: ReconcilerSettings::default(),
            preview: CommandSettings::default(),
            shell: CommandSettings::default_shell(),
            scrollback_lines: default_scrollback_lines(),
            log_filter: None,
        }
    }
}

#[cfg(test)]
#[path = "../../../../tests/unit/kernel/services/ports/settings.rs"]
mod tests;
