//! Service adapters: runtime implementations (IO/async).

pub mod app_dirs;
pub mod file_watcher;
pub mod local;
pub mod memory;
pub mod server_ready;
pub mod settings;

pub use app_dirs::{ensure_log_dir, get_log_dir};
pub use local::LocalRuntime;
pub use memory::{MemoryRuntime, ProcessRecord};
pub use settings::{
    get_settings_path, load_settings, load_settings_at, LoadedSettings, SettingsError,
};
