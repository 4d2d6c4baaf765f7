//! idex - headless core of a sandboxed-runtime IDE shell.
//!
//! Module layout:
//! - kernel: open-file table, workspace operations, reconciler, diff, runtime panel
//! - kernel::services: runtime port, adapters (memory, local), host, event bus
//! - models: explorer tree snapshot

pub mod kernel;
pub mod models;
