//! Services layer (ports + adapters).
//!
//! - `ports`: pure contracts/types used across the app (kernel-facing).
//! - `adapters`: runtime implementations of those contracts.

pub mod adapters;
pub mod bus;
pub mod host;
pub mod ports;

pub use bus::{workspace_bus, WorkspaceBusReceiver, WorkspaceBusSender, WorkspaceEvent};
pub use host::{PreviewUrl, RuntimeError, RuntimeHost, RuntimeStatus};
