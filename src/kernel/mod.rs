//! Headless application core.

pub mod diff;
pub mod editor;
pub mod language;
pub mod panel;
pub mod reconciler;
pub mod services;
pub mod terminal;
pub mod workspace;

pub use diff::{project, DiffProjection, DiffStats};
pub use editor::{OpenFileEntry, OpenFileTable};
pub use language::{language_tag, LanguageFamily};
pub use panel::{PreviewServer, PreviewStatus};
pub use reconciler::{ReconcilerHandle, ReconcilerState, WatchSource};
pub use terminal::{SessionStatus, TerminalSession, TerminalState};
pub use workspace::{CommitOutcome, OpenOutcome, Workspace, WorkspaceError};
