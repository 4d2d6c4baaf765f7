//! Editor domain: open-file table.

mod table;

pub use table::{ActivationTicket, CommitStart, OpenFileEntry, OpenFileTable};
