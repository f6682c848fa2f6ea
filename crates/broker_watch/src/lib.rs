//! Workspace filesystem watching. Two backends — a parallel polling
//! scanner and a native OS-event watcher — selected and deferred by
//! [`mode::Watcher`], feeding [`snapshot::WatchedChange`] batches the
//! daemon forwards to the LSP as `workspace/didChangeWatchedFiles`.

pub mod filter;
pub mod mode;
pub mod native;
pub mod polling;
pub mod snapshot;

pub use mode::{Watcher, WatcherConfig, WatcherMode};
pub use snapshot::{to_lsp_change, ChangeType, WatchedChange};
