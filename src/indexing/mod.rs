pub mod classify;
pub mod controller;
pub mod fingerprint;
pub mod indexer;
mod loop_worker;
pub mod source;
pub mod watcher;

pub use controller::IndexingController;
pub use indexer::{ContentIndexer, FileOutcome, ScanSummary};
pub use source::{DiskFileSource, FileEntry, FileSource};
pub use watcher::ProjectWatcher;
