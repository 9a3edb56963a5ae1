//! Backup and diff runs between two storage backends.
//!
//! A run pulls batches of files from the source, drops excluded paths, and
//! for each remaining file asks the target whether it already holds an equal
//! copy. Backup copies what is missing; diff only reports it.

pub mod engine;
pub mod filter;
pub mod report;

pub use engine::{SyncConfig, SyncEngine, DEFAULT_BACKUP_CONCURRENCY, DEFAULT_DIFF_CONCURRENCY};
pub use filter::ExclusionFilter;
pub use report::{DiffReport, SyncReport};
