//! # soundpack-sync
//!
//! Incremental synchronization of a soundpack directory against its template.
//!
//! [`scanner::scan`] observes a directory, [`diff::diff_with`] turns the
//! observation into a change set, and [`orchestrator::sync_pack`] regenerates
//! only the entries whose text changed. [`batch`] applies the same run to every
//! voice directory of a pack.

pub mod batch;
pub mod config;
pub mod diff;
pub mod error;
pub mod manifest;
pub mod orchestrator;
pub mod scanner;
pub mod writer;

pub use diff::{diff, diff_with, ChangeKind, ChangeRecord};
pub use error::SyncError;
pub use orchestrator::{
    plan, remove_orphans, sync_pack, EntryOutcome, EntryState, Failure, SyncRequest, SyncResult,
    SyncSettings, SyncStatus,
};
pub use scanner::{scan, DirectoryEntry, DirectoryState};
