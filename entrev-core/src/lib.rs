//! # entrev-core
//!
//! Core library for entrev - change tracking, undo and rollback for the
//! entities of a live content store.
//!
//! Every entity is mirrored as a canonical snapshot file. Each real change to
//! a snapshot becomes one classified commit in an append-only history, and
//! undo or rollback write new commits before resynchronizing the live store.

pub mod change;
pub mod classify;
pub mod codec;
pub mod config;
pub mod coordinator;
pub mod diff;
pub mod engine;
pub mod error;
pub mod history;
pub mod live;
pub mod locks;
pub mod models;
pub mod sqlite_history;
pub mod storage;

pub use change::{Action, ChangeDescription, CommitMessage};
pub use config::Config;
pub use coordinator::{CommitRow, RevertOutcome};
pub use diff::{Diff, FieldChange, Transition};
pub use engine::Engine;
pub use error::{Error, Result};
pub use history::{Commit, CommitFilter, CommitHash, FileChange, HistoryBackend, MemoryHistory};
pub use live::{LiveStore, MemoryLiveStore, SqliteLiveStore};
pub use models::{Entity, EntityKind, EntityRef, Fields, LiveId, Value, VersionId};
pub use sqlite_history::SqliteHistory;
pub use storage::DirectoryStorage;
