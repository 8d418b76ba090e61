//! mirror-core: reconciliation engine for a plaintext mirror of an
//! encrypted note store.
//!
//! This crate provides:
//! - A durable local cache of remote items, pending pushes and the sync cursor
//! - The note codec between encrypted items and structured notes
//! - Materialization of notes as plain text files, with a path -> UUID index
//! - The push/pull/merge sync cycle
//! - FileSystem, KvBackend and RemoteSession trait abstractions with
//!   in-memory implementations

pub mod file_index;
pub mod fs;
pub mod item;
pub mod materializer;
pub mod note;
pub mod orchestrator;
pub mod remote;
pub mod store;

pub use file_index::FileIndex;
pub use fs::{FileSystem, FsError, InMemoryFs};
pub use item::{Item, NOTE_CONTENT_TYPE};
pub use materializer::{CollisionPolicy, Materializer};
pub use note::{CodecError, Note, Reference};
pub use orchestrator::{CycleReport, SyncError, SyncOrchestrator, SyncState};
pub use remote::{Ack, ExchangeResult, ItemCipher, MemoryRemote, RemoteError, RemoteSession};
pub use store::{KvBackend, LocalStore, MemoryKv, StorageError, Table};
