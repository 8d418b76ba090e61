//! Sync orchestrator: runs push/pull/merge cycles and applies local edits.
//!
//! One cycle goes through three phases:
//!
//! 1. Pushing: every pending item is submitted. The first failure aborts
//!    the cycle and leaves the queue as it was.
//! 2. Pulling: one exchange from the persisted cursor. A failure here also
//!    aborts the cycle; pushed items stay queued and are resent next time.
//! 3. Merging: acknowledged pending entries are cleared, retrieved notes
//!    are saved and materialized (or removed, if deleted remotely), saved
//!    notes get their metadata refreshed, and the new cursor is persisted
//!    last.
//!
//! The orchestrator is the only owner of the local store, the pending
//! queue and the file index.

use crate::fs::{FileSystem, FsError};
use crate::item::Item;
use crate::materializer::Materializer;
use crate::note::{self, CodecError, Note};
use crate::remote::{RemoteError, RemoteSession};
use crate::store::{KvBackend, LocalStore, StorageError};
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Fs(#[from] FsError),
}

impl SyncError {
    /// Whether the sync loop should stop instead of retrying next tick.
    /// Only a rejected sign-in is fatal.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Remote(RemoteError::Unauthorized(_)))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// Where the orchestrator is within a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncState {
    #[default]
    Idle,
    Pushing,
    Pulling,
    Merging,
    /// The last cycle aborted. A new cycle may be started.
    Failed,
}

/// Summary of a completed cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Pending items acknowledged by the server
    pub pushed: usize,
    /// Notes saved and materialized from the pull
    pub retrieved: usize,
    /// Notes removed because they were deleted remotely
    pub deleted: usize,
    /// Metadata refreshes for our own pushes
    pub saved: usize,
    /// Cursor persisted at the end of the cycle
    pub cursor: String,
}

impl CycleReport {
    /// Whether the cycle changed anything locally or remotely.
    pub fn is_empty(&self) -> bool {
        self.pushed == 0 && self.retrieved == 0 && self.deleted == 0
    }
}

pub struct SyncOrchestrator<K: KvBackend, F: FileSystem, R: RemoteSession> {
    store: LocalStore<K>,
    materializer: Materializer<F>,
    remote: R,
    state: SyncState,
}

impl<K, F, R> SyncOrchestrator<K, F, R>
where
    K: KvBackend,
    F: FileSystem,
    R: RemoteSession,
{
    pub fn new(store: LocalStore<K>, materializer: Materializer<F>, remote: R) -> Self {
        Self {
            store,
            materializer,
            remote,
            state: SyncState::Idle,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn store(&self) -> &LocalStore<K> {
        &self.store
    }

    pub fn materializer(&self) -> &Materializer<F> {
        &self.materializer
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    /// Run one full push/pull/merge cycle.
    ///
    /// On error the state is `Failed` and nothing after the failing step
    /// has been applied.
    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        match self.cycle().await {
            Ok(report) => {
                self.state = SyncState::Idle;
                Ok(report)
            }
            Err(e) => {
                self.state = SyncState::Failed;
                Err(e)
            }
        }
    }

    async fn cycle(&mut self) -> Result<CycleReport> {
        let mut report = CycleReport::default();

        self.state = SyncState::Pushing;
        let pending = self.store.list_pending()?;
        let mut acked = HashSet::with_capacity(pending.len());
        for item in &pending {
            let ack = self.remote.submit_update(item).await?;
            if ack.uuid != item.uuid {
                return Err(RemoteError::Protocol(format!(
                    "Pushed item {} but server acknowledged {}",
                    item.uuid, ack.uuid
                ))
                .into());
            }
            debug!("Pushed item {}", item.uuid);
            acked.insert(item.uuid);
        }

        self.state = SyncState::Pulling;
        let cursor = self.store.get_cursor()?;
        let result = self.remote.exchange(cursor.as_deref()).await?;
        debug!(
            "Exchange returned {} retrieved, {} saved items",
            result.retrieved.len(),
            result.saved.len()
        );

        self.state = SyncState::Merging;
        for uuid in &acked {
            self.store.clear_pending(uuid)?;
        }
        report.pushed = acked.len();

        for item in result.retrieved.iter().filter(|item| accepts(item)) {
            if item.deleted {
                self.store.delete_item(&item.uuid)?;
                self.materializer.remove(&item.uuid).await?;
                report.deleted += 1;
            } else {
                let note = note::decrypt(&self.remote, item)?;
                self.store.save_item(item)?;
                self.materializer.materialize(&note).await?;
                report.retrieved += 1;
            }
        }

        for item in result.saved.iter().filter(|item| accepts(item)) {
            self.store.save_item(item)?;
            report.saved += 1;
        }

        self.store.set_cursor(&result.cursor)?;
        report.cursor = result.cursor;
        Ok(report)
    }

    /// Queue an edit of a materialized file and fold it into the cache.
    ///
    /// Returns the identity of the edited note, or `None` if the path is not
    /// a materialized note or its text did not change.
    ///
    /// The edit is queued before the cache is touched, and compared against
    /// the queued copy when there is one, so a failure between the two
    /// writes never makes a retry look like an echo.
    pub async fn record_local_edit(&mut self, path: &str) -> Result<Option<Uuid>> {
        let Some(uuid) = self.materializer.resolve(path) else {
            debug!("Ignoring change to unknown file {}", path);
            return Ok(None);
        };

        let base = match self.store.get_pending(&uuid)? {
            Some(queued) => queued,
            None => match self.store.get_item(&uuid)? {
                Some(cached) => cached,
                None => {
                    warn!("File {} maps to note {} which is not cached", path, uuid);
                    return Ok(None);
                }
            },
        };

        let text = self.materializer.read(path).await?;
        let mut note = note::decrypt(&self.remote, &base)?;
        if note.text == text {
            debug!("No changes detected (sync echo): {}", path);
            return Ok(None);
        }

        note.text = text;
        let item = note::encrypt(&self.remote, &note, &base)?;
        self.store.enqueue_pending(&item)?;
        self.store.save_item(&item)?;
        debug!("Queued local edit of {} for push", path);
        Ok(Some(uuid))
    }

    /// Materialize every cached note, rebuilding the file index.
    pub async fn materialize_cached(&mut self) -> Result<usize> {
        self.materializer.ensure_dir().await?;

        let notes = self.list_notes()?;
        for note in &notes {
            self.materializer.materialize(note).await?;
        }
        debug!("Rebuilt file index with {} entries", self.materializer.index().len());
        Ok(notes.len())
    }

    /// Decrypt every cached note.
    pub fn list_notes(&self) -> Result<Vec<Note>> {
        self.store
            .get_all_items()?
            .iter()
            .filter(|item| item.is_note() && !item.deleted)
            .map(|item| note::decrypt(&self.remote, item).map_err(SyncError::from))
            .collect()
    }
}

/// Only notes are mirrored; other content types never reach the store.
fn accepts(item: &Item) -> bool {
    if item.is_note() {
        true
    } else {
        debug!("Skipping {} item {}", item.content_type, item.uuid);
        false
    }
}
