//! Change detector: the daemon's event loop.
//!
//! One loop multiplexes file writes, a sync timer, explicit sync requests,
//! watcher errors and shutdown. Each event goes through [`ChangeDetector::handle`],
//! which runs to completion before the next event is taken, so the
//! orchestrator is never entered concurrently.

use crate::watcher::FileEvent;
use mirror_core::fs::FileSystem;
use mirror_core::orchestrator::{CycleReport, SyncError, SyncOrchestrator};
use mirror_core::remote::RemoteSession;
use mirror_core::store::KvBackend;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Default time between sync cycles.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectorEvent {
    /// A note file was written (path relative to the mirror root)
    FileWritten(String),
    /// The sync timer fired
    Tick,
    /// Someone asked for a sync now
    SyncRequested,
    /// The file watcher reported an error
    WatchError(String),
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopControl {
    Continue,
    Stop,
}

pub struct ChangeDetector<K: KvBackend, F: FileSystem, R: RemoteSession> {
    orchestrator: SyncOrchestrator<K, F, R>,
    interval: Duration,
}

impl<K, F, R> ChangeDetector<K, F, R>
where
    K: KvBackend,
    F: FileSystem,
    R: RemoteSession,
{
    pub fn new(orchestrator: SyncOrchestrator<K, F, R>, interval: Duration) -> Self {
        Self {
            orchestrator,
            interval,
        }
    }

    pub fn orchestrator(&self) -> &SyncOrchestrator<K, F, R> {
        &self.orchestrator
    }

    pub fn into_orchestrator(self) -> SyncOrchestrator<K, F, R> {
        self.orchestrator
    }

    /// Process one event.
    ///
    /// Only a fatal sync failure is returned as an error; everything else
    /// is logged and the loop goes on.
    pub async fn handle(&mut self, event: DetectorEvent) -> Result<LoopControl, SyncError> {
        match event {
            DetectorEvent::FileWritten(path) => {
                match self.orchestrator.record_local_edit(&path).await {
                    Ok(Some(uuid)) => info!("{} ready to be synced ({})", uuid, path),
                    Ok(None) => {}
                    Err(e) => error!("Failed to record edit of {}: {}", path, e),
                }
            }
            DetectorEvent::Tick | DetectorEvent::SyncRequested => {
                sync_or_retry_later(&mut self.orchestrator).await?;
            }
            DetectorEvent::WatchError(message) => {
                warn!("File watcher error: {}", message);
            }
            DetectorEvent::Shutdown => return Ok(LoopControl::Stop),
        }
        Ok(LoopControl::Continue)
    }

    /// Run until shutdown, the file event source closes, or a fatal error.
    ///
    /// The first timed sync happens one interval after start.
    pub async fn run(
        &mut self,
        mut files: mpsc::UnboundedReceiver<FileEvent>,
        mut errors: mpsc::UnboundedReceiver<String>,
        mut requests: mpsc::Receiver<()>,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), SyncError> {
        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            let event = tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    DetectorEvent::Shutdown
                }

                event = files.recv() => match event {
                    Some(event) => DetectorEvent::FileWritten(event.path),
                    None => {
                        info!("File watcher closed");
                        DetectorEvent::Shutdown
                    }
                },

                Some(message) = errors.recv() => DetectorEvent::WatchError(message),

                Some(()) = requests.recv() => DetectorEvent::SyncRequested,

                _ = ticker.tick() => DetectorEvent::Tick,
            };

            debug!("Handling {:?}", event);
            if self.handle(event).await? == LoopControl::Stop {
                return Ok(());
            }
        }
    }
}

/// Run one cycle and log its outcome.
pub async fn sync_and_log<K, F, R>(
    orchestrator: &mut SyncOrchestrator<K, F, R>,
) -> Result<CycleReport, SyncError>
where
    K: KvBackend,
    F: FileSystem,
    R: RemoteSession,
{
    let report = orchestrator.run_cycle().await?;
    if report.pushed > 0 {
        info!("{} local edits pushed", report.pushed);
    }
    if report.deleted > 0 {
        info!("{} notes deleted remotely", report.deleted);
    }
    if report.retrieved > 0 {
        info!("{} new notes synced to database", report.retrieved);
    } else if report.is_empty() {
        info!("Database is up to date");
    }
    Ok(report)
}

/// Run one cycle, logging any failure that the next cycle may fix.
///
/// Returns `Ok(None)` when the cycle failed but syncing should go on, and
/// an error only when it is fatal.
pub async fn sync_or_retry_later<K, F, R>(
    orchestrator: &mut SyncOrchestrator<K, F, R>,
) -> Result<Option<CycleReport>, SyncError>
where
    K: KvBackend,
    F: FileSystem,
    R: RemoteSession,
{
    match sync_and_log(orchestrator).await {
        Ok(report) => Ok(Some(report)),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            error!("Sync failed, retrying next cycle: {}", e);
            Ok(None)
        }
    }
}
