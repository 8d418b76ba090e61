//! mirror-daemon library: native backends and the event loop behind the
//! `note-mirror` binary.
//!
//! This is a thin library layer over the daemon components,
//! allowing integration tests to access internal types.

pub mod config;
pub mod detector;
pub mod folder_remote;
pub mod kv;
pub mod native_fs;
pub mod watcher;

pub use config::{Args, Command, MirrorConfig};
pub use detector::{
    ChangeDetector, DetectorEvent, LoopControl, sync_and_log, sync_or_retry_later,
};
pub use folder_remote::FolderRemote;
pub use kv::RedbKv;
pub use native_fs::NativeFs;
pub use watcher::{FileEvent, FileWatcher};

use anyhow::{Context, Result};
use mirror_core::materializer::Materializer;
use mirror_core::orchestrator::SyncOrchestrator;
use mirror_core::store::LocalStore;
use tracing::info;

/// The orchestrator wired to the native backends.
pub type Mirror = SyncOrchestrator<RedbKv, NativeFs, FolderRemote>;

/// Sign in and open the local cache and mirror directory for `config`.
pub async fn open(config: &MirrorConfig) -> Result<Mirror> {
    let remote = FolderRemote::sign_in(&config.remote_dir, &config.email, &config.password)
        .await
        .context("Sign-in failed")?;
    info!("Login successful!");

    let kv = RedbKv::open(&config.database)
        .with_context(|| format!("Failed to open cache {}", config.database.display()))?;

    let materializer = Materializer::new(NativeFs::new(config.root.clone()), &config.notes_dir)
        .with_policy(config.collision_policy);

    Ok(SyncOrchestrator::new(
        LocalStore::new(kv),
        materializer,
        remote,
    ))
}
