//! note-mirror: keeps a directory of plain text files in sync with an
//! encrypted note store.

use anyhow::Result;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mirror_daemon::{
    Args, ChangeDetector, Command, FileWatcher, Mirror, MirrorConfig, sync_and_log,
    sync_or_retry_later,
};

/// Sync, then print every cached note.
async fn list(mirror: &mut Mirror) -> Result<()> {
    sync_and_log(mirror).await?;
    for note in mirror.list_notes()? {
        println!("{} - {}", note.uuid, note.title);
    }
    Ok(())
}

/// Sync, mirror everything, then react to edits and timer ticks until
/// Ctrl+C. Starting offline is fine; the cache is mirrored regardless.
async fn watch(mut mirror: Mirror, config: &MirrorConfig) -> Result<()> {
    sync_or_retry_later(&mut mirror).await?;
    let count = mirror.materialize_cached().await?;
    info!("Mirrored {} notes into {:?}", count, config.root.join(&config.notes_dir));

    let mut watcher = FileWatcher::new(config.root.clone(), &config.notes_dir)?;
    info!("File watcher started");
    let (files, errors) = watcher.take_channels();

    // Nothing requests syncs yet; the sender stays alive so the branch waits
    let (_requests_tx, requests) = mpsc::channel(1);

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    info!("Daemon running. Press Ctrl+C to stop.");
    let mut detector = ChangeDetector::new(mirror, config.sync_interval);
    detector.run(files, errors, requests, shutdown).await?;

    info!("Shutting down");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,mirror_daemon=debug,mirror_core=debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = MirrorConfig::from_args(&args)?;
    info!("Mirror root: {:?}", config.root);
    info!("Remote: {:?}", config.remote_dir);

    let mut mirror = mirror_daemon::open(&config).await?;

    match args.command.unwrap_or(Command::Watch) {
        Command::List => list(&mut mirror).await,
        Command::Sync => sync_and_log(&mut mirror).await.map(|_| ()).map_err(Into::into),
        Command::Watch => watch(mirror, &config).await,
    }
}
