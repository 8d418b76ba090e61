//! File watcher with debouncing for the notes directory.
//!
//! Uses notify-debouncer-mini for efficient file change detection.

use anyhow::Result;
use mirror_core::materializer::NOTE_EXTENSION;
use notify::RecursiveMode;
use notify_debouncer_mini::{DebouncedEvent, new_debouncer};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tracing::debug;

/// A note file was written. The path is relative to the mirror root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    pub path: String,
}

/// Track last seen mtime to filter spurious events
type MtimeCache = Arc<Mutex<HashMap<PathBuf, SystemTime>>>;

/// Watches the notes directory and reports written note files.
pub struct FileWatcher {
    /// Mirror root; reported paths are relative to it
    root: PathBuf,
    /// Debouncer handle (must keep alive)
    _debouncer: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
    event_rx: mpsc::UnboundedReceiver<FileEvent>,
    error_rx: mpsc::UnboundedReceiver<String>,
}

impl FileWatcher {
    /// Watch `root/notes_dir`.
    ///
    /// Uses 200ms debounce period to avoid rapid-fire events during saves.
    pub fn new(root: PathBuf, notes_dir: &str) -> Result<Self> {
        // Canonicalize the path to resolve symlinks. On macOS, /var/folders/...
        // is actually /private/var/folders/..., and FSEvents needs the real path.
        let root = root.canonicalize().unwrap_or(root);
        let watched = root.join(notes_dir);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (error_tx, error_rx) = mpsc::unbounded_channel();
        let root_clone = root.clone();
        let mtime_cache: MtimeCache = Arc::new(Mutex::new(HashMap::new()));

        let mut debouncer = new_debouncer(
            Duration::from_millis(200),
            move |result: std::result::Result<Vec<DebouncedEvent>, notify::Error>| match result {
                Ok(events) => {
                    for event in events {
                        if let Some(file_event) =
                            Self::process_event(&event, &root_clone, &mtime_cache)
                        {
                            if event_tx.send(file_event).is_err() {
                                // Receiver dropped
                                return;
                            }
                        }
                    }
                }
                Err(e) => {
                    let _ = error_tx.send(e.to_string());
                }
            },
        )?;

        debouncer
            .watcher()
            .watch(&watched, RecursiveMode::Recursive)?;

        Ok(Self {
            root,
            _debouncer: debouncer,
            event_rx,
            error_rx,
        })
    }

    /// Process a single debounced event, returning a FileEvent if relevant.
    fn process_event(
        event: &DebouncedEvent,
        root: &Path,
        mtime_cache: &MtimeCache,
    ) -> Option<FileEvent> {
        let path = &event.path;
        let relative = path.strip_prefix(root).ok()?;

        if !is_note_file(relative) {
            return None;
        }

        // Removals are not mirrored back; only writes matter
        let metadata = std::fs::metadata(path).ok()?;
        if !metadata.is_file() {
            return None;
        }

        // Skip events that did not change the mtime
        if let Ok(mtime) = metadata.modified() {
            let mut cache = mtime_cache.lock().unwrap_or_else(|e| e.into_inner());
            if cache.get(relative) == Some(&mtime) {
                return None;
            }
            cache.insert(relative.to_path_buf(), mtime);
        }

        let relative_str = relative.to_str()?.replace('\\', "/");
        debug!("File written: {}", relative_str);
        Some(FileEvent { path: relative_str })
    }

    /// Take the receivers, leaving the watcher to keep the debouncer alive.
    pub fn take_channels(
        &mut self,
    ) -> (
        mpsc::UnboundedReceiver<FileEvent>,
        mpsc::UnboundedReceiver<String>,
    ) {
        let (_, empty_events) = mpsc::unbounded_channel();
        let (_, empty_errors) = mpsc::unbounded_channel();
        (
            std::mem::replace(&mut self.event_rx, empty_events),
            std::mem::replace(&mut self.error_rx, empty_errors),
        )
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Visible `.txt` files only; editors' hidden swap files are skipped.
fn is_note_file(relative: &Path) -> bool {
    let hidden = relative
        .components()
        .any(|c| c.as_os_str().to_string_lossy().starts_with('.'));
    !hidden && relative.extension().is_some_and(|ext| ext == NOTE_EXTENSION)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_note_file() {
        assert!(is_note_file(Path::new("notes/Todo.txt")));
        assert!(!is_note_file(Path::new("notes/Todo.md")));
        assert!(!is_note_file(Path::new("notes/.Todo.txt")));
        assert!(!is_note_file(Path::new("notes/.cache/x.txt")));
        assert!(!is_note_file(Path::new("notes/Todo.txt.swp")));
    }
}
