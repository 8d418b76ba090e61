//! File materializer: renders notes as plain text files in the mirror
//! directory and keeps the file index in step with what is on disk.

use crate::file_index::{normalize_path, FileIndex};
use crate::fs::{FileSystem, FsError, Result};
use crate::note::Note;
use tracing::{debug, warn};
use uuid::Uuid;

/// Extension of materialized note files.
pub const NOTE_EXTENSION: &str = "txt";

/// File name used when a title sanitizes down to nothing.
const UNTITLED: &str = "Untitled";

/// Characters that cannot appear in a file name on common filesystems.
const RESERVED_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Longest file stem in bytes. Leaves room for a collision suffix and the
/// extension under the usual 255 byte name limit.
pub const MAX_STEM_BYTES: usize = 200;

/// What to do when two notes map to the same file name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CollisionPolicy {
    /// Both notes share one file; the last one materialized wins the file
    /// and the index entry.
    #[default]
    Overwrite,
    /// Colliding notes get a ` (<uuid prefix>)` suffix, except the one with
    /// the lowest UUID, which keeps the plain name whatever the arrival
    /// order.
    SuffixUuid,
}

/// Turn a note title into a safe file stem.
pub fn sanitize_title(title: &str) -> String {
    let replaced: String = title
        .chars()
        .map(|c| {
            if c.is_control() || RESERVED_CHARS.contains(&c) {
                '_'
            } else {
                c
            }
        })
        .collect();

    // Leading dots would hide the file, trailing ones are dropped on Windows
    let trimmed = replaced.trim().trim_matches('.').trim();
    let trimmed = truncate_bytes(trimmed, MAX_STEM_BYTES)
        .trim_end_matches(|c: char| c == '.' || c.is_whitespace());
    if trimmed.is_empty() {
        UNTITLED.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Longest prefix of `s` within `max` bytes that ends on a char boundary.
fn truncate_bytes(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Writes notes to disk and remembers which file belongs to which item.
pub struct Materializer<F: FileSystem> {
    fs: F,
    notes_dir: String,
    index: FileIndex,
    policy: CollisionPolicy,
}

impl<F: FileSystem> Materializer<F> {
    /// Materialize into `notes_dir`, a path relative to the filesystem root.
    pub fn new(fs: F, notes_dir: &str) -> Self {
        Self {
            fs,
            notes_dir: normalize_path(notes_dir),
            index: FileIndex::new(),
            policy: CollisionPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: CollisionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn notes_dir(&self) -> &str {
        &self.notes_dir
    }

    pub fn index(&self) -> &FileIndex {
        &self.index
    }

    pub fn fs(&self) -> &F {
        &self.fs
    }

    /// Create the notes directory if it does not exist yet.
    pub async fn ensure_dir(&self) -> Result<()> {
        if !self.fs.exists(&self.notes_dir).await? {
            self.fs.mkdir(&self.notes_dir).await?;
        }
        Ok(())
    }

    /// Path a note would be written to, before collision handling.
    pub fn path_for_title(&self, title: &str) -> String {
        self.path_for_stem(&sanitize_title(title))
    }

    fn path_for_stem(&self, stem: &str) -> String {
        let file_name = format!("{}.{}", stem, NOTE_EXTENSION);
        if self.notes_dir.is_empty() {
            file_name
        } else {
            format!("{}/{}", self.notes_dir, file_name)
        }
    }

    fn suffixed_path(&self, title: &str, uuid: &Uuid) -> String {
        let short = &uuid.simple().to_string()[..8];
        self.path_for_stem(&format!("{} ({})", sanitize_title(title), short))
    }

    /// Pick the file for `note`, moving a colliding note aside if `note`
    /// is the one entitled to the plain name.
    async fn claim_path(&mut self, note: &Note) -> Result<String> {
        let path = self.path_for_title(&note.title);
        let owner = match (self.policy, self.index.resolve(&path)) {
            (CollisionPolicy::SuffixUuid, Some(owner)) if owner != note.uuid => owner,
            _ => return Ok(path),
        };

        if note.uuid > owner {
            return Ok(self.suffixed_path(&note.title, &note.uuid));
        }

        // Same sanitized title, so the owner's suffixed name derives from ours
        let moved = self.suffixed_path(&note.title, &owner);
        debug!("Moving note {} from {} to {}", owner, path, moved);
        match self.fs.read(&path).await {
            Ok(bytes) => self.fs.write(&moved, &bytes).await?,
            Err(FsError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        self.index.remove_path(&path);
        self.index.insert(&moved, owner);
        Ok(path)
    }

    /// Write a note's text to its file and register the file in the index.
    ///
    /// Returns the path written. If the note was previously materialized
    /// under a different title, the stale file is removed.
    pub async fn materialize(&mut self, note: &Note) -> Result<String> {
        let path = self.claim_path(note).await?;

        if let Some(previous) = self.index.path_of(&note.uuid) {
            if previous != path {
                debug!("Note {} renamed: {} -> {}", note.uuid, previous, path);
                self.index.remove_path(&previous);
                self.delete_if_present(&previous).await?;
            }
        }

        self.fs.write(&path, note.text.as_bytes()).await?;

        if let Some(displaced) = self.index.insert(&path, note.uuid) {
            warn!(
                "Title collision at {}: note {} replaces note {}",
                path, note.uuid, displaced
            );
        }

        debug!("Materialized note {} to {}", note.uuid, path);
        Ok(path)
    }

    /// Identity behind a path, if it is a materialized note.
    pub fn resolve(&self, path: &str) -> Option<Uuid> {
        self.index.resolve(path)
    }

    /// Delete the file materialized for `uuid` and forget it.
    ///
    /// Looks the file up by identity. If the note's file has since been
    /// taken over by another note, nothing is deleted.
    pub async fn remove(&mut self, uuid: &Uuid) -> Result<Option<String>> {
        let Some(path) = self.index.path_of(uuid) else {
            debug!("No materialized file for note {}", uuid);
            return Ok(None);
        };

        self.index.remove_path(&path);
        self.delete_if_present(&path).await?;
        debug!("Removed materialized file {} for note {}", path, uuid);
        Ok(Some(path))
    }

    /// Read a materialized file back as text.
    ///
    /// Bytes that are not valid UTF-8 are rejected rather than replaced.
    pub async fn read(&self, path: &str) -> Result<String> {
        let bytes = self.fs.read(path).await?;
        String::from_utf8(bytes).map_err(|e| FsError::InvalidText(format!("{}: {}", path, e)))
    }

    async fn delete_if_present(&self, path: &str) -> Result<()> {
        match self.fs.delete(path).await {
            Ok(()) | Err(FsError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
