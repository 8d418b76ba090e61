//! File index: maps materialized file paths back to item identities.
//!
//! The index lives only in memory. It is rebuilt at startup by replaying
//! materialization of every cached note, so it never needs persisting.

use std::collections::HashMap;
use uuid::Uuid;

/// Normalize a mirror path: forward slashes, no leading `./`.
///
/// Watcher events, materializer output and user input all funnel through
/// here so that the same file always produces the same index key.
pub fn normalize_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    let mut trimmed = path.as_str();
    while let Some(rest) = trimmed.strip_prefix("./") {
        trimmed = rest;
    }
    trimmed.trim_matches('/').to_string()
}

/// Path -> UUID mapping for materialized notes.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FileIndex {
    by_path: HashMap<String, Uuid>,
}

impl FileIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `path -> uuid`.
    ///
    /// Returns the UUID previously registered at this path, if it was a
    /// different one (a title collision).
    pub fn insert(&mut self, path: &str, uuid: Uuid) -> Option<Uuid> {
        self.by_path
            .insert(normalize_path(path), uuid)
            .filter(|previous| *previous != uuid)
    }

    /// Look up the identity behind a path.
    pub fn resolve(&self, path: &str) -> Option<Uuid> {
        self.by_path.get(&normalize_path(path)).copied()
    }

    /// Find the path currently registered for a UUID.
    pub fn path_of(&self, uuid: &Uuid) -> Option<String> {
        self.by_path
            .iter()
            .find(|(_, owner)| *owner == uuid)
            .map(|(path, _)| path.clone())
    }

    /// Unregister a path.
    pub fn remove_path(&mut self, path: &str) -> Option<Uuid> {
        self.by_path.remove(&normalize_path(path))
    }

    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("./notes/Todo.txt"), "notes/Todo.txt");
        assert_eq!(normalize_path("notes\\Todo.txt"), "notes/Todo.txt");
        assert_eq!(normalize_path("././notes/a.txt"), "notes/a.txt");
        assert_eq!(normalize_path("notes/a.txt"), "notes/a.txt");
    }

    #[test]
    fn test_resolve_ignores_path_spelling() {
        let mut index = FileIndex::new();
        let uuid = Uuid::new_v4();

        index.insert("notes/Todo.txt", uuid);

        assert_eq!(index.resolve("./notes/Todo.txt"), Some(uuid));
        assert_eq!(index.resolve("notes\\Todo.txt"), Some(uuid));
        assert_eq!(index.resolve("notes/Other.txt"), None);
    }

    #[test]
    fn test_insert_reports_displaced_owner() {
        let mut index = FileIndex::new();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        assert_eq!(index.insert("notes/Todo.txt", first), None);
        // Re-registering the same owner is not a collision
        assert_eq!(index.insert("notes/Todo.txt", first), None);
        assert_eq!(index.insert("notes/Todo.txt", second), Some(first));

        assert_eq!(index.resolve("notes/Todo.txt"), Some(second));
        assert_eq!(index.path_of(&first), None);
        assert_eq!(index.path_of(&second).as_deref(), Some("notes/Todo.txt"));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_remove_path() {
        let mut index = FileIndex::new();
        let uuid = Uuid::new_v4();
        index.insert("notes/a.txt", uuid);

        assert_eq!(index.remove_path("./notes/a.txt"), Some(uuid));
        assert!(index.is_empty());
    }
}
