//! Local store: durable cache of remote items, pending queue and sync cursor.
//!
//! The store sits on top of any [`KvBackend`]. Every write is a single-key
//! commit; the orchestrator sequences multi-item work itself.
//!
//! Layout:
//! - `Notes` table: item UUID -> JSON item, plus the reserved `synctoken` key
//!   holding the raw cursor bytes
//! - `Pending` table: item UUID -> JSON item awaiting push

use crate::item::Item;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use thiserror::Error;
use uuid::Uuid;

/// Reserved key in the `Notes` table holding the sync cursor.
pub const SYNC_TOKEN_KEY: &str = "synctoken";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage engine error: {0}")]
    Engine(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Key namespaces used by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Notes,
    Pending,
}

impl Table {
    pub fn name(self) -> &'static str {
        match self {
            Table::Notes => "Notes",
            Table::Pending => "Pending",
        }
    }
}

/// Minimal key-value contract the store needs from a storage engine.
///
/// Implementations:
/// - `MemoryKv` - For testing
/// - `RedbKv` (in mirror-daemon) - redb database file
pub trait KvBackend: Send + Sync {
    fn get(&self, table: Table, key: &str) -> Result<Option<Vec<u8>>>;

    /// Insert or replace a value, committed before returning.
    fn put(&self, table: Table, key: &str, value: &[u8]) -> Result<()>;

    /// Remove a key. Removing a missing key is not an error.
    fn delete(&self, table: Table, key: &str) -> Result<()>;

    /// All entries of a table, in key order.
    fn scan(&self, table: Table) -> Result<Vec<(String, Vec<u8>)>>;
}

/// In-memory key-value backend for testing
#[derive(Default)]
pub struct MemoryKv {
    tables: RwLock<HashMap<Table, BTreeMap<String, Vec<u8>>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvBackend for MemoryKv {
    fn get(&self, table: Table, key: &str) -> Result<Option<Vec<u8>>> {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        Ok(tables.get(&table).and_then(|t| t.get(key)).cloned())
    }

    fn put(&self, table: Table, key: &str, value: &[u8]) -> Result<()> {
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        tables
            .entry(table)
            .or_default()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, table: Table, key: &str) -> Result<()> {
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        if let Some(t) = tables.get_mut(&table) {
            t.remove(key);
        }
        Ok(())
    }

    fn scan(&self, table: Table) -> Result<Vec<(String, Vec<u8>)>> {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        Ok(tables
            .get(&table)
            .map(|t| t.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }
}

impl<T: KvBackend> KvBackend for std::sync::Arc<T> {
    fn get(&self, table: Table, key: &str) -> Result<Option<Vec<u8>>> {
        (**self).get(table, key)
    }

    fn put(&self, table: Table, key: &str, value: &[u8]) -> Result<()> {
        (**self).put(table, key, value)
    }

    fn delete(&self, table: Table, key: &str) -> Result<()> {
        (**self).delete(table, key)
    }

    fn scan(&self, table: Table) -> Result<Vec<(String, Vec<u8>)>> {
        (**self).scan(table)
    }
}

/// Typed access to cached items, the pending queue and the cursor.
pub struct LocalStore<K: KvBackend> {
    kv: K,
}

impl<K: KvBackend> LocalStore<K> {
    pub fn new(kv: K) -> Self {
        Self { kv }
    }

    /// Access the underlying backend.
    pub fn backend(&self) -> &K {
        &self.kv
    }

    /// Fetch a cached item. `None` means the store has never seen it.
    pub fn get_item(&self, uuid: &Uuid) -> Result<Option<Item>> {
        self.kv
            .get(Table::Notes, &uuid.to_string())?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    /// Every cached item. The cursor entry is skipped.
    pub fn get_all_items(&self) -> Result<Vec<Item>> {
        self.kv
            .scan(Table::Notes)?
            .into_iter()
            .filter(|(key, _)| key != SYNC_TOKEN_KEY)
            .map(|(_, bytes)| decode(&bytes))
            .collect()
    }

    /// Upsert an item keyed by its UUID.
    pub fn save_item(&self, item: &Item) -> Result<()> {
        self.kv
            .put(Table::Notes, &item.uuid.to_string(), &encode(item)?)
    }

    pub fn delete_item(&self, uuid: &Uuid) -> Result<()> {
        self.kv.delete(Table::Notes, &uuid.to_string())
    }

    /// Queue an item for push. A later edit of the same UUID replaces the
    /// queued payload, so only the newest content is pushed.
    pub fn enqueue_pending(&self, item: &Item) -> Result<()> {
        self.kv
            .put(Table::Pending, &item.uuid.to_string(), &encode(item)?)
    }

    /// The queued payload for one item, if any.
    pub fn get_pending(&self, uuid: &Uuid) -> Result<Option<Item>> {
        self.kv
            .get(Table::Pending, &uuid.to_string())?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    pub fn list_pending(&self) -> Result<Vec<Item>> {
        self.kv
            .scan(Table::Pending)?
            .into_iter()
            .map(|(_, bytes)| decode(&bytes))
            .collect()
    }

    pub fn clear_pending(&self, uuid: &Uuid) -> Result<()> {
        self.kv.delete(Table::Pending, &uuid.to_string())
    }

    /// The persisted cursor. An empty value counts as no cursor.
    pub fn get_cursor(&self) -> Result<Option<String>> {
        let Some(bytes) = self.kv.get(Table::Notes, SYNC_TOKEN_KEY)? else {
            return Ok(None);
        };
        let cursor = String::from_utf8(bytes)
            .map_err(|e| StorageError::Serialization(format!("Invalid cursor bytes: {}", e)))?;
        Ok(Some(cursor).filter(|c| !c.is_empty()))
    }

    pub fn set_cursor(&self, cursor: &str) -> Result<()> {
        self.kv.put(Table::Notes, SYNC_TOKEN_KEY, cursor.as_bytes())
    }
}

fn encode(item: &Item) -> Result<Vec<u8>> {
    serde_json::to_vec(item).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn decode(bytes: &[u8]) -> Result<Item> {
    serde_json::from_slice(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::NOTE_CONTENT_TYPE;

    fn test_item(content: &str) -> Item {
        let mut item = Item::new(NOTE_CONTENT_TYPE);
        item.content = content.to_string();
        item
    }

    #[test]
    fn test_save_item_is_upsert() {
        let store = LocalStore::new(MemoryKv::new());
        let mut item = test_item("v1");

        store.save_item(&item).unwrap();
        item.content = "v2".into();
        store.save_item(&item).unwrap();

        assert_eq!(store.get_item(&item.uuid).unwrap().unwrap().content, "v2");
        assert_eq!(store.get_all_items().unwrap().len(), 1);
    }

    #[test]
    fn test_get_missing_item() {
        let store = LocalStore::new(MemoryKv::new());
        assert!(store.get_item(&Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn test_get_all_items_skips_cursor() {
        let store = LocalStore::new(MemoryKv::new());
        store.save_item(&test_item("a")).unwrap();
        store.save_item(&test_item("b")).unwrap();
        store.set_cursor("42").unwrap();

        let items = store.get_all_items().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(store.get_cursor().unwrap().as_deref(), Some("42"));
    }

    #[test]
    fn test_delete_item() {
        let store = LocalStore::new(MemoryKv::new());
        let item = test_item("a");
        store.save_item(&item).unwrap();

        store.delete_item(&item.uuid).unwrap();
        // Deleting twice is fine
        store.delete_item(&item.uuid).unwrap();

        assert!(store.get_item(&item.uuid).unwrap().is_none());
    }

    #[test]
    fn test_pending_queue_keeps_latest_payload() {
        let store = LocalStore::new(MemoryKv::new());
        let mut item = test_item("draft");

        store.enqueue_pending(&item).unwrap();
        item.content = "final".into();
        store.enqueue_pending(&item).unwrap();

        let pending = store.list_pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].content, "final");

        assert_eq!(store.get_pending(&item.uuid).unwrap().unwrap().content, "final");

        store.clear_pending(&item.uuid).unwrap();
        assert!(store.list_pending().unwrap().is_empty());
        assert!(store.get_pending(&item.uuid).unwrap().is_none());
    }

    #[test]
    fn test_pending_is_separate_from_cache() {
        let store = LocalStore::new(MemoryKv::new());
        let item = test_item("a");

        store.enqueue_pending(&item).unwrap();

        assert!(store.get_item(&item.uuid).unwrap().is_none());
        assert!(store.get_all_items().unwrap().is_empty());
    }

    #[test]
    fn test_empty_cursor_is_none() {
        let store = LocalStore::new(MemoryKv::new());
        assert!(store.get_cursor().unwrap().is_none());

        store.set_cursor("").unwrap();
        assert!(store.get_cursor().unwrap().is_none());
    }

    #[test]
    fn test_corrupt_entry_surfaces_storage_error() {
        let kv = MemoryKv::new();
        kv.put(Table::Notes, "broken", b"not json").unwrap();
        let store = LocalStore::new(kv);

        assert!(matches!(
            store.get_all_items(),
            Err(StorageError::Serialization(_))
        ));
    }
}
