//! redb-backed key-value store for the local cache.
//!
//! Each call runs in its own transaction, so every put or delete is a
//! single-key atomic commit.

use mirror_core::store::{KvBackend, Result, StorageError, Table};
use redb::{Database, ReadableTable, TableDefinition};
use std::path::Path;

const NOTES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("Notes");
const PENDING_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("Pending");

fn definition(table: Table) -> TableDefinition<'static, &'static str, &'static [u8]> {
    match table {
        Table::Notes => NOTES_TABLE,
        Table::Pending => PENDING_TABLE,
    }
}

fn engine<E: std::fmt::Display>(e: E) -> StorageError {
    StorageError::Engine(e.to_string())
}

/// Local cache database file.
pub struct RedbKv {
    db: Database,
}

impl RedbKv {
    /// Open or create the database at `path`, creating both tables.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(engine)?;
        }

        let db = Database::create(path).map_err(engine)?;

        let write_txn = db.begin_write().map_err(engine)?;
        {
            let _ = write_txn.open_table(NOTES_TABLE).map_err(engine)?;
            let _ = write_txn.open_table(PENDING_TABLE).map_err(engine)?;
        }
        write_txn.commit().map_err(engine)?;

        Ok(Self { db })
    }
}

impl KvBackend for RedbKv {
    fn get(&self, table: Table, key: &str) -> Result<Option<Vec<u8>>> {
        let read_txn = self.db.begin_read().map_err(engine)?;
        let table = read_txn.open_table(definition(table)).map_err(engine)?;
        Ok(table
            .get(key)
            .map_err(engine)?
            .map(|value| value.value().to_vec()))
    }

    fn put(&self, table: Table, key: &str, value: &[u8]) -> Result<()> {
        let write_txn = self.db.begin_write().map_err(engine)?;
        {
            let mut table = write_txn.open_table(definition(table)).map_err(engine)?;
            table.insert(key, value).map_err(engine)?;
        }
        write_txn.commit().map_err(engine)
    }

    fn delete(&self, table: Table, key: &str) -> Result<()> {
        let write_txn = self.db.begin_write().map_err(engine)?;
        {
            let mut table = write_txn.open_table(definition(table)).map_err(engine)?;
            table.remove(key).map_err(engine)?;
        }
        write_txn.commit().map_err(engine)
    }

    fn scan(&self, table: Table) -> Result<Vec<(String, Vec<u8>)>> {
        let read_txn = self.db.begin_read().map_err(engine)?;
        let table = read_txn.open_table(definition(table)).map_err(engine)?;

        let mut entries = Vec::new();
        for entry in table.iter().map_err(engine)? {
            let (key, value) = entry.map_err(engine)?;
            entries.push((key.value().to_string(), value.value().to_vec()));
        }
        Ok(entries)
    }
}
