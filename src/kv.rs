//! Durable string key/value storage.
//!
//! Plays the role browser `localStorage` plays for a web client: a flat
//! namespace of string keys holding JSON strings. [`RedbKv`] persists to a
//! redb file; [`MemoryKv`] lives in process and is used for tests and
//! throwaway sessions.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use redb::{Database, ReadableTable, TableDefinition};

const ENTRIES: TableDefinition<&str, &str> = TableDefinition::new("entries");

pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;

    /// All keys currently stored, in ascending order.
    fn keys(&self) -> Result<Vec<String>>;
}

/// redb-backed store, one table of string entries.
pub struct RedbKv {
    db: Database,
}

impl RedbKv {
    /// Open or create the database at `path`.
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create storage directory")?;
        }
        let db = Database::create(path)
            .with_context(|| format!("failed to open redb at {}", path.display()))?;
        // Ensure table exists
        let txn = db.begin_write()?;
        { let _ = txn.open_table(ENTRIES)?; }
        txn.commit()?;
        Ok(Self { db })
    }
}

impl KvStore for RedbKv {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(ENTRIES)?;
        Ok(table.get(key)?.map(|v| v.value().to_string()))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(ENTRIES)?;
            table.insert(key, value)?;
        }
        txn.commit()?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(ENTRIES)?;
            table.remove(key)?;
        }
        txn.commit()?;
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(ENTRIES)?;
        let keys: Vec<String> = table
            .iter()?
            .map(|r| r.map(|(k, _)| k.value().to_string()))
            .collect::<std::result::Result<_, _>>()?;
        Ok(keys)
    }
}

/// In-memory store.
#[derive(Default)]
pub struct MemoryKv {
    entries: Mutex<BTreeMap<String, String>>,
    fail_writes: Mutex<bool>,
    fail_reads: Mutex<bool>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `set` fail, the way a full quota would.
    pub fn set_fail_writes(&self, fail: bool) {
        *self.fail_writes.lock().unwrap_or_else(|e| e.into_inner()) = fail;
    }

    /// Make every subsequent `get` fail, like an I/O error on the backing file.
    pub fn set_fail_reads(&self, fail: bool) {
        *self.fail_reads.lock().unwrap_or_else(|e| e.into_inner()) = fail;
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl KvStore for MemoryKv {
    fn get(&self, key: &str) -> Result<Option<String>> {
        if *self.fail_reads.lock().unwrap_or_else(|e| e.into_inner()) {
            anyhow::bail!("read failed");
        }
        Ok(self.entries().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        if *self.fail_writes.lock().unwrap_or_else(|e| e.into_inner()) {
            anyhow::bail!("storage quota exceeded");
        }
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries().remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries().keys().cloned().collect())
    }
}
