//! redb-backed persistence for resolved version byte pairs.
//!
//! One table, keyed by lower-cased coin symbol. The batch write runs in a
//! single write transaction, so a persisted batch is all-or-nothing. redb is
//! a blocking API; calls are moved onto the blocking thread pool.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};

use crate::application::resolver::{StoreError, VersionByteStore};
use crate::domain::types::VersionBytePair;

const VERSION_BYTES: TableDefinition<&str, (u8, u8)> = TableDefinition::new("coin_version_bytes");

pub struct RedbVersionByteStore {
    db: Arc<Database>,
}

impl RedbVersionByteStore {
    /// Open (or create) the store file at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let db = Database::create(path)
            .map_err(|err| StoreError::unavailable(format!("open {}: {err}", path.display())))?;
        Ok(Self { db: Arc::new(db) })
    }
}

fn load_all_blocking(db: &Database) -> Result<BTreeMap<String, VersionBytePair>, StoreError> {
    let txn = db
        .begin_read()
        .map_err(|err| StoreError::unavailable(err.to_string()))?;

    let table = match txn.open_table(VERSION_BYTES) {
        Ok(table) => table,
        // First run: nothing has been persisted yet.
        Err(redb::TableError::TableDoesNotExist(_)) => return Ok(BTreeMap::new()),
        Err(err) => return Err(StoreError::unavailable(err.to_string())),
    };

    let mut entries = BTreeMap::new();
    let iter = table
        .iter()
        .map_err(|err| StoreError::unavailable(err.to_string()))?;
    for item in iter {
        let (key, value) = item.map_err(|err| StoreError::encoding(err.to_string()))?;
        let (public, private) = value.value();
        entries.insert(key.value().to_string(), VersionBytePair { public, private });
    }
    Ok(entries)
}

fn persist_blocking(
    db: &Database,
    batch: &BTreeMap<String, VersionBytePair>,
) -> Result<(), StoreError> {
    let txn = db
        .begin_write()
        .map_err(|err| StoreError::unavailable(err.to_string()))?;
    {
        let mut table = txn
            .open_table(VERSION_BYTES)
            .map_err(|err| StoreError::unavailable(err.to_string()))?;
        for (symbol, pair) in batch {
            table
                .insert(symbol.as_str(), (pair.public, pair.private))
                .map_err(|err| StoreError::unavailable(err.to_string()))?;
        }
    }
    txn.commit()
        .map_err(|err| StoreError::unavailable(err.to_string()))
}

#[async_trait]
impl VersionByteStore for RedbVersionByteStore {
    async fn load_all(&self) -> Result<BTreeMap<String, VersionBytePair>, StoreError> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || load_all_blocking(&db))
            .await
            .map_err(|err| StoreError::unavailable(format!("store task failed: {err}")))?
    }

    async fn persist(&self, batch: &BTreeMap<String, VersionBytePair>) -> Result<(), StoreError> {
        let db = self.db.clone();
        let batch = batch.clone();
        tokio::task::spawn_blocking(move || persist_blocking(&db, &batch))
            .await
            .map_err(|err| StoreError::unavailable(format!("store task failed: {err}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(public: u8, private: u8) -> VersionBytePair {
        VersionBytePair { public, private }
    }

    #[tokio::test]
    async fn empty_store_loads_no_entries() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = RedbVersionByteStore::open(&dir.path().join("bytes.redb")).expect("open");
        assert!(store.load_all().await.expect("load").is_empty());
    }

    #[tokio::test]
    async fn persisted_batch_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bytes.redb");

        {
            let store = RedbVersionByteStore::open(&path).expect("open");
            let mut batch = BTreeMap::new();
            batch.insert("ltc".to_string(), pair(0x30, 0xB0));
            batch.insert("doge".to_string(), pair(0x1E, 0x9E));
            store.persist(&batch).await.expect("persist");
        }

        let store = RedbVersionByteStore::open(&path).expect("reopen");
        let loaded = store.load_all().await.expect("load");
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded["ltc"], pair(0x30, 0xB0));
        assert_eq!(loaded["doge"], pair(0x1E, 0x9E));
    }

    #[tokio::test]
    async fn later_batches_merge_with_earlier_entries() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = RedbVersionByteStore::open(&dir.path().join("bytes.redb")).expect("open");

        let mut first = BTreeMap::new();
        first.insert("ltc".to_string(), pair(0x30, 0xB0));
        store.persist(&first).await.expect("first persist");

        let mut second = BTreeMap::new();
        second.insert("vtc".to_string(), pair(0x47, 0x80));
        store.persist(&second).await.expect("second persist");

        let loaded = store.load_all().await.expect("load");
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded["ltc"], pair(0x30, 0xB0));
        assert_eq!(loaded["vtc"], pair(0x47, 0x80));
    }
}
