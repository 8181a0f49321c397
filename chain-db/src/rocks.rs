//! RocksDB database backend

use crate::{
    column_families::ColumnFamily,
    error::{DbError, DbResult},
    traits::{DbTx, KeyValueDB, KvIter},
};
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::info;

/// RocksDB configuration
#[derive(Debug, Clone)]
pub struct RocksDatabaseConfig {
    /// Database directory
    pub path: PathBuf,
    /// Write buffer size in bytes
    pub write_buffer_size: usize,
    /// Max open files (-1 = unlimited)
    pub max_open_files: i32,
}

impl RocksDatabaseConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_buffer_size: 32 * 1024 * 1024, // 32MB
            max_open_files: -1,
        }
    }
}

/// RocksDB-backed key-value store with one column family per [`ColumnFamily`]
pub struct RocksDatabase {
    db: Arc<DB>,
}

impl RocksDatabase {
    /// Open or create a database at `path`
    pub fn open(path: impl AsRef<Path>) -> DbResult<Self> {
        Self::open_with_config(&RocksDatabaseConfig::new(path.as_ref()))
    }

    /// Open with explicit configuration
    pub fn open_with_config(config: &RocksDatabaseConfig) -> DbResult<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_write_buffer_size(config.write_buffer_size);
        opts.set_max_open_files(config.max_open_files);

        let names = ColumnFamily::all().iter().map(|cf| cf.name());
        let db = DB::open_cf(&opts, &config.path, names)?;
        info!("Opened RocksDB at {:?}", config.path);

        Ok(Self { db: Arc::new(db) })
    }
}

fn handle<'a>(db: &'a DB, cf: &str) -> DbResult<&'a rocksdb::ColumnFamily> {
    db.cf_handle(cf)
        .ok_or_else(|| DbError::UnknownColumnFamily(cf.to_string()))
}

fn collect(db: &DB, cf: &str, mode: IteratorMode<'_>) -> DbResult<KvIter> {
    let items: Vec<DbResult<(Vec<u8>, Vec<u8>)>> = db
        .iterator_cf(handle(db, cf)?, mode)
        .map(|item| {
            item.map(|(k, v)| (k.to_vec(), v.to_vec()))
                .map_err(DbError::from)
        })
        .collect();
    Ok(Box::new(items.into_iter()))
}

impl KeyValueDB for RocksDatabase {
    fn get(&self, cf: &str, key: &[u8]) -> DbResult<Option<Vec<u8>>> {
        Ok(self.db.get_cf(handle(&self.db, cf)?, key)?)
    }

    fn put(&self, cf: &str, key: &[u8], value: &[u8]) -> DbResult<()> {
        Ok(self.db.put_cf(handle(&self.db, cf)?, key, value)?)
    }

    fn delete(&self, cf: &str, key: &[u8]) -> DbResult<()> {
        Ok(self.db.delete_cf(handle(&self.db, cf)?, key)?)
    }

    fn transaction(&self) -> Box<dyn DbTx> {
        Box::new(RocksTx {
            db: Arc::clone(&self.db),
            writes: BTreeMap::new(),
        })
    }

    fn iter(&self, cf: &str) -> DbResult<KvIter> {
        collect(&self.db, cf, IteratorMode::Start)
    }

    fn iter_from(&self, cf: &str, start: &[u8]) -> DbResult<KvIter> {
        collect(&self.db, cf, IteratorMode::From(start, Direction::Forward))
    }

    fn flush(&self) -> DbResult<()> {
        Ok(self.db.flush()?)
    }
}

/// Transaction staging writes into a single `WriteBatch` on commit
struct RocksTx {
    db: Arc<DB>,
    writes: BTreeMap<(String, Vec<u8>), Option<Vec<u8>>>,
}

impl DbTx for RocksTx {
    fn get(&self, cf: &str, key: &[u8]) -> DbResult<Option<Vec<u8>>> {
        if let Some(staged) = self.writes.get(&(cf.to_string(), key.to_vec())) {
            return Ok(staged.clone());
        }
        Ok(self.db.get_cf(handle(&self.db, cf)?, key)?)
    }

    fn put(&mut self, cf: &str, key: &[u8], value: &[u8]) -> DbResult<()> {
        handle(&self.db, cf)?;
        self.writes
            .insert((cf.to_string(), key.to_vec()), Some(value.to_vec()));
        Ok(())
    }

    fn delete(&mut self, cf: &str, key: &[u8]) -> DbResult<()> {
        handle(&self.db, cf)?;
        self.writes.insert((cf.to_string(), key.to_vec()), None);
        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    fn commit(self: Box<Self>) -> DbResult<()> {
        let mut batch = WriteBatch::default();
        for ((cf, key), value) in &self.writes {
            let cf = handle(&self.db, cf)?;
            match value {
                Some(value) => batch.put_cf(cf, key, value),
                None => batch.delete_cf(cf, key),
            }
        }
        Ok(self.db.write(batch)?)
    }

    fn rollback(self: Box<Self>) -> DbResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_rocks_transaction_commit() {
        let temp_dir = TempDir::new().unwrap();
        let db = RocksDatabase::open(temp_dir.path()).unwrap();

        let mut tx = db.transaction();
        tx.put("results", b"k", b"v").unwrap();
        assert!(db.get("results", b"k").unwrap().is_none());
        tx.commit().unwrap();

        assert_eq!(db.get("results", b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn test_rocks_iter_from() {
        let temp_dir = TempDir::new().unwrap();
        let db = RocksDatabase::open(temp_dir.path()).unwrap();
        for key in [1u64, 5, 9] {
            db.put("undo_log", &key.to_be_bytes(), b"").unwrap();
        }

        let count = db.iter_from("undo_log", &5u64.to_be_bytes()).unwrap().count();
        assert_eq!(count, 2);
    }
}
