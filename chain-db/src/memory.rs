//! In-memory database backend

use crate::{
    column_families::ColumnFamily,
    error::{DbError, DbResult},
    traits::{DbTx, KeyValueDB, KvIter},
};
use parking_lot::RwLock;
use std::{collections::BTreeMap, ops::Bound, sync::Arc};
use tracing::trace;

type Table = BTreeMap<Vec<u8>, Vec<u8>>;
type Tables = BTreeMap<&'static str, Table>;

/// Ordered in-memory key-value store with one table per column family
#[derive(Debug, Clone)]
pub struct MemoryDatabase {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryDatabase {
    /// Create an empty database with every column family present
    pub fn new() -> Self {
        let tables = ColumnFamily::all()
            .iter()
            .map(|cf| (cf.name(), Table::new()))
            .collect();
        Self {
            tables: Arc::new(RwLock::new(tables)),
        }
    }

    /// Copy of the full contents, keyed by column family name
    pub fn dump(&self) -> BTreeMap<String, Table> {
        self.tables
            .read()
            .iter()
            .map(|(name, table)| (name.to_string(), table.clone()))
            .collect()
    }

    /// Number of keys in a column family
    pub fn len(&self, cf: &str) -> DbResult<usize> {
        let tables = self.tables.read();
        Ok(table(&tables, cf)?.len())
    }

    /// Whether a column family holds no keys
    pub fn is_empty(&self, cf: &str) -> DbResult<bool> {
        Ok(self.len(cf)? == 0)
    }

    fn collect_range(&self, cf: &str, start: Bound<Vec<u8>>) -> DbResult<KvIter> {
        let tables = self.tables.read();
        let items: Vec<DbResult<(Vec<u8>, Vec<u8>)>> = table(&tables, cf)?
            .range((start, Bound::Unbounded))
            .map(|(k, v)| Ok((k.clone(), v.clone())))
            .collect();
        Ok(Box::new(items.into_iter()))
    }
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

fn cf_name(cf: &str) -> DbResult<&'static str> {
    ColumnFamily::from_name(cf)
        .map(|cf| cf.name())
        .ok_or_else(|| DbError::UnknownColumnFamily(cf.to_string()))
}

fn table<'a>(tables: &'a Tables, cf: &str) -> DbResult<&'a Table> {
    tables
        .get(cf)
        .ok_or_else(|| DbError::UnknownColumnFamily(cf.to_string()))
}

fn table_mut<'a>(tables: &'a mut Tables, cf: &str) -> DbResult<&'a mut Table> {
    tables
        .get_mut(cf)
        .ok_or_else(|| DbError::UnknownColumnFamily(cf.to_string()))
}

impl KeyValueDB for MemoryDatabase {
    fn get(&self, cf: &str, key: &[u8]) -> DbResult<Option<Vec<u8>>> {
        let tables = self.tables.read();
        Ok(table(&tables, cf)?.get(key).cloned())
    }

    fn put(&self, cf: &str, key: &[u8], value: &[u8]) -> DbResult<()> {
        let mut tables = self.tables.write();
        table_mut(&mut tables, cf)?.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, cf: &str, key: &[u8]) -> DbResult<()> {
        let mut tables = self.tables.write();
        table_mut(&mut tables, cf)?.remove(key);
        Ok(())
    }

    fn transaction(&self) -> Box<dyn DbTx> {
        Box::new(MemoryTx {
            tables: Arc::clone(&self.tables),
            writes: BTreeMap::new(),
        })
    }

    fn iter(&self, cf: &str) -> DbResult<KvIter> {
        self.collect_range(cf, Bound::Unbounded)
    }

    fn iter_from(&self, cf: &str, start: &[u8]) -> DbResult<KvIter> {
        self.collect_range(cf, Bound::Included(start.to_vec()))
    }

    fn flush(&self) -> DbResult<()> {
        Ok(())
    }
}

/// Write-buffering transaction over a [`MemoryDatabase`]
struct MemoryTx {
    tables: Arc<RwLock<Tables>>,
    /// Staged writes; `None` marks a deletion
    writes: BTreeMap<(&'static str, Vec<u8>), Option<Vec<u8>>>,
}

impl DbTx for MemoryTx {
    fn get(&self, cf: &str, key: &[u8]) -> DbResult<Option<Vec<u8>>> {
        let cf = cf_name(cf)?;
        if let Some(staged) = self.writes.get(&(cf, key.to_vec())) {
            return Ok(staged.clone());
        }
        let tables = self.tables.read();
        Ok(table(&tables, cf)?.get(key).cloned())
    }

    fn put(&mut self, cf: &str, key: &[u8], value: &[u8]) -> DbResult<()> {
        let cf = cf_name(cf)?;
        self.writes.insert((cf, key.to_vec()), Some(value.to_vec()));
        Ok(())
    }

    fn delete(&mut self, cf: &str, key: &[u8]) -> DbResult<()> {
        let cf = cf_name(cf)?;
        self.writes.insert((cf, key.to_vec()), None);
        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    fn commit(self: Box<Self>) -> DbResult<()> {
        let MemoryTx { tables, writes } = *self;
        let mut tables = tables.write();
        trace!("Committing {} staged writes", writes.len());
        for ((cf, key), value) in writes {
            let table = table_mut(&mut tables, cf)?;
            match value {
                Some(value) => {
                    table.insert(key, value);
                }
                None => {
                    table.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn rollback(self: Box<Self>) -> DbResult<()> {
        trace!("Discarding {} staged writes", self.writes.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CF: &str = "results";

    #[test]
    fn test_basic_operations() {
        let db = MemoryDatabase::new();
        assert!(db.get(CF, b"k").unwrap().is_none());

        db.put(CF, b"k", b"v").unwrap();
        assert_eq!(db.get(CF, b"k").unwrap(), Some(b"v".to_vec()));
        assert!(db.exists(CF, b"k").unwrap());

        db.delete(CF, b"k").unwrap();
        assert!(!db.exists(CF, b"k").unwrap());
    }

    #[test]
    fn test_unknown_column_family() {
        let db = MemoryDatabase::new();
        assert!(matches!(
            db.get("headers", b"k"),
            Err(DbError::UnknownColumnFamily(_))
        ));

        let mut tx = db.transaction();
        assert!(tx.put("headers", b"k", b"v").is_err());
    }

    #[test]
    fn test_transaction_isolation() {
        let db = MemoryDatabase::new();
        db.put(CF, b"a", b"1").unwrap();

        let mut tx = db.transaction();
        tx.put(CF, b"b", b"2").unwrap();
        tx.delete(CF, b"a").unwrap();

        // Own writes are visible inside the transaction only
        assert_eq!(tx.get(CF, b"b").unwrap(), Some(b"2".to_vec()));
        assert!(tx.get(CF, b"a").unwrap().is_none());
        assert!(db.get(CF, b"b").unwrap().is_none());
        assert!(db.get(CF, b"a").unwrap().is_some());

        tx.commit().unwrap();
        assert_eq!(db.get(CF, b"b").unwrap(), Some(b"2".to_vec()));
        assert!(db.get(CF, b"a").unwrap().is_none());
    }

    #[test]
    fn test_transaction_rollback() {
        let db = MemoryDatabase::new();
        let before = db.dump();

        let mut tx = db.transaction();
        tx.put(CF, b"x", b"y").unwrap();
        assert!(!tx.is_empty());
        tx.rollback().unwrap();

        assert_eq!(db.dump(), before);
    }

    #[test]
    fn test_ordered_iteration() {
        let db = MemoryDatabase::new();
        for key in [3u64, 1, 2, 10] {
            db.put(CF, &key.to_be_bytes(), b"").unwrap();
        }

        let keys: Vec<u64> = db
            .iter_from(CF, &2u64.to_be_bytes())
            .unwrap()
            .map(|item| u64::from_be_bytes(item.unwrap().0.try_into().unwrap()))
            .collect();
        assert_eq!(keys, vec![2, 3, 10]);
        assert_eq!(db.len(CF).unwrap(), 4);
    }

    #[test]
    fn test_prefix_iteration() {
        let db = MemoryDatabase::new();
        db.put(CF, b"aa1", b"").unwrap();
        db.put(CF, b"aa2", b"").unwrap();
        db.put(CF, b"ab1", b"").unwrap();

        let count = db.iter_prefix(CF, b"aa").unwrap().count();
        assert_eq!(count, 2);
    }
}
