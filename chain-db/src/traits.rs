//! Database traits and interfaces

use crate::DbResult;
use std::sync::Arc;

/// Boxed iterator over key-value pairs in key order
pub type KvIter = Box<dyn Iterator<Item = DbResult<(Vec<u8>, Vec<u8>)>>>;

/// Key-value database trait
pub trait KeyValueDB: Send + Sync {
    /// Get value by key from a column family
    fn get(&self, cf: &str, key: &[u8]) -> DbResult<Option<Vec<u8>>>;

    /// Put key-value pair into a column family
    fn put(&self, cf: &str, key: &[u8], value: &[u8]) -> DbResult<()>;

    /// Delete key from a column family
    fn delete(&self, cf: &str, key: &[u8]) -> DbResult<()>;

    /// Check if key exists in a column family
    fn exists(&self, cf: &str, key: &[u8]) -> DbResult<bool> {
        Ok(self.get(cf, key)?.is_some())
    }

    /// Create a new transaction
    fn transaction(&self) -> Box<dyn DbTx>;

    /// Get iterator over keys in a column family
    fn iter(&self, cf: &str) -> DbResult<KvIter>;

    /// Get iterator over keys greater than or equal to `start`
    fn iter_from(&self, cf: &str, start: &[u8]) -> DbResult<KvIter>;

    /// Get iterator with prefix
    fn iter_prefix(&self, cf: &str, prefix: &[u8]) -> DbResult<KvIter> {
        let prefix = prefix.to_vec();
        let iter = self.iter_from(cf, &prefix)?;
        Ok(Box::new(iter.take_while(move |item| match item {
            Ok((key, _)) => key.starts_with(&prefix),
            Err(_) => true,
        })))
    }

    /// Flush pending writes to durable storage
    fn flush(&self) -> DbResult<()>;
}

/// Database transaction trait.
///
/// Reads observe the transaction's own uncommitted writes. Nothing is
/// visible to other readers until `commit`.
pub trait DbTx: Send {
    /// Get value by key from a column family
    fn get(&self, cf: &str, key: &[u8]) -> DbResult<Option<Vec<u8>>>;

    /// Put key-value pair into a column family
    fn put(&mut self, cf: &str, key: &[u8], value: &[u8]) -> DbResult<()>;

    /// Delete key from a column family
    fn delete(&mut self, cf: &str, key: &[u8]) -> DbResult<()>;

    /// Whether any write is staged
    fn is_empty(&self) -> bool;

    /// Commit the transaction
    fn commit(self: Box<Self>) -> DbResult<()>;

    /// Rollback the transaction
    fn rollback(self: Box<Self>) -> DbResult<()>;
}

/// Shared database reference
pub type SharedDatabase = Arc<dyn KeyValueDB>;
