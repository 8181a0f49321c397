//! Database error types

use thiserror::Error;

/// Database error type
#[derive(Error, Debug)]
pub enum DbError {
    /// RocksDB error
    #[cfg(feature = "rocksdb-backend")]
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Unknown column family
    #[error("Unknown column family: {0}")]
    UnknownColumnFamily(String),

    /// Invalid data
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl From<bincode::error::EncodeError> for DbError {
    fn from(err: bincode::error::EncodeError) -> Self {
        DbError::Serialization(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for DbError {
    fn from(err: bincode::error::DecodeError) -> Self {
        DbError::Serialization(err.to_string())
    }
}

/// Result type for database operations
pub type DbResult<T> = Result<T, DbError>;
