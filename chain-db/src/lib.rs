//! Ledger database layer
//!
//! This crate provides key-value storage for settlement data: balances,
//! account statistics, fee pools, execution results and the undo log.

pub mod codec;
pub mod column_families;
pub mod error;
pub mod memory;
#[cfg(feature = "rocksdb-backend")]
pub mod rocks;
pub mod traits;

pub use codec::{decode, encode};
pub use column_families::ColumnFamily;
pub use error::{DbError, DbResult};
pub use memory::MemoryDatabase;
#[cfg(feature = "rocksdb-backend")]
pub use rocks::{RocksDatabase, RocksDatabaseConfig};
pub use traits::{DbTx, KeyValueDB, KvIter, SharedDatabase};
