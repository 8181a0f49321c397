//! Ordered undo log of ledger writes
//!
//! Every balance, statistics or fee pool write made while a block is open
//! appends the value it replaced under a `(height, sequence)` key. Both
//! parts are big-endian so a scan from a height visits entries in write
//! order; replaying them in reverse restores the state before that height.

use crate::ledger::{self, AccountStatistics};
use crate::{FeePool, SettlementError, SettlementResult};
use chain_core::{AccountId, Amount, AssetId, BlockNumber, Owner};
use chain_db::{decode, ColumnFamily, DbTx, SharedDatabase};
use serde::{Deserialize, Serialize};

/// Prior value of one ledger record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerDelta {
    Balance {
        owner: Owner,
        asset: AssetId,
        previous: Amount,
    },
    Statistics {
        account: AccountId,
        previous: AccountStatistics,
    },
    FeePool {
        asset: AssetId,
        previous: FeePool,
    },
}

impl LedgerDelta {
    /// Write the prior value back without journaling
    pub fn restore(&self, tx: &mut dyn DbTx) -> SettlementResult<()> {
        match self {
            LedgerDelta::Balance {
                owner,
                asset,
                previous,
            } => ledger::write_record(
                tx,
                ColumnFamily::Balances,
                &ledger::balance_key(*owner, *asset),
                previous,
            ),
            LedgerDelta::Statistics { account, previous } => ledger::write_record(
                tx,
                ColumnFamily::Statistics,
                &account.to_be_bytes(),
                previous,
            ),
            LedgerDelta::FeePool { asset, previous } => ledger::write_record(
                tx,
                ColumnFamily::FeePools,
                &asset.to_be_bytes(),
                previous,
            ),
        }
    }
}

/// Storage key of an undo entry
pub fn undo_key(height: BlockNumber, seq: u32) -> [u8; 12] {
    let mut key = [0u8; 12];
    key[..8].copy_from_slice(&height.to_be_bytes());
    key[8..].copy_from_slice(&seq.to_be_bytes());
    key
}

fn parse_undo_key(key: &[u8]) -> SettlementResult<(BlockNumber, u32)> {
    if key.len() != 12 {
        return Err(SettlementError::Db(chain_db::DbError::InvalidData(format!(
            "undo key has {} bytes",
            key.len()
        ))));
    }
    let mut height = [0u8; 8];
    let mut seq = [0u8; 4];
    height.copy_from_slice(&key[..8]);
    seq.copy_from_slice(&key[8..]);
    Ok((BlockNumber::from_be_bytes(height), u32::from_be_bytes(seq)))
}

/// One recorded write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoEntry {
    pub height: BlockNumber,
    pub seq: u32,
    pub delta: LedgerDelta,
}

impl UndoEntry {
    pub fn key(&self) -> [u8; 12] {
        undo_key(self.height, self.seq)
    }
}

/// Read access to the undo log
#[derive(Clone)]
pub struct UndoLog {
    db: SharedDatabase,
}

impl UndoLog {
    pub fn new(db: SharedDatabase) -> Self {
        Self { db }
    }

    /// Entries recorded at or after `height`, in write order
    pub fn entries_from(&self, height: BlockNumber) -> SettlementResult<Vec<UndoEntry>> {
        let start = undo_key(height, 0);
        let mut entries = Vec::new();
        for item in self.db.iter_from(ColumnFamily::UndoLog.name(), &start)? {
            let (key, value) = item?;
            let (height, seq) = parse_undo_key(&key)?;
            entries.push(UndoEntry {
                height,
                seq,
                delta: decode(&value)?,
            });
        }
        Ok(entries)
    }

    /// Whether no ledger write has been journaled
    pub fn is_empty(&self) -> SettlementResult<bool> {
        Ok(self.db.iter(ColumnFamily::UndoLog.name())?.next().is_none())
    }

    /// Number of entries recorded for `height`
    pub fn count_at(&self, height: BlockNumber) -> SettlementResult<usize> {
        let mut count = 0;
        for item in self
            .db
            .iter_prefix(ColumnFamily::UndoLog.name(), &height.to_be_bytes())?
        {
            item?;
            count += 1;
        }
        Ok(count)
    }
}
