//! Ledger records touched by settlement
//!
//! Balances, account statistics and fee pools are stored as bincode
//! values. A record equal to its default is deleted rather than written,
//! so undoing a block leaves storage exactly as it was.

use crate::undo::{undo_key, LedgerDelta};
use crate::{FeePool, SettlementError, SettlementResult};
use chain_core::{AccountId, Amount, AssetId, BlockNumber, Owner};
use chain_db::{decode, encode, ColumnFamily, DbTx, SharedDatabase};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::trace;

/// Fees paid by an account, in the units they were charged
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountStatistics {
    /// Network share of paid fees
    pub pending_fees: Amount,
    /// Vested share of paid fees
    pub pending_vested_fees: Amount,
}

impl AccountStatistics {
    /// Sum of both shares
    pub fn total(&self) -> u128 {
        u128::from(self.pending_fees) + u128::from(self.pending_vested_fees)
    }
}

const HEAD_KEY: &[u8] = b"head";

/// Balance key: owner key followed by the big-endian asset id
pub fn balance_key(owner: Owner, asset: AssetId) -> Vec<u8> {
    let mut key = owner.to_key().to_vec();
    key.extend_from_slice(&asset.to_be_bytes());
    key
}

pub(crate) fn write_record<T>(
    tx: &mut dyn DbTx,
    cf: ColumnFamily,
    key: &[u8],
    value: &T,
) -> SettlementResult<()>
where
    T: Serialize + Default + PartialEq,
{
    if *value == T::default() {
        tx.delete(cf.name(), key)?;
    } else {
        tx.put(cf.name(), key, &encode(value)?)?;
    }
    Ok(())
}

/// Stage the last closed block
pub(crate) fn write_head(tx: &mut dyn DbTx, head: Option<BlockNumber>) -> SettlementResult<()> {
    write_record(tx, ColumnFamily::Meta, HEAD_KEY, &head)
}

/// Read access shared by committed state and open transactions
pub trait LedgerRead {
    /// Raw value of a record
    fn raw(&self, cf: ColumnFamily, key: &[u8]) -> SettlementResult<Option<Vec<u8>>>;

    /// Decoded record, or its default when absent
    fn record<T: DeserializeOwned + Default>(
        &self,
        cf: ColumnFamily,
        key: &[u8],
    ) -> SettlementResult<T> {
        match self.raw(cf, key)? {
            Some(bytes) => Ok(decode(&bytes)?),
            None => Ok(T::default()),
        }
    }

    fn balance(&self, owner: Owner, asset: AssetId) -> SettlementResult<Amount> {
        self.record(ColumnFamily::Balances, &balance_key(owner, asset))
    }

    fn statistics(&self, account: AccountId) -> SettlementResult<AccountStatistics> {
        self.record(ColumnFamily::Statistics, &account.to_be_bytes())
    }

    fn fee_pool(&self, asset: AssetId) -> SettlementResult<FeePool> {
        self.record(ColumnFamily::FeePools, &asset.to_be_bytes())
    }

    /// Last closed block
    fn head(&self) -> SettlementResult<Option<BlockNumber>> {
        self.record(ColumnFamily::Meta, HEAD_KEY)
    }
}

/// Committed ledger state
#[derive(Clone)]
pub struct LedgerView {
    db: SharedDatabase,
}

impl LedgerView {
    pub fn new(db: SharedDatabase) -> Self {
        Self { db }
    }
}

impl LedgerRead for LedgerView {
    fn raw(&self, cf: ColumnFamily, key: &[u8]) -> SettlementResult<Option<Vec<u8>>> {
        Ok(self.db.get(cf.name(), key)?)
    }
}

/// Journaled write transaction for one block.
///
/// Each write appends the replaced value to the undo log at the current
/// height. Nothing is visible until [`LedgerTx::commit`].
pub struct LedgerTx {
    tx: Box<dyn DbTx>,
    height: BlockNumber,
    seq: u32,
}

impl LedgerTx {
    /// Wrap `tx`; undo entries start at `seq`
    pub fn new(tx: Box<dyn DbTx>, height: BlockNumber, seq: u32) -> Self {
        Self { tx, height, seq }
    }

    pub fn height(&self) -> BlockNumber {
        self.height
    }

    /// Underlying transaction, for stores that are not undo-logged
    pub fn db_tx(&mut self) -> &mut dyn DbTx {
        self.tx.as_mut()
    }

    fn record(&mut self, delta: LedgerDelta) -> SettlementResult<()> {
        let key = undo_key(self.height, self.seq);
        self.tx
            .put(ColumnFamily::UndoLog.name(), &key, &encode(&delta)?)?;
        self.seq = self
            .seq
            .checked_add(1)
            .ok_or(SettlementError::Overflow("undo sequence"))?;
        Ok(())
    }

    /// Set a balance
    pub fn set_balance(
        &mut self,
        owner: Owner,
        asset: AssetId,
        amount: Amount,
    ) -> SettlementResult<()> {
        let previous = self.balance(owner, asset)?;
        if previous == amount {
            return Ok(());
        }
        self.record(LedgerDelta::Balance {
            owner,
            asset,
            previous,
        })?;
        trace!("Balance of {} in {}: {} -> {}", owner, asset, previous, amount);
        write_record(
            self.tx.as_mut(),
            ColumnFamily::Balances,
            &balance_key(owner, asset),
            &amount,
        )
    }

    /// Add to a balance
    pub fn credit(&mut self, owner: Owner, asset: AssetId, amount: Amount) -> SettlementResult<Amount> {
        let balance = self
            .balance(owner, asset)?
            .checked_add(amount)
            .ok_or(SettlementError::Overflow("balance"))?;
        self.set_balance(owner, asset, balance)?;
        Ok(balance)
    }

    /// Subtract from a balance; fails without writing when it is too low
    pub fn debit(&mut self, owner: Owner, asset: AssetId, amount: Amount) -> SettlementResult<Amount> {
        let available = self.balance(owner, asset)?;
        let balance =
            available
                .checked_sub(amount)
                .ok_or(SettlementError::InsufficientBalance {
                    owner,
                    asset,
                    required: amount,
                    available,
                })?;
        self.set_balance(owner, asset, balance)?;
        Ok(balance)
    }

    /// Move `amount` of `asset` between owners
    pub fn transfer(
        &mut self,
        from: Owner,
        to: Owner,
        asset: AssetId,
        amount: Amount,
    ) -> SettlementResult<()> {
        self.debit(from, asset, amount)?;
        self.credit(to, asset, amount)?;
        Ok(())
    }

    /// Replace an account's statistics
    pub fn set_statistics(
        &mut self,
        account: AccountId,
        statistics: AccountStatistics,
    ) -> SettlementResult<()> {
        let previous = self.statistics(account)?;
        if previous == statistics {
            return Ok(());
        }
        self.record(LedgerDelta::Statistics { account, previous })?;
        write_record(
            self.tx.as_mut(),
            ColumnFamily::Statistics,
            &account.to_be_bytes(),
            &statistics,
        )
    }

    /// Add fee shares to an account's statistics
    pub fn accrue_fees(
        &mut self,
        account: AccountId,
        network: Amount,
        vested: Amount,
    ) -> SettlementResult<AccountStatistics> {
        let mut statistics = self.statistics(account)?;
        statistics.pending_fees = statistics
            .pending_fees
            .checked_add(network)
            .ok_or(SettlementError::Overflow("pending fees"))?;
        statistics.pending_vested_fees = statistics
            .pending_vested_fees
            .checked_add(vested)
            .ok_or(SettlementError::Overflow("pending vested fees"))?;
        self.set_statistics(account, statistics)?;
        Ok(statistics)
    }

    /// Replace an asset's fee pool
    pub fn set_fee_pool(&mut self, asset: AssetId, pool: FeePool) -> SettlementResult<()> {
        let previous = self.fee_pool(asset)?;
        if previous == pool {
            return Ok(());
        }
        self.record(LedgerDelta::FeePool { asset, previous })?;
        write_record(
            self.tx.as_mut(),
            ColumnFamily::FeePools,
            &asset.to_be_bytes(),
            &pool,
        )
    }

    /// Commit all writes; returns the next undo sequence number
    pub fn commit(self) -> SettlementResult<u32> {
        let seq = self.seq;
        self.tx.commit()?;
        Ok(seq)
    }

    /// Discard all writes
    pub fn rollback(self) -> SettlementResult<()> {
        self.tx.rollback()?;
        Ok(())
    }
}

impl LedgerRead for LedgerTx {
    fn raw(&self, cf: ColumnFamily, key: &[u8]) -> SettlementResult<Option<Vec<u8>>> {
        Ok(self.tx.get(cf.name(), key)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chain_db::{KeyValueDB, MemoryDatabase};
    use std::sync::Arc;

    fn setup() -> (MemoryDatabase, SharedDatabase) {
        let memory = MemoryDatabase::new();
        let db: SharedDatabase = Arc::new(memory.clone());
        (memory, db)
    }

    #[test]
    fn test_credit_and_debit() {
        let (_, db) = setup();
        let owner = Owner::Account(AccountId::new(1));
        let asset = AssetId::new(3);

        let mut ledger = LedgerTx::new(db.transaction(), 1, 0);
        assert_eq!(ledger.credit(owner, asset, 100).unwrap(), 100);
        assert_eq!(ledger.debit(owner, asset, 30).unwrap(), 70);

        match ledger.debit(owner, asset, 71).unwrap_err() {
            SettlementError::InsufficientBalance {
                required,
                available,
                ..
            } => {
                assert_eq!(required, 71);
                assert_eq!(available, 70);
            }
            other => panic!("Expected InsufficientBalance, got {:?}", other),
        }
        assert_eq!(ledger.commit().unwrap(), 2);

        assert_eq!(LedgerView::new(db).balance(owner, asset).unwrap(), 70);
    }

    #[test]
    fn test_head_record() {
        let (memory, db) = setup();
        let view = LedgerView::new(db.clone());
        assert_eq!(view.head().unwrap(), None);

        let mut tx = db.transaction();
        write_head(tx.as_mut(), Some(4)).unwrap();
        tx.commit().unwrap();
        assert_eq!(view.head().unwrap(), Some(4));

        let mut tx = db.transaction();
        write_head(tx.as_mut(), None).unwrap();
        tx.commit().unwrap();
        assert_eq!(view.head().unwrap(), None);
        assert!(memory.is_empty(ColumnFamily::Meta.name()).unwrap());
    }

    #[test]
    fn test_default_records_are_deleted() {
        let (memory, db) = setup();
        let owner = Owner::Contract(chain_core::ContractId::new(4));

        let mut ledger = LedgerTx::new(db.transaction(), 1, 0);
        ledger.credit(owner, AssetId::CORE, 5).unwrap();
        ledger.debit(owner, AssetId::CORE, 5).unwrap();
        ledger.accrue_fees(AccountId::new(1), 0, 0).unwrap();
        ledger.commit().unwrap();

        assert!(memory.is_empty(ColumnFamily::Balances.name()).unwrap());
        assert!(memory.is_empty(ColumnFamily::Statistics.name()).unwrap());
        // Two balance writes were journaled, the no-op statistics write was not
        assert_eq!(memory.len(ColumnFamily::UndoLog.name()).unwrap(), 2);
    }

    #[test]
    fn test_rollback_discards_writes() {
        let (memory, db) = setup();
        let mut ledger = LedgerTx::new(db.transaction(), 1, 0);
        ledger
            .set_fee_pool(
                AssetId::new(1),
                FeePool {
                    reserve: 10,
                    accumulated_fees: 0,
                },
            )
            .unwrap();
        ledger.rollback().unwrap();

        assert!(memory.is_empty(ColumnFamily::FeePools.name()).unwrap());
        assert!(memory.is_empty(ColumnFamily::UndoLog.name()).unwrap());
        assert!(!db.exists(ColumnFamily::FeePools.name(), &AssetId::new(1).to_be_bytes()).unwrap());
    }

    #[test]
    fn test_restore_reverts_in_reverse_order() {
        let (memory, db) = setup();
        let account = AccountId::new(2);
        let before = memory.dump();

        let mut ledger = LedgerTx::new(db.transaction(), 5, 0);
        ledger.accrue_fees(account, 8, 2).unwrap();
        ledger.accrue_fees(account, 4, 1).unwrap();
        ledger.commit().unwrap();
        assert_eq!(
            LedgerView::new(db.clone()).statistics(account).unwrap(),
            AccountStatistics {
                pending_fees: 12,
                pending_vested_fees: 3
            }
        );

        let entries = crate::UndoLog::new(db.clone()).entries_from(5).unwrap();
        let mut tx = db.transaction();
        for entry in entries.iter().rev() {
            entry.delta.restore(tx.as_mut()).unwrap();
            tx.delete(ColumnFamily::UndoLog.name(), &entry.key()).unwrap();
        }
        tx.commit().unwrap();

        assert_eq!(memory.dump(), before);
    }
}
