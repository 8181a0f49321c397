//! Execution results and their indexes
//!
//! Results are keyed by [`ResultId`], whose big-endian key sorts by block
//! first, so everything recorded at or after a height is one range scan.
//! Two secondary indexes are maintained alongside: the attracted contracts
//! of each result and, in reverse, the results that attracted a contract.

use crate::{SettlementError, SettlementResult};
use chain_core::{Amount, Asset, BlockNumber, ContractId, Gas, VmKind};
use chain_db::{decode, encode, ColumnFamily, DbError, DbTx, SharedDatabase};
use chain_vm::ExecStatus;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Deterministic id of one execution result
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResultId {
    /// Block the operation was evaluated in
    pub block: BlockNumber,
    /// Position of the operation among the block's recorded results
    pub op_index: u32,
    /// Position of the VM call within the operation
    pub call_index: u32,
}

impl ResultId {
    pub fn new(block: BlockNumber, op_index: u32, call_index: u32) -> Self {
        Self {
            block,
            op_index,
            call_index,
        }
    }

    /// Storage key
    pub fn to_key(&self) -> [u8; 16] {
        let mut key = [0u8; 16];
        key[..8].copy_from_slice(&self.block.to_be_bytes());
        key[8..12].copy_from_slice(&self.op_index.to_be_bytes());
        key[12..].copy_from_slice(&self.call_index.to_be_bytes());
        key
    }

    /// Parse a key written by [`ResultId::to_key`]
    pub fn from_key(key: &[u8]) -> SettlementResult<Self> {
        let key: &[u8; 16] = key.try_into().map_err(|_| {
            DbError::InvalidData(format!("result key has {} bytes", key.len()))
        })?;
        let mut block = [0u8; 8];
        let mut op_index = [0u8; 4];
        let mut call_index = [0u8; 4];
        block.copy_from_slice(&key[..8]);
        op_index.copy_from_slice(&key[8..12]);
        call_index.copy_from_slice(&key[12..]);
        Ok(Self::new(
            BlockNumber::from_be_bytes(block),
            u32::from_be_bytes(op_index),
            u32::from_be_bytes(call_index),
        ))
    }
}

impl fmt::Display for ResultId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.block, self.op_index, self.call_index)
    }
}

/// Ledger side of a settled execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeReceipt {
    /// Fee charged to the registrar, in the fee asset
    pub fee: Asset,
    /// Base currency cost of the gas used
    pub core_fee: Amount,
    /// Part of `fee` credited to pending fees
    pub network_share: Amount,
    /// Part of `fee` credited to pending vested fees
    pub vested_share: Amount,
    /// Whether the declared value reached the contract
    pub transfer_applied: bool,
}

/// Recorded outcome of one VM call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub id: ResultId,
    pub vm_kind: VmKind,
    pub gas_used: Gas,
    /// Raw VM output
    pub output: Vec<u8>,
    pub status: ExecStatus,
    /// Contract created by a deployment
    pub created_contract: Option<ContractId>,
    /// Fee settlement; absent when no fee was charged
    pub receipt: Option<FeeReceipt>,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

fn touch_key(contract: ContractId, id: &ResultId) -> Vec<u8> {
    let mut key = contract.to_be_bytes().to_vec();
    key.extend_from_slice(&id.to_key());
    key
}

/// Block-scoped store of execution results
#[derive(Clone)]
pub struct ResultStore {
    db: SharedDatabase,
}

impl ResultStore {
    pub fn new(db: SharedDatabase) -> Self {
        Self { db }
    }

    /// Record a result and its attracted contracts
    pub fn put(
        &self,
        tx: &mut dyn DbTx,
        result: &ExecutionResult,
        attracted: &[ContractId],
    ) -> SettlementResult<()> {
        let key = result.id.to_key();
        if tx.get(ColumnFamily::Results.name(), &key)?.is_some() {
            return Err(SettlementError::DuplicateResultId(result.id));
        }

        tx.put(ColumnFamily::Results.name(), &key, &encode(result)?)?;
        tx.put(
            ColumnFamily::Attracted.name(),
            &key,
            &encode(&attracted.to_vec())?,
        )?;
        for contract in attracted {
            tx.put(
                ColumnFamily::Touches.name(),
                &touch_key(*contract, &result.id),
                &[],
            )?;
        }
        Ok(())
    }

    /// Result by id
    pub fn get(&self, id: &ResultId) -> SettlementResult<Option<ExecutionResult>> {
        match self.db.get(ColumnFamily::Results.name(), &id.to_key())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Contracts attracted by a result, `None` for an unknown id
    pub fn attracted_for(&self, id: &ResultId) -> SettlementResult<Option<Vec<ContractId>>> {
        match self.db.get(ColumnFamily::Attracted.name(), &id.to_key())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Results recorded in `height`, in id order
    pub fn results_at(&self, height: BlockNumber) -> SettlementResult<Vec<ExecutionResult>> {
        let mut results = Vec::new();
        for item in self
            .db
            .iter_prefix(ColumnFamily::Results.name(), &height.to_be_bytes())?
        {
            let (_, value) = item?;
            results.push(decode(&value)?);
        }
        Ok(results)
    }

    /// Results whose execution attracted `contract`, in id order
    pub fn results_touching(&self, contract: ContractId) -> SettlementResult<Vec<ResultId>> {
        let prefix = contract.to_be_bytes();
        let mut ids = Vec::new();
        for item in self.db.iter_prefix(ColumnFamily::Touches.name(), &prefix)? {
            let (key, _) = item?;
            ids.push(ResultId::from_key(&key[prefix.len()..])?);
        }
        Ok(ids)
    }

    /// Delete every result recorded at or after `height` with its index entries.
    ///
    /// Reads committed state; the deletions are staged in `tx`.
    pub fn delete_from(&self, tx: &mut dyn DbTx, height: BlockNumber) -> SettlementResult<usize> {
        let start = ResultId::new(height, 0, 0).to_key();
        let mut removed = 0;
        for item in self.db.iter_from(ColumnFamily::Results.name(), &start)? {
            let (key, _) = item?;
            let id = ResultId::from_key(&key)?;

            if let Some(attracted) = self.attracted_for(&id)? {
                for contract in attracted {
                    tx.delete(ColumnFamily::Touches.name(), &touch_key(contract, &id))?;
                }
            }
            tx.delete(ColumnFamily::Attracted.name(), &key)?;
            tx.delete(ColumnFamily::Results.name(), &key)?;
            removed += 1;
        }
        debug!("Removed {} result(s) from block {} on", removed, height);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chain_db::MemoryDatabase;
    use std::sync::Arc;

    fn result(id: ResultId) -> ExecutionResult {
        ExecutionResult {
            id,
            vm_kind: VmKind::Native,
            gas_used: 21_000,
            output: b"ok".to_vec(),
            status: ExecStatus::Success,
            created_contract: None,
            receipt: None,
        }
    }

    fn record(store: &ResultStore, db: &SharedDatabase, id: ResultId, attracted: &[ContractId]) {
        let mut tx = db.transaction();
        store.put(tx.as_mut(), &result(id), attracted).unwrap();
        tx.commit().unwrap();
    }

    #[test]
    fn test_result_id_key_and_display() {
        let id = ResultId::new(3, 1, 0);
        assert_eq!(ResultId::from_key(&id.to_key()).unwrap(), id);
        assert_eq!(id.to_string(), "3.1.0");
        assert!(ResultId::new(2, 9, 9).to_key() < ResultId::new(3, 0, 0).to_key());
        assert!(ResultId::from_key(&[0u8; 3]).is_err());
    }

    #[test]
    fn test_put_and_query() {
        let memory = MemoryDatabase::new();
        let db: SharedDatabase = Arc::new(memory.clone());
        let store = ResultStore::new(db.clone());
        let (a, b) = (ContractId::new(1), ContractId::new(2));

        record(&store, &db, ResultId::new(1, 0, 0), &[a]);
        record(&store, &db, ResultId::new(1, 1, 0), &[b, a]);
        record(&store, &db, ResultId::new(2, 0, 0), &[]);

        let id = ResultId::new(1, 1, 0);
        assert_eq!(store.get(&id).unwrap(), Some(result(id)));
        assert_eq!(store.attracted_for(&id).unwrap(), Some(vec![b, a]));
        assert_eq!(
            store.attracted_for(&ResultId::new(2, 0, 0)).unwrap(),
            Some(vec![])
        );
        assert_eq!(store.attracted_for(&ResultId::new(9, 0, 0)).unwrap(), None);
        assert_eq!(store.results_at(1).unwrap().len(), 2);
        assert_eq!(
            store.results_touching(a).unwrap(),
            vec![ResultId::new(1, 0, 0), ResultId::new(1, 1, 0)]
        );
    }

    #[test]
    fn test_duplicate_result_id() {
        let db: SharedDatabase = Arc::new(MemoryDatabase::new());
        let store = ResultStore::new(db.clone());
        let id = ResultId::new(1, 0, 0);
        record(&store, &db, id, &[]);

        let mut tx = db.transaction();
        assert!(matches!(
            store.put(tx.as_mut(), &result(id), &[]),
            Err(SettlementError::DuplicateResultId(dup)) if dup == id
        ));
    }

    #[test]
    fn test_delete_from_cleans_indexes() {
        let memory = MemoryDatabase::new();
        let db: SharedDatabase = Arc::new(memory.clone());
        let store = ResultStore::new(db.clone());
        let contract = ContractId::new(5);

        record(&store, &db, ResultId::new(1, 0, 0), &[contract]);
        let after_first = memory.dump();
        record(&store, &db, ResultId::new(2, 0, 0), &[contract]);
        record(&store, &db, ResultId::new(3, 0, 0), &[contract]);

        let mut tx = db.transaction();
        assert_eq!(store.delete_from(tx.as_mut(), 2).unwrap(), 2);
        tx.commit().unwrap();

        assert_eq!(memory.dump(), after_first);
        assert_eq!(
            store.results_touching(contract).unwrap(),
            vec![ResultId::new(1, 0, 0)]
        );
    }
}
