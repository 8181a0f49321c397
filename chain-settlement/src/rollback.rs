//! Block undo across VMs and the ledger

use crate::ledger::{write_head, LedgerRead, LedgerView};
use crate::results::ResultStore;
use crate::undo::UndoLog;
use crate::{SettlementError, SettlementResult};
use chain_core::BlockNumber;
use chain_db::{ColumnFamily, SharedDatabase};
use chain_vm::VmRegistry;
use tracing::{error, info};

/// What an undo removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RollbackReport {
    /// Height the state was undone to
    pub height: BlockNumber,
    /// Execution results deleted
    pub results_removed: usize,
    /// Ledger writes reverted
    pub deltas_reverted: usize,
    /// Last closed block after the undo
    pub head: Option<BlockNumber>,
}

/// Reverts VM storage and ledger state recorded at or after a height
#[derive(Clone)]
pub struct RollbackCoordinator {
    db: SharedDatabase,
    results: ResultStore,
    undo: UndoLog,
}

impl RollbackCoordinator {
    pub fn new(db: SharedDatabase) -> Self {
        Self {
            results: ResultStore::new(db.clone()),
            undo: UndoLog::new(db.clone()),
            db,
        }
    }

    /// Undo everything recorded at or after `height`.
    ///
    /// VMs are rolled back first, then results, ledger writes and the
    /// recorded head are reverted in one transaction. Every failure is reported as
    /// [`SettlementError::RollbackInconsistency`].
    pub fn undo_to(
        &self,
        height: BlockNumber,
        vms: &mut VmRegistry,
    ) -> SettlementResult<RollbackReport> {
        vms.roll_back_all(height).map_err(|(kind, err)| {
            error!("VM {} failed to roll back to block {}: {}", kind, height, err);
            SettlementError::RollbackInconsistency {
                height,
                reason: format!("vm {} failed: {}", kind, err),
            }
        })?;

        let report = self.revert_ledger(height).map_err(|err| {
            error!("Ledger rollback to block {} failed: {}", height, err);
            match err {
                SettlementError::RollbackInconsistency { .. } => err,
                other => SettlementError::RollbackInconsistency {
                    height,
                    reason: other.to_string(),
                },
            }
        })?;

        info!(
            "Rolled back to block {}: {} result(s) removed, {} ledger write(s) reverted",
            height, report.results_removed, report.deltas_reverted
        );
        Ok(report)
    }

    fn revert_ledger(&self, height: BlockNumber) -> SettlementResult<RollbackReport> {
        let mut tx = self.db.transaction();
        let results_removed = self.results.delete_from(tx.as_mut(), height)?;

        let entries = self.undo.entries_from(height)?;
        for entry in entries.iter().rev() {
            entry.delta.restore(tx.as_mut())?;
            tx.delete(ColumnFamily::UndoLog.name(), &entry.key())?;
        }

        let mut head = LedgerView::new(self.db.clone()).head()?;
        if head.is_some_and(|head| head >= height) {
            head = height.checked_sub(1);
            write_head(tx.as_mut(), head)?;
        }
        tx.commit()?;

        Ok(RollbackReport {
            height,
            results_removed,
            deltas_reverted: entries.len(),
            head,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{LedgerRead, LedgerTx, LedgerView};
    use chain_core::{AccountId, AssetId, BlockNumber, ContractId, Owner, VmKind};
    use chain_db::MemoryDatabase;
    use chain_vm::{ExecOutcome, VirtualMachine, VmError, VmResult};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    /// Machine whose rollback always fails
    struct BrokenVm;

    impl VirtualMachine for BrokenVm {
        fn kind(&self) -> VmKind {
            VmKind::Evm
        }

        fn exec(&mut self, _input: &[u8]) -> ExecOutcome {
            ExecOutcome::failure(0, "unsupported")
        }

        fn roll_back_db(&mut self, height: BlockNumber) -> VmResult<()> {
            Err(VmError::RollbackFailed {
                height,
                reason: "journal lost".to_string(),
            })
        }

        fn get_contracts(&self, _ids: &[ContractId]) -> BTreeMap<ContractId, Vec<u8>> {
            BTreeMap::new()
        }

        fn get_code(&self, _id: ContractId) -> Option<Vec<u8>> {
            None
        }
    }

    #[test]
    fn test_undo_reverts_ledger_writes() {
        let memory = MemoryDatabase::new();
        let db: SharedDatabase = Arc::new(memory.clone());
        let owner = Owner::Account(AccountId::new(1));

        let mut ledger = LedgerTx::new(db.transaction(), 1, 0);
        ledger.credit(owner, AssetId::CORE, 100).unwrap();
        ledger.commit().unwrap();
        let snapshot = memory.dump();

        let mut ledger = LedgerTx::new(db.transaction(), 2, 0);
        ledger.debit(owner, AssetId::CORE, 40).unwrap();
        ledger.accrue_fees(AccountId::new(1), 32, 8).unwrap();
        ledger.commit().unwrap();

        let mut vms = VmRegistry::builder().build();
        let report = RollbackCoordinator::new(db.clone())
            .undo_to(2, &mut vms)
            .unwrap();

        assert_eq!(report.deltas_reverted, 2);
        assert_eq!(report.results_removed, 0);
        assert_eq!(memory.dump(), snapshot);
        assert_eq!(LedgerView::new(db).balance(owner, AssetId::CORE).unwrap(), 100);
    }

    #[test]
    fn test_undo_moves_recorded_head() {
        let db: SharedDatabase = Arc::new(MemoryDatabase::new());
        let mut tx = db.transaction();
        write_head(tx.as_mut(), Some(3)).unwrap();
        tx.commit().unwrap();

        let mut vms = VmRegistry::builder().build();
        let coordinator = RollbackCoordinator::new(db.clone());
        assert_eq!(coordinator.undo_to(2, &mut vms).unwrap().head, Some(1));
        assert_eq!(coordinator.undo_to(5, &mut vms).unwrap().head, Some(1));
        assert_eq!(LedgerView::new(db.clone()).head().unwrap(), Some(1));
        assert_eq!(coordinator.undo_to(0, &mut vms).unwrap().head, None);
        assert_eq!(LedgerView::new(db).head().unwrap(), None);
    }

    #[test]
    fn test_vm_failure_is_inconsistency() {
        let db: SharedDatabase = Arc::new(MemoryDatabase::new());
        let mut vms = VmRegistry::builder()
            .register(Box::new(BrokenVm))
            .unwrap()
            .build();

        let err = RollbackCoordinator::new(db).undo_to(1, &mut vms).unwrap_err();
        assert!(matches!(
            err,
            SettlementError::RollbackInconsistency { height: 1, .. }
        ));
        assert!(err.is_fatal());
    }
}
