//! Contract operation evaluation
//!
//! [`SettlementEngine::apply`] runs one operation through its VM and
//! settles the result against the ledger:
//!
//! 1. resolve the VM for the operation's type tag
//! 2. validate the operation and make sure its fee asset can be priced
//! 3. execute
//! 4. price the gas in base currency and convert it into the fee asset,
//!    drawing the base currency from the asset's fee pool
//! 5. charge the registrar
//! 6. split the charged fee into network and vested shares
//! 7. move the declared value into the contract
//! 8. index the attracted contracts and record the result
//!
//! Steps 4 to 8 share one ledger transaction. A fee failure discards it;
//! the VM's own state changes stay until the block is undone.
//!
//! The last closed block is stored with the ledger. An engine opened over
//! existing storage continues after it, and reopening a block that was
//! left open continues its operation and undo numbering.

use crate::config::SettlementConfig;
use crate::fee_pool::{FeePool, FeePoolLedger, RateSource};
use crate::ledger::{write_head, AccountStatistics, LedgerRead, LedgerTx, LedgerView};
use crate::results::{ExecutionResult, FeeReceipt, ResultId, ResultStore};
use crate::rollback::{RollbackCoordinator, RollbackReport};
use crate::undo::UndoLog;
use crate::{SettlementError, SettlementResult};
use chain_core::{
    AccountId, Amount, Asset, AssetId, BlockNumber, ContractId, ContractOperation, CoreError,
    Owner,
};
use chain_db::SharedDatabase;
use chain_vm::{ExecOutcome, ExecRequest, VmError, VmRegistry};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Successful settlement of one operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    /// Recorded result
    pub result: ExecutionResult,
    /// Contracts the execution touched, first touch order
    pub attracted_contracts: Vec<ContractId>,
}

#[derive(Debug, Clone, Copy)]
struct BlockContext {
    height: BlockNumber,
    next_op: u32,
    undo_seq: u32,
}

/// Settles contract operations block by block
pub struct SettlementEngine {
    config: SettlementConfig,
    db: SharedDatabase,
    vms: VmRegistry,
    fee_pools: FeePoolLedger,
    results: ResultStore,
    undo: UndoLog,
    rollback: RollbackCoordinator,
    block: Option<BlockContext>,
    head: Option<BlockNumber>,
    halted: bool,
}

impl SettlementEngine {
    /// Create an engine over `db` with a fixed set of VMs
    pub fn new(
        config: SettlementConfig,
        db: SharedDatabase,
        vms: VmRegistry,
        rates: Arc<dyn RateSource>,
    ) -> SettlementResult<Self> {
        config.validate()?;
        let head = LedgerView::new(db.clone()).head()?;
        info!(
            "Settlement engine ready with VMs {:?}, vesting share {} bps, head {:?}",
            vms.kinds(),
            config.fee_split.vesting_share_bps,
            head
        );
        Ok(Self {
            config,
            results: ResultStore::new(db.clone()),
            undo: UndoLog::new(db.clone()),
            rollback: RollbackCoordinator::new(db.clone()),
            db,
            vms,
            fee_pools: FeePoolLedger::new(rates),
            block: None,
            head,
            halted: false,
        })
    }

    fn ensure_running(&self) -> SettlementResult<()> {
        if self.halted {
            return Err(SettlementError::Halted);
        }
        Ok(())
    }

    /// Open block `height`
    pub fn begin_block(&mut self, height: BlockNumber) -> SettlementResult<()> {
        self.ensure_running()?;
        if let Some(block) = &self.block {
            return Err(SettlementError::BlockInProgress(block.height));
        }
        if let Some(head) = self.head {
            if height <= head {
                return Err(SettlementError::BlockOutOfOrder {
                    height,
                    head: self.head,
                });
            }
        }

        let next_op = u32::try_from(self.results.results_at(height)?.len())
            .map_err(|_| SettlementError::Overflow("operation index"))?;
        let undo_seq = u32::try_from(self.undo.count_at(height)?)
            .map_err(|_| SettlementError::Overflow("undo sequence"))?;
        if next_op > 0 || undo_seq > 0 {
            info!(
                "Block {} resumed at operation {} with {} ledger write(s)",
                height, next_op, undo_seq
            );
        }

        self.block = Some(BlockContext {
            height,
            next_op,
            undo_seq,
        });
        debug!("Block {} opened", height);
        Ok(())
    }

    /// Close the open block; it becomes the head
    pub fn end_block(&mut self) -> SettlementResult<BlockNumber> {
        self.ensure_running()?;
        let block = self.block.ok_or(SettlementError::NoOpenBlock)?;
        let mut tx = self.db.transaction();
        write_head(tx.as_mut(), Some(block.height))?;
        tx.commit()?;
        self.block = None;
        self.head = Some(block.height);
        info!(
            "Block {} closed with {} result(s)",
            block.height, block.next_op
        );
        Ok(block.height)
    }

    /// Evaluate one contract operation in the open block
    pub fn apply(&mut self, op: &ContractOperation) -> SettlementResult<ExecutionOutcome> {
        self.ensure_running()?;
        let block = self.block.ok_or(SettlementError::NoOpenBlock)?;

        let vm = self
            .vms
            .resolve(op.vm_kind)
            .ok_or(SettlementError::UnknownVmType(op.vm_kind))?;
        prepare(&self.config, &self.fee_pools, op)?;

        let request = ExecRequest::from_operation(op, block.height);
        let input = vm.encode_request(&request)?;
        let outcome = vm.exec(&input);

        let id = ResultId::new(block.height, block.next_op, 0);
        debug!(
            "Operation {} on {} used {} gas ({:?})",
            id, op.vm_kind, outcome.gas_used, outcome.status
        );
        if op.is_deployment() && outcome.status.is_success() && outcome.created.is_none() {
            error!("Operation {}: {} deployment created no contract", id, op.vm_kind);
            return Err(VmError::MissingCreatedContract(op.vm_kind).into());
        }

        let mut ledger = LedgerTx::new(self.db.transaction(), block.height, block.undo_seq);
        let mut receipt = match charge_fee(&self.config, &self.fee_pools, &mut ledger, op, &outcome)
        {
            Ok(receipt) => receipt,
            Err(cause) => {
                discard(ledger);
                warn!("Operation {} rejected: {}", id, cause);
                return Err(SettlementError::Rejected {
                    cause: Box::new(cause),
                    execution: Box::new(execution_result(id, op, &outcome, None)),
                    fee_charged: false,
                });
            }
        };

        let transfer_failure = match settle_transfer(&mut ledger, op, &outcome) {
            Ok(applied) => {
                receipt.transfer_applied = applied;
                None
            }
            Err(err @ SettlementError::InsufficientBalance { .. }) => Some(err),
            Err(err) => {
                discard(ledger);
                return Err(err);
            }
        };

        let result = execution_result(id, op, &outcome, Some(receipt));
        if let Err(err) = self
            .results
            .put(ledger.db_tx(), &result, &outcome.attracted)
        {
            discard(ledger);
            return Err(err);
        }
        let undo_seq = ledger.commit()?;

        if let Some(open) = self.block.as_mut() {
            open.next_op += 1;
            open.undo_seq = undo_seq;
        }

        match transfer_failure {
            Some(cause) => {
                warn!("Operation {} kept its fee, transfer failed: {}", id, cause);
                Err(SettlementError::Rejected {
                    cause: Box::new(cause),
                    execution: Box::new(result),
                    fee_charged: true,
                })
            }
            None => Ok(ExecutionOutcome {
                result,
                attracted_contracts: outcome.attracted,
            }),
        }
    }

    fn with_ledger<T>(
        &mut self,
        f: impl FnOnce(&FeePoolLedger, &mut LedgerTx) -> SettlementResult<T>,
    ) -> SettlementResult<T> {
        self.ensure_running()?;
        let block = self.block.as_mut().ok_or(SettlementError::NoOpenBlock)?;
        let mut ledger = LedgerTx::new(self.db.transaction(), block.height, block.undo_seq);
        match f(&self.fee_pools, &mut ledger) {
            Ok(value) => {
                block.undo_seq = ledger.commit()?;
                Ok(value)
            }
            Err(err) => {
                discard(ledger);
                Err(err)
            }
        }
    }

    /// Credit `amount` of `asset` to `owner` in the open block.
    ///
    /// Entry point for balance changes made outside settlement, such as
    /// genesis allocations.
    pub fn deposit(
        &mut self,
        owner: Owner,
        asset: AssetId,
        amount: Amount,
    ) -> SettlementResult<Amount> {
        self.with_ledger(|_, ledger| ledger.credit(owner, asset, amount))
    }

    /// Move base currency from `from` into the fee pool of `asset`
    pub fn fund_fee_pool(
        &mut self,
        from: AccountId,
        asset: AssetId,
        amount: Amount,
    ) -> SettlementResult<FeePool> {
        self.with_ledger(|pools, ledger| pools.fund(ledger, from, asset, amount))
    }

    /// Revert every block at or after `height`.
    ///
    /// An open block at or after `height` is discarded. A failed rollback
    /// halts the engine.
    pub fn undo_block(&mut self, height: BlockNumber) -> SettlementResult<RollbackReport> {
        self.ensure_running()?;
        if self.block.is_some_and(|block| block.height >= height) {
            self.block = None;
        }

        match self.rollback.undo_to(height, &mut self.vms) {
            Ok(report) => {
                self.head = report.head;
                Ok(report)
            }
            Err(err) => {
                if err.is_fatal() {
                    self.halted = true;
                    error!("Settlement engine halted: {}", err);
                }
                Err(err)
            }
        }
    }

    /// Recorded result by id
    pub fn get_result(&self, id: &ResultId) -> SettlementResult<Option<ExecutionResult>> {
        self.results.get(id)
    }

    /// Contracts attracted by a recorded result
    pub fn get_attracted_contracts_for(
        &self,
        id: &ResultId,
    ) -> SettlementResult<Option<Vec<ContractId>>> {
        self.results.attracted_for(id)
    }

    /// Results whose execution attracted `contract`
    pub fn results_touching(&self, contract: ContractId) -> SettlementResult<Vec<ResultId>> {
        self.results.results_touching(contract)
    }

    /// Results recorded in `height`
    pub fn results_at(&self, height: BlockNumber) -> SettlementResult<Vec<ExecutionResult>> {
        self.results.results_at(height)
    }

    pub fn balance(&self, owner: Owner, asset: AssetId) -> SettlementResult<Amount> {
        self.view().balance(owner, asset)
    }

    pub fn statistics(&self, account: AccountId) -> SettlementResult<AccountStatistics> {
        self.view().statistics(account)
    }

    pub fn fee_pool(&self, asset: AssetId) -> SettlementResult<FeePool> {
        self.view().fee_pool(asset)
    }

    fn view(&self) -> LedgerView {
        LedgerView::new(self.db.clone())
    }

    /// Last closed block
    pub fn head(&self) -> Option<BlockNumber> {
        self.head
    }

    /// Whether the storage already holds closed blocks or ledger writes
    pub fn has_history(&self) -> SettlementResult<bool> {
        Ok(self.head.is_some() || !self.undo.is_empty()?)
    }

    /// Height of the open block
    pub fn current_block(&self) -> Option<BlockNumber> {
        self.block.map(|block| block.height)
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn config(&self) -> &SettlementConfig {
        &self.config
    }

    pub fn fee_pools(&self) -> &FeePoolLedger {
        &self.fee_pools
    }

    pub fn registry(&self) -> &VmRegistry {
        &self.vms
    }
}

fn discard(ledger: LedgerTx) {
    if let Err(err) = ledger.rollback() {
        warn!("Failed to discard ledger transaction: {}", err);
    }
}

fn prepare(
    config: &SettlementConfig,
    fee_pools: &FeePoolLedger,
    op: &ContractOperation,
) -> SettlementResult<()> {
    op.validate().map_err(|err| match err {
        CoreError::MalformedOperation(reason) => SettlementError::MalformedOperation(reason),
        other => SettlementError::Core(other),
    })?;
    if op.gas_limit > config.max_gas_limit {
        return Err(SettlementError::MalformedOperation(format!(
            "gas limit {} exceeds maximum {}",
            op.gas_limit, config.max_gas_limit
        )));
    }
    fee_pools.ensure_priceable(op.fee_asset)
}

fn charge_fee(
    config: &SettlementConfig,
    fee_pools: &FeePoolLedger,
    ledger: &mut LedgerTx,
    op: &ContractOperation,
    outcome: &ExecOutcome,
) -> SettlementResult<FeeReceipt> {
    let core_fee = outcome
        .gas_used
        .checked_mul(op.gas_price)
        .ok_or(SettlementError::Overflow("gas cost"))?;
    let fee = fee_pools.quote(op.fee_asset, core_fee)?;

    if !op.fee_asset.is_core() {
        fee_pools.debit_reserve(ledger, op.fee_asset, core_fee)?;
    }
    ledger.debit(Owner::Account(op.registrar), op.fee_asset, fee)?;
    if !op.fee_asset.is_core() {
        fee_pools.collect(ledger, op.fee_asset, fee)?;
    }

    let shares = config.fee_split.split(fee);
    ledger.accrue_fees(op.registrar, shares.network, shares.vested)?;

    Ok(FeeReceipt {
        fee: Asset::new(fee, op.fee_asset),
        core_fee,
        network_share: shares.network,
        vested_share: shares.vested,
        transfer_applied: false,
    })
}

/// Move the declared value into the contract; returns whether it moved
fn settle_transfer(
    ledger: &mut LedgerTx,
    op: &ContractOperation,
    outcome: &ExecOutcome,
) -> SettlementResult<bool> {
    if !outcome.status.is_success() || op.transfer.amount == 0 {
        return Ok(false);
    }
    let contract = op
        .target
        .or(outcome.created)
        .ok_or(VmError::MissingCreatedContract(op.vm_kind))?;

    ledger.transfer(
        Owner::Account(op.registrar),
        Owner::Contract(contract),
        op.transfer.asset_id,
        op.transfer.amount,
    )?;
    Ok(true)
}

fn execution_result(
    id: ResultId,
    op: &ContractOperation,
    outcome: &ExecOutcome,
    receipt: Option<FeeReceipt>,
) -> ExecutionResult {
    ExecutionResult {
        id,
        vm_kind: op.vm_kind,
        gas_used: outcome.gas_used,
        output: outcome.output.clone(),
        status: outcome.status.clone(),
        created_contract: outcome.created,
        receipt,
    }
}
