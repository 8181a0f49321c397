//! Scripted block replay
//!
//! A script is a JSON document with genesis allocations, fee pool
//! fundings and a list of steps. Genesis is applied as block 0; each
//! step opens and closes one block, undoes blocks or publishes a rate.

use anyhow::{bail, Context, Result};
use chain_core::{
    AccountId, Amount, Asset, AssetId, BlockNumber, ContractId, ContractOperation, Gas, Hash,
    Owner, VmKind,
};
use chain_settlement::{
    ExchangeRate, FeePool, RateEntry, ResultId, SettlementEngine, SettlementError, StaticRates,
};
use chain_vm::{ExecStatus, Program};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Genesis allocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub owner: Owner,
    pub asset: AssetId,
    pub amount: Amount,
}

/// Genesis fee pool funding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolFunding {
    pub from: AccountId,
    pub asset: AssetId,
    pub amount: Amount,
}

/// Operation as written in a script.
///
/// Deployment code is given either as hex in `code` or as a native
/// `program`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptOperation {
    pub registrar: AccountId,
    #[serde(default)]
    pub target: Option<ContractId>,
    #[serde(default)]
    pub receivers: BTreeSet<ContractId>,
    #[serde(default)]
    pub transfer: Asset,
    #[serde(default)]
    pub fee_asset: AssetId,
    #[serde(default = "default_vm_kind")]
    pub vm_kind: VmKind,
    #[serde(default = "default_gas_price")]
    pub gas_price: u64,
    pub gas_limit: Gas,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub program: Option<Program>,
}

fn default_vm_kind() -> VmKind {
    VmKind::Native
}

fn default_gas_price() -> u64 {
    1
}

impl ScriptOperation {
    /// Build the ledger operation
    pub fn to_operation(&self) -> Result<ContractOperation> {
        let code = match (&self.code, &self.program) {
            (Some(_), Some(_)) => bail!("operation gives both code and program"),
            (Some(hex_code), None) => {
                Some(hex::decode(hex_code.trim_start_matches("0x")).context("Invalid code hex")?)
            }
            (None, Some(program)) => Some(program.to_bytes()?),
            (None, None) => None,
        };

        Ok(ContractOperation {
            registrar: self.registrar,
            target: self.target,
            receivers: self.receivers.clone(),
            transfer: self.transfer,
            fee_asset: self.fee_asset,
            vm_kind: self.vm_kind,
            gas_price: self.gas_price,
            gas_limit: self.gas_limit,
            code,
        })
    }
}

/// One script step
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Evaluate operations in a new block
    Block {
        height: BlockNumber,
        #[serde(default)]
        operations: Vec<ScriptOperation>,
    },
    /// Undo every block at or after `height`
    Undo { height: BlockNumber },
    /// Publish an exchange rate
    Rate(RateEntry),
}

/// Replay script
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Script {
    pub genesis: Vec<Allocation>,
    pub fee_pools: Vec<PoolFunding>,
    pub steps: Vec<Step>,
}

impl Script {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse script")
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read script {}", path.display()))?;
        Self::from_json(&content)
    }
}

/// Outcome of one scripted operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationReport {
    pub block: BlockNumber,
    pub index: usize,
    /// Keccak256 of the operation
    pub operation_hash: String,
    /// Blake3 of deployed code
    pub code_hash: Option<String>,
    /// `applied`, `failed` (VM failure, fee charged) or `rejected`
    pub status: String,
    pub result_id: Option<String>,
    pub gas_used: Option<Gas>,
    pub fee: Option<Asset>,
    pub created_contract: Option<ContractId>,
    pub attracted: Vec<ContractId>,
    pub error: Option<String>,
}

impl OperationReport {
    fn new(block: BlockNumber, index: usize, op: &ContractOperation) -> Result<Self> {
        Ok(Self {
            block,
            index,
            operation_hash: op.hash()?.to_hex(),
            code_hash: op.code.as_deref().map(|code| Hash::from_data(code).to_hex()),
            status: String::new(),
            result_id: None,
            gas_used: None,
            fee: None,
            created_contract: None,
            attracted: Vec::new(),
            error: None,
        })
    }
}

/// State after a replay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplaySummary {
    pub head: Option<BlockNumber>,
    pub operations: Vec<OperationReport>,
    pub balances: Vec<Allocation>,
    pub fee_pools: BTreeMap<AssetId, FeePool>,
    pub pending_fees: BTreeMap<AccountId, (Amount, Amount)>,
}

/// Replays a script against an engine
pub struct Replayer<'a> {
    engine: &'a mut SettlementEngine,
    rates: &'a StaticRates,
    reports: Vec<OperationReport>,
    owners: BTreeSet<(Owner, AssetId)>,
    pools: BTreeSet<AssetId>,
}

impl<'a> Replayer<'a> {
    pub fn new(engine: &'a mut SettlementEngine, rates: &'a StaticRates) -> Self {
        Self {
            engine,
            rates,
            reports: Vec::new(),
            owners: BTreeSet::new(),
            pools: BTreeSet::new(),
        }
    }

    /// Run every step, then undo to `undo_to` if given
    pub fn run(mut self, script: &Script, undo_to: Option<BlockNumber>) -> Result<ReplaySummary> {
        self.genesis(script)?;
        for step in &script.steps {
            match step {
                Step::Block { height, operations } => self.block(*height, operations)?,
                Step::Undo { height } => self.undo(*height)?,
                Step::Rate(entry) => {
                    self.rates
                        .publish(entry.asset, ExchangeRate::new(entry.base, entry.quote));
                }
            }
        }
        if let Some(height) = undo_to {
            self.undo(height)?;
        }
        self.summary()
    }

    fn genesis(&mut self, script: &Script) -> Result<()> {
        if script.genesis.is_empty() && script.fee_pools.is_empty() {
            return Ok(());
        }
        self.engine.begin_block(0)?;
        for allocation in &script.genesis {
            self.engine
                .deposit(allocation.owner, allocation.asset, allocation.amount)?;
            self.owners.insert((allocation.owner, allocation.asset));
        }
        for funding in &script.fee_pools {
            self.engine
                .fund_fee_pool(funding.from, funding.asset, funding.amount)?;
            self.owners
                .insert((Owner::Account(funding.from), AssetId::CORE));
            self.pools.insert(funding.asset);
        }
        self.engine.end_block()?;
        info!(
            "Genesis applied: {} allocation(s), {} pool funding(s)",
            script.genesis.len(),
            script.fee_pools.len()
        );
        Ok(())
    }

    fn block(&mut self, height: BlockNumber, operations: &[ScriptOperation]) -> Result<()> {
        self.engine.begin_block(height)?;
        for (index, scripted) in operations.iter().enumerate() {
            let report = self.operation(height, index, scripted)?;
            self.reports.push(report);
        }
        self.engine.end_block()?;
        Ok(())
    }

    fn operation(
        &mut self,
        height: BlockNumber,
        index: usize,
        scripted: &ScriptOperation,
    ) -> Result<OperationReport> {
        let op = scripted
            .to_operation()
            .with_context(|| format!("Block {} operation {}", height, index))?;
        let mut report = OperationReport::new(height, index, &op)?;

        self.owners
            .insert((Owner::Account(op.registrar), op.fee_asset));
        self.owners
            .insert((Owner::Account(op.registrar), op.transfer.asset_id));
        if !op.fee_asset.is_core() {
            self.pools.insert(op.fee_asset);
        }

        match self.engine.apply(&op) {
            Ok(outcome) => {
                let result = outcome.result;
                report.status = match result.status {
                    ExecStatus::Success => "applied".to_string(),
                    ExecStatus::Failed { ref reason } => {
                        report.error = Some(reason.clone());
                        "failed".to_string()
                    }
                };
                report.result_id = Some(result.id.to_string());
                report.gas_used = Some(result.gas_used);
                report.fee = result.receipt.map(|receipt| receipt.fee);
                report.created_contract = result.created_contract;
                report.attracted = outcome.attracted_contracts;
            }
            Err(err) if err.is_fatal() => return Err(err.into()),
            Err(err) => {
                warn!("Block {} operation {} rejected: {}", height, index, err);
                report.status = "rejected".to_string();
                report.error = Some(err.cause().to_string());
                if let SettlementError::Rejected {
                    execution,
                    fee_charged,
                    ..
                } = &err
                {
                    report.gas_used = Some(execution.gas_used);
                    report.created_contract = execution.created_contract;
                    if *fee_charged {
                        report.result_id = Some(execution.id.to_string());
                        report.fee = execution.receipt.as_ref().map(|receipt| receipt.fee);
                    }
                }
            }
        }

        if let Some(created) = report.created_contract {
            self.owners
                .insert((Owner::Contract(created), op.transfer.asset_id));
        }
        Ok(report)
    }

    fn undo(&mut self, height: BlockNumber) -> Result<()> {
        let report = self.engine.undo_block(height)?;
        self.reports.retain(|op| op.block < height);
        info!(
            "Undo to block {} removed {} result(s)",
            height, report.results_removed
        );
        Ok(())
    }

    fn summary(self) -> Result<ReplaySummary> {
        let mut balances = Vec::new();
        for (owner, asset) in &self.owners {
            let amount = self.engine.balance(*owner, *asset)?;
            if amount > 0 {
                balances.push(Allocation {
                    owner: *owner,
                    asset: *asset,
                    amount,
                });
            }
        }

        let mut fee_pools = BTreeMap::new();
        for asset in &self.pools {
            fee_pools.insert(*asset, self.engine.fee_pool(*asset)?);
        }

        let mut pending_fees = BTreeMap::new();
        for (owner, _) in &self.owners {
            if let Owner::Account(account) = owner {
                let stats = self.engine.statistics(*account)?;
                if stats.total() > 0 {
                    pending_fees.insert(*account, (stats.pending_fees, stats.pending_vested_fees));
                }
            }
        }

        Ok(ReplaySummary {
            head: self.engine.head(),
            operations: self.reports,
            balances,
            fee_pools,
            pending_fees,
        })
    }
}

/// Look up a recorded result by its `block.op.call` form
pub fn parse_result_id(text: &str) -> Result<ResultId> {
    let parts: Vec<&str> = text.split('.').collect();
    let [block, op, call] = parts.as_slice() else {
        bail!("result id must look like block.op.call, got {}", text);
    };
    Ok(ResultId::new(
        block.parse().context("Invalid block number")?,
        op.parse().context("Invalid operation index")?,
        call.parse().context("Invalid call index")?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chain_db::MemoryDatabase;
    use chain_settlement::SettlementConfig;
    use chain_vm::{NativeVm, VmRegistry};
    use std::sync::Arc;

    const SCRIPT: &str = r#"{
        "genesis": [
            {"owner": {"Account": 1}, "asset": 1, "amount": 1000000},
            {"owner": {"Account": 1}, "asset": 0, "amount": 5000},
            {"owner": {"Account": 2}, "asset": 0, "amount": 1000000}
        ],
        "fee_pools": [{"from": 2, "asset": 1, "amount": 500000}],
        "steps": [
            {"rate": {"asset": 1, "base": 1, "quote": 1}},
            {"block": {"height": 1, "operations": [
                {
                    "registrar": 1,
                    "fee_asset": 1,
                    "gas_limit": 1000000,
                    "program": {
                        "init": [{"Set": {"key": [107], "value": [118]}}],
                        "body": [{"Incr": {"key": [110], "by": 1}}]
                    }
                }
            ]}},
            {"block": {"height": 2, "operations": [
                {"registrar": 1, "target": 0, "fee_asset": 1, "gas_limit": 1000000},
                {"registrar": 1, "target": 0, "fee_asset": 7, "gas_limit": 1000000}
            ]}}
        ]
    }"#;

    fn engine() -> (SettlementEngine, Arc<StaticRates>) {
        let rates = Arc::new(StaticRates::new());
        let vms = VmRegistry::builder()
            .register(Box::new(NativeVm::default()))
            .unwrap()
            .build();
        let engine = SettlementEngine::new(
            SettlementConfig::default(),
            Arc::new(MemoryDatabase::new()),
            vms,
            rates.clone(),
        )
        .unwrap();
        (engine, rates)
    }

    #[test]
    fn test_replay_script() {
        let script = Script::from_json(SCRIPT).unwrap();
        let (mut engine, rates) = engine();
        let summary = Replayer::new(&mut engine, &rates).run(&script, None).unwrap();

        assert_eq!(summary.head, Some(2));
        assert_eq!(summary.operations.len(), 3);
        assert_eq!(summary.operations[0].status, "applied");
        assert_eq!(summary.operations[0].created_contract, Some(ContractId::new(0)));
        assert!(summary.operations[0].code_hash.is_some());
        assert!(summary.operations[1].code_hash.is_none());
        assert_ne!(
            summary.operations[1].operation_hash,
            summary.operations[2].operation_hash
        );
        assert_eq!(summary.operations[1].result_id.as_deref(), Some("2.0.0"));
        assert_eq!(summary.operations[1].attracted, vec![ContractId::new(0)]);
        assert_eq!(summary.operations[2].status, "rejected");

        let charged: Amount = summary.operations[..2]
            .iter()
            .map(|op| op.fee.unwrap().amount)
            .sum();
        let pool = summary.fee_pools[&AssetId::new(1)];
        assert_eq!(pool.reserve, 500_000 - charged);
        assert_eq!(pool.accumulated_fees, charged);
        let (network, vested) = summary.pending_fees[&AccountId::new(1)];
        assert_eq!(network + vested, charged);
    }

    #[test]
    fn test_undo_after_replay() {
        let script = Script::from_json(SCRIPT).unwrap();
        let (mut engine, rates) = engine();
        let summary = Replayer::new(&mut engine, &rates)
            .run(&script, Some(1))
            .unwrap();

        assert_eq!(summary.head, Some(0));
        assert!(summary.operations.is_empty());
        assert!(summary.pending_fees.is_empty());
        assert_eq!(summary.fee_pools[&AssetId::new(1)].reserve, 500_000);
    }

    #[test]
    fn test_operation_with_code_and_program_is_refused() {
        let scripted: ScriptOperation = serde_json::from_str(
            r#"{"registrar": 1, "gas_limit": 10, "code": "00", "program": {"init": [], "body": []}}"#,
        )
        .unwrap();
        assert!(scripted.to_operation().is_err());
    }

    #[test]
    fn test_parse_result_id() {
        assert_eq!(parse_result_id("4.2.0").unwrap(), ResultId::new(4, 2, 0));
        assert!(parse_result_id("4.2").is_err());
        assert!(parse_result_id("a.b.c").is_err());
    }
}
