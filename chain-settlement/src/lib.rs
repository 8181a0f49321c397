//! Contract execution settlement
//!
//! Turns raw VM execution results into ledger state: gas is priced in
//! base currency, converted into the operation's fee asset through that
//! asset's fee pool and charged to the registrar. The charged fee is
//! split between the network and vesting shares. Results are indexed per block together with
//! the contracts each execution touched, and every ledger write is
//! recorded in an undo log so a block can be reverted alongside the VMs.

pub mod config;
pub mod error;
pub mod evaluator;
pub mod fee_pool;
pub mod ledger;
pub mod results;
pub mod rollback;
pub mod undo;

pub use config::{FeeShares, FeeSplit, RateEntry, SettlementConfig};
pub use error::{SettlementError, SettlementResult};
pub use evaluator::{ExecutionOutcome, SettlementEngine};
pub use fee_pool::{ExchangeRate, FeePool, FeePoolLedger, RateSource, StaticRates};
pub use ledger::{AccountStatistics, LedgerRead, LedgerTx, LedgerView};
pub use results::{ExecutionResult, FeeReceipt, ResultId, ResultStore};
pub use rollback::{RollbackCoordinator, RollbackReport};
pub use undo::{LedgerDelta, UndoEntry, UndoLog};
