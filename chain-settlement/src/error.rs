//! Settlement error types

use crate::results::{ExecutionResult, ResultId};
use chain_core::{Amount, AssetId, BlockNumber, CoreError, Owner, VmKind};
use chain_db::DbError;
use chain_vm::VmError;
use thiserror::Error;

/// Settlement error type
#[derive(Error, Debug)]
pub enum SettlementError {
    /// No VM registered for the operation's type tag
    #[error("No VM registered for type {0}")]
    UnknownVmType(VmKind),

    /// Operation failed structural validation
    #[error("Malformed operation: {0}")]
    MalformedOperation(String),

    /// Fee pool cannot cover the base currency cost
    #[error("Fee pool of {asset} holds {available}, {required} required")]
    InsufficientFeePoolReserve {
        asset: AssetId,
        required: Amount,
        available: Amount,
    },

    /// Balance too low for a debit
    #[error("{owner} holds {available} of {asset}, {required} required")]
    InsufficientBalance {
        owner: Owner,
        asset: AssetId,
        required: Amount,
        available: Amount,
    },

    /// Result id already recorded
    #[error("Result {0} already recorded")]
    DuplicateResultId(ResultId),

    /// Fee asset has no published exchange rate
    #[error("No exchange rate published for {0}")]
    MissingExchangeRate(AssetId),

    /// Ledger and VM state could not be reconciled
    #[error("Rollback to block {height} failed: {reason}")]
    RollbackInconsistency { height: BlockNumber, reason: String },

    /// Block height does not extend the current head
    #[error("Block {height} does not follow head {head:?}")]
    BlockOutOfOrder {
        height: BlockNumber,
        head: Option<BlockNumber>,
    },

    /// A block is already open
    #[error("Block {0} is still open")]
    BlockInProgress(BlockNumber),

    /// Operation submitted outside a block
    #[error("No block is open")]
    NoOpenBlock,

    /// Engine refuses work after an inconsistent rollback
    #[error("Settlement engine halted")]
    Halted,

    /// Arithmetic overflow
    #[error("Arithmetic overflow in {0}")]
    Overflow(&'static str),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Operation rejected after the VM ran.
    ///
    /// `execution` carries the VM output. `fee_charged` tells whether the
    /// fee and the result were committed regardless.
    #[error("Operation rejected: {cause}")]
    Rejected {
        cause: Box<SettlementError>,
        execution: Box<ExecutionResult>,
        fee_charged: bool,
    },

    /// Database error
    #[error("Database error: {0}")]
    Db(#[from] DbError),

    /// VM error
    #[error("VM error: {0}")]
    Vm(#[from] VmError),

    /// Core error
    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

impl SettlementError {
    /// Underlying error of a rejection, or the error itself
    pub fn cause(&self) -> &SettlementError {
        match self {
            SettlementError::Rejected { cause, .. } => cause,
            other => other,
        }
    }

    /// VM output attached to a rejection
    pub fn execution(&self) -> Option<&ExecutionResult> {
        match self {
            SettlementError::Rejected { execution, .. } => Some(execution),
            _ => None,
        }
    }

    /// Whether the engine can no longer make progress
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SettlementError::RollbackInconsistency { .. } | SettlementError::Halted
        )
    }
}

/// Result type for settlement operations
pub type SettlementResult<T> = Result<T, SettlementError>;
