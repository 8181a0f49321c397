//! VM error types

use chain_core::{BlockNumber, ContractId, VmKind};
use thiserror::Error;

/// VM error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VmError {
    /// Insufficient gas
    #[error("Out of gas: required {required}, available {available}")]
    OutOfGas { required: u64, available: u64 },

    /// Invalid request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Contract not found
    #[error("Contract not found: {0}")]
    ContractNotFound(ContractId),

    /// Contract was destroyed
    #[error("Contract destroyed: {0}")]
    ContractDestroyed(ContractId),

    /// Contract reached outside its declared receivers
    #[error("Contract {0} is not a declared receiver")]
    UndeclaredReceiver(ContractId),

    /// Execution explicitly reverted
    #[error("Execution reverted: {0}")]
    Reverted(String),

    /// Deployment reported success without creating a contract
    #[error("VM {0} reported a deployment without a created contract")]
    MissingCreatedContract(VmKind),

    /// Two implementations registered for one tag
    #[error("VM already registered: {0}")]
    DuplicateVm(VmKind),

    /// State rollback failed
    #[error("Rollback to block {height} failed: {reason}")]
    RollbackFailed { height: BlockNumber, reason: String },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Other error
    #[error("VM error: {0}")]
    Other(String),
}

impl From<bincode::error::EncodeError> for VmError {
    fn from(err: bincode::error::EncodeError) -> Self {
        VmError::Serialization(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for VmError {
    fn from(err: bincode::error::DecodeError) -> Self {
        VmError::Serialization(err.to_string())
    }
}

/// Result type for VM operations
pub type VmResult<T> = Result<T, VmError>;
