//! Native contract program format

use crate::{VmError, VmResult};
use chain_core::ContractId;
use serde::{Deserialize, Serialize};

/// One instruction of a native contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instr {
    /// Write `value` under `key`; an empty value deletes the key
    Set { key: Vec<u8>, value: Vec<u8> },
    /// Append the value stored under `key` to the output
    Get { key: Vec<u8> },
    /// Add `by` to the little-endian u64 counter under `key`
    Incr { key: Vec<u8>, by: u64 },
    /// Read another contract's storage
    Touch { contract: ContractId },
    /// Burn computation steps
    Spin { steps: u64 },
    /// Abort execution
    Revert { reason: String },
    /// Destroy the running contract and clear its storage
    Destroy,
}

/// Deployable code: `init` runs once at deployment, `body` on every call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    pub init: Vec<Instr>,
    pub body: Vec<Instr>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the deployment instructions
    pub fn with_init(mut self, init: Vec<Instr>) -> Self {
        self.init = init;
        self
    }

    /// Set the call instructions
    pub fn with_body(mut self, body: Vec<Instr>) -> Self {
        self.body = body;
        self
    }

    /// Encode as deployable code
    pub fn to_bytes(&self) -> VmResult<Vec<u8>> {
        Ok(bincode::serde::encode_to_vec(self, bincode::config::standard())?)
    }

    /// Decode deployed code
    pub fn from_bytes(bytes: &[u8]) -> VmResult<Self> {
        let (program, read) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| VmError::InvalidRequest(format!("invalid program: {}", e)))?;
        if read != bytes.len() {
            return Err(VmError::InvalidRequest(format!(
                "invalid program: {} trailing bytes",
                bytes.len() - read
            )));
        }
        Ok(program)
    }
}
