//! Capability contract every contract VM satisfies

use crate::VmResult;
use chain_core::{AccountId, Asset, BlockNumber, ContractId, ContractOperation, Gas, VmKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Decoded input of one contract invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecRequest {
    /// Block the invocation belongs to
    pub block_number: BlockNumber,
    /// Paying account
    pub caller: AccountId,
    /// Called contract (None for deployment)
    pub target: Option<ContractId>,
    /// Other contracts the invocation may reach
    pub receivers: BTreeSet<ContractId>,
    /// Value attached to the invocation
    pub value: Asset,
    /// Gas limit
    pub gas_limit: Gas,
    /// Deployment code
    pub code: Option<Vec<u8>>,
}

impl ExecRequest {
    /// Build the request for an operation evaluated in `block_number`
    pub fn from_operation(op: &ContractOperation, block_number: BlockNumber) -> Self {
        Self {
            block_number,
            caller: op.registrar,
            target: op.target,
            receivers: op.receivers.clone(),
            value: op.transfer,
            gas_limit: op.gas_limit,
            code: op.code.clone(),
        }
    }

    /// Encode with bincode
    pub fn encode(&self) -> VmResult<Vec<u8>> {
        Ok(bincode::serde::encode_to_vec(self, bincode::config::standard())?)
    }

    /// Decode from bincode
    pub fn decode(bytes: &[u8]) -> VmResult<Self> {
        let (request, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
        Ok(request)
    }
}

/// How an invocation ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecStatus {
    Success,
    Failed { reason: String },
}

impl ExecStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecStatus::Success)
    }
}

/// Everything one `exec` call reports back
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutcome {
    /// Gas consumed, up to the failure point on failure
    pub gas_used: Gas,
    /// Raw return bytes; carries the error text on failure
    pub output: Vec<u8>,
    /// Success or failure
    pub status: ExecStatus,
    /// Contracts whose storage was read or written, first touch order, no duplicates
    pub attracted: Vec<ContractId>,
    /// Contract created by a deployment
    pub created: Option<ContractId>,
}

impl ExecOutcome {
    /// Successful outcome
    pub fn success(gas_used: Gas, output: Vec<u8>, attracted: Vec<ContractId>) -> Self {
        Self {
            gas_used,
            output,
            status: ExecStatus::Success,
            attracted,
            created: None,
        }
    }

    /// Failed outcome; the reason doubles as output
    pub fn failure(gas_used: Gas, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            gas_used,
            output: reason.as_bytes().to_vec(),
            status: ExecStatus::Failed { reason },
            attracted: Vec::new(),
            created: None,
        }
    }

    /// Record the contract created by a deployment
    pub fn with_created(mut self, id: ContractId) -> Self {
        self.created = Some(id);
        self
    }
}

/// A contract virtual machine.
///
/// Implementations own their storage. The settlement layer talks to
/// them only through these methods and never inspects VM internals.
pub trait VirtualMachine: Send {
    /// Type tag this implementation is registered under
    fn kind(&self) -> VmKind;

    /// Encode a decoded request into this VM's native input
    fn encode_request(&self, request: &ExecRequest) -> VmResult<Vec<u8>> {
        request.encode()
    }

    /// Execute one invocation.
    ///
    /// Deterministic for identical input and state. Failures are reported
    /// in the outcome and never returned as errors.
    fn exec(&mut self, input: &[u8]) -> ExecOutcome;

    /// Discard every storage mutation made at or after `height`
    fn roll_back_db(&mut self, height: BlockNumber) -> VmResult<()>;

    /// Serialized state of the requested contracts; unknown ids are omitted
    fn get_contracts(&self, ids: &[ContractId]) -> BTreeMap<ContractId, Vec<u8>>;

    /// Deployed code of a live contract
    fn get_code(&self, id: ContractId) -> Option<Vec<u8>>;
}
