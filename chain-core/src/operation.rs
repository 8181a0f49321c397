//! Contract operation payload

use crate::{AccountId, Asset, AssetId, ContractId, CoreError, CoreResult, Gas, Hash, VmKind};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::collections::BTreeSet;

/// Ledger transaction payload invoking a contract.
///
/// A deployment carries `code` and no `target`; a call carries a `target`
/// and no `code`. Signature checks happen before an operation reaches
/// the settlement layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractOperation {
    /// Account that registers the operation and pays for it
    pub registrar: AccountId,
    /// Contract being called (None for deployment)
    pub target: Option<ContractId>,
    /// Other contracts the call is allowed to reach
    #[serde(default)]
    pub receivers: BTreeSet<ContractId>,
    /// Value moved from the registrar to the target contract
    pub transfer: Asset,
    /// Asset the gas fee is paid in
    pub fee_asset: AssetId,
    /// VM that executes the operation
    pub vm_kind: VmKind,
    /// Base currency units charged per gas unit
    pub gas_price: u64,
    /// Maximum gas the VM may consume
    pub gas_limit: Gas,
    /// Contract code (deployment only)
    #[serde(default)]
    pub code: Option<Vec<u8>>,
}

impl ContractOperation {
    /// Create a deployment operation
    pub fn deploy(
        registrar: AccountId,
        vm_kind: VmKind,
        code: Vec<u8>,
        transfer: Asset,
        fee_asset: AssetId,
        gas_limit: Gas,
    ) -> Self {
        Self {
            registrar,
            target: None,
            receivers: BTreeSet::new(),
            transfer,
            fee_asset,
            vm_kind,
            gas_price: 1,
            gas_limit,
            code: Some(code),
        }
    }

    /// Create a call operation
    pub fn call(
        registrar: AccountId,
        vm_kind: VmKind,
        target: ContractId,
        transfer: Asset,
        fee_asset: AssetId,
        gas_limit: Gas,
    ) -> Self {
        Self {
            registrar,
            target: Some(target),
            receivers: BTreeSet::new(),
            transfer,
            fee_asset,
            vm_kind,
            gas_price: 1,
            gas_limit,
            code: None,
        }
    }

    /// Set the gas price
    pub fn with_gas_price(mut self, gas_price: u64) -> Self {
        self.gas_price = gas_price;
        self
    }

    /// Declare additional receiver contracts
    pub fn with_receivers(mut self, receivers: impl IntoIterator<Item = ContractId>) -> Self {
        self.receivers.extend(receivers);
        self
    }

    /// Whether this operation deploys a new contract
    pub fn is_deployment(&self) -> bool {
        self.target.is_none()
    }

    /// Check structural invariants
    pub fn validate(&self) -> CoreResult<()> {
        match (&self.code, &self.target) {
            (Some(_), Some(target)) => {
                return Err(CoreError::MalformedOperation(format!(
                    "code supplied for call to {}",
                    target
                )))
            }
            (None, None) => {
                return Err(CoreError::MalformedOperation(
                    "deployment without code".to_string(),
                ))
            }
            (Some(code), None) if code.is_empty() => {
                return Err(CoreError::MalformedOperation(
                    "deployment with empty code".to_string(),
                ))
            }
            _ => {}
        }

        if self.gas_limit == 0 {
            return Err(CoreError::MalformedOperation(
                "gas limit cannot be zero".to_string(),
            ));
        }

        if self.gas_price == 0 {
            return Err(CoreError::MalformedOperation(
                "gas price cannot be zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Keccak256 hash of the bincode encoding
    pub fn hash(&self) -> CoreResult<Hash> {
        let encoded = bincode::serde::encode_to_vec(self, bincode::config::standard())?;
        let hash_bytes = Keccak256::digest(&encoded);
        Hash::from_slice(hash_bytes.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deployment() -> ContractOperation {
        ContractOperation::deploy(
            AccountId::new(5),
            VmKind::Native,
            vec![0x60, 0x80],
            Asset::new(50_000, AssetId::new(1)),
            AssetId::CORE,
            1_000_000,
        )
    }

    #[test]
    fn test_deployment_is_valid() {
        let op = deployment();
        assert!(op.is_deployment());
        assert!(op.validate().is_ok());
    }

    #[test]
    fn test_code_and_target_are_exclusive() {
        let mut op = deployment();
        op.target = Some(ContractId::new(0));
        assert!(matches!(op.validate(), Err(CoreError::MalformedOperation(_))));

        op.code = None;
        assert!(op.validate().is_ok());

        op.target = None;
        assert!(matches!(op.validate(), Err(CoreError::MalformedOperation(_))));
    }

    #[test]
    fn test_zero_gas_rejected() {
        let mut op = deployment();
        op.gas_limit = 0;
        assert!(op.validate().is_err());

        let op = deployment().with_gas_price(0);
        assert!(op.validate().is_err());
    }

    #[test]
    fn test_operation_hash_is_deterministic() {
        let op = deployment();
        assert_eq!(op.hash().unwrap(), op.hash().unwrap());

        let other = deployment().with_receivers([ContractId::new(9)]);
        assert_ne!(op.hash().unwrap(), other.hash().unwrap());
    }

    #[test]
    fn test_operation_json_defaults() {
        let json = r#"{
            "registrar": 5,
            "target": 0,
            "transfer": { "amount": 10, "asset_id": 0 },
            "fee_asset": 1,
            "vm_kind": "native",
            "gas_price": 1,
            "gas_limit": 100000
        }"#;
        let op: ContractOperation = serde_json::from_str(json).unwrap();
        assert_eq!(op.target, Some(ContractId::new(0)));
        assert!(op.receivers.is_empty());
        assert!(op.code.is_none());
        assert!(op.validate().is_ok());
    }
}
