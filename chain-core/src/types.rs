//! Basic ledger types

use crate::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Block number type (64-bit unsigned integer)
pub type BlockNumber = u64;

/// Asset amount in the smallest unit of that asset
pub type Amount = u64;

/// Gas amount type
pub type Gas = u64;

/// 32-byte hash type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Hash([u8; 32]);

impl Hash {
    /// Create a new hash from byte array
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Create hash from slice
    pub fn from_slice(slice: &[u8]) -> CoreResult<Self> {
        let bytes: [u8; 32] = slice
            .try_into()
            .map_err(|_| CoreError::InvalidHash(format!("expected 32 bytes, got {}", slice.len())))?;
        Ok(Self(bytes))
    }

    /// Blake3 digest of arbitrary data
    pub fn from_data(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Get the underlying byte array
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Create from hex string
    pub fn from_hex(hex: &str) -> CoreResult<Self> {
        let bytes = hex::decode(hex)?;
        Self::from_slice(&bytes)
    }

    /// Zero hash (all bytes are 0)
    pub fn zero() -> Self {
        Self([0u8; 32])
    }
}

impl Default for Hash {
    fn default() -> Self {
        Self::zero()
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl From<[u8; 32]> for Hash {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

macro_rules! object_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Create an id from its instance number
            pub const fn new(instance: u64) -> Self {
                Self(instance)
            }

            /// Instance number of this id
            pub const fn instance(&self) -> u64 {
                self.0
            }

            /// Big-endian key bytes, so ids sort numerically in storage
            pub fn to_be_bytes(&self) -> [u8; 8] {
                self.0.to_be_bytes()
            }
        }

        impl From<u64> for $name {
            fn from(instance: u64) -> Self {
                Self(instance)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let digits = s.strip_prefix(concat!($prefix, "#")).unwrap_or(s);
                digits
                    .parse::<u64>()
                    .map(Self)
                    .map_err(|_| CoreError::InvalidId(s.to_string()))
            }
        }
    };
}

object_id!(
    /// Ledger account identifier
    AccountId,
    "account"
);
object_id!(
    /// Asset identifier; instance 0 is the base currency
    AssetId,
    "asset"
);
object_id!(
    /// Deployed contract identifier
    ContractId,
    "contract"
);

impl AssetId {
    /// The network's base currency
    pub const CORE: AssetId = AssetId(0);

    /// Whether this is the base currency
    pub fn is_core(&self) -> bool {
        *self == Self::CORE
    }
}

/// Holder of a balance: a regular account or a contract's implicit account
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Owner {
    Account(AccountId),
    Contract(ContractId),
}

impl Owner {
    /// Storage key: one tag byte followed by the big-endian instance
    pub fn to_key(&self) -> [u8; 9] {
        let (tag, instance) = match self {
            Owner::Account(id) => (0u8, id.to_be_bytes()),
            Owner::Contract(id) => (1u8, id.to_be_bytes()),
        };
        let mut key = [0u8; 9];
        key[0] = tag;
        key[1..].copy_from_slice(&instance);
        key
    }
}

impl From<AccountId> for Owner {
    fn from(id: AccountId) -> Self {
        Owner::Account(id)
    }
}

impl From<ContractId> for Owner {
    fn from(id: ContractId) -> Self {
        Owner::Contract(id)
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Owner::Account(id) => write!(f, "{}", id),
            Owner::Contract(id) => write!(f, "{}", id),
        }
    }
}

/// An amount of a specific asset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Asset {
    pub amount: Amount,
    pub asset_id: AssetId,
}

impl Asset {
    pub fn new(amount: Amount, asset_id: AssetId) -> Self {
        Self { amount, asset_id }
    }

    /// Amount of base currency
    pub fn core(amount: Amount) -> Self {
        Self::new(amount, AssetId::CORE)
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.asset_id)
    }
}

/// Virtual machine type tag carried by every contract operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmKind {
    /// Ethereum bytecode
    Evm,
    /// WebAssembly
    Wavm,
    /// Built-in key-value contract machine
    Native,
}

impl VmKind {
    /// All known VM kinds
    pub fn all() -> &'static [VmKind] {
        &[VmKind::Evm, VmKind::Wavm, VmKind::Native]
    }

    /// Stable lowercase name
    pub fn name(&self) -> &'static str {
        match self {
            VmKind::Evm => "evm",
            VmKind::Wavm => "wavm",
            VmKind::Native => "native",
        }
    }
}

impl fmt::Display for VmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for VmKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VmKind::all()
            .iter()
            .copied()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| CoreError::InvalidId(format!("unknown vm kind: {}", s)))
    }
}
