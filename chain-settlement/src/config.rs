//! Settlement configuration

use crate::{SettlementError, SettlementResult};
use chain_core::{Amount, AssetId, Gas};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

/// Basis point denominator of the fee split
pub const BPS_DENOMINATOR: u64 = 10_000;

/// How a charged fee is divided
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeeSplit {
    /// Share credited to pending vested fees, in basis points
    pub vesting_share_bps: u16,
}

impl Default for FeeSplit {
    fn default() -> Self {
        Self {
            vesting_share_bps: 2000,
        }
    }
}

/// Result of splitting a fee
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeShares {
    /// Network-owned part
    pub network: Amount,
    /// Vested part
    pub vested: Amount,
}

impl FeeSplit {
    pub fn new(vesting_share_bps: u16) -> Self {
        Self { vesting_share_bps }
    }

    /// Split `fee`; the vested part rounds down
    pub fn split(&self, fee: Amount) -> FeeShares {
        let bps = u128::from(self.vesting_share_bps).min(u128::from(BPS_DENOMINATOR));
        let vested = (u128::from(fee) * bps / u128::from(BPS_DENOMINATOR)) as Amount;
        FeeShares {
            network: fee - vested,
            vested,
        }
    }
}

/// Exchange rate published at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateEntry {
    /// Fee asset
    pub asset: AssetId,
    /// Base currency units of the rate
    pub base: Amount,
    /// Fee asset units bought by `base`
    pub quote: Amount,
}

/// Settlement engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    /// Fee split policy
    pub fee_split: FeeSplit,
    /// Largest gas limit an operation may declare
    pub max_gas_limit: Gas,
    /// Initial exchange rates
    pub exchange_rates: Vec<RateEntry>,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            fee_split: FeeSplit::default(),
            max_gas_limit: 10_000_000,
            exchange_rates: Vec::new(),
        }
    }
}

impl SettlementConfig {
    /// Parse and validate a TOML document
    pub fn from_toml(toml_str: &str) -> SettlementResult<Self> {
        let config: SettlementConfig = toml::from_str(toml_str).map_err(|e| {
            SettlementError::Config(format!("Failed to parse settlement config: {}", e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> SettlementResult<Self> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| SettlementError::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_toml(&content)
    }

    /// Validate the configuration
    pub fn validate(&self) -> SettlementResult<()> {
        if u64::from(self.fee_split.vesting_share_bps) > BPS_DENOMINATOR {
            return Err(SettlementError::Config(format!(
                "Vesting share {} exceeds {} basis points",
                self.fee_split.vesting_share_bps, BPS_DENOMINATOR
            )));
        }

        if self.max_gas_limit == 0 {
            return Err(SettlementError::Config(
                "Max gas limit must be greater than 0".to_string(),
            ));
        }

        let mut seen = BTreeSet::new();
        for entry in &self.exchange_rates {
            if entry.asset.is_core() {
                return Err(SettlementError::Config(
                    "The core asset cannot have an exchange rate".to_string(),
                ));
            }
            if entry.base == 0 || entry.quote == 0 {
                return Err(SettlementError::Config(format!(
                    "Exchange rate of {} must have non-zero terms",
                    entry.asset
                )));
            }
            if !seen.insert(entry.asset) {
                return Err(SettlementError::Config(format!(
                    "Duplicate exchange rate for {}",
                    entry.asset
                )));
            }
        }

        Ok(())
    }
}
