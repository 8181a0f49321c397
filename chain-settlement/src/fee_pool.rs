//! Fee pools and fee asset pricing
//!
//! A fee pool lets accounts pay gas in an asset other than the base
//! currency. The pool's reserve pays the base currency cost of the gas,
//! and the fee asset units paid by the account accumulate in the pool.

use crate::config::RateEntry;
use crate::ledger::{LedgerRead, LedgerTx};
use crate::{SettlementError, SettlementResult};
use chain_core::{AccountId, Amount, AssetId, Owner};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Per-asset pool state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeePool {
    /// Base currency available to pay gas
    pub reserve: Amount,
    /// Fee asset units collected through the pool
    pub accumulated_fees: Amount,
}

/// Published price: `base` units of base currency buy `quote` units of the asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeRate {
    pub base: Amount,
    pub quote: Amount,
}

impl ExchangeRate {
    pub fn new(base: Amount, quote: Amount) -> Self {
        Self { base, quote }
    }

    /// One to one
    pub fn identity() -> Self {
        Self::new(1, 1)
    }

    /// Asset units needed to cover `core_amount`, rounded up
    pub fn convert(&self, core_amount: Amount) -> SettlementResult<Amount> {
        if self.base == 0 {
            return Err(SettlementError::Config(
                "exchange rate with zero base".to_string(),
            ));
        }
        let base = u128::from(self.base);
        let scaled = u128::from(core_amount) * u128::from(self.quote);
        let quoted = scaled.div_ceil(base);
        Amount::try_from(quoted).map_err(|_| SettlementError::Overflow("fee conversion"))
    }
}

/// Source of the latest published exchange rates
pub trait RateSource: Send + Sync {
    /// Current rate of `asset` against the base currency
    fn current_rate(&self, asset: AssetId) -> Option<ExchangeRate>;
}

/// In-process rate publisher
#[derive(Debug, Default)]
pub struct StaticRates {
    rates: RwLock<HashMap<AssetId, ExchangeRate>>,
}

impl StaticRates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rates listed in configuration
    pub fn from_entries(entries: &[RateEntry]) -> Self {
        let rates = entries
            .iter()
            .map(|entry| (entry.asset, ExchangeRate::new(entry.base, entry.quote)))
            .collect();
        Self {
            rates: RwLock::new(rates),
        }
    }

    /// Publish or replace the rate of `asset`
    pub fn publish(&self, asset: AssetId, rate: ExchangeRate) {
        debug!("Published rate {}:{} for {}", rate.base, rate.quote, asset);
        self.rates.write().insert(asset, rate);
    }

    /// Withdraw the rate of `asset`
    pub fn withdraw(&self, asset: AssetId) -> Option<ExchangeRate> {
        self.rates.write().remove(&asset)
    }
}

impl RateSource for StaticRates {
    fn current_rate(&self, asset: AssetId) -> Option<ExchangeRate> {
        self.rates.read().get(&asset).copied()
    }
}

/// Pricing and bookkeeping of fee pools
#[derive(Clone)]
pub struct FeePoolLedger {
    rates: Arc<dyn RateSource>,
}

impl FeePoolLedger {
    pub fn new(rates: Arc<dyn RateSource>) -> Self {
        Self { rates }
    }

    /// Rate used to price fees in `asset`
    pub fn rate_for(&self, asset: AssetId) -> SettlementResult<ExchangeRate> {
        if asset.is_core() {
            return Ok(ExchangeRate::identity());
        }
        self.rates
            .current_rate(asset)
            .ok_or(SettlementError::MissingExchangeRate(asset))
    }

    /// Fail unless fees in `asset` can be priced
    pub fn ensure_priceable(&self, asset: AssetId) -> SettlementResult<()> {
        self.rate_for(asset).map(|_| ())
    }

    /// Fee in `asset` covering `core_amount` of base currency
    pub fn quote(&self, asset: AssetId, core_amount: Amount) -> SettlementResult<Amount> {
        if asset.is_core() {
            return Ok(core_amount);
        }
        self.rate_for(asset)?.convert(core_amount)
    }

    /// Base currency reserve of the pool for `asset`
    pub fn reserve(&self, ledger: &impl LedgerRead, asset: AssetId) -> SettlementResult<Amount> {
        Ok(ledger.fee_pool(asset)?.reserve)
    }

    /// Take `core_amount` from the reserve; fails without writing when it is too low
    pub fn debit_reserve(
        &self,
        ledger: &mut LedgerTx,
        asset: AssetId,
        core_amount: Amount,
    ) -> SettlementResult<()> {
        let mut pool = ledger.fee_pool(asset)?;
        pool.reserve = pool.reserve.checked_sub(core_amount).ok_or(
            SettlementError::InsufficientFeePoolReserve {
                asset,
                required: core_amount,
                available: pool.reserve,
            },
        )?;
        ledger.set_fee_pool(asset, pool)
    }

    /// Credit fee asset units paid through the pool
    pub fn collect(
        &self,
        ledger: &mut LedgerTx,
        asset: AssetId,
        fee: Amount,
    ) -> SettlementResult<()> {
        let mut pool = ledger.fee_pool(asset)?;
        pool.accumulated_fees = pool
            .accumulated_fees
            .checked_add(fee)
            .ok_or(SettlementError::Overflow("accumulated fees"))?;
        ledger.set_fee_pool(asset, pool)
    }

    /// Move base currency from `from` into the reserve of `asset`
    pub fn fund(
        &self,
        ledger: &mut LedgerTx,
        from: AccountId,
        asset: AssetId,
        amount: Amount,
    ) -> SettlementResult<FeePool> {
        if asset.is_core() {
            return Err(SettlementError::MalformedOperation(
                "the core asset has no fee pool".to_string(),
            ));
        }
        if amount == 0 {
            return Err(SettlementError::MalformedOperation(
                "fee pool funding must be positive".to_string(),
            ));
        }

        ledger.debit(Owner::Account(from), AssetId::CORE, amount)?;
        let mut pool = ledger.fee_pool(asset)?;
        pool.reserve = pool
            .reserve
            .checked_add(amount)
            .ok_or(SettlementError::Overflow("fee pool reserve"))?;
        ledger.set_fee_pool(asset, pool)?;

        info!(
            "{} funded fee pool of {} with {}, reserve now {}",
            from, asset, amount, pool.reserve
        );
        Ok(pool)
    }
}

impl std::fmt::Debug for FeePoolLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeePoolLedger").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LedgerView;
    use chain_db::{MemoryDatabase, SharedDatabase};
    use proptest::prelude::*;

    fn setup(rates: StaticRates) -> (SharedDatabase, FeePoolLedger) {
        let db: SharedDatabase = Arc::new(MemoryDatabase::new());
        (db, FeePoolLedger::new(Arc::new(rates)))
    }

    #[test]
    fn test_quote_rounds_up() {
        let asset = AssetId::new(1);
        let rates = StaticRates::new();
        rates.publish(asset, ExchangeRate::new(3, 2));
        let (_, pools) = setup(rates);

        assert_eq!(pools.quote(asset, 3).unwrap(), 2);
        assert_eq!(pools.quote(asset, 4).unwrap(), 3);
        assert_eq!(pools.quote(asset, 0).unwrap(), 0);
        assert_eq!(pools.quote(AssetId::CORE, 4).unwrap(), 4);
    }

    #[test]
    fn test_missing_rate() {
        let (_, pools) = setup(StaticRates::new());
        let asset = AssetId::new(9);
        assert!(matches!(
            pools.quote(asset, 1),
            Err(SettlementError::MissingExchangeRate(a)) if a == asset
        ));
        assert!(pools.ensure_priceable(AssetId::CORE).is_ok());
    }

    #[test]
    fn test_conversion_overflow() {
        let rate = ExchangeRate::new(1, u64::MAX);
        assert!(matches!(
            rate.convert(u64::MAX),
            Err(SettlementError::Overflow(_))
        ));
    }

    #[test]
    fn test_fund_and_debit_reserve() {
        let asset = AssetId::new(1);
        let funder = AccountId::new(7);
        let (db, pools) = setup(StaticRates::new());

        let mut ledger = LedgerTx::new(db.transaction(), 1, 0);
        ledger.credit(Owner::Account(funder), AssetId::CORE, 1_000).unwrap();
        let pool = pools.fund(&mut ledger, funder, asset, 600).unwrap();
        assert_eq!(pool.reserve, 600);

        pools.debit_reserve(&mut ledger, asset, 250).unwrap();
        match pools.debit_reserve(&mut ledger, asset, 351).unwrap_err() {
            SettlementError::InsufficientFeePoolReserve {
                required,
                available,
                ..
            } => {
                assert_eq!(required, 351);
                assert_eq!(available, 350);
            }
            other => panic!("Expected InsufficientFeePoolReserve, got {:?}", other),
        }
        pools.collect(&mut ledger, asset, 40).unwrap();
        ledger.commit().unwrap();

        let view = LedgerView::new(db);
        assert_eq!(pools.reserve(&view, asset).unwrap(), 350);
        assert_eq!(view.fee_pool(asset).unwrap().accumulated_fees, 40);
        assert_eq!(view.balance(Owner::Account(funder), AssetId::CORE).unwrap(), 400);
    }

    #[test]
    fn test_fund_requires_balance_and_non_core_asset() {
        let (db, pools) = setup(StaticRates::new());
        let mut ledger = LedgerTx::new(db.transaction(), 1, 0);

        assert!(matches!(
            pools.fund(&mut ledger, AccountId::new(1), AssetId::new(1), 10),
            Err(SettlementError::InsufficientBalance { .. })
        ));
        assert!(matches!(
            pools.fund(&mut ledger, AccountId::new(1), AssetId::CORE, 10),
            Err(SettlementError::MalformedOperation(_))
        ));
    }

    #[test]
    fn test_withdrawn_rate() {
        let asset = AssetId::new(2);
        let rates = StaticRates::from_entries(&[RateEntry {
            asset,
            base: 1,
            quote: 5,
        }]);
        assert_eq!(rates.current_rate(asset), Some(ExchangeRate::new(1, 5)));
        rates.withdraw(asset);
        assert_eq!(rates.current_rate(asset), None);
    }

    proptest! {
        #[test]
        fn prop_quote_covers_cost(core in 0u64..1_000_000_000, base in 1u64..10_000, quote in 1u64..10_000) {
            let fee = ExchangeRate::new(base, quote).convert(core).unwrap();
            // The fee is worth at least the cost, and less than one unit more
            prop_assert!(fee as u128 * base as u128 >= core as u128 * quote as u128);
            prop_assert!((fee as u128 * base as u128) < core as u128 * quote as u128 + base as u128);
        }
    }
}
