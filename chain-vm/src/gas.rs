//! Gas metering and scheduling

use crate::{VmError, VmResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Gas costs for the native machine's operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GasSchedule {
    /// Base cost of every request
    pub request_base: u64,
    /// Cost per byte of request code
    pub request_byte: u64,
    /// Contract creation cost
    pub contract_creation: u64,
    /// Cost per byte of stored code
    pub code_byte: u64,
    /// Contract call cost
    pub contract_call: u64,
    /// Storage read cost
    pub storage_read: u64,
    /// Storage write cost
    pub storage_write: u64,
    /// Cost of one computation step
    pub step: u64,
}

impl Default for GasSchedule {
    fn default() -> Self {
        Self {
            request_base: 21000,
            request_byte: 68,
            contract_creation: 32000,
            code_byte: 3,
            contract_call: 700,
            storage_read: 800,
            storage_write: 20000,
            step: 1,
        }
    }
}

impl GasSchedule {
    /// Load gas schedule from TOML configuration
    pub fn from_toml(toml_str: &str) -> VmResult<Self> {
        toml::from_str(toml_str)
            .map_err(|e| VmError::Other(format!("Failed to parse gas schedule: {}", e)))
    }

    /// Convert to TOML string
    pub fn to_toml(&self) -> VmResult<String> {
        toml::to_string(self)
            .map_err(|e| VmError::Other(format!("Failed to serialize gas schedule: {}", e)))
    }

    /// Base cost of a request carrying `code_len` bytes
    pub fn request_cost(&self, code_len: usize) -> u64 {
        self.request_base
            .saturating_add((code_len as u64).saturating_mul(self.request_byte))
    }

    /// Cost of creating a contract holding `code_len` bytes
    pub fn creation_cost(&self, code_len: usize) -> u64 {
        self.contract_creation
            .saturating_add((code_len as u64).saturating_mul(self.code_byte))
    }
}

/// Gas meter for tracking gas consumption of one request
#[derive(Debug, Clone)]
pub struct GasMeter {
    /// Gas limit for the request
    limit: u64,
    /// Gas consumed so far
    consumed: u64,
    /// Gas schedule
    schedule: GasSchedule,
    /// Consumption by operation
    breakdown: BTreeMap<&'static str, u64>,
}

impl GasMeter {
    /// Create a new gas meter
    pub fn new(limit: u64, schedule: GasSchedule) -> Self {
        Self {
            limit,
            consumed: 0,
            schedule,
            breakdown: BTreeMap::new(),
        }
    }

    /// Get remaining gas
    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.consumed)
    }

    /// Get consumed gas
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Get gas limit
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Schedule in use
    pub fn schedule(&self) -> &GasSchedule {
        &self.schedule
    }

    /// Consume gas for an operation.
    ///
    /// Running out of gas burns the whole limit.
    pub fn consume(&mut self, amount: u64, operation: &'static str) -> VmResult<()> {
        if amount > self.remaining() {
            let available = self.remaining();
            self.exhaust(operation);
            return Err(VmError::OutOfGas {
                required: amount,
                available,
            });
        }
        self.consumed += amount;
        *self.breakdown.entry(operation).or_insert(0) += amount;
        Ok(())
    }

    /// Consume the remaining gas
    pub fn exhaust(&mut self, operation: &'static str) {
        let rest = self.remaining();
        self.consumed = self.limit;
        *self.breakdown.entry(operation).or_insert(0) += rest;
    }

    /// Consume gas for the request base cost
    pub fn consume_request(&mut self, code_len: usize) -> VmResult<()> {
        let cost = self.schedule.request_cost(code_len);
        self.consume(cost, "request")
    }

    /// Consume gas for contract creation
    pub fn consume_creation(&mut self, code_len: usize) -> VmResult<()> {
        let cost = self.schedule.creation_cost(code_len);
        self.consume(cost, "creation")
    }

    /// Consume gas for contract call
    pub fn consume_call(&mut self) -> VmResult<()> {
        self.consume(self.schedule.contract_call, "call")
    }

    /// Consume gas for a storage read
    pub fn consume_read(&mut self) -> VmResult<()> {
        self.consume(self.schedule.storage_read, "storage_read")
    }

    /// Consume gas for a storage write
    pub fn consume_write(&mut self) -> VmResult<()> {
        self.consume(self.schedule.storage_write, "storage_write")
    }

    /// Consume gas for computation steps
    pub fn consume_steps(&mut self, count: u64) -> VmResult<()> {
        let cost = count.saturating_mul(self.schedule.step);
        self.consume(cost, "steps")
    }

    /// Get gas consumption breakdown
    pub fn breakdown(&self) -> &BTreeMap<&'static str, u64> {
        &self.breakdown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gas_schedule_default() {
        let schedule = GasSchedule::default();
        assert_eq!(schedule.request_base, 21000);
        assert_eq!(schedule.request_cost(10), 21000 + 680);
    }

    #[test]
    fn test_gas_schedule_toml() {
        let schedule = GasSchedule::from_toml("storage_write = 5000\nstep = 2\n").unwrap();
        assert_eq!(schedule.storage_write, 5000);
        assert_eq!(schedule.step, 2);
        // Unlisted fields keep their defaults
        assert_eq!(schedule.request_base, 21000);

        let encoded = schedule.to_toml().unwrap();
        assert_eq!(GasSchedule::from_toml(&encoded).unwrap(), schedule);
    }

    #[test]
    fn test_gas_meter_basic() {
        let mut meter = GasMeter::new(100000, GasSchedule::default());
        assert_eq!(meter.remaining(), 100000);

        meter.consume(1000, "test").unwrap();
        assert_eq!(meter.consumed(), 1000);
        assert_eq!(meter.remaining(), 99000);
    }

    #[test]
    fn test_out_of_gas_burns_limit() {
        let mut meter = GasMeter::new(1000, GasSchedule::default());
        meter.consume(400, "test").unwrap();

        match meter.consume(2000, "test").unwrap_err() {
            VmError::OutOfGas {
                required,
                available,
            } => {
                assert_eq!(required, 2000);
                assert_eq!(available, 600);
            }
            other => panic!("Expected OutOfGas error, got {:?}", other),
        }
        assert_eq!(meter.consumed(), 1000);
        assert_eq!(meter.remaining(), 0);
    }

    #[test]
    fn test_gas_meter_breakdown() {
        let mut meter = GasMeter::new(1_000_000, GasSchedule::default());
        meter.consume_request(100).unwrap();
        meter.consume_call().unwrap();
        meter.consume_read().unwrap();
        meter.consume_write().unwrap();
        meter.consume_write().unwrap();

        assert_eq!(meter.breakdown()["storage_write"], 40000);
        let total: u64 = meter.breakdown().values().sum();
        assert_eq!(total, meter.consumed());
    }
}
