//! Reference native contract machine
//!
//! Contracts are [`Program`]s encoded with bincode. Deployment runs the
//! program's `init` section, calls run its `body`. Every invocation works
//! in a scratch [`store::Frame`]: a failure drops the frame, a success
//! commits it into the journaled [`ContractStore`].

pub mod program;
pub mod store;

pub use program::{Instr, Program};
pub use store::{ContractState, ContractStore};

use crate::{ExecOutcome, ExecRequest, GasMeter, GasSchedule, VirtualMachine, VmError, VmResult};
use chain_core::{BlockNumber, ContractId, VmKind};
use std::collections::BTreeMap;
use store::Frame;
use tracing::{debug, warn};

/// Native VM with in-memory contract storage
#[derive(Debug, Default)]
pub struct NativeVm {
    schedule: GasSchedule,
    store: ContractStore,
}

impl NativeVm {
    /// Create a machine metered with `schedule`
    pub fn new(schedule: GasSchedule) -> Self {
        Self {
            schedule,
            store: ContractStore::new(),
        }
    }

    /// Gas schedule in use
    pub fn schedule(&self) -> &GasSchedule {
        &self.schedule
    }

    /// Committed contract state
    pub fn contract(&self, id: ContractId) -> Option<&ContractState> {
        self.store.get(id)
    }

    /// Number of contracts held
    pub fn contract_count(&self) -> usize {
        self.store.len()
    }

    fn run(
        &self,
        request: &ExecRequest,
        meter: &mut GasMeter,
        frame: &mut Frame,
    ) -> VmResult<Vec<u8>> {
        let code_len = request.code.as_ref().map_or(0, Vec::len);
        meter.consume_request(code_len)?;

        let (contract, instrs) = match (request.target, &request.code) {
            (None, Some(code)) => {
                let program = Program::from_bytes(code)?;
                meter.consume_creation(code.len())?;
                let id = frame.create(code.clone());
                (id, program.init)
            }
            (Some(target), None) => {
                meter.consume_call()?;
                let code = frame.contract(&self.store, target)?.code.clone();
                (target, Program::from_bytes(&code)?.body)
            }
            _ => {
                return Err(VmError::InvalidRequest(
                    "exactly one of code and target must be set".to_string(),
                ))
            }
        };

        let mut output = Vec::new();
        for instr in instrs {
            self.step(instr, contract, request, meter, frame, &mut output)?;
        }
        Ok(output)
    }

    fn step(
        &self,
        instr: Instr,
        contract: ContractId,
        request: &ExecRequest,
        meter: &mut GasMeter,
        frame: &mut Frame,
        output: &mut Vec<u8>,
    ) -> VmResult<()> {
        match instr {
            Instr::Set { key, value } => {
                meter.consume_write()?;
                let state = frame.contract(&self.store, contract)?;
                if value.is_empty() {
                    state.storage.remove(&key);
                } else {
                    state.storage.insert(key, value);
                }
                frame.touch(contract);
            }
            Instr::Get { key } => {
                meter.consume_read()?;
                let state = frame.contract(&self.store, contract)?;
                if let Some(value) = state.storage.get(&key) {
                    output.extend_from_slice(value);
                }
                frame.touch(contract);
            }
            Instr::Incr { key, by } => {
                meter.consume_read()?;
                meter.consume_write()?;
                let state = frame.contract(&self.store, contract)?;
                let current = match state.storage.get(&key) {
                    Some(bytes) => decode_counter(bytes)?,
                    None => 0,
                };
                let next = current
                    .checked_add(by)
                    .ok_or_else(|| VmError::Reverted("counter overflow".to_string()))?;
                state.storage.insert(key, next.to_le_bytes().to_vec());
                frame.touch(contract);
            }
            Instr::Touch { contract: other } => {
                meter.consume_read()?;
                if other != contract && !request.receivers.contains(&other) {
                    return Err(VmError::UndeclaredReceiver(other));
                }
                frame.contract(&self.store, other)?;
                frame.touch(other);
            }
            Instr::Spin { steps } => meter.consume_steps(steps)?,
            Instr::Revert { reason } => return Err(VmError::Reverted(reason)),
            Instr::Destroy => {
                meter.consume_write()?;
                let state = frame.contract(&self.store, contract)?;
                state.storage.clear();
                state.destroyed = true;
                frame.touch(contract);
            }
        }
        Ok(())
    }
}

fn decode_counter(bytes: &[u8]) -> VmResult<u64> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| VmError::Reverted("value is not a counter".to_string()))?;
    Ok(u64::from_le_bytes(raw))
}

impl VirtualMachine for NativeVm {
    fn kind(&self) -> VmKind {
        VmKind::Native
    }

    fn exec(&mut self, input: &[u8]) -> ExecOutcome {
        let request = match ExecRequest::decode(input) {
            Ok(request) => request,
            Err(err) => return ExecOutcome::failure(0, err.to_string()),
        };

        let mut meter = GasMeter::new(request.gas_limit, self.schedule.clone());
        let mut frame = self.store.frame(request.block_number);

        match self.run(&request, &mut meter, &mut frame) {
            Ok(output) => {
                let attracted = frame.touched().to_vec();
                let created = frame.created();
                self.store.commit(frame);

                debug!(
                    "Native exec at block {} used {} gas, touched {} contract(s)",
                    request.block_number,
                    meter.consumed(),
                    attracted.len()
                );
                let outcome = ExecOutcome::success(meter.consumed(), output, attracted);
                match created {
                    Some(id) => outcome.with_created(id),
                    None => outcome,
                }
            }
            Err(err) => {
                debug!(
                    "Native exec at block {} failed after {} gas: {}",
                    request.block_number,
                    meter.consumed(),
                    err
                );
                let mut outcome = ExecOutcome::failure(meter.consumed(), err.to_string());
                outcome.attracted = frame
                    .touched()
                    .iter()
                    .copied()
                    .filter(|id| frame.created() != Some(*id))
                    .collect();
                outcome
            }
        }
    }

    fn roll_back_db(&mut self, height: BlockNumber) -> VmResult<()> {
        let undone = self.store.roll_back(height);
        if undone > 0 {
            debug!("Native VM undid {} change(s) from block {}", undone, height);
        }
        Ok(())
    }

    fn get_contracts(&self, ids: &[ContractId]) -> BTreeMap<ContractId, Vec<u8>> {
        let mut contracts = BTreeMap::new();
        for id in ids {
            let Some(state) = self.store.get(*id) else {
                continue;
            };
            match bincode::serde::encode_to_vec(state, bincode::config::standard()) {
                Ok(bytes) => {
                    contracts.insert(*id, bytes);
                }
                Err(err) => warn!("Failed to encode contract {}: {}", id, err),
            }
        }
        contracts
    }

    fn get_code(&self, id: ContractId) -> Option<Vec<u8>> {
        self.store
            .get(id)
            .filter(|state| !state.destroyed)
            .map(|state| state.code.clone())
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use chain_core::{AccountId, Asset};
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn request(block: BlockNumber, target: Option<ContractId>, code: Option<Vec<u8>>) -> Vec<u8> {
        ExecRequest {
            block_number: block,
            caller: AccountId::new(1),
            target,
            receivers: BTreeSet::new(),
            value: Asset::core(0),
            gas_limit: 1_000_000,
            code,
        }
        .encode()
        .unwrap()
    }

    fn instr() -> impl Strategy<Value = Instr> {
        prop_oneof![
            (0u8..4, any::<u8>()).prop_map(|(k, v)| Instr::Set {
                key: vec![k],
                value: vec![v],
            }),
            (0u8..4, 1u64..5).prop_map(|(k, by)| Instr::Incr { key: vec![k], by }),
            Just(Instr::Revert {
                reason: "r".to_string()
            }),
        ]
    }

    fn program() -> impl Strategy<Value = Program> {
        (
            prop::collection::vec(instr(), 0..4),
            prop::collection::vec(instr(), 0..4),
        )
            .prop_map(|(init, body)| Program { init, body })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_roll_back_restores_block_state(
            seeded in prop::collection::vec(program(), 1..4),
            later in prop::collection::vec(program(), 0..3),
            calls in prop::collection::vec(0u64..6, 0..8),
        ) {
            let mut vm = NativeVm::default();
            for program in &seeded {
                vm.exec(&request(1, None, Some(program.to_bytes().unwrap())));
            }
            let ids: Vec<ContractId> = (0..8).map(ContractId::new).collect();
            let before = vm.get_contracts(&ids);
            let count = vm.contract_count();

            for program in &later {
                vm.exec(&request(2, None, Some(program.to_bytes().unwrap())));
            }
            for target in &calls {
                vm.exec(&request(2, Some(ContractId::new(*target)), None));
            }

            vm.roll_back_db(2).unwrap();
            prop_assert_eq!(vm.get_contracts(&ids), before);
            prop_assert_eq!(vm.contract_count(), count);
        }
    }
}
