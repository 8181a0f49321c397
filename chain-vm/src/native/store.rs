//! Journaled contract storage of the native machine

use crate::{VmError, VmResult};
use chain_core::{BlockNumber, ContractId};
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

/// Persistent state of one contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractState {
    /// Deployed code
    pub code: Vec<u8>,
    /// Key-value storage
    pub storage: BTreeMap<Vec<u8>, Vec<u8>>,
    /// Set once the contract destroyed itself
    pub destroyed: bool,
}

impl ContractState {
    pub fn new(code: Vec<u8>) -> Self {
        Self {
            code,
            storage: BTreeMap::new(),
            destroyed: false,
        }
    }
}

#[derive(Debug, Clone)]
enum Change {
    Contract {
        id: ContractId,
        previous: Option<ContractState>,
    },
    NextId {
        previous: u64,
    },
}

#[derive(Debug, Clone)]
struct JournalEntry {
    block: BlockNumber,
    change: Change,
}

/// Committed contract states plus a per-block journal of prior values
#[derive(Debug, Clone, Default)]
pub struct ContractStore {
    contracts: BTreeMap<ContractId, ContractState>,
    next_id: u64,
    journal: Vec<JournalEntry>,
}

impl ContractStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed state of a contract
    pub fn get(&self, id: ContractId) -> Option<&ContractState> {
        self.contracts.get(&id)
    }

    /// Number of contracts ever created and not rolled back
    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }

    /// Number of journal entries kept for rollback
    pub fn journal_len(&self) -> usize {
        self.journal.len()
    }

    /// Open a scratch frame for one invocation
    pub fn frame(&self, block: BlockNumber) -> Frame {
        Frame {
            block,
            overlay: BTreeMap::new(),
            next_id: self.next_id,
            created: None,
            touched: Vec::new(),
        }
    }

    /// Apply a finished frame, journaling every value it replaces
    pub fn commit(&mut self, frame: Frame) {
        let block = frame.block;
        for (id, state) in frame.overlay {
            let previous = self.contracts.get(&id).cloned();
            if previous.as_ref() == Some(&state) {
                continue;
            }
            self.journal.push(JournalEntry {
                block,
                change: Change::Contract { id, previous },
            });
            self.contracts.insert(id, state);
        }

        if frame.next_id != self.next_id {
            self.journal.push(JournalEntry {
                block,
                change: Change::NextId {
                    previous: self.next_id,
                },
            });
            self.next_id = frame.next_id;
        }
    }

    /// Undo every journaled change made at or after `height`.
    ///
    /// Returns the number of entries undone.
    pub fn roll_back(&mut self, height: BlockNumber) -> usize {
        let mut undone = 0;
        while self.journal.last().is_some_and(|entry| entry.block >= height) {
            let Some(entry) = self.journal.pop() else {
                break;
            };
            match entry.change {
                Change::Contract {
                    id,
                    previous: Some(state),
                } => {
                    self.contracts.insert(id, state);
                }
                Change::Contract { id, previous: None } => {
                    self.contracts.remove(&id);
                }
                Change::NextId { previous } => self.next_id = previous,
            }
            undone += 1;
        }
        undone
    }
}

/// Uncommitted view of one invocation.
///
/// Dropping a frame discards its writes.
#[derive(Debug)]
pub struct Frame {
    block: BlockNumber,
    overlay: BTreeMap<ContractId, ContractState>,
    next_id: u64,
    created: Option<ContractId>,
    touched: Vec<ContractId>,
}

impl Frame {
    /// Live contract state, copied into the frame on first access
    pub fn contract(
        &mut self,
        store: &ContractStore,
        id: ContractId,
    ) -> VmResult<&mut ContractState> {
        let state = match self.overlay.entry(id) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let state = store.get(id).cloned().ok_or(VmError::ContractNotFound(id))?;
                entry.insert(state)
            }
        };
        if state.destroyed {
            return Err(VmError::ContractDestroyed(id));
        }
        Ok(state)
    }

    /// Allocate a new contract holding `code`
    pub fn create(&mut self, code: Vec<u8>) -> ContractId {
        let id = ContractId::new(self.next_id);
        self.next_id += 1;
        self.overlay.insert(id, ContractState::new(code));
        self.created = Some(id);
        self.touch(id);
        id
    }

    /// Record a storage access
    pub fn touch(&mut self, id: ContractId) {
        if !self.touched.contains(&id) {
            self.touched.push(id);
        }
    }

    /// Contract created in this frame
    pub fn created(&self) -> Option<ContractId> {
        self.created
    }

    /// Contracts accessed so far, first touch order
    pub fn touched(&self) -> &[ContractId] {
        &self.touched
    }
}
