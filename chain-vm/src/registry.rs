//! VM registry keyed by type tag

use crate::{VirtualMachine, VmError, VmResult};
use chain_core::{BlockNumber, VmKind};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Collects VM implementations before the registry is frozen
#[derive(Default)]
pub struct VmRegistryBuilder {
    machines: BTreeMap<VmKind, Box<dyn VirtualMachine>>,
}

impl VmRegistryBuilder {
    /// Register an implementation under its own tag
    pub fn register(mut self, vm: Box<dyn VirtualMachine>) -> VmResult<Self> {
        let kind = vm.kind();
        if self.machines.contains_key(&kind) {
            return Err(VmError::DuplicateVm(kind));
        }
        debug!("Registered VM {}", kind);
        self.machines.insert(kind, vm);
        Ok(self)
    }

    /// Freeze the set of implementations
    pub fn build(self) -> VmRegistry {
        info!(
            "VM registry ready with {} implementation(s): {:?}",
            self.machines.len(),
            self.machines.keys().collect::<Vec<_>>()
        );
        VmRegistry {
            machines: self.machines,
        }
    }
}

/// Fixed mapping from VM tag to implementation.
///
/// Built once at node startup; no implementation can be added or replaced
/// afterwards.
pub struct VmRegistry {
    machines: BTreeMap<VmKind, Box<dyn VirtualMachine>>,
}

impl VmRegistry {
    /// Start building a registry
    pub fn builder() -> VmRegistryBuilder {
        VmRegistryBuilder::default()
    }

    /// Mutable access to the implementation for `kind`
    pub fn resolve(&mut self, kind: VmKind) -> Option<&mut (dyn VirtualMachine + 'static)> {
        self.machines.get_mut(&kind).map(|vm| vm.as_mut())
    }

    /// Read-only access to the implementation for `kind`
    pub fn get(&self, kind: VmKind) -> Option<&(dyn VirtualMachine + 'static)> {
        self.machines.get(&kind).map(|vm| vm.as_ref())
    }

    /// Whether `kind` is registered
    pub fn contains(&self, kind: VmKind) -> bool {
        self.machines.contains_key(&kind)
    }

    /// Registered tags in order
    pub fn kinds(&self) -> Vec<VmKind> {
        self.machines.keys().copied().collect()
    }

    /// Roll every registered VM back to `height`.
    ///
    /// Stops at the first failure and reports which VM failed.
    pub fn roll_back_all(&mut self, height: BlockNumber) -> Result<(), (VmKind, VmError)> {
        for (kind, vm) in self.machines.iter_mut() {
            vm.roll_back_db(height).map_err(|err| (*kind, err))?;
            debug!("VM {} rolled back to block {}", kind, height);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.machines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }
}

impl std::fmt::Debug for VmRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VmRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NativeVm;

    #[test]
    fn test_register_and_resolve() {
        let mut registry = VmRegistry::builder()
            .register(Box::new(NativeVm::default()))
            .unwrap()
            .build();

        assert!(registry.contains(VmKind::Native));
        assert!(registry.resolve(VmKind::Native).is_some());
        assert!(registry.resolve(VmKind::Evm).is_none());
        assert_eq!(registry.kinds(), vec![VmKind::Native]);
    }

    #[test]
    fn test_duplicate_registration() {
        let result = VmRegistry::builder()
            .register(Box::new(NativeVm::default()))
            .unwrap()
            .register(Box::new(NativeVm::default()));

        assert!(matches!(result, Err(VmError::DuplicateVm(VmKind::Native))));
    }

    #[test]
    fn test_roll_back_all_on_empty_state() {
        let mut registry = VmRegistry::builder()
            .register(Box::new(NativeVm::default()))
            .unwrap()
            .build();
        assert!(registry.roll_back_all(0).is_ok());
    }
}
