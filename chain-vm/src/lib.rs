//! Virtual machine boundary
//!
//! This crate defines the capability contract every contract VM must
//! satisfy, the registry that maps VM type tags to implementations, and
//! a small deterministic reference machine.

pub mod error;
pub mod gas;
pub mod machine;
pub mod native;
pub mod registry;

pub use error::{VmError, VmResult};
pub use gas::{GasMeter, GasSchedule};
pub use machine::{ExecOutcome, ExecRequest, ExecStatus, VirtualMachine};
pub use native::{Instr, NativeVm, Program};
pub use registry::{VmRegistry, VmRegistryBuilder};
