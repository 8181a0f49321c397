//! Core ledger data structures shared by the settlement layer
//!
//! This crate provides the fundamental building blocks:
//! - Object identifiers (accounts, assets, contracts) and amounts
//! - VM type tags
//! - The contract operation payload and its structural invariants

pub mod error;
pub mod operation;
pub mod types;

// Re-export commonly used types
pub use error::*;
pub use operation::*;
pub use types::*;
