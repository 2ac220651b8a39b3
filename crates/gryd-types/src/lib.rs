//! Shared types for the gryd storage node.
//!
//! Every crate in the workspace speaks in terms of the types defined here:
//! transaction requests and snapshots owned by the transaction manager, chain
//! receipts, the dataset documents written by the orchestrator, and the
//! configuration validation framework used by all pluggable implementations.

/// API error and response types for the HTTP surface.
pub mod api;
/// Dataset rows, ledger entries and confirmation records.
pub mod record;
/// Self-registration trait for pluggable implementations.
pub mod registry;
/// Zeroizing wrapper for key material.
pub mod secret_string;
/// Storage namespaces.
pub mod storage;
/// Transaction requests, snapshots and receipts.
pub mod transaction;
/// Formatting and time helpers.
pub mod utils;
/// Configuration validation framework.
pub mod validation;

pub use api::*;
pub use record::*;
pub use registry::ImplementationRegistry;
pub use secret_string::SecretString;
pub use storage::*;
pub use transaction::*;
pub use utils::{current_timestamp, truncate_id, without_0x_prefix};
pub use validation::*;

pub use alloy_primitives::{Address, Bytes, B256, U256};
