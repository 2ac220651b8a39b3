//! Chain access and transaction lifecycle for the gryd node.
//!
//! [`ChainBackend`] is a thin pass-through to a JSON-RPC node. The
//! [`TransactionManager`] sits on top of it and owns everything stateful:
//! nonce sequencing for the node's single sender, fee and gas resolution,
//! the arena of transactions it produced, receipt waiting and replacement.

use alloy_rpc_types::{BlockId, TransactionRequest};
use async_trait::async_trait;
use gryd_types::{Address, Bytes, ConfigSchema, Receipt, B256};
use std::fmt;
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod evm {
		pub mod alloy;
	}
}

mod manager;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use manager::{ManagerSettings, ReceiptWatch, TransactionError, TransactionManager};

/// Failure of a single backend operation.
///
/// `operation` names the RPC method that failed, `cause` carries the
/// transport or node error message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation} failed: {cause}")]
pub struct BackendError {
	pub operation: &'static str,
	pub cause: String,
}

impl BackendError {
	pub fn new(operation: &'static str, cause: impl fmt::Display) -> Self {
		Self {
			operation,
			cause: cause.to_string(),
		}
	}
}

/// Read and write access to a JSON-RPC node.
///
/// Implementations do not retry; every failure is returned as a
/// [`BackendError`] naming the operation.
#[async_trait]
pub trait ChainBackend: Send + Sync {
	/// Returns the configuration schema for this backend implementation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// `eth_call` against `block`.
	async fn call(&self, request: &TransactionRequest, block: BlockId)
		-> Result<Bytes, BackendError>;

	/// `eth_sendRawTransaction`; returns the hash reported by the node.
	async fn send_raw(&self, raw: Bytes) -> Result<B256, BackendError>;

	/// `eth_getTransactionReceipt`; `None` while the transaction is not included.
	async fn receipt(&self, hash: B256) -> Result<Option<Receipt>, BackendError>;

	/// `eth_gasPrice`.
	async fn suggest_gas_price(&self) -> Result<u128, BackendError>;

	/// `eth_maxPriorityFeePerGas`.
	async fn suggest_tip_cap(&self) -> Result<u128, BackendError>;

	async fn estimate_gas(&self, request: &TransactionRequest) -> Result<u64, BackendError>;

	async fn chain_id(&self) -> Result<u64, BackendError>;

	/// `eth_getTransactionCount` at the pending block.
	async fn pending_nonce(&self, address: Address) -> Result<u64, BackendError>;

	/// `web3_clientVersion`, used as the connectivity probe.
	async fn client_version(&self) -> Result<String, BackendError>;
}

/// Type alias for backend factory functions.
pub type BackendFactory = fn(&toml::Value) -> Result<Box<dyn ChainBackend>, BackendError>;
