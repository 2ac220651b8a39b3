//! Signer for the node's on-chain account.
//!
//! The transaction manager never touches key material directly. It hands a
//! fully populated request to an [`AccountInterface`] and receives the signed
//! EIP-2718 envelope back.

use alloy_rpc_types::TransactionRequest;
use async_trait::async_trait;
use gryd_types::{Address, ConfigSchema, ImplementationRegistry, SignedTransaction};
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod local;
}

/// Errors that can occur during account operations.
#[derive(Debug, Error)]
pub enum AccountError {
	/// The request could not be signed, usually because a field is missing.
	#[error("Signing failed: {0}")]
	SigningFailed(String),
	/// The configured key is invalid or malformed.
	#[error("Invalid key: {0}")]
	InvalidKey(String),
	#[error("Implementation error: {0}")]
	Implementation(String),
}

/// Trait implemented by every signer.
#[async_trait]
pub trait AccountInterface: Send + Sync {
	/// Returns the configuration schema for this account implementation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Address transactions are sent from.
	async fn address(&self) -> Result<Address, AccountError>;

	/// Signs `request` for `chain_id`.
	///
	/// The request must carry nonce, gas limit and fees. The returned hash is
	/// the keccak of the returned raw bytes.
	async fn sign_transaction(
		&self,
		request: TransactionRequest,
		chain_id: u64,
	) -> Result<SignedTransaction, AccountError>;
}

/// Type alias for account factory functions.
pub type AccountFactory = fn(&toml::Value) -> Result<Box<dyn AccountInterface>, AccountError>;

/// Registry trait for account implementations.
pub trait AccountRegistry: ImplementationRegistry<Factory = AccountFactory> {}

/// Get all registered account implementations.
pub fn get_all_implementations() -> Vec<(&'static str, AccountFactory)> {
	use implementations::local;

	vec![(local::Registry::NAME, local::Registry::factory())]
}

/// Service that manages account operations.
///
/// Wraps the configured implementation so callers hold one concrete type.
pub struct AccountService {
	implementation: Box<dyn AccountInterface>,
}

impl AccountService {
	pub fn new(implementation: Box<dyn AccountInterface>) -> Self {
		Self { implementation }
	}

	pub async fn get_address(&self) -> Result<Address, AccountError> {
		self.implementation.address().await
	}

	/// Signs a transaction using the managed account.
	pub async fn sign(
		&self,
		request: TransactionRequest,
		chain_id: u64,
	) -> Result<SignedTransaction, AccountError> {
		self.implementation
			.sign_transaction(request, chain_id)
			.await
	}
}
