//! Local private key signer.

use crate::{AccountError, AccountInterface};
use alloy_eips::eip2718::Encodable2718;
use alloy_network::{EthereumWallet, TransactionBuilder};
use alloy_rpc_types::TransactionRequest;
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;
use gryd_types::{
	without_0x_prefix, Address, Bytes, ConfigSchema, Field, FieldType, Schema, SecretString,
	SignedTransaction, ValidationError,
};

/// Signs with a secp256k1 key held in process memory.
pub struct LocalAccount {
	signer: PrivateKeySigner,
	wallet: EthereumWallet,
}

impl LocalAccount {
	/// Creates a signer from a hex encoded private key, with or without `0x`.
	pub fn new(private_key: &SecretString) -> Result<Self, AccountError> {
		let signer: PrivateKeySigner = private_key.with_exposed(|key| {
			without_0x_prefix(key)
				.parse()
				.map_err(|e| AccountError::InvalidKey(format!("{}", e)))
		})?;
		Ok(Self {
			wallet: EthereumWallet::from(signer.clone()),
			signer,
		})
	}
}

pub struct LocalAccountSchema;

impl ConfigSchema for LocalAccountSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![
				Field::new("private_key", FieldType::String).with_validator(|value| {
					let key = value.as_str().map(without_0x_prefix).unwrap_or_default();
					if key.len() != 64 {
						return Err("Private key must be 64 hex characters".to_string());
					}
					if !key.chars().all(|c| c.is_ascii_hexdigit()) {
						return Err("Private key must be hex encoded".to_string());
					}
					Ok(())
				}),
			],
			vec![],
		);
		schema.validate(config)
	}
}

#[async_trait]
impl AccountInterface for LocalAccount {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(LocalAccountSchema)
	}

	async fn address(&self) -> Result<Address, AccountError> {
		Ok(self.signer.address())
	}

	async fn sign_transaction(
		&self,
		request: TransactionRequest,
		chain_id: u64,
	) -> Result<SignedTransaction, AccountError> {
		let envelope = request
			.with_from(self.signer.address())
			.with_chain_id(chain_id)
			.build(&self.wallet)
			.await
			.map_err(|e| AccountError::SigningFailed(e.to_string()))?;

		Ok(SignedTransaction {
			hash: *envelope.tx_hash(),
			raw: Bytes::from(envelope.encoded_2718()),
		})
	}
}

/// Factory function to create a local account from configuration.
///
/// Configuration parameters:
/// - `private_key`: hex encoded secp256k1 key, usually `${GRYD_PRIVATE_KEY}`
pub fn create_account(config: &toml::Value) -> Result<Box<dyn AccountInterface>, AccountError> {
	LocalAccountSchema
		.validate(config)
		.map_err(|e| AccountError::InvalidKey(format!("Invalid configuration: {}", e)))?;

	let private_key = config
		.get("private_key")
		.and_then(|v| v.as_str())
		.map(SecretString::from)
		.ok_or_else(|| AccountError::InvalidKey("private_key is required".to_string()))?;

	Ok(Box::new(LocalAccount::new(&private_key)?))
}

/// Registry for the local account implementation.
pub struct Registry;

impl gryd_types::ImplementationRegistry for Registry {
	const NAME: &'static str = "local";
	type Factory = crate::AccountFactory;

	fn factory() -> Self::Factory {
		create_account
	}
}

impl crate::AccountRegistry for Registry {}
