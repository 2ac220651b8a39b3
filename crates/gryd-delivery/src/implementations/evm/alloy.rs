//! HTTP JSON-RPC backend built on the Alloy provider.

use crate::{BackendError, ChainBackend};
use alloy_provider::{Provider, ProviderBuilder};
use alloy_rpc_types::{BlockId, TransactionReceipt, TransactionRequest};
use alloy_transport_http::Http;
use async_trait::async_trait;
use gryd_types::{
	Address, Bytes, ConfigSchema, Field, FieldType, Log, Receipt, Schema, ValidationError, B256,
};
use std::sync::Arc;

/// Chain backend talking to a single HTTP endpoint.
pub struct AlloyBackend {
	provider: Arc<dyn Provider<Http<reqwest::Client>> + Send + Sync>,
}

impl AlloyBackend {
	pub fn new(rpc_url: &str) -> Result<Self, BackendError> {
		let url = rpc_url
			.parse()
			.map_err(|e| BackendError::new("parse_rpc_url", e))?;
		let provider = ProviderBuilder::new().on_http(url);

		Ok(Self {
			provider: Arc::new(provider),
		})
	}
}

fn convert_receipt(receipt: TransactionReceipt) -> Receipt {
	let logs = receipt
		.inner
		.logs()
		.iter()
		.map(|log| Log {
			address: log.inner.address,
			topics: log.inner.data.topics().to_vec(),
			data: log.inner.data.data.clone(),
		})
		.collect();

	Receipt {
		transaction_hash: receipt.transaction_hash,
		block_number: receipt.block_number,
		success: receipt.status(),
		gas_used: receipt.gas_used as u64,
		effective_gas_price: receipt.effective_gas_price,
		logs,
	}
}

/// Configuration schema for the Alloy backend.
pub struct AlloyBackendSchema;

impl ConfigSchema for AlloyBackendSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![Field::new("rpc_url", FieldType::String).with_validator(|value| {
				match value.as_str() {
					Some(url) if url.starts_with("http://") || url.starts_with("https://") => Ok(()),
					_ => Err("rpc_url must be an http(s) URL".to_string()),
				}
			})],
			vec![],
		);
		schema.validate(config)
	}
}

#[async_trait]
impl ChainBackend for AlloyBackend {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(AlloyBackendSchema)
	}

	async fn call(
		&self,
		request: &TransactionRequest,
		block: BlockId,
	) -> Result<Bytes, BackendError> {
		self.provider
			.call(request)
			.block(block)
			.await
			.map_err(|e| BackendError::new("eth_call", e))
	}

	async fn send_raw(&self, raw: Bytes) -> Result<B256, BackendError> {
		let pending = self
			.provider
			.send_raw_transaction(&raw)
			.await
			.map_err(|e| BackendError::new("eth_sendRawTransaction", e))?;
		Ok(*pending.tx_hash())
	}

	async fn receipt(&self, hash: B256) -> Result<Option<Receipt>, BackendError> {
		let receipt = self
			.provider
			.get_transaction_receipt(hash)
			.await
			.map_err(|e| BackendError::new("eth_getTransactionReceipt", e))?;
		Ok(receipt.map(convert_receipt))
	}

	async fn suggest_gas_price(&self) -> Result<u128, BackendError> {
		self.provider
			.get_gas_price()
			.await
			.map_err(|e| BackendError::new("eth_gasPrice", e))
	}

	async fn suggest_tip_cap(&self) -> Result<u128, BackendError> {
		self.provider
			.get_max_priority_fee_per_gas()
			.await
			.map_err(|e| BackendError::new("eth_maxPriorityFeePerGas", e))
	}

	async fn estimate_gas(&self, request: &TransactionRequest) -> Result<u64, BackendError> {
		self.provider
			.estimate_gas(request)
			.await
			.map_err(|e| BackendError::new("eth_estimateGas", e))
	}

	async fn chain_id(&self) -> Result<u64, BackendError> {
		self.provider
			.get_chain_id()
			.await
			.map_err(|e| BackendError::new("eth_chainId", e))
	}

	async fn pending_nonce(&self, address: Address) -> Result<u64, BackendError> {
		self.provider
			.get_transaction_count(address)
			.pending()
			.await
			.map_err(|e| BackendError::new("eth_getTransactionCount", e))
	}

	async fn client_version(&self) -> Result<String, BackendError> {
		self.provider
			.get_client_version()
			.await
			.map_err(|e| BackendError::new("web3_clientVersion", e))
	}
}

/// Factory function to create the HTTP backend from configuration.
///
/// Configuration parameters:
/// - `rpc_url`: HTTP(S) JSON-RPC endpoint
pub fn create_backend(config: &toml::Value) -> Result<Box<dyn ChainBackend>, BackendError> {
	AlloyBackendSchema
		.validate(config)
		.map_err(|e| BackendError::new("configure", e))?;

	let rpc_url = config
		.get("rpc_url")
		.and_then(|v| v.as_str())
		.ok_or_else(|| BackendError::new("configure", "rpc_url is required"))?;

	Ok(Box::new(AlloyBackend::new(rpc_url)?))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_schema_rejects_websocket_url() {
		let config: toml::Value = toml::from_str("rpc_url = \"ws://localhost:8546\"").unwrap();
		let err = create_backend(&config).err().unwrap();
		assert_eq!(err.operation, "configure");
	}

	#[test]
	fn test_missing_rpc_url() {
		let config: toml::Value = toml::from_str("poll_interval_seconds = 2").unwrap();
		assert!(create_backend(&config).is_err());
	}

	#[test]
	fn test_valid_config_builds_backend() {
		let config: toml::Value = toml::from_str("rpc_url = \"http://localhost:8545\"").unwrap();
		assert!(create_backend(&config).is_ok());
	}
}
