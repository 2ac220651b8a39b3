//! In-memory chain backend for tests.
//!
//! `FakeChain` accepts any signed EIP-2718 payload, derives the hash the way a
//! node would and serves receipts that tests script explicitly.

use crate::{BackendError, ChainBackend};
use alloy_consensus::{Transaction as _, TxEnvelope};
use alloy_eips::eip2718::Decodable2718;
use alloy_primitives::keccak256;
use alloy_rpc_types::{BlockId, TransactionRequest};
use async_trait::async_trait;
use gryd_types::{Address, Bytes, ConfigSchema, Log, Receipt, Schema, ValidationError, B256};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

const GWEI: u128 = 1_000_000_000;

struct FakeState {
	chain_id: u64,
	pending_nonce: u64,
	freeze_nonce: bool,
	gas_price: u128,
	tip_cap: u128,
	gas_estimate: Result<u64, String>,
	call_result: Result<Bytes, String>,
	send_error: Option<String>,
	receipt_failures: usize,
	receipts: HashMap<B256, Receipt>,
	mempool: HashSet<B256>,
	submitted: Vec<Bytes>,
	calls: HashMap<&'static str, usize>,
	block_number: u64,
}

/// Scriptable [`ChainBackend`].
pub struct FakeChain {
	state: Mutex<FakeState>,
}

impl FakeChain {
	pub fn new(chain_id: u64) -> Self {
		Self {
			state: Mutex::new(FakeState {
				chain_id,
				pending_nonce: 0,
				freeze_nonce: false,
				gas_price: GWEI,
				tip_cap: GWEI,
				gas_estimate: Ok(21_000),
				call_result: Ok(Bytes::new()),
				send_error: None,
				receipt_failures: 0,
				receipts: HashMap::new(),
				mempool: HashSet::new(),
				submitted: Vec::new(),
				calls: HashMap::new(),
				block_number: 1,
			}),
		}
	}

	fn with_state<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
		let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
		f(&mut state)
	}

	fn record_call(&self, operation: &'static str) {
		self.with_state(|s| *s.calls.entry(operation).or_default() += 1);
	}

	pub fn set_pending_nonce(&self, nonce: u64) {
		self.with_state(|s| s.pending_nonce = nonce);
	}

	/// Keeps the pending nonce fixed, like a lagging node.
	pub fn freeze_pending_nonce(&self, frozen: bool) {
		self.with_state(|s| s.freeze_nonce = frozen);
	}

	pub fn set_fees(&self, gas_price: u128, tip_cap: u128) {
		self.with_state(|s| {
			s.gas_price = gas_price;
			s.tip_cap = tip_cap;
		});
	}

	pub fn set_gas_estimate(&self, estimate: Result<u64, String>) {
		self.with_state(|s| s.gas_estimate = estimate);
	}

	pub fn set_call_result(&self, result: Result<Bytes, String>) {
		self.with_state(|s| s.call_result = result);
	}

	/// Rejects the next `send_raw` with `message`.
	pub fn fail_next_send(&self, message: &str) {
		self.with_state(|s| s.send_error = Some(message.to_string()));
	}

	/// Fails the next `count` receipt lookups.
	pub fn fail_receipts(&self, count: usize) {
		self.with_state(|s| s.receipt_failures = count);
	}

	/// Forgets every pooled transaction, as if the node dropped them.
	pub fn drop_mempool(&self) {
		self.with_state(|s| s.mempool.clear());
	}

	/// Builds a receipt with fixed gas figures.
	pub fn receipt(hash: B256, success: bool, logs: Vec<Log>) -> Receipt {
		Receipt {
			transaction_hash: hash,
			block_number: None,
			success,
			gas_used: 21_000,
			effective_gas_price: GWEI,
			logs,
		}
	}

	pub fn insert_receipt(&self, mut receipt: Receipt) {
		self.with_state(|s| {
			s.block_number += 1;
			receipt.block_number = Some(s.block_number);
			s.mempool.remove(&receipt.transaction_hash);
			s.receipts.insert(receipt.transaction_hash, receipt);
		});
	}

	/// Includes `hash` in a new block.
	pub fn include(&self, hash: B256, success: bool, logs: Vec<Log>) {
		self.insert_receipt(Self::receipt(hash, success, logs));
	}

	pub fn submitted_raw(&self) -> Vec<Bytes> {
		self.with_state(|s| s.submitted.clone())
	}

	/// Decoded envelope of the most recent accepted payload.
	pub fn last_submitted(&self) -> Option<TxEnvelope> {
		let raw = self.with_state(|s| s.submitted.last().cloned())?;
		TxEnvelope::decode_2718(&mut raw.as_ref()).ok()
	}

	/// Number of calls made to `operation`.
	pub fn calls(&self, operation: &str) -> usize {
		self.with_state(|s| s.calls.get(operation).copied().unwrap_or_default())
	}

	/// Number of calls made to any operation.
	pub fn total_calls(&self) -> usize {
		self.with_state(|s| s.calls.values().sum())
	}
}

struct FakeChainSchema;

impl ConfigSchema for FakeChainSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		Schema::new(vec![], vec![]).validate(config)
	}
}

#[async_trait]
impl ChainBackend for FakeChain {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(FakeChainSchema)
	}

	async fn call(
		&self,
		_request: &TransactionRequest,
		_block: BlockId,
	) -> Result<Bytes, BackendError> {
		self.record_call("eth_call");
		self.with_state(|s| s.call_result.clone())
			.map_err(|e| BackendError::new("eth_call", e))
	}

	async fn send_raw(&self, raw: Bytes) -> Result<B256, BackendError> {
		self.record_call("eth_sendRawTransaction");
		let envelope = TxEnvelope::decode_2718(&mut raw.as_ref())
			.map_err(|e| BackendError::new("eth_sendRawTransaction", e))?;
		let hash = keccak256(&raw);

		self.with_state(|s| {
			if let Some(message) = s.send_error.take() {
				return Err(BackendError::new("eth_sendRawTransaction", message));
			}
			if s.mempool.contains(&hash) || s.receipts.contains_key(&hash) {
				return Err(BackendError::new("eth_sendRawTransaction", "already known"));
			}
			s.mempool.insert(hash);
			s.submitted.push(raw.clone());
			if !s.freeze_nonce {
				s.pending_nonce = s.pending_nonce.max(envelope.nonce() + 1);
			}
			Ok(hash)
		})
	}

	async fn receipt(&self, hash: B256) -> Result<Option<Receipt>, BackendError> {
		self.record_call("eth_getTransactionReceipt");
		self.with_state(|s| {
			if s.receipt_failures > 0 {
				s.receipt_failures -= 1;
				return Err(BackendError::new(
					"eth_getTransactionReceipt",
					"connection reset",
				));
			}
			Ok(s.receipts.get(&hash).cloned())
		})
	}

	async fn suggest_gas_price(&self) -> Result<u128, BackendError> {
		self.record_call("eth_gasPrice");
		Ok(self.with_state(|s| s.gas_price))
	}

	async fn suggest_tip_cap(&self) -> Result<u128, BackendError> {
		self.record_call("eth_maxPriorityFeePerGas");
		Ok(self.with_state(|s| s.tip_cap))
	}

	async fn estimate_gas(&self, _request: &TransactionRequest) -> Result<u64, BackendError> {
		self.record_call("eth_estimateGas");
		self.with_state(|s| s.gas_estimate.clone())
			.map_err(|e| BackendError::new("eth_estimateGas", e))
	}

	async fn chain_id(&self) -> Result<u64, BackendError> {
		self.record_call("eth_chainId");
		Ok(self.with_state(|s| s.chain_id))
	}

	async fn pending_nonce(&self, _address: Address) -> Result<u64, BackendError> {
		self.record_call("eth_getTransactionCount");
		Ok(self.with_state(|s| s.pending_nonce))
	}

	async fn client_version(&self) -> Result<String, BackendError> {
		self.record_call("web3_clientVersion");
		Ok("fake/v0.1.0".to_string())
	}
}
