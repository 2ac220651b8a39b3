//! Transaction manager for the node's single sender.
//!
//! All state-changing operations (`send`, `resend`, `cancel`) serialize on one
//! lock held across nonce allocation, signing and submission only. Receipt
//! waits run without it. Every transaction the manager produces lives in an
//! arena keyed by hash and nonce; callers only ever see copies.

use crate::{BackendError, ChainBackend};
use alloy_network::TransactionBuilder;
use alloy_primitives::TxKind;
use alloy_rpc_types::{BlockId, TransactionRequest};
use gryd_account::{AccountError, AccountService};
use gryd_types::{
	current_timestamp, truncate_id, Address, Bytes, Receipt, StoredTransaction, TransactionStatus,
	TxRequest, B256, U256,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::instrument;

/// Gas limit of a plain value transfer, used for cancellations.
const TRANSFER_GAS_LIMIT: u64 = 21_000;
/// Percentage added to a gas estimate.
const GAS_ESTIMATE_MARGIN_PERCENT: u64 = 25;
/// Minimum fee increase for a replacement to be accepted by the pool.
const REPLACEMENT_FEE_PERCENT: u128 = 110;

/// Node errors meaning the payload is already in the pool or on chain.
const ALREADY_KNOWN_MARKERS: [&str; 3] = ["already known", "already imported", "known transaction"];

/// Errors that can occur while managing transactions.
#[derive(Debug, Error)]
pub enum TransactionError {
	#[error(transparent)]
	Backend(#[from] BackendError),
	#[error("Call failed: {0}")]
	Call(BackendError),
	#[error("Submission failed: {0}")]
	Submission(BackendError),
	#[error("Signing failed: {0}")]
	Signing(#[from] AccountError),
	#[error("Unknown transaction {0}")]
	UnknownTransaction(B256),
	#[error("Transaction {0} already imported")]
	AlreadyImported(B256),
	#[error("Transaction {hash} is {status}, not pending")]
	NotPending {
		hash: B256,
		status: TransactionStatus,
	},
	#[error("Transaction {hash} was superseded by {by}")]
	Superseded { hash: B256, by: B256 },
	#[error("Timed out waiting for receipt of {0}")]
	ReceiptTimeout(B256),
	#[error("Receipt for {0} not available yet")]
	ReceiptNotAvailable(B256),
}

/// Tuning knobs of the manager.
#[derive(Debug, Clone)]
pub struct ManagerSettings {
	/// Interval between receipt polls.
	pub poll_interval: Duration,
	/// Deadline used by [`TransactionManager::watch`].
	pub receipt_timeout: Duration,
	/// Floor applied to gas estimates when the request sets none.
	pub min_estimated_gas_limit: u64,
	/// Boost applied to suggested fees by [`TransactionManager::send_default`].
	pub tip_boost_percent: u64,
}

impl Default for ManagerSettings {
	fn default() -> Self {
		Self {
			poll_interval: Duration::from_secs(2),
			receipt_timeout: Duration::from_secs(120),
			min_estimated_gas_limit: 0,
			tip_boost_percent: 0,
		}
	}
}

/// Transactions produced by the manager, addressed by hash and nonce.
#[derive(Default)]
struct TransactionArena {
	transactions: HashMap<B256, StoredTransaction>,
	by_nonce: BTreeMap<u64, Vec<B256>>,
	receipts: HashMap<B256, Receipt>,
	/// Nonce after the highest one the node accepted from us.
	next_nonce: Option<u64>,
}

impl TransactionArena {
	fn insert(&mut self, tx: StoredTransaction) {
		self.by_nonce.entry(tx.nonce).or_default().push(tx.hash);
		self.transactions.insert(tx.hash, tx);
	}

	fn remove(&mut self, hash: &B256) {
		if let Some(tx) = self.transactions.remove(hash) {
			if let Some(hashes) = self.by_nonce.get_mut(&tx.nonce) {
				hashes.retain(|h| h != hash);
				if hashes.is_empty() {
					self.by_nonce.remove(&tx.nonce);
				}
			}
		}
	}

	fn mark_submitted(&mut self, hash: &B256) {
		if let Some(tx) = self.transactions.get_mut(hash) {
			tx.status = TransactionStatus::Submitted;
			tx.submitted_at = current_timestamp();
			let next = tx.nonce + 1;
			self.next_nonce = Some(self.next_nonce.map_or(next, |n| n.max(next)));
		}
	}

	/// The polled hash first, then every sibling at the same nonce that may
	/// still be included, replaced ones among them.
	fn poll_set(&self, hash: &B256) -> Vec<B256> {
		let mut set = vec![*hash];
		if let Some(tx) = self.transactions.get(hash) {
			if let Some(siblings) = self.by_nonce.get(&tx.nonce) {
				set.extend(siblings.iter().filter(|h| *h != hash).filter(|h| {
					self.transactions.get(*h).is_some_and(|s| {
						matches!(
							s.status,
							TransactionStatus::Submitted | TransactionStatus::Replaced
						)
					})
				}));
			}
		}
		set
	}

	/// Records an observed receipt and settles the other transactions at its nonce.
	fn record_receipt(&mut self, receipt: &Receipt) {
		let hash = receipt.transaction_hash;
		self.receipts.insert(hash, receipt.clone());

		let Some(tx) = self.transactions.get_mut(&hash) else {
			return;
		};
		tx.status = if receipt.success {
			TransactionStatus::Confirmed
		} else {
			TransactionStatus::Reverted
		};
		tx.block_number = receipt.block_number;
		let nonce = tx.nonce;

		let siblings = self.by_nonce.get(&nonce).cloned().unwrap_or_default();
		for sibling in siblings.iter().filter(|h| **h != hash) {
			let Some(other) = self.transactions.get_mut(sibling) else {
				continue;
			};
			match other.status {
				TransactionStatus::Replaced => other.status = TransactionStatus::Cancelled,
				TransactionStatus::Created | TransactionStatus::Submitted => {
					other.status = TransactionStatus::Replaced;
					other.replaced_by = Some(hash);
				},
				_ => {},
			}
		}
	}

	/// Hash of the included transaction that took `hash`'s nonce, if any.
	fn superseded_by(&self, hash: &B256) -> Option<B256> {
		let tx = self.transactions.get(hash)?;
		if !matches!(
			tx.status,
			TransactionStatus::Replaced | TransactionStatus::Cancelled
		) {
			return None;
		}
		self.by_nonce.get(&tx.nonce)?.iter().copied().find(|h| {
			self.transactions.get(h).is_some_and(|s| {
				matches!(
					s.status,
					TransactionStatus::Confirmed | TransactionStatus::Reverted
				)
			})
		})
	}
}

/// Poll loop shared by waiters and watch tasks.
#[derive(Clone)]
struct ReceiptTracker {
	backend: Arc<dyn ChainBackend>,
	arena: Arc<RwLock<TransactionArena>>,
	poll_interval: Duration,
}

impl ReceiptTracker {
	/// Polls until `hash` has a receipt or `timeout` passes.
	///
	/// Tracked transactions also poll their siblings so that a confirmed
	/// replacement ends the wait with [`TransactionError::Superseded`].
	async fn await_receipt(
		&self,
		hash: B256,
		timeout: Duration,
		tracked: bool,
	) -> Result<Receipt, TransactionError> {
		let deadline = Instant::now() + timeout;
		let mut ticker = tokio::time::interval(self.poll_interval);
		ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

		loop {
			tokio::select! {
				biased;
				_ = tokio::time::sleep_until(deadline) => {
					return Err(TransactionError::ReceiptTimeout(hash));
				}
				_ = ticker.tick() => {}
			}

			if tracked {
				if let Some(by) = self.arena.read().await.superseded_by(&hash) {
					return Err(TransactionError::Superseded { hash, by });
				}
			}

			let candidates = if tracked {
				self.arena.read().await.poll_set(&hash)
			} else {
				vec![hash]
			};

			for candidate in candidates {
				match self.backend.receipt(candidate).await {
					Ok(Some(receipt)) => {
						if tracked {
							self.arena.write().await.record_receipt(&receipt);
						}
						if candidate == hash {
							return Ok(receipt);
						}
						tracing::info!(
							tx_hash = %truncate_id(&hash.to_string()),
							by = %truncate_id(&candidate.to_string()),
							"Transaction superseded by confirmed sibling"
						);
					},
					Ok(None) => {},
					Err(e) => {
						tracing::warn!(
							tx_hash = %truncate_id(&candidate.to_string()),
							error = %e,
							"Receipt poll failed, retrying"
						);
					},
				}
			}
		}
	}
}

/// Asynchronous receipt wait started by [`TransactionManager::watch`].
///
/// Exactly one of the two channels yields a value. Both close without a
/// value once the watch is cancelled or the receipt receiver is dropped.
pub struct ReceiptWatch {
	pub receipt: oneshot::Receiver<Receipt>,
	pub error: oneshot::Receiver<TransactionError>,
	handle: AbortHandle,
}

impl ReceiptWatch {
	/// Stops the poll task.
	pub fn cancel(&self) {
		self.handle.abort();
	}

	/// Waits for whichever channel resolves; `None` if the watch was cancelled.
	pub async fn outcome(mut self) -> Option<Result<Receipt, TransactionError>> {
		tokio::select! {
			biased;
			Ok(receipt) = &mut self.receipt => Some(Ok(receipt)),
			Ok(error) = &mut self.error => Some(Err(error)),
			else => None,
		}
	}
}

/// Nonce-sequencing transaction manager for one signer.
pub struct TransactionManager {
	backend: Arc<dyn ChainBackend>,
	account: Arc<AccountService>,
	sender: Address,
	chain_id: u64,
	settings: ManagerSettings,
	send_lock: Mutex<()>,
	tracker: ReceiptTracker,
}

impl TransactionManager {
	/// Creates a manager, resolving the sender address and chain id once.
	pub async fn new(
		backend: Arc<dyn ChainBackend>,
		account: Arc<AccountService>,
		settings: ManagerSettings,
	) -> Result<Self, TransactionError> {
		let sender = account.get_address().await?;
		let chain_id = backend.chain_id().await?;

		tracing::info!(sender = %sender, chain_id, "Transaction manager ready");

		Ok(Self {
			tracker: ReceiptTracker {
				backend: backend.clone(),
				arena: Arc::new(RwLock::new(TransactionArena::default())),
				poll_interval: settings.poll_interval,
			},
			backend,
			account,
			sender,
			chain_id,
			settings,
			send_lock: Mutex::new(()),
		})
	}

	pub fn sender(&self) -> Address {
		self.sender
	}

	pub fn chain_id(&self) -> u64 {
		self.chain_id
	}

	/// Default deadline for receipt waits.
	pub fn receipt_timeout(&self) -> Duration {
		self.settings.receipt_timeout
	}

	pub fn settings(&self) -> &ManagerSettings {
		&self.settings
	}

	/// Builds, signs and submits `request`, returning its hash.
	///
	/// Suggested fees are raised by `tip_boost_percent`. Fails with
	/// [`TransactionError::Submission`] when the node rejects the payload; the
	/// nonce is then left free for the next send.
	#[instrument(skip_all, fields(description = %request.description))]
	pub async fn send(
		&self,
		request: TxRequest,
		tip_boost_percent: u64,
	) -> Result<B256, TransactionError> {
		let _guard = self.send_lock.lock().await;

		let nonce = self.next_nonce().await?;
		let gas_limit = self.resolve_gas_limit(&request).await?;
		let fees = self.resolve_fees(&request, tip_boost_percent).await?;

		let mut tx_request = TransactionRequest::default()
			.with_from(self.sender)
			.with_nonce(nonce)
			.with_gas_limit(gas_limit)
			.with_max_fee_per_gas(fees.fee_cap)
			.with_max_priority_fee_per_gas(fees.tip_cap)
			.with_value(request.value)
			.with_input(request.data.clone());
		tx_request = match request.to {
			Some(to) => tx_request.with_to(to),
			None => tx_request.with_kind(TxKind::Create),
		};

		let signed = self.account.sign(tx_request, self.chain_id).await?;
		let stored = StoredTransaction {
			hash: signed.hash,
			nonce,
			to: request.to,
			data: request.data,
			value: request.value,
			gas_limit,
			gas_price: fees.gas_price,
			gas_fee_cap: fees.fee_cap,
			gas_tip_cap: fees.tip_cap,
			raw: signed.raw.clone(),
			submitted_at: 0,
			description: request.description,
			status: TransactionStatus::Created,
			replaces: None,
			replaced_by: None,
			block_number: None,
		};

		self.submit(stored).await
	}

	/// Sends `request` with the configured tip boost.
	pub async fn send_default(&self, request: TxRequest) -> Result<B256, TransactionError> {
		self.send(request, self.settings.tip_boost_percent).await
	}

	/// Executes `request` read-only against the latest block.
	pub async fn call(&self, request: &TxRequest) -> Result<Bytes, TransactionError> {
		let mut call = TransactionRequest::default()
			.with_from(self.sender)
			.with_input(request.data.clone())
			.with_value(request.value);
		if let Some(to) = request.to {
			call = call.with_to(to);
		}
		self.backend
			.call(&call, BlockId::latest())
			.await
			.map_err(TransactionError::Call)
	}

	/// Waits for the receipt of a transaction this manager sent.
	///
	/// The stored transaction becomes `Confirmed` or `Reverted` accordingly.
	#[instrument(skip_all, fields(tx_hash = %truncate_id(&hash.to_string())))]
	pub async fn wait_for_receipt(
		&self,
		hash: B256,
		timeout: Duration,
	) -> Result<Receipt, TransactionError> {
		self.ensure_tracked(&hash).await?;
		self.tracker.await_receipt(hash, timeout, true).await
	}

	/// Waits for the receipt of a transaction submitted by someone else.
	///
	/// Nothing is recorded in the arena.
	#[instrument(skip_all, fields(tx_hash = %truncate_id(&hash.to_string())))]
	pub async fn wait_for_external_receipt(
		&self,
		hash: B256,
		timeout: Duration,
	) -> Result<Receipt, TransactionError> {
		self.tracker.await_receipt(hash, timeout, false).await
	}

	/// Starts a background wait for a transaction this manager sent.
	pub async fn watch(&self, hash: B256) -> Result<ReceiptWatch, TransactionError> {
		self.ensure_tracked(&hash).await?;

		let (mut receipt_tx, receipt_rx) = oneshot::channel();
		let (error_tx, error_rx) = oneshot::channel();
		let tracker = self.tracker.clone();
		let timeout = self.settings.receipt_timeout;

		let task = tokio::spawn(async move {
			tokio::select! {
				outcome = tracker.await_receipt(hash, timeout, true) => match outcome {
					Ok(receipt) => {
						let _ = receipt_tx.send(receipt);
					},
					Err(e) => {
						let _ = error_tx.send(e);
					},
				},
				_ = receipt_tx.closed() => {
					tracing::debug!(tx_hash = %truncate_id(&hash.to_string()), "Watch abandoned");
				}
			}
		});

		Ok(ReceiptWatch {
			receipt: receipt_rx,
			error: error_rx,
			handle: task.abort_handle(),
		})
	}

	/// Re-broadcasts the signed payload of `hash` unchanged.
	///
	/// A transaction that already has a receipt is recorded as included and
	/// reported as [`TransactionError::AlreadyImported`] without broadcasting.
	#[instrument(skip_all, fields(tx_hash = %truncate_id(&hash.to_string())))]
	pub async fn resend(&self, hash: B256) -> Result<(), TransactionError> {
		let _guard = self.send_lock.lock().await;

		let tx = self
			.stored_transaction(hash)
			.await
			.ok_or(TransactionError::UnknownTransaction(hash))?;
		match tx.status {
			TransactionStatus::Submitted => {},
			TransactionStatus::Confirmed | TransactionStatus::Reverted => {
				return Err(TransactionError::AlreadyImported(hash));
			},
			status => return Err(TransactionError::NotPending { hash, status }),
		}

		if let Some(receipt) = self.backend.receipt(hash).await? {
			self.tracker.arena.write().await.record_receipt(&receipt);
			tracing::info!(nonce = tx.nonce, "Transaction already included, not resending");
			return Err(TransactionError::AlreadyImported(hash));
		}

		match self.backend.send_raw(tx.raw).await {
			Ok(_) => {
				tracing::info!(nonce = tx.nonce, "Resent transaction");
				Ok(())
			},
			Err(e) if is_already_known(&e) => Err(TransactionError::AlreadyImported(hash)),
			Err(e) => Err(TransactionError::Submission(e)),
		}
	}

	/// Replaces `hash` with a zero-value transfer to self at the same nonce.
	///
	/// Both fee fields of the replacement exceed the original's by at least
	/// ten percent. The original becomes `Replaced` right away and
	/// `Cancelled` once the replacement confirms.
	#[instrument(skip_all, fields(tx_hash = %truncate_id(&hash.to_string())))]
	pub async fn cancel(&self, hash: B256) -> Result<B256, TransactionError> {
		let _guard = self.send_lock.lock().await;

		let original = self
			.stored_transaction(hash)
			.await
			.ok_or(TransactionError::UnknownTransaction(hash))?;
		if original.status != TransactionStatus::Submitted {
			return Err(TransactionError::NotPending {
				hash,
				status: original.status,
			});
		}

		let gas_price = self.backend.suggest_gas_price().await?;
		let suggested_tip = self.backend.suggest_tip_cap().await?;
		let tip_cap = suggested_tip.max(bump_replacement_fee(original.gas_tip_cap));
		let fee_cap = (gas_price + tip_cap).max(bump_replacement_fee(original.gas_fee_cap));

		let tx_request = TransactionRequest::default()
			.with_from(self.sender)
			.with_to(self.sender)
			.with_nonce(original.nonce)
			.with_gas_limit(TRANSFER_GAS_LIMIT)
			.with_max_fee_per_gas(fee_cap)
			.with_max_priority_fee_per_gas(tip_cap)
			.with_value(U256::ZERO);

		let signed = self.account.sign(tx_request, self.chain_id).await?;
		let replacement = StoredTransaction {
			hash: signed.hash,
			nonce: original.nonce,
			to: Some(self.sender),
			data: Bytes::new(),
			value: U256::ZERO,
			gas_limit: TRANSFER_GAS_LIMIT,
			gas_price,
			gas_fee_cap: fee_cap,
			gas_tip_cap: tip_cap,
			raw: signed.raw.clone(),
			submitted_at: 0,
			description: format!("cancel {}", hash),
			status: TransactionStatus::Created,
			replaces: Some(hash),
			replaced_by: None,
			block_number: None,
		};

		let new_hash = self.submit(replacement).await?;

		let mut arena = self.tracker.arena.write().await;
		if let Some(tx) = arena.transactions.get_mut(&hash) {
			if tx.status == TransactionStatus::Submitted {
				tx.status = TransactionStatus::Replaced;
				tx.replaced_by = Some(new_hash);
			}
		}

		Ok(new_hash)
	}

	/// Snapshot of a transaction this manager sent.
	pub async fn stored_transaction(&self, hash: B256) -> Option<StoredTransaction> {
		self.tracker.arena.read().await.transactions.get(&hash).cloned()
	}

	/// Hashes of transactions waiting for inclusion, in nonce order.
	pub async fn pending_transactions(&self) -> Vec<B256> {
		let arena = self.tracker.arena.read().await;
		arena
			.by_nonce
			.values()
			.flatten()
			.filter(|h| {
				arena
					.transactions
					.get(*h)
					.is_some_and(|tx| tx.status == TransactionStatus::Submitted)
			})
			.copied()
			.collect()
	}

	/// Fee paid by `hash`: gas used times effective gas price.
	pub async fn transaction_fee(&self, hash: B256) -> Result<U256, TransactionError> {
		if let Some(receipt) = self.tracker.arena.read().await.receipts.get(&hash) {
			return Ok(receipt.fee());
		}

		let receipt = self
			.backend
			.receipt(hash)
			.await?
			.ok_or(TransactionError::ReceiptNotAvailable(hash))?;
		self.tracker.arena.write().await.record_receipt(&receipt);
		Ok(receipt.fee())
	}

	async fn ensure_tracked(&self, hash: &B256) -> Result<(), TransactionError> {
		if self
			.tracker
			.arena
			.read()
			.await
			.transactions
			.contains_key(hash)
		{
			Ok(())
		} else {
			Err(TransactionError::UnknownTransaction(*hash))
		}
	}

	/// Higher of the node's pending nonce and our own high-water mark.
	async fn next_nonce(&self) -> Result<u64, TransactionError> {
		let pending = self.backend.pending_nonce(self.sender).await?;
		let local = self.tracker.arena.read().await.next_nonce;
		Ok(local.map_or(pending, |n| n.max(pending)))
	}

	async fn resolve_gas_limit(&self, request: &TxRequest) -> Result<u64, TransactionError> {
		if request.gas_limit > 0 {
			return Ok(request.gas_limit);
		}

		let floor = request
			.min_estimated_gas_limit
			.max(self.settings.min_estimated_gas_limit);
		let mut estimate_request = TransactionRequest::default()
			.with_from(self.sender)
			.with_input(request.data.clone())
			.with_value(request.value);
		estimate_request = match request.to {
			Some(to) => estimate_request.with_to(to),
			None => estimate_request.with_kind(TxKind::Create),
		};

		match self.backend.estimate_gas(&estimate_request).await {
			Ok(estimate) => {
				let padded = estimate.saturating_mul(100 + GAS_ESTIMATE_MARGIN_PERCENT) / 100;
				Ok(padded.max(floor))
			},
			Err(e) if floor > 0 => {
				tracing::warn!(error = %e, floor, "Gas estimation failed, using floor");
				Ok(floor)
			},
			Err(e) => Err(e.into()),
		}
	}

	async fn resolve_fees(
		&self,
		request: &TxRequest,
		tip_boost_percent: u64,
	) -> Result<Fees, TransactionError> {
		let gas_price = match request.gas_price {
			Some(price) => price,
			None => boost(self.backend.suggest_gas_price().await?, tip_boost_percent),
		};
		let tip_cap = match request.gas_tip_cap {
			Some(tip) => tip,
			None => boost(self.backend.suggest_tip_cap().await?, tip_boost_percent),
		};
		let fee_cap = request.gas_fee_cap.unwrap_or(gas_price + tip_cap);

		Ok(Fees {
			gas_price,
			tip_cap,
			fee_cap,
		})
	}

	/// Records `tx` and broadcasts it; drops the record again on rejection.
	async fn submit(&self, tx: StoredTransaction) -> Result<B256, TransactionError> {
		let hash = tx.hash;
		let nonce = tx.nonce;
		let raw = tx.raw.clone();
		self.tracker.arena.write().await.insert(tx);

		match self.backend.send_raw(raw).await {
			Ok(node_hash) => {
				if node_hash != hash {
					tracing::warn!(
						tx_hash = %hash,
						node_hash = %node_hash,
						"Node reported a different transaction hash"
					);
				}
				self.tracker.arena.write().await.mark_submitted(&hash);
				tracing::info!(tx_hash = %truncate_id(&hash.to_string()), nonce, "Submitted transaction");
				Ok(hash)
			},
			Err(e) => {
				self.tracker.arena.write().await.remove(&hash);
				tracing::warn!(nonce, error = %e, "Transaction rejected");
				Err(TransactionError::Submission(e))
			},
		}
	}
}

struct Fees {
	gas_price: u128,
	tip_cap: u128,
	fee_cap: u128,
}

fn boost(value: u128, percent: u64) -> u128 {
	value.saturating_mul(100 + percent as u128) / 100
}

fn bump_replacement_fee(value: u128) -> u128 {
	value.saturating_mul(REPLACEMENT_FEE_PERCENT) / 100 + 1
}

fn is_already_known(error: &BackendError) -> bool {
	let cause = error.cause.to_lowercase();
	ALREADY_KNOWN_MARKERS
		.iter()
		.any(|marker| cause.contains(marker))
}
