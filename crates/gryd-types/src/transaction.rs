//! Transaction types shared by the signer, chain backend and transaction manager.

use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Request to send or simulate a transaction.
///
/// Fields left at their zero/`None` value are resolved by the transaction
/// manager: a `gas_limit` of zero is estimated, missing fees are suggested.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxRequest {
	/// Recipient, `None` for contract creation.
	pub to: Option<Address>,
	/// Call data.
	pub data: Bytes,
	/// Base gas price in wei.
	pub gas_price: Option<u128>,
	/// Gas limit, 0 means estimate.
	pub gas_limit: u64,
	/// Floor applied to the estimated gas limit.
	pub min_estimated_gas_limit: u64,
	/// Maximum fee per gas (EIP-1559).
	pub gas_fee_cap: Option<u128>,
	/// Maximum priority fee per gas (EIP-1559).
	pub gas_tip_cap: Option<u128>,
	/// Value transferred in wei.
	pub value: U256,
	/// Human readable description, used for logging only.
	pub description: String,
}

impl TxRequest {
	/// Creates a read-only call request against `to`.
	pub fn call(to: Address, data: impl Into<Bytes>) -> Self {
		Self {
			to: Some(to),
			data: data.into(),
			..Default::default()
		}
	}
}

/// Lifecycle of a transaction tracked by the transaction manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
	/// Signed, not yet accepted by the node.
	Created,
	/// Accepted by the node, waiting for inclusion.
	Submitted,
	/// Included with a successful receipt.
	Confirmed,
	/// Included with a failed receipt.
	Reverted,
	/// Superseded by another transaction at the same nonce.
	Replaced,
	/// Replaced and the replacement confirmed.
	Cancelled,
}

impl TransactionStatus {
	/// Terminal states never change again.
	pub fn is_terminal(&self) -> bool {
		matches!(self, Self::Confirmed | Self::Reverted | Self::Cancelled)
	}

	/// Whether the nonce of a transaction in this state is still open.
	pub fn is_live(&self) -> bool {
		matches!(self, Self::Created | Self::Submitted)
	}
}

impl fmt::Display for TransactionStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			Self::Created => "created",
			Self::Submitted => "submitted",
			Self::Confirmed => "confirmed",
			Self::Reverted => "reverted",
			Self::Replaced => "replaced",
			Self::Cancelled => "cancelled",
		};
		f.write_str(s)
	}
}

/// Snapshot of a transaction owned by the transaction manager.
///
/// Callers only ever receive copies; the manager is the single writer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTransaction {
	pub hash: B256,
	pub nonce: u64,
	pub to: Option<Address>,
	pub data: Bytes,
	pub value: U256,
	pub gas_limit: u64,
	pub gas_price: u128,
	pub gas_fee_cap: u128,
	pub gas_tip_cap: u128,
	/// Signed EIP-2718 envelope as broadcast.
	pub raw: Bytes,
	/// Unix seconds of the first successful submission.
	pub submitted_at: u64,
	pub description: String,
	pub status: TransactionStatus,
	/// Transaction this one was sent to replace.
	pub replaces: Option<B256>,
	/// Transaction that replaced this one.
	pub replaced_by: Option<B256>,
	/// Block of inclusion once a receipt was observed.
	pub block_number: Option<u64>,
}

/// Output of the signer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
	/// Transaction hash (keccak of `raw`).
	pub hash: B256,
	/// EIP-2718 encoded envelope.
	pub raw: Bytes,
}

/// Log entry emitted by a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
	/// Emitting contract.
	pub address: Address,
	/// Ordered topics, topic 0 identifies the event.
	pub topics: Vec<B256>,
	/// Non-indexed ABI data.
	pub data: Bytes,
}

/// Receipt of an included transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
	pub transaction_hash: B256,
	pub block_number: Option<u64>,
	/// `true` for status 1.
	pub success: bool,
	pub gas_used: u64,
	pub effective_gas_price: u128,
	pub logs: Vec<Log>,
}

impl Receipt {
	/// Fee paid by the sender: gas used times effective gas price.
	pub fn fee(&self) -> U256 {
		U256::from(self.gas_used) * U256::from(self.effective_gas_price)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_receipt_fee() {
		let receipt = Receipt {
			transaction_hash: B256::ZERO,
			block_number: Some(1),
			success: true,
			gas_used: 21_000,
			effective_gas_price: 3_000_000_000,
			logs: vec![],
		};
		assert_eq!(receipt.fee(), U256::from(63_000_000_000_000u64));
	}

	#[test]
	fn test_status_classes() {
		assert!(TransactionStatus::Submitted.is_live());
		assert!(!TransactionStatus::Replaced.is_live());
		assert!(!TransactionStatus::Replaced.is_terminal());
		assert!(TransactionStatus::Cancelled.is_terminal());
		assert_eq!(TransactionStatus::Cancelled.to_string(), "cancelled");
	}
}
