//! Client for the gryd payment contract.
//!
//! Encodes the `balanceOf` query and decodes the confirmation event a client
//! payment emits. Both go through the [`TransactionManager`]: balance reads
//! as `eth_call`, verification as an untracked receipt wait.

use alloy_primitives::{Log as PrimLog, LogData};
use alloy_sol_types::{sol, SolCall, SolEvent};
use async_trait::async_trait;
use gryd_config::ContractEvent;
use gryd_delivery::{TransactionError, TransactionManager};
use gryd_types::{truncate_id, Address, Log, TxRequest, B256, U256};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

// Payment contract ABI.
sol! {
	function balanceOf(address owner) external view returns (uint256);

	/// Emitted when a client pays for a data insertion.
	event InsertDataSuccess(address user, string queryType);

	/// Emitted by earlier contract versions on a storage purchase.
	event StorageBought(address buyer, string userName, uint256 size);
}

/// Errors that can occur while talking to the payment contract.
#[derive(Debug, Error)]
pub enum ContractError {
	/// No receipt could be obtained for the transaction.
	#[error("Event not found for transaction {0}")]
	EventNotFound(B256),
	/// A log from the contract carries no topics.
	#[error("Log of transaction {0} has no topic")]
	NoTopic(B256),
	/// No log matches the contract address and event signature.
	#[error("Event of transaction {0} cannot be processed or does not exist")]
	UnprocessableEvent(B256),
	#[error("Decode error: {0}")]
	Decode(String),
	#[error(transparent)]
	Transaction(#[from] TransactionError),
}

/// Decoded confirmation event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationEvent {
	InsertDataSuccess {
		user: Address,
		query_type: String,
	},
	StorageBought {
		buyer: Address,
		user_name: String,
		size: U256,
	},
}

impl ConfirmationEvent {
	/// The address that paid.
	pub fn principal(&self) -> Address {
		match self {
			ConfirmationEvent::InsertDataSuccess { user, .. } => *user,
			ConfirmationEvent::StorageBought { buyer, .. } => *buyer,
		}
	}
}

/// Topic 0 of the configured confirmation event.
pub fn event_signature(event: ContractEvent) -> B256 {
	match event {
		ContractEvent::InsertDataSuccess => InsertDataSuccess::SIGNATURE_HASH,
		ContractEvent::StorageBought => StorageBought::SIGNATURE_HASH,
	}
}

/// Operations the orchestrator needs from the payment contract.
#[async_trait]
pub trait ContractInterface: Send + Sync {
	/// Balance of `owner` as reported by `balanceOf`.
	async fn get_balance(&self, owner: Address) -> Result<U256, ContractError>;

	/// Waits for `tx_hash` and decodes its confirmation event.
	async fn verify_event(&self, tx_hash: B256) -> Result<ConfirmationEvent, ContractError>;
}

pub struct ContractClient {
	manager: Arc<TransactionManager>,
	address: Address,
	event: ContractEvent,
	receipt_timeout: Duration,
}

impl ContractClient {
	pub fn new(
		manager: Arc<TransactionManager>,
		address: Address,
		event: ContractEvent,
		receipt_timeout: Duration,
	) -> Self {
		Self {
			manager,
			address,
			event,
			receipt_timeout,
		}
	}

	pub fn address(&self) -> Address {
		self.address
	}
}

#[async_trait]
impl ContractInterface for ContractClient {
	async fn get_balance(&self, owner: Address) -> Result<U256, ContractError> {
		let data = balanceOfCall { owner }.abi_encode();
		let result = self
			.manager
			.call(&TxRequest::call(self.address, data))
			.await?;

		if result.is_empty() {
			return Err(ContractError::Decode("unexpected empty results".into()));
		}
		let decoded = balanceOfCall::abi_decode_returns(&result, true)
			.map_err(|e| ContractError::Decode(format!("Failed to decode balanceOf: {}", e)))?;
		Ok(decoded._0)
	}

	async fn verify_event(&self, tx_hash: B256) -> Result<ConfirmationEvent, ContractError> {
		let receipt = match self
			.manager
			.wait_for_external_receipt(tx_hash, self.receipt_timeout)
			.await
		{
			Ok(receipt) => receipt,
			Err(TransactionError::ReceiptTimeout(_)) => {
				tracing::warn!(tx_hash = %truncate_id(&tx_hash.to_string()), "No receipt for payment");
				return Err(ContractError::EventNotFound(tx_hash));
			},
			Err(e) => return Err(e.into()),
		};

		find_event(&receipt.logs, self.address, self.event, tx_hash)
	}
}

/// Scans every log for the configured event emitted by `address`.
///
/// The first log matching both address and topic 0 is decoded. A log from
/// `address` without topics only turns into [`ContractError::NoTopic`] when no
/// other log matches.
pub fn find_event(
	logs: &[Log],
	address: Address,
	event: ContractEvent,
	tx_hash: B256,
) -> Result<ConfirmationEvent, ContractError> {
	let signature = event_signature(event);
	let mut topicless = false;

	for log in logs.iter().filter(|log| log.address == address) {
		match log.topics.first() {
			Some(topic) if *topic == signature => return decode_event(log, event),
			Some(_) => {},
			None => topicless = true,
		}
	}

	if topicless {
		Err(ContractError::NoTopic(tx_hash))
	} else {
		Err(ContractError::UnprocessableEvent(tx_hash))
	}
}

fn decode_event(log: &Log, event: ContractEvent) -> Result<ConfirmationEvent, ContractError> {
	let prim_log = PrimLog {
		address: log.address,
		data: LogData::new_unchecked(log.topics.clone(), log.data.clone()),
	};

	match event {
		ContractEvent::InsertDataSuccess => {
			let decoded = InsertDataSuccess::decode_log(&prim_log, true).map_err(|e| {
				ContractError::Decode(format!("Failed to decode InsertDataSuccess: {}", e))
			})?;
			Ok(ConfirmationEvent::InsertDataSuccess {
				user: decoded.data.user,
				query_type: decoded.data.queryType,
			})
		},
		ContractEvent::StorageBought => {
			let decoded = StorageBought::decode_log(&prim_log, true).map_err(|e| {
				ContractError::Decode(format!("Failed to decode StorageBought: {}", e))
			})?;
			Ok(ConfirmationEvent::StorageBought {
				buyer: decoded.data.buyer,
				user_name: decoded.data.userName,
				size: decoded.data.size,
			})
		},
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use gryd_account::{implementations::local::create_account, AccountService};
	use gryd_delivery::{testing::FakeChain, ManagerSettings};
	use gryd_types::Bytes;

	const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

	fn contract_address() -> Address {
		"0x5FbDB2315678afecb367f032d93F642f64180aa3".parse().unwrap()
	}

	async fn client(chain: Arc<FakeChain>, event: ContractEvent) -> ContractClient {
		let config: toml::Value = toml::from_str(&format!("private_key = \"{}\"", DEV_KEY)).unwrap();
		let account = Arc::new(AccountService::new(create_account(&config).unwrap()));
		let manager = TransactionManager::new(chain, account, ManagerSettings::default())
			.await
			.unwrap();
		ContractClient::new(
			Arc::new(manager),
			contract_address(),
			event,
			Duration::from_secs(10),
		)
	}

	fn insert_log(address: Address, user: Address) -> Log {
		let data = InsertDataSuccess {
			user,
			queryType: "insert".into(),
		}
		.encode_log_data();
		Log {
			address,
			topics: data.topics().to_vec(),
			data: data.data,
		}
	}

	fn other_log(address: Address) -> Log {
		Log {
			address,
			topics: vec![B256::repeat_byte(0x01)],
			data: Bytes::new(),
		}
	}

	#[tokio::test]
	async fn test_get_balance_round_trip() {
		let chain = Arc::new(FakeChain::new(1));
		let amount = U256::from(100_000_000_000_000_000u64);
		chain.set_call_result(Ok(Bytes::from(amount.to_be_bytes::<32>().to_vec())));

		let client = client(chain.clone(), ContractEvent::InsertDataSuccess).await;
		assert_eq!(client.get_balance(Address::repeat_byte(0xab)).await.unwrap(), amount);
		assert_eq!(chain.calls("eth_call"), 1);
	}

	#[tokio::test]
	async fn test_get_balance_empty_result() {
		let chain = Arc::new(FakeChain::new(1));
		let client = client(chain, ContractEvent::InsertDataSuccess).await;
		assert!(matches!(
			client.get_balance(Address::ZERO).await,
			Err(ContractError::Decode(_))
		));
	}

	#[tokio::test]
	async fn test_get_balance_call_failure() {
		let chain = Arc::new(FakeChain::new(1));
		chain.set_call_result(Err("execution reverted".into()));
		let client = client(chain, ContractEvent::InsertDataSuccess).await;
		assert!(matches!(
			client.get_balance(Address::ZERO).await,
			Err(ContractError::Transaction(TransactionError::Call(_)))
		));
	}

	#[test]
	fn test_scan_skips_non_matching_first_log() {
		let user = Address::repeat_byte(0xab);
		let logs = vec![
			other_log(Address::repeat_byte(0x77)),
			other_log(contract_address()),
			insert_log(contract_address(), user),
		];

		let event = find_event(
			&logs,
			contract_address(),
			ContractEvent::InsertDataSuccess,
			B256::ZERO,
		)
		.unwrap();
		assert_eq!(event.principal(), user);
	}

	#[test]
	fn test_matching_topic_from_other_address_is_ignored() {
		let logs = vec![insert_log(Address::repeat_byte(0x77), Address::ZERO)];
		assert!(matches!(
			find_event(
				&logs,
				contract_address(),
				ContractEvent::InsertDataSuccess,
				B256::ZERO
			),
			Err(ContractError::UnprocessableEvent(_))
		));
	}

	#[test]
	fn test_topicless_log_reports_no_topic() {
		let logs = vec![Log {
			address: contract_address(),
			topics: vec![],
			data: Bytes::new(),
		}];
		assert!(matches!(
			find_event(
				&logs,
				contract_address(),
				ContractEvent::InsertDataSuccess,
				B256::ZERO
			),
			Err(ContractError::NoTopic(_))
		));
	}

	#[test]
	fn test_legacy_event_decoding() {
		let buyer = Address::repeat_byte(0xcd);
		let data = StorageBought {
			buyer,
			userName: "alice".into(),
			size: U256::from(4096),
		}
		.encode_log_data();
		let logs = vec![Log {
			address: contract_address(),
			topics: data.topics().to_vec(),
			data: data.data,
		}];

		let event = find_event(
			&logs,
			contract_address(),
			ContractEvent::StorageBought,
			B256::ZERO,
		)
		.unwrap();
		assert_eq!(
			event,
			ConfirmationEvent::StorageBought {
				buyer,
				user_name: "alice".into(),
				size: U256::from(4096),
			}
		);
	}

	#[test]
	fn test_truncated_event_data_is_a_decode_error() {
		let mut log = insert_log(contract_address(), Address::ZERO);
		log.data = Bytes::from(vec![0u8; 8]);
		assert!(matches!(
			find_event(
				&[log],
				contract_address(),
				ContractEvent::InsertDataSuccess,
				B256::ZERO
			),
			Err(ContractError::Decode(_))
		));
	}

	#[tokio::test(start_paused = true)]
	async fn test_verify_event_is_deterministic() {
		let chain = Arc::new(FakeChain::new(1));
		let tx_hash = B256::repeat_byte(0x99);
		let user = Address::repeat_byte(0xab);
		chain.include(tx_hash, true, vec![insert_log(contract_address(), user)]);

		let client = client(chain, ContractEvent::InsertDataSuccess).await;
		let first = client.verify_event(tx_hash).await.unwrap();
		let second = client.verify_event(tx_hash).await.unwrap();
		assert_eq!(first, second);
		assert_eq!(first.principal(), user);
	}

	#[tokio::test(start_paused = true)]
	async fn test_missing_receipt_is_event_not_found() {
		let chain = Arc::new(FakeChain::new(1));
		let client = client(chain, ContractEvent::InsertDataSuccess).await;
		assert!(matches!(
			client.verify_event(B256::repeat_byte(0x01)).await,
			Err(ContractError::EventNotFound(_))
		));
	}
}
