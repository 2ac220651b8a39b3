//! Verification gate in front of the stores.
//!
//! An upload is accepted only after the payment transaction it references has
//! emitted the configured confirmation event from the payment contract, and
//! the event names the wallet that claims the upload.

use crate::stores::{ConfirmationStore, ContentStore, LedgerStore};
use chrono::Utc;
use gryd_contract::{ContractError, ContractInterface};
use gryd_storage::StorageError;
use gryd_types::{
	truncate_id, Address, ConfirmationRecord, DatasetRow, LedgerEntry, RowInput, B256, U256,
};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;
use uuid::Uuid;

static WALLET_PATTERN: Lazy<Regex> =
	Lazy::new(|| Regex::new("^0x[0-9a-fA-F]{40}$").expect("wallet pattern is valid"));
static TX_HASH_PATTERN: Lazy<Regex> =
	Lazy::new(|| Regex::new("^0x([A-Fa-f0-9]{64})$").expect("tx hash pattern is valid"));

/// Errors returned by the orchestrator.
#[derive(Debug, Error)]
pub enum OrchestratorError {
	#[error("{0}")]
	Validation(String),
	#[error(transparent)]
	Contract(#[from] ContractError),
	#[error("cannot verify event for tx {tx_hash}")]
	Unauthorized { tx_hash: String, wallet: String },
	#[error("Record not found: {0}")]
	NotFound(String),
	#[error("Store error: {0}")]
	Store(#[from] StorageError),
}

/// Outward classification of an [`OrchestratorError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
	InvalidInput,
	NotFound,
	Unauthorized,
	Internal,
}

impl OrchestratorError {
	pub fn class(&self) -> ErrorClass {
		match self {
			OrchestratorError::Validation(_) => ErrorClass::InvalidInput,
			OrchestratorError::Contract(
				ContractError::EventNotFound(_)
				| ContractError::NoTopic(_)
				| ContractError::UnprocessableEvent(_),
			) => ErrorClass::NotFound,
			OrchestratorError::Contract(_) => ErrorClass::Internal,
			OrchestratorError::Unauthorized { .. } => ErrorClass::Unauthorized,
			OrchestratorError::NotFound(_) => ErrorClass::NotFound,
			OrchestratorError::Store(_) => ErrorClass::Internal,
		}
	}
}

/// Verifies payments and persists the uploads they pay for.
pub struct StorageOrchestrator {
	contract: Arc<dyn ContractInterface>,
	content: Arc<dyn ContentStore>,
	ledger: Arc<dyn LedgerStore>,
	confirmations: Arc<dyn ConfirmationStore>,
	node_address: Address,
}

impl StorageOrchestrator {
	pub fn new(
		contract: Arc<dyn ContractInterface>,
		content: Arc<dyn ContentStore>,
		ledger: Arc<dyn LedgerStore>,
		confirmations: Arc<dyn ConfirmationStore>,
		node_address: Address,
	) -> Self {
		Self {
			contract,
			content,
			ledger,
			confirmations,
			node_address,
		}
	}

	/// Verifies `tx_hash` as a payment by `wallet` and stores `rows`.
	///
	/// Both inputs are validated before the chain is contacted. The three
	/// writes happen in order (rows, ledger entry, confirmation) and are not
	/// rolled back when a later one fails.
	#[instrument(skip_all, fields(wallet = %wallet, tx_hash = %truncate_id(tx_hash)))]
	pub async fn create(
		&self,
		wallet: &str,
		tx_hash: &str,
		rows: Vec<RowInput>,
	) -> Result<ConfirmationRecord, OrchestratorError> {
		if !WALLET_PATTERN.is_match(wallet) {
			tracing::info!("Rejected invalid wallet address");
			return Err(OrchestratorError::Validation("invalid wallet address".into()));
		}
		if !TX_HASH_PATTERN.is_match(tx_hash) {
			tracing::info!("Rejected invalid tx hash");
			return Err(OrchestratorError::Validation("invalid tx hash".into()));
		}
		let hash: B256 = tx_hash
			.parse()
			.map_err(|_| OrchestratorError::Validation("invalid tx hash".into()))?;

		let event = self.contract.verify_event(hash).await?;
		let principal = event.principal();
		if !principal.to_string().eq_ignore_ascii_case(wallet) {
			tracing::info!(principal = %principal, "Event principal does not match wallet");
			return Err(OrchestratorError::Unauthorized {
				tx_hash: tx_hash.to_string(),
				wallet: wallet.to_string(),
			});
		}

		let dataset_key = Uuid::new_v4().to_string();
		let records: Vec<DatasetRow> = rows
			.into_iter()
			.map(|row| DatasetRow {
				id: Uuid::new_v4().to_string(),
				dataset: row.dataset,
				date: row.date,
				data_type: row.data_type,
				data: row.data,
				dataset_key: dataset_key.clone(),
			})
			.collect();

		self.content.add_records(&records).await?;
		self.ledger
			.record_ledger(&LedgerEntry {
				key: dataset_key.clone(),
				wallet: wallet.to_string(),
			})
			.await?;

		let confirmation = ConfirmationRecord {
			id: Uuid::new_v4().to_string(),
			wallet: wallet.to_string(),
			tx_hash: tx_hash.to_string(),
			created_at: Utc::now(),
			dataset_key,
		};
		self.confirmations.create_confirmation(&confirmation).await?;

		tracing::info!(
			dataset_key = %truncate_id(&confirmation.dataset_key),
			rows = records.len(),
			"Stored dataset"
		);
		Ok(confirmation)
	}

	/// Contract balance of the node's own signer address.
	pub async fn get_balance(&self) -> Result<U256, OrchestratorError> {
		Ok(self.contract.get_balance(self.node_address).await?)
	}

	pub async fn record_by_id(&self, id: &str) -> Result<DatasetRow, OrchestratorError> {
		match self.content.record_by_id(id).await {
			Ok(row) => Ok(row),
			Err(StorageError::NotFound) => Err(OrchestratorError::NotFound(id.to_string())),
			Err(e) => Err(e.into()),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::stores::{
		DocumentStore, MockConfirmationStore, MockContentStore, MockLedgerStore,
	};
	use alloy_sol_types::SolEvent;
	use gryd_account::{implementations::local::create_account, AccountService};
	use gryd_config::ContractEvent;
	use gryd_contract::{ContractClient, InsertDataSuccess};
	use gryd_delivery::{testing::FakeChain, ManagerSettings, TransactionManager};
	use gryd_storage::{implementations::memory::MemoryStorage, StorageService};
	use gryd_types::Log;
	use std::time::Duration;

	const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
	const TX_HASH: &str = "0x8f5b1b83c0126f5d3e2f468a0b0e9c1f241a3f5f0b8950e3d1de0e7bd7b0a9c4";

	fn contract_address() -> Address {
		"0x5FbDB2315678afecb367f032d93F642f64180aa3".parse().unwrap()
	}

	async fn contract(chain: Arc<FakeChain>) -> Arc<ContractClient> {
		let config: toml::Value = toml::from_str(&format!("private_key = \"{}\"", DEV_KEY)).unwrap();
		let account = Arc::new(AccountService::new(create_account(&config).unwrap()));
		let manager = TransactionManager::new(chain, account, ManagerSettings::default())
			.await
			.unwrap();
		Arc::new(ContractClient::new(
			Arc::new(manager),
			contract_address(),
			ContractEvent::InsertDataSuccess,
			Duration::from_secs(10),
		))
	}

	fn orchestrator(contract: Arc<dyn ContractInterface>, store: DocumentStore) -> StorageOrchestrator {
		let store = Arc::new(store);
		StorageOrchestrator::new(
			contract,
			store.clone(),
			store.clone(),
			store,
			Address::repeat_byte(0x11),
		)
	}

	fn document_store() -> DocumentStore {
		DocumentStore::new(Arc::new(StorageService::new(Box::new(MemoryStorage::new()))))
	}

	fn payment_log(user: Address) -> Log {
		let data = InsertDataSuccess {
			user,
			queryType: "insert".into(),
		}
		.encode_log_data();
		Log {
			address: contract_address(),
			topics: data.topics().to_vec(),
			data: data.data,
		}
	}

	fn rows() -> Vec<RowInput> {
		vec![
			RowInput {
				dataset: "weather".into(),
				date: "2024-01-01".into(),
				data_type: "temperature".into(),
				data: "21.5".into(),
			},
			RowInput {
				dataset: "weather".into(),
				date: "2024-01-02".into(),
				data_type: "temperature".into(),
				data: "19.0".into(),
			},
		]
	}

	#[tokio::test]
	async fn test_invalid_wallet_rejected_before_chain_access() {
		let chain = Arc::new(FakeChain::new(1));
		let orchestrator = orchestrator(contract(chain.clone()).await, document_store());
		let calls_before = chain.total_calls();

		let err = orchestrator
			.create("0xD07708adfbE343297E2ABfb31534dD3d78fg452a", TX_HASH, rows())
			.await
			.unwrap_err();
		assert_eq!(err.class(), ErrorClass::InvalidInput);
		assert_eq!(chain.total_calls(), calls_before);
	}

	#[tokio::test]
	async fn test_invalid_tx_hash_rejected() {
		let chain = Arc::new(FakeChain::new(1));
		let orchestrator = orchestrator(contract(chain.clone()).await, document_store());
		let calls_before = chain.total_calls();

		let err = orchestrator
			.create("0xabababababababababababababababababababab", "0x1234", rows())
			.await
			.unwrap_err();
		assert!(matches!(err, OrchestratorError::Validation(_)));
		assert_eq!(chain.total_calls(), calls_before);
	}

	#[tokio::test(start_paused = true)]
	async fn test_create_accepts_case_insensitive_wallet() {
		let chain = Arc::new(FakeChain::new(1));
		let user = Address::repeat_byte(0xab);
		chain.include(TX_HASH.parse().unwrap(), true, vec![payment_log(user)]);

		let store = document_store();
		let orchestrator = orchestrator(contract(chain).await, store.clone());
		let wallet = "0xABABABABABABABABABABABABABABABABABABABAB";

		let record = orchestrator.create(wallet, TX_HASH, rows()).await.unwrap();
		assert_eq!(record.wallet, wallet);
		assert_eq!(record.tx_hash, TX_HASH);
		assert_eq!(
			store.wallet_by_dataset_key(&record.dataset_key).await.unwrap(),
			wallet
		);
		assert_eq!(
			store.confirmation_by_id(&record.id).await.unwrap(),
			record
		);
	}

	#[tokio::test(start_paused = true)]
	async fn test_wallet_mismatch_is_unauthorized() {
		let chain = Arc::new(FakeChain::new(1));
		chain.include(
			TX_HASH.parse().unwrap(),
			true,
			vec![payment_log(Address::repeat_byte(0xcd))],
		);
		let orchestrator = orchestrator(contract(chain).await, document_store());

		let err = orchestrator
			.create("0xabababababababababababababababababababab", TX_HASH, rows())
			.await
			.unwrap_err();
		assert_eq!(err.class(), ErrorClass::Unauthorized);
	}

	#[tokio::test(start_paused = true)]
	async fn test_missing_receipt_is_not_found_class() {
		let chain = Arc::new(FakeChain::new(1));
		let orchestrator = orchestrator(contract(chain).await, document_store());

		let err = orchestrator
			.create("0xabababababababababababababababababababab", TX_HASH, rows())
			.await
			.unwrap_err();
		assert!(matches!(
			err,
			OrchestratorError::Contract(ContractError::EventNotFound(_))
		));
		assert_eq!(err.class(), ErrorClass::NotFound);
	}

	#[tokio::test(start_paused = true)]
	async fn test_ledger_failure_leaves_rows_and_skips_confirmation() {
		let chain = Arc::new(FakeChain::new(1));
		let user = Address::repeat_byte(0xab);
		chain.include(TX_HASH.parse().unwrap(), true, vec![payment_log(user)]);

		let mut content = MockContentStore::new();
		content
			.expect_add_records()
			.times(1)
			.returning(|rows| {
				assert_eq!(rows.len(), 2);
				Ok(())
			});
		let mut ledger = MockLedgerStore::new();
		ledger
			.expect_record_ledger()
			.times(1)
			.returning(|_| Err(StorageError::Backend("disk full".into())));
		let mut confirmations = MockConfirmationStore::new();
		confirmations.expect_create_confirmation().never();

		let orchestrator = StorageOrchestrator::new(
			contract(chain).await,
			Arc::new(content),
			Arc::new(ledger),
			Arc::new(confirmations),
			Address::ZERO,
		);
		let err = orchestrator
			.create(&user.to_string(), TX_HASH, rows())
			.await
			.unwrap_err();
		assert!(matches!(err, OrchestratorError::Store(_)));
		assert_eq!(err.class(), ErrorClass::Internal);
	}

	#[tokio::test]
	async fn test_balance_reads_contract() {
		let chain = Arc::new(FakeChain::new(1));
		let amount = U256::from(42u64);
		chain.set_call_result(Ok(amount.to_be_bytes::<32>().to_vec().into()));
		let orchestrator = orchestrator(contract(chain.clone()).await, document_store());

		assert_eq!(orchestrator.get_balance().await.unwrap(), amount);
		assert_eq!(chain.calls("eth_call"), 1);
	}

	#[tokio::test]
	async fn test_unknown_record_is_not_found() {
		let chain = Arc::new(FakeChain::new(1));
		let orchestrator = orchestrator(contract(chain).await, document_store());

		let err = orchestrator.record_by_id("missing").await.unwrap_err();
		assert_eq!(err.class(), ErrorClass::NotFound);
	}
}
