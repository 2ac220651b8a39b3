//! Stores written by the orchestrator.
//!
//! Each store is a trait so the orchestrator can be driven with doubles;
//! [`DocumentStore`] implements all three on top of [`StorageService`].

use async_trait::async_trait;
use gryd_storage::{StorageError, StorageService};
use gryd_types::{ConfirmationRecord, DatasetRow, LedgerEntry, StorageKey};
use std::sync::Arc;

/// Content store holding uploaded dataset rows.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContentStore: Send + Sync {
	/// Writes every row; rows written before a failure stay written.
	async fn add_records(&self, rows: &[DatasetRow]) -> Result<(), StorageError>;

	async fn record_by_id(&self, id: &str) -> Result<DatasetRow, StorageError>;
}

/// Ledger mapping dataset keys to paying wallets.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerStore: Send + Sync {
	async fn record_ledger(&self, entry: &LedgerEntry) -> Result<(), StorageError>;

	async fn wallet_by_dataset_key(&self, key: &str) -> Result<String, StorageError>;
}

/// Relational store of confirmation records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConfirmationStore: Send + Sync {
	async fn create_confirmation(&self, record: &ConfirmationRecord) -> Result<(), StorageError>;

	async fn confirmation_by_id(&self, id: &str) -> Result<ConfirmationRecord, StorageError>;
}

/// JSON documents in the `records`, `ledger` and `confirmations` namespaces.
#[derive(Clone)]
pub struct DocumentStore {
	storage: Arc<StorageService>,
}

impl DocumentStore {
	pub fn new(storage: Arc<StorageService>) -> Self {
		Self { storage }
	}
}

#[async_trait]
impl ContentStore for DocumentStore {
	async fn add_records(&self, rows: &[DatasetRow]) -> Result<(), StorageError> {
		for row in rows {
			self.storage.store(StorageKey::Records, &row.id, row).await?;
		}
		Ok(())
	}

	async fn record_by_id(&self, id: &str) -> Result<DatasetRow, StorageError> {
		self.storage.retrieve(StorageKey::Records, id).await
	}
}

#[async_trait]
impl LedgerStore for DocumentStore {
	async fn record_ledger(&self, entry: &LedgerEntry) -> Result<(), StorageError> {
		self.storage
			.store(StorageKey::Ledger, &entry.key, entry)
			.await
	}

	async fn wallet_by_dataset_key(&self, key: &str) -> Result<String, StorageError> {
		let entry: LedgerEntry = self.storage.retrieve(StorageKey::Ledger, key).await?;
		Ok(entry.wallet)
	}
}

#[async_trait]
impl ConfirmationStore for DocumentStore {
	async fn create_confirmation(&self, record: &ConfirmationRecord) -> Result<(), StorageError> {
		self.storage
			.store(StorageKey::Confirmations, &record.id, record)
			.await
	}

	async fn confirmation_by_id(&self, id: &str) -> Result<ConfirmationRecord, StorageError> {
		self.storage.retrieve(StorageKey::Confirmations, id).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use gryd_storage::implementations::memory::MemoryStorage;

	fn store() -> DocumentStore {
		DocumentStore::new(Arc::new(StorageService::new(Box::new(MemoryStorage::new()))))
	}

	fn row(id: &str) -> DatasetRow {
		DatasetRow {
			id: id.into(),
			dataset: "weather".into(),
			date: "2024-01-01".into(),
			data_type: "temperature".into(),
			data: "21.5".into(),
			dataset_key: "key-1".into(),
		}
	}

	#[tokio::test]
	async fn test_rows_are_addressable_by_id() {
		let store = store();
		store.add_records(&[row("a"), row("b")]).await.unwrap();

		assert_eq!(store.record_by_id("b").await.unwrap(), row("b"));
		assert!(matches!(
			store.record_by_id("c").await,
			Err(StorageError::NotFound)
		));
	}

	#[tokio::test]
	async fn test_ledger_resolves_wallet() {
		let store = store();
		let entry = LedgerEntry {
			key: "key-1".into(),
			wallet: "0xabcdef".into(),
		};
		store.record_ledger(&entry).await.unwrap();
		assert_eq!(store.wallet_by_dataset_key("key-1").await.unwrap(), "0xabcdef");
	}
}
