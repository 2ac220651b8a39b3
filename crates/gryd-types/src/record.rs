//! Documents written by the storage orchestrator.
//!
//! One upload produces many [`DatasetRow`]s in the content store, a single
//! [`LedgerEntry`] and a single [`ConfirmationRecord`], all joined by the
//! dataset key minted for that upload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One CSV row of an uploaded dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetRow {
	pub id: String,
	pub dataset: String,
	pub date: String,
	pub data_type: String,
	pub data: String,
	pub dataset_key: String,
}

/// Raw row as parsed from the upload, before ids are assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowInput {
	pub dataset: String,
	pub date: String,
	pub data_type: String,
	pub data: String,
}

/// Maps a dataset key to the wallet that paid for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
	pub key: String,
	pub wallet: String,
}

/// Proof that a verified payment produced a stored dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationRecord {
	pub id: String,
	pub wallet: String,
	pub tx_hash: String,
	pub created_at: DateTime<Utc>,
	pub dataset_key: String,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_confirmation_record_json_shape() {
		let record = ConfirmationRecord {
			id: "id-1".into(),
			wallet: "0xabc".into(),
			tx_hash: "0x01".into(),
			created_at: DateTime::from_timestamp(0, 0).unwrap(),
			dataset_key: "key-1".into(),
		};
		let value = serde_json::to_value(&record).unwrap();
		assert_eq!(value["txHash"], "0x01");
		assert_eq!(value["datasetKey"], "key-1");
		assert!(value.get("createdAt").is_some());
	}
}
