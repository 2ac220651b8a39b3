//! Storage namespaces used by the node.

use std::str::FromStr;

/// Namespaces of the key-value storage.
///
/// Each of the orchestrator's stores persists its documents under one
/// namespace, keeping keys of the form `namespace:id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
	/// Dataset rows, keyed by row id (content store).
	Records,
	/// Wallet to dataset key entries, keyed by dataset key.
	Ledger,
	/// Confirmation records, keyed by confirmation id (relational store).
	Confirmations,
}

impl StorageKey {
	pub fn as_str(&self) -> &'static str {
		match self {
			StorageKey::Records => "records",
			StorageKey::Ledger => "ledger",
			StorageKey::Confirmations => "confirmations",
		}
	}

	/// Iterates over all namespaces.
	pub fn all() -> impl Iterator<Item = Self> {
		[Self::Records, Self::Ledger, Self::Confirmations].into_iter()
	}
}

impl FromStr for StorageKey {
	type Err = ();

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"records" => Ok(Self::Records),
			"ledger" => Ok(Self::Ledger),
			"confirmations" => Ok(Self::Confirmations),
			_ => Err(()),
		}
	}
}

impl From<StorageKey> for &'static str {
	fn from(key: StorageKey) -> Self {
		key.as_str()
	}
}
