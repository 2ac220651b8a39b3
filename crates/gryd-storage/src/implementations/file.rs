//! File-based storage backend.
//!
//! Each key is one file under `storage_path`. Every file starts with a
//! 64 byte header carrying the expiry time so that TTLs survive restarts.

use crate::{StorageError, StorageInterface};
use async_trait::async_trait;
use gryd_types::{
	current_timestamp, ConfigSchema, Field, FieldType, Schema, StorageKey, ValidationError,
};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;

#[allow(clippy::doc_nested_refdefs)]
/// Fixed-size file header.
///
/// Binary layout (64 bytes total):
/// - [0-3]: Magic bytes "GRYD"
/// - [4-5]: Version (u16, little-endian)
/// - [6-13]: Expiration timestamp (u64, little-endian, Unix seconds, 0 = never)
/// - [14-63]: Reserved
#[derive(Debug, Clone, PartialEq, Eq)]
struct FileHeader {
	version: u16,
	expires_at: u64,
}

impl FileHeader {
	const MAGIC: &'static [u8; 4] = b"GRYD";
	const VERSION: u16 = 1;
	const SIZE: usize = 64;

	fn new(ttl: Duration) -> Self {
		let expires_at = if ttl.is_zero() {
			0
		} else {
			current_timestamp().saturating_add(ttl.as_secs())
		};
		Self {
			version: Self::VERSION,
			expires_at,
		}
	}

	fn serialize(&self) -> [u8; Self::SIZE] {
		let mut bytes = [0u8; Self::SIZE];
		bytes[0..4].copy_from_slice(Self::MAGIC);
		bytes[4..6].copy_from_slice(&self.version.to_le_bytes());
		bytes[6..14].copy_from_slice(&self.expires_at.to_le_bytes());
		bytes
	}

	fn deserialize(bytes: &[u8]) -> Result<Self, StorageError> {
		if bytes.len() < Self::SIZE {
			return Err(StorageError::Backend("File too small for header".into()));
		}
		if &bytes[0..4] != Self::MAGIC {
			return Err(StorageError::Backend("Missing file header".into()));
		}

		let version = u16::from_le_bytes([bytes[4], bytes[5]]);
		if version > Self::VERSION {
			return Err(StorageError::Backend(format!(
				"Unsupported file version: {}",
				version
			)));
		}

		let mut expires_bytes = [0u8; 8];
		expires_bytes.copy_from_slice(&bytes[6..14]);

		Ok(Self {
			version,
			expires_at: u64::from_le_bytes(expires_bytes),
		})
	}

	fn is_expired(&self) -> bool {
		self.expires_at != 0 && current_timestamp() >= self.expires_at
	}
}

/// Entries written without a TTL never expire.
pub struct FileStorage {
	base_path: PathBuf,
}

impl FileStorage {
	pub fn new(base_path: PathBuf) -> Self {
		Self { base_path }
	}

	/// Maps a key to a filesystem-safe path with a `.bin` extension.
	fn file_path(&self, key: &str) -> PathBuf {
		let safe_key = key.replace(['/', ':', '\\'], "_");
		self.base_path.join(format!("{}.bin", safe_key))
	}
}

#[async_trait]
impl StorageInterface for FileStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		let data = match fs::read(self.file_path(key)).await {
			Ok(data) => data,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				return Err(StorageError::NotFound)
			},
			Err(e) => return Err(StorageError::Backend(e.to_string())),
		};

		let header = FileHeader::deserialize(&data)?;
		if header.is_expired() {
			return Err(StorageError::NotFound);
		}
		Ok(data[FileHeader::SIZE..].to_vec())
	}

	async fn set_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<(), StorageError> {
		let path = self.file_path(key);
		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent)
				.await
				.map_err(|e| StorageError::Backend(e.to_string()))?;
		}

		let header = FileHeader::new(ttl.unwrap_or(Duration::ZERO));
		let mut file_data = Vec::with_capacity(FileHeader::SIZE + value.len());
		file_data.extend_from_slice(&header.serialize());
		file_data.extend_from_slice(&value);

		// Readers never observe a partially written file.
		let temp_path = path.with_extension("tmp");
		fs::write(&temp_path, file_data)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;
		fs::rename(&temp_path, &path)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		match fs::remove_file(self.file_path(key)).await {
			Ok(_) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(StorageError::Backend(e.to_string())),
		}
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		match self.get_bytes(key).await {
			Ok(_) => Ok(true),
			Err(StorageError::NotFound) => Ok(false),
			Err(e) => Err(e),
		}
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(FileStorageSchema)
	}

	async fn cleanup_expired(&self) -> Result<usize, StorageError> {
		let mut entries = match fs::read_dir(&self.base_path).await {
			Ok(entries) => entries,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
			Err(e) => return Err(StorageError::Backend(e.to_string())),
		};

		let mut removed = 0;
		while let Some(entry) = entries
			.next_entry()
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?
		{
			let path = entry.path();
			if path.extension() != Some(std::ffi::OsStr::new("bin")) {
				continue;
			}
			let expired = match fs::read(&path).await {
				Ok(data) => FileHeader::deserialize(&data).is_ok_and(|h| h.is_expired()),
				Err(e) => {
					tracing::debug!(path = ?path, error = %e, "Skipping unreadable file");
					false
				},
			};
			if expired {
				match fs::remove_file(&path).await {
					Ok(_) => removed += 1,
					Err(e) => tracing::warn!(path = ?path, error = %e, "Failed to remove expired file"),
				}
			}
		}
		Ok(removed)
	}
}

/// Configuration schema for FileStorage.
pub struct FileStorageSchema;

impl ConfigSchema for FileStorageSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let mut optional_fields = vec![Field::new("storage_path", FieldType::String)];
		// Document namespaces are durable.
		for storage_key in StorageKey::all() {
			optional_fields.push(
				Field::new(
					format!("ttl_{}", storage_key.as_str()),
					FieldType::Integer {
						min: Some(0),
						max: None,
					},
				)
				.with_validator(|value| match value.as_integer() {
					Some(0) => Ok(()),
					_ => Err("namespace documents never expire; ttl must be 0".to_string()),
				}),
			);
		}

		Schema::new(vec![], optional_fields).validate(config)
	}
}

/// Factory function to create a file storage backend from configuration.
///
/// Configuration parameters:
/// - `storage_path`: base directory (default: "./data/storage")
/// - `ttl_records`, `ttl_ledger`, `ttl_confirmations`: accepted only as 0
pub fn create_storage(config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	FileStorageSchema
		.validate(config)
		.map_err(|e| StorageError::Configuration(e.to_string()))?;

	let storage_path = config
		.get("storage_path")
		.and_then(|v| v.as_str())
		.unwrap_or("./data/storage");

	Ok(Box::new(FileStorage::new(PathBuf::from(storage_path))))
}

/// Registry for the file storage implementation.
pub struct Registry;

impl gryd_types::ImplementationRegistry for Registry {
	const NAME: &'static str = "file";
	type Factory = crate::StorageFactory;

	fn factory() -> Self::Factory {
		create_storage
	}
}

impl crate::StorageRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	fn storage(dir: &TempDir, extra: &str) -> Box<dyn StorageInterface> {
		let config: toml::Value = toml::from_str(&format!(
			"storage_path = \"{}\"\n{}",
			dir.path().display(),
			extra
		))
		.unwrap();
		create_storage(&config).unwrap()
	}

	#[test]
	fn test_header_round_trip() {
		let header = FileHeader::new(Duration::from_secs(60));
		let parsed = FileHeader::deserialize(&header.serialize()).unwrap();
		assert_eq!(parsed, header);
		assert!(!parsed.is_expired());
	}

	#[test]
	fn test_headerless_file_rejected() {
		assert!(FileHeader::deserialize(&[0u8; 80]).is_err());
		assert!(FileHeader::deserialize(b"GRYD").is_err());
	}

	#[tokio::test]
	async fn test_persists_across_instances() {
		let dir = TempDir::new().unwrap();
		storage(&dir, "")
			.set_bytes("confirmations:abc", b"{}".to_vec(), None)
			.await
			.unwrap();

		let reopened = storage(&dir, "");
		assert_eq!(reopened.get_bytes("confirmations:abc").await.unwrap(), b"{}");
		assert!(dir.path().join("confirmations_abc.bin").exists());
	}

	#[tokio::test]
	async fn test_expired_entries_hidden_and_cleaned() {
		let dir = TempDir::new().unwrap();
		let storage = storage(&dir, "");

		// Write a header that expired in the past.
		let mut data = FileHeader {
			version: FileHeader::VERSION,
			expires_at: 1,
		}
		.serialize()
		.to_vec();
		data.extend_from_slice(b"old");
		std::fs::write(dir.path().join("records_old.bin"), data).unwrap();
		storage
			.set_bytes("records:new", b"new".to_vec(), None)
			.await
			.unwrap();

		assert!(!storage.exists("records:old").await.unwrap());
		assert!(matches!(
			storage.get_bytes("records:old").await,
			Err(StorageError::NotFound)
		));
		assert_eq!(storage.cleanup_expired().await.unwrap(), 1);
		assert!(storage.exists("records:new").await.unwrap());
	}

	#[tokio::test]
	async fn test_documents_written_without_expiry() {
		let dir = TempDir::new().unwrap();
		let storage = storage(&dir, "ttl_ledger = 0");
		storage
			.set_bytes("ledger:k", b"x".to_vec(), None)
			.await
			.unwrap();

		let raw = std::fs::read(dir.path().join("ledger_k.bin")).unwrap();
		assert_eq!(FileHeader::deserialize(&raw).unwrap().expires_at, 0);
	}

	#[test]
	fn test_namespace_ttl_rejected() {
		for key in ["ttl_records", "ttl_ledger", "ttl_confirmations"] {
			let config: toml::Value = toml::from_str(&format!("{} = 60", key)).unwrap();
			assert!(matches!(
				create_storage(&config),
				Err(StorageError::Configuration(message)) if message.contains(key)
			));
		}
	}

	#[test]
	fn test_negative_ttl_rejected() {
		let config: toml::Value = toml::from_str("ttl_records = -1").unwrap();
		assert!(matches!(
			create_storage(&config),
			Err(StorageError::Configuration(_))
		));
	}

	#[tokio::test]
	async fn test_cleanup_without_directory() {
		let dir = TempDir::new().unwrap();
		let config: toml::Value = toml::from_str(&format!(
			"storage_path = \"{}\"",
			dir.path().join("missing").display()
		))
		.unwrap();
		let storage = create_storage(&config).unwrap();
		assert_eq!(storage.cleanup_expired().await.unwrap(), 0);
	}
}
