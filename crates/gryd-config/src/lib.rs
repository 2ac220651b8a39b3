//! Configuration for the gryd storage node.
//!
//! Configuration is read from TOML. String values may reference environment
//! variables as `${VAR}` or `${VAR:-default}`, which keeps the signer key out
//! of the file itself.
//!
//! ## Modular Configuration Support
//!
//! A file may pull in others with `include = ["chain.toml", "storage.toml"]`.
//! Every top-level section must be defined in exactly one file.

mod loader;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	#[error("Configuration error: {0}")]
	Parse(String),
	#[error("Validation error: {0}")]
	Validation(String),
}

impl From<toml::de::Error> for ConfigError {
	fn from(err: toml::de::Error) -> Self {
		// The default Display dumps the whole input.
		ConfigError::Parse(err.message().to_string())
	}
}

/// Top-level node configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	/// Identity of this node instance.
	pub node: NodeConfig,
	/// JSON-RPC endpoint and transaction manager tuning.
	pub chain: ChainConfig,
	/// Signer implementations.
	pub account: AccountConfig,
	/// Payment contract.
	pub contract: ContractConfig,
	/// Key-value storage backing the content store, ledger and confirmations.
	pub storage: StorageConfig,
	/// HTTP API server.
	#[serde(default)]
	pub api: ApiConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NodeConfig {
	pub id: String,
}

/// Chain connection and transaction manager settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChainConfig {
	/// HTTP JSON-RPC endpoint.
	pub rpc_url: String,
	/// Interval between receipt polls.
	#[serde(default = "default_poll_interval_seconds")]
	pub poll_interval_seconds: u64,
	/// Deadline for receipt waits, including payment verification.
	#[serde(default = "default_receipt_timeout_seconds")]
	pub receipt_timeout_seconds: u64,
	/// Floor for estimated gas limits.
	#[serde(default)]
	pub min_estimated_gas_limit: u64,
	/// Percentage added on top of suggested fees.
	#[serde(default)]
	pub tip_boost_percent: u64,
}

fn default_poll_interval_seconds() -> u64 {
	2
}

fn default_receipt_timeout_seconds() -> u64 {
	120
}

/// Signer configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccountConfig {
	/// Which implementation signs transactions.
	pub primary: String,
	/// Implementation name to its raw configuration table.
	pub implementations: HashMap<String, toml::Value>,
}

/// Confirmation event emitted by the payment contract.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractEvent {
	/// `InsertDataSuccess(address user, string queryType)`
	#[default]
	InsertDataSuccess,
	/// Legacy `StorageBought(address buyer, string userName, uint256 size)`
	StorageBought,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ContractConfig {
	/// Contract address, 0x-prefixed.
	pub address: String,
	#[serde(default)]
	pub event: ContractEvent,
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
	/// Which implementation to use.
	pub primary: String,
	/// Implementation name to its raw configuration table.
	pub implementations: HashMap<String, toml::Value>,
	/// Interval in seconds between expired-entry sweeps.
	pub cleanup_interval_seconds: u64,
}

/// HTTP API server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
	#[serde(default = "default_api_host")]
	pub host: String,
	#[serde(default = "default_api_port")]
	pub port: u16,
	/// Request timeout in seconds.
	#[serde(default = "default_api_timeout")]
	pub timeout_seconds: u64,
	/// Maximum request body size in bytes, bounds CSV uploads.
	#[serde(default = "default_max_request_size")]
	pub max_request_size: usize,
	pub cors: Option<CorsConfig>,
}

impl Default for ApiConfig {
	fn default() -> Self {
		Self {
			host: default_api_host(),
			port: default_api_port(),
			timeout_seconds: default_api_timeout(),
			max_request_size: default_max_request_size(),
			cors: None,
		}
	}
}

/// CORS configuration. Absent means permissive.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CorsConfig {
	pub allowed_origins: Vec<String>,
	pub allowed_headers: Vec<String>,
	pub allowed_methods: Vec<String>,
}

fn default_api_host() -> String {
	"127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
	3000
}

fn default_api_timeout() -> u64 {
	// Covers a full receipt wait during /storage/create.
	180
}

fn default_max_request_size() -> usize {
	10 * 1024 * 1024
}

/// Resolves `${VAR}` and `${VAR:-default}` references in `input`.
///
/// Input is limited to 1MB to bound regex work.
pub(crate) fn resolve_env_vars(input: &str) -> Result<String, ConfigError> {
	const MAX_INPUT_SIZE: usize = 1024 * 1024;
	if input.len() > MAX_INPUT_SIZE {
		return Err(ConfigError::Validation(format!(
			"Configuration file too large: {} bytes (max: {} bytes)",
			input.len(),
			MAX_INPUT_SIZE
		)));
	}

	let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]{0,127})(?::-([^}]{0,256}))?\}")
		.map_err(|e| ConfigError::Parse(format!("Regex error: {}", e)))?;

	let mut result = String::with_capacity(input.len());
	let mut last = 0;
	for cap in re.captures_iter(input) {
		let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
			continue;
		};
		let value = match std::env::var(var_name.as_str()) {
			Ok(v) => v,
			Err(_) => match cap.get(2) {
				Some(default) => default.as_str().to_string(),
				None => {
					return Err(ConfigError::Validation(format!(
						"Environment variable '{}' not found",
						var_name.as_str()
					)))
				},
			},
		};
		result.push_str(&input[last..full_match.start()]);
		result.push_str(&value);
		last = full_match.end();
	}
	result.push_str(&input[last..]);

	Ok(result)
}

fn is_hex_address(value: &str) -> bool {
	value.len() == 42
		&& value.starts_with("0x")
		&& value[2..].chars().all(|c| c.is_ascii_hexdigit())
}

impl Config {
	/// Loads configuration from `path`, following includes.
	pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();
		let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
		let file_name = path
			.file_name()
			.ok_or_else(|| ConfigError::Validation(format!("Invalid path: {}", path.display())))?;

		let mut loader = loader::ConfigLoader::new(base_dir);
		loader.load_config(file_name).await
	}

	/// Checks cross-field constraints serde cannot express.
	fn validate(&self) -> Result<(), ConfigError> {
		if self.node.id.is_empty() {
			return Err(ConfigError::Validation("Node ID cannot be empty".into()));
		}

		if !(self.chain.rpc_url.starts_with("http://") || self.chain.rpc_url.starts_with("https://"))
		{
			return Err(ConfigError::Validation(format!(
				"chain.rpc_url must be an http(s) URL, got '{}'",
				self.chain.rpc_url
			)));
		}
		if self.chain.poll_interval_seconds == 0 {
			return Err(ConfigError::Validation(
				"chain.poll_interval_seconds must be at least 1".into(),
			));
		}
		if self.chain.receipt_timeout_seconds < self.chain.poll_interval_seconds {
			return Err(ConfigError::Validation(
				"chain.receipt_timeout_seconds must not be shorter than the poll interval".into(),
			));
		}

		if self.account.implementations.is_empty() {
			return Err(ConfigError::Validation(
				"At least one account implementation must be configured".into(),
			));
		}
		if !self.account.implementations.contains_key(&self.account.primary) {
			return Err(ConfigError::Validation(format!(
				"Primary account '{}' not found in implementations",
				self.account.primary
			)));
		}

		if !is_hex_address(&self.contract.address) {
			return Err(ConfigError::Validation(format!(
				"contract.address is not a 0x-prefixed 20 byte address: '{}'",
				self.contract.address
			)));
		}

		if self.storage.implementations.is_empty() {
			return Err(ConfigError::Validation(
				"At least one storage implementation must be configured".into(),
			));
		}
		if !self.storage.implementations.contains_key(&self.storage.primary) {
			return Err(ConfigError::Validation(format!(
				"Primary storage '{}' not found in implementations",
				self.storage.primary
			)));
		}
		if self.storage.cleanup_interval_seconds == 0 {
			return Err(ConfigError::Validation(
				"storage.cleanup_interval_seconds must be at least 1".into(),
			));
		}

		Ok(())
	}
}

/// Parses a TOML string, resolving environment variables, then validates it.
impl FromStr for Config {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let resolved = resolve_env_vars(s)?;
		let config: Config = toml::from_str(&resolved)?;
		config.validate()?;
		Ok(config)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const BASE_CONFIG: &str = r#"
[node]
id = "gryd-test"

[chain]
rpc_url = "http://localhost:8545"

[account]
primary = "local"
[account.implementations.local]
private_key = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80"

[contract]
address = "0x5FbDB2315678afecb367f032d93F642f64180aa3"

[storage]
primary = "memory"
cleanup_interval_seconds = 3600
[storage.implementations.memory]
"#;

	#[test]
	fn test_env_var_resolution() {
		std::env::set_var("GRYD_TEST_HOST", "localhost");
		std::env::set_var("GRYD_TEST_PORT", "8545");

		let input = "rpc_url = \"http://${GRYD_TEST_HOST}:${GRYD_TEST_PORT}\"";
		let result = resolve_env_vars(input).unwrap();
		assert_eq!(result, "rpc_url = \"http://localhost:8545\"");

		std::env::remove_var("GRYD_TEST_HOST");
		std::env::remove_var("GRYD_TEST_PORT");
	}

	#[test]
	fn test_env_var_with_default() {
		let input = "value = \"${GRYD_MISSING_VAR:-fallback}\"";
		assert_eq!(resolve_env_vars(input).unwrap(), "value = \"fallback\"");
	}

	#[test]
	fn test_missing_env_var_error() {
		let err = resolve_env_vars("value = \"${GRYD_MISSING_VAR}\"").unwrap_err();
		assert!(err.to_string().contains("GRYD_MISSING_VAR"));
	}

	#[test]
	fn test_base_config_defaults() {
		let config: Config = BASE_CONFIG.parse().unwrap();
		assert_eq!(config.node.id, "gryd-test");
		assert_eq!(config.chain.poll_interval_seconds, 2);
		assert_eq!(config.chain.receipt_timeout_seconds, 120);
		assert_eq!(config.chain.tip_boost_percent, 0);
		assert_eq!(config.contract.event, ContractEvent::InsertDataSuccess);
		assert_eq!(config.api.port, 3000);
		assert!(config.api.cors.is_none());
	}

	#[test]
	fn test_legacy_event_selection() {
		let config_str = BASE_CONFIG.replace(
			"[contract]\n",
			"[contract]\nevent = \"storage_bought\"\n",
		);
		let config: Config = config_str.parse().unwrap();
		assert_eq!(config.contract.event, ContractEvent::StorageBought);
	}

	#[test]
	fn test_invalid_contract_address_rejected() {
		let config_str = BASE_CONFIG.replace(
			"0x5FbDB2315678afecb367f032d93F642f64180aa3",
			"0xD07708adfbE343297E2ABfb31534dD3d78fg452a",
		);
		let err = config_str.parse::<Config>().unwrap_err();
		assert!(err.to_string().contains("contract.address"));
	}

	#[test]
	fn test_missing_primary_storage_rejected() {
		let config_str = BASE_CONFIG.replace("primary = \"memory\"", "primary = \"file\"");
		let err = config_str.parse::<Config>().unwrap_err();
		assert!(err.to_string().contains("Primary storage 'file'"));
	}

	#[test]
	fn test_non_http_rpc_url_rejected() {
		let config_str = BASE_CONFIG.replace("http://localhost:8545", "ws://localhost:8546");
		assert!(config_str.parse::<Config>().is_err());
	}

	#[test]
	fn test_private_key_from_env() {
		std::env::set_var("GRYD_TEST_PRIVATE_KEY", "0x01");
		let config_str = BASE_CONFIG.replace(
			"\"0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80\"",
			"\"${GRYD_TEST_PRIVATE_KEY}\"",
		);
		let config: Config = config_str.parse().unwrap();
		let key = config.account.implementations["local"]
			.get("private_key")
			.and_then(|v| v.as_str())
			.unwrap()
			.to_string();
		assert_eq!(key, "0x01");
		std::env::remove_var("GRYD_TEST_PRIVATE_KEY");
	}
}
