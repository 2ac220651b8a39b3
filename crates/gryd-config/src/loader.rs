//! Multi-file configuration loading.
//!
//! Files may name others through a top-level `include` key (a string or an
//! array of strings, relative to the including file's directory). Included
//! files may include further files. A top-level section may only be defined
//! once across the whole include tree.

use crate::{resolve_env_vars, Config, ConfigError};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

pub(crate) struct ConfigLoader {
	base_path: PathBuf,
	/// Canonical paths already visited.
	visited: HashSet<PathBuf>,
	/// Section name to the file that defined it.
	section_sources: HashMap<String, PathBuf>,
}

impl ConfigLoader {
	pub(crate) fn new(base_path: impl AsRef<Path>) -> Self {
		Self {
			base_path: base_path.as_ref().to_path_buf(),
			visited: HashSet::new(),
			section_sources: HashMap::new(),
		}
	}

	/// Loads `config_path` and everything it includes into one validated [`Config`].
	pub(crate) async fn load_config(
		&mut self,
		config_path: impl AsRef<Path>,
	) -> Result<Config, ConfigError> {
		let path = resolve_path(&self.base_path, config_path.as_ref())?;
		let mut combined = toml::Table::new();
		self.merge_file(&path, &mut combined).await?;

		let serialized = toml::to_string(&combined).map_err(|e| {
			ConfigError::Parse(format!("Failed to serialize combined config: {}", e))
		})?;
		serialized.parse()
	}

	async fn merge_file(&mut self, path: &Path, into: &mut toml::Table) -> Result<(), ConfigError> {
		let canonical = path.canonicalize().map_err(|e| {
			ConfigError::Io(std::io::Error::new(
				std::io::ErrorKind::NotFound,
				format!("Cannot resolve path {}: {}", path.display(), e),
			))
		})?;
		if !self.visited.insert(canonical.clone()) {
			return Err(ConfigError::Validation(format!(
				"Circular include detected: {} was already loaded",
				canonical.display()
			)));
		}

		let content = tokio::fs::read_to_string(path).await?;
		let mut table: toml::Table = toml::from_str(&resolve_env_vars(&content)?)?;
		let includes = extract_includes(table.remove("include"))?;

		for (key, value) in table {
			if let Some(existing) = self.section_sources.get(&key) {
				return Err(ConfigError::Validation(format!(
					"Duplicate section '{}' found in {} and {}. \
					Each top-level section must be unique across all configuration files.",
					key,
					existing.display(),
					path.display()
				)));
			}
			self.section_sources.insert(key.clone(), path.to_path_buf());
			into.insert(key, value);
		}

		let dir = path.parent().unwrap_or(&self.base_path).to_path_buf();
		for include in includes {
			let resolved = resolve_path(&dir, &include)?;
			Box::pin(self.merge_file(&resolved, into)).await?;
		}

		Ok(())
	}
}

fn extract_includes(value: Option<toml::Value>) -> Result<Vec<PathBuf>, ConfigError> {
	match value {
		None => Ok(Vec::new()),
		Some(toml::Value::String(path)) => Ok(vec![PathBuf::from(path)]),
		Some(toml::Value::Array(items)) => items
			.into_iter()
			.map(|item| match item {
				toml::Value::String(path) => Ok(PathBuf::from(path)),
				_ => Err(ConfigError::Validation(
					"Include array must contain only strings".into(),
				)),
			})
			.collect(),
		Some(_) => Err(ConfigError::Validation(
			"Include must be a string or array of strings".into(),
		)),
	}
}

fn resolve_path(base: &Path, path: &Path) -> Result<PathBuf, ConfigError> {
	let resolved = if path.is_absolute() {
		path.to_path_buf()
	} else {
		base.join(path)
	};

	if !resolved.exists() {
		return Err(ConfigError::Io(std::io::Error::new(
			std::io::ErrorKind::NotFound,
			format!("Configuration file not found: {}", resolved.display()),
		)));
	}

	Ok(resolved)
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::fs;
	use tempfile::TempDir;

	const NODE_AND_CHAIN: &str = r#"
[node]
id = "gryd-include-test"

[chain]
rpc_url = "http://localhost:8545"
poll_interval_seconds = 1
receipt_timeout_seconds = 30
"#;

	const ACCOUNT_AND_CONTRACT: &str = r#"
[account]
primary = "local"
[account.implementations.local]
private_key = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80"

[contract]
address = "0x5FbDB2315678afecb367f032d93F642f64180aa3"
event = "storage_bought"
"#;

	const STORAGE: &str = r#"
[storage]
primary = "memory"
cleanup_interval_seconds = 60
[storage.implementations.memory]
"#;

	#[tokio::test]
	async fn test_single_file_config() {
		let temp_dir = TempDir::new().unwrap();
		let path = temp_dir.path().join("config.toml");
		fs::write(&path, format!("{NODE_AND_CHAIN}{ACCOUNT_AND_CONTRACT}{STORAGE}")).unwrap();

		let mut loader = ConfigLoader::new(temp_dir.path());
		let config = loader.load_config("config.toml").await.unwrap();
		assert_eq!(config.node.id, "gryd-include-test");
		assert_eq!(config.chain.poll_interval_seconds, 1);
	}

	#[tokio::test]
	async fn test_nested_includes() {
		let temp_dir = TempDir::new().unwrap();
		fs::create_dir(temp_dir.path().join("parts")).unwrap();
		fs::write(
			temp_dir.path().join("main.toml"),
			format!("include = [\"parts/account.toml\"]\n{NODE_AND_CHAIN}"),
		)
		.unwrap();
		fs::write(
			temp_dir.path().join("parts/account.toml"),
			format!("include = \"storage.toml\"\n{ACCOUNT_AND_CONTRACT}"),
		)
		.unwrap();
		fs::write(temp_dir.path().join("parts/storage.toml"), STORAGE).unwrap();

		let config = Config::from_file(temp_dir.path().join("main.toml"))
			.await
			.unwrap();
		assert_eq!(config.storage.primary, "memory");
		assert_eq!(config.contract.event, crate::ContractEvent::StorageBought);
	}

	#[tokio::test]
	async fn test_duplicate_section_rejected() {
		let temp_dir = TempDir::new().unwrap();
		fs::write(
			temp_dir.path().join("main.toml"),
			format!("include = [\"other.toml\"]\n{NODE_AND_CHAIN}{ACCOUNT_AND_CONTRACT}{STORAGE}"),
		)
		.unwrap();
		fs::write(
			temp_dir.path().join("other.toml"),
			"[node]\nid = \"duplicate\"\n",
		)
		.unwrap();

		let mut loader = ConfigLoader::new(temp_dir.path());
		let err = loader.load_config("main.toml").await.unwrap_err();
		assert!(err.to_string().contains("Duplicate section 'node'"));
	}

	#[tokio::test]
	async fn test_circular_include_rejected() {
		let temp_dir = TempDir::new().unwrap();
		fs::write(
			temp_dir.path().join("a.toml"),
			format!("include = \"b.toml\"\n{NODE_AND_CHAIN}"),
		)
		.unwrap();
		fs::write(
			temp_dir.path().join("b.toml"),
			format!("include = \"a.toml\"\n{STORAGE}"),
		)
		.unwrap();

		let mut loader = ConfigLoader::new(temp_dir.path());
		let err = loader.load_config("a.toml").await.unwrap_err();
		assert!(err.to_string().contains("Circular include"));
	}

	#[tokio::test]
	async fn test_missing_include_file() {
		let temp_dir = TempDir::new().unwrap();
		fs::write(
			temp_dir.path().join("main.toml"),
			format!("include = \"missing.toml\"\n{NODE_AND_CHAIN}"),
		)
		.unwrap();

		let mut loader = ConfigLoader::new(temp_dir.path());
		assert!(matches!(
			loader.load_config("main.toml").await,
			Err(ConfigError::Io(_))
		));
	}
}
