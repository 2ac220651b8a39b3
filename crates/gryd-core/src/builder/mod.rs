//! Builder for the gryd node.
//!
//! Composes a [`GrydNode`] from configuration using factory functions for
//! the storage, account and chain backend implementations.

use crate::orchestrator::StorageOrchestrator;
use crate::stores::DocumentStore;
use crate::GrydNode;
use gryd_account::{AccountError, AccountInterface, AccountService};
use gryd_config::Config;
use gryd_contract::ContractClient;
use gryd_delivery::{BackendError, ChainBackend, ManagerSettings, TransactionManager};
use gryd_storage::{StorageError, StorageInterface, StorageService};
use gryd_types::Address;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during node construction.
#[derive(Debug, Error)]
pub enum BuilderError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Missing required component: {0}")]
	MissingComponent(String),
}

/// Factory functions used to build a [`GrydNode`].
pub struct GrydFactories<SF, AF, BF> {
	pub storage_factories: HashMap<String, SF>,
	pub account_factories: HashMap<String, AF>,
	pub backend_factory: BF,
}

/// Builder for constructing a [`GrydNode`] with pluggable implementations.
pub struct GrydBuilder {
	config: Config,
}

impl GrydBuilder {
	pub fn new(config: Config) -> Self {
		Self { config }
	}

	/// Builds the node, probing the chain endpoint before anything is wired
	/// on top of it.
	pub async fn build<SF, AF, BF>(
		self,
		factories: GrydFactories<SF, AF, BF>,
	) -> Result<GrydNode, BuilderError>
	where
		SF: Fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>,
		AF: Fn(&toml::Value) -> Result<Box<dyn AccountInterface>, AccountError>,
		BF: Fn(&toml::Value) -> Result<Box<dyn ChainBackend>, BackendError>,
	{
		// Create storage implementations
		let mut storage_impls = HashMap::new();
		for (name, config) in &self.config.storage.implementations {
			if let Some(factory) = factories.storage_factories.get(name) {
				match factory(config) {
					Ok(implementation) => {
						storage_impls.insert(name.clone(), implementation);
						let is_primary = &self.config.storage.primary == name;
						tracing::info!(component = "storage", implementation = %name, enabled = %is_primary, "Loaded");
					},
					Err(e) => {
						tracing::error!(
							component = "storage",
							implementation = %name,
							error = %e,
							"Failed to create storage implementation"
						);
						return Err(BuilderError::Config(format!(
							"Failed to create storage implementation '{}': {}",
							name, e
						)));
					},
				}
			}
		}

		let primary_storage = &self.config.storage.primary;
		let storage_backend = storage_impls.remove(primary_storage).ok_or_else(|| {
			BuilderError::MissingComponent(format!("primary storage '{}'", primary_storage))
		})?;
		let storage = Arc::new(StorageService::new(storage_backend));

		// Create account implementations
		let mut account_impls = HashMap::new();
		for (name, config) in &self.config.account.implementations {
			if let Some(factory) = factories.account_factories.get(name) {
				match factory(config) {
					Ok(implementation) => {
						account_impls.insert(name.clone(), implementation);
						let is_primary = &self.config.account.primary == name;
						tracing::info!(component = "account", implementation = %name, enabled = %is_primary, "Loaded");
					},
					Err(e) => {
						tracing::error!(
							component = "account",
							implementation = %name,
							error = %e,
							"Failed to create account implementation"
						);
						return Err(BuilderError::Config(format!(
							"Failed to create account implementation '{}': {}",
							name, e
						)));
					},
				}
			}
		}

		let primary_account = &self.config.account.primary;
		let account = account_impls.remove(primary_account).ok_or_else(|| {
			BuilderError::MissingComponent(format!("primary account '{}'", primary_account))
		})?;
		let account = Arc::new(AccountService::new(account));

		// Chain backend and boot probe
		let chain_config = toml::Value::try_from(&self.config.chain)
			.map_err(|e| BuilderError::Config(format!("Invalid chain configuration: {}", e)))?;
		let backend: Arc<dyn ChainBackend> = match (factories.backend_factory)(&chain_config) {
			Ok(backend) => Arc::from(backend),
			Err(e) => {
				tracing::error!(component = "backend", error = %e, "Failed to create chain backend");
				return Err(BuilderError::Config(format!(
					"Failed to create chain backend: {}",
					e
				)));
			},
		};
		probe_backend(backend.as_ref()).await?;

		let settings = ManagerSettings {
			poll_interval: Duration::from_secs(self.config.chain.poll_interval_seconds),
			receipt_timeout: Duration::from_secs(self.config.chain.receipt_timeout_seconds),
			min_estimated_gas_limit: self.config.chain.min_estimated_gas_limit,
			tip_boost_percent: self.config.chain.tip_boost_percent,
		};
		let manager = TransactionManager::new(backend, account, settings)
			.await
			.map_err(|e| BuilderError::Config(format!("Failed to start transaction manager: {}", e)))?;
		let manager = Arc::new(manager);

		let contract_address: Address = self.config.contract.address.parse().map_err(|e| {
			BuilderError::Config(format!(
				"Invalid contract address '{}': {}",
				self.config.contract.address, e
			))
		})?;
		let contract = Arc::new(ContractClient::new(
			manager.clone(),
			contract_address,
			self.config.contract.event,
			manager.receipt_timeout(),
		));
		tracing::info!(component = "contract", address = %contract_address, event = ?self.config.contract.event, "Loaded");

		let documents = Arc::new(DocumentStore::new(storage.clone()));
		let orchestrator = Arc::new(StorageOrchestrator::new(
			contract,
			documents.clone(),
			documents.clone(),
			documents,
			manager.sender(),
		));

		Ok(GrydNode::new(self.config, storage, manager, orchestrator))
	}
}

/// `web3_clientVersion`, then `eth_chainId`.
async fn probe_backend(backend: &dyn ChainBackend) -> Result<(), BuilderError> {
	let version = backend.client_version().await.map_err(|e| {
		tracing::error!(component = "backend", error = %e, "Chain endpoint unreachable");
		BuilderError::Config(format!("Chain endpoint unreachable: {}", e))
	})?;
	let chain_id = backend
		.chain_id()
		.await
		.map_err(|e| BuilderError::Config(format!("Failed to read chain id: {}", e)))?;

	tracing::info!(component = "backend", client = %version, chain_id, "Connected");
	Ok(())
}
