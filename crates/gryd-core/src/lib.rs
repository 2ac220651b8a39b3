//! Core of the gryd storage node.
//!
//! Wires the transaction manager, payment contract client and stores into a
//! [`GrydNode`]. The node's entry point for uploads is the
//! [`StorageOrchestrator`], which only persists a dataset once its payment
//! has been verified on chain.

pub mod builder;
pub mod orchestrator;
pub mod stores;

pub use builder::{BuilderError, GrydBuilder, GrydFactories};
pub use orchestrator::{ErrorClass, OrchestratorError, StorageOrchestrator};

use gryd_config::Config;
use gryd_delivery::TransactionManager;
use gryd_storage::StorageService;
use std::sync::Arc;
use std::time::Duration;

/// A fully wired node.
pub struct GrydNode {
	config: Config,
	storage: Arc<StorageService>,
	manager: Arc<TransactionManager>,
	orchestrator: Arc<StorageOrchestrator>,
}

impl GrydNode {
	pub(crate) fn new(
		config: Config,
		storage: Arc<StorageService>,
		manager: Arc<TransactionManager>,
		orchestrator: Arc<StorageOrchestrator>,
	) -> Self {
		Self {
			config,
			storage,
			manager,
			orchestrator,
		}
	}

	pub fn config(&self) -> &Config {
		&self.config
	}

	pub fn storage(&self) -> &Arc<StorageService> {
		&self.storage
	}

	pub fn manager(&self) -> &Arc<TransactionManager> {
		&self.manager
	}

	pub fn orchestrator(&self) -> &Arc<StorageOrchestrator> {
		&self.orchestrator
	}

	/// Runs `cleanup_expired` every `storage.cleanup_interval_seconds`.
	///
	/// Never returns; callers spawn it or select on it.
	pub async fn run_storage_cleanup(&self) {
		let storage = self.storage.clone();
		let mut interval = tokio::time::interval(Duration::from_secs(
			self.config.storage.cleanup_interval_seconds,
		));

		loop {
			interval.tick().await;
			match storage.cleanup_expired().await {
				Ok(0) => {},
				Ok(count) => {
					tracing::debug!("Storage cleanup: removed {} expired entries", count);
				},
				Err(e) => {
					tracing::warn!("Storage cleanup failed: {}", e);
				},
			}
		}
	}
}
