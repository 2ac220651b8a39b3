//! Main entry point for the gryd storage node.
//!
//! Accepts dataset uploads over HTTP and stores them once the payment
//! transaction referenced by the upload has been verified on chain.

use clap::Parser;
use gryd_config::Config;
use gryd_core::{GrydBuilder, GrydFactories, GrydNode};
use gryd_delivery::implementations::evm::alloy::create_backend;
use std::path::PathBuf;
use std::sync::Arc;

mod apis;
mod gate;
mod server;

/// Command-line arguments for the gryd node.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Path to configuration file
	#[arg(short, long, default_value = "config.toml")]
	config: PathBuf,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, default_value = "info")]
	log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	use tracing_subscriber::{fmt, EnvFilter};

	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

	fmt()
		.with_env_filter(env_filter)
		.with_thread_ids(true)
		.with_target(true)
		.init();

	tracing::info!("Started gryd");

	let config = Config::from_file(&args.config).await?;
	tracing::info!("Loaded configuration [{}]", config.node.id);

	let api_config = config.api.clone();
	let node = Arc::new(build_node(config).await?);

	let cleanup_node = Arc::clone(&node);
	let cleanup = tokio::spawn(async move { cleanup_node.run_storage_cleanup().await });

	tokio::select! {
		result = server::start_server(api_config, Arc::clone(&node)) => {
			tracing::info!("API server finished");
			result?;
		}
		_ = tokio::signal::ctrl_c() => {
			tracing::info!("Shutting down");
		}
	}

	cleanup.abort();
	tracing::info!("Stopped gryd");
	Ok(())
}

/// Builds the node with every registered storage and account implementation.
async fn build_node(config: Config) -> Result<GrydNode, Box<dyn std::error::Error>> {
	let factories = GrydFactories {
		storage_factories: gryd_storage::get_all_implementations()
			.into_iter()
			.map(|(name, factory)| (name.to_string(), factory))
			.collect(),
		account_factories: gryd_account::get_all_implementations()
			.into_iter()
			.map(|(name, factory)| (name.to_string(), factory))
			.collect(),
		backend_factory: create_backend,
	};

	Ok(GrydBuilder::new(config).build(factories).await?)
}
