mod config;
mod ledger;
mod store;
mod sync;
mod utils;

#[cfg(test)]
mod test_utils;

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::ledger::EthLedgerClient;
use crate::store::{FileStore, KeyValueStore, RedisStore};
use crate::sync::SyncService;

#[tokio::main]
async fn main() {
	dotenv::dotenv().ok();

	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
		)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	let config = Config::parse();
	let sync_config = match config.validate() {
		Ok(sync_config) => sync_config,
		Err(e) => {
			error!("Invalid configuration: {}", e);
			std::process::exit(1);
		}
	};

	info!("Starting settlement approval sync");

	let rpc_url = match config.rpc_url() {
		Ok(url) => url,
		Err(e) => {
			error!("Invalid configuration: {}", e);
			std::process::exit(1);
		}
	};

	let store: Arc<dyn KeyValueStore> = match &config.store_path {
		Some(path) => match FileStore::open(path).await {
			Ok(store) => {
				warn!("Using local snapshot store at {:?}, not suitable for production", path);
				Arc::new(store)
			}
			Err(e) => {
				error!("Failed to open store at {:?}: {}", path, e);
				std::process::exit(1);
			}
		},
		None => match RedisStore::connect(&config.redis_url()).await {
			Ok(store) => Arc::new(store),
			Err(e) => {
				error!("Failed to connect to redis: {}", e);
				std::process::exit(1);
			}
		},
	};

	let ledger = Arc::new(EthLedgerClient::new(
		rpc_url,
		sync_config.token_contract,
		config.rpc_timeout(),
	));

	let service = SyncService::new(sync_config, ledger, store);
	if let Err(e) = service.init().await {
		error!("Failed to start sync service: {}", e);
		std::process::exit(1);
	}

	match service.state().checkpoint().await {
		Ok(checkpoint) => info!("Resuming after block {}", checkpoint),
		Err(e) => warn!("Could not read checkpoint: {}", e),
	}

	service.run_forever().await;
}
