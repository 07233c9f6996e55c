//! Command line and environment configuration.
//!
//! Every flag can also be supplied through the environment variable of the same name in
//! upper snake case, so a `.env` file is enough to run the service.

use crate::store::redis_url;
use crate::sync::progress_tracker::DEFAULT_LOG_INTERVAL;
use crate::sync::range_query::DEFAULT_MAX_BISECTION_DEPTH;
use crate::sync::{SyncConfig, SyncError};
use crate::utils::parse_address;

use clap::Parser;
use ethers::types::Address;
use reqwest::Url;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

/// How long `init` keeps retrying an unreachable node.
const STARTUP_RETRY_WINDOW: Duration = Duration::from_secs(120);

#[derive(Parser, Debug, Clone)]
#[clap(rename_all = "kebab-case", author, version)]
pub struct Config {
	/// JSON-RPC endpoint of the ledger node
	#[clap(env, long)]
	pub eth_rpc_url: String,

	/// Chain id the node must report
	#[clap(env, long)]
	pub network_id: u64,

	#[clap(env, long)]
	pub token_contract_addr: String,

	#[clap(env, long)]
	pub settlement_contract_addr: String,

	/// First block worth scanning
	#[clap(env, long, default_value_t = 0)]
	pub settlement_contract_deploy_block: u64,

	#[clap(env, long, default_value = "localhost")]
	pub redis_host: String,

	#[clap(env, long, default_value_t = 6379)]
	pub redis_port: u16,

	#[clap(env, long, default_value_t = 0)]
	pub redis_db: u32,

	/// Keep state in this local snapshot file instead of Redis
	#[clap(env, long)]
	pub store_path: Option<PathBuf>,

	#[clap(env, long, default_value_t = 2000)]
	pub chunk_size: u64,

	/// Addresses per log filter
	#[clap(env, long, default_value_t = 500)]
	pub filter_capacity: usize,

	#[clap(env, long, default_value_t = 1000)]
	pub poll_interval_ms: u64,

	#[clap(env, long, default_value_t = DEFAULT_MAX_BISECTION_DEPTH)]
	pub max_bisection_depth: u32,

	#[clap(env, long, default_value_t = 30)]
	pub rpc_timeout_secs: u64,
}

impl Config {
	pub fn token_contract(&self) -> Result<Address, SyncError> {
		parse_contract("TOKEN_CONTRACT_ADDR", &self.token_contract_addr)
	}

	pub fn settlement_contract(&self) -> Result<Address, SyncError> {
		parse_contract("SETTLEMENT_CONTRACT_ADDR", &self.settlement_contract_addr)
	}

	/// The ledger endpoint, which must be an absolute http(s) URL.
	pub fn rpc_url(&self) -> Result<Url, SyncError> {
		let url = Url::parse(self.eth_rpc_url.trim())
			.map_err(|e| SyncError::ConfigError(format!("ETH_RPC_URL: {}", e)))?;
		match url.scheme() {
			"http" | "https" => Ok(url),
			scheme => Err(SyncError::ConfigError(format!(
				"ETH_RPC_URL: unsupported scheme {:?}",
				scheme
			))),
		}
	}

	pub fn redis_url(&self) -> String {
		redis_url(&self.redis_host, self.redis_port, self.redis_db)
	}

	pub fn rpc_timeout(&self) -> Duration {
		Duration::from_secs(self.rpc_timeout_secs)
	}

	/// Check the parsed values and build the sync loop configuration.
	pub fn validate(&self) -> Result<SyncConfig, SyncError> {
		self.rpc_url()?;
		if self.redis_host.trim().is_empty() || self.redis_port == 0 {
			return Err(SyncError::ConfigError(
				"REDIS_HOST and REDIS_PORT must be set".to_string(),
			));
		}
		if self.chunk_size == 0 {
			return Err(SyncError::ConfigError(
				"CHUNK_SIZE must be greater than zero".to_string(),
			));
		}
		let filter_capacity = NonZeroUsize::new(self.filter_capacity).ok_or_else(|| {
			SyncError::ConfigError("FILTER_CAPACITY must be greater than zero".to_string())
		})?;

		Ok(SyncConfig {
			expected_chain_id: self.network_id,
			token_contract: self.token_contract()?,
			settlement_contract: self.settlement_contract()?,
			deploy_block: self.settlement_contract_deploy_block,
			chunk_size: self.chunk_size,
			filter_capacity,
			poll_interval: Duration::from_millis(self.poll_interval_ms),
			max_bisection_depth: self.max_bisection_depth,
			startup_retry_window: STARTUP_RETRY_WINDOW,
			progress_log_interval: DEFAULT_LOG_INTERVAL,
		})
	}
}

fn parse_contract(name: &str, raw: &str) -> Result<Address, SyncError> {
	parse_address(raw).map_err(|e| SyncError::ConfigError(format!("{}: {}", name, e)))
}

#[cfg(test)]
mod tests {
	use super::*;

	const TOKEN: &str = "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2";
	const SETTLEMENT: &str = "9008d19f58aabd9ed0d60971565aa8510560ab41";

	fn parse(extra: &[&str]) -> Config {
		let mut args = vec![
			"settlement-approval-sync",
			"--eth-rpc-url",
			"http://localhost:8545",
			"--network-id",
			"1",
			"--token-contract-addr",
			TOKEN,
			"--settlement-contract-addr",
			SETTLEMENT,
		];
		args.extend_from_slice(extra);
		Config::try_parse_from(args).unwrap()
	}

	#[test]
	fn test_defaults() {
		let config = parse(&[]);
		assert_eq!(config.settlement_contract_deploy_block, 0);
		assert_eq!(config.store_path, None);
		assert_eq!(config.redis_url(), "redis://localhost:6379/0");
		assert_eq!(config.chunk_size, 2000);
		assert_eq!(config.filter_capacity, 500);
		assert_eq!(config.poll_interval_ms, 1000);
		assert_eq!(config.max_bisection_depth, 32);
		assert_eq!(config.rpc_timeout(), Duration::from_secs(30));
	}

	#[test]
	fn test_validate_builds_sync_config() {
		let sync = parse(&["--settlement-contract-deploy-block", "12593265", "--chunk-size", "500"])
			.validate()
			.unwrap();

		assert_eq!(sync.expected_chain_id, 1);
		assert_eq!(sync.token_contract, parse_address(TOKEN).unwrap());
		assert_eq!(sync.settlement_contract, parse_address(SETTLEMENT).unwrap());
		assert_eq!(sync.deploy_block, 12593265);
		assert_eq!(sync.chunk_size, 500);
		assert_eq!(sync.filter_capacity.get(), 500);
		assert_eq!(sync.poll_interval, Duration::from_millis(1000));
	}

	#[test]
	fn test_invalid_address_is_rejected() {
		let mut config = parse(&[]);
		config.settlement_contract_addr = "0x1234".to_string();
		let err = config.validate().unwrap_err();
		assert!(matches!(err, SyncError::ConfigError(ref msg) if msg.contains("SETTLEMENT_CONTRACT_ADDR")));

		config.settlement_contract_addr = "not-hex".to_string();
		assert!(config.validate().is_err());
	}

	#[test]
	fn test_rpc_url_must_be_http_uri() {
		assert_eq!(
			parse(&[]).rpc_url().unwrap().as_str(),
			"http://localhost:8545/"
		);

		for bad in ["localhost:8545", "not a url", "", "ftp://node.example"] {
			let mut config = parse(&[]);
			config.eth_rpc_url = bad.to_string();
			assert!(
				matches!(config.validate(), Err(SyncError::ConfigError(ref msg)) if msg.contains("ETH_RPC_URL")),
				"{:?} accepted",
				bad
			);
		}
	}

	#[test]
	fn test_store_selection_flags() {
		let config = parse(&[
			"--redis-host",
			"redis.internal",
			"--redis-port",
			"6380",
			"--store-path",
			"./dev-state.json",
		]);
		assert_eq!(config.redis_url(), "redis://redis.internal:6380/0");
		assert_eq!(config.store_path, Some(PathBuf::from("./dev-state.json")));

		let mut config = parse(&[]);
		config.redis_port = 0;
		assert!(config.validate().is_err());
	}

	#[test]
	fn test_zero_sizes_are_rejected() {
		assert!(matches!(
			parse(&["--chunk-size", "0"]).validate(),
			Err(SyncError::ConfigError(_))
		));
		assert!(matches!(
			parse(&["--filter-capacity", "0"]).validate(),
			Err(SyncError::ConfigError(_))
		));
	}

	#[test]
	fn test_non_numeric_network_id_fails_parsing() {
		let result = Config::try_parse_from([
			"settlement-approval-sync",
			"--eth-rpc-url",
			"http://localhost:8545",
			"--network-id",
			"mainnet",
			"--token-contract-addr",
			TOKEN,
			"--settlement-contract-addr",
			SETTLEMENT,
		]);
		assert!(result.is_err());
	}
}
