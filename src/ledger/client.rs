//! Ledger client for the node serving the token contract.
//!
//! This module defines the `LedgerClient` trait the sync engine depends on, and an implementation
//! over an `ethers` provider. Every call is bounded by a timeout. All methods are async and
//! designed for use with Tokio.

use super::types::*;
use async_trait::async_trait;
use ethers::abi::{self, ParamType, Token};
use ethers::providers::{Http, JsonRpcClient, Middleware, Provider, ProviderError};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, BlockId, BlockNumber, Bytes, TransactionRequest, U256};
use reqwest::Url;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

const BALANCE_OF_SIGNATURE: &str = "balanceOf(address)";

/// Operations the sync engine needs from the ledger.
#[async_trait]
pub trait LedgerClient: Send + Sync {
	/// Current chain head.
	async fn block_number(&self) -> Result<u64, LedgerError>;

	/// Chain id reported by the node.
	async fn chain_id(&self) -> Result<u64, LedgerError>;

	/// Decoded events matching `filter` in the inclusive range `[from, to]`.
	async fn query_events(
		&self,
		filter: &FilterDescriptor,
		from: u64,
		to: u64,
	) -> Result<Vec<TokenEvent>, LedgerError>;

	/// Token balance of `owner` at `block`, `None` when the node returns no value.
	async fn balance_of(&self, owner: Address, block: u64) -> Result<Option<U256>, LedgerError>;
}

/// Ledger client over an `ethers` provider
pub struct EthLedgerClient<P> {
	provider: Provider<P>,
	/// Token contract queried by `balance_of`.
	token_contract: Address,
	/// Upper bound on a single provider call.
	timeout: Duration,
}

impl EthLedgerClient<Http> {
	/// Create a client talking HTTP JSON-RPC to `rpc_url`.
	///
	/// # Arguments
	/// * `rpc_url` - The HTTP JSON-RPC endpoint.
	/// * `token_contract` - Contract answering `balanceOf` calls.
	/// * `timeout` - Per request timeout.
	pub fn new(rpc_url: Url, token_contract: Address, timeout: Duration) -> Self {
		Self::with_provider(Provider::new(Http::new(rpc_url)), token_contract, timeout)
	}
}

impl<P: JsonRpcClient> EthLedgerClient<P> {
	pub fn with_provider(provider: Provider<P>, token_contract: Address, timeout: Duration) -> Self {
		Self {
			provider,
			token_contract,
			timeout,
		}
	}

	async fn timed<T>(
		&self,
		method: &'static str,
		request: impl Future<Output = Result<T, ProviderError>>,
	) -> Result<T, LedgerError> {
		match tokio::time::timeout(self.timeout, request).await {
			Ok(result) => Ok(result?),
			Err(_) => Err(LedgerError::Timeout {
				method,
				after: self.timeout,
			}),
		}
	}
}

#[async_trait]
impl<P: JsonRpcClient + 'static> LedgerClient for EthLedgerClient<P> {
	async fn block_number(&self) -> Result<u64, LedgerError> {
		let head = self
			.timed("eth_blockNumber", self.provider.get_block_number())
			.await?;
		Ok(head.as_u64())
	}

	async fn chain_id(&self) -> Result<u64, LedgerError> {
		let chain_id = self.timed("eth_chainId", self.provider.get_chainid()).await?;
		if chain_id > U256::from(u64::MAX) {
			return Err(LedgerError::Decode(format!(
				"chain id {} does not fit in 64 bits",
				chain_id
			)));
		}
		Ok(chain_id.as_u64())
	}

	async fn query_events(
		&self,
		filter: &FilterDescriptor,
		from: u64,
		to: u64,
	) -> Result<Vec<TokenEvent>, LedgerError> {
		let query = filter.to_filter(from, to);
		let logs = self
			.timed("eth_getLogs", self.provider.get_logs(&query))
			.await?;

		debug!(
			"eth_getLogs {:?} [{}, {}] returned {} logs",
			filter.kind,
			from,
			to,
			logs.len()
		);

		logs.iter()
			.filter(|log| !log.removed.unwrap_or(false))
			.map(TokenEvent::decode)
			.collect()
	}

	async fn balance_of(&self, owner: Address, block: u64) -> Result<Option<U256>, LedgerError> {
		let call: TypedTransaction = TransactionRequest::new()
			.to(self.token_contract)
			.data(balance_of_calldata(owner))
			.into();
		let at = BlockId::Number(BlockNumber::Number(block.into()));
		let data = self
			.timed("eth_call", self.provider.call(&call, Some(at)))
			.await?;
		decode_balance(&data)
	}
}

fn balance_of_calldata(owner: Address) -> Bytes {
	let mut data = ethers::utils::id(BALANCE_OF_SIGNATURE).to_vec();
	data.extend(abi::encode(&[Token::Address(owner)]));
	Bytes::from(data)
}

/// Decode a `balanceOf` return value. Empty return data means the node had no value.
fn decode_balance(data: &Bytes) -> Result<Option<U256>, LedgerError> {
	if data.is_empty() {
		return Ok(None);
	}
	let tokens = abi::decode(&[ParamType::Uint(256)], data.as_ref())
		.map_err(|e| LedgerError::Decode(format!("balanceOf returned {}: {}", data, e)))?;
	Ok(tokens.into_iter().next().and_then(Token::into_uint))
}
