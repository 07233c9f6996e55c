//! Scripted ledger and JSON-RPC transport used by unit tests.

use crate::ledger::{EventKind, FilterDescriptor, LedgerClient, LedgerError, TokenEvent};
use async_trait::async_trait;
use ethers::providers::{JsonRpcClient, JsonRpcError, ProviderError, RpcError};
use ethers::types::{Address, U256};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::{HashMap, VecDeque};
use std::fmt::Debug;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// In-memory ledger with a scripted head, a fixed event history and per-address balances.
///
/// Queries whose span `to - from` exceeds `max_span` fail, the way providers reject wide
/// `eth_getLogs` ranges.
pub struct MockLedger {
	chain_id: u64,
	heads: Mutex<VecDeque<u64>>,
	last_head: Mutex<u64>,
	events: Mutex<Vec<TokenEvent>>,
	balances: Mutex<HashMap<Address, U256>>,
	max_span: Mutex<Option<u64>>,
	chain_id_failures: Mutex<usize>,
	chain_id_calls: Mutex<usize>,
	query_calls: Mutex<Vec<(EventKind, u64, u64)>>,
	balance_calls: Mutex<Vec<(Address, u64)>>,
}

impl MockLedger {
	pub fn new(chain_id: u64, head: u64) -> Self {
		Self {
			chain_id,
			heads: Mutex::new(VecDeque::new()),
			last_head: Mutex::new(head),
			events: Mutex::new(Vec::new()),
			balances: Mutex::new(HashMap::new()),
			max_span: Mutex::new(None),
			chain_id_failures: Mutex::new(0),
			chain_id_calls: Mutex::new(0),
			query_calls: Mutex::new(Vec::new()),
			balance_calls: Mutex::new(Vec::new()),
		}
	}

	/// Heads returned by successive `block_number` calls; the last one repeats afterwards.
	pub fn script_heads(&self, heads: impl IntoIterator<Item = u64>) {
		self.heads.lock().unwrap().extend(heads);
	}

	pub fn set_head(&self, head: u64) {
		self.heads.lock().unwrap().clear();
		*self.last_head.lock().unwrap() = head;
	}

	pub fn push_event(&self, event: TokenEvent) {
		self.events.lock().unwrap().push(event);
	}

	pub fn set_balance(&self, owner: Address, balance: U256) {
		self.balances.lock().unwrap().insert(owner, balance);
	}

	/// Fail every query whose span `to - from` is greater than `max_span`.
	pub fn fail_above_span(&self, max_span: u64) {
		*self.max_span.lock().unwrap() = Some(max_span);
	}

	/// Fail the next `times` chain id requests with a transport error.
	pub fn fail_chain_id(&self, times: usize) {
		*self.chain_id_failures.lock().unwrap() = times;
	}

	pub fn chain_id_calls(&self) -> usize {
		*self.chain_id_calls.lock().unwrap()
	}

	pub fn clear_failures(&self) {
		*self.max_span.lock().unwrap() = None;
	}

	pub fn query_calls(&self) -> Vec<(EventKind, u64, u64)> {
		self.query_calls.lock().unwrap().clone()
	}

	pub fn balance_calls(&self) -> Vec<(Address, u64)> {
		self.balance_calls.lock().unwrap().clone()
	}

	/// Events matching `filter` in `[from, to]`, bypassing failure injection.
	pub fn matching_events(&self, filter: &FilterDescriptor, from: u64, to: u64) -> Vec<TokenEvent> {
		self.events
			.lock()
			.unwrap()
			.iter()
			.filter(|event| (from..=to).contains(&event.block()))
			.filter(|event| match (filter.kind, event) {
				(EventKind::Approval, TokenEvent::Approval { spender, .. }) => {
					filter.addresses.contains(spender)
				}
				(EventKind::TransferFrom, TokenEvent::Transfer { from, .. }) => {
					filter.addresses.contains(from)
				}
				(EventKind::TransferTo, TokenEvent::Transfer { to, .. }) => {
					filter.addresses.contains(to)
				}
				(EventKind::Deposit, TokenEvent::Deposit { to, .. }) => filter.addresses.contains(to),
				(EventKind::Withdrawal, TokenEvent::Withdrawal { from, .. }) => {
					filter.addresses.contains(from)
				}
				_ => false,
			})
			.cloned()
			.collect()
	}
}

#[async_trait]
impl LedgerClient for MockLedger {
	async fn block_number(&self) -> Result<u64, LedgerError> {
		let mut last = self.last_head.lock().unwrap();
		if let Some(next) = self.heads.lock().unwrap().pop_front() {
			*last = next;
		}
		Ok(*last)
	}

	async fn chain_id(&self) -> Result<u64, LedgerError> {
		*self.chain_id_calls.lock().unwrap() += 1;
		let mut failures = self.chain_id_failures.lock().unwrap();
		if *failures > 0 {
			*failures -= 1;
			return Err(LedgerError::ProviderError(ProviderError::CustomError(
				"connection refused".to_string(),
			)));
		}
		Ok(self.chain_id)
	}

	async fn query_events(
		&self,
		filter: &FilterDescriptor,
		from: u64,
		to: u64,
	) -> Result<Vec<TokenEvent>, LedgerError> {
		self.query_calls.lock().unwrap().push((filter.kind, from, to));
		if let Some(max_span) = *self.max_span.lock().unwrap() {
			if to - from > max_span {
				return Err(LedgerError::ProviderError(ProviderError::CustomError(
					format!("query exceeds max block range {}", max_span),
				)));
			}
		}
		Ok(self.matching_events(filter, from, to))
	}

	async fn balance_of(&self, owner: Address, block: u64) -> Result<Option<U256>, LedgerError> {
		self.balance_calls.lock().unwrap().push((owner, block));
		Ok(self.balances.lock().unwrap().get(&owner).copied())
	}
}

/// JSON-RPC transport answering each method from a queue of scripted responses.
#[derive(Debug, Clone, Default)]
pub struct RpcStub {
	responses: Arc<Mutex<HashMap<String, VecDeque<Result<serde_json::Value, JsonRpcError>>>>>,
	requests: Arc<Mutex<Vec<(String, serde_json::Value)>>>,
	delay: Arc<Mutex<Option<Duration>>>,
}

impl RpcStub {
	pub fn add_response<R: Serialize>(&self, method: &str, response: R) {
		let value = serde_json::to_value(response).unwrap();
		self.push(method, Ok(value));
	}

	pub fn add_error(&self, method: &str, code: i64, message: &str) {
		self.push(
			method,
			Err(JsonRpcError {
				code,
				message: message.to_string(),
				data: None,
			}),
		);
	}

	/// Delay every answer by `delay`.
	pub fn set_delay(&self, delay: Duration) {
		*self.delay.lock().unwrap() = Some(delay);
	}

	/// Method and serialized params of every request received so far.
	pub fn requests(&self) -> Vec<(String, serde_json::Value)> {
		self.requests.lock().unwrap().clone()
	}

	fn push(&self, method: &str, response: Result<serde_json::Value, JsonRpcError>) {
		self.responses
			.lock()
			.unwrap()
			.entry(method.to_string())
			.or_default()
			.push_back(response);
	}
}

#[derive(Debug, thiserror::Error)]
pub enum RpcStubError {
	#[error("{0}")]
	JsonRpc(JsonRpcError),

	#[error("no response scripted for {0}")]
	Unscripted(String),

	#[error(transparent)]
	Serde(#[from] serde_json::Error),
}

impl RpcError for RpcStubError {
	fn as_error_response(&self) -> Option<&JsonRpcError> {
		match self {
			RpcStubError::JsonRpc(error) => Some(error),
			_ => None,
		}
	}

	fn as_serde_error(&self) -> Option<&serde_json::Error> {
		match self {
			RpcStubError::Serde(error) => Some(error),
			_ => None,
		}
	}
}

impl From<RpcStubError> for ProviderError {
	fn from(error: RpcStubError) -> Self {
		ProviderError::JsonRpcClientError(Box::new(error))
	}
}

#[async_trait]
impl JsonRpcClient for RpcStub {
	type Error = RpcStubError;

	async fn request<T: Serialize + Send + Sync + Debug, R: DeserializeOwned + Send>(
		&self,
		method: &str,
		params: T,
	) -> Result<R, RpcStubError> {
		let params = serde_json::to_value(&params)?;
		self.requests
			.lock()
			.unwrap()
			.push((method.to_string(), params));

		let delay = *self.delay.lock().unwrap();
		if let Some(delay) = delay {
			tokio::time::sleep(delay).await;
		}

		let response = self
			.responses
			.lock()
			.unwrap()
			.get_mut(method)
			.and_then(VecDeque::pop_front);
		match response {
			Some(Ok(value)) => Ok(serde_json::from_value(value)?),
			Some(Err(error)) => Err(RpcStubError::JsonRpc(error)),
			None => Err(RpcStubError::Unscripted(method.to_string())),
		}
	}
}
