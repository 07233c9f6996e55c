//! State store for the approval sync worker.
//!
//! This module provides the `StateStore`, the only writer of the sync checkpoint, the per-address
//! approval and balance records, and the durable approver set. It keeps an in-memory mirror of
//! the approver set, validated against the durable set's cardinality on every read and rebuilt
//! by a full scan whenever the two disagree.

use crate::store::{KeyValueStore, StoreError};
use crate::utils::{address_key, parse_address};
use ethers::types::{Address, U256};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Token persisted in place of approvals at or above [`ApprovalValue::UNLIMITED_THRESHOLD`].
pub const UNLIMITED_TOKEN: &str = "MAX_INT256";

/// Members requested per `sscan` page when rebuilding the approver cache.
const SCAN_PAGE_SIZE: usize = 1000;

const APPROVE_VALUE_FIELD: &str = "approveValue";
const APPROVE_BLOCK_FIELD: &str = "approveBlock";
const BALANCE_VALUE_FIELD: &str = "balanceValue";
const BALANCE_BLOCK_FIELD: &str = "balanceBlock";

/// Approved allowance as stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalValue {
	Limited(U256),
	/// At or above the unlimited threshold; the exact magnitude is not kept.
	Unlimited,
}

impl ApprovalValue {
	/// `2^255 - 1`, the largest signed 256-bit value.
	pub const UNLIMITED_THRESHOLD: U256 = U256([u64::MAX, u64::MAX, u64::MAX, u64::MAX >> 1]);

	pub fn from_amount(amount: U256) -> Self {
		if amount >= Self::UNLIMITED_THRESHOLD {
			ApprovalValue::Unlimited
		} else {
			ApprovalValue::Limited(amount)
		}
	}

	fn encode(&self) -> String {
		match self {
			ApprovalValue::Limited(amount) => amount.to_string(),
			ApprovalValue::Unlimited => UNLIMITED_TOKEN.to_string(),
		}
	}

	fn decode(key: &str, raw: &str) -> Result<Self, StoreError> {
		if raw == UNLIMITED_TOKEN {
			return Ok(ApprovalValue::Unlimited);
		}
		U256::from_dec_str(raw)
			.map(ApprovalValue::Limited)
			.map_err(|_| StoreError::CorruptValue {
				key: format!("{}.{}", key, APPROVE_VALUE_FIELD),
				value: raw.to_string(),
			})
	}
}

impl fmt::Display for ApprovalValue {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.encode())
	}
}

/// Latest approval seen for an owner. `block` is `None` when no approval was ever stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ApprovalRecord {
	pub value: Option<ApprovalValue>,
	pub block: Option<u64>,
}

/// Latest sampled balance for an address. `block` is `None` when never sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BalanceRecord {
	pub value: Option<U256>,
	pub block: Option<u64>,
}

/// Full per-address record.
#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ApproverRecord {
	pub approval: ApprovalRecord,
	pub balance: BalanceRecord,
}

/// Store for the sync checkpoint, approver records and the approver set.
///
/// Keys are namespaced by network id and settlement contract so several deployments can share
/// one backing store. The cache is owned by this instance; running two instances against the
/// same namespace is not supported.
pub struct StateStore {
	kv: Arc<dyn KeyValueStore>,
	namespace: String,
	approvers_cache: Mutex<HashSet<Address>>,
}

impl StateStore {
	pub fn new(kv: Arc<dyn KeyValueStore>, network_id: u64, settlement_contract: Address) -> Self {
		let settlement_key = address_key(&settlement_contract);
		Self {
			kv,
			namespace: format!("{}:{}", network_id, &settlement_key[..4]),
			approvers_cache: Mutex::new(HashSet::new()),
		}
	}

	fn checkpoint_key(&self) -> String {
		format!("{}:syncedBlock", self.namespace)
	}

	fn approvers_key(&self) -> String {
		format!("{}:approvers", self.namespace)
	}

	fn owner_key(&self, owner: &Address) -> String {
		format!("{}:{}", self.namespace, address_key(owner))
	}

	async fn read_block(&self, key: &str, field: &str) -> Result<Option<u64>, StoreError> {
		self.kv
			.hget(key, field)
			.await?
			.map(|raw| {
				raw.parse::<u64>().map_err(|_| StoreError::CorruptValue {
					key: format!("{}.{}", key, field),
					value: raw,
				})
			})
			.transpose()
	}

	/// Highest block fully processed, `0` when nothing was synced yet.
	pub async fn checkpoint(&self) -> Result<u64, StoreError> {
		let key = self.checkpoint_key();
		match self.kv.get(&key).await? {
			Some(raw) => raw
				.parse::<u64>()
				.map_err(|_| StoreError::CorruptValue { key, value: raw }),
			None => Ok(0),
		}
	}

	pub async fn set_checkpoint(&self, block: u64) -> Result<(), StoreError> {
		self.kv
			.set(&self.checkpoint_key(), &block.to_string())
			.await
	}

	pub async fn approval_record(&self, owner: &Address) -> Result<ApprovalRecord, StoreError> {
		let key = self.owner_key(owner);
		let value = match self.kv.hget(&key, APPROVE_VALUE_FIELD).await? {
			Some(raw) => Some(ApprovalValue::decode(&key, &raw)?),
			None => None,
		};
		let block = self.read_block(&key, APPROVE_BLOCK_FIELD).await?;
		Ok(ApprovalRecord { value, block })
	}

	/// Record an approval by `owner` seen at `block`.
	///
	/// Ignored unless `block` is strictly newer than the stored approval block. Returns whether
	/// the record was written. A written approval also adds `owner` to the approver set.
	pub async fn set_approval(
		&self,
		owner: &Address,
		amount: U256,
		block: u64,
	) -> Result<bool, StoreError> {
		let key = self.owner_key(owner);
		if let Some(stored) = self.read_block(&key, APPROVE_BLOCK_FIELD).await? {
			if stored >= block {
				return Ok(false);
			}
		}

		// Set membership first: a crash after it leaves a record the next pass can still write.
		self.kv
			.sadd(&self.approvers_key(), &address_key(owner))
			.await?;
		self.kv
			.hset_multiple(
				&key,
				&[
					(
						APPROVE_VALUE_FIELD,
						ApprovalValue::from_amount(amount).encode(),
					),
					(APPROVE_BLOCK_FIELD, block.to_string()),
				],
			)
			.await?;
		self.approvers_cache.lock().await.insert(*owner);
		Ok(true)
	}

	pub async fn balance_record(&self, owner: &Address) -> Result<BalanceRecord, StoreError> {
		let key = self.owner_key(owner);
		let value = match self.kv.hget(&key, BALANCE_VALUE_FIELD).await? {
			Some(raw) => Some(
				U256::from_dec_str(&raw).map_err(|_| StoreError::CorruptValue {
					key: format!("{}.{}", key, BALANCE_VALUE_FIELD),
					value: raw,
				})?,
			),
			None => None,
		};
		let block = self.read_block(&key, BALANCE_BLOCK_FIELD).await?;
		Ok(BalanceRecord { value, block })
	}

	/// Record the balance of `owner` sampled at `block`.
	///
	/// Ignored unless `block` is strictly newer than the stored balance block. Returns whether
	/// the record was written. Does not touch the approver set.
	pub async fn set_balance(
		&self,
		owner: &Address,
		balance: U256,
		block: u64,
	) -> Result<bool, StoreError> {
		let key = self.owner_key(owner);
		if let Some(stored) = self.read_block(&key, BALANCE_BLOCK_FIELD).await? {
			if stored >= block {
				return Ok(false);
			}
		}

		self.kv
			.hset_multiple(
				&key,
				&[
					(BALANCE_VALUE_FIELD, balance.to_string()),
					(BALANCE_BLOCK_FIELD, block.to_string()),
				],
			)
			.await?;
		Ok(true)
	}

	#[cfg(test)]
	pub async fn approver_record(&self, owner: &Address) -> Result<ApproverRecord, StoreError> {
		Ok(ApproverRecord {
			approval: self.approval_record(owner).await?,
			balance: self.balance_record(owner).await?,
		})
	}

	/// Every address that ever approved the settlement contract.
	///
	/// Served from the in-memory cache while its size matches the durable set's cardinality.
	/// Otherwise the cache is dropped and rebuilt from a full scan of the durable set.
	pub async fn approver_set(&self) -> Result<HashSet<Address>, StoreError> {
		let mut cache = self.approvers_cache.lock().await;

		if !cache.is_empty() {
			let durable = self.kv.scard(&self.approvers_key()).await?;
			if durable == cache.len() {
				return Ok(cache.clone());
			}

			warn!(
				"Approvers cache size {} does not match store size {}. Clearing in-memory cache and rebuilding.",
				cache.len(),
				durable
			);
			cache.clear();
		}

		let key = self.approvers_key();
		let mut cursor = 0;
		let mut pages = 0usize;
		loop {
			let (next, members) = self.kv.sscan(&key, cursor, SCAN_PAGE_SIZE).await?;
			pages += 1;
			for member in members {
				let address = parse_address(&member).map_err(|_| StoreError::CorruptValue {
					key: key.clone(),
					value: member.clone(),
				})?;
				cache.insert(address);
			}
			if next == 0 {
				break;
			}
			cursor = next;
		}

		info!(
			"Rebuilt approvers cache with {} addresses from {} scan pages",
			cache.len(),
			pages
		);
		Ok(cache.clone())
	}

	/// Number of addresses currently held by the in-memory cache.
	#[cfg(test)]
	pub async fn cached_approver_count(&self) -> usize {
		self.approvers_cache.lock().await.len()
	}

	/// Cardinality of the durable approver set.
	#[cfg(test)]
	pub async fn durable_approver_count(&self) -> Result<usize, StoreError> {
		self.kv.scard(&self.approvers_key()).await
	}
}
