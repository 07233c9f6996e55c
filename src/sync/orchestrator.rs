//! Sync loop driver and integration point for all sync services.
//!
//! This module defines the `SyncService`, which owns one polling loop over the ledger. Each
//! cycle derives the unsynced block range from the stored checkpoint, walks it in fixed size
//! chunks, and for every chunk:
//! - folds new approvals of the settlement contract into the state store
//! - queries transfers, deposits and withdrawals of every known approver
//! - refreshes the balance of every address active in the chunk at the freshest chain head
//! - commits the chunk's end block as the new checkpoint
//!
//! Any error aborts the cycle before the checkpoint moves, and the next cycle retries the same
//! range. Folding is guarded by block comparisons, so retries are idempotent.

use crate::ledger::{LedgerClient, TokenEvent};
use crate::store::{KeyValueStore, StateStore};
use crate::sync::filters::{FilterBatcher, HolderFilters};
use crate::sync::progress_tracker::SyncProgressTracker;
use crate::sync::range_query::RangeQueryEngine;
use crate::sync::types::SyncError;
use crate::utils::block_chunks;

use ethers::types::Address;
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Configuration for the sync loop
#[derive(Debug, Clone)]
pub struct SyncConfig {
	/// Chain id the ledger must report
	pub expected_chain_id: u64,
	pub token_contract: Address,
	pub settlement_contract: Address,
	/// No block below this is ever synced
	pub deploy_block: u64,
	/// Blocks per chunk
	pub chunk_size: u64,
	/// Addresses per filter descriptor
	pub filter_capacity: NonZeroUsize,
	/// Sleep between cycles
	pub poll_interval: Duration,
	pub max_bisection_depth: u32,
	/// Give up verifying the chain id after this long
	pub startup_retry_window: Duration,
	/// Blocks between progress log lines
	pub progress_log_interval: u64,
}

/// Result of one polling cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
	/// Nothing new since the checkpoint.
	UpToDate { checkpoint: u64, head: u64 },
	/// Blocks `[from, to]` were processed and `to` committed.
	Synced { from: u64, to: u64 },
}

/// Counts reported by a processed chunk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct ChunkSummary {
	approvals: usize,
	balances: usize,
}

/// Main sync loop driver.
///
/// Construct with `new`, verify the ledger with `init`, then hand control to `run_forever`.
pub struct SyncService {
	config: SyncConfig,
	ledger: Arc<dyn LedgerClient>,
	state: StateStore,
	engine: RangeQueryEngine,
	batcher: FilterBatcher,
}

impl SyncService {
	pub fn new(
		config: SyncConfig,
		ledger: Arc<dyn LedgerClient>,
		kv: Arc<dyn KeyValueStore>,
	) -> Self {
		let state = StateStore::new(kv, config.expected_chain_id, config.settlement_contract);
		let engine = RangeQueryEngine::new(ledger.clone(), config.max_bisection_depth);
		let batcher = FilterBatcher::new(config.token_contract, config.filter_capacity);

		Self {
			config,
			ledger,
			state,
			engine,
			batcher,
		}
	}

	pub fn state(&self) -> &StateStore {
		&self.state
	}

	/// Verify the ledger serves the configured chain.
	///
	/// Transport errors are retried with exponential backoff for `startup_retry_window`;
	/// a mismatching chain id fails immediately.
	pub async fn init(&self) -> Result<(), SyncError> {
		let backoff = backoff::ExponentialBackoff {
			initial_interval: Duration::from_millis(400),
			randomization_factor: 0.1,
			multiplier: 2.0,
			max_interval: Duration::from_secs(30),
			max_elapsed_time: Some(self.config.startup_retry_window),
			..Default::default()
		};

		let actual = backoff::future::retry(backoff, || async move {
			self.ledger.chain_id().await.map_err(|e| {
				warn!("Failed to fetch chain id, retrying: {}", e);
				backoff::Error::transient(e)
			})
		})
		.await?;

		if actual != self.config.expected_chain_id {
			return Err(SyncError::ChainIdMismatch {
				expected: self.config.expected_chain_id,
				actual,
			});
		}

		info!(
			"Connected to chain {}, token {:?}, settlement {:?}",
			actual, self.config.token_contract, self.config.settlement_contract
		);
		Ok(())
	}

	/// Poll forever. Failed cycles are logged and retried on the next poll.
	pub async fn run_forever(&self) {
		loop {
			match self.run_cycle().await {
				Ok(CycleOutcome::Synced { from, to }) => {
					debug!("Cycle committed blocks {} to {}", from, to);
				}
				Ok(CycleOutcome::UpToDate { .. }) => {}
				Err(e) => {
					error!("Sync cycle failed, will retry from last checkpoint: {}", e);
				}
			}
			tokio::time::sleep(self.config.poll_interval).await;
		}
	}

	/// Run one polling cycle over every block between the checkpoint and the current head.
	pub async fn run_cycle(&self) -> Result<CycleOutcome, SyncError> {
		let checkpoint = self.state.checkpoint().await?;
		let head = self.ledger.block_number().await?;

		let from = checkpoint.saturating_add(1).max(self.config.deploy_block);
		let to = match head.checked_sub(1) {
			Some(to) if from <= to => to,
			_ => return Ok(CycleOutcome::UpToDate { checkpoint, head }),
		};

		info!("Syncing blocks {} to {}", from, to);
		let mut tracker =
			SyncProgressTracker::new(from, to, self.config.progress_log_interval);

		for (chunk_from, chunk_to) in block_chunks(from, to, self.config.chunk_size) {
			let summary = self.process_chunk(chunk_from, chunk_to).await?;
			self.state.set_checkpoint(chunk_to).await?;
			tracker.record_chunk(chunk_from, chunk_to, summary.approvals, summary.balances);
			tracker.log_progress(false);
		}

		if let Err(e) = tracker.validate_completion() {
			warn!("{}", e);
		}
		info!("{}", tracker.get_stats().summary());

		Ok(CycleOutcome::Synced { from, to })
	}

	async fn process_chunk(&self, from: u64, to: u64) -> Result<ChunkSummary, SyncError> {
		let mut active: HashSet<Address> = HashSet::new();

		let approval_filter = self.batcher.approval_filter(self.config.settlement_contract);
		let approvals = self.engine.get_events(&[approval_filter], from, to).await?;
		let mut folded = 0;
		for event in &approvals {
			match event {
				TokenEvent::Approval {
					owner,
					value,
					block,
					..
				} => {
					if self.state.set_approval(owner, *value, *block).await? {
						folded += 1;
					} else {
						let stored = self.state.approval_record(owner).await?;
						debug!(
							"Kept approval {:?} of {:?} from block {:?} over block {}",
							stored.value.map(|v| v.to_string()),
							owner,
							stored.block,
							block
						);
					}
					active.insert(*owner);
				}
				other => warn!("Ignoring non-approval event from approval filter: {:?}", other),
			}
		}

		let approvers = self.state.approver_set().await?;
		let filters: HolderFilters = self.batcher.holder_filters(&approvers);
		debug!(
			"Chunk [{}, {}]: {} approvals, {} approvers, {} holder filters",
			from,
			to,
			approvals.len(),
			approvers.len(),
			filters.len()
		);

		if !filters.is_empty() {
			for (kind, descriptors) in filters.by_kind() {
				let events = self.engine.get_events(descriptors, from, to).await?;
				debug!(
					"Chunk [{}, {}]: {} {:?} events, latest at block {:?}",
					from,
					to,
					events.len(),
					kind,
					events.iter().map(TokenEvent::block).max()
				);
				for event in &events {
					active.extend(event.touched_addresses());
				}
			}
		}

		let balances = self.refresh_balances(active).await?;
		Ok(ChunkSummary {
			approvals: folded,
			balances,
		})
	}

	/// Sample the balance of every address in `active` at the current head, skipping addresses
	/// already sampled at or after it. Returns how many balances were written.
	async fn refresh_balances(&self, active: HashSet<Address>) -> Result<usize, SyncError> {
		if active.is_empty() {
			return Ok(0);
		}

		let head = self.ledger.block_number().await?;
		let refreshes = active.into_iter().map(|owner| async move {
			let stored = self.state.balance_record(&owner).await?;
			if stored.block.is_some_and(|block| block >= head) {
				return Ok::<bool, SyncError>(false);
			}

			let balance = self
				.ledger
				.balance_of(owner, head)
				.await?
				.ok_or(SyncError::MissingBalance {
					address: owner,
					block: head,
				})?;
			if stored.value != Some(balance) {
				debug!(
					"Balance of {:?} moved from {:?} to {} at block {}",
					owner, stored.value, balance, head
				);
			}
			Ok(self.state.set_balance(&owner, balance, head).await?)
		});

		let written = futures::future::try_join_all(refreshes).await?;
		Ok(written.into_iter().filter(|w| *w).count())
	}
}
