//! Progress tracking for a sync cycle.
//!
//! This module provides the `SyncProgressTracker`, which records the chunks committed during one
//! polling cycle, counts approvals folded and balances refreshed, and logs progress at regular
//! block intervals. It also checks that committed chunks were contiguous and reached the end of
//! the cycle's range.

use tracing::{info, warn};

/// Default number of blocks between progress log lines.
pub const DEFAULT_LOG_INTERVAL: u64 = 10_000;

/// Service for tracking synchronization progress within one cycle
#[derive(Debug, Clone)]
pub struct SyncProgressTracker {
	/// First block of the cycle's range
	start_block: u64,
	/// Last block of the cycle's range
	end_block: u64,
	/// Highest block committed so far
	highest_committed: Option<u64>,
	/// Chunks whose end did not directly follow the previous chunk
	gaps: Vec<(u64, u64)>,
	chunks_committed: usize,
	approvals_folded: usize,
	balances_refreshed: usize,
	/// Block at which progress was last logged
	last_logged_block: u64,
	log_interval: u64,
}

impl SyncProgressTracker {
	/// Create a new progress tracker for the inclusive range `[start_block, end_block]`.
	pub fn new(start_block: u64, end_block: u64, log_interval: u64) -> Self {
		Self {
			start_block,
			end_block,
			highest_committed: None,
			gaps: Vec::new(),
			chunks_committed: 0,
			approvals_folded: 0,
			balances_refreshed: 0,
			last_logged_block: start_block,
			log_interval,
		}
	}

	/// Record a committed chunk `[from, to]`.
	pub fn record_chunk(&mut self, from: u64, to: u64, approvals: usize, balances: usize) {
		let expected_from = self.highest_committed.map_or(self.start_block, |h| h + 1);
		if from != expected_from {
			self.gaps.push((expected_from, from));
		}
		self.highest_committed = Some(self.highest_committed.map_or(to, |h| h.max(to)));
		self.chunks_committed += 1;
		self.approvals_folded += approvals;
		self.balances_refreshed += balances;
	}

	/// Log progress every `log_interval` blocks, or when forced
	pub fn log_progress(&mut self, force: bool) {
		let Some(highest) = self.highest_committed else {
			return;
		};
		let blocks_since_last_log = highest.saturating_sub(self.last_logged_block);
		if force || blocks_since_last_log >= self.log_interval {
			let total = self.end_block - self.start_block + 1;
			let done = highest - self.start_block + 1;
			info!(
				"Sync progress: {}/{} blocks ({}%), up to block {}, {} approvals, {} balances",
				done,
				total,
				done * 100 / total,
				highest,
				self.approvals_folded,
				self.balances_refreshed
			);
			self.last_logged_block = highest;
		}
	}

	/// Get sync statistics as a SyncStats struct
	pub fn get_stats(&self) -> SyncStats {
		SyncStats {
			start_block: self.start_block,
			end_block: self.end_block,
			highest_committed: self.highest_committed,
			chunks_committed: self.chunks_committed,
			approvals_folded: self.approvals_folded,
			balances_refreshed: self.balances_refreshed,
			gaps: self.gaps.clone(),
		}
	}

	/// Validate that the cycle committed every block of its range.
	pub fn validate_completion(&self) -> Result<(), String> {
		if self.highest_committed != Some(self.end_block) {
			return Err(format!(
				"Cycle stopped at {:?}, expected to reach block {}",
				self.highest_committed, self.end_block
			));
		}

		for (expected, got) in &self.gaps {
			warn!(
				"Gap detected: expected chunk starting at {}, got {}",
				expected, got
			);
		}

		Ok(())
	}
}

/// Statistics about one sync cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStats {
	pub start_block: u64,
	pub end_block: u64,
	pub highest_committed: Option<u64>,
	pub chunks_committed: usize,
	pub approvals_folded: usize,
	pub balances_refreshed: usize,
	pub gaps: Vec<(u64, u64)>,
}

impl SyncStats {
	/// Get a human-readable summary of the sync statistics
	pub fn summary(&self) -> String {
		format!(
			"Synced blocks {} to {} in {} chunks: {} approvals, {} balances{}",
			self.start_block,
			self.end_block,
			self.chunks_committed,
			self.approvals_folded,
			self.balances_refreshed,
			if self.gaps.is_empty() {
				String::new()
			} else {
				format!(" ({} gaps)", self.gaps.len())
			}
		)
	}
}
