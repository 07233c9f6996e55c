//! Range query engine.
//!
//! Turns a block range into the complete event list for a set of filters even when the provider
//! rejects wide ranges. A failed request is split in half and both halves are queried
//! concurrently, recursively, until the range is too narrow to split further or the bisection
//! depth cap is reached.

use crate::ledger::{FilterDescriptor, LedgerClient, TokenEvent};
use crate::sync::types::QueryError;
use futures::future::{BoxFuture, FutureExt};
use std::sync::Arc;
use tracing::{debug, warn};

/// Failed requests spanning fewer blocks than this (`to - from`) are not split again.
pub const MIN_BISECTION_SPAN: u64 = 10;

/// Default cap on nested bisections for a single filter.
pub const DEFAULT_MAX_BISECTION_DEPTH: u32 = 32;

pub struct RangeQueryEngine {
	ledger: Arc<dyn LedgerClient>,
	max_depth: u32,
}

impl RangeQueryEngine {
	pub fn new(ledger: Arc<dyn LedgerClient>, max_depth: u32) -> Self {
		Self { ledger, max_depth }
	}

	/// All events matching any of `filters` in the inclusive range `[from, to]`.
	///
	/// Filters are queried one after another. Results are concatenated in filter order, and
	/// within a filter in block range order.
	pub async fn get_events(
		&self,
		filters: &[FilterDescriptor],
		from: u64,
		to: u64,
	) -> Result<Vec<TokenEvent>, QueryError> {
		if from > to {
			return Err(QueryError::InvalidRange { from, to });
		}

		let mut events = Vec::new();
		for filter in filters {
			events.extend(self.query_range(filter, from, to, 0).await?);
		}
		Ok(events)
	}

	fn query_range<'a>(
		&'a self,
		filter: &'a FilterDescriptor,
		from: u64,
		to: u64,
		depth: u32,
	) -> BoxFuture<'a, Result<Vec<TokenEvent>, QueryError>> {
		async move {
			let error = match self.ledger.query_events(filter, from, to).await {
				Ok(events) => return Ok(events),
				Err(e) => e,
			};

			if to - from < MIN_BISECTION_SPAN {
				return Err(QueryError::ProviderFailure {
					from,
					to,
					source: error,
				});
			}
			if depth >= self.max_depth {
				return Err(QueryError::DepthExceeded {
					from,
					to,
					depth,
					source: error,
				});
			}

			let mid = from + (to - from) / 2;
			if depth == 0 {
				warn!(
					"{:?} query on [{}, {}] failed, bisecting: {}",
					filter.kind, from, to, error
				);
			} else {
				debug!(
					"{:?} query on [{}, {}] failed at depth {}, bisecting at {}",
					filter.kind, from, to, depth, mid
				);
			}

			let (mut lower, upper) = futures::try_join!(
				self.query_range(filter, from, mid, depth + 1),
				self.query_range(filter, mid + 1, to, depth + 1),
			)?;
			lower.extend(upper);
			Ok(lower)
		}
		.boxed()
	}
}
