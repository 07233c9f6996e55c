//! Filter batching for holder event queries.
//!
//! Providers cap how many addresses a single log filter may carry, so an unbounded address set
//! is split into fixed capacity groups, one `FilterDescriptor` per group and event kind. The
//! caller queries each descriptor on its own and merges the results.

use crate::ledger::{EventKind, FilterDescriptor};
use ethers::types::Address;
use itertools::Itertools;
use std::collections::{BTreeSet, HashSet};
use std::num::NonZeroUsize;

/// Split `addresses` into groups of at most `capacity`, in iteration order, and build one
/// descriptor of `kind` on `contract` per group.
pub fn build_filters<'a>(
	kind: EventKind,
	contract: Address,
	addresses: impl IntoIterator<Item = &'a Address>,
	capacity: NonZeroUsize,
) -> Vec<FilterDescriptor> {
	addresses
		.into_iter()
		.copied()
		.chunks(capacity.get())
		.into_iter()
		.map(|group| FilterDescriptor::new(kind, contract, group.collect()))
		.collect()
}

/// Holder filters for one chunk, grouped by event kind.
#[derive(Debug, Clone, Default)]
pub struct HolderFilters {
	pub transfer_from: Vec<FilterDescriptor>,
	pub transfer_to: Vec<FilterDescriptor>,
	pub deposit: Vec<FilterDescriptor>,
	pub withdrawal: Vec<FilterDescriptor>,
}

impl HolderFilters {
	/// Descriptors per kind: transfers out, transfers in, deposits, withdrawals.
	pub fn by_kind(&self) -> [(EventKind, &[FilterDescriptor]); 4] {
		[
			(EventKind::TransferFrom, self.transfer_from.as_slice()),
			(EventKind::TransferTo, self.transfer_to.as_slice()),
			(EventKind::Deposit, self.deposit.as_slice()),
			(EventKind::Withdrawal, self.withdrawal.as_slice()),
		]
	}

	pub fn len(&self) -> usize {
		self.transfer_from.len() + self.transfer_to.len() + self.deposit.len() + self.withdrawal.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

/// Builds the filters the sync driver issues against the token contract.
#[derive(Debug, Clone)]
pub struct FilterBatcher {
	token_contract: Address,
	capacity: NonZeroUsize,
}

impl FilterBatcher {
	pub fn new(token_contract: Address, capacity: NonZeroUsize) -> Self {
		Self {
			token_contract,
			capacity,
		}
	}

	/// Approvals granted to `spender` on the token contract.
	pub fn approval_filter(&self, spender: Address) -> FilterDescriptor {
		FilterDescriptor::new(EventKind::Approval, self.token_contract, vec![spender])
	}

	/// Transfer, deposit and withdrawal filters covering every address in `holders`.
	///
	/// Addresses are sorted first so the grouping does not depend on set iteration order.
	pub fn holder_filters(&self, holders: &HashSet<Address>) -> HolderFilters {
		let sorted: BTreeSet<&Address> = holders.iter().collect();
		let build = |kind| {
			build_filters(
				kind,
				self.token_contract,
				sorted.iter().copied(),
				self.capacity,
			)
		};
		HolderFilters {
			transfer_from: build(EventKind::TransferFrom),
			transfer_to: build(EventKind::TransferTo),
			deposit: build(EventKind::Deposit),
			withdrawal: build(EventKind::Withdrawal),
		}
	}
}
