use crate::ledger::LedgerError;
use crate::store::StoreError;
use ethers::types::Address;

/// Error types for the range query engine
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
	#[error("Invalid block range [{from}, {to}]")]
	InvalidRange { from: u64, to: u64 },

	#[error("Provider failed on [{from}, {to}]: {source}")]
	ProviderFailure {
		from: u64,
		to: u64,
		#[source]
		source: LedgerError,
	},

	#[error("Bisection depth {depth} exceeded on [{from}, {to}]: {source}")]
	DepthExceeded {
		from: u64,
		to: u64,
		depth: u32,
		#[source]
		source: LedgerError,
	},
}

/// Error types for the sync worker
#[allow(clippy::enum_variant_names)]
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
	#[error("Ledger error: {0}")]
	LedgerError(#[from] LedgerError),

	#[error("Store error: {0}")]
	StoreError(#[from] StoreError),

	#[error("Query error: {0}")]
	QueryError(#[from] QueryError),

	#[error("Chain id mismatch: configured {expected}, node reports {actual}")]
	ChainIdMismatch { expected: u64, actual: u64 },

	#[error("No balance returned for {address:?} at block {block}")]
	MissingBalance { address: Address, block: u64 },

	#[error("Config error: {0}")]
	ConfigError(String),
}
