//! Durable state for the approval sync worker
//!
//! - `kv`: The persistent key-value store abstraction with in-memory and file-snapshot backends.
//! - `redis_store`: The Redis backend used in production.
//! - `state`: The state store holding the checkpoint, per-address approval and balance records,
//!   and the approver set with its in-memory cache.

use bb8_redis::bb8::RunError;
use bb8_redis::redis::RedisError;

/// Key-value store abstraction and backends
pub mod kv;
/// Redis key-value store
pub mod redis_store;
/// Checkpoint, approver records and the approver set cache
pub mod state;

pub use kv::{FileStore, KeyValueStore};
pub use redis_store::{RedisStore, redis_url};
pub use state::StateStore;

/// Error types for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
	#[error("IO error: {0}")]
	IoError(#[from] std::io::Error),

	#[error("Serialization error: {0}")]
	SerializationError(#[from] serde_json::Error),

	#[error("Redis error: {0}")]
	RedisError(#[from] RedisError),

	#[error("Redis pool error: {0}")]
	PoolError(#[from] RunError<RedisError>),

	#[error("Corrupt value {value:?} under {key}")]
	CorruptValue { key: String, value: String },
}
