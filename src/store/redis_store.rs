//! Redis implementation of `KeyValueStore`.
//!
//! Connections come from a `bb8` pool. Every trait operation maps to the Redis command of the
//! same name, and `sscan` is a real `SSCAN`, so pages may repeat members.

use crate::store::StoreError;
use crate::store::kv::KeyValueStore;
use async_trait::async_trait;
use bb8_redis::RedisConnectionManager;
use bb8_redis::bb8::{Pool, PooledConnection};
use bb8_redis::redis::{self, AsyncCommands};
use tracing::info;

/// Build the connection URL for `host:port`, database `db`.
pub fn redis_url(host: &str, port: u16, db: u32) -> String {
	format!("redis://{}:{}/{}", host, port, db)
}

/// Pooled Redis client
pub struct RedisStore {
	pool: Pool<RedisConnectionManager>,
}

impl RedisStore {
	/// Create the pool and check the server answers `PING`.
	pub async fn connect(url: &str) -> Result<Self, StoreError> {
		let manager = RedisConnectionManager::new(url)?;
		let pool = Pool::builder().build(manager).await?;
		let store = Self { pool };

		let mut conn = store.connection().await?;
		let pong: String = redis::cmd("PING").query_async(&mut *conn).await?;
		drop(conn);

		info!("Connected to redis at {} ({})", url, pong);
		Ok(store)
	}

	async fn connection(&self) -> Result<PooledConnection<'_, RedisConnectionManager>, StoreError> {
		Ok(self.pool.get().await?)
	}
}

#[async_trait]
impl KeyValueStore for RedisStore {
	async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
		let mut conn = self.connection().await?;
		Ok(conn.get(key).await?)
	}

	async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
		let mut conn = self.connection().await?;
		conn.set::<_, _, ()>(key, value).await?;
		Ok(())
	}

	async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
		let mut conn = self.connection().await?;
		Ok(conn.hget(key, field).await?)
	}

	async fn hset_multiple(&self, key: &str, fields: &[(&str, String)]) -> Result<(), StoreError> {
		let mut conn = self.connection().await?;
		conn.hset_multiple::<_, _, _, ()>(key, fields).await?;
		Ok(())
	}

	async fn sadd(&self, key: &str, member: &str) -> Result<bool, StoreError> {
		let mut conn = self.connection().await?;
		let added: i64 = conn.sadd(key, member).await?;
		Ok(added > 0)
	}

	async fn scard(&self, key: &str) -> Result<usize, StoreError> {
		let mut conn = self.connection().await?;
		Ok(conn.scard(key).await?)
	}

	async fn sscan(
		&self,
		key: &str,
		cursor: u64,
		count: usize,
	) -> Result<(u64, Vec<String>), StoreError> {
		let mut conn = self.connection().await?;
		let (next, page): (u64, Vec<String>) = redis::cmd("SSCAN")
			.arg(key)
			.arg(cursor)
			.arg("COUNT")
			.arg(count)
			.query_async(&mut *conn)
			.await?;
		Ok((next, page))
	}
}
