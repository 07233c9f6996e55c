use crate::store::StoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::info;

/// Persistent key-value store with string values, hashes and sets.
///
/// `sscan` walks a set in pages. A scan starts and ends at cursor `0`, and a page may repeat
/// members already returned by an earlier page, so callers must accumulate into a set.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
	async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
	async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
	async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;
	async fn hset_multiple(&self, key: &str, fields: &[(&str, String)]) -> Result<(), StoreError>;
	/// Returns whether the member was newly added.
	async fn sadd(&self, key: &str, member: &str) -> Result<bool, StoreError>;
	async fn scard(&self, key: &str) -> Result<usize, StoreError>;
	async fn sscan(
		&self,
		key: &str,
		cursor: u64,
		count: usize,
	) -> Result<(u64, Vec<String>), StoreError>;
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct StoreData {
	strings: BTreeMap<String, String>,
	hashes: BTreeMap<String, BTreeMap<String, String>>,
	sets: BTreeMap<String, BTreeSet<String>>,
}

/// In-process implementation of `KeyValueStore`
#[derive(Default)]
pub struct MemoryStore {
	data: RwLock<StoreData>,
	/// Members of the previous page repeated at the start of each later scan page.
	scan_overlap: usize,
}

impl MemoryStore {
	#[cfg(test)]
	pub fn new() -> Self {
		Self::default()
	}

	/// Repeat `overlap` members across scan page boundaries, the way a rehashing store does.
	#[cfg(test)]
	pub fn with_scan_overlap(mut self, overlap: usize) -> Self {
		self.scan_overlap = overlap;
		self
	}

	fn from_data(data: StoreData) -> Self {
		Self {
			data: RwLock::new(data),
			scan_overlap: 0,
		}
	}
}

#[async_trait]
impl KeyValueStore for MemoryStore {
	async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
		Ok(self.data.read().await.strings.get(key).cloned())
	}

	async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
		self.data
			.write()
			.await
			.strings
			.insert(key.to_string(), value.to_string());
		Ok(())
	}

	async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
		Ok(self
			.data
			.read()
			.await
			.hashes
			.get(key)
			.and_then(|hash| hash.get(field))
			.cloned())
	}

	async fn hset_multiple(&self, key: &str, fields: &[(&str, String)]) -> Result<(), StoreError> {
		let mut data = self.data.write().await;
		let hash = data.hashes.entry(key.to_string()).or_default();
		for (field, value) in fields {
			hash.insert(field.to_string(), value.clone());
		}
		Ok(())
	}

	async fn sadd(&self, key: &str, member: &str) -> Result<bool, StoreError> {
		Ok(self
			.data
			.write()
			.await
			.sets
			.entry(key.to_string())
			.or_default()
			.insert(member.to_string()))
	}

	async fn scard(&self, key: &str) -> Result<usize, StoreError> {
		Ok(self
			.data
			.read()
			.await
			.sets
			.get(key)
			.map_or(0, BTreeSet::len))
	}

	async fn sscan(
		&self,
		key: &str,
		cursor: u64,
		count: usize,
	) -> Result<(u64, Vec<String>), StoreError> {
		let data = self.data.read().await;
		let Some(members) = data.sets.get(key) else {
			return Ok((0, Vec::new()));
		};

		let start = usize::try_from(cursor).unwrap_or(usize::MAX).min(members.len());
		let end = start.saturating_add(count.max(1)).min(members.len());
		let page_start = if cursor == 0 {
			start
		} else {
			start.saturating_sub(self.scan_overlap)
		};
		let page = members
			.iter()
			.skip(page_start)
			.take(end - page_start)
			.cloned()
			.collect();
		let next = if end >= members.len() { 0 } else { end as u64 };
		Ok((next, page))
	}
}

/// Snapshot file layout for `FileStore`.
#[derive(Serialize, Deserialize)]
struct Snapshot<D> {
	saved_at: String,
	data: D,
}

/// File-backed implementation of `KeyValueStore` for local development.
///
/// Holds the whole store in memory and rewrites a JSON snapshot after every mutation, so the
/// cost of a write grows with the size of the store. Production deployments use `RedisStore`.
pub struct FileStore {
	path: PathBuf,
	inner: MemoryStore,
	persist_lock: Mutex<()>,
}

impl FileStore {
	/// Open the store at `path`, loading the existing snapshot when there is one.
	pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
		let path = path.as_ref().to_path_buf();

		let data = match tokio::fs::read_to_string(&path).await {
			Ok(content) => {
				let snapshot: Snapshot<StoreData> = serde_json::from_str(&content)?;
				info!(
					"Loaded store snapshot from {:?} saved at {}",
					path, snapshot.saved_at
				);
				snapshot.data
			}
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				info!("No store snapshot at {:?}, starting empty", path);
				StoreData::default()
			}
			Err(e) => return Err(e.into()),
		};

		Ok(Self {
			path,
			inner: MemoryStore::from_data(data),
			persist_lock: Mutex::new(()),
		})
	}

	async fn persist(&self) -> Result<(), StoreError> {
		let _guard = self.persist_lock.lock().await;

		let content = {
			let data = self.inner.data.read().await;
			serde_json::to_vec_pretty(&Snapshot {
				saved_at: chrono::Utc::now().to_rfc3339(),
				data: &*data,
			})?
		};

		let tmp_path = self.tmp_path();
		let mut file = tokio::fs::File::create(&tmp_path).await?;
		file.write_all(&content).await?;
		file.sync_all().await?;
		drop(file);
		tokio::fs::rename(&tmp_path, &self.path).await?;
		Ok(())
	}

	fn tmp_path(&self) -> PathBuf {
		let mut tmp_path = self.path.clone().into_os_string();
		tmp_path.push(".tmp");
		PathBuf::from(tmp_path)
	}
}

#[async_trait]
impl KeyValueStore for FileStore {
	async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
		self.inner.get(key).await
	}

	async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
		self.inner.set(key, value).await?;
		self.persist().await
	}

	async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
		self.inner.hget(key, field).await
	}

	async fn hset_multiple(&self, key: &str, fields: &[(&str, String)]) -> Result<(), StoreError> {
		self.inner.hset_multiple(key, fields).await?;
		self.persist().await
	}

	async fn sadd(&self, key: &str, member: &str) -> Result<bool, StoreError> {
		let added = self.inner.sadd(key, member).await?;
		if added {
			self.persist().await?;
		}
		Ok(added)
	}

	async fn scard(&self, key: &str) -> Result<usize, StoreError> {
		self.inner.scard(key).await
	}

	async fn sscan(
		&self,
		key: &str,
		cursor: u64,
		count: usize,
	) -> Result<(u64, Vec<String>), StoreError> {
		self.inner.sscan(key, cursor, count).await
	}
}
