//! Simple file-backed [`DocumentStore`] for single-node deployments.

// std
use std::{
	fs::{self, File},
	path::{Path, PathBuf},
};
// self
use crate::{
	_prelude::*,
	auth::AccessToken,
	store::{AccessRecord, DocumentStore, StoreError, StoreFuture},
};

#[derive(Debug)]
struct Index {
	records: HashMap<AccessToken, AccessRecord>,
	// Bumped on every mutation so stale snapshots can be skipped.
	generation: u64,
}
impl Index {
	fn snapshot(&self) -> Result<Vec<u8>, StoreError> {
		let mut records: Vec<_> = self.records.values().collect();

		records.sort_by(|a, b| (&a.owner, &a.name).cmp(&(&b.owner, &b.name)));

		serde_json::to_vec_pretty(&records).map_err(|e| StoreError::Serialization {
			message: format!("Failed to encode the token index: {e}"),
		})
	}
}

/// Persists the token index to a JSON array of [`AccessRecord`]s after each mutation.
///
/// Mutations update the in-memory index under a short lock; the encoded snapshot is written
/// on the blocking pool afterwards, so lookups never wait on disk I/O.
#[derive(Clone, Debug)]
pub struct FileStore {
	path: Arc<PathBuf>,
	index: Arc<RwLock<Index>>,
	// Generation of the snapshot currently on disk.
	written: Arc<tokio::sync::Mutex<u64>>,
}
impl FileStore {
	/// Opens (or creates) a store at the provided path, eagerly loading existing data.
	pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let path = path.into();

		if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
			fs::create_dir_all(parent).map_err(|e| StoreError::Backend {
				message: format!("Failed to create store directory {}: {e}", parent.display()),
			})?;
		}

		let records = if path.exists() { load(&path)? } else { HashMap::new() };

		tracing::info!(
			target: "api",
			path = %path.display(),
			records = records.len(),
			"Loaded access-token index."
		);

		Ok(Self {
			path: Arc::new(path),
			index: Arc::new(RwLock::new(Index { records, generation: 0 })),
			written: Default::default(),
		})
	}

	// Applies `mutate` under the write lock and returns the encoded snapshot, if it changed.
	fn mutate<T>(
		&self,
		mutate: impl FnOnce(&mut HashMap<AccessToken, AccessRecord>) -> Option<T>,
	) -> Result<Option<(T, u64, Vec<u8>)>, StoreError> {
		let mut index = self.index.write();
		let Some(out) = mutate(&mut index.records) else {
			return Ok(None);
		};

		index.generation += 1;

		Ok(Some((out, index.generation, index.snapshot()?)))
	}

	async fn persist(&self, generation: u64, snapshot: Vec<u8>) -> Result<(), StoreError> {
		let mut written = self.written.lock().await;

		// A newer snapshot already includes this mutation.
		if *written >= generation {
			return Ok(());
		}

		let path = Arc::clone(&self.path);

		tokio::task::spawn_blocking(move || replace(&path, &snapshot)).await.map_err(|e| {
			StoreError::Backend { message: format!("Snapshot writer did not finish: {e}") }
		})??;

		*written = generation;

		Ok(())
	}
}
impl DocumentStore for FileStore {
	fn get_by_token<'a>(&'a self, token: &'a AccessToken) -> StoreFuture<'a, Option<AccessRecord>> {
		Box::pin(async move { Ok(self.index.read().records.get(token).cloned()) })
	}

	fn save(&self, record: AccessRecord) -> StoreFuture<'_, ()> {
		Box::pin(async move {
			let changed = self.mutate(|records| {
				records.insert(record.token, record);

				Some(())
			})?;

			if let Some(((), generation, snapshot)) = changed {
				self.persist(generation, snapshot).await?;
			}

			Ok(())
		})
	}

	fn set_public<'a>(
		&'a self,
		token: &'a AccessToken,
		is_public: bool,
	) -> StoreFuture<'a, Option<AccessRecord>> {
		Box::pin(async move {
			let changed = self.mutate(|records| {
				let record = records.get_mut(token)?;

				record.is_public = is_public;

				Some(record.clone())
			})?;
			let Some((updated, generation, snapshot)) = changed else {
				return Ok(None);
			};

			self.persist(generation, snapshot).await?;

			Ok(Some(updated))
		})
	}
}

fn load(path: &Path) -> Result<HashMap<AccessToken, AccessRecord>, StoreError> {
	let bytes = fs::read(path).map_err(|e| StoreError::Backend {
		message: format!("Failed to read {}: {e}", path.display()),
	})?;

	if bytes.iter().all(u8::is_ascii_whitespace) {
		return Ok(HashMap::new());
	}

	let de = &mut serde_json::Deserializer::from_slice(&bytes);
	let records: Vec<AccessRecord> =
		serde_path_to_error::deserialize(de).map_err(|e| StoreError::Serialization {
			message: format!("Failed to parse {} at `{}`: {}", path.display(), e.path(), e.inner()),
		})?;

	Ok(records.into_iter().map(|record| (record.token, record)).collect())
}

// Writes `snapshot` next to `path`, flushes it, then swaps it in with a rename.
fn replace(path: &Path, snapshot: &[u8]) -> Result<(), StoreError> {
	let staged = path.with_extension("tmp");
	let backend = |action: &str, at: &Path, e: std::io::Error| StoreError::Backend {
		message: format!("Failed to {action} {}: {e}", at.display()),
	};

	fs::write(&staged, snapshot).map_err(|e| backend("write", &staged, e))?;
	File::open(&staged)
		.and_then(|file| file.sync_all())
		.map_err(|e| backend("sync", &staged, e))?;
	fs::rename(&staged, path).map_err(|e| backend("replace", path, e))
}

#[cfg(test)]
mod tests {
	// std
	use std::{env, process};
	// crates.io
	use tokio::runtime::Runtime;
	// self
	use super::*;
	use crate::_preludet::access_record;

	fn temp_path(tag: &str) -> PathBuf {
		let unique = format!(
			"widget_proxy_file_store_{tag}_{}_{}.json",
			process::id(),
			OffsetDateTime::now_utc().unix_timestamp_nanos(),
		);

		env::temp_dir().join(unique)
	}

	#[test]
	fn save_publish_and_reload_round_trip() {
		let path = temp_path("reload");
		let store = FileStore::open(&path).expect("Failed to open file store snapshot.");
		let record = access_record("alice", "widget", false);
		let rt = Runtime::new().expect("Failed to build Tokio runtime for file store test.");

		rt.block_on(store.save(record.clone())).expect("Failed to save fixture record.");
		rt.block_on(store.set_public(&record.token, true))
			.expect("Failed to publish fixture record.")
			.expect("Published record should be returned.");
		drop(store);

		let reopened = FileStore::open(&path).expect("Failed to reopen file store snapshot.");
		let fetched = rt
			.block_on(reopened.get_by_token(&record.token))
			.expect("Failed to fetch fixture record from file store.")
			.expect("File store lost record after reopen.");

		assert!(fetched.is_public);
		assert_eq!(fetched.owner, record.owner);

		fs::remove_file(&path).unwrap_or_else(|e| {
			panic!("Failed to remove temporary file store snapshot {}: {e}", path.display())
		});
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
	async fn concurrent_saves_leave_the_latest_snapshot_on_disk() {
		let path = temp_path("concurrent");
		let store = FileStore::open(&path).expect("Failed to open file store snapshot.");
		let records: Vec<_> =
			(0..16).map(|i| access_record("alice", &format!("widget-{i}"), i % 2 == 0)).collect();
		let tasks: Vec<_> = records
			.iter()
			.cloned()
			.map(|record| {
				let store = store.clone();

				tokio::spawn(async move { store.save(record).await })
			})
			.collect();

		for task in tasks {
			task.await
				.expect("Save task should not panic.")
				.expect("Concurrent save should persist.");
		}

		let reopened = FileStore::open(&path).expect("Failed to reopen file store snapshot.");

		for record in &records {
			let fetched = reopened
				.get_by_token(&record.token)
				.await
				.expect("Lookup should succeed.")
				.expect("Every concurrently saved record should be on disk.");

			assert_eq!(fetched.is_public, record.is_public);
		}

		fs::remove_file(&path).unwrap_or_else(|e| {
			panic!("Failed to remove temporary file store snapshot {}: {e}", path.display())
		});
	}

	#[test]
	fn malformed_snapshot_reports_the_offending_path() {
		let path = temp_path("malformed");

		fs::write(&path, r#"[{"token":"7d444840-9dc0-11d1-b245-5ffdce74fad2","owner":"has space","name":"x"}]"#)
			.expect("Failed to write malformed snapshot.");

		let err = FileStore::open(&path).expect_err("Invalid owners should fail to load.");

		assert!(matches!(err, StoreError::Serialization { .. }));
		assert!(err.to_string().contains("owner"), "Error should name the field: {err}.");

		fs::remove_file(&path).unwrap_or_else(|e| {
			panic!("Failed to remove temporary file store snapshot {}: {e}", path.display())
		});
	}
}
