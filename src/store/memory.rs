//! Thread-safe in-memory [`DocumentStore`] implementation for local development and tests.

// self
use crate::{
	_prelude::*,
	auth::AccessToken,
	store::{AccessRecord, DocumentStore, StoreError, StoreFuture},
};

type StoreMap = Arc<RwLock<HashMap<AccessToken, AccessRecord>>>;

/// Thread-safe storage backend that keeps the token index in-process.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore(StoreMap);
impl MemoryStore {
	/// Inserts or replaces a record without going through the async contract.
	pub fn insert_now(&self, record: AccessRecord) {
		self.0.write().insert(record.token, record);
	}

	/// Number of indexed tokens.
	pub fn len(&self) -> usize {
		self.0.read().len()
	}

	/// Returns `true` when no token is indexed.
	pub fn is_empty(&self) -> bool {
		self.0.read().is_empty()
	}

	fn fetch_now(map: StoreMap, token: AccessToken) -> Option<AccessRecord> {
		map.read().get(&token).cloned()
	}

	fn set_public_now(map: StoreMap, token: AccessToken, is_public: bool) -> Option<AccessRecord> {
		let mut guard = map.write();

		match guard.get_mut(&token) {
			Some(record) => {
				record.is_public = is_public;

				Some(record.clone())
			},
			None => None,
		}
	}
}
impl FromIterator<AccessRecord> for MemoryStore {
	fn from_iter<I: IntoIterator<Item = AccessRecord>>(iter: I) -> Self {
		let map = iter.into_iter().map(|record| (record.token, record)).collect();

		Self(Arc::new(RwLock::new(map)))
	}
}
impl DocumentStore for MemoryStore {
	fn get_by_token<'a>(&'a self, token: &'a AccessToken) -> StoreFuture<'a, Option<AccessRecord>> {
		let map = self.0.clone();
		let token = *token;

		Box::pin(async move { Ok(Self::fetch_now(map, token)) })
	}

	fn save(&self, record: AccessRecord) -> StoreFuture<'_, ()> {
		let map = self.0.clone();

		Box::pin(async move {
			map.write().insert(record.token, record);

			Ok::<_, StoreError>(())
		})
	}

	fn set_public<'a>(
		&'a self,
		token: &'a AccessToken,
		is_public: bool,
	) -> StoreFuture<'a, Option<AccessRecord>> {
		let map = self.0.clone();
		let token = *token;

		Box::pin(async move { Ok(Self::set_public_now(map, token, is_public)) })
	}
}
