//! Access-control contract of the JSON-document store, plus built-in backends.
//!
//! Documents themselves live elsewhere; the proxy only needs the token index that maps a
//! published token to its owner and public flag.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

// self
use crate::{
	_prelude::*,
	auth::{AccessToken, Identity},
};

/// Boxed future returned by [`DocumentStore`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Token index exposed by the document store.
pub trait DocumentStore
where
	Self: Send + Sync,
{
	/// Looks up the access record bound to `token`, if any.
	fn get_by_token<'a>(&'a self, token: &'a AccessToken) -> StoreFuture<'a, Option<AccessRecord>>;

	/// Persists or replaces a record keyed by its token.
	fn save(&self, record: AccessRecord) -> StoreFuture<'_, ()>;

	/// Flips the public flag of a record (owner-initiated publish/unpublish).
	///
	/// Returns the updated record, or `None` when the token is unknown. Unpublishing takes
	/// effect for the very next lookup; the record is never deleted.
	fn set_public<'a>(
		&'a self,
		token: &'a AccessToken,
		is_public: bool,
	) -> StoreFuture<'a, Option<AccessRecord>>;
}

/// Access-control slice of a stored JSON document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRecord {
	/// Token granting proxy access while the document is public.
	pub token: AccessToken,
	/// Owner of the document; becomes the caller identity on successful resolution.
	pub owner: Identity,
	/// Owner-scoped document name.
	pub name: String,
	/// Whether the token currently authenticates callers.
	#[serde(default)]
	pub is_public: bool,
}
impl AccessRecord {
	/// Creates a private record for the provided token/owner/name triple.
	pub fn new(token: AccessToken, owner: Identity, name: impl Into<String>) -> Self {
		Self { token, owner, name: name.into(), is_public: false }
	}

	/// Overrides the public flag.
	pub fn with_public(mut self, is_public: bool) -> Self {
		self.is_public = is_public;

		self
	}
}

/// Error type produced by [`DocumentStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}
