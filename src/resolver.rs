//! Token Resolver: maps a presented access token to the identity of its document owner.

// self
use crate::{
	_prelude::*,
	auth::{AccessToken, Identity},
	store::DocumentStore,
};

/// Why a presented token did not authenticate the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnauthenticatedReason {
	/// No session and no token were presented.
	Missing,
	/// The token is not UUID-shaped.
	Malformed,
	/// No document is bound to the token.
	NotFound,
	/// The bound document is not public.
	NotPublic,
	/// The store could not answer; access fails closed.
	StoreUnavailable,
}
impl UnauthenticatedReason {
	/// Returns a stable label suitable for log fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Missing => "missing",
			Self::Malformed => "malformed",
			Self::NotFound => "not_found",
			Self::NotPublic => "not_public",
			Self::StoreUnavailable => "store_unavailable",
		}
	}
}
impl Display for UnauthenticatedReason {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Authentication failure. Always reported to callers as 403 without further detail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ThisError)]
#[error("Authentication credentials were missing or invalid.")]
pub struct Unauthenticated {
	/// Internal reason, for logs only.
	pub reason: UnauthenticatedReason,
}
impl Unauthenticated {
	/// Creates a failure with the provided reason.
	pub const fn new(reason: UnauthenticatedReason) -> Self {
		Self { reason }
	}
}

/// Read-only view over the document store's token index.
#[derive(Clone)]
pub struct TokenResolver {
	store: Arc<dyn DocumentStore>,
}
impl TokenResolver {
	/// Creates a resolver backed by `store`.
	pub fn new(store: Arc<dyn DocumentStore>) -> Self {
		Self { store }
	}

	/// Resolves `token` to its owner if the token is well-formed, bound, and public.
	pub async fn resolve(&self, token: &str) -> Result<Identity, Unauthenticated> {
		let token = AccessToken::parse(token)
			.map_err(|_| Unauthenticated::new(UnauthenticatedReason::Malformed))?;
		let record = match self.store.get_by_token(&token).await {
			Ok(Some(record)) => record,
			Ok(None) => return Err(Unauthenticated::new(UnauthenticatedReason::NotFound)),
			Err(e) => {
				tracing::error!(target: "security", token = %token, error = %e, "Token index lookup failed.");

				return Err(Unauthenticated::new(UnauthenticatedReason::StoreUnavailable));
			},
		};

		if !record.is_public {
			return Err(Unauthenticated::new(UnauthenticatedReason::NotPublic));
		}

		Ok(record.owner)
	}
}
impl Debug for TokenResolver {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("TokenResolver(..)")
	}
}
