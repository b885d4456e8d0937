//! Primary session authentication, consulted before access tokens.

// crates.io
use axum::http::{HeaderMap, header::COOKIE};
// self
use crate::{_prelude::*, auth::Identity};

/// Boxed future returned by [`SessionAuthenticator`].
pub type SessionFuture<'a> = Pin<Box<dyn Future<Output = Option<Identity>> + 'a + Send>>;

/// Resolves an interactive session from request headers.
///
/// Returning `None` hands the request to token resolution; it never rejects by itself.
pub trait SessionAuthenticator
where
	Self: Send + Sync,
{
	/// Returns the session owner, if the headers carry a valid session.
	fn authenticate<'a>(&'a self, headers: &'a HeaderMap) -> SessionFuture<'a>;
}

/// Authenticator for deployments without interactive sessions.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoSessions;
impl SessionAuthenticator for NoSessions {
	fn authenticate<'a>(&'a self, _: &'a HeaderMap) -> SessionFuture<'a> {
		Box::pin(async { None })
	}
}

/// Cookie-keyed session table.
#[derive(Clone, Debug)]
pub struct CookieSessions {
	cookie: String,
	sessions: Arc<RwLock<HashMap<String, Identity>>>,
}
impl CookieSessions {
	/// Name of the session cookie unless overridden.
	pub const DEFAULT_COOKIE: &'static str = "sessionid";

	/// Creates an empty table keyed by `cookie`.
	pub fn new(cookie: impl Into<String>) -> Self {
		Self { cookie: cookie.into(), sessions: Default::default() }
	}

	/// Binds `session_id` to `identity`.
	pub fn insert(&self, session_id: impl Into<String>, identity: Identity) {
		self.sessions.write().insert(session_id.into(), identity);
	}

	/// Ends `session_id`, returning its owner if it existed.
	pub fn remove(&self, session_id: &str) -> Option<Identity> {
		self.sessions.write().remove(session_id)
	}

	fn session_id<'h>(&self, headers: &'h HeaderMap) -> Option<&'h str> {
		headers
			.get_all(COOKIE)
			.iter()
			.filter_map(|value| value.to_str().ok())
			.flat_map(|value| value.split(';'))
			.filter_map(|pair| pair.trim().split_once('='))
			.find(|(name, _)| *name == self.cookie)
			.map(|(_, value)| value.trim())
	}
}
impl Default for CookieSessions {
	fn default() -> Self {
		Self::new(Self::DEFAULT_COOKIE)
	}
}
impl SessionAuthenticator for CookieSessions {
	fn authenticate<'a>(&'a self, headers: &'a HeaderMap) -> SessionFuture<'a> {
		let identity =
			self.session_id(headers).and_then(|id| self.sessions.read().get(id).cloned());

		Box::pin(async move { identity })
	}
}
