//! Shared fixtures for the gate integration tests.

#![allow(dead_code)]

// std
use std::sync::Arc;
// crates.io
use axum::{
	Router,
	body::{Body, Bytes},
	http::Request,
	response::Response,
};
use parking_lot::Mutex;
use tower::ServiceExt;
// self
use widget_proxy::{
	audit::{AuditEvent, AuditKind, AuditSink},
	auth::{AccessToken, Identity},
	forward::{Forwarder, ForwarderConfig, headers::CONFIG_KEY_HEADER},
	gate::RequestGate,
	quota::{ManualClock, QuotaLimiter, QuotaPolicy},
	resolver::TokenResolver,
	server,
	store::{AccessRecord, MemoryStore},
	url::Url,
};

/// Audit sink that keeps events for assertions.
#[derive(Clone, Default)]
pub struct Recorder(Arc<Mutex<Vec<AuditEvent>>>);
impl Recorder {
	pub fn events(&self) -> Vec<AuditEvent> {
		self.0.lock().clone()
	}

	pub fn kinds(&self) -> Vec<AuditKind> {
		self.0.lock().iter().map(|e| e.kind).collect()
	}
}
impl AuditSink for Recorder {
	fn record(&self, event: AuditEvent) {
		self.0.lock().push(event);
	}
}

/// Gate wired to a fake upstream with a frozen clock.
pub struct Harness {
	pub router: Router,
	pub gate: Arc<RequestGate>,
	pub limiter: Arc<QuotaLimiter>,
	pub clock: ManualClock,
	pub audit: Recorder,
	pub store: Arc<MemoryStore>,
	/// Public token owned by `alice`.
	pub token: String,
}
impl Harness {
	/// Publishes a new token for `owner` and returns its wire form.
	pub fn publish(&self, owner: &str, is_public: bool) -> String {
		let owner = Identity::new(owner).expect("Owner fixture should be a valid identity.");
		let record = AccessRecord::new(AccessToken::generate(), owner, "doc").with_public(is_public);
		let token = record.token.expose();

		self.store.insert_now(record);

		token
	}

	/// Sends `request` through the full router.
	pub async fn send(&self, request: Request<Body>) -> Response {
		self.router.clone().oneshot(request).await.expect("Router should always respond.")
	}
}

/// Builds a harness whose quota follows `rate` and whose forwarder is shaped by `configure`.
pub fn harness(
	upstream: &str,
	rate: &str,
	configure: impl FnOnce(ForwarderConfig) -> ForwarderConfig,
) -> Harness {
	harness_with(upstream, rate, configure, |gate| gate)
}

/// Like [`harness`], additionally letting the caller adjust the gate before it is shared.
pub fn harness_with(
	upstream: &str,
	rate: &str,
	configure: impl FnOnce(ForwarderConfig) -> ForwarderConfig,
	adjust: impl FnOnce(RequestGate) -> RequestGate,
) -> Harness {
	let upstream = Url::parse(upstream).expect("Upstream URL fixture should parse.");
	let policy: QuotaPolicy = rate.parse().expect("Rate fixture should parse.");
	let clock = ManualClock::default();
	let limiter = Arc::new(QuotaLimiter::with_clock(policy, Arc::new(clock.clone())));
	let store = Arc::new(MemoryStore::default());
	let forwarder = Forwarder::new(configure(ForwarderConfig::new(upstream)))
		.expect("Forwarder fixture should build.");
	let audit = Recorder::default();
	let gate = Arc::new(adjust(
		RequestGate::new(TokenResolver::new(store.clone()), Arc::clone(&limiter), forwarder)
			.with_audit(Arc::new(audit.clone())),
	));
	let mut harness = Harness {
		router: server::router(Arc::clone(&gate)),
		gate,
		limiter,
		clock,
		audit,
		store,
		token: String::new(),
	};

	harness.token = harness.publish("alice", true);

	harness
}

/// `POST /openai/<path>` carrying `token` in `X-Config-Key`.
pub fn post(path: &str, token: &str, body: &'static str) -> Request<Body> {
	Request::post(format!("/openai/{path}"))
		.header(CONFIG_KEY_HEADER, token)
		.header("content-type", "application/json")
		.body(Body::from(body))
		.expect("Request fixture should build.")
}

/// Reads a whole response body.
pub async fn body(response: Response) -> Bytes {
	axum::body::to_bytes(response.into_body(), usize::MAX)
		.await
		.expect("Response body should be readable.")
}
