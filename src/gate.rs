//! Request Gate: authenticate, charge the quota, then forward and stream.
//!
//! Each inbound request walks `Received → Authenticating → QuotaCheck → Forwarding →
//! Streaming → Completed`, or leaves early through `RejectedRequest` (400/413),
//! `RejectedAuth` (403), `RejectedQuota` (429) or `UpstreamFailed` (502/504). Once the first
//! response byte is handed to the server the status can no longer change, so relay failures
//! only truncate the body.

pub mod credential;
pub mod session;

pub use credential::*;
pub use session::*;

// crates.io
use axum::{
	body::Body,
	http::{Method, Request, request::Parts},
	response::{IntoResponse, Response},
};
// self
use crate::{
	_prelude::*,
	audit::{AuditEvent, AuditKind, AuditSink, TracingAuditSink},
	auth::{Identity, TokenLogging},
	config::GateConfig,
	error::ConfigError,
	forward::{self, Forwarder, ProxyRequest, RelayOutcome, RequestBody},
	obs::{GateSpan, GateStage},
	quota::{QuotaDecision, QuotaLimiter},
	resolver::{TokenResolver, Unauthenticated, UnauthenticatedReason},
	store::DocumentStore,
};

/// Path prefix routed through the gate; the remainder is forwarded upstream.
pub const PROXY_PREFIX: &str = "/openai/";

/// Orchestrates one proxied request from arrival to the last relayed byte.
pub struct RequestGate {
	sessions: Arc<dyn SessionAuthenticator>,
	resolver: TokenResolver,
	limiter: Arc<QuotaLimiter>,
	forwarder: Forwarder,
	audit: Arc<dyn AuditSink>,
	token_logging: TokenLogging,
	quota_methods: Option<Vec<Method>>,
}
impl RequestGate {
	/// Creates a gate with no session support, tracing-backed audit, and raw token logging.
	pub fn new(resolver: TokenResolver, limiter: Arc<QuotaLimiter>, forwarder: Forwarder) -> Self {
		Self {
			sessions: Arc::new(NoSessions),
			resolver,
			limiter,
			forwarder,
			audit: Arc::new(TracingAuditSink),
			token_logging: TokenLogging::default(),
			quota_methods: None,
		}
	}

	/// Builds a gate from validated configuration over `store`.
	pub fn from_config(
		config: &GateConfig,
		store: Arc<dyn DocumentStore>,
	) -> Result<Self, ConfigError> {
		config.validate()?;

		let limiter = Arc::new(QuotaLimiter::new(config.quota.policy()?));
		let forwarder = Forwarder::new(config.forwarder_config())?;

		Ok(Self::new(TokenResolver::new(store), limiter, forwarder)
			.with_token_logging(config.token_logging)
			.with_quota_methods(config.quota.methods()?))
	}

	/// Sets the primary session authenticator.
	pub fn with_sessions(mut self, sessions: Arc<dyn SessionAuthenticator>) -> Self {
		self.sessions = sessions;

		self
	}

	/// Sets the audit sink.
	pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
		self.audit = audit;

		self
	}

	/// Sets how presented tokens are rendered in logs and audit events.
	pub fn with_token_logging(mut self, policy: TokenLogging) -> Self {
		self.token_logging = policy;

		self
	}

	/// Restricts quota accounting to `methods`; `None` counts every request.
	pub fn with_quota_methods(mut self, methods: Option<Vec<Method>>) -> Self {
		self.quota_methods = methods;

		self
	}

	/// Shared limiter, e.g. for the idle-window sweeper.
	pub fn limiter(&self) -> &Arc<QuotaLimiter> {
		&self.limiter
	}

	/// Runs `request` through every stage and returns the response to send.
	pub async fn handle(&self, request: Request<Body>) -> Response {
		let span = GateSpan::new(request.method().as_str(), request.uri().path());

		span.instrument(self.run(span.clone(), request)).await
	}

	async fn run(&self, span: GateSpan, request: Request<Body>) -> Response {
		let (parts, body) = request.into_parts();
		let Some(path) =
			parts.uri.path().strip_prefix(PROXY_PREFIX).filter(|p| !p.is_empty()).map(str::to_owned)
		else {
			let reason = format!("path must start with `{PROXY_PREFIX}`");

			return self.reject(&span, None, Error::InvalidRequest { reason });
		};

		if forward::has_dot_segment(&path) {
			let reason = "path must not contain `.` or `..` segments".to_owned();

			return self.reject(&span, None, Error::InvalidRequest { reason });
		}

		let caller = match self.authenticate(&span, &parts).await {
			Ok(caller) => caller,
			Err(e) => {
				span.stage(GateStage::RejectedAuth);

				return Error::from(e).into_response();
			},
		};

		if let Err(e) = self.check_quota(&span, &parts.method, &caller) {
			span.stage(GateStage::RejectedQuota);

			return e.into_response();
		}

		self.forward(&span, parts, path, body, caller).await
	}

	fn reject(&self, span: &GateSpan, caller: Option<&Identity>, error: Error) -> Response {
		span.stage(GateStage::RejectedRequest);

		let mut event = AuditEvent::new(AuditKind::RequestRejected).with_detail(error.to_string());

		if let Some(caller) = caller {
			event = event.with_identity(caller.clone());
		}

		self.audit.record(event);

		error.into_response()
	}

	async fn authenticate(
		&self,
		span: &GateSpan,
		parts: &Parts,
	) -> Result<Identity, Unauthenticated> {
		span.stage(GateStage::Authenticating);

		if let Some(identity) = self.sessions.authenticate(&parts.headers).await {
			tracing::debug!(target: "api", identity = %identity, "Session authenticated.");
			span.identity(&identity);

			return Ok(identity);
		}

		let Some(presented) = presented_token(&parts.headers, parts.uri.query()) else {
			let err = Unauthenticated::new(UnauthenticatedReason::Missing);

			self.audit.record(
				AuditEvent::new(AuditKind::AuthenticationFailure).with_detail(err.reason.as_str()),
			);

			return Err(err);
		};
		let token = self.token_logging.render(&presented);

		match self.resolver.resolve(&presented).await {
			Ok(identity) => {
				tracing::info!(target: "api", identity = %identity, token = %token, "Token authenticated.");
				span.identity(&identity);

				Ok(identity)
			},
			Err(e) => {
				self.audit.record(
					AuditEvent::new(AuditKind::AuthenticationFailure)
						.with_token(token)
						.with_detail(e.reason.as_str()),
				);

				Err(e)
			},
		}
	}

	fn check_quota(&self, span: &GateSpan, method: &Method, caller: &Identity) -> Result<()> {
		span.stage(GateStage::QuotaCheck);

		if self.quota_methods.as_ref().is_some_and(|methods| !methods.contains(method)) {
			self.audit.record(
				AuditEvent::new(AuditKind::Admitted)
					.with_identity(caller.clone())
					.with_detail(format!("{method} is exempt from quota")),
			);

			return Ok(());
		}

		match self.limiter.check(caller.as_str()) {
			QuotaDecision::Admit { remaining } => {
				self.audit.record(
					AuditEvent::new(AuditKind::Admitted)
						.with_identity(caller.clone())
						.with_detail(format!("{remaining} request(s) left in window")),
				);

				Ok(())
			},
			QuotaDecision::Reject(retry) => {
				let detail = match &retry.reason {
					Some(policy) => format!("retry after {}s ({policy})", retry.retry_after_secs()),
					None => format!("retry after {}s", retry.retry_after_secs()),
				};

				self.audit.record(
					AuditEvent::new(AuditKind::QuotaExceeded)
						.with_identity(caller.clone())
						.with_detail(detail),
				);

				Err(Error::QuotaExceeded { retry })
			},
		}
	}

	async fn forward(
		&self,
		span: &GateSpan,
		parts: Parts,
		path: String,
		body: Body,
		caller: Identity,
	) -> Response {
		span.stage(GateStage::Forwarding);

		let body = if self.forwarder.needs_replayable_body() {
			match RequestBody::buffer(body, self.forwarder.config().max_body_bytes).await {
				Ok(body) => body,
				Err(e) => return self.reject(span, Some(&caller), e),
			}
		} else {
			RequestBody::Streaming(body)
		};
		let request = ProxyRequest {
			method: parts.method,
			path,
			query: parts.uri.query().map(str::to_owned),
			headers: parts.headers,
			body,
			caller: caller.clone(),
		};
		let upstream = match self.forwarder.forward(request).await {
			Ok(upstream) => upstream,
			Err(e) => {
				span.stage(GateStage::UpstreamFailed);
				self.audit.record(
					AuditEvent::new(AuditKind::UpstreamFailed)
						.with_identity(caller)
						.with_detail(e.to_string()),
				);

				return Error::from(e).into_response();
			},
		};

		span.stage(GateStage::Streaming);
		self.audit.record(
			AuditEvent::new(AuditKind::Proxied)
				.with_identity(caller)
				.with_detail(format!("upstream status {}", upstream.status.as_u16())),
		);

		let relay_span = span.clone();

		upstream
			.with_observer(move |outcome| match outcome {
				RelayOutcome::Completed { bytes } => {
					relay_span.stage(GateStage::Completed);
					tracing::debug!(target: "api", bytes, "Upstream body relayed.");
				},
				RelayOutcome::Truncated { bytes, reason } => {
					tracing::warn!(target: "api", bytes, reason = %reason, "Caller received a truncated body.");
				},
				RelayOutcome::Cancelled { bytes } => {
					tracing::info!(target: "api", bytes, "Caller disconnected mid-stream.");
				},
			})
			.into_response()
	}
}
impl Debug for RequestGate {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RequestGate")
			.field("limiter", &self.limiter)
			.field("forwarder", &self.forwarder)
			.field("token_logging", &self.token_logging)
			.field("quota_methods", &self.quota_methods)
			.finish_non_exhaustive()
	}
}
