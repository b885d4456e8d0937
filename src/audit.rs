//! Fire-and-forget audit events for authentication, quota, and proxy outcomes.
//!
//! Sinks must never block or fail the request path: [`AuditSink::record`] is synchronous and
//! infallible, so slow or broken backends have to shed events instead of applying
//! backpressure.

// std
use std::sync::atomic::{AtomicU64, Ordering};
// crates.io
use tokio::sync::mpsc::{self, error::TrySendError};
// self
use crate::{_prelude::*, auth::Identity};

/// Kinds of audited gate events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
	/// A presented credential failed to authenticate.
	AuthenticationFailure,
	/// An authenticated caller exceeded its quota.
	QuotaExceeded,
	/// A caller passed authentication and quota checks.
	Admitted,
	/// The upstream response started streaming to the caller.
	Proxied,
	/// Forwarding failed before any response byte was sent.
	UpstreamFailed,
	/// The request itself could not be proxied (unroutable path, oversized body).
	RequestRejected,
}
impl AuditKind {
	/// Returns the category the event is logged under.
	pub const fn category(self) -> AuditCategory {
		match self {
			Self::AuthenticationFailure | Self::QuotaExceeded | Self::RequestRejected =>
				AuditCategory::Security,
			Self::Admitted | Self::Proxied | Self::UpstreamFailed => AuditCategory::Operational,
		}
	}

	/// Returns a stable label suitable for log fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::AuthenticationFailure => "authentication_failure",
			Self::QuotaExceeded => "quota_exceeded",
			Self::Admitted => "admitted",
			Self::Proxied => "proxied",
			Self::UpstreamFailed => "upstream_failed",
			Self::RequestRejected => "request_rejected",
		}
	}
}
impl Display for AuditKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Log category an [`AuditKind`] belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AuditCategory {
	/// Rejections and authentication failures.
	Security,
	/// Informational records of admitted and proxied traffic.
	Operational,
}

/// One audited event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
	/// What happened.
	pub kind: AuditKind,
	/// Caller identity, when one was resolved.
	pub identity: Option<Identity>,
	/// Presented token rendered through the configured logging policy.
	pub token: Option<String>,
	/// Extra detail such as a failure reason or upstream status.
	pub detail: Option<String>,
	/// When the event was observed.
	#[serde(with = "time::serde::rfc3339")]
	pub timestamp: OffsetDateTime,
}
impl AuditEvent {
	/// Creates an event stamped with the current UTC time.
	pub fn new(kind: AuditKind) -> Self {
		Self { kind, identity: None, token: None, detail: None, timestamp: OffsetDateTime::now_utc() }
	}

	/// Attaches the caller identity.
	pub fn with_identity(mut self, identity: Identity) -> Self {
		self.identity = Some(identity);

		self
	}

	/// Attaches the rendered token value.
	pub fn with_token(mut self, token: impl Into<String>) -> Self {
		self.token = Some(token.into());

		self
	}

	/// Attaches a detail string.
	pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
		self.detail = Some(detail.into());

		self
	}
}

/// Destination for audit events.
pub trait AuditSink
where
	Self: Send + Sync,
{
	/// Records `event` without blocking; failures are the sink's own business.
	fn record(&self, event: AuditEvent);
}

/// Default sink writing security events to the `security` target and the rest to `api`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;
impl AuditSink for TracingAuditSink {
	fn record(&self, event: AuditEvent) {
		let identity = event.identity.as_ref().map(Identity::as_str).unwrap_or("-");
		let token = event.token.as_deref().unwrap_or("-");
		let detail = event.detail.as_deref().unwrap_or("-");

		match event.kind.category() {
			AuditCategory::Security => tracing::warn!(
				target: "security",
				kind = %event.kind,
				identity,
				token,
				detail,
				"Request rejected."
			),
			AuditCategory::Operational => tracing::info!(
				target: "api",
				kind = %event.kind,
				identity,
				token,
				detail,
				"Request audited."
			),
		}
	}
}

/// Sink that hands events to a bounded channel for an external shipper task.
///
/// When the channel is full or closed the event is dropped and counted.
#[derive(Debug)]
pub struct ChannelAuditSink {
	tx: mpsc::Sender<AuditEvent>,
	dropped: AtomicU64,
}
impl ChannelAuditSink {
	/// Creates a sink plus the receiving half for the shipper.
	pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<AuditEvent>) {
		let (tx, rx) = mpsc::channel(capacity.max(1));

		(Self { tx, dropped: AtomicU64::new(0) }, rx)
	}

	/// Events shed because the shipper could not keep up.
	pub fn dropped(&self) -> u64 {
		self.dropped.load(Ordering::Relaxed)
	}
}
impl AuditSink for ChannelAuditSink {
	fn record(&self, event: AuditEvent) {
		if let Err(e) = self.tx.try_send(event) {
			let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
			let cause = match e {
				TrySendError::Full(_) => "full",
				TrySendError::Closed(_) => "closed",
			};

			tracing::warn!(target: "api", cause, total, "Audit channel dropped an event.");
		}
	}
}
