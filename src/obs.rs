//! Observability helpers for the request gate.
//!
//! - Every gate run is wrapped in a `widget_proxy.gate` span carrying `method`, `path`,
//!   `identity`, and the latest `stage`.
//! - Enable the `metrics` feature to increment the `widget_proxy_gate_total` counter each time
//!   a request reaches a stage, labeled by `stage`.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Lifecycle states of one request passing through the gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GateStage {
	/// Request accepted by the server.
	Received,
	/// Resolving the caller from a session or token.
	Authenticating,
	/// Consulting the quota limiter.
	QuotaCheck,
	/// Connecting to the upstream.
	Forwarding,
	/// Relaying the upstream response body.
	Streaming,
	/// Every response byte was relayed.
	Completed,
	/// No credential authenticated the caller.
	RejectedAuth,
	/// The caller's quota window is full.
	RejectedQuota,
	/// Forwarding failed before any byte was relayed.
	UpstreamFailed,
	/// The request could not be proxied as sent.
	RejectedRequest,
}
impl GateStage {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Received => "received",
			Self::Authenticating => "authenticating",
			Self::QuotaCheck => "quota_check",
			Self::Forwarding => "forwarding",
			Self::Streaming => "streaming",
			Self::Completed => "completed",
			Self::RejectedAuth => "rejected_auth",
			Self::RejectedQuota => "rejected_quota",
			Self::UpstreamFailed => "upstream_failed",
			Self::RejectedRequest => "rejected_request",
		}
	}
}
impl Display for GateStage {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
