//! Gate-level error types shared by the resolver, limiter, forwarder, and server.

// std
use std::time::Duration as StdDuration;
// crates.io
use axum::{
	Json,
	http::{HeaderValue, StatusCode, header::RETRY_AFTER},
	response::{IntoResponse, Response},
};
// self
use crate::{_prelude::*, quota::RetryDirective, resolver::Unauthenticated};

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn StdError + Send + Sync>;

/// Canonical error surfaced by the request gate.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Neither a session nor a published token authenticated the caller.
	#[error(transparent)]
	Unauthenticated(#[from] Unauthenticated),
	/// The caller exhausted its quota for the current window.
	///
	/// The message stays generic; the identity is only written to the audit trail.
	#[error("Request quota exceeded.")]
	QuotaExceeded {
		/// When the window reopens.
		retry: RetryDirective,
	},
	/// Forwarding to the upstream failed before any byte reached the caller.
	#[error(transparent)]
	Proxy(#[from] ProxyError),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// The inbound request cannot be proxied as-is.
	#[error("Invalid request: {reason}.")]
	InvalidRequest {
		/// Human-readable reason string.
		reason: String,
	},
}
impl Error {
	/// HTTP status reported to the caller for this error.
	pub fn status(&self) -> StatusCode {
		match self {
			Self::Unauthenticated(_) => StatusCode::FORBIDDEN,
			Self::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
			Self::Proxy(err) => err.status(),
			Self::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
			Self::Config(_) | Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}
}
impl IntoResponse for Error {
	fn into_response(self) -> Response {
		let status = self.status();
		let body = Json(serde_json::json!({ "error": self.to_string() }));
		let mut response = (status, body).into_response();

		if let Self::QuotaExceeded { retry } = &self {
			let secs = retry.retry_after_secs().to_string();

			if let Ok(value) = HeaderValue::from_str(&secs) {
				response.headers_mut().insert(RETRY_AFTER, value);
			}
		}

		response
	}
}

/// Failures raised while forwarding a request upstream.
#[derive(Debug, ThisError)]
pub enum ProxyError {
	/// The request deadline expired before the upstream produced a response.
	#[error("Upstream did not respond within {after:?}.")]
	Timeout {
		/// Configured request timeout.
		after: StdDuration,
	},
	/// Every connection attempt failed.
	#[error("Upstream is unavailable after {attempts} connection attempt(s).")]
	UpstreamUnavailable {
		/// Total attempts made (first try plus retries).
		attempts: u32,
		/// Last connection failure.
		#[source]
		source: BoxError,
	},
	/// The upstream exchange failed after the connection was established.
	#[error("Upstream request failed.")]
	Upstream {
		/// Transport-specific failure.
		#[source]
		source: BoxError,
	},
	/// The request body exceeded the buffering limit required for replayable retries.
	#[error("Request body exceeds {limit} bytes.")]
	BodyTooLarge {
		/// Configured limit in bytes.
		limit: usize,
	},
	/// The forwarded path would resolve outside the upstream base path.
	#[error("Path `{path}` contains dot segments.")]
	InvalidTarget {
		/// Rejected path suffix.
		path: String,
	},
	/// The response stream broke after headers were sent; the caller sees a truncated body.
	#[error("Response stream was interrupted.")]
	StreamInterrupted {
		/// Underlying read failure.
		#[source]
		source: BoxError,
	},
}
impl ProxyError {
	/// Wraps a connection failure after `attempts` tries.
	pub fn unavailable(attempts: u32, src: impl 'static + Send + Sync + StdError) -> Self {
		Self::UpstreamUnavailable { attempts, source: Box::new(src) }
	}

	/// Wraps a post-connect transport failure.
	pub fn upstream(src: impl 'static + Send + Sync + StdError) -> Self {
		Self::Upstream { source: Box::new(src) }
	}

	/// Wraps a mid-stream read failure.
	pub fn interrupted(src: impl 'static + Send + Sync + StdError) -> Self {
		Self::StreamInterrupted { source: Box::new(src) }
	}

	/// HTTP status reported when this error happens before streaming starts.
	pub fn status(&self) -> StatusCode {
		match self {
			Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
			Self::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
			Self::InvalidTarget { .. } => StatusCode::BAD_REQUEST,
			Self::UpstreamUnavailable { .. } | Self::Upstream { .. } | Self::StreamInterrupted { .. } =>
				StatusCode::BAD_GATEWAY,
		}
	}
}

/// Configuration and validation failures.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying builder failure.
		#[source]
		source: BoxError,
	},
	/// Upstream base URL cannot be parsed.
	#[error("Upstream URL is invalid.")]
	InvalidUpstream {
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Upstream base URL uses a scheme other than http(s).
	#[error("Upstream URL must use http or https, got `{scheme}`.")]
	UnsupportedScheme {
		/// Rejected scheme.
		scheme: String,
	},
	/// Rate string does not follow `<count>/<period>`.
	#[error("Rate `{rate}` is invalid: {reason}.")]
	InvalidRate {
		/// Offending rate string.
		rate: String,
		/// Why parsing failed.
		reason: &'static str,
	},
	/// A numeric setting must be positive.
	#[error("Setting `{field}` must be greater than zero.")]
	NonPositive {
		/// Offending field name.
		field: &'static str,
	},
	/// Environment variable holds an unparsable value.
	#[error("Environment variable `{var}` is invalid: {reason}.")]
	InvalidEnv {
		/// Variable name.
		var: &'static str,
		/// Parser message.
		reason: String,
	},
	/// Required environment variable is missing.
	#[error("Environment variable `{var}` is required.")]
	MissingEnv {
		/// Variable name.
		var: &'static str,
	},
	/// Quota method list names an invalid HTTP method.
	#[error("Quota method `{method}` is not a valid HTTP method.")]
	InvalidMethod {
		/// Offending method token.
		method: String,
	},
	/// A value cannot be sent as an HTTP header.
	#[error("Setting `{field}` cannot be encoded as an HTTP header.")]
	InvalidHeader {
		/// Offending field name.
		field: &'static str,
	},
	/// Configuration document failed to deserialize.
	#[error("Configuration is invalid at `{path}`: {message}.")]
	Parse {
		/// Path of the offending field inside the document.
		path: String,
		/// Deserializer message.
		message: String,
	},
	/// Listener or runtime I/O failure.
	#[error("I/O error: {0}.")]
	Io(#[from] std::io::Error),
}
impl ConfigError {
	/// Wraps a transport builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + StdError) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
impl From<reqwest::Error> for ConfigError {
	fn from(e: reqwest::Error) -> Self {
		Self::http_client_build(e)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::resolver::UnauthenticatedReason;

	fn directive(secs: u64) -> RetryDirective {
		let now = OffsetDateTime::now_utc();

		RetryDirective::new(now + StdDuration::from_secs(secs), StdDuration::from_secs(secs))
	}

	#[test]
	fn rejections_map_to_gate_status_codes() {
		let unauthenticated: Error = Unauthenticated::new(UnauthenticatedReason::NotFound).into();

		assert_eq!(unauthenticated.status(), StatusCode::FORBIDDEN);

		let quota = Error::QuotaExceeded { retry: directive(30) };

		assert_eq!(quota.status(), StatusCode::TOO_MANY_REQUESTS);
	}

	#[test]
	fn proxy_errors_map_to_gateway_statuses() {
		let timeout: Error = ProxyError::Timeout { after: StdDuration::from_secs(1) }.into();

		assert_eq!(timeout.into_response().status(), StatusCode::GATEWAY_TIMEOUT);

		let unavailable: Error =
			ProxyError::unavailable(3, std::io::Error::other("connection refused")).into();

		assert_eq!(unavailable.status(), StatusCode::BAD_GATEWAY);
		assert!(unavailable.to_string().contains('3'));
		assert_eq!(
			ProxyError::BodyTooLarge { limit: 8 }.status(),
			StatusCode::PAYLOAD_TOO_LARGE
		);
		assert_eq!(
			ProxyError::InvalidTarget { path: "../admin".into() }.status(),
			StatusCode::BAD_REQUEST
		);
	}

	#[test]
	fn quota_rejection_carries_retry_after() {
		let response = Error::QuotaExceeded { retry: directive(42) }.into_response();
		let retry_after = response
			.headers()
			.get(RETRY_AFTER)
			.expect("429 responses should carry Retry-After.")
			.to_str()
			.expect("Retry-After should be ASCII.");
		let secs: u64 = retry_after.parse().expect("Retry-After should be whole seconds.");

		assert_eq!(secs, 42);
	}

	#[test]
	fn unavailable_exposes_last_connect_failure_as_source() {
		let err = ProxyError::unavailable(1, std::io::Error::other("refused"));
		let source = StdError::source(&err).expect("Connect failure should be the source.");

		assert_eq!(source.to_string(), "refused");
	}
}
