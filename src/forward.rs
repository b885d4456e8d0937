//! Upstream forwarding with a fixed deadline, bounded connect retries, and a streaming relay.
//!
//! [`Forwarder::forward`] resolves once the upstream has sent its status line and headers.
//! The body is relayed afterwards through [`UpstreamResponse::into_response`], so nothing is
//! buffered beyond a single chunk. Connection failures are retried only while no response
//! exists, which means no byte has reached the caller yet.

pub mod headers;
pub mod relay;

pub use relay::{RelayObserver, RelayOutcome};

// std
use std::time::Duration as StdDuration;
// crates.io
use axum::{
	body::Body,
	http::{HeaderMap, Method, StatusCode},
	response::{IntoResponse, Response},
};
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use rand::Rng;
use reqwest::{Client as ReqwestClient, redirect::Policy};
use tokio::time::Instant;
// self
use crate::{
	_prelude::*,
	auth::{ApiKey, Identity},
	error::{ConfigError, ProxyError},
};

const BACKOFF_BASE: StdDuration = StdDuration::from_millis(100);
const BACKOFF_CAP: StdDuration = StdDuration::from_secs(2);

/// Settings for a [`Forwarder`].
#[derive(Clone, Debug)]
pub struct ForwarderConfig {
	/// Base URL every forwarded path is joined onto.
	pub upstream: Url,
	/// Optional key sent upstream as `Authorization: Bearer <key>`.
	pub upstream_api_key: Option<ApiKey>,
	/// Deadline for the whole exchange, retries and body transfer included.
	pub timeout: StdDuration,
	/// Limit for establishing one TCP/TLS connection.
	pub connect_timeout: StdDuration,
	/// Extra attempts after a connection failure.
	pub max_retries: u32,
	/// Largest chunk handed to the caller.
	pub stream_chunk_size: usize,
	/// Largest request body buffered for replayable retries.
	pub max_body_bytes: usize,
}
impl ForwarderConfig {
	/// Creates a config for `upstream` with default limits.
	pub fn new(upstream: Url) -> Self {
		Self {
			upstream,
			upstream_api_key: None,
			timeout: StdDuration::from_secs(120),
			connect_timeout: StdDuration::from_secs(10),
			max_retries: 0,
			stream_chunk_size: 64 * 1024,
			max_body_bytes: 10 * 1024 * 1024,
		}
	}

	/// Sets the upstream API key.
	pub fn with_upstream_api_key(mut self, key: ApiKey) -> Self {
		self.upstream_api_key = Some(key);

		self
	}

	/// Sets the exchange deadline.
	pub fn with_timeout(mut self, timeout: StdDuration) -> Self {
		self.timeout = timeout;

		self
	}

	/// Sets the per-connection establishment limit.
	pub fn with_connect_timeout(mut self, timeout: StdDuration) -> Self {
		self.connect_timeout = timeout;

		self
	}

	/// Sets how many times a failed connection is retried.
	pub fn with_max_retries(mut self, retries: u32) -> Self {
		self.max_retries = retries;

		self
	}

	/// Sets the relay chunk size.
	pub fn with_stream_chunk_size(mut self, size: usize) -> Self {
		self.stream_chunk_size = size;

		self
	}

	/// Sets the buffering limit for replayable request bodies.
	pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
		self.max_body_bytes = limit;

		self
	}
}

/// Request body handed to the forwarder.
#[derive(Debug)]
pub enum RequestBody {
	/// Streamed straight through; cannot be replayed.
	Streaming(Body),
	/// Fully buffered; replayed on every attempt.
	Buffered(Bytes),
}
impl RequestBody {
	/// Buffers `body`, failing once more than `limit` bytes arrive.
	pub async fn buffer(body: Body, limit: usize) -> Result<Self> {
		let mut stream = body.into_data_stream();
		let mut buf = BytesMut::new();

		while let Some(chunk) = stream.next().await {
			let chunk = chunk.map_err(|e| Error::InvalidRequest {
				reason: format!("request body could not be read ({e})"),
			})?;

			if buf.len() + chunk.len() > limit {
				return Err(ProxyError::BodyTooLarge { limit }.into());
			}

			buf.extend_from_slice(&chunk);
		}

		Ok(Self::Buffered(buf.freeze()))
	}
}

/// A request admitted by the gate, ready to be sent upstream.
#[derive(Debug)]
pub struct ProxyRequest {
	/// Original method.
	pub method: Method,
	/// Path suffix after the proxy prefix.
	pub path: String,
	/// Raw query string, if any.
	pub query: Option<String>,
	/// Caller headers before rewriting.
	pub headers: HeaderMap,
	/// Caller body.
	pub body: RequestBody,
	/// Identity the request runs as.
	pub caller: Identity,
}

/// Upstream response whose body has not been relayed yet.
pub struct UpstreamResponse {
	/// Upstream status, relayed verbatim.
	pub status: StatusCode,
	/// Upstream headers minus the hop-by-hop set.
	pub headers: HeaderMap,
	response: reqwest::Response,
	deadline: Instant,
	timeout: StdDuration,
	chunk_size: usize,
	observer: Option<RelayObserver>,
}
impl UpstreamResponse {
	/// Registers a callback that learns how the relay ended.
	pub fn with_observer(mut self, observer: impl 'static + Send + FnOnce(RelayOutcome)) -> Self {
		self.observer = Some(Box::new(observer));

		self
	}
}
impl Debug for UpstreamResponse {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("UpstreamResponse")
			.field("status", &self.status)
			.field("headers", &self.headers)
			.field("deadline", &self.deadline)
			.finish_non_exhaustive()
	}
}
impl IntoResponse for UpstreamResponse {
	fn into_response(self) -> Response {
		let stream = relay::relay(
			self.response.bytes_stream(),
			self.chunk_size,
			self.deadline,
			self.timeout,
			self.observer,
		);
		let mut response = Response::new(Body::from_stream(stream));

		*response.status_mut() = self.status;
		*response.headers_mut() = self.headers;

		response
	}
}

/// Sends admitted requests to the configured upstream.
#[derive(Clone, Debug)]
pub struct Forwarder {
	client: ReqwestClient,
	config: Arc<ForwarderConfig>,
}
impl Forwarder {
	/// Builds a forwarder with its own connection pool.
	pub fn new(config: ForwarderConfig) -> Result<Self, ConfigError> {
		let client = ReqwestClient::builder()
			.connect_timeout(config.connect_timeout)
			.redirect(Policy::none())
			.build()?;

		Ok(Self::with_client(config, client))
	}

	/// Wraps an existing client; configure it not to follow redirects.
	pub fn with_client(config: ForwarderConfig, client: ReqwestClient) -> Self {
		Self { client, config: Arc::new(config) }
	}

	/// Returns the active configuration.
	pub fn config(&self) -> &ForwarderConfig {
		&self.config
	}

	/// Returns `true` when request bodies must be buffered so they can be replayed.
	pub fn needs_replayable_body(&self) -> bool {
		self.config.max_retries > 0
	}

	/// Joins `path` onto the upstream base URL's path and applies `query`.
	///
	/// Paths with dot segments are refused, since the URL parser would resolve them above the
	/// base path.
	pub fn target(&self, path: &str, query: Option<&str>) -> Result<Url, ProxyError> {
		if has_dot_segment(path) {
			return Err(ProxyError::InvalidTarget { path: path.to_owned() });
		}

		let mut url = self.config.upstream.clone();
		let joined =
			format!("{}/{}", url.path().trim_end_matches('/'), path.trim_start_matches('/'));

		url.set_path(&joined);
		url.set_query(query);

		Ok(url)
	}

	/// Starts the upstream exchange and returns once response headers arrive.
	pub async fn forward(&self, request: ProxyRequest) -> Result<UpstreamResponse, ProxyError> {
		let timeout = self.config.timeout;
		let deadline = Instant::now() + timeout;
		let url = self.target(&request.path, request.query.as_deref())?;
		let headers = headers::outbound(
			&request.headers,
			&request.caller,
			self.config.upstream_api_key.as_ref().map(ApiKey::expose),
		);
		let attempts = self.config.max_retries.saturating_add(1);
		let (mut once, replayable) = match request.body {
			RequestBody::Streaming(body) => (Some(body), None),
			RequestBody::Buffered(bytes) => (None, Some(bytes)),
		};
		let mut attempt = 0;

		loop {
			attempt += 1;

			let body = match (&replayable, once.take()) {
				(Some(bytes), _) => reqwest::Body::from(bytes.clone()),
				(None, Some(body)) => reqwest::Body::wrap_stream(body.into_data_stream()),
				(None, None) => reqwest::Body::from(Bytes::new()),
			};
			let send = self
				.client
				.request(request.method.clone(), url.clone())
				.headers(headers.clone())
				.body(body)
				.send();
			let e = match tokio::time::timeout_at(deadline, send).await {
				Ok(Ok(response)) => {
					tracing::debug!(
						target: "api",
						attempt,
						status = response.status().as_u16(),
						"Upstream responded."
					);

					return Ok(UpstreamResponse {
						status: response.status(),
						headers: headers::inbound(response.headers()),
						response,
						deadline,
						timeout,
						chunk_size: self.config.stream_chunk_size,
						observer: None,
					});
				},
				Ok(Err(e)) => e,
				Err(_) => return Err(ProxyError::Timeout { after: timeout }),
			};

			if !e.is_connect() {
				if e.is_timeout() {
					return Err(ProxyError::Timeout { after: timeout });
				}

				return Err(ProxyError::upstream(e));
			}
			// A streamed body is gone after the first attempt.
			if attempt >= attempts || replayable.is_none() {
				tracing::warn!(target: "api", attempt, error = %e, "Upstream connection failed.");

				return Err(ProxyError::unavailable(attempt, e));
			}

			let pause = backoff(attempt);

			tracing::debug!(
				target: "api",
				attempt,
				pause_ms = pause.as_millis() as u64,
				error = %e,
				"Retrying upstream connection."
			);

			if tokio::time::timeout_at(deadline, tokio::time::sleep(pause)).await.is_err() {
				return Err(ProxyError::Timeout { after: timeout });
			}
		}
	}
}

/// Returns `true` when any segment of `path` is `.` or `..`, spelled literally or with `%2e`.
///
/// Backslashes count as separators because the URL parser treats them as `/` for http(s).
pub fn has_dot_segment(path: &str) -> bool {
	path.split(['/', '\\']).any(|segment| {
		let decoded = segment.to_ascii_lowercase().replace("%2e", ".");

		decoded == "." || decoded == ".."
	})
}

// Exponential from `BACKOFF_BASE`, capped, with up to 50% jitter on top.
fn backoff(attempt: u32) -> StdDuration {
	let exp = BACKOFF_BASE.saturating_mul(1 << attempt.saturating_sub(1).min(5));
	let base = exp.min(BACKOFF_CAP);
	let jitter_ms = rand::rng().random_range(0..=base.as_millis() as u64 / 2);

	base + StdDuration::from_millis(jitter_ms)
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn forwarder(base: &str) -> Forwarder {
		let upstream = Url::parse(base).expect("Upstream fixture should parse.");

		Forwarder::new(ForwarderConfig::new(upstream)).expect("Forwarder should build.")
	}

	#[test]
	fn target_joins_suffix_onto_base_path() {
		let fwd = forwarder("http://llm.internal:8080/api/");

		assert_eq!(
			fwd.target("v1/chat/completions", Some("stream=true"))
				.expect("Suffix should join.")
				.as_str(),
			"http://llm.internal:8080/api/v1/chat/completions?stream=true"
		);
		assert_eq!(
			forwarder("http://llm.internal")
				.target("/v1/models", None)
				.expect("Suffix should join.")
				.as_str(),
			"http://llm.internal/v1/models"
		);
	}

	#[test]
	fn target_cannot_escape_the_upstream_host() {
		let fwd = forwarder("http://llm.internal/base");
		let url = fwd.target("//evil.example/steal", None).expect("Suffix should join.");

		assert_eq!(url.host_str(), Some("llm.internal"));
		assert_eq!(url.path(), "/base/evil.example/steal");
	}

	#[test]
	fn target_refuses_to_climb_out_of_the_base_path() {
		let fwd = forwarder("http://llm.internal/api/");

		for path in [
			"../admin",
			"%2e%2e/admin",
			"v1/%2E%2E/%2e%2e/admin",
			"v1/.%2e/admin",
			"v1\\..\\admin",
			"./v1/models",
			"v1/models/..",
		] {
			let err = fwd.target(path, None).expect_err("Dot segments should be refused.");

			assert!(matches!(err, ProxyError::InvalidTarget { .. }), "{path}: {err:?}");
			assert_eq!(err.status(), StatusCode::BAD_REQUEST);
		}

		assert_eq!(
			fwd.target("v1/files/a..b/content", None).expect("Dots inside a name are fine.").path(),
			"/api/v1/files/a..b/content"
		);
	}

	#[test]
	fn backoff_grows_and_stays_capped() {
		let first = backoff(1);
		let late = backoff(30);

		assert!(first >= BACKOFF_BASE && first <= BACKOFF_BASE * 3 / 2);
		assert!(late >= BACKOFF_CAP && late <= BACKOFF_CAP * 3 / 2);
	}

	#[tokio::test]
	async fn buffer_rejects_oversized_bodies() {
		let body = Body::from(vec![0_u8; 16]);
		let err = RequestBody::buffer(body, 8).await.expect_err("Oversized body should fail.");

		assert!(matches!(err, Error::Proxy(ProxyError::BodyTooLarge { limit: 8 })));

		let body = RequestBody::buffer(Body::from("hello"), 8)
			.await
			.expect("Small body should buffer.");

		assert!(matches!(body, RequestBody::Buffered(ref bytes) if bytes == "hello"));
	}
}
