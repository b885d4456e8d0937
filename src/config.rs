//! Gate configuration loaded from JSON documents or `WIDGET_PROXY_*` environment variables.

// std
use std::{
	net::{Ipv4Addr, SocketAddr},
	path::PathBuf,
	time::Duration as StdDuration,
};
// crates.io
use axum::http::Method;
// self
use crate::{
	_prelude::*,
	auth::{ApiKey, TokenLogging},
	error::ConfigError,
	forward::{ForwarderConfig, headers},
	quota::QuotaPolicy,
	store::{DocumentStore, FileStore, MemoryStore, StoreError},
};

/// Source of environment variables.
pub trait Env {
	/// Returns the value of `key`, or `None` when it is unset or not valid Unicode.
	fn var(&self, key: &str) -> Option<String>;
}

/// Reads the process environment.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemEnv;
impl Env for SystemEnv {
	fn var(&self, key: &str) -> Option<String> {
		std::env::var(key).ok()
	}
}

impl Env for HashMap<String, String> {
	fn var(&self, key: &str) -> Option<String> {
		self.get(key).cloned()
	}
}

/// Quota settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuotaConfig {
	/// Rate string such as `60/m` or `1/60s`.
	#[serde(default = "default_rate")]
	pub rate: String,
	/// Methods that count against the quota; every method counts when unset.
	#[serde(default)]
	pub methods: Option<Vec<String>>,
}
impl QuotaConfig {
	/// Parses [`Self::rate`].
	pub fn policy(&self) -> Result<QuotaPolicy, ConfigError> {
		self.rate.parse()
	}

	/// Parses [`Self::methods`] into HTTP methods.
	pub fn methods(&self) -> Result<Option<Vec<Method>>, ConfigError> {
		self.methods
			.as_ref()
			.map(|methods| {
				methods
					.iter()
					.map(|m| {
						Method::from_bytes(m.trim().to_ascii_uppercase().as_bytes())
							.map_err(|_| ConfigError::InvalidMethod { method: m.clone() })
					})
					.collect()
			})
			.transpose()
	}
}
impl Default for QuotaConfig {
	fn default() -> Self {
		Self { rate: default_rate(), methods: None }
	}
}

/// Complete runtime configuration for the gate and its server.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GateConfig {
	/// Address the server binds.
	#[serde(default = "default_listen")]
	pub listen: SocketAddr,
	/// Base URL of the OpenAI-compatible upstream.
	pub upstream: Url,
	/// Key presented upstream as a bearer token.
	#[serde(default)]
	pub upstream_api_key: Option<ApiKey>,
	/// Per-identity quota.
	#[serde(default)]
	pub quota: QuotaConfig,
	/// Deadline for a whole upstream exchange, in seconds.
	#[serde(default = "default_timeout", with = "secs")]
	pub timeout: StdDuration,
	/// Limit for establishing one upstream connection, in seconds.
	#[serde(default = "default_connect_timeout", with = "secs")]
	pub connect_timeout: StdDuration,
	/// Retries after an upstream connection failure.
	#[serde(default)]
	pub max_retries: u32,
	/// Largest relayed chunk in bytes.
	#[serde(default = "default_stream_chunk_size")]
	pub stream_chunk_size: usize,
	/// Largest request body buffered when retries are enabled.
	#[serde(default = "default_max_body_bytes")]
	pub max_body_bytes: usize,
	/// How presented tokens appear in logs and audit events.
	#[serde(default)]
	pub token_logging: TokenLogging,
	/// JSON snapshot backing the token index; an empty in-memory index is used when unset.
	#[serde(default)]
	pub store_path: Option<PathBuf>,
	/// Interval between idle quota window sweeps, in seconds.
	#[serde(default = "default_sweep_interval", with = "secs")]
	pub sweep_interval: StdDuration,
}
impl GateConfig {
	/// Environment variable for [`Self::listen`].
	pub const ENV_LISTEN: &'static str = "WIDGET_PROXY_LISTEN";
	/// Environment variable for [`Self::upstream`].
	pub const ENV_UPSTREAM: &'static str = "WIDGET_PROXY_UPSTREAM";
	/// Environment variable for [`Self::upstream_api_key`].
	pub const ENV_UPSTREAM_API_KEY: &'static str = "WIDGET_PROXY_UPSTREAM_API_KEY";
	/// Environment variable for [`QuotaConfig::rate`].
	pub const ENV_RATE: &'static str = "WIDGET_PROXY_RATE";
	/// Environment variable for [`QuotaConfig::methods`], comma separated.
	pub const ENV_RATE_METHODS: &'static str = "WIDGET_PROXY_RATE_METHODS";
	/// Environment variable for [`Self::timeout`], in seconds.
	pub const ENV_TIMEOUT_SECS: &'static str = "WIDGET_PROXY_TIMEOUT_SECS";
	/// Environment variable for [`Self::connect_timeout`], in seconds.
	pub const ENV_CONNECT_TIMEOUT_SECS: &'static str = "WIDGET_PROXY_CONNECT_TIMEOUT_SECS";
	/// Environment variable for [`Self::max_retries`].
	pub const ENV_MAX_RETRIES: &'static str = "WIDGET_PROXY_MAX_RETRIES";
	/// Environment variable for [`Self::stream_chunk_size`].
	pub const ENV_CHUNK_SIZE: &'static str = "WIDGET_PROXY_CHUNK_SIZE";
	/// Environment variable for [`Self::max_body_bytes`].
	pub const ENV_MAX_BODY_BYTES: &'static str = "WIDGET_PROXY_MAX_BODY_BYTES";
	/// Environment variable for [`Self::token_logging`].
	pub const ENV_TOKEN_LOGGING: &'static str = "WIDGET_PROXY_TOKEN_LOGGING";
	/// Environment variable for [`Self::store_path`].
	pub const ENV_STORE: &'static str = "WIDGET_PROXY_STORE";
	/// Environment variable for [`Self::sweep_interval`], in seconds.
	pub const ENV_SWEEP_SECS: &'static str = "WIDGET_PROXY_SWEEP_SECS";

	/// Creates a config pointing at `upstream` with every other field defaulted.
	pub fn new(upstream: Url) -> Self {
		Self {
			listen: default_listen(),
			upstream,
			upstream_api_key: None,
			quota: QuotaConfig::default(),
			timeout: default_timeout(),
			connect_timeout: default_connect_timeout(),
			max_retries: 0,
			stream_chunk_size: default_stream_chunk_size(),
			max_body_bytes: default_max_body_bytes(),
			token_logging: TokenLogging::default(),
			store_path: None,
			sweep_interval: default_sweep_interval(),
		}
	}

	/// Parses a JSON document, reporting the path of the offending field on failure.
	pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
		let de = &mut serde_json::Deserializer::from_str(raw);
		let config: Self = serde_path_to_error::deserialize(de).map_err(|e| {
			ConfigError::Parse { path: e.path().to_string(), message: e.inner().to_string() }
		})?;

		config.validate()?;

		Ok(config)
	}

	/// Reads and parses a JSON configuration file.
	pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
		Self::from_json(&std::fs::read_to_string(path)?)
	}

	/// Builds a config from `WIDGET_PROXY_*` variables read through `env`.
	pub fn from_env(env: &impl Env) -> Result<Self, ConfigError> {
		let upstream = env_value(env, Self::ENV_UPSTREAM)
			.ok_or(ConfigError::MissingEnv { var: Self::ENV_UPSTREAM })?;
		let upstream =
			Url::parse(&upstream).map_err(|source| ConfigError::InvalidUpstream { source })?;
		let mut config = Self::new(upstream);

		if let Some(listen) = env_parse(env, Self::ENV_LISTEN)? {
			config.listen = listen;
		}
		if let Some(key) = env_value(env, Self::ENV_UPSTREAM_API_KEY) {
			config.upstream_api_key = Some(ApiKey::new(key));
		}
		if let Some(rate) = env_value(env, Self::ENV_RATE) {
			config.quota.rate = rate;
		}
		if let Some(methods) = env_value(env, Self::ENV_RATE_METHODS) {
			config.quota.methods = Some(
				methods
					.split(',')
					.map(str::trim)
					.filter(|m| !m.is_empty())
					.map(str::to_owned)
					.collect(),
			);
		}
		if let Some(secs) = env_parse(env, Self::ENV_TIMEOUT_SECS)? {
			config.timeout = StdDuration::from_secs(secs);
		}
		if let Some(secs) = env_parse(env, Self::ENV_CONNECT_TIMEOUT_SECS)? {
			config.connect_timeout = StdDuration::from_secs(secs);
		}
		if let Some(retries) = env_parse(env, Self::ENV_MAX_RETRIES)? {
			config.max_retries = retries;
		}
		if let Some(size) = env_parse(env, Self::ENV_CHUNK_SIZE)? {
			config.stream_chunk_size = size;
		}
		if let Some(limit) = env_parse(env, Self::ENV_MAX_BODY_BYTES)? {
			config.max_body_bytes = limit;
		}
		if let Some(policy) = env_parse(env, Self::ENV_TOKEN_LOGGING)? {
			config.token_logging = policy;
		}
		if let Some(path) = env_value(env, Self::ENV_STORE) {
			config.store_path = Some(PathBuf::from(path));
		}
		if let Some(secs) = env_parse(env, Self::ENV_SWEEP_SECS)? {
			config.sweep_interval = StdDuration::from_secs(secs);
		}

		config.validate()?;

		Ok(config)
	}

	/// Sets the listen address.
	pub fn with_listen(mut self, listen: SocketAddr) -> Self {
		self.listen = listen;

		self
	}

	/// Sets the upstream API key.
	pub fn with_upstream_api_key(mut self, key: impl Into<String>) -> Self {
		self.upstream_api_key = Some(ApiKey::new(key));

		self
	}

	/// Sets the quota rate string.
	pub fn with_rate(mut self, rate: impl Into<String>) -> Self {
		self.quota.rate = rate.into();

		self
	}

	/// Restricts quota accounting to `methods`.
	pub fn with_quota_methods<I, S>(mut self, methods: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.quota.methods = Some(methods.into_iter().map(Into::into).collect());

		self
	}

	/// Sets the upstream exchange deadline.
	pub fn with_timeout(mut self, timeout: StdDuration) -> Self {
		self.timeout = timeout;

		self
	}

	/// Sets the connection retry count.
	pub fn with_max_retries(mut self, retries: u32) -> Self {
		self.max_retries = retries;

		self
	}

	/// Sets the relay chunk size.
	pub fn with_stream_chunk_size(mut self, size: usize) -> Self {
		self.stream_chunk_size = size;

		self
	}

	/// Sets the token logging policy.
	pub fn with_token_logging(mut self, policy: TokenLogging) -> Self {
		self.token_logging = policy;

		self
	}

	/// Sets the token index snapshot path.
	pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
		self.store_path = Some(path.into());

		self
	}

	/// Checks cross-field constraints that serde cannot express.
	pub fn validate(&self) -> Result<(), ConfigError> {
		match self.upstream.scheme() {
			"http" | "https" => {},
			scheme => return Err(ConfigError::UnsupportedScheme { scheme: scheme.to_owned() }),
		}

		self.quota.policy()?;
		self.quota.methods()?;

		for (field, zero) in [
			("timeout", self.timeout.is_zero()),
			("connect_timeout", self.connect_timeout.is_zero()),
			("stream_chunk_size", self.stream_chunk_size == 0),
			("max_body_bytes", self.max_body_bytes == 0),
			("sweep_interval", self.sweep_interval.is_zero()),
		] {
			if zero {
				return Err(ConfigError::NonPositive { field });
			}
		}

		if self.upstream_api_key.as_ref().is_some_and(|key| headers::bearer(key.expose()).is_err()) {
			return Err(ConfigError::InvalidHeader { field: "upstream_api_key" });
		}

		Ok(())
	}

	/// Projects the forwarding settings.
	pub fn forwarder_config(&self) -> ForwarderConfig {
		let config = ForwarderConfig::new(self.upstream.clone())
			.with_timeout(self.timeout)
			.with_connect_timeout(self.connect_timeout)
			.with_max_retries(self.max_retries)
			.with_stream_chunk_size(self.stream_chunk_size)
			.with_max_body_bytes(self.max_body_bytes);

		match &self.upstream_api_key {
			Some(key) => config.with_upstream_api_key(key.clone()),
			None => config,
		}
	}

	/// Opens the configured token index.
	pub fn open_store(&self) -> Result<Arc<dyn DocumentStore>, StoreError> {
		match &self.store_path {
			Some(path) => Ok(Arc::new(FileStore::open(path)?)),
			None => {
				tracing::warn!(target: "api", "No token store configured; every token will be rejected.");

				Ok(Arc::new(MemoryStore::default()))
			},
		}
	}
}

fn env_value(env: &impl Env, var: &str) -> Option<String> {
	env.var(var).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty())
}

fn env_parse<T>(env: &impl Env, var: &'static str) -> Result<Option<T>, ConfigError>
where
	T: FromStr,
	T::Err: Display,
{
	env_value(env, var)
		.map(|raw| {
			raw.parse().map_err(|e: T::Err| ConfigError::InvalidEnv { var, reason: e.to_string() })
		})
		.transpose()
}

fn default_listen() -> SocketAddr {
	SocketAddr::from((Ipv4Addr::LOCALHOST, 8000))
}

fn default_rate() -> String {
	"60/m".into()
}

fn default_timeout() -> StdDuration {
	StdDuration::from_secs(120)
}

fn default_connect_timeout() -> StdDuration {
	StdDuration::from_secs(10)
}

fn default_stream_chunk_size() -> usize {
	64 * 1024
}

fn default_max_body_bytes() -> usize {
	10 * 1024 * 1024
}

fn default_sweep_interval() -> StdDuration {
	StdDuration::from_secs(60)
}

mod secs {
	// std
	use std::time::Duration as StdDuration;
	// crates.io
	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S>(value: &StdDuration, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_u64(value.as_secs())
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<StdDuration, D::Error>
	where
		D: Deserializer<'de>,
	{
		u64::deserialize(deserializer).map(StdDuration::from_secs)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
		pairs.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect()
	}

	#[test]
	fn from_env_applies_defaults() {
		let config = GateConfig::from_env(&env(&[(GateConfig::ENV_UPSTREAM, "http://llm:8080")]))
			.expect("Minimal environment should load.");

		assert_eq!(config.listen, "127.0.0.1:8000".parse::<SocketAddr>().expect("Address should parse."));
		assert_eq!(config.quota.rate, "60/m");
		assert_eq!(config.quota.methods, None);
		assert_eq!(config.timeout, StdDuration::from_secs(120));
		assert_eq!(config.max_retries, 0);
		assert_eq!(config.stream_chunk_size, 65_536);
		assert_eq!(config.token_logging, TokenLogging::Raw);
		assert!(config.store_path.is_none());
	}

	#[test]
	fn from_env_reads_every_override() {
		let config = GateConfig::from_env(&env(&[
			(GateConfig::ENV_UPSTREAM, "https://llm.internal/api"),
			(GateConfig::ENV_LISTEN, "0.0.0.0:9000"),
			(GateConfig::ENV_UPSTREAM_API_KEY, "sk-upstream"),
			(GateConfig::ENV_RATE, "1/60s"),
			(GateConfig::ENV_RATE_METHODS, "post, put"),
			(GateConfig::ENV_TIMEOUT_SECS, "30"),
			(GateConfig::ENV_MAX_RETRIES, "2"),
			(GateConfig::ENV_TOKEN_LOGGING, "fingerprint"),
			(GateConfig::ENV_STORE, "/var/lib/widget-proxy/tokens.json"),
		]))
		.expect("Full environment should load.");

		assert_eq!(config.listen.port(), 9000);
		assert_eq!(config.quota.methods().expect("Methods should parse."), Some(vec![
			Method::POST,
			Method::PUT
		]));
		assert_eq!(config.quota.policy().expect("Rate should parse.").limit(), 1);
		assert_eq!(config.timeout, StdDuration::from_secs(30));
		assert_eq!(config.token_logging, TokenLogging::Fingerprint);

		let forwarder = config.forwarder_config();

		assert_eq!(forwarder.max_retries, 2);
		assert_eq!(forwarder.upstream_api_key.map(|k| k.expose().to_owned()).as_deref(), Some(
			"sk-upstream"
		));
	}

	#[test]
	fn from_env_names_the_offending_variable() {
		let missing = GateConfig::from_env(&env(&[])).expect_err("Upstream is required.");

		assert!(matches!(missing, ConfigError::MissingEnv { var: GateConfig::ENV_UPSTREAM }));

		let invalid = GateConfig::from_env(&env(&[
			(GateConfig::ENV_UPSTREAM, "http://llm"),
			(GateConfig::ENV_TIMEOUT_SECS, "soon"),
		]))
		.expect_err("Non-numeric timeout should fail.");

		assert!(matches!(invalid, ConfigError::InvalidEnv { var: GateConfig::ENV_TIMEOUT_SECS, .. }));

		let upstream = GateConfig::from_env(&env(&[(GateConfig::ENV_UPSTREAM, "llm.internal/api")]))
			.expect_err("A relative upstream should fail.");

		assert!(matches!(upstream, ConfigError::InvalidUpstream { .. }), "{upstream:?}");
	}

	#[test]
	fn validate_rejects_bad_values() {
		let base = GateConfig::new(Url::parse("http://llm").expect("URL fixture should parse."));

		assert!(matches!(
			base.clone().with_rate("0/m").validate(),
			Err(ConfigError::NonPositive { field: "quota.limit" })
		));
		assert!(matches!(
			base.clone().with_stream_chunk_size(0).validate(),
			Err(ConfigError::NonPositive { field: "stream_chunk_size" })
		));
		assert!(matches!(
			base.clone().with_quota_methods(["P OST"]).validate(),
			Err(ConfigError::InvalidMethod { .. })
		));
		assert!(matches!(
			base.with_upstream_api_key("bad\nkey").validate(),
			Err(ConfigError::InvalidHeader { field: "upstream_api_key" })
		));

		let ftp = GateConfig::new(Url::parse("ftp://llm").expect("URL fixture should parse."));

		assert!(matches!(ftp.validate(), Err(ConfigError::UnsupportedScheme { .. })));
	}

	#[test]
	fn from_json_reports_field_paths() {
		let config = GateConfig::from_json(
			r#"{ "upstream": "http://llm", "quota": { "rate": "10/5m", "methods": ["POST"] }, "timeout": 5 }"#,
		)
		.expect("Document should parse.");

		assert_eq!(config.timeout, StdDuration::from_secs(5));
		assert_eq!(config.quota.policy().expect("Rate should parse.").period(), Duration::minutes(5));

		let err = GateConfig::from_json(r#"{ "upstream": "http://llm", "quota": { "rate": 5 } }"#)
			.expect_err("Numeric rate should fail.");

		assert!(matches!(err, ConfigError::Parse { ref path, .. } if path == "quota.rate"));
	}
}
