//! Extraction of the presented access token from headers or the query string.

// crates.io
use axum::http::HeaderMap;
// self
use crate::forward::headers::CONFIG_KEY_HEADER;

/// Query parameter carrying the access token when the header is absent.
pub const TOKEN_QUERY_PARAM: &str = "uuid";

/// Extracts the presented token; the `X-Config-Key` header wins over the `uuid` query parameter.
pub fn presented_token(headers: &HeaderMap, query: Option<&str>) -> Option<String> {
	let from_header = headers
		.get(CONFIG_KEY_HEADER)
		.map(|value| String::from_utf8_lossy(value.as_bytes()).trim().to_owned())
		.filter(|value| !value.is_empty());

	from_header.or_else(|| {
		url::form_urlencoded::parse(query?.as_bytes())
			.find(|(name, _)| name == TOKEN_QUERY_PARAM)
			.map(|(_, value)| value.trim().to_owned())
			.filter(|value| !value.is_empty())
	})
}
