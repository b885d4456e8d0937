//! Header rewriting between the caller, the gate, and the upstream.

// std
use std::collections::HashSet;
// crates.io
use axum::http::{
	HeaderMap, HeaderName, HeaderValue,
	header::{ACCEPT_ENCODING, AUTHORIZATION, CONNECTION, CONTENT_LENGTH, HOST},
};
// self
use crate::auth::Identity;

/// Header carrying the caller's access token.
pub const CONFIG_KEY_HEADER: HeaderName = HeaderName::from_static("x-config-key");
/// Header telling the upstream which identity the request runs as.
pub const REMOTE_USER_HEADER: HeaderName = HeaderName::from_static("remote_user");

const HOP_BY_HOP: [&str; 8] = [
	"connection",
	"keep-alive",
	"proxy-authenticate",
	"proxy-authorization",
	"te",
	"trailer",
	"transfer-encoding",
	"upgrade",
];

/// Builds the upstream request headers from the caller's headers.
pub fn outbound(inbound: &HeaderMap, caller: &Identity, api_key: Option<&str>) -> HeaderMap {
	let named = connection_named(inbound);
	let mut headers = HeaderMap::with_capacity(inbound.len() + 3);

	for (name, value) in inbound {
		if is_hop_by_hop(name, &named)
			|| name == HOST
			|| name == CONTENT_LENGTH
			|| name == CONFIG_KEY_HEADER
			|| (api_key.is_some() && name == AUTHORIZATION)
		{
			continue;
		}

		headers.append(name.clone(), value.clone());
	}

	if let Ok(value) = HeaderValue::from_str(caller.as_str()) {
		headers.insert(REMOTE_USER_HEADER, value);
	}
	if !headers.contains_key(ACCEPT_ENCODING) {
		headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
	}

	headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));

	if let Some(value) = api_key.and_then(|key| bearer(key).ok()) {
		headers.insert(AUTHORIZATION, value);
	}

	headers
}

/// Copies the upstream response headers minus the hop-by-hop set.
pub fn inbound(upstream: &HeaderMap) -> HeaderMap {
	let named = connection_named(upstream);
	let mut headers = HeaderMap::with_capacity(upstream.len());

	for (name, value) in upstream {
		if !is_hop_by_hop(name, &named) {
			headers.append(name.clone(), value.clone());
		}
	}

	headers
}

/// Renders `Authorization: Bearer <key>` marked as sensitive.
pub fn bearer(key: &str) -> Result<HeaderValue, axum::http::header::InvalidHeaderValue> {
	let mut value = HeaderValue::from_str(&format!("Bearer {key}"))?;

	value.set_sensitive(true);

	Ok(value)
}

fn is_hop_by_hop(name: &HeaderName, named: &HashSet<HeaderName>) -> bool {
	HOP_BY_HOP.contains(&name.as_str()) || named.contains(name)
}

// Headers listed inside `Connection` only apply to the hop that carried them.
fn connection_named(headers: &HeaderMap) -> HashSet<HeaderName> {
	headers
		.get_all(CONNECTION)
		.iter()
		.filter_map(|value| value.to_str().ok())
		.flat_map(|value| value.split(','))
		.filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
		.collect()
}
