//! Published access tokens and the policy that decides how they appear in audit logs.

// crates.io
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};
use uuid::Uuid;
// self
use crate::_prelude::*;

/// Number of digest bytes kept in a token fingerprint (12 base64 characters).
const FINGERPRINT_BYTES: usize = 9;

/// Opaque, UUID-shaped token that grants proxy access while its document is public.
///
/// Formatters print a fingerprint instead of the value; use [`AccessToken::expose`] when the
/// raw token is genuinely required (store lookups, raw audit logging).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessToken(Uuid);
impl AccessToken {
	/// Parses a caller-supplied token, accepting any textual UUID form.
	pub fn parse(raw: &str) -> Result<Self, TokenFormatError> {
		let trimmed = raw.trim();

		if trimmed.is_empty() {
			return Err(TokenFormatError::Empty);
		}

		Uuid::parse_str(trimmed).map(Self).map_err(|_| TokenFormatError::NotUuid)
	}

	/// Mints a fresh random token.
	pub fn generate() -> Self {
		Self(Uuid::new_v4())
	}

	/// Returns the canonical hyphenated token value. Callers decide whether it may be logged.
	pub fn expose(&self) -> String {
		self.0.hyphenated().to_string()
	}

	/// Stable, non-reversible label for this token.
	pub fn fingerprint(&self) -> String {
		fingerprint(&self.expose())
	}
}
impl From<Uuid> for AccessToken {
	fn from(value: Uuid) -> Self {
		Self(value)
	}
}
impl FromStr for AccessToken {
	type Err = TokenFormatError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::parse(s)
	}
}
impl Debug for AccessToken {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("AccessToken").field(&self.fingerprint()).finish()
	}
}
impl Display for AccessToken {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(&self.fingerprint())
	}
}

/// Reasons a presented token string is not token-shaped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ThisError)]
pub enum TokenFormatError {
	/// The token was empty or whitespace.
	#[error("Access token is empty.")]
	Empty,
	/// The token is not a UUID.
	#[error("Access token is not a UUID.")]
	NotUuid,
}

/// How token values are rendered in security and operational audit events.
///
/// `Raw` reproduces the historical behavior of logging the presented value verbatim so
/// auditors can correlate abuse; `Fingerprint` logs a truncated SHA-256 digest instead.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenLogging {
	/// Log the value exactly as presented.
	#[default]
	Raw,
	/// Log a digest-derived fingerprint.
	Fingerprint,
}
impl TokenLogging {
	/// Renders a presented token value (well-formed or not) according to the policy.
	pub fn render(self, presented: &str) -> String {
		match self {
			Self::Raw => presented.to_owned(),
			Self::Fingerprint => fingerprint(presented),
		}
	}
}
impl FromStr for TokenLogging {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"raw" => Ok(Self::Raw),
			"fingerprint" => Ok(Self::Fingerprint),
			other => Err(format!("unknown token logging policy `{other}`")),
		}
	}
}

fn fingerprint(value: &str) -> String {
	let digest = Sha256::digest(value.as_bytes());

	URL_SAFE_NO_PAD.encode(&digest[..FINGERPRINT_BYTES])
}
