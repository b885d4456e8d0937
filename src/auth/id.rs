//! Strongly typed caller identity shared by the resolver, quota limiter, and forwarder.

// std
use std::{borrow::Borrow, ops::Deref};
// self
use crate::_prelude::*;

const IDENTITY_MAX_LEN: usize = 128;

/// Resolved owner of a request, produced by session authentication or token resolution.
///
/// The value doubles as the quota key and as the `REMOTE_USER` marker sent upstream, so it
/// must be a single header-safe token.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);
impl Identity {
	/// Creates a new identity after validation.
	pub fn new(value: impl AsRef<str>) -> Result<Self, IdentityError> {
		let view = value.as_ref();

		validate_view(view)?;

		Ok(Self(view.to_owned()))
	}

	/// Borrows the identity as a string slice.
	pub fn as_str(&self) -> &str {
		&self.0
	}
}
impl Deref for Identity {
	type Target = str;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}
impl AsRef<str> for Identity {
	fn as_ref(&self) -> &str {
		&self.0
	}
}
impl From<Identity> for String {
	fn from(value: Identity) -> Self {
		value.0
	}
}
impl TryFrom<String> for Identity {
	type Error = IdentityError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		validate_view(&value)?;

		Ok(Self(value))
	}
}
impl Borrow<str> for Identity {
	fn borrow(&self) -> &str {
		&self.0
	}
}
impl Debug for Identity {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "Identity({})", self.0)
	}
}
impl Display for Identity {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(&self.0)
	}
}
impl FromStr for Identity {
	type Err = IdentityError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::new(s)
	}
}

/// Error returned when identity validation fails.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ThisError)]
pub enum IdentityError {
	/// The identity was empty.
	#[error("Identity cannot be empty.")]
	Empty,
	/// The identity contains whitespace characters.
	#[error("Identity contains whitespace.")]
	ContainsWhitespace,
	/// The identity contains characters that cannot travel in an HTTP header.
	#[error("Identity contains control or non-ASCII characters.")]
	NotHeaderSafe,
	/// The identity exceeded the allowed character count.
	#[error("Identity exceeds {max} characters.")]
	TooLong {
		/// Maximum permitted character count.
		max: usize,
	},
}

fn validate_view(view: &str) -> Result<(), IdentityError> {
	if view.is_empty() {
		return Err(IdentityError::Empty);
	}
	if view.chars().any(char::is_whitespace) {
		return Err(IdentityError::ContainsWhitespace);
	}
	if !view.bytes().all(|b| b.is_ascii_graphic()) {
		return Err(IdentityError::NotHeaderSafe);
	}
	if view.len() > IDENTITY_MAX_LEN {
		return Err(IdentityError::TooLong { max: IDENTITY_MAX_LEN });
	}

	Ok(())
}
