//! Secure token secret wrapper that redacts sensitive material and handles the bearer scheme.

// self
use crate::_prelude::*;

/// Authorization scheme prefix expected on stored access tokens.
pub const BEARER_PREFIX: &str = "Bearer ";

/// Redacted token secret wrapper keeping sensitive material out of logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSecret(String);
impl TokenSecret {
	/// Wraps a new secret string.
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// Returns the inner value exactly as stored. Callers must avoid logging this string.
	pub fn expose(&self) -> &str {
		&self.0
	}

	/// Returns `true` if the value already carries the bearer scheme (case-insensitive).
	pub fn has_bearer_prefix(&self) -> bool {
		self.0
			.get(..BEARER_PREFIX.len())
			.is_some_and(|head| head.eq_ignore_ascii_case(BEARER_PREFIX))
	}

	/// Returns the credential without any bearer scheme.
	pub fn raw(&self) -> &str {
		if self.has_bearer_prefix() { self.0[BEARER_PREFIX.len()..].trim_start() } else { &self.0 }
	}

	/// Returns the value in canonical `Bearer <token>` form.
	pub fn to_bearer(&self) -> String {
		format!("{BEARER_PREFIX}{}", self.raw())
	}
}
impl AsRef<str> for TokenSecret {
	fn as_ref(&self) -> &str {
		self.expose()
	}
}
impl Debug for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("TokenSecret").field(&"<redacted>").finish()
	}
}
impl Display for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("<redacted>")
	}
}
