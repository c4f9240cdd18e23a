//! Unverified claim extraction for three-segment bearer tokens.
//!
//! [`TokenCodec`] only reads the payload segment so the pipeline can populate the user-id
//! header and notice imminent expiry. It never checks the signature and must not be used
//! for trust decisions; the server validates every token it receives.

// crates.io
use base64::{
	Engine,
	engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD},
};
// self
use crate::{_prelude::*, auth::TokenSecret};

const SUBJECT_CLAIMS: [&str; 4] = ["sub", "userId", "user_id", "id"];

/// Claims extracted from a token payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenClaims {
	/// Subject (user) identifier, when any subject claim is present.
	pub subject: Option<String>,
	/// Expiry instant from the `exp` claim, when present.
	pub expires_at: Option<OffsetDateTime>,
}
impl TokenClaims {
	/// Returns `true` if the token expires within `skew` of `instant`.
	pub fn expires_within(&self, instant: OffsetDateTime, skew: Duration) -> bool {
		self.expires_at.is_some_and(|expires_at| expires_at - instant <= skew)
	}
}

/// Reasons a token payload could not be decoded. Always non-fatal for callers.
#[derive(Debug, ThisError)]
pub enum DecodeError {
	/// Token does not have exactly three dot-delimited segments.
	#[error("Token has {found} segments instead of 3.")]
	SegmentCount {
		/// Number of segments found.
		found: usize,
	},
	/// Payload segment is not valid base64.
	#[error("Token payload is not valid base64.")]
	Base64(#[from] base64::DecodeError),
	/// Payload segment is not a JSON object.
	#[error("Token payload is not valid JSON.")]
	Json(#[from] serde_json::Error),
	/// Payload carries no usable subject claim.
	#[error("Token payload has no subject claim.")]
	MissingSubject,
}

/// Stateless decoder for bearer token claims.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokenCodec;
impl TokenCodec {
	/// Decodes the payload segment of `token`; a leading bearer scheme is ignored.
	///
	/// A payload without a subject still decodes so its expiry stays usable.
	pub fn decode(token: &str) -> Result<TokenClaims, DecodeError> {
		let secret = TokenSecret::new(token.trim());
		let segments = secret.raw().split('.').collect::<Vec<_>>();

		if segments.len() != 3 {
			return Err(DecodeError::SegmentCount { found: segments.len() });
		}

		let payload = segments[1].trim_end_matches('=');
		let bytes =
			URL_SAFE_NO_PAD.decode(payload).or_else(|_| STANDARD_NO_PAD.decode(payload))?;
		let claims = serde_json::from_slice::<serde_json::Map<String, Value>>(&bytes)?;
		let subject =
			SUBJECT_CLAIMS.iter().find_map(|name| claims.get(*name).and_then(claim_to_string));
		let expires_at = claims
			.get("exp")
			.and_then(|exp| exp.as_i64().or_else(|| exp.as_f64().map(|secs| secs as i64)))
			.and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok());

		Ok(TokenClaims { subject, expires_at })
	}

	/// Like [`TokenCodec::decode`] but only returns the subject, which must be present.
	pub fn subject(token: &str) -> Result<String, DecodeError> {
		Self::decode(token)?.subject.ok_or(DecodeError::MissingSubject)
	}
}

/// Renders a string or numeric identifier claim; empty strings are ignored.
pub(crate) fn claim_to_string(value: &Value) -> Option<String> {
	match value {
		Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_owned()),
		Value::Number(n) => Some(n.to_string()),
		_ => None,
	}
}
