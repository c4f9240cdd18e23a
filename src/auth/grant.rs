//! Credentials issued by the login and refresh endpoints.

// self
use crate::{
	_prelude::*,
	auth::{TokenCodec, TokenSecret, codec::claim_to_string},
	normalize::{PayloadShape, ResponseNormalizer},
};

const ACCESS_TOKEN_FIELDS: [&str; 3] = ["accessToken", "access_token", "token"];
const REFRESH_TOKEN_FIELDS: [&str; 2] = ["refreshToken", "refresh_token"];
const USER_ID_FIELDS: [&str; 2] = ["id", "_id"];
const FLAT_USER_ID_FIELDS: [&str; 2] = ["userId", "user_id"];

/// Token set extracted from an authentication response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthGrant {
	/// Newly issued access token (raw or bearer-prefixed, as returned).
	pub access_token: TokenSecret,
	/// Rotated refresh token; `None` keeps the previous one.
	pub refresh_token: Option<TokenSecret>,
	/// User identifier from the user object, a flat field, or the token subject.
	pub user_id: Option<String>,
}
impl AuthGrant {
	/// Extracts a grant from a response payload in any supported envelope.
	///
	/// Returns `None` when no access token can be found.
	pub fn from_payload(payload: &Value) -> Option<Self> {
		let shape = PayloadShape::record(None).with_fields(ACCESS_TOKEN_FIELDS);
		let record = ResponseNormalizer::locate(payload, &shape)
			.map(|located| located.payload)
			.filter(Value::is_object)
			.unwrap_or_else(|| payload.clone());
		let access_token = first_string(&record, &ACCESS_TOKEN_FIELDS).map(TokenSecret::new)?;
		let refresh_token = first_string(&record, &REFRESH_TOKEN_FIELDS).map(TokenSecret::new);
		let user_id = record
			.get("user")
			.and_then(|user| first_string(user, &USER_ID_FIELDS))
			.or_else(|| first_string(&record, &FLAT_USER_ID_FIELDS))
			.or_else(|| TokenCodec::subject(access_token.expose()).ok());

		Some(Self { access_token, refresh_token, user_id })
	}
}

fn first_string(value: &Value, fields: &[&str]) -> Option<String> {
	fields.iter().find_map(|field| value.get(*field).and_then(claim_to_string))
}

#[cfg(test)]
mod tests {
	// crates.io
	use serde_json::json;
	// self
	use super::*;

	#[test]
	fn grant_is_found_in_nested_envelopes() {
		for body in [
			json!({ "accessToken": "a.b.c", "refreshToken": "r-1", "user": { "id": "u-1" } }),
			json!({ "data": { "accessToken": "a.b.c", "refreshToken": "r-1", "user": { "_id": "u-1" } } }),
			json!({ "success": true, "data": { "access_token": "a.b.c", "refresh_token": "r-1", "userId": "u-1" } }),
		] {
			let grant = AuthGrant::from_payload(&body)
				.unwrap_or_else(|| panic!("Grant should be located in {body}"));

			assert_eq!(grant.access_token.expose(), "a.b.c");
			assert_eq!(grant.refresh_token.as_ref().map(TokenSecret::expose), Some("r-1"));
			assert_eq!(grant.user_id.as_deref(), Some("u-1"));
		}
	}

	#[test]
	fn user_id_falls_back_to_token_subject() {
		let token = crate::_preludet::unsigned_token(
			"u-from-token",
			OffsetDateTime::now_utc() + Duration::hours(1),
		);
		let grant = AuthGrant::from_payload(&json!({ "token": token }))
			.expect("Grant with a bare token field should be located.");

		assert_eq!(grant.refresh_token, None);
		assert_eq!(grant.user_id.as_deref(), Some("u-from-token"));
	}

	#[test]
	fn missing_access_token_yields_none() {
		assert_eq!(AuthGrant::from_payload(&json!({ "refreshToken": "r-1" })), None);
		assert_eq!(AuthGrant::from_payload(&json!({ "data": null })), None);
	}
}
