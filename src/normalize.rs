//! Maps heterogeneous backend responses onto [`NormalizedResponse`].
//!
//! The backend wraps payloads in several envelopes (bare, `data`-nested, named-key nested,
//! and status-discriminated). [`ResponseNormalizer`] evaluates the [`Envelope`] matchers in
//! [`Envelope::PRIORITY`] order and keeps the first payload the caller's [`PayloadShape`]
//! accepts. An unrecognized success body yields `ok` with no data rather than an error.

pub mod response;
pub mod shape;

pub use response::*;
pub use shape::*;

// self
use crate::{_prelude::*, normalize::shape::DATA_FIELDS, obs, pipeline::ParsedBody};

const ERROR_FIELDS: [&str; 5] = ["error", "message", "detail", "msg", "errors"];
const MAX_TEXT_ERROR_LEN: usize = 200;

/// Payload located inside a response body.
#[derive(Clone, Debug, PartialEq)]
pub struct Located {
	/// Envelope that matched.
	pub envelope: Envelope,
	/// Extracted payload, with degenerate list entries already removed.
	pub payload: Value,
	/// Number of list entries dropped.
	pub dropped: usize,
}

/// Stateless normalizer for response bodies.
#[derive(Clone, Copy, Debug, Default)]
pub struct ResponseNormalizer;
impl ResponseNormalizer {
	/// Normalizes a status + parsed body into the canonical response record.
	pub fn normalize(status: u16, body: &ParsedBody, shape: &PayloadShape) -> NormalizedResponse {
		if !(200..300).contains(&status) {
			let message = Self::error_message(body)
				.unwrap_or_else(|| format!("Request failed with status {status}"));

			return NormalizedResponse::failure(status, message);
		}

		let Some(json) = body.as_json() else {
			return NormalizedResponse::success(status, None);
		};

		if is_failed_envelope(json, shape) {
			let message = Self::error_message(body)
				.unwrap_or_else(|| "Server reported an unsuccessful operation".into());

			return NormalizedResponse::failure(status, message);
		}

		match Self::locate(json, shape) {
			Some(located) => NormalizedResponse::success(status, Some(located.payload))
				.with_dropped_entries(located.dropped),
			None => {
				obs::debug!(status = status, "response body matched no known envelope");

				NormalizedResponse::success(status, None)
			},
		}
	}

	/// Finds the payload inside `body`, trying envelopes in priority order.
	pub fn locate(body: &Value, shape: &PayloadShape) -> Option<Located> {
		let (envelope, payload) = Envelope::PRIORITY
			.into_iter()
			.find_map(|envelope| envelope.extract(body, shape).map(|payload| (envelope, payload)))?;
		let (payload, dropped) = Self::filter_entries(payload, shape);

		if dropped > 0 {
			obs::debug!(
				envelope = envelope.as_str(),
				dropped = dropped,
				"dropped degenerate list entries"
			);
		}

		Some(Located { envelope, payload, dropped })
	}

	/// Extracts a human-readable error message from a failed response body.
	pub fn error_message(body: &ParsedBody) -> Option<String> {
		match body {
			ParsedBody::Json(json) => json_error_message(json),
			ParsedBody::Text(text) => Some(truncate(text, MAX_TEXT_ERROR_LEN)),
			ParsedBody::Empty => None,
		}
	}

	fn filter_entries(payload: &Value, shape: &PayloadShape) -> (Value, usize) {
		match payload {
			Value::Array(entries) if shape.kind == PayloadKind::List => {
				let kept = entries
					.iter()
					.filter(|entry| !shape.is_degenerate_entry(entry))
					.cloned()
					.collect::<Vec<_>>();
				let dropped = entries.len() - kept.len();

				(Value::Array(kept), dropped)
			},
			other => (other.clone(), 0),
		}
	}
}

/// A failure discriminator only counts on an object that is an envelope rather than a record
/// with its own `status` field: it must carry `success`, a data key, or an error field, and
/// none of the record fields the shape declares.
fn is_failed_envelope(json: &Value, shape: &PayloadShape) -> bool {
	let Some(object) = json.as_object() else {
		return false;
	};

	if Discriminator::of(json) != Some(Discriminator::Failure) || shape.matches_fields(json) {
		return false;
	}

	object.contains_key("success")
		|| DATA_FIELDS.iter().chain(ERROR_FIELDS.iter()).any(|field| object.contains_key(*field))
}

fn json_error_message(json: &Value) -> Option<String> {
	match json {
		Value::String(message) if !message.trim().is_empty() => Some(message.trim().to_owned()),
		Value::Object(object) => ERROR_FIELDS
			.iter()
			.filter_map(|field| object.get(*field))
			.find_map(json_error_message)
			.or_else(|| object.get("data").and_then(json_error_message)),
		Value::Array(items) => items.iter().find_map(json_error_message),
		_ => None,
	}
}

fn truncate(text: &str, max: usize) -> String {
	match text.char_indices().nth(max) {
		Some((idx, _)) => format!("{}…", &text[..idx]),
		None => text.to_owned(),
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use serde_json::json;
	// self
	use super::*;

	fn subscription_list() -> PayloadShape {
		PayloadShape::list("subscriptions").with_fields(["id", "topic"])
	}

	fn payload() -> Value {
		json!([{ "id": "s-1", "topic": "billing" }, { "id": "s-2", "topic": "alerts" }])
	}

	#[test]
	fn every_envelope_yields_the_same_payload() {
		let shape = subscription_list();
		let bodies = [
			(Envelope::Root, payload()),
			(Envelope::DataNested, json!({ "data": payload() })),
			(Envelope::DataNested, json!({ "data": { "subscriptions": payload(), "total": 2 } })),
			(Envelope::NamedKey, json!({ "subscriptions": payload(), "page": 1 })),
			(
				Envelope::StatusDiscriminated,
				json!({ "status": "success", "data": { "subscriptions": payload() } }),
			),
			(Envelope::StatusDiscriminated, json!({ "success": true, "result": payload() })),
		];

		for (expected, body) in bodies {
			let located = ResponseNormalizer::locate(&body, &shape)
				.unwrap_or_else(|| panic!("Envelope should be recognized: {body}"));

			assert_eq!(located.envelope, expected, "Wrong envelope for {body}");
			assert_eq!(located.payload, payload(), "Wrong payload for {body}");
		}
	}

	#[test]
	fn record_envelopes_yield_the_same_record() {
		let shape = PayloadShape::record("user").with_fields(["id", "email"]);
		let record = json!({ "id": "u-1", "email": "someone@example.com" });

		for body in [
			record.clone(),
			json!({ "data": record }),
			json!({ "user": record }),
			json!({ "status": "ok", "data": { "user": record } }),
		] {
			let response =
				ResponseNormalizer::normalize(200, &ParsedBody::Json(body.clone()), &shape);

			assert_eq!(response.data(), Some(&record), "Wrong record for {body}");
		}
	}

	#[test]
	fn degenerate_entries_are_dropped() {
		let body = json!({ "data": [{ "id": "s-1", "topic": "billing" }, { "__v": 0 }] });
		let response =
			ResponseNormalizer::normalize(200, &ParsedBody::Json(body), &subscription_list());

		assert!(response.ok());
		assert_eq!(response.data(), Some(&json!([{ "id": "s-1", "topic": "billing" }])));
		assert_eq!(response.dropped_entries(), 1);
	}

	#[test]
	fn unrecognized_success_is_ok_without_data() {
		let response = ResponseNormalizer::normalize(
			200,
			&ParsedBody::Json(json!({ "unexpected": true })),
			&subscription_list(),
		);

		assert!(response.ok());
		assert_eq!(response.data(), None);

		let text = ResponseNormalizer::normalize(
			200,
			&ParsedBody::Text("<html></html>".into()),
			&subscription_list(),
		);

		assert!(text.ok());
		assert_eq!(text.data(), None);
	}

	#[test]
	fn errors_are_extracted_from_many_shapes() {
		let cases = [
			(json!({ "error": "Topic is required" }), "Topic is required"),
			(json!({ "error": { "message": "Nested message" } }), "Nested message"),
			(json!({ "errors": [{ "msg": "First" }, { "msg": "Second" }] }), "First"),
			(json!({ "detail": "Not found" }), "Not found"),
		];

		for (body, expected) in cases {
			let response =
				ResponseNormalizer::normalize(422, &ParsedBody::Json(body), &PayloadShape::any());

			assert_eq!(response.error(), Some(expected));
			assert_eq!(response.data(), None);
		}

		let empty = ResponseNormalizer::normalize(500, &ParsedBody::Empty, &PayloadShape::any());

		assert_eq!(empty.error(), Some("Request failed with status 500"));
	}

	#[test]
	fn record_with_its_own_failed_status_is_not_an_envelope() {
		let record = json!({ "id": "n-1", "title": "Invoice", "status": "failed" });
		let response = ResponseNormalizer::normalize(
			200,
			&ParsedBody::Json(record.clone()),
			&PayloadShape::record(None).with_fields(["id", "title"]),
		);

		assert!(response.ok());
		assert_eq!(response.data(), Some(&record));

		let delivery = json!({ "id": "n-2", "status": "error", "message": "Mailbox full" });
		let response = ResponseNormalizer::normalize(
			200,
			&ParsedBody::Json(delivery.clone()),
			&PayloadShape::record(None).with_fields(["id"]),
		);

		assert_eq!(response.data(), Some(&delivery), "Declared record fields win over the status.");

		let bare = ResponseNormalizer::normalize(
			200,
			&ParsedBody::Json(json!({ "status": "failed", "stage": "render" })),
			&PayloadShape::any(),
		);

		assert!(bare.ok());
	}

	#[test]
	fn discriminated_failure_on_success_status_is_an_error() {
		let body = json!({ "status": "error", "message": "Quota exceeded", "data": [] });
		let response =
			ResponseNormalizer::normalize(200, &ParsedBody::Json(body), &subscription_list());

		assert!(!response.ok());
		assert_eq!(response.status(), 200);
		assert_eq!(response.error(), Some("Quota exceeded"));
		assert_eq!(response.failure_kind(), Some(FailureKind::Envelope));
	}
}
