//! Target payload descriptors and the envelope matchers evaluated against them.

// self
use crate::_prelude::*;

pub(crate) const DATA_FIELDS: [&str; 3] = ["data", "result", "payload"];
const STATUS_SUCCESS: [&str; 3] = ["success", "ok", "succeeded"];
const STATUS_FAILURE: [&str; 4] = ["error", "fail", "failed", "failure"];

/// Structural kind of the payload a caller expects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PayloadKind {
	/// A single JSON object.
	Record,
	/// A JSON array of records.
	List,
	/// Any non-null JSON value.
	Any,
}

/// Describes the payload a caller expects so envelopes can be peeled off reliably.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PayloadShape {
	/// Structural kind.
	pub kind: PayloadKind,
	/// Named keys the server may nest the payload under (e.g. `subscriptions`).
	pub keys: Vec<String>,
	/// Fields a real record is expected to carry; used to recognize root records and to
	/// filter degenerate list entries.
	pub fields: Vec<String>,
}
impl PayloadShape {
	/// Expects a single record, optionally nested under `key`.
	pub fn record(key: impl Into<Option<&'static str>>) -> Self {
		Self::new(PayloadKind::Record, key.into())
	}

	/// Expects a list of records, optionally nested under `key`.
	pub fn list(key: impl Into<Option<&'static str>>) -> Self {
		Self::new(PayloadKind::List, key.into())
	}

	/// Accepts whatever non-null payload the first matching envelope carries.
	pub fn any() -> Self {
		Self::new(PayloadKind::Any, None)
	}

	/// Adds an alternative named key.
	pub fn or_key(mut self, key: impl Into<String>) -> Self {
		self.keys.push(key.into());

		self
	}

	/// Declares the fields expected on a real record.
	pub fn with_fields<I, S>(mut self, fields: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.fields.extend(fields.into_iter().map(Into::into));

		self
	}

	/// Returns `true` if `value` structurally satisfies this shape.
	pub fn accepts(&self, value: &Value) -> bool {
		match self.kind {
			PayloadKind::List => value.is_array(),
			PayloadKind::Record => value.as_object().is_some_and(|object| {
				self.fields.is_empty() || self.fields.iter().any(|field| object.contains_key(field))
			}),
			PayloadKind::Any => !value.is_null(),
		}
	}

	/// Returns `true` if a list entry looks like server-side corruption rather than a record.
	///
	/// An entry is degenerate when it is not an object, or when it is an object with at most
	/// one field and none of the expected record fields. Shapes without declared fields never
	/// drop entries.
	pub fn is_degenerate_entry(&self, entry: &Value) -> bool {
		if self.fields.is_empty() {
			return false;
		}

		match entry.as_object() {
			Some(object) =>
				object.len() <= 1 && !self.fields.iter().any(|field| object.contains_key(field)),
			None => true,
		}
	}

	/// Returns `true` if `value` is an object carrying at least one declared record field.
	pub(crate) fn matches_fields(&self, value: &Value) -> bool {
		value
			.as_object()
			.is_some_and(|object| self.fields.iter().any(|field| object.contains_key(field)))
	}

	fn new(kind: PayloadKind, key: Option<&'static str>) -> Self {
		Self { kind, keys: key.map(str::to_owned).into_iter().collect(), fields: Vec::new() }
	}

	fn named<'a>(&self, value: &'a Value) -> Option<&'a Value> {
		self.keys.iter().filter_map(|key| value.get(key)).find(|inner| self.accepts(inner))
	}

	/// Accepts `value` itself or one of its named children.
	fn direct_or_named<'a>(&self, value: &'a Value) -> Option<&'a Value> {
		if self.accepts(value) && !self.is_wrapped_named(value) {
			Some(value)
		} else {
			self.named(value)
		}
	}

	/// A record carrying one of our named keys is an envelope, not the payload.
	fn is_wrapped_named(&self, value: &Value) -> bool {
		self.kind != PayloadKind::List && self.fields.is_empty() && self.named(value).is_some()
	}
}

/// Status carried by a discriminated envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Discriminator {
	/// `{"status": "success"}` or `{"success": true}`.
	Success,
	/// `{"status": "error"}` or `{"success": false}`.
	Failure,
}
impl Discriminator {
	/// Reads the discriminator from a response object, if it carries one.
	pub fn of(body: &Value) -> Option<Self> {
		let object = body.as_object()?;

		if let Some(success) = object.get("success").and_then(Value::as_bool) {
			return Some(if success { Self::Success } else { Self::Failure });
		}

		let status = object.get("status").and_then(Value::as_str)?.to_ascii_lowercase();

		if STATUS_SUCCESS.contains(&status.as_str()) {
			Some(Self::Success)
		} else if STATUS_FAILURE.contains(&status.as_str()) {
			Some(Self::Failure)
		} else {
			None
		}
	}
}

/// Response envelopes observed from the backend, in matching priority order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Envelope {
	/// `{"status": "success", "data": <payload>}` (payload may itself be key-nested).
	StatusDiscriminated,
	/// `{"data": <payload>}` (payload may itself be key-nested).
	DataNested,
	/// `{"<key>": <payload>}`.
	NamedKey,
	/// The body is the payload.
	Root,
}
impl Envelope {
	/// Matchers evaluated in order; the first match wins.
	pub const PRIORITY: [Envelope; 4] =
		[Envelope::StatusDiscriminated, Envelope::DataNested, Envelope::NamedKey, Envelope::Root];

	/// Returns a stable label suitable for log fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Envelope::StatusDiscriminated => "status_discriminated",
			Envelope::DataNested => "data_nested",
			Envelope::NamedKey => "named_key",
			Envelope::Root => "root",
		}
	}

	/// Attempts to peel this envelope off `body` and return a payload accepted by `shape`.
	pub fn extract<'a>(self, body: &'a Value, shape: &PayloadShape) -> Option<&'a Value> {
		match self {
			Envelope::StatusDiscriminated => {
				if Discriminator::of(body)? != Discriminator::Success {
					return None;
				}

				DATA_FIELDS
					.iter()
					.filter_map(|field| body.get(field))
					.find_map(|inner| shape.direct_or_named(inner))
			},
			Envelope::DataNested => body.get("data").and_then(|inner| shape.direct_or_named(inner)),
			Envelope::NamedKey => shape.named(body),
			Envelope::Root => (shape.accepts(body) && !shape.is_wrapped_named(body)).then_some(body),
		}
	}
}
impl Display for Envelope {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use serde_json::json;
	// self
	use super::*;

	#[test]
	fn discriminator_reads_both_conventions() {
		assert_eq!(Discriminator::of(&json!({ "success": true })), Some(Discriminator::Success));
		assert_eq!(Discriminator::of(&json!({ "status": "ERROR" })), Some(Discriminator::Failure));
		assert_eq!(Discriminator::of(&json!({ "status": "sent", "id": 1 })), None);
		assert_eq!(Discriminator::of(&json!([1])), None);
	}

	#[test]
	fn degenerate_entries_need_declared_fields() {
		let shape = PayloadShape::list("subscriptions").with_fields(["id", "topic"]);

		assert!(shape.is_degenerate_entry(&json!({ "_v": 0 })));
		assert!(shape.is_degenerate_entry(&json!({})));
		assert!(shape.is_degenerate_entry(&json!("stray")));
		assert!(!shape.is_degenerate_entry(&json!({ "id": "s-1" })));
		assert!(!shape.is_degenerate_entry(&json!({ "name": "a", "owner": "b" })));
		assert!(!PayloadShape::list(None).is_degenerate_entry(&json!({ "_v": 0 })));
	}

	#[test]
	fn root_record_requires_expected_fields() {
		let shape = PayloadShape::record("profile").with_fields(["id", "email"]);

		assert_eq!(Envelope::Root.extract(&json!({ "message": "hi" }), &shape), None);
		assert!(Envelope::Root.extract(&json!({ "id": 1 }), &shape).is_some());
	}
}
