//! Per-call request description.

// crates.io
use ::http::{HeaderMap, HeaderName, HeaderValue, Method};
// self
use crate::_prelude::*;

/// One logical API call.
///
/// The context is immutable once dispatched. The retry counter is owned by the pipeline and
/// is only ever `0` or `1`.
#[derive(Clone, Debug)]
pub struct RequestContext {
	/// Endpoint as supplied by the caller; normalized at dispatch.
	pub endpoint: String,
	/// HTTP method.
	pub method: Method,
	/// JSON body, if any.
	pub body: Option<Value>,
	/// Extra headers sent with the call.
	pub headers: HeaderMap,
	retry_count: u8,
}
impl RequestContext {
	/// Creates a context for `method` + `endpoint`.
	pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
		Self { endpoint: endpoint.into(), method, body: None, headers: HeaderMap::new(), retry_count: 0 }
	}

	/// `GET` shorthand.
	pub fn get(endpoint: impl Into<String>) -> Self {
		Self::new(Method::GET, endpoint)
	}

	/// `POST` shorthand.
	pub fn post(endpoint: impl Into<String>) -> Self {
		Self::new(Method::POST, endpoint)
	}

	/// `PUT` shorthand.
	pub fn put(endpoint: impl Into<String>) -> Self {
		Self::new(Method::PUT, endpoint)
	}

	/// `PATCH` shorthand.
	pub fn patch(endpoint: impl Into<String>) -> Self {
		Self::new(Method::PATCH, endpoint)
	}

	/// `DELETE` shorthand.
	pub fn delete(endpoint: impl Into<String>) -> Self {
		Self::new(Method::DELETE, endpoint)
	}

	/// Attaches a JSON body.
	pub fn with_json(mut self, body: Value) -> Self {
		self.body = Some(body);

		self
	}

	/// Serializes `body` and attaches it.
	pub fn with_body<B>(self, body: &B) -> Result<Self, serde_json::Error>
	where
		B: ?Sized + Serialize,
	{
		Ok(self.with_json(serde_json::to_value(body)?))
	}

	/// Adds a header; later values for the same name replace earlier ones.
	pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
		self.headers.insert(name, value);

		self
	}

	/// Returns `0` for the first dispatch and `1` for the post-refresh retry.
	pub fn retry_count(&self) -> u8 {
		self.retry_count
	}

	/// Returns `true` if this context was already retried after a refresh.
	pub fn is_retry(&self) -> bool {
		self.retry_count > 0
	}

	/// Rebuilds the context for its single permitted retry.
	pub(crate) fn into_retry(self) -> Self {
		Self { retry_count: 1, ..self }
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use serde_json::json;
	// self
	use super::*;

	#[derive(Serialize)]
	struct NewSubscription<'a> {
		topic: &'a str,
		channels: [&'a str; 2],
	}

	#[test]
	fn builders_compose() {
		let context = RequestContext::post("/subscriptions")
			.with_body(&NewSubscription { topic: "billing", channels: ["email", "push"] })
			.expect("Subscription body should serialize.")
			.with_header(HeaderName::from_static("x-request-id"), HeaderValue::from_static("r-1"));

		assert_eq!(context.method, Method::POST);
		assert_eq!(context.body, Some(json!({ "topic": "billing", "channels": ["email", "push"] })));
		assert_eq!(context.headers.get("x-request-id"), Some(&HeaderValue::from_static("r-1")));
		assert_eq!(context.retry_count(), 0);
	}

	#[test]
	fn retry_saturates_at_one() {
		let retried = RequestContext::get("/topics").into_retry().into_retry();

		assert_eq!(retried.retry_count(), 1);
		assert!(retried.is_retry());
	}
}
