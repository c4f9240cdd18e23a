//! Transport primitives for authenticated API calls.
//!
//! The crate's only dependency on an HTTP stack is [`HttpTransport`]. Requests and responses
//! are plain [`::http`] values with buffered bodies so custom transports (and in-process test
//! doubles) can be plugged in without depending on reqwest.

// self
use crate::{_prelude::*, error::TransportError};
#[cfg(feature = "reqwest")] use crate::error::ConfigError;

/// Buffered request handed to a transport.
pub type HttpRequest = ::http::Request<Vec<u8>>;
/// Buffered response returned by a transport.
pub type HttpResponse = ::http::Response<Vec<u8>>;
/// Boxed future returned by [`HttpTransport::execute`].
pub type TransportFuture<'a> =
	Pin<Box<dyn Future<Output = Result<HttpResponse, TransportError>> + 'a + Send>>;

/// Abstraction over HTTP stacks capable of executing API calls.
///
/// Implementations must be `Send + Sync + 'static` so a single transport can be shared by
/// the pipeline and the refresh coordinator behind an `Arc`. Any HTTP status (including
/// 4xx/5xx) is a successful execution; `Err` is reserved for calls that produced no
/// response at all. Cookie handling, when needed, belongs to the transport.
pub trait HttpTransport
where
	Self: 'static + Send + Sync,
{
	/// Executes `request` and buffers the full response body.
	fn execute(&self, request: HttpRequest) -> TransportFuture<'_>;
}

/// Returns the response `Content-Type`, if present and printable.
pub(crate) fn content_type(response: &HttpResponse) -> Option<&str> {
	response.headers().get(::http::header::CONTENT_TYPE).and_then(|value| value.to_str().ok())
}

/// Reqwest-backed transport with a cookie jar and a per-call timeout.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
	client: ReqwestClient,
	timeout: Option<Duration>,
}
#[cfg(feature = "reqwest")]
impl ReqwestTransport {
	/// Builds a client that keeps cookies across calls and aborts calls after `timeout`.
	pub fn new(timeout: Duration) -> Result<Self, ConfigError> {
		let client = ReqwestClient::builder()
			.cookie_store(true)
			.timeout(timeout.unsigned_abs())
			.build()?;

		Ok(Self { client, timeout: Some(timeout) })
	}

	/// Wraps an existing reqwest client; its own timeout settings are left untouched.
	pub fn with_client(client: ReqwestClient) -> Self {
		Self { client, timeout: None }
	}
}
#[cfg(feature = "reqwest")]
impl AsRef<ReqwestClient> for ReqwestTransport {
	fn as_ref(&self) -> &ReqwestClient {
		&self.client
	}
}
#[cfg(feature = "reqwest")]
impl HttpTransport for ReqwestTransport {
	fn execute(&self, request: HttpRequest) -> TransportFuture<'_> {
		let client = self.client.clone();
		let timeout = self.timeout;
		let map_err = move |e| TransportError::from_reqwest(e, timeout);

		Box::pin(async move {
			let request = reqwest::Request::try_from(request).map_err(map_err)?;
			let response = client.execute(request).await.map_err(map_err)?;
			let status = response.status();
			let headers = response.headers().to_owned();
			let body = response.bytes().await.map_err(map_err)?;
			let mut response_new = HttpResponse::new(body.to_vec());

			*response_new.status_mut() = status;
			*response_new.headers_mut() = headers;

			Ok(response_new)
		})
	}
}

#[cfg(all(test, feature = "reqwest"))]
mod tests {
	// crates.io
	use httpmock::prelude::*;
	// self
	use super::*;

	#[tokio::test]
	async fn reqwest_transport_buffers_status_headers_and_body() {
		let server = MockServer::start_async().await;
		let mock = server
			.mock_async(|when, then| {
				when.method(POST).path("/api/v1/ping").header("x-probe", "1");
				then.status(418).header("content-type", "text/plain").body("short and stout");
			})
			.await;
		let transport = ReqwestTransport::new(Duration::seconds(5))
			.expect("Reqwest transport should build.");
		let request = ::http::Request::builder()
			.method("POST")
			.uri(server.url("/api/v1/ping"))
			.header("x-probe", "1")
			.body(Vec::new())
			.expect("Request fixture should build.");
		let response = transport.execute(request).await.expect("Call should produce a response.");

		mock.assert_async().await;

		assert_eq!(response.status().as_u16(), 418);
		assert_eq!(
			response.headers().get("content-type").and_then(|value| value.to_str().ok()),
			Some("text/plain")
		);
		assert_eq!(response.body().as_slice(), b"short and stout");
	}

	#[tokio::test]
	async fn unreachable_host_is_a_transport_error() {
		let transport = ReqwestTransport::new(Duration::seconds(2))
			.expect("Reqwest transport should build.");
		let request = ::http::Request::builder()
			.uri("http://127.0.0.1:9/unreachable")
			.body(Vec::new())
			.expect("Request fixture should build.");

		assert!(transport.execute(request).await.is_err());
	}

	#[tokio::test]
	async fn slow_response_reports_the_configured_timeout() {
		let server = MockServer::start_async().await;

		server
			.mock_async(|when, then| {
				when.path("/api/v1/slow");
				then.status(200).delay(std::time::Duration::from_millis(500));
			})
			.await;

		let transport = ReqwestTransport::new(Duration::milliseconds(100))
			.expect("Reqwest transport should build.");
		let request = ::http::Request::builder()
			.uri(server.url("/api/v1/slow"))
			.body(Vec::new())
			.expect("Request fixture should build.");
		let err = transport.execute(request).await.expect_err("Slow call should time out.");

		assert!(
			matches!(err, TransportError::Timeout { after } if after == Duration::milliseconds(100)),
			"Unexpected error: {err:?}"
		);
	}
}
