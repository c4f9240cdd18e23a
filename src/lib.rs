//! Authenticated request pipeline for notification platform clients—single-flight token
//! refresh, retry-once requests, redirect-loop breaking, and envelope-agnostic response
//! normalization in one crate.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod config;
pub mod error;
pub mod http;
pub mod normalize;
pub mod obs;
pub mod pipeline;
pub mod redirect;
pub mod refresh;
pub mod session;
pub mod store;
#[cfg(any(test, feature = "test"))]
#[doc(hidden)]
pub mod _preludet {
	//! Convenience re-exports and helpers shared by unit and integration tests; enabled via
	//! `cfg(test)` or the `test` crate feature.

	pub use crate::_prelude::*;

	// std
	use std::{collections::VecDeque, sync::atomic::AtomicUsize};
	// self
	use crate::{
		config::ClientConfig,
		http::{HttpRequest, HttpResponse, HttpTransport, TransportFuture},
		error::TransportError,
		redirect::{Navigator, RedirectMode},
		session::Session,
		store::{KeyValueStore, MemoryStore},
	};
	#[cfg(feature = "reqwest")]
	use crate::http::ReqwestTransport;

	#[cfg(feature = "reqwest")]
	/// Session type alias used by reqwest-backed integration tests.
	pub type ReqwestTestSession = Session<ReqwestTransport>;

	#[cfg(feature = "reqwest")]
	/// Constructs a [`Session`] backed by an in-memory store and the reqwest transport used
	/// across integration tests.
	pub fn build_reqwest_test_session(config: ClientConfig) -> (ReqwestTestSession, Arc<MemoryStore>) {
		let store_backend = Arc::new(MemoryStore::default());
		let store: Arc<dyn KeyValueStore> = store_backend.clone();
		let transport = ReqwestTransport::new(config.request_timeout)
			.expect("Failed to build Reqwest transport for tests.");
		let session = Session::with_transport(config, store, transport)
			.expect("Failed to assemble the test session.");

		(session, store_backend)
	}

	/// Builds a configuration pointing at the provided base URL with millisecond-scale
	/// backoff so retry tests stay fast.
	pub fn test_config(base_url: &str) -> ClientConfig {
		ClientConfig::builder(Url::parse(base_url).expect("Test base URL should parse."))
			.refresh_policy(crate::config::RefreshPolicy {
				max_attempts: 3,
				base_delay: Duration::milliseconds(10),
				max_delay: Duration::milliseconds(40),
			})
			.build()
			.expect("Test configuration should be valid.")
	}

	/// One scripted reply served by [`ScriptedTransport`].
	#[derive(Clone, Debug)]
	pub enum ScriptedReply {
		/// Responds with a status code and JSON body.
		Json(u16, serde_json::Value),
		/// Responds with a status code, content type, and raw body.
		Raw(u16, &'static str, String),
		/// Fails at the transport layer without producing a response.
		NetworkFailure,
		/// Waits for the provided duration and then serves the inner reply.
		Delayed(Duration, Box<ScriptedReply>),
	}
	impl ScriptedReply {
		/// Shorthand for a JSON response.
		pub fn json(status: u16, body: serde_json::Value) -> Self {
			Self::Json(status, body)
		}

		/// Wraps the reply so it is served after `delay`.
		pub fn after(self, delay: Duration) -> Self {
			Self::Delayed(delay, Box::new(self))
		}
	}

	/// Snapshot of a request observed by [`ScriptedTransport`].
	#[derive(Clone, Debug)]
	pub struct RecordedRequest {
		/// HTTP method.
		pub method: ::http::Method,
		/// Request path without the query string.
		pub path: String,
		/// Request headers.
		pub headers: ::http::HeaderMap,
		/// Raw request body.
		pub body: Vec<u8>,
	}
	impl RecordedRequest {
		/// Returns a header value as a string, if present and printable.
		pub fn header(&self, name: &str) -> Option<&str> {
			self.headers.get(name).and_then(|value| value.to_str().ok())
		}

		/// Parses the body as JSON.
		pub fn json(&self) -> serde_json::Value {
			serde_json::from_slice(&self.body).expect("Recorded body should be JSON.")
		}
	}

	#[derive(Debug)]
	struct ScriptedRoute {
		path: String,
		authorization: Option<String>,
		replies: VecDeque<ScriptedReply>,
		fallback: Option<ScriptedReply>,
	}

	/// In-process [`HttpTransport`] that serves scripted replies per path and records every
	/// request it receives.
	#[derive(Clone, Debug, Default)]
	pub struct ScriptedTransport {
		routes: Arc<Mutex<Vec<ScriptedRoute>>>,
		requests: Arc<Mutex<Vec<RecordedRequest>>>,
		calls: Arc<AtomicUsize>,
	}
	impl ScriptedTransport {
		/// Queues replies for `path`; the last reply keeps being served once the queue drains.
		pub fn route(&self, path: &str, replies: impl IntoIterator<Item = ScriptedReply>) {
			self.push_route(path, None, replies);
		}

		/// Queues replies for `path` that only match the provided `Authorization` header.
		pub fn route_for_token(
			&self,
			path: &str,
			authorization: &str,
			replies: impl IntoIterator<Item = ScriptedReply>,
		) {
			self.push_route(path, Some(authorization.to_owned()), replies);
		}

		/// Returns how many requests hit `path`.
		pub fn hits(&self, path: &str) -> usize {
			self.requests.lock().iter().filter(|request| request.path == path).count()
		}

		/// Returns the total number of dispatched requests.
		pub fn calls(&self) -> usize {
			self.calls.load(std::sync::atomic::Ordering::SeqCst)
		}

		/// Returns a snapshot of every recorded request.
		pub fn requests(&self) -> Vec<RecordedRequest> {
			self.requests.lock().clone()
		}

		fn push_route(
			&self,
			path: &str,
			authorization: Option<String>,
			replies: impl IntoIterator<Item = ScriptedReply>,
		) {
			let replies: VecDeque<_> = replies.into_iter().collect();
			let fallback = replies.back().cloned();

			self.routes.lock().push(ScriptedRoute {
				path: path.to_owned(),
				authorization,
				replies,
				fallback,
			});
		}

		fn next_reply(&self, request: &HttpRequest) -> Option<ScriptedReply> {
			let presented = request
				.headers()
				.get(::http::header::AUTHORIZATION)
				.and_then(|value| value.to_str().ok())
				.map(str::to_owned);
			let mut routes = self.routes.lock();
			let route = routes.iter_mut().find(|route| {
				route.path == request.uri().path()
					&& route.authorization.as_ref().is_none_or(|auth| Some(auth) == presented.as_ref())
			})?;

			route.replies.pop_front().or_else(|| route.fallback.clone())
		}
	}
	impl HttpTransport for ScriptedTransport {
		fn execute(&self, request: HttpRequest) -> TransportFuture<'_> {
			self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);

			let reply = self.next_reply(&request);

			self.requests.lock().push(RecordedRequest {
				method: request.method().clone(),
				path: request.uri().path().to_owned(),
				headers: request.headers().clone(),
				body: request.body().clone(),
			});

			Box::pin(async move {
				let mut reply = reply.unwrap_or(ScriptedReply::Json(
					404,
					serde_json::json!({ "error": "No scripted route." }),
				));

				loop {
					match reply {
						ScriptedReply::Delayed(delay, inner) => {
							tokio::time::sleep(delay.unsigned_abs()).await;

							reply = *inner;
						},
						ScriptedReply::NetworkFailure =>
							return Err(TransportError::network(std::io::Error::new(
								std::io::ErrorKind::ConnectionReset,
								"scripted connection reset",
							))),
						ScriptedReply::Json(status, body) =>
							return Ok(scripted_response(status, "application/json", body.to_string())),
						ScriptedReply::Raw(status, content_type, body) =>
							return Ok(scripted_response(status, content_type, body)),
					}
				}
			})
		}
	}

	fn scripted_response(status: u16, content_type: &str, body: String) -> HttpResponse {
		::http::Response::builder()
			.status(status)
			.header(::http::header::CONTENT_TYPE, content_type)
			.body(body.into_bytes())
			.expect("Scripted response should build.")
	}

	/// [`Navigator`] that records every redirect request.
	#[derive(Debug, Default)]
	pub struct RecordingNavigator(Mutex<Vec<RedirectMode>>);
	impl RecordingNavigator {
		/// Returns the redirect modes requested so far, oldest first.
		pub fn modes(&self) -> Vec<RedirectMode> {
			self.0.lock().clone()
		}
	}
	impl Navigator for RecordingNavigator {
		fn redirect_to_login(&self, mode: RedirectMode) {
			self.0.lock().push(mode);
		}
	}

	/// Builds an unsigned three-segment token carrying `sub` and `exp` claims.
	pub fn unsigned_token(subject: &str, expires_at: OffsetDateTime) -> String {
		use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};

		let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
		let claims = serde_json::json!({ "sub": subject, "exp": expires_at.unix_timestamp() });
		let payload = URL_SAFE_NO_PAD.encode(claims.to_string());

		format!("{header}.{payload}.signature")
	}
}

mod _prelude {
	pub use std::{
		collections::{BTreeMap, HashMap},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use serde_json::Value;
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(test)] use {color_eyre as _, httpmock as _};
