//! Authenticated request pipeline.
//!
//! [`RequestPipeline::send`] turns one [`RequestContext`] into one [`NormalizedResponse`]:
//!
//! 1. normalize the endpoint onto the API prefixes;
//! 2. read the access token, rewriting it into bearer form if storage holds a bare token;
//! 3. attach `Authorization` and the user-id header;
//! 4. dispatch, retrying a call that produced no response exactly once;
//! 5. on a 401 with a refresh token available, join the shared refresh cycle and retry the
//!    call once;
//! 6. parse the body and hand it to [`ResponseNormalizer`].
//!
//! A 401 that cannot be recovered clears the credentials and asks the [`Navigator`] to send
//! the user to the login page, in full-reload mode when [`RedirectLoopGuard`] detects a loop.
//! Requests that were in flight when that redirect happened do not redirect again, so one
//! failed refresh shared by many callers counts as one redirect attempt. Responses from
//! authentication endpoints are returned as-is.

pub mod body;
pub mod context;
pub mod endpoint;

pub use body::*;
pub use context::*;
pub use endpoint::*;

// std
use std::sync::atomic::{AtomicU64, Ordering};
// crates.io
use ::http::{
	HeaderName, HeaderValue,
	header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
};
use serde::de::DeserializeOwned;
// self
use crate::{
	_prelude::*,
	auth::{TokenCodec, TokenSecret},
	config::ClientConfig,
	error::{ConfigError, TransportError},
	http::{self, HttpRequest, HttpResponse, HttpTransport},
	normalize::{NormalizedResponse, PayloadShape, ResponseNormalizer},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	redirect::{Navigator, RedirectLoopGuard, RedirectMode},
	refresh::RefreshCoordinator,
	store::{ClearMode, CredentialStore},
};

/// Message surfaced when no response could be obtained after the transport retry.
pub const CONNECTIVITY_MESSAGE: &str =
	"Unable to reach the server. Check your connection and try again";

/// Sends requests with credentials attached and recovers from expired access tokens.
pub struct RequestPipeline<T>
where
	T: ?Sized + HttpTransport,
{
	transport: Arc<T>,
	credentials: CredentialStore,
	coordinator: Arc<RefreshCoordinator<T>>,
	guard: RedirectLoopGuard,
	navigator: Arc<dyn Navigator>,
	/// Bumped by every login redirect; requests dispatched under an older value are covered.
	redirects: AtomicU64,
	endpoints: EndpointResolver,
	user_id_header: HeaderName,
	request_timeout: Duration,
	expiry_skew: Duration,
}
impl<T> RequestPipeline<T>
where
	T: ?Sized + HttpTransport,
{
	/// Wires a pipeline to its collaborators.
	pub fn new(
		config: &ClientConfig,
		transport: Arc<T>,
		credentials: CredentialStore,
		coordinator: Arc<RefreshCoordinator<T>>,
		navigator: Arc<dyn Navigator>,
	) -> Self {
		Self {
			transport,
			guard: RedirectLoopGuard::new(credentials.clone(), config.redirect),
			credentials,
			coordinator,
			navigator,
			redirects: AtomicU64::new(0),
			endpoints: EndpointResolver::new(config),
			user_id_header: config.user_id_header_name(),
			request_timeout: config.request_timeout,
			expiry_skew: config.expiry_skew,
		}
	}

	/// Sends one logical request and normalizes the response against `shape`.
	pub async fn send(&self, context: RequestContext, shape: &PayloadShape) -> NormalizedResponse {
		const KIND: FlowKind = FlowKind::Request;

		let span = FlowSpan::new(KIND, "send");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let response = span.instrument(self.dispatch(context, shape)).await;

		obs::record_flow_outcome(
			KIND,
			if response.ok() { FlowOutcome::Success } else { FlowOutcome::Failure },
		);

		response
	}

	/// Like [`RequestPipeline::send`] but deserializes the located payload into `D`.
	///
	/// A payload that does not match `D` is logged with its JSON path and yields a successful
	/// response without data.
	pub async fn send_as<D>(
		&self,
		context: RequestContext,
		shape: &PayloadShape,
	) -> NormalizedResponse<D>
	where
		D: DeserializeOwned,
	{
		let response = self.send(context, shape).await;
		let decoded = response.data().and_then(|payload| {
			match serde_path_to_error::deserialize::<_, D>(payload) {
				Ok(decoded) => Some(decoded),
				Err(e) => {
					obs::warn!(
						path = %e.path(),
						error = %e.inner(),
						"response payload does not match the expected type"
					);

					None
				},
			}
		});

		response.with_data(decoded)
	}

	/// Endpoint resolver used by this pipeline.
	pub fn endpoints(&self) -> &EndpointResolver {
		&self.endpoints
	}

	/// Redirect loop guard used by this pipeline.
	pub fn redirect_guard(&self) -> &RedirectLoopGuard {
		&self.guard
	}

	async fn dispatch(&self, mut context: RequestContext, shape: &PayloadShape) -> NormalizedResponse {
		let url = match self.endpoints.resolve(&context.endpoint) {
			Ok(url) => url,
			Err(e) => return NormalizedResponse::failure(0, e.to_string()),
		};
		let auth_path = self.endpoints.is_auth_path(&context.endpoint);
		let generation = self.redirects.load(Ordering::Acquire);

		if !auth_path {
			self.prepare_credentials().await;
		}

		loop {
			let token = self.bearer_token();
			let request = match self.build_request(&context, &url, token.as_ref()) {
				Ok(request) => request,
				Err(e) => return NormalizedResponse::failure(0, e.to_string()),
			};
			let response = match self.execute(request).await {
				Ok(response) => response,
				Err(e) => {
					obs::warn!(path = url.path(), error = %e, "request produced no response");

					return NormalizedResponse::failure(0, CONNECTIVITY_MESSAGE);
				},
			};
			let status = response.status().as_u16();

			obs::debug!(
				path = url.path(),
				status = status,
				retry = context.retry_count(),
				"response received"
			);

			if status == 401 && !auth_path {
				if !context.is_retry() && self.recover(token.as_ref()).await {
					context = context.into_retry();

					continue;
				}

				self.redirect_to_login(generation);
			}

			return Self::normalize(&response, shape);
		}
	}

	/// Attempts to make a retry worthwhile after a 401; `true` means retry once.
	async fn recover(&self, sent: Option<&TokenSecret>) -> bool {
		match self.credentials.refresh_token() {
			Ok(Some(_)) => {},
			Ok(None) => return false,
			Err(e) => {
				obs::warn!(error = %e, "refresh token could not be read");

				return false;
			},
		}

		if self.token_changed_since(sent) {
			obs::debug!("access token changed while the request was in flight; retrying");

			return true;
		}

		match self.coordinator.refresh().await {
			Ok(refreshed) => refreshed,
			Err(e) => {
				obs::warn!(error = %e, "shared refresh failed");

				false
			},
		}
	}

	/// Repairs inconsistent state and refreshes tokens that are about to expire.
	async fn prepare_credentials(&self) {
		let snapshot = match self.credentials.snapshot() {
			Ok(snapshot) => snapshot,
			Err(e) => {
				obs::warn!(error = %e, "credential snapshot failed");

				return;
			},
		};

		if snapshot.refresh_token.is_none() {
			if !snapshot.is_consistent() {
				obs::warn!("session is marked authenticated without an access token");
			}

			return;
		}

		let stage = match &snapshot.access_token {
			None if snapshot.authenticated => {
				obs::warn!("session is marked authenticated without an access token; refreshing");

				"repair"
			},
			None => return,
			Some(token) => match TokenCodec::decode(token.expose()) {
				Ok(claims) if claims.expires_within(OffsetDateTime::now_utc(), self.expiry_skew) =>
					"proactive",
				Ok(_) => return,
				Err(e) => {
					obs::debug!(error = %e, "access token claims are unreadable; sending as-is");

					return;
				},
			},
		};

		obs::debug!(stage = stage, "refreshing before dispatch");

		if let Err(e) = self.coordinator.refresh().await {
			obs::warn!(stage = stage, error = %e, "refresh before dispatch failed");
		}
	}

	/// Reads the access token, persisting the bearer form if storage held a bare token.
	fn bearer_token(&self) -> Option<TokenSecret> {
		let token = match self.credentials.access_token() {
			Ok(token) => token?,
			Err(e) => {
				obs::warn!(error = %e, "access token could not be read");

				return None;
			},
		};

		if token.has_bearer_prefix() {
			return Some(token);
		}

		match self.credentials.set_access_token(&token) {
			Ok(()) => {
				obs::info!("stored access token rewritten into bearer form");
			},
			Err(e) => {
				obs::warn!(error = %e, "bearer-form access token could not be persisted");
			},
		}

		Some(TokenSecret::new(token.to_bearer()))
	}

	fn token_changed_since(&self, sent: Option<&TokenSecret>) -> bool {
		match (self.credentials.access_token(), sent) {
			(Ok(Some(current)), Some(sent)) => current.raw() != sent.raw(),
			(Ok(Some(_)), None) => true,
			_ => false,
		}
	}

	fn user_id(&self, token: Option<&TokenSecret>) -> Option<String> {
		if let Ok(Some(user_id)) = self.credentials.user_id() {
			return Some(user_id);
		}

		match TokenCodec::subject(token?.expose()) {
			Ok(subject) => Some(subject),
			Err(e) => {
				obs::debug!(error = %e, "user id could not be derived from the access token");

				None
			},
		}
	}

	fn build_request(
		&self,
		context: &RequestContext,
		url: &Url,
		token: Option<&TokenSecret>,
	) -> Result<HttpRequest, ConfigError> {
		let body = context.body.as_ref().map(|body| body.to_string().into_bytes()).unwrap_or_default();
		let mut request =
			::http::Request::builder().method(context.method.clone()).uri(url.as_str()).body(body)?;
		let headers = request.headers_mut();

		headers.extend(context.headers.clone());
		headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

		if context.body.is_some() {
			headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
		}
		if let Some(token) = token {
			headers.insert(AUTHORIZATION, header_value(&token.to_bearer())?);
		}
		if let Some(user_id) = self.user_id(token) {
			headers.insert(self.user_id_header.clone(), header_value(&user_id)?);
		}

		Ok(request)
	}

	/// Executes `request`, retrying once when no response was received.
	async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
		let retry = clone_request(&request);

		match self.execute_once(request).await {
			Ok(response) => Ok(response),
			Err(e) => {
				obs::debug!(error = %e, "transport failure; retrying once");

				self.execute_once(retry).await
			},
		}
	}

	async fn execute_once(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
		tokio::time::timeout(self.request_timeout.unsigned_abs(), self.transport.execute(request))
			.await
			.map_err(|_| TransportError::Timeout { after: self.request_timeout })?
	}

	fn redirect_to_login(&self, generation: u64) {
		if self
			.redirects
			.compare_exchange(generation, generation + 1, Ordering::AcqRel, Ordering::Acquire)
			.is_err()
		{
			obs::debug!("login redirect already issued for this authentication failure");

			return;
		}
		if let Err(e) = self.credentials.clear_all(ClearMode::PreserveEmail) {
			obs::warn!(error = %e, "credentials could not be cleared");
		}

		let mode = match self.guard.record_redirect_attempt() {
			Ok(true) => RedirectMode::FullReload,
			Ok(false) => RedirectMode::ClientSide,
			Err(e) => {
				obs::warn!(error = %e, "redirect counters could not be updated");

				RedirectMode::ClientSide
			},
		};

		obs::warn!(mode = ?mode, "authentication is no longer valid; redirecting to login");

		self.navigator.redirect_to_login(mode);
	}

	fn normalize(response: &HttpResponse, shape: &PayloadShape) -> NormalizedResponse {
		let body = ParsedBody::parse(http::content_type(response), response.body());

		ResponseNormalizer::normalize(response.status().as_u16(), &body, shape)
	}
}
impl<T> Debug for RequestPipeline<T>
where
	T: ?Sized + HttpTransport,
{
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("RequestPipeline")
			.field("endpoints", &self.endpoints)
			.field("user_id_header", &self.user_id_header)
			.field("coordinator", &self.coordinator)
			.finish()
	}
}

fn header_value(value: &str) -> Result<HeaderValue, ConfigError> {
	HeaderValue::from_str(value).map_err(|e| ConfigError::HttpRequest(e.into()))
}

fn clone_request(request: &HttpRequest) -> HttpRequest {
	let mut copy = HttpRequest::new(request.body().clone());

	*copy.method_mut() = request.method().clone();
	*copy.uri_mut() = request.uri().clone();
	*copy.version_mut() = request.version();
	*copy.headers_mut() = request.headers().clone();

	copy
}
