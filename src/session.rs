//! Session facade tying the pipeline, the refresh coordinator, and the login/logout flows
//! together.

// self
use crate::{
	_prelude::*,
	auth::AuthGrant,
	config::ClientConfig,
	http::HttpTransport,
	normalize::{FailureKind, NormalizedResponse, PayloadShape},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	pipeline::{RequestContext, RequestPipeline},
	redirect::{Navigator, NoopNavigator, RedirectLoopGuard},
	refresh::{RefreshCoordinator, RefreshOutcome},
	store::{ClearMode, CredentialStore, KeyValueStore},
};
#[cfg(feature = "reqwest")] use crate::http::ReqwestTransport;

#[cfg(feature = "reqwest")]
/// Session specialized for the crate's default reqwest transport.
pub type ReqwestSession = Session<ReqwestTransport>;

/// One authenticated client session.
///
/// The session owns a single [`RefreshCoordinator`] shared by every request it sends, so
/// concurrent 401s collapse into one refresh call. Cloning the session shares that state.
pub struct Session<T>
where
	T: ?Sized + HttpTransport,
{
	config: ClientConfig,
	transport: Arc<T>,
	credentials: CredentialStore,
	coordinator: Arc<RefreshCoordinator<T>>,
	pipeline: Arc<RequestPipeline<T>>,
}
impl<T> Session<T>
where
	T: ?Sized + HttpTransport,
{
	/// Creates a session over `store` that dispatches through `transport`.
	pub fn with_transport(
		config: ClientConfig,
		store: Arc<dyn KeyValueStore>,
		transport: impl Into<Arc<T>>,
	) -> Result<Self> {
		let transport = transport.into();
		let credentials = CredentialStore::new(store);
		let coordinator =
			Arc::new(RefreshCoordinator::new(transport.clone(), credentials.clone(), &config)?);
		let pipeline = Arc::new(RequestPipeline::new(
			&config,
			transport.clone(),
			credentials.clone(),
			coordinator.clone(),
			Arc::new(NoopNavigator),
		));

		Ok(Self { config, transport, credentials, coordinator, pipeline })
	}

	/// Routes unrecoverable authentication failures to `navigator`.
	pub fn with_navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
		self.pipeline = Arc::new(RequestPipeline::new(
			&self.config,
			self.transport.clone(),
			self.credentials.clone(),
			self.coordinator.clone(),
			navigator,
		));

		self
	}

	/// Exchanges email + password for a session and persists the issued credentials.
	pub async fn login(&self, email: &str, password: &str) -> Result<AuthGrant> {
		const KIND: FlowKind = FlowKind::Login;

		let span = FlowSpan::new(KIND, "login");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span.instrument(self.exchange_credentials(email, password)).await;

		match &result {
			Ok(_) => obs::record_flow_outcome(KIND, FlowOutcome::Success),
			Err(_) => obs::record_flow_outcome(KIND, FlowOutcome::Failure),
		}

		result
	}

	/// Ends the session. The server call is best-effort; local credentials are always
	/// cleared and the last-used email is kept.
	pub async fn logout(&self) -> Result<()> {
		const KIND: FlowKind = FlowKind::Logout;

		let span = FlowSpan::new(KIND, "logout");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let mut context = RequestContext::post(self.config.logout_path.clone());

		if let Some(refresh_token) = self.credentials.refresh_token()? {
			context = context.with_json(serde_json::json!({ "refreshToken": refresh_token.raw() }));
		}

		let response = span.instrument(self.pipeline.send(context, &PayloadShape::any())).await;

		if !response.ok() {
			obs::warn!(
				status = response.status(),
				"logout request failed; clearing local credentials anyway"
			);
		}

		self.credentials.clear_all(ClearMode::PreserveEmail)?;
		obs::record_flow_outcome(KIND, FlowOutcome::Success);

		Ok(())
	}

	/// Sends one request through the authenticated pipeline.
	pub async fn send(&self, context: RequestContext, shape: &PayloadShape) -> NormalizedResponse {
		self.pipeline.send(context, shape).await
	}

	/// Sends one request and deserializes the located payload into `D`.
	pub async fn send_as<D>(
		&self,
		context: RequestContext,
		shape: &PayloadShape,
	) -> NormalizedResponse<D>
	where
		D: serde::de::DeserializeOwned,
	{
		self.pipeline.send_as(context, shape).await
	}

	/// Forces a refresh through the shared coordinator.
	pub async fn refresh(&self) -> RefreshOutcome {
		self.coordinator.refresh().await
	}

	/// Returns `true` if the stored flag says a session is established.
	pub fn is_authenticated(&self) -> Result<bool> {
		Ok(self.credentials.is_authenticated()?)
	}

	/// Validated configuration.
	pub fn config(&self) -> &ClientConfig {
		&self.config
	}

	/// Typed credential accessor.
	pub fn credentials(&self) -> &CredentialStore {
		&self.credentials
	}

	/// Shared refresh coordinator.
	pub fn coordinator(&self) -> &RefreshCoordinator<T> {
		&self.coordinator
	}

	/// Redirect loop guard.
	pub fn redirect_guard(&self) -> &RedirectLoopGuard {
		self.pipeline.redirect_guard()
	}

	async fn exchange_credentials(&self, email: &str, password: &str) -> Result<AuthGrant> {
		let context = RequestContext::post(self.config.login_path.clone())
			.with_json(serde_json::json!({ "email": email, "password": password }));
		let response = self.pipeline.send(context, &PayloadShape::any()).await;

		if let Some(kind) = response.failure_kind() {
			let reason = response.error().unwrap_or_default().to_owned();

			return Err(match kind {
				FailureKind::AuthInvalid => Error::AuthInvalid { reason },
				_ => Error::Rejected { status: response.status(), reason },
			});
		}

		let grant = response.data().and_then(AuthGrant::from_payload).ok_or_else(|| {
			Error::MalformedResponse { reason: "login response carried no access token".into() }
		})?;

		self.credentials.set_access_token(&grant.access_token)?;

		if let Some(refresh_token) = &grant.refresh_token {
			self.credentials.set_refresh_token(refresh_token)?;
		}
		if let Some(user_id) = &grant.user_id {
			self.credentials.set_user_id(user_id)?;
		}

		self.credentials.set_authenticated(true)?;
		self.credentials.set_last_email(email)?;
		self.redirect_guard().reset()?;

		obs::info!(user_id_known = grant.user_id.is_some(), "login succeeded");

		Ok(grant)
	}
}
#[cfg(feature = "reqwest")]
impl Session<ReqwestTransport> {
	/// Creates a session backed by the reqwest transport with the configured timeout.
	pub fn new(config: ClientConfig, store: Arc<dyn KeyValueStore>) -> Result<Self> {
		let transport = ReqwestTransport::new(config.request_timeout)?;

		Self::with_transport(config, store, transport)
	}
}
impl<T> Clone for Session<T>
where
	T: ?Sized + HttpTransport,
{
	fn clone(&self) -> Self {
		Self {
			config: self.config.clone(),
			transport: self.transport.clone(),
			credentials: self.credentials.clone(),
			coordinator: self.coordinator.clone(),
			pipeline: self.pipeline.clone(),
		}
	}
}
impl<T> Debug for Session<T>
where
	T: ?Sized + HttpTransport,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Session")
			.field("base_url", &self.config.base_url.as_str())
			.field("pipeline", &self.pipeline)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use serde_json::json;
	// self
	use super::*;
	use crate::{
		_preludet::{ScriptedReply, ScriptedTransport, test_config, unsigned_token},
		store::MemoryStore,
	};

	fn session(transport: &ScriptedTransport) -> Session<ScriptedTransport> {
		Session::with_transport(
			test_config("http://broker.test"),
			Arc::new(MemoryStore::default()),
			transport.clone(),
		)
		.expect("Session should build from the test configuration.")
	}

	#[tokio::test]
	async fn malformed_login_response_is_reported() {
		let transport = ScriptedTransport::default();
		let session = session(&transport);

		transport.route("/api/auth/login", [ScriptedReply::json(200, json!({ "user": { "id": "u" } }))]);

		let err = session.login("a@example.com", "pw").await.expect_err("Login should fail.");

		assert!(matches!(err, Error::MalformedResponse { .. }));
		assert!(!session.is_authenticated().expect("Store read should succeed."));
	}

	#[tokio::test]
	async fn logout_sends_refresh_token_and_clears_even_on_failure() {
		let transport = ScriptedTransport::default();
		let session = session(&transport);
		let token = unsigned_token("u-1", OffsetDateTime::now_utc() + Duration::hours(1));

		transport.route(
			"/api/auth/login",
			[ScriptedReply::json(200, json!({ "accessToken": token, "refreshToken": "r-1" }))],
		);
		transport.route("/api/auth/logout", [ScriptedReply::json(500, json!({ "error": "down" }))]);

		session.login("a@example.com", "pw").await.expect("Login should succeed.");
		session.logout().await.expect("Logout should clear local credentials.");

		let logout = transport
			.requests()
			.into_iter()
			.find(|request| request.path == "/api/auth/logout")
			.expect("Logout call should be recorded.");

		assert_eq!(logout.json(), json!({ "refreshToken": "r-1" }));
		assert_eq!(session.credentials().snapshot().expect("Snapshot should succeed."), Default::default());
		assert_eq!(
			session.credentials().last_email().expect("Store read should succeed."),
			Some("a@example.com".into())
		);
	}
}
