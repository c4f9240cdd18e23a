//! Single-flight token refresh shared by every request of a session.
//!
//! [`RefreshCoordinator`] is a two-state machine (idle / refreshing). The first caller that
//! finds it idle becomes the leader and performs the refresh; everyone arriving while the
//! cycle is in flight is queued as a waiter and receives the leader's outcome. Transport
//! failures are retried with capped exponential backoff inside the same cycle, so waiters
//! never trigger a second network call.
//!
//! If the leader's future is dropped mid-cycle the coordinator returns to idle without
//! publishing an outcome and the queued waiters re-enter [`RefreshCoordinator::refresh`],
//! where one of them takes over.

mod metrics;

pub use metrics::RefreshMetrics;

// crates.io
use tokio::sync::oneshot;
// self
use crate::{
	_prelude::*,
	auth::{AuthGrant, TokenSecret},
	config::{ClientConfig, RefreshPolicy},
	error::{ConfigError, RefreshError, TransportError},
	http::{self, HttpRequest, HttpTransport},
	normalize::ResponseNormalizer,
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	pipeline::{EndpointResolver, ParsedBody},
	store::{ClearMode, CredentialStore, StoreError},
};

/// Outcome broadcast to the leader and every waiter of one refresh cycle.
///
/// `Ok(true)` means a new access token was persisted; `Ok(false)` means there was no
/// refresh token to use and the stored credentials were cleared.
pub type RefreshOutcome = Result<bool, RefreshError>;

type Waiter = oneshot::Sender<RefreshOutcome>;

#[derive(Debug)]
enum Phase {
	Idle,
	Refreshing { waiters: Vec<Waiter> },
}

enum Role {
	Leader,
	Waiter(oneshot::Receiver<RefreshOutcome>),
}

enum Attempt {
	Granted(AuthGrant),
	Transient(String),
	Rejected { status: u16, reason: String },
}

/// Coordinates refresh-token exchanges so at most one is in flight per session.
pub struct RefreshCoordinator<T>
where
	T: ?Sized + HttpTransport,
{
	transport: Arc<T>,
	credentials: CredentialStore,
	refresh_url: Url,
	request_timeout: Duration,
	policy: RefreshPolicy,
	phase: Mutex<Phase>,
	metrics: RefreshMetrics,
}
impl<T> RefreshCoordinator<T>
where
	T: ?Sized + HttpTransport,
{
	/// Creates an idle coordinator that posts to the configured refresh endpoint.
	pub fn new(
		transport: Arc<T>,
		credentials: CredentialStore,
		config: &ClientConfig,
	) -> Result<Self, ConfigError> {
		let refresh_url = EndpointResolver::new(config).resolve(&config.refresh_path)?;

		Ok(Self {
			transport,
			credentials,
			refresh_url,
			request_timeout: config.request_timeout,
			policy: config.refresh,
			phase: Mutex::new(Phase::Idle),
			metrics: RefreshMetrics::default(),
		})
	}

	/// Refreshes the stored access token, joining the in-flight cycle if there is one.
	pub async fn refresh(&self) -> RefreshOutcome {
		self.metrics.record_call();

		loop {
			let role = {
				let mut phase = self.phase.lock();

				if let Phase::Refreshing { waiters } = &mut *phase {
					let (sender, receiver) = oneshot::channel();

					waiters.push(sender);

					Role::Waiter(receiver)
				} else {
					*phase = Phase::Refreshing { waiters: Vec::new() };

					Role::Leader
				}
			};

			match role {
				Role::Leader => return self.lead().await,
				Role::Waiter(receiver) => {
					self.metrics.record_joined();

					match receiver.await {
						Ok(outcome) => return outcome,
						Err(_) => {
							obs::debug!("refresh leader went away; re-entering the queue");
						},
					}
				},
			}
		}
	}

	/// Returns `true` while a refresh cycle is in flight.
	pub fn is_refreshing(&self) -> bool {
		matches!(*self.phase.lock(), Phase::Refreshing { .. })
	}

	/// Returns the refresh counters.
	pub fn metrics(&self) -> &RefreshMetrics {
		&self.metrics
	}

	async fn lead(&self) -> RefreshOutcome {
		let flight = Flight { phase: &self.phase, settled: false };
		let span = FlowSpan::new(FlowKind::Refresh, "refresh");
		let outcome = span.instrument(self.run()).await;

		match &outcome {
			Ok(true) => {
				self.metrics.record_success();
				obs::record_flow_outcome(FlowKind::Refresh, FlowOutcome::Success);
			},
			_ => {
				self.metrics.record_failure();
				obs::record_flow_outcome(FlowKind::Refresh, FlowOutcome::Failure);
			},
		}

		flight.settle(&outcome);

		outcome
	}

	async fn run(&self) -> RefreshOutcome {
		obs::record_flow_outcome(FlowKind::Refresh, FlowOutcome::Attempt);

		let Some(refresh_token) = self.credentials.refresh_token()? else {
			obs::info!("no refresh token stored; clearing credentials");

			self.credentials.clear_all(ClearMode::PreserveEmail)?;

			return Ok(false);
		};
		let mut attempt = 0;

		loop {
			attempt += 1;

			self.metrics.record_network_call();

			match self.exchange(&refresh_token).await {
				Attempt::Granted(grant) => {
					self.persist(&grant)?;

					obs::info!(attempt = attempt, "access token refreshed");

					return Ok(true);
				},
				Attempt::Transient(reason) if attempt < self.policy.max_attempts => {
					let delay = self.policy.backoff(attempt);

					obs::warn!(
						attempt = attempt,
						delay_ms = delay.whole_milliseconds() as u64,
						reason = reason.as_str(),
						"refresh attempt failed; backing off"
					);

					tokio::time::sleep(delay.unsigned_abs()).await;
				},
				Attempt::Transient(reason) =>
					return self.abandon(RefreshError::Exhausted { attempts: attempt, reason }),
				Attempt::Rejected { status, reason } =>
					return self.abandon(RefreshError::Rejected { status, reason }),
			}
		}
	}

	async fn exchange(&self, refresh_token: &TokenSecret) -> Attempt {
		let request = match self.build_request(refresh_token) {
			Ok(request) => request,
			Err(e) => return Attempt::Rejected { status: 0, reason: e.to_string() },
		};
		let response = match tokio::time::timeout(
			self.request_timeout.unsigned_abs(),
			self.transport.execute(request),
		)
		.await
		{
			Ok(Ok(response)) => response,
			Ok(Err(e)) => return Attempt::Transient(e.to_string()),
			Err(_) =>
				return Attempt::Transient(
					TransportError::Timeout { after: self.request_timeout }.to_string(),
				),
		};
		let status = response.status().as_u16();
		let body = ParsedBody::parse(http::content_type(&response), response.body());

		if (200..300).contains(&status) {
			return match body.as_json().and_then(AuthGrant::from_payload) {
				Some(grant) => Attempt::Granted(grant),
				None => Attempt::Rejected {
					status,
					reason: ResponseNormalizer::error_message(&body)
						.unwrap_or_else(|| "Refresh response carried no access token".into()),
				},
			};
		}

		let reason = ResponseNormalizer::error_message(&body)
			.unwrap_or_else(|| format!("Refresh failed with status {status}"));

		if status == 429 || status >= 500 {
			Attempt::Transient(reason)
		} else {
			Attempt::Rejected { status, reason }
		}
	}

	fn build_request(&self, refresh_token: &TokenSecret) -> Result<HttpRequest, ConfigError> {
		let body = serde_json::json!({ "refreshToken": refresh_token.raw() });

		Ok(::http::Request::builder()
			.method(::http::Method::POST)
			.uri(self.refresh_url.as_str())
			.header(::http::header::ACCEPT, "application/json")
			.header(::http::header::CONTENT_TYPE, "application/json")
			.body(body.to_string().into_bytes())?)
	}

	fn persist(&self, grant: &AuthGrant) -> Result<(), StoreError> {
		self.credentials.set_access_token(&grant.access_token)?;

		if let Some(refresh_token) = &grant.refresh_token {
			self.credentials.set_refresh_token(refresh_token)?;
		}

		match &grant.user_id {
			Some(user_id) => self.credentials.set_user_id(user_id)?,
			None => {
				obs::debug!("refreshed token carries no usable subject");
			},
		}

		self.credentials.set_authenticated(true)
	}

	fn abandon(&self, error: RefreshError) -> RefreshOutcome {
		obs::warn!(error = %error, "refresh failed; clearing credentials");

		self.credentials.clear_all(ClearMode::PreserveEmail)?;

		Err(error)
	}
}
impl<T> Debug for RefreshCoordinator<T>
where
	T: ?Sized + HttpTransport,
{
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("RefreshCoordinator")
			.field("refresh_url", &self.refresh_url.as_str())
			.field("refreshing", &self.is_refreshing())
			.field("metrics", &self.metrics)
			.finish()
	}
}

/// Leader-side handle that publishes the cycle outcome and resets the phase.
struct Flight<'a> {
	phase: &'a Mutex<Phase>,
	settled: bool,
}
impl Flight<'_> {
	fn settle(mut self, outcome: &RefreshOutcome) {
		let waiters = self.release();

		self.settled = true;

		for waiter in waiters {
			let _ = waiter.send(outcome.clone());
		}
	}

	fn release(&self) -> Vec<Waiter> {
		match std::mem::replace(&mut *self.phase.lock(), Phase::Idle) {
			Phase::Refreshing { waiters } => waiters,
			Phase::Idle => Vec::new(),
		}
	}
}
impl Drop for Flight<'_> {
	fn drop(&mut self) {
		if !self.settled {
			// Dropping the senders wakes every waiter with a receive error.
			drop(self.release());
		}
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
		store::{KeyValueStore, MemoryStore},
	};

	const REFRESH_PATH: &str = "/api/auth/refresh";

	fn coordinator(
		transport: &ScriptedTransport,
	) -> (Arc<RefreshCoordinator<ScriptedTransport>>, CredentialStore) {
		let backend: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::default());
		let credentials = CredentialStore::new(backend);
		let coordinator = RefreshCoordinator::new(
			Arc::new(transport.clone()),
			credentials.clone(),
			&test_config("http://broker.test"),
		)
		.expect("Coordinator should build from the test configuration.");

		(Arc::new(coordinator), credentials)
	}

	fn granted(subject: &str) -> ScriptedReply {
		let token = unsigned_token(subject, OffsetDateTime::now_utc() + Duration::hours(1));

		ScriptedReply::json(200, json!({ "accessToken": token, "refreshToken": "rotated" }))
	}

	#[tokio::test]
	async fn refresh_request_carries_the_refresh_token() {
		let transport = ScriptedTransport::default();
		let (coordinator, credentials) = coordinator(&transport);

		transport.route(REFRESH_PATH, [granted("u-7")]);
		credentials
			.set_refresh_token(&TokenSecret::new("r-original"))
			.expect("Seeding the refresh token should succeed.");

		assert_eq!(coordinator.refresh().await, Ok(true));

		let request = &transport.requests()[0];

		assert_eq!(request.method, ::http::Method::POST);
		assert_eq!(request.json(), json!({ "refreshToken": "r-original" }));
		assert_eq!(
			credentials.refresh_token().expect("Store read should succeed.").map(|t| t.expose().to_owned()),
			Some("rotated".into())
		);
		assert_eq!(credentials.user_id().expect("Store read should succeed."), Some("u-7".into()));
		assert!(!coordinator.is_refreshing());
	}

	#[tokio::test]
	async fn server_errors_are_retried_until_exhausted() {
		let transport = ScriptedTransport::default();
		let (coordinator, credentials) = coordinator(&transport);

		transport.route(REFRESH_PATH, [ScriptedReply::json(503, json!({ "error": "maintenance" }))]);
		credentials
			.set_refresh_token(&TokenSecret::new("r-1"))
			.expect("Seeding the refresh token should succeed.");

		let outcome = coordinator.refresh().await;

		assert_eq!(
			outcome,
			Err(RefreshError::Exhausted { attempts: 3, reason: "maintenance".into() })
		);
		assert_eq!(transport.hits(REFRESH_PATH), 3);
		assert_eq!(coordinator.metrics().network_calls(), 3);
		assert_eq!(credentials.refresh_token().expect("Store read should succeed."), None);
	}

	#[tokio::test(start_paused = true)]
	async fn dropped_leader_hands_the_cycle_to_a_waiter() {
		let transport = ScriptedTransport::default();
		let (coordinator, credentials) = coordinator(&transport);

		transport.route(
			REFRESH_PATH,
			[granted("u-slow").after(Duration::seconds(10)), granted("u-fast")],
		);
		credentials
			.set_refresh_token(&TokenSecret::new("r-1"))
			.expect("Seeding the refresh token should succeed.");

		let leader = tokio::spawn({
			let coordinator = coordinator.clone();

			async move { coordinator.refresh().await }
		});

		tokio::time::sleep(std::time::Duration::from_millis(5)).await;

		let waiter = tokio::spawn({
			let coordinator = coordinator.clone();

			async move { coordinator.refresh().await }
		});

		tokio::time::sleep(std::time::Duration::from_millis(5)).await;
		leader.abort();

		let outcome = waiter.await.expect("Waiter task should not panic.");

		assert_eq!(outcome, Ok(true));
		assert_eq!(transport.hits(REFRESH_PATH), 2);
		assert_eq!(credentials.user_id().expect("Store read should succeed."), Some("u-fast".into()));
		assert!(!coordinator.is_refreshing());
	}
}
