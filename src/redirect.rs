//! Forced-login redirect decisions with loop detection.
//!
//! Corrupted client state can bounce a user between a protected view and the login page
//! indefinitely. [`RedirectLoopGuard`] persists a timestamp and a counter in the credential
//! store so bursts survive restarts; once a burst exceeds the configured threshold the
//! credentials are wiped and the caller is told to perform a full reload instead of a
//! client-side navigation.

// self
use crate::{
	_prelude::*,
	config::RedirectPolicy,
	obs,
	store::{ClearMode, CredentialKey, CredentialStore, StoreError},
};

/// How the host application should reach the login page.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RedirectMode {
	/// In-app navigation; in-memory state is kept.
	ClientSide,
	/// Full reload; discards in-memory state after a detected loop.
	FullReload,
}

/// Host hook invoked when authentication cannot be recovered.
pub trait Navigator
where
	Self: Send + Sync,
{
	/// Sends the user to the login page using `mode`.
	fn redirect_to_login(&self, mode: RedirectMode);
}

/// Navigator that ignores redirect requests (headless clients, services).
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopNavigator;
impl Navigator for NoopNavigator {
	fn redirect_to_login(&self, _: RedirectMode) {}
}

/// Persisted redirect counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RedirectLoopState {
	/// Instant of the most recent redirect in the current burst.
	pub last_redirect_at: Option<OffsetDateTime>,
	/// Redirects observed in the current burst.
	pub redirect_count: u32,
}

/// Detects rapid, repeated login redirects.
#[derive(Clone, Debug)]
pub struct RedirectLoopGuard {
	credentials: CredentialStore,
	policy: RedirectPolicy,
}
impl RedirectLoopGuard {
	/// Creates a guard over the shared credential store.
	pub fn new(credentials: CredentialStore, policy: RedirectPolicy) -> Self {
		Self { credentials, policy }
	}

	/// Records a redirect now; returns `true` if a loop was detected and broken.
	pub fn record_redirect_attempt(&self) -> Result<bool, StoreError> {
		self.record_redirect_attempt_at(OffsetDateTime::now_utc())
	}

	/// Records a redirect at `now`; returns `true` if a loop was detected and broken.
	///
	/// Breaking a loop clears the credentials (the last-used email survives) and resets the
	/// counters.
	pub fn record_redirect_attempt_at(&self, now: OffsetDateTime) -> Result<bool, StoreError> {
		let state = self.state()?;
		let in_burst = state.last_redirect_at.is_some_and(|last| {
			let elapsed = now - last;

			!elapsed.is_negative() && elapsed <= self.policy.window
		});
		let count = if in_burst { state.redirect_count.saturating_add(1) } else { 1 };

		if count > self.policy.threshold {
			obs::warn!(count = count, "login redirect loop detected; clearing credentials");

			self.credentials.clear_all(ClearMode::PreserveEmail)?;
			self.reset()?;

			return Ok(true);
		}

		self.credentials.set(CredentialKey::RedirectAt, &unix_millis(now).to_string())?;
		self.credentials.set(CredentialKey::RedirectCount, &count.to_string())?;

		Ok(false)
	}

	/// Clears the counters, e.g. after a successful login.
	pub fn reset(&self) -> Result<(), StoreError> {
		self.credentials.remove(CredentialKey::RedirectAt)?;
		self.credentials.remove(CredentialKey::RedirectCount)
	}

	/// Reads the persisted counters; unparsable values read as absent.
	pub fn state(&self) -> Result<RedirectLoopState, StoreError> {
		let last_redirect_at = self
			.credentials
			.get(CredentialKey::RedirectAt)?
			.and_then(|raw| raw.parse::<i64>().ok())
			.and_then(|millis| {
				OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000).ok()
			});
		let redirect_count = self
			.credentials
			.get(CredentialKey::RedirectCount)?
			.and_then(|raw| raw.parse().ok())
			.unwrap_or_default();

		Ok(RedirectLoopState { last_redirect_at, redirect_count })
	}
}

fn unix_millis(instant: OffsetDateTime) -> i64 {
	(instant.unix_timestamp_nanos() / 1_000_000) as i64
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;
	use crate::{
		auth::TokenSecret,
		store::{KeyValueStore, MemoryStore},
	};

	fn guard() -> (RedirectLoopGuard, CredentialStore) {
		let backend: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::default());
		let credentials = CredentialStore::new(backend);

		(RedirectLoopGuard::new(credentials.clone(), RedirectPolicy::default()), credentials)
	}

	fn seed(credentials: &CredentialStore) {
		credentials.set_access_token(&TokenSecret::new("a.b.c")).expect("Seeding should succeed.");
		credentials.set_authenticated(true).expect("Seeding should succeed.");
		credentials.set_last_email("someone@example.com").expect("Seeding should succeed.");
	}

	#[test]
	fn third_redirect_inside_the_window_breaks_the_loop() {
		let (guard, credentials) = guard();
		let start = macros::datetime!(2025-03-01 12:00 UTC);

		seed(&credentials);

		let outcomes = (0..5)
			.map(|i| {
				guard
					.record_redirect_attempt_at(start + Duration::milliseconds(300 * i))
					.expect("Recording a redirect should succeed.")
			})
			.collect::<Vec<_>>();

		assert_eq!(outcomes, [false, false, true, false, false]);
		assert_eq!(credentials.access_token().expect("Store read should succeed."), None);
		assert!(!credentials.is_authenticated().expect("Store read should succeed."));
		assert_eq!(
			credentials.last_email().expect("Store read should succeed."),
			Some("someone@example.com".into())
		);
		assert_eq!(guard.state().expect("State read should succeed.").redirect_count, 2);
	}

	#[test]
	fn spaced_redirects_never_trip_the_guard() {
		let (guard, credentials) = guard();
		let start = macros::datetime!(2025-03-01 12:00 UTC);

		seed(&credentials);

		for i in 0..6 {
			let tripped = guard
				.record_redirect_attempt_at(start + Duration::milliseconds(2_500 * i))
				.expect("Recording a redirect should succeed.");

			assert!(!tripped, "Redirect {i} should not be treated as a loop.");
		}

		assert!(credentials.is_authenticated().expect("Store read should succeed."));
	}

	#[test]
	fn reset_and_garbage_counters_start_a_new_burst() {
		let (guard, credentials) = guard();
		let start = macros::datetime!(2025-03-01 12:00 UTC);

		guard.record_redirect_attempt_at(start).expect("Recording a redirect should succeed.");
		guard.reset().expect("Reset should succeed.");

		assert_eq!(guard.state().expect("State read should succeed."), RedirectLoopState::default());

		credentials.set(CredentialKey::RedirectAt, "yesterday").expect("Raw write should succeed.");
		credentials.set(CredentialKey::RedirectCount, "many").expect("Raw write should succeed.");

		assert!(!guard.record_redirect_attempt_at(start).expect("Recording should succeed."));
		assert_eq!(guard.state().expect("State read should succeed.").redirect_count, 1);
	}
}
