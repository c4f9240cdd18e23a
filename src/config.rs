//! Client configuration: API layout, timeouts, and retry/loop policies.
//!
//! [`ClientConfig`] is assembled through [`ClientConfigBuilder`] (or parsed from JSON with
//! [`ClientConfig::from_json`]) and validated before any component consumes it.

// crates.io
use ::http::HeaderName;
// self
use crate::{_prelude::*, error::ConfigError};

/// Backoff policy for transport failures during a refresh cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshPolicy {
	/// Maximum refresh network calls per cycle, including the first.
	pub max_attempts: u32,
	/// Delay before the second attempt; doubled for each further attempt.
	pub base_delay: Duration,
	/// Upper bound for a single backoff delay.
	pub max_delay: Duration,
}
impl RefreshPolicy {
	/// Returns the delay to wait after `attempt` (1-based) failed.
	pub fn backoff(&self, attempt: u32) -> Duration {
		let factor = 2_i32.saturating_pow(attempt.saturating_sub(1).min(16));

		self.base_delay.saturating_mul(factor).min(self.max_delay)
	}
}
impl Default for RefreshPolicy {
	fn default() -> Self {
		Self {
			max_attempts: 3,
			base_delay: Duration::milliseconds(500),
			max_delay: Duration::seconds(4),
		}
	}
}

/// Thresholds used to detect forced-redirect loops.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedirectPolicy {
	/// A loop is declared once more than this many redirects fall inside `window`.
	pub threshold: u32,
	/// Maximum gap between consecutive redirects that still counts as the same burst.
	pub window: Duration,
}
impl Default for RedirectPolicy {
	fn default() -> Self {
		Self { threshold: 2, window: Duration::seconds(2) }
	}
}

/// Validated client configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ClientConfigBuilder", into = "ClientConfigBuilder")]
pub struct ClientConfig {
	/// Origin (and optional base path) every request is sent to.
	pub base_url: Url,
	/// Full versioned prefix for resource endpoints (`/api/v1`).
	pub api_prefix: String,
	/// Shorter prefix for authentication endpoints (`/api`).
	pub auth_prefix: String,
	/// First path segment identifying authentication endpoints (`/auth`).
	pub auth_segment: String,
	/// Login endpoint, relative to the auth prefix.
	pub login_path: String,
	/// Refresh endpoint, relative to the auth prefix.
	pub refresh_path: String,
	/// Logout endpoint, relative to the auth prefix.
	pub logout_path: String,
	/// Header carrying the authenticated user identifier.
	pub user_id_header: String,
	/// Timeout applied to every network call.
	pub request_timeout: Duration,
	/// Tokens expiring within this window are refreshed before dispatch.
	pub expiry_skew: Duration,
	/// Refresh backoff policy.
	pub refresh: RefreshPolicy,
	/// Redirect loop policy.
	pub redirect: RedirectPolicy,
}
impl ClientConfig {
	/// Creates a new builder for the provided base URL.
	pub fn builder(base_url: Url) -> ClientConfigBuilder {
		ClientConfigBuilder::new(base_url)
	}

	/// Parses and validates a JSON configuration document.
	pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
		let mut de = serde_json::Deserializer::from_str(raw);
		let builder: ClientConfigBuilder = serde_path_to_error::deserialize(&mut de)
			.map_err(|source| ConfigError::Parse { source })?;

		builder.build()
	}

	/// Returns the validated user-id header name.
	pub fn user_id_header_name(&self) -> HeaderName {
		HeaderName::from_bytes(self.user_id_header.as_bytes())
			.unwrap_or_else(|_| HeaderName::from_static(DEFAULT_USER_ID_HEADER))
	}

	fn validate(&self) -> Result<(), ConfigError> {
		if self.base_url.cannot_be_a_base() || !matches!(self.base_url.scheme(), "http" | "https") {
			return Err(ConfigError::InvalidBaseUrl { url: self.base_url.to_string() });
		}

		validate_prefix("api_prefix", &self.api_prefix)?;
		validate_prefix("auth_prefix", &self.auth_prefix)?;
		validate_prefix("auth_segment", &self.auth_segment)?;
		validate_prefix("login_path", &self.login_path)?;
		validate_prefix("refresh_path", &self.refresh_path)?;
		validate_prefix("logout_path", &self.logout_path)?;

		if HeaderName::from_bytes(self.user_id_header.as_bytes()).is_err() {
			return Err(ConfigError::InvalidHeaderName { name: self.user_id_header.clone() });
		}
		if self.refresh.max_attempts == 0 {
			return Err(ConfigError::ZeroRefreshAttempts);
		}

		validate_positive("request_timeout", self.request_timeout)?;
		validate_positive("refresh.base_delay", self.refresh.base_delay)?;
		validate_positive("refresh.max_delay", self.refresh.max_delay)?;
		validate_positive("redirect.window", self.redirect.window)?;

		if self.expiry_skew.is_negative() {
			return Err(ConfigError::NonPositiveDuration { field: "expiry_skew" });
		}

		Ok(())
	}
}
impl TryFrom<ClientConfigBuilder> for ClientConfig {
	type Error = ConfigError;

	fn try_from(builder: ClientConfigBuilder) -> Result<Self, Self::Error> {
		builder.build()
	}
}

const DEFAULT_USER_ID_HEADER: &str = "x-user-id";

/// Builder for [`ClientConfig`] values. Unset fields take the platform defaults.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientConfigBuilder {
	/// Origin every request is sent to.
	pub base_url: Url,
	/// Resource prefix.
	#[serde(default = "defaults::api_prefix")]
	pub api_prefix: String,
	/// Authentication prefix.
	#[serde(default = "defaults::auth_prefix")]
	pub auth_prefix: String,
	/// Authentication segment.
	#[serde(default = "defaults::auth_segment")]
	pub auth_segment: String,
	/// Login endpoint.
	#[serde(default = "defaults::login_path")]
	pub login_path: String,
	/// Refresh endpoint.
	#[serde(default = "defaults::refresh_path")]
	pub refresh_path: String,
	/// Logout endpoint.
	#[serde(default = "defaults::logout_path")]
	pub logout_path: String,
	/// User-id header name.
	#[serde(default = "defaults::user_id_header")]
	pub user_id_header: String,
	/// Per-call timeout.
	#[serde(default = "defaults::request_timeout")]
	pub request_timeout: Duration,
	/// Proactive refresh window.
	#[serde(default = "defaults::expiry_skew")]
	pub expiry_skew: Duration,
	/// Refresh backoff policy.
	#[serde(default)]
	pub refresh: RefreshPolicy,
	/// Redirect loop policy.
	#[serde(default)]
	pub redirect: RedirectPolicy,
}
impl ClientConfigBuilder {
	/// Creates a new builder seeded with the defaults.
	pub fn new(base_url: Url) -> Self {
		Self {
			base_url,
			api_prefix: defaults::api_prefix(),
			auth_prefix: defaults::auth_prefix(),
			auth_segment: defaults::auth_segment(),
			login_path: defaults::login_path(),
			refresh_path: defaults::refresh_path(),
			logout_path: defaults::logout_path(),
			user_id_header: defaults::user_id_header(),
			request_timeout: defaults::request_timeout(),
			expiry_skew: defaults::expiry_skew(),
			refresh: RefreshPolicy::default(),
			redirect: RedirectPolicy::default(),
		}
	}

	/// Overrides the resource prefix.
	pub fn api_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.api_prefix = prefix.into();

		self
	}

	/// Overrides the authentication prefix.
	pub fn auth_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.auth_prefix = prefix.into();

		self
	}

	/// Overrides the user-id header name.
	pub fn user_id_header(mut self, name: impl Into<String>) -> Self {
		self.user_id_header = name.into();

		self
	}

	/// Overrides the per-call timeout.
	pub fn request_timeout(mut self, timeout: Duration) -> Self {
		self.request_timeout = timeout;

		self
	}

	/// Overrides the proactive refresh window; zero only refreshes tokens that already expired.
	pub fn expiry_skew(mut self, skew: Duration) -> Self {
		self.expiry_skew = skew;

		self
	}

	/// Overrides the refresh backoff policy.
	pub fn refresh_policy(mut self, policy: RefreshPolicy) -> Self {
		self.refresh = policy;

		self
	}

	/// Overrides the redirect loop policy.
	pub fn redirect_policy(mut self, policy: RedirectPolicy) -> Self {
		self.redirect = policy;

		self
	}

	/// Consumes the builder and validates the resulting configuration.
	pub fn build(self) -> Result<ClientConfig, ConfigError> {
		let config = ClientConfig {
			base_url: self.base_url,
			api_prefix: self.api_prefix,
			auth_prefix: self.auth_prefix,
			auth_segment: self.auth_segment,
			login_path: self.login_path,
			refresh_path: self.refresh_path,
			logout_path: self.logout_path,
			user_id_header: self.user_id_header.to_ascii_lowercase(),
			request_timeout: self.request_timeout,
			expiry_skew: self.expiry_skew,
			refresh: self.refresh,
			redirect: self.redirect,
		};

		config.validate()?;

		Ok(config)
	}
}
impl From<ClientConfig> for ClientConfigBuilder {
	fn from(config: ClientConfig) -> Self {
		Self {
			base_url: config.base_url,
			api_prefix: config.api_prefix,
			auth_prefix: config.auth_prefix,
			auth_segment: config.auth_segment,
			login_path: config.login_path,
			refresh_path: config.refresh_path,
			logout_path: config.logout_path,
			user_id_header: config.user_id_header,
			request_timeout: config.request_timeout,
			expiry_skew: config.expiry_skew,
			refresh: config.refresh,
			redirect: config.redirect,
		}
	}
}

mod defaults {
	use super::*;

	pub(super) fn api_prefix() -> String {
		"/api/v1".into()
	}

	pub(super) fn auth_prefix() -> String {
		"/api".into()
	}

	pub(super) fn auth_segment() -> String {
		"/auth".into()
	}

	pub(super) fn login_path() -> String {
		"/auth/login".into()
	}

	pub(super) fn refresh_path() -> String {
		"/auth/refresh".into()
	}

	pub(super) fn logout_path() -> String {
		"/auth/logout".into()
	}

	pub(super) fn user_id_header() -> String {
		DEFAULT_USER_ID_HEADER.into()
	}

	pub(super) fn request_timeout() -> Duration {
		Duration::seconds(30)
	}

	pub(super) fn expiry_skew() -> Duration {
		Duration::seconds(30)
	}
}

fn validate_prefix(field: &'static str, value: &str) -> Result<(), ConfigError> {
	if value.starts_with('/') && !value.ends_with('/') && !value.contains(['?', '#']) {
		Ok(())
	} else {
		Err(ConfigError::InvalidPrefix { field, value: value.to_owned() })
	}
}

fn validate_positive(field: &'static str, value: Duration) -> Result<(), ConfigError> {
	if value.is_positive() { Ok(()) } else { Err(ConfigError::NonPositiveDuration { field }) }
}
