//! Endpoint normalization onto the canonical API prefixes.

// self
use crate::{_prelude::*, config::ClientConfig, error::ConfigError};

/// Rewrites caller-supplied endpoints onto the API layout and resolves them against the base
/// URL.
///
/// Normalization is idempotent: a path that already carries a known prefix is returned
/// unchanged, so feeding the output back in is a no-op.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointResolver {
	base_url: Url,
	api_prefix: String,
	auth_prefix: String,
	auth_segment: String,
}
impl EndpointResolver {
	/// Captures the prefixes and base URL from a validated configuration.
	pub fn new(config: &ClientConfig) -> Self {
		Self {
			base_url: config.base_url.clone(),
			api_prefix: config.api_prefix.clone(),
			auth_prefix: config.auth_prefix.clone(),
			auth_segment: config.auth_segment.clone(),
		}
	}

	/// Returns the canonical path for `endpoint`.
	///
	/// - Absolute `http(s)://` URLs pass through untouched.
	/// - Fully prefixed paths pass through: the versioned prefix, or the auth prefix followed
	///   by the auth segment.
	/// - Paths starting with the auth segment receive the auth prefix.
	/// - Everything else receives the versioned prefix.
	pub fn normalize(&self, endpoint: &str) -> String {
		let endpoint = endpoint.trim();

		if is_absolute(endpoint) {
			return endpoint.to_owned();
		}

		let path = format!("/{}", endpoint.trim_start_matches('/'));

		if starts_with_segment(&path, &self.api_prefix) || self.is_prefixed_auth_path(&path) {
			path
		} else if starts_with_segment(&path, &self.auth_segment) {
			format!("{}{path}", self.auth_prefix)
		} else if path == "/" {
			self.api_prefix.clone()
		} else {
			format!("{}{path}", self.api_prefix)
		}
	}

	/// Returns `true` if the endpoint targets the authentication service.
	///
	/// Responses from these paths never trigger a refresh or a login redirect.
	pub fn is_auth_path(&self, endpoint: &str) -> bool {
		let normalized = self.normalize(endpoint);
		let path = if is_absolute(&normalized) {
			Url::parse(&normalized).map(|url| url.path().to_owned()).unwrap_or(normalized)
		} else {
			normalized
		};

		self.is_prefixed_auth_path(&path)
			|| path
				.strip_prefix(self.api_prefix.as_str())
				.is_some_and(|rest| starts_with_segment(rest, &self.auth_segment))
	}

	/// Normalizes `endpoint` and joins it onto the base URL.
	pub fn resolve(&self, endpoint: &str) -> Result<Url, ConfigError> {
		let normalized = self.normalize(endpoint);
		let raw = if is_absolute(&normalized) {
			normalized
		} else {
			format!("{}{normalized}", self.base_url.as_str().trim_end_matches('/'))
		};

		Url::parse(&raw).map_err(|source| ConfigError::InvalidRequestUrl { source })
	}

	fn is_prefixed_auth_path(&self, path: &str) -> bool {
		path.strip_prefix(self.auth_prefix.as_str())
			.is_some_and(|rest| starts_with_segment(rest, &self.auth_segment))
	}
}

fn is_absolute(endpoint: &str) -> bool {
	let lower = endpoint.get(..8).unwrap_or(endpoint).to_ascii_lowercase();

	lower.starts_with("http://") || lower.starts_with("https://")
}

/// `prefix` matches at a path-segment boundary (`/api` matches `/api/x` but not `/apix`).
fn starts_with_segment(path: &str, prefix: &str) -> bool {
	path.strip_prefix(prefix)
		.is_some_and(|rest| rest.is_empty() || rest.starts_with(['/', '?', '#']))
}
