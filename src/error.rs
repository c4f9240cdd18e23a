//! Crate-level error types shared across the pipeline, refresh coordinator, and stores.

// self
use crate::_prelude::*;

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Transport failure (DNS, TCP, TLS, timeout).
	#[error(transparent)]
	Transport(#[from] TransportError),
	/// Shared refresh cycle failed.
	#[error(transparent)]
	Refresh(#[from] RefreshError),

	/// Credentials are missing or were rejected and cannot be recovered locally.
	#[error("Authentication is no longer valid: {reason}.")]
	AuthInvalid {
		/// Server- or client-supplied reason string.
		reason: String,
	},
	/// Server rejected the request for a non-authentication reason.
	#[error("Request was rejected with status {status}: {reason}.")]
	Rejected {
		/// HTTP status code.
		status: u16,
		/// Server-supplied reason string.
		reason: String,
	},
	/// Response body could not be mapped onto the expected payload.
	#[error("Response body is malformed: {reason}.")]
	MalformedResponse {
		/// Parser-supplied reason string.
		reason: String,
	},
}

/// Configuration and validation failures.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// HTTP request construction failed.
	#[error(transparent)]
	HttpRequest(#[from] ::http::Error),
	/// Configuration JSON could not be parsed.
	#[error("Configuration JSON is invalid.")]
	Parse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
	},
	/// Base URL cannot carry request paths.
	#[error("Base URL `{url}` cannot be used as a request base.")]
	InvalidBaseUrl {
		/// Offending URL.
		url: String,
	},
	/// Joined request URL failed to parse.
	#[error("Request URL is invalid.")]
	InvalidRequestUrl {
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Path prefix is malformed.
	#[error("The {field} value `{value}` must start with `/` and must not end with `/`.")]
	InvalidPrefix {
		/// Which configuration field failed validation.
		field: &'static str,
		/// Supplied value.
		value: String,
	},
	/// Header name is not a valid HTTP token.
	#[error("Header name `{name}` is invalid.")]
	InvalidHeaderName {
		/// Supplied header name.
		name: String,
	},
	/// Refresh attempts must allow at least one call.
	#[error("Refresh policy must allow at least one attempt.")]
	ZeroRefreshAttempts,
	/// Durations must be positive.
	#[error("The {field} duration must be positive.")]
	NonPositiveDuration {
		/// Which configuration field failed validation.
		field: &'static str,
	},
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Transport-level failures (network, IO, timeout). No response was received.
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the API.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// The call did not complete within the configured timeout.
	#[error("The API call timed out after {after}.")]
	Timeout {
		/// Timeout that elapsed.
		after: Duration,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling the API.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}

	/// Maps a reqwest failure, reporting timeouts against the client's configured `timeout`.
	///
	/// Without a known timeout the error stays a network failure carrying reqwest's own
	/// message.
	#[cfg(feature = "reqwest")]
	pub fn from_reqwest(e: ReqwestError, timeout: Option<Duration>) -> Self {
		match timeout {
			Some(after) if e.is_timeout() => Self::Timeout { after },
			_ => Self::network(e),
		}
	}
}

/// Outcome shared by every waiter of a failed refresh cycle.
///
/// The type is `Clone` so one settled refresh can be broadcast to all queued callers.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum RefreshError {
	/// The authentication service definitively rejected the refresh token.
	#[error("Refresh token was rejected with status {status}: {reason}.")]
	Rejected {
		/// HTTP status code.
		status: u16,
		/// Server-supplied reason string.
		reason: String,
	},
	/// Transient failures persisted through every allowed attempt.
	#[error("Refresh failed after {attempts} attempts: {reason}.")]
	Exhausted {
		/// Number of network attempts performed.
		attempts: u32,
		/// Last observed failure.
		reason: String,
	},
	/// Credential storage failed while reading or persisting tokens.
	#[error("Credential storage failed during refresh: {message}.")]
	Storage {
		/// Human-readable error payload.
		message: String,
	},
}
impl From<crate::store::StoreError> for RefreshError {
	fn from(e: crate::store::StoreError) -> Self {
		Self::Storage { message: e.to_string() }
	}
}
