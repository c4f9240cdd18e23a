//! Canonical response record returned by every pipeline call.

// self
use crate::_prelude::*;

/// Failure classes a caller may want to branch on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailureKind {
	/// No response was received (status 0).
	Transport,
	/// Authentication could not be recovered (401).
	AuthInvalid,
	/// Any other 4xx; passed through for domain-specific handling.
	Validation,
	/// 5xx or unexpected statuses.
	Server,
	/// 2xx carrying an explicit error discriminator.
	Envelope,
}

/// Failure surfaced by [`NormalizedResponse::into_result`].
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
#[error("Request failed with status {status}: {message}.")]
pub struct ApiFailure {
	/// HTTP status (0 when no response was received).
	pub status: u16,
	/// Failure class.
	pub kind: FailureKind,
	/// Server- or client-supplied message.
	pub message: String,
}

/// Canonical result of one logical request.
///
/// `ok()` is `true` exactly when no error is set, and `data` is only ever populated on
/// success. Both invariants hold by construction.
#[derive(Clone, Debug, PartialEq)]
pub struct NormalizedResponse<T = Value> {
	status: u16,
	data: Option<T>,
	error: Option<String>,
	dropped_entries: usize,
}
impl<T> NormalizedResponse<T> {
	/// Builds a successful response; `data` is `None` when no known envelope matched.
	pub fn success(status: u16, data: Option<T>) -> Self {
		Self { status, data, error: None, dropped_entries: 0 }
	}

	/// Builds a failed response.
	pub fn failure(status: u16, error: impl Into<String>) -> Self {
		Self { status, data: None, error: Some(error.into()), dropped_entries: 0 }
	}

	/// Records how many degenerate list entries were filtered out.
	pub fn with_dropped_entries(mut self, dropped: usize) -> Self {
		self.dropped_entries = dropped;

		self
	}

	/// HTTP status code, or 0 when no response was received.
	pub fn status(&self) -> u16 {
		self.status
	}

	/// Returns `true` if the request succeeded.
	pub fn ok(&self) -> bool {
		self.error.is_none()
	}

	/// Payload, when the request succeeded and a payload was located.
	pub fn data(&self) -> Option<&T> {
		self.data.as_ref()
	}

	/// Consumes the response and returns the payload.
	pub fn into_data(self) -> Option<T> {
		self.data
	}

	/// Error message for failed requests.
	pub fn error(&self) -> Option<&str> {
		self.error.as_deref()
	}

	/// Number of malformed list entries dropped during normalization.
	pub fn dropped_entries(&self) -> usize {
		self.dropped_entries
	}

	/// Classifies a failed response; `None` on success.
	pub fn failure_kind(&self) -> Option<FailureKind> {
		self.error.as_ref()?;

		Some(match self.status {
			0 => FailureKind::Transport,
			401 => FailureKind::AuthInvalid,
			200..=299 => FailureKind::Envelope,
			400..=499 => FailureKind::Validation,
			_ => FailureKind::Server,
		})
	}

	/// Maps the payload while preserving status and error state.
	pub fn map<U>(self, f: impl FnOnce(T) -> U) -> NormalizedResponse<U> {
		NormalizedResponse {
			status: self.status,
			data: self.data.map(f),
			error: self.error,
			dropped_entries: self.dropped_entries,
		}
	}

	/// Replaces the payload while preserving status and error state.
	pub(crate) fn with_data<U>(self, data: Option<U>) -> NormalizedResponse<U> {
		NormalizedResponse {
			status: self.status,
			data: if self.error.is_none() { data } else { None },
			error: self.error,
			dropped_entries: self.dropped_entries,
		}
	}

	/// Converts into a `Result` for callers that prefer `?`.
	pub fn into_result(self) -> Result<Option<T>, ApiFailure> {
		match self.failure_kind() {
			None => Ok(self.data),
			Some(kind) => Err(ApiFailure {
				status: self.status,
				kind,
				message: self.error.unwrap_or_default(),
			}),
		}
	}
}
