//! Typed credential accessors layered over a [`KeyValueStore`].
//!
//! [`CredentialStore`] owns the key names and value encodings; it performs no validation
//! and no side effects beyond storage.

// self
use crate::{
	_prelude::*,
	auth::TokenSecret,
	store::{KeyValueStore, StoreError},
};

/// Storage keys used by the session core.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CredentialKey {
	/// Bearer-prefixed access token.
	AccessToken,
	/// Refresh token.
	RefreshToken,
	/// Authenticated user identifier.
	UserId,
	/// `"true"` while a session is established.
	Authenticated,
	/// Last email used to log in; survives a preserving clear.
	LastEmail,
	/// Unix milliseconds of the last forced login redirect.
	RedirectAt,
	/// Forced login redirects observed inside the current window.
	RedirectCount,
}
impl CredentialKey {
	/// Keys removed by [`CredentialStore::clear_all`].
	pub const AUTH: [CredentialKey; 4] = [
		CredentialKey::AccessToken,
		CredentialKey::RefreshToken,
		CredentialKey::UserId,
		CredentialKey::Authenticated,
	];

	/// Returns the storage key string.
	pub const fn as_str(self) -> &'static str {
		match self {
			CredentialKey::AccessToken => "auth_token",
			CredentialKey::RefreshToken => "refresh_token",
			CredentialKey::UserId => "user_id",
			CredentialKey::Authenticated => "is_authenticated",
			CredentialKey::LastEmail => "last_email",
			CredentialKey::RedirectAt => "auth_redirect_at",
			CredentialKey::RedirectCount => "auth_redirect_count",
		}
	}
}
impl Display for CredentialKey {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Controls which convenience fields survive [`CredentialStore::clear_all`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ClearMode {
	/// Keep the last-used email so the login form can be prefilled.
	#[default]
	PreserveEmail,
	/// Remove the last-used email as well.
	Everything,
}

/// Point-in-time view of the stored credential fields.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Credential {
	/// Access token, bearer-prefixed when written by this crate.
	pub access_token: Option<TokenSecret>,
	/// Refresh token.
	pub refresh_token: Option<TokenSecret>,
	/// Authenticated user identifier.
	pub user_id: Option<String>,
	/// Authenticated flag.
	pub authenticated: bool,
}
impl Credential {
	/// Returns `false` when the session claims to be authenticated without an access token.
	pub fn is_consistent(&self) -> bool {
		!self.authenticated || self.access_token.is_some()
	}
}

/// Typed accessor over the shared credential keys.
#[derive(Clone)]
pub struct CredentialStore {
	backend: Arc<dyn KeyValueStore>,
}
impl CredentialStore {
	/// Wraps a key-value backend.
	pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
		Self { backend }
	}

	/// Reads a raw value. Empty strings and the literals `null`/`undefined` read as absent.
	pub fn get(&self, key: CredentialKey) -> Result<Option<String>, StoreError> {
		Ok(self.backend.get(key.as_str())?.filter(|value| !is_blank(value)))
	}

	/// Writes a raw value.
	pub fn set(&self, key: CredentialKey, value: &str) -> Result<(), StoreError> {
		self.backend.set(key.as_str(), value)
	}

	/// Removes a raw value.
	pub fn remove(&self, key: CredentialKey) -> Result<(), StoreError> {
		self.backend.remove(key.as_str())
	}

	/// Removes every auth-related key, optionally keeping the last-used email.
	pub fn clear_all(&self, mode: ClearMode) -> Result<(), StoreError> {
		for key in CredentialKey::AUTH {
			self.remove(key)?;
		}

		if mode == ClearMode::Everything {
			self.remove(CredentialKey::LastEmail)?;
		}

		Ok(())
	}

	/// Returns the stored access token exactly as persisted.
	pub fn access_token(&self) -> Result<Option<TokenSecret>, StoreError> {
		Ok(self.get(CredentialKey::AccessToken)?.map(TokenSecret::new))
	}

	/// Persists the access token in its bearer-prefixed form.
	pub fn set_access_token(&self, token: &TokenSecret) -> Result<(), StoreError> {
		self.set(CredentialKey::AccessToken, &token.to_bearer())
	}

	/// Returns the stored refresh token.
	pub fn refresh_token(&self) -> Result<Option<TokenSecret>, StoreError> {
		Ok(self.get(CredentialKey::RefreshToken)?.map(TokenSecret::new))
	}

	/// Persists the refresh token.
	pub fn set_refresh_token(&self, token: &TokenSecret) -> Result<(), StoreError> {
		self.set(CredentialKey::RefreshToken, token.expose())
	}

	/// Returns the stored user identifier.
	pub fn user_id(&self) -> Result<Option<String>, StoreError> {
		self.get(CredentialKey::UserId)
	}

	/// Persists the user identifier.
	pub fn set_user_id(&self, user_id: &str) -> Result<(), StoreError> {
		self.set(CredentialKey::UserId, user_id)
	}

	/// Returns the authenticated flag.
	pub fn is_authenticated(&self) -> Result<bool, StoreError> {
		Ok(self.get(CredentialKey::Authenticated)?.is_some_and(|value| value == "true"))
	}

	/// Persists the authenticated flag.
	pub fn set_authenticated(&self, authenticated: bool) -> Result<(), StoreError> {
		if authenticated {
			self.set(CredentialKey::Authenticated, "true")
		} else {
			self.remove(CredentialKey::Authenticated)
		}
	}

	/// Returns the last email used to log in.
	pub fn last_email(&self) -> Result<Option<String>, StoreError> {
		self.get(CredentialKey::LastEmail)
	}

	/// Persists the last email used to log in.
	pub fn set_last_email(&self, email: &str) -> Result<(), StoreError> {
		self.set(CredentialKey::LastEmail, email)
	}

	/// Reads every credential field at once.
	pub fn snapshot(&self) -> Result<Credential, StoreError> {
		Ok(Credential {
			access_token: self.access_token()?,
			refresh_token: self.refresh_token()?,
			user_id: self.user_id()?,
			authenticated: self.is_authenticated()?,
		})
	}
}
impl Debug for CredentialStore {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("CredentialStore(..)")
	}
}

fn is_blank(value: &str) -> bool {
	let trimmed = value.trim();

	trimmed.is_empty() || trimmed == "null" || trimmed == "undefined"
}
