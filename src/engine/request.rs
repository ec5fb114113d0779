//! Request types accepted by [`TokenEngine`](crate::engine::TokenEngine).

// self
use crate::{
	_prelude::*,
	auth::{AccountIdentity, ScopeSet, TokenSecret},
	authority::Authority,
};

/// Account a silent request acts for.
#[derive(Clone, Debug)]
pub enum SilentAccount {
	/// A cached account, usually obtained from [`TokenEngine::accounts`](crate::engine::TokenEngine::accounts).
	Account(AccountIdentity),
	/// Username that must match exactly one cached account.
	LoginHint(String),
}

/// Silent acquisition request.
#[derive(Clone, Debug)]
pub struct SilentTokenRequest {
	/// Requested scopes; reserved OIDC scopes are added on the wire and ignored for matching.
	pub scopes: ScopeSet,
	/// Account to act for.
	pub account: SilentAccount,
	/// Authority override; the configured authority is used when `None`.
	pub authority: Option<Authority>,
	/// Skips the access-token lookup and always redeems the refresh token.
	pub force_refresh: bool,
	/// Caller cancellation, honored until the authority answers.
	pub cancellation: CancellationToken,
}
impl SilentTokenRequest {
	/// Creates a request for a known account.
	pub fn new(scopes: ScopeSet, account: AccountIdentity) -> Self {
		Self::for_account(scopes, SilentAccount::Account(account))
	}

	/// Creates a request resolved through a login hint.
	pub fn with_login_hint(scopes: ScopeSet, login_hint: impl Into<String>) -> Self {
		Self::for_account(scopes, SilentAccount::LoginHint(login_hint.into()))
	}

	fn for_account(scopes: ScopeSet, account: SilentAccount) -> Self {
		Self {
			scopes,
			account,
			authority: None,
			force_refresh: false,
			cancellation: CancellationToken::new(),
		}
	}

	/// Overrides the authority.
	pub fn with_authority(mut self, authority: Authority) -> Self {
		self.authority = Some(authority);

		self
	}

	/// Forces the engine to bypass the access-token cache.
	pub fn force_refresh(mut self) -> Self {
		self.force_refresh = true;

		self
	}

	/// Overrides the force flag.
	pub fn with_force(mut self, force: bool) -> Self {
		self.force_refresh = force;

		self
	}

	/// Attaches a cancellation token.
	pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
		self.cancellation = cancellation;

		self
	}
}

/// App-only acquisition request.
#[derive(Clone, Debug)]
pub struct ClientCredentialsRequest {
	/// Requested scopes, typically `{resource}/.default`.
	pub scopes: ScopeSet,
	/// Authority override; must name a concrete tenant.
	pub authority: Option<Authority>,
	/// Skips the cache lookup.
	pub force_refresh: bool,
	/// Caller cancellation.
	pub cancellation: CancellationToken,
}
impl ClientCredentialsRequest {
	/// Creates a request for `scopes`.
	pub fn new(scopes: ScopeSet) -> Self {
		Self {
			scopes,
			authority: None,
			force_refresh: false,
			cancellation: CancellationToken::new(),
		}
	}

	/// Overrides the authority.
	pub fn with_authority(mut self, authority: Authority) -> Self {
		self.authority = Some(authority);

		self
	}

	/// Forces a network call.
	pub fn force_refresh(mut self) -> Self {
		self.force_refresh = true;

		self
	}

	/// Attaches a cancellation token.
	pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
		self.cancellation = cancellation;

		self
	}
}

/// Redemption of an authorization code obtained out of band.
#[derive(Clone, Debug)]
pub struct AuthorizationCodeRequest {
	/// Code returned to the redirect URI.
	pub code: TokenSecret,
	/// Redirect URI the code was issued for.
	pub redirect_uri: Url,
	/// Scopes requested during authorization.
	pub scopes: ScopeSet,
	/// PKCE verifier, when the authorization request carried a challenge.
	pub code_verifier: Option<TokenSecret>,
	/// Authority override.
	pub authority: Option<Authority>,
	/// Caller cancellation.
	pub cancellation: CancellationToken,
}
impl AuthorizationCodeRequest {
	/// Creates a redemption request.
	pub fn new(code: impl Into<String>, redirect_uri: Url, scopes: ScopeSet) -> Self {
		Self {
			code: TokenSecret::new(code),
			redirect_uri,
			scopes,
			code_verifier: None,
			authority: None,
			cancellation: CancellationToken::new(),
		}
	}

	/// Attaches the PKCE verifier.
	pub fn with_code_verifier(mut self, verifier: impl Into<String>) -> Self {
		self.code_verifier = Some(TokenSecret::new(verifier));

		self
	}

	/// Overrides the authority.
	pub fn with_authority(mut self, authority: Authority) -> Self {
		self.authority = Some(authority);

		self
	}

	/// Attaches a cancellation token.
	pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
		self.cancellation = cancellation;

		self
	}
}

/// Interactive acquisition through an
/// [`InteractiveAuthProvider`](crate::ext::InteractiveAuthProvider).
#[derive(Clone, Debug)]
pub struct InteractiveTokenRequest {
	/// Requested scopes.
	pub scopes: ScopeSet,
	/// Redirect URI the provider listens on.
	pub redirect_uri: Url,
	/// Username to pre-fill.
	pub login_hint: Option<String>,
	/// Authority override.
	pub authority: Option<Authority>,
	/// Caller cancellation, honored while the UI is open and until the authority answers.
	pub cancellation: CancellationToken,
}
impl InteractiveTokenRequest {
	/// Creates a request for `scopes`.
	pub fn new(scopes: ScopeSet, redirect_uri: Url) -> Self {
		Self {
			scopes,
			redirect_uri,
			login_hint: None,
			authority: None,
			cancellation: CancellationToken::new(),
		}
	}

	/// Pre-fills the username.
	pub fn with_login_hint(mut self, login_hint: impl Into<String>) -> Self {
		self.login_hint = Some(login_hint.into());

		self
	}

	/// Overrides the authority.
	pub fn with_authority(mut self, authority: Authority) -> Self {
		self.authority = Some(authority);

		self
	}

	/// Attaches a cancellation token.
	pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
		self.cancellation = cancellation;

		self
	}
}

pub(crate) fn ensure_scopes(scopes: &ScopeSet) -> Result<ScopeSet> {
	let user_scopes = scopes.without_reserved();

	if user_scopes.is_empty() {
		return Err(Error::invalid_argument("scopes", "at least one non-reserved scope is required"));
	}

	Ok(user_scopes)
}
