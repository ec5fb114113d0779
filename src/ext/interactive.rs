//! Interactive sign-in capability.
//!
//! Browsers, embedded web views, and brokers each implement [`InteractiveAuthProvider`]; the
//! engine only prepares the authorization request and redeems whatever code comes back.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};
// self
use crate::{
	_prelude::*,
	auth::{ClientId, ScopeSet, TokenSecret},
};

/// Boxed future returned by [`InteractiveAuthProvider::authorize`].
pub type InteractiveFuture<'a> =
	Pin<Box<dyn Future<Output = Result<AuthorizationOutcome>> + 'a + Send>>;

/// Platform hook that shows the sign-in UI and returns the authorization response.
pub trait InteractiveAuthProvider
where
	Self: Send + Sync,
{
	/// Navigates to [`AuthorizationRequest::authorization_url`] and waits for the redirect.
	fn authorize<'a>(&'a self, request: &'a AuthorizationRequest) -> InteractiveFuture<'a>;
}

/// What the sign-in UI produced.
#[derive(Clone, Debug)]
pub enum AuthorizationOutcome {
	/// The authority redirected back with a code.
	Code {
		/// Authorization code to redeem.
		code: TokenSecret,
		/// `state` echoed by the authority.
		state: Option<String>,
	},
	/// The authority (or the user) ended the flow with an OAuth error.
	Error {
		/// OAuth `error` code, e.g. `access_denied`.
		error: String,
		/// OAuth `error_description`, if any.
		description: Option<String>,
	},
}

/// Authorization request handed to an [`InteractiveAuthProvider`].
#[derive(Clone, Debug)]
pub struct AuthorizationRequest {
	/// Authorize endpoint of the authority.
	pub authorization_endpoint: Url,
	/// Application id.
	pub client_id: ClientId,
	/// Redirect URI the provider listens on.
	pub redirect_uri: Url,
	/// Requested scopes, reserved OIDC scopes included.
	pub scopes: ScopeSet,
	/// Optional username to pre-fill.
	pub login_hint: Option<String>,
	/// Anti-forgery value the authority must echo.
	pub state: String,
	pub(crate) code_verifier: TokenSecret,
}
impl AuthorizationRequest {
	const VERIFIER_BYTES: usize = 32;

	pub(crate) fn new(
		authorization_endpoint: Url,
		client_id: ClientId,
		redirect_uri: Url,
		scopes: ScopeSet,
		login_hint: Option<String>,
	) -> Self {
		let verifier = URL_SAFE_NO_PAD.encode(rand::random::<[u8; Self::VERIFIER_BYTES]>());
		let state = URL_SAFE_NO_PAD.encode(rand::random::<[u8; 16]>());

		Self {
			authorization_endpoint,
			client_id,
			redirect_uri,
			scopes,
			login_hint,
			state,
			code_verifier: TokenSecret::new(verifier),
		}
	}

	/// PKCE `S256` challenge derived from the request's verifier.
	pub fn code_challenge(&self) -> String {
		URL_SAFE_NO_PAD.encode(Sha256::digest(self.code_verifier.expose().as_bytes()))
	}

	/// Full URL the sign-in UI should open.
	pub fn authorization_url(&self) -> Url {
		let mut url = self.authorization_endpoint.clone();

		{
			let mut query = url.query_pairs_mut();

			query
				.append_pair("client_id", &self.client_id)
				.append_pair("response_type", "code")
				.append_pair("redirect_uri", self.redirect_uri.as_str())
				.append_pair("scope", &self.scopes.normalized())
				.append_pair("state", &self.state)
				.append_pair("code_challenge", &self.code_challenge())
				.append_pair("code_challenge_method", "S256");

			if let Some(hint) = &self.login_hint {
				query.append_pair("login_hint", hint);
			}
		}

		url
	}
}
