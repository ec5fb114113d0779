mod support;

// crates.io
use url::Url;
// self
use oauth2_token_cache::{
	auth::TokenSecret,
	engine::{AuthorizationCodeRequest, InteractiveTokenRequest, SilentTokenRequest, TokenSource},
	error::{ClientError, Error, ServiceError},
	ext::{AuthorizationOutcome, AuthorizationRequest, InteractiveAuthProvider, InteractiveFuture},
};
use support::*;

fn redirect_uri() -> Url {
	Url::parse("http://localhost:8400/callback").expect("Redirect fixture should parse.")
}

enum Behavior {
	EchoState,
	ForgeState,
	Deny,
}

struct FakeBrowser {
	behavior: Behavior,
	seen: parking_lot::Mutex<Option<Url>>,
}
impl FakeBrowser {
	fn new(behavior: Behavior) -> Self {
		Self { behavior, seen: Default::default() }
	}
}
impl InteractiveAuthProvider for FakeBrowser {
	fn authorize<'a>(&'a self, request: &'a AuthorizationRequest) -> InteractiveFuture<'a> {
		Box::pin(async move {
			*self.seen.lock() = Some(request.authorization_url());

			Ok(match self.behavior {
				Behavior::EchoState => AuthorizationOutcome::Code {
					code: TokenSecret::new("code-1"),
					state: Some(request.state.clone()),
				},
				Behavior::ForgeState => AuthorizationOutcome::Code {
					code: TokenSecret::new("code-1"),
					state: Some("forged".into()),
				},
				Behavior::Deny => AuthorizationOutcome::Error {
					error: "access_denied".into(),
					description: Some("The user declined.".into()),
				},
			})
		})
	}
}

#[tokio::test]
async fn redeemed_code_makes_account_silently_usable() {
	let http = ScriptedHttpClient::new();
	let engine = engine(config(COMMON_AUTHORITY).build().expect("Config should build."), &http);

	http.push_json(200, token_response("at-code", "r1/scope1"));

	let result = engine
		.acquire_token_by_authorization_code(
			AuthorizationCodeRequest::new("code-1", redirect_uri(), scopes("r1/scope1"))
				.with_code_verifier("verifier-1"),
		)
		.await
		.expect("Code should be redeemed.");
	let account = result.account.clone().expect("User token should carry an account.");

	assert_eq!(account.home_account_id, home_account_id());
	assert_eq!(result.tenant_id.as_ref(), UTID);

	let body = &http.requests()[0];

	assert!(body.contains("grant_type=authorization_code"));
	assert!(body.contains("code=code-1"));
	assert!(body.contains("code_verifier=verifier-1"));
	assert!(body.contains("redirect_uri=http%3A%2F%2Flocalhost%3A8400%2Fcallback"));

	assert_eq!(engine.accounts().await.expect("Enumeration should succeed."), vec![account.clone()]);

	let silent = engine
		.acquire_token_silent(SilentTokenRequest::new(scopes("r1/scope1"), account))
		.await
		.expect("Fresh token should be served silently.");

	assert_eq!(silent.source, TokenSource::Cache);
	assert_eq!(silent.access_token.expose(), "at-code");
	assert_eq!(http.calls(), 1);
}

#[tokio::test]
async fn interactive_flow_sends_pkce_and_checks_state() {
	let http = ScriptedHttpClient::new();
	let engine = engine(config(COMMON_AUTHORITY).build().expect("Config should build."), &http);
	let browser = FakeBrowser::new(Behavior::EchoState);

	http.push_json(200, token_response("at-interactive", "r1/scope1"));

	let result = engine
		.acquire_token_interactive(
			&browser,
			InteractiveTokenRequest::new(scopes("r1/scope1"), redirect_uri())
				.with_login_hint(USERNAME),
		)
		.await
		.expect("Interactive flow should succeed.");

	assert_eq!(result.access_token.expose(), "at-interactive");

	let url = browser.seen.lock().clone().expect("Browser should have been opened.");
	let query = url.query().unwrap_or_default();

	assert!(url.path().ends_with("/common/oauth2/v2.0/authorize"));
	assert!(query.contains("code_challenge_method=S256"));
	assert!(query.contains("login_hint=user%40contoso.com"));
	assert!(http.requests()[0].contains("code_verifier="));
}

#[tokio::test]
async fn forged_state_is_rejected_before_redemption() {
	let http = ScriptedHttpClient::new();
	let engine = engine(config(COMMON_AUTHORITY).build().expect("Config should build."), &http);
	let err = engine
		.acquire_token_interactive(
			&FakeBrowser::new(Behavior::ForgeState),
			InteractiveTokenRequest::new(scopes("r1/scope1"), redirect_uri()),
		)
		.await
		.expect_err("Forged state must fail.");

	assert!(matches!(err, Error::Client(ClientError::StateMismatch)));
	assert_eq!(http.calls(), 0);
}

#[tokio::test]
async fn denied_consent_surfaces_service_error() {
	let http = ScriptedHttpClient::new();
	let engine = engine(config(COMMON_AUTHORITY).build().expect("Config should build."), &http);
	let err = engine
		.acquire_token_interactive(
			&FakeBrowser::new(Behavior::Deny),
			InteractiveTokenRequest::new(scopes("r1/scope1"), redirect_uri()),
		)
		.await
		.expect_err("Denied consent must fail.");

	assert!(matches!(err, Error::Service(ServiceError { ref error, .. }) if error == "access_denied"));
	assert_eq!(http.calls(), 0);
}
