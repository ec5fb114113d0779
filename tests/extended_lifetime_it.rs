mod support;

// std
use std::io::ErrorKind;
// crates.io
use time::Duration;
// self
use oauth2_token_cache::{
	auth::AccountIdentity,
	engine::{SilentTokenRequest, TokenSource},
	error::{Error, TransientError},
};
use support::*;

/// Token whose hard expiry passed an hour ago but whose extension runs for another hour.
fn seed_expired_but_extended(engine: &TestEngine) -> AccountIdentity {
	let account = seed_account(engine.store());

	seed_refresh_token(engine.store(), "rt-1");
	engine
		.store()
		.save_access_token(user_access_token(
			"r1/scope1",
			"at-stale",
			Duration::hours(2),
			Duration::hours(1),
			Some(Duration::hours(3)),
		))
		.expect("Access token should save.");

	account
}

fn gateway_timeout(http: &ScriptedHttpClient) {
	http.push_text(504, "<html>Gateway Timeout</html>");
}

#[tokio::test]
async fn outage_serves_stale_token_when_extension_enabled() {
	let http = ScriptedHttpClient::new();
	let engine = engine(
		config(COMMON_AUTHORITY)
			.extended_lifetime_enabled(true)
			.build()
			.expect("Config should build."),
		&http,
	);
	let account = seed_expired_but_extended(&engine);

	gateway_timeout(&http);
	gateway_timeout(&http);

	let result = engine
		.acquire_token_silent(SilentTokenRequest::new(scopes("r1/scope1"), account))
		.await
		.expect("Stale token should be served during the outage.");

	assert_eq!(result.access_token.expose(), "at-stale");
	assert_eq!(result.source, TokenSource::StaleCache);
	// One attempt plus one retry.
	assert_eq!(http.calls(), 2);
	assert_eq!(engine.metrics().stale_fallbacks(), 1);

	let cached = engine.store().get_all_access_tokens(|_| true).expect("Store read should succeed.");

	assert_eq!(cached.len(), 1);
	assert_eq!(cached[0].secret.expose(), "at-stale");
}

#[tokio::test]
async fn outage_propagates_when_extension_disabled() {
	let http = ScriptedHttpClient::new();
	let engine = engine(config(COMMON_AUTHORITY).build().expect("Config should build."), &http);
	let account = seed_expired_but_extended(&engine);

	gateway_timeout(&http);
	gateway_timeout(&http);

	let err = engine
		.acquire_token_silent(SilentTokenRequest::new(scopes("r1/scope1"), account))
		.await
		.expect_err("Outage must surface without the extension.");

	assert!(matches!(
		err,
		Error::Transient(TransientError::ServiceUnavailable { status: Some(504), .. })
	));
	assert_eq!(engine.metrics().stale_fallbacks(), 0);
}

#[tokio::test]
async fn outage_propagates_once_extension_lapsed() {
	let http = ScriptedHttpClient::new();
	let engine = engine(
		config(COMMON_AUTHORITY)
			.extended_lifetime_enabled(true)
			.build()
			.expect("Config should build."),
		&http,
	);
	let account = seed_account(engine.store());

	seed_refresh_token(engine.store(), "rt-1");
	engine
		.store()
		.save_access_token(user_access_token(
			"r1/scope1",
			"at-lapsed",
			Duration::hours(3),
			Duration::hours(1),
			Some(Duration::hours(2)),
		))
		.expect("Access token should save.");
	gateway_timeout(&http);
	gateway_timeout(&http);

	let err = engine
		.acquire_token_silent(SilentTokenRequest::new(scopes("r1/scope1"), account))
		.await
		.expect_err("Lapsed extension must not be served.");

	assert_eq!(err.class(), oauth2_token_cache::classifier::ErrorClass::Transient);
}

#[tokio::test]
async fn single_transient_failure_is_retried() {
	let http = ScriptedHttpClient::new();
	let engine = engine(config(COMMON_AUTHORITY).build().expect("Config should build."), &http);
	let account = seed_expired_but_extended(&engine);

	http.push_io(ErrorKind::TimedOut);
	http.push_json(200, token_response("at-after-retry", "r1/scope1"));

	let result = engine
		.acquire_token_silent(SilentTokenRequest::new(scopes("r1/scope1"), account))
		.await
		.expect("Retry should succeed.");

	assert_eq!(result.access_token.expose(), "at-after-retry");
	assert_eq!(result.source, TokenSource::IdentityProvider);
	assert_eq!(http.calls(), 2);
	assert_eq!(engine.metrics().network_calls(), 2);
}

#[tokio::test]
async fn malformed_success_is_fatal_and_not_retried() {
	let http = ScriptedHttpClient::new();
	let engine = engine(
		config(COMMON_AUTHORITY)
			.extended_lifetime_enabled(true)
			.build()
			.expect("Config should build."),
		&http,
	);
	let account = seed_expired_but_extended(&engine);

	http.push_text(200, "{\"access_token\":42}");

	let err = engine
		.acquire_token_silent(SilentTokenRequest::new(scopes("r1/scope1"), account))
		.await
		.expect_err("Malformed response must fail.");

	assert!(matches!(err, Error::Client(_)));
	assert_eq!(http.calls(), 1);
}

#[tokio::test]
async fn unknown_code_on_server_failure_is_still_transient() {
	let http = ScriptedHttpClient::new();
	let engine = engine(
		config(COMMON_AUTHORITY)
			.extended_lifetime_enabled(true)
			.build()
			.expect("Config should build."),
		&http,
	);
	let account = seed_expired_but_extended(&engine);

	http.push_json(503, serde_json::json!({ "error": "service_unavailable" }));
	http.push_json(503, serde_json::json!({ "error": "service_unavailable" }));

	let result = engine
		.acquire_token_silent(SilentTokenRequest::new(scopes("r1/scope1"), account))
		.await
		.expect("Stale token should be served while the authority answers 503.");

	assert_eq!(result.source, TokenSource::StaleCache);
	assert_eq!(result.access_token.expose(), "at-stale");
	assert_eq!(http.calls(), 2);
}

/// Token past its refresh marker (half of the hour elapsed) but twenty minutes from expiry.
fn seed_due_for_refresh(engine: &TestEngine) -> AccountIdentity {
	let account = seed_account(engine.store());

	seed_refresh_token(engine.store(), "rt-1");
	engine
		.store()
		.save_access_token(user_access_token(
			"r1/scope1",
			"at-due",
			Duration::minutes(40),
			Duration::hours(1),
			None,
		))
		.expect("Access token should save.");

	account
}

#[tokio::test]
async fn failed_early_refresh_serves_unexpired_token_when_extension_enabled() {
	let http = ScriptedHttpClient::new();
	let engine = engine(
		config(COMMON_AUTHORITY)
			.extended_lifetime_enabled(true)
			.build()
			.expect("Config should build."),
		&http,
	);
	let account = seed_due_for_refresh(&engine);

	gateway_timeout(&http);
	gateway_timeout(&http);

	let result = engine
		.acquire_token_silent(SilentTokenRequest::new(scopes("r1/scope1"), account))
		.await
		.expect("Unexpired token should be served when the refresh fails.");

	assert_eq!(result.source, TokenSource::StaleCache);
	assert_eq!(result.access_token.expose(), "at-due");
	assert_eq!(http.calls(), 2);
	assert_eq!(engine.metrics().stale_fallbacks(), 1);
}

#[tokio::test]
async fn failed_early_refresh_propagates_when_extension_disabled() {
	let http = ScriptedHttpClient::new();
	let engine = engine(config(COMMON_AUTHORITY).build().expect("Config should build."), &http);
	let account = seed_due_for_refresh(&engine);

	gateway_timeout(&http);
	gateway_timeout(&http);

	let err = engine
		.acquire_token_silent(SilentTokenRequest::new(scopes("r1/scope1"), account))
		.await
		.expect_err("Refresh failure must surface without the extension.");

	assert!(matches!(
		err,
		Error::Transient(TransientError::ServiceUnavailable { status: Some(504), .. })
	));
	assert_eq!(http.calls(), 2);
	assert_eq!(engine.metrics().stale_fallbacks(), 0);
}

#[tokio::test]
async fn out_of_range_lifetime_is_a_client_error() {
	let http = ScriptedHttpClient::new();
	let engine = engine(config(COMMON_AUTHORITY).build().expect("Config should build."), &http);
	let account = seed_expired_but_extended(&engine);
	let mut body = token_response("at-huge", "r1/scope1");

	body["expires_in"] = serde_json::json!(9_000_000_000_000_i64);
	http.push_json(200, body);

	let err = engine
		.acquire_token_silent(SilentTokenRequest::new(scopes("r1/scope1"), account))
		.await
		.expect_err("An unrepresentable expiry must fail.");

	assert!(matches!(err, Error::Client(_)));
	assert_eq!(http.calls(), 1);

	let cached = engine.store().get_all_access_tokens(|_| true).expect("Store read should succeed.");

	assert_eq!(cached.len(), 1);
	assert_eq!(cached[0].secret.expose(), "at-stale");
}
