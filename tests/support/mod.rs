#![allow(dead_code)]

// std
use std::{
	collections::VecDeque,
	future::Future,
	io::{self, ErrorKind},
	pin::Pin,
	str::FromStr,
	sync::{
		Arc,
		atomic::{AtomicUsize, Ordering},
	},
};
// crates.io
use parking_lot::Mutex;
use time::{Duration, OffsetDateTime};
// self
use oauth2_token_cache::{
	auth::{AccountIdentity, ClientId, ClientInfo, Environment, HomeAccountId, ScopeSet, TenantId},
	authority::Authority,
	cache::{AccessTokenRecord, AccountRecord, AppMetadataRecord, CacheStore, RefreshTokenRecord},
	config::{ApplicationConfig, ApplicationConfigBuilder},
	engine::TokenEngine,
	http::TokenHttpClient,
	oauth::{
		DefaultTransportErrorMapper,
		oauth2::{AsyncHttpClient, HttpClientError, HttpRequest, HttpResponse, http::StatusCode},
	},
};

pub const CLIENT_ID: &str = "client-app";
pub const COMMON_AUTHORITY: &str = "https://login.microsoftonline.com/common";
pub const TENANT_AUTHORITY: &str = "https://login.microsoftonline.com/utid";
/// Preferred cache alias of `login.microsoftonline.com`.
pub const ENVIRONMENT: &str = "login.windows.net";
pub const UID: &str = "uid";
pub const UTID: &str = "utid";
pub const USERNAME: &str = "user@contoso.com";

pub type TestEngine = TokenEngine<ScriptedHttpClient, DefaultTransportErrorMapper>;

enum Scripted {
	Response { status: u16, body: String },
	Io(ErrorKind),
}

#[derive(Default)]
struct Script {
	queue: Mutex<VecDeque<Scripted>>,
	requests: Mutex<Vec<String>>,
	calls: AtomicUsize,
	delay: Mutex<Option<std::time::Duration>>,
}

/// Transport that replays queued responses and records every request body.
#[derive(Clone, Default)]
pub struct ScriptedHttpClient {
	script: Arc<Script>,
}
impl ScriptedHttpClient {
	pub fn new() -> Self {
		Self::default()
	}

	/// Delays every answer, widening the window for concurrent callers.
	pub fn with_delay(self, delay: std::time::Duration) -> Self {
		*self.script.delay.lock() = Some(delay);

		self
	}

	pub fn push_json(&self, status: u16, body: serde_json::Value) -> &Self {
		self.script.queue.lock().push_back(Scripted::Response { status, body: body.to_string() });

		self
	}

	pub fn push_text(&self, status: u16, body: &str) -> &Self {
		self.script.queue.lock().push_back(Scripted::Response { status, body: body.to_owned() });

		self
	}

	pub fn push_io(&self, kind: ErrorKind) -> &Self {
		self.script.queue.lock().push_back(Scripted::Io(kind));

		self
	}

	pub fn calls(&self) -> usize {
		self.script.calls.load(Ordering::SeqCst)
	}

	pub fn requests(&self) -> Vec<String> {
		self.script.requests.lock().clone()
	}
}
impl TokenHttpClient for ScriptedHttpClient {
	type Handle = ScriptedHandle;
	type TransportError = io::Error;

	fn handle(&self) -> Self::Handle {
		ScriptedHandle { script: self.script.clone() }
	}
}

pub struct ScriptedHandle {
	script: Arc<Script>,
}
impl<'c> AsyncHttpClient<'c> for ScriptedHandle {
	type Error = HttpClientError<io::Error>;
	type Future = Pin<Box<dyn Future<Output = Result<HttpResponse, Self::Error>> + 'c + Send>>;

	fn call(&'c self, request: HttpRequest) -> Self::Future {
		let script = self.script.clone();

		Box::pin(async move {
			script.calls.fetch_add(1, Ordering::SeqCst);
			script.requests.lock().push(String::from_utf8_lossy(request.body()).into_owned());

			let delay = *script.delay.lock();

			if let Some(delay) = delay {
				tokio::time::sleep(delay).await;
			}

			let next = script.queue.lock().pop_front();

			match next {
				Some(Scripted::Response { status, body }) => {
					let mut response = HttpResponse::new(body.into_bytes());

					*response.status_mut() =
						StatusCode::from_u16(status).expect("Scripted status should be valid.");

					Ok(response)
				},
				Some(Scripted::Io(kind)) =>
					Err(HttpClientError::Io(io::Error::new(kind, "scripted transport failure"))),
				None => Err(HttpClientError::Io(io::Error::other("script exhausted"))),
			}
		})
	}
}

pub fn client_id() -> ClientId {
	ClientId::new(CLIENT_ID).expect("Client fixture should be valid.")
}

pub fn environment() -> Environment {
	Environment::new(ENVIRONMENT).expect("Environment fixture should be valid.")
}

pub fn tenant() -> TenantId {
	TenantId::new(UTID).expect("Tenant fixture should be valid.")
}

pub fn home_account_id() -> HomeAccountId {
	HomeAccountId::from_parts(UID, UTID).expect("Account fixture should be valid.")
}

pub fn scopes(raw: &str) -> ScopeSet {
	ScopeSet::from_str(raw).expect("Scope fixture should be valid.")
}

pub fn config(authority: &str) -> ApplicationConfigBuilder {
	ApplicationConfig::builder(
		client_id(),
		Authority::parse(authority).expect("Authority fixture should parse."),
	)
}

pub fn engine(config: ApplicationConfig, http: &ScriptedHttpClient) -> TestEngine {
	TestEngine::with_http_client(config, http.clone(), DefaultTransportErrorMapper)
}

pub fn client_info() -> String {
	ClientInfo { uid: UID.into(), utid: UTID.into() }.encode()
}

/// Account record as left behind by an earlier interactive sign-in.
pub fn seed_account(store: &CacheStore) -> AccountIdentity {
	let mut identity = AccountIdentity::new(home_account_id(), environment());

	identity.username = Some(USERNAME.into());
	identity.local_account_id = Some(UID.into());
	identity.tenant_id = Some(tenant());

	store
		.save_account(AccountRecord::from_identity(&identity, tenant(), Some(client_info())))
		.expect("Account record should save.");

	identity
}

pub fn seed_refresh_token(store: &CacheStore, secret: &str) {
	store
		.save_refresh_token(RefreshTokenRecord::new(home_account_id(), environment(), client_id(), secret))
		.expect("Refresh token should save.");
}

pub fn seed_app_metadata(store: &CacheStore, family_id: Option<&str>) {
	store
		.save_app_metadata(AppMetadataRecord::new(
			environment(),
			client_id(),
			family_id.map(str::to_owned),
		))
		.expect("App metadata should save.");
}

/// User access token cached `age` ago with the given lifetimes.
pub fn user_access_token(
	target: &str,
	secret: &str,
	age: Duration,
	expires_in: Duration,
	extended_expires_in: Option<Duration>,
) -> AccessTokenRecord {
	AccessTokenRecord::builder(environment(), client_id(), tenant(), scopes(target))
		.home_account_id(Some(home_account_id()))
		.secret(secret)
		.cached_at(OffsetDateTime::now_utc() - age)
		.expires_in(expires_in)
		.extended_expires_in(extended_expires_in)
		.build()
		.expect("Access token fixture should build.")
}

pub fn token_response(access_token: &str, scope: &str) -> serde_json::Value {
	serde_json::json!({
		"access_token": access_token,
		"token_type": "Bearer",
		"expires_in": 3600,
		"ext_expires_in": 7200,
		"refresh_token": format!("{access_token}-rt"),
		"client_info": client_info(),
		"scope": scope,
	})
}
