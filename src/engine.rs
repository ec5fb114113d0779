//! Token acquisition engine: silent flow, app-only flow, code redemption, and accounts.
//!
//! [`TokenEngine`] owns the transport, the shared [`CacheStore`], the discovery cache, and the
//! error classifier, so each flow only encodes its grant-specific decisions. Network calls
//! are the only suspension points; everything else is synchronous decision logic over the
//! store.

pub mod metrics;
pub mod request;
pub mod result;

mod accounts;
mod authorization_code;
mod client_credentials;
mod response;
mod silent;

pub use metrics::EngineMetrics;
pub use request::*;
pub use result::*;

// self
use crate::{
	_prelude::*,
	auth::{AccountIdentity, ClientId, HomeAccountId, ScopeSet, TenantId, TokenSecret},
	authority::{Authority, AuthorityAliases, InstanceDiscovery},
	cache::{AccessTokenRecord, CacheStore, CredentialBatch, RefreshTokenRecord},
	classifier::{DefaultErrorClassifier, ErrorClass, ErrorClassifier},
	config::ApplicationConfig,
	ext::ClientCredential,
	http::TokenHttpClient,
	oauth::{self, TokenRequest, TokenResponse, TransportErrorMapper},
	obs::{self, FlowKind, FlowOutcome},
};
#[cfg(feature = "reqwest")]
use crate::{http::ReqwestHttpClient, oauth::ReqwestTransportErrorMapper};

/// Engine specialized for the crate's default reqwest transport stack.
#[cfg(feature = "reqwest")]
pub type ReqwestTokenEngine = TokenEngine<ReqwestHttpClient, ReqwestTransportErrorMapper>;

/// Acquires tokens for one client application against one shared cache.
///
/// The engine keeps no per-request state besides the cache; concurrent requests that would
/// refresh the same token wait on a per-partition guard and re-check the cache afterwards, so
/// N identical requests cost one network call.
pub struct TokenEngine<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	http_client: Arc<C>,
	transport_mapper: Arc<M>,
	store: Arc<CacheStore>,
	config: ApplicationConfig,
	discovery: Arc<InstanceDiscovery>,
	classifier: Arc<dyn ErrorClassifier>,
	credential: Option<ClientCredential>,
	metrics: Arc<EngineMetrics>,
	flow_guards: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}
impl<C, M> TokenEngine<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Creates an engine that reuses the caller-provided transport + mapper pair.
	///
	/// A fresh in-memory cache bounded by [`ApplicationConfig::max_access_tokens`] is created;
	/// use [`TokenEngine::with_store`] to share or persist one.
	pub fn with_http_client(
		config: ApplicationConfig,
		http_client: impl Into<Arc<C>>,
		mapper: impl Into<Arc<M>>,
	) -> Self {
		let store = CacheStore::new().with_max_access_tokens(config.max_access_tokens);

		Self {
			http_client: http_client.into(),
			transport_mapper: mapper.into(),
			store: Arc::new(store),
			config,
			discovery: Default::default(),
			classifier: Arc::new(DefaultErrorClassifier),
			credential: None,
			metrics: Default::default(),
			flow_guards: Default::default(),
		}
	}

	/// Replaces the cache, e.g. with one that has persistence attached.
	pub fn with_store(mut self, store: Arc<CacheStore>) -> Self {
		self.store = store;

		self
	}

	/// Replaces the instance-discovery cache.
	pub fn with_discovery(mut self, discovery: Arc<InstanceDiscovery>) -> Self {
		self.discovery = discovery;

		self
	}

	/// Replaces the error classifier.
	pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
		self.classifier = classifier;

		self
	}

	/// Makes the application confidential.
	pub fn with_client_credential(mut self, credential: ClientCredential) -> Self {
		self.credential = Some(credential);

		self
	}

	/// Shared token cache.
	pub fn store(&self) -> &Arc<CacheStore> {
		&self.store
	}

	/// Application configuration.
	pub fn config(&self) -> &ApplicationConfig {
		&self.config
	}

	/// In-process activity counters.
	pub fn metrics(&self) -> &Arc<EngineMetrics> {
		&self.metrics
	}

	/// Instance-discovery cache.
	pub fn discovery(&self) -> &Arc<InstanceDiscovery> {
		&self.discovery
	}

	fn client_id(&self) -> &ClientId {
		&self.config.client_id
	}

	fn authority<'a>(&'a self, requested: Option<&'a Authority>) -> &'a Authority {
		requested.unwrap_or(&self.config.authority)
	}

	async fn aliases(&self, authority: &Authority) -> Result<AuthorityAliases> {
		self.discovery.aliases(authority.environment()).await
	}

	/// Returns (and creates on demand) the single-flight guard for a partition.
	fn flow_guard(&self, key: &str) -> Arc<AsyncMutex<()>> {
		let mut guards = self.flow_guards.lock();

		guards.entry(key.to_owned()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
	}

	/// Best access token in `aliases` for the partition, preferring the most preferred alias.
	fn find_access_token(
		&self,
		aliases: &AuthorityAliases,
		realm: &TenantId,
		home_account_id: Option<&HomeAccountId>,
		scopes: &ScopeSet,
	) -> Result<Option<AccessTokenRecord>> {
		let client_id = self.client_id();
		let mut candidates = self.store.get_all_access_tokens(|record| {
			aliases.contains(&record.environment)
				&& record.client_id == *client_id
				&& record.realm.eq_ignore_ascii_case(realm)
				&& record.belongs_to(home_account_id)
				&& scopes.is_satisfied_by(&record.target)
		})?;

		candidates.sort_by(|a, b| {
			let rank = |record: &AccessTokenRecord| aliases.rank(&record.environment).unwrap_or(usize::MAX);

			rank(a).cmp(&rank(b)).then_with(|| b.expires_on.cmp(&a.expires_on))
		});

		Ok(candidates.into_iter().next())
	}

	/// Refresh token usable by this application for `home_account_id`.
	///
	/// The application's own token wins. Otherwise a family token is used, provided the app is
	/// not known to be outside every family; when the app's family is known only that family's
	/// token qualifies.
	fn find_refresh_token(
		&self,
		aliases: &AuthorityAliases,
		home_account_id: &HomeAccountId,
	) -> Result<Option<RefreshTokenRecord>> {
		let client_id = self.client_id();
		let tokens = self.store.get_all_refresh_tokens(|record| {
			aliases.contains(&record.environment) && record.home_account_id == *home_account_id
		})?;
		let rank = |record: &&RefreshTokenRecord| aliases.rank(&record.environment).unwrap_or(usize::MAX);

		if let Some(own) = tokens.iter().filter(|record| record.client_id == *client_id).min_by_key(rank) {
			return Ok(Some(own.clone()));
		}

		let metadata = self.store.get_all_app_metadata(|record| {
			aliases.contains(&record.environment) && record.client_id == *client_id
		})?;
		let family = match metadata.into_iter().next() {
			Some(record) => match record.family_id {
				Some(family) => Some(family),
				None => return Ok(None),
			},
			None => None,
		};
		let shared = tokens
			.iter()
			.filter(|record| match (&record.family_id, &family) {
				(Some(found), Some(wanted)) => found == wanted,
				(Some(_), None) => true,
				(None, _) => false,
			})
			.min_by_key(rank);

		Ok(shared.cloned())
	}

	/// Tenant whose tokens serve `account` under `authority`.
	fn account_realm(&self, authority: &Authority, account: &AccountIdentity) -> Result<TenantId> {
		if !authority.is_multi_tenant() {
			return Ok(authority.tenant().clone());
		}

		match account.home_account_id.tenant_id() {
			Some(home) => Ok(TenantId::new(home)?),
			None => Ok(account.tenant_id.clone().unwrap_or_else(|| authority.tenant().clone())),
		}
	}

	/// Records the final outcome of one public operation.
	fn finish<T>(&self, kind: FlowKind, result: &Result<T>) {
		match result {
			Ok(_) => obs::record_flow_outcome(kind, FlowOutcome::Success),
			Err(e) => {
				self.metrics.record_failure();
				obs::record_decision(kind, "failed", e);
				obs::record_flow_outcome(kind, FlowOutcome::Failure);
			},
		}
	}

	/// Resolves client authentication for a request sent to `endpoint`.
	fn client_authentication(&self, endpoint: &Url) -> Result<Option<oauth::ClientAuthentication>> {
		self.credential
			.as_ref()
			.map(|credential| credential.authenticate(self.client_id(), endpoint))
			.transpose()
	}

	fn claims(&self) -> Option<String> {
		oauth::capabilities_claims(&self.config.client_capabilities)
	}

	/// Sends `request`, retrying transient failures within the configured budget.
	///
	/// Cancellation is honored until the authority answers.
	async fn exchange(
		&self,
		kind: FlowKind,
		request: &TokenRequest,
		cancellation: &CancellationToken,
	) -> Result<TokenResponse> {
		let budget = self.config.transient_retry_budget;
		let mut attempt = 0;

		loop {
			self.metrics.record_network_call();

			let sent = cancellation
				.run_until_cancelled(oauth::send(
					self.http_client.as_ref(),
					self.transport_mapper.as_ref(),
					self.classifier.as_ref(),
					request,
				))
				.await;

			match sent {
				None => return Err(Error::Cancelled),
				Some(Err(e)) if e.class() == ErrorClass::Transient && attempt < budget => {
					attempt += 1;

					obs::record_decision(kind, "retry", &e);
				},
				Some(result) => return result,
			}
		}
	}

	/// Writes `batch` and counts the acquisition.
	fn commit(&self, batch: CredentialBatch) -> Result<()> {
		self.store.save_batch(batch)?;
		self.metrics.record_refresh();

		Ok(())
	}

	/// Serves `stale` after a transient failure when extended lifetime allows it.
	fn stale_fallback(
		&self,
		kind: FlowKind,
		stale: Option<&AccessTokenRecord>,
		error: &Error,
		now: OffsetDateTime,
	) -> Option<AccessTokenRecord> {
		if error.class() != ErrorClass::Transient || !self.config.extended_lifetime_enabled {
			return None;
		}

		let stale = stale?;
		let usable = !stale.is_expired_at(now, Duration::ZERO)
			|| stale.is_within_extended_lifetime_at(now);

		if !usable {
			return None;
		}

		self.metrics.record_stale_fallback();
		obs::record_decision(kind, "stale_fallback", error);
		obs::record_flow_outcome(kind, FlowOutcome::StaleFallback);

		Some(stale.clone())
	}

	fn id_token_for(
		&self,
		aliases: &AuthorityAliases,
		home_account_id: &HomeAccountId,
		realm: &TenantId,
	) -> Result<Option<TokenSecret>> {
		let client_id = self.client_id();
		let id_tokens = self.store.get_all_id_tokens(|record| {
			aliases.contains(&record.environment)
				&& record.client_id == *client_id
				&& record.home_account_id == *home_account_id
				&& record.realm.eq_ignore_ascii_case(realm)
		})?;

		Ok(id_tokens.into_iter().next().map(|record| record.secret))
	}
}
#[cfg(feature = "reqwest")]
impl TokenEngine<ReqwestHttpClient, ReqwestTransportErrorMapper> {
	/// Creates an engine with its own reqwest-backed transport.
	pub fn new(config: ApplicationConfig) -> Self {
		Self::with_http_client(config, ReqwestHttpClient::default(), ReqwestTransportErrorMapper)
	}
}
impl<C, M> Debug for TokenEngine<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenEngine")
			.field("config", &self.config)
			.field("confidential", &self.credential.is_some())
			.field("discovery", &self.discovery)
			.finish_non_exhaustive()
	}
}
