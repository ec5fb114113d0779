//! App-only acquisition through the Client Credentials grant.
//!
//! App-only tokens live in the same cache as user tokens but carry no account, so the lookup
//! is partitioned by (environment, client, tenant, scopes) alone. The refresh-ahead and
//! stale-fallback rules of the silent flow apply unchanged; the client credential takes the
//! place of the refresh token.

// self
use crate::{
	_prelude::*,
	cache::CredentialBatch,
	engine::{
		AuthenticationResult, ClientCredentialsRequest, SilentFlowState, TokenEngine, TokenSource,
		request, response::ResponseIngest,
	},
	http::TokenHttpClient,
	oauth::{GrantType, TokenRequest, TransportErrorMapper},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
};

const KIND: FlowKind = FlowKind::ClientCredentials;

impl<C, M> TokenEngine<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Returns an app-only token, from cache when possible.
	///
	/// Requires a client credential and an authority naming a concrete tenant.
	pub async fn acquire_token_for_client(
		&self,
		request: ClientCredentialsRequest,
	) -> Result<AuthenticationResult> {
		let span = FlowSpan::new(KIND, "acquire_token_for_client");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span.instrument(self.client_credentials(request)).await;

		self.finish(KIND, &result);

		result
	}

	async fn client_credentials(
		&self,
		request: ClientCredentialsRequest,
	) -> Result<AuthenticationResult> {
		if self.credential.is_none() {
			return Err(Error::invalid_argument(
				"client_credential",
				"app-only tokens require a confidential client",
			));
		}

		let scopes = request::ensure_scopes(&request.scopes)?;
		let authority = self.authority(request.authority.as_ref()).clone();

		if authority.is_multi_tenant() {
			return Err(Error::invalid_argument(
				"authority",
				"app-only tokens require a tenant-specific authority",
			));
		}

		let aliases = self.aliases(&authority).await?;
		let realm = authority.tenant();
		let partition = format!(
			"client|{}|{}|{realm}|{}",
			aliases.preferred_cache,
			self.client_id(),
			scopes.key_target()
		);
		let guard = self.flow_guard(&partition);
		let _singleflight = guard.lock().await;
		let now = OffsetDateTime::now_utc();
		let cached = self.find_access_token(&aliases, realm, None, &scopes)?;
		let state = SilentFlowState::plan(
			cached.as_ref(),
			now,
			self.config.expiration_buffer,
			request.force_refresh,
		);

		obs::record_decision(KIND, state.as_str(), &scopes);

		if let (SilentFlowState::CacheHit, Some(record)) = (state, &cached) {
			self.metrics.record_cache_hit();
			obs::record_flow_outcome(KIND, FlowOutcome::CacheHit);

			return Ok(AuthenticationResult::from_record(record, None, None, TokenSource::Cache));
		}

		let endpoint = authority.token_endpoint(&aliases.preferred_network)?;
		let authentication = self.client_authentication(&endpoint)?;
		let token_request =
			TokenRequest::client_credentials(endpoint, self.client_id().clone(), scopes.clone())
				.with_authentication(authentication)
				.with_claims(self.claims());
		let response = match self.exchange(KIND, &token_request, &request.cancellation).await {
			Ok(response) => response,
			Err(e) => {
				let stale = cached.as_ref().filter(|_| !request.force_refresh);

				if let Some(record) = self.stale_fallback(KIND, stale, &e, OffsetDateTime::now_utc())
				{
					return Ok(AuthenticationResult::from_record(
						&record,
						None,
						None,
						TokenSource::StaleCache,
					));
				}

				return Err(e);
			},
		};
		let ingest = ResponseIngest {
			grant: GrantType::ClientCredentials,
			environment: aliases.cache_environment()?,
			client_id: self.client_id(),
			authority: &authority,
			requested_scopes: &scopes,
			expected_account: None,
			refresh_policy: self.config.refresh_policy,
		};
		let (batch, result) = ingest.ingest(response, OffsetDateTime::now_utc())?;

		self.commit(CredentialBatch { access_token: batch.access_token, ..Default::default() })?;

		obs::record_flow_outcome(KIND, FlowOutcome::Refreshed);

		Ok(result.with_correlation_id(token_request.correlation_id()))
	}
}
