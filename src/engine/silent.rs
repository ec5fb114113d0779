//! Silent acquisition: cache lookup, refresh-ahead, refresh-token redemption, stale fallback.
//!
//! [`TokenEngine::acquire_token_silent`] walks [`SilentFlowState`]: a fresh cached token is
//! returned without I/O; a token past its refresh marker or an expired/missing one triggers a
//! refresh-token exchange under a per-partition single-flight guard. Transient authority
//! failures fall back to the cached token while extended lifetime allows it; `invalid_grant`
//! drops the rejected refresh token and surfaces [`UiRequiredError`].

// self
use crate::{
	_prelude::*,
	auth::{AccountIdentity, ScopeSet, TenantId},
	authority::{Authority, AuthorityAliases},
	cache::{AccessTokenRecord, RefreshTokenRecord},
	engine::{
		AuthenticationResult, SilentAccount, SilentFlowState, SilentTokenRequest, TokenEngine,
		TokenSource, request, response::ResponseIngest,
	},
	error::{UiRequiredCode, UiRequiredError},
	http::TokenHttpClient,
	oauth::{GrantType, TokenRequest, TransportErrorMapper},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
};

const KIND: FlowKind = FlowKind::Silent;

impl<C, M> TokenEngine<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Returns a token for the requested account without user interaction.
	///
	/// Fails with [`Error::UiRequired`] when neither a usable access token nor a refresh token
	/// exists, or when the authority rejects the refresh token.
	pub async fn acquire_token_silent(
		&self,
		request: SilentTokenRequest,
	) -> Result<AuthenticationResult> {
		let span = FlowSpan::new(KIND, "acquire_token_silent");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span.instrument(self.silent(request)).await;

		self.finish(KIND, &result);

		result
	}

	async fn silent(&self, request: SilentTokenRequest) -> Result<AuthenticationResult> {
		let scopes = request::ensure_scopes(&request.scopes)?;
		let authority = self.authority(request.authority.as_ref()).clone();
		let aliases = self.aliases(&authority).await?;
		let account = self.resolve_account(&aliases, &request.account)?;
		let realm = self.account_realm(&authority, &account)?;
		let lookup = SilentLookup { aliases: &aliases, account: &account, realm: &realm, scopes: &scopes };

		if !request.force_refresh {
			if let Some(hit) = self.cached_hit(&lookup, OffsetDateTime::now_utc())? {
				return Ok(hit);
			}
		}

		let guard = self.flow_guard(&lookup.partition(self.client_id()));
		let _singleflight = guard.lock().await;
		let now = OffsetDateTime::now_utc();

		// Another caller may have refreshed while this one waited on the guard.
		if !request.force_refresh {
			if let Some(hit) = self.cached_hit(&lookup, now)? {
				return Ok(hit);
			}
		}

		let cached = self.find_access_token(&aliases, &realm, Some(&account.home_account_id), &scopes)?;
		let Some(refresh_token) = self.find_refresh_token(&aliases, &account.home_account_id)? else {
			obs::record_decision(KIND, SilentFlowState::NoTokensFound.as_str(), &scopes);

			let still_valid = cached
				.filter(|_| !request.force_refresh)
				.filter(|record| !record.is_expired_at(now, self.config.expiration_buffer));

			if let Some(record) = still_valid {
				return self.serve(&lookup, record, TokenSource::Cache);
			}

			return Err(UiRequiredError::new(
				UiRequiredCode::NoTokensFound,
				"no access token or refresh token is cached for the account",
			)
			.into());
		};

		self.redeem_refresh_token(&request, &authority, &lookup, refresh_token, cached.as_ref()).await
	}

	/// Serves a cached token when the plan says no network call is needed.
	fn cached_hit(
		&self,
		lookup: &SilentLookup<'_>,
		now: OffsetDateTime,
	) -> Result<Option<AuthenticationResult>> {
		let cached = self.find_access_token(
			lookup.aliases,
			lookup.realm,
			Some(&lookup.account.home_account_id),
			lookup.scopes,
		)?;
		let state = SilentFlowState::plan(cached.as_ref(), now, self.config.expiration_buffer, false);

		obs::record_decision(KIND, state.as_str(), lookup.scopes);

		match (state, cached) {
			(SilentFlowState::CacheHit, Some(record)) =>
				self.serve(lookup, record, TokenSource::Cache).map(Some),
			_ => Ok(None),
		}
	}

	fn serve(
		&self,
		lookup: &SilentLookup<'_>,
		record: AccessTokenRecord,
		source: TokenSource,
	) -> Result<AuthenticationResult> {
		let id_token =
			self.id_token_for(lookup.aliases, &lookup.account.home_account_id, lookup.realm)?;

		if source == TokenSource::Cache {
			self.metrics.record_cache_hit();
			obs::record_flow_outcome(KIND, FlowOutcome::CacheHit);
		}

		Ok(AuthenticationResult::from_record(&record, Some(lookup.account.clone()), id_token, source))
	}

	async fn redeem_refresh_token(
		&self,
		request: &SilentTokenRequest,
		authority: &Authority,
		lookup: &SilentLookup<'_>,
		refresh_token: RefreshTokenRecord,
		cached: Option<&AccessTokenRecord>,
	) -> Result<AuthenticationResult> {
		let endpoint = authority.token_endpoint(&lookup.aliases.preferred_network)?;
		let authentication = self.client_authentication(&endpoint)?;
		let token_request = TokenRequest::refresh_token(
			endpoint,
			self.client_id().clone(),
			lookup.scopes.with_reserved(),
			refresh_token.secret.clone(),
		)
		.with_authentication(authentication)
		.with_claims(self.claims());
		let exchanged = self.exchange(KIND, &token_request, &request.cancellation).await;
		let response = match exchanged {
			Ok(response) => response,
			Err(e) => {
				let now = OffsetDateTime::now_utc();
				let stale = if request.force_refresh { None } else { cached };

				if let Some(record) = self.stale_fallback(KIND, stale, &e, now) {
					return self.serve(lookup, record, TokenSource::StaleCache);
				}
				if matches!(&e, Error::UiRequired(ui) if ui.code == UiRequiredCode::InvalidGrant) {
					obs::record_decision(KIND, "drop_refresh_token", &e);

					self.store.delete_refresh_token(&refresh_token.key())?;
				}

				return Err(e);
			},
		};
		let ingest = ResponseIngest {
			grant: GrantType::RefreshToken,
			environment: lookup.aliases.cache_environment()?,
			client_id: self.client_id(),
			authority,
			requested_scopes: lookup.scopes,
			expected_account: Some(lookup.account),
			refresh_policy: self.config.refresh_policy,
		};
		let (mut batch, result) = ingest.ingest(response, OffsetDateTime::now_utc())?;

		// A rotated family token replaces the one that was redeemed, whoever owned it.
		if let Some(rotated) = &mut batch.refresh_token {
			if rotated.family_id.is_none() && refresh_token.client_id != *self.client_id() {
				rotated.family_id = refresh_token.family_id.clone();
			}
		}

		self.commit(batch)?;

		obs::record_flow_outcome(KIND, FlowOutcome::Refreshed);

		Ok(result.with_correlation_id(token_request.correlation_id()))
	}

	fn resolve_account(
		&self,
		aliases: &AuthorityAliases,
		account: &SilentAccount,
	) -> Result<AccountIdentity> {
		let hint = match account {
			SilentAccount::Account(identity) => return Ok(identity.clone()),
			SilentAccount::LoginHint(hint) => hint.trim(),
		};

		if hint.is_empty() {
			return Err(Error::invalid_argument("login_hint", "login hint must not be empty"));
		}

		let mut matches = self
			.accounts_in(aliases)?
			.into_iter()
			.filter(|identity| identity.matches_login_hint(hint))
			.collect::<Vec<_>>();

		match matches.len() {
			0 => Err(UiRequiredError::new(
				UiRequiredCode::NoAccountForLoginHint,
				"no cached account matches the login hint",
			)
			.into()),
			1 => Ok(matches.remove(0)),
			_ => Err(UiRequiredError::new(
				UiRequiredCode::AmbiguousLoginHint,
				"more than one cached account matches the login hint",
			)
			.into()),
		}
	}
}

/// Partition a silent request reads from and writes to.
struct SilentLookup<'a> {
	aliases: &'a AuthorityAliases,
	account: &'a AccountIdentity,
	realm: &'a TenantId,
	scopes: &'a ScopeSet,
}
impl SilentLookup<'_> {
	fn partition(&self, client_id: &str) -> String {
		format!(
			"silent|{}|{client_id}|{}|{}|{}",
			self.aliases.preferred_cache,
			self.account.home_account_id,
			self.realm,
			self.scopes.key_target()
		)
	}
}
