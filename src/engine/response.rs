//! Turns a token response into cache records and a caller-facing result.

// self
use crate::{
	_prelude::*,
	auth::{
		AccountIdentity, ClientId, ClientInfo, Environment, IdTokenClaims, ScopeSet, TenantId,
	},
	authority::Authority,
	cache::{
		AccessTokenRecord, AccountRecord, AppMetadataRecord, CredentialBatch, IdTokenRecord,
		RefreshTokenRecord,
	},
	config::RefreshPolicy,
	engine::{AuthenticationResult, TokenSource},
	error::ClientError,
	oauth::{GrantType, TokenResponse},
};

/// Everything needed to interpret one token response.
pub(crate) struct ResponseIngest<'a> {
	pub(crate) grant: GrantType,
	pub(crate) environment: Environment,
	pub(crate) client_id: &'a ClientId,
	pub(crate) authority: &'a Authority,
	pub(crate) requested_scopes: &'a ScopeSet,
	pub(crate) expected_account: Option<&'a AccountIdentity>,
	pub(crate) refresh_policy: RefreshPolicy,
}
impl ResponseIngest<'_> {
	/// Builds the records without touching the cache.
	///
	/// A response for a different account than `expected_account` is rejected before any record
	/// exists, so nothing is cached under the requested key.
	pub(crate) fn ingest(
		&self,
		response: TokenResponse,
		now: OffsetDateTime,
	) -> Result<(CredentialBatch, AuthenticationResult)> {
		let expires_in = response.expires_in()?;
		let client_info = response
			.client_info
			.as_deref()
			.filter(|raw| !raw.is_empty())
			.map(ClientInfo::decode)
			.transpose()?;
		let claims =
			response.id_token.as_ref().map(|token| IdTokenClaims::decode(token.expose())).transpose()?;
		let identity = self.identity(client_info.as_ref(), claims.as_ref())?;
		let realm = self.realm(identity.as_ref(), client_info.as_ref());
		let granted = response.granted_scopes(self.requested_scopes)?;
		let family_id = response.family_id().map(str::to_owned);
		let access_token = AccessTokenRecord::builder(
			self.environment.clone(),
			self.client_id.clone(),
			realm.clone(),
			granted,
		)
		.home_account_id(identity.as_ref().map(|identity| identity.home_account_id.clone()))
		.secret(response.access_token.expose())
		.cached_at(now)
		.expires_in(expires_in)
		.extended_expires_in(response.ext_expires_in())
		.refresh_in(response.refresh_in())
		.refresh_policy(self.refresh_policy)
		.token_type(response.token_type.clone())
		.build()?;
		let mut batch = CredentialBatch { access_token: Some(access_token.clone()), ..Default::default() };
		let mut id_token = None;

		if let Some(identity) = &identity {
			if let Some(secret) = &response.refresh_token {
				let mut record = RefreshTokenRecord::new(
					identity.home_account_id.clone(),
					self.environment.clone(),
					self.client_id.clone(),
					secret.expose(),
				);

				record.family_id = family_id.clone();
				batch.refresh_token = Some(record);
			}
			if let Some(secret) = &response.id_token {
				batch.id_token = Some(IdTokenRecord {
					home_account_id: identity.home_account_id.clone(),
					environment: self.environment.clone(),
					client_id: self.client_id.clone(),
					realm: realm.clone(),
					secret: secret.clone(),
					extra: Default::default(),
				});
				id_token = Some(secret.clone());
			}

			let mut account =
				AccountRecord::from_identity(identity, realm.clone(), response.client_info.clone());

			account.name = claims.as_ref().and_then(|claims| claims.name.clone());
			batch.account = Some(account);
			batch.app_metadata = Some(AppMetadataRecord::new(
				self.environment.clone(),
				self.client_id.clone(),
				family_id,
			));
		}

		let result = AuthenticationResult::from_record(
			&access_token,
			identity,
			id_token,
			TokenSource::IdentityProvider,
		);

		Ok((batch, result))
	}

	fn identity(
		&self,
		client_info: Option<&ClientInfo>,
		claims: Option<&IdTokenClaims>,
	) -> Result<Option<AccountIdentity>> {
		if self.grant == GrantType::ClientCredentials {
			return Ok(None);
		}

		let returned = AccountIdentity::from_response(self.environment.clone(), client_info, claims)?;

		match (self.expected_account, returned) {
			(Some(expected), Some(returned))
				if expected.home_account_id != returned.home_account_id =>
				Err(Error::UserMismatch {
					requested: expected.home_account_id.clone(),
					returned: returned.home_account_id,
				}),
			(Some(expected), Some(mut returned)) => {
				returned.username = returned.username.or_else(|| expected.username.clone());

				Ok(Some(returned))
			},
			(_, Some(returned)) => Ok(Some(returned)),
			(Some(expected), None) => {
				let mut identity = expected.clone();

				identity.environment = self.environment.clone();

				Ok(Some(identity))
			},
			(None, None) => Err(ClientError::InvalidIdentity {
				reason: "response carries neither client_info nor an id_token".into(),
			}
			.into()),
		}
	}

	fn realm(&self, identity: Option<&AccountIdentity>, client_info: Option<&ClientInfo>) -> TenantId {
		identity
			.and_then(|identity| identity.tenant_id.clone())
			.or_else(|| client_info.and_then(|info| TenantId::new(&info.utid).ok()))
			.filter(|_| self.grant != GrantType::ClientCredentials)
			.unwrap_or_else(|| self.authority.tenant().clone())
	}
}
