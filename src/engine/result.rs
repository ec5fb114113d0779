//! Silent-flow states and acquisition results.

// self
use crate::{
	_prelude::*,
	auth::{AccountIdentity, ScopeSet, TenantId, TokenSecret},
	cache::AccessTokenRecord,
};

/// States of the silent acquisition state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SilentFlowState {
	/// A cached token is fresh and not yet due for refresh.
	CacheHit,
	/// A cached token is valid but past its refresh marker.
	NeedsRefresh,
	/// No usable access token; a refresh token (or client credential) must be redeemed.
	NeedsRefreshTokenExchange,
	/// Neither an access token nor a refresh token is available.
	NoTokensFound,
	/// The authority call failed and no fallback applied.
	Failed,
}
impl SilentFlowState {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::CacheHit => "cache_hit",
			Self::NeedsRefresh => "needs_refresh",
			Self::NeedsRefreshTokenExchange => "needs_refresh_token_exchange",
			Self::NoTokensFound => "no_tokens_found",
			Self::Failed => "failed",
		}
	}

	/// Decides what to do with the best cached access token at `now`.
	///
	/// Tokens inside `expiration_buffer` of their hard expiry count as expired.
	pub fn plan(
		cached: Option<&AccessTokenRecord>,
		now: OffsetDateTime,
		expiration_buffer: Duration,
		force_refresh: bool,
	) -> Self {
		match cached {
			_ if force_refresh => Self::NeedsRefreshTokenExchange,
			None => Self::NeedsRefreshTokenExchange,
			Some(record) if record.is_expired_at(now, expiration_buffer) =>
				Self::NeedsRefreshTokenExchange,
			Some(record) if record.is_refresh_due_at(now) => Self::NeedsRefresh,
			Some(_) => Self::CacheHit,
		}
	}
}
impl Display for SilentFlowState {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Where the returned token came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TokenSource {
	/// Served from cache without a network call.
	Cache,
	/// Freshly issued by the authority.
	IdentityProvider,
	/// Served from cache after the authority failed transiently.
	StaleCache,
}

/// Token handed back to the caller.
#[derive(Clone, Debug)]
pub struct AuthenticationResult {
	/// Access token value.
	pub access_token: TokenSecret,
	/// Token type, `Bearer` unless the authority said otherwise.
	pub token_type: String,
	/// Scopes the token is valid for.
	pub scopes: ScopeSet,
	/// Hard expiry.
	pub expires_on: OffsetDateTime,
	/// Expiry honored while the authority is unavailable.
	pub extended_expires_on: OffsetDateTime,
	/// Soft refresh marker.
	pub refresh_on: Option<OffsetDateTime>,
	/// Account the token belongs to; `None` for app-only tokens.
	pub account: Option<AccountIdentity>,
	/// Tenant that issued the token.
	pub tenant_id: TenantId,
	/// Raw id token, when one is cached for the account.
	pub id_token: Option<TokenSecret>,
	/// Origin of the token.
	pub source: TokenSource,
	/// Correlation id of the network request, if one was made.
	pub correlation_id: Option<String>,
}
impl AuthenticationResult {
	pub(crate) fn from_record(
		record: &AccessTokenRecord,
		account: Option<AccountIdentity>,
		id_token: Option<TokenSecret>,
		source: TokenSource,
	) -> Self {
		Self {
			access_token: record.secret.clone(),
			token_type: record.token_type.clone().unwrap_or_else(|| "Bearer".into()),
			scopes: record.target.clone(),
			expires_on: record.expires_on,
			extended_expires_on: record.extended_expires_on(),
			refresh_on: record.refresh_on,
			account,
			tenant_id: record.realm.clone(),
			id_token,
			source,
			correlation_id: None,
		}
	}

	pub(crate) fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
		self.correlation_id = Some(correlation_id.into());

		self
	}
}
