//! Credential records stored in the cache.
//!
//! Every record keeps the members it does not understand in `extra`, so a blob written by a
//! newer library survives a read-modify-write cycle through this one.

// self
use crate::{
	_prelude::*,
	auth::{
		AccountIdentity, ClientId, Environment, HomeAccountId, ScopeSet, TenantId, TokenSecret,
		scope::space_delimited,
	},
	cache::{
		format::{empty_as_none, unix_seconds},
		key::{CredentialKey, CredentialType},
	},
	config::RefreshPolicy,
	error::ClientError,
};

type Extra = BTreeMap<String, serde_json::Value>;

/// Errors produced by [`AccessTokenRecordBuilder`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum RecordBuilderError {
	/// No access token value was provided.
	#[error("Access token secret is required.")]
	MissingSecret,
	/// No expiry (absolute or relative) was configured.
	#[error("Expiry must be supplied via expires_on or expires_in.")]
	MissingExpiry,
	/// The expiry does not fall after the cached-at instant.
	#[error("Expiry must be later than the cached-at instant.")]
	NonPositiveLifetime,
	/// The relative expiry does not fit in a representable instant.
	#[error("Expiry is out of the representable range.")]
	ExpiryOutOfRange,
}
impl From<RecordBuilderError> for Error {
	fn from(e: RecordBuilderError) -> Self {
		match e {
			RecordBuilderError::MissingSecret =>
				ClientError::MissingField { field: "access_token" }.into(),
			RecordBuilderError::MissingExpiry
			| RecordBuilderError::NonPositiveLifetime
			| RecordBuilderError::ExpiryOutOfRange => ClientError::InvalidExpiresIn.into(),
		}
	}
}

/// Cached access token for one (environment, client, account, realm, scope set).
#[derive(Clone, Serialize, Deserialize)]
pub struct AccessTokenRecord {
	/// Owning account; absent for app-only tokens.
	#[serde(default, deserialize_with = "empty_as_none", skip_serializing_if = "Option::is_none")]
	pub home_account_id: Option<HomeAccountId>,
	/// Cloud instance that issued the token.
	pub environment: Environment,
	/// Application the token was issued to.
	pub client_id: ClientId,
	/// Tenant that issued the token.
	pub realm: TenantId,
	/// Granted scopes, reserved OIDC scopes excluded.
	#[serde(with = "space_delimited")]
	pub target: ScopeSet,
	/// Raw token value.
	pub secret: TokenSecret,
	/// Instant the token was written.
	#[serde(with = "unix_seconds")]
	pub cached_at: OffsetDateTime,
	/// Hard expiry.
	#[serde(with = "unix_seconds")]
	pub expires_on: OffsetDateTime,
	/// Expiry honored only while the authority is unavailable.
	#[serde(default, with = "unix_seconds::option", skip_serializing_if = "Option::is_none")]
	pub extended_expires_on: Option<OffsetDateTime>,
	/// Soft expiry after which a proactive refresh is attempted.
	#[serde(default, with = "unix_seconds::option", skip_serializing_if = "Option::is_none")]
	pub refresh_on: Option<OffsetDateTime>,
	/// Token type, usually `Bearer`.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub token_type: Option<String>,
	/// Members written by other library versions.
	#[serde(flatten)]
	pub extra: Extra,
}
impl AccessTokenRecord {
	/// Returns a builder for a token issued to `client_id` by `environment`/`realm`.
	pub fn builder(
		environment: Environment,
		client_id: ClientId,
		realm: TenantId,
		target: ScopeSet,
	) -> AccessTokenRecordBuilder {
		AccessTokenRecordBuilder::new(environment, client_id, realm, target)
	}

	/// Cache key for this record.
	pub fn key(&self) -> CredentialKey {
		CredentialKey::compose(
			CredentialType::AccessToken,
			&self.environment,
			&self.client_id,
			Some(&self.realm),
			self.home_account_id.as_deref(),
			Some(&self.target),
		)
	}

	/// Effective extended expiry; equal to `expires_on` when no extension was granted.
	pub fn extended_expires_on(&self) -> OffsetDateTime {
		self.extended_expires_on.map_or(self.expires_on, |ext| ext.max(self.expires_on))
	}

	/// `true` once `instant` is inside the `buffer` before hard expiry.
	pub fn is_expired_at(&self, instant: OffsetDateTime, buffer: Duration) -> bool {
		instant >= self.expires_on - buffer
	}

	/// `true` once the soft refresh marker has passed.
	///
	/// Records written before the marker existed have none and are always due.
	pub fn is_refresh_due_at(&self, instant: OffsetDateTime) -> bool {
		self.refresh_on.is_none_or(|refresh_on| instant >= refresh_on)
	}

	/// `true` while the extended lifetime still covers `instant` and actually extends the token.
	pub fn is_within_extended_lifetime_at(&self, instant: OffsetDateTime) -> bool {
		let extended = self.extended_expires_on();

		extended > self.expires_on && instant < extended
	}

	/// `true` when the record belongs to the given account (`None` means app-only).
	pub fn belongs_to(&self, home_account_id: Option<&HomeAccountId>) -> bool {
		self.home_account_id.as_ref() == home_account_id
	}
}
impl Debug for AccessTokenRecord {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AccessTokenRecord")
			.field("home_account_id", &self.home_account_id)
			.field("environment", &self.environment)
			.field("client_id", &self.client_id)
			.field("realm", &self.realm)
			.field("target", &self.target)
			.field("secret", &self.secret)
			.field("cached_at", &self.cached_at)
			.field("expires_on", &self.expires_on)
			.field("extended_expires_on", &self.extended_expires_on)
			.field("refresh_on", &self.refresh_on)
			.finish_non_exhaustive()
	}
}

/// Builder for [`AccessTokenRecord`].
#[derive(Clone, Debug)]
pub struct AccessTokenRecordBuilder {
	environment: Environment,
	client_id: ClientId,
	realm: TenantId,
	target: ScopeSet,
	home_account_id: Option<HomeAccountId>,
	secret: Option<TokenSecret>,
	cached_at: Option<OffsetDateTime>,
	expires_on: Option<OffsetDateTime>,
	expires_in: Option<Duration>,
	extended_expires_in: Option<Duration>,
	refresh_in: Option<Duration>,
	refresh_policy: RefreshPolicy,
	token_type: Option<String>,
}
impl AccessTokenRecordBuilder {
	fn new(environment: Environment, client_id: ClientId, realm: TenantId, target: ScopeSet) -> Self {
		Self {
			environment,
			client_id,
			realm,
			target,
			home_account_id: None,
			secret: None,
			cached_at: None,
			expires_on: None,
			expires_in: None,
			extended_expires_in: None,
			refresh_in: None,
			refresh_policy: RefreshPolicy::default(),
			token_type: None,
		}
	}

	/// Binds the token to an account.
	pub fn home_account_id(mut self, home_account_id: Option<HomeAccountId>) -> Self {
		self.home_account_id = home_account_id;

		self
	}

	/// Provides the access token value.
	pub fn secret(mut self, secret: impl Into<String>) -> Self {
		self.secret = Some(TokenSecret::new(secret));

		self
	}

	/// Sets the cached-at instant; defaults to the current clock.
	pub fn cached_at(mut self, instant: OffsetDateTime) -> Self {
		self.cached_at = Some(instant);

		self
	}

	/// Sets an absolute expiry instant.
	pub fn expires_on(mut self, instant: OffsetDateTime) -> Self {
		self.expires_on = Some(instant);

		self
	}

	/// Sets a relative expiry from the cached-at instant.
	pub fn expires_in(mut self, duration: Duration) -> Self {
		self.expires_in = Some(duration);

		self
	}

	/// Sets the extended lifetime (`ext_expires_in`) relative to the cached-at instant.
	pub fn extended_expires_in(mut self, duration: Option<Duration>) -> Self {
		self.extended_expires_in = duration;

		self
	}

	/// Uses the authority's `refresh_in` hint instead of the policy fraction.
	pub fn refresh_in(mut self, duration: Option<Duration>) -> Self {
		self.refresh_in = duration;

		self
	}

	/// Policy used to derive `refresh_on` when the authority gives no hint.
	pub fn refresh_policy(mut self, policy: RefreshPolicy) -> Self {
		self.refresh_policy = policy;

		self
	}

	/// Sets the token type.
	pub fn token_type(mut self, token_type: Option<String>) -> Self {
		self.token_type = token_type;

		self
	}

	/// Consumes the builder and produces an [`AccessTokenRecord`].
	///
	/// Instants are truncated to whole seconds, matching the persisted precision.
	pub fn build(self) -> Result<AccessTokenRecord, RecordBuilderError> {
		let secret = self.secret.ok_or(RecordBuilderError::MissingSecret)?;
		let cached_at = truncate_to_seconds(self.cached_at.unwrap_or_else(OffsetDateTime::now_utc));
		let expires_on = match (self.expires_on, self.expires_in) {
			(Some(instant), _) => truncate_to_seconds(instant),
			(None, Some(delta)) =>
				cached_at.checked_add(delta).ok_or(RecordBuilderError::ExpiryOutOfRange)?,
			(None, None) => return Err(RecordBuilderError::MissingExpiry),
		};

		if expires_on <= cached_at {
			return Err(RecordBuilderError::NonPositiveLifetime);
		}

		// An unrepresentable extension counts as no extension.
		let extended_expires_on = self
			.extended_expires_in
			.and_then(|delta| cached_at.checked_add(delta))
			.map(truncate_to_seconds)
			.filter(|ext| *ext > expires_on);
		let refresh_on =
			self.refresh_policy.refresh_on(cached_at, expires_on, self.refresh_in).map(truncate_to_seconds);

		Ok(AccessTokenRecord {
			home_account_id: self.home_account_id,
			environment: self.environment,
			client_id: self.client_id,
			realm: self.realm,
			target: self.target,
			secret,
			cached_at,
			expires_on,
			extended_expires_on,
			refresh_on,
			token_type: self.token_type,
			extra: Extra::new(),
		})
	}
}

/// Scope-agnostic refresh token for one (environment, client or family, account).
#[derive(Clone, Serialize, Deserialize)]
pub struct RefreshTokenRecord {
	/// Owning account.
	pub home_account_id: HomeAccountId,
	/// Cloud instance that issued the token.
	pub environment: Environment,
	/// Application that obtained the token.
	pub client_id: ClientId,
	/// Raw token value.
	pub secret: TokenSecret,
	/// Client family the token is shared with, if any.
	#[serde(default, deserialize_with = "empty_as_none", skip_serializing_if = "Option::is_none")]
	pub family_id: Option<String>,
	/// Members written by other library versions.
	#[serde(flatten)]
	pub extra: Extra,
}
impl RefreshTokenRecord {
	/// Creates a record with no family membership.
	pub fn new(
		home_account_id: HomeAccountId,
		environment: Environment,
		client_id: ClientId,
		secret: impl Into<String>,
	) -> Self {
		Self {
			home_account_id,
			environment,
			client_id,
			secret: TokenSecret::new(secret),
			family_id: None,
			extra: Extra::new(),
		}
	}

	/// Cache key; family tokens are keyed by the family id instead of the client id.
	pub fn key(&self) -> CredentialKey {
		CredentialKey::compose(
			CredentialType::RefreshToken,
			&self.environment,
			self.family_id.as_deref().unwrap_or(&self.client_id),
			None,
			Some(&self.home_account_id),
			None,
		)
	}

	/// `true` when the token is shared across a client family.
	pub fn is_family_token(&self) -> bool {
		self.family_id.is_some()
	}
}
impl Debug for RefreshTokenRecord {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RefreshTokenRecord")
			.field("home_account_id", &self.home_account_id)
			.field("environment", &self.environment)
			.field("client_id", &self.client_id)
			.field("secret", &self.secret)
			.field("family_id", &self.family_id)
			.finish_non_exhaustive()
	}
}

/// Raw id token cached per (environment, client, account, realm).
#[derive(Clone, Serialize, Deserialize)]
pub struct IdTokenRecord {
	/// Owning account.
	pub home_account_id: HomeAccountId,
	/// Cloud instance that issued the token.
	pub environment: Environment,
	/// Application the token was issued to.
	pub client_id: ClientId,
	/// Tenant that issued the token.
	pub realm: TenantId,
	/// Raw compact JWT.
	pub secret: TokenSecret,
	/// Members written by other library versions.
	#[serde(flatten)]
	pub extra: Extra,
}
impl IdTokenRecord {
	/// Cache key for this record.
	pub fn key(&self) -> CredentialKey {
		CredentialKey::compose(
			CredentialType::IdToken,
			&self.environment,
			&self.client_id,
			Some(&self.realm),
			Some(&self.home_account_id),
			None,
		)
	}
}
impl Debug for IdTokenRecord {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("IdTokenRecord")
			.field("home_account_id", &self.home_account_id)
			.field("environment", &self.environment)
			.field("client_id", &self.client_id)
			.field("realm", &self.realm)
			.finish_non_exhaustive()
	}
}

/// Tenant profile of an account, used for account enumeration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccountRecord {
	/// Cross-tenant account id.
	pub home_account_id: HomeAccountId,
	/// Cloud instance the account signed in to.
	pub environment: Environment,
	/// Tenant of this profile.
	pub realm: TenantId,
	/// Object id within `realm`.
	#[serde(default)]
	pub local_account_id: String,
	/// Displayable identifier (UPN or e-mail).
	#[serde(default)]
	pub username: String,
	/// Display name, if the id token carried one.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	/// Authority flavour; always `MSSTS` for records written here.
	#[serde(default = "AccountRecord::default_authority_type")]
	pub authority_type: String,
	/// Raw `client_info` the account was derived from.
	#[serde(default, deserialize_with = "empty_as_none", skip_serializing_if = "Option::is_none")]
	pub client_info: Option<String>,
	/// Members written by other library versions.
	#[serde(flatten)]
	pub extra: Extra,
}
impl AccountRecord {
	fn default_authority_type() -> String {
		"MSSTS".into()
	}

	/// Builds the record for `identity` as seen from `realm`.
	pub fn from_identity(identity: &AccountIdentity, realm: TenantId, client_info: Option<String>) -> Self {
		Self {
			home_account_id: identity.home_account_id.clone(),
			environment: identity.environment.clone(),
			realm,
			local_account_id: identity.local_account_id.clone().unwrap_or_default(),
			username: identity.username.clone().unwrap_or_default(),
			name: None,
			authority_type: Self::default_authority_type(),
			client_info,
			extra: Extra::new(),
		}
	}

	/// Cache key for this record.
	pub fn key(&self) -> CredentialKey {
		CredentialKey::compose(
			CredentialType::Account,
			&self.environment,
			"",
			Some(&self.realm),
			Some(&self.home_account_id),
			None,
		)
	}

	/// Public identity view of this record.
	pub fn identity(&self) -> AccountIdentity {
		AccountIdentity {
			home_account_id: self.home_account_id.clone(),
			environment: self.environment.clone(),
			username: Some(self.username.clone()).filter(|u| !u.is_empty()),
			local_account_id: Some(self.local_account_id.clone()).filter(|id| !id.is_empty()),
			tenant_id: Some(self.realm.clone()),
		}
	}
}

/// Per-application metadata. Survives [`CacheStore::clear`](crate::cache::CacheStore::clear).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppMetadataRecord {
	/// Cloud instance.
	pub environment: Environment,
	/// Application id.
	pub client_id: ClientId,
	/// Client family the application belongs to, if any.
	#[serde(default, deserialize_with = "empty_as_none", skip_serializing_if = "Option::is_none")]
	pub family_id: Option<String>,
	/// Members written by other library versions.
	#[serde(flatten)]
	pub extra: Extra,
}
impl AppMetadataRecord {
	/// Creates metadata for `client_id` in `environment`.
	pub fn new(environment: Environment, client_id: ClientId, family_id: Option<String>) -> Self {
		Self { environment, client_id, family_id, extra: Extra::new() }
	}

	/// Cache key for this record.
	pub fn key(&self) -> CredentialKey {
		CredentialKey::compose(CredentialType::AppMetadata, &self.environment, &self.client_id, None, None, None)
	}
}

pub(crate) fn truncate_to_seconds(instant: OffsetDateTime) -> OffsetDateTime {
	instant - Duration::nanoseconds(i64::from(instant.nanosecond()))
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	fn builder() -> AccessTokenRecordBuilder {
		AccessTokenRecord::builder(
			Environment::new("login.microsoftonline.com").expect("Environment fixture is valid."),
			ClientId::new("client").expect("Client fixture is valid."),
			TenantId::new("tenant").expect("Tenant fixture is valid."),
			ScopeSet::from_str("r1/scope1").expect("Scope fixture is valid."),
		)
	}

	#[test]
	fn builder_derives_refresh_on_from_policy_and_hint() {
		let cached_at = macros::datetime!(2025-01-01 00:00:00.750 UTC);
		let record = builder()
			.secret("at")
			.cached_at(cached_at)
			.expires_in(Duration::hours(1))
			.extended_expires_in(Some(Duration::hours(2)))
			.build()
			.expect("Builder should succeed with relative expiry.");

		assert_eq!(record.cached_at, macros::datetime!(2025-01-01 00:00 UTC));
		assert_eq!(record.expires_on, macros::datetime!(2025-01-01 01:00 UTC));
		assert_eq!(record.refresh_on, Some(macros::datetime!(2025-01-01 00:30 UTC)));
		assert_eq!(record.extended_expires_on(), macros::datetime!(2025-01-01 02:00 UTC));

		let hinted = builder()
			.secret("at")
			.cached_at(cached_at)
			.expires_in(Duration::hours(1))
			.refresh_in(Some(Duration::minutes(50)))
			.build()
			.expect("Builder should honor refresh_in.");

		assert_eq!(hinted.refresh_on, Some(macros::datetime!(2025-01-01 00:50 UTC)));
		assert_eq!(hinted.extended_expires_on(), hinted.expires_on);
	}

	#[test]
	fn builder_rejects_incomplete_input() {
		assert_eq!(
			builder().expires_in(Duration::hours(1)).build().expect_err("Secret is required."),
			RecordBuilderError::MissingSecret
		);
		assert_eq!(builder().secret("at").build().expect_err("Expiry is required."), RecordBuilderError::MissingExpiry);
		assert_eq!(
			builder().secret("at").expires_in(Duration::ZERO).build().expect_err("Zero lifetime is invalid."),
			RecordBuilderError::NonPositiveLifetime
		);
	}

	#[test]
	fn builder_rejects_unrepresentable_lifetimes_without_panicking() {
		assert_eq!(
			builder()
				.secret("at")
				.expires_in(Duration::seconds(9_000_000_000_000))
				.build()
				.expect_err("Expiry beyond the calendar range is invalid."),
			RecordBuilderError::ExpiryOutOfRange
		);
		assert!(matches!(
			Error::from(RecordBuilderError::ExpiryOutOfRange),
			Error::Client(ClientError::InvalidExpiresIn)
		));

		let record = builder()
			.secret("at")
			.cached_at(macros::datetime!(2025-01-01 00:00 UTC))
			.expires_in(Duration::hours(1))
			.extended_expires_in(Some(Duration::seconds(9_000_000_000_000)))
			.refresh_in(Some(Duration::seconds(9_000_000_000_000)))
			.build()
			.expect("Oversized hints should be dropped or clamped.");

		assert_eq!(record.extended_expires_on, None);
		assert_eq!(record.refresh_on, Some(macros::datetime!(2025-01-01 00:59:59 UTC)));
	}

	#[test]
	fn status_helpers_cover_refresh_window_and_extension() {
		let mut record = builder()
			.secret("at")
			.cached_at(macros::datetime!(2025-01-01 00:00 UTC))
			.expires_in(Duration::hours(1))
			.extended_expires_in(Some(Duration::hours(3)))
			.build()
			.expect("Builder should succeed.");
		let buffer = Duration::minutes(5);

		assert!(!record.is_refresh_due_at(macros::datetime!(2025-01-01 00:10 UTC)));
		assert!(record.is_refresh_due_at(macros::datetime!(2025-01-01 00:30 UTC)));
		assert!(!record.is_expired_at(macros::datetime!(2025-01-01 00:54 UTC), buffer));
		assert!(record.is_expired_at(macros::datetime!(2025-01-01 00:55 UTC), buffer));
		assert!(record.is_within_extended_lifetime_at(macros::datetime!(2025-01-01 02:00 UTC)));
		assert!(!record.is_within_extended_lifetime_at(macros::datetime!(2025-01-01 03:00 UTC)));

		record.refresh_on = None;

		assert!(record.is_refresh_due_at(macros::datetime!(2025-01-01 00:01 UTC)));
	}

	#[test]
	fn refresh_token_keys_follow_family_membership() {
		let mut record = RefreshTokenRecord::new(
			HomeAccountId::new("uid.utid").expect("Home fixture is valid."),
			Environment::new("login.microsoftonline.com").expect("Environment fixture is valid."),
			ClientId::new("client").expect("Client fixture is valid."),
			"rt",
		);

		assert_eq!(record.key().as_str(), "uid.utid-login.microsoftonline.com-refreshtoken-client--");

		record.family_id = Some("1".into());

		assert!(record.is_family_token());
		assert_eq!(record.key().as_str(), "uid.utid-login.microsoftonline.com-refreshtoken-1--");
		assert!(!format!("{record:?}").contains("rt\""));
	}
}
