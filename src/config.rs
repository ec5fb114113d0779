//! Application configuration and the refresh-ahead policy.

// self
use crate::{_prelude::*, auth::ClientId, authority::Authority};

const MAX_TRANSIENT_RETRY_BUDGET: u8 = 5;

/// Errors raised while validating an [`ApplicationConfig`].
#[derive(Clone, Debug, PartialEq, ThisError)]
pub enum ConfigError {
	/// The refresh fraction must lie in `(0, 1]`.
	#[error("Refresh fraction must be in (0, 1], got {value}.")]
	InvalidRefreshFraction {
		/// Rejected value.
		value: f64,
	},
	/// The transient retry budget exceeds the supported maximum.
	#[error("Transient retry budget {budget} exceeds the maximum of {max}.")]
	RetryBudgetTooLarge {
		/// Requested budget.
		budget: u8,
		/// Allowed maximum.
		max: u8,
	},
	/// The expiration buffer cannot be negative.
	#[error("Expiration buffer cannot be negative.")]
	NegativeExpirationBuffer,
	/// A capacity bound of zero would evict every token.
	#[error("Access-token capacity must be at least one.")]
	ZeroCapacity,
}
impl From<ConfigError> for Error {
	fn from(e: ConfigError) -> Self {
		Self::invalid_argument("config", e.to_string())
	}
}

/// Decides when a cached access token becomes due for a proactive refresh.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RefreshPolicy {
	/// Share of the token lifetime after which a refresh is attempted.
	pub refresh_fraction: f64,
}
impl RefreshPolicy {
	/// Creates a policy after validating the fraction.
	pub fn new(refresh_fraction: f64) -> Result<Self, ConfigError> {
		let policy = Self { refresh_fraction };

		policy.validate()?;

		Ok(policy)
	}

	/// Computes `refresh_on` for a token cached at `cached_at` and expiring at `expires_on`.
	///
	/// A positive `refresh_in` hint from the authority wins over the fraction. The result is
	/// clamped to `[cached_at, expires_on - 1s]`; `None` when the lifetime is not positive.
	pub fn refresh_on(
		&self,
		cached_at: OffsetDateTime,
		expires_on: OffsetDateTime,
		refresh_in: Option<Duration>,
	) -> Option<OffsetDateTime> {
		let lifetime = expires_on - cached_at;

		if !lifetime.is_positive() {
			return None;
		}

		let candidate = match refresh_in {
			Some(hint) if hint.is_positive() => cached_at.checked_add(hint).unwrap_or(expires_on),
			_ => cached_at + lifetime * self.refresh_fraction,
		};

		Some(candidate.min(expires_on - Duration::SECOND).max(cached_at))
	}

	fn validate(&self) -> Result<(), ConfigError> {
		if self.refresh_fraction > 0. && self.refresh_fraction <= 1. {
			Ok(())
		} else {
			Err(ConfigError::InvalidRefreshFraction { value: self.refresh_fraction })
		}
	}
}
impl Default for RefreshPolicy {
	fn default() -> Self {
		Self { refresh_fraction: 0.5 }
	}
}

/// Validated, immutable configuration of one client application.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ApplicationConfigBuilder")]
pub struct ApplicationConfig {
	/// Application id registered with the authority.
	pub client_id: ClientId,
	/// Default authority for requests that do not override it.
	pub authority: Authority,
	/// Serve tokens past `expires_on` (up to `extended_expires_on`) while the authority is down.
	pub extended_lifetime_enabled: bool,
	/// Refresh-ahead policy.
	pub refresh_policy: RefreshPolicy,
	/// Window before `expires_on` in which a cached token is no longer handed out.
	#[serde(with = "duration_seconds")]
	pub expiration_buffer: Duration,
	/// Extra attempts after a transient failure.
	pub transient_retry_budget: u8,
	/// Optional bound on cached access tokens.
	pub max_access_tokens: Option<usize>,
	/// Capabilities advertised to the authority (e.g. `cp1`).
	pub client_capabilities: Vec<String>,
}
impl ApplicationConfig {
	/// Creates a builder seeded with the required members.
	pub fn builder(client_id: ClientId, authority: Authority) -> ApplicationConfigBuilder {
		ApplicationConfigBuilder::new(client_id, authority)
	}
}
impl TryFrom<ApplicationConfigBuilder> for ApplicationConfig {
	type Error = ConfigError;

	fn try_from(builder: ApplicationConfigBuilder) -> Result<Self, Self::Error> {
		builder.build()
	}
}

/// Builder for [`ApplicationConfig`]; also the shape accepted when deserializing.
#[derive(Clone, Debug, Deserialize)]
pub struct ApplicationConfigBuilder {
	/// Application id registered with the authority.
	pub client_id: ClientId,
	/// Default authority.
	pub authority: Authority,
	/// Stale-token fallback toggle.
	#[serde(default)]
	pub extended_lifetime_enabled: bool,
	/// Refresh-ahead policy.
	#[serde(default)]
	pub refresh_policy: RefreshPolicy,
	/// Expiration buffer.
	#[serde(default = "default_expiration_buffer", with = "duration_seconds")]
	pub expiration_buffer: Duration,
	/// Extra attempts after a transient failure.
	#[serde(default = "default_retry_budget")]
	pub transient_retry_budget: u8,
	/// Optional bound on cached access tokens.
	#[serde(default)]
	pub max_access_tokens: Option<usize>,
	/// Client capabilities.
	#[serde(default)]
	pub client_capabilities: Vec<String>,
}
impl ApplicationConfigBuilder {
	/// Creates a builder with defaults for every optional member.
	pub fn new(client_id: ClientId, authority: Authority) -> Self {
		Self {
			client_id,
			authority,
			extended_lifetime_enabled: false,
			refresh_policy: RefreshPolicy::default(),
			expiration_buffer: default_expiration_buffer(),
			transient_retry_budget: default_retry_budget(),
			max_access_tokens: None,
			client_capabilities: Vec::new(),
		}
	}

	/// Enables or disables the extended-lifetime fallback.
	pub fn extended_lifetime_enabled(mut self, enabled: bool) -> Self {
		self.extended_lifetime_enabled = enabled;

		self
	}

	/// Overrides the refresh-ahead policy.
	pub fn refresh_policy(mut self, policy: RefreshPolicy) -> Self {
		self.refresh_policy = policy;

		self
	}

	/// Overrides the expiration buffer.
	pub fn expiration_buffer(mut self, buffer: Duration) -> Self {
		self.expiration_buffer = buffer;

		self
	}

	/// Overrides the transient retry budget.
	pub fn transient_retry_budget(mut self, budget: u8) -> Self {
		self.transient_retry_budget = budget;

		self
	}

	/// Bounds the number of cached access tokens.
	pub fn max_access_tokens(mut self, max: usize) -> Self {
		self.max_access_tokens = Some(max);

		self
	}

	/// Advertises client capabilities.
	pub fn client_capabilities<I, S>(mut self, capabilities: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.client_capabilities = capabilities.into_iter().map(Into::into).collect();

		self
	}

	/// Consumes the builder and validates the resulting configuration.
	pub fn build(self) -> Result<ApplicationConfig, ConfigError> {
		self.refresh_policy.validate()?;

		if self.transient_retry_budget > MAX_TRANSIENT_RETRY_BUDGET {
			return Err(ConfigError::RetryBudgetTooLarge {
				budget: self.transient_retry_budget,
				max: MAX_TRANSIENT_RETRY_BUDGET,
			});
		}
		if self.expiration_buffer.is_negative() {
			return Err(ConfigError::NegativeExpirationBuffer);
		}
		if self.max_access_tokens == Some(0) {
			return Err(ConfigError::ZeroCapacity);
		}

		Ok(ApplicationConfig {
			client_id: self.client_id,
			authority: self.authority,
			extended_lifetime_enabled: self.extended_lifetime_enabled,
			refresh_policy: self.refresh_policy,
			expiration_buffer: self.expiration_buffer,
			transient_retry_budget: self.transient_retry_budget,
			max_access_tokens: self.max_access_tokens,
			client_capabilities: self.client_capabilities,
		})
	}
}

fn default_expiration_buffer() -> Duration {
	Duration::minutes(5)
}

fn default_retry_budget() -> u8 {
	1
}

mod duration_seconds {
	// crates.io
	use serde::{Deserializer, Serializer};
	// self
	use super::*;

	pub(super) fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_i64(duration.whole_seconds())
	}

	pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
	where
		D: Deserializer<'de>,
	{
		Ok(Duration::seconds(i64::deserialize(deserializer)?))
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	fn builder() -> ApplicationConfigBuilder {
		ApplicationConfig::builder(
			ClientId::new("client").expect("Client fixture is valid."),
			Authority::parse("https://login.microsoftonline.com/common")
				.expect("Authority fixture is valid."),
		)
	}

	#[test]
	fn defaults_match_documented_values() {
		let config = builder().build().expect("Default configuration should validate.");

		assert!(!config.extended_lifetime_enabled);
		assert_eq!(config.refresh_policy.refresh_fraction, 0.5);
		assert_eq!(config.expiration_buffer, Duration::minutes(5));
		assert_eq!(config.transient_retry_budget, 1);
		assert_eq!(config.max_access_tokens, None);
	}

	#[test]
	fn builder_rejects_out_of_range_values() {
		assert!(matches!(
			builder().refresh_policy(RefreshPolicy { refresh_fraction: 0. }).build(),
			Err(ConfigError::InvalidRefreshFraction { .. })
		));
		assert!(RefreshPolicy::new(1.5).is_err());
		assert!(RefreshPolicy::new(1.).is_ok());
		assert!(matches!(
			builder().transient_retry_budget(6).build(),
			Err(ConfigError::RetryBudgetTooLarge { budget: 6, max: 5 })
		));
		assert_eq!(
			builder().expiration_buffer(Duration::seconds(-1)).build(),
			Err(ConfigError::NegativeExpirationBuffer)
		);
		assert_eq!(builder().max_access_tokens(0).build(), Err(ConfigError::ZeroCapacity));
	}

	#[test]
	fn config_deserializes_through_validation() {
		let config: ApplicationConfig = serde_json::from_str(
			r#"{
				"client_id": "client",
				"authority": "https://login.microsoftonline.com/tenant",
				"extended_lifetime_enabled": true,
				"expiration_buffer": 60
			}"#,
		)
		.expect("Configuration JSON should deserialize.");

		assert!(config.extended_lifetime_enabled);
		assert_eq!(config.expiration_buffer, Duration::minutes(1));

		let round_trip: ApplicationConfig =
			serde_json::from_str(&serde_json::to_string(&config).expect("Config should serialize."))
				.expect("Serialized config should deserialize.");

		assert_eq!(round_trip, config);
		assert!(
			serde_json::from_str::<ApplicationConfig>(
				r#"{"client_id":"c","authority":"https://login.microsoftonline.com/t","transient_retry_budget":9}"#
			)
			.is_err()
		);
	}

	#[test]
	fn refresh_on_is_clamped_before_expiry() {
		let cached = macros::datetime!(2025-01-01 00:00 UTC);
		let expires = macros::datetime!(2025-01-01 01:00 UTC);
		let policy = RefreshPolicy::default();

		assert_eq!(policy.refresh_on(cached, expires, None), Some(macros::datetime!(2025-01-01 00:30 UTC)));
		assert_eq!(
			policy.refresh_on(cached, expires, Some(Duration::hours(2))),
			Some(macros::datetime!(2025-01-01 00:59:59 UTC))
		);
		assert_eq!(
			RefreshPolicy { refresh_fraction: 1. }.refresh_on(cached, expires, None),
			Some(macros::datetime!(2025-01-01 00:59:59 UTC))
		);
		assert_eq!(policy.refresh_on(expires, cached, None), None);
		assert_eq!(
			policy.refresh_on(cached, expires, Some(Duration::seconds(i64::MAX))),
			Some(macros::datetime!(2025-01-01 00:59:59 UTC))
		);
	}
}
