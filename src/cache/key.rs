//! Deterministic composite keys partitioning the cache.

// std
use std::borrow::Borrow;
// self
use crate::{_prelude::*, auth::ScopeSet};

/// Record kind encoded in every credential key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CredentialType {
	/// Access token scoped to a resource.
	AccessToken,
	/// Scope-agnostic refresh token.
	RefreshToken,
	/// OIDC id token.
	IdToken,
	/// Account (tenant profile) metadata.
	Account,
	/// Per-application metadata such as the client family.
	AppMetadata,
}
impl CredentialType {
	/// Lower-cased tag used inside keys.
	pub const fn key_tag(self) -> &'static str {
		match self {
			Self::AccessToken => "accesstoken",
			Self::RefreshToken => "refreshtoken",
			Self::IdToken => "idtoken",
			Self::Account => "account",
			Self::AppMetadata => "appmetadata",
		}
	}

	/// Section name used in the persisted envelope.
	pub const fn section(self) -> &'static str {
		match self {
			Self::AccessToken => "AccessToken",
			Self::RefreshToken => "RefreshToken",
			Self::IdToken => "IdToken",
			Self::Account => "Account",
			Self::AppMetadata => "AppMetadata",
		}
	}
}

/// Lower-cased composite key identifying one cache record.
///
/// Credentials use `{home_account_id}-{environment}-{credential_type}-{client_id}-{realm}-{target}`;
/// accounts use `{home_account_id}-{environment}-{realm}` and app metadata
/// `appmetadata-{environment}-{client_id}`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialKey(String);
impl CredentialKey {
	/// Derives the key for a record, validating the required components.
	///
	/// `environment` is always required; `client_id` is required for everything except
	/// account records. Optional parts may be omitted and render as empty segments.
	pub fn derive(
		credential_type: CredentialType,
		environment: &str,
		client_id: &str,
		realm: Option<&str>,
		home_account_id: Option<&str>,
		target: Option<&ScopeSet>,
	) -> Result<Self> {
		if environment.trim().is_empty() {
			return Err(Error::invalid_argument("environment", "environment must not be empty"));
		}
		if credential_type != CredentialType::Account && client_id.trim().is_empty() {
			return Err(Error::invalid_argument("client_id", "client_id must not be empty"));
		}

		Ok(Self::compose(credential_type, environment, client_id, realm, home_account_id, target))
	}

	pub(crate) fn compose(
		credential_type: CredentialType,
		environment: &str,
		client_id: &str,
		realm: Option<&str>,
		home_account_id: Option<&str>,
		target: Option<&ScopeSet>,
	) -> Self {
		let home = home_account_id.unwrap_or_default();
		let realm = realm.unwrap_or_default();
		let raw = match credential_type {
			CredentialType::Account => format!("{home}-{environment}-{realm}"),
			CredentialType::AppMetadata => format!("appmetadata-{environment}-{client_id}"),
			CredentialType::AccessToken | CredentialType::RefreshToken | CredentialType::IdToken => {
				let target = target.map(ScopeSet::key_target).unwrap_or_default();

				format!(
					"{home}-{environment}-{}-{client_id}-{realm}-{target}",
					credential_type.key_tag()
				)
			},
		};

		Self(raw.to_ascii_lowercase())
	}

	/// Borrowed string form.
	pub fn as_str(&self) -> &str {
		&self.0
	}
}
impl Borrow<str> for CredentialKey {
	fn borrow(&self) -> &str {
		&self.0
	}
}
impl Display for CredentialKey {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(&self.0)
	}
}
