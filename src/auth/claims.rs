//! Unverified id-token claim extraction.
//!
//! Signature validation is the authority's concern; the cache only needs the identity
//! claims to label accounts.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
// self
use crate::{_prelude::*, auth::HomeAccountId, error::ClientError};

/// Identity claims read from an id token's payload segment.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdTokenClaims {
	/// Object id of the subject in the issuing tenant.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub oid: Option<String>,
	/// Issuing tenant.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub tid: Option<String>,
	/// Subject identifier.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub sub: Option<String>,
	/// Preferred username (v2 tokens).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub preferred_username: Option<String>,
	/// User principal name (v1 tokens).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub upn: Option<String>,
	/// E-mail address.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub email: Option<String>,
	/// Display name.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
}
impl IdTokenClaims {
	/// Decodes the payload segment of a compact JWT without verifying its signature.
	pub fn decode(id_token: &str) -> Result<Self, ClientError> {
		let mut segments = id_token.split('.');
		let payload = match (segments.next(), segments.next()) {
			(Some(_), Some(payload)) if !payload.is_empty() => payload,
			_ =>
				return Err(ClientError::InvalidIdentity {
					reason: "id_token is not a compact JWT".into(),
				}),
		};
		let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).map_err(|e| {
			ClientError::InvalidIdentity { reason: format!("id_token payload is not base64url: {e}") }
		})?;

		serde_json::from_slice(&bytes).map_err(|e| ClientError::InvalidIdentity {
			reason: format!("id_token payload is not valid JSON: {e}"),
		})
	}

	/// Displayable username: `preferred_username`, then `upn`, then `email`.
	pub fn username(&self) -> Option<&str> {
		self.preferred_username.as_deref().or(self.upn.as_deref()).or(self.email.as_deref())
	}

	/// Tenant-local object id: `oid`, then `sub`.
	pub fn local_account_id(&self) -> Option<&str> {
		self.oid.as_deref().or(self.sub.as_deref())
	}

	/// Home account id used when the authority did not return `client_info`.
	pub fn home_account_id(&self) -> Result<Option<HomeAccountId>, ClientError> {
		let id = match (self.local_account_id(), self.tid.as_deref()) {
			(Some(oid), Some(tid)) => Some(HomeAccountId::from_parts(oid, tid)?),
			(Some(sub), None) => Some(HomeAccountId::new(sub)?),
			(None, _) => None,
		};

		Ok(id)
	}
}
