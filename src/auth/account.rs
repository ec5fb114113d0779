//! Account identity derived from `client_info` and id-token claims.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
// self
use crate::{
	_prelude::*,
	auth::{Environment, HomeAccountId, IdTokenClaims, TenantId},
	error::ClientError,
};

impl HomeAccountId {
	/// Composes the identifier from an object id and the tenant that owns the account.
	pub fn from_parts(object_id: &str, tenant_id: &str) -> Result<Self, crate::auth::IdentifierError> {
		Self::new(format!("{object_id}.{tenant_id}"))
	}

	/// Object id segment (`uid`).
	pub fn object_id(&self) -> &str {
		self.split_once('.').map(|(uid, _)| uid).unwrap_or(self.as_ref())
	}

	/// Home tenant segment (`utid`), when the identifier is composite.
	pub fn tenant_id(&self) -> Option<&str> {
		self.split_once('.').map(|(_, utid)| utid)
	}
}

/// Decoded `client_info` response field (`{"uid": ..., "utid": ...}`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
	/// Object id of the account in its home tenant.
	pub uid: String,
	/// Home tenant id.
	pub utid: String,
}
impl ClientInfo {
	/// Decodes the base64url JSON payload; padding is tolerated.
	pub fn decode(raw: &str) -> Result<Self, ClientError> {
		let bytes = URL_SAFE_NO_PAD.decode(raw.trim_end_matches('=')).map_err(|e| {
			ClientError::InvalidIdentity { reason: format!("client_info is not base64url: {e}") }
		})?;

		serde_json::from_slice(&bytes).map_err(|e| ClientError::InvalidIdentity {
			reason: format!("client_info is not valid JSON: {e}"),
		})
	}

	/// Encodes the payload the way the authority emits it.
	pub fn encode(&self) -> String {
		let json = serde_json::json!({ "uid": self.uid, "utid": self.utid });

		URL_SAFE_NO_PAD.encode(json.to_string())
	}

	/// Home account identifier built from `uid.utid`.
	pub fn home_account_id(&self) -> Result<HomeAccountId, ClientError> {
		Ok(HomeAccountId::from_parts(&self.uid, &self.utid)?)
	}
}

/// Subject identity shared across tenants and clouds.
///
/// Equality and hashing consider only [`home_account_id`](Self::home_account_id), so the same
/// person signed into two tenants is still one account.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccountIdentity {
	/// Stable `objectId.tenantId` identifier.
	pub home_account_id: HomeAccountId,
	/// Cloud instance the account was authenticated against.
	pub environment: Environment,
	/// Displayable identifier, usually the UPN or e-mail address.
	pub username: Option<String>,
	/// Object id of the account in the tenant that issued the token.
	pub local_account_id: Option<String>,
	/// Tenant that issued the token.
	pub tenant_id: Option<TenantId>,
}
impl AccountIdentity {
	/// Creates an identity with only the required members populated.
	pub fn new(home_account_id: HomeAccountId, environment: Environment) -> Self {
		Self { home_account_id, environment, username: None, local_account_id: None, tenant_id: None }
	}

	/// Builds the identity from a token response's `client_info`, falling back to id-token
	/// claims when the authority omitted it.
	pub fn from_response(
		environment: Environment,
		client_info: Option<&ClientInfo>,
		claims: Option<&IdTokenClaims>,
	) -> Result<Option<Self>, ClientError> {
		let home_account_id = match (client_info, claims) {
			(Some(info), _) => info.home_account_id()?,
			(None, Some(claims)) => match claims.home_account_id()? {
				Some(id) => id,
				None => return Ok(None),
			},
			(None, None) => return Ok(None),
		};
		let mut identity = Self::new(home_account_id, environment);

		if let Some(claims) = claims {
			identity.username = claims.username().map(str::to_owned);
			identity.local_account_id = claims.local_account_id().map(str::to_owned);
			identity.tenant_id = claims.tid.as_deref().map(TenantId::new).transpose()?;
		}

		Ok(Some(identity))
	}

	/// Returns `true` if the displayable username matches the hint, ignoring case.
	pub fn matches_login_hint(&self, hint: &str) -> bool {
		self.username.as_deref().is_some_and(|username| username.eq_ignore_ascii_case(hint))
	}
}
impl PartialEq for AccountIdentity {
	fn eq(&self, other: &Self) -> bool {
		self.home_account_id == other.home_account_id
	}
}
impl Eq for AccountIdentity {}
impl Hash for AccountIdentity {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.home_account_id.hash(state);
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn client_info_decodes_padded_and_unpadded_payloads() {
		let info = ClientInfo { uid: "uid".into(), utid: "utid".into() };
		let encoded = info.encode();
		let decoded = ClientInfo::decode(&encoded).expect("Unpadded client_info should decode.");

		assert_eq!(decoded, info);

		let padded = format!("{encoded}==");

		assert_eq!(ClientInfo::decode(&padded).expect("Padded client_info should decode."), info);
		assert_eq!(
			info.home_account_id().expect("Home account id should compose.").as_ref(),
			"uid.utid"
		);
		assert!(matches!(
			ClientInfo::decode("!!not-base64!!"),
			Err(ClientError::InvalidIdentity { .. })
		));
	}

	#[test]
	fn home_account_id_splits_into_parts() {
		let id = HomeAccountId::from_parts("oid-1", "tid-1").expect("Fixture should be valid.");

		assert_eq!(id.object_id(), "oid-1");
		assert_eq!(id.tenant_id(), Some("tid-1"));

		let opaque = HomeAccountId::new("opaque").expect("Opaque fixture should be valid.");

		assert_eq!(opaque.object_id(), "opaque");
		assert_eq!(opaque.tenant_id(), None);
	}

	#[test]
	fn identities_compare_by_home_account_id_only() {
		let env = Environment::new("login.microsoftonline.com").expect("Env fixture is valid.");
		let home = HomeAccountId::new("uid.utid").expect("Home fixture is valid.");
		let mut lhs = AccountIdentity::new(home.clone(), env.clone());
		let mut rhs = AccountIdentity::new(home, env);

		lhs.username = Some("alice@contoso.com".into());
		rhs.username = Some("alias@contoso.com".into());

		assert_eq!(lhs, rhs);
		assert!(lhs.matches_login_hint("ALICE@contoso.com"));
		assert!(!rhs.matches_login_hint("alice@contoso.com"));
	}
}
