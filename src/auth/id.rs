//! Strongly typed identifiers shared by cache keys, records, and requests.

// std
use std::{borrow::Borrow, ops::Deref};
// self
use crate::_prelude::*;

macro_rules! def_id {
	($name:ident, $doc:literal, $kind:literal, $normalize:expr) => {
		#[doc = $doc]
		#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
		#[serde(try_from = "String", into = "String")]
		pub struct $name(String);
		impl $name {
			/// Creates a new identifier after validation.
			pub fn new(value: impl AsRef<str>) -> Result<Self, IdentifierError> {
				let view = value.as_ref();

				validate_view($kind, view)?;

				Ok(Self($normalize(view)))
			}
		}
		impl Deref for $name {
			type Target = str;

			fn deref(&self) -> &Self::Target {
				&self.0
			}
		}
		impl AsRef<str> for $name {
			fn as_ref(&self) -> &str {
				&self.0
			}
		}
		impl From<$name> for String {
			fn from(value: $name) -> Self {
				value.0
			}
		}
		impl TryFrom<String> for $name {
			type Error = IdentifierError;

			fn try_from(value: String) -> Result<Self, Self::Error> {
				Self::new(value)
			}
		}
		impl Borrow<str> for $name {
			fn borrow(&self) -> &str {
				&self.0
			}
		}
		impl Debug for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				write!(f, concat!(stringify!($name), "({})"), self.0)
			}
		}
		impl Display for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				f.write_str(&self.0)
			}
		}
		impl FromStr for $name {
			type Err = IdentifierError;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				Self::new(s)
			}
		}
	};
}

const IDENTIFIER_MAX_LEN: usize = 128;

/// Error returned when identifier validation fails.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ThisError)]
pub enum IdentifierError {
	/// The identifier was empty.
	#[error("{kind} identifier cannot be empty.")]
	Empty {
		/// Kind of identifier (client, tenant, environment, account).
		kind: &'static str,
	},
	/// The identifier contains whitespace characters.
	#[error("{kind} identifier contains whitespace.")]
	ContainsWhitespace {
		/// Kind of identifier (client, tenant, environment, account).
		kind: &'static str,
	},
	/// The identifier exceeded the allowed character count.
	#[error("{kind} identifier exceeds {max} characters.")]
	TooLong {
		/// Kind of identifier (client, tenant, environment, account).
		kind: &'static str,
		/// Maximum permitted character count.
		max: usize,
	},
}
impl IdentifierError {
	/// Name of the request argument the identifier came from.
	pub fn argument(&self) -> &'static str {
		let kind = match self {
			Self::Empty { kind } | Self::ContainsWhitespace { kind } | Self::TooLong { kind, .. } =>
				*kind,
		};

		match kind {
			"Client" => "client_id",
			"Tenant" => "tenant_id",
			"Environment" => "environment",
			"Account" => "home_account_id",
			_ => "identifier",
		}
	}
}

def_id! { ClientId, "Application (client) identifier registered with the authority.", "Client", str::to_owned }
def_id! { TenantId, "Tenant (realm) identifier, or one of the multi-tenant aliases.", "Tenant", str::to_owned }
def_id! {
	HomeAccountId,
	"Cross-tenant account identifier composed as `objectId.tenantId`.",
	"Account",
	str::to_owned
}
def_id! {
	Environment,
	"Cloud instance host partitioning cache entries; always lower-cased.",
	"Environment",
	str::to_ascii_lowercase
}

impl TenantId {
	/// Multi-tenant alias accepting work, school, and personal accounts.
	pub const COMMON: &'static str = "common";
	/// Multi-tenant alias accepting personal accounts only.
	pub const CONSUMERS: &'static str = "consumers";
	/// Multi-tenant alias accepting work and school accounts only.
	pub const ORGANIZATIONS: &'static str = "organizations";

	/// Returns `true` for `common`, `organizations`, and `consumers`.
	///
	/// Tokens are never cached under these aliases; the tenant that actually issued the
	/// token is used instead.
	pub fn is_multi_tenant_alias(&self) -> bool {
		[Self::COMMON, Self::ORGANIZATIONS, Self::CONSUMERS]
			.iter()
			.any(|alias| self.0.eq_ignore_ascii_case(alias))
	}
}

fn validate_view(kind: &'static str, view: &str) -> Result<(), IdentifierError> {
	if view.is_empty() {
		return Err(IdentifierError::Empty { kind });
	}
	if view.chars().any(char::is_whitespace) {
		return Err(IdentifierError::ContainsWhitespace { kind });
	}
	if view.len() > IDENTIFIER_MAX_LEN {
		return Err(IdentifierError::TooLong { kind, max: IDENTIFIER_MAX_LEN });
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn identifiers_reject_padding_and_empty_values() {
		assert!(ClientId::new(" client").is_err(), "Leading whitespace must be rejected.");
		assert!(ClientId::new("client ").is_err(), "Trailing whitespace must be rejected.");

		let err = TenantId::new("").expect_err("Empty tenant must be rejected.");

		assert_eq!(err, IdentifierError::Empty { kind: "Tenant" });
		assert_eq!(err.argument(), "tenant_id");

		let nbsp = format!("tenant{}id", '\u{00A0}');

		assert!(TenantId::new(&nbsp).is_err());
		assert!(ClientId::new("a".repeat(IDENTIFIER_MAX_LEN + 1)).is_err());
		ClientId::new("a".repeat(IDENTIFIER_MAX_LEN)).expect("Exact length should succeed.");
	}

	#[test]
	fn environment_is_lower_cased() {
		let env = Environment::new("Login.MicrosoftOnline.COM")
			.expect("Mixed-case environment fixture should be valid.");

		assert_eq!(env.as_ref(), "login.microsoftonline.com");

		let parsed: Environment = serde_json::from_str("\"LOGIN.windows.net\"")
			.expect("Environment should deserialize successfully.");

		assert_eq!(parsed.as_ref(), "login.windows.net");
	}

	#[test]
	fn multi_tenant_aliases_are_detected() {
		for alias in ["common", "Organizations", "CONSUMERS"] {
			let tenant = TenantId::new(alias).expect("Alias fixture should be valid.");

			assert!(tenant.is_multi_tenant_alias(), "{alias} should be a multi-tenant alias.");
		}

		let guid = TenantId::new("72f988bf-86f1-41af-91ab-2d7cd011db47")
			.expect("Tenant GUID fixture should be valid.");

		assert!(!guid.is_multi_tenant_alias());
	}

	#[test]
	fn borrow_supports_fast_lookup() {
		let map: HashMap<ClientId, u8> = HashMap::from_iter([(
			ClientId::new("client-123").expect("Client used for lookup should be valid."),
			7_u8,
		)]);

		assert_eq!(map.get("client-123"), Some(&7));
	}
}
