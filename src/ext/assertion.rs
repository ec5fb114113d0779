//! Confidential-client credentials and the client-assertion seam.

// self
use crate::{
	_prelude::*,
	auth::{ClientId, TokenSecret},
	oauth::ClientAuthentication,
};

/// Builds signed client assertions (`private_key_jwt`).
///
/// Certificate handling and JWT signing stay with the implementor; the engine only asks for a
/// compact assertion bound to the token endpoint it is about to call.
pub trait AssertionProvider
where
	Self: Send + Sync,
{
	/// Returns a signed assertion for `client_id` whose audience is `audience`.
	///
	/// `include_public_cert` asks the signer to embed the certificate chain (`x5c`), which
	/// enables subject-name/issuer authentication.
	fn build_assertion(
		&self,
		client_id: &ClientId,
		audience: &Url,
		include_public_cert: bool,
	) -> Result<String>;
}

/// Credential material a confidential client authenticates with.
#[derive(Clone)]
pub enum ClientCredential {
	/// Shared client secret sent as `client_secret`.
	Secret(TokenSecret),
	/// Assertion minted per request by an [`AssertionProvider`].
	Assertion {
		/// Signer invoked before every token request.
		provider: Arc<dyn AssertionProvider>,
		/// Forwarded to [`AssertionProvider::build_assertion`].
		include_public_cert: bool,
	},
}
impl ClientCredential {
	/// Wraps a client secret.
	pub fn secret(secret: impl Into<String>) -> Self {
		Self::Secret(TokenSecret::new(secret))
	}

	/// Uses `provider` to sign an assertion for each request.
	pub fn assertion(provider: Arc<dyn AssertionProvider>, include_public_cert: bool) -> Self {
		Self::Assertion { provider, include_public_cert }
	}

	pub(crate) fn authenticate(
		&self,
		client_id: &ClientId,
		token_endpoint: &Url,
	) -> Result<ClientAuthentication> {
		match self {
			Self::Secret(secret) => Ok(ClientAuthentication::Secret(secret.clone())),
			Self::Assertion { provider, include_public_cert } => {
				let assertion =
					provider.build_assertion(client_id, token_endpoint, *include_public_cert)?;

				if assertion.is_empty() {
					return Err(Error::invalid_argument(
						"client_assertion",
						"assertion provider returned an empty assertion",
					));
				}

				Ok(ClientAuthentication::Assertion(TokenSecret::new(assertion)))
			},
		}
	}
}
impl Debug for ClientCredential {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		match self {
			Self::Secret(_) => f.write_str("ClientCredential::Secret(<redacted>)"),
			Self::Assertion { include_public_cert, .. } => f
				.debug_struct("ClientCredential::Assertion")
				.field("include_public_cert", include_public_cert)
				.finish_non_exhaustive(),
		}
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	struct EchoSigner;
	impl AssertionProvider for EchoSigner {
		fn build_assertion(
			&self,
			client_id: &ClientId,
			audience: &Url,
			include_public_cert: bool,
		) -> Result<String> {
			Ok(format!("{client_id}|{audience}|{include_public_cert}"))
		}
	}

	#[test]
	fn assertion_is_bound_to_endpoint() {
		let client_id = ClientId::new("client").expect("Client fixture is valid.");
		let endpoint = Url::parse("https://login.microsoftonline.com/t/oauth2/v2.0/token")
			.expect("Endpoint fixture is valid.");
		let credential = ClientCredential::assertion(Arc::new(EchoSigner), true);
		let ClientAuthentication::Assertion(assertion) =
			credential.authenticate(&client_id, &endpoint).expect("Signer should succeed.")
		else {
			panic!("Expected an assertion.");
		};

		assert_eq!(
			assertion.expose(),
			"client|https://login.microsoftonline.com/t/oauth2/v2.0/token|true"
		);
		assert_eq!(
			format!("{credential:?}"),
			"ClientCredential::Assertion { include_public_cert: true, .. }"
		);
	}

	#[test]
	fn secret_debug_is_redacted() {
		assert_eq!(
			format!("{:?}", ClientCredential::secret("hunter2")),
			"ClientCredential::Secret(<redacted>)"
		);
	}
}
