//! Token-endpoint wire codec: form encoding, response parsing, and failure mapping.

pub use oauth2;

// std
use std::io::{self, ErrorKind};
// crates.io
use oauth2::{
	AsyncHttpClient, HttpClientError, HttpRequest, HttpResponse,
	http::{
		HeaderMap, Method,
		header::{ACCEPT, CONTENT_TYPE, RETRY_AFTER},
	},
};
use serde::{Deserializer, de::Error as DeError};
use time::format_description::well_known::Rfc2822;
use url::form_urlencoded::Serializer as FormSerializer;
// self
use crate::{
	_prelude::*,
	auth::{ClientId, ScopeSet, TokenSecret},
	classifier::{AuthorityErrorContext, ErrorClassifier},
	error::{ClientError, TransientError, TransportError},
	http::TokenHttpClient,
};

/// Header carrying the per-request correlation id.
pub const CLIENT_REQUEST_ID_HEADER: &str = "client-request-id";

const JWT_BEARER_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// OAuth 2.0 grants the engine issues.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
	/// Authorization Code grant.
	AuthorizationCode,
	/// Refresh Token grant.
	RefreshToken,
	/// Client Credentials grant for app-only tokens.
	ClientCredentials,
}
impl GrantType {
	/// Returns the RFC 6749 identifier for the grant type.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::AuthorizationCode => "authorization_code",
			Self::RefreshToken => "refresh_token",
			Self::ClientCredentials => "client_credentials",
		}
	}
}
impl Display for GrantType {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Maps HTTP transport failures into engine [`Error`] values.
pub trait TransportErrorMapper<E>
where
	Self: 'static + Send + Sync,
	E: 'static + Send + Sync + StdError,
{
	/// Converts an [`HttpClientError`] emitted by the transport into an engine error.
	fn map_transport_error(&self, grant: GrantType, error: HttpClientError<E>) -> Error;
}

/// Mapper for arbitrary transports.
///
/// I/O errors of kind [`ErrorKind::TimedOut`] become [`TransientError::Timeout`]; everything else
/// becomes [`Error::Transport`].
#[derive(Clone, Debug, Default)]
pub struct DefaultTransportErrorMapper;
impl<E> TransportErrorMapper<E> for DefaultTransportErrorMapper
where
	E: 'static + Send + Sync + StdError,
{
	fn map_transport_error(&self, _: GrantType, error: HttpClientError<E>) -> Error {
		map_http_client_error(error, |inner| TransportError::network(inner).into())
	}
}

/// Mapper for the reqwest transport; recognizes reqwest timeouts.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransportErrorMapper;
#[cfg(feature = "reqwest")]
impl TransportErrorMapper<ReqwestError> for ReqwestTransportErrorMapper {
	fn map_transport_error(&self, _: GrantType, error: HttpClientError<ReqwestError>) -> Error {
		map_http_client_error(error, |inner| {
			if inner.is_timeout() {
				TransientError::Timeout.into()
			} else {
				TransportError::from(inner).into()
			}
		})
	}
}

/// Resolved client authentication attached to a confidential-client request.
#[derive(Clone, Debug)]
pub(crate) enum ClientAuthentication {
	Secret(TokenSecret),
	Assertion(TokenSecret),
}

/// One `application/x-www-form-urlencoded` token request.
#[derive(Clone, Debug)]
pub(crate) struct TokenRequest {
	grant: GrantType,
	endpoint: Url,
	client_id: ClientId,
	scope: ScopeSet,
	grant_secret: Option<TokenSecret>,
	redirect_uri: Option<Url>,
	code_verifier: Option<TokenSecret>,
	authentication: Option<ClientAuthentication>,
	claims: Option<String>,
	correlation_id: String,
}
impl TokenRequest {
	pub(crate) fn refresh_token(
		endpoint: Url,
		client_id: ClientId,
		scope: ScopeSet,
		refresh_token: TokenSecret,
	) -> Self {
		let mut request = Self::new(GrantType::RefreshToken, endpoint, client_id, scope);

		request.grant_secret = Some(refresh_token);

		request
	}

	pub(crate) fn client_credentials(endpoint: Url, client_id: ClientId, scope: ScopeSet) -> Self {
		Self::new(GrantType::ClientCredentials, endpoint, client_id, scope)
	}

	pub(crate) fn authorization_code(
		endpoint: Url,
		client_id: ClientId,
		scope: ScopeSet,
		code: TokenSecret,
		redirect_uri: Url,
		code_verifier: Option<TokenSecret>,
	) -> Self {
		let mut request = Self::new(GrantType::AuthorizationCode, endpoint, client_id, scope);

		request.grant_secret = Some(code);
		request.redirect_uri = Some(redirect_uri);
		request.code_verifier = code_verifier;

		request
	}

	fn new(grant: GrantType, endpoint: Url, client_id: ClientId, scope: ScopeSet) -> Self {
		Self {
			grant,
			endpoint,
			client_id,
			scope,
			grant_secret: None,
			redirect_uri: None,
			code_verifier: None,
			authentication: None,
			claims: None,
			correlation_id: new_correlation_id(),
		}
	}

	pub(crate) fn with_authentication(mut self, authentication: Option<ClientAuthentication>) -> Self {
		self.authentication = authentication;

		self
	}

	pub(crate) fn with_claims(mut self, claims: Option<String>) -> Self {
		self.claims = claims;

		self
	}

	pub(crate) fn correlation_id(&self) -> &str {
		&self.correlation_id
	}

	fn form(&self) -> String {
		let mut form = FormSerializer::new(String::new());

		form.append_pair("grant_type", self.grant.as_str());
		form.append_pair("client_id", &self.client_id);

		if !self.scope.is_empty() {
			form.append_pair("scope", &self.scope.normalized());
		}

		match (self.grant, &self.grant_secret) {
			(GrantType::RefreshToken, Some(secret)) => {
				form.append_pair("refresh_token", secret.expose());
			},
			(GrantType::AuthorizationCode, Some(secret)) => {
				form.append_pair("code", secret.expose());
			},
			_ => {},
		}

		if let Some(redirect_uri) = &self.redirect_uri {
			form.append_pair("redirect_uri", redirect_uri.as_str());
		}
		if let Some(verifier) = &self.code_verifier {
			form.append_pair("code_verifier", verifier.expose());
		}

		match &self.authentication {
			Some(ClientAuthentication::Secret(secret)) => {
				form.append_pair("client_secret", secret.expose());
			},
			Some(ClientAuthentication::Assertion(assertion)) => {
				form.append_pair("client_assertion_type", JWT_BEARER_ASSERTION_TYPE);
				form.append_pair("client_assertion", assertion.expose());
			},
			None => {},
		}

		if let Some(claims) = &self.claims {
			form.append_pair("claims", claims);
		}

		form.append_pair("client_info", "1");
		form.finish()
	}

	fn to_http(&self) -> Result<HttpRequest> {
		oauth2::http::Request::builder()
			.method(Method::POST)
			.uri(self.endpoint.as_str())
			.header(CONTENT_TYPE, "application/x-www-form-urlencoded")
			.header(ACCEPT, "application/json")
			.header(CLIENT_REQUEST_ID_HEADER, self.correlation_id.as_str())
			.body(self.form().into_bytes())
			.map_err(|e| TransportError::Request(e).into())
	}
}

/// Successful token-endpoint response.
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct TokenResponse {
	pub(crate) access_token: TokenSecret,
	#[serde(default)]
	pub(crate) token_type: Option<String>,
	#[serde(default, deserialize_with = "lenient_seconds")]
	pub(crate) expires_in: Option<i64>,
	#[serde(default, deserialize_with = "lenient_seconds")]
	pub(crate) ext_expires_in: Option<i64>,
	#[serde(default, deserialize_with = "lenient_seconds")]
	pub(crate) refresh_in: Option<i64>,
	#[serde(default)]
	pub(crate) refresh_token: Option<TokenSecret>,
	#[serde(default)]
	pub(crate) id_token: Option<TokenSecret>,
	#[serde(default)]
	pub(crate) client_info: Option<String>,
	#[serde(default)]
	pub(crate) scope: Option<String>,
	#[serde(default)]
	pub(crate) foci: Option<String>,
}
impl TokenResponse {
	pub(crate) fn expires_in(&self) -> Result<Duration, ClientError> {
		let seconds = self.expires_in.ok_or(ClientError::MissingField { field: "expires_in" })?;

		if seconds <= 0 {
			return Err(ClientError::InvalidExpiresIn);
		}

		Ok(Duration::seconds(seconds))
	}

	pub(crate) fn ext_expires_in(&self) -> Option<Duration> {
		self.ext_expires_in.filter(|seconds| *seconds > 0).map(Duration::seconds)
	}

	pub(crate) fn refresh_in(&self) -> Option<Duration> {
		self.refresh_in.filter(|seconds| *seconds > 0).map(Duration::seconds)
	}

	/// Granted scopes without reserved OIDC scopes; the requested set when the authority is silent.
	pub(crate) fn granted_scopes(&self, requested: &ScopeSet) -> Result<ScopeSet> {
		let granted = match self.scope.as_deref().map(str::trim) {
			Some(raw) if !raw.is_empty() => ScopeSet::from_str(raw)?,
			_ => requested.clone(),
		};

		Ok(granted.without_reserved())
	}

	pub(crate) fn family_id(&self) -> Option<&str> {
		self.foci.as_deref().map(str::trim).filter(|family| !family.is_empty())
	}
}

#[derive(Deserialize)]
struct ErrorBody {
	error: String,
	#[serde(default)]
	error_description: Option<String>,
	#[serde(default)]
	suberror: Option<String>,
}

/// Sends `request` and parses the outcome.
pub(crate) async fn send<C, M>(
	http: &C,
	mapper: &M,
	classifier: &dyn ErrorClassifier,
	request: &TokenRequest,
) -> Result<TokenResponse>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	let handle = http.handle();
	let response = handle
		.call(request.to_http()?)
		.await
		.map_err(|e| mapper.map_transport_error(request.grant, e))?;

	parse_response(request.grant, classifier, &response)
}

fn parse_response(
	grant: GrantType,
	classifier: &dyn ErrorClassifier,
	response: &HttpResponse,
) -> Result<TokenResponse> {
	let status = response.status();

	if status.is_success() {
		let deserializer = &mut serde_json::Deserializer::from_slice(response.body());

		return serde_path_to_error::deserialize(deserializer).map_err(|source| {
			ClientError::MalformedResponse { source, status: Some(status.as_u16()) }.into()
		});
	}

	let mut ctx = AuthorityErrorContext::new(grant)
		.with_http_status(status.as_u16())
		.with_retry_after(parse_retry_after(response.headers()));

	match serde_json::from_slice::<ErrorBody>(response.body()) {
		Ok(body) => {
			ctx = ctx.with_oauth_error(body.error);

			if let Some(description) = body.error_description {
				ctx = ctx.with_error_description(description);
			}
			if let Some(suberror) = body.suberror.filter(|s| !s.is_empty()) {
				ctx = ctx.with_suberror(suberror);
			}
		},
		Err(_) => {
			let text = String::from_utf8_lossy(response.body());

			if !text.trim().is_empty() {
				ctx = ctx.with_body_preview(text.into_owned());
			}
		},
	}

	let class = classifier.classify(&ctx);

	Err(ctx.into_error(class))
}

fn map_http_client_error<E>(error: HttpClientError<E>, map_inner: impl FnOnce(E) -> Error) -> Error
where
	E: 'static + Send + Sync + StdError,
{
	match error {
		HttpClientError::Reqwest(inner) => map_inner(*inner),
		HttpClientError::Http(inner) => TransportError::Request(inner).into(),
		HttpClientError::Io(inner) if inner.kind() == ErrorKind::TimedOut => TransientError::Timeout.into(),
		HttpClientError::Io(inner) => TransportError::Io(inner).into(),
		HttpClientError::Other(message) => TransportError::network(io::Error::other(message)).into(),
		_ => TransportError::network(io::Error::other("unrecognized HTTP client failure")).into(),
	}
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
	let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();

	if let Ok(secs) = raw.parse::<u32>() {
		return Some(Duration::seconds(i64::from(secs)));
	}
	if let Ok(moment) = OffsetDateTime::parse(raw, &Rfc2822) {
		let delta = moment - OffsetDateTime::now_utc();

		if delta.is_positive() {
			return Some(delta);
		}
	}

	None
}

fn lenient_seconds<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
	D: Deserializer<'de>,
{
	#[derive(Deserialize)]
	#[serde(untagged)]
	enum Raw {
		Number(i64),
		Text(String),
	}

	match <Option<Raw>>::deserialize(deserializer)? {
		None => Ok(None),
		Some(Raw::Number(seconds)) => Ok(Some(seconds)),
		Some(Raw::Text(text)) => text.trim().parse().map(Some).map_err(DeError::custom),
	}
}

fn new_correlation_id() -> String {
	let mut bytes = rand::random::<[u8; 16]>();

	bytes[6] = (bytes[6] & 0x0f) | 0x40;
	bytes[8] = (bytes[8] & 0x3f) | 0x80;

	let hex = bytes.iter().map(|byte| format!("{byte:02x}")).collect::<String>();

	format!("{}-{}-{}-{}-{}", &hex[..8], &hex[8..12], &hex[12..16], &hex[16..20], &hex[20..])
}

/// Builds the `claims` request parameter advertising client capabilities.
pub(crate) fn capabilities_claims(capabilities: &[String]) -> Option<String> {
	if capabilities.is_empty() {
		return None;
	}

	Some(serde_json::json!({ "access_token": { "xms_cc": { "values": capabilities } } }).to_string())
}
