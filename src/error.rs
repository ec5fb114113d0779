//! Engine-level error taxonomy shared by the cache, classifier, and silent flows.

// self
use crate::{_prelude::*, auth::HomeAccountId, classifier::ErrorClass};

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// A required parameter was missing or empty; never retried.
	#[error("Invalid argument `{argument}`: {reason}.")]
	InvalidArgument {
		/// Name of the offending argument.
		argument: &'static str,
		/// Human-readable reason.
		reason: String,
	},
	/// Silent acquisition is not possible; the caller should run an interactive flow.
	#[error(transparent)]
	UiRequired(#[from] UiRequiredError),
	/// The authority returned tokens for a different subject than requested.
	#[error("Token response belongs to `{returned}` but `{requested}` was requested.")]
	UserMismatch {
		/// Account the caller asked for.
		requested: HomeAccountId,
		/// Account the authority answered for.
		returned: HomeAccountId,
	},
	/// Temporary upstream failure that outlived the retry budget.
	#[error(transparent)]
	Transient(#[from] TransientError),
	/// Network failure (DNS, TCP, TLS).
	#[error(transparent)]
	Transport(#[from] TransportError),
	/// The authority rejected the request with a non-recoverable OAuth error.
	#[error(transparent)]
	Service(#[from] ServiceError),
	/// The authority answered with something this client cannot use.
	#[error(transparent)]
	Client(#[from] ClientError),
	/// Cache or persistence failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::cache::StoreError,
	),
	/// The caller cancelled the request before the authority answered.
	#[error("The request was cancelled by the caller.")]
	Cancelled,
}
impl Error {
	/// Classifies the error into the taxonomy that drives silent-flow branching.
	pub fn class(&self) -> ErrorClass {
		match self {
			Self::UiRequired(_) => ErrorClass::UiRequired,
			Self::Transient(_) | Self::Transport(_) => ErrorClass::Transient,
			Self::InvalidArgument { .. }
			| Self::UserMismatch { .. }
			| Self::Service(_)
			| Self::Client(_)
			| Self::Storage(_)
			| Self::Cancelled => ErrorClass::Fatal,
		}
	}

	/// Returns `true` when silent acquisition is impossible and interaction is needed.
	pub fn is_ui_required(&self) -> bool {
		matches!(self, Self::UiRequired(_))
	}

	pub(crate) fn invalid_argument(argument: &'static str, reason: impl Into<String>) -> Self {
		Self::InvalidArgument { argument, reason: reason.into() }
	}
}
impl From<crate::auth::IdentifierError> for Error {
	fn from(e: crate::auth::IdentifierError) -> Self {
		Self::invalid_argument(e.argument(), e.to_string())
	}
}
impl From<crate::auth::ScopeValidationError> for Error {
	fn from(e: crate::auth::ScopeValidationError) -> Self {
		Self::invalid_argument("scopes", e.to_string())
	}
}

/// Reason codes carried by [`UiRequiredError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UiRequiredCode {
	/// Neither a usable access token nor a refresh token exists in the cache.
	NoTokensFound,
	/// The authority rejected the refresh token or authorization code.
	InvalidGrant,
	/// No cached account matches the supplied login hint.
	NoAccountForLoginHint,
	/// More than one cached account matches the supplied login hint.
	AmbiguousLoginHint,
	/// The authority demands user interaction (consent, MFA, ...).
	InteractionRequired,
}
impl UiRequiredCode {
	/// Returns a stable label for logs and metrics.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::NoTokensFound => "no_tokens_found",
			Self::InvalidGrant => "invalid_grant",
			Self::NoAccountForLoginHint => "no_account_for_login_hint",
			Self::AmbiguousLoginHint => "multiple_matching_accounts_for_login_hint",
			Self::InteractionRequired => "interaction_required",
		}
	}
}
impl Display for UiRequiredCode {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// "Silent auth not possible" signal returned instead of a generic failure.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
#[error("Silent token acquisition is not possible ({code}): {message}.")]
pub struct UiRequiredError {
	/// Machine-readable reason.
	pub code: UiRequiredCode,
	/// Human-readable detail.
	pub message: String,
	/// OAuth `suberror` supplied by the authority, if any.
	pub suberror: Option<String>,
}
impl UiRequiredError {
	/// Creates a new error with the provided code and message.
	pub fn new(code: UiRequiredCode, message: impl Into<String>) -> Self {
		Self { code, message: message.into(), suberror: None }
	}

	/// Attaches the authority's `suberror` value.
	pub fn with_suberror(mut self, suberror: Option<String>) -> Self {
		self.suberror = suberror;

		self
	}
}

/// Temporary failure variants (safe to retry).
#[derive(Debug, ThisError)]
pub enum TransientError {
	/// Authority answered with a 5xx or throttling status.
	#[error("Authority is unavailable: {message}.")]
	ServiceUnavailable {
		/// Summary of the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Retry-After hint from upstream, if supplied.
		retry_after: Option<Duration>,
	},
	/// Transport gave up waiting for the authority.
	#[error("Request to the authority timed out.")]
	Timeout,
	/// Instance discovery failed and no cached aliases were available.
	#[error("Instance discovery for `{host}` failed: {message}.")]
	Discovery {
		/// Host being resolved.
		host: String,
		/// Summary of the failure.
		message: String,
	},
}

/// Transport-level failures (network, IO).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the authority.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling the authority.")]
	Io(#[from] std::io::Error),
	/// HTTP request could not be assembled.
	#[error("HTTP request could not be built.")]
	Request(#[from] oauth2::http::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}

/// Non-recoverable OAuth error returned by the authority.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
#[error("Authority returned `{error}`{}.", description.as_deref().map(|d| format!(": {d}")).unwrap_or_default())]
pub struct ServiceError {
	/// OAuth `error` code.
	pub error: String,
	/// OAuth `error_description`, if any.
	pub description: Option<String>,
	/// HTTP status code, when available.
	pub status: Option<u16>,
}

/// Failures caused by responses this client cannot interpret; never retried.
#[derive(Debug, ThisError)]
pub enum ClientError {
	/// Token endpoint returned JSON that does not match the expected shape.
	#[error("Token endpoint returned malformed JSON.")]
	MalformedResponse {
		/// Structured parsing failure with the offending path.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// A field required to build cache records is absent.
	#[error("Token response is missing `{field}`.")]
	MissingField {
		/// Name of the missing field.
		field: &'static str,
	},
	/// `expires_in` is zero, negative, or out of range.
	#[error("The expires_in value is not a usable lifetime.")]
	InvalidExpiresIn,
	/// `client_info` or the id token could not be decoded.
	#[error("Identity payload could not be decoded: {reason}.")]
	InvalidIdentity {
		/// Human-readable reason.
		reason: String,
	},
	/// Authority answered with an identifier that fails validation.
	#[error("Token response carries an invalid identifier: {0}.")]
	InvalidIdentifier(#[from] crate::auth::IdentifierError),
	/// The authorization response echoed a different `state` than the one sent.
	#[error("Authorization response state does not match the request.")]
	StateMismatch,
}
