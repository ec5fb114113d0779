//! Authority failure classification.
//!
//! The classifier turns an error response from the token endpoint into one of three classes,
//! and the class alone decides what the silent flow does next: fall back to a stale token
//! ([`ErrorClass::Transient`]), ask the caller for interaction ([`ErrorClass::UiRequired`]), or
//! fail immediately ([`ErrorClass::Fatal`]). Transport failures never reach the classifier; they
//! are [`Error::Transport`] or [`TransientError::Timeout`] and classify as transient through
//! [`Error::class`].

// self
use crate::{
	_prelude::*,
	error::{ServiceError, TransientError, UiRequiredCode, UiRequiredError},
	oauth::GrantType,
};

/// Taxonomy driving the silent-flow branches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorClass {
	/// Silent acquisition cannot succeed; interactive authentication is required.
	UiRequired,
	/// Temporary failure; retried within the budget and eligible for stale-token fallback.
	Transient,
	/// Non-recoverable failure surfaced immediately.
	Fatal,
}
impl ErrorClass {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::UiRequired => "ui_required",
			Self::Transient => "transient",
			Self::Fatal => "fatal",
		}
	}
}
impl Display for ErrorClass {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Classifies token-endpoint error responses.
///
/// Implementations only see crate-owned data, so they stay independent of the HTTP stack.
pub trait ErrorClassifier
where
	Self: Send + Sync,
{
	/// Maps an error response into the engine taxonomy.
	fn classify(&self, ctx: &AuthorityErrorContext) -> ErrorClass;
}

/// Everything known about one failed token request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthorityErrorContext {
	/// Grant the failing request used.
	pub grant_type: GrantType,
	/// HTTP status code returned by the authority.
	pub http_status: Option<u16>,
	/// OAuth `error` field.
	pub oauth_error: Option<String>,
	/// OAuth `error_description` field.
	pub error_description: Option<String>,
	/// Authority-specific `suberror` field (e.g. `basic_action`, `consent_required`).
	pub suberror: Option<String>,
	/// Retry-After hint, relative to the response.
	pub retry_after: Option<Duration>,
	/// Preview of a body that did not parse as an OAuth error.
	pub body_preview: Option<String>,
}
impl AuthorityErrorContext {
	const BODY_PREVIEW_LIMIT: usize = 256;

	/// Creates an empty context for `grant_type`.
	pub fn new(grant_type: GrantType) -> Self {
		Self {
			grant_type,
			http_status: None,
			oauth_error: None,
			error_description: None,
			suberror: None,
			retry_after: None,
			body_preview: None,
		}
	}

	/// Adds the HTTP status code.
	pub fn with_http_status(mut self, status: u16) -> Self {
		self.http_status = Some(status);

		self
	}

	/// Adds the OAuth `error` code.
	pub fn with_oauth_error(mut self, error: impl Into<String>) -> Self {
		self.oauth_error = Some(error.into());

		self
	}

	/// Adds the OAuth `error_description`.
	pub fn with_error_description(mut self, description: impl Into<String>) -> Self {
		self.error_description = Some(description.into());

		self
	}

	/// Adds the `suberror`.
	pub fn with_suberror(mut self, suberror: impl Into<String>) -> Self {
		self.suberror = Some(suberror.into());

		self
	}

	/// Adds a Retry-After hint.
	pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
		self.retry_after = retry_after;

		self
	}

	/// Adds a truncated preview of an unparseable body.
	pub fn with_body_preview(mut self, body: impl Into<String>) -> Self {
		self.body_preview = Some(truncate_preview(body.into()));

		self
	}

	/// Builds the caller-facing error for a response classified as `class`.
	pub fn into_error(self, class: ErrorClass) -> Error {
		let message = self.summary();

		match class {
			ErrorClass::UiRequired => {
				let code = if self.has_oauth_error("invalid_grant") {
					UiRequiredCode::InvalidGrant
				} else {
					UiRequiredCode::InteractionRequired
				};

				UiRequiredError::new(code, message).with_suberror(self.suberror).into()
			},
			ErrorClass::Transient => TransientError::ServiceUnavailable {
				message,
				status: self.http_status,
				retry_after: self.retry_after,
			}
			.into(),
			ErrorClass::Fatal => ServiceError {
				error: self.oauth_error.unwrap_or_else(|| match self.http_status {
					Some(status) => format!("http_{status}"),
					None => "unknown_error".into(),
				}),
				description: self.error_description.or(self.body_preview),
				status: self.http_status,
			}
			.into(),
		}
	}

	fn has_oauth_error(&self, code: &str) -> bool {
		self.oauth_error.as_deref().is_some_and(|error| error.eq_ignore_ascii_case(code))
	}

	fn summary(&self) -> String {
		if let Some(description) = &self.error_description {
			return description.clone();
		}
		if let Some(error) = &self.oauth_error {
			return format!("{} request failed with `{error}`", self.grant_type);
		}

		match self.http_status {
			Some(status) => format!("{} request failed with HTTP {status}", self.grant_type),
			None => format!("{} request failed", self.grant_type),
		}
	}
}

/// Default classifier.
///
/// Interaction codes always win. Otherwise 408, 429 and 5xx are transient whatever OAuth code
/// they carry, and only then do unknown OAuth codes make a response fatal.
#[derive(Clone, Debug, Default)]
pub struct DefaultErrorClassifier;
impl ErrorClassifier for DefaultErrorClassifier {
	fn classify(&self, ctx: &AuthorityErrorContext) -> ErrorClass {
		let hint = match ctx.oauth_error.as_deref() {
			Some(error) => Some(classify_oauth_error(error)),
			None => classify_body(ctx.body_preview.as_deref()),
		};

		if hint == Some(ErrorClass::UiRequired) {
			return ErrorClass::UiRequired;
		}
		if is_retryable_status(ctx.http_status) {
			return ErrorClass::Transient;
		}

		hint.unwrap_or(ErrorClass::Fatal)
	}
}

fn truncate_preview(body: String) -> String {
	if body.chars().count() <= AuthorityErrorContext::BODY_PREVIEW_LIMIT {
		return body;
	}

	let mut buf = body.chars().take(AuthorityErrorContext::BODY_PREVIEW_LIMIT).collect::<String>();

	buf.push('…');

	buf
}

fn classify_oauth_error(error: &str) -> ErrorClass {
	const UI_REQUIRED: [&str; 4] =
		["invalid_grant", "interaction_required", "consent_required", "login_required"];
	const TRANSIENT: [&str; 2] = ["temporarily_unavailable", "server_error"];

	if UI_REQUIRED.iter().any(|code| error.eq_ignore_ascii_case(code)) {
		ErrorClass::UiRequired
	} else if TRANSIENT.iter().any(|code| error.eq_ignore_ascii_case(code)) {
		ErrorClass::Transient
	} else {
		ErrorClass::Fatal
	}
}

fn classify_body(body: Option<&str>) -> Option<ErrorClass> {
	let lowered = body?.to_ascii_lowercase();

	match lowered.as_str() {
		text if text.contains("invalid_grant") || text.contains("interaction_required") =>
			Some(ErrorClass::UiRequired),
		text if text.contains("temporarily_unavailable") => Some(ErrorClass::Transient),
		_ => None,
	}
}

fn is_retryable_status(status: Option<u16>) -> bool {
	matches!(status, Some(408 | 429 | 500..=599))
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::error::TransportError;

	fn ctx() -> AuthorityErrorContext {
		AuthorityErrorContext::new(GrantType::RefreshToken)
	}

	#[test]
	fn oauth_errors_drive_classification() {
		let classifier = DefaultErrorClassifier;

		assert_eq!(
			classifier.classify(&ctx().with_http_status(400).with_oauth_error("invalid_grant")),
			ErrorClass::UiRequired
		);
		assert_eq!(
			classifier.classify(&ctx().with_http_status(400).with_oauth_error("INTERACTION_REQUIRED")),
			ErrorClass::UiRequired
		);
		assert_eq!(
			classifier.classify(&ctx().with_http_status(503).with_oauth_error("temporarily_unavailable")),
			ErrorClass::Transient
		);
		assert_eq!(
			classifier.classify(&ctx().with_http_status(401).with_oauth_error("invalid_client")),
			ErrorClass::Fatal
		);
	}

	#[test]
	fn server_failures_stay_transient_with_unknown_codes() {
		let classifier = DefaultErrorClassifier;

		assert_eq!(
			classifier.classify(&ctx().with_http_status(503).with_oauth_error("service_unavailable")),
			ErrorClass::Transient
		);
		assert_eq!(
			classifier.classify(&ctx().with_http_status(500).with_oauth_error("internal_error")),
			ErrorClass::Transient
		);
		assert_eq!(
			classifier.classify(&ctx().with_http_status(429).with_oauth_error("throttled")),
			ErrorClass::Transient
		);
		assert_eq!(
			classifier.classify(&ctx().with_http_status(500).with_oauth_error("invalid_grant")),
			ErrorClass::UiRequired
		);
		assert_eq!(
			classifier.classify(&ctx().with_http_status(400).with_oauth_error("service_unavailable")),
			ErrorClass::Fatal
		);
	}

	#[test]
	fn status_is_the_last_resort() {
		let classifier = DefaultErrorClassifier;

		assert_eq!(classifier.classify(&ctx().with_http_status(504)), ErrorClass::Transient);
		assert_eq!(classifier.classify(&ctx().with_http_status(429)), ErrorClass::Transient);
		assert_eq!(classifier.classify(&ctx().with_http_status(404)), ErrorClass::Fatal);
		assert_eq!(
			classifier.classify(&ctx().with_http_status(400).with_body_preview("<p>invalid_grant</p>")),
			ErrorClass::UiRequired
		);
	}

	#[test]
	fn into_error_preserves_details() {
		let ui = ctx()
			.with_http_status(400)
			.with_oauth_error("invalid_grant")
			.with_error_description("AADSTS70008: expired")
			.with_suberror("bad_token")
			.into_error(ErrorClass::UiRequired);
		let Error::UiRequired(inner) = ui else { panic!("Expected UiRequired, got {ui:?}.") };

		assert_eq!(inner.code, UiRequiredCode::InvalidGrant);
		assert_eq!(inner.message, "AADSTS70008: expired");
		assert_eq!(inner.suberror.as_deref(), Some("bad_token"));

		let transient = ctx()
			.with_http_status(503)
			.with_retry_after(Some(Duration::seconds(7)))
			.into_error(ErrorClass::Transient);

		assert!(matches!(
			transient,
			Error::Transient(TransientError::ServiceUnavailable {
				status: Some(503),
				retry_after: Some(delay),
				..
			}) if delay == Duration::seconds(7)
		));

		let fatal = ctx().with_http_status(418).into_error(ErrorClass::Fatal);

		assert!(matches!(fatal, Error::Service(ServiceError { ref error, .. }) if error == "http_418"));
	}

	#[test]
	fn transport_failures_classify_as_transient() {
		let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");

		assert_eq!(Error::from(TransportError::Io(io)).class(), ErrorClass::Transient);
		assert_eq!(Error::from(TransientError::Timeout).class(), ErrorClass::Transient);
	}

	#[test]
	fn body_preview_is_truncated() {
		let preview = ctx().with_body_preview("x".repeat(300)).body_preview.unwrap_or_default();

		assert_eq!(preview.chars().count(), AuthorityErrorContext::BODY_PREVIEW_LIMIT + 1);
		assert!(preview.ends_with('…'));
	}
}
