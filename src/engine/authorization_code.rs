//! Authorization-code redemption, directly or through an interactive provider.
//!
//! Both entry points end in the same exchange: the code (and PKCE verifier) is redeemed at the
//! token endpoint and every record the response yields is written in one batch, which makes the
//! account available to [`TokenEngine::acquire_token_silent`] afterwards.

// self
use crate::{
	_prelude::*,
	auth::{ScopeSet, TokenSecret},
	authority::Authority,
	engine::{
		AuthenticationResult, AuthorizationCodeRequest, InteractiveTokenRequest, TokenEngine,
		request, response::ResponseIngest,
	},
	error::{ClientError, ServiceError},
	ext::{AuthorizationOutcome, AuthorizationRequest, InteractiveAuthProvider},
	http::TokenHttpClient,
	oauth::{GrantType, TokenRequest, TransportErrorMapper},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
};

const KIND: FlowKind = FlowKind::AuthorizationCode;

impl<C, M> TokenEngine<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Redeems an authorization code obtained out of band and caches the result.
	pub async fn acquire_token_by_authorization_code(
		&self,
		request: AuthorizationCodeRequest,
	) -> Result<AuthenticationResult> {
		let span = FlowSpan::new(KIND, "acquire_token_by_authorization_code");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(async move {
				let scopes = request::ensure_scopes(&request.scopes)?;
				let authority = self.authority(request.authority.as_ref()).clone();

				self.redeem_code(CodeRedemption {
					authority: &authority,
					scopes: &scopes,
					code: request.code,
					redirect_uri: request.redirect_uri,
					code_verifier: request.code_verifier,
					cancellation: &request.cancellation,
				})
				.await
			})
			.await;

		self.finish(KIND, &result);

		result
	}

	/// Runs the sign-in UI through `provider`, then redeems the returned code.
	///
	/// The request carries a PKCE challenge and a random `state`; a response echoing a different
	/// `state` is rejected before the code is redeemed.
	pub async fn acquire_token_interactive(
		&self,
		provider: &dyn InteractiveAuthProvider,
		request: InteractiveTokenRequest,
	) -> Result<AuthenticationResult> {
		let span = FlowSpan::new(KIND, "acquire_token_interactive");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(async move {
				let scopes = request::ensure_scopes(&request.scopes)?;
				let authority = self.authority(request.authority.as_ref()).clone();
				let authorization = AuthorizationRequest::new(
					authority.authorization_endpoint()?,
					self.client_id().clone(),
					request.redirect_uri.clone(),
					scopes.with_reserved(),
					request.login_hint.clone(),
				);
				let outcome = request
					.cancellation
					.run_until_cancelled(provider.authorize(&authorization))
					.await
					.ok_or(Error::Cancelled)??;
				let code = match outcome {
					AuthorizationOutcome::Code { state, .. }
						if state.as_deref() != Some(authorization.state.as_str()) =>
						return Err(ClientError::StateMismatch.into()),
					AuthorizationOutcome::Code { code, .. } => code,
					AuthorizationOutcome::Error { error, description } =>
						return Err(ServiceError { error, description, status: None }.into()),
				};

				self.redeem_code(CodeRedemption {
					authority: &authority,
					scopes: &scopes,
					code,
					redirect_uri: request.redirect_uri,
					code_verifier: Some(authorization.code_verifier.clone()),
					cancellation: &request.cancellation,
				})
				.await
			})
			.await;

		self.finish(KIND, &result);

		result
	}

	async fn redeem_code(&self, redemption: CodeRedemption<'_>) -> Result<AuthenticationResult> {
		let aliases = self.aliases(redemption.authority).await?;
		let endpoint = redemption.authority.token_endpoint(&aliases.preferred_network)?;
		let authentication = self.client_authentication(&endpoint)?;
		let token_request = TokenRequest::authorization_code(
			endpoint,
			self.client_id().clone(),
			redemption.scopes.with_reserved(),
			redemption.code,
			redemption.redirect_uri,
			redemption.code_verifier,
		)
		.with_authentication(authentication)
		.with_claims(self.claims());
		let response = self.exchange(KIND, &token_request, redemption.cancellation).await?;
		let ingest = ResponseIngest {
			grant: GrantType::AuthorizationCode,
			environment: aliases.cache_environment()?,
			client_id: self.client_id(),
			authority: redemption.authority,
			requested_scopes: redemption.scopes,
			expected_account: None,
			refresh_policy: self.config.refresh_policy,
		};
		let (batch, result) = ingest.ingest(response, OffsetDateTime::now_utc())?;

		self.commit(batch)?;

		obs::record_flow_outcome(KIND, FlowOutcome::Refreshed);

		Ok(result.with_correlation_id(token_request.correlation_id()))
	}
}

struct CodeRedemption<'a> {
	authority: &'a Authority,
	scopes: &'a ScopeSet,
	code: TokenSecret,
	redirect_uri: Url,
	code_verifier: Option<TokenSecret>,
	cancellation: &'a CancellationToken,
}
