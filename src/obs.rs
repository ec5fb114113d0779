//! Optional observability for engine flows.
//!
//! # Feature Flags
//!
//! - Enable `tracing` to emit spans named `oauth2_token_cache.flow` with the `flow` and `stage`
//!   fields, plus a debug event for every silent-flow decision.
//! - Enable `metrics` to increment the `oauth2_token_cache_flow_total` counter, labeled by
//!   `flow` + `outcome`.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Engine entry points observed by telemetry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowKind {
	/// Silent acquisition from cache or refresh token.
	Silent,
	/// App-only Client Credentials acquisition.
	ClientCredentials,
	/// Authorization-code redemption (direct or interactive).
	AuthorizationCode,
}
impl FlowKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Silent => "silent",
			Self::ClientCredentials => "client_credentials",
			Self::AuthorizationCode => "authorization_code",
		}
	}
}
impl Display for FlowKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded per flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowOutcome {
	/// Entry to an engine operation.
	Attempt,
	/// Served from cache without a network call.
	CacheHit,
	/// A new token was obtained from the authority.
	Refreshed,
	/// A stale cached token was served because the authority was unavailable.
	StaleFallback,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller.
	Failure,
}
impl FlowOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Attempt => "attempt",
			Self::CacheHit => "cache_hit",
			Self::Refreshed => "refreshed",
			Self::StaleFallback => "stale_fallback",
			Self::Success => "success",
			Self::Failure => "failure",
		}
	}
}
impl Display for FlowOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
