//! OAuth 2.0 / OIDC token cache and silent acquisition engine.
//!
//! Partitioned credential storage, refresh-ahead with stale-token fallback, and a versioned
//! cache format in one crate.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod authority;
pub mod cache;
pub mod classifier;
pub mod config;
pub mod engine;
pub mod error;
pub mod ext;
pub mod http;
pub mod oauth;
pub mod obs;
#[cfg(all(any(test, feature = "test"), feature = "reqwest"))]
pub mod _preludet {
	//! Convenience re-exports and helpers for integration tests; enabled via `cfg(test)` or the
	//! `test` crate feature.

	pub use crate::_prelude::*;

	// self
	use crate::{
		auth::ClientId,
		authority::{Authority, AuthorityAliases, InstanceDiscovery},
		config::ApplicationConfig,
		engine::ReqwestTokenEngine,
		http::ReqwestHttpClient,
		oauth::ReqwestTransportErrorMapper,
	};

	/// Builds a reqwest HTTP client that accepts the self-signed certificates produced by
	/// `httpmock` during tests.
	pub fn test_reqwest_http_client() -> ReqwestHttpClient {
		let client = ReqwestClient::builder()
			.danger_accept_invalid_certs(true)
			.danger_accept_invalid_hostnames(true)
			.build()
			.expect("Failed to build insecure Reqwest client for tests.");

		ReqwestHttpClient::with_client(client)
	}

	/// Constructs a [`ReqwestTokenEngine`] whose authority points at a mock server.
	///
	/// `authority` must be a loopback URL such as `https://127.0.0.1:PORT/contoso`; discovery is
	/// seeded so the host is only an alias of itself.
	pub fn build_reqwest_test_engine(client_id: &str, authority: &str) -> ReqwestTokenEngine {
		let authority = Authority::parse(authority).expect("Mock authority should parse.");
		let discovery = InstanceDiscovery::default();

		discovery.seed(AuthorityAliases::single(authority.environment()));

		let config = ApplicationConfig::builder(
			ClientId::new(client_id).expect("Client identifier should be valid for tests."),
			authority,
		)
		.build()
		.expect("Test configuration should build.");

		ReqwestTokenEngine::with_http_client(
			config,
			test_reqwest_http_client(),
			ReqwestTransportErrorMapper,
		)
		.with_discovery(Arc::new(discovery))
	}
}

mod _prelude {
	pub use std::{
		collections::{BTreeMap, BTreeSet, HashMap},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		hash::{Hash, Hasher},
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use tokio_util::sync::CancellationToken;
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use tokio_util::sync::CancellationToken;
pub use url;
#[cfg(all(test, feature = "reqwest"))] use {color_eyre as _, httpmock as _};
