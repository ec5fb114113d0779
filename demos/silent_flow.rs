//! Demonstrates the silent flow against a file-backed cache.
//!
//! 1. Attach [`FileCachePersistence`] so tokens survive restarts.
//! 2. List the accounts that can be served silently.
//! 3. Ask for a token; fall back to an interactive flow when the engine says so.
//!
//! Run with `OAUTH2_CLIENT_ID` set to a registered public client.

// std
use std::{env, sync::Arc};
// crates.io
use color_eyre::Result;
// self
use oauth2_token_cache::{
	auth::{ClientId, ScopeSet},
	authority::Authority,
	cache::{CacheStore, FileCachePersistence},
	config::ApplicationConfig,
	engine::{ReqwestTokenEngine, SilentTokenRequest},
};

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let client_id = env::var("OAUTH2_CLIENT_ID").unwrap_or_else(|_| "demo-client".into());
	let config = ApplicationConfig::builder(
		ClientId::new(client_id)?,
		Authority::parse("https://login.microsoftonline.com/common")?,
	)
	.extended_lifetime_enabled(true)
	.build()?;
	let cache_path = env::temp_dir().join("oauth2-token-cache-demo.json");
	let store = CacheStore::new()
		.with_persistence(Arc::new(FileCachePersistence::new(&cache_path)?))
		.with_max_access_tokens(config.max_access_tokens);
	let engine = ReqwestTokenEngine::new(config).with_store(Arc::new(store));
	let accounts = engine.accounts().await?;

	println!("Cache at {} knows {} account(s).", cache_path.display(), accounts.len());

	let Some(account) = accounts.into_iter().next() else {
		println!("No cached account; an interactive sign-in is required first.");

		return Ok(());
	};
	let request = SilentTokenRequest::new(ScopeSet::new(["User.Read"])?, account);

	match engine.acquire_token_silent(request).await {
		Ok(result) => println!(
			"Token for {:?} from {:?}, expires at {}.",
			result.account.and_then(|account| account.username),
			result.source,
			result.expires_on
		),
		Err(e) if e.is_ui_required() => println!("Silent acquisition is not possible: {e}."),
		Err(e) => return Err(e.into()),
	}

	let metrics = engine.metrics();

	println!(
		"Cache hits: {}, network calls: {}, stale fallbacks: {}.",
		metrics.cache_hits(),
		metrics.network_calls(),
		metrics.stale_fallbacks()
	);

	Ok(())
}
