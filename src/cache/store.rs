//! Shared, lock-guarded token cache.

// std
use std::sync::atomic::{AtomicU64, Ordering};
// self
use crate::{
	_prelude::*,
	cache::{
		StoreError,
		format::CacheContents,
		key::CredentialKey,
		persistence::{CacheAccessArgs, CacheOperation, CachePersistence},
		record::{
			AccessTokenRecord, AccountRecord, AppMetadataRecord, IdTokenRecord, RefreshTokenRecord,
		},
	},
};

/// Records produced by one token response, written under a single lock acquisition.
#[derive(Clone, Debug, Default)]
pub struct CredentialBatch {
	/// New access token; other tokens of the same partition with intersecting scopes are evicted.
	pub access_token: Option<AccessTokenRecord>,
	/// New or rotated refresh token.
	pub refresh_token: Option<RefreshTokenRecord>,
	/// Raw id token.
	pub id_token: Option<IdTokenRecord>,
	/// Account profile.
	pub account: Option<AccountRecord>,
	/// Application metadata.
	pub app_metadata: Option<AppMetadataRecord>,
}

/// Snapshot of how often the cache was accessed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheAccessStats {
	/// Lookup and enumeration calls.
	pub reads: u64,
	/// Save, delete, and clear calls.
	pub writes: u64,
}

/// Process-lifetime token cache shared by every request of one application.
///
/// Lookups share a read lock; mutations take the write lock, so concurrent saves to one key
/// end with exactly one of the writes. When [`CachePersistence`] is attached, every operation
/// takes the write lock because the `before_access` hook may replace the contents.
pub struct CacheStore {
	contents: RwLock<CacheContents>,
	persistence: Option<Arc<dyn CachePersistence>>,
	max_access_tokens: Option<usize>,
	reads: AtomicU64,
	writes: AtomicU64,
}
impl CacheStore {
	/// Creates an empty, memory-only cache.
	pub fn new() -> Self {
		Self {
			contents: RwLock::new(CacheContents::default()),
			persistence: None,
			max_access_tokens: None,
			reads: AtomicU64::new(0),
			writes: AtomicU64::new(0),
		}
	}

	/// Attaches persistence hooks.
	pub fn with_persistence(mut self, persistence: Arc<dyn CachePersistence>) -> Self {
		self.persistence = Some(persistence);

		self
	}

	/// Bounds the number of access tokens; the one expiring first is evicted on overflow.
	pub fn with_max_access_tokens(mut self, max: Option<usize>) -> Self {
		self.max_access_tokens = max;

		self
	}

	/// Returns how many reads and writes have been issued.
	pub fn stats(&self) -> CacheAccessStats {
		CacheAccessStats {
			reads: self.reads.load(Ordering::Relaxed),
			writes: self.writes.load(Ordering::Relaxed),
		}
	}

	/// Upserts an access token by key (last write wins).
	pub fn save_access_token(&self, record: AccessTokenRecord) -> Result<(), StoreError> {
		let max = self.max_access_tokens;

		self.write(|contents| {
			let key = record.key();

			contents.access_tokens.insert(key.clone(), record);
			enforce_capacity(contents, max, &key);

			((), true)
		})
	}

	/// Upserts a refresh token by key.
	pub fn save_refresh_token(&self, record: RefreshTokenRecord) -> Result<(), StoreError> {
		self.write(|contents| {
			contents.refresh_tokens.insert(record.key(), record);

			((), true)
		})
	}

	/// Upserts an id token by key.
	pub fn save_id_token(&self, record: IdTokenRecord) -> Result<(), StoreError> {
		self.write(|contents| {
			contents.id_tokens.insert(record.key(), record);

			((), true)
		})
	}

	/// Upserts an account by key.
	pub fn save_account(&self, record: AccountRecord) -> Result<(), StoreError> {
		self.write(|contents| {
			contents.accounts.insert(record.key(), record);

			((), true)
		})
	}

	/// Upserts application metadata by key.
	pub fn save_app_metadata(&self, record: AppMetadataRecord) -> Result<(), StoreError> {
		self.write(|contents| {
			contents.app_metadata.insert(record.key(), record);

			((), true)
		})
	}

	/// Writes every record of a token response in one operation.
	///
	/// Access tokens of the same (environment, client, account, realm) whose scopes intersect
	/// the new token are removed first so a scope is answered by one record only.
	pub fn save_batch(&self, batch: CredentialBatch) -> Result<(), StoreError> {
		let max = self.max_access_tokens;

		self.write(|contents| {
			let CredentialBatch { access_token, refresh_token, id_token, account, app_metadata } =
				batch;
			let changed = access_token.is_some()
				|| refresh_token.is_some()
				|| id_token.is_some()
				|| account.is_some()
				|| app_metadata.is_some();

			if let Some(record) = access_token {
				let key = record.key();

				contents.access_tokens.retain(|existing_key, existing| {
					existing_key == &key || !overlaps(existing, &record)
				});
				contents.access_tokens.insert(key.clone(), record);
				enforce_capacity(contents, max, &key);
			}
			if let Some(record) = refresh_token {
				contents.refresh_tokens.insert(record.key(), record);
			}
			if let Some(record) = id_token {
				contents.id_tokens.insert(record.key(), record);
			}
			if let Some(record) = account {
				contents.accounts.insert(record.key(), record);
			}
			if let Some(record) = app_metadata {
				contents.app_metadata.insert(record.key(), record);
			}

			((), changed)
		})
	}

	/// Access tokens accepted by `filter`.
	pub fn get_all_access_tokens(
		&self,
		filter: impl Fn(&AccessTokenRecord) -> bool,
	) -> Result<Vec<AccessTokenRecord>, StoreError> {
		self.read(|contents| contents.access_tokens.values().filter(|r| filter(r)).cloned().collect())
	}

	/// Refresh tokens accepted by `filter`.
	pub fn get_all_refresh_tokens(
		&self,
		filter: impl Fn(&RefreshTokenRecord) -> bool,
	) -> Result<Vec<RefreshTokenRecord>, StoreError> {
		self.read(|contents| contents.refresh_tokens.values().filter(|r| filter(r)).cloned().collect())
	}

	/// Id tokens accepted by `filter`.
	pub fn get_all_id_tokens(
		&self,
		filter: impl Fn(&IdTokenRecord) -> bool,
	) -> Result<Vec<IdTokenRecord>, StoreError> {
		self.read(|contents| contents.id_tokens.values().filter(|r| filter(r)).cloned().collect())
	}

	/// Accounts accepted by `filter`.
	pub fn get_all_accounts(
		&self,
		filter: impl Fn(&AccountRecord) -> bool,
	) -> Result<Vec<AccountRecord>, StoreError> {
		self.read(|contents| contents.accounts.values().filter(|r| filter(r)).cloned().collect())
	}

	/// Application metadata accepted by `filter`.
	pub fn get_all_app_metadata(
		&self,
		filter: impl Fn(&AppMetadataRecord) -> bool,
	) -> Result<Vec<AppMetadataRecord>, StoreError> {
		self.read(|contents| contents.app_metadata.values().filter(|r| filter(r)).cloned().collect())
	}

	/// Removes an access token; returns whether it existed.
	pub fn delete_access_token(&self, key: &CredentialKey) -> Result<bool, StoreError> {
		self.write(|contents| {
			let removed = contents.access_tokens.remove(key).is_some();

			(removed, removed)
		})
	}

	/// Removes a refresh token; returns whether it existed.
	pub fn delete_refresh_token(&self, key: &CredentialKey) -> Result<bool, StoreError> {
		self.write(|contents| {
			let removed = contents.refresh_tokens.remove(key).is_some();

			(removed, removed)
		})
	}

	/// Removes an id token; returns whether it existed.
	pub fn delete_id_token(&self, key: &CredentialKey) -> Result<bool, StoreError> {
		self.write(|contents| {
			let removed = contents.id_tokens.remove(key).is_some();

			(removed, removed)
		})
	}

	/// Removes an account record; credentials are left for the caller to remove.
	pub fn delete_account(&self, key: &CredentialKey) -> Result<bool, StoreError> {
		self.write(|contents| {
			let removed = contents.accounts.remove(key).is_some();

			(removed, removed)
		})
	}

	/// Removes every record except application metadata.
	pub fn clear(&self) -> Result<(), StoreError> {
		self.write(|contents| {
			let changed = !(contents.access_tokens.is_empty()
				&& contents.refresh_tokens.is_empty()
				&& contents.id_tokens.is_empty()
				&& contents.accounts.is_empty());

			contents.access_tokens.clear();
			contents.refresh_tokens.clear();
			contents.id_tokens.clear();
			contents.accounts.clear();

			((), changed)
		})
	}

	/// Encodes the current contents as a versioned envelope.
	pub fn serialize(&self) -> Result<Vec<u8>, StoreError> {
		self.contents.read().encode()
	}

	/// Replaces the current contents with a previously serialized envelope.
	pub fn deserialize(&self, bytes: &[u8]) -> Result<(), StoreError> {
		let decoded = CacheContents::decode(bytes)?;

		*self.contents.write() = decoded;

		Ok(())
	}

	fn read<T>(&self, f: impl FnOnce(&CacheContents) -> T) -> Result<T, StoreError> {
		self.reads.fetch_add(1, Ordering::Relaxed);

		let Some(persistence) = &self.persistence else {
			return Ok(f(&*self.contents.read()));
		};
		let args = CacheAccessArgs { operation: CacheOperation::Read, has_state_changed: false };
		let mut guard = self.contents.write();

		if let Some(blob) = persistence.before_access(&args)? {
			*guard = CacheContents::decode(&blob)?;
		}

		let out = f(&*guard);

		persistence.after_access(&args, None)?;

		Ok(out)
	}

	fn write<T>(&self, f: impl FnOnce(&mut CacheContents) -> (T, bool)) -> Result<T, StoreError> {
		self.writes.fetch_add(1, Ordering::Relaxed);

		let mut guard = self.contents.write();

		if let Some(persistence) = &self.persistence {
			let args = CacheAccessArgs { operation: CacheOperation::Write, has_state_changed: false };

			if let Some(blob) = persistence.before_access(&args)? {
				*guard = CacheContents::decode(&blob)?;
			}
		}

		let (out, has_state_changed) = f(&mut *guard);

		if let Some(persistence) = &self.persistence {
			let args = CacheAccessArgs { operation: CacheOperation::Write, has_state_changed };
			let snapshot = if has_state_changed { Some(guard.encode()?) } else { None };

			persistence.after_access(&args, snapshot.as_deref())?;
		}

		Ok(out)
	}
}
impl Default for CacheStore {
	fn default() -> Self {
		Self::new()
	}
}
impl Debug for CacheStore {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		let contents = self.contents.read();

		f.debug_struct("CacheStore")
			.field("access_tokens", &contents.access_tokens.len())
			.field("refresh_tokens", &contents.refresh_tokens.len())
			.field("id_tokens", &contents.id_tokens.len())
			.field("accounts", &contents.accounts.len())
			.field("app_metadata", &contents.app_metadata.len())
			.field("persistent", &self.persistence.is_some())
			.finish()
	}
}

fn overlaps(existing: &AccessTokenRecord, incoming: &AccessTokenRecord) -> bool {
	existing.environment == incoming.environment
		&& existing.client_id == incoming.client_id
		&& existing.realm == incoming.realm
		&& existing.home_account_id == incoming.home_account_id
		&& existing.target.intersects(&incoming.target)
}

fn enforce_capacity(contents: &mut CacheContents, max: Option<usize>, keep: &CredentialKey) {
	let Some(max) = max else { return };

	while contents.access_tokens.len() > max.max(1) {
		let victim = contents
			.access_tokens
			.iter()
			.filter(|(key, _)| *key != keep)
			.min_by_key(|(_, record)| record.expires_on)
			.map(|(key, _)| key.clone());

		match victim {
			Some(key) => {
				contents.access_tokens.remove(&key);
			},
			None => break,
		}
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::thread;
	// self
	use super::*;
	use crate::auth::{ClientId, Environment, HomeAccountId, ScopeSet, TenantId};

	fn access_token(scopes: &str, secret: &str, expires_in: Duration) -> AccessTokenRecord {
		AccessTokenRecord::builder(
			Environment::new("login.microsoftonline.com").expect("Environment fixture is valid."),
			ClientId::new("client").expect("Client fixture is valid."),
			TenantId::new("tenant").expect("Tenant fixture is valid."),
			ScopeSet::from_str(scopes).expect("Scope fixture is valid."),
		)
		.home_account_id(Some(HomeAccountId::new("uid.utid").expect("Home fixture is valid.")))
		.secret(secret)
		.expires_in(expires_in)
		.build()
		.expect("Access token fixture should build.")
	}

	fn refresh_token() -> RefreshTokenRecord {
		RefreshTokenRecord::new(
			HomeAccountId::new("uid.utid").expect("Home fixture is valid."),
			Environment::new("login.microsoftonline.com").expect("Environment fixture is valid."),
			ClientId::new("client").expect("Client fixture is valid."),
			"rt",
		)
	}

	#[test]
	fn save_overwrites_same_key() {
		let store = CacheStore::new();

		store.save_access_token(access_token("a b", "first", Duration::hours(1))).expect("Save.");
		store.save_access_token(access_token("B A", "second", Duration::hours(1))).expect("Save.");

		let all = store.get_all_access_tokens(|_| true).expect("Read should succeed.");

		assert_eq!(all.len(), 1);
		assert_eq!(all[0].secret.expose(), "second");
	}

	#[test]
	fn batch_evicts_intersecting_scopes_only() {
		let store = CacheStore::new();

		store.save_access_token(access_token("a b", "ab", Duration::hours(1))).expect("Save.");
		store.save_access_token(access_token("c", "c", Duration::hours(1))).expect("Save.");
		store
			.save_batch(CredentialBatch {
				access_token: Some(access_token("b d", "bd", Duration::hours(1))),
				refresh_token: Some(refresh_token()),
				..Default::default()
			})
			.expect("Batch save should succeed.");

		let mut secrets: Vec<_> = store
			.get_all_access_tokens(|_| true)
			.expect("Read should succeed.")
			.into_iter()
			.map(|r| r.secret.expose().to_owned())
			.collect();

		secrets.sort();

		assert_eq!(secrets, vec!["bd".to_owned(), "c".to_owned()]);
		assert_eq!(store.get_all_refresh_tokens(|_| true).expect("Read.").len(), 1);
	}

	#[test]
	fn clear_keeps_app_metadata() {
		let store = CacheStore::new();

		store.save_access_token(access_token("a", "a", Duration::hours(1))).expect("Save.");
		store.save_refresh_token(refresh_token()).expect("Save.");
		store
			.save_app_metadata(AppMetadataRecord::new(
				Environment::new("login.microsoftonline.com").expect("Environment is valid."),
				ClientId::new("client").expect("Client is valid."),
				Some("1".into()),
			))
			.expect("Save.");
		store.clear().expect("Clear should succeed.");

		assert!(store.get_all_access_tokens(|_| true).expect("Read.").is_empty());
		assert!(store.get_all_refresh_tokens(|_| true).expect("Read.").is_empty());
		assert_eq!(store.get_all_app_metadata(|_| true).expect("Read.").len(), 1);
	}

	#[test]
	fn capacity_evicts_earliest_expiry() {
		let store = CacheStore::new().with_max_access_tokens(Some(2));

		store.save_access_token(access_token("a", "late", Duration::hours(3))).expect("Save.");
		store.save_access_token(access_token("b", "early", Duration::hours(1))).expect("Save.");
		store.save_access_token(access_token("c", "new", Duration::hours(2))).expect("Save.");

		let all = store.get_all_access_tokens(|_| true).expect("Read.");

		assert_eq!(all.len(), 2);
		assert!(all.iter().all(|r| r.secret.expose() != "early"));
	}

	#[test]
	fn parallel_saves_collapse_to_one_entry() {
		let store = Arc::new(CacheStore::new());
		let handles: Vec<_> = (0..16)
			.map(|i| {
				let store = store.clone();

				thread::spawn(move || {
					store
						.save_access_token(access_token("r1/scope1", &format!("at-{i}"), Duration::hours(1)))
						.expect("Concurrent save should succeed.");
					store.get_all_access_tokens(|_| true).expect("Concurrent read should succeed.")
				})
			})
			.collect();

		for handle in handles {
			let seen = handle.join().expect("Writer thread should not panic.");

			assert_eq!(seen.len(), 1, "Readers never observe duplicates.");
		}

		assert_eq!(store.get_all_access_tokens(|_| true).expect("Read.").len(), 1);
		assert_eq!(store.stats(), CacheAccessStats { reads: 17, writes: 16 });
	}

	#[test]
	fn serialize_round_trip_reproduces_records() {
		let store = CacheStore::new();

		store
			.save_batch(CredentialBatch {
				access_token: Some(access_token("a", "a", Duration::hours(1))),
				refresh_token: Some(refresh_token()),
				..Default::default()
			})
			.expect("Save.");

		let blob = store.serialize().expect("Serialize should succeed.");
		let restored = CacheStore::new();

		restored.deserialize(&blob).expect("Deserialize should succeed.");

		assert_eq!(restored.serialize().expect("Serialize should succeed."), blob);
	}

	#[derive(Default)]
	struct RecordingPersistence {
		blob: Mutex<Option<Vec<u8>>>,
		calls: Mutex<Vec<CacheAccessArgs>>,
	}
	impl CachePersistence for RecordingPersistence {
		fn before_access(&self, _: &CacheAccessArgs) -> Result<Option<Vec<u8>>, StoreError> {
			Ok(self.blob.lock().clone())
		}

		fn after_access(
			&self,
			args: &CacheAccessArgs,
			snapshot: Option<&[u8]>,
		) -> Result<(), StoreError> {
			self.calls.lock().push(*args);

			if let Some(snapshot) = snapshot {
				*self.blob.lock() = Some(snapshot.to_vec());
			}

			Ok(())
		}
	}

	#[test]
	fn persistence_hooks_report_state_changes_accurately() {
		let persistence = Arc::new(RecordingPersistence::default());
		let store = CacheStore::new().with_persistence(persistence.clone());

		store.save_refresh_token(refresh_token()).expect("Save.");
		store.get_all_refresh_tokens(|_| true).expect("Read.");
		store.delete_access_token(&access_token("a", "a", Duration::hours(1)).key()).expect("Delete.");

		let changed: Vec<_> = persistence.calls.lock().iter().map(|a| a.has_state_changed).collect();

		assert_eq!(changed, vec![true, false, false]);

		let other = CacheStore::new().with_persistence(persistence.clone());

		assert_eq!(
			other.get_all_refresh_tokens(|_| true).expect("Read.").len(),
			1,
			"A second store sees the persisted blob."
		);
	}
}
