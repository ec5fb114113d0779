//! Versioned JSON envelope for persisted caches.
//!
//! ```json
//! {"version":3,"AccessToken":{},"RefreshToken":{},"IdToken":{},"Account":{},"AppMetadata":{}}
//! ```
//!
//! Envelopes without `version` are legacy (v2) blobs: numeric timestamps, `ext_expires_on`,
//! and no `refresh_on`. Unknown top-level and record members are carried through untouched.

// crates.io
use serde::{Deserializer, de::DeserializeOwned};
use serde_json::{Map, Value};
// self
use crate::{
	_prelude::*,
	cache::{
		StoreError,
		key::{CredentialKey, CredentialType},
		record::{
			AccessTokenRecord, AccountRecord, AppMetadataRecord, IdTokenRecord, RefreshTokenRecord,
		},
	},
};

/// Schema version written by this library.
pub const CACHE_FORMAT_VERSION: u64 = 3;

const LEGACY_FORMAT_VERSION: u64 = 2;

/// In-memory collections mirrored by the envelope.
#[derive(Clone, Debug, Default)]
pub(crate) struct CacheContents {
	pub(crate) access_tokens: BTreeMap<CredentialKey, AccessTokenRecord>,
	pub(crate) refresh_tokens: BTreeMap<CredentialKey, RefreshTokenRecord>,
	pub(crate) id_tokens: BTreeMap<CredentialKey, IdTokenRecord>,
	pub(crate) accounts: BTreeMap<CredentialKey, AccountRecord>,
	pub(crate) app_metadata: BTreeMap<CredentialKey, AppMetadataRecord>,
	pub(crate) extra: Map<String, Value>,
}
impl CacheContents {
	pub(crate) fn encode(&self) -> Result<Vec<u8>, StoreError> {
		let mut root = self.extra.clone();

		root.insert("version".into(), Value::from(CACHE_FORMAT_VERSION));
		root.insert(
			CredentialType::AccessToken.section().into(),
			encode_section(&self.access_tokens, Some(CredentialType::AccessToken))?,
		);
		root.insert(
			CredentialType::RefreshToken.section().into(),
			encode_section(&self.refresh_tokens, Some(CredentialType::RefreshToken))?,
		);
		root.insert(
			CredentialType::IdToken.section().into(),
			encode_section(&self.id_tokens, Some(CredentialType::IdToken))?,
		);
		root.insert(
			CredentialType::Account.section().into(),
			encode_section(&self.accounts, None)?,
		);
		root.insert(
			CredentialType::AppMetadata.section().into(),
			encode_section(&self.app_metadata, None)?,
		);

		serde_json::to_vec(&Value::Object(root)).map_err(StoreError::serialization)
	}

	pub(crate) fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
		if bytes.iter().all(u8::is_ascii_whitespace) {
			return Ok(Self::default());
		}

		let mut root = match serde_json::from_slice::<Value>(bytes).map_err(StoreError::serialization)? {
			Value::Object(root) => root,
			_ => return Err(StoreError::serialization("cache blob is not a JSON object")),
		};
		let version = match root.remove("version") {
			None => LEGACY_FORMAT_VERSION,
			Some(value) => parse_version(&value)?,
		};
		let legacy = version <= LEGACY_FORMAT_VERSION;

		Ok(Self {
			access_tokens: decode_section(&mut root, CredentialType::AccessToken, legacy, AccessTokenRecord::key)?,
			refresh_tokens: decode_section(&mut root, CredentialType::RefreshToken, legacy, RefreshTokenRecord::key)?,
			id_tokens: decode_section(&mut root, CredentialType::IdToken, legacy, IdTokenRecord::key)?,
			accounts: decode_section(&mut root, CredentialType::Account, legacy, AccountRecord::key)?,
			app_metadata: decode_section(&mut root, CredentialType::AppMetadata, legacy, AppMetadataRecord::key)?,
			extra: root,
		})
	}
}

fn parse_version(value: &Value) -> Result<u64, StoreError> {
	match value {
		Value::Number(n) => n.as_u64(),
		Value::String(s) => s.parse().ok(),
		_ => None,
	}
	.ok_or_else(|| StoreError::serialization(format!("unsupported cache version {value}")))
}

fn encode_section<R>(
	records: &BTreeMap<CredentialKey, R>,
	credential_type: Option<CredentialType>,
) -> Result<Value, StoreError>
where
	R: Serialize,
{
	let mut section = Map::new();

	for (key, record) in records {
		let mut value = serde_json::to_value(record).map_err(StoreError::serialization)?;

		if let (Some(credential_type), Value::Object(object)) = (credential_type, &mut value) {
			object.insert("credential_type".into(), Value::from(credential_type.section()));
		}

		section.insert(key.to_string(), value);
	}

	Ok(Value::Object(section))
}

fn decode_section<R>(
	root: &mut Map<String, Value>,
	credential_type: CredentialType,
	legacy: bool,
	key_of: fn(&R) -> CredentialKey,
) -> Result<BTreeMap<CredentialKey, R>, StoreError>
where
	R: DeserializeOwned,
{
	let section = match root.remove(credential_type.section()) {
		None | Some(Value::Null) => return Ok(BTreeMap::new()),
		Some(Value::Object(section)) => section,
		Some(_) =>
			return Err(StoreError::serialization(format!(
				"section {} is not a JSON object",
				credential_type.section()
			))),
	};
	let mut records = BTreeMap::new();

	for (stored_key, value) in section {
		let Value::Object(mut object) = value else {
			return Err(StoreError::serialization(format!("record {stored_key} is not a JSON object")));
		};

		object.remove("credential_type");
		migrate_record(&mut object, legacy);

		let record: R = serde_path_to_error::deserialize(Value::Object(object)).map_err(|e| {
			StoreError::serialization(format!("record {stored_key} is invalid at {}: {}", e.path(), e.inner()))
		})?;

		// Keys are recomputed so blobs written with a different casing still line up.
		records.insert(key_of(&record), record);
	}

	Ok(records)
}

fn migrate_record(object: &mut Map<String, Value>, legacy: bool) {
	if let Some(ext) = object.remove("ext_expires_on") {
		object.entry("extended_expires_on").or_insert(ext);
	}
	if legacy {
		object.remove("refresh_on");
	}
}

/// Unix-second timestamps written as strings; readers also accept numbers.
pub(crate) mod unix_seconds {
	// crates.io
	use serde::{
		Deserializer, Serializer,
		de::{Error as DeError, Visitor},
	};
	// self
	use super::*;

	pub(crate) fn serialize<S>(instant: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_str(&instant.unix_timestamp().to_string())
	}

	pub(crate) fn deserialize<'de, D>(deserializer: D) -> Result<OffsetDateTime, D::Error>
	where
		D: Deserializer<'de>,
	{
		deserializer.deserialize_any(UnixSecondsVisitor)
	}

	struct UnixSecondsVisitor;
	impl Visitor<'_> for UnixSecondsVisitor {
		type Value = OffsetDateTime;

		fn expecting(&self, f: &mut Formatter) -> FmtResult {
			f.write_str("unix seconds as a string or number")
		}

		fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
		where
			E: DeError,
		{
			OffsetDateTime::from_unix_timestamp(v).map_err(E::custom)
		}

		fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
		where
			E: DeError,
		{
			self.visit_i64(i64::try_from(v).map_err(E::custom)?)
		}

		fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
		where
			E: DeError,
		{
			self.visit_i64(v.trunc() as i64)
		}

		fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
		where
			E: DeError,
		{
			let seconds = v.trim().parse::<i64>().map_err(E::custom)?;

			self.visit_i64(seconds)
		}
	}

	pub(crate) mod option {
		// self
		use super::*;

		pub(crate) fn serialize<S>(
			instant: &Option<OffsetDateTime>,
			serializer: S,
		) -> Result<S::Ok, S::Error>
		where
			S: Serializer,
		{
			match instant {
				Some(instant) => super::serialize(instant, serializer),
				None => serializer.serialize_none(),
			}
		}

		pub(crate) fn deserialize<'de, D>(deserializer: D) -> Result<Option<OffsetDateTime>, D::Error>
		where
			D: Deserializer<'de>,
		{
			let raw = Option::<Value>::deserialize(deserializer)?;

			match raw {
				None | Some(Value::Null) => Ok(None),
				Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
				Some(value) => super::deserialize(value).map(Some).map_err(DeError::custom),
			}
		}
	}
}

/// Deserializes an optional identifier, treating `""` as absent.
pub(crate) fn empty_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
	D: Deserializer<'de>,
	T: TryFrom<String>,
	T::Error: Display,
{
	match Option::<String>::deserialize(deserializer)? {
		None => Ok(None),
		Some(raw) if raw.is_empty() => Ok(None),
		Some(raw) => T::try_from(raw).map(Some).map_err(serde::de::Error::custom),
	}
}
