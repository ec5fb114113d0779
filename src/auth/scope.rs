//! Scope sets and the subset matching used for access-token lookup.

// std
use std::{cmp::Ordering, slice::Iter, sync::OnceLock};
// crates.io
use base64::{Engine as _, engine::general_purpose::STANDARD_NO_PAD};
use serde::{Deserializer, Serializer, de::Error as DeError, ser::SerializeSeq};
use sha2::{Digest, Sha256};
// self
use crate::_prelude::*;

/// OIDC scopes the client always sends on user flows and never stores in a token's target.
pub const RESERVED_SCOPES: [&str; 3] = ["openid", "profile", "offline_access"];

/// Errors emitted when validating scopes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum ScopeValidationError {
	/// Empty scope entries are not allowed.
	#[error("Scope entries cannot be empty.")]
	Empty,
	/// Scopes cannot contain embedded whitespace characters.
	#[error("Scope contains whitespace: {scope}.")]
	ContainsWhitespace {
		/// The offending scope string.
		scope: String,
	},
}

/// Normalized, case-insensitive set of OAuth scopes.
///
/// Entries keep the casing they were first seen with, but deduplication, ordering, equality,
/// and hashing all use the lower-cased form, so `User.Read` and `user.read` are one scope.
/// The [`fingerprint`](Self::fingerprint) is a cached base64 (no padding) SHA-256 digest of
/// the lower-cased, space-delimited form.
#[derive(Default)]
pub struct ScopeSet {
	scopes: Arc<[String]>,
	fingerprint_cache: OnceLock<String>,
}
impl ScopeSet {
	/// Creates a normalized scope set from any iterator.
	pub fn new<I, S>(scopes: I) -> Result<Self, ScopeValidationError>
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Ok(Self::from_normalized(normalize(scopes)?))
	}

	fn from_normalized(scopes: Arc<[String]>) -> Self {
		Self { scopes, fingerprint_cache: OnceLock::new() }
	}

	/// Number of distinct scopes.
	pub fn len(&self) -> usize {
		self.scopes.len()
	}

	/// Returns true if no scopes are defined.
	pub fn is_empty(&self) -> bool {
		self.scopes.is_empty()
	}

	/// Returns true if the set contains the provided scope, ignoring case.
	pub fn contains(&self, scope: &str) -> bool {
		self.scopes.binary_search_by(|candidate| cmp_ignore_case(candidate, scope)).is_ok()
	}

	/// Iterator over scopes in normalized order.
	pub fn iter(&self) -> impl Iterator<Item = &str> {
		self.scopes.iter().map(|s| s.as_str())
	}

	/// Space-delimited representation, preserving original casing.
	pub fn normalized(&self) -> String {
		self.scopes.join(" ")
	}

	/// Lower-cased, space-delimited representation used inside cache keys.
	pub fn key_target(&self) -> String {
		self.normalized().to_ascii_lowercase()
	}

	/// Stable fingerprint derived from [`key_target`](Self::key_target).
	pub fn fingerprint(&self) -> String {
		self.fingerprint_cache.get_or_init(|| compute_fingerprint(&self.key_target())).clone()
	}

	/// Returns the underlying slice of scope strings.
	pub fn as_slice(&self) -> &[String] {
		&self.scopes
	}

	/// `true` when every scope of `self` (the request) is granted by `cached`.
	///
	/// An empty request is always satisfied. Only access-token lookups use this; refresh
	/// tokens are scope-agnostic.
	pub fn is_satisfied_by(&self, cached: &ScopeSet) -> bool {
		self.iter().all(|scope| cached.contains(scope))
	}

	/// `true` when the two sets share at least one scope.
	pub fn intersects(&self, other: &ScopeSet) -> bool {
		self.iter().any(|scope| other.contains(scope))
	}

	/// Copy of the set with the reserved OIDC scopes removed.
	pub fn without_reserved(&self) -> ScopeSet {
		self.filtered(|scope| !is_reserved(scope))
	}

	/// Copy of the set with the reserved OIDC scopes added.
	pub fn with_reserved(&self) -> ScopeSet {
		let mut scopes = self.scopes.to_vec();

		scopes.extend(RESERVED_SCOPES.iter().map(|s| s.to_string()));

		Self::from_normalized(dedupe(scopes))
	}

	fn filtered(&self, keep: impl Fn(&str) -> bool) -> ScopeSet {
		Self::from_normalized(self.scopes.iter().filter(|s| keep(s)).cloned().collect())
	}
}
impl Clone for ScopeSet {
	fn clone(&self) -> Self {
		Self::from_normalized(self.scopes.clone())
	}
}
impl PartialEq for ScopeSet {
	fn eq(&self, other: &Self) -> bool {
		self.cmp(other) == Ordering::Equal
	}
}
impl Eq for ScopeSet {}
impl PartialOrd for ScopeSet {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}
impl Ord for ScopeSet {
	fn cmp(&self, other: &Self) -> Ordering {
		let lhs = self.scopes.iter();
		let mut rhs = other.scopes.iter();

		for l in lhs {
			match rhs.next() {
				Some(r) => match cmp_ignore_case(l, r) {
					Ordering::Equal => continue,
					ordering => return ordering,
				},
				None => return Ordering::Greater,
			}
		}

		if rhs.next().is_some() { Ordering::Less } else { Ordering::Equal }
	}
}
impl Hash for ScopeSet {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.fingerprint_cache.get_or_init(|| compute_fingerprint(&self.key_target())).hash(state);
	}
}
impl Debug for ScopeSet {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("ScopeSet").field(&self.scopes).finish()
	}
}
impl Display for ScopeSet {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(&self.normalized())
	}
}

/// Iterator over scope strings.
pub struct ScopeIter<'a> {
	inner: Iter<'a, String>,
}
impl<'a> Iterator for ScopeIter<'a> {
	type Item = &'a str;

	fn next(&mut self) -> Option<Self::Item> {
		self.inner.next().map(|s| s.as_str())
	}
}
impl<'a> IntoIterator for &'a ScopeSet {
	type IntoIter = ScopeIter<'a>;
	type Item = &'a str;

	fn into_iter(self) -> Self::IntoIter {
		ScopeIter { inner: self.scopes.iter() }
	}
}
impl TryFrom<Vec<String>> for ScopeSet {
	type Error = ScopeValidationError;

	fn try_from(value: Vec<String>) -> Result<Self, Self::Error> {
		Self::new(value)
	}
}
impl FromStr for ScopeSet {
	type Err = ScopeValidationError;

	/// Parses a space-delimited scope string; an empty string is the empty set.
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		if s.is_empty() {
			return Ok(Self::default());
		}
		if s.chars().all(char::is_whitespace) {
			return Err(ScopeValidationError::Empty);
		}

		Self::new(s.split_whitespace())
	}
}
impl Serialize for ScopeSet {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		let mut seq = serializer.serialize_seq(Some(self.scopes.len()))?;

		for scope in self.scopes.iter() {
			seq.serialize_element(scope)?;
		}

		seq.end()
	}
}
impl<'de> Deserialize<'de> for ScopeSet {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		let values = <Vec<String>>::deserialize(deserializer)?;

		ScopeSet::new(values).map_err(DeError::custom)
	}
}

/// Serde adapter storing a [`ScopeSet`] as one space-delimited string (`target`).
pub(crate) mod space_delimited {
	// crates.io
	use serde::{Deserializer, Serializer, de::Error as DeError};
	// self
	use super::*;

	pub(crate) fn serialize<S>(scopes: &ScopeSet, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_str(&scopes.normalized())
	}

	pub(crate) fn deserialize<'de, D>(deserializer: D) -> Result<ScopeSet, D::Error>
	where
		D: Deserializer<'de>,
	{
		let raw = String::deserialize(deserializer)?;

		ScopeSet::new(raw.split_whitespace()).map_err(DeError::custom)
	}
}

/// Returns `true` for `openid`, `profile`, and `offline_access`.
pub fn is_reserved(scope: &str) -> bool {
	RESERVED_SCOPES.iter().any(|reserved| reserved.eq_ignore_ascii_case(scope))
}

fn normalize<I, S>(scopes: I) -> Result<Arc<[String]>, ScopeValidationError>
where
	I: IntoIterator<Item = S>,
	S: Into<String>,
{
	let mut owned = Vec::new();

	for scope in scopes {
		let scope: String = scope.into();

		if scope.is_empty() {
			return Err(ScopeValidationError::Empty);
		}
		if scope.chars().any(char::is_whitespace) {
			return Err(ScopeValidationError::ContainsWhitespace { scope });
		}

		owned.push(scope);
	}

	Ok(dedupe(owned))
}

fn dedupe(scopes: Vec<String>) -> Arc<[String]> {
	let mut seen = BTreeMap::new();

	for scope in scopes {
		seen.entry(scope.to_ascii_lowercase()).or_insert(scope);
	}

	seen.into_values().collect()
}

fn cmp_ignore_case(lhs: &str, rhs: &str) -> Ordering {
	lhs.bytes().map(|b| b.to_ascii_lowercase()).cmp(rhs.bytes().map(|b| b.to_ascii_lowercase()))
}

fn compute_fingerprint(key_target: &str) -> String {
	let mut hasher = Sha256::new();

	hasher.update(key_target.as_bytes());

	STANDARD_NO_PAD.encode(hasher.finalize())
}
