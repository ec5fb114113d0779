//! Persistence hooks invoked around every cache operation.

// std
use std::{
	fs::{self, File},
	io::Write,
	path::{Path, PathBuf},
};
// self
use crate::{_prelude::*, cache::StoreError};

/// Kind of cache operation a hook is wrapping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheOperation {
	/// Lookup or enumeration; never mutates.
	Read,
	/// Save, delete, or clear.
	Write,
}

/// Arguments passed to [`CachePersistence`] hooks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheAccessArgs {
	/// Operation being wrapped.
	pub operation: CacheOperation,
	/// `true` only when the operation actually changed the cache contents.
	pub has_state_changed: bool,
}

/// Caller-supplied hooks keeping an external store in sync with the in-memory cache.
///
/// Hooks run synchronously while the store's write lock is held, so a hook observes a
/// consistent blob and no other operation interleaves with it.
pub trait CachePersistence
where
	Self: Send + Sync,
{
	/// Returns the blob to load before the operation runs, or `None` to keep memory as is.
	fn before_access(&self, args: &CacheAccessArgs) -> Result<Option<Vec<u8>>, StoreError>;

	/// Receives the serialized cache after the operation; `snapshot` is `Some` only when
	/// [`CacheAccessArgs::has_state_changed`] is `true`.
	fn after_access(&self, args: &CacheAccessArgs, snapshot: Option<&[u8]>) -> Result<(), StoreError>;
}

/// Persists the cache blob to a JSON file, replacing it atomically after each change.
#[derive(Clone, Debug)]
pub struct FileCachePersistence {
	path: PathBuf,
}
impl FileCachePersistence {
	/// Uses (or creates on first write) the file at `path`.
	pub fn new(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let path = path.into();

		ensure_parent_exists(&path)?;

		Ok(Self { path })
	}

	/// Location of the cache file.
	pub fn path(&self) -> &Path {
		&self.path
	}

	fn load(&self) -> Result<Option<Vec<u8>>, StoreError> {
		if !self.path.exists() {
			return Ok(None);
		}

		let bytes = fs::read(&self.path).map_err(|e| {
			StoreError::backend(format!("Failed to read {}: {e}", self.path.display()))
		})?;

		Ok(Some(bytes))
	}

	fn persist(&self, snapshot: &[u8]) -> Result<(), StoreError> {
		ensure_parent_exists(&self.path)?;

		let mut tmp_path = self.path.clone();

		tmp_path.set_extension("tmp");

		{
			let mut file = File::create(&tmp_path).map_err(|e| {
				StoreError::backend(format!("Failed to create {}: {e}", tmp_path.display()))
			})?;

			file.write_all(snapshot).map_err(|e| {
				StoreError::backend(format!("Failed to write {}: {e}", tmp_path.display()))
			})?;
			file.sync_all().map_err(|e| {
				StoreError::backend(format!("Failed to sync {}: {e}", tmp_path.display()))
			})?;
		}

		fs::rename(&tmp_path, &self.path).map_err(|e| {
			StoreError::backend(format!("Failed to replace {}: {e}", self.path.display()))
		})
	}
}
impl CachePersistence for FileCachePersistence {
	fn before_access(&self, _: &CacheAccessArgs) -> Result<Option<Vec<u8>>, StoreError> {
		self.load()
	}

	fn after_access(&self, args: &CacheAccessArgs, snapshot: Option<&[u8]>) -> Result<(), StoreError> {
		match snapshot {
			Some(snapshot) if args.has_state_changed => self.persist(snapshot),
			_ => Ok(()),
		}
	}
}

fn ensure_parent_exists(path: &Path) -> Result<(), StoreError> {
	if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
		fs::create_dir_all(parent).map_err(|e| {
			StoreError::backend(format!("Failed to create cache directory {}: {e}", parent.display()))
		})?;
	}

	Ok(())
}
