//! Token cache: key derivation, credential records, the shared store, and its persisted format.

pub mod format;
pub mod key;
pub mod persistence;
pub mod record;
pub mod store;

pub use format::CACHE_FORMAT_VERSION;
pub use key::*;
pub use persistence::*;
pub use record::*;
pub use store::*;

// self
use crate::_prelude::*;

/// Error type produced by [`CacheStore`] and [`CachePersistence`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// The cache blob could not be encoded or decoded.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// The persistence backend failed.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}
impl StoreError {
	pub(crate) fn serialization(message: impl Display) -> Self {
		Self::Serialization { message: message.to_string() }
	}

	pub(crate) fn backend(message: impl Display) -> Self {
		Self::Backend { message: message.to_string() }
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn store_error_converts_into_engine_error_with_source() {
		let store_error = StoreError::backend("disk unavailable");
		let error: Error = store_error.clone().into();

		assert!(matches!(error, Error::Storage(_)));
		assert!(error.to_string().contains("disk unavailable"));

		let source =
			StdError::source(&error).expect("Engine error should expose the store error as source.");

		assert_eq!(source.to_string(), store_error.to_string());
	}
}
