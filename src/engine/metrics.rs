//! In-process counters describing engine activity, available without the `metrics` feature.

// std
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters for engine activity.
#[derive(Debug, Default)]
pub struct EngineMetrics {
	cache_hits: AtomicU64,
	network_calls: AtomicU64,
	refreshes: AtomicU64,
	stale_fallbacks: AtomicU64,
	failures: AtomicU64,
}
impl EngineMetrics {
	/// Requests answered from cache without a network call.
	pub fn cache_hits(&self) -> u64 {
		self.cache_hits.load(Ordering::Relaxed)
	}

	/// Token-endpoint calls issued, retries included.
	pub fn network_calls(&self) -> u64 {
		self.network_calls.load(Ordering::Relaxed)
	}

	/// Tokens obtained from the authority and written to the cache.
	pub fn refreshes(&self) -> u64 {
		self.refreshes.load(Ordering::Relaxed)
	}

	/// Stale tokens served because the authority was unavailable.
	pub fn stale_fallbacks(&self) -> u64 {
		self.stale_fallbacks.load(Ordering::Relaxed)
	}

	/// Requests that ended in an error.
	pub fn failures(&self) -> u64 {
		self.failures.load(Ordering::Relaxed)
	}

	pub(crate) fn record_cache_hit(&self) {
		self.cache_hits.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_network_call(&self) {
		self.network_calls.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_refresh(&self) {
		self.refreshes.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_stale_fallback(&self) {
		self.stale_fallbacks.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_failure(&self) {
		self.failures.fetch_add(1, Ordering::Relaxed);
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn counters_are_independent() {
		let metrics = EngineMetrics::default();

		metrics.record_network_call();
		metrics.record_network_call();
		metrics.record_stale_fallback();

		assert_eq!(metrics.network_calls(), 2);
		assert_eq!(metrics.stale_fallbacks(), 1);
		assert_eq!(metrics.cache_hits(), 0);
		assert_eq!(metrics.refreshes(), 0);
		assert_eq!(metrics.failures(), 0);
	}
}
