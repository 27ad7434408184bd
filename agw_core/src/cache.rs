//! Time-bounded cache for fetched collateral.
//!
//! Entries expire lazily: the first reader to observe an expired entry
//! removes it, there is no background sweep. There is also no size bound.
//! The key space (platform identifier x quote type) has a small practical
//! cardinality, so unbounded growth over the process lifetime is an
//! accepted tradeoff rather than an oversight.
//!
//! Concurrent in-flight fetches for the same missing key are not
//! deduplicated: both callers miss, both fetch, and last write wins.
//! Collateral for the same key is fungible, so this is an inefficiency and
//! not a correctness bug.

use std::{
	sync::Arc,
	time::{Duration, Instant},
};

use dashmap::DashMap;

/// How long a cached collateral entry stays valid.
pub const COLLATERAL_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Build the cache key for a quote identity.
///
/// NOTE: the two fields are joined without namespacing. A platform
/// identifier containing a colon could collide with another identity;
/// FMSPCs are fixed-width hex in practice so this stays a documented risk
/// rather than a handled case.
#[must_use]
pub fn collateral_cache_key(fmspc: &str, quote_type: &str) -> String {
	format!("{fmspc}:{quote_type}")
}

struct Entry<V> {
	value: Arc<V>,
	expires_at: Instant,
}

/// Concurrent TTL cache. Values are stored behind an `Arc` and handed out
/// as shared read-only views; callers must not rely on exclusive access.
///
/// Synchronization is internal (sharded locking via `DashMap`), so lookups
/// for unrelated keys never serialize behind each other.
pub struct TtlCache<V> {
	ttl: Duration,
	entries: DashMap<String, Entry<V>>,
}

impl<V> TtlCache<V> {
	/// Cache with the standard collateral TTL.
	#[must_use]
	pub fn new() -> Self {
		Self::with_ttl(COLLATERAL_CACHE_TTL)
	}

	/// Cache with a caller-chosen TTL. Tests use this to exercise expiry
	/// without waiting out the real TTL.
	#[must_use]
	pub fn with_ttl(ttl: Duration) -> Self {
		Self { ttl, entries: DashMap::new() }
	}

	/// Look up `key`, treating an expired entry as absent and removing it.
	///
	/// Two readers racing on an expired entry may both attempt the removal;
	/// the loser removes nothing and both correctly report absent.
	pub fn get(&self, key: &str) -> Option<Arc<V>> {
		{
			let entry = self.entries.get(key)?;
			if Instant::now() <= entry.expires_at {
				return Some(entry.value.clone());
			}
			// the shard guard must drop before the removal below
		}
		self.entries.remove(key);
		None
	}

	/// Insert or overwrite `key`. The expiry is computed from this call's
	/// own insertion time.
	pub fn put(&self, key: String, value: V) -> Arc<V> {
		let value = Arc::new(value);
		let entry = Entry {
			value: value.clone(),
			expires_at: Instant::now() + self.ttl,
		};
		self.entries.insert(key, entry);
		value
	}

	/// Number of entries currently held, expired ones included.
	#[must_use]
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}
}

impl<V> Default for TtlCache<V> {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn cache_key_joins_identity_fields() {
		assert_eq!(collateral_cache_key("ABCD1234", "TDX"), "ABCD1234:TDX");
		// keys are case sensitive, exact match
		assert_ne!(
			collateral_cache_key("abcd1234", "TDX"),
			collateral_cache_key("ABCD1234", "TDX")
		);
	}

	#[test]
	fn put_then_get_returns_value() {
		let cache = TtlCache::new();
		cache.put("k".to_string(), 42u32);
		assert_eq!(*cache.get("k").unwrap(), 42);
	}

	#[test]
	fn absent_key_reports_absent() {
		let cache: TtlCache<u32> = TtlCache::new();
		assert!(cache.get("nope").is_none());
	}

	#[test]
	fn expiry_is_lazy_and_sticky() {
		let cache = TtlCache::with_ttl(Duration::from_millis(5));
		cache.put("k".to_string(), 1u32);
		assert_eq!(cache.len(), 1);

		std::thread::sleep(Duration::from_millis(20));

		// first read observes expiry and removes the entry
		assert!(cache.get("k").is_none());
		assert!(cache.is_empty());
		// expiry does not self-heal
		assert!(cache.get("k").is_none());
	}

	#[test]
	fn overwrite_resets_expiry_from_own_insertion_time() {
		let cache = TtlCache::with_ttl(Duration::from_millis(60));
		cache.put("k".to_string(), 1u32);
		std::thread::sleep(Duration::from_millis(40));

		cache.put("k".to_string(), 2u32);
		std::thread::sleep(Duration::from_millis(40));

		// 80ms after the first insert but only 40ms after the second; the
		// entry must still be live because expiry tracks its own insert.
		assert_eq!(*cache.get("k").unwrap(), 2);
	}

	#[test]
	fn concurrent_puts_leave_one_of_the_values() {
		let cache = Arc::new(TtlCache::new());

		let handles: Vec<_> = (0..8u32)
			.map(|i| {
				let cache = cache.clone();
				std::thread::spawn(move || {
					for _ in 0..100 {
						cache.put("shared".to_string(), i);
					}
				})
			})
			.collect();
		for handle in handles {
			handle.join().unwrap();
		}

		let value = *cache.get("shared").unwrap();
		assert!(value < 8, "got {value}");
		assert_eq!(cache.len(), 1);
	}

	#[test]
	fn concurrent_reads_share_the_same_allocation() {
		let cache = TtlCache::new();
		let stored = cache.put("k".to_string(), vec![1u8, 2, 3]);
		let read = cache.get("k").unwrap();
		assert!(Arc::ptr_eq(&stored, &read));
	}
}
