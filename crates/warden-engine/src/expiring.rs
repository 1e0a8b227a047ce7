//! Generic concurrent map with per-entry idle expiry.
//!
//! [`ExpiringMap`] backs both decision caches: the raw-context →
//! delegate-context cache and the per-context granted-permission cache.
//! Entries expire a fixed idle window after their last access; expired
//! entries are dropped lazily, either when touched or by an on-access
//! sweep that runs every [`SWEEP_INTERVAL`] operations. There is no
//! background reaper thread — callers that stop using a map simply let it
//! drop.
//!
//! All operations are safe under concurrent `get` / `put_if_absent` /
//! `clear` with no caller-visible partial states.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Operations between opportunistic full sweeps of expired entries.
const SWEEP_INTERVAL: u64 = 64;

/// A concurrent associative container whose entries expire after a fixed
/// idle time.
///
/// Reads refresh an entry's idle clock. Values are cloned out, so `V` is
/// typically an `Arc` or another cheap handle.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use warden_engine::ExpiringMap;
///
/// let cache: ExpiringMap<String, u32> = ExpiringMap::new(Duration::from_secs(60));
///
/// assert_eq!(cache.put_if_absent("a".to_string(), 1), 1);
/// // First writer wins; losers adopt the existing value.
/// assert_eq!(cache.put_if_absent("a".to_string(), 2), 1);
/// assert_eq!(cache.get(&"a".to_string()), Some(1));
/// ```
pub struct ExpiringMap<K, V> {
    entries: DashMap<K, Slot<V>>,
    ttl: Duration,
    /// Base instant for the per-slot millisecond clocks.
    epoch: Instant,
    ops: AtomicU64,
}

// Not derived: the derive would bound only on Debug, while the inner
// DashMap's Debug impl also needs the map's own key bounds.
impl<K: Eq + Hash, V> fmt::Debug for ExpiringMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpiringMap")
            .field("ttl", &self.ttl)
            .field("entries", &self.entries.len())
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct Slot<V> {
    value: V,
    /// Milliseconds since `epoch` at last access.
    touched: AtomicU64,
}

impl<K, V> ExpiringMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Creates an empty map whose entries expire `ttl` after last access.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            epoch: Instant::now(),
            ops: AtomicU64::new(0),
        }
    }

    /// Returns the configured idle window.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn now_millis(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn is_fresh(&self, slot: &Slot<V>, now: u64) -> bool {
        let ttl = u64::try_from(self.ttl.as_millis()).unwrap_or(u64::MAX);
        now.saturating_sub(slot.touched.load(Ordering::Relaxed)) <= ttl
    }

    /// Looks up a live entry, refreshing its idle clock.
    ///
    /// An expired entry is removed and reported as absent.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<V> {
        self.maybe_sweep();
        let now = self.now_millis();
        if let Some(slot) = self.entries.get(key) {
            if self.is_fresh(&slot, now) {
                slot.touched.store(now, Ordering::Relaxed);
                return Some(slot.value.clone());
            }
        }
        // Entry was expired (or never existed). Drop it only if it is
        // still expired, so a concurrent refresh is not discarded.
        self.entries
            .remove_if(key, |_, slot| !self.is_fresh(slot, self.now_millis()));
        None
    }

    /// Inserts `value` unless a live entry already exists, returning the
    /// winning value either way.
    ///
    /// Two racing writers both succeed locally, but only one value is
    /// retained and both callers converge on it.
    pub fn put_if_absent(&self, key: K, value: V) -> V {
        self.maybe_sweep();
        let now = self.now_millis();
        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                if self.is_fresh(occupied.get(), now) {
                    occupied.get().touched.store(now, Ordering::Relaxed);
                    occupied.get().value.clone()
                } else {
                    occupied.insert(Slot {
                        value: value.clone(),
                        touched: AtomicU64::new(now),
                    });
                    value
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Slot {
                    value: value.clone(),
                    touched: AtomicU64::new(now),
                });
                value
            }
        }
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of retained entries, live or not yet swept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no entries are retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Visits every live entry.
    pub fn for_each(&self, mut visit: impl FnMut(&K, &V)) {
        let now = self.now_millis();
        for entry in self.entries.iter() {
            if self.is_fresh(entry.value(), now) {
                visit(entry.key(), &entry.value().value);
            }
        }
    }

    fn maybe_sweep(&self) {
        if self.ops.fetch_add(1, Ordering::Relaxed) % SWEEP_INTERVAL != 0 {
            return;
        }
        let now = self.now_millis();
        self.entries.retain(|_, slot| self.is_fresh(slot, now));
    }
}
