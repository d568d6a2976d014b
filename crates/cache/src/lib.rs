//! Result cache: bounded LRU with TTL expiry and witness-mtime invalidation.
//!
//! The cache is generic over the stored value so the router can keep its own
//! result payload out of this crate. The structure is a slab of entries
//! threaded through an intrusive doubly-linked recency list plus a hash
//! index, giving O(1) access, insertion, and move-to-front.
//!
//! Validity rules, checked on every lookup:
//! - an entry past its `expires_at` is removed and counts as an expiration;
//! - an entry whose stored witness mtime differs from the caller's current
//!   witness mtime is removed and reported [`CacheLookup::Stale`].
//!
//! Time-sensitive operations have `*_at` variants taking an explicit
//! millisecond clock; the plain wrappers use the system clock.

pub mod key;

pub use key::cache_key;

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

const NIL: usize = usize::MAX;

/// Outcome of a cache lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup<T> {
    /// Valid entry; value returned and promoted to most-recently-used.
    Hit(T),
    /// No entry (or an expired one, now removed).
    Miss,
    /// Entry existed but a witness file changed; it has been removed.
    Stale,
}

/// One stored result and its validity witnesses.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub key: String,
    pub value: T,
    pub inserted_at_ms: u64,
    pub last_access_ms: u64,
    /// Absolute expiry; `None` when TTL is disabled.
    pub expires_at_ms: Option<u64>,
    pub witness_paths: Vec<String>,
    pub witness_max_mtime_ns: i64,
    pub byte_size_hint: usize,
    prev: usize,
    next: usize,
}

/// Counters reported by [`QueryCache::stats`].
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub stale_invalidations: u64,
    pub size: usize,
    pub capacity: usize,
    /// `hits / (hits + misses)`; 0 when no requests were made.
    pub hit_rate: f64,
}

/// Bounded LRU + TTL + witness cache. All operations take `&mut self`; the
/// owner provides the coarse lock.
#[derive(Debug)]
pub struct QueryCache<T> {
    slots: Vec<Option<CacheEntry<T>>>,
    index: HashMap<String, usize>,
    free: Vec<usize>,
    head: usize,
    tail: usize,
    capacity: usize,
    ttl_ms: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
    stale_invalidations: u64,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}

impl<T: Clone> QueryCache<T> {
    /// Cache bounded to `max_entries`; `ttl_ms == 0` disables TTL expiry.
    pub fn new(max_entries: usize, ttl_ms: u64) -> Self {
        Self {
            slots: Vec::new(),
            index: HashMap::new(),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
            capacity: max_entries.max(1),
            ttl_ms,
            hits: 0,
            misses: 0,
            evictions: 0,
            expirations: 0,
            stale_invalidations: 0,
        }
    }

    /// Look up against the system clock.
    pub fn get(&mut self, key: &str, current_witness_mtime_ns: i64) -> CacheLookup<T> {
        self.get_at(key, current_witness_mtime_ns, now_ms())
    }

    /// Look up at an explicit observation time.
    pub fn get_at(
        &mut self,
        key: &str,
        current_witness_mtime_ns: i64,
        now_ms: u64,
    ) -> CacheLookup<T> {
        let Some(&slot) = self.index.get(key) else {
            self.misses += 1;
            return CacheLookup::Miss;
        };
        let entry = self.slots[slot].as_ref().expect("indexed slot occupied");

        if entry
            .expires_at_ms
            .is_some_and(|expires| now_ms > expires)
        {
            self.remove_slot(slot);
            self.expirations += 1;
            self.misses += 1;
            return CacheLookup::Miss;
        }
        if entry.witness_max_mtime_ns != current_witness_mtime_ns {
            self.remove_slot(slot);
            self.stale_invalidations += 1;
            self.misses += 1;
            return CacheLookup::Stale;
        }

        self.detach(slot);
        self.attach_front(slot);
        let entry = self.slots[slot].as_mut().expect("indexed slot occupied");
        entry.last_access_ms = now_ms;
        self.hits += 1;
        CacheLookup::Hit(entry.value.clone())
    }

    /// Insert or replace against the system clock.
    pub fn put(
        &mut self,
        key: &str,
        value: T,
        witness_paths: Vec<String>,
        witness_max_mtime_ns: i64,
        byte_size_hint: usize,
    ) {
        self.put_at(
            key,
            value,
            witness_paths,
            witness_max_mtime_ns,
            byte_size_hint,
            now_ms(),
        );
    }

    /// Insert or replace at an explicit time. Re-putting an existing key
    /// replaces the entry and refreshes its TTL and recency.
    pub fn put_at(
        &mut self,
        key: &str,
        value: T,
        witness_paths: Vec<String>,
        witness_max_mtime_ns: i64,
        byte_size_hint: usize,
        now_ms: u64,
    ) {
        let expires_at_ms = (self.ttl_ms > 0).then(|| now_ms + self.ttl_ms);

        if let Some(&slot) = self.index.get(key) {
            let entry = self.slots[slot].as_mut().expect("indexed slot occupied");
            entry.value = value;
            entry.witness_paths = witness_paths;
            entry.witness_max_mtime_ns = witness_max_mtime_ns;
            entry.byte_size_hint = byte_size_hint;
            entry.inserted_at_ms = now_ms;
            entry.last_access_ms = now_ms;
            entry.expires_at_ms = expires_at_ms;
            self.detach(slot);
            self.attach_front(slot);
            return;
        }

        if self.index.len() >= self.capacity {
            let lru = self.tail;
            debug_assert_ne!(lru, NIL, "full cache has a tail");
            self.remove_slot(lru);
            self.evictions += 1;
        }

        let entry = CacheEntry {
            key: key.to_string(),
            value,
            inserted_at_ms: now_ms,
            last_access_ms: now_ms,
            expires_at_ms,
            witness_paths,
            witness_max_mtime_ns,
            byte_size_hint,
            prev: NIL,
            next: NIL,
        };
        let slot = match self.free.pop() {
            Some(s) => {
                self.slots[s] = Some(entry);
                s
            }
            None => {
                self.slots.push(Some(entry));
                self.slots.len() - 1
            }
        };
        self.index.insert(key.to_string(), slot);
        self.attach_front(slot);
    }

    /// Remove every entry with a witness path matching the predicate; returns
    /// the number removed.
    pub fn invalidate<F: Fn(&str) -> bool>(&mut self, pred: F) -> usize {
        let doomed: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| {
                s.as_ref()
                    .filter(|e| e.witness_paths.iter().any(|p| pred(p)))
                    .map(|_| i)
            })
            .collect();
        for slot in &doomed {
            self.remove_slot(*slot);
        }
        doomed.len()
    }

    /// Drop every entry and reset the counters.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.index.clear();
        self.free.clear();
        self.head = NIL;
        self.tail = NIL;
        self.hits = 0;
        self.misses = 0;
        self.evictions = 0;
        self.expirations = 0;
        self.stale_invalidations = 0;
    }

    /// Counters and occupancy, after sweeping expired entries.
    pub fn stats(&mut self) -> CacheStats {
        self.stats_at(now_ms())
    }

    /// [`QueryCache::stats`] at an explicit observation time.
    pub fn stats_at(&mut self, now_ms: u64) -> CacheStats {
        self.purge_expired(now_ms);
        let requests = self.hits + self.misses;
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            expirations: self.expirations,
            stale_invalidations: self.stale_invalidations,
            size: self.index.len(),
            capacity: self.capacity,
            hit_rate: if requests == 0 {
                0.0
            } else {
                self.hits as f64 / requests as f64
            },
        }
    }

    /// Live entry count.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    fn purge_expired(&mut self, now_ms: u64) {
        let doomed: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| {
                s.as_ref()
                    .filter(|e| e.expires_at_ms.is_some_and(|x| now_ms > x))
                    .map(|_| i)
            })
            .collect();
        for slot in doomed {
            self.remove_slot(slot);
            self.expirations += 1;
        }
    }

    fn remove_slot(&mut self, slot: usize) {
        self.detach(slot);
        let entry = self.slots[slot].take().expect("removing occupied slot");
        self.index.remove(&entry.key);
        self.free.push(slot);
    }

    fn detach(&mut self, slot: usize) {
        let (prev, next) = {
            let e = self.slots[slot].as_ref().expect("detaching occupied slot");
            (e.prev, e.next)
        };
        if prev != NIL {
            self.slots[prev].as_mut().expect("linked slot").next = next;
        } else if self.head == slot {
            self.head = next;
        }
        if next != NIL {
            self.slots[next].as_mut().expect("linked slot").prev = prev;
        } else if self.tail == slot {
            self.tail = prev;
        }
        let e = self.slots[slot].as_mut().expect("detaching occupied slot");
        e.prev = NIL;
        e.next = NIL;
    }

    fn attach_front(&mut self, slot: usize) {
        let old_head = self.head;
        {
            let e = self.slots[slot].as_mut().expect("attaching occupied slot");
            e.prev = NIL;
            e.next = old_head;
        }
        if old_head != NIL {
            self.slots[old_head].as_mut().expect("linked slot").prev = slot;
        }
        self.head = slot;
        if self.tail == NIL {
            self.tail = slot;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CacheLookup, QueryCache};

    fn put_simple(cache: &mut QueryCache<u32>, key: &str, value: u32, now: u64) {
        cache.put_at(key, value, vec![format!("/w/{key}")], 1, 64, now);
    }

    #[test]
    fn put_twice_is_idempotent_up_to_recency() {
        let mut a = QueryCache::new(10, 0);
        let mut b = QueryCache::new(10, 0);
        put_simple(&mut a, "k", 1, 100);
        put_simple(&mut b, "k", 1, 100);
        put_simple(&mut b, "k", 1, 200);
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
        assert_eq!(a.get_at("k", 1, 300), b.get_at("k", 1, 300));
        assert_eq!(a.stats_at(300).size, b.stats_at(300).size);
    }

    #[test]
    fn lru_bound_holds_and_evicts_the_oldest() {
        let mut cache = QueryCache::new(3, 0);
        for (i, key) in ["a", "b", "c"].iter().enumerate() {
            put_simple(&mut cache, key, i as u32, 100 + i as u64);
            assert!(cache.len() <= 3);
        }
        put_simple(&mut cache, "d", 9, 200);
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get_at("a", 1, 300), CacheLookup::Miss);
        assert!(matches!(cache.get_at("b", 1, 300), CacheLookup::Hit(1)));
        assert_eq!(cache.stats_at(300).evictions, 1);
    }

    #[test]
    fn a_hit_protects_an_entry_from_eviction() {
        let mut cache = QueryCache::new(2, 0);
        put_simple(&mut cache, "a", 1, 100);
        put_simple(&mut cache, "b", 2, 101);
        assert!(matches!(cache.get_at("a", 1, 102), CacheLookup::Hit(1)));
        put_simple(&mut cache, "c", 3, 103); // evicts b, the LRU
        assert!(matches!(cache.get_at("a", 1, 104), CacheLookup::Hit(1)));
        assert_eq!(cache.get_at("b", 1, 105), CacheLookup::Miss);
    }

    #[test]
    fn ttl_expiry_returns_miss_after_the_deadline() {
        let mut cache = QueryCache::new(10, 1_000);
        put_simple(&mut cache, "k", 7, 10_000);
        assert!(matches!(
            cache.get_at("k", 1, 10_500),
            CacheLookup::Hit(7)
        ));
        assert_eq!(cache.get_at("k", 1, 11_001), CacheLookup::Miss);
        let stats = cache.stats_at(11_001);
        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.size, 0);
    }

    #[test]
    fn zero_ttl_disables_expiry() {
        let mut cache = QueryCache::new(10, 0);
        put_simple(&mut cache, "k", 7, 0);
        assert!(matches!(
            cache.get_at("k", 1, u64::MAX),
            CacheLookup::Hit(7)
        ));
    }

    #[test]
    fn witness_mtime_change_is_stale_and_removes() {
        let mut cache = QueryCache::new(10, 0);
        cache.put_at("k", 7u32, vec!["/d/f".into()], 1_000, 64, 100);
        assert_eq!(cache.get_at("k", 2_000, 200), CacheLookup::Stale);
        assert_eq!(cache.get_at("k", 2_000, 201), CacheLookup::Miss);
        let stats = cache.stats_at(300);
        assert_eq!(stats.stale_invalidations, 1);
    }

    #[test]
    fn invalidate_by_witness_predicate() {
        let mut cache = QueryCache::new(10, 0);
        cache.put_at("k1", 1u32, vec!["/d/a".into()], 1, 64, 100);
        cache.put_at("k2", 2u32, vec!["/d/b".into()], 1, 64, 100);
        cache.put_at("k3", 3u32, vec!["/e/c".into()], 1, 64, 100);
        let removed = cache.invalidate(|p| p.starts_with("/d/"));
        assert_eq!(removed, 2);
        assert_eq!(cache.len(), 1);
        assert!(matches!(cache.get_at("k3", 1, 200), CacheLookup::Hit(3)));
    }

    #[test]
    fn hit_rate_counts_hits_over_requests() {
        let mut cache = QueryCache::new(10, 0);
        assert_eq!(cache.stats_at(0).hit_rate, 0.0);
        put_simple(&mut cache, "k", 1, 100);
        assert_eq!(cache.get_at("miss", 1, 101), CacheLookup::Miss);
        assert!(matches!(cache.get_at("k", 1, 102), CacheLookup::Hit(1)));
        let stats = cache.stats_at(103);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 0.5).abs() < 1e-12);
    }

    #[test]
    fn clear_resets_entries_and_counters() {
        let mut cache = QueryCache::new(10, 0);
        put_simple(&mut cache, "k", 1, 100);
        let _ = cache.get_at("k", 1, 101);
        cache.clear();
        assert!(cache.is_empty());
        let stats = cache.stats_at(200);
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
    }

    #[test]
    fn heavy_churn_keeps_list_and_index_consistent() {
        let mut cache = QueryCache::new(4, 0);
        for round in 0u64..50 {
            let key = format!("k{}", round % 7);
            cache.put_at(&key, round as u32, vec![key.clone()], 1, 8, round);
            let probe = format!("k{}", (round + 3) % 7);
            let _ = cache.get_at(&probe, 1, round);
            assert!(cache.len() <= 4);
        }
        let stats = cache.stats_at(1_000);
        assert_eq!(stats.size, cache.len());
    }
}
