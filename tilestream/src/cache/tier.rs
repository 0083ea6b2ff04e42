//! Byte-bounded LRU cache tier with deadline expiry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use crate::render::Drawable;
use crate::tile::TileId;

/// One cached tile.
#[derive(Debug, Clone)]
struct CacheSlot {
    drawable: Arc<Drawable>,
    size: usize,
    /// Absolute invalidation deadline; `None` means valid forever.
    deadline: Option<Instant>,
    /// Recency tick for LRU ordering; larger is more recent.
    last_used: u64,
}

/// Cache statistics.
#[derive(Debug, Default, Clone)]
pub struct CacheStats {
    /// Lookups that found an entry.
    pub hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
    /// Entries removed to respect the capacity bound.
    pub evictions: u64,
}

/// A capacity-bounded LRU store of drawable tiles keyed by identity.
///
/// `get` refreshes recency, `peek` does not - render-thread lookups use
/// `peek` so drawing never perturbs eviction order. Insertion is never
/// rejected: an entry larger than the whole capacity is accepted and the
/// tier temporarily overflows by that one entry rather than starving large
/// tiles.
///
/// The tier itself is not synchronized; the owning layer guards both of its
/// tiers behind one exclusive region.
#[derive(Debug)]
pub struct TileCache {
    slots: HashMap<TileId, CacheSlot>,
    capacity: usize,
    total_size: usize,
    tick: u64,
    stats: CacheStats,
}

impl TileCache {
    /// Create a tier with the given byte capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: HashMap::new(),
            capacity,
            total_size: 0,
            tick: 0,
            stats: CacheStats::default(),
        }
    }

    /// Capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Change the capacity, evicting least-recently-used entries if the
    /// current contents no longer fit.
    pub fn resize(&mut self, capacity: usize) {
        self.capacity = capacity;
        self.evict_to_fit(0);
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the tier is empty.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Total resident size of all entries in bytes.
    pub fn total_size(&self) -> usize {
        self.total_size
    }

    /// Insert an entry, evicting least-recently-used entries first until the
    /// new entry fits. Replaces any existing entry under the same identity.
    pub fn put(&mut self, id: TileId, drawable: Arc<Drawable>, size: usize) {
        if let Some(old) = self.slots.remove(&id) {
            self.total_size -= old.size;
        }
        self.evict_to_fit(size);
        self.tick += 1;
        self.slots.insert(
            id,
            CacheSlot {
                drawable,
                size,
                deadline: None,
                last_used: self.tick,
            },
        );
        self.total_size += size;
    }

    /// Look up an entry and mark it recently used.
    pub fn get(&mut self, id: TileId) -> Option<Arc<Drawable>> {
        self.tick += 1;
        let tick = self.tick;
        match self.slots.get_mut(&id) {
            Some(slot) => {
                slot.last_used = tick;
                self.stats.hits += 1;
                Some(Arc::clone(&slot.drawable))
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Look up an entry without updating recency.
    pub fn peek(&self, id: TileId) -> Option<Arc<Drawable>> {
        self.slots.get(&id).map(|slot| Arc::clone(&slot.drawable))
    }

    /// Whether an entry exists, regardless of validity.
    pub fn exists(&self, id: TileId) -> bool {
        self.slots.contains_key(&id)
    }

    /// Whether an entry exists and has not passed its deadline.
    pub fn valid(&self, id: TileId, now: Instant) -> bool {
        match self.slots.get(&id) {
            Some(slot) => slot.deadline.map_or(true, |deadline| now < deadline),
            None => false,
        }
    }

    /// Set the absolute invalidation deadline of an entry.
    ///
    /// Returns `false` when the identity is not cached.
    pub fn set_deadline(&mut self, id: TileId, deadline: Instant) -> bool {
        match self.slots.get_mut(&id) {
            Some(slot) => {
                slot.deadline = Some(deadline);
                true
            }
            None => false,
        }
    }

    /// Stamp every current entry with the given deadline without removing
    /// anything - stale entries remain usable as substitutes while their
    /// re-fetch is pending.
    pub fn invalidate_all(&mut self, now: Instant) {
        for slot in self.slots.values_mut() {
            slot.deadline = Some(now);
        }
    }

    /// Remove an entry, returning its drawable.
    pub fn remove(&mut self, id: TileId) -> Option<Arc<Drawable>> {
        let slot = self.slots.remove(&id)?;
        self.total_size -= slot.size;
        Some(slot.drawable)
    }

    /// Transfer an entry into another tier, keeping its deadline.
    ///
    /// The destination evicts as needed to respect its own capacity.
    /// Returns `false` when the identity is not cached here.
    pub fn move_to(&mut self, id: TileId, other: &mut TileCache) -> bool {
        let Some(slot) = self.slots.remove(&id) else {
            return false;
        };
        self.total_size -= slot.size;
        other.evict_to_fit(slot.size);
        other.tick += 1;
        let last_used = other.tick;
        other.total_size += slot.size;
        other.slots.insert(id, CacheSlot { last_used, ..slot });
        true
    }

    /// Identities of all current entries.
    pub fn keys(&self) -> Vec<TileId> {
        self.slots.keys().copied().collect()
    }

    /// Remove everything unconditionally.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.total_size = 0;
    }

    /// Snapshot of the hit/miss/eviction counters.
    pub fn stats(&self) -> CacheStats {
        self.stats.clone()
    }

    /// Evict least-recently-used entries until `incoming` more bytes fit.
    fn evict_to_fit(&mut self, incoming: usize) {
        if self.total_size + incoming <= self.capacity {
            return;
        }

        let mut candidates: Vec<(TileId, u64, usize)> = self
            .slots
            .iter()
            .map(|(id, slot)| (*id, slot.last_used, slot.size))
            .collect();
        candidates.sort_by_key(|(_, last_used, _)| *last_used);

        let mut evicted = 0usize;
        for (id, _, size) in candidates {
            if self.total_size + incoming <= self.capacity {
                break;
            }
            self.slots.remove(&id);
            self.total_size -= size;
            self.stats.evictions += 1;
            evicted += 1;
        }

        if evicted > 0 {
            debug!(
                evicted,
                total_size = self.total_size,
                capacity = self.capacity,
                "Evicted least-recently-used tiles"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::{FrameMode, TileAddress};
    use std::time::Duration;

    fn test_id(x: i32) -> TileId {
        TileId::of(&TileAddress::new(x, 0, 8, 0), FrameMode::PerFrame)
    }

    fn test_drawable(size: usize) -> Arc<Drawable> {
        Arc::new(Drawable::new(vec![0u8; size]))
    }

    fn put(cache: &mut TileCache, x: i32, size: usize) -> TileId {
        let id = test_id(x);
        cache.put(id, test_drawable(size), size);
        id
    }

    // ─────────────────────────────────────────────────────────────────────
    // Basic operations
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn test_put_and_get() {
        let mut cache = TileCache::new(1_000_000);
        let id = put(&mut cache, 1, 100);

        assert!(cache.exists(id));
        assert_eq!(cache.get(id).unwrap().size_bytes(), 100);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.total_size(), 100);
    }

    #[test]
    fn test_get_miss() {
        let mut cache = TileCache::new(1_000_000);
        assert!(cache.get(test_id(1)).is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_replace_existing_entry() {
        let mut cache = TileCache::new(1_000_000);
        put(&mut cache, 1, 100);
        put(&mut cache, 1, 250);

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.total_size(), 250);
    }

    #[test]
    fn test_remove() {
        let mut cache = TileCache::new(1_000_000);
        let id = put(&mut cache, 1, 100);

        assert!(cache.remove(id).is_some());
        assert!(!cache.exists(id));
        assert_eq!(cache.total_size(), 0);
        assert!(cache.remove(id).is_none());
    }

    #[test]
    fn test_clear() {
        let mut cache = TileCache::new(1_000_000);
        put(&mut cache, 1, 100);
        put(&mut cache, 2, 100);

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.total_size(), 0);
    }

    #[test]
    fn test_keys() {
        let mut cache = TileCache::new(1_000_000);
        let a = put(&mut cache, 1, 10);
        let b = put(&mut cache, 2, 10);

        let mut keys = cache.keys();
        keys.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(keys, expected);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Eviction and capacity
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn test_lru_eviction_order() {
        let mut cache = TileCache::new(2500);
        let a = put(&mut cache, 1, 1000);
        let b = put(&mut cache, 2, 1000);
        let c = put(&mut cache, 3, 1000);

        assert!(!cache.exists(a), "oldest entry should be evicted");
        assert!(cache.exists(b));
        assert!(cache.exists(c));
        assert!(cache.total_size() <= 2500);
    }

    #[test]
    fn test_get_refreshes_recency() {
        let mut cache = TileCache::new(2500);
        let a = put(&mut cache, 1, 1000);
        let b = put(&mut cache, 2, 1000);

        // Touch the older entry, then overflow: the untouched one goes.
        cache.get(a);
        let c = put(&mut cache, 3, 1000);

        assert!(cache.exists(a), "touched entry should survive");
        assert!(!cache.exists(b), "untouched entry should be evicted");
        assert!(cache.exists(c));
    }

    #[test]
    fn test_peek_does_not_refresh_recency() {
        let mut cache = TileCache::new(2500);
        let a = put(&mut cache, 1, 1000);
        let b = put(&mut cache, 2, 1000);

        cache.peek(a);
        put(&mut cache, 3, 1000);

        assert!(!cache.exists(a), "peeked entry should still be evicted first");
        assert!(cache.exists(b));
    }

    #[test]
    fn test_oversized_entry_is_accepted() {
        let mut cache = TileCache::new(1000);
        put(&mut cache, 1, 400);
        let big = put(&mut cache, 2, 5000);

        // Everything else was evicted, the oversized entry is in.
        assert!(cache.exists(big));
        assert_eq!(cache.len(), 1);
        assert!(cache.total_size() > cache.capacity());

        // The next insertion restores the bound.
        put(&mut cache, 3, 100);
        assert!(!cache.exists(big));
        assert!(cache.total_size() <= cache.capacity());
    }

    #[test]
    fn test_capacity_bound_holds_after_put_sequence() {
        let mut cache = TileCache::new(3000);
        for x in 0..50 {
            put(&mut cache, x, 250);
            assert!(cache.total_size() <= cache.capacity());
        }
    }

    #[test]
    fn test_resize_evicts_to_new_capacity() {
        let mut cache = TileCache::new(10_000);
        for x in 0..8 {
            put(&mut cache, x, 1000);
        }
        assert_eq!(cache.len(), 8);

        cache.resize(2000);
        assert!(cache.total_size() <= 2000);
        assert!(cache.exists(test_id(7)), "most recent entry survives resize");
    }

    #[test]
    fn test_eviction_counted_in_stats() {
        let mut cache = TileCache::new(1500);
        for x in 0..3 {
            put(&mut cache, x, 1000);
        }
        assert!(cache.stats().evictions > 0);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Validity deadlines
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn test_entry_without_deadline_is_always_valid() {
        let mut cache = TileCache::new(1_000_000);
        let id = put(&mut cache, 1, 10);
        let far = Instant::now() + Duration::from_secs(3600);
        assert!(cache.valid(id, far));
    }

    #[test]
    fn test_expired_entry_exists_but_is_invalid() {
        // Scenario: max_age = 1000ms; after expiry valid() is false while
        // exists() stays true until explicit removal.
        let mut cache = TileCache::new(1_000_000);
        let id = put(&mut cache, 1, 10);
        let now = Instant::now();
        cache.set_deadline(id, now + Duration::from_millis(1000));

        assert!(cache.valid(id, now));
        assert!(cache.valid(id, now + Duration::from_millis(999)));

        let later = now + Duration::from_millis(1000);
        assert!(!cache.valid(id, later));
        assert!(cache.exists(id));

        cache.remove(id);
        assert!(!cache.exists(id));
    }

    #[test]
    fn test_set_deadline_on_missing_entry() {
        let mut cache = TileCache::new(1_000_000);
        assert!(!cache.set_deadline(test_id(1), Instant::now()));
    }

    #[test]
    fn test_invalidate_all_keeps_entries() {
        let mut cache = TileCache::new(1_000_000);
        let a = put(&mut cache, 1, 10);
        let b = put(&mut cache, 2, 10);

        let now = Instant::now();
        cache.invalidate_all(now);

        assert!(cache.exists(a) && cache.exists(b));
        assert!(!cache.valid(a, now));
        assert!(!cache.valid(b, now));
    }

    // ─────────────────────────────────────────────────────────────────────
    // Cross-tier moves
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn test_move_transfers_entry_and_size() {
        let mut from = TileCache::new(1_000_000);
        let mut to = TileCache::new(1_000_000);
        let id = put(&mut from, 1, 500);

        assert!(from.move_to(id, &mut to));
        assert!(!from.exists(id));
        assert!(to.exists(id));
        assert_eq!(from.total_size(), 0);
        assert_eq!(to.total_size(), 500);
    }

    #[test]
    fn test_move_keeps_deadline() {
        let mut from = TileCache::new(1_000_000);
        let mut to = TileCache::new(1_000_000);
        let id = put(&mut from, 1, 10);
        let deadline = Instant::now() + Duration::from_secs(5);
        from.set_deadline(id, deadline);

        from.move_to(id, &mut to);
        assert!(!to.valid(id, deadline));
        assert!(to.valid(id, deadline - Duration::from_secs(1)));
    }

    #[test]
    fn test_move_missing_entry_is_noop() {
        let mut from = TileCache::new(1_000_000);
        let mut to = TileCache::new(1_000_000);
        assert!(!from.move_to(test_id(1), &mut to));
    }

    #[test]
    fn test_move_evicts_in_destination() {
        let mut from = TileCache::new(1_000_000);
        let mut to = TileCache::new(1000);
        let resident = put(&mut to, 9, 800);
        let id = put(&mut from, 1, 700);

        from.move_to(id, &mut to);
        assert!(to.exists(id));
        assert!(!to.exists(resident), "destination evicts LRU to make room");
        assert!(to.total_size() <= to.capacity());
    }
}
