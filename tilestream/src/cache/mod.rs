//! Two-tier tile caching.
//!
//! Every layer owns two [`TileCache`] tiers: a generously sized **visible**
//! tier holding what the renderer currently draws, and a strictly bounded
//! **preloading** tier holding speculatively fetched tiles. Entries move
//! between the tiers as visibility changes; a tile identity lives in at most
//! one tier at any time.
//!
//! Both tiers are guarded together by the layer's single exclusive region,
//! which is what makes cross-tier moves atomic with respect to concurrent
//! puts and evictions.

mod tier;

pub use tier::{CacheStats, TileCache};

use std::sync::Arc;
use std::time::Instant;

use crate::render::Drawable;
use crate::tile::TileId;

/// The visible and preloading cache tiers of one layer.
#[derive(Debug)]
pub struct TileCaches {
    /// Tier holding currently drawn tiles.
    pub visible: TileCache,
    /// Tier holding speculatively loaded tiles.
    pub preloading: TileCache,
}

impl TileCaches {
    /// Create both tiers with the given byte capacities.
    pub fn new(visible_capacity: usize, preloading_capacity: usize) -> Self {
        Self {
            visible: TileCache::new(visible_capacity),
            preloading: TileCache::new(preloading_capacity),
        }
    }

    /// Borrow one tier by its preloading flag.
    pub fn tier(&self, preloading: bool) -> &TileCache {
        if preloading {
            &self.preloading
        } else {
            &self.visible
        }
    }

    /// Mutably borrow one tier by its preloading flag.
    pub fn tier_mut(&mut self, preloading: bool) -> &mut TileCache {
        if preloading {
            &mut self.preloading
        } else {
            &mut self.visible
        }
    }

    /// Insert into the given tier, evicting the identity from the other
    /// tier first so it never exists in both.
    pub fn put(&mut self, id: TileId, drawable: Arc<Drawable>, size: usize, preloading: bool) {
        self.tier_mut(!preloading).remove(id);
        self.tier_mut(preloading).put(id, drawable, size);
    }

    /// Whether the identity exists in either tier.
    pub fn exists(&self, id: TileId) -> bool {
        self.visible.exists(id) || self.preloading.exists(id)
    }

    /// Whether the identity exists in either tier and has not passed its
    /// invalidation deadline there.
    pub fn valid(&self, id: TileId, now: Instant) -> bool {
        if self.visible.exists(id) {
            self.visible.valid(id, now)
        } else if self.preloading.exists(id) {
            self.preloading.valid(id, now)
        } else {
            false
        }
    }

    /// Read a drawable from either tier without touching recency, checking
    /// the visible tier first.
    pub fn peek(&self, id: TileId) -> Option<Arc<Drawable>> {
        self.visible.peek(id).or_else(|| self.preloading.peek(id))
    }

    /// Remove the identity from both tiers.
    pub fn remove(&mut self, id: TileId) {
        self.visible.remove(id);
        self.preloading.remove(id);
    }

    /// Stamp every entry of both tiers with the given deadline.
    pub fn invalidate_all(&mut self, now: Instant) {
        self.visible.invalidate_all(now);
        self.preloading.invalidate_all(now);
    }

    /// Remove everything from both tiers.
    pub fn clear(&mut self) {
        self.visible.clear();
        self.preloading.clear();
    }
}
