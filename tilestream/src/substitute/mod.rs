//! Substitute lookup for tiles that are not yet loaded.
//!
//! While the exact content of a wanted tile is still in flight, the resolver
//! attaches the best currently-cached stand-in: the same tile from the
//! previous frame, a cached ancestor drawn as a cropped sub-region, or
//! cached descendants drawn as partial-coverage fragments. Lookups use
//! `peek` only, so resolving never perturbs cache eviction order - the same
//! cache state always yields the same substitutes.

use std::time::Instant;

use crate::cache::TileCaches;
use crate::render::TileDrawData;
use crate::tile::{FrameMode, TileAddress, TileId};

/// The policy to use when looking for tiles that are not available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubstitutionPolicy {
    /// Consider all cached tiles.
    #[default]
    All,
    /// Consider only tiles that are currently visible. Recommended for
    /// low-latency sources, like offline sources.
    VisibleOnly,
    /// Never substitute tiles.
    None,
}

/// Outcome of resolving one wanted tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The exact tile is cached; `valid` is false when it is past its
    /// deadline and needs a re-fetch despite being drawn.
    Hit { valid: bool },
    /// A previous-frame, ancestor or descendant stand-in was attached.
    Substituted,
    /// Nothing usable is cached; the tile is drawn empty this frame.
    Missing,
}

/// Resolver over one layer's cache tiers.
///
/// Borrows the tiers immutably for the duration of one substitution pass,
/// inside the layer's exclusive region.
pub(crate) struct Substitutor<'a> {
    caches: &'a TileCaches,
    policy: SubstitutionPolicy,
    frame_mode: FrameMode,
    last_frame_nr: i32,
    max_parent_depth: u8,
    max_child_depth: u8,
}

impl<'a> Substitutor<'a> {
    pub fn new(
        caches: &'a TileCaches,
        policy: SubstitutionPolicy,
        frame_mode: FrameMode,
        last_frame_nr: i32,
        max_parent_depth: u8,
        max_child_depth: u8,
    ) -> Self {
        Self {
            caches,
            policy,
            frame_mode,
            last_frame_nr,
            max_parent_depth,
            max_child_depth,
        }
    }

    /// Resolve one wanted tile, appending draw references to `out`.
    ///
    /// `wanted` may address a shifted world copy; cache lookups use the
    /// canonical address while draw references keep the shifted target.
    pub fn resolve(
        &self,
        wanted: &TileAddress,
        preloading: bool,
        now: Instant,
        out: &mut Vec<TileDrawData>,
    ) -> Resolution {
        let tile = wanted.canonical();
        let id = TileId::of(&tile, self.frame_mode);

        // Exact hit in either tier wins outright; a stale hit is still drawn
        // while the re-fetch it triggers is in flight.
        if self.caches.exists(id) {
            self.push_draw(wanted, &tile, preloading, out);
            return Resolution::Hit {
                valid: self.caches.valid(id, now),
            };
        }

        for &preloading_cache in self.permitted_tiers(preloading) {
            let mut found = false;

            // Previous frame of the same address (animated layers). In
            // shared-frame mode the identity is the same as the exact hit.
            if self.frame_mode == FrameMode::PerFrame {
                let prev = tile.with_frame_nr(self.last_frame_nr);
                let prev_id = TileId::of(&prev, self.frame_mode);
                if self.caches.tier(preloading_cache).exists(prev_id) {
                    self.push_draw(wanted, &prev, preloading, out);
                    found = true;
                }
            }

            if !found && tile.zoom > 0 {
                found = self.find_parent(wanted, &tile, self.max_parent_depth, preloading_cache, preloading, out);
            }
            if !found {
                found = self.find_children(wanted, &tile, self.max_child_depth, preloading_cache, preloading, out) > 0;
            }
            if found {
                return Resolution::Substituted;
            }
        }

        Resolution::Missing
    }

    /// Cache tiers a substitute may come from, in probe order.
    fn permitted_tiers(&self, preloading: bool) -> &'static [bool] {
        match self.policy {
            SubstitutionPolicy::All => &[false, true],
            SubstitutionPolicy::VisibleOnly => {
                if preloading {
                    &[false, true]
                } else {
                    &[false]
                }
            }
            SubstitutionPolicy::None => &[],
        }
    }

    /// Walk strictly upward through ancestors, using the first cached one.
    fn find_parent(
        &self,
        wanted: &TileAddress,
        tile: &TileAddress,
        depth: u8,
        preloading_cache: bool,
        preloading: bool,
        out: &mut Vec<TileDrawData>,
    ) -> bool {
        if tile.zoom == 0 || depth == 0 {
            return false;
        }

        let parent = tile.parent();
        let parent_id = TileId::of(&parent, self.frame_mode);
        if self.caches.tier(preloading_cache).exists(parent_id) {
            self.push_draw(wanted, &parent, preloading, out);
            return true;
        }

        self.find_parent(wanted, &parent, depth - 1, preloading_cache, preloading, out)
    }

    /// Walk downward depth-first; every cached descendant contributes a
    /// partial-coverage fragment.
    fn find_children(
        &self,
        wanted: &TileAddress,
        tile: &TileAddress,
        depth: u8,
        preloading_cache: bool,
        preloading: bool,
        out: &mut Vec<TileDrawData>,
    ) -> usize {
        if depth == 0 {
            return 0;
        }

        let mut count = 0;
        for child in tile.children() {
            let child_id = TileId::of(&child, self.frame_mode);
            if self.caches.tier(preloading_cache).exists(child_id) {
                self.push_draw(wanted, &child, preloading, out);
                count += 1;
            } else {
                count += self.find_children(wanted, &child, depth - 1, preloading_cache, preloading, out);
            }
        }
        count
    }

    fn push_draw(
        &self,
        wanted: &TileAddress,
        closest: &TileAddress,
        preloading: bool,
        out: &mut Vec<TileDrawData>,
    ) {
        let id = TileId::of(closest, self.frame_mode);
        if let Some(drawable) = self.caches.peek(id) {
            out.push(TileDrawData::new(*wanted, *closest, id, drawable, preloading));
        }
    }
}
