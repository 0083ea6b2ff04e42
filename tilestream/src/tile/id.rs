//! Cache identity derivation.

use std::fmt;

use super::TileAddress;

/// How frame numbers participate in cache identity.
///
/// Animated layers want one cache slot per `(address, frame)` pair so
/// several frames of the same tile can coexist; static layers share one slot
/// across frames so a frame change never invalidates their cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameMode {
    /// Fold the frame number into the identity: distinct slot per frame.
    #[default]
    PerFrame,
    /// Ignore the frame number: one slot shared across frames.
    Shared,
}

/// Range of identities used by a single frame, spanning zooms
/// `0..=MAX_SUPPORTED_ZOOM`.
const TILE_ID_OFFSET: i64 = ((1i64 << 50) - 1) / 3;

/// 64-bit cache identity of a tile.
///
/// Derived from the canonical address: all identities of one zoom level form
/// a contiguous block, blocks for deeper zooms follow, and in
/// [`FrameMode::PerFrame`] each frame gets its own copy of the whole range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileId(i64);

impl TileId {
    /// Derive the identity of a tile address.
    pub fn of(address: &TileAddress, mode: FrameMode) -> TileId {
        let canonical = address.canonical();
        let zoom = canonical.zoom as u32;
        // Number of tiles above this zoom level: sum of 4^z for z < zoom.
        let base = ((1i64 << (2 * zoom)) - 1) / 3;
        let index = base + (canonical.y as i64) * (1i64 << zoom) + canonical.x as i64;
        match mode {
            FrameMode::Shared => TileId(index),
            FrameMode::PerFrame => TileId(index + address.frame_nr as i64 * TILE_ID_OFFSET),
        }
    }

    /// Raw identity value.
    pub fn raw(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_root_id_is_zero() {
        let id = TileId::of(&TileAddress::root(0), FrameMode::PerFrame);
        assert_eq!(id.raw(), 0);
    }

    #[test]
    fn test_zoom_blocks_are_contiguous() {
        // Zoom 1 ids start right after the single zoom-0 id.
        let id = TileId::of(&TileAddress::new(0, 0, 1, 0), FrameMode::Shared);
        assert_eq!(id.raw(), 1);
        let id = TileId::of(&TileAddress::new(1, 1, 1, 0), FrameMode::Shared);
        assert_eq!(id.raw(), 4);
        // Zoom 2 starts after 1 + 4 ids.
        let id = TileId::of(&TileAddress::new(0, 0, 2, 0), FrameMode::Shared);
        assert_eq!(id.raw(), 5);
    }

    #[test]
    fn test_shifted_copy_shares_identity() {
        let canonical = TileAddress::new(1, 1, 2, 0);
        let shifted = TileAddress::new(5, 1, 2, 0);
        assert_eq!(
            TileId::of(&canonical, FrameMode::PerFrame),
            TileId::of(&shifted, FrameMode::PerFrame)
        );
    }

    #[test]
    fn test_per_frame_mode_separates_frames() {
        let frame0 = TileAddress::new(1, 2, 3, 0);
        let frame1 = frame0.with_frame_nr(1);
        assert_ne!(
            TileId::of(&frame0, FrameMode::PerFrame),
            TileId::of(&frame1, FrameMode::PerFrame)
        );
    }

    #[test]
    fn test_shared_mode_ignores_frames() {
        let frame0 = TileAddress::new(1, 2, 3, 0);
        let frame1 = frame0.with_frame_nr(1);
        assert_eq!(
            TileId::of(&frame0, FrameMode::Shared),
            TileId::of(&frame1, FrameMode::Shared)
        );
    }

    proptest! {
        /// Distinct canonical addresses at any zoom map to distinct ids.
        #[test]
        fn prop_distinct_addresses_distinct_ids(
            zoom in 0u8..12,
            a in 0u32..4096,
            b in 0u32..4096,
        ) {
            let side = 1u32 << zoom;
            let t1 = TileAddress::new((a % side) as i32, (a / side % side) as i32, zoom, 0);
            let t2 = TileAddress::new((b % side) as i32, (b / side % side) as i32, zoom, 0);
            let id1 = TileId::of(&t1, FrameMode::PerFrame);
            let id2 = TileId::of(&t2, FrameMode::PerFrame);
            prop_assert_eq!(t1 == t2, id1 == id2);
        }

        /// A child never collides with its own parent.
        #[test]
        fn prop_child_never_collides_with_parent(
            zoom in 0u8..12,
            x in 0i32..1024,
            y in 0i32..1024,
            index in 0u8..4,
        ) {
            let side = 1i32 << zoom;
            let tile = TileAddress::new(x % side, y % side, zoom, 0);
            let child = tile.child(index);
            prop_assert_ne!(
                TileId::of(&tile, FrameMode::PerFrame),
                TileId::of(&child, FrameMode::PerFrame)
            );
        }

        /// Frame blocks never overlap for reasonable frame counts.
        #[test]
        fn prop_frame_blocks_disjoint(
            zoom in 0u8..12,
            x in 0i32..1024,
            y in 0i32..1024,
            frame in 1i32..64,
        ) {
            let side = 1i32 << zoom;
            let tile = TileAddress::new(x % side, y % side, zoom, 0);
            let id0 = TileId::of(&tile, FrameMode::PerFrame);
            let idn = TileId::of(&tile.with_frame_nr(frame), FrameMode::PerFrame);
            prop_assert_eq!(idn.raw() - id0.raw(), frame as i64 * super::TILE_ID_OFFSET);
        }
    }
}
