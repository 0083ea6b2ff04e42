//! Quadtree tile addresses.

use std::fmt;

use glam::DVec2;

use crate::coord::{MapBounds, WORLD_SIZE};

/// Deepest zoom level the quadtree traversal will ever visit.
pub const MAX_SUPPORTED_ZOOM: u8 = 24;

/// Address of one quadtree tile.
///
/// `x` and `y` are quadtree coordinates at `zoom`; `frame_nr` distinguishes
/// tiles requested for time-varying content at the same spatial address.
/// Coordinates may lie outside the canonical `0..2^zoom` range when seamless
/// panning traverses horizontally shifted world copies; [`canonical`] maps
/// them back before cache identity is derived.
///
/// Addresses are produced fresh on every planning pass and never persisted.
///
/// [`canonical`]: TileAddress::canonical
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileAddress {
    /// X coordinate (west-east) at `zoom`.
    pub x: i32,
    /// Y coordinate at `zoom`.
    pub y: i32,
    /// Zoom level (0 = whole world).
    pub zoom: u8,
    /// Frame number for animated content; 0 for static layers.
    pub frame_nr: i32,
}

impl TileAddress {
    /// Create a new tile address.
    pub fn new(x: i32, y: i32, zoom: u8, frame_nr: i32) -> Self {
        Self {
            x,
            y,
            zoom,
            frame_nr,
        }
    }

    /// The root tile of the quadtree for the given frame.
    pub fn root(frame_nr: i32) -> Self {
        Self::new(0, 0, 0, frame_nr)
    }

    /// Parent tile, one zoom level up.
    ///
    /// The root tile is its own parent.
    pub fn parent(&self) -> TileAddress {
        if self.zoom == 0 {
            *self
        } else {
            TileAddress::new(self.x >> 1, self.y >> 1, self.zoom - 1, self.frame_nr)
        }
    }

    /// Child tile, one zoom level down.
    ///
    /// Children are ordered top-left, top-right, bottom-left, bottom-right.
    pub fn child(&self, index: u8) -> TileAddress {
        debug_assert!(index < 4, "child index must be 0..4");
        TileAddress::new(
            self.x * 2 + (index & 1) as i32,
            self.y * 2 + (index >> 1) as i32,
            self.zoom + 1,
            self.frame_nr,
        )
    }

    /// All four children of this tile.
    pub fn children(&self) -> [TileAddress; 4] {
        [self.child(0), self.child(1), self.child(2), self.child(3)]
    }

    /// Vertically flipped version of this tile.
    pub fn flipped(&self) -> TileAddress {
        let rows = 1i32 << self.zoom;
        TileAddress::new(self.x, rows - 1 - self.y, self.zoom, self.frame_nr)
    }

    /// The same spatial tile with coordinates wrapped into `0..2^zoom`.
    pub fn canonical(&self) -> TileAddress {
        let mask = (1i32 << self.zoom) - 1;
        TileAddress::new(self.x & mask, self.y & mask, self.zoom, self.frame_nr)
    }

    /// The same tile addressed for a different frame.
    pub fn with_frame_nr(&self, frame_nr: i32) -> TileAddress {
        TileAddress::new(self.x, self.y, self.zoom, frame_nr)
    }

    /// Bounds of this tile in internal world coordinates.
    ///
    /// Shifted world copies (x outside the canonical range) produce bounds
    /// outside the world square, which is what the frustum tests need.
    pub fn bounds(&self) -> MapBounds {
        let size = WORLD_SIZE / (1u32 << self.zoom) as f64;
        let origin = DVec2::new(
            -0.5 * WORLD_SIZE + self.x as f64 * size,
            -0.5 * WORLD_SIZE + self.y as f64 * size,
        );
        MapBounds::new(origin, origin + DVec2::splat(size))
    }

    /// Bounds of the vertically flipped tile, wrapped into the world.
    ///
    /// Data extents are declared in flipped orientation; shifted copies are
    /// canonicalized first so wraparound tiles still match the extent.
    pub fn flipped_bounds(&self) -> MapBounds {
        self.canonical().flipped().bounds()
    }
}

impl fmt::Display for TileAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}#{}", self.zoom, self.x, self.y, self.frame_nr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_of_root_is_root() {
        let root = TileAddress::root(0);
        assert_eq!(root.parent(), root);
    }

    #[test]
    fn test_parent_child_roundtrip() {
        let tile = TileAddress::new(5, 3, 4, 0);
        for index in 0..4 {
            assert_eq!(tile.child(index).parent(), tile);
        }
    }

    #[test]
    fn test_children_are_distinct() {
        let children = TileAddress::root(0).children();
        assert_eq!(children[0], TileAddress::new(0, 0, 1, 0));
        assert_eq!(children[1], TileAddress::new(1, 0, 1, 0));
        assert_eq!(children[2], TileAddress::new(0, 1, 1, 0));
        assert_eq!(children[3], TileAddress::new(1, 1, 1, 0));
    }

    #[test]
    fn test_flipped_is_involution() {
        let tile = TileAddress::new(2, 1, 3, 0);
        assert_eq!(tile.flipped().flipped(), tile);
        assert_eq!(tile.flipped(), TileAddress::new(2, 6, 3, 0));
    }

    #[test]
    fn test_canonical_wraps_shifted_copies() {
        // A root tile shifted one world to the left maps back onto the root.
        let shifted = TileAddress::new(-1, 0, 0, 0);
        assert_eq!(shifted.canonical(), TileAddress::root(0));

        // At zoom 2 a tile one world-width (4 tiles) east wraps around.
        let wrapped = TileAddress::new(5, 1, 2, 0);
        assert_eq!(wrapped.canonical(), TileAddress::new(1, 1, 2, 0));
    }

    #[test]
    fn test_canonical_keeps_in_range_tiles() {
        let tile = TileAddress::new(3, 2, 2, 7);
        assert_eq!(tile.canonical(), tile);
    }

    #[test]
    fn test_root_bounds_cover_world() {
        let bounds = TileAddress::root(0).bounds();
        assert_eq!(bounds, MapBounds::world());
    }

    #[test]
    fn test_child_bounds_quarter_parent() {
        let parent = TileAddress::root(0);
        let child = parent.child(0);
        let bounds = child.bounds();
        assert_eq!(bounds.delta(), parent.bounds().delta() * 0.5);
        assert_eq!(bounds.min(), parent.bounds().min());
    }

    #[test]
    fn test_shifted_bounds_lie_outside_world() {
        let shifted = TileAddress::new(1, 0, 0, 0);
        let bounds = shifted.bounds();
        assert!(bounds.min().x >= 0.5 * WORLD_SIZE - f64::EPSILON);
        // But the flipped bounds used for extent checks wrap back.
        assert_eq!(shifted.flipped_bounds(), MapBounds::world());
    }

    #[test]
    fn test_display_format() {
        let tile = TileAddress::new(5, 3, 4, 2);
        assert_eq!(tile.to_string(), "4/5/3#2");
    }
}
