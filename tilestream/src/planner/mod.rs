//! Quadtree visibility planning.
//!
//! Starting at the root tile, the planner recursively subdivides until tiles
//! are small enough in screen space or the target zoom is reached, emitting
//! each accepted tile into either the visible list (inside the exact
//! frustum) or the preloading list (inside the enlarged frustum only). A
//! data extent prunes subtrees with no content; seamless panning repeats the
//! traversal for horizontally shifted world copies so wraparound views stay
//! covered.

use glam::{DVec3, DVec4};
use tracing::trace;

use crate::coord::{MapBounds, ViewState, WORLD_SIZE};
use crate::tile::{TileAddress, MAX_SUPPORTED_ZOOM};

/// Fractional bias added before flooring the target zoom, so views sitting
/// exactly on an integer zoom do not flicker between levels.
pub const DISCRETE_ZOOM_LEVEL_BIAS: f32 = 0.001;

/// Factor by which a tile's bounding volume is enlarged for the preloading
/// visibility test.
pub const PRELOADING_TILE_SCALE: f64 = 2.0;

/// Camera-distance threshold below which a tile is subdivided.
pub const SUBDIVISION_THRESHOLD: f64 = WORLD_SIZE;

/// Number of shifted world copies traversed per side when seamless panning
/// is enabled.
const SEAMLESS_SHIFT_RANGE: i32 = 5;

/// Inputs of one planning pass that do not come from the view itself.
#[derive(Debug, Clone)]
pub struct PlanParams {
    /// Minimum zoom of the data source; subdivision is forced above it.
    pub min_zoom: u8,
    /// Maximum zoom of the data source; caps the target zoom.
    pub max_zoom: u8,
    /// Fractional zoom offset for multi-resolution displays.
    pub zoom_level_bias: f32,
    /// Frame number stamped on every produced address.
    pub frame_nr: i32,
    /// Whether shifted world copies are traversed for wraparound.
    pub seamless_panning: bool,
}

/// Result of a planning pass: disjoint, duplicate-free address lists.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisiblePlan {
    /// Tiles inside the exact view frustum.
    pub visible: Vec<TileAddress>,
    /// Tiles only inside the enlarged (preloading) frustum.
    pub preloading: Vec<TileAddress>,
}

/// The discrete zoom level tiles are subdivided towards.
pub fn target_zoom(view_zoom: f32, params: &PlanParams) -> u8 {
    let biased = (view_zoom + params.zoom_level_bias + DISCRETE_ZOOM_LEVEL_BIAS).floor() as i32;
    biased.clamp(0, params.max_zoom as i32) as u8
}

/// Run one visibility pass over the quadtree.
pub fn plan(view: &ViewState, data_extent: &MapBounds, params: &PlanParams) -> VisiblePlan {
    let mut out = VisiblePlan::default();
    visit(view, data_extent, params, TileAddress::root(params.frame_nr), &mut out);

    if params.seamless_panning {
        for shift in 1..=SEAMLESS_SHIFT_RANGE {
            for x in [-shift, shift] {
                let root = TileAddress::new(x, 0, 0, params.frame_nr);
                visit(view, data_extent, params, root, &mut out);
            }
        }
    }

    trace!(
        visible = out.visible.len(),
        preloading = out.preloading.len(),
        "Planned visible tiles"
    );
    out
}

fn visit(
    view: &ViewState,
    data_extent: &MapBounds,
    params: &PlanParams,
    tile: TileAddress,
    out: &mut VisiblePlan,
) {
    if tile.zoom > MAX_SUPPORTED_ZOOM {
        return;
    }

    // No content in this subtree at all.
    if !tile.flipped_bounds().intersects(data_extent) {
        return;
    }

    let bounds = tile.bounds();
    let center = bounds.center();
    let center3 = DVec3::new(center.x, center.y, 0.0);

    // Preloading volume: the tile's bounding sphere scaled about its center.
    let radius = bounds.delta().length() * 0.5 * PRELOADING_TILE_SCALE;
    if !view.frustum().intersects_sphere(center3, radius) {
        return;
    }
    let in_visible_frustum = view.frustum().intersects_square(&bounds);

    // Camera distance proxy: project the tile center through the W row of
    // the view-projection matrix, scaled to this zoom level.
    let tile_w = view
        .mvp()
        .row(3)
        .dot(DVec4::new(center.x, center.y, 0.0, 1.0));
    let zoom_distance = tile_w * 2f64.powf(tile.zoom as f64 - params.zoom_level_bias as f64);

    let mut subdivide = zoom_distance < SUBDIVISION_THRESHOLD * std::f64::consts::SQRT_2;
    if params.min_zoom > tile.zoom {
        subdivide = true;
    } else if target_zoom(view.zoom(), params) <= tile.zoom {
        subdivide = false;
    }

    if subdivide {
        for child in tile.children() {
            visit(view, data_extent, params, child, out);
        }
    } else if in_visible_frustum {
        out.visible.push(tile);
    } else {
        out.preloading.push(tile);
    }
}

/// Tie-break sort for planned tile lists.
///
/// Tiles with a cached ancestor or descendant are cheap to refine and sort
/// first; remaining ties order by camera distance, nearest first. The sort
/// is stable, so tiles equal under the whole key keep traversal order.
pub fn sort_tiles<A, C>(
    tiles: &mut [TileAddress],
    view: &ViewState,
    has_cached_ancestor: A,
    has_cached_child: C,
) where
    A: Fn(&TileAddress) -> bool,
    C: Fn(&TileAddress) -> bool,
{
    let key = |tile: &TileAddress| -> (u8, u8, f64) {
        let ancestor_rank = if has_cached_ancestor(tile) { 0 } else { 1 };
        let child_rank = if has_cached_child(tile) { 0 } else { 1 };
        let center = tile.bounds().center();
        let distance = (DVec3::new(center.x, center.y, 0.0) - view.camera_pos()).length();
        (ancestor_rank, child_rank, distance)
    };

    tiles.sort_by(|lhs, rhs| {
        let (la, lc, ld) = key(lhs);
        let (ra, rc, rd) = key(rhs);
        la.cmp(&ra).then(lc.cmp(&rc)).then(ld.total_cmp(&rd))
    });
}
