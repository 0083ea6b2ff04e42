//! Camera view state.

use glam::{DMat4, DVec3};

use super::Frustum;

/// Immutable snapshot of the camera for one planning pass.
///
/// Carries the combined view-projection matrix (used for frustum extraction
/// and the camera-distance proxy), the camera position in internal world
/// coordinates (used for tie-break sorting) and the fractional view zoom
/// (used for target zoom selection).
#[derive(Debug, Clone, PartialEq)]
pub struct ViewState {
    mvp: DMat4,
    camera_pos: DVec3,
    zoom: f32,
    frustum: Frustum,
}

impl ViewState {
    /// Create a view state from a view-projection matrix, camera position
    /// and fractional zoom level.
    pub fn new(mvp: DMat4, camera_pos: DVec3, zoom: f32) -> Self {
        let frustum = Frustum::from_matrix(&mvp);
        Self {
            mvp,
            camera_pos,
            zoom,
            frustum,
        }
    }

    /// The combined view-projection matrix.
    pub fn mvp(&self) -> &DMat4 {
        &self.mvp
    }

    /// Camera position in internal world coordinates.
    pub fn camera_pos(&self) -> DVec3 {
        self.camera_pos
    }

    /// Fractional view zoom level.
    pub fn zoom(&self) -> f32 {
        self.zoom
    }

    /// The view frustum derived from the matrix.
    pub fn frustum(&self) -> &Frustum {
        &self.frustum
    }

    /// Whether two views share the same projection.
    ///
    /// Used to skip re-planning when only non-geometric state changed.
    pub fn same_projection(&self, other: &ViewState) -> bool {
        self.mvp == other.mvp
    }
}
