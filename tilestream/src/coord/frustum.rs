//! View frustum plane tests.
//!
//! The frustum is extracted from a view-projection matrix as six clip
//! planes. The planner only ever tests tile bounding volumes lying in the
//! `z = 0` map plane, but the tests are written against full 3D volumes so
//! tilted and rotated cameras work unchanged.

use glam::{DMat4, DVec3, DVec4};

use super::MapBounds;

/// A camera view frustum as six inward-facing planes.
///
/// Each plane is stored as `(a, b, c, d)` with `a*x + b*y + c*z + d >= 0`
/// for points on the inside.
#[derive(Debug, Clone, PartialEq)]
pub struct Frustum {
    planes: [DVec4; 6],
}

impl Frustum {
    /// Extract the six frustum planes from a view-projection matrix.
    pub fn from_matrix(matrix: &DMat4) -> Self {
        let r0 = matrix.row(0);
        let r1 = matrix.row(1);
        let r2 = matrix.row(2);
        let r3 = matrix.row(3);

        let planes = [
            r3 + r0, // left
            r3 - r0, // right
            r3 + r1, // bottom
            r3 - r1, // top
            r3 + r2, // near
            r3 - r2, // far
        ]
        .map(normalize_plane);

        Self { planes }
    }

    /// Whether a sphere intersects the frustum.
    pub fn intersects_sphere(&self, center: DVec3, radius: f64) -> bool {
        self.planes
            .iter()
            .all(|plane| signed_distance(plane, center) >= -radius)
    }

    /// Whether an axis-aligned box intersects the frustum.
    ///
    /// Uses the positive-vertex test: for each plane, only the box corner
    /// furthest along the plane normal needs to be inside.
    pub fn intersects_aabb(&self, min: DVec3, max: DVec3) -> bool {
        self.planes.iter().all(|plane| {
            let positive = DVec3::new(
                if plane.x >= 0.0 { max.x } else { min.x },
                if plane.y >= 0.0 { max.y } else { min.y },
                if plane.z >= 0.0 { max.z } else { min.z },
            );
            signed_distance(plane, positive) >= 0.0
        })
    }

    /// Whether a map-plane square (at `z = 0`) intersects the frustum.
    pub fn intersects_square(&self, bounds: &MapBounds) -> bool {
        let min = bounds.min();
        let max = bounds.max();
        self.intersects_aabb(DVec3::new(min.x, min.y, 0.0), DVec3::new(max.x, max.y, 0.0))
    }
}

fn signed_distance(plane: &DVec4, point: DVec3) -> f64 {
    plane.x * point.x + plane.y * point.y + plane.z * point.z + plane.w
}

fn normalize_plane(plane: DVec4) -> DVec4 {
    let length = DVec3::new(plane.x, plane.y, plane.z).length();
    if length > f64::EPSILON {
        plane / length
    } else {
        plane
    }
}
