use crate::{DotProduct, Extent3f, Norm, Point3f, PointN, Sphere3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A plane `normal . p + offset = 0`. Points with a non-negative signed distance are on the inner side.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct Plane {
    pub normal: Point3f,
    pub offset: f32,
}

impl Plane {
    /// Builds a plane from the coefficients `[a, b, c, d]` of `ax + by + cz + d = 0`, normalizing them.
    pub fn from_coefficients(coefficients: [f32; 4]) -> Self {
        let [a, b, c, d] = coefficients;
        let normal = PointN([a, b, c]);
        let length = normal.norm();
        if length == 0.0 {
            return Self { normal, offset: d };
        }

        Self {
            normal: normal / length,
            offset: d / length,
        }
    }

    #[inline]
    pub fn signed_distance(&self, p: Point3f) -> f32 {
        self.normal.dot(&p) + self.offset
    }
}

/// The six clipping planes of a camera, with normals pointing into the view volume.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct Frustum {
    pub planes: [Plane; 6],
}

impl Frustum {
    pub fn from_planes(planes: [Plane; 6]) -> Self {
        Self { planes }
    }

    /// Extracts the planes of a column-major view-projection matrix (`matrix[column][row]`), using the `[-1, 1]` clip space
    /// depth range.
    pub fn from_view_projection(matrix: [[f32; 4]; 4]) -> Self {
        let row = |i: usize| [matrix[0][i], matrix[1][i], matrix[2][i], matrix[3][i]];
        let combine = |a: [f32; 4], b: [f32; 4], sign: f32| {
            Plane::from_coefficients([
                a[0] + sign * b[0],
                a[1] + sign * b[1],
                a[2] + sign * b[2],
                a[3] + sign * b[3],
            ])
        };
        let (r0, r1, r2, r3) = (row(0), row(1), row(2), row(3));

        Self {
            planes: [
                combine(r3, r0, 1.0),
                combine(r3, r0, -1.0),
                combine(r3, r1, 1.0),
                combine(r3, r1, -1.0),
                combine(r3, r2, 1.0),
                combine(r3, r2, -1.0),
            ],
        }
    }

    /// Conservative box test: may report an intersection for boxes near the frustum corners.
    pub fn intersects_extent(&self, extent: &Extent3f) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.signed_distance(extent.support_point(plane.normal)) >= 0.0)
    }

    pub fn intersects_sphere(&self, sphere: &Sphere3) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.signed_distance(sphere.center) >= -sphere.radius)
    }
}

#[cfg(feature = "glam")]
impl From<glam::Mat4> for Frustum {
    fn from(view_projection: glam::Mat4) -> Self {
        Self::from_view_projection(view_projection.to_cols_array_2d())
    }
}

// ████████╗███████╗███████╗████████╗███████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝
//    ██║   █████╗  ███████╗   ██║   ███████╗
//    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║
//    ██║   ███████╗███████║   ██║   ███████║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝

#[cfg(test)]
mod test {
    use super::*;
    use crate::Ones;

    const IDENTITY: [[f32; 4]; 4] = [
        [1.0, 0.0, 0.0, 0.0],
        [0.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ];

    #[test]
    fn identity_view_projection_is_the_clip_cube() {
        let frustum = Frustum::from_view_projection(IDENTITY);

        let inside = Extent3f::from_min_and_shape(Point3f::fill(-0.5), Point3f::ONES);
        let straddling = Extent3f::from_min_and_shape(Point3f::fill(0.5), Point3f::ONES);
        let outside = Extent3f::from_min_and_shape(Point3f::fill(5.0), Point3f::ONES);

        assert!(frustum.intersects_extent(&inside));
        assert!(frustum.intersects_extent(&straddling));
        assert!(!frustum.intersects_extent(&outside));
    }

    #[test]
    fn sphere_test_uses_radius() {
        let frustum = Frustum::from_view_projection(IDENTITY);

        let near_miss = Sphere3 {
            center: PointN([1.5, 0.0, 0.0]),
            radius: 0.6,
        };
        let miss = Sphere3 {
            center: PointN([1.5, 0.0, 0.0]),
            radius: 0.4,
        };

        assert!(frustum.intersects_sphere(&near_miss));
        assert!(!frustum.intersects_sphere(&miss));
    }

    #[test]
    fn planes_are_normalized() {
        let frustum = Frustum::from_view_projection([
            [2.0, 0.0, 0.0, 0.0],
            [0.0, 2.0, 0.0, 0.0],
            [0.0, 0.0, 2.0, 0.0],
            [0.0, 0.0, 0.0, 2.0],
        ]);

        for plane in frustum.planes.iter() {
            assert!((plane.normal.norm() - 1.0).abs() < 1e-6);
        }
    }
}
