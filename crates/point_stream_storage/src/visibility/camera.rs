use point_stream_core::prelude::*;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub enum Projection {
    /// `fov_y` is the vertical field of view in radians.
    Perspective { fov_y: f32 },
    /// `top` and `bottom` are the view volume bounds in world units.
    Orthographic { top: f32, bottom: f32 },
}

/// Everything the visibility engine needs to know about the camera for one frame.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct CameraState {
    pub position: Point3f,
    pub projection: Projection,
    /// Height of the render target in pixels.
    pub viewport_height: f32,
    /// Nodes outside of this frustum are culled. `None` disables frustum culling.
    pub frustum: Option<Frustum>,
}

/// How a bounding sphere looks from the camera.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NodeProjection {
    pub distance: f32,
    /// Projected radius in pixels. Infinite if the camera is inside the sphere.
    pub screen_radius: f32,
    /// Traversal priority. Larger is more important.
    pub weight: f32,
}

impl CameraState {
    pub fn perspective(position: Point3f, fov_y: f32, viewport_height: f32) -> Self {
        Self {
            position,
            projection: Projection::Perspective { fov_y },
            viewport_height,
            frustum: None,
        }
    }

    pub fn orthographic(position: Point3f, top: f32, bottom: f32, viewport_height: f32) -> Self {
        Self {
            position,
            projection: Projection::Orthographic { top, bottom },
            viewport_height,
            frustum: None,
        }
    }

    pub fn with_frustum(mut self, frustum: Frustum) -> Self {
        self.frustum = Some(frustum);

        self
    }

    #[inline]
    pub fn sees(&self, bounds: &Extent3f) -> bool {
        self.frustum
            .as_ref()
            .map_or(true, |f| f.intersects_extent(bounds))
    }

    pub fn project(&self, sphere: &Sphere3) -> NodeProjection {
        let distance = sphere.center_distance(self.position);
        if distance < sphere.radius {
            return NodeProjection {
                distance,
                screen_radius: f32::INFINITY,
                weight: f32::MAX,
            };
        }

        let half_height = 0.5 * self.viewport_height;
        let projection_factor = match self.projection {
            Projection::Perspective { fov_y } => {
                let slope = (0.5 * fov_y).tan();
                half_height / (slope * distance)
            }
            Projection::Orthographic { top, bottom } => {
                // An empty view volume sees nothing.
                let view_height = top - bottom;
                if view_height > 0.0 {
                    2.0 * half_height / view_height
                } else {
                    0.0
                }
            }
        };
        let screen_radius = sphere.radius * projection_factor;

        NodeProjection {
            distance,
            screen_radius,
            weight: screen_radius + 1.0 / distance.max(f32::EPSILON),
        }
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

    fn sphere_at(z: f32, radius: f32) -> Sphere3 {
        Sphere3 {
            center: PointN([0.0, 0.0, z]),
            radius,
        }
    }

    #[test]
    fn perspective_radius_shrinks_with_distance() {
        let camera =
            CameraState::perspective(Point3f::ZERO, std::f32::consts::FRAC_PI_2, 1000.0);

        let near = camera.project(&sphere_at(10.0, 1.0));
        let far = camera.project(&sphere_at(100.0, 1.0));

        // tan(45 deg) = 1, so the factor is 500 / distance.
        assert!((near.screen_radius - 50.0).abs() < 1e-3);
        assert!((far.screen_radius - 5.0).abs() < 1e-3);
        assert!(near.weight > far.weight);
    }

    #[test]
    fn orthographic_radius_ignores_distance() {
        let camera = CameraState::orthographic(Point3f::ZERO, 10.0, -10.0, 1000.0);

        let near = camera.project(&sphere_at(10.0, 1.0));
        let far = camera.project(&sphere_at(100.0, 1.0));

        assert!((near.screen_radius - 50.0).abs() < 1e-3);
        assert!((far.screen_radius - 50.0).abs() < 1e-3);
        assert!(near.weight > far.weight);
    }

    #[test]
    fn degenerate_orthographic_volume_projects_to_nothing() {
        for &(top, bottom) in [(1.0, 1.0), (-1.0, 1.0), (f32::NAN, 0.0)].iter() {
            let camera = CameraState::orthographic(Point3f::ZERO, top, bottom, 1000.0);

            let projection = camera.project(&sphere_at(10.0, 1.0));

            assert_eq!(projection.screen_radius, 0.0);
            assert!(projection.weight.is_finite());
        }
    }

    #[test]
    fn camera_inside_sphere_has_max_weight() {
        let camera = CameraState::perspective(Point3f::ZERO, 1.0, 1000.0);

        let inside = camera.project(&sphere_at(0.5, 1.0));

        assert_eq!(inside.weight, f32::MAX);
        assert!(inside.screen_radius.is_infinite());
    }
}
