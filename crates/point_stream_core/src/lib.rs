//! The core geometry types used to describe point cloud octrees and camera state:
//! - `PointN`: a point in space, most importantly `Point3f`
//! - `Extent3f`: an axis-aligned bounding box
//! - `Sphere3`: a bounding sphere
//! - `Frustum`: the six clipping planes of a camera

pub mod extent;
pub mod frustum;
pub mod point;
pub mod sphere;

pub use extent::{bounding_extent, Extent3f};
pub use frustum::{Frustum, Plane};
pub use point::{Distance, DotProduct, Norm, NormSquared, Ones, Point3f, PointN, SmallZero};
pub use sphere::Sphere3;

#[cfg(feature = "glam")]
pub use glam;

pub mod prelude {
    pub use super::{
        Distance, DotProduct, Extent3f, Frustum, Norm, NormSquared, Ones, Plane, Point3f, PointN,
        SmallZero, Sphere3,
    };
}
