use crate::{Distance, Point3f};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct Sphere3 {
    pub center: Point3f,
    pub radius: f32,
}

impl Sphere3 {
    #[inline]
    pub fn contains(&self, p: Point3f) -> bool {
        self.center.l2_distance_squared(&p) <= self.radius * self.radius
    }

    /// Distance from `p` to the center of the sphere.
    #[inline]
    pub fn center_distance(&self, p: Point3f) -> f32 {
        self.center.l2_distance(&p)
    }
}
