use crate::{Distance, Ones, Point3f, PointN, SmallZero, Sphere3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// An axis-aligned box with some shape and a minimum point. This is the bounding volume of every octree node.
///
/// The extent is closed: points on the upper faces are contained.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct Extent3f {
    /// The least point contained in the extent.
    pub minimum: Point3f,
    /// The length of each dimension.
    pub shape: Point3f,
}

impl Extent3f {
    /// The default representation of an extent as the minimum point and shape.
    #[inline]
    pub fn from_min_and_shape(minimum: Point3f, shape: Point3f) -> Self {
        Self { minimum, shape }
    }

    #[inline]
    pub fn from_min_and_max(minimum: Point3f, maximum: Point3f) -> Self {
        Self::from_min_and_shape(minimum, maximum - minimum)
    }

    /// A cube centered at `center` with edge length `2 * half_edge`.
    #[inline]
    pub fn cube_around(center: Point3f, half_edge: f32) -> Self {
        Self::from_min_and_shape(
            center - Point3f::fill(half_edge),
            Point3f::fill(2.0 * half_edge),
        )
    }

    /// The greatest point contained in the extent.
    #[inline]
    pub fn maximum(&self) -> Point3f {
        self.minimum + self.shape
    }

    #[inline]
    pub fn center(&self) -> Point3f {
        self.minimum + self.shape / 2.0
    }

    #[inline]
    pub fn volume(&self) -> f32 {
        self.shape.x() * self.shape.y() * self.shape.z()
    }

    /// Half of the length of the diagonal.
    #[inline]
    pub fn circumradius(&self) -> f32 {
        Point3f::ZERO.l2_distance(&self.shape) / 2.0
    }

    /// The smallest sphere containing all corners of this extent.
    #[inline]
    pub fn bounding_sphere(&self) -> Sphere3 {
        Sphere3 {
            center: self.center(),
            radius: self.circumradius(),
        }
    }

    /// Returns `true` iff the extent is made of finite numbers and has no negative dimension.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.minimum.is_finite() && self.shape.is_finite() && self.shape >= Point3f::ZERO
    }

    /// Returns `true` iff the point `p` is contained in this extent.
    #[inline]
    pub fn contains(&self, p: Point3f) -> bool {
        self.minimum <= p && p <= self.maximum()
    }

    /// Returns `true` iff all of `other` fits inside `self`, allowing `tolerance` of slack on every face.
    #[inline]
    pub fn contains_extent(&self, other: &Self, tolerance: f32) -> bool {
        let slack = Point3f::ONES * tolerance;

        self.minimum - slack <= other.minimum && other.maximum() <= self.maximum() + slack
    }

    #[inline]
    pub fn intersects(&self, other: &Self) -> bool {
        self.minimum <= other.maximum() && other.minimum <= self.maximum()
    }

    /// The corner selected by `corner_index` in the binary format `0bZYX`.
    #[inline]
    pub fn corner(&self, corner_index: u8) -> Point3f {
        self.minimum + self.shape * Point3f::CUBE_CORNER_OFFSETS[corner_index as usize]
    }

    /// Returns the child octant, where `child_index` specifies the child as a number in `[0..7]` of the binary format
    /// `0bZYX`.
    #[inline]
    pub fn octant(&self, child_index: u8) -> Self {
        debug_assert!(child_index < 8);
        let half_shape = self.shape / 2.0;

        Self::from_min_and_shape(
            self.minimum + half_shape * Point3f::CUBE_CORNER_OFFSETS[child_index as usize],
            half_shape,
        )
    }

    /// The corner that is farthest along `direction`. Used for plane tests.
    #[inline]
    pub fn support_point(&self, direction: Point3f) -> Point3f {
        let max = self.maximum();

        PointN([
            if direction.x() >= 0.0 { max.x() } else { self.minimum.x() },
            if direction.y() >= 0.0 { max.y() } else { self.minimum.y() },
            if direction.z() >= 0.0 { max.z() } else { self.minimum.z() },
        ])
    }
}

/// Returns the smallest extent containing all of the given points.
pub fn bounding_extent<I>(mut points: I) -> Option<Extent3f>
where
    I: Iterator<Item = Point3f>,
{
    let first = points.next()?;
    let (min, max) = points.fold((first, first), |(min, max), p| (min.meet(&p), max.join(&p)));

    Some(Extent3f::from_min_and_max(min, max))
}

// ████████╗███████╗███████╗████████╗███████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝
//    ██║   █████╗  ███████╗   ██║   ███████╗
//    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║
//    ██║   ███████╗███████║   ██║   ███████║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝
