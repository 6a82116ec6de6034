use core::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[cfg(feature = "glam")]
mod glam_conversions;

/// A point in space, which is just a primitive array of type `N`. Streaming only ever deals in world-space floats, so the
/// only concrete point type is `Point3f`.
///
/// ```
/// use point_stream_core::{Point3f, PointN};
///
/// let p1 = PointN([1.0, 2.0, 3.0]);
/// let p2 = Point3f::fill(1.0);
///
/// assert_eq!(p1 + p2, PointN([2.0, 3.0, 4.0]));
/// assert_eq!(p1 - p2, PointN([0.0, 1.0, 2.0]));
/// assert_eq!(p1 * 2.0, PointN([2.0, 4.0, 6.0]));
/// ```
///
/// The partial order on points says that A is greater than B if and only if all components of A are greater than the
/// components of B, which makes containment checks read naturally.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct PointN<N>(pub N);

/// A 3-dimensional point with scalar type `f32`.
pub type Point3f = PointN<[f32; 3]>;

pub trait Distance {
    /// The square of the L2 (Euclidean) distance between points.
    fn l2_distance_squared(&self, other: &Self) -> f32;

    /// The L2 (Euclidean) distance between points.
    fn l2_distance(&self, other: &Self) -> f32 {
        self.l2_distance_squared(other).sqrt()
    }
}

pub trait NormSquared {
    fn norm_squared(&self) -> f32;
}

pub trait Norm {
    fn norm(&self) -> f32;
}

impl<T> Norm for T
where
    T: NormSquared,
{
    fn norm(&self) -> f32 {
        self.norm_squared().sqrt()
    }
}

pub trait DotProduct {
    /// The vector dot product.
    fn dot(&self, other: &Self) -> f32;
}

// `Zero` and `One` traits don't allow associated constants.
pub trait SmallZero: Copy {
    const ZERO: Self;
}

pub trait Ones: Copy {
    /// A point of all ones.
    const ONES: Self;
}

impl Point3f {
    #[inline]
    pub fn fill(value: f32) -> Self {
        PointN([value; 3])
    }

    #[inline]
    pub fn x(&self) -> f32 {
        self.0[0]
    }

    #[inline]
    pub fn y(&self) -> f32 {
        self.0[1]
    }

    #[inline]
    pub fn z(&self) -> f32 {
        self.0[2]
    }

    /// Returns the component specified by index. I.e. X = 0, Y = 1, Z = 2.
    #[inline]
    pub fn at(&self, component_index: usize) -> f32 {
        self.0[component_index]
    }

    /// Returns the point after applying `f` component-wise.
    #[inline]
    pub fn map_components(&self, f: impl Fn(f32) -> f32) -> Self {
        PointN([f(self.x()), f(self.y()), f(self.z())])
    }

    /// Applies `f` to each pair of components.
    #[inline]
    pub fn zip_components(&self, other: &Self, f: impl Fn(f32, f32) -> f32) -> Self {
        PointN([
            f(self.x(), other.x()),
            f(self.y(), other.y()),
            f(self.z(), other.z()),
        ])
    }

    /// Component-wise maximum.
    #[inline]
    pub fn join(&self, other: &Self) -> Self {
        self.zip_components(other, f32::max)
    }

    /// Component-wise minimum.
    #[inline]
    pub fn meet(&self, other: &Self) -> Self {
        self.zip_components(other, f32::min)
    }

    #[inline]
    pub fn abs(&self) -> Self {
        self.map_components(f32::abs)
    }

    #[inline]
    pub fn max_component(&self) -> f32 {
        self.x().max(self.y()).max(self.z())
    }

    #[inline]
    pub fn min_component(&self) -> f32 {
        self.x().min(self.y()).min(self.z())
    }

    /// Returns `true` iff no component is NaN or infinite.
    #[inline]
    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|c| c.is_finite())
    }

    /// The 8 corners of a unit cube, indexed by the binary format `0bZYX`.
    pub const CUBE_CORNER_OFFSETS: [Self; 8] = [
        PointN([0.0, 0.0, 0.0]),
        PointN([1.0, 0.0, 0.0]),
        PointN([0.0, 1.0, 0.0]),
        PointN([1.0, 1.0, 0.0]),
        PointN([0.0, 0.0, 1.0]),
        PointN([1.0, 0.0, 1.0]),
        PointN([0.0, 1.0, 1.0]),
        PointN([1.0, 1.0, 1.0]),
    ];
}

impl SmallZero for Point3f {
    const ZERO: Self = PointN([0.0; 3]);
}

impl Ones for Point3f {
    const ONES: Self = PointN([1.0; 3]);
}

impl PartialOrd for Point3f {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        use core::cmp::Ordering;

        if self == other {
            Some(Ordering::Equal)
        } else if self.lt(other) {
            Some(Ordering::Less)
        } else if self.gt(other) {
            Some(Ordering::Greater)
        } else {
            None
        }
    }

    #[inline]
    fn lt(&self, other: &Self) -> bool {
        self.x() < other.x() && self.y() < other.y() && self.z() < other.z()
    }

    #[inline]
    fn gt(&self, other: &Self) -> bool {
        self.x() > other.x() && self.y() > other.y() && self.z() > other.z()
    }

    #[inline]
    fn le(&self, other: &Self) -> bool {
        self.x() <= other.x() && self.y() <= other.y() && self.z() <= other.z()
    }

    #[inline]
    fn ge(&self, other: &Self) -> bool {
        self.x() >= other.x() && self.y() >= other.y() && self.z() >= other.z()
    }
}

impl Distance for Point3f {
    #[inline]
    fn l2_distance_squared(&self, other: &Self) -> f32 {
        (*other - *self).norm_squared()
    }
}

impl NormSquared for Point3f {
    #[inline]
    fn norm_squared(&self) -> f32 {
        self.dot(self)
    }
}

impl DotProduct for Point3f {
    #[inline]
    fn dot(&self, other: &Self) -> f32 {
        self.x() * other.x() + self.y() * other.y() + self.z() * other.z()
    }
}

impl Add for Point3f {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self {
        self.zip_components(&rhs, |a, b| a + b)
    }
}

impl Sub for Point3f {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Self) -> Self {
        self.zip_components(&rhs, |a, b| a - b)
    }
}

impl Mul<f32> for Point3f {
    type Output = Self;

    #[inline]
    fn mul(self, rhs: f32) -> Self {
        self.map_components(|c| c * rhs)
    }
}

impl Mul for Point3f {
    type Output = Self;

    #[inline]
    fn mul(self, rhs: Self) -> Self {
        self.zip_components(&rhs, |a, b| a * b)
    }
}

impl Div<f32> for Point3f {
    type Output = Self;

    #[inline]
    fn div(self, rhs: f32) -> Self {
        self.map_components(|c| c / rhs)
    }
}

impl Neg for Point3f {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        self.map_components(|c| -c)
    }
}

impl AddAssign for Point3f {
    #[inline]
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl SubAssign for Point3f {
    #[inline]
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl From<[f32; 3]> for Point3f {
    #[inline]
    fn from(p: [f32; 3]) -> Self {
        PointN(p)
    }
}

// ████████╗███████╗███████╗████████╗███████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝
//    ██║   █████╗  ███████╗   ██║   ███████╗
//    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║
//    ██║   ███████╗███████║   ██║   ███████║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝
