use std::fmt::{Display, Formatter};

/// The identity of a node as its path from the root: a sentinel bit followed by 3 bits (the child octant, `0bZYX`) per
/// level. The root is `0b1`, its child in octant 5 is `0b1101`, and so on. Displayed the way point cloud hierarchies name
/// their nodes, e.g. `r05`.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct NodePath(u64);

impl NodePath {
    pub const ROOT: Self = Self(1);
    /// Deepest level a path can encode.
    pub const MAX_LEVEL: u8 = 21;

    /// Returns the path of the child in `octant`, or `None` if `octant` is out of range or the path would exceed
    /// `MAX_LEVEL`.
    #[inline]
    pub fn child(self, octant: u8) -> Option<Self> {
        if octant >= 8 || self.level() >= Self::MAX_LEVEL {
            return None;
        }

        Some(Self((self.0 << 3) | octant as u64))
    }

    #[inline]
    pub fn parent(self) -> Option<Self> {
        if self == Self::ROOT {
            None
        } else {
            Some(Self(self.0 >> 3))
        }
    }

    /// Depth below the root, which is level 0.
    #[inline]
    pub fn level(self) -> u8 {
        ((63 - self.0.leading_zeros()) / 3) as u8
    }

    /// The octant of this node within its parent, or `None` for the root.
    #[inline]
    pub fn octant(self) -> Option<u8> {
        self.parent().map(|_| (self.0 & 0b111) as u8)
    }

    /// The octants from the root down to this node.
    pub fn octants(self) -> impl Iterator<Item = u8> {
        let level = self.level() as u32;

        (0..level)
            .rev()
            .map(move |shift| ((self.0 >> (3 * shift)) & 0b111) as u8)
    }

    #[inline]
    pub fn is_ancestor_of(self, other: Self) -> bool {
        let (level, other_level) = (self.level(), other.level());

        level < other_level && other.0 >> (3 * (other_level - level) as u32) == self.0
    }

    /// Parses the `r0153` form.
    pub fn parse(name: &str) -> Option<Self> {
        let digits = name.strip_prefix('r')?;
        let mut path = Self::ROOT;
        for c in digits.chars() {
            path = path.child(c.to_digit(8)? as u8)?;
        }

        Some(path)
    }

    #[inline]
    pub fn into_raw(self) -> u64 {
        self.0
    }
}

impl Display for NodePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "r")?;
        for octant in self.octants() {
            write!(f, "{}", octant)?;
        }

        Ok(())
    }
}

impl std::fmt::Debug for NodePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "NodePath({})", self)
    }
}

// ████████╗███████╗███████╗████████╗███████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝
//    ██║   █████╗  ███████╗   ██║   ███████╗
//    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║
//    ██║   ███████╗███████║   ██║   ███████║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝
