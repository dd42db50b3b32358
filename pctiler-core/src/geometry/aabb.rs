use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Formatter};

/// An axis aligned bounding box that may be empty.
///
/// The bounding box is defined via a minimum and a maximum bound. No assertion is made that
/// `min <= max` actually holds - if the min bound is larger than the max bound on any axis, the
/// bounding box is considered empty.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionAabb {
    min: Point3<f64>,
    max: Point3<f64>,
}

impl OptionAabb {
    /// Constructs an empty bounding box.
    pub fn empty() -> Self {
        OptionAabb {
            min: Point3::new(f64::MAX, f64::MAX, f64::MAX),
            max: Point3::new(f64::MIN, f64::MIN, f64::MIN),
        }
    }

    /// Checks, if the bounding box is empty.
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    /// Grows the bounding box so that it contains the given point.
    pub fn extend(&mut self, point: &Point3<f64>) {
        self.min.x = self.min.x.min(point.x);
        self.min.y = self.min.y.min(point.y);
        self.min.z = self.min.z.min(point.z);
        self.max.x = self.max.x.max(point.x);
        self.max.y = self.max.y.max(point.y);
        self.max.z = self.max.z.max(point.z);
    }

    /// Grows the bounding box so that it also contains `other`.
    pub fn extend_other(&mut self, other: &OptionAabb) {
        if other.is_empty() {
            return;
        }
        self.extend(&other.min);
        self.extend(&other.max);
    }

    /// Tries to convert this [OptionAabb] into an [Aabb]. Returns `None` if the bounding box is
    /// empty.
    pub fn into_aabb(self) -> Option<Aabb> {
        if self.is_empty() {
            None
        } else {
            Some(Aabb { inner: self })
        }
    }
}

impl Default for OptionAabb {
    fn default() -> Self {
        Self::empty()
    }
}

impl Debug for OptionAabb {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            write!(f, "OptionAabb (empty)")
        } else {
            write!(
                f,
                "OptionAabb ({:?},{:?},{:?} - {:?},{:?},{:?})",
                self.min.x, self.min.y, self.min.z, self.max.x, self.max.y, self.max.z
            )
        }
    }
}

/// An axis aligned bounding box, guaranteed to be non-empty (`min <= max` component-wise).
///
/// This is the root bounding box of a tiling run, and the bounds carried by every
/// [crate::index::node_store::NodeState].
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    inner: OptionAabb,
}

impl Aabb {
    /// Creates a new AABB from the given bounds. Panics if `min > max` on any axis.
    pub fn new(min: Point3<f64>, max: Point3<f64>) -> Self {
        assert!(min.x <= max.x && min.y <= max.y && min.z <= max.z);
        Aabb {
            inner: OptionAabb { min, max },
        }
    }

    pub fn min(&self) -> Point3<f64> {
        self.inner.min
    }

    pub fn max(&self) -> Point3<f64> {
        self.inner.max
    }

    pub fn extent(&self) -> Vector3<f64> {
        self.inner.max - self.inner.min
    }

    pub fn center(&self) -> Point3<f64> {
        nalgebra::center(&self.inner.min, &self.inner.max)
    }

    #[inline]
    pub fn contains(&self, point: &Point3<f64>) -> bool {
        self.inner.min.x <= point.x
            && self.inner.min.y <= point.y
            && self.inner.min.z <= point.z
            && self.inner.max.x >= point.x
            && self.inner.max.y >= point.y
            && self.inner.max.z >= point.z
    }

    pub fn union(&self, other: &Aabb) -> Aabb {
        let mut opt = self.inner.clone();
        opt.extend_other(&other.inner);
        opt.into_aabb().unwrap()
    }

    /// Extends `max` so that all three sides equal the longest side, making the box cubic.
    /// Mandatory before deriving a [crate::geometry::morton::MortonIndex] root, since the Morton
    /// encoding assumes equal axis lengths. Idempotent: `cubify(cubify(b)) == cubify(b)`.
    pub fn cubify(&self) -> Aabb {
        let extent = self.extent();
        let max_extent = extent.x.max(extent.y).max(extent.z);
        let v = Vector3::new(max_extent, max_extent, max_extent);
        Aabb::new(self.inner.min, self.inner.min + v)
    }

    /// Returns the 3-bit octant code for `point`, comparing each coordinate to the box center.
    /// Ties (point exactly on a split plane) go to the lower half. Bit 2 = +X, bit 1 = +Y,
    /// bit 0 = -Z - this numbering must stay bit-exact with [crate::geometry::morton::MortonIndex].
    pub fn octant_for(&self, point: &Point3<f64>) -> u8 {
        let center = self.center();
        let x = if point.x > center.x { 0b100 } else { 0 };
        let y = if point.y > center.y { 0b010 } else { 0 };
        let z = if point.z > center.z { 0b001 } else { 0 };
        x | y | z
    }

    /// Returns the `i`-th octant sub-box (`i` in `[0,8)`), splitting along the center on each
    /// axis according to the canonical bit layout (bit 2 = +X, bit 1 = +Y, bit 0 = -Z).
    pub fn child(&self, i: u8) -> Aabb {
        assert!(i < 8, "octant index must be in [0,8)");
        let center = self.center();
        let (min_x, max_x) = if i & 0b100 != 0 {
            (center.x, self.inner.max.x)
        } else {
            (self.inner.min.x, center.x)
        };
        let (min_y, max_y) = if i & 0b010 != 0 {
            (center.y, self.inner.max.y)
        } else {
            (self.inner.min.y, center.y)
        };
        let (min_z, max_z) = if i & 0b001 != 0 {
            (center.z, self.inner.max.z)
        } else {
            (self.inner.min.z, center.z)
        };
        Aabb::new(
            Point3::new(min_x, min_y, min_z),
            Point3::new(max_x, max_y, max_z),
        )
    }
}

impl Debug for Aabb {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Aabb ({:?},{:?},{:?} - {:?},{:?},{:?})",
            self.inner.min.x,
            self.inner.min.y,
            self.inner.min.z,
            self.inner.max.x,
            self.inner.max.y,
            self.inner.max.z
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_empty() {
        let aabb = OptionAabb::empty();
        assert!(aabb.is_empty());
        assert!(aabb.into_aabb().is_none());
    }

    #[test]
    fn contains() {
        let aabb = Aabb::new(Point3::new(0.0, 0.0, 0.0), Point3::new(2.0, 2.0, 2.0));
        assert!(aabb.contains(&Point3::new(0.0, 0.0, 0.0)));
        assert!(aabb.contains(&Point3::new(1.0, 1.0, 1.0)));
        assert!(aabb.contains(&Point3::new(2.0, 2.0, 2.0)));
        assert!(!aabb.contains(&Point3::new(-0.1, 1.0, 1.0)));
        assert!(!aabb.contains(&Point3::new(1.0, 2.1, 1.0)));
    }

    #[test]
    fn cubify_is_idempotent() {
        let aabb = Aabb::new(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 4.0, 2.0));
        let once = aabb.cubify();
        let twice = once.cubify();
        assert_eq!(once, twice);
        let extent = once.extent();
        assert_eq!(extent.x, extent.y);
        assert_eq!(extent.y, extent.z);
    }

    #[test]
    fn octant_numbering_matches_canonical_layout() {
        // unit cube centered at (0.5, 0.5, 0.5)
        let aabb = Aabb::new(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0));
        assert_eq!(aabb.octant_for(&Point3::new(0.1, 0.1, 0.1)), 0b000);
        assert_eq!(aabb.octant_for(&Point3::new(0.9, 0.1, 0.1)), 0b100);
        assert_eq!(aabb.octant_for(&Point3::new(0.1, 0.9, 0.1)), 0b010);
        assert_eq!(aabb.octant_for(&Point3::new(0.1, 0.1, 0.9)), 0b001);
        assert_eq!(aabb.octant_for(&Point3::new(0.9, 0.9, 0.9)), 0b111);
        // exactly on the split plane: ties go to the lower half
        assert_eq!(aabb.octant_for(&Point3::new(0.5, 0.5, 0.5)), 0b000);
    }

    #[test]
    fn child_octants_partition_the_box() {
        let aabb = Aabb::new(Point3::new(0.0, 0.0, 0.0), Point3::new(2.0, 2.0, 2.0));
        for i in 0..8u8 {
            let child = aabb.child(i);
            let point = child.center();
            // the center of a child is strictly inside the parent, and the octant computed
            // against the parent matches the index used to derive the child.
            assert_eq!(aabb.octant_for(&point), i, "child {i} round-trips");
        }
    }

    #[test]
    fn union() {
        let a = Aabb::new(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0));
        let b = Aabb::new(Point3::new(-1.0, 0.5, 2.0), Point3::new(0.5, 3.0, 2.5));
        let u = a.union(&b);
        assert_eq!(u.min(), Point3::new(-1.0, 0.0, 0.0));
        assert_eq!(u.max(), Point3::new(1.0, 3.0, 2.5));
    }
}
