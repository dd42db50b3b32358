use crate::geometry::aabb::Aabb;
use nalgebra::Point3;

/// Maximum number of octree levels supported by the `u64`-backed bit-packed indices in this
/// crate: `3 * 21 = 63` bits, the largest multiple of 3 that still fits a `u64`.
pub const MAX_LEVELS: u32 = 21;

/// A space-filling-curve key, formed by bit-interleaving the x/y/z grid coordinates of a point
/// at a fixed resolution of `2^levels` cells per axis.
///
/// Interleaving order: for level `l` (`1` = root's children .. `levels` = leaves), the three
/// bits are `(x_bit << 2) | (y_bit << 1) | z_bit`, with the most significant bits encoding the
/// top level. Equality and ordering are plain integer operations on the packed representation.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct MortonIndex {
    bits: u64,
    levels: u32,
}

impl MortonIndex {
    /// Encodes `point`'s position inside `root_bounds` at the given resolution (`levels`
    /// grid cells per axis, i.e. `2^levels` cells along each side). `root_bounds` must already
    /// be cubic (see [Aabb::cubify]).
    ///
    /// Points exactly on the positive bound of `root_bounds` fall into the last cell on that
    /// axis, same as every interior split: see [Aabb::octant_for]'s tie-breaking rule, applied
    /// recursively here via direct cell-index arithmetic instead of repeated bisection.
    pub fn encode(point: &Point3<f64>, root_bounds: &Aabb, levels: u32) -> MortonIndex {
        assert!(levels <= MAX_LEVELS);
        let extent = root_bounds.extent();
        let min = root_bounds.min();
        let resolution = (1u64 << levels) as f64;
        let cell_index = |value: f64, min: f64, size: f64| -> u64 {
            if size <= 0.0 {
                return 0;
            }
            let normalized = ((value - min) / size * resolution).floor();
            let clamped = normalized.clamp(0.0, resolution - 1.0);
            clamped as u64
        };
        let xi = cell_index(point.x, min.x, extent.x);
        let yi = cell_index(point.y, min.y, extent.y);
        let zi = cell_index(point.z, min.z, extent.z);

        let mut bits: u64 = 0;
        for level in 0..levels {
            let shift = levels - 1 - level;
            let x_bit = (xi >> shift) & 1;
            let y_bit = (yi >> shift) & 1;
            let z_bit = (zi >> shift) & 1;
            bits = (bits << 3) | (x_bit << 2) | (y_bit << 1) | z_bit;
        }
        MortonIndex { bits, levels }
    }

    /// The raw packed bits (`3 * levels` significant bits, MSB-aligned to the top level).
    pub fn bits(&self) -> u64 {
        self.bits
    }

    /// The resolution (cells per axis is `2^levels`) that this key was encoded at.
    pub fn levels(&self) -> u32 {
        self.levels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_cube() -> Aabb {
        Aabb::new(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0))
    }

    #[test]
    fn encodes_octants_at_level_one() {
        let root = unit_cube();
        // corresponds to octant 0b000 (low x, low y, low z)
        let m = MortonIndex::encode(&Point3::new(0.1, 0.1, 0.1), &root, 1);
        assert_eq!(m.bits(), 0b000);
        let m = MortonIndex::encode(&Point3::new(0.9, 0.1, 0.1), &root, 1);
        assert_eq!(m.bits(), 0b100);
        let m = MortonIndex::encode(&Point3::new(0.9, 0.9, 0.9), &root, 1);
        assert_eq!(m.bits(), 0b111);
    }

    #[test]
    fn octant_bits_match_aabb_octant_for_at_every_level() {
        // property: descending through a point's morton key octant-by-octant must match
        // repeatedly calling Aabb::octant_for on successively smaller child boxes.
        let root = unit_cube();
        let point = Point3::new(0.1, 0.83, 0.47);
        let levels = 5;
        let m = MortonIndex::encode(&point, &root, levels);

        let mut bounds = root;
        for level in 0..levels {
            let shift = (levels - 1 - level) * 3;
            let octant_from_morton = ((m.bits() >> shift) & 0b111) as u8;
            let octant_from_aabb = bounds.octant_for(&point);
            assert_eq!(octant_from_morton, octant_from_aabb, "mismatch at level {level}");
            bounds = bounds.child(octant_from_aabb);
        }
    }

    #[test]
    fn point_on_max_bound_falls_into_last_cell() {
        let root = unit_cube();
        let m = MortonIndex::encode(&Point3::new(1.0, 1.0, 1.0), &root, 2);
        assert_eq!(m.bits(), 0b111111);
    }
}
