use crate::error::ParseError;
use crate::geometry::morton::{MortonIndex, MAX_LEVELS};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// The three bijective string encodings for an [OctreeNodeIndex]. See spec §3.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub enum NamingConvention {
    /// Concatenation of decimal octant digits, root = empty string.
    Simple,
    /// `"r"` followed by the Simple string.
    Potree,
    /// `"D-X-Y-Z"`, D = levels, X/Y/Z = depth-D unsigned integers of the x/y/z octant bits.
    Entwine,
}

/// Identifies an octree *node* (not a point). A pair of a packed octant-path `index` and the
/// `levels` it spans - unlike [MortonIndex], which always represents a fixed resolution, an
/// `OctreeNodeIndex` has a level of its own, because tree nodes live at varying depths.
///
/// Invariant: bits above `3 * levels` of `index` are always zero. The root is `levels = 0,
/// index = 0`.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub struct OctreeNodeIndex {
    index: u64,
    levels: u32,
}

impl OctreeNodeIndex {
    /// The root node.
    pub fn root() -> Self {
        OctreeNodeIndex { index: 0, levels: 0 }
    }

    /// Constructs an index directly from a packed value and level count. Only exposed for
    /// call sites (node-store sharding, tests) that already know these are consistent; normal
    /// code should build indices via [Self::root], [Self::child], or the naming-convention
    /// parsers instead.
    pub fn unchecked_from_index_and_levels(index: u64, levels: u32) -> Self {
        debug_assert!(levels <= MAX_LEVELS);
        debug_assert!(levels == MAX_LEVELS || index >> (levels * 3) == 0);
        OctreeNodeIndex { index, levels }
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn levels(&self) -> u32 {
        self.levels
    }

    /// Truncates a point-resolution [MortonIndex] to a node index at the given `levels`
    /// (`levels <= morton.levels()`).
    pub fn from_morton(morton: &MortonIndex, levels: u32) -> Self {
        assert!(levels <= morton.levels());
        let shift = (morton.levels() - levels) * 3;
        OctreeNodeIndex {
            index: morton.bits() >> shift,
            levels,
        }
    }

    /// The octant at the given level (1-indexed from the root's children; `octant_at_level(0)`
    /// is `0` by definition, since there's only a single node - the root - at level zero).
    pub fn octant_at_level(&self, level: u32) -> u8 {
        assert!(level <= self.levels);
        if level == 0 {
            return 0;
        }
        let shift = (self.levels - level) * 3;
        ((self.index >> shift) & 0b111) as u8
    }

    /// The parent of this node. Panics on the root - calling `parent()` there is a programmer
    /// error (spec §4.A: `InvalidOperation`, fatal).
    pub fn parent(&self) -> Self {
        assert!(self.levels > 0, "parent() called on the root node");
        OctreeNodeIndex {
            index: self.index >> 3,
            levels: self.levels - 1,
        }
    }

    /// The ancestor of this node at the given `level` (`level <= self.levels()`).
    pub fn parent_at_level(&self, level: u32) -> Self {
        assert!(level <= self.levels, "level must be <= levels()");
        let shift = (self.levels - level) * 3;
        OctreeNodeIndex {
            index: self.index >> shift,
            levels: level,
        }
    }

    /// The sibling sharing this node's parent, at the given octant.
    pub fn sibling(&self, octant: u8) -> Self {
        assert!(octant < 8);
        assert!(self.levels > 0, "sibling() called on the root node");
        let new_index = (self.index & !0b111) | octant as u64;
        OctreeNodeIndex {
            index: new_index,
            levels: self.levels,
        }
    }

    /// The child node at the given octant. Panics if this node is already at the maximum depth
    /// or `octant >= 8` (spec §4.A: `InvalidOperation`, fatal).
    pub fn child(&self, octant: u8) -> Self {
        assert!(octant < 8);
        assert!(
            self.levels < MAX_LEVELS,
            "child() called at the maximum supported depth"
        );
        OctreeNodeIndex {
            index: (self.index << 3) | octant as u64,
            levels: self.levels + 1,
        }
    }

    /// The 8 children of this node, in octant order.
    pub fn children(&self) -> [Self; 8] {
        std::array::from_fn(|i| self.child(i as u8))
    }

    pub fn to_string(&self, convention: NamingConvention) -> String {
        match convention {
            NamingConvention::Simple => self.octant_digits(),
            NamingConvention::Potree => format!("r{}", self.octant_digits()),
            NamingConvention::Entwine => {
                let (mut x, mut y, mut z) = (0u64, 0u64, 0u64);
                for level in 0..self.levels {
                    let octant = self.octant_at_level(level + 1);
                    x = (x << 1) | ((octant >> 2) & 1) as u64;
                    y = (y << 1) | ((octant >> 1) & 1) as u64;
                    z = (z << 1) | (octant & 1) as u64;
                }
                format!("{}-{}-{}-{}", self.levels, x, y, z)
            }
        }
    }

    pub fn from_string(s: &str, convention: NamingConvention) -> Result<Self, ParseError> {
        match convention {
            NamingConvention::Simple => Self::from_octant_digits(s),
            NamingConvention::Potree => {
                let rest = s.strip_prefix('r').ok_or(ParseError::MissingPotreePrefix)?;
                Self::from_octant_digits(rest)
            }
            NamingConvention::Entwine => Self::from_entwine(s),
        }
    }

    fn octant_digits(&self) -> String {
        (1..=self.levels)
            .map(|level| char::from(b'0' + self.octant_at_level(level)))
            .collect()
    }

    fn from_octant_digits(s: &str) -> Result<Self, ParseError> {
        let depth = s.len() as u32;
        if depth > MAX_LEVELS {
            return Err(ParseError::DepthExceedsMaxLevels {
                depth,
                max_levels: MAX_LEVELS,
            });
        }
        let mut index = OctreeNodeIndex::root();
        for c in s.chars() {
            let octant = c
                .to_digit(10)
                .filter(|d| *d < 8)
                .ok_or(ParseError::BadOctantDigit(c))? as u8;
            index = index.child(octant);
        }
        Ok(index)
    }

    fn from_entwine(s: &str) -> Result<Self, ParseError> {
        let parts: Vec<&str> = s.split('-').collect();
        let [d, x, y, z] = parts.as_slice() else {
            return Err(ParseError::MalformedEntwineTuple(s.to_string()));
        };
        let parse_u64 = |v: &str| v.parse::<u64>().map_err(|_| ParseError::MalformedEntwineTuple(s.to_string()));
        let depth: u32 = d.parse().map_err(|_| ParseError::MalformedEntwineTuple(s.to_string()))?;
        if depth > MAX_LEVELS {
            return Err(ParseError::DepthExceedsMaxLevels {
                depth,
                max_levels: MAX_LEVELS,
            });
        }
        let x = parse_u64(x)?;
        let y = parse_u64(y)?;
        let z = parse_u64(z)?;

        let mut index = OctreeNodeIndex::root();
        for level in 0..depth {
            let shift = depth - level - 1;
            let x_bit = (x >> shift) & 1;
            let y_bit = (y >> shift) & 1;
            let z_bit = (z >> shift) & 1;
            let octant = ((x_bit << 2) | (y_bit << 1) | z_bit) as u8;
            index = index.child(octant);
        }
        Ok(index)
    }
}

impl fmt::Display for OctreeNodeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string(NamingConvention::Simple))
    }
}

/// Lexicographic ordering: compares both indices at `min(levels_a, levels_b)`, i.e. a prefix
/// order on the octant string.
impl Ord for OctreeNodeIndex {
    fn cmp(&self, other: &Self) -> Ordering {
        let level = self.levels.min(other.levels);
        self.parent_at_level(level)
            .index
            .cmp(&other.parent_at_level(level).index)
            .then(self.levels.cmp(&other.levels))
    }
}

impl PartialOrd for OctreeNodeIndex {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
