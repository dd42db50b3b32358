use crate::geometry::aabb::Aabb;
use crate::geometry::point::Point;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Outcome of offering a point to a node's subsampling strategy.
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum SampleOutcome {
    /// `point` was kept as a representative of this node (the caller pushes it to the bucket).
    Accepted(Point),
    /// `point` must instead cascade to the given child octant. For [SamplingStrategy::Grid]
    /// this is always the point just offered; for [SamplingStrategy::Random] it may instead be
    /// a previously-accepted point evicted from the reservoir to make room.
    CascadeToChild { point: Point, octant: u8 },
}

/// Configuration for the two subsampling strategies a node can be built with (spec §4.D).
/// A tagged variant rather than a trait object: the set is closed and strategies sit in the
/// indexing hot loop, where a vtable call per point is avoidable overhead.
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
pub enum SamplingStrategy {
    /// Partition the node's bounds into a `grid_size`^3 grid; first arrival in a cell wins,
    /// later colliders cascade. Frozen "first wins" semantics - see design notes.
    Grid { grid_size: u32 },
    /// Reservoir-sample up to `capacity` points uniformly; the evicted occupant cascades.
    Random { capacity: usize },
}

impl SamplingStrategy {
    pub fn new_sampler(&self, bounds: Aabb) -> NodeSampler {
        match *self {
            SamplingStrategy::Grid { grid_size } => NodeSampler::Grid(GridSampler::new(bounds, grid_size)),
            SamplingStrategy::Random { capacity } => NodeSampler::Random(RandomSampler::new(bounds, capacity)),
        }
    }
}

/// Per-node sampler state, produced by [SamplingStrategy::new_sampler]. Holds only the
/// bookkeeping needed to decide accept-vs-cascade; the accepted points themselves live in the
/// node's own [crate::geometry::point_buffer::PointBuffer], not duplicated here.
pub enum NodeSampler {
    Grid(GridSampler),
    Random(RandomSampler),
}

impl NodeSampler {
    /// Offers `point`, which must already be known to be absent from the bucket (the caller
    /// owns bucket mutation): for [SampleOutcome::Accepted] the caller pushes `point`; for
    /// [SampleOutcome::CascadeToChild] it pushes nothing and routes the returned point onward.
    /// `replace_in_bucket` is called by [RandomSampler] when it evicts a reservoir slot - it
    /// must overwrite the bucket entry at the given index with `point` and return the point
    /// that was there before.
    pub fn try_accept(
        &mut self,
        point: Point,
        replace_in_bucket: impl FnOnce(usize, Point) -> Point,
    ) -> SampleOutcome {
        match self {
            NodeSampler::Grid(s) => s.try_accept(point),
            NodeSampler::Random(s) => s.try_accept(point, replace_in_bucket),
        }
    }
}

/// Grid sampler: one point per cell, first arrival wins. The cell a point falls into doubles
/// as the octant it cascades to if already occupied - cell index bit pattern within the grid's
/// *top* bisection matches [Aabb::octant_for]'s canonical layout, so eviction always routes a
/// point toward the child it geometrically belongs in.
pub struct GridSampler {
    bounds: Aabb,
    grid_size: u32,
    occupied_cells: std::collections::HashSet<(u32, u32, u32)>,
}

impl GridSampler {
    fn new(bounds: Aabb, grid_size: u32) -> Self {
        GridSampler {
            bounds,
            grid_size: grid_size.max(1),
            occupied_cells: std::collections::HashSet::new(),
        }
    }

    fn cell_index(&self, point: &Point) -> (u32, u32, u32) {
        let extent = self.bounds.extent();
        let min = self.bounds.min();
        let n = self.grid_size as f64;
        let cell = |value: f64, min: f64, size: f64| -> u32 {
            if size <= 0.0 {
                return 0;
            }
            let normalized = ((value - min) / size * n).floor();
            normalized.clamp(0.0, n - 1.0) as u32
        };
        (
            cell(point.position.x, min.x, extent.x),
            cell(point.position.y, min.y, extent.y),
            cell(point.position.z, min.z, extent.z),
        )
    }

    fn try_accept(&mut self, point: Point) -> SampleOutcome {
        let cell = self.cell_index(&point);
        if self.occupied_cells.insert(cell) {
            SampleOutcome::Accepted(point)
        } else {
            SampleOutcome::CascadeToChild {
                octant: self.bounds.octant_for(&point.position),
                point,
            }
        }
    }
}

/// Reservoir sampler over up to `capacity` points. The reservoir's contents live directly in
/// the node's bucket - this sampler only tracks how many slots are filled and how many points
/// have been seen, and decides which bucket index (if any) a new arrival should overwrite.
pub struct RandomSampler {
    bounds: Aabb,
    capacity: usize,
    filled: usize,
    seen: usize,
}

impl RandomSampler {
    fn new(bounds: Aabb, capacity: usize) -> Self {
        RandomSampler {
            bounds,
            capacity: capacity.max(1),
            filled: 0,
            seen: 0,
        }
    }

    fn try_accept(&mut self, point: Point, replace_in_bucket: impl FnOnce(usize, Point) -> Point) -> SampleOutcome {
        self.seen += 1;
        if self.filled < self.capacity {
            self.filled += 1;
            return SampleOutcome::Accepted(point);
        }
        let j = rand::thread_rng().gen_range(0..self.seen);
        if j < self.capacity {
            let evicted = replace_in_bucket(j, point);
            SampleOutcome::CascadeToChild {
                octant: self.bounds.octant_for(&evicted.position),
                point: evicted,
            }
        } else {
            SampleOutcome::CascadeToChild {
                octant: self.bounds.octant_for(&point.position),
                point,
            }
        }
    }
}
