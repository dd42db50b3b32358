use crate::geometry::aabb::Aabb;
use crate::geometry::octree_index::OctreeNodeIndex;
use crate::geometry::point::Point;
use crate::geometry::point_buffer::PointBuffer;
use crate::geometry::sampling::{NodeSampler, SampleOutcome, SamplingStrategy};
use std::collections::HashMap;
use std::sync::Mutex;

/// Default shard count when the caller doesn't need more than the spec's floor (spec §5: "M ≥
/// worker_count, default 64").
const DEFAULT_SHARD_COUNT: usize = 64;

/// Picks a power-of-two shard count no smaller than `worker_count` and no smaller than
/// [DEFAULT_SHARD_COUNT], so the anti-contention guarantee holds even when a caller asks for
/// more indexing workers than the default floor.
fn shard_count_for(worker_count: usize) -> usize {
    worker_count.max(DEFAULT_SHARD_COUNT).next_power_of_two()
}

/// Number of top-level octant digits whose bits can possibly matter when masking down to
/// `shard_count`: each level contributes 3 bits, so this is `ceil(log2(shard_count) / 3)`.
fn shard_levels_for(shard_count: usize) -> u32 {
    let bits_needed = shard_count.trailing_zeros();
    (bits_needed + 2) / 3
}

/// Outcome of [NodeStore::push_point].
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Action {
    /// The point was absorbed into the node's bucket or sampler; no further work needed.
    Kept,
    /// The node is full and has not reached the configured maximum depth: the caller should
    /// create/descend into the given child and retry there.
    SplitRequested(u8),
    /// The node is full and already at maximum depth: the caller must detach its bucket via
    /// [NodeStore::take_bucket] and hand it to the persistence layer.
    FlushRequested,
}

/// A node's mutable state: its point bucket, bounds, and bookkeeping. See module docs for the
/// invariants a [NodeStore] maintains over a map of these.
pub struct NodeState {
    pub bounds: Aabb,
    pub bucket: PointBuffer,
    pub children_present: u8,
    pub flushed: bool,
}

struct Shard {
    nodes: HashMap<OctreeNodeIndex, NodeState>,
    samplers: HashMap<OctreeNodeIndex, NodeSampler>,
}

impl Shard {
    fn new() -> Self {
        Shard {
            nodes: HashMap::new(),
            samplers: HashMap::new(),
        }
    }
}

/// The in-memory octree. Sharded by the top [SHARD_BITS] octant levels of the node index so
/// concurrent indexing workers touching different subtrees don't contend on one lock (spec §5:
/// "NodeStore is partitioned into M shards... keyed by the top k bits of the node index").
pub struct NodeStore {
    shards: Vec<Mutex<Shard>>,
    shard_levels: u32,
    max_points_per_node: usize,
    max_depth: u32,
    strategy: SamplingStrategy,
    schema: crate::geometry::point::AttributeSchema,
}

impl NodeStore {
    /// `worker_count` sizes the shard table: at least [DEFAULT_SHARD_COUNT] shards, and never
    /// fewer than `worker_count` (spec §5's anti-contention guarantee).
    pub fn new(
        root_bounds: Aabb,
        max_points_per_node: usize,
        max_depth: u32,
        strategy: SamplingStrategy,
        schema: crate::geometry::point::AttributeSchema,
        worker_count: usize,
    ) -> Self {
        let shard_count = shard_count_for(worker_count);
        let mut shards = Vec::with_capacity(shard_count);
        for _ in 0..shard_count {
            shards.push(Mutex::new(Shard::new()));
        }
        let store = NodeStore {
            shards,
            shard_levels: shard_levels_for(shard_count),
            max_points_per_node: max_points_per_node.max(1),
            max_depth,
            strategy,
            schema,
        };
        store.get_or_create(OctreeNodeIndex::root(), root_bounds);
        store
    }

    fn shard_for(&self, index: OctreeNodeIndex) -> &Mutex<Shard> {
        let shard_levels = self.shard_levels.min(index.levels());
        let top = index.parent_at_level(shard_levels).index();
        let key = (top as usize) & (self.shards.len() - 1);
        &self.shards[key]
    }

    /// Ensures `index` is present with the given `bounds`, creating it (and its sampler) on
    /// first access. Per the NodeStore invariant, callers only ever create a child once its
    /// parent is already present, so ancestors are always present by construction.
    pub fn get_or_create(&self, index: OctreeNodeIndex, bounds: Aabb) -> OctreeNodeIndex {
        let shard = self.shard_for(index);
        let mut guard = shard.lock().unwrap();
        guard.nodes.entry(index).or_insert_with(|| NodeState {
            bounds: bounds.clone(),
            bucket: PointBuffer::new(self.schema),
            children_present: 0,
            flushed: false,
        });
        guard
            .samplers
            .entry(index)
            .or_insert_with(|| self.strategy.new_sampler(bounds));
        index
    }

    /// Offers `point` to the node at `index`. The node must already exist (via
    /// [Self::get_or_create]).
    ///
    /// Leaf nodes (`levels == max_depth`) have no subsampling: the bucket simply fills up to
    /// `max_points_per_node` and then reports `FlushRequested`. Inner nodes run the configured
    /// [SamplingStrategy]: a point either joins the bucket as a representative, or it (or a
    /// point it displaced) cascades to a child.
    pub fn push_point(&self, index: OctreeNodeIndex, point: Point) -> Action {
        let shard = self.shard_for(index);
        let mut guard = shard.lock().unwrap();
        let at_leaf = index.levels() >= self.max_depth;

        if at_leaf {
            let node = guard.nodes.get_mut(&index).expect("node must exist");
            if node.bucket.len() >= self.max_points_per_node {
                return Action::FlushRequested;
            }
            node.bucket.push(point);
            return Action::Kept;
        }

        let Shard { nodes, samplers } = &mut *guard;
        let node = nodes.get_mut(&index).expect("node must exist");
        let sampler = samplers.get_mut(&index).expect("node must exist");
        let bucket = &mut node.bucket;
        let outcome = sampler.try_accept(point, |i, new| {
            let old = bucket.get(i);
            bucket.set(i, new);
            old
        });
        match outcome {
            SampleOutcome::Accepted(p) => {
                if node.bucket.len() >= self.max_points_per_node {
                    let octant = node.bounds.octant_for(&p.position);
                    node.children_present |= 1 << octant;
                    Action::SplitRequested(octant)
                } else {
                    node.bucket.push(p);
                    Action::Kept
                }
            }
            SampleOutcome::CascadeToChild { octant, .. } => {
                node.children_present |= 1 << octant;
                Action::SplitRequested(octant)
            }
        }
    }

    /// Moves a node's bucket out, leaving the node present but with an empty bucket.
    pub fn take_bucket(&self, index: OctreeNodeIndex) -> PointBuffer {
        let shard = self.shard_for(index);
        let mut guard = shard.lock().unwrap();
        let node = guard.nodes.get_mut(&index).expect("node must exist");
        std::mem::replace(&mut node.bucket, PointBuffer::new(self.schema))
    }

    pub fn bounds_of(&self, index: OctreeNodeIndex) -> Aabb {
        let shard = self.shard_for(index);
        let guard = shard.lock().unwrap();
        guard.nodes.get(&index).expect("node must exist").bounds.clone()
    }

    pub fn mark_flushed(&self, index: OctreeNodeIndex, success: bool) {
        let shard = self.shard_for(index);
        let mut guard = shard.lock().unwrap();
        if let Some(node) = guard.nodes.get_mut(&index) {
            node.flushed = success;
        }
    }

    pub fn children_present(&self, index: OctreeNodeIndex) -> u8 {
        let shard = self.shard_for(index);
        let guard = shard.lock().unwrap();
        guard.nodes.get(&index).map(|n| n.children_present).unwrap_or(0)
    }

    pub fn contains(&self, index: OctreeNodeIndex) -> bool {
        let shard = self.shard_for(index);
        let guard = shard.lock().unwrap();
        guard.nodes.contains_key(&index)
    }

    /// All present node indices, collected across shards. No ordering guarantee; callers that
    /// need DFS order (the tileset assembler) sort the result themselves - see
    /// [Self::iter_nodes_dfs].
    pub fn all_indices(&self) -> Vec<OctreeNodeIndex> {
        let mut out = Vec::new();
        for shard in &self.shards {
            let guard = shard.lock().unwrap();
            out.extend(guard.nodes.keys().copied());
        }
        out
    }

    /// Traversal in DFS order, parent before children, used by the tileset assembler.
    pub fn iter_nodes_dfs(&self) -> Vec<OctreeNodeIndex> {
        let mut all = self.all_indices();
        all.sort();
        all
    }

    /// Every node whose bucket is non-empty, for the drain phase.
    pub fn non_empty_buckets(&self) -> Vec<OctreeNodeIndex> {
        let mut out = Vec::new();
        for shard in &self.shards {
            let guard = shard.lock().unwrap();
            out.extend(
                guard
                    .nodes
                    .iter()
                    .filter(|(_, n)| !n.bucket.is_empty())
                    .map(|(idx, _)| *idx),
            );
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::point::AttributeSchema;
    use nalgebra::Point3;

    fn unit_cube() -> Aabb {
        Aabb::new(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0))
    }

    #[test]
    fn single_point_is_kept_at_root() {
        let store = NodeStore::new(
            unit_cube(),
            10,
            3,
            SamplingStrategy::Grid { grid_size: 128 },
            AttributeSchema::NONE,
            1,
        );
        let root = OctreeNodeIndex::root();
        let action = store.push_point(root, Point::at(Point3::new(0.5, 0.5, 0.5)));
        assert_eq!(action, Action::Kept);
        assert_eq!(store.take_bucket(root).len(), 1);
    }

    #[test]
    fn root_always_present_after_construction() {
        let store = NodeStore::new(
            unit_cube(),
            10,
            3,
            SamplingStrategy::Grid { grid_size: 128 },
            AttributeSchema::NONE,
            1,
        );
        assert!(store.contains(OctreeNodeIndex::root()));
    }

    #[test]
    fn overflow_requests_split_below_max_depth() {
        let store = NodeStore::new(
            unit_cube(),
            1,
            2,
            SamplingStrategy::Grid { grid_size: 1 },
            AttributeSchema::NONE,
            1,
        );
        let root = OctreeNodeIndex::root();
        let first = store.push_point(root, Point::at(Point3::new(0.1, 0.1, 0.1)));
        assert_eq!(first, Action::Kept);
        let second = store.push_point(root, Point::at(Point3::new(0.9, 0.9, 0.9)));
        assert!(matches!(second, Action::SplitRequested(_)));
    }

    #[test]
    fn overflow_requests_flush_at_max_depth() {
        let store = NodeStore::new(
            unit_cube(),
            1,
            0,
            SamplingStrategy::Grid { grid_size: 1 },
            AttributeSchema::NONE,
            1,
        );
        let root = OctreeNodeIndex::root();
        store.push_point(root, Point::at(Point3::new(0.1, 0.1, 0.1)));
        let second = store.push_point(root, Point::at(Point3::new(0.9, 0.9, 0.9)));
        assert_eq!(second, Action::FlushRequested);
    }

    #[test]
    fn shard_count_never_falls_below_worker_count_or_the_default_floor() {
        assert_eq!(shard_count_for(1), 64);
        assert_eq!(shard_count_for(64), 64);
        assert_eq!(shard_count_for(100), 128);
        assert_eq!(shard_count_for(200), 256);
    }
}
