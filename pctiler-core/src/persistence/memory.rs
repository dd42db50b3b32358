use crate::geometry::aabb::Aabb;
use crate::geometry::octree_index::OctreeNodeIndex;
use crate::geometry::point_buffer::PointBuffer;
use crate::geometry::sampling::SamplingStrategy;
use crate::persistence::resample_if_over_capacity;
use std::collections::HashMap;
use std::sync::Mutex;

/// Keeps every node's bucket in a concurrent map instead of writing to disk. Used by the test
/// suite and for inputs small enough that spilling to disk buys nothing.
pub struct MemoryPersistence {
    nodes: Mutex<HashMap<OctreeNodeIndex, (PointBuffer, Aabb)>>,
    strategy: SamplingStrategy,
    max_points_per_node: usize,
}

impl MemoryPersistence {
    pub fn new(strategy: SamplingStrategy, max_points_per_node: usize) -> Self {
        MemoryPersistence {
            nodes: Mutex::new(HashMap::new()),
            strategy,
            max_points_per_node,
        }
    }

    /// Duplicate flushes append-merge and re-apply the subsampling strategy, same as
    /// [crate::persistence::DiskPersistence] - a node's content shouldn't depend on which
    /// backend wrote it (spec §4.F).
    pub fn persist(&self, index: OctreeNodeIndex, bounds: Aabb, bucket: PointBuffer) {
        let mut map = self.nodes.lock().unwrap();
        let merged = match map.remove(&index) {
            Some((mut existing, _)) => {
                existing.extend(&bucket);
                existing
            }
            None => bucket,
        };
        let final_buffer = resample_if_over_capacity(&self.strategy, &bounds, self.max_points_per_node, merged);
        map.insert(index, (final_buffer, bounds));
    }

    pub fn retrieve(&self, index: OctreeNodeIndex) -> Option<(PointBuffer, Aabb)> {
        self.nodes.lock().unwrap().get(&index).cloned()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::point::{AttributeSchema, Point};
    use nalgebra::Point3;

    fn unit_cube() -> Aabb {
        Aabb::new(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0))
    }

    #[test]
    fn duplicate_flush_appends() {
        let persistence = MemoryPersistence::new(SamplingStrategy::Grid { grid_size: 128 }, 1000);
        let root = OctreeNodeIndex::root();
        let mut first = PointBuffer::new(AttributeSchema::NONE);
        first.push(Point::at(Point3::new(0.1, 0.1, 0.1)));
        persistence.persist(root, unit_cube(), first);

        let mut second = PointBuffer::new(AttributeSchema::NONE);
        second.push(Point::at(Point3::new(0.2, 0.2, 0.2)));
        persistence.persist(root, unit_cube(), second);

        let (merged, _) = persistence.retrieve(root).unwrap();
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn duplicate_flush_past_capacity_resamples_instead_of_growing_unbounded() {
        let persistence = MemoryPersistence::new(SamplingStrategy::Grid { grid_size: 1 }, 1);
        let root = OctreeNodeIndex::root();
        let mut first = PointBuffer::new(AttributeSchema::NONE);
        first.push(Point::at(Point3::new(0.1, 0.1, 0.1)));
        persistence.persist(root, unit_cube(), first);

        let mut second = PointBuffer::new(AttributeSchema::NONE);
        second.push(Point::at(Point3::new(0.2, 0.2, 0.2)));
        persistence.persist(root, unit_cube(), second);

        let (merged, _) = persistence.retrieve(root).unwrap();
        assert!(merged.len() <= 1);
    }
}
