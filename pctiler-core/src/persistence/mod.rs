//! The sink Indexer flushes node buckets into (spec §4.F): a disk-backed implementation with a
//! bounded work queue served by a worker pool, and an in-memory implementation for tests and
//! small inputs.

mod disk;
mod memory;

pub use disk::DiskPersistence;
pub use memory::MemoryPersistence;

use crate::error::IoError;
use crate::geometry::aabb::Aabb;
use crate::geometry::octree_index::OctreeNodeIndex;
use crate::geometry::point_buffer::PointBuffer;
use crate::geometry::sampling::{SampleOutcome, SamplingStrategy};

/// Re-applies `strategy` to `buffer` when a duplicate flush has merged it past
/// `max_points_per_node`. Shared by [DiskPersistence] and [MemoryPersistence] so a node's final
/// content doesn't depend on which backend wrote it (spec §4.F: "retrieve the existing bucket,
/// concatenate, re-apply the subsampling strategy, write back"). Points the strategy would have
/// cascaded to a child are simply not re-included - there's no child to cascade to once a bucket
/// has already reached its terminal destination.
pub(crate) fn resample_if_over_capacity(
    strategy: &SamplingStrategy,
    bounds: &Aabb,
    max_points_per_node: usize,
    buffer: PointBuffer,
) -> PointBuffer {
    if buffer.len() <= max_points_per_node {
        return buffer;
    }
    let mut sampler = strategy.new_sampler(bounds.clone());
    let mut kept = PointBuffer::new(buffer.schema());
    for point in buffer.iter() {
        let outcome = sampler.try_accept(point, |i, new| {
            let old = kept.get(i);
            kept.set(i, new);
            old
        });
        if let SampleOutcome::Accepted(p) = outcome {
            if kept.len() < max_points_per_node {
                kept.push(p);
            }
        }
    }
    kept
}

/// The two implementations of the node-bucket sink, behind one capability set. A tagged
/// variant rather than a trait object, matching the rest of the crate's polymorphic-strategy
/// style (see [crate::geometry::sampling::SamplingStrategy]).
pub enum Persistence {
    Disk(DiskPersistence),
    Memory(MemoryPersistence),
}

impl Persistence {
    /// Enqueues `bucket` to be written under `index`. On a node that already has persisted
    /// data, the implementations append-merge: existing bytes/bucket are read back, the new
    /// points are concatenated on, and the result replaces what's there - the caller never
    /// blocks on the write itself unless the work queue is full (backpressure).
    pub fn persist(&self, index: OctreeNodeIndex, bounds: Aabb, bucket: PointBuffer) {
        match self {
            Persistence::Disk(d) => d.persist(index, bounds, bucket),
            Persistence::Memory(m) => m.persist(index, bounds, bucket),
        }
    }

    /// Retrieves whatever has been persisted for `index` so far, if anything. Used by tests and
    /// by [crate::tileset] to confirm node content exists before referencing it.
    pub fn retrieve(&self, index: OctreeNodeIndex) -> Option<(PointBuffer, Aabb)> {
        match self {
            Persistence::Disk(d) => d.retrieve(index),
            Persistence::Memory(m) => m.retrieve(index),
        }
    }

    /// Total count of node files that failed to write. Read after the writer pool has drained
    /// (see [DiskPersistence::join]) to decide the process exit code.
    pub fn failure_count(&self) -> usize {
        match self {
            Persistence::Disk(d) => d.failure_count(),
            Persistence::Memory(_) => 0,
        }
    }

    /// Blocks until every enqueued job has been written (or failed) and no more work is
    /// outstanding. A no-op for [Persistence::Memory], which writes synchronously.
    pub fn join(self) -> Vec<IoError> {
        match self {
            Persistence::Disk(d) => d.join(),
            Persistence::Memory(_) => Vec::new(),
        }
    }
}
