//! Ties the pieces together into the four-phase run described in spec §4.H: Prepare, Index,
//! Drain, Finalize, each phase a barrier before the next starts.

use crate::error::{Cancelled, ConfigError, TilerError};
use crate::geometry::aabb::{Aabb, OptionAabb};
use crate::geometry::octree_index::NamingConvention;
use crate::geometry::point::{AttributeSchema, Point};
use crate::geometry::sampling::SamplingStrategy;
use crate::index::node_store::NodeStore;
use crate::index::Indexer;
use crate::input::{self, InputFormat};
use crate::persistence::{DiskPersistence, MemoryPersistence, Persistence};
use crate::tileset::{TilesetAssembler, TilesetConfig, UpAxis};
use crossbeam_channel::bounded;
use log::{info, warn};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracy_client::create_plot;

const BATCH_SIZE: usize = 4096;
const QUEUE_CAPACITY: usize = 256;

/// Everything a run needs that isn't discovered along the way. Mirrors the CLI flag table in
/// spec §6; the binary is responsible for turning parsed args into this.
pub struct PipelineConfig {
    pub inputs: Vec<PathBuf>,
    pub output: PathBuf,
    pub max_depth: u32,
    pub max_points_per_node: usize,
    pub sampling: SamplingStrategy,
    pub schema: AttributeSchema,
    pub input_format: Option<InputFormat>,
    pub aabb: Option<Aabb>,
    pub worker_count: usize,
    pub max_depth_per_file: u32,
    pub root_error: f64,
    pub up_axis: UpAxis,
    pub naming: NamingConvention,
    pub extension: &'static str,
    pub persist_to_disk: bool,
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.inputs.is_empty() {
            return Err(ConfigError::NoInputs);
        }
        for path in &self.inputs {
            if !path.exists() {
                return Err(ConfigError::InputNotFound(path.clone()));
            }
        }
        if self.max_depth == 0 || self.max_depth > 21 {
            return Err(ConfigError::MaxDepthOutOfRange { actual: self.max_depth, max: 21 });
        }
        if self.max_points_per_node == 0 {
            return Err(ConfigError::ZeroMaxPointsPerNode);
        }
        Ok(())
    }
}

/// Running totals surfaced at the end of a run and written out as `perf.stats` (spec §4.H,
/// grounded on the reference implementation's plain-text perf dump).
#[derive(Default)]
pub struct Stats {
    pub points_processed: AtomicU64,
    pub points_out_of_bounds: AtomicU64,
    pub files_written: AtomicU64,
    pub prepare_seconds: std::sync::Mutex<f64>,
    pub indexing_seconds: std::sync::Mutex<f64>,
}

impl Stats {
    /// Renders the four-line plain text report the reference tiler calls `perf.stats`.
    pub fn render(&self) -> String {
        format!(
            "Prepare duration: {:.3}\nIndexing duration: {:.3}\nFiles written: {}\nPoints processed: {}\n",
            *self.prepare_seconds.lock().unwrap(),
            *self.indexing_seconds.lock().unwrap(),
            self.files_written.load(Ordering::Relaxed),
            self.points_processed.load(Ordering::Relaxed),
        )
    }
}

/// Runs one tiling job end to end: Prepare, Index, Drain, Finalize.
///
/// `cancel` is polled between batches and between nodes during indexing/drain; a caller (the
/// CLI's Ctrl-C handler, a test) can set it from another thread to abort early. On cancellation
/// the output directory is left with a `partial` marker file instead of a finished
/// `tileset.json` (spec §5).
pub struct TilerPipeline {
    config: PipelineConfig,
    cancel: Arc<AtomicBool>,
    stats: Stats,
}

impl TilerPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        TilerPipeline { config, cancel: Arc::new(AtomicBool::new(false)), stats: Stats::default() }
    }

    pub fn cancellation_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn run(&self) -> Result<Vec<PathBuf>, TilerError> {
        self.config.validate()?;
        std::fs::create_dir_all(&self.config.output).map_err(ConfigError::Io)?;

        let root_bounds = self.prepare()?;
        let store = NodeStore::new(
            root_bounds.clone(),
            self.config.max_points_per_node,
            self.config.max_depth,
            self.config.sampling.clone(),
            self.config.schema,
            self.config.worker_count,
        );
        let persistence = self.build_persistence()?;

        self.index(&store, &persistence, root_bounds)?;
        if self.cancel.load(Ordering::Relaxed) {
            self.write_partial_marker()?;
            return Err(TilerError::Cancelled(Cancelled));
        }

        self.drain(&store, &persistence);
        if self.cancel.load(Ordering::Relaxed) {
            self.write_partial_marker()?;
            return Err(TilerError::Cancelled(Cancelled));
        }

        let write_errors = persistence.join();
        for e in &write_errors {
            warn!("node write failed: {e}");
        }

        let written = self.finalize(&store).map_err(|_| TilerError::Io(1))?;
        self.dump_perf_stats()?;

        if !write_errors.is_empty() {
            return Err(TilerError::Io(write_errors.len()));
        }
        Ok(written)
    }

    /// Phase 1: establishes the root bounding box. Uses readers' declared bounds when every
    /// input file has one; falls back to a full streaming pass over every point otherwise. The
    /// box is cubified once, up front, so every descent after this point sees a stable Morton
    /// grid (spec §4.A: node bounds are fixed at tree construction, never recomputed).
    fn prepare(&self) -> Result<Aabb, TilerError> {
        let started = Instant::now();
        let bounds = match &self.config.aabb {
            Some(explicit) => explicit.clone(),
            None => self.scan_bounds().map_err(ConfigError::Io)?,
        };
        let cubified = bounds.cubify();
        *self.stats.prepare_seconds.lock().unwrap() = started.elapsed().as_secs_f64();
        info!("prepared root bounds {:?}..{:?}", cubified.min(), cubified.max());
        Ok(cubified)
    }

    fn scan_bounds(&self) -> std::io::Result<Aabb> {
        let mut accumulated = OptionAabb::empty();
        let mut needs_scan = false;
        for path in &self.config.inputs {
            let reader = input::open(path, self.config.input_format).map_err(to_io_error)?;
            match reader.declared_bounds() {
                Some(b) => {
                    accumulated.extend(&b.min());
                    accumulated.extend(&b.max());
                }
                None => needs_scan = true,
            }
        }
        if needs_scan {
            accumulated = OptionAabb::empty();
            for path in &self.config.inputs {
                let mut reader = input::open(path, self.config.input_format).map_err(to_io_error)?;
                while let Some(batch) = reader.read_batch(BATCH_SIZE).map_err(to_io_error)? {
                    for point in batch.iter() {
                        accumulated.extend(&point.position);
                    }
                }
            }
        }
        Ok(accumulated
            .into_aabb()
            .unwrap_or_else(|| Aabb::new(nalgebra::Point3::origin(), nalgebra::Point3::new(1.0, 1.0, 1.0))))
    }

    fn build_persistence(&self) -> Result<Persistence, TilerError> {
        if self.config.persist_to_disk {
            let disk = DiskPersistence::new(
                self.config.output.clone(),
                self.config.naming,
                self.config.extension,
                self.config.sampling.clone(),
                self.config.max_points_per_node,
                self.config.worker_count.max(1),
                QUEUE_CAPACITY,
            )
            .map_err(ConfigError::Io)?;
            Ok(Persistence::Disk(disk))
        } else {
            Ok(Persistence::Memory(MemoryPersistence::new(
                self.config.sampling.clone(),
                self.config.max_points_per_node,
            )))
        }
    }

    /// Phase 2: reader threads feed batches through a bounded channel to indexing workers, which
    /// descend the shared [NodeStore] and forward node overflows to `persistence`. The channel
    /// capacity matches spec §5's backpressure model - a fast reader can outrun slow indexers
    /// only so far before `send` blocks.
    fn index(&self, store: &NodeStore, persistence: &Persistence, root_bounds: Aabb) -> Result<(), TilerError> {
        let started = Instant::now();
        let worker_count = self.config.worker_count.max(1);
        let (tx, rx) = bounded::<Vec<Point>>(worker_count * 4);
        let indexer = Indexer::new(root_bounds, self.config.max_depth);

        std::thread::scope(|scope| {
            for _ in 0..worker_count {
                let rx = rx.clone();
                let indexer = &indexer;
                let cancel = &self.cancel;
                scope.spawn(move || {
                    while let Ok(points) = rx.recv() {
                        if cancel.load(Ordering::Relaxed) {
                            break;
                        }
                        let mut batch = crate::geometry::point_buffer::PointBuffer::with_capacity(self.config.schema, points.len());
                        for p in points {
                            batch.push(p);
                        }
                        indexer.push_batch(store, &batch, |flush| {
                            persistence.persist(flush.index, flush.bounds, flush.bucket);
                            let written = self.stats.files_written.fetch_add(1, Ordering::Relaxed) + 1;
                            static NODE_FILES_WRITTEN: tracy_client::Plot = create_plot!("Node files written");
                            NODE_FILES_WRITTEN.point(written as f64);
                        });
                    }
                });
            }

            'readers: for path in &self.config.inputs {
                if self.cancel.load(Ordering::Relaxed) {
                    break;
                }
                let mut reader = match input::open(path, self.config.input_format) {
                    Ok(r) => r,
                    Err(e) => {
                        warn!("skipping {path:?}: {e}");
                        continue;
                    }
                };
                loop {
                    if self.cancel.load(Ordering::Relaxed) {
                        break 'readers;
                    }
                    match reader.read_batch(BATCH_SIZE) {
                        Ok(Some(batch)) => {
                            let points: Vec<Point> = batch.iter().collect();
                            if tx.send(points).is_err() {
                                break 'readers;
                            }
                            static INDEXING_QUEUE_LENGTH: tracy_client::Plot = create_plot!("Indexing queue length");
                            INDEXING_QUEUE_LENGTH.point(tx.len() as f64);
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!("read error in {path:?}: {e}");
                            break;
                        }
                    }
                }
            }
            drop(tx);
        });

        self.stats
            .points_processed
            .store(indexer.stats().points_processed.load(Ordering::Relaxed), Ordering::Relaxed);
        self.stats
            .points_out_of_bounds
            .store(indexer.stats().points_out_of_bounds.load(Ordering::Relaxed), Ordering::Relaxed);
        *self.stats.indexing_seconds.lock().unwrap() = started.elapsed().as_secs_f64();
        Ok(())
    }

    /// Phase 3: every bucket still resident in the tree - leaves that never overflowed, inner
    /// nodes holding their final sampled representatives - gets written out. Nothing is left for
    /// the tileset to reference that the persistence layer hasn't seen.
    fn drain(&self, store: &NodeStore, persistence: &Persistence) {
        for index in store.non_empty_buckets() {
            if self.cancel.load(Ordering::Relaxed) {
                return;
            }
            let bounds = store.bounds_of(index);
            let bucket = store.take_bucket(index);
            persistence.persist(index, bounds, bucket);
            store.mark_flushed(index, true);
            self.stats.files_written.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Phase 4: walk the finished tree and write the tileset descriptor(s).
    fn finalize(&self, store: &NodeStore) -> std::io::Result<Vec<PathBuf>> {
        let assembler = TilesetAssembler::new(
            store,
            TilesetConfig {
                root_error: self.config.root_error,
                max_depth_per_file: self.config.max_depth_per_file,
                up_axis: self.config.up_axis,
                extension: self.config.extension,
                convention: self.config.naming,
            },
        );
        assembler.write(&self.config.output)
    }

    fn dump_perf_stats(&self) -> Result<(), TilerError> {
        let path = self.config.output.join("perf.stats");
        std::fs::write(&path, self.stats.render()).map_err(|_| TilerError::Io(1))?;
        Ok(())
    }

    fn write_partial_marker(&self) -> Result<(), TilerError> {
        let path = self.config.output.join("partial");
        std::fs::write(&path, b"").map_err(|_| TilerError::Io(1))?;
        Ok(())
    }
}

fn to_io_error(e: crate::error::InputError) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::octree_index::NamingConvention;
    use std::io::Write;

    fn write_xyz(dir: &std::path::Path, name: &str, points: &[(f64, f64, f64)]) -> PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        for (x, y, z) in points {
            writeln!(file, "{x} {y} {z}").unwrap();
        }
        path
    }

    fn base_config(inputs: Vec<PathBuf>, output: PathBuf) -> PipelineConfig {
        PipelineConfig {
            inputs,
            output,
            max_depth: 3,
            max_points_per_node: 4,
            sampling: SamplingStrategy::Grid { grid_size: 16 },
            schema: AttributeSchema::NONE,
            input_format: None,
            aabb: None,
            worker_count: 2,
            max_depth_per_file: 10,
            root_error: 50.0,
            up_axis: UpAxis::Y,
            naming: NamingConvention::Potree,
            extension: "bin",
            persist_to_disk: true,
        }
    }

    #[test]
    fn empty_input_directory_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = base_config(Vec::new(), dir.path().join("out"));
        let pipeline = TilerPipeline::new(config);
        let err = pipeline.run().unwrap_err();
        assert!(matches!(err, TilerError::Config(ConfigError::NoInputs)));
    }

    #[test]
    fn single_point_run_produces_a_tileset_and_perf_stats() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_xyz(dir.path(), "single.xyz", &[(0.5, 0.5, 0.5)]);
        let output = dir.path().join("out");
        let config = base_config(vec![input], output.clone());
        let pipeline = TilerPipeline::new(config);
        let written = pipeline.run().unwrap();
        assert!(!written.is_empty());
        assert!(output.join("tileset.json").exists());
        assert!(output.join("perf.stats").exists());
        let stats_contents = std::fs::read_to_string(output.join("perf.stats")).unwrap();
        assert!(stats_contents.contains("Points processed: 1"));
    }

    #[test]
    fn eight_corner_points_split_into_eight_node_files() {
        let dir = tempfile::tempdir().unwrap();
        let eps = 1e-3;
        let mut corners = Vec::new();
        for &x in &[eps, 1.0 - eps] {
            for &y in &[eps, 1.0 - eps] {
                for &z in &[eps, 1.0 - eps] {
                    corners.push((x, y, z));
                }
            }
        }
        let input = write_xyz(dir.path(), "corners.xyz", &corners);
        let output = dir.path().join("out");
        let mut config = base_config(vec![input], output.clone());
        config.max_points_per_node = 1;
        config.max_depth = 1;
        config.sampling = SamplingStrategy::Grid { grid_size: 1 };
        config.aabb = Some(Aabb::new(nalgebra::Point3::origin(), nalgebra::Point3::new(1.0, 1.0, 1.0)));
        let pipeline = TilerPipeline::new(config);
        pipeline.run().unwrap();
        assert_eq!(pipeline.stats().points_processed.load(Ordering::Relaxed), 8);
        assert!(output.join("tileset.json").exists());
    }

    #[test]
    fn empty_point_file_with_explicit_aabb_produces_a_single_root_tile_and_no_node_files() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_xyz(dir.path(), "empty.xyz", &[]);
        let output = dir.path().join("out");
        let mut config = base_config(vec![input], output.clone());
        config.aabb = Some(Aabb::new(nalgebra::Point3::origin(), nalgebra::Point3::new(1.0, 1.0, 1.0)));
        let pipeline = TilerPipeline::new(config);
        let written = pipeline.run().unwrap();
        assert!(written.is_empty());
        assert_eq!(pipeline.stats().points_processed.load(Ordering::Relaxed), 0);
        assert!(output.join("tileset.json").exists());
        let descriptor = std::fs::read_to_string(output.join("tileset.json")).unwrap();
        let json: serde_json::Value = serde_json::from_str(&descriptor).unwrap();
        assert!(json.get("root").is_some());
    }

    #[test]
    fn cancellation_before_drain_leaves_a_partial_marker_instead_of_a_tileset() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_xyz(dir.path(), "single.xyz", &[(0.5, 0.5, 0.5)]);
        let output = dir.path().join("out");
        let config = base_config(vec![input], output.clone());
        let pipeline = TilerPipeline::new(config);
        pipeline.cancellation_flag().store(true, Ordering::Relaxed);
        let err = pipeline.run().unwrap_err();
        assert!(matches!(err, TilerError::Cancelled(_)));
        assert!(output.join("partial").exists());
        assert!(!output.join("tileset.json").exists());
    }
}
