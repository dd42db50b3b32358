use crate::error::IoError;
use crate::geometry::aabb::Aabb;
use crate::geometry::octree_index::{NamingConvention, OctreeNodeIndex};
use crate::geometry::point_buffer::PointBuffer;
use crate::geometry::sampling::SamplingStrategy;
use crate::pointfile;
use std::collections::VecDeque;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

struct Job {
    index: OctreeNodeIndex,
    bounds: Aabb,
    bucket: PointBuffer,
}

struct Inbox {
    jobs: VecDeque<Job>,
    draining: bool,
}

/// Writes node buckets to files under a configured output root, through a bounded work queue
/// served by a worker pool - the same `Mutex<queue> + Condvar` shape the indexing worker pool
/// uses (see [crate::index]), generalized here to file I/O instead of tree mutation.
pub struct DiskPersistence {
    inbox: Arc<Mutex<Inbox>>,
    not_empty: Arc<Condvar>,
    not_full: Arc<Condvar>,
    capacity: usize,
    threads: Vec<JoinHandle<()>>,
    failures: Arc<AtomicUsize>,
    errors: Arc<Mutex<Vec<IoError>>>,
    output_root: PathBuf,
    convention: NamingConvention,
    extension: &'static str,
}

struct Worker {
    inbox: Arc<Mutex<Inbox>>,
    not_empty: Arc<Condvar>,
    not_full: Arc<Condvar>,
    output_root: PathBuf,
    convention: NamingConvention,
    extension: &'static str,
    strategy: SamplingStrategy,
    max_points_per_node: usize,
    failures: Arc<AtomicUsize>,
    errors: Arc<Mutex<Vec<IoError>>>,
}

impl DiskPersistence {
    pub fn new(
        output_root: impl Into<PathBuf>,
        convention: NamingConvention,
        extension: &'static str,
        strategy: SamplingStrategy,
        max_points_per_node: usize,
        worker_count: usize,
        queue_capacity: usize,
    ) -> std::io::Result<Self> {
        let output_root = output_root.into();
        std::fs::create_dir_all(&output_root)?;

        let inbox = Arc::new(Mutex::new(Inbox {
            jobs: VecDeque::new(),
            draining: false,
        }));
        let not_empty = Arc::new(Condvar::new());
        let not_full = Arc::new(Condvar::new());
        let failures = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(Mutex::new(Vec::new()));

        let threads = (0..worker_count.max(1))
            .map(|_| {
                let worker = Worker {
                    inbox: Arc::clone(&inbox),
                    not_empty: Arc::clone(&not_empty),
                    not_full: Arc::clone(&not_full),
                    output_root: output_root.clone(),
                    convention,
                    extension,
                    strategy,
                    max_points_per_node,
                    failures: Arc::clone(&failures),
                    errors: Arc::clone(&errors),
                };
                thread::spawn(move || worker.run())
            })
            .collect();

        Ok(DiskPersistence {
            inbox,
            not_empty,
            not_full,
            capacity: queue_capacity.max(1),
            threads,
            failures,
            errors,
            output_root,
            convention,
            extension,
        })
    }

    /// Blocks while the work queue is at capacity (backpressure, spec §5).
    pub fn persist(&self, index: OctreeNodeIndex, bounds: Aabb, bucket: PointBuffer) {
        let mut guard = self.inbox.lock().unwrap();
        while guard.jobs.len() >= self.capacity {
            guard = self.not_full.wait(guard).unwrap();
        }
        guard.jobs.push_back(Job { index, bounds, bucket });
        self.not_empty.notify_one();
    }

    pub fn retrieve(&self, index: OctreeNodeIndex) -> Option<(PointBuffer, Aabb)> {
        let path = node_path(&self.output_root, index, self.convention, self.extension);
        read_existing(&path)
    }

    pub fn failure_count(&self) -> usize {
        self.failures.load(Ordering::Relaxed)
    }

    /// Signals the worker pool to drain (finish queued jobs, then exit) and joins every thread.
    /// Returns every write failure encountered, for the caller to fold into the pipeline's exit
    /// code.
    pub fn join(mut self) -> Vec<IoError> {
        {
            let mut guard = self.inbox.lock().unwrap();
            guard.draining = true;
            self.not_empty.notify_all();
        }
        for thread in self.threads.drain(..) {
            thread.join().expect("persistence worker thread panicked");
        }
        Arc::try_unwrap(self.errors)
            .map(|m| m.into_inner().unwrap())
            .unwrap_or_default()
    }
}

impl Worker {
    fn run(self) {
        loop {
            let job = {
                let mut guard = self.inbox.lock().unwrap();
                loop {
                    if let Some(job) = guard.jobs.pop_front() {
                        self.not_full.notify_one();
                        break Some(job);
                    }
                    if guard.draining {
                        break None;
                    }
                    guard = self.not_empty.wait(guard).unwrap();
                }
            };
            let Some(job) = job else { break };
            if let Err(e) = self.write_job(job) {
                self.failures.fetch_add(1, Ordering::Relaxed);
                self.errors.lock().unwrap().push(e);
            }
        }
    }

    fn path_for(&self, index: OctreeNodeIndex) -> PathBuf {
        node_path(&self.output_root, index, self.convention, self.extension)
    }

    fn write_job(&self, job: Job) -> Result<(), IoError> {
        let path = self.path_for(job.index);
        let merged = match read_existing(&path) {
            Some((mut existing, _)) => {
                existing.extend(&job.bucket);
                existing
            }
            None => job.bucket,
        };
        let final_buffer = crate::persistence::resample_if_over_capacity(
            &self.strategy,
            &job.bounds,
            self.max_points_per_node,
            merged,
        );
        write_atomically(&path, &final_buffer, &job.bounds)
    }
}

fn node_path(root: &Path, index: OctreeNodeIndex, convention: NamingConvention, extension: &str) -> PathBuf {
    let name = index.to_string(convention);
    let name = if name.is_empty() { "r".to_string() } else { name };
    root.join(format!("{name}.{extension}"))
}

fn read_existing(path: &Path) -> Option<(PointBuffer, Aabb)> {
    let mut file = File::open(path).ok()?;
    pointfile::read(&mut file, path).ok()
}

fn write_atomically(path: &Path, buffer: &PointBuffer, bounds: &Aabb) -> Result<(), IoError> {
    let tmp_path = path.with_extension(format!(
        "{}.tmp",
        path.extension().and_then(|e| e.to_str()).unwrap_or("bin")
    ));
    {
        let mut file = File::create(&tmp_path).map_err(|source| IoError::Write {
            path: tmp_path.clone(),
            source,
        })?;
        pointfile::write(&mut file, buffer, bounds).map_err(|source| IoError::Write {
            path: tmp_path.clone(),
            source,
        })?;
        file.sync_all().map_err(|source| IoError::Write {
            path: tmp_path.clone(),
            source,
        })?;
    }
    std::fs::rename(&tmp_path, path).map_err(|source| IoError::Rename {
        from: tmp_path,
        to: path.to_path_buf(),
        source,
    })
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
    fn write_then_read_round_trips_through_the_worker_pool() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = DiskPersistence::new(
            dir.path(),
            NamingConvention::Simple,
            "bin",
            SamplingStrategy::Grid { grid_size: 128 },
            1000,
            2,
            8,
        )
        .unwrap();

        let mut buffer = PointBuffer::new(AttributeSchema::NONE);
        buffer.push(Point::at(Point3::new(0.5, 0.5, 0.5)));
        persistence.persist(OctreeNodeIndex::root(), unit_cube(), buffer);

        let errors = persistence.join();
        assert!(errors.is_empty());

        let path = dir.path().join("r.bin");
        assert!(path.exists());
    }

    #[test]
    fn duplicate_flush_merges_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = DiskPersistence::new(
            dir.path(),
            NamingConvention::Simple,
            "bin",
            SamplingStrategy::Grid { grid_size: 128 },
            1000,
            1,
            8,
        )
        .unwrap();
        let root = OctreeNodeIndex::root();

        let mut first = PointBuffer::new(AttributeSchema::NONE);
        first.push(Point::at(Point3::new(0.1, 0.1, 0.1)));
        persistence.persist(root, unit_cube(), first);

        let mut second = PointBuffer::new(AttributeSchema::NONE);
        second.push(Point::at(Point3::new(0.2, 0.2, 0.2)));
        persistence.persist(root, unit_cube(), second);

        // a single worker thread processes jobs in arrival order, so the second job's merge
        // is guaranteed to see the first job's file already written.
        let errors = persistence.join();
        assert!(errors.is_empty());

        let (buffer, _) = read_existing(&dir.path().join("r.bin")).unwrap();
        assert_eq!(buffer.len(), 2);
    }
}
