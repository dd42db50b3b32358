use std::path::PathBuf;
use thiserror::Error;

/// A node-index string did not parse under the requested naming convention.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("unexpected character {0:?} in node index string, expected an octant digit '0'..'7'")]
    BadOctantDigit(char),
    #[error("node index string has depth {depth}, which exceeds the maximum of {max_levels}")]
    DepthExceedsMaxLevels { depth: u32, max_levels: u32 },
    #[error("potree node index string must start with 'r'")]
    MissingPotreePrefix,
    #[error("malformed entwine node index, expected \"D-X-Y-Z\" but got {0:?}")]
    MalformedEntwineTuple(String),
}

/// Errors reported while reading an input point file. Per-record occurrences (a single bad
/// point) are counted and the record is dropped rather than surfaced here; this type is for
/// failures that make an entire file unreadable.
#[derive(Error, Debug)]
pub enum InputError {
    #[error("unsupported input file extension: {0:?}")]
    UnsupportedExtension(PathBuf),
    #[error("malformed point record: {0}")]
    MalformedRecord(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Las(#[from] las::Error),
}

/// Failures while persisting or retrieving a node's point bucket.
#[derive(Error, Debug)]
pub enum IoError {
    #[error("failed to write node file {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read node file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to rename {from:?} into place at {to:?}: {source}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt point file {path:?}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

/// A configuration error: invalid flags, an unreadable input path, or an unsatisfiable
/// combination of options. Fatal before the pipeline starts.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("--max-depth must be in [1, {max}], got {actual}")]
    MaxDepthOutOfRange { actual: u32, max: u32 },
    #[error("--max-points-per-node must be greater than zero")]
    ZeroMaxPointsPerNode,
    #[error("no input files given")]
    NoInputs,
    #[error("input path does not exist: {0:?}")]
    InputNotFound(PathBuf),
    #[error("malformed --aabb value: {0}")]
    MalformedAabb(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The pipeline's shared cancellation signal was set and the run was aborted early.
#[derive(Error, Debug, Clone, Copy, Default)]
#[error("the run was cancelled")]
pub struct Cancelled;

/// Top-level error type the CLI binary matches on to pick an exit code (see `README`/spec
/// §6 exit code table).
#[derive(Error, Debug)]
pub enum TilerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{0} I/O failure(s) during the run, see log for details")]
    Io(usize),
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl TilerError {
    /// Maps this error to the process exit code defined in spec §6.
    pub fn exit_code(&self) -> i32 {
        match self {
            TilerError::Config(_) => 1,
            TilerError::Io(_) => 2,
            TilerError::Cancelled(_) => 3,
        }
    }
}
