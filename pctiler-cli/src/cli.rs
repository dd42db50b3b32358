use clap::Parser;
use pctiler_core::geometry::aabb::Aabb;
use pctiler_core::geometry::octree_index::NamingConvention;
use pctiler_core::geometry::sampling::SamplingStrategy;
use pctiler_core::input::InputFormat;
use pctiler_core::tileset::UpAxis;
use std::path::PathBuf;

/// Tiles point clouds into a hierarchical, spatially indexed tile set for streaming
/// visualization (3D Tiles / Potree / Entwine-style layouts).
#[derive(Debug, Parser)]
pub struct Args {
    /// Verbosity of the command line output.
    #[clap(long, default_value = "info")]
    pub log_level: log::Level,

    /// Input point files. Accepts las/laz, ply (ascii) and xyz/txt.
    #[clap(short, long = "input", required = true)]
    pub inputs: Vec<PathBuf>,

    /// Directory the tileset and node files are written to. Created if missing.
    #[clap(short, long)]
    pub output: PathBuf,

    /// Maximum octree depth below the root.
    #[clap(long, default_value_t = 12)]
    pub max_depth: u32,

    /// Maximum number of points a node's bucket holds before it overflows.
    #[clap(long, default_value_t = 10_000)]
    pub max_points_per_node: usize,

    /// Subsampling strategy used at inner nodes.
    #[clap(long, value_enum, default_value_t = SamplingKind::Grid)]
    pub sampling: SamplingKind,

    /// Grid cell count per axis, for `--sampling grid`.
    #[clap(long, default_value_t = 128)]
    pub grid_size: u32,

    /// Reservoir capacity, for `--sampling random`.
    #[clap(long, default_value_t = 10_000)]
    pub reservoir_capacity: usize,

    /// Naming convention and node file container written under `--output`.
    #[clap(long, value_enum, default_value_t = OutputFormat::Potree)]
    pub format: OutputFormat,

    /// Number of indexing worker threads. Defaults to the number of CPUs minus one.
    #[clap(long)]
    pub workers: Option<usize>,

    /// Explicit root bounds `minx,miny,minz,maxx,maxy,maxz`, skipping the bounds pre-pass.
    #[clap(long, value_parser = parse_aabb)]
    pub aabb: Option<Aabb>,

    /// Overrides input format auto-detection by extension.
    #[clap(long, value_enum)]
    pub input_format: Option<InputFormatArg>,

    /// Octree levels inlined per tileset descriptor before splitting into an external file.
    #[clap(long, default_value_t = 5)]
    pub max_depth_per_file: u32,

    /// Geometric error asserted at the root tile.
    #[clap(long, default_value_t = 50.0)]
    pub root_error: f64,

    /// Up axis asserted in the descriptor. Omitted from the output when `y` (the schema default).
    #[clap(long, value_enum, default_value_t = UpAxisArg::Y)]
    pub up_axis: UpAxisArg,
}

#[derive(Copy, Clone, Debug, clap::ValueEnum)]
pub enum SamplingKind {
    Grid,
    Random,
}

/// Selects both the node-index naming convention and the node file container, per the
/// `--format` entry of the CLI option table: `3dtiles` names nodes with the bare octant-digit
/// string and writes `.pnts`-extension buckets, `potree` and `entwine` name nodes per their
/// respective conventions and write the plain binary point container.
#[derive(Copy, Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    #[value(name = "3dtiles")]
    ThreeDTiles,
    Potree,
    Entwine,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::ThreeDTiles => "pnts",
            OutputFormat::Potree => "bin",
            OutputFormat::Entwine => "bin",
        }
    }

    pub fn naming_convention(self) -> NamingConvention {
        match self {
            OutputFormat::ThreeDTiles => NamingConvention::Simple,
            OutputFormat::Potree => NamingConvention::Potree,
            OutputFormat::Entwine => NamingConvention::Entwine,
        }
    }
}

#[derive(Copy, Clone, Debug, clap::ValueEnum)]
pub enum InputFormatArg {
    Las,
    Ply,
    Xyz,
}

impl From<InputFormatArg> for InputFormat {
    fn from(value: InputFormatArg) -> Self {
        match value {
            InputFormatArg::Las => InputFormat::Las,
            InputFormatArg::Ply => InputFormat::Ply,
            InputFormatArg::Xyz => InputFormat::Xyz,
        }
    }
}

#[derive(Copy, Clone, Debug, clap::ValueEnum)]
pub enum UpAxisArg {
    X,
    Y,
    Z,
}

impl From<UpAxisArg> for UpAxis {
    fn from(value: UpAxisArg) -> Self {
        match value {
            UpAxisArg::X => UpAxis::X,
            UpAxisArg::Y => UpAxis::Y,
            UpAxisArg::Z => UpAxis::Z,
        }
    }
}

impl Args {
    pub fn sampling_strategy(&self) -> SamplingStrategy {
        match self.sampling {
            SamplingKind::Grid => SamplingStrategy::Grid { grid_size: self.grid_size },
            SamplingKind::Random => SamplingStrategy::Random { capacity: self.reservoir_capacity },
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(|| num_cpus::get().saturating_sub(1).max(1))
    }
}

fn parse_aabb(s: &str) -> Result<Aabb, String> {
    let parts: Vec<&str> = s.split(',').collect();
    if parts.len() != 6 {
        return Err(format!("expected 6 comma-separated numbers, got {}", parts.len()));
    }
    let mut values = [0.0f64; 6];
    for (i, part) in parts.iter().enumerate() {
        values[i] = part.trim().parse().map_err(|_| format!("not a number: {part:?}"))?;
    }
    let min = nalgebra::Point3::new(values[0], values[1], values[2]);
    let max = nalgebra::Point3::new(values[3], values[4], values[5]);
    if min.x > max.x || min.y > max.y || min.z > max.z {
        return Err("aabb min must be <= max on every axis".to_string());
    }
    Ok(Aabb::new(min, max))
}
