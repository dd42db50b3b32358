//! Point file readers. One [PointReader] implementation per supported format, selected by
//! extension (or by `--input-format` override) and driven by the pipeline's prepare/index
//! phases in fixed-size batches.

mod las_reader;
mod ply_reader;
mod xyz_reader;

pub use las_reader::LasReader;
pub use ply_reader::PlyReader;
pub use xyz_reader::XyzReader;

use crate::error::InputError;
use crate::geometry::aabb::Aabb;
use crate::geometry::point_buffer::PointBuffer;
use std::path::Path;

/// A streaming source of points. Implementations read from one file and hand back points in
/// bounded batches, so the pipeline never has to hold a whole input file in memory at once.
pub trait PointReader {
    /// Reads up to `max_points` points. Returns `Ok(None)` once the file is exhausted.
    fn read_batch(&mut self, max_points: usize) -> Result<Option<PointBuffer>, InputError>;

    /// The bounds declared in the file's own header, if it has one. Used by the prepare phase
    /// to compute the tiling root box without a full pre-pass over every point, when available.
    fn declared_bounds(&self) -> Option<Aabb> {
        None
    }
}

/// The input formats a file can be read as, either named by the user via `--input-format` or
/// inferred from its extension.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InputFormat {
    Las,
    Ply,
    Xyz,
}

impl InputFormat {
    pub fn from_extension(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "las" | "laz" => Some(InputFormat::Las),
            "ply" => Some(InputFormat::Ply),
            "xyz" | "txt" => Some(InputFormat::Xyz),
            _ => None,
        }
    }
}

/// Opens `path` with the reader for `format`, or the format inferred from its extension if
/// `format` is `None`.
pub fn open(path: &Path, format: Option<InputFormat>) -> Result<Box<dyn PointReader>, InputError> {
    let format = format
        .or_else(|| InputFormat::from_extension(path))
        .ok_or_else(|| InputError::UnsupportedExtension(path.to_path_buf()))?;
    Ok(match format {
        InputFormat::Las => Box::new(LasReader::open(path)?),
        InputFormat::Ply => Box::new(PlyReader::open(path)?),
        InputFormat::Xyz => Box::new(XyzReader::open(path)?),
    })
}
