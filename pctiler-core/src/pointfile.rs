use crate::error::IoError;
use crate::geometry::aabb::Aabb;
use crate::geometry::point::{AttributeSchema, Point};
use crate::geometry::point_buffer::PointBuffer;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use nalgebra::{Point3, Vector3};
use std::io::{self, Read, Write};
use std::path::Path;

const MAGIC: [u8; 4] = *b"PCTB";
const VERSION: u16 = 1;
/// magic(4) + version(2) + count(8) + schema(1) + bounds(2 * 3 * f64 = 48) bytes.
const HEADER_LEN: usize = 4 + 2 + 8 + 1 + 48;

/// Pads `w` with zero bytes up to the next 8-byte boundary, given how many bytes have been
/// written so far. Every attribute block starts 8-byte aligned so a reader (or a future mmap'd
/// reader) can access a column without an unaligned load.
fn pad_to_8<W: Write>(w: &mut W, written_so_far: usize) -> io::Result<usize> {
    let pad = (8 - (written_so_far % 8)) % 8;
    w.write_all(&[0u8; 8][..pad])?;
    Ok(written_so_far + pad)
}

/// Encodes `buffer` and its `bounds` in the columnar binary format (spec's point-file output):
/// a fixed header followed by one contiguous, 8-byte-aligned block per attribute column,
/// little-endian throughout. This is the format written under `--format 3dtiles`/`potree`/
/// `entwine` for the node content itself (the tileset descriptor is separate, see
/// [crate::tileset]).
pub fn write<W: Write>(w: &mut W, buffer: &PointBuffer, bounds: &Aabb) -> io::Result<()> {
    w.write_all(&MAGIC)?;
    w.write_u16::<LittleEndian>(VERSION)?;
    w.write_u64::<LittleEndian>(buffer.len() as u64)?;
    w.write_u8(buffer.schema().bits())?;
    for v in [bounds.min(), bounds.max()] {
        w.write_f64::<LittleEndian>(v.x)?;
        w.write_f64::<LittleEndian>(v.y)?;
        w.write_f64::<LittleEndian>(v.z)?;
    }
    let count = buffer.len();
    let mut offset = pad_to_8(w, HEADER_LEN)?;

    for p in buffer.positions() {
        w.write_f64::<LittleEndian>(p.x)?;
        w.write_f64::<LittleEndian>(p.y)?;
        w.write_f64::<LittleEndian>(p.z)?;
    }
    offset = pad_to_8(w, offset + count * 24)?;

    for rgb in buffer.rgb() {
        w.write_all(rgb)?;
    }
    offset = pad_to_8(w, offset + count * 3)?;

    for &i in buffer.intensity() {
        w.write_u16::<LittleEndian>(i)?;
    }
    offset = pad_to_8(w, offset + count * 2)?;

    for &c in buffer.classification() {
        w.write_u8(c)?;
    }
    offset = pad_to_8(w, offset + count)?;

    for &t in buffer.gps_time() {
        w.write_f64::<LittleEndian>(t)?;
    }
    offset = pad_to_8(w, offset + count * 8)?;

    for n in buffer.normal() {
        w.write_f32::<LittleEndian>(n.x)?;
        w.write_f32::<LittleEndian>(n.y)?;
        w.write_f32::<LittleEndian>(n.z)?;
    }
    let _ = offset;
    Ok(())
}

/// Decodes a buffer written by [write]. Returns [IoError::Corrupt] on a bad magic or version,
/// rather than treating it as a plain I/O error - the file is readable, its content is wrong.
pub fn read<R: Read>(r: &mut R, path: &Path) -> Result<(PointBuffer, Aabb), IoError> {
    let map_io = |source: io::Error| IoError::Read { path: path.to_path_buf(), source };

    let mut magic = [0u8; 4];
    r.read_exact(&mut magic).map_err(map_io)?;
    if magic != MAGIC {
        return Err(IoError::Corrupt {
            path: path.to_path_buf(),
            reason: "bad magic bytes".to_string(),
        });
    }
    let version = r.read_u16::<LittleEndian>().map_err(map_io)?;
    if version != VERSION {
        return Err(IoError::Corrupt {
            path: path.to_path_buf(),
            reason: format!("unsupported point-file version {version}"),
        });
    }
    let count = r.read_u64::<LittleEndian>().map_err(map_io)? as usize;
    let schema = AttributeSchema::from_bits(r.read_u8().map_err(map_io)?);

    let mut read_point3 = |r: &mut R| -> io::Result<Point3<f64>> {
        Ok(Point3::new(
            r.read_f64::<LittleEndian>()?,
            r.read_f64::<LittleEndian>()?,
            r.read_f64::<LittleEndian>()?,
        ))
    };
    let min = read_point3(r).map_err(map_io)?;
    let max = read_point3(r).map_err(map_io)?;
    let bounds = Aabb::new(min, max);

    let skip_padding = |r: &mut R, written_so_far: usize| -> io::Result<usize> {
        let pad = (8 - (written_so_far % 8)) % 8;
        let mut discard = [0u8; 8];
        r.read_exact(&mut discard[..pad])?;
        Ok(written_so_far + pad)
    };
    let mut offset = skip_padding(r, HEADER_LEN).map_err(map_io)?;

    let mut positions = Vec::with_capacity(count);
    for _ in 0..count {
        positions.push(read_point3(r).map_err(map_io)?);
    }
    offset = skip_padding(r, offset + count * 24).map_err(map_io)?;

    let mut rgb = Vec::with_capacity(count);
    for _ in 0..count {
        let mut triple = [0u8; 3];
        r.read_exact(&mut triple).map_err(map_io)?;
        rgb.push(triple);
    }
    offset = skip_padding(r, offset + count * 3).map_err(map_io)?;

    let mut intensity = Vec::with_capacity(count);
    for _ in 0..count {
        intensity.push(r.read_u16::<LittleEndian>().map_err(map_io)?);
    }
    offset = skip_padding(r, offset + count * 2).map_err(map_io)?;

    let mut classification = Vec::with_capacity(count);
    for _ in 0..count {
        classification.push(r.read_u8().map_err(map_io)?);
    }
    offset = skip_padding(r, offset + count).map_err(map_io)?;

    let mut gps_time = Vec::with_capacity(count);
    for _ in 0..count {
        gps_time.push(r.read_f64::<LittleEndian>().map_err(map_io)?);
    }
    offset = skip_padding(r, offset + count * 8).map_err(map_io)?;

    let mut normal = Vec::with_capacity(count);
    for _ in 0..count {
        normal.push(Vector3::new(
            r.read_f32::<LittleEndian>().map_err(map_io)?,
            r.read_f32::<LittleEndian>().map_err(map_io)?,
            r.read_f32::<LittleEndian>().map_err(map_io)?,
        ));
    }
    let _ = offset;

    let mut buffer = PointBuffer::with_capacity(schema, count);
    for i in 0..count {
        buffer.push(Point {
            position: positions[i],
            rgb: rgb[i],
            intensity: intensity[i],
            classification: classification[i],
            gps_time: gps_time[i],
            normal: normal[i],
        });
    }
    Ok((buffer, bounds))
}
