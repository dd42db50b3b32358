use crate::error::InputError;
use crate::geometry::point::{AttributeSchema, Point};
use crate::geometry::point_buffer::PointBuffer;
use crate::input::PointReader;
use byteorder::{LittleEndian, ReadBytesExt};
use nalgebra::Point3;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;

/// Which vertex property holds which field, by position among the `vertex` element's declared
/// properties. `-1` means the property is absent from this file.
#[derive(Default, Clone, Copy, Debug)]
struct VertexLayout {
    x: i32,
    y: i32,
    z: i32,
    red: i32,
    green: i32,
    blue: i32,
    intensity: i32,
}

/// A PLY scalar property type, named any of the forms the format spec allows (`uchar`/`uint8`
/// are the same type under different aliases).
#[derive(Clone, Copy, Debug)]
enum ScalarType {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Float32,
    Float64,
}

impl ScalarType {
    fn from_name(name: &str) -> Result<Self, InputError> {
        Ok(match name {
            "char" | "int8" => ScalarType::Int8,
            "uchar" | "uint8" => ScalarType::UInt8,
            "short" | "int16" => ScalarType::Int16,
            "ushort" | "uint16" => ScalarType::UInt16,
            "int" | "int32" => ScalarType::Int32,
            "uint" | "uint32" => ScalarType::UInt32,
            "float" | "float32" => ScalarType::Float32,
            "double" | "float64" => ScalarType::Float64,
            other => {
                return Err(InputError::MalformedRecord(format!(
                    "unsupported ply property type {other:?}"
                )))
            }
        })
    }

    fn read_as_f64<R: Read>(self, r: &mut R) -> io::Result<f64> {
        Ok(match self {
            ScalarType::Int8 => r.read_i8()? as f64,
            ScalarType::UInt8 => r.read_u8()? as f64,
            ScalarType::Int16 => r.read_i16::<LittleEndian>()? as f64,
            ScalarType::UInt16 => r.read_u16::<LittleEndian>()? as f64,
            ScalarType::Int32 => r.read_i32::<LittleEndian>()? as f64,
            ScalarType::UInt32 => r.read_u32::<LittleEndian>()? as f64,
            ScalarType::Float32 => r.read_f32::<LittleEndian>()? as f64,
            ScalarType::Float64 => r.read_f64::<LittleEndian>()?,
        })
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Encoding {
    Ascii,
    BinaryLittleEndian,
}

/// Reads the `vertex` element of a PLY file, ASCII or binary little-endian. List properties
/// (e.g. `face` elements) aren't needed for a point cloud and aren't parsed; only scalar vertex
/// properties are recognized.
#[derive(Debug)]
pub struct PlyReader {
    reader: BufReader<File>,
    encoding: Encoding,
    layout: VertexLayout,
    /// Every vertex property's type, in declared order, needed to step through a binary record
    /// even for properties this reader doesn't care about.
    property_types: Vec<ScalarType>,
    vertex_count: usize,
    vertices_read: usize,
}

impl PlyReader {
    pub fn open(path: &Path) -> Result<Self, InputError> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);

        let magic = read_line(&mut reader)?
            .ok_or_else(|| InputError::MalformedRecord("empty ply file".to_string()))?;
        if magic.trim() != "ply" {
            return Err(InputError::MalformedRecord(format!(
                "expected \"ply\" magic line, got {magic:?}"
            )));
        }

        let mut encoding = Encoding::Ascii;
        let mut layout = VertexLayout { x: -1, y: -1, z: -1, red: -1, green: -1, blue: -1, intensity: -1 };
        let mut property_types = Vec::new();
        let mut vertex_count = 0usize;
        let mut in_vertex_element = false;
        let mut property_index = 0i32;

        loop {
            let line = read_line(&mut reader)?
                .ok_or_else(|| InputError::MalformedRecord("unexpected end of ply header".to_string()))?;
            let line = line.trim();
            let fields: Vec<&str> = line.split_whitespace().collect();
            match fields.as_slice() {
                ["format", "ascii", ..] => encoding = Encoding::Ascii,
                ["format", "binary_little_endian", ..] => encoding = Encoding::BinaryLittleEndian,
                ["format", other, ..] => {
                    return Err(InputError::MalformedRecord(format!(
                        "unsupported ply format {other:?}, only ascii and binary_little_endian are supported"
                    )));
                }
                ["comment", ..] => {}
                ["element", "vertex", count] => {
                    vertex_count = count
                        .parse()
                        .map_err(|_| InputError::MalformedRecord(format!("bad vertex count {count:?}")))?;
                    in_vertex_element = true;
                    property_index = 0;
                }
                ["element", ..] => {
                    in_vertex_element = false;
                }
                ["property", "list", ..] if in_vertex_element => {
                    return Err(InputError::MalformedRecord(
                        "list properties on the vertex element are not supported".to_string(),
                    ));
                }
                ["property", type_name, name] if in_vertex_element => {
                    property_types.push(ScalarType::from_name(type_name)?);
                    match *name {
                        "x" => layout.x = property_index,
                        "y" => layout.y = property_index,
                        "z" => layout.z = property_index,
                        "red" | "r" => layout.red = property_index,
                        "green" | "g" => layout.green = property_index,
                        "blue" | "b" => layout.blue = property_index,
                        "intensity" => layout.intensity = property_index,
                        _ => {}
                    }
                    property_index += 1;
                }
                ["end_header"] => break,
                _ => {}
            }
        }

        if layout.x < 0 || layout.y < 0 || layout.z < 0 {
            return Err(InputError::MalformedRecord(
                "ply vertex element is missing x/y/z properties".to_string(),
            ));
        }

        Ok(PlyReader {
            reader,
            encoding,
            layout,
            property_types,
            vertex_count,
            vertices_read: 0,
        })
    }

    fn read_ascii_vertex(&mut self) -> Result<Option<Point>, InputError> {
        let Some(line) = read_line(&mut self.reader)? else { return Ok(None) };
        let fields: Vec<&str> = line.trim().split_whitespace().collect();
        let get_f64 = |idx: i32| -> Result<f64, InputError> {
            fields
                .get(idx as usize)
                .ok_or_else(|| InputError::MalformedRecord(format!("short vertex line: {line:?}")))?
                .parse::<f64>()
                .map_err(|_| InputError::MalformedRecord(format!("bad number in: {line:?}")))
        };
        Ok(Some(self.assemble_point(get_f64)?))
    }

    fn read_binary_vertex(&mut self) -> Result<Option<Point>, InputError> {
        let mut values = Vec::with_capacity(self.property_types.len());
        for scalar in &self.property_types {
            values.push(scalar.read_as_f64(&mut self.reader)?);
        }
        let get_f64 = |idx: i32| -> Result<f64, InputError> {
            values
                .get(idx as usize)
                .copied()
                .ok_or_else(|| InputError::MalformedRecord("vertex record shorter than declared properties".to_string()))
        };
        Ok(Some(self.assemble_point(get_f64)?))
    }

    fn assemble_point(&self, get_f64: impl Fn(i32) -> Result<f64, InputError>) -> Result<Point, InputError> {
        let x = get_f64(self.layout.x)?;
        let y = get_f64(self.layout.y)?;
        let z = get_f64(self.layout.z)?;
        let mut point = Point::at(Point3::new(x, y, z));
        if self.layout.red >= 0 && self.layout.green >= 0 && self.layout.blue >= 0 {
            point.rgb = [
                get_f64(self.layout.red)? as u8,
                get_f64(self.layout.green)? as u8,
                get_f64(self.layout.blue)? as u8,
            ];
        }
        if self.layout.intensity >= 0 {
            point.intensity = get_f64(self.layout.intensity)? as u16;
        }
        Ok(point)
    }
}

impl PointReader for PlyReader {
    fn read_batch(&mut self, max_points: usize) -> Result<Option<PointBuffer>, InputError> {
        let schema = AttributeSchema::RGB.union(AttributeSchema::INTENSITY);
        let mut buffer = PointBuffer::with_capacity(schema, max_points);
        while buffer.len() < max_points && self.vertices_read < self.vertex_count {
            let point = match self.encoding {
                Encoding::Ascii => self.read_ascii_vertex()?,
                Encoding::BinaryLittleEndian => self.read_binary_vertex()?,
            };
            let Some(point) = point else { break };
            buffer.push(point);
            self.vertices_read += 1;
        }
        if buffer.is_empty() {
            Ok(None)
        } else {
            Ok(Some(buffer))
        }
    }
}

/// Reads one line (sans trailing newline) from a buffered reader shared between header parsing
/// and ASCII vertex data, so binary mode can keep using the same reader for raw bytes right
/// after `end_header` without losing anything to a competing buffer.
fn read_line(reader: &mut BufReader<File>) -> Result<Option<String>, InputError> {
    let mut line = String::new();
    let bytes = reader.read_line(&mut line)?;
    if bytes == 0 {
        return Ok(None);
    }
    if line.ends_with('\n') {
        line.pop();
        if line.ends_with('\r') {
            line.pop();
        }
    }
    Ok(Some(line))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_ply(dir: &Path, contents: &str) -> std::path::PathBuf {
        let path = dir.join("test.ply");
        let mut file = File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    fn write_ply_bytes(dir: &Path, header: &str, body: &[u8]) -> std::path::PathBuf {
        let path = dir.join("test.ply");
        let mut file = File::create(&path).unwrap();
        file.write_all(header.as_bytes()).unwrap();
        file.write_all(body).unwrap();
        path
    }

    #[test]
    fn reads_xyz_only_vertices() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_ply(
            dir.path(),
            "ply\nformat ascii 1.0\nelement vertex 2\nproperty float x\nproperty float y\nproperty float z\nend_header\n0 0 0\n1 1 1\n",
        );
        let mut reader = PlyReader::open(&path).unwrap();
        let batch = reader.read_batch(10).unwrap().unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.positions()[1], Point3::new(1.0, 1.0, 1.0));
        assert!(reader.read_batch(10).unwrap().is_none());
    }

    #[test]
    fn reads_vertices_with_color_and_intensity() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_ply(
            dir.path(),
            "ply\nformat ascii 1.0\nelement vertex 1\nproperty float x\nproperty float y\nproperty float z\nproperty uchar red\nproperty uchar green\nproperty uchar blue\nproperty ushort intensity\nend_header\n1 2 3 10 20 30 500\n",
        );
        let mut reader = PlyReader::open(&path).unwrap();
        let batch = reader.read_batch(10).unwrap().unwrap();
        assert_eq!(batch.rgb()[0], [10, 20, 30]);
        assert_eq!(batch.intensity()[0], 500);
    }

    #[test]
    fn reads_binary_little_endian_vertices() {
        let dir = tempfile::tempdir().unwrap();
        let header = "ply\nformat binary_little_endian 1.0\nelement vertex 2\nproperty float x\nproperty float y\nproperty float z\nproperty uchar red\nproperty uchar green\nproperty uchar blue\nend_header\n";
        let mut body = Vec::new();
        for (x, y, z, rgb) in [(0.0f32, 0.0f32, 0.0f32, [1u8, 2, 3]), (1.0f32, 2.0f32, 3.0f32, [4u8, 5, 6])] {
            body.extend_from_slice(&x.to_le_bytes());
            body.extend_from_slice(&y.to_le_bytes());
            body.extend_from_slice(&z.to_le_bytes());
            body.extend_from_slice(&rgb);
        }
        let path = write_ply_bytes(dir.path(), header, &body);

        let mut reader = PlyReader::open(&path).unwrap();
        let batch = reader.read_batch(10).unwrap().unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.positions()[1], Point3::new(1.0, 2.0, 3.0));
        assert_eq!(batch.rgb()[1], [4, 5, 6]);
        assert!(reader.read_batch(10).unwrap().is_none());
    }

    #[test]
    fn rejects_unsupported_binary_encoding() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_ply(dir.path(), "ply\nformat binary_big_endian 1.0\nelement vertex 0\nend_header\n");
        let err = PlyReader::open(&path).unwrap_err();
        assert!(matches!(err, InputError::MalformedRecord(_)));
    }
}
