use crate::error::InputError;
use crate::geometry::point::{AttributeSchema, Point};
use crate::geometry::point_buffer::PointBuffer;
use crate::input::PointReader;
use nalgebra::Point3;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Reads whitespace-delimited ASCII point records, one per line: `x y z [r g b] [intensity]`.
/// The simplest of the three formats and the one with no header to speak of - every line is
/// parsed independently, and a malformed one is reported rather than silently skipped.
pub struct XyzReader {
    lines: std::io::Lines<BufReader<File>>,
}

impl XyzReader {
    pub fn open(path: &Path) -> Result<Self, InputError> {
        let file = File::open(path)?;
        Ok(XyzReader {
            lines: BufReader::new(file).lines(),
        })
    }
}

impl PointReader for XyzReader {
    fn read_batch(&mut self, max_points: usize) -> Result<Option<PointBuffer>, InputError> {
        let mut buffer = PointBuffer::with_capacity(AttributeSchema::RGB.union(AttributeSchema::INTENSITY), max_points);
        for _ in 0..max_points {
            let Some(line) = self.lines.next() else { break };
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            buffer.push(parse_record(line)?);
        }
        if buffer.is_empty() {
            Ok(None)
        } else {
            Ok(Some(buffer))
        }
    }
}

fn parse_record(line: &str) -> Result<Point, InputError> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 3 {
        return Err(InputError::MalformedRecord(format!(
            "expected at least 3 fields (x y z), got {}: {line:?}",
            fields.len()
        )));
    }
    let parse = |s: &str| -> Result<f64, InputError> {
        s.parse::<f64>()
            .map_err(|_| InputError::MalformedRecord(format!("not a number: {s:?}")))
    };
    let x = parse(fields[0])?;
    let y = parse(fields[1])?;
    let z = parse(fields[2])?;

    let mut point = Point::at(Point3::new(x, y, z));

    if fields.len() >= 6 {
        let r = parse(fields[3])? as u8;
        let g = parse(fields[4])? as u8;
        let b = parse(fields[5])? as u8;
        point.rgb = [r, g, b];
    }
    if fields.len() >= 7 {
        point.intensity = parse(fields[6])? as u16;
    }
    Ok(point)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_xyz() {
        let p = parse_record("1.0 2.0 3.0").unwrap();
        assert_eq!(p.position, Point3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn parses_xyz_with_color_and_intensity() {
        let p = parse_record("1.0 2.0 3.0 10 20 30 500").unwrap();
        assert_eq!(p.rgb, [10, 20, 30]);
        assert_eq!(p.intensity, 500);
    }

    #[test]
    fn rejects_too_few_fields() {
        let err = parse_record("1.0 2.0").unwrap_err();
        assert!(matches!(err, InputError::MalformedRecord(_)));
    }
}
