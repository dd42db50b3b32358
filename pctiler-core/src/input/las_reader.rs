use crate::error::InputError;
use crate::geometry::aabb::Aabb;
use crate::geometry::point::{AttributeSchema, Point};
use crate::geometry::point_buffer::PointBuffer;
use crate::input::PointReader;
use las::Read;
use nalgebra::{Point3, Vector3};
use std::path::Path;

/// Reads LAS/LAZ files through the `las` crate's high level `Reader`, the same entry point the
/// teacher's viewer example uses (`Reader::from_path` + `.points()`).
pub struct LasReader {
    reader: las::Reader<'static>,
    bounds: Aabb,
}

impl LasReader {
    pub fn open(path: &Path) -> Result<Self, InputError> {
        let reader = las::Reader::from_path(path)?;
        let b = reader.header().bounds();
        let min = Point3::new(b.min.x, b.min.y, b.min.z);
        let max = Point3::new(b.max.x, b.max.y, b.max.z);
        let bounds = if min.x <= max.x && min.y <= max.y && min.z <= max.z {
            Aabb::new(min, max)
        } else {
            Aabb::new(max, min)
        };
        Ok(LasReader { reader, bounds })
    }
}

impl PointReader for LasReader {
    fn read_batch(&mut self, max_points: usize) -> Result<Option<PointBuffer>, InputError> {
        let schema = AttributeSchema::RGB
            .union(AttributeSchema::INTENSITY)
            .union(AttributeSchema::CLASSIFICATION)
            .union(AttributeSchema::GPS_TIME);
        let mut buffer = PointBuffer::with_capacity(schema, max_points);
        for result in self.reader.points().take(max_points) {
            let p = result?;
            let rgb = p
                .color
                .map(|c| [(c.red >> 8) as u8, (c.green >> 8) as u8, (c.blue >> 8) as u8])
                .unwrap_or([0, 0, 0]);
            buffer.push(Point {
                position: Point3::new(p.x, p.y, p.z),
                rgb,
                intensity: p.intensity,
                classification: p.classification.into(),
                gps_time: p.gps_time.unwrap_or(0.0),
                normal: Vector3::new(0.0, 0.0, 0.0),
            });
        }
        if buffer.is_empty() {
            Ok(None)
        } else {
            Ok(Some(buffer))
        }
    }

    fn declared_bounds(&self) -> Option<Aabb> {
        Some(self.bounds.clone())
    }
}
