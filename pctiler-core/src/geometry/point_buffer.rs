use crate::geometry::point::{AttributeSchema, Point};
use nalgebra::{Point3, Vector3};

/// A structure-of-arrays batch of points: positions and each attribute are stored in their own
/// contiguous column. All columns always have the same length as `len()`; columns whose
/// attribute bit is unset in `schema` are still present but hold zero values, so downstream
/// code (the node-file writer, the subsamplers) never has to branch on which columns exist.
#[derive(Clone, Debug, Default)]
pub struct PointBuffer {
    schema: AttributeSchema,
    positions: Vec<Point3<f64>>,
    rgb: Vec<[u8; 3]>,
    intensity: Vec<u16>,
    classification: Vec<u8>,
    gps_time: Vec<f64>,
    normal: Vec<Vector3<f32>>,
}

impl PointBuffer {
    pub fn new(schema: AttributeSchema) -> Self {
        PointBuffer {
            schema,
            ..Default::default()
        }
    }

    pub fn with_capacity(schema: AttributeSchema, capacity: usize) -> Self {
        PointBuffer {
            schema,
            positions: Vec::with_capacity(capacity),
            rgb: Vec::with_capacity(capacity),
            intensity: Vec::with_capacity(capacity),
            classification: Vec::with_capacity(capacity),
            gps_time: Vec::with_capacity(capacity),
            normal: Vec::with_capacity(capacity),
        }
    }

    pub fn schema(&self) -> AttributeSchema {
        self.schema
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn push(&mut self, point: Point) {
        self.positions.push(point.position);
        self.rgb.push(point.rgb);
        self.intensity.push(point.intensity);
        self.classification.push(point.classification);
        self.gps_time.push(point.gps_time);
        self.normal.push(point.normal);
    }

    pub fn get(&self, i: usize) -> Point {
        Point {
            position: self.positions[i],
            rgb: self.rgb[i],
            intensity: self.intensity[i],
            classification: self.classification[i],
            gps_time: self.gps_time[i],
            normal: self.normal[i],
        }
    }

    /// Overwrites the point at index `i` in place. Used by the reservoir sampler to replace an
    /// evicted representative without disturbing the positions of every other point.
    pub fn set(&mut self, i: usize, point: Point) {
        self.positions[i] = point.position;
        self.rgb[i] = point.rgb;
        self.intensity[i] = point.intensity;
        self.classification[i] = point.classification;
        self.gps_time[i] = point.gps_time;
        self.normal[i] = point.normal;
    }

    pub fn positions(&self) -> &[Point3<f64>] {
        &self.positions
    }

    pub fn rgb(&self) -> &[[u8; 3]] {
        &self.rgb
    }

    pub fn intensity(&self) -> &[u16] {
        &self.intensity
    }

    pub fn classification(&self) -> &[u8] {
        &self.classification
    }

    pub fn gps_time(&self) -> &[f64] {
        &self.gps_time
    }

    pub fn normal(&self) -> &[Vector3<f32>] {
        &self.normal
    }

    pub fn iter(&self) -> impl Iterator<Item = Point> + '_ {
        (0..self.len()).map(move |i| self.get(i))
    }

    /// Appends every point of `other` to `self`, widening `schema` to the union of both.
    pub fn extend(&mut self, other: &PointBuffer) {
        self.schema = self.schema.union(other.schema);
        self.positions.extend_from_slice(&other.positions);
        self.rgb.extend_from_slice(&other.rgb);
        self.intensity.extend_from_slice(&other.intensity);
        self.classification.extend_from_slice(&other.classification);
        self.gps_time.extend_from_slice(&other.gps_time);
        self.normal.extend_from_slice(&other.normal);
    }

    /// Splits this buffer in place, stably, by a predicate over point index: points for which
    /// `keep(i)` is true remain in `self`, the rest are moved (in their original relative order)
    /// into the returned buffer. Used by the subsampling strategies (spec §4.D) to partition a
    /// node's overflow bucket into "sampled into this node" and "pushed down to children".
    pub fn partition_stable(&mut self, mut keep: impl FnMut(usize) -> bool) -> PointBuffer {
        let mut kept = PointBuffer::new(self.schema);
        let mut removed = PointBuffer::new(self.schema);
        for i in 0..self.len() {
            let point = self.get(i);
            if keep(i) {
                kept.push(point);
            } else {
                removed.push(point);
            }
        }
        *self = kept;
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_get_round_trips() {
        let mut buf = PointBuffer::new(AttributeSchema::RGB);
        let mut p = Point::at(Point3::new(1.0, 2.0, 3.0));
        p.rgb = [10, 20, 30];
        buf.push(p);
        assert_eq!(buf.len(), 1);
        assert_eq!(buf.get(0), p);
    }

    #[test]
    fn extend_unions_schema() {
        let mut a = PointBuffer::new(AttributeSchema::RGB);
        a.push(Point::at(Point3::new(0.0, 0.0, 0.0)));
        let mut b = PointBuffer::new(AttributeSchema::INTENSITY);
        b.push(Point::at(Point3::new(1.0, 1.0, 1.0)));
        a.extend(&b);
        assert_eq!(a.len(), 2);
        assert!(a.schema().contains(AttributeSchema::RGB));
        assert!(a.schema().contains(AttributeSchema::INTENSITY));
    }

    #[test]
    fn partition_stable_preserves_relative_order() {
        let mut buf = PointBuffer::new(AttributeSchema::NONE);
        for i in 0..6 {
            buf.push(Point::at(Point3::new(i as f64, 0.0, 0.0)));
        }
        let removed = buf.partition_stable(|i| i % 2 == 0);
        let kept_xs: Vec<f64> = buf.positions().iter().map(|p| p.x).collect();
        let removed_xs: Vec<f64> = removed.positions().iter().map(|p| p.x).collect();
        assert_eq!(kept_xs, vec![0.0, 2.0, 4.0]);
        assert_eq!(removed_xs, vec![1.0, 3.0, 5.0]);
    }
}
