use nalgebra::{Point3, Vector3};

/// Bitmask of the optional attributes carried alongside a point's position. The position
/// itself is always present; these bits record which of the fixed attribute columns in a
/// [crate::geometry::point_buffer::PointBuffer] were actually populated by the input reader
/// (e.g. a bare XYZ file carries none of them).
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub struct AttributeSchema(u8);

impl AttributeSchema {
    pub const RGB: AttributeSchema = AttributeSchema(1 << 0);
    pub const INTENSITY: AttributeSchema = AttributeSchema(1 << 1);
    pub const CLASSIFICATION: AttributeSchema = AttributeSchema(1 << 2);
    pub const GPS_TIME: AttributeSchema = AttributeSchema(1 << 3);
    pub const NORMAL: AttributeSchema = AttributeSchema(1 << 4);

    pub const NONE: AttributeSchema = AttributeSchema(0);
    pub const ALL: AttributeSchema = AttributeSchema(0b11111);

    pub fn contains(&self, other: AttributeSchema) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn union(&self, other: AttributeSchema) -> AttributeSchema {
        AttributeSchema(self.0 | other.0)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn from_bits(bits: u8) -> AttributeSchema {
        AttributeSchema(bits & Self::ALL.0)
    }
}

/// A single point's full attribute record, matching the fixed column set of
/// [crate::geometry::point_buffer::PointBuffer]. Which fields are meaningful for a given point
/// is governed by the buffer's [AttributeSchema], not by this type - a reader that can't supply
/// classification simply writes `0` and the schema bit stays unset.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Point {
    pub position: Point3<f64>,
    pub rgb: [u8; 3],
    pub intensity: u16,
    pub classification: u8,
    pub gps_time: f64,
    pub normal: Vector3<f32>,
}

impl Point {
    /// A point at the given position with every attribute at its zero value.
    pub fn at(position: Point3<f64>) -> Self {
        Point {
            position,
            rgb: [0, 0, 0],
            intensity: 0,
            classification: 0,
            gps_time: 0.0,
            normal: Vector3::zeros(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_union_and_contains() {
        let schema = AttributeSchema::RGB.union(AttributeSchema::INTENSITY);
        assert!(schema.contains(AttributeSchema::RGB));
        assert!(schema.contains(AttributeSchema::INTENSITY));
        assert!(!schema.contains(AttributeSchema::CLASSIFICATION));
    }

    #[test]
    fn schema_bits_round_trip() {
        let schema = AttributeSchema::GPS_TIME.union(AttributeSchema::NORMAL);
        assert_eq!(AttributeSchema::from_bits(schema.bits()), schema);
    }
}
