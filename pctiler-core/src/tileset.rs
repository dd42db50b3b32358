//! Walks a finished [NodeStore] and emits a 3D Tiles tileset descriptor (spec §4.G): one JSON
//! document per `max_depth_per_file` slice of the tree, each referring to its children either
//! inline or, once the slice's depth budget is spent, through an external sibling file.

use crate::geometry::octree_index::{NamingConvention, OctreeNodeIndex};
use crate::index::NodeStore;
use serde::Serialize;
use std::io;
use std::path::Path;

/// The up axis asserted in `asset.gltUpAxis`. Y is the 3D Tiles schema default, so it is the one
/// case that gets left out of the descriptor entirely rather than spelled out.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UpAxis {
    X,
    Y,
    Z,
}

pub struct TilesetConfig {
    pub root_error: f64,
    pub max_depth_per_file: u32,
    pub up_axis: UpAxis,
    pub extension: &'static str,
    pub convention: NamingConvention,
}

#[derive(Serialize)]
struct Asset {
    version: &'static str,
    #[serde(rename = "gltUpAxis", skip_serializing_if = "Option::is_none")]
    up_axis: Option<&'static str>,
}

#[derive(Serialize)]
struct Content {
    uri: String,
}

#[derive(Serialize)]
struct Tile {
    #[serde(rename = "boundingVolume")]
    bounding_volume: BoundingVolume,
    #[serde(rename = "geometricError")]
    geometric_error: f64,
    refine: &'static str,
    content: Content,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    children: Vec<Tile>,
}

#[derive(Serialize)]
struct BoundingVolume {
    #[serde(rename = "box")]
    bbox: [f64; 12],
}

#[derive(Serialize)]
struct TilesetDocument {
    asset: Asset,
    #[serde(rename = "geometricError")]
    geometric_error: f64,
    root: Tile,
}

/// Assembles tileset descriptors by walking a [NodeStore] depth-first and writes them, and every
/// external sibling descriptor they reference, under `output_root`.
pub struct TilesetAssembler<'a> {
    store: &'a NodeStore,
    config: TilesetConfig,
}

impl<'a> TilesetAssembler<'a> {
    pub fn new(store: &'a NodeStore, config: TilesetConfig) -> Self {
        TilesetAssembler { store, config }
    }

    /// Writes `tileset.json` at `output_root`, recursively writing any external descriptors the
    /// tree's depth required. Returns the list of descriptor file paths written.
    pub fn write(&self, output_root: &Path) -> io::Result<Vec<std::path::PathBuf>> {
        let root = OctreeNodeIndex::root();
        let mut written = Vec::new();
        let root_tile = self.build_tile(output_root, root, self.config.max_depth_per_file, &mut written)?;

        let document = TilesetDocument {
            asset: Asset {
                version: "1.0",
                up_axis: match self.config.up_axis {
                    UpAxis::X => Some("X"),
                    UpAxis::Y => None,
                    UpAxis::Z => Some("Z"),
                },
            },
            geometric_error: self.config.root_error,
            root: root_tile,
        };

        let path = output_root.join("tileset.json");
        let file = std::fs::File::create(&path)?;
        serde_json::to_writer(file, &document)?;
        written.push(path);
        Ok(written)
    }

    /// Builds the JSON subtree rooted at `index`, counting down `remaining_levels`. When the
    /// budget hits zero and the node still has children, those children are written out as their
    /// own `tileset.json`-shaped descriptor (named after the node) and referenced as an external
    /// `content.uri` instead of being inlined - matching the reference writer's "refer to
    /// external tilesets" fallback.
    fn build_tile(
        &self,
        output_root: &Path,
        index: OctreeNodeIndex,
        remaining_levels: u32,
        written: &mut Vec<std::path::PathBuf>,
    ) -> io::Result<Tile> {
        let bounds = self.store.bounds_of(index);
        let bounding_volume = bounding_volume_of(&bounds);
        let geometric_error = self.config.root_error / 2f64.powi(index.levels() as i32);
        let content_uri = format!("{}.{}", node_name(index, self.config.convention), self.config.extension);

        let children_mask = self.store.children_present(index);
        let has_children = children_mask != 0;

        if !has_children || remaining_levels == 0 {
            if has_children && remaining_levels == 0 {
                // the subtree still has content below here; split it into an external
                // descriptor rather than dropping it.
                let external_path = self.write_external_subtree(output_root, index, written)?;
                let uri = external_path
                    .file_name()
                    .expect("external descriptor path always has a file name")
                    .to_string_lossy()
                    .into_owned();
                return Ok(Tile {
                    bounding_volume,
                    geometric_error,
                    refine: "ADD",
                    content: Content { uri },
                    children: Vec::new(),
                });
            }
            return Ok(Tile {
                bounding_volume,
                geometric_error,
                refine: "ADD",
                content: Content { uri: content_uri },
                children: Vec::new(),
            });
        }

        let mut children = Vec::new();
        for octant in 0..8u8 {
            if children_mask & (1 << octant) == 0 {
                continue;
            }
            let child_index = index.child(octant);
            children.push(self.build_tile(output_root, child_index, remaining_levels - 1, written)?);
        }

        Ok(Tile {
            bounding_volume,
            geometric_error,
            refine: "ADD",
            content: Content { uri: content_uri },
            children,
        })
    }

    /// Writes the subtree rooted at `index` as its own tileset document and returns its path.
    /// The fresh document gets its own `max_depth_per_file` budget, so a tree deeper than one
    /// budget's worth produces a chain of external descriptors rather than failing.
    fn write_external_subtree(
        &self,
        output_root: &Path,
        index: OctreeNodeIndex,
        written: &mut Vec<std::path::PathBuf>,
    ) -> io::Result<std::path::PathBuf> {
        let tile = self.build_tile(output_root, index, self.config.max_depth_per_file, written)?;
        let document = TilesetDocument {
            asset: Asset {
                version: "1.0",
                up_axis: match self.config.up_axis {
                    UpAxis::X => Some("X"),
                    UpAxis::Y => None,
                    UpAxis::Z => Some("Z"),
                },
            },
            geometric_error: self.config.root_error / 2f64.powi(index.levels() as i32),
            root: tile,
        };

        let name = node_name(index, self.config.convention);
        let path = output_root.join(format!("{name}.tileset.json"));
        let file = std::fs::File::create(&path)?;
        serde_json::to_writer(file, &document)?;
        written.push(path.clone());
        Ok(path)
    }
}

fn node_name(index: OctreeNodeIndex, convention: NamingConvention) -> String {
    let name = index.to_string(convention);
    if name.is_empty() {
        "r".to_string()
    } else {
        name
    }
}

fn bounding_volume_of(bounds: &crate::geometry::Aabb) -> BoundingVolume {
    let min = bounds.min();
    let max = bounds.max();
    let center = bounds.center();
    let half = (max - min) * 0.5;
    BoundingVolume {
        bbox: [
            center.x, center.y, center.z,
            half.x, 0.0, 0.0,
            0.0, half.y, 0.0,
            0.0, 0.0, half.z,
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::point::{AttributeSchema, Point};
    use crate::geometry::point_buffer::PointBuffer;
    use crate::geometry::Aabb;
    use crate::geometry::sampling::SamplingStrategy;
    use nalgebra::Point3;

    fn unit_cube() -> Aabb {
        Aabb::new(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0))
    }

    #[test]
    fn root_only_tree_has_no_children_and_omits_up_axis() {
        let store = NodeStore::new(unit_cube(), 1000, 8, SamplingStrategy::Grid { grid_size: 128 }, AttributeSchema::NONE, 1);
        store.push_point(OctreeNodeIndex::root(), Point::at(Point3::new(0.1, 0.1, 0.1)));

        let dir = tempfile::tempdir().unwrap();
        let assembler = TilesetAssembler::new(
            &store,
            TilesetConfig {
                root_error: 50.0,
                max_depth_per_file: 10,
                up_axis: UpAxis::Y,
                extension: "bin",
                convention: NamingConvention::Simple,
            },
        );
        let written = assembler.write(dir.path()).unwrap();
        assert_eq!(written.len(), 1);

        let contents = std::fs::read_to_string(dir.path().join("tileset.json")).unwrap();
        assert!(!contents.contains("gltUpAxis"));
        assert!(contents.contains("\"refine\":\"ADD\""));
        assert!(contents.contains("r.bin"));
    }

    #[test]
    fn non_default_up_axis_is_present_verbatim() {
        let store = NodeStore::new(unit_cube(), 1000, 8, SamplingStrategy::Grid { grid_size: 128 }, AttributeSchema::NONE, 1);
        let dir = tempfile::tempdir().unwrap();
        let assembler = TilesetAssembler::new(
            &store,
            TilesetConfig {
                root_error: 50.0,
                max_depth_per_file: 10,
                up_axis: UpAxis::Z,
                extension: "bin",
                convention: NamingConvention::Simple,
            },
        );
        assembler.write(dir.path()).unwrap();
        let contents = std::fs::read_to_string(dir.path().join("tileset.json")).unwrap();
        assert!(contents.contains("\"gltUpAxis\":\"Z\""));
    }

    #[test]
    fn deep_tree_splits_into_external_descriptor_past_the_depth_budget() {
        use crate::index::Indexer;

        // max_points_per_node=1 and a single-cell grid forces every second point landing in a
        // node to cascade to a child, driving real splits down to the configured max depth.
        let store = NodeStore::new(unit_cube(), 1, 3, SamplingStrategy::Grid { grid_size: 1 }, AttributeSchema::NONE, 1);
        let indexer = Indexer::new(unit_cube(), 3);
        let mut buf = PointBuffer::new(AttributeSchema::NONE);
        let eps = 1e-6;
        for &x in &[eps, 1.0 - eps] {
            for &y in &[eps, 1.0 - eps] {
                for &z in &[eps, 1.0 - eps] {
                    buf.push(Point::at(Point3::new(x, y, z)));
                }
            }
        }
        let mut flushes = Vec::new();
        indexer.push_batch(&store, &buf, |f| flushes.push(f));

        let dir = tempfile::tempdir().unwrap();
        let assembler = TilesetAssembler::new(
            &store,
            TilesetConfig {
                root_error: 50.0,
                max_depth_per_file: 1,
                up_axis: UpAxis::Y,
                extension: "bin",
                convention: NamingConvention::Simple,
            },
        );
        let written = assembler.write(dir.path()).unwrap();
        // root descriptor plus at least one external descriptor for the subtree past depth 1.
        assert!(written.len() >= 2);
    }
}
