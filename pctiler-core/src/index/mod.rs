//! The in-memory octree (spec §4.D) and the streaming point-to-node assignment algorithm built
//! on top of it (spec §4.E).

pub mod indexer;
pub mod node_store;

pub use indexer::Indexer;
pub use node_store::{Action, NodeState, NodeStore};
