//! The octree of one point cloud.
//!
//! Nodes are addressed in two ways: a `NodePath` names a node by its position in the tree (like "r04"), while a `NodeId`
//! is a cheap handle into the `OctreeNodeStore` that owns it. Only the store creates `NodeId`s, and it only creates them for
//! nodes whose parent has been materialized.

pub mod node_store;
pub mod path;

pub use node_store::*;
pub use path::*;
