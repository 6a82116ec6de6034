//! Streaming and level-of-detail management for point clouds organized as octrees.
//!
//! This library is organized into two crates:
//! - **core**: points, extents, bounding spheres and camera frusta
//! - **storage**: the octree node store, the asynchronous node loader, the LRU cache of resident geometry, and the
//!   per-frame `VisibilityUpdateEngine` that drives them
//!
//! A typical renderer registers each point cloud with a `VisibilityUpdateEngine`, then calls `update_visibility` once per
//! frame and draws the returned `visible_nodes`.

pub use point_stream_core as core;
pub use point_stream_storage as storage;

pub mod prelude {
    pub use super::core::prelude::*;
    pub use super::storage::prelude::*;
}
