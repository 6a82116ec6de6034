#![allow(clippy::type_complexity)]

//! Streaming and level-of-detail management for octree-organized point clouds.
//!
//! Every frame, the `VisibilityUpdateEngine` walks the octrees of all registered point clouds from the camera's point of
//! view and decides which nodes to show, which to load and which may be forgotten. Geometry is fetched asynchronously by a
//! user-provided `NodeFetcher`; resident geometry is kept under a point budget by an `LruCache` that never evicts what is
//! currently visible.
//!
//! The main types are:
//!   - `OctreeNodeStore`: the octree of one point cloud, materialized lazily from a `HierarchySource`
//!   - `NodeLoader`: a bounded-concurrency queue of node loads, each with a `DeferredResult`
//!   - `LruCache`: cost-bounded resident geometry
//!   - `VisibilityUpdateEngine`: the per-frame traversal tying it all together
//!
//! Nothing blocks. Loads complete in the background and are applied at the next `update_visibility`, so a renderer simply
//! keeps calling it until `VisibilityResult::is_final` is set.

pub mod caching;
pub mod config;
pub mod deferred;
pub mod error;
pub mod loader;
pub mod octree;
pub mod sequencer;
pub mod visibility;

#[cfg(test)]
mod test_util;

pub use caching::*;
pub use config::*;
pub use deferred::*;
pub use error::*;
pub use loader::*;
pub use octree::*;
pub use sequencer::*;
pub use visibility::*;

// Hash types to use for small keys like `NodeKey`.
pub type SmallKeyHashMap<K, V> = ahash::AHashMap<K, V>;
pub type SmallKeyHashSet<K> = ahash::AHashSet<K>;

pub mod prelude {
    pub use super::{
        CameraState, ChildMetadata, DeferredResult, FetchError, FetchRequest, FetchedGeometry,
        HierarchySource, LoadError, LoadState, NodeFetcher, NodeKey, NodePath, OctreeNodeStore,
        PointCloudId, PointCloudOptions, Projection, StreamingConfig, VisibilityResult,
        VisibilityUpdateEngine,
    };
}
