use point_stream_core::prelude::*;
use point_stream_storage::{
    ChildMetadata, FetchError, FetchRequest, FetchedGeometry, HierarchyError, HierarchySource,
    NodeFetcher, NodePath, OctreeNodeStore,
};

use futures::future::{BoxFuture, FutureExt};

// TODO: it would be nice if all crates could share this module, but it causes this issue:
// https://github.com/rust-lang/cargo/issues/6765

/// A complete octree, `depth` levels below the root, where every node holds `points_per_node` points.
#[derive(Clone, Copy, Debug)]
pub struct SyntheticHierarchy {
    pub depth: u8,
    pub points_per_node: u64,
}

impl HierarchySource for SyntheticHierarchy {
    fn children(&self, parent: NodePath) -> Result<Vec<ChildMetadata>, HierarchyError> {
        if parent.level() >= self.depth {
            return Ok(Vec::new());
        }

        Ok((0..8)
            .map(|octant| ChildMetadata {
                octant,
                num_points: self.points_per_node,
                bounds: None,
            })
            .collect())
    }
}

/// A synthetic point cloud filling the cube `[0, edge_length]^3`.
pub fn synthetic_point_cloud(depth: u8, points_per_node: u64, edge_length: f32) -> OctreeNodeStore {
    let bounds = Extent3f::from_min_and_shape(Point3f::ZERO, Point3f::fill(edge_length));

    OctreeNodeStore::new(
        bounds,
        points_per_node,
        SyntheticHierarchy {
            depth,
            points_per_node,
        },
    )
    .expect("synthetic bounds are valid")
}

/// Resolves every fetch right away with a buffer of `num_points` zeroed positions.
#[derive(Clone, Copy, Debug, Default)]
pub struct ImmediateFetcher;

impl NodeFetcher for ImmediateFetcher {
    type Geometry = Vec<[f32; 3]>;

    fn fetch_and_parse(
        &self,
        request: FetchRequest,
    ) -> BoxFuture<'static, Result<FetchedGeometry<Self::Geometry>, FetchError>> {
        futures::future::ready(Ok(FetchedGeometry {
            geometry: vec![[0.0; 3]; request.num_points as usize],
            cost: request.num_points,
        }))
        .boxed()
    }
}
