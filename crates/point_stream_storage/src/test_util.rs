use crate::{
    ChildMetadata, FetchError, FetchRequest, FetchedGeometry, HierarchyError, HierarchySource,
    NodeFetcher, NodeKey, NodePath,
};

use point_stream_core::prelude::*;

use futures::channel::oneshot;
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use std::sync::Arc;

pub fn unit_cube() -> Extent3f {
    Extent3f::from_min_and_shape(Point3f::ZERO, Point3f::ONES)
}

type ChildrenFn = dyn Fn(NodePath) -> Result<Vec<ChildMetadata>, HierarchyError> + Send + Sync;

/// A hierarchy that records every node whose children were requested.
#[derive(Clone)]
pub struct CountingHierarchy {
    children: Arc<ChildrenFn>,
    visited: Arc<Mutex<Vec<NodePath>>>,
}

impl CountingHierarchy {
    pub fn new(
        children: impl Fn(NodePath) -> Result<Vec<ChildMetadata>, HierarchyError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            children: Arc::new(children),
            visited: Default::default(),
        }
    }

    /// A complete octree with `depth` levels below the root.
    pub fn full(depth: u8, num_points: u64) -> Self {
        Self::new(move |path| {
            if path.level() >= depth {
                return Ok(Vec::new());
            }

            Ok((0..8)
                .map(|octant| ChildMetadata {
                    octant,
                    num_points,
                    bounds: None,
                })
                .collect())
        })
    }

    pub fn num_calls(&self) -> usize {
        self.visited.lock().len()
    }

    pub fn visited(&self) -> Vec<NodePath> {
        self.visited.lock().clone()
    }
}

impl HierarchySource for CountingHierarchy {
    fn children(&self, parent: NodePath) -> Result<Vec<ChildMetadata>, HierarchyError> {
        self.visited.lock().push(parent);

        (self.children)(parent)
    }
}

/// Resolves every fetch right away. The geometry is the node's path and its cost is its point count.
#[derive(Clone, Copy, Debug, Default)]
pub struct ImmediateFetcher;

impl NodeFetcher for ImmediateFetcher {
    type Geometry = NodePath;

    fn fetch_and_parse(
        &self,
        request: FetchRequest,
    ) -> BoxFuture<'static, Result<FetchedGeometry<NodePath>, FetchError>> {
        futures::future::ready(Ok(FetchedGeometry {
            geometry: request.path,
            cost: request.num_points,
        }))
        .boxed()
    }
}

type FetchReply = oneshot::Sender<Result<FetchedGeometry<NodePath>, FetchError>>;

/// Holds every fetch until the test decides how it ends.
#[derive(Clone, Default)]
pub struct ManualFetcher {
    pending: Arc<Mutex<Vec<(FetchRequest, FetchReply)>>>,
    num_fetches: Arc<Mutex<usize>>,
}

impl ManualFetcher {
    pub fn num_fetches(&self) -> usize {
        *self.num_fetches.lock()
    }

    pub fn pending_keys(&self) -> Vec<NodeKey> {
        self.pending.lock().iter().map(|(r, _)| r.key).collect()
    }

    /// Completes the fetch of `key` with its point count as the cost.
    pub fn succeed(&self, key: NodeKey) -> bool {
        self.reply(key, |request| {
            Ok(FetchedGeometry {
                geometry: request.path,
                cost: request.num_points,
            })
        })
    }

    pub fn fail(&self, key: NodeKey, message: &str) -> bool {
        self.reply(key, |_| Err(FetchError::new(message)))
    }

    pub fn succeed_all(&self) {
        for key in self.pending_keys() {
            self.succeed(key);
        }
    }

    fn reply(
        &self,
        key: NodeKey,
        make_reply: impl FnOnce(&FetchRequest) -> Result<FetchedGeometry<NodePath>, FetchError>,
    ) -> bool {
        let mut pending = self.pending.lock();
        let position = match pending.iter().position(|(r, _)| r.key == key) {
            Some(p) => p,
            None => return false,
        };
        let (request, reply) = pending.remove(position);
        drop(pending);

        reply.send(make_reply(&request)).is_ok()
    }
}

impl NodeFetcher for ManualFetcher {
    type Geometry = NodePath;

    fn fetch_and_parse(
        &self,
        request: FetchRequest,
    ) -> BoxFuture<'static, Result<FetchedGeometry<NodePath>, FetchError>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.lock().push((request, reply_tx));
        *self.num_fetches.lock() += 1;

        async move {
            reply_rx
                .await
                .unwrap_or_else(|_| Err(FetchError::new("fetch dropped")))
        }
        .boxed()
    }
}
