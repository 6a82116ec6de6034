//! The static spatial index of one point cloud.
//!
//! Nodes live in a `Slab` arena and refer to each other by `NodeId`. The store holds no point data, only bounds, point counts
//! and the load state of each node. Children are materialized lazily by asking a `HierarchySource`, and materializing a node
//! twice yields the same children.
//!
//! The load state of a node is readable by anyone, but only the `NodeLoader` (when a load starts or finishes) and the eviction
//! path of the `LruCache` (when a node is evicted or disposed) may change it.

use crate::{deferred::DeferredResult, HierarchyError, LoadError, NodePath};

use point_stream_core::prelude::*;

use auto_impl::auto_impl;
use slab::Slab;
use std::fmt::{Display, Formatter};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Identifies one point cloud registered with a `VisibilityUpdateEngine`.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct PointCloudId(pub u32);

impl Display for PointCloudId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "pc{}", self.0)
    }
}

/// Index of a node in its store's arena. Only meaningful for the store that created it.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct NodeId(u32);

impl NodeId {
    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Identifies a node across all point clouds sharing one cache and loader.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct NodeKey {
    pub cloud: PointCloudId,
    pub node: NodeId,
}

impl NodeKey {
    pub fn new(cloud: PointCloudId, node: NodeId) -> Self {
        Self { cloud, node }
    }
}

impl Display for NodeKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.cloud, self.node)
    }
}

/// Metadata of one child, as reported by a `HierarchySource`.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct ChildMetadata {
    /// `0bZYX` index of the child within its parent.
    pub octant: u8,
    pub num_points: u64,
    /// Tight bounds, if known. Defaults to the parent's octant.
    pub bounds: Option<Extent3f>,
}

/// Describes the structure of an octree, one level at a time. This is usually backed by a hierarchy file that has already
/// been fetched; it must not block on I/O.
#[auto_impl(&, Box, Arc)]
pub trait HierarchySource {
    /// The children of the node at `parent`. Leaves have none.
    fn children(&self, parent: NodePath) -> Result<Vec<ChildMetadata>, HierarchyError>;
}

/// Where a node's geometry is in its lifecycle: `Unloaded -> Loading -> {Loaded | Failed}`, and `Loaded -> Unloaded` on
/// eviction.
#[derive(Clone, Debug, PartialEq)]
pub enum LoadState {
    Unloaded,
    Loading(DeferredResult<NodeKey, LoadError>),
    /// The geometry is owned by the `LruCache`.
    Loaded { cost: u64 },
    Failed(FailedLoad),
}

impl LoadState {
    #[inline]
    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded { .. })
    }

    #[inline]
    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading(_))
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FailedLoad {
    pub error: LoadError,
    /// Consecutive failed attempts.
    pub attempts: u32,
    pub failed_frame: u64,
}

#[derive(Clone, Debug)]
enum Children {
    Unmaterialized,
    Materialized(Vec<NodeId>),
    Corrupt(HierarchyError),
}

#[derive(Clone, Debug)]
pub struct OctreeNode {
    path: NodePath,
    parent: Option<NodeId>,
    bounds: Extent3f,
    bounding_sphere: Sphere3,
    num_points: u64,
    children: Children,
    load_state: LoadState,
    load_attempts: u32,
}

impl OctreeNode {
    fn new(path: NodePath, parent: Option<NodeId>, bounds: Extent3f, num_points: u64) -> Self {
        Self {
            path,
            parent,
            bounds,
            bounding_sphere: bounds.bounding_sphere(),
            num_points,
            children: Children::Unmaterialized,
            load_state: LoadState::Unloaded,
            load_attempts: 0,
        }
    }

    #[inline]
    pub fn path(&self) -> NodePath {
        self.path
    }

    #[inline]
    pub fn level(&self) -> u8 {
        self.path.level()
    }

    #[inline]
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    #[inline]
    pub fn bounds(&self) -> &Extent3f {
        &self.bounds
    }

    #[inline]
    pub fn bounding_sphere(&self) -> &Sphere3 {
        &self.bounding_sphere
    }

    #[inline]
    pub fn num_points(&self) -> u64 {
        self.num_points
    }

    #[inline]
    pub fn load_state(&self) -> &LoadState {
        &self.load_state
    }

    /// Number of loads started since the node last loaded successfully.
    #[inline]
    pub fn load_attempts(&self) -> u32 {
        self.load_attempts
    }

    /// The children, if they have been materialized.
    #[inline]
    pub fn materialized_children(&self) -> Option<&[NodeId]> {
        match &self.children {
            Children::Materialized(ids) => Some(ids.as_slice()),
            _ => None,
        }
    }
}

pub struct OctreeNodeStore {
    nodes: Slab<OctreeNode>,
    root: NodeId,
    hierarchy: Box<dyn HierarchySource + Send + Sync>,
}

impl std::fmt::Debug for OctreeNodeStore {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OctreeNodeStore")
            .field("num_nodes", &self.nodes.len())
            .field("root", &self.root)
            .finish()
    }
}

impl OctreeNodeStore {
    /// Creates a store holding only the root node. Everything below is materialized on demand from `hierarchy`.
    pub fn new(
        root_bounds: Extent3f,
        root_num_points: u64,
        hierarchy: impl HierarchySource + Send + Sync + 'static,
    ) -> Result<Self, HierarchyError> {
        if !root_bounds.is_valid() {
            return Err(HierarchyError::Corrupt {
                path: NodePath::ROOT,
                reason: format!("invalid root bounds {:?}", root_bounds),
            });
        }

        let mut nodes = Slab::new();
        let root = NodeId(nodes.insert(OctreeNode::new(
            NodePath::ROOT,
            None,
            root_bounds,
            root_num_points,
        )) as u32);

        Ok(Self {
            nodes,
            root,
            hierarchy: Box::new(hierarchy),
        })
    }

    #[inline]
    pub fn root(&self) -> NodeId {
        self.root
    }

    #[inline]
    pub fn node(&self, id: NodeId) -> Option<&OctreeNode> {
        self.nodes.get(id.index())
    }

    #[inline]
    pub fn bounding_box(&self, id: NodeId) -> Option<Extent3f> {
        self.node(id).map(|n| n.bounds)
    }

    #[inline]
    pub fn point_count(&self, id: NodeId) -> Option<u64> {
        self.node(id).map(|n| n.num_points)
    }

    #[inline]
    pub fn load_state(&self, id: NodeId) -> Option<&LoadState> {
        self.node(id).map(|n| &n.load_state)
    }

    /// The number of materialized nodes.
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterates over all materialized nodes.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &OctreeNode)> {
        self.nodes.iter().map(|(i, n)| (NodeId(i as u32), n))
    }

    /// Finds the node at `path` among the materialized nodes.
    pub fn find(&self, path: NodePath) -> Option<NodeId> {
        let mut id = self.root;
        for octant in path.octants() {
            id = *self
                .node(id)?
                .materialized_children()?
                .iter()
                .find(|&&child| self.nodes[child.index()].path.octant() == Some(octant))?;
        }

        Some(id)
    }

    /// The children of `id`, materializing them on first access.
    ///
    /// Corrupt metadata is remembered: the subtree stays unreachable and the same error is returned on every call. A failing
    /// `HierarchySource` is asked again on the next call.
    pub fn children(&mut self, id: NodeId) -> Result<&[NodeId], HierarchyError> {
        let node = self
            .nodes
            .get(id.index())
            .ok_or(HierarchyError::UnknownNode(id))?;

        match &node.children {
            Children::Materialized(_) => {}
            Children::Corrupt(error) => return Err(error.clone()),
            Children::Unmaterialized => self.materialize(id)?,
        }

        match &self.nodes[id.index()].children {
            Children::Materialized(ids) => Ok(ids.as_slice()),
            Children::Corrupt(error) => Err(error.clone()),
            Children::Unmaterialized => Err(HierarchyError::UnknownNode(id)),
        }
    }

    fn materialize(&mut self, id: NodeId) -> Result<(), HierarchyError> {
        let parent = &self.nodes[id.index()];
        let (path, parent_bounds) = (parent.path, parent.bounds);

        let result = self
            .hierarchy
            .children(path)
            .and_then(|metadata| validate_children(path, &parent_bounds, metadata));
        let metadata = match result {
            Ok(metadata) => metadata,
            Err(error) => {
                if error.is_permanent() {
                    self.nodes[id.index()].children = Children::Corrupt(error.clone());
                }
                return Err(error);
            }
        };

        let mut child_ids = Vec::with_capacity(metadata.len());
        for (child_path, bounds, num_points) in metadata {
            let entry = self.nodes.vacant_entry();
            let child_id = NodeId(entry.key() as u32);
            entry.insert(OctreeNode::new(child_path, Some(id), bounds, num_points));
            child_ids.push(child_id);
        }
        tracing::trace!(%path, num_children = child_ids.len(), "materialized children");
        self.nodes[id.index()].children = Children::Materialized(child_ids);

        Ok(())
    }

    pub(crate) fn set_load_state(&mut self, id: NodeId, state: LoadState) {
        if let Some(node) = self.nodes.get_mut(id.index()) {
            if state.is_loaded() {
                node.load_attempts = 0;
            }
            node.load_state = state;
        }
    }

    /// Counts a new load attempt, returning the total since the last success.
    pub(crate) fn record_load_attempt(&mut self, id: NodeId) -> u32 {
        self.nodes.get_mut(id.index()).map_or(0, |node| {
            node.load_attempts += 1;
            node.load_attempts
        })
    }
}

fn validate_children(
    parent_path: NodePath,
    parent_bounds: &Extent3f,
    mut metadata: Vec<ChildMetadata>,
) -> Result<Vec<(NodePath, Extent3f, u64)>, HierarchyError> {
    let corrupt = |reason: String| HierarchyError::Corrupt {
        path: parent_path,
        reason,
    };
    let tolerance = 1e-4 * parent_bounds.shape.max_component().max(1.0);

    metadata.sort_by_key(|m| m.octant);

    let mut seen = 0u8;
    let mut validated = Vec::with_capacity(metadata.len());
    for m in metadata {
        if m.octant >= 8 {
            return Err(corrupt(format!("octant {} out of range", m.octant)));
        }
        if seen & (1 << m.octant) != 0 {
            return Err(corrupt(format!("duplicate octant {}", m.octant)));
        }
        seen |= 1 << m.octant;

        let path = parent_path
            .child(m.octant)
            .ok_or_else(|| corrupt(format!("deeper than level {}", NodePath::MAX_LEVEL)))?;
        let bounds = m.bounds.unwrap_or_else(|| parent_bounds.octant(m.octant));
        if !bounds.is_valid() {
            return Err(corrupt(format!("invalid bounds {:?} for {}", bounds, path)));
        }
        if !parent_bounds.contains_extent(&bounds, tolerance) {
            return Err(corrupt(format!("bounds of {} exceed the parent's", path)));
        }

        validated.push((path, bounds, m.num_points));
    }

    Ok(validated)
}

// ████████╗███████╗███████╗████████╗███████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝
//    ██║   █████╗  ███████╗   ██║   ███████╗
//    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║
//    ██║   ███████╗███████║   ██║   ███████║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝
