//! Decides, once per frame, which octree nodes are shown, which are loaded and which may be evicted.
//!
//! # Frame Update
//!
//! `VisibilityUpdateEngine::update_visibility` runs these steps, in order:
//!
//! 1. **Traverse** every visible point cloud from its root, most important node first (see `CameraState::project`). A node
//!    is skipped with its whole subtree when it is outside the frustum, too small on screen, or deeper than the cloud's
//!    `max_level`. Traversal stops when the next node would exceed the point budget.
//! 2. **Classify** each traversed node by its load state. Resident nodes are touched in the `LruCache` (which protects them
//!    from eviction for the rest of the frame) and shown if their upload fits in the per-frame allowance; only shown nodes
//!    have their children traversed. Unloaded nodes are requested, loading nodes are reported as pending, and failed nodes
//!    are retried after a cooldown until they are given up on.
//! 3. **Apply completions** that arrived since the last frame. This is the only place where geometry enters the cache, so
//!    every insertion (and the evictions it causes) happens after the touches of step 2.
//! 4. **Request** the unloaded nodes in traversal order and let the `NodeLoader` dispatch what fits under its cap.
//! 5. **Free memory** until the resident cost fits the point budget again.
//!
//! Nothing in here blocks. Failures of single nodes degrade the result instead of aborting the frame.

pub mod camera;

pub use camera::{CameraState, NodeProjection, Projection};

use crate::{
    caching::{CacheWarning, LruCache},
    deferred::DeferredResult,
    loader::{mark_unloaded, NodeFetcher, NodeLoader, NodeStores},
    ConfigError, HierarchyError, LoadError, LoadState, NodeKey, NodePath, OctreeNodeStore,
    PointCloudId, PointCloudOptions, SmallKeyHashMap, SmallKeyHashSet, StreamingConfig,
};

use float_ord::FloatOrd;
use futures::future::join_all;
use futures::task::Spawn;
use std::collections::BinaryHeap;
use std::future::Future;

/// A node that should be drawn this frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VisibleNode {
    pub key: NodeKey,
    pub path: NodePath,
    pub num_points: u64,
    /// Traversal priority. See `NodeProjection::weight`.
    pub weight: f32,
}

/// Geometry that left the cache. The renderer should free whatever GPU resources it made from it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReleasedNode<G> {
    pub key: NodeKey,
    pub geometry: G,
}

/// Non-fatal problems encountered during one frame.
#[derive(Clone, Debug, PartialEq)]
pub enum VisibilityWarning {
    LoadFailed {
        key: NodeKey,
        error: LoadError,
    },
    /// The node failed too many times and will not be requested again. Reported once.
    NodeUnavailable {
        key: NodeKey,
        path: NodePath,
        attempts: u32,
    },
    /// The children of `parent` could not be materialized. Reported once.
    CorruptHierarchy {
        parent: NodeKey,
        error: HierarchyError,
    },
    Cache(CacheWarning<NodeKey>),
}

/// The outcome of one `update_visibility`.
#[derive(Debug)]
pub struct VisibilityResult<G> {
    pub frame: u64,
    /// Nodes to draw, most important first.
    pub visible_nodes: Vec<VisibleNode>,
    /// Points of all traversed nodes, including those still waiting for their geometry.
    pub num_visible_points: u64,
    /// Visible nodes whose geometry the renderer sees for the first time.
    pub newly_uploaded: Vec<NodeKey>,
    /// Some resident nodes were held back because of the per-frame upload allowance.
    pub exceeded_max_loads_to_gpu: bool,
    /// Some traversed node is in the `Failed` state.
    pub node_load_failed: bool,
    /// Nothing visible is still waiting to be loaded or uploaded. A renderer should keep updating until this is `true`.
    pub is_final: bool,
    /// Nodes that want a load but did not fit in the loader's queue.
    pub deferred_loads: Vec<NodeKey>,
    /// Loads the traversal is waiting for.
    pub pending_loads: Vec<DeferredResult<NodeKey, LoadError>>,
    pub released: Vec<ReleasedNode<G>>,
    pub warnings: Vec<VisibilityWarning>,
}

impl<G> VisibilityResult<G> {
    fn new(frame: u64) -> Self {
        Self {
            frame,
            visible_nodes: Vec::new(),
            num_visible_points: 0,
            newly_uploaded: Vec::new(),
            exceeded_max_loads_to_gpu: false,
            node_load_failed: false,
            is_final: false,
            deferred_loads: Vec::new(),
            pending_loads: Vec::new(),
            released: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Resolves once every pending load of this frame has settled, one way or another.
    pub fn settled(&self) -> impl Future<Output = Vec<Result<NodeKey, LoadError>>> {
        join_all(self.pending_loads.clone())
    }
}

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
struct Candidate {
    weight: FloatOrd<f32>,
    key: NodeKey,
}

/// Per-frame scratch space of the traversal.
struct Traversal<G> {
    result: VisibilityResult<G>,
    wanted: Vec<NodeKey>,
    loading: SmallKeyHashSet<NodeKey>,
    num_uploads: usize,
}

pub struct VisibilityUpdateEngine<F: NodeFetcher> {
    config: StreamingConfig,
    stores: NodeStores,
    options: SmallKeyHashMap<PointCloudId, PointCloudOptions>,
    next_cloud: u32,
    lru: LruCache<NodeKey, F::Geometry>,
    loader: NodeLoader<F>,
    frame: u64,
    uploaded: SmallKeyHashSet<NodeKey>,
    reported_unavailable: SmallKeyHashSet<NodeKey>,
    reported_corrupt: SmallKeyHashSet<NodeKey>,
}

impl<F> VisibilityUpdateEngine<F>
where
    F: NodeFetcher,
{
    /// `fetcher` runs on tasks spawned with `spawner`; their results are applied on later calls to `update_visibility`.
    pub fn new(
        fetcher: F,
        spawner: impl Spawn + 'static,
        config: StreamingConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self {
            config,
            stores: NodeStores::default(),
            options: SmallKeyHashMap::default(),
            next_cloud: 0,
            lru: LruCache::new(config.point_budget),
            loader: NodeLoader::new(fetcher, spawner, config.loader_config()),
            frame: 0,
            uploaded: SmallKeyHashSet::default(),
            reported_unavailable: SmallKeyHashSet::default(),
            reported_corrupt: SmallKeyHashSet::default(),
        })
    }

    pub fn add_point_cloud(
        &mut self,
        store: OctreeNodeStore,
        options: PointCloudOptions,
    ) -> PointCloudId {
        let cloud = PointCloudId(self.next_cloud);
        self.next_cloud += 1;
        self.stores.insert(cloud, store);
        self.options.insert(cloud, options);
        tracing::debug!(%cloud, "added point cloud");

        cloud
    }

    pub fn set_options(
        &mut self,
        cloud: PointCloudId,
        options: PointCloudOptions,
    ) -> Result<(), LoadError> {
        let current = self
            .options
            .get_mut(&cloud)
            .ok_or(LoadError::UnknownPointCloud(cloud))?;
        *current = options;

        Ok(())
    }

    #[inline]
    pub fn point_cloud(&self, cloud: PointCloudId) -> Option<&OctreeNodeStore> {
        self.stores.get(&cloud)
    }

    /// Borrow the resident geometry of `key`. Do not hold on to it past the next `update_visibility`.
    #[inline]
    pub fn geometry(&self, key: &NodeKey) -> Option<&F::Geometry> {
        self.lru.get(key)
    }

    #[inline]
    pub fn frame(&self) -> u64 {
        self.frame
    }

    #[inline]
    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    /// Total cost of all resident geometry.
    #[inline]
    pub fn resident_cost(&self) -> u64 {
        self.lru.total_cost()
    }

    #[inline]
    pub fn loader(&self) -> &NodeLoader<F> {
        &self.loader
    }

    /// Runs one frame. See the module docs.
    pub fn update_visibility(
        &mut self,
        camera: &CameraState,
        point_budget: u64,
    ) -> VisibilityResult<F::Geometry> {
        self.frame += 1;
        let frame = self.frame;
        let span = tracing::trace_span!("update_visibility", frame);
        let _enter = span.enter();

        if point_budget != self.lru.budget() {
            tracing::debug!(point_budget, "point budget changed");
        }
        self.lru.set_budget(point_budget);
        self.lru.begin_frame();

        let mut traversal = Traversal {
            result: VisibilityResult::new(frame),
            wanted: Vec::new(),
            loading: SmallKeyHashSet::default(),
            num_uploads: 0,
        };
        self.traverse(camera, point_budget, &mut traversal);
        let Traversal {
            mut result,
            wanted,
            loading,
            ..
        } = traversal;

        let summary = self
            .loader
            .process_completions(&mut self.stores, &mut self.lru, frame);
        result.warnings.extend(
            summary
                .failed
                .into_iter()
                .map(|(key, error)| VisibilityWarning::LoadFailed { key, error }),
        );
        self.release(summary.evicted, &mut result);
        result
            .warnings
            .extend(summary.warnings.into_iter().map(VisibilityWarning::Cache));

        self.loader
            .abandon_stale(&mut self.stores, frame, &loading);

        for key in wanted {
            match self.loader.request(&mut self.stores, key, frame) {
                Ok(pending) => result.pending_loads.push(pending),
                Err(LoadError::QueueFull) => result.deferred_loads.push(key),
                Err(error) => tracing::error!(%key, %error, "load request rejected"),
            }
        }
        self.loader.dispatch();

        let report = self.lru.free_memory();
        mark_unloaded(&mut self.stores, report.evicted.iter().map(|(key, _)| *key));
        self.release(report.evicted, &mut result);
        result
            .warnings
            .extend(report.warnings.into_iter().map(VisibilityWarning::Cache));

        result.is_final = result.pending_loads.is_empty()
            && result.deferred_loads.is_empty()
            && !result.exceeded_max_loads_to_gpu;
        tracing::trace!(
            num_visible = result.visible_nodes.len(),
            num_points = result.num_visible_points,
            num_pending = result.pending_loads.len(),
            is_final = result.is_final,
            "updated visibility"
        );

        result
    }

    /// Removes a point cloud and hands back all of its resident geometry. Its pending loads are rejected with `Disposed`.
    pub fn dispose(
        &mut self,
        cloud: PointCloudId,
    ) -> Result<Vec<ReleasedNode<F::Geometry>>, LoadError> {
        self.stores
            .remove(&cloud)
            .ok_or(LoadError::UnknownPointCloud(cloud))?;
        self.options.remove(&cloud);

        let num_cancelled = self.loader.cancel_cloud(cloud);
        let released: Vec<_> = self
            .lru
            .remove_where(|key| key.cloud == cloud)
            .into_iter()
            .map(|(key, geometry)| ReleasedNode { key, geometry })
            .collect();
        self.uploaded.retain(|key| key.cloud != cloud);
        self.reported_unavailable.retain(|key| key.cloud != cloud);
        self.reported_corrupt.retain(|key| key.cloud != cloud);
        tracing::debug!(
            %cloud,
            num_released = released.len(),
            num_cancelled,
            "disposed point cloud"
        );

        Ok(released)
    }

    fn traverse(
        &mut self,
        camera: &CameraState,
        point_budget: u64,
        traversal: &mut Traversal<F::Geometry>,
    ) {
        let mut heap = BinaryHeap::new();
        for (&cloud, store) in self.stores.iter() {
            let options = self.options.get(&cloud).copied().unwrap_or_default();
            if !options.visible {
                continue;
            }
            let root = store.root();
            let node = match store.node(root) {
                Some(node) => node,
                None => continue,
            };
            let min_pixel_size = options
                .min_node_pixel_size
                .unwrap_or(self.config.min_node_pixel_size);
            let screen_radius = camera.project(node.bounding_sphere()).screen_radius;
            // NaN radii are culled too.
            if !camera.sees(node.bounds()) || !(screen_radius >= min_pixel_size) {
                tracing::trace!(%cloud, "root culled");
                continue;
            }
            heap.push(Candidate {
                weight: FloatOrd(f32::MAX),
                key: NodeKey::new(cloud, root),
            });
        }

        while let Some(Candidate { weight, key }) = heap.pop() {
            let store = match self.stores.get_mut(&key.cloud) {
                Some(store) => store,
                None => continue,
            };
            let options = self.options.get(&key.cloud).copied().unwrap_or_default();
            let node = match store.node(key.node) {
                Some(node) => node,
                None => continue,
            };
            if options.max_level.map_or(false, |max| node.level() > max) {
                continue;
            }
            let (path, num_points) = (node.path(), node.num_points());
            let state = node.load_state().clone();

            let result = &mut traversal.result;
            if !matches!(state, LoadState::Failed(_)) {
                if result.num_visible_points + num_points > point_budget {
                    break;
                }
                result.num_visible_points += num_points;
            }

            match state {
                LoadState::Loaded { .. } => {
                    self.lru.touch(&key);
                    if !self.uploaded.contains(&key) {
                        if traversal.num_uploads >= self.config.max_loads_to_gpu {
                            result.exceeded_max_loads_to_gpu = true;
                            continue;
                        }
                        traversal.num_uploads += 1;
                        self.uploaded.insert(key);
                        result.newly_uploaded.push(key);
                    }
                    result.visible_nodes.push(VisibleNode {
                        key,
                        path,
                        num_points,
                        weight: weight.0,
                    });

                    let children = match store.children(key.node) {
                        Ok(children) => children.to_vec(),
                        Err(error) => {
                            if self.reported_corrupt.insert(key) {
                                tracing::warn!(%key, %path, %error, "skipping subtree");
                                result.warnings.push(VisibilityWarning::CorruptHierarchy {
                                    parent: key,
                                    error,
                                });
                            }
                            continue;
                        }
                    };
                    let min_pixel_size = options
                        .min_node_pixel_size
                        .unwrap_or(self.config.min_node_pixel_size);
                    for child in children {
                        let child_node = match store.node(child) {
                            Some(node) => node,
                            None => continue,
                        };
                        if !camera.sees(child_node.bounds()) {
                            continue;
                        }
                        let projection = camera.project(child_node.bounding_sphere());
                        if !(projection.screen_radius >= min_pixel_size) {
                            continue;
                        }
                        heap.push(Candidate {
                            weight: FloatOrd(projection.weight),
                            key: NodeKey::new(key.cloud, child),
                        });
                    }
                }
                LoadState::Unloaded => traversal.wanted.push(key),
                LoadState::Loading(pending) => {
                    traversal.loading.insert(key);
                    result.pending_loads.push(pending);
                }
                LoadState::Failed(failed) => {
                    result.node_load_failed = true;
                    match self
                        .config
                        .retry
                        .next_attempt_frame(failed.failed_frame, failed.attempts)
                    {
                        Some(due) if due <= result.frame => traversal.wanted.push(key),
                        Some(_) => {}
                        None => {
                            if self.reported_unavailable.insert(key) {
                                tracing::warn!(
                                    %key,
                                    %path,
                                    attempts = failed.attempts,
                                    "giving up on node"
                                );
                                result.warnings.push(VisibilityWarning::NodeUnavailable {
                                    key,
                                    path,
                                    attempts: failed.attempts,
                                });
                            }
                        }
                    }
                }
            }
        }
    }

    fn release(
        &mut self,
        evicted: Vec<(NodeKey, F::Geometry)>,
        result: &mut VisibilityResult<F::Geometry>,
    ) {
        for (key, geometry) in evicted {
            self.uploaded.remove(&key);
            result.released.push(ReleasedNode { key, geometry });
        }
    }
}

// ████████╗███████╗███████╗████████╗███████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝
//    ██║   █████╗  ███████╗   ██║   ███████╗
//    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║
//    ██║   ███████╗███████║   ██║   ███████║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝
