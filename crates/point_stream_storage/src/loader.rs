//! Turns node requests into geometry, asynchronously.
//!
//! The `NodeLoader` owns a FIFO queue of requested loads and dispatches at most `max_concurrent_loads` of them at once to an
//! injected `NodeFetcher`, running each fetch as a task on an injected executor. Finished fetches are sent back over a
//! channel and only applied when the owner calls `process_completions`, so completions never interleave with a traversal.
//!
//! Every request gets a `DeferredResult` which settles after the node's load state and the `LruCache` have been updated.

use crate::{
    caching::{CacheWarning, LruCache},
    deferred::{deferred, DeferredResult, Settler},
    sequencer::OrderingSequencer,
    FailedLoad, FetchError, LoadError, LoadState, LoaderConfig, NodeKey, NodePath,
    OctreeNodeStore, PointCloudId, SmallKeyHashMap, SmallKeyHashSet,
};

use point_stream_core::Extent3f;

use auto_impl::auto_impl;
use futures::channel::mpsc;
use futures::future::BoxFuture;
use futures::task::{Spawn, SpawnExt};
use std::collections::VecDeque;
use std::sync::Arc;

/// The stores of all point clouds sharing one loader.
pub type NodeStores = SmallKeyHashMap<PointCloudId, OctreeNodeStore>;

/// Everything a fetcher may need to know about the node it fetches.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FetchRequest {
    pub key: NodeKey,
    pub path: NodePath,
    pub num_points: u64,
    pub bounds: Extent3f,
}

/// Decoded geometry and what it costs to keep it resident.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FetchedGeometry<G> {
    pub geometry: G,
    /// Usually the point count. This is charged against the point budget.
    pub cost: u64,
}

/// Fetches and decodes the geometry of one node. This is where network, storage and codecs live.
#[auto_impl(&, Box, Arc)]
pub trait NodeFetcher {
    type Geometry: Send + 'static;

    fn fetch_and_parse(
        &self,
        request: FetchRequest,
    ) -> BoxFuture<'static, Result<FetchedGeometry<Self::Geometry>, FetchError>>;
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
struct LoadTicket(u64);

struct PendingLoad {
    request: FetchRequest,
    settler: Settler<NodeKey, LoadError>,
    requested_frame: u64,
}

struct Completion<G> {
    ticket: LoadTicket,
    result: Result<FetchedGeometry<G>, LoadError>,
}

/// What `NodeLoader::process_completions` did.
#[derive(Debug)]
pub struct CompletionSummary<G> {
    pub loaded: Vec<NodeKey>,
    pub failed: Vec<(NodeKey, LoadError)>,
    /// Geometry evicted to make room for the loaded nodes. Those nodes are `Unloaded` again.
    pub evicted: Vec<(NodeKey, G)>,
    pub warnings: Vec<CacheWarning<NodeKey>>,
}

impl<G> Default for CompletionSummary<G> {
    fn default() -> Self {
        Self {
            loaded: Vec::new(),
            failed: Vec::new(),
            evicted: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

pub struct NodeLoader<F: NodeFetcher> {
    fetcher: Arc<F>,
    spawner: Box<dyn Spawn>,
    config: LoaderConfig,
    queue: VecDeque<PendingLoad>,
    in_flight: SmallKeyHashMap<LoadTicket, PendingLoad>,
    next_ticket: u64,
    completion_tx: mpsc::UnboundedSender<Completion<F::Geometry>>,
    completion_rx: mpsc::UnboundedReceiver<Completion<F::Geometry>>,
    sequencer: OrderingSequencer,
}

impl<F> NodeLoader<F>
where
    F: NodeFetcher,
{
    pub fn new(fetcher: F, spawner: impl Spawn + 'static, config: LoaderConfig) -> Self {
        let (completion_tx, completion_rx) = mpsc::unbounded();

        Self {
            fetcher: Arc::new(fetcher),
            spawner: Box::new(spawner),
            config,
            queue: VecDeque::new(),
            in_flight: SmallKeyHashMap::default(),
            next_ticket: 0,
            completion_tx,
            completion_rx,
            sequencer: OrderingSequencer::new(),
        }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    #[inline]
    pub fn num_queued(&self) -> usize {
        self.queue.len()
    }

    #[inline]
    pub fn num_in_flight(&self) -> usize {
        self.in_flight.len()
    }

    #[inline]
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.in_flight.is_empty()
    }

    /// Queues a load of `key` and moves the node to `Loading`.
    ///
    /// Requesting a node that is already `Loading` or `Loaded` is a caller bug and fails with `DuplicateLoadRequest`. A full
    /// queue fails with `QueueFull`, which just means "try again next frame".
    pub fn request(
        &mut self,
        stores: &mut NodeStores,
        key: NodeKey,
        frame: u64,
    ) -> Result<DeferredResult<NodeKey, LoadError>, LoadError> {
        let store = stores
            .get_mut(&key.cloud)
            .ok_or(LoadError::UnknownPointCloud(key.cloud))?;
        let node = store.node(key.node).ok_or(LoadError::UnknownNode(key))?;

        match node.load_state() {
            LoadState::Loading(_) | LoadState::Loaded { .. } => {
                tracing::error!(%key, state = ?node.load_state(), "duplicate load request");
                return Err(LoadError::DuplicateLoadRequest(key));
            }
            LoadState::Unloaded | LoadState::Failed(_) => {}
        }

        let free_slots = self
            .config
            .max_concurrent_loads
            .saturating_sub(self.in_flight.len());
        if self.queue.len() >= self.config.max_queued_loads + free_slots {
            return Err(LoadError::QueueFull);
        }

        let request = FetchRequest {
            key,
            path: node.path(),
            num_points: node.num_points(),
            bounds: *node.bounds(),
        };
        let (settler, result) = deferred();
        let attempt = store.record_load_attempt(key.node);
        store.set_load_state(key.node, LoadState::Loading(result.clone()));
        self.queue.push_back(PendingLoad {
            request,
            settler,
            requested_frame: frame,
        });
        tracing::debug!(%key, path = %request.path, attempt, "queued load");

        Ok(result)
    }

    /// Starts queued loads, oldest first, until the concurrency cap is reached. Returns the number started.
    pub fn dispatch(&mut self) -> usize {
        let mut num_started = 0;
        while self.in_flight.len() < self.config.max_concurrent_loads {
            let load = match self.queue.pop_front() {
                Some(load) => load,
                None => break,
            };
            let ticket = LoadTicket(self.next_ticket);
            self.next_ticket += 1;
            let key = load.request.key;

            let fetch = self.fetcher.fetch_and_parse(load.request);
            let tx = self.completion_tx.clone();
            let send = move |result: Result<FetchedGeometry<F::Geometry>, FetchError>| {
                let result = result.map_err(|cause| LoadError::LoadFailed { key, cause });
                // The receiver only goes away with the loader.
                let _ = tx.unbounded_send(Completion { ticket, result });
            };

            let spawned = if self.config.ordered_completions {
                let slot = self.sequencer.get_sequencer();
                self.spawner.spawn(async move {
                    slot.run(fetch, send).await;
                })
            } else {
                self.spawner.spawn(async move {
                    send(fetch.await);
                })
            };

            if let Err(e) = spawned {
                tracing::warn!(%key, error = %e, "failed to spawn fetch");
                let _ = self.completion_tx.unbounded_send(Completion {
                    ticket,
                    result: Err(LoadError::Spawn(e.to_string())),
                });
            }
            tracing::trace!(%key, ticket = ticket.0, "dispatched load");
            self.in_flight.insert(ticket, load);
            num_started += 1;
        }

        num_started
    }

    /// Applies every completion received so far: successful loads become `Loaded` and are inserted into `lru` (which may
    /// evict), failed loads become `Failed`. The deferred result of each load is settled afterwards.
    pub fn process_completions(
        &mut self,
        stores: &mut NodeStores,
        lru: &mut LruCache<NodeKey, F::Geometry>,
        frame: u64,
    ) -> CompletionSummary<F::Geometry> {
        let mut summary = CompletionSummary::default();

        while let Ok(Some(completion)) = self.completion_rx.try_next() {
            let load = match self.in_flight.remove(&completion.ticket) {
                Some(load) => load,
                None => {
                    // Abandoned or disposed while in flight.
                    tracing::trace!(ticket = completion.ticket.0, "dropping orphaned completion");
                    continue;
                }
            };
            let key = load.request.key;

            let store = match stores.get_mut(&key.cloud) {
                Some(store) => store,
                None => {
                    let _ = load.settler.reject(LoadError::Disposed(key));
                    continue;
                }
            };

            match completion.result {
                Ok(FetchedGeometry { geometry, cost }) => {
                    store.set_load_state(key.node, LoadState::Loaded { cost });
                    let report = lru.insert(key, geometry, cost);
                    if report.replaced.is_some() {
                        tracing::error!(%key, "loaded geometry replaced resident geometry");
                    }
                    mark_unloaded(stores, report.evicted.iter().map(|(k, _)| *k));
                    tracing::debug!(%key, cost, num_evicted = report.evicted.len(), "loaded");

                    summary.loaded.push(key);
                    summary.evicted.extend(report.evicted);
                    summary.warnings.extend(report.warnings);
                    let _ = load.settler.resolve(key);
                }
                Err(error) => {
                    let attempts = store.node(key.node).map_or(1, |n| n.load_attempts());
                    store.set_load_state(
                        key.node,
                        LoadState::Failed(FailedLoad {
                            error: error.clone(),
                            attempts,
                            failed_frame: frame,
                        }),
                    );
                    tracing::warn!(%key, attempts, %error, "load failed");

                    summary.failed.push((key, error.clone()));
                    let _ = load.settler.reject(error);
                }
            }
        }

        summary
    }

    /// Abandons loads requested at least `stale_load_frames` ago that are not in `wanted`. Their nodes go back to
    /// `Unloaded` and their concurrency slots are freed; a late completion is dropped.
    pub fn abandon_stale(
        &mut self,
        stores: &mut NodeStores,
        frame: u64,
        wanted: &SmallKeyHashSet<NodeKey>,
    ) -> Vec<NodeKey> {
        let stale_frames = match self.config.stale_load_frames {
            Some(f) => f,
            None => return Vec::new(),
        };
        let is_stale = |load: &PendingLoad| {
            load.requested_frame + stale_frames <= frame && !wanted.contains(&load.request.key)
        };

        let mut abandoned = Vec::new();
        let mut kept = VecDeque::with_capacity(self.queue.len());
        for load in self.queue.drain(..) {
            if is_stale(&load) {
                abandoned.push(load);
            } else {
                kept.push_back(load);
            }
        }
        self.queue = kept;

        let stale_tickets: Vec<LoadTicket> = self
            .in_flight
            .iter()
            .filter(|(_, load)| is_stale(load))
            .map(|(ticket, _)| *ticket)
            .collect();
        abandoned.extend(
            stale_tickets
                .into_iter()
                .filter_map(|ticket| self.in_flight.remove(&ticket)),
        );

        let keys: Vec<NodeKey> = abandoned.iter().map(|load| load.request.key).collect();
        mark_unloaded(stores, keys.iter().copied());
        for load in abandoned {
            let key = load.request.key;
            tracing::debug!(%key, requested_frame = load.requested_frame, "abandoned stale load");
            let _ = load.settler.reject(LoadError::Abandoned(key));
        }

        keys
    }

    /// Forgets every queued and in-flight load of `cloud`, rejecting them with `Disposed`.
    pub fn cancel_cloud(&mut self, cloud: PointCloudId) -> usize {
        let mut cancelled = Vec::new();

        let mut kept = VecDeque::with_capacity(self.queue.len());
        for load in self.queue.drain(..) {
            if load.request.key.cloud == cloud {
                cancelled.push(load);
            } else {
                kept.push_back(load);
            }
        }
        self.queue = kept;

        let tickets: Vec<LoadTicket> = self
            .in_flight
            .iter()
            .filter(|(_, load)| load.request.key.cloud == cloud)
            .map(|(ticket, _)| *ticket)
            .collect();
        cancelled.extend(
            tickets
                .into_iter()
                .filter_map(|ticket| self.in_flight.remove(&ticket)),
        );

        let num_cancelled = cancelled.len();
        for load in cancelled {
            let _ = load
                .settler
                .reject(LoadError::Disposed(load.request.key));
        }

        num_cancelled
    }
}

/// The eviction half of the load state machine: `Loaded -> Unloaded`, or `Loading -> Unloaded` for abandoned loads.
pub(crate) fn mark_unloaded(stores: &mut NodeStores, keys: impl Iterator<Item = NodeKey>) {
    for key in keys {
        if let Some(store) = stores.get_mut(&key.cloud) {
            store.set_load_state(key.node, LoadState::Unloaded);
        }
    }
}

// ████████╗███████╗███████╗████████╗███████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝
//    ██║   █████╗  ███████╗   ██║   ███████╗
//    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║
//    ██║   ███████╗███████║   ██║   ███████║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        deferred::DeferredStatus,
        test_util::{unit_cube, CountingHierarchy, ManualFetcher},
    };

    use futures::executor::LocalPool;
    use pretty_assertions::assert_eq;

    const CLOUD: PointCloudId = PointCloudId(0);

    struct Fixture {
        pool: LocalPool,
        fetcher: ManualFetcher,
        loader: NodeLoader<ManualFetcher>,
        stores: NodeStores,
        lru: LruCache<NodeKey, NodePath>,
        nodes: Vec<NodeKey>,
    }

    impl Fixture {
        fn new(config: LoaderConfig, budget: u64) -> Self {
            let pool = LocalPool::new();
            let fetcher = ManualFetcher::default();
            let loader = NodeLoader::new(fetcher.clone(), pool.spawner(), config);

            let mut store =
                OctreeNodeStore::new(unit_cube(), 10, CountingHierarchy::full(1, 10)).unwrap();
            let root = store.root();
            let children = store.children(root).unwrap().to_vec();
            let nodes = std::iter::once(root)
                .chain(children)
                .map(|id| NodeKey::new(CLOUD, id))
                .collect();

            let mut stores = NodeStores::default();
            stores.insert(CLOUD, store);

            Self {
                pool,
                fetcher,
                loader,
                stores,
                lru: LruCache::new(budget),
                nodes,
            }
        }

        fn state(&self, key: NodeKey) -> LoadState {
            self.stores[&key.cloud].load_state(key.node).unwrap().clone()
        }

        fn request(
            &mut self,
            key: NodeKey,
            frame: u64,
        ) -> Result<DeferredResult<NodeKey, LoadError>, LoadError> {
            self.loader.request(&mut self.stores, key, frame)
        }

        fn complete(&mut self, frame: u64) -> CompletionSummary<NodePath> {
            self.pool.run_until_stalled();
            self.loader
                .process_completions(&mut self.stores, &mut self.lru, frame)
        }
    }

    #[test]
    fn load_goes_through_loading_to_loaded() {
        let mut f = Fixture::new(LoaderConfig::default(), 1000);
        let key = f.nodes[0];

        let result = f.request(key, 0).unwrap();
        assert_eq!(f.state(key), LoadState::Loading(result.clone()));
        assert_eq!(f.loader.dispatch(), 1);
        assert_eq!(f.fetcher.pending_keys(), vec![key]);

        assert!(f.fetcher.succeed(key));
        let summary = f.complete(1);

        assert_eq!(summary.loaded, vec![key]);
        assert_eq!(f.state(key), LoadState::Loaded { cost: 10 });
        assert_eq!(f.lru.get(&key), Some(&NodePath::ROOT));
        assert_eq!(result.try_result(), Some(Ok(key)));
        assert!(f.loader.is_idle());
    }

    #[test]
    fn second_request_while_loading_or_loaded_is_rejected() {
        let mut f = Fixture::new(LoaderConfig::default(), 1000);
        let key = f.nodes[1];

        f.request(key, 0).unwrap();
        assert_eq!(f.request(key, 0), Err(LoadError::DuplicateLoadRequest(key)));

        f.loader.dispatch();
        f.fetcher.succeed(key);
        f.complete(0);
        assert_eq!(f.request(key, 1), Err(LoadError::DuplicateLoadRequest(key)));
        assert_eq!(f.fetcher.num_fetches(), 1);
    }

    #[test]
    fn concurrency_cap_queues_in_fifo_order() {
        let config = LoaderConfig {
            max_concurrent_loads: 2,
            ..Default::default()
        };
        let mut f = Fixture::new(config, 1000);
        let keys: Vec<NodeKey> = f.nodes[1..5].to_vec();

        for &key in &keys {
            f.request(key, 0).unwrap();
        }
        assert_eq!(f.loader.dispatch(), 2);
        assert_eq!(f.fetcher.pending_keys(), keys[..2].to_vec());
        assert_eq!(f.loader.num_queued(), 2);

        f.fetcher.succeed(keys[1]);
        f.complete(0);
        assert_eq!(f.loader.dispatch(), 1);
        assert_eq!(f.fetcher.pending_keys(), vec![keys[0], keys[2]]);
    }

    #[test]
    fn full_queue_defers_request() {
        let config = LoaderConfig {
            max_concurrent_loads: 1,
            max_queued_loads: 1,
            ..Default::default()
        };
        let mut f = Fixture::new(config, 1000);

        f.request(f.nodes[1], 0).unwrap();
        f.request(f.nodes[2], 0).unwrap();
        assert_eq!(f.request(f.nodes[3], 0), Err(LoadError::QueueFull));
        assert_eq!(f.state(f.nodes[3]), LoadState::Unloaded);
    }

    #[test]
    fn failure_is_recorded_without_retry() {
        let mut f = Fixture::new(LoaderConfig::default(), 1000);
        let key = f.nodes[2];

        let result = f.request(key, 3).unwrap();
        f.loader.dispatch();
        f.fetcher.fail(key, "404");
        let summary = f.complete(4);

        let error = LoadError::LoadFailed {
            key,
            cause: FetchError::new("404"),
        };
        assert_eq!(summary.failed, vec![(key, error.clone())]);
        assert_eq!(
            f.state(key),
            LoadState::Failed(FailedLoad {
                error: error.clone(),
                attempts: 1,
                failed_frame: 4
            })
        );
        assert_eq!(result.try_result(), Some(Err(error)));
        assert_eq!(f.fetcher.num_fetches(), 1);
        assert!(!f.lru.contains(&key));

        // The owner may try again.
        f.request(key, 40).unwrap();
        assert_eq!(
            f.stores[&CLOUD].node(key.node).unwrap().load_attempts(),
            2
        );
    }

    #[test]
    fn completion_evicts_and_unloads_cold_nodes() {
        let mut f = Fixture::new(LoaderConfig::default(), 20);
        let keys: Vec<NodeKey> = f.nodes[1..4].to_vec();

        for &key in &keys {
            f.request(key, 0).unwrap();
            f.loader.dispatch();
            f.fetcher.succeed(key);
            f.complete(0);
        }

        assert_eq!(f.state(keys[0]), LoadState::Unloaded);
        assert_eq!(f.state(keys[2]), LoadState::Loaded { cost: 10 });
        assert_eq!(f.lru.total_cost(), 20);
    }

    #[test]
    fn stale_unwanted_loads_are_abandoned() {
        let config = LoaderConfig {
            max_concurrent_loads: 1,
            stale_load_frames: Some(10),
            ..Default::default()
        };
        let mut f = Fixture::new(config, 1000);
        let (in_flight, queued, wanted) = (f.nodes[1], f.nodes[2], f.nodes[3]);

        let in_flight_result = f.request(in_flight, 0).unwrap();
        f.loader.dispatch();
        let queued_result = f.request(queued, 0).unwrap();
        f.request(wanted, 0).unwrap();

        let mut wanted_set = SmallKeyHashSet::default();
        wanted_set.insert(wanted);
        assert!(f.loader.abandon_stale(&mut f.stores, 9, &wanted_set).is_empty());

        let mut abandoned = f.loader.abandon_stale(&mut f.stores, 10, &wanted_set);
        abandoned.sort();
        assert_eq!(abandoned, vec![in_flight, queued]);
        assert_eq!(
            in_flight_result.try_result(),
            Some(Err(LoadError::Abandoned(in_flight)))
        );
        assert_eq!(queued_result.status(), DeferredStatus::Rejected);
        assert_eq!(f.state(in_flight), LoadState::Unloaded);

        // The freed slot goes to the wanted load, and the late completion is ignored.
        assert_eq!(f.loader.dispatch(), 1);
        f.fetcher.succeed(in_flight);
        let summary = f.complete(11);
        assert!(summary.loaded.is_empty());
        assert!(!f.lru.contains(&in_flight));
    }

    #[test]
    fn ordered_completions_follow_dispatch_order() {
        let config = LoaderConfig {
            ordered_completions: true,
            ..Default::default()
        };
        let mut f = Fixture::new(config, 1000);
        let (first, second) = (f.nodes[1], f.nodes[2]);

        f.request(first, 0).unwrap();
        f.request(second, 0).unwrap();
        f.loader.dispatch();

        f.fetcher.succeed(second);
        let summary = f.complete(0);
        assert!(summary.loaded.is_empty());

        f.fetcher.succeed(first);
        let summary = f.complete(0);
        assert_eq!(summary.loaded, vec![first, second]);
    }

    #[test]
    fn cancelling_a_cloud_rejects_its_loads() {
        let mut f = Fixture::new(LoaderConfig::default(), 1000);
        let key = f.nodes[0];

        let result = f.request(key, 0).unwrap();
        f.loader.dispatch();

        assert_eq!(f.loader.cancel_cloud(CLOUD), 1);
        assert_eq!(result.try_result(), Some(Err(LoadError::Disposed(key))));
        assert!(f.loader.is_idle());
    }

    #[test]
    fn unknown_nodes_are_reported() {
        let mut f = Fixture::new(LoaderConfig::default(), 1000);
        let other = NodeKey::new(PointCloudId(9), f.nodes[0].node);

        assert_eq!(
            f.request(other, 0),
            Err(LoadError::UnknownPointCloud(PointCloudId(9)))
        );
    }
}
