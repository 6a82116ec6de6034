use crate::{NodeId, NodeKey, NodePath, PointCloudId};

/// A failure reported by the injected fetch-and-parse function.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct FetchError {
    pub message: String,
}

impl FetchError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Why a node's geometry is not (or will not become) resident.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum LoadError {
    /// The caller asked to load a node that is already `Loading` or `Loaded`.
    #[error("duplicate load request for {0}")]
    DuplicateLoadRequest(NodeKey),

    /// The FIFO queue behind the concurrency cap is full. The request should be retried on a later frame.
    #[error("load queue is full")]
    QueueFull,

    #[error("failed to load {key}: {cause}")]
    LoadFailed { key: NodeKey, cause: FetchError },

    /// The load was pending for too long while nothing wanted the node.
    #[error("load of {0} was abandoned")]
    Abandoned(NodeKey),

    /// The owning point cloud was disposed before the load finished.
    #[error("point cloud of {0} was disposed")]
    Disposed(NodeKey),

    #[error("failed to spawn fetch task: {0}")]
    Spawn(String),

    #[error("unknown point cloud {0}")]
    UnknownPointCloud(PointCloudId),

    #[error("node {0} does not exist")]
    UnknownNode(NodeKey),
}

/// Corrupt or unreadable octree metadata. Fatal for the subtree below `path` only.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum HierarchyError {
    #[error("corrupt hierarchy below {path}: {reason}")]
    Corrupt { path: NodePath, reason: String },

    #[error("hierarchy source failed below {path}: {message}")]
    Source { path: NodePath, message: String },

    #[error("node {0} does not exist")]
    UnknownNode(NodeId),
}

impl HierarchyError {
    pub fn path(&self) -> Option<NodePath> {
        match self {
            Self::Corrupt { path, .. } | Self::Source { path, .. } => Some(*path),
            Self::UnknownNode(_) => None,
        }
    }

    /// Corrupt metadata never gets better, but a failing source might.
    pub fn is_permanent(&self) -> bool {
        !matches!(self, Self::Source { .. })
    }
}

/// A `DeferredResult` can only be settled once.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum SettleError {
    #[error("deferred result was already settled")]
    AlreadySettled,
}

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("max_concurrent_loads must be at least 1")]
    NoConcurrentLoads,

    #[error("min_node_pixel_size must be finite and non-negative, got {0}")]
    InvalidPixelSize(f32),

    #[error("retry.max_attempts must be at least 1")]
    NoLoadAttempts,
}
