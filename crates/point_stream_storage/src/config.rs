use crate::ConfigError;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub const DEFAULT_POINT_BUDGET: u64 = 1_000_000;
pub const DEFAULT_MAX_CONCURRENT_LOADS: usize = 4;
pub const DEFAULT_MAX_QUEUED_LOADS: usize = 32;
pub const DEFAULT_MAX_LOADS_TO_GPU: usize = 2;
pub const DEFAULT_MIN_NODE_PIXEL_SIZE: f32 = 50.0;

/// Tuning for the whole streaming system. All point clouds registered with one `VisibilityUpdateEngine` share these
/// limits.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize), serde(default))]
pub struct StreamingConfig {
    /// Maximum number of points that may be visible, and resident, at once.
    pub point_budget: u64,
    /// Maximum number of fetches in flight at once.
    pub max_concurrent_loads: usize,
    /// Capacity of the FIFO queue behind the concurrency cap. When full, load requests are deferred to a later frame.
    pub max_queued_loads: usize,
    /// Maximum number of newly loaded nodes handed to the renderer for upload in one frame.
    pub max_loads_to_gpu: usize,
    /// Nodes whose projected radius is smaller than this (in pixels) are culled along with their subtree.
    pub min_node_pixel_size: f32,
    pub retry: RetryPolicy,
    /// Pending loads older than this many frames are abandoned if the current frame no longer wants them.
    pub stale_load_frames: Option<u64>,
    /// Deliver load completions in dispatch order rather than completion order.
    pub ordered_completions: bool,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            point_budget: DEFAULT_POINT_BUDGET,
            max_concurrent_loads: DEFAULT_MAX_CONCURRENT_LOADS,
            max_queued_loads: DEFAULT_MAX_QUEUED_LOADS,
            max_loads_to_gpu: DEFAULT_MAX_LOADS_TO_GPU,
            min_node_pixel_size: DEFAULT_MIN_NODE_PIXEL_SIZE,
            retry: RetryPolicy::default(),
            stale_load_frames: Some(600),
            ordered_completions: false,
        }
    }
}

impl StreamingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_loads == 0 {
            return Err(ConfigError::NoConcurrentLoads);
        }
        if !self.min_node_pixel_size.is_finite() || self.min_node_pixel_size < 0.0 {
            return Err(ConfigError::InvalidPixelSize(self.min_node_pixel_size));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::NoLoadAttempts);
        }

        Ok(())
    }

    pub fn loader_config(&self) -> LoaderConfig {
        LoaderConfig {
            max_concurrent_loads: self.max_concurrent_loads,
            max_queued_loads: self.max_queued_loads,
            stale_load_frames: self.stale_load_frames,
            ordered_completions: self.ordered_completions,
        }
    }
}

/// The subset of `StreamingConfig` that the `NodeLoader` cares about.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LoaderConfig {
    pub max_concurrent_loads: usize,
    pub max_queued_loads: usize,
    pub stale_load_frames: Option<u64>,
    pub ordered_completions: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        StreamingConfig::default().loader_config()
    }
}

/// What to do about nodes whose load failed. Failed nodes are retried after a cooldown that doubles with every failed
/// attempt, and given up on after `max_attempts`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize), serde(default))]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub cooldown_frames: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            cooldown_frames: 30,
        }
    }
}

impl RetryPolicy {
    /// The first frame at which a node that failed `attempts` times (at `failed_frame`) may be requested again, or `None`
    /// if it should be given up on.
    pub fn next_attempt_frame(&self, failed_frame: u64, attempts: u32) -> Option<u64> {
        if attempts >= self.max_attempts {
            return None;
        }
        let doublings = attempts.saturating_sub(1).min(16);

        let cooldown = self.cooldown_frames.saturating_mul(1 << doublings);

        Some(failed_frame.saturating_add(cooldown))
    }
}

/// Per point cloud settings.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize), serde(default))]
pub struct PointCloudOptions {
    /// Invisible point clouds are not traversed at all.
    pub visible: bool,
    /// Nodes deeper than this are never shown.
    pub max_level: Option<u8>,
    /// Overrides `StreamingConfig::min_node_pixel_size` for this point cloud.
    pub min_node_pixel_size: Option<f32>,
}

impl Default for PointCloudOptions {
    fn default() -> Self {
        Self {
            visible: true,
            max_level: None,
            min_node_pixel_size: None,
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

    #[test]
    fn default_config_is_valid() {
        assert_eq!(StreamingConfig::default().validate(), Ok(()));
    }

    #[test]
    fn rejects_zero_concurrency() {
        let config = StreamingConfig {
            max_concurrent_loads: 0,
            ..Default::default()
        };

        assert_eq!(config.validate(), Err(ConfigError::NoConcurrentLoads));
    }

    #[test]
    fn retry_cooldown_doubles_then_gives_up() {
        let policy = RetryPolicy {
            max_attempts: 3,
            cooldown_frames: 10,
        };

        assert_eq!(policy.next_attempt_frame(100, 1), Some(110));
        assert_eq!(policy.next_attempt_frame(100, 2), Some(120));
        assert_eq!(policy.next_attempt_frame(100, 3), None);
    }

    #[test]
    fn huge_cooldown_saturates() {
        let policy = RetryPolicy {
            max_attempts: 10,
            cooldown_frames: u64::MAX / 2,
        };

        assert_eq!(policy.next_attempt_frame(0, 1), Some(u64::MAX / 2));
        assert_eq!(policy.next_attempt_frame(0, 3), Some(u64::MAX));
        assert_eq!(policy.next_attempt_frame(5, 2), Some(u64::MAX));
    }
}
