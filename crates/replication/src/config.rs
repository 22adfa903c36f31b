//! Node configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timing and behaviour knobs of a [`Node`](crate::Node).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Interval at which the primary and backup watchers ping their peers.
    ///
    /// default: `50 milliseconds`
    pub poll_interval: Duration,
    /// Sleep between join attempts, whether the session was full or the
    /// tracker handed out a member that knew no primary.
    ///
    /// default: `500 milliseconds`
    pub join_backoff: Duration,
    /// Sleep between attempts to reach the primary with a move.
    ///
    /// default: `100 milliseconds`
    pub move_retry: Duration,
    /// After this many consecutive failed attempts against the cached
    /// primary, ask the tracker's contact and the known members who the
    /// primary is. `None` retries the cached primary forever.
    ///
    /// default: `None`
    pub rediscovery_after: Option<u32>,
    /// Seed for board placement. `None` seeds from the OS.
    ///
    /// default: `None`
    pub seed: Option<u64>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            poll_interval: Duration::from_millis(50),
            join_backoff: Duration::from_millis(500),
            move_retry: Duration::from_millis(100),
            rediscovery_after: None,
            seed: None,
        }
    }
}
