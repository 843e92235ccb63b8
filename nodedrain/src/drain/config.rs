use crate::constants;

use std::time::Duration;

/// Options controlling a single drain.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DrainConfig {
    /// Overrides each Pod's `terminationGracePeriodSeconds` when set.
    pub grace_period_seconds: Option<u32>,
    /// Delete Pods which have no controller to recreate them.
    pub force: bool,
    /// Delete Pods owned by node-local controllers such as DaemonSets.
    pub ignore_local_workloads: bool,
    /// Deadline for the whole drain, measured from its start. `None` waits indefinitely, as `kubectl drain` does.
    pub timeout: Option<Duration>,
    /// How often to check whether an evicted Pod is gone.
    pub poll_interval: Duration,
    /// Assume the cluster serves `policy/v1` Evictions rather than asking it.
    pub skip_discovery: bool,
    /// Delete Pods directly instead of evicting them. This bypasses PodDisruptionBudgets.
    pub disable_eviction: bool,
    /// Maximum number of Pods removed concurrently.
    pub concurrency: usize,
}

impl Default for DrainConfig {
    fn default() -> Self {
        DrainConfig {
            grace_period_seconds: None,
            force: false,
            ignore_local_workloads: false,
            timeout: None,
            poll_interval: constants::DELETION_CHECK_INTERVAL,
            skip_discovery: false,
            disable_eviction: false,
            concurrency: constants::CONCURRENT_EVICTIONS,
        }
    }
}
