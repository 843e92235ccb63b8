use tokio::time::Duration;

// Kubernetes object kinds and API groups used by the drain.
pub const NODE_KIND: &str = "Node";
pub const POD_KIND: &str = "Pod";
pub const POLICY_GROUP: &str = "policy";
pub const EVICTION_KIND: &str = "Eviction";
pub const EVICTION_SUBRESOURCE: &str = "eviction";

// Pods are selected by the node they are bound to.
pub const POD_NODE_NAME_FIELD: &str = "spec.nodeName";

// Static pods are surfaced to the API server as "mirror" pods carrying this annotation.
pub const MIRROR_POD_ANNOTATION: &str = "kubernetes.io/config.mirror";

// Pod phases.
pub const POD_PHASE_SUCCEEDED: &str = "Succeeded";
pub const POD_PHASE_FAILED: &str = "Failed";

// Maximum number of Pods to evict concurrently. Waiting for Pods to be deleted is included in this limitation.
// We don't want to generate too many TPS to Kubernetes, so this is kept low.
pub const CONCURRENT_EVICTIONS: usize = 5;

// After evictions are created, we poll for the Pods to disappear at this interval.
// `kubectl drain` checks at a similar rate.
pub const DELETION_CHECK_INTERVAL: Duration = Duration::from_secs(5);

// Evictions rejected due to a PodDisruptionBudget are retried with exponential backoff, doubling from
// the base delay up to the max delay. `kubectl drain` waits a fixed 5 seconds between attempts.
pub const EVICTION_RETRY_BASE_DELAY: Duration = Duration::from_millis(500);
pub const EVICTION_RETRY_MAX_DELAY: Duration = Duration::from_secs(5);
