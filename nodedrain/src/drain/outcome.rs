use super::error::PodDrainError;
use super::filter::ControllerKind;

use k8s_openapi::api::core::v1::{Node, Pod};
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::fmt;

/// Identifies a Pod within the cluster.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PodKey {
    pub namespace: String,
    pub name: String,
}

impl PodKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        PodKey {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn from_pod(pod: &Pod) -> Self {
        // Pods are always namespaced; an absent namespace only shows up in hand-built objects.
        PodKey::new(
            pod.namespace().unwrap_or_else(|| "default".to_string()),
            pod.name_any(),
        )
    }
}

impl fmt::Display for PodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Why a Pod was left on the Node.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SkipReason {
    /// The Pod has already run to completion.
    Terminal,
    /// A static Pod managed by the kubelet; the API only holds a mirror of it.
    Mirror,
    /// The Pod belongs to a controller which places Pods on specific Nodes.
    LocalWorkload(ControllerKind),
    /// Nothing would recreate the Pod elsewhere.
    Unmanaged,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Terminal => write!(f, "Pod has terminated"),
            Self::Mirror => write!(f, "Pod is a static Mirror Pod"),
            Self::LocalWorkload(kind) => write!(f, "Pod is a member of a {:?}", kind),
            Self::Unmanaged => write!(f, "Pod is not managed by a controller"),
        }
    }
}

/// How a Pod was removed from the Node.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Removal {
    Eviction,
    Deletion,
}

/// The final state of one Pod after a drain.
#[derive(Debug)]
pub enum PodOutcome {
    Evicted { via: Removal },
    Skipped { reason: SkipReason },
    Failed { error: PodDrainError },
}

impl PodOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// The result of a drain which was able to start. Pods may still have failed individually.
#[derive(Debug)]
pub struct DrainResult {
    /// The Node as observed after cordoning.
    pub node: Node,
    /// One entry per Pod found on the Node.
    pub outcomes: BTreeMap<PodKey, PodOutcome>,
}

impl DrainResult {
    pub fn evicted(&self) -> impl Iterator<Item = (&PodKey, Removal)> {
        self.outcomes.iter().filter_map(|(key, outcome)| match outcome {
            PodOutcome::Evicted { via } => Some((key, *via)),
            _ => None,
        })
    }

    pub fn skipped(&self) -> impl Iterator<Item = (&PodKey, SkipReason)> {
        self.outcomes.iter().filter_map(|(key, outcome)| match outcome {
            PodOutcome::Skipped { reason } => Some((key, *reason)),
            _ => None,
        })
    }

    pub fn failed(&self) -> impl Iterator<Item = (&PodKey, &PodDrainError)> {
        self.outcomes.iter().filter_map(|(key, outcome)| match outcome {
            PodOutcome::Failed { error } => Some((key, error)),
            _ => None,
        })
    }

    /// Whether every Pod was either removed or deliberately left in place.
    pub fn is_complete(&self) -> bool {
        !self.outcomes.values().any(PodOutcome::is_failure)
    }
}

impl fmt::Display for DrainResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Node '{}': {} of {} Pods removed, {} skipped, {} failed",
            self.node.name_any(),
            self.evicted().count(),
            self.outcomes.len(),
            self.skipped().count(),
            self.failed().count()
        )
    }
}
