//! Selects which Pods on a Node are removed during a drain, and how.
use super::config::DrainConfig;
use super::error::DrainError;
use super::outcome::{PodKey, SkipReason};
use crate::client::{self, ResourceClient};
use crate::constants;

use k8s_openapi::api::core::v1::Pod;
use tracing::{event, instrument, Level};

/// The kinds of controller which can own a Pod.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ControllerKind {
    DaemonSet,
    ReplicaSet,
    StatefulSet,
    Job,
    ReplicationController,
    /// Any other controller, such as a custom operator. These are assumed to reschedule their Pods.
    Other,
}

impl ControllerKind {
    fn from_kind(kind: &str) -> Self {
        match kind {
            "DaemonSet" => Self::DaemonSet,
            "ReplicaSet" => Self::ReplicaSet,
            "StatefulSet" => Self::StatefulSet,
            "Job" => Self::Job,
            "ReplicationController" => Self::ReplicationController,
            _ => Self::Other,
        }
    }

    /// Whether Pods of this controller are bound to their Node and cannot be recreated elsewhere.
    /// The DaemonSet controller also ignores Node cordons, so evicting its Pods would only cause churn.
    pub fn is_node_local(&self) -> bool {
        matches!(self, Self::DaemonSet)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Ownership {
    Controlled(ControllerKind),
    Unmanaged,
}

/// Finds the controller of a Pod. Owner references which are not marked as the controller are ignored.
pub fn ownership(pod: &Pod) -> Ownership {
    pod.metadata
        .owner_references
        .iter()
        .flatten()
        .find(|reference| reference.controller == Some(true))
        .map_or(Ownership::Unmanaged, |reference| {
            Ownership::Controlled(ControllerKind::from_kind(&reference.kind))
        })
}

/// What the drain does with a Pod.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PodAction {
    Evict,
    ForceDelete,
    Skip(SkipReason),
}

/// A Pod found on the Node being drained, along with the action to take on it.
#[derive(Clone, Debug)]
pub struct DrainTarget {
    pub key: PodKey,
    pub pod: Pod,
    pub action: PodAction,
}

impl DrainTarget {
    fn new(pod: Pod, config: &DrainConfig) -> Self {
        DrainTarget {
            key: PodKey::from_pod(&pod),
            action: classify(&pod, config),
            pod,
        }
    }
}

pub(crate) fn is_terminal(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|status| status.phase.as_deref())
        .map_or(false, |phase| {
            phase == constants::POD_PHASE_SUCCEEDED || phase == constants::POD_PHASE_FAILED
        })
}

fn is_mirror(pod: &Pod) -> bool {
    pod.metadata
        .annotations
        .as_ref()
        .map_or(false, |annotations| {
            annotations.contains_key(constants::MIRROR_POD_ANNOTATION)
        })
}

/// Decides what to do with a Pod. Rules are checked in order:
/// * Completed Pods stay; they no longer occupy the Node.
/// * Static Mirror Pods stay; they cannot be controlled through the API.
/// * Pods of node-local controllers (DaemonSets) stay unless `ignore_local_workloads` is set, in which case they
///   are deleted.
/// * Pods without a controller stay unless `force` is set, in which case they are deleted.
/// * Everything else is evicted.
pub fn classify(pod: &Pod, config: &DrainConfig) -> PodAction {
    if is_terminal(pod) {
        return PodAction::Skip(SkipReason::Terminal);
    }

    if is_mirror(pod) {
        return PodAction::Skip(SkipReason::Mirror);
    }

    match ownership(pod) {
        Ownership::Controlled(kind) if kind.is_node_local() => {
            if config.ignore_local_workloads {
                PodAction::ForceDelete
            } else {
                PodAction::Skip(SkipReason::LocalWorkload(kind))
            }
        }
        Ownership::Controlled(_) => PodAction::Evict,
        Ownership::Unmanaged => {
            if config.force {
                PodAction::ForceDelete
            } else {
                PodAction::Skip(SkipReason::Unmanaged)
            }
        }
    }
}

/// Finds all Pods bound to the Node and classifies each of them.
#[instrument(skip(k8s_client, config), err)]
pub(crate) async fn list_drain_targets<C: ResourceClient>(
    k8s_client: &C,
    node_name: &str,
    config: &DrainConfig,
) -> Result<Vec<DrainTarget>, DrainError> {
    let field_selector = format!("{}={}", constants::POD_NODE_NAME_FIELD, node_name);

    let pods = k8s_client
        .list_pods(&field_selector)
        .await
        .map_err(|source| match source {
            source @ client::Error::Forbidden { .. } => DrainError::Forbidden {
                node_name: node_name.to_string(),
                source,
            },
            source => DrainError::ListPods {
                node_name: node_name.to_string(),
                source,
            },
        })?;

    let targets: Vec<DrainTarget> = pods
        .into_iter()
        .map(|pod| DrainTarget::new(pod, config))
        .collect();

    for target in targets.iter() {
        match target.action {
            PodAction::Skip(reason) => {
                event!(Level::INFO, "Not draining Pod '{}': {}", target.key, reason)
            }
            PodAction::ForceDelete => event!(
                Level::WARN,
                "Pod '{}' will be deleted without respecting PodDisruptionBudgets.",
                target.key
            ),
            PodAction::Evict => event!(Level::DEBUG, "Pod '{}' will be evicted.", target.key),
        }
    }

    Ok(targets)
}
