//! Marks Nodes as (un)schedulable.
use super::error::{node_error, DrainError};
use crate::client::{self, ResourceClient};

use k8s_openapi::api::core::v1::Node;
use tracing::{event, instrument, Level};

fn is_unschedulable(node: &Node) -> bool {
    node.spec
        .as_ref()
        .and_then(|spec| spec.unschedulable)
        .unwrap_or(false)
}

/// Marks the given node as unschedulable, preventing Pods from being deployed onto it.
///
/// The patch is always sent, even if the Node already appears cordoned. Another actor may uncordon it at any time,
/// and the Node must be unschedulable before any Pod is removed.
pub async fn cordon<C: ResourceClient>(k8s_client: &C, node_name: &str) -> Result<Node, DrainError> {
    set_unschedulable(k8s_client, node_name, true).await
}

/// Marks the given node as scheduleable, allowing Pods to be deployed onto it.
#[instrument(skip(k8s_client), err)]
pub async fn uncordon<C: ResourceClient>(
    k8s_client: &C,
    node_name: &str,
) -> Result<Node, DrainError> {
    let node = k8s_client
        .get_node(node_name)
        .await
        .map_err(|source| cordon_error(node_name, source))?;
    if !is_unschedulable(&node) {
        event!(Level::INFO, "Node '{}' is not cordoned.", node_name);
    }

    set_unschedulable(k8s_client, node_name, false).await
}

fn cordon_error(node_name: &str, source: client::Error) -> DrainError {
    node_error(node_name, source, |node_name, source| DrainError::Cordon {
        node_name,
        source,
    })
}

/// Patches only `spec.unschedulable`, so concurrent edits to the Node by other controllers are left alone.
/// The merge patch is idempotent.
#[instrument(skip(k8s_client), err)]
async fn set_unschedulable<C: ResourceClient>(
    k8s_client: &C,
    node_name: &str,
    unschedulable: bool,
) -> Result<Node, DrainError> {
    let node = k8s_client
        .patch_node_unschedulable(node_name, unschedulable)
        .await
        .map_err(|source| cordon_error(node_name, source))?;
    event!(
        Level::INFO,
        "Set unschedulable={} on Node '{}'.",
        unschedulable,
        node_name
    );

    Ok(node)
}
