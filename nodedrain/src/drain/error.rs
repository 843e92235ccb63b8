use super::outcome::PodKey;
use crate::client;

use snafu::Snafu;
use std::time::Duration;

/// Formats an optional session timeout for error messages.
fn describe_timeout(timeout: &Option<Duration>) -> String {
    match timeout {
        Some(timeout) => format!("{:.2}s", timeout.as_secs_f64()),
        None => "no timeout".to_string(),
    }
}

/// Errors which prevent a drain from starting. No partial drain result is produced.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DrainError {
    #[snafu(display("Node '{}' does not exist.", node_name))]
    NodeNotFound { node_name: String },

    #[snafu(display("Not permitted to drain Node '{}': '{}'", node_name, source))]
    Forbidden {
        node_name: String,
        source: client::Error,
    },

    #[snafu(display("Unable to update schedulability of Node '{}': '{}'", node_name, source))]
    Cordon {
        node_name: String,
        source: client::Error,
    },

    #[snafu(display("Unable to find drainable Pods for Node '{}': '{}'", node_name, source))]
    ListPods {
        node_name: String,
        source: client::Error,
    },

    #[snafu(display("Unable to discover the Eviction API served by the cluster: '{}'", source))]
    Discovery { source: client::Error },
}

/// Errors local to a single Pod. These are recorded in the drain result and never abort the drain.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PodDrainError {
    #[snafu(display(
        "Eviction of Pod '{}' was refused by a PodDisruptionBudget {} times before the deadline ({}): '{}'",
        pod,
        attempts,
        describe_timeout(timeout),
        message
    ))]
    RetriesExhausted {
        pod: PodKey,
        attempts: u32,
        timeout: Option<Duration>,
        message: String,
    },

    #[snafu(display(
        "Pod '{}' was not deleted in the time allocated ({}).",
        pod,
        describe_timeout(timeout)
    ))]
    DrainTimeout {
        pod: PodKey,
        timeout: Option<Duration>,
    },

    #[snafu(display("Not permitted to evict Pod '{}': '{}'", pod, source))]
    EvictionForbidden { pod: PodKey, source: client::Error },

    #[snafu(display("Unable to create eviction for Pod '{}': '{}'", pod, source))]
    Eviction { pod: PodKey, source: client::Error },

    #[snafu(display("Unable to delete Pod '{}': '{}'", pod, source))]
    Delete { pod: PodKey, source: client::Error },
}

/// Maps a client error on a Node-level operation into a session error.
pub(crate) fn node_error(
    node_name: &str,
    source: client::Error,
    other: impl FnOnce(String, client::Error) -> DrainError,
) -> DrainError {
    match source {
        client::Error::NotFound { .. } => DrainError::NodeNotFound {
            node_name: node_name.to_string(),
        },
        source @ client::Error::Forbidden { .. } => DrainError::Forbidden {
            node_name: node_name.to_string(),
            source,
        },
        source => other(node_name.to_string(), source),
    }
}
