//! Safely evacuates workloads from a Kubernetes Node, similar to `kubectl drain`.
//!
//! [`drain::drain`] cordons a Node and evicts the Pods bound to it, respecting PodDisruptionBudgets. All
//! cluster access goes through [`client::ResourceClient`], which is implemented against the Kubernetes API by
//! [`client::K8SResourceClient`].
pub mod client;
pub mod constants;
pub mod drain;
pub mod telemetry;
