//! The seam between the drain logic and the Kubernetes API.
//!
//! Everything the drain needs from the cluster is expressed through [`ResourceClient`], so that tests can
//! substitute a mock for the real API server.
mod error;
mod k8s;

pub use self::error::{Error, Result};
pub use self::k8s::K8SResourceClient;

use crate::constants;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use std::fmt;

#[cfg(any(test, feature = "mockall"))]
use mockall::mock;

/// The API version used to submit Evictions.
///
/// Older clusters only serve `policy/v1beta1` Evictions; `policy/v1` is available since Kubernetes 1.22.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum EvictionApi {
    #[default]
    V1,
    V1Beta1,
}

impl EvictionApi {
    pub fn version(&self) -> &'static str {
        match self {
            Self::V1 => "v1",
            Self::V1Beta1 => "v1beta1",
        }
    }

    /// The `apiVersion` of an Eviction object submitted with this API.
    pub fn group_version(&self) -> String {
        format!("{}/{}", constants::POLICY_GROUP, self.version())
    }
}

impl fmt::Display for EvictionApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.group_version())
    }
}

/// The API server's answer to an Eviction request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum EvictionResponse {
    /// The eviction was accepted; the Pod will be deleted.
    Accepted,
    /// The eviction would violate a PodDisruptionBudget, or budgets are misconfigured. May succeed later.
    Conflict { message: String },
    /// The Pod no longer exists.
    Gone,
    /// The eviction subresource is not served for the requested API version.
    Unsupported,
}

/// The API server's answer to a Pod deletion.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DeleteResponse {
    Accepted,
    Gone,
}

#[async_trait]
/// A trait providing the Kubernetes operations needed to drain a Node. This is provided as a trait
/// in order to allow mocks to be used for testing purposes.
pub trait ResourceClient: Send + Sync {
    /// Fetch a Node. Fails with [`Error::NotFound`] if it does not exist.
    async fn get_node(&self, name: &str) -> Result<Node>;
    /// Set `spec.unschedulable` on a Node with a merge patch, leaving all other fields untouched.
    async fn patch_node_unschedulable(&self, name: &str, unschedulable: bool) -> Result<Node>;
    /// List Pods in all namespaces matching a field selector.
    async fn list_pods(&self, field_selector: &str) -> Result<Vec<Pod>>;
    /// List the `group/version` strings the cluster serves for an API group.
    async fn supported_versions(&self, group: &str) -> Result<Vec<String>>;
    /// Submit an Eviction for a Pod.
    async fn create_eviction(
        &self,
        api: EvictionApi,
        namespace: &str,
        name: &str,
        grace_period_seconds: Option<u32>,
    ) -> Result<EvictionResponse>;
    /// Delete a Pod outright, bypassing PodDisruptionBudgets.
    async fn delete_pod(
        &self,
        namespace: &str,
        name: &str,
        grace_period_seconds: Option<u32>,
    ) -> Result<DeleteResponse>;
    /// Fetch a Pod, returning `None` if it does not exist.
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>>;
}

#[cfg(any(test, feature = "mockall"))]
mock! {
    /// A Mock ResourceClient for use in tests.
    pub ResourceClient {}
    #[async_trait]
    impl ResourceClient for ResourceClient {
        async fn get_node(&self, name: &str) -> Result<Node>;
        async fn patch_node_unschedulable(&self, name: &str, unschedulable: bool) -> Result<Node>;
        async fn list_pods(&self, field_selector: &str) -> Result<Vec<Pod>>;
        async fn supported_versions(&self, group: &str) -> Result<Vec<String>>;
        async fn create_eviction(
            &self,
            api: EvictionApi,
            namespace: &str,
            name: &str,
            grace_period_seconds: Option<u32>,
        ) -> Result<EvictionResponse>;
        async fn delete_pod(
            &self,
            namespace: &str,
            name: &str,
            grace_period_seconds: Option<u32>,
        ) -> Result<DeleteResponse>;
        async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>>;
    }
}
