//! Determines how Pods are removed from the Node.
//!
//! Evictions are served under the `policy` API group, which has moved from `v1beta1` to `v1` across Kubernetes
//! releases. Clusters that serve neither can only have Pods deleted.
use super::config::DrainConfig;
use super::error::DrainError;
use crate::client::{EvictionApi, ResourceClient};
use crate::constants;

use tracing::{event, instrument, Level};

/// How the drain removes Pods which are eligible for eviction.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RemovalStrategy {
    Evict(EvictionApi),
    Delete,
}

/// Holds the removal strategy for one drain, resolving it on first use.
#[derive(Debug, Default)]
pub(crate) struct EvictionDiscovery {
    resolved: Option<RemovalStrategy>,
}

impl EvictionDiscovery {
    pub(crate) async fn resolve<C: ResourceClient>(
        &mut self,
        k8s_client: &C,
        config: &DrainConfig,
    ) -> Result<RemovalStrategy, DrainError> {
        if let Some(strategy) = self.resolved {
            return Ok(strategy);
        }

        let strategy = if config.disable_eviction {
            RemovalStrategy::Delete
        } else if config.skip_discovery {
            RemovalStrategy::Evict(EvictionApi::default())
        } else {
            discover(k8s_client).await?
        };
        event!(Level::INFO, "Removing Pods using {:?}.", strategy);

        self.resolved = Some(strategy);
        Ok(strategy)
    }
}

#[instrument(skip(k8s_client), err)]
async fn discover<C: ResourceClient>(k8s_client: &C) -> Result<RemovalStrategy, DrainError> {
    let versions = k8s_client
        .supported_versions(constants::POLICY_GROUP)
        .await
        .map_err(|source| DrainError::Discovery { source })?;

    let served = |api: EvictionApi| versions.iter().any(|v| *v == api.group_version());
    let strategy = [EvictionApi::V1, EvictionApi::V1Beta1]
        .into_iter()
        .find(|api| served(*api))
        .map_or(RemovalStrategy::Delete, RemovalStrategy::Evict);

    if strategy == RemovalStrategy::Delete {
        event!(
            Level::WARN,
            "Cluster does not serve the Eviction API (found {:?}). Pods will be deleted instead.",
            versions
        );
    }
    Ok(strategy)
}
