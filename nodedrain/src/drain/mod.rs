//! Provides an implementation for draining Pods from a Kubernetes Node, similar to `kubectl drain`.
//!
//! Draining in Kubernetes is done client side. A drain is a combination of "cordoning" a Node by marking it as
//! unschedulable, followed by evicting (or deleting, which is a distinct concept) the Pods bound to it. Evictions
//! respect PodDisruptionBudgets (PDBs); deletions do not.
//!
//! A drain runs in order:
//! 1. Decide how Pods are removed, asking the cluster which Eviction API it serves unless told not to.
//! 2. Cordon the Node. No Pod is touched before the Node is unschedulable.
//! 3. List the Pods bound to the Node and classify them.
//! 4. Remove the eligible Pods concurrently, waiting for each to disappear.
//!
//! Only failures which make the drain impossible to start are returned as errors. Failures removing a
//! single Pod are recorded in the [`DrainResult`] alongside the Pods which were drained successfully.
mod config;
mod cordon;
mod deadline;
mod discovery;
mod error;
mod evict;
mod filter;
mod outcome;

#[cfg(test)]
mod fixtures;

pub use self::config::DrainConfig;
pub use self::cordon::{cordon, uncordon};
pub use self::discovery::RemovalStrategy;
pub use self::error::{DrainError, PodDrainError};
pub use self::filter::{classify, ownership, ControllerKind, DrainTarget, Ownership, PodAction};
pub use self::outcome::{DrainResult, PodKey, PodOutcome, Removal, SkipReason};

use self::deadline::Deadline;
use self::discovery::EvictionDiscovery;
use self::evict::EvictionDriver;
use self::filter::list_drain_targets;
use crate::client::ResourceClient;

use futures::{stream, StreamExt};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{event, instrument, Level};

/// Drains a Node of all Pods which can be rescheduled elsewhere.
///
/// By default, we leave in place:
/// * Completed Pods - They no longer occupy the Node.
/// * Mirror Pods - These are static and cannot be controlled.
/// * DaemonSet Pods - The DaemonSet controller will not respect node cordons, so we don't battle it.
/// * Pods without a controller - Nothing would recreate them.
///
/// See [`DrainConfig`] for the options which remove the latter two.
#[instrument(skip(k8s_client, config), err)]
pub async fn drain<C: ResourceClient>(
    k8s_client: &C,
    node_name: &str,
    config: &DrainConfig,
) -> Result<DrainResult, DrainError> {
    let result = DrainSession::new(k8s_client, node_name, config).run().await?;
    event!(Level::INFO, "{}", result);
    Ok(result)
}

/// The state of one drain. Discarded once the drain finishes.
struct DrainSession<'a, C> {
    k8s_client: &'a C,
    node_name: &'a str,
    config: &'a DrainConfig,
    deadline: Deadline,
    discovery: EvictionDiscovery,
    outcomes: BTreeMap<PodKey, PodOutcome>,
}

impl<'a, C: ResourceClient> DrainSession<'a, C> {
    fn new(k8s_client: &'a C, node_name: &'a str, config: &'a DrainConfig) -> Self {
        DrainSession {
            k8s_client,
            node_name,
            config,
            deadline: Deadline::starting_now(config.timeout),
            discovery: EvictionDiscovery::default(),
            outcomes: BTreeMap::new(),
        }
    }

    async fn run(mut self) -> Result<DrainResult, DrainError> {
        let strategy = self.discovery.resolve(self.k8s_client, self.config).await?;

        let node = cordon(self.k8s_client, self.node_name).await?;

        let targets = list_drain_targets(self.k8s_client, self.node_name, self.config).await?;
        let mut listed = BTreeSet::new();
        let mut removable = Vec::new();
        for target in targets {
            if !listed.insert(target.key.clone()) {
                event!(
                    Level::WARN,
                    "Pod '{}' was listed more than once. Ignoring the duplicate.",
                    target.key
                );
                continue;
            }
            match target.action {
                PodAction::Skip(reason) => self.record(target.key, PodOutcome::Skipped { reason }),
                PodAction::Evict | PodAction::ForceDelete => removable.push(target),
            }
        }

        let driver = EvictionDriver::new(self.k8s_client, self.config, self.deadline);
        let driver = &driver;
        // Each Pod is removed independently; one Pod's failure does not affect the others.
        let removed: Vec<(PodKey, PodOutcome)> = stream::iter(removable)
            .map(|target| async move {
                let outcome = match (target.action, strategy) {
                    (PodAction::Evict, RemovalStrategy::Evict(api)) => {
                        driver.evict(&target, api).await
                    }
                    _ => driver.force_delete(&target).await,
                };
                (target.key, outcome)
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        for (key, outcome) in removed {
            self.record(key, outcome);
        }

        Ok(DrainResult {
            node,
            outcomes: self.outcomes,
        })
    }

    /// Records the outcome for a Pod. Each Pod has exactly one outcome; later writes are dropped.
    fn record(&mut self, key: PodKey, outcome: PodOutcome) {
        match self.outcomes.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(outcome);
            }
            Entry::Occupied(slot) => event!(
                Level::WARN,
                "Outcome for Pod '{}' already recorded as {:?}. Ignoring {:?}.",
                slot.key(),
                slot.get(),
                outcome
            ),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::client::{self, DeleteResponse, EvictionApi, EvictionResponse, MockResourceClient};
    use kube::ResourceExt;
    use mockall::Sequence;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::time::Duration;

    const NODE: &str = "node1";
    const MSSQL_NAMESPACE: &str = "mssql";
    const MSSQL_POD: &str = "mssql-75b8b44f6b-znftp";

    fn skip_discovery() -> DrainConfig {
        DrainConfig {
            skip_discovery: true,
            ..Default::default()
        }
    }

    /// Expects the Node to be cordoned with a single patch, without reading it first.
    fn expect_cordon(k8s_client: &mut MockResourceClient, seq: &mut Sequence) {
        k8s_client.expect_get_node().never();
        k8s_client
            .expect_patch_node_unschedulable()
            .withf(|name, unschedulable| name == NODE && *unschedulable)
            .times(1)
            .in_sequence(seq)
            .returning(|name, unschedulable| Ok(fixtures::node(name, unschedulable)));
    }

    fn expect_list(
        k8s_client: &mut MockResourceClient,
        seq: &mut Sequence,
        pods: fn() -> Vec<k8s_openapi::api::core::v1::Pod>,
    ) {
        k8s_client
            .expect_list_pods()
            .withf(|field_selector| field_selector == "spec.nodeName=node1")
            .times(1)
            .in_sequence(seq)
            .returning(move |_| Ok(pods()));
    }

    #[tokio::test]
    async fn test_drain_empty_node() {
        let mut k8s_client = MockResourceClient::new();
        let mut seq = Sequence::new();
        k8s_client
            .expect_supported_versions()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(vec!["policy/v1".to_string()]));
        expect_cordon(&mut k8s_client, &mut seq);
        expect_list(&mut k8s_client, &mut seq, Vec::new);
        k8s_client.expect_create_eviction().never();
        k8s_client.expect_delete_pod().never();
        k8s_client.expect_get_pod().never();

        let result = drain(&k8s_client, NODE, &DrainConfig::default())
            .await
            .unwrap();
        assert_eq!(result.node.name_any(), NODE);
        assert!(result.outcomes.is_empty());
        assert!(result.is_complete());
    }

    #[tokio::test]
    async fn test_drain_deletes_pod_when_eviction_disabled() {
        let mut k8s_client = MockResourceClient::new();
        let mut seq = Sequence::new();
        k8s_client.expect_supported_versions().never();
        expect_cordon(&mut k8s_client, &mut seq);
        expect_list(&mut k8s_client, &mut seq, || {
            vec![fixtures::pod(MSSQL_NAMESPACE, MSSQL_POD)]
        });
        k8s_client.expect_create_eviction().never();
        k8s_client
            .expect_delete_pod()
            .withf(|namespace, name, _| namespace == MSSQL_NAMESPACE && name == MSSQL_POD)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(DeleteResponse::Accepted));
        k8s_client
            .expect_get_pod()
            .withf(|namespace, name| namespace == MSSQL_NAMESPACE && name == MSSQL_POD)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(None));

        let config = DrainConfig {
            disable_eviction: true,
            ..Default::default()
        };
        let result = drain(&k8s_client, NODE, &config).await.unwrap();

        assert_eq!(result.node.name_any(), NODE);
        assert_eq!(result.outcomes.len(), 1);
        assert!(matches!(
            result.outcomes.get(&PodKey::new(MSSQL_NAMESPACE, MSSQL_POD)),
            Some(PodOutcome::Evicted {
                via: Removal::Deletion
            })
        ));
    }

    #[tokio::test]
    async fn test_drain_evicts_pod_after_cordon() {
        let mut k8s_client = MockResourceClient::new();
        let mut seq = Sequence::new();
        expect_cordon(&mut k8s_client, &mut seq);
        expect_list(&mut k8s_client, &mut seq, || {
            vec![fixtures::pod(MSSQL_NAMESPACE, MSSQL_POD)]
        });
        k8s_client
            .expect_create_eviction()
            .withf(|api, namespace, name, _| {
                *api == EvictionApi::V1 && namespace == MSSQL_NAMESPACE && name == MSSQL_POD
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _, _| Ok(EvictionResponse::Accepted));
        k8s_client
            .expect_get_pod()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(None));
        k8s_client.expect_delete_pod().never();

        let result = drain(&k8s_client, NODE, &skip_discovery()).await.unwrap();

        assert!(result.is_complete());
        assert_eq!(
            result.evicted().collect::<Vec<_>>(),
            vec![(&PodKey::new(MSSQL_NAMESPACE, MSSQL_POD), Removal::Eviction)]
        );
    }

    #[tokio::test]
    async fn test_drain_without_eviction_api_deletes_pods() {
        let mut k8s_client = MockResourceClient::new();
        let mut seq = Sequence::new();
        k8s_client
            .expect_supported_versions()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(vec![]));
        expect_cordon(&mut k8s_client, &mut seq);
        expect_list(&mut k8s_client, &mut seq, || {
            vec![fixtures::pod(MSSQL_NAMESPACE, MSSQL_POD)]
        });
        k8s_client.expect_create_eviction().never();
        k8s_client
            .expect_delete_pod()
            .times(1)
            .returning(|_, _, _| Ok(DeleteResponse::Gone));
        k8s_client.expect_get_pod().never();

        let result = drain(&k8s_client, NODE, &DrainConfig::default())
            .await
            .unwrap();
        assert!(result.is_complete());
        assert_eq!(result.evicted().count(), 1);
    }

    #[tokio::test]
    async fn test_drain_records_every_pod_once() {
        let mut k8s_client = MockResourceClient::new();
        let mut seq = Sequence::new();
        expect_cordon(&mut k8s_client, &mut seq);
        expect_list(&mut k8s_client, &mut seq, || {
            vec![
                fixtures::pod("default", "web-0"),
                fixtures::pod("default", "web-1"),
                // Listed twice, as can happen with a stale cache.
                fixtures::pod("default", "web-0"),
                fixtures::daemonset_pod("kube-system", "kube-proxy-x"),
                fixtures::mirror_pod("kube-system", "kube-apiserver-node1"),
                fixtures::bare_pod("default", "debug"),
                fixtures::with_phase(fixtures::pod("batch", "report"), "Succeeded"),
            ]
        });
        k8s_client
            .expect_create_eviction()
            .withf(|_, _, name, _| name == "web-0")
            .times(1)
            .returning(|_, _, _, _| Ok(EvictionResponse::Accepted));
        k8s_client
            .expect_create_eviction()
            .withf(|_, _, name, _| name == "web-1")
            .times(1)
            .returning(|_, _, name, _| {
                Err(client::Error::Forbidden {
                    operation: "evict",
                    kind: "Pod",
                    name: name.to_string(),
                    message: "forbidden".to_string(),
                })
            });
        k8s_client
            .expect_get_pod()
            .withf(|_, name| name == "web-0")
            .times(1)
            .returning(|_, _| Ok(None));
        k8s_client.expect_delete_pod().never();

        let result = drain(&k8s_client, NODE, &skip_discovery()).await.unwrap();

        assert_eq!(result.outcomes.len(), 6);
        assert!(!result.is_complete());
        assert_eq!(
            result
                .failed()
                .map(|(key, _)| key.to_string())
                .collect::<Vec<_>>(),
            vec!["default/web-1".to_string()]
        );
        assert_eq!(
            result.skipped().collect::<Vec<_>>(),
            vec![
                (&PodKey::new("batch", "report"), SkipReason::Terminal),
                (&PodKey::new("default", "debug"), SkipReason::Unmanaged),
                (
                    &PodKey::new("kube-system", "kube-apiserver-node1"),
                    SkipReason::Mirror
                ),
                (
                    &PodKey::new("kube-system", "kube-proxy-x"),
                    SkipReason::LocalWorkload(ControllerKind::DaemonSet)
                ),
            ]
        );
        assert_eq!(result.evicted().count(), 1);
    }

    #[tokio::test]
    async fn test_drain_force_deletes_unmanaged_pods() {
        let mut k8s_client = MockResourceClient::new();
        let mut seq = Sequence::new();
        expect_cordon(&mut k8s_client, &mut seq);
        expect_list(&mut k8s_client, &mut seq, || {
            vec![
                fixtures::bare_pod("default", "debug"),
                fixtures::daemonset_pod("kube-system", "kube-proxy-x"),
            ]
        });
        k8s_client.expect_create_eviction().never();
        k8s_client
            .expect_delete_pod()
            .withf(|_, name, _| name == "debug")
            .times(1)
            .returning(|_, _, _| Ok(DeleteResponse::Accepted));
        k8s_client
            .expect_get_pod()
            .times(1)
            .returning(|_, _| Ok(None));

        let config = DrainConfig {
            force: true,
            skip_discovery: true,
            ..Default::default()
        };
        let result = drain(&k8s_client, NODE, &config).await.unwrap();
        assert!(result.is_complete());
        assert_eq!(result.evicted().count(), 1);
        assert_eq!(result.skipped().count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_returns_when_budget_never_allows_eviction() {
        let mut k8s_client = MockResourceClient::new();
        let mut seq = Sequence::new();
        expect_cordon(&mut k8s_client, &mut seq);
        expect_list(&mut k8s_client, &mut seq, || {
            vec![fixtures::pod(MSSQL_NAMESPACE, MSSQL_POD)]
        });
        k8s_client.expect_create_eviction().returning(|_, _, _, _| {
            Ok(EvictionResponse::Conflict {
                message: "Cannot evict pod as it would violate the pod's disruption budget."
                    .to_string(),
            })
        });
        k8s_client.expect_delete_pod().never();

        let config = DrainConfig {
            timeout: Some(Duration::from_secs(30)),
            ..skip_discovery()
        };
        let result = drain(&k8s_client, NODE, &config).await.unwrap();

        assert_eq!(result.outcomes.len(), 1);
        assert!(matches!(
            result.failed().next(),
            Some((_, PodDrainError::RetriesExhausted { .. }))
        ));
    }

    #[tokio::test]
    async fn test_drain_node_not_found() {
        let mut k8s_client = MockResourceClient::new();
        k8s_client
            .expect_patch_node_unschedulable()
            .times(1)
            .returning(|name, _| {
                Err(client::Error::NotFound {
                    kind: "Node",
                    name: name.to_string(),
                })
            });
        k8s_client.expect_list_pods().never();

        let err = drain(&k8s_client, NODE, &skip_discovery())
            .await
            .unwrap_err();
        assert!(matches!(err, DrainError::NodeNotFound { .. }));
    }

    #[tokio::test]
    async fn test_drain_list_failure_is_fatal() {
        let mut k8s_client = MockResourceClient::new();
        let mut seq = Sequence::new();
        expect_cordon(&mut k8s_client, &mut seq);
        k8s_client.expect_list_pods().times(1).returning(|selector| {
            Err(client::Error::Request {
                operation: "list",
                kind: "Pod",
                name: selector.to_string(),
                source: kube::Error::Api(kube::error::ErrorResponse {
                    status: "Failure".to_string(),
                    message: "etcdserver: request timed out".to_string(),
                    reason: "InternalError".to_string(),
                    code: 500,
                }),
            })
        });
        k8s_client.expect_create_eviction().never();

        let err = drain(&k8s_client, NODE, &skip_discovery())
            .await
            .unwrap_err();
        assert!(matches!(err, DrainError::ListPods { .. }));
    }

    #[tokio::test]
    async fn test_drain_discovery_failure_is_fatal() {
        let mut k8s_client = MockResourceClient::new();
        k8s_client.expect_supported_versions().times(1).returning(|group| {
            Err(client::Error::Forbidden {
                operation: "discover",
                kind: "APIGroup",
                name: group.to_string(),
                message: "forbidden".to_string(),
            })
        });
        k8s_client.expect_patch_node_unschedulable().never();

        let err = drain(&k8s_client, NODE, &DrainConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DrainError::Discovery { .. }));
    }

    #[tokio::test]
    async fn test_drain_is_idempotent() {
        // The Node already reads as cordoned; every drain still asserts the cordon.
        let mut k8s_client = MockResourceClient::new();
        k8s_client.expect_get_node().never();
        k8s_client
            .expect_patch_node_unschedulable()
            .withf(|name, unschedulable| name == NODE && *unschedulable)
            .times(2)
            .returning(|name, _| Ok(fixtures::node(name, true)));
        k8s_client
            .expect_list_pods()
            .times(2)
            .returning(|_| Ok(vec![]));

        for _ in 0..2 {
            let result = drain(&k8s_client, NODE, &skip_discovery()).await.unwrap();
            assert_eq!(result.node.name_any(), NODE);
            assert!(result.outcomes.is_empty());
        }
    }

    #[tokio::test]
    async fn test_drain_after_deadline_leaves_pods_alone() {
        let mut k8s_client = MockResourceClient::new();
        let mut seq = Sequence::new();
        expect_cordon(&mut k8s_client, &mut seq);
        expect_list(&mut k8s_client, &mut seq, || {
            vec![
                fixtures::pod("default", "web-0"),
                fixtures::bare_pod("default", "debug"),
            ]
        });
        k8s_client.expect_create_eviction().never();
        k8s_client.expect_delete_pod().never();
        k8s_client.expect_get_pod().never();

        let config = DrainConfig {
            timeout: Some(Duration::ZERO),
            force: true,
            ..skip_discovery()
        };
        let result = drain(&k8s_client, NODE, &config).await.unwrap();

        assert_eq!(result.outcomes.len(), 2);
        assert!(result
            .outcomes
            .values()
            .all(|outcome| matches!(
                outcome,
                PodOutcome::Failed {
                    error: PodDrainError::DrainTimeout { .. }
                }
            )));
    }

    /// Drains five Pods which each take one poll to disappear, recording the most evictions in flight at once.
    async fn max_evictions_in_flight(concurrency: usize) -> usize {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_in_flight = Arc::new(AtomicUsize::new(0));
        let polled = Arc::new(Mutex::new(BTreeSet::new()));

        let mut k8s_client = MockResourceClient::new();
        k8s_client
            .expect_patch_node_unschedulable()
            .returning(|name, unschedulable| Ok(fixtures::node(name, unschedulable)));
        k8s_client.expect_list_pods().returning(|_| {
            Ok((0..5)
                .map(|i| fixtures::pod("default", &format!("web-{}", i)))
                .collect())
        });
        {
            let in_flight = in_flight.clone();
            let max_in_flight = max_in_flight.clone();
            k8s_client
                .expect_create_eviction()
                .times(5)
                .returning(move |_, _, _, _| {
                    let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_in_flight.fetch_max(current, Ordering::SeqCst);
                    Ok(EvictionResponse::Accepted)
                });
        }
        {
            let in_flight = in_flight.clone();
            k8s_client
                .expect_get_pod()
                .times(10)
                .returning(move |namespace, name| {
                    // Still running on the first poll, gone on the second.
                    if polled.lock().unwrap().insert(name.to_string()) {
                        Ok(Some(fixtures::pod(namespace, name)))
                    } else {
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        Ok(None)
                    }
                });
        }

        let config = DrainConfig {
            concurrency,
            poll_interval: Duration::from_secs(1),
            ..skip_discovery()
        };
        let result = drain(&k8s_client, NODE, &config).await.unwrap();
        assert!(result.is_complete());
        assert_eq!(result.evicted().count(), 5);

        max_in_flight.load(Ordering::SeqCst)
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_respects_concurrency() {
        assert_eq!(max_evictions_in_flight(2).await, 2);
        assert_eq!(max_evictions_in_flight(5).await, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_zero_concurrency_is_sequential() {
        assert_eq!(max_evictions_in_flight(0).await, 1);
    }
}
