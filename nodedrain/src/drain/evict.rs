//! Removes individual Pods from a Node and waits for them to be gone.
//!
//! Evictions respect PodDisruptionBudgets (PDBs): the API server refuses an eviction which would take too many
//! replicas of a workload down at once. Refusals are retried until the drain's deadline, since budgets free up as
//! replacement Pods become ready elsewhere.
use super::config::DrainConfig;
use super::deadline::Deadline;
use super::error::{self, PodDrainError};
use super::filter::{is_terminal, DrainTarget};
use super::outcome::{PodKey, PodOutcome, Removal};
use crate::client::{DeleteResponse, EvictionApi, EvictionResponse, ResourceClient};
use crate::constants;

use k8s_openapi::api::core::v1::Pod;
use snafu::ResultExt;
use tokio::time::{sleep, Duration};
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tracing::{event, instrument, Level};

/// Delays between eviction attempts refused by a PodDisruptionBudget, doubling from the base delay.
fn retry_strategy() -> impl Iterator<Item = Duration> {
    // `ExponentialBackoff` yields `factor * base^n` milliseconds, starting at n = 1.
    ExponentialBackoff::from_millis(2)
        .factor(constants::EVICTION_RETRY_BASE_DELAY.as_millis() as u64 / 2)
        .max_delay(constants::EVICTION_RETRY_MAX_DELAY)
        .map(jitter)
}

/// Result of asking the API server to remove a Pod.
enum Submitted {
    /// The request was accepted; the Pod is on its way out.
    Accepted(Removal),
    /// The Pod was already gone.
    Gone(Removal),
}

/// Steps of a single Pod's eviction.
enum EvictionState {
    Submit,
    Refused { message: String },
    FallBackToDelete,
    Done(Result<Submitted, PodDrainError>),
}

/// Removes Pods on behalf of one drain.
pub(crate) struct EvictionDriver<'a, C> {
    k8s_client: &'a C,
    config: &'a DrainConfig,
    deadline: Deadline,
}

impl<'a, C: ResourceClient> EvictionDriver<'a, C> {
    pub(crate) fn new(k8s_client: &'a C, config: &'a DrainConfig, deadline: Deadline) -> Self {
        EvictionDriver {
            k8s_client,
            config,
            deadline,
        }
    }

    /// Evicts a Pod, then waits for it to be removed.
    #[instrument(skip(self, target), fields(pod = %target.key))]
    pub(crate) async fn evict(&self, target: &DrainTarget, api: EvictionApi) -> PodOutcome {
        if self.deadline.is_expired() {
            return self.expired(target);
        }
        let submitted = self.submit_eviction(&target.key, api).await;
        self.finish(target, submitted).await
    }

    /// Deletes a Pod without regard for PodDisruptionBudgets, then waits for it to be removed.
    #[instrument(skip(self, target), fields(pod = %target.key))]
    pub(crate) async fn force_delete(&self, target: &DrainTarget) -> PodOutcome {
        if self.deadline.is_expired() {
            return self.expired(target);
        }
        let submitted = self.delete(&target.key).await;
        self.finish(target, submitted).await
    }

    /// The drain ran out of time before this Pod's turn came. The Pod is left untouched.
    fn expired(&self, target: &DrainTarget) -> PodOutcome {
        let error = PodDrainError::DrainTimeout {
            pod: target.key.clone(),
            timeout: self.deadline.timeout(),
        };
        event!(Level::ERROR, "Not removing Pod '{}': {}", target.key, error);
        PodOutcome::Failed { error }
    }

    async fn finish(
        &self,
        target: &DrainTarget,
        submitted: Result<Submitted, PodDrainError>,
    ) -> PodOutcome {
        let result = match submitted {
            Ok(Submitted::Gone(via)) => {
                event!(Level::INFO, "Pod '{}' is already gone.", target.key);
                Ok(via)
            }
            Ok(Submitted::Accepted(via)) => self.wait_for_deletion(target).await.map(|_| via),
            Err(error) => Err(error),
        };

        match result {
            Ok(via) => PodOutcome::Evicted { via },
            Err(error) => {
                event!(Level::ERROR, "{}", error);
                PodOutcome::Failed { error }
            }
        }
    }

    async fn submit_eviction(
        &self,
        pod: &PodKey,
        api: EvictionApi,
    ) -> Result<Submitted, PodDrainError> {
        let mut backoff = retry_strategy();
        let mut attempts: u32 = 0;
        let mut state = EvictionState::Submit;

        loop {
            state = match state {
                EvictionState::Submit => {
                    attempts += 1;
                    event!(Level::INFO, "Attempting to evict Pod '{}'", pod);
                    self.submit_once(pod, api).await
                }
                EvictionState::Refused { message } => {
                    // The strategy never runs out; `max_delay` bounds each step.
                    let delay = backoff
                        .next()
                        .unwrap_or(constants::EVICTION_RETRY_MAX_DELAY);
                    if self.deadline.is_exceeded_by(delay) {
                        EvictionState::Done(Err(PodDrainError::RetriesExhausted {
                            pod: pod.clone(),
                            attempts,
                            timeout: self.deadline.timeout(),
                            message,
                        }))
                    } else {
                        event!(
                            Level::WARN,
                            "Eviction of Pod '{}' refused: '{}'. This is likely due to respecting a Pod Disruption Budget. Retrying in {:.2}s.",
                            pod,
                            message,
                            delay.as_secs_f64()
                        );
                        sleep(delay).await;
                        EvictionState::Submit
                    }
                }
                EvictionState::FallBackToDelete => {
                    event!(
                        Level::WARN,
                        "Cluster does not serve {} Evictions. Deleting Pod '{}' instead.",
                        api,
                        pod
                    );
                    EvictionState::Done(self.delete(pod).await)
                }
                EvictionState::Done(result) => return result,
            };
        }
    }

    /// Makes one eviction request and decides the next step.
    async fn submit_once(&self, pod: &PodKey, api: EvictionApi) -> EvictionState {
        let response = self
            .k8s_client
            .create_eviction(
                api,
                &pod.namespace,
                &pod.name,
                self.config.grace_period_seconds,
            )
            .await;

        match response {
            Ok(EvictionResponse::Accepted) => {
                event!(Level::INFO, "Successfully evicted Pod '{}'", pod);
                EvictionState::Done(Ok(Submitted::Accepted(Removal::Eviction)))
            }
            Ok(EvictionResponse::Gone) => {
                EvictionState::Done(Ok(Submitted::Gone(Removal::Eviction)))
            }
            Ok(EvictionResponse::Conflict { message }) => EvictionState::Refused { message },
            Ok(EvictionResponse::Unsupported) => EvictionState::FallBackToDelete,
            Err(source) if source.is_forbidden() => {
                // An eviction request in a deleting namespace is also refused as forbidden.
                EvictionState::Done(Err(PodDrainError::EvictionForbidden {
                    pod: pod.clone(),
                    source,
                }))
            }
            Err(source) => EvictionState::Done(Err(PodDrainError::Eviction {
                pod: pod.clone(),
                source,
            })),
        }
    }

    async fn delete(&self, pod: &PodKey) -> Result<Submitted, PodDrainError> {
        let response = self
            .k8s_client
            .delete_pod(&pod.namespace, &pod.name, self.config.grace_period_seconds)
            .await
            .context(error::DeleteSnafu { pod: pod.clone() })?;

        Ok(match response {
            DeleteResponse::Accepted => {
                event!(Level::INFO, "Deleted Pod '{}'", pod);
                Submitted::Accepted(Removal::Deletion)
            }
            DeleteResponse::Gone => Submitted::Gone(Removal::Deletion),
        })
    }

    /// Waits for the given Pod to be removed by Kubernetes, until the drain's deadline.
    async fn wait_for_deletion(&self, target: &DrainTarget) -> Result<(), PodDrainError> {
        let waited = self.deadline.run(self.poll_until_removed(target)).await;
        match waited {
            Some(()) => Ok(()),
            None => Err(PodDrainError::DrainTimeout {
                pod: target.key.clone(),
                timeout: self.deadline.timeout(),
            }),
        }
    }

    async fn poll_until_removed(&self, target: &DrainTarget) {
        let pod = &target.key;
        loop {
            match self.k8s_client.get_pod(&pod.namespace, &pod.name).await {
                Ok(None) => {
                    event!(Level::INFO, "Pod '{}' deleted.", pod);
                    return;
                }
                Ok(Some(current)) if is_replacement(&target.pod, &current) => {
                    event!(
                        Level::INFO,
                        "Pod '{}' deleted and replaced by a new Pod of the same name.",
                        pod
                    );
                    return;
                }
                Ok(Some(current)) if is_terminal(&current) => {
                    event!(
                        Level::INFO,
                        "Pod '{}' has terminated and is no longer running on the Node.",
                        pod
                    );
                    return;
                }
                Ok(Some(_)) => {
                    event!(
                        Level::DEBUG,
                        "Pod '{}' not yet deleted. Waiting {:.2}s.",
                        pod,
                        self.config.poll_interval.as_secs_f64()
                    );
                }
                Err(e) => {
                    event!(
                        Level::ERROR,
                        "Could not determine if Pod '{}' has been deleted: '{}'. Waiting {:.2}s.",
                        pod,
                        e,
                        self.config.poll_interval.as_secs_f64()
                    );
                }
            }
            sleep(self.config.poll_interval).await;
        }
    }
}

/// Whether `current` is a different Pod object reusing the name of `original`, as StatefulSets do.
fn is_replacement(original: &Pod, current: &Pod) -> bool {
    match (&original.metadata.uid, &current.metadata.uid) {
        (Some(original), Some(current)) => original != current,
        _ => false,
    }
}
