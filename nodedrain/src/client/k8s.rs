use super::error::{self, Error, Result};
use super::{DeleteResponse, EvictionApi, EvictionResponse, ResourceClient};
use crate::constants;

use async_trait::async_trait;
use http::StatusCode;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::core::Request;
use kube::error::ErrorResponse;
use kube::Resource;
use serde_json::json;
use snafu::ResultExt;
use tracing::{event, instrument, Level};

// The API server answers requests for routes it does not serve with this message.
const UNSERVED_ROUTE_MESSAGE: &str = "the server could not find the requested resource";

#[derive(Clone)]
/// Concrete implementation of the `ResourceClient` trait backed by a `kube::Client`. This implementation will
/// almost certainly be used in any case that isn't a unit test.
pub struct K8SResourceClient {
    k8s_client: kube::Client,
}

impl K8SResourceClient {
    pub fn new(k8s_client: kube::Client) -> Self {
        K8SResourceClient { k8s_client }
    }

    fn nodes(&self) -> Api<Node> {
        Api::all(self.k8s_client.clone())
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.k8s_client.clone(), namespace)
    }
}

/// Sorts a failed request into the client error taxonomy.
fn classify_error(
    operation: &'static str,
    kind: &'static str,
    name: &str,
    err: kube::Error,
) -> Error {
    match err {
        kube::Error::Api(ErrorResponse { code, .. }) if code == StatusCode::NOT_FOUND.as_u16() => {
            Error::NotFound {
                kind,
                name: name.to_string(),
            }
        }
        kube::Error::Api(ErrorResponse { code, message, .. })
            if code == StatusCode::FORBIDDEN.as_u16() =>
        {
            Error::Forbidden {
                operation,
                kind,
                name: name.to_string(),
                message,
            }
        }
        source => Error::Request {
            operation,
            kind,
            name: name.to_string(),
            source,
        },
    }
}

/// Whether a 404 came from the eviction route being absent rather than from the Pod being absent.
fn is_unserved_route(response: &ErrorResponse) -> bool {
    response.code == StatusCode::METHOD_NOT_ALLOWED.as_u16()
        || (response.code == StatusCode::NOT_FOUND.as_u16()
            && response.message.contains(UNSERVED_ROUTE_MESSAGE))
}

/// Maps an eviction failure to the response it represents, if it represents one.
fn eviction_response(response: &ErrorResponse) -> Option<EvictionResponse> {
    if is_unserved_route(response) {
        return Some(EvictionResponse::Unsupported);
    }
    match StatusCode::from_u16(response.code) {
        // 429 means the eviction would violate a PodDisruptionBudget. A 500 is returned if budgets are
        // misconfigured, e.g. multiple PDBs select the same Pod. Both may clear up later.
        Ok(StatusCode::TOO_MANY_REQUESTS) | Ok(StatusCode::INTERNAL_SERVER_ERROR) => {
            Some(EvictionResponse::Conflict {
                message: response.message.clone(),
            })
        }
        Ok(StatusCode::NOT_FOUND) => Some(EvictionResponse::Gone),
        _ => None,
    }
}

#[async_trait]
impl ResourceClient for K8SResourceClient {
    #[instrument(skip(self), err)]
    async fn get_node(&self, name: &str) -> Result<Node> {
        self.nodes()
            .get(name)
            .await
            .map_err(|err| classify_error("get", constants::NODE_KIND, name, err))
    }

    #[instrument(skip(self), err)]
    async fn patch_node_unschedulable(&self, name: &str, unschedulable: bool) -> Result<Node> {
        let patch = json!({
            "spec": {
                "unschedulable": unschedulable
            }
        });
        self.nodes()
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|err| classify_error("patch", constants::NODE_KIND, name, err))
    }

    #[instrument(skip(self), err)]
    async fn list_pods(&self, field_selector: &str) -> Result<Vec<Pod>> {
        let pods: Api<Pod> = Api::all(self.k8s_client.clone());
        let pod_list = pods
            .list(&ListParams::default().fields(field_selector))
            .await
            .map_err(|err| classify_error("list", constants::POD_KIND, field_selector, err))?;

        Ok(pod_list.items)
    }

    #[instrument(skip(self), err)]
    async fn supported_versions(&self, group: &str) -> Result<Vec<String>> {
        let api_groups = self
            .k8s_client
            .list_api_groups()
            .await
            .map_err(|err| classify_error("discover", "APIGroup", group, err))?;

        Ok(api_groups
            .groups
            .into_iter()
            .filter(|api_group| api_group.name == group)
            .flat_map(|api_group| api_group.versions)
            .map(|version| version.group_version)
            .collect())
    }

    #[instrument(skip(self), err)]
    async fn create_eviction(
        &self,
        api: EvictionApi,
        namespace: &str,
        name: &str,
        grace_period_seconds: Option<u32>,
    ) -> Result<EvictionResponse> {
        let mut eviction = json!({
            "apiVersion": api.group_version(),
            "kind": constants::EVICTION_KIND,
            "metadata": {
                "name": name,
                "namespace": namespace,
            },
        });
        if let Some(grace_period_seconds) = grace_period_seconds {
            eviction["deleteOptions"] = json!({ "gracePeriodSeconds": grace_period_seconds });
        }
        let body = serde_json::to_vec(&eviction).context(error::SerializeSnafu {
            kind: constants::EVICTION_KIND,
            name,
        })?;

        // kube's `Api::evict` only speaks `policy/v1`, so the request is built by hand to honor the discovered API.
        let request = Request::new(Pod::url_path(&(), Some(namespace)))
            .create_subresource(
                constants::EVICTION_SUBRESOURCE,
                name,
                &PostParams::default(),
                body,
            )
            .context(error::BuildRequestSnafu { name })?;

        match self
            .k8s_client
            .request::<serde_json::Value>(request)
            .await
        {
            Ok(_) => Ok(EvictionResponse::Accepted),
            Err(kube::Error::Api(response)) => match eviction_response(&response) {
                Some(eviction_response) => {
                    event!(
                        Level::DEBUG,
                        pod = name,
                        code = response.code,
                        "Eviction answered with '{:?}'",
                        eviction_response
                    );
                    Ok(eviction_response)
                }
                None => Err(classify_error(
                    "evict",
                    constants::POD_KIND,
                    name,
                    kube::Error::Api(response),
                )),
            },
            Err(err) => Err(classify_error("evict", constants::POD_KIND, name, err)),
        }
    }

    #[instrument(skip(self), err)]
    async fn delete_pod(
        &self,
        namespace: &str,
        name: &str,
        grace_period_seconds: Option<u32>,
    ) -> Result<DeleteResponse> {
        let delete_params = DeleteParams {
            grace_period_seconds,
            ..Default::default()
        };
        match self.pods(namespace).delete(name, &delete_params).await {
            Ok(_) => Ok(DeleteResponse::Accepted),
            Err(err) => match classify_error("delete", constants::POD_KIND, name, err) {
                Error::NotFound { .. } => Ok(DeleteResponse::Gone),
                err => Err(err),
            },
        }
    }

    #[instrument(skip(self), err)]
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>> {
        self.pods(namespace)
            .get_opt(name)
            .await
            .map_err(|err| classify_error("get", constants::POD_KIND, name, err))
    }
}
