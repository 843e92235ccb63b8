//! Kubernetes objects used by the drain tests.
use k8s_openapi::api::core::v1::{Node, NodeSpec, Pod, PodSpec, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use maplit::btreemap;

pub(crate) fn node(name: &str, unschedulable: bool) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: Some(NodeSpec {
            unschedulable: Some(unschedulable),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub(crate) fn owner(kind: &str, controller: bool) -> OwnerReference {
    OwnerReference {
        api_version: "apps/v1".to_string(),
        kind: kind.to_string(),
        name: format!("{}-owner", kind.to_lowercase()),
        uid: format!("{}-uid", kind.to_lowercase()),
        controller: Some(controller),
        ..Default::default()
    }
}

/// A running Pod without any owner.
pub(crate) fn bare_pod(namespace: &str, name: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(format!("{}-{}-uid", namespace, name)),
            ..Default::default()
        },
        spec: Some(PodSpec {
            node_name: Some("node1".to_string()),
            termination_grace_period_seconds: Some(30),
            ..Default::default()
        }),
        status: Some(PodStatus {
            phase: Some("Running".to_string()),
            ..Default::default()
        }),
    }
}

/// A running Pod controlled by a ReplicaSet.
pub(crate) fn pod(namespace: &str, name: &str) -> Pod {
    let mut pod = bare_pod(namespace, name);
    pod.metadata.owner_references = Some(vec![owner("ReplicaSet", true)]);
    pod
}

pub(crate) fn daemonset_pod(namespace: &str, name: &str) -> Pod {
    let mut pod = bare_pod(namespace, name);
    pod.metadata.owner_references = Some(vec![owner("DaemonSet", true)]);
    pod
}

pub(crate) fn mirror_pod(namespace: &str, name: &str) -> Pod {
    let mut pod = bare_pod(namespace, name);
    pod.metadata.annotations = Some(btreemap! {
        "kubernetes.io/config.mirror".to_string() => "0123456789abcdef".to_string(),
    });
    pod.metadata.owner_references = Some(vec![OwnerReference {
        api_version: "v1".to_string(),
        kind: "Node".to_string(),
        name: "node1".to_string(),
        uid: "node1-uid".to_string(),
        controller: Some(true),
        ..Default::default()
    }]);
    pod
}

pub(crate) fn with_phase(mut pod: Pod, phase: &str) -> Pod {
    pod.status = Some(PodStatus {
        phase: Some(phase.to_string()),
        ..Default::default()
    });
    pod
}

pub(crate) fn with_uid(mut pod: Pod, uid: &str) -> Pod {
    pod.metadata.uid = Some(uid.to_string());
    pod
}
