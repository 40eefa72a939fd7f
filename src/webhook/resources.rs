//! Resource attributes for injected workloads
//!
//! Attributes identify where telemetry comes from: namespace, node, pod,
//! container and the controllers that own the pod. They are derived from the
//! pod itself plus a best-effort walk of its ownership chain, then overlaid
//! with whatever the workload author already put in
//! `OTEL_RESOURCE_ATTRIBUTES`. Author-supplied values always win.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{EnvVar, Namespace, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use tracing::{debug, info, warn};

use super::cluster::ClusterState;
use super::inject::ENV_OTEL_RESOURCE_ATTRIBUTES;

/// Maximum number of owner hops followed from the pod
///
/// Kubernetes ownership chains are acyclic and shallow (Pod → ReplicaSet →
/// Deployment); the bound only guards against malformed objects.
pub const MAX_OWNER_DEPTH: usize = 5;

/// Pod annotation naming the application
pub const ANNOTATION_APP: &str = "app";

/// Pod annotation carrying the recommended `app.kubernetes.io/name` label value
pub const ANNOTATION_APP_NAME: &str = "app.kubernetes.io/name";

/// OpenTelemetry semantic-convention keys for Kubernetes resources
pub mod keys {
    /// Namespace name
    pub const K8S_NAMESPACE_NAME: &str = "k8s.namespace.name";
    /// Node name
    pub const K8S_NODE_NAME: &str = "k8s.node.name";
    /// Pod name
    pub const K8S_POD_NAME: &str = "k8s.pod.name";
    /// Pod UID
    pub const K8S_POD_UID: &str = "k8s.pod.uid";
    /// Container name
    pub const K8S_CONTAINER_NAME: &str = "k8s.container.name";
    /// ReplicaSet name
    pub const K8S_REPLICASET_NAME: &str = "k8s.replicaset.name";
    /// ReplicaSet UID
    pub const K8S_REPLICASET_UID: &str = "k8s.replicaset.uid";
    /// Deployment name
    pub const K8S_DEPLOYMENT_NAME: &str = "k8s.deployment.name";
    /// Deployment UID
    pub const K8S_DEPLOYMENT_UID: &str = "k8s.deployment.uid";
    /// StatefulSet name
    pub const K8S_STATEFULSET_NAME: &str = "k8s.statefulset.name";
    /// StatefulSet UID
    pub const K8S_STATEFULSET_UID: &str = "k8s.statefulset.uid";
    /// DaemonSet name
    pub const K8S_DAEMONSET_NAME: &str = "k8s.daemonset.name";
    /// DaemonSet UID
    pub const K8S_DAEMONSET_UID: &str = "k8s.daemonset.uid";
    /// Job name
    pub const K8S_JOB_NAME: &str = "k8s.job.name";
    /// Job UID
    pub const K8S_JOB_UID: &str = "k8s.job.uid";
    /// CronJob name
    pub const K8S_CRONJOB_NAME: &str = "k8s.cronjob.name";
    /// CronJob UID
    pub const K8S_CRONJOB_UID: &str = "k8s.cronjob.uid";
}

use keys::*;

/// Attributes derived from the pod, its namespace and its owners
///
/// Never holds empty values: fields that are not known yet (a pod created
/// from a template has no name or node) are simply absent.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResourceAttributes {
    attrs: BTreeMap<String, String>,
}

/// Derived attributes merged with the container's existing
/// `OTEL_RESOURCE_ATTRIBUTES`
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MergedAttributes {
    /// Final attribute set
    pub attrs: BTreeMap<String, String>,
    /// Position of an existing `OTEL_RESOURCE_ATTRIBUTES` entry in the env list
    pub existing_index: Option<usize>,
}

impl ResourceAttributes {
    /// Derive attributes for a pod about to be admitted
    ///
    /// Owner lookups are best effort: a ReplicaSet that cannot be read just
    /// leaves its owners out of the result.
    pub async fn derive(cluster: &dyn ClusterState, namespace: &Namespace, pod: &Pod) -> Self {
        let mut derived = Self::default();
        let ns_name = namespace.metadata.name.as_deref().unwrap_or_default();

        derived.insert(K8S_NAMESPACE_NAME, ns_name);
        derived.insert(K8S_POD_NAME, pod.metadata.name.as_deref().unwrap_or_default());
        derived.insert(K8S_POD_UID, pod.metadata.uid.as_deref().unwrap_or_default());
        if let Some(spec) = &pod.spec {
            derived.insert(K8S_NODE_NAME, spec.node_name.as_deref().unwrap_or_default());
            if let Some(container) = spec.containers.first() {
                derived.insert(K8S_CONTAINER_NAME, &container.name);
            }
        }

        let owners = pod.metadata.owner_references.clone().unwrap_or_default();
        derived.add_owner_attributes(cluster, ns_name, owners).await;
        derived
    }

    /// Walk the ownership chain breadth-first, one hop per round
    async fn add_owner_attributes(
        &mut self,
        cluster: &dyn ClusterState,
        namespace: &str,
        owners: Vec<OwnerReference>,
    ) {
        let mut pending = owners;

        for _ in 0..MAX_OWNER_DEPTH {
            if pending.is_empty() {
                return;
            }
            let mut next = Vec::new();

            for owner in &pending {
                match owner.kind.to_ascii_lowercase().as_str() {
                    "replicaset" => {
                        self.insert_owner(K8S_REPLICASET_NAME, K8S_REPLICASET_UID, owner);
                        // The ReplicaSet's own owner (usually a Deployment) is the
                        // interesting name, but only reachable through the API.
                        match cluster.get_replica_set(namespace, &owner.name).await {
                            Ok(rs) => {
                                next.extend(rs.metadata.owner_references.unwrap_or_default())
                            }
                            Err(e) => warn!(
                                namespace = %namespace,
                                replicaset = %owner.name,
                                error = %e,
                                "Failed to look up ReplicaSet owner, continuing without it"
                            ),
                        }
                    }
                    "deployment" => {
                        self.insert_owner(K8S_DEPLOYMENT_NAME, K8S_DEPLOYMENT_UID, owner)
                    }
                    "statefulset" => {
                        self.insert_owner(K8S_STATEFULSET_NAME, K8S_STATEFULSET_UID, owner)
                    }
                    "daemonset" => self.insert_owner(K8S_DAEMONSET_NAME, K8S_DAEMONSET_UID, owner),
                    "job" => self.insert_owner(K8S_JOB_NAME, K8S_JOB_UID, owner),
                    "cronjob" => self.insert_owner(K8S_CRONJOB_NAME, K8S_CRONJOB_UID, owner),
                    other => debug!(kind = %other, name = %owner.name, "Ignoring owner kind"),
                }
            }

            pending = next;
        }

        if !pending.is_empty() {
            warn!(
                namespace = %namespace,
                max_depth = MAX_OWNER_DEPTH,
                "Ownership chain exceeds depth limit, ignoring remaining owners"
            );
        }
    }

    fn insert_owner(&mut self, name_key: &str, uid_key: &str, owner: &OwnerReference) {
        self.insert(name_key, &owner.name);
        self.insert(uid_key, &owner.uid);
    }

    fn insert(&mut self, key: &str, value: &str) {
        if !value.is_empty() {
            self.attrs.insert(key.to_string(), value.to_string());
        }
    }

    #[cfg(test)]
    fn get(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(String::as_str)
    }

    /// Overlay the container's existing `OTEL_RESOURCE_ATTRIBUTES` on the
    /// derived set
    ///
    /// Existing `key=value` pairs take precedence over derived ones, empty
    /// values included. Pairs that do not contain exactly one `=` are logged
    /// and skipped. An existing entry sourced through `valueFrom` cannot be
    /// read here; the config injector refuses to rewrite it.
    pub fn merged_with_env(&self, env: &[EnvVar]) -> MergedAttributes {
        let mut attrs = self.attrs.clone();
        let existing_index = env
            .iter()
            .position(|e| e.name == ENV_OTEL_RESOURCE_ATTRIBUTES);

        if let Some(value) = existing_index.and_then(|i| env[i].value.as_deref()) {
            for pair in value.split(',') {
                match parse_pair(pair) {
                    Some((key, value)) => {
                        attrs.insert(key.to_string(), value.to_string());
                    }
                    None => info!(attribute = %pair, "Skipping invalid resource attribute"),
                }
            }
        }

        MergedAttributes {
            attrs,
            existing_index,
        }
    }
}

impl MergedAttributes {
    /// Render as the comma-separated `key=value` list, sorted by key
    pub fn to_env_value(&self) -> String {
        self.attrs
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Split a `key=value` pair; anything without exactly one `=` is rejected
///
/// Empty keys or values are kept: the pair is written back into the
/// author's own variable, which must not lose entries.
fn parse_pair(pair: &str) -> Option<(&str, &str)> {
    let (key, value) = pair.trim().split_once('=')?;
    if value.contains('=') {
        return None;
    }
    Some((key.trim(), value.trim()))
}

/// Pick the service name for a pod
///
/// The first non-empty source wins, in order: `app` annotation,
/// `app.kubernetes.io/name` annotation, Deployment, StatefulSet, Job,
/// CronJob, pod name, and finally the first container's name.
pub fn service_name(pod: &Pod, attrs: &BTreeMap<String, String>) -> String {
    let candidates = [
        annotation(pod, ANNOTATION_APP),
        annotation(pod, ANNOTATION_APP_NAME),
        attrs.get(K8S_DEPLOYMENT_NAME).map(String::as_str),
        attrs.get(K8S_STATEFULSET_NAME).map(String::as_str),
        attrs.get(K8S_JOB_NAME).map(String::as_str),
        attrs.get(K8S_CRONJOB_NAME).map(String::as_str),
        attrs.get(K8S_POD_NAME).map(String::as_str),
    ];

    candidates
        .into_iter()
        .flatten()
        .find(|name| !name.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| {
            pod.spec
                .as_ref()
                .and_then(|s| s.containers.first())
                .map(|c| c.name.clone())
                .unwrap_or_default()
        })
}

fn annotation<'a>(pod: &'a Pod, key: &str) -> Option<&'a str> {
    pod.metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(key))
        .map(String::as_str)
}
