//! Read-only view of cluster state used by the mutation pipeline
//!
//! The webhook only ever reads: the pod's namespace, ReplicaSets on a pod's
//! ownership chain, and the cluster-wide `Agent` resources.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, ListParams};
use kube::Client;

#[cfg(test)]
use mockall::automock;

use crate::crd::Agent;
use crate::Result;

/// Trait abstracting the Kubernetes lookups made during admission
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterState: Send + Sync {
    /// Fetch a Namespace by name
    async fn get_namespace(&self, name: &str) -> Result<Namespace>;

    /// Fetch a ReplicaSet by namespace and name
    async fn get_replica_set(&self, namespace: &str, name: &str) -> Result<ReplicaSet>;

    /// List every `Agent` resource in the cluster
    async fn list_agents(&self) -> Result<Vec<Agent>>;
}

/// Real Kubernetes client implementation
pub struct KubeClusterState {
    client: Client,
}

impl KubeClusterState {
    /// Create a new KubeClusterState wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterState for KubeClusterState {
    async fn get_namespace(&self, name: &str) -> Result<Namespace> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api.get(name).await?)
    }

    async fn get_replica_set(&self, namespace: &str, name: &str) -> Result<ReplicaSet> {
        let api: Api<ReplicaSet> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get(name).await?)
    }

    async fn list_agents(&self) -> Result<Vec<Agent>> {
        let api: Api<Agent> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await?;
        Ok(list.items)
    }
}
