//! Pod Mutating Admission Webhook
//!
//! Intercepts pod create/update operations and injects OpenTelemetry
//! exporter configuration, plus language agents when a pod asks for them
//! through annotations.
//!
//! The pipeline is split so each stage can be tested on its own:
//! - [`cluster`]: read-only Kubernetes lookups behind a mockable trait
//! - [`topology`]: where telemetry goes, from the cluster's `Agent` resource
//! - [`resources`]: resource attributes and service name for a pod
//! - [`inject`]: the injector registry and the injectors themselves
//! - [`pod`]: the orchestrator and the admission handler
//! - [`server`]: the HTTPS listener

pub mod cluster;
pub mod inject;
pub mod pod;
pub mod resources;
pub mod server;
pub mod topology;

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;

use crate::{
    DEFAULT_DEADLINE_SECS, DEFAULT_GATEWAY_SERVICE, DEFAULT_JAVA_AGENT_IMAGE,
    DEFAULT_OPERATOR_NAMESPACE,
};

use self::cluster::ClusterState;
use self::pod::PodMutator;

/// Path the API server posts pod admission reviews to
pub const MUTATE_POD_PATH: &str = "/mutate-v1-pod";

/// Operator-level settings the injectors depend on
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Namespace the operator and its gateway collector run in
    pub namespace: String,
    /// Name of the gateway collector Service
    pub gateway_service: String,
    /// Java agent image used when the `Agent` does not name one
    pub default_java_image: String,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_OPERATOR_NAMESPACE.to_string(),
            gateway_service: DEFAULT_GATEWAY_SERVICE.to_string(),
            default_java_image: DEFAULT_JAVA_AGENT_IMAGE.to_string(),
        }
    }
}

/// What to answer when a request misses its deadline
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum FailurePolicy {
    /// Admit the pod unchanged
    #[default]
    Ignore,
    /// Reject the pod
    Fail,
}

/// Shared state for webhook handlers
pub struct WebhookState {
    /// Mutation pipeline
    pub mutator: PodMutator,
    /// Upper bound on the time spent per admission request
    pub deadline: Duration,
    /// Answer used when the deadline passes
    pub failure_policy: FailurePolicy,
}

impl WebhookState {
    /// Create webhook state with the default deadline and failure policy
    pub fn new(cluster: Arc<dyn ClusterState>, operator: OperatorConfig) -> Self {
        Self {
            mutator: PodMutator::new(cluster, operator),
            deadline: Duration::from_secs(DEFAULT_DEADLINE_SECS),
            failure_policy: FailurePolicy::default(),
        }
    }

    /// Override the per-request deadline
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Override the failure policy
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }
}

/// Create the webhook router
///
/// - POST /mutate-v1-pod - Inject telemetry settings into pods
/// - GET /healthz, /readyz - Liveness and readiness probes
pub fn webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route(MUTATE_POD_PATH, post(pod::mutate_handler))
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(|| async { "ok" }))
        .with_state(state)
}
