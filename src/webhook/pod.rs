//! Pod Mutation Webhook
//!
//! Handles AdmissionReview requests for pods. The pipeline runs in stages:
//! decode the pod, select injectors from its annotations, fetch the
//! namespace and collector topology, derive resource attributes, run the
//! injectors on a working copy and answer with a JSON patch from the
//! original pod to the working copy.
//!
//! Only missing prerequisites (namespace, topology) and undecodable payloads
//! reject a pod. Injector failures are recorded on the pod as annotations and
//! the pod is admitted.

use std::sync::Arc;

use axum::{extract::State, Json};
use json_patch::Patch;
use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::DynamicObject,
    core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation},
};
use tracing::{debug, error, info, warn};

use crate::{Error, Result};

use super::cluster::ClusterState;
use super::inject::{InjectionContext, Injector, ANNOTATION_REASON, ANNOTATION_STATUS};
use super::resources::ResourceAttributes;
use super::topology::InjectionConfig;
use super::{FailurePolicy, OperatorConfig, WebhookState};

/// Value of the status annotation after every injector succeeded
pub const STATUS_SUCCESS: &str = "success";

/// Value of the status annotation after an injector failed
pub const STATUS_ERROR: &str = "error";

/// Outcome of a mutation run that did not reject the pod
#[derive(Debug, PartialEq)]
pub enum Mutation {
    /// Nothing to inject
    Unchanged,
    /// Operations turning the original pod into the mutated pod
    Patched(Patch),
}

/// Runs the injection pipeline against a single pod
pub struct PodMutator {
    cluster: Arc<dyn ClusterState>,
    operator: OperatorConfig,
}

impl PodMutator {
    /// Create a mutator reading cluster state through `cluster`
    pub fn new(cluster: Arc<dyn ClusterState>, operator: OperatorConfig) -> Self {
        Self { cluster, operator }
    }

    /// Mutate a pod being admitted into `namespace`
    ///
    /// Returns an error only when a prerequisite lookup fails; the pod
    /// should then be rejected.
    pub async fn mutate(&self, namespace: &str, pod: &Pod) -> Result<Mutation> {
        let injectors = Injector::select(pod.metadata.annotations.as_ref());
        if injectors.is_empty() {
            debug!(pod = ?pod.metadata.name, "No injection annotations, allowing unchanged");
            return Ok(Mutation::Unchanged);
        }

        let has_containers = pod.spec.as_ref().is_some_and(|s| !s.containers.is_empty());
        if !has_containers {
            info!(pod = ?pod.metadata.name, "Pod has no containers, allowing unchanged");
            return Ok(Mutation::Unchanged);
        }

        let ns = self.cluster.get_namespace(namespace).await.map_err(|e| {
            Error::namespace(format!("unable to get namespace {namespace}: {e}"))
        })?;

        let agents = self
            .cluster
            .list_agents()
            .await
            .map_err(|e| Error::topology(format!("unable to list Agent resources: {e}")))?;
        let config = InjectionConfig::from_agents(&agents, &self.operator)?;

        let resources = ResourceAttributes::derive(self.cluster.as_ref(), &ns, pod).await;
        let ctx = InjectionContext {
            config: &config,
            resources: &resources,
        };

        let mut working = pod.clone();
        let outcome = injectors
            .iter()
            .try_for_each(|injector| injector.inject(&mut working, &ctx));

        match &outcome {
            Ok(()) => info!(
                namespace = %namespace,
                pod = ?pod.metadata.name,
                injectors = ?injectors,
                exporter = %config.exporter,
                "Injected telemetry configuration"
            ),
            Err(e) => warn!(
                namespace = %namespace,
                pod = ?pod.metadata.name,
                error = %e,
                "Injection failed, admitting pod with failure annotation"
            ),
        }
        record_outcome(&mut working, outcome);

        let original = serde_json::to_value(pod).map_err(|e| Error::serialization(e.to_string()));
        let mutated = serde_json::to_value(&working).map_err(|e| Error::serialization(e.to_string()));
        match (original, mutated) {
            (Ok(original), Ok(mutated)) => Ok(Mutation::Patched(json_patch::diff(&original, &mutated))),
            (Err(e), _) | (_, Err(e)) => {
                error!(error = %e, "Failed to serialize pod, allowing unchanged");
                Ok(Mutation::Unchanged)
            }
        }
    }
}

/// Set the status annotation, and the reason annotation on failure
fn record_outcome(pod: &mut Pod, outcome: Result<()>) {
    let annotations = pod.metadata.annotations.get_or_insert_with(Default::default);
    match outcome {
        Ok(()) => {
            annotations.insert(ANNOTATION_STATUS.to_string(), STATUS_SUCCESS.to_string());
            annotations.remove(ANNOTATION_REASON);
        }
        Err(e) => {
            annotations.insert(ANNOTATION_STATUS.to_string(), STATUS_ERROR.to_string());
            annotations.insert(ANNOTATION_REASON.to_string(), e.to_string());
        }
    }
}

/// Extract the namespace and pod from an admission request
///
/// Returns `None` for requests the webhook has nothing to do with:
/// operations other than CREATE/UPDATE, or requests without an object.
fn decode_pod(request: &AdmissionRequest<DynamicObject>) -> Result<Option<(String, Pod)>> {
    if !matches!(request.operation, Operation::Create | Operation::Update) {
        return Ok(None);
    }
    let Some(object) = &request.object else {
        return Ok(None);
    };

    let value = serde_json::to_value(object).map_err(|e| Error::decode(e.to_string()))?;
    let pod: Pod = serde_json::from_value(value).map_err(|e| Error::decode(e.to_string()))?;

    let namespace = request
        .namespace
        .clone()
        .or_else(|| pod.metadata.namespace.clone())
        .filter(|ns| !ns.is_empty())
        .ok_or_else(|| Error::decode("admission request has no namespace"))?;

    Ok(Some((namespace, pod)))
}

/// Handle mutating admission review for pods
pub async fn mutate_handler(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<DynamicObject> = match body.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "Failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    let response = match tokio::time::timeout(state.deadline, admit(&state.mutator, &req)).await {
        Ok(response) => response,
        Err(_) => {
            warn!(
                uid = %req.uid,
                deadline_ms = state.deadline.as_millis() as u64,
                policy = ?state.failure_policy,
                "Admission deadline exceeded"
            );
            deadline_response(state.failure_policy, &req)
        }
    };
    Json(response.into_review())
}

fn deadline_response(
    policy: FailurePolicy,
    request: &AdmissionRequest<DynamicObject>,
) -> AdmissionResponse {
    match policy {
        FailurePolicy::Ignore => AdmissionResponse::from(request),
        FailurePolicy::Fail => AdmissionResponse::from(request)
            .deny("telemetry injection did not finish before the admission deadline"),
    }
}

/// Process a single pod admission request
async fn admit(mutator: &PodMutator, request: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
    let uid = request.uid.clone();

    let (namespace, pod) = match decode_pod(request) {
        Ok(Some(decoded)) => decoded,
        Ok(None) => {
            debug!(uid = %uid, operation = ?request.operation, "Nothing to mutate, allowing unchanged");
            return AdmissionResponse::from(request);
        }
        Err(e) => {
            warn!(uid = %uid, error = %e, "Failed to decode pod, denying");
            return AdmissionResponse::from(request).deny(e.to_string());
        }
    };

    match mutator.mutate(&namespace, &pod).await {
        Ok(Mutation::Unchanged) => AdmissionResponse::from(request),
        Ok(Mutation::Patched(patch)) if patch.0.is_empty() => AdmissionResponse::from(request),
        Ok(Mutation::Patched(patch)) => {
            debug!(uid = %uid, operations = patch.0.len(), "Returning pod patch");
            match AdmissionResponse::from(request).with_patch(patch) {
                Ok(response) => response,
                Err(e) => {
                    error!(uid = %uid, error = %e, "Failed to encode patch, allowing unchanged");
                    AdmissionResponse::from(request)
                }
            }
        }
        Err(e) => {
            if !e.is_prerequisite() {
                error!(uid = %uid, error = %e, "Unexpected mutation failure");
            }
            warn!(uid = %uid, namespace = %namespace, error = %e, "Rejecting pod");
            AdmissionResponse::from(request).deny(e.to_string())
        }
    }
}
