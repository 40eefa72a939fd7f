//! Injectors and the annotation-keyed registry that selects them
//!
//! Each injector mutates the pod's first container (and, for language
//! agents, the pod spec) in place. Mutations are additive: existing env vars,
//! volumes, mounts and init-containers are never removed. An injector that
//! fails leaves whatever it already applied in place.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Container, EmptyDirVolumeSource, EnvVar, EnvVarSource, ObjectFieldSelector, Pod, Volume,
    VolumeMount,
};

use crate::{Error, Result};

use super::resources::{service_name, ResourceAttributes};
use super::topology::InjectionConfig;

// =============================================================================
// Annotations
// =============================================================================

/// Pod annotation enabling exporter configuration injection
pub const ANNOTATION_INJECT_CONFIG: &str = "otel.splunk.com/inject-config";

/// Pod annotation enabling Java agent injection
pub const ANNOTATION_INJECT_JAVA: &str = "otel.splunk.com/inject-java";

/// Pod annotation recording the injection outcome (`success` or `error`)
pub const ANNOTATION_STATUS: &str = "otel.splunk.com/injection-status";

/// Pod annotation recording why injection failed
pub const ANNOTATION_REASON: &str = "otel.splunk.com/injection-reason";

// =============================================================================
// Environment variables
// =============================================================================

/// Host IP of the node, where the agent collector listens
pub const ENV_SPLUNK_OTEL_AGENT: &str = "SPLUNK_OTEL_AGENT";
/// Service name reported by the SDK
pub const ENV_OTEL_SERVICE_NAME: &str = "OTEL_SERVICE_NAME";
/// Exporter endpoint
pub const ENV_OTEL_EXPORTER_OTLP_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";
/// Exporter kind
pub const ENV_OTEL_TRACES_EXPORTER: &str = "OTEL_TRACES_EXPORTER";
/// Comma-separated `key=value` resource attributes
pub const ENV_OTEL_RESOURCE_ATTRIBUTES: &str = "OTEL_RESOURCE_ATTRIBUTES";
/// JVM options picked up by every JVM at start
pub const ENV_JAVA_TOOL_OPTIONS: &str = "JAVA_TOOL_OPTIONS";

// =============================================================================
// Java agent layout
// =============================================================================

/// Name shared by the instrumentation volume and init-container
pub const INSTRUMENTATION_VOLUME: &str = "splunk-instrumentation";
/// Where the instrumentation volume is mounted
pub const INSTRUMENTATION_MOUNT_PATH: &str = "/splunk";
/// Agent jar inside the instrumentation image
const JAVA_AGENT_SOURCE: &str = "/splunk-otel-javaagent-all.jar";
/// Agent jar inside the shared volume
const JAVA_AGENT_TARGET: &str = "/splunk/splunk-otel-javaagent-all.jar";

/// Read-only inputs shared by every injector run for one request
#[derive(Clone, Copy, Debug)]
pub struct InjectionContext<'a> {
    /// Where telemetry goes
    pub config: &'a InjectionConfig,
    /// Attributes derived from the pod, its namespace and owners
    pub resources: &'a ResourceAttributes,
}

/// The closed set of injectors, selected by pod annotation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Injector {
    /// Exporter endpoint, service name and resource attributes
    Config,
    /// Java auto-instrumentation agent (includes [`Injector::Config`])
    Java,
}

/// Registry in declaration order; selection preserves this order
const REGISTRY: [Injector; 2] = [Injector::Config, Injector::Java];

impl Injector {
    /// Injectors whose trigger annotation is set to `true` (case-insensitive)
    pub fn select(annotations: Option<&BTreeMap<String, String>>) -> Vec<Injector> {
        let Some(annotations) = annotations else {
            return Vec::new();
        };
        REGISTRY
            .into_iter()
            .filter(|injector| {
                annotations
                    .get(injector.annotation())
                    .is_some_and(|v| v.eq_ignore_ascii_case("true"))
            })
            .collect()
    }

    /// Annotation that triggers this injector
    pub fn annotation(&self) -> &'static str {
        match self {
            Self::Config => ANNOTATION_INJECT_CONFIG,
            Self::Java => ANNOTATION_INJECT_JAVA,
        }
    }

    /// Apply this injector to the pod
    pub fn inject(&self, pod: &mut Pod, ctx: &InjectionContext<'_>) -> Result<()> {
        match self {
            Self::Config => inject_config(pod, ctx),
            Self::Java => inject_java(pod, ctx),
        }
    }
}

fn first_container(pod: &mut Pod) -> Result<&mut Container> {
    pod.spec
        .as_mut()
        .and_then(|spec| spec.containers.first_mut())
        .ok_or_else(|| Error::injection("pod has no containers"))
}

/// Ensure the exporter env vars are present on the first container
///
/// An existing `OTEL_RESOURCE_ATTRIBUTES` sourced through `valueFrom` is an
/// error: its content cannot be merged, and rewriting it would drop the
/// author's source.
fn inject_config(pod: &mut Pod, ctx: &InjectionContext<'_>) -> Result<()> {
    let current_env = first_container(pod)?.env.clone().unwrap_or_default();
    let sourced = current_env
        .iter()
        .any(|e| e.name == ENV_OTEL_RESOURCE_ATTRIBUTES && e.value_from.is_some());
    if sourced {
        return Err(Error::injection(format!(
            "{ENV_OTEL_RESOURCE_ATTRIBUTES} is set through valueFrom; cannot merge resource attributes"
        )));
    }

    let merged = ctx.resources.merged_with_env(&current_env);
    let service = service_name(pod, &merged.attrs);

    let mut additions = vec![
        EnvVar {
            name: ENV_SPLUNK_OTEL_AGENT.to_string(),
            value: None,
            value_from: Some(EnvVarSource {
                field_ref: Some(ObjectFieldSelector {
                    api_version: Some("v1".to_string()),
                    field_path: "status.hostIP".to_string(),
                }),
                ..Default::default()
            }),
        },
        literal(ENV_OTEL_SERVICE_NAME, service),
        literal(ENV_OTEL_EXPORTER_OTLP_ENDPOINT, ctx.config.endpoint.clone()),
        literal(ENV_OTEL_TRACES_EXPORTER, ctx.config.exporter.as_str()),
    ];

    let container = first_container(pod)?;
    let env = container.env.get_or_insert_with(Vec::new);

    let resource_env = literal(ENV_OTEL_RESOURCE_ATTRIBUTES, merged.to_env_value());
    match merged.existing_index {
        // Replace in place: a second declaration would be ambiguous
        Some(index) => env[index] = resource_env,
        None => additions.push(resource_env),
    }

    merge_env(env, additions);
    Ok(())
}

/// Ensure the Java agent is loaded by the first container
///
/// Runs [`inject_config`] first. Refuses to touch `JAVA_TOOL_OPTIONS` when it
/// is sourced through `valueFrom`, since the result could not be inspected.
fn inject_java(pod: &mut Pod, ctx: &InjectionContext<'_>) -> Result<()> {
    inject_config(pod, ctx)?;

    let agent_flag = format!("-javaagent:{JAVA_AGENT_TARGET}");
    {
        let container = first_container(pod)?;
        let env = container.env.get_or_insert_with(Vec::new);

        match env.iter_mut().find(|e| e.name == ENV_JAVA_TOOL_OPTIONS) {
            None => env.push(literal(ENV_JAVA_TOOL_OPTIONS, agent_flag)),
            Some(existing) if existing.value_from.is_some() => {
                return Err(Error::injection(format!(
                    "{ENV_JAVA_TOOL_OPTIONS} is set through valueFrom; cannot append the Java agent"
                )));
            }
            Some(existing) => {
                let value = existing.value.get_or_insert_with(String::new);
                if !value.contains(&agent_flag) {
                    if !value.is_empty() {
                        value.push(' ');
                    }
                    value.push_str(&agent_flag);
                }
            }
        }

        let mounts = container.volume_mounts.get_or_insert_with(Vec::new);
        if !mounts.iter().any(|m| m.name == INSTRUMENTATION_VOLUME) {
            mounts.push(instrumentation_mount());
        }
    }

    let spec = pod
        .spec
        .as_mut()
        .ok_or_else(|| Error::injection("pod has no spec"))?;

    let volumes = spec.volumes.get_or_insert_with(Vec::new);
    if !volumes.iter().any(|v| v.name == INSTRUMENTATION_VOLUME) {
        volumes.push(Volume {
            name: INSTRUMENTATION_VOLUME.to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        });
    }

    let init_containers = spec.init_containers.get_or_insert_with(Vec::new);
    if !init_containers
        .iter()
        .any(|c| c.name == INSTRUMENTATION_VOLUME)
    {
        init_containers.push(Container {
            name: INSTRUMENTATION_VOLUME.to_string(),
            image: Some(ctx.config.java_image.clone()),
            command: Some(vec![
                "cp".to_string(),
                JAVA_AGENT_SOURCE.to_string(),
                JAVA_AGENT_TARGET.to_string(),
            ]),
            volume_mounts: Some(vec![instrumentation_mount()]),
            ..Default::default()
        });
    }

    Ok(())
}

fn instrumentation_mount() -> VolumeMount {
    VolumeMount {
        name: INSTRUMENTATION_VOLUME.to_string(),
        mount_path: INSTRUMENTATION_MOUNT_PATH.to_string(),
        ..Default::default()
    }
}

fn literal(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        value_from: None,
    }
}

/// Append each new var unless an identical one (name, value and source) exists
fn merge_env(env: &mut Vec<EnvVar>, additions: Vec<EnvVar>) {
    for var in additions {
        if !env.contains(&var) {
            env.push(var);
        }
    }
}
