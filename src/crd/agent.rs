//! Agent Custom Resource Definition
//!
//! The Agent CRD is the cluster-wide description of the Splunk OpenTelemetry
//! collectors: a node-local agent, a single cluster receiver and an optional
//! gateway. The admission webhook reads it to decide where injected workloads
//! should send their telemetry.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Specification for an Agent
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "otel.splunk.com",
    version = "v1alpha1",
    kind = "Agent",
    plural = "agents",
    status = "AgentStatus",
    namespaced,
    printcolumn = r#"{"name":"Realm","type":"string","jsonPath":".spec.realm"}"#,
    printcolumn = r#"{"name":"Cluster","type":"string","jsonPath":".spec.clusterName"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AgentSpec {
    /// Name identifying this cluster in Splunk dashboards
    pub cluster_name: String,

    /// Splunk APM realm of the account (e.g. us0, us1)
    pub realm: String,

    /// Auto-instrumentation settings
    #[serde(default)]
    pub instrumentation: Instrumentation,

    /// Collector deployed as a DaemonSet on every node
    #[serde(default)]
    pub agent: CollectorSpec,

    /// Single collector instance monitoring the cluster itself
    #[serde(default)]
    pub cluster_receiver: CollectorSpec,

    /// Collector Deployment that fronts export to Splunk APM
    #[serde(default)]
    pub gateway: CollectorSpec,
}

impl AgentSpec {
    /// The node-local agent is enabled unless explicitly turned off
    pub fn agent_enabled(&self) -> bool {
        self.agent.enabled.unwrap_or(true)
    }

    /// The gateway is disabled unless explicitly turned on
    pub fn gateway_enabled(&self) -> bool {
        self.gateway.enabled.unwrap_or(false)
    }

    /// Java agent image, if one is set
    pub fn java_image(&self) -> Option<&str> {
        self.instrumentation
            .java
            .image
            .as_deref()
            .filter(|image| !image.is_empty())
    }
}

/// Settings for one collector tier
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CollectorSpec {
    /// Whether this collector tier is deployed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Collector container image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Raw collector configuration YAML, overriding the generated one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,

    /// Replica count (gateway only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
}

/// Auto-instrumentation settings per language
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Instrumentation {
    /// Java agent settings
    #[serde(default)]
    pub java: AutoInstrumentation,
}

/// Settings for one language agent
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AutoInstrumentation {
    /// Image carrying the agent payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// Observed state of an Agent
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    /// Version of the managed collector
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Messages about actions performed on this resource
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    #[test]
    fn test_collector_defaults() {
        let spec = AgentSpec::default();
        assert!(spec.agent_enabled());
        assert!(!spec.gateway_enabled());
        assert_eq!(spec.java_image(), None);
    }

    #[test]
    fn test_explicit_collector_toggles() {
        let spec = AgentSpec {
            agent: CollectorSpec {
                enabled: Some(false),
                ..Default::default()
            },
            gateway: CollectorSpec {
                enabled: Some(true),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(!spec.agent_enabled());
        assert!(spec.gateway_enabled());
    }

    #[test]
    fn test_empty_java_image_is_unset() {
        let mut spec = AgentSpec::default();
        spec.instrumentation.java.image = Some(String::new());
        assert_eq!(spec.java_image(), None);

        spec.instrumentation.java.image = Some("example.com/java:v2".to_string());
        assert_eq!(spec.java_image(), Some("example.com/java:v2"));
    }

    #[test]
    fn test_spec_deserializes_from_yaml() {
        let yaml = r#"
clusterName: prod-east
realm: us1
agent:
  enabled: false
gateway:
  enabled: true
  replicas: 3
instrumentation:
  java:
    image: quay.io/signalfx/splunk-otel-instrumentation-java:v1.6.0
"#;
        let spec: AgentSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.cluster_name, "prod-east");
        assert_eq!(spec.realm, "us1");
        assert!(!spec.agent_enabled());
        assert!(spec.gateway_enabled());
        assert_eq!(spec.gateway.replicas, Some(3));
        assert_eq!(
            spec.java_image(),
            Some("quay.io/signalfx/splunk-otel-instrumentation-java:v1.6.0")
        );
    }

    #[test]
    fn test_crd_metadata() {
        let crd = Agent::crd();
        assert_eq!(crd.spec.group, "otel.splunk.com");
        assert_eq!(crd.spec.names.kind, "Agent");
        assert_eq!(crd.spec.scope, "Namespaced");
    }
}
