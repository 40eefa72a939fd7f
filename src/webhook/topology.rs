//! Collector topology: where injected workloads send their telemetry
//!
//! Derived once per admission request from the single cluster-wide `Agent`
//! resource and shared read-only by every injector run for that request.

use crate::crd::{Agent, AgentSpec};
use crate::{Error, Result};

use super::OperatorConfig;

/// OTLP gRPC port exposed by the agent and gateway collectors
const OTLP_GRPC_PORT: u16 = 4317;

/// Exporter the instrumented SDK should use
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExporterKind {
    /// OTLP to an in-cluster collector
    Otlp,
    /// Jaeger thrift straight to Splunk's trace ingest
    JaegerThriftSplunk,
}

impl ExporterKind {
    /// Value written to `OTEL_TRACES_EXPORTER`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Otlp => "otlp",
            Self::JaegerThriftSplunk => "jaeger-thrift-splunk",
        }
    }
}

impl std::fmt::Display for ExporterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Telemetry wiring shared by all injectors for one request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InjectionConfig {
    /// Exporter the SDK should use
    pub exporter: ExporterKind,
    /// Endpoint the exporter sends to
    pub endpoint: String,
    /// Image carrying the Java agent payload
    pub java_image: String,
}

impl InjectionConfig {
    /// Build the config from the result of listing `Agent` resources
    ///
    /// Exactly one `Agent` must exist. Zero or several are configuration
    /// errors: there is no sensible default collector to point pods at.
    pub fn from_agents(agents: &[Agent], operator: &OperatorConfig) -> Result<Self> {
        match agents {
            [] => Err(Error::topology(
                "no Agent resource found; deploy an Agent before enabling injection",
            )),
            [agent] => Ok(Self::from_spec(&agent.spec, operator)),
            many => Err(Error::topology(format!(
                "found {} Agent resources ({}); exactly one is supported",
                many.len(),
                many.iter()
                    .map(|a| a.metadata.name.as_deref().unwrap_or("<unnamed>"))
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }

    /// Build the config from an `Agent` spec
    pub fn from_spec(spec: &AgentSpec, operator: &OperatorConfig) -> Self {
        let (exporter, endpoint) = if spec.agent_enabled() {
            (
                ExporterKind::Otlp,
                format!(
                    "http://$({}):{}",
                    super::inject::ENV_SPLUNK_OTEL_AGENT,
                    OTLP_GRPC_PORT
                ),
            )
        } else if spec.gateway_enabled() {
            (
                ExporterKind::Otlp,
                format!(
                    "http://{}.{}:{}",
                    operator.gateway_service, operator.namespace, OTLP_GRPC_PORT
                ),
            )
        } else {
            (
                ExporterKind::JaegerThriftSplunk,
                format!("https://ingest.{}.signalfx.com/v2/trace", spec.realm),
            )
        };

        Self {
            exporter,
            endpoint,
            java_image: spec
                .java_image()
                .unwrap_or(&operator.default_java_image)
                .to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::CollectorSpec;

    fn spec(agent: Option<bool>, gateway: Option<bool>, realm: &str) -> AgentSpec {
        AgentSpec {
            realm: realm.to_string(),
            agent: CollectorSpec {
                enabled: agent,
                ..Default::default()
            },
            gateway: CollectorSpec {
                enabled: gateway,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn agent(name: &str, spec: AgentSpec) -> Agent {
        Agent::new(name, spec)
    }

    #[test]
    fn test_agent_enabled_points_at_node_local_collector() {
        let cfg = InjectionConfig::from_spec(&spec(None, None, "us0"), &OperatorConfig::default());
        assert_eq!(cfg.exporter, ExporterKind::Otlp);
        assert_eq!(cfg.endpoint, "http://$(SPLUNK_OTEL_AGENT):4317");
        assert_eq!(cfg.java_image, crate::DEFAULT_JAVA_AGENT_IMAGE);
    }

    #[test]
    fn test_gateway_only_points_at_gateway_service() {
        let cfg = InjectionConfig::from_spec(
            &spec(Some(false), Some(true), "us0"),
            &OperatorConfig::default(),
        );
        assert_eq!(cfg.exporter, ExporterKind::Otlp);
        assert_eq!(
            cfg.endpoint,
            "http://splunk-otel-collector.splunk-otel-operator-system:4317"
        );
    }

    #[test]
    fn test_gateway_endpoint_follows_operator_config() {
        let operator = OperatorConfig {
            namespace: "observability".to_string(),
            gateway_service: "otel-gateway".to_string(),
            ..Default::default()
        };
        let cfg = InjectionConfig::from_spec(&spec(Some(false), Some(true), "us0"), &operator);
        assert_eq!(cfg.endpoint, "http://otel-gateway.observability:4317");
    }

    /// Story: with no in-cluster collector, traces go straight to the realm's ingest
    #[test]
    fn story_no_collectors_exports_to_realm_ingest() {
        let cfg = InjectionConfig::from_spec(
            &spec(Some(false), Some(false), "mars0"),
            &OperatorConfig::default(),
        );
        assert_eq!(cfg.exporter, ExporterKind::JaegerThriftSplunk);
        assert_eq!(cfg.exporter.to_string(), "jaeger-thrift-splunk");
        assert_eq!(cfg.endpoint, "https://ingest.mars0.signalfx.com/v2/trace");
    }

    #[test]
    fn test_java_image_from_spec_wins_over_default() {
        let mut s = spec(None, None, "us0");
        s.instrumentation.java.image =
            Some("quay.io/signalfx/splunk-otel-instrumentation-java:v2.0".to_string());
        let cfg = InjectionConfig::from_spec(&s, &OperatorConfig::default());
        assert_eq!(
            cfg.java_image,
            "quay.io/signalfx/splunk-otel-instrumentation-java:v2.0"
        );
    }

    /// Story: zero Agents is a configuration error, not a silent default
    #[test]
    fn story_missing_agent_is_rejected() {
        let err = InjectionConfig::from_agents(&[], &OperatorConfig::default()).unwrap_err();
        assert!(matches!(err, Error::Topology(_)));
        assert!(err.to_string().contains("no Agent resource"));
    }

    /// Story: two Agents make the topology ambiguous
    #[test]
    fn story_duplicate_agents_are_rejected() {
        let agents = vec![
            agent("primary", spec(None, None, "us0")),
            agent("secondary", spec(None, None, "us1")),
        ];
        let err = InjectionConfig::from_agents(&agents, &OperatorConfig::default()).unwrap_err();
        assert!(err.is_prerequisite());
        assert!(err.to_string().contains("found 2 Agent resources"));
        assert!(err.to_string().contains("primary, secondary"));
    }

    #[test]
    fn test_single_agent_is_used() {
        let agents = vec![agent("splunk-otel", spec(Some(false), Some(false), "eu0"))];
        let cfg = InjectionConfig::from_agents(&agents, &OperatorConfig::default()).unwrap();
        assert_eq!(cfg.endpoint, "https://ingest.eu0.signalfx.com/v2/trace");
    }
}
