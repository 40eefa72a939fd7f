//! Splunk OpenTelemetry operator - admission-time telemetry injection
//!
//! The operator manages the cluster's OpenTelemetry collectors and wires
//! application pods to them. Every pod create/update passes through a
//! mutating admission webhook that decides, from pod annotations and the
//! cluster-wide `Agent` resource, which telemetry settings to inject.
//!
//! # Architecture
//!
//! - The webhook decodes the pod and selects injectors by annotation
//! - Resource attributes are derived from the pod and its ownership chain
//! - Injectors mutate a private working copy of the pod
//! - The response carries a JSON patch between the original and final pod
//!
//! Injection failures never block scheduling: the pod is admitted and marked
//! with a status annotation instead.
//!
//! # Modules
//!
//! - [`crd`] - The cluster-wide `Agent` custom resource
//! - [`webhook`] - Pod mutation pipeline and its HTTPS server
//! - [`telemetry`] - Structured logging setup
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod telemetry;
pub mod webhook;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Default Configuration Constants
// =============================================================================

/// Default namespace the operator and its collectors run in
pub const DEFAULT_OPERATOR_NAMESPACE: &str = "splunk-otel-operator-system";

/// Default name of the gateway collector Service
pub const DEFAULT_GATEWAY_SERVICE: &str = "splunk-otel-collector";

/// Java agent image used when the `Agent` resource does not name one
pub const DEFAULT_JAVA_AGENT_IMAGE: &str =
    "quay.io/signalfx/splunk-otel-instrumentation-java:v1.14.1";

/// Default port for the webhook HTTPS server
///
/// Port 9443 matches the port admission webhooks conventionally listen on
/// and avoids requiring root privileges.
pub const DEFAULT_WEBHOOK_PORT: u16 = 9443;

/// Default admission deadline in seconds
///
/// The API server gives webhooks at most 30s; staying in single digits keeps
/// pod creation responsive when the API server is slow to answer lookups.
pub const DEFAULT_DEADLINE_SECS: u64 = 5;
