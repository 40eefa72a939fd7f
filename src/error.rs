//! Error types for the Splunk OpenTelemetry operator

use thiserror::Error;

/// Main error type for operator operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// The admission payload could not be decoded into a pod
    #[error("decode error: {0}")]
    Decode(String),

    /// The pod's namespace could not be looked up
    #[error("namespace error: {0}")]
    Namespace(String),

    /// The cluster-wide collector topology is missing or ambiguous
    #[error("topology error: {0}")]
    Topology(String),

    /// An injector refused to mutate the pod
    #[error("injection error: {0}")]
    Injection(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid operator or server configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// The HTTPS listener failed
    #[error("server error: {0}")]
    Server(String),
}

impl Error {
    /// Create a decode error with the given message
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a namespace lookup error with the given message
    pub fn namespace(msg: impl Into<String>) -> Self {
        Self::Namespace(msg.into())
    }

    /// Create a topology error with the given message
    pub fn topology(msg: impl Into<String>) -> Self {
        Self::Topology(msg.into())
    }

    /// Create an injection error with the given message
    pub fn injection(msg: impl Into<String>) -> Self {
        Self::Injection(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a server error with the given message
    pub fn server(msg: impl Into<String>) -> Self {
        Self::Server(msg.into())
    }

    /// Returns true for failed lookups the mutation pipeline cannot proceed without
    ///
    /// These reject the admission request. Every other failure during
    /// injection is recorded on the pod instead.
    pub fn is_prerequisite(&self) -> bool {
        matches!(self, Self::Namespace(_) | Self::Topology(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Story: a missing collector resource explains how to fix it
    #[test]
    fn story_topology_error_is_descriptive() {
        let err = Error::topology("no Agent resource found; deploy one before enabling injection");
        assert!(err.to_string().contains("topology error"));
        assert!(err.to_string().contains("deploy one"));
        assert!(err.is_prerequisite());
    }

    /// Story: injector failures are not admission-level failures
    #[test]
    fn story_injection_errors_do_not_reject_pods() {
        let err = Error::injection("JAVA_TOOL_OPTIONS is sourced from valueFrom");
        assert!(!err.is_prerequisite());
        assert!(err.to_string().starts_with("injection error"));

        assert!(!Error::decode("bad payload").is_prerequisite());
        assert!(!Error::serialization("bad pod").is_prerequisite());
    }

    #[test]
    fn namespace_errors_are_prerequisites() {
        let err = Error::namespace(format!("namespace {} not found", "payments"));
        assert!(err.is_prerequisite());
        assert!(err.to_string().contains("payments"));
    }

    #[test]
    fn error_helpers_accept_str_and_string() {
        match Error::config("missing cert") {
            Error::Config(msg) => assert_eq!(msg, "missing cert"),
            _ => panic!("Expected Config variant"),
        }
        match Error::decode(String::from("no object")) {
            Error::Decode(msg) => assert_eq!(msg, "no object"),
            _ => panic!("Expected Decode variant"),
        }
    }
}
