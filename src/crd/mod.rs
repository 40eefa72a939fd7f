//! Custom Resource Definitions for the operator
//!
//! The pipeline only reads these resources; reconciling them into
//! collector workloads happens elsewhere.

mod agent;

pub use agent::{Agent, AgentSpec, AgentStatus, AutoInstrumentation, CollectorSpec, Instrumentation};
