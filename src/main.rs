//! Splunk OpenTelemetry operator - pod telemetry injection webhook

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use kube::{Client, CustomResourceExt};
use tracing::info;

use splunk_otel_operator::crd::Agent;
use splunk_otel_operator::telemetry::{init_telemetry, LogFormat, TelemetryConfig};
use splunk_otel_operator::webhook::cluster::KubeClusterState;
use splunk_otel_operator::webhook::server::{start_server, ServerConfig};
use splunk_otel_operator::webhook::{FailurePolicy, OperatorConfig, WebhookState};
use splunk_otel_operator::{
    DEFAULT_DEADLINE_SECS, DEFAULT_GATEWAY_SERVICE, DEFAULT_JAVA_AGENT_IMAGE,
    DEFAULT_OPERATOR_NAMESPACE,
};

/// Splunk OpenTelemetry operator - injects telemetry settings into pods
#[derive(Parser, Debug)]
#[command(name = "splunk-otel-operator", version, about, long_about = None)]
struct Cli {
    /// Print the Agent CRD manifest and exit
    #[arg(long)]
    crd: bool,

    /// Log line format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the admission webhook (default mode)
    Webhook(WebhookArgs),
}

/// Webhook mode arguments
#[derive(Parser, Debug)]
struct WebhookArgs {
    /// Address the HTTPS server binds to
    #[arg(long, env = "WEBHOOK_ADDR", default_value = "0.0.0.0:9443")]
    addr: SocketAddr,

    /// PEM serving certificate
    #[arg(
        long,
        env = "WEBHOOK_TLS_CERT",
        default_value = "/tmp/k8s-webhook-server/serving-certs/tls.crt"
    )]
    tls_cert: PathBuf,

    /// PEM private key for the serving certificate
    #[arg(
        long,
        env = "WEBHOOK_TLS_KEY",
        default_value = "/tmp/k8s-webhook-server/serving-certs/tls.key"
    )]
    tls_key: PathBuf,

    /// Seconds an admission request may take before the failure policy applies
    #[arg(long, env = "WEBHOOK_DEADLINE_SECS", default_value_t = DEFAULT_DEADLINE_SECS)]
    deadline_secs: u64,

    /// Answer given when the deadline passes
    #[arg(long, env = "WEBHOOK_FAILURE_POLICY", value_enum, default_value_t = FailurePolicy::Ignore)]
    failure_policy: FailurePolicy,

    /// Namespace the operator and gateway collector run in
    #[arg(long, env = "OPERATOR_NAMESPACE", default_value = DEFAULT_OPERATOR_NAMESPACE)]
    operator_namespace: String,

    /// Name of the gateway collector Service
    #[arg(long, env = "GATEWAY_SERVICE", default_value = DEFAULT_GATEWAY_SERVICE)]
    gateway_service: String,

    /// Java agent image used when the Agent resource does not name one
    #[arg(long, env = "JAVA_AGENT_IMAGE", default_value = DEFAULT_JAVA_AGENT_IMAGE)]
    java_agent_image: String,
}

impl WebhookArgs {
    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            addr: self.addr,
            cert_path: self.tls_cert.clone(),
            key_path: self.tls_key.clone(),
        }
    }

    fn operator_config(&self) -> OperatorConfig {
        OperatorConfig {
            namespace: self.operator_namespace.clone(),
            gateway_service: self.gateway_service.clone(),
            default_java_image: self.java_agent_image.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install crypto provider - FIPS-validated aws-lc-rs
    // Serving TLS is impossible without it.
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!(
            "CRITICAL: Failed to install FIPS-validated crypto provider: {:?}. \
             The webhook cannot serve TLS without a working crypto provider.",
            e
        );
        std::process::exit(1);
    }

    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&Agent::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    init_telemetry(TelemetryConfig {
        format: cli.log_format,
        ..Default::default()
    })?;

    let args = match cli.command {
        Some(Commands::Webhook(args)) => args,
        None => WebhookArgs::parse_from(["webhook"]),
    };
    run_webhook(args).await
}

/// Run the admission webhook until shutdown
async fn run_webhook(args: WebhookArgs) -> anyhow::Result<()> {
    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    let operator = args.operator_config();
    info!(
        namespace = %operator.namespace,
        gateway_service = %operator.gateway_service,
        java_image = %operator.default_java_image,
        deadline_secs = args.deadline_secs,
        failure_policy = ?args.failure_policy,
        "Starting pod mutation webhook"
    );

    let state = WebhookState::new(Arc::new(KubeClusterState::new(client)), operator)
        .with_deadline(Duration::from_secs(args.deadline_secs))
        .with_failure_policy(args.failure_policy);

    start_server(args.server_config(), Arc::new(state)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults_to_webhook_mode() {
        let cli = Cli::parse_from(["splunk-otel-operator"]);
        assert!(!cli.crd);
        assert!(cli.command.is_none());
        assert_eq!(cli.log_format, LogFormat::Json);
    }

    #[test]
    fn test_webhook_args_map_to_configs() {
        let cli = Cli::parse_from([
            "splunk-otel-operator",
            "--log-format",
            "text",
            "webhook",
            "--addr",
            "127.0.0.1:8443",
            "--failure-policy",
            "fail",
            "--operator-namespace",
            "observability",
        ]);
        assert_eq!(cli.log_format, LogFormat::Text);

        let Some(Commands::Webhook(args)) = cli.command else {
            panic!("Expected webhook subcommand");
        };
        assert_eq!(args.failure_policy, FailurePolicy::Fail);
        assert_eq!(args.server_config().addr.port(), 8443);

        let operator = args.operator_config();
        assert_eq!(operator.namespace, "observability");
        assert_eq!(operator.gateway_service, DEFAULT_GATEWAY_SERVICE);
        assert_eq!(operator.default_java_image, DEFAULT_JAVA_AGENT_IMAGE);
    }

    #[test]
    fn test_default_webhook_args_match_server_defaults() {
        let args = WebhookArgs::parse_from(["webhook"]);
        let server = args.server_config();
        let defaults = ServerConfig::default();
        assert_eq!(server.addr, defaults.addr);
        assert_eq!(server.cert_path, defaults.cert_path);
        assert_eq!(server.key_path, defaults.key_path);
        assert_eq!(args.deadline_secs, DEFAULT_DEADLINE_SECS);
        assert_eq!(args.operator_config(), OperatorConfig::default());
    }
}
