//! HTTPS listener for the admission webhook
//!
//! The API server only talks to webhooks over TLS. Certificates are read
//! from disk, where cert-manager (or the operator's installer) mounts them.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use tracing::{info, warn};

use crate::{Error, Result, DEFAULT_WEBHOOK_PORT};

use super::{webhook_router, WebhookState};

/// Default directory holding the serving certificate and key
pub const DEFAULT_CERT_DIR: &str = "/tmp/k8s-webhook-server/serving-certs";

/// Time in-flight admission requests get to finish after SIGTERM
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Server configuration
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Address to bind the server
    pub addr: SocketAddr,
    /// PEM certificate chain
    pub cert_path: PathBuf,
    /// PEM private key
    pub key_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_WEBHOOK_PORT)),
            cert_path: PathBuf::from(DEFAULT_CERT_DIR).join("tls.crt"),
            key_path: PathBuf::from(DEFAULT_CERT_DIR).join("tls.key"),
        }
    }
}

/// Serve the webhook until SIGINT/SIGTERM
pub async fn start_server(config: ServerConfig, state: Arc<WebhookState>) -> Result<()> {
    let tls_config = RustlsConfig::from_pem_file(&config.cert_path, &config.key_path)
        .await
        .map_err(|e| {
            Error::config(format!(
                "failed to load TLS material from {} and {}: {}",
                config.cert_path.display(),
                config.key_path.display(),
                e
            ))
        })?;

    let handle = Handle::new();
    tokio::spawn(shutdown_on_signal(handle.clone()));

    info!(addr = %config.addr, "Starting webhook server");

    axum_server::bind_rustls(config.addr, tls_config)
        .handle(handle)
        .serve(webhook_router(state).into_make_service())
        .await
        .map_err(|e| Error::server(format!("webhook server failed: {e}")))?;

    info!("Webhook server stopped");
    Ok(())
}

async fn shutdown_on_signal(handle: Handle) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let term = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let term = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = term => {},
    }

    info!(grace_secs = SHUTDOWN_GRACE.as_secs(), "Shutting down webhook server");
    handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
}
