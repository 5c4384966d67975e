//! vn-affinity-admission library crate
//!
//! A mutating admission webhook that adds a soft node anti-affinity for
//! virtual nodes plus the tolerations needed to burst onto them.

pub mod config;
pub mod error;
pub mod health;
pub mod tls;
pub mod webhooks;

pub use config::{Args, ClientAuthMode, PolicyConfig, TlsSettings, WebhookConfig};
pub use error::{Error, Result};
pub use health::{HealthState, Metrics};
pub use webhooks::{WebhookState, create_webhook_router, run_webhook_server};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum_server::Handle;
use kube::Client;
use tracing::{error, info, warn};

use health::run_health_server;
use tls::ClusterCaSource;

/// Grace period for in-flight admission reviews during shutdown
const SHUTDOWN_GRACE_PERIOD_SECS: u64 = 5;

/// Run the webhook until `shutdown` resolves.
///
/// TLS is provisioned before anything listens; a failure there is returned
/// without serving any traffic.
pub async fn run(config: WebhookConfig, shutdown: impl Future<Output = ()>) -> Result<()> {
    // Another dependency may already have installed a provider; either is fine for the kube client.
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    info!(
        port = config.port,
        label_key = %config.policy.key,
        label_value = %config.policy.value,
        "Starting vn-affinity-admission"
    );

    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    let tls_config = tls::provision(&ClusterCaSource::new(client), &config.tls).await?;

    let metrics = Arc::new(Metrics::new());
    let health_state = Arc::new(HealthState::new(metrics.clone()));
    let webhook_state = Arc::new(WebhookState::new(
        config.policy.clone(),
        metrics,
        config.request_timeout,
    ));

    let health_task = tokio::spawn(run_health_server(health_state.clone(), config.health_port));

    let handle = Handle::new();
    {
        let handle = handle.clone();
        let health_state = health_state.clone();
        tokio::spawn(async move {
            if let Some(addr) = handle.listening().await {
                info!(%addr, "Webhook listener bound, marking ready");
                health_state.set_ready(true);
            }
        });
    }

    let server = run_webhook_server(webhook_state, tls_config, config.port, handle.clone());
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            health_state.set_ready(false);
            result?;
            warn!("Webhook server stopped");
        }
        result = health_task => {
            health_state.set_ready(false);
            match result {
                Ok(Ok(())) => warn!("Health server stopped"),
                Ok(Err(e)) => {
                    error!("Health server error: {}", e);
                    return Err(e.into());
                }
                Err(e) => error!("Health server task panicked: {}", e),
            }
        }
        _ = shutdown => {
            info!("Received shutdown signal, initiating graceful shutdown...");
            health_state.set_ready(false);
            handle.graceful_shutdown(Some(Duration::from_secs(SHUTDOWN_GRACE_PERIOD_SECS)));
            server.await?;
        }
    }

    info!("Webhook stopped");
    Ok(())
}
