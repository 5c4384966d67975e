//! vn-affinity-admission - mutating admission webhook for virtual-node placement.
//!
//! This is the main entry point that:
//! - Parses flags (with environment fallbacks)
//! - Initializes structured logging
//! - Runs the webhook until SIGTERM or SIGINT

use clap::Parser;
use tokio::signal;
use tracing::error;

use vn_affinity_admission::Args;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("vn_affinity_admission=info".parse()?)
                .add_directive("kube=info".parse()?),
        )
        .json()
        .init();

    let config = args.into_config()?;

    if let Err(e) = vn_affinity_admission::run(config, shutdown_signal()).await {
        error!(error = %e, "Webhook failed");
        return Err(e.into());
    }
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
///
/// Note: Signal handler setup failures are fatal - the webhook cannot shut down
/// gracefully without them. Using expect() here is intentional.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
