//! Arbiter Service - tracks OpenShift images and coordinates Hub notification checks
//!
//! This service:
//! - Loads every image the cluster knows about and queues it for a Hub check
//! - Watches for new images and tracks them as they appear
//! - Re-checks the whole inventory on a fixed interval
//! - Drains outstanding checks before exiting on SIGTERM / Ctrl+C

use anyhow::{bail, Context, Result};
use arbiter::{ArbiterConfig, Coordinator};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable naming the mounted configuration file.
const ENV_CONFIG_PATH: &str = "ARBITER_CONFIG";

/// Default location of the mounted configuration file.
const DEFAULT_CONFIG_PATH: &str = "/config/config.yaml";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting scan arbiter v{}", env!("CARGO_PKG_VERSION"));

    let config_path =
        std::env::var(ENV_CONFIG_PATH).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = match ArbiterConfig::from_mounted_file(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!("Failed to load configuration from {config_path}, using defaults: {e}");
            let mut cfg = ArbiterConfig::default();
            cfg.apply_env_overrides();
            cfg
        }
    };
    config
        .validate()
        .context("Configuration validation failed")?;

    let client = kube::Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let arbiter = Coordinator::connect(config, client);
    if !arbiter.validate_backend_config().await {
        bail!(
            "Hub login failed for {}, check the hub configuration",
            arbiter.config().hub.base_url()
        );
    }

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    arbiter.start().await;
    arbiter.load(shutdown.clone()).await;
    arbiter.watch().await;

    shutdown.cancelled().await;
    arbiter.stop().await;

    info!("Arbiter shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully");
        },
        () = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
    }
}
