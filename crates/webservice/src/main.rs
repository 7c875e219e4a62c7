//! `webservice` binary entry point.
//!
//! Startup sequence:
//! 1. Load and validate [`Config`] from environment variables.
//! 2. Initialise the telemetry pipeline.
//! 3. Load the TLS certificate (bundled, or overridden from disk).
//! 4. Build the [`ServiceManager`] and reconcile it with the enable flag.
//! 5. Spawn the background task that keeps following the enable flag.
//! 6. Stop both listeners on Ctrl-C / SIGTERM and flush telemetry.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use common::NoopKeepAwake;
use tracing::info;

use webservice::routes::StatusRoutes;
use webservice::server::reconcile_task;
use webservice::{telemetry, Config, ServiceManager, TlsFactory};

#[tokio::main]
async fn main() -> Result<()> {
    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let cfg = Config::from_env().map_err(|e| {
        // Telemetry is not yet up; write to stderr directly.
        eprintln!("ERROR: configuration invalid: {e:#}");
        e
    })?;

    // -----------------------------------------------------------------------
    // 2. Telemetry
    // -----------------------------------------------------------------------
    telemetry::init_telemetry(cfg.otel_exporter_otlp_endpoint.as_deref(), &cfg.log_level)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        http_port = cfg.http_port,
        https_port = cfg.https_port,
        enabled = cfg.webservice_enabled,
        "webservice starting"
    );

    // -----------------------------------------------------------------------
    // 3. TLS material
    // -----------------------------------------------------------------------
    let tls = match (&cfg.tls_cert_path, &cfg.tls_key_path) {
        (Some(cert), Some(key)) => TlsFactory::from_files(cert, key)?,
        _ => TlsFactory::embedded().context("bundled TLS certificate is unusable")?,
    };

    // -----------------------------------------------------------------------
    // 4. Service manager
    // -----------------------------------------------------------------------
    let manager = Arc::new(ServiceManager::new(
        cfg.server_settings(),
        tls,
        Arc::new(StatusRoutes),
        Arc::new(NoopKeepAwake),
    ));
    manager.reconcile(cfg.webservice_enabled).await;

    // -----------------------------------------------------------------------
    // 5. Background reconciliation
    // -----------------------------------------------------------------------
    let follow = reconcile_task(
        Arc::clone(&manager),
        Duration::from_secs(cfg.reconcile_interval_secs),
        || Config::from_env().map(|c| c.webservice_enabled),
    );

    // -----------------------------------------------------------------------
    // 6. Shutdown
    // -----------------------------------------------------------------------
    shutdown_signal().await;
    follow.abort();
    manager.stop_all().await;
    telemetry::shutdown_telemetry();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl-C"),
        () = terminate => info!("received SIGTERM"),
    }
}
