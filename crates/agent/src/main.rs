//! Outlier Agent - standalone rate-based outlier detector
//!
//! Runs the detector with its periodic sweep and reporter, serves health,
//! status and metrics over HTTP, and optionally drives synthetic traffic.

use anyhow::Result;
use outlier_agent::{
    api,
    config::{AgentConfig, LogFormat},
    driver,
};
use outlier_lib::OutlierDetector;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Configuration decides the log format, so it is loaded first
    let config = AgentConfig::load()?;
    init_tracing(config.log_format);

    info!(version = AGENT_VERSION, "Starting outlier-agent");
    info!(
        threshold = config.detector.outlier_rate_threshold,
        max_outlier_percent = config.detector.max_outlier_percent,
        algorithm = %config.detector.rate_algorithm,
        "Agent configured"
    );

    let detector = OutlierDetector::new(config.detector.clone())?;
    detector.init()?;

    let (shutdown_tx, _) = broadcast::channel(1);

    let api_port = config.api_port;
    let app_state = Arc::new(api::AppState::new(detector.clone()));
    let api_handle = tokio::spawn(async move {
        if let Err(e) = api::serve(api_port, app_state).await {
            error!(error = %e, "API server failed");
        }
    });

    let driver_handle = config.driver.enabled.then(|| {
        tokio::spawn(driver::run(
            detector.clone(),
            config.driver.clone(),
            shutdown_tx.subscribe(),
        ))
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    let _ = shutdown_tx.send(());
    if let Some(handle) = driver_handle {
        let _ = handle.await;
    }
    api_handle.abort();
    detector.shutdown().await;

    Ok(())
}
