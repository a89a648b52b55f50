//! Inference Publisher - edge classification results to MQTT
//!
//! Main entry point.

use inference_publisher::{
    inference_loop::InferenceLoop, inference_source::select_source, mqtt_publisher::MqttPublisher,
    AppConfig,
};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "inference_publisher=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Inference Publisher v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::from_env();
    tracing::info!(
        broker = %config.mqtt.broker,
        port = config.mqtt.port,
        topic = %config.mqtt.topic,
        model_path = ?config.classifier.model_path,
        camera_device = config.classifier.camera_device,
        "Configuration loaded"
    );

    config.validate()?;

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    let publisher = Arc::new(MqttPublisher::new(config.mqtt.clone()));
    let outcome =
        InferenceLoop::start(publisher, || select_source(&config.classifier), cancel).await;

    tracing::info!(reason = ?outcome.reason, "Shutdown complete");
    Ok(outcome.exit_code())
}

/// Cancel on Ctrl+C or SIGTERM
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, stopping");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, stopping");
        }
    }

    cancel.cancel();
}
