//! InferenceSource - Where raw classifications come from
//!
//! ## Responsibilities
//!
//! - One interface over the real classifier and the synthetic demo generator
//! - Pick the variant once at startup (`select_source`)
//! - Carry per-variant pacing so the loop never branches on the variant

mod classifier;
mod demo;

pub use classifier::{Classifier, RealClassifierSource, REAL_PACING};
pub use demo::{DemoSource, DEMO_LABELS, DEMO_MODEL_NAME, DEMO_PACING};

use crate::config::ClassifierConfig;
use crate::eim_runner::EimRunner;
use crate::error::Result;
use crate::frame_capture::V4l2Camera;
use crate::models::RawClassification;
use async_trait::async_trait;
use std::time::Duration;

/// Producer of one raw classification per call
#[async_trait]
pub trait InferenceSource: Send {
    /// Model identifier for payloads
    fn model_name(&self) -> &str;

    /// Delay between loop iterations
    fn pacing(&self) -> Duration;

    /// Produce one classification. `Error::Capture` means "try next cycle".
    async fn produce(&mut self) -> Result<RawClassification>;

    /// Release devices and processes. Idempotent.
    async fn release(&mut self);
}

/// Choose the inference source for this run.
///
/// Falls back to the demo generator when no usable model is configured or
/// the runner cannot be started. A capture device that cannot be opened is
/// returned as `Error::DeviceUnavailable`.
pub async fn select_source(config: &ClassifierConfig) -> Result<Box<dyn InferenceSource>> {
    let Some(model_path) = config.model_path.as_ref() else {
        tracing::info!("No model configured, running in demo mode");
        return Ok(Box::new(DemoSource::new()));
    };

    if !model_path.exists() {
        tracing::warn!(
            model_path = %model_path.display(),
            "Model file not found, running in demo mode"
        );
        return Ok(Box::new(DemoSource::new()));
    }

    let mut runner = match EimRunner::start(model_path).await {
        Ok(runner) => runner,
        Err(e) => {
            tracing::warn!(
                model_path = %model_path.display(),
                error = %e,
                "Model runner unavailable, running in demo mode"
            );
            return Ok(Box::new(DemoSource::new()));
        }
    };

    let camera = match V4l2Camera::open(config.camera_device, config.capture_timeout) {
        Ok(camera) => camera,
        Err(e) => {
            runner.stop().await;
            return Err(e);
        }
    };

    tracing::info!(
        model = %runner.model_name(),
        camera_device = config.camera_device,
        "Running with real classifier"
    );
    Ok(Box::new(RealClassifierSource::new(runner, camera)))
}
