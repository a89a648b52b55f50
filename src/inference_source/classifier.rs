//! Real classifier source: camera frame → model → label scores

use super::InferenceSource;
use crate::error::{Error, Result};
use crate::frame_capture::{FrameGrabber, InputSpec};
use crate::models::{LabelScores, RawClassification};
use async_trait::async_trait;
use std::time::{Duration, Instant};

/// The camera is the bottleneck; keep a short gap between grabs
pub const REAL_PACING: Duration = Duration::from_millis(100);

/// A loaded image classification model
#[async_trait]
pub trait Classifier: Send {
    fn model_name(&self) -> &str;

    /// Expected input geometry
    fn input_spec(&self) -> InputSpec;

    /// Classify packed features. `Error::Classifier` is recoverable,
    /// `Error::Runner` means the model is gone.
    async fn classify(&mut self, features: &[f32]) -> Result<LabelScores>;

    /// Stop the model. Idempotent.
    async fn stop(&mut self);
}

/// Camera plus classifier
pub struct RealClassifierSource<C, G> {
    classifier: C,
    grabber: G,
    released: bool,
}

impl<C: Classifier, G: FrameGrabber> RealClassifierSource<C, G> {
    pub fn new(classifier: C, grabber: G) -> Self {
        Self {
            classifier,
            grabber,
            released: false,
        }
    }
}

#[async_trait]
impl<C: Classifier, G: FrameGrabber> InferenceSource for RealClassifierSource<C, G> {
    fn model_name(&self) -> &str {
        self.classifier.model_name()
    }

    fn pacing(&self) -> Duration {
        REAL_PACING
    }

    async fn produce(&mut self) -> Result<RawClassification> {
        let spec = self.classifier.input_spec();
        let frame = self.grabber.grab(&spec).await?;

        // latency covers preprocessing and inference, not capture
        let started = Instant::now();
        let features = frame.to_features();
        let scores = self.classifier.classify(&features).await?;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        if scores.is_empty() {
            return Err(Error::Classifier("model returned no labels".to_string()));
        }

        tracing::debug!(labels = scores.len(), latency_ms, "Frame classified");
        Ok(RawClassification::argmax(scores, latency_ms))
    }

    async fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.grabber.release();
        self.classifier.stop().await;
    }
}
