//! Synthetic classifications for running without a model

use super::InferenceSource;
use crate::error::Result;
use crate::models::{LabelScores, RawClassification};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

pub const DEMO_LABELS: [&str; 3] = ["idle", "movement", "anomaly"];
pub const DEMO_MODEL_NAME: &str = "demo-model";

/// No physical sensor to rate-limit, so the demo runs slower
pub const DEMO_PACING: Duration = Duration::from_secs(1);

/// Demo source instance
pub struct DemoSource<R = StdRng> {
    rng: R,
    labels: Vec<String>,
}

impl DemoSource<StdRng> {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }
}

impl Default for DemoSource<StdRng> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Rng + Send> DemoSource<R> {
    pub fn with_rng(rng: R) -> Self {
        Self {
            rng,
            labels: DEMO_LABELS.iter().map(|l| l.to_string()).collect(),
        }
    }

    /// Draw one synthetic classification.
    ///
    /// The label is chosen first; after renormalization it is not
    /// necessarily the most probable one.
    pub fn draw(&mut self) -> RawClassification {
        let chosen = self.labels[self.rng.gen_range(0..self.labels.len())].clone();
        let confidence = self.rng.gen_range(0.7..=0.99);

        let mut weights = LabelScores::new();
        for label in &self.labels {
            let weight = if *label == chosen {
                confidence
            } else {
                self.rng.gen_range(0.0..=1.0)
            };
            weights.insert(label.clone(), weight);
        }

        let total: f64 = weights.values().sum();
        for weight in weights.values_mut() {
            *weight /= total;
        }

        let latency_ms = self.rng.gen_range(10.0..=50.0);
        RawClassification::preselected(chosen, weights, latency_ms)
    }
}

#[async_trait]
impl<R: Rng + Send> InferenceSource for DemoSource<R> {
    fn model_name(&self) -> &str {
        DEMO_MODEL_NAME
    }

    fn pacing(&self) -> Duration {
        DEMO_PACING
    }

    async fn produce(&mut self) -> Result<RawClassification> {
        Ok(self.draw())
    }

    async fn release(&mut self) {}
}
