//! InferenceLoop - Produce, normalize, publish, pace
//!
//! ## Responsibilities
//!
//! - Connect the sink and select the source before the first iteration
//! - Pull one classification per iteration from the selected source
//! - Skip recoverable failures without stopping the run
//! - Cut the pacing sleep short on cancellation
//! - Release the source and disconnect the sink exactly once on every exit path

use crate::error::{Error, Result};
use crate::inference_source::InferenceSource;
use crate::models::{RawClassification, ResultPayload};
use crate::mqtt_publisher::ResultSink;
use crate::normalizer::Normalizer;
use std::future::Future;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Loop lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Init,
    Running,
    Stopping,
    Stopped,
}

/// Why the loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// External cancellation (Ctrl-C, SIGTERM)
    Interrupted,
    /// Broker unreachable after every connect attempt
    ConnectFailed,
    /// Capture device could not be opened; nothing to run
    DeviceUnavailable(String),
    /// Source failed in a way that cannot be retried
    SourceFailed(String),
}

/// Run summary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    /// `produce()` calls made
    pub iterations: u64,
    /// Results accepted by the sink
    pub published: u64,
    /// Results the sink refused
    pub dropped: u64,
    /// Cycles skipped on recoverable errors
    pub skipped: u64,
    pub reason: StopReason,
}

impl LoopOutcome {
    fn new() -> Self {
        Self::stopped(StopReason::Interrupted)
    }

    fn stopped(reason: StopReason) -> Self {
        Self {
            iterations: 0,
            published: 0,
            dropped: 0,
            skipped: 0,
            reason,
        }
    }

    /// Connect failures and dead sources exit non-zero; a missing camera does not.
    pub fn is_failure(&self) -> bool {
        matches!(
            self.reason,
            StopReason::ConnectFailed | StopReason::SourceFailed(_)
        )
    }

    /// Process exit code for this outcome
    pub fn exit_code(&self) -> ExitCode {
        if self.is_failure() {
            ExitCode::FAILURE
        } else {
            ExitCode::SUCCESS
        }
    }
}

/// InferenceLoop instance
pub struct InferenceLoop<K> {
    source: Box<dyn InferenceSource>,
    sink: Arc<K>,
    normalizer: Normalizer,
    state: LoopState,
    torn_down: bool,
}

impl<K: ResultSink> InferenceLoop<K> {
    /// Full lifecycle: connect `sink`, build the source with `select`, run.
    ///
    /// The sink is disconnected exactly once whichever step fails; once a
    /// source exists, `run` owns teardown.
    pub async fn start<F, Fut>(sink: Arc<K>, select: F, cancel: CancellationToken) -> LoopOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Box<dyn InferenceSource>>>,
    {
        let reason = match Self::init(&sink, select, &cancel).await {
            Ok(source) => {
                let mut inference_loop = Self::new(source, sink);
                return inference_loop.run(cancel).await;
            }
            Err(reason) => reason,
        };

        tracing::info!(reason = ?reason, "Inference loop not started");
        sink.disconnect().await;
        LoopOutcome::stopped(reason)
    }

    async fn init<F, Fut>(
        sink: &K,
        select: F,
        cancel: &CancellationToken,
    ) -> std::result::Result<Box<dyn InferenceSource>, StopReason>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Box<dyn InferenceSource>>>,
    {
        let connected = tokio::select! {
            connected = sink.connect() => connected,
            _ = cancel.cancelled() => return Err(StopReason::Interrupted),
        };
        if !connected {
            return Err(StopReason::ConnectFailed);
        }

        match select().await {
            Ok(source) => Ok(source),
            Err(Error::DeviceUnavailable(msg)) => {
                tracing::error!(error = %msg, "Capture device unavailable");
                Err(StopReason::DeviceUnavailable(msg))
            }
            Err(e) => {
                tracing::error!(category = e.category(), error = %e, "Inference source unavailable");
                Err(StopReason::SourceFailed(e.to_string()))
            }
        }
    }

    /// Loop over a sink that is already connected.
    pub fn new(source: Box<dyn InferenceSource>, sink: Arc<K>) -> Self {
        Self {
            source,
            sink,
            normalizer: Normalizer::new(),
            state: LoopState::Init,
            torn_down: false,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Run until cancelled or the source fails unrecoverably.
    pub async fn run(&mut self, cancel: CancellationToken) -> LoopOutcome {
        let mut outcome = LoopOutcome::new();
        if self.state != LoopState::Init {
            tracing::warn!(state = ?self.state, "Inference loop already ran");
            return outcome;
        }

        let pacing = self.source.pacing();
        self.state = LoopState::Running;
        tracing::info!(
            model = %self.source.model_name(),
            pacing_ms = pacing.as_millis() as u64,
            "Inference loop started"
        );

        let reason = loop {
            if cancel.is_cancelled() {
                break StopReason::Interrupted;
            }

            outcome.iterations += 1;
            match self.source.produce().await {
                Ok(raw) => self.handle(raw, &mut outcome).await,
                Err(e) if e.is_recoverable() => {
                    outcome.skipped += 1;
                    tracing::warn!(category = e.category(), error = %e, "Inference cycle skipped");
                }
                // the runner may have been hit by the same signal
                Err(e) if cancel.is_cancelled() => {
                    tracing::info!(error = %e, "Inference source stopped during shutdown");
                    break StopReason::Interrupted;
                }
                Err(e) => {
                    tracing::error!(category = e.category(), error = %e, "Inference source failed");
                    break StopReason::SourceFailed(e.to_string());
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break StopReason::Interrupted,
                _ = tokio::time::sleep(pacing) => {}
            }
        };

        self.state = LoopState::Stopping;
        tracing::info!(reason = ?reason, "Inference loop stopping");
        self.teardown().await;
        self.state = LoopState::Stopped;

        outcome.reason = reason;
        tracing::info!(
            iterations = outcome.iterations,
            published = outcome.published,
            dropped = outcome.dropped,
            skipped = outcome.skipped,
            "Inference loop stopped"
        );
        outcome
    }

    async fn handle(&mut self, raw: RawClassification, outcome: &mut LoopOutcome) {
        let payload = match self.normalizer.normalize(self.source.model_name(), raw) {
            Ok(payload) => payload,
            Err(e) => {
                outcome.skipped += 1;
                tracing::warn!(category = e.category(), error = %e, "Inference cycle skipped");
                return;
            }
        };

        if self.sink.publish(&payload).await {
            outcome.published += 1;
            log_result(&payload);
        } else {
            outcome.dropped += 1;
            tracing::debug!(label = %payload.label, "Result not published");
        }
    }

    async fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.source.release().await;
        self.sink.disconnect().await;
    }
}

fn log_result(payload: &ResultPayload) {
    tracing::info!(
        label = %payload.label,
        confidence = %format!("{:.1}%", payload.confidence * 100.0),
        latency_ms = payload.latency_ms,
        "Published result"
    );
}
