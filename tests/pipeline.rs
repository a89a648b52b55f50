//! End-to-end loop scenarios with a scripted source and a recording sink

use async_trait::async_trait;
use inference_publisher::{
    config::{MqttConfig, RetryPolicy},
    inference_loop::{InferenceLoop, LoopState, StopReason},
    inference_source::{DemoSource, InferenceSource},
    models::{LabelScores, RawClassification, ResultPayload},
    mqtt_publisher::{MqttPublisher, PublisherState, ResultSink},
    Error, Result,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const PACING: Duration = Duration::from_millis(100);

#[derive(Default)]
struct Counters {
    produced: AtomicU32,
    released: AtomicU32,
}

/// Replays scripted results; cancels the run once the script is exhausted
struct ScriptedSource {
    script: VecDeque<Result<RawClassification>>,
    counters: Arc<Counters>,
    cancel: CancellationToken,
}

impl ScriptedSource {
    fn new(
        script: Vec<Result<RawClassification>>,
        cancel: CancellationToken,
    ) -> (Box<dyn InferenceSource>, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let source = Self {
            script: script.into(),
            counters: counters.clone(),
            cancel,
        };
        (Box::new(source), counters)
    }
}

#[async_trait]
impl InferenceSource for ScriptedSource {
    fn model_name(&self) -> &str {
        "pets"
    }

    fn pacing(&self) -> Duration {
        PACING
    }

    async fn produce(&mut self) -> Result<RawClassification> {
        self.counters.produced.fetch_add(1, Ordering::SeqCst);
        let next = self.script.pop_front();
        if self.script.is_empty() {
            self.cancel.cancel();
        }
        next.unwrap_or_else(|| Err(Error::Capture("script exhausted".to_string())))
    }

    async fn release(&mut self) {
        self.counters.released.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct RecordingSink {
    published: Mutex<Vec<ResultPayload>>,
    disconnects: AtomicU32,
}

impl RecordingSink {
    fn published(&self) -> Vec<ResultPayload> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResultSink for RecordingSink {
    async fn connect(&self) -> bool {
        true
    }

    async fn publish(&self, payload: &ResultPayload) -> bool {
        self.published.lock().unwrap().push(payload.clone());
        true
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

fn scores(pairs: &[(&str, f64)]) -> LabelScores {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

fn capture_failure() -> Result<RawClassification> {
    Err(Error::Capture("no frame".to_string()))
}

#[tokio::test(start_paused = true)]
async fn test_capture_failures_are_skipped_but_paced() {
    let cancel = CancellationToken::new();
    let mut script: Vec<_> = (0..5).map(|_| capture_failure()).collect();
    script.push(Ok(RawClassification::argmax(
        scores(&[("cat", 0.2), ("dog", 0.7), ("bird", 0.1)]),
        18.37,
    )));
    let (source, counters) = ScriptedSource::new(script, cancel.clone());
    let sink = Arc::new(RecordingSink::default());

    let started = Instant::now();
    let mut inference_loop = InferenceLoop::new(source, sink.clone());
    let outcome = inference_loop.run(cancel).await;

    assert_eq!(outcome.iterations, 6);
    assert_eq!(outcome.skipped, 5);
    assert_eq!(outcome.published, 1);
    assert_eq!(outcome.reason, StopReason::Interrupted);
    assert!(started.elapsed() >= PACING * 5);

    let published = sink.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].label, "dog");
    assert_eq!(published[0].confidence, 0.7);
    assert_eq!(published[0].latency_ms, 18.37);
    assert_eq!(published[0].model, "pets");

    assert_eq!(counters.produced.load(Ordering::SeqCst), 6);
    assert_eq!(counters.released.load(Ordering::SeqCst), 1);
    assert_eq!(sink.disconnects.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_interrupt_during_pacing_sleep() {
    let cancel = CancellationToken::new();
    let never_ending: Vec<_> = (0..100).map(|_| capture_failure()).collect();
    let (source, counters) = ScriptedSource::new(never_ending, CancellationToken::new());
    let sink = Arc::new(RecordingSink::default());

    let interrupter = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(PACING / 2).await;
        interrupter.cancel();
    });

    let started = Instant::now();
    let mut inference_loop = InferenceLoop::new(source, sink.clone());
    let outcome = inference_loop.run(cancel).await;

    assert!(started.elapsed() < PACING);
    assert_eq!(outcome.iterations, 1);
    assert_eq!(outcome.reason, StopReason::Interrupted);
    assert!(!outcome.is_failure());
    assert_eq!(inference_loop.state(), LoopState::Stopped);
    assert_eq!(counters.produced.load(Ordering::SeqCst), 1);
    assert_eq!(counters.released.load(Ordering::SeqCst), 1);
    assert_eq!(sink.disconnects.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unrecoverable_source_error_stops_with_failure() {
    let cancel = CancellationToken::new();
    let script = vec![
        Ok(RawClassification::argmax(scores(&[("a", 0.6), ("b", 0.4)]), 3.0)),
        Err(Error::Runner("runner closed the socket".to_string())),
        Ok(RawClassification::argmax(scores(&[("a", 0.6), ("b", 0.4)]), 3.0)),
    ];
    let (source, counters) = ScriptedSource::new(script, cancel.clone());
    let sink = Arc::new(RecordingSink::default());

    let mut inference_loop = InferenceLoop::new(source, sink.clone());
    let outcome = inference_loop.run(cancel).await;

    assert_eq!(outcome.iterations, 2);
    assert_eq!(outcome.published, 1);
    assert!(outcome.is_failure());
    assert!(matches!(outcome.reason, StopReason::SourceFailed(_)));
    assert_eq!(counters.released.load(Ordering::SeqCst), 1);
    assert_eq!(sink.disconnects.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_demo_source_publishes_consistent_payloads() {
    let cancel = CancellationToken::new();
    let source = Box::new(DemoSource::with_rng(StdRng::seed_from_u64(99)));
    let sink = Arc::new(RecordingSink::default());

    let interrupter = cancel.clone();
    tokio::spawn(async move {
        // five demo iterations at one second each
        tokio::time::sleep(Duration::from_millis(4500)).await;
        interrupter.cancel();
    });

    let mut inference_loop = InferenceLoop::new(source, sink.clone());
    let outcome = inference_loop.run(cancel).await;

    let published = sink.published();
    assert_eq!(outcome.published, 5);
    assert_eq!(published.len(), 5);
    for payload in &published {
        assert_eq!(payload.model, "demo-model");
        assert_eq!(payload.confidence, payload.all_labels[&payload.label]);
        assert!((payload.probability_sum() - 1.0).abs() <= 0.001);
        assert!((10.0..=50.0).contains(&payload.latency_ms));
    }
    for pair in published.windows(2) {
        assert!(pair[1].timestamp >= pair[0].timestamp);
    }
    assert_eq!(sink.disconnects.load(Ordering::SeqCst), 1);
}

/// Runner killed by the same Ctrl-C that cancelled the run
struct SignalledRunnerSource {
    cancel: CancellationToken,
    counters: Arc<Counters>,
}

#[async_trait]
impl InferenceSource for SignalledRunnerSource {
    fn model_name(&self) -> &str {
        "pets"
    }

    fn pacing(&self) -> Duration {
        PACING
    }

    async fn produce(&mut self) -> Result<RawClassification> {
        self.counters.produced.fetch_add(1, Ordering::SeqCst);
        self.cancel.cancel();
        Err(Error::Runner("runner closed the socket".to_string()))
    }

    async fn release(&mut self) {
        self.counters.released.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test(start_paused = true)]
async fn test_runner_lost_during_interrupt_is_clean_shutdown() {
    let cancel = CancellationToken::new();
    let counters = Arc::new(Counters::default());
    let source = Box::new(SignalledRunnerSource {
        cancel: cancel.clone(),
        counters: counters.clone(),
    });
    let sink = Arc::new(RecordingSink::default());

    let mut inference_loop = InferenceLoop::new(source, sink.clone());
    let outcome = inference_loop.run(cancel).await;

    assert_eq!(outcome.reason, StopReason::Interrupted);
    assert!(!outcome.is_failure());
    assert_eq!(counters.produced.load(Ordering::SeqCst), 1);
    assert_eq!(counters.released.load(Ordering::SeqCst), 1);
    assert_eq!(sink.disconnects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unreachable_broker_exits_with_failure() {
    // Grab a free port, then close it so connects are refused
    let port = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let publisher = Arc::new(MqttPublisher::new(MqttConfig {
        broker: "127.0.0.1".to_string(),
        port,
        retry: RetryPolicy::new(3, Duration::ZERO),
        connect_timeout: Duration::from_secs(2),
        ..MqttConfig::default()
    }));
    let selected = Arc::new(AtomicBool::new(false));

    let flag = selected.clone();
    let outcome = InferenceLoop::start(
        publisher.clone(),
        move || async move {
            flag.store(true, Ordering::SeqCst);
            let source: Box<dyn InferenceSource> = Box::new(DemoSource::new());
            Ok(source)
        },
        CancellationToken::new(),
    )
    .await;

    assert_eq!(outcome.reason, StopReason::ConnectFailed);
    assert!(outcome.is_failure());
    assert_eq!(outcome.iterations, 0);
    assert_eq!(publisher.connect_attempts(), 3);
    assert_eq!(publisher.state().await, PublisherState::Disconnected);
    assert!(!selected.load(Ordering::SeqCst));
}
