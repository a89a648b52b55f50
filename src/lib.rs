//! Inference Publisher Library
//!
//! Edge classification results → MQTT
//!
//! ## Architecture (5 Components)
//!
//! 1. InferenceSource - Real classifier (camera + `.eim` model) or demo generator
//! 2. Normalizer - Raw scores to the published payload schema
//! 3. MqttPublisher - Broker session, QoS 1 fire-and-forget publishing
//! 4. InferenceLoop - Produce, normalize, publish, pace, tear down
//! 5. AppConfig - Environment-derived settings
//!
//! Supporting modules: EimRunner (model process client), FrameCapture
//! (V4L2 frames via ffmpeg).

pub mod config;
pub mod eim_runner;
pub mod error;
pub mod frame_capture;
pub mod inference_loop;
pub mod inference_source;
pub mod models;
pub mod mqtt_publisher;
pub mod normalizer;

pub use config::AppConfig;
pub use error::{Error, Result};
