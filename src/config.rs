//! Application configuration
//!
//! Resolved once from the environment at startup and passed explicitly
//! into each component's constructor.

use crate::error::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;

/// MQTT connection settings
#[derive(Debug, Clone)]
pub struct MqttConfig {
    /// Broker host
    pub broker: String,
    /// Broker port
    pub port: u16,
    /// Publish topic
    pub topic: String,
    /// Client identifier
    pub client_id: String,
    /// Keep-alive interval
    pub keep_alive: Duration,
    /// Bounded retry for the initial connect
    pub retry: RetryPolicy,
    /// Timeout for a single connect attempt
    pub connect_timeout: Duration,
    /// Grace period for flushing on disconnect
    pub disconnect_grace: Duration,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker: "mqtt".to_string(),
            port: 1883,
            topic: "inference/results".to_string(),
            client_id: "edge-impulse-runner".to_string(),
            keep_alive: Duration::from_secs(60),
            retry: RetryPolicy::default(),
            connect_timeout: Duration::from_secs(10),
            disconnect_grace: Duration::from_secs(2),
        }
    }
}

/// Fixed-delay bounded retry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(10, Duration::from_secs(5))
    }
}

/// Real classifier settings
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Path to the `.eim` model artifact (None = demo mode)
    pub model_path: Option<PathBuf>,
    /// V4L2 capture device index
    pub camera_device: u32,
    /// Per-frame ffmpeg timeout
    pub capture_timeout: Duration,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            camera_device: 0,
            capture_timeout: Duration::from_secs(10),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub mqtt: MqttConfig,
    pub classifier: ClassifierConfig,
}

impl AppConfig {
    /// Build from process environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let connect_attempts = parse_or(
            "MQTT_CONNECT_ATTEMPTS",
            var("MQTT_CONNECT_ATTEMPTS"),
            defaults.mqtt.retry.max_attempts,
        );
        let retry_secs = parse_or(
            "MQTT_CONNECT_RETRY_SECS",
            var("MQTT_CONNECT_RETRY_SECS"),
            defaults.mqtt.retry.delay.as_secs(),
        );

        let mqtt = MqttConfig {
            broker: var("MQTT_BROKER").unwrap_or(defaults.mqtt.broker),
            port: parse_or("MQTT_PORT", var("MQTT_PORT"), defaults.mqtt.port),
            topic: var("MQTT_TOPIC").unwrap_or(defaults.mqtt.topic),
            client_id: var("MQTT_CLIENT_ID").unwrap_or(defaults.mqtt.client_id),
            keep_alive: Duration::from_secs(parse_or(
                "MQTT_KEEP_ALIVE_SECS",
                var("MQTT_KEEP_ALIVE_SECS"),
                defaults.mqtt.keep_alive.as_secs(),
            )),
            retry: RetryPolicy::new(connect_attempts, Duration::from_secs(retry_secs)),
            ..defaults.mqtt
        };

        let classifier = ClassifierConfig {
            model_path: var("EI_MODEL_PATH").map(PathBuf::from),
            camera_device: parse_or(
                "CAMERA_DEVICE",
                var("CAMERA_DEVICE"),
                defaults.classifier.camera_device,
            ),
            capture_timeout: Duration::from_secs(parse_or(
                "CAPTURE_TIMEOUT_SECS",
                var("CAPTURE_TIMEOUT_SECS"),
                defaults.classifier.capture_timeout.as_secs(),
            )),
        };

        Self { mqtt, classifier }
    }

    /// Reject settings the broker would refuse on every publish
    pub fn validate(&self) -> Result<()> {
        let topic = &self.mqtt.topic;
        if topic.is_empty() || topic.contains(|c| c == '+' || c == '#') {
            return Err(Error::Config(format!(
                "MQTT_TOPIC '{}' is not a valid publish topic",
                topic
            )));
        }
        if self.mqtt.port == 0 {
            return Err(Error::Config("MQTT_PORT must be non-zero".to_string()));
        }
        Ok(())
    }
}

fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display + Copy,
{
    match raw {
        Some(value) => value.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %value, default = %default, "Invalid value, using default");
            default
        }),
        None => default,
    }
}
