//! Shared models and types
//!
//! `ResultPayload` is the wire schema published to the broker.
//! `RawClassification` is what an inference source hands to the normalizer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Label → probability, ordered by label
pub type LabelScores = BTreeMap<String, f64>;

/// One normalized inference result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultPayload {
    #[serde(with = "iso_micros")]
    pub timestamp: DateTime<Utc>,
    pub model: String,
    pub label: String,
    pub confidence: f64,
    #[serde(rename = "latency")]
    pub latency_ms: f64,
    pub all_labels: LabelScores,
}

impl ResultPayload {
    /// Canonical JSON encoding for the broker
    pub fn to_json(&self) -> crate::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Sum of all label probabilities
    pub fn probability_sum(&self) -> f64 {
        self.all_labels.values().sum()
    }
}

/// How the normalizer picks the result label
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelSelection {
    /// Highest probability wins (ties: first label in order)
    Argmax,
    /// Source already chose the label
    Preselected(String),
}

/// Unrounded output of one inference cycle
#[derive(Debug, Clone, PartialEq)]
pub struct RawClassification {
    pub scores: LabelScores,
    pub latency_ms: f64,
    pub selection: LabelSelection,
}

impl RawClassification {
    pub fn argmax(scores: LabelScores, latency_ms: f64) -> Self {
        Self {
            scores,
            latency_ms,
            selection: LabelSelection::Argmax,
        }
    }

    pub fn preselected(label: impl Into<String>, scores: LabelScores, latency_ms: f64) -> Self {
        Self {
            scores,
            latency_ms,
            selection: LabelSelection::Preselected(label.into()),
        }
    }
}

/// Round half away from zero to `places` decimals
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Naive-UTC ISO-8601 with microseconds, e.g. `2024-01-01T00:00:00.000000`
pub mod iso_micros {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

    pub fn serialize<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&ts.format(FORMAT))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .map_err(serde::de::Error::custom)
    }
}
