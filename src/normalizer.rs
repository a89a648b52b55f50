//! Normalizer - raw classification → ResultPayload
//!
//! ## Responsibilities
//!
//! - Pick the result label (argmax or source-preselected)
//! - Round numeric fields (only here, never earlier)
//! - Keep timestamps non-decreasing within a run

use crate::error::{Error, Result};
use crate::models::{round_to, LabelScores, LabelSelection, RawClassification, ResultPayload};
use chrono::{DateTime, DurationRound, TimeDelta, Utc};

const PROBABILITY_DECIMALS: i32 = 4;
const LATENCY_DECIMALS: i32 = 2;
const SUM_TOLERANCE: f64 = 0.001;

/// Normalizer instance (one per run)
#[derive(Debug, Default)]
pub struct Normalizer {
    last_timestamp: Option<DateTime<Utc>>,
}

impl Normalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize using the current wall clock
    pub fn normalize(&mut self, model: &str, raw: RawClassification) -> Result<ResultPayload> {
        self.normalize_at(model, raw, Utc::now())
    }

    /// Normalize with an explicit clock reading
    pub fn normalize_at(
        &mut self,
        model: &str,
        raw: RawClassification,
        now: DateTime<Utc>,
    ) -> Result<ResultPayload> {
        if raw.scores.is_empty() {
            return Err(Error::Normalize("classification has no labels".to_string()));
        }

        let label = match raw.selection {
            LabelSelection::Argmax => argmax(&raw.scores)
                .ok_or_else(|| Error::Normalize("classification has no labels".to_string()))?,
            LabelSelection::Preselected(label) => {
                if !raw.scores.contains_key(&label) {
                    return Err(Error::Normalize(format!(
                        "preselected label '{}' not in label set",
                        label
                    )));
                }
                label
            }
        };

        let all_labels: LabelScores = raw
            .scores
            .iter()
            .map(|(name, &p)| (name.clone(), round_to(clamp_probability(name, p), PROBABILITY_DECIMALS)))
            .collect();

        let sum: f64 = all_labels.values().sum();
        if (sum - 1.0).abs() > SUM_TOLERANCE {
            tracing::warn!(model, sum, "Label probabilities do not sum to 1");
        }

        let confidence = all_labels[&label];
        let latency_ms = round_to(raw.latency_ms.max(0.0), LATENCY_DECIMALS);

        let model = if model.trim().is_empty() {
            "unknown".to_string()
        } else {
            model.to_string()
        };

        Ok(ResultPayload {
            timestamp: self.next_timestamp(now),
            model,
            label,
            confidence,
            latency_ms,
            all_labels,
        })
    }

    fn next_timestamp(&mut self, now: DateTime<Utc>) -> DateTime<Utc> {
        let now = now
            .duration_trunc(TimeDelta::microseconds(1))
            .unwrap_or(now);
        let ts = match self.last_timestamp {
            Some(last) if last > now => last,
            _ => now,
        };
        self.last_timestamp = Some(ts);
        ts
    }
}

/// Label with the highest probability; ties go to the first label in order.
pub fn argmax(scores: &LabelScores) -> Option<String> {
    let mut best: Option<(&String, f64)> = None;
    for (label, &p) in scores {
        match best {
            Some((_, best_p)) if p <= best_p => {}
            _ => best = Some((label, p)),
        }
    }
    best.map(|(label, _)| label.clone())
}

fn clamp_probability(label: &str, p: f64) -> f64 {
    if p.is_nan() {
        tracing::warn!(label, "NaN probability, treating as 0");
        return 0.0;
    }
    if !(0.0..=1.0).contains(&p) {
        tracing::warn!(label, probability = p, "Probability out of range, clamping");
    }
    p.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn scores(pairs: &[(&str, f64)]) -> LabelScores {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_real_mode_picks_argmax() {
        let mut normalizer = Normalizer::new();
        let raw = RawClassification::argmax(
            scores(&[("cat", 0.2), ("dog", 0.7), ("bird", 0.1)]),
            18.37,
        );

        let payload = normalizer.normalize("pets", raw).unwrap();
        assert_eq!(payload.label, "dog");
        assert_eq!(payload.confidence, 0.7);
        assert_eq!(payload.latency_ms, 18.37);
        assert_eq!(payload.model, "pets");
        assert_eq!(payload.all_labels.len(), 3);
    }

    #[test]
    fn test_demo_mode_keeps_preselected_label() {
        let mut normalizer = Normalizer::new();
        let raw = RawClassification::preselected(
            "anomaly",
            scores(&[("idle", 0.30), ("movement", 0.25), ("anomaly", 0.45)]),
            23.456,
        );

        let payload = normalizer.normalize("demo-model", raw).unwrap();
        assert_eq!(payload.label, "anomaly");
        assert_eq!(payload.confidence, 0.45);
        assert_eq!(payload.latency_ms, 23.46);
        assert!((payload.probability_sum() - 1.0).abs() < SUM_TOLERANCE);
    }

    #[test]
    fn test_preselected_label_need_not_be_max() {
        let mut normalizer = Normalizer::new();
        let raw = RawClassification::preselected(
            "idle",
            scores(&[("idle", 0.2), ("movement", 0.5), ("anomaly", 0.3)]),
            10.0,
        );

        let payload = normalizer.normalize("demo-model", raw).unwrap();
        assert_eq!(payload.label, "idle");
        assert_eq!(payload.confidence, payload.all_labels["idle"]);
    }

    #[test]
    fn test_argmax_tie_breaks_lexicographically() {
        let tied = scores(&[("zebra", 0.4), ("apple", 0.4), ("mango", 0.2)]);
        assert_eq!(argmax(&tied).as_deref(), Some("apple"));
        assert_eq!(argmax(&LabelScores::new()), None);
    }

    #[test]
    fn test_rounds_probabilities() {
        let mut normalizer = Normalizer::new();
        let raw = RawClassification::argmax(
            scores(&[("a", 0.333333), ("b", 0.666667)]),
            1.0,
        );
        let payload = normalizer.normalize("m", raw).unwrap();
        assert_eq!(payload.all_labels["a"], 0.3333);
        assert_eq!(payload.all_labels["b"], 0.6667);
        assert_eq!(payload.confidence, 0.6667);
    }

    #[test]
    fn test_rejects_empty_and_unknown_label() {
        let mut normalizer = Normalizer::new();

        let empty = RawClassification::argmax(LabelScores::new(), 1.0);
        assert!(matches!(normalizer.normalize("m", empty), Err(Error::Normalize(_))));

        let unknown = RawClassification::preselected("ghost", scores(&[("idle", 1.0)]), 1.0);
        let err = normalizer.normalize("m", unknown).unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_clamps_out_of_range_values() {
        let mut normalizer = Normalizer::new();
        let raw = RawClassification::argmax(scores(&[("a", 1.2), ("b", -0.2)]), -5.0);
        let payload = normalizer.normalize("", raw).unwrap();
        assert_eq!(payload.all_labels["a"], 1.0);
        assert_eq!(payload.all_labels["b"], 0.0);
        assert_eq!(payload.latency_ms, 0.0);
        assert_eq!(payload.model, "unknown");
    }

    #[test]
    fn test_timestamps_never_go_backwards() {
        let mut normalizer = Normalizer::new();
        let later = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 10).unwrap();
        let earlier = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 5).unwrap();

        let first = normalizer
            .normalize_at("m", RawClassification::argmax(scores(&[("a", 1.0)]), 1.0), later)
            .unwrap();
        let second = normalizer
            .normalize_at("m", RawClassification::argmax(scores(&[("a", 1.0)]), 1.0), earlier)
            .unwrap();

        assert_eq!(first.timestamp, later);
        assert!(second.timestamp >= first.timestamp);
    }
}
