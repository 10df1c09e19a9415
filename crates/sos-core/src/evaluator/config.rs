//! Tunables of the detection evaluator.
//!
//! Every field has a serde default so a partial `[evaluator]` table in a TOML
//! file only overrides what it names.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::EvaluationError;

/// Minimum evidence a label needs to compete in ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualificationGate {
    /// Peak confidence the label must reach.
    pub min_confidence: f64,
    /// Number of samples the label must have in the window.
    pub min_count: usize,
}

impl QualificationGate {
    pub fn admits(&self, max_confidence: f64, count: usize) -> bool {
        max_confidence >= self.min_confidence && count >= self.min_count
    }
}

/// Weights of the ranking score
/// `(mean_weight * mean + max_weight * max) * min(count / frequency_divisor, frequency_cap)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default = "default_mean_weight")]
    pub mean_weight: f64,
    #[serde(default = "default_max_weight")]
    pub max_weight: f64,
    #[serde(default = "default_frequency_divisor")]
    pub frequency_divisor: f64,
    #[serde(default = "default_frequency_cap")]
    pub frequency_cap: f64,
    /// Multiplier applied to labels listed in `priority_labels`.
    #[serde(default = "default_priority_bonus")]
    pub priority_bonus: f64,
    /// Labels treated as high-priority dangers.
    #[serde(default = "default_priority_labels")]
    pub priority_labels: Vec<String>,
    #[serde(default = "default_priority_gate")]
    pub priority_gate: QualificationGate,
    #[serde(default = "default_standard_gate")]
    pub standard_gate: QualificationGate,
}

impl ScoringConfig {
    pub fn is_priority(&self, label: &str) -> bool {
        self.priority_labels.iter().any(|l| l == label)
    }

    pub fn gate_for(&self, label: &str) -> &QualificationGate {
        if self.is_priority(label) {
            &self.priority_gate
        } else {
            &self.standard_gate
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            mean_weight: default_mean_weight(),
            max_weight: default_max_weight(),
            frequency_divisor: default_frequency_divisor(),
            frequency_cap: default_frequency_cap(),
            priority_bonus: default_priority_bonus(),
            priority_labels: default_priority_labels(),
            priority_gate: default_priority_gate(),
            standard_gate: default_standard_gate(),
        }
    }
}

/// Window, lock, and result parameters of a listening session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluatorConfig {
    /// Confidence at or above which the top sample locks the label.
    #[serde(default = "default_lock_threshold")]
    pub lock_threshold: f64,
    #[serde(default = "default_lock_duration_ms")]
    pub lock_duration_ms: u64,
    /// Samples taken from each classifier batch.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    /// Longest wait for a first sample before the window starts anyway.
    #[serde(default = "default_grace_ms")]
    pub grace_ms: u64,
    /// Maximum number of entries in a result.
    #[serde(default = "default_result_size")]
    pub result_size: usize,
    #[serde(default)]
    pub scoring: ScoringConfig,
}

impl EvaluatorConfig {
    pub fn lock_duration(&self) -> Duration {
        Duration::from_millis(self.lock_duration_ms)
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`EvaluationError::InvalidConfig`] naming the first bad field.
    pub fn validate(&self) -> Result<(), EvaluationError> {
        if !(0.0..=1.0).contains(&self.lock_threshold) {
            return Err(EvaluationError::InvalidConfig(format!(
                "lock_threshold {} outside [0, 1]",
                self.lock_threshold
            )));
        }
        if self.top_k == 0 {
            return Err(EvaluationError::InvalidConfig("top_k must be at least 1".into()));
        }
        if self.result_size == 0 {
            return Err(EvaluationError::InvalidConfig(
                "result_size must be at least 1".into(),
            ));
        }
        if self.window_ms == 0 {
            return Err(EvaluationError::InvalidConfig("window_ms must be positive".into()));
        }
        if self.scoring.frequency_divisor <= 0.0 {
            return Err(EvaluationError::InvalidConfig(
                "scoring.frequency_divisor must be positive".into(),
            ));
        }
        Ok(())
    }
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            lock_threshold: default_lock_threshold(),
            lock_duration_ms: default_lock_duration_ms(),
            top_k: default_top_k(),
            window_ms: default_window_ms(),
            grace_ms: default_grace_ms(),
            result_size: default_result_size(),
            scoring: ScoringConfig::default(),
        }
    }
}

// ── Default value functions ───────────────────────────────────────────────────

fn default_lock_threshold() -> f64 {
    0.70
}
fn default_lock_duration_ms() -> u64 {
    3_000
}
fn default_top_k() -> usize {
    3
}
fn default_window_ms() -> u64 {
    10_000
}
fn default_grace_ms() -> u64 {
    2_000
}
fn default_result_size() -> usize {
    3
}
fn default_mean_weight() -> f64 {
    0.5
}
fn default_max_weight() -> f64 {
    0.6
}
fn default_frequency_divisor() -> f64 {
    2.0
}
fn default_frequency_cap() -> f64 {
    2.0
}
fn default_priority_bonus() -> f64 {
    1.2
}
fn default_priority_labels() -> Vec<String> {
    ["fire_alarm", "smoke_alarm", "siren", "glass_break"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_priority_gate() -> QualificationGate {
    QualificationGate {
        min_confidence: 0.5,
        min_count: 1,
    }
}
fn default_standard_gate() -> QualificationGate {
    QualificationGate {
        min_confidence: 0.65,
        min_count: 2,
    }
}
