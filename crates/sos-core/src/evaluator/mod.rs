//! Sound detection evaluator.
//!
//! Raw classifier output is noisy: within a second the top label can flip
//! between "fire" and "scream" several times.  The evaluator turns that stream
//! into one decision per listening session:
//!
//! 1. A **window** collects up to `top_k` samples per classifier batch for a
//!    fixed duration.
//! 2. A short **lock** pins the label once a sample crosses the lock
//!    threshold, so only that label is collected until the lock expires.
//! 3. At the deadline the window is **ranked** by a frequency-weighted score
//!    and the best `result_size` labels become the [`DetectionResult`].
//!
//! The evaluator is a synchronous state machine driven with explicit
//! [`Instant`]s; the caller owns the clock and the timer.

pub mod config;
pub mod machine;
pub mod scoring;

use std::time::Instant;

use thiserror::Error;

pub use config::{EvaluatorConfig, QualificationGate, ScoringConfig};
pub use machine::{BatchOutcome, DetectionEvaluator};
pub use scoring::{aggregate, rank, LabelStats};

/// One label/confidence pair as produced by a classifier.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub label: String,
    pub confidence: f64,
}

impl Classification {
    pub fn new(label: impl Into<String>, confidence: f64) -> Self {
        Self {
            label: label.into(),
            confidence,
        }
    }
}

/// A classification accepted into the evaluation window, tagged with its
/// arrival time.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationSample {
    pub label: String,
    pub confidence: f64,
    pub timestamp: Instant,
}

/// Whether collection is currently pinned to one label.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum LockState {
    #[default]
    Unlocked,
    Locked {
        label: String,
        confidence: f64,
        locked_at: Instant,
    },
}

impl LockState {
    pub fn label(&self) -> Option<&str> {
        match self {
            Self::Unlocked => None,
            Self::Locked { label, .. } => Some(label),
        }
    }
}

/// One entry of a ranked result.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedDetection {
    pub label: String,
    /// Highest confidence observed for the label during the window.
    pub confidence: f64,
    /// 1-based rank.
    pub rank: u32,
    /// Ranking score of the label.  Backfilled entries keep their score even
    /// though they did not pass their gate.
    pub score: f64,
}

/// Ordered, de-duplicated list of at most `result_size` detections.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DetectionResult {
    pub entries: Vec<RankedDetection>,
}

impl DetectionResult {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The rank-1 entry.
    pub fn top(&self) -> Option<&RankedDetection> {
        self.entries.first()
    }
}

/// Externally observable state of a listening session.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum EvaluatorState {
    #[default]
    Idle,
    Listening,
    Detected(DetectionResult),
    Errored(String),
}

impl EvaluatorState {
    pub fn is_listening(&self) -> bool {
        matches!(self, Self::Listening)
    }
}

/// Errors produced by the evaluator.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvaluationError {
    /// The window closed without a single accepted sample.
    #[error("no detection in window")]
    NoDetection,

    /// An operation that needs an active session was called outside one.
    #[error("evaluator is not listening")]
    NotListening,

    /// A configuration value is out of range.
    #[error("invalid evaluator configuration: {0}")]
    InvalidConfig(String),
}
