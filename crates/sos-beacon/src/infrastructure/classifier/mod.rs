//! Sound classifier seam.
//!
//! On a phone the classifier is an on-device ML model fed by the microphone.
//! The beacon only sees its output: a stream of batches, each batch holding
//! the labels the model produced for one analysis frame.  Anything that can
//! produce such a stream implements [`SoundClassifier`].
//!
//! # Testability
//!
//! The [`scripted`] implementation replays a fixed list of batches on a timer,
//! which drives headless runs and integration tests without audio hardware.

use std::cmp::Ordering;

use async_trait::async_trait;
use sos_core::Classification;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod scripted;

pub use scripted::{ScriptStep, ScriptedClassifier};

/// Results below this confidence are discarded before evaluation.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.75;

/// Error type for classifier start-up.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ClassifierError {
    /// The OS refused access to the microphone.
    #[error("{0} permission denied")]
    PermissionDenied(String),

    /// The model or audio engine could not be started.
    #[error("classifier unavailable: {0}")]
    Unavailable(String),

    /// A classification script could not be read or parsed.
    #[error("invalid classifier script: {0}")]
    InvalidScript(String),
}

/// A source of classification batches.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SoundClassifier: Send + Sync {
    /// Starts classifying and returns the stream of batches.
    ///
    /// The stream ends when the classifier is stopped or runs out of input.
    /// Calling `start` again replaces the previous stream.
    async fn start(&self) -> Result<mpsc::Receiver<Vec<Classification>>, ClassifierError>;

    /// Stops classifying.  Idempotent.
    async fn stop(&self);

    /// The classifier's own reporting threshold.
    fn confidence_threshold(&self) -> f64 {
        DEFAULT_CONFIDENCE_THRESHOLD
    }
}

/// Keeps results at or above `threshold`, highest confidence first.
///
/// Equal confidences keep their original order.
pub fn prefilter(batch: Vec<Classification>, threshold: f64) -> Vec<Classification> {
    let mut kept: Vec<Classification> = batch
        .into_iter()
        .filter(|c| c.confidence >= threshold)
        .collect();
    kept.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefilter_drops_results_below_threshold() {
        // Arrange
        let batch = vec![
            Classification::new("speech", 0.40),
            Classification::new("fire_alarm", 0.80),
            Classification::new("scream", 0.75),
        ];

        // Act
        let kept = prefilter(batch, DEFAULT_CONFIDENCE_THRESHOLD);

        // Assert
        let labels: Vec<&str> = kept.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(labels, ["fire_alarm", "scream"]);
    }

    #[test]
    fn test_prefilter_sorts_highest_first_and_keeps_ties_stable() {
        let batch = vec![
            Classification::new("a", 0.8),
            Classification::new("b", 0.95),
            Classification::new("c", 0.8),
        ];

        let kept = prefilter(batch, 0.0);

        let labels: Vec<&str> = kept.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(labels, ["b", "a", "c"]);
    }

    #[test]
    fn test_prefilter_of_quiet_batch_is_empty() {
        let kept = prefilter(vec![Classification::new("speech", 0.2)], 0.75);
        assert!(kept.is_empty());
    }

    #[test]
    fn test_permission_error_reads_naturally() {
        let err = ClassifierError::PermissionDenied("microphone".to_string());
        assert_eq!(err.to_string(), "microphone permission denied");
    }
}
