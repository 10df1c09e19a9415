//! The per-session detection state machine.
//!
//! ```text
//!   Idle ──start──► Listening ──finish──► Detected(result)
//!    ▲                 │    └───finish (empty) / fail──► Errored(reason)
//!    └──────stop───────┴──────────────────────────────────────┘
//! ```
//!
//! `start` is accepted from every state and always begins a fresh window.

use std::time::Instant;

use tracing::{debug, info};

use super::config::EvaluatorConfig;
use super::scoring::rank;
use super::{
    Classification, ClassificationSample, DetectionResult, EvaluationError, EvaluatorState,
    LockState,
};

/// What one batch did to the window.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BatchOutcome {
    /// Samples appended to the window.
    pub accepted: usize,
    /// Samples discarded by the lock or the top-K cut.
    pub dropped: usize,
    /// Label the lock is pinned to after the batch.
    pub locked_label: Option<String>,
}

/// Accumulates classifier batches and ranks them when the window closes.
#[derive(Debug)]
pub struct DetectionEvaluator {
    config: EvaluatorConfig,
    state: EvaluatorState,
    lock: LockState,
    window: Vec<ClassificationSample>,
    started_at: Option<Instant>,
    first_sample_at: Option<Instant>,
}

impl DetectionEvaluator {
    /// # Errors
    ///
    /// Returns [`EvaluationError::InvalidConfig`] if `config` fails validation.
    pub fn new(config: EvaluatorConfig) -> Result<Self, EvaluationError> {
        config.validate()?;
        Ok(Self {
            config,
            state: EvaluatorState::Idle,
            lock: LockState::Unlocked,
            window: Vec::new(),
            started_at: None,
            first_sample_at: None,
        })
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    pub fn state(&self) -> &EvaluatorState {
        &self.state
    }

    pub fn lock(&self) -> &LockState {
        &self.lock
    }

    pub fn window(&self) -> &[ClassificationSample] {
        &self.window
    }

    /// Begins a new listening session, discarding anything left from the last one.
    pub fn start(&mut self, now: Instant) {
        self.clear_session();
        self.started_at = Some(now);
        self.state = EvaluatorState::Listening;
        debug!("evaluation window opened");
    }

    /// Feeds one classifier batch, sorted highest confidence first.
    ///
    /// # Errors
    ///
    /// Returns [`EvaluationError::NotListening`] outside a session.
    pub fn ingest(
        &mut self,
        batch: &[Classification],
        now: Instant,
    ) -> Result<BatchOutcome, EvaluationError> {
        if !self.state.is_listening() {
            return Err(EvaluationError::NotListening);
        }

        if let LockState::Locked { locked_at, .. } = &self.lock {
            if now.saturating_duration_since(*locked_at) >= self.config.lock_duration() {
                debug!(label = ?self.lock.label(), "lock expired");
                self.lock = LockState::Unlocked;
            }
        }

        let candidates: Vec<&Classification> = if let LockState::Locked { label, .. } = &self.lock
        {
            batch.iter().filter(|c| &c.label == label).collect()
        } else {
            let threshold = self.config.lock_threshold;
            if let Some(top) = batch.first().filter(|top| top.confidence >= threshold) {
                debug!(label = %top.label, confidence = top.confidence, "lock acquired");
                self.lock = LockState::Locked {
                    label: top.label.clone(),
                    confidence: top.confidence,
                    locked_at: now,
                };
            }
            batch.iter().collect()
        };

        let accepted = candidates.len().min(self.config.top_k);
        self.window
            .extend(candidates.into_iter().take(accepted).map(|c| ClassificationSample {
                label: c.label.clone(),
                confidence: c.confidence,
                timestamp: now,
            }));

        if accepted > 0 && self.first_sample_at.is_none() {
            self.first_sample_at = Some(now);
        }

        Ok(BatchOutcome {
            accepted,
            dropped: batch.len() - accepted,
            locked_label: self.lock.label().map(str::to_string),
        })
    }

    /// When the window closes, or `None` outside a session.
    ///
    /// The window runs for `window` after the first accepted sample.  If no
    /// sample arrives within `grace` of the start, it runs from
    /// `start + grace` instead so silence cannot keep it open forever.
    pub fn deadline(&self) -> Option<Instant> {
        if !self.state.is_listening() {
            return None;
        }
        let started_at = self.started_at?;
        let grace_end = started_at + self.config.grace();
        let opened_at = match self.first_sample_at {
            Some(first) if first < grace_end => first,
            _ => grace_end,
        };
        Some(opened_at + self.config.window())
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline().is_some_and(|deadline| now >= deadline)
    }

    /// Closes the window and ranks it.
    ///
    /// # Errors
    ///
    /// - [`EvaluationError::NotListening`] outside a session.
    /// - [`EvaluationError::NoDetection`] when the window is empty; the state
    ///   becomes `Errored`.
    pub fn finish(&mut self) -> Result<DetectionResult, EvaluationError> {
        if !self.state.is_listening() {
            return Err(EvaluationError::NotListening);
        }

        let entries = rank(&self.window, &self.config.scoring, self.config.result_size);
        let samples = self.window.len();
        self.clear_session();

        if entries.is_empty() {
            let err = EvaluationError::NoDetection;
            self.state = EvaluatorState::Errored(err.to_string());
            info!("evaluation window closed with no samples");
            return Err(err);
        }

        let result = DetectionResult { entries };
        info!(
            samples,
            top = %result.entries[0].label,
            confidence = result.entries[0].confidence,
            "evaluation window closed"
        );
        self.state = EvaluatorState::Detected(result.clone());
        Ok(result)
    }

    /// Abandons the session without a result and returns to `Idle`.
    pub fn stop(&mut self) {
        self.clear_session();
        self.state = EvaluatorState::Idle;
    }

    /// Moves to `Errored(reason)`, e.g. when the classifier cannot start.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.clear_session();
        self.state = EvaluatorState::Errored(reason.into());
    }

    fn clear_session(&mut self) {
        self.window.clear();
        self.lock = LockState::Unlocked;
        self.started_at = None;
        self.first_sample_at = None;
    }
}
