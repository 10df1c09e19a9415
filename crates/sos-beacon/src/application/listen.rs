//! ListeningService: one detection session at a time.
//!
//! `start` starts the classifier and spawns a runner task that owns a fresh
//! [`DetectionEvaluator`].  The runner is the only code that touches the
//! evaluator; everyone else observes it through a `watch` channel of
//! [`EvaluatorState`].
//!
//! # Timing
//!
//! The runner keeps a single timer armed at the evaluator's deadline.  The
//! deadline moves once, when the first sample is accepted, and the timer is
//! reset to follow it.  When it fires the window is ranked, the classifier is
//! stopped and the final state is published.
//!
//! The evaluator is driven with `tokio::time::Instant` converted to
//! `std::time::Instant`, so tests with a paused clock see the same time the
//! timer does.

use std::sync::Arc;
use std::time::Instant;

use sos_core::{
    Classification, DetectionEvaluator, EvaluationError, EvaluatorConfig, EvaluatorState,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::infrastructure::classifier::{prefilter, SoundClassifier};

struct ActiveRun {
    cancel: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Runs listening sessions against a [`SoundClassifier`].
pub struct ListeningService {
    config: EvaluatorConfig,
    classifier: Arc<dyn SoundClassifier>,
    state: watch::Sender<EvaluatorState>,
    active: Option<ActiveRun>,
}

impl ListeningService {
    /// # Errors
    ///
    /// Returns [`EvaluationError::InvalidConfig`] if `config` fails validation.
    pub fn new(
        config: EvaluatorConfig,
        classifier: Arc<dyn SoundClassifier>,
    ) -> Result<Self, EvaluationError> {
        config.validate()?;
        let (state, _) = watch::channel(EvaluatorState::Idle);
        Ok(Self {
            config,
            classifier,
            state,
            active: None,
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<EvaluatorState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> EvaluatorState {
        self.state.borrow().clone()
    }

    /// Begins a new session, abandoning any session in progress.
    ///
    /// A classifier that fails to start moves the state straight to
    /// `Errored` with the classifier's reason.
    pub async fn start(&mut self) {
        self.halt().await;

        let batches = match self.classifier.start().await {
            Ok(batches) => batches,
            Err(e) => {
                warn!("classifier failed to start: {e}");
                self.state.send_replace(EvaluatorState::Errored(e.to_string()));
                return;
            }
        };

        // The configuration was validated in `new`.
        let mut evaluator = match DetectionEvaluator::new(self.config.clone()) {
            Ok(evaluator) => evaluator,
            Err(e) => {
                self.classifier.stop().await;
                self.state.send_replace(EvaluatorState::Errored(e.to_string()));
                return;
            }
        };
        evaluator.start(now());
        self.state.send_replace(evaluator.state().clone());
        info!("listening for emergency sounds");

        let (cancel, cancel_rx) = oneshot::channel();
        let runner = Runner {
            evaluator,
            classifier: Arc::clone(&self.classifier),
            state: self.state.clone(),
        };
        let task = tokio::spawn(runner.run(batches, cancel_rx));
        self.active = Some(ActiveRun { cancel, task });
    }

    /// Abandons the session without a result and returns to `Idle`.
    /// Idempotent.
    pub async fn stop(&mut self) {
        self.halt().await;
        self.state.send_replace(EvaluatorState::Idle);
    }

    async fn halt(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        // A finished runner has already dropped its receiver.
        let _ = active.cancel.send(());
        if let Err(e) = active.task.await {
            warn!("listening task ended abnormally: {e}");
        }
        debug!("listening session halted");
    }
}

struct Runner {
    evaluator: DetectionEvaluator,
    classifier: Arc<dyn SoundClassifier>,
    state: watch::Sender<EvaluatorState>,
}

impl Runner {
    async fn run(
        mut self,
        mut batches: mpsc::Receiver<Vec<Classification>>,
        mut cancel: oneshot::Receiver<()>,
    ) {
        let Some(deadline) = self.evaluator.deadline() else {
            return;
        };
        let threshold = self.classifier.confidence_threshold();
        let timer = tokio::time::sleep_until(deadline.into());
        tokio::pin!(timer);
        let mut batches_open = true;

        loop {
            tokio::select! {
                biased;
                // Either an explicit cancel or the service being dropped.
                _ = &mut cancel => {
                    self.evaluator.stop();
                    self.classifier.stop().await;
                    return;
                }
                _ = &mut timer => break,
                batch = batches.recv(), if batches_open => match batch {
                    Some(batch) => {
                        let batch = prefilter(batch, threshold);
                        if batch.is_empty() {
                            continue;
                        }
                        match self.evaluator.ingest(&batch, now()) {
                            Ok(outcome) => debug!(
                                accepted = outcome.accepted,
                                dropped = outcome.dropped,
                                locked = ?outcome.locked_label,
                                "batch ingested"
                            ),
                            Err(e) => warn!("batch rejected: {e}"),
                        }
                        if let Some(deadline) = self.evaluator.deadline() {
                            timer.as_mut().reset(deadline.into());
                        }
                    }
                    None => {
                        debug!("classifier stream ended; waiting for the window to close");
                        batches_open = false;
                    }
                },
            }
        }

        self.classifier.stop().await;
        match self.evaluator.finish() {
            Ok(result) => info!(entries = result.entries.len(), "sound detected"),
            Err(e) => info!("listening ended without a detection: {e}"),
        }
        self.state.send_replace(self.evaluator.state().clone());
    }
}

fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
