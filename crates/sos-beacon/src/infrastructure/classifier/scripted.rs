//! A classifier that replays a fixed script of batches.
//!
//! A script is a TOML file with one `[[step]]` table per batch:
//!
//! ```toml
//! [[step]]
//! after_ms = 500
//! results = [
//!     { label = "fire_alarm", confidence = 0.91 },
//!     { label = "speech", confidence = 0.30 },
//! ]
//! ```
//!
//! `after_ms` is the delay since the previous step.  Each `start` replays the
//! script from the beginning.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sos_core::Classification;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

use super::{ClassifierError, SoundClassifier, DEFAULT_CONFIDENCE_THRESHOLD};

/// One scripted classifier result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptedResult {
    pub label: String,
    pub confidence: f64,
}

/// One batch of the script and the pause before it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptStep {
    #[serde(default)]
    pub after_ms: u64,
    #[serde(default)]
    pub results: Vec<ScriptedResult>,
}

impl ScriptStep {
    pub fn new(after_ms: u64, results: &[(&str, f64)]) -> Self {
        Self {
            after_ms,
            results: results
                .iter()
                .map(|(label, confidence)| ScriptedResult {
                    label: (*label).to_string(),
                    confidence: *confidence,
                })
                .collect(),
        }
    }

    fn batch(&self) -> Vec<Classification> {
        self.results
            .iter()
            .map(|r| Classification::new(r.label.clone(), r.confidence))
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct ScriptFile {
    #[serde(default)]
    step: Vec<ScriptStep>,
}

/// Replays [`ScriptStep`]s as classifier batches.
pub struct ScriptedClassifier {
    steps: Vec<ScriptStep>,
    threshold: f64,
    /// Reported by every `start` instead of running the script.
    start_error: Option<ClassifierError>,
    player: Mutex<Option<JoinHandle<()>>>,
}

impl ScriptedClassifier {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps,
            threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            start_error: None,
            player: Mutex::new(None),
        }
    }

    /// A classifier whose `start` always fails with `error`.
    pub fn failing(error: ClassifierError) -> Self {
        Self {
            start_error: Some(error),
            ..Self::new(Vec::new())
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Parses a script from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifierError::InvalidScript`] if the text is not a script.
    pub fn from_toml(text: &str) -> Result<Self, ClassifierError> {
        let file: ScriptFile =
            toml::from_str(text).map_err(|e| ClassifierError::InvalidScript(e.to_string()))?;
        Ok(Self::new(file.step))
    }

    /// Reads and parses a script file.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifierError::InvalidScript`] if the file cannot be read
    /// or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ClassifierError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ClassifierError::InvalidScript(format!("{}: {e}", path.display())))?;
        Self::from_toml(&text)
    }

    pub fn steps(&self) -> &[ScriptStep] {
        &self.steps
    }
}

#[async_trait]
impl SoundClassifier for ScriptedClassifier {
    async fn start(&self) -> Result<mpsc::Receiver<Vec<Classification>>, ClassifierError> {
        if let Some(err) = &self.start_error {
            return Err(err.clone());
        }

        let (tx, rx) = mpsc::channel(32);
        let steps = self.steps.clone();
        let player = tokio::spawn(async move {
            for step in steps {
                tokio::time::sleep(Duration::from_millis(step.after_ms)).await;
                if tx.send(step.batch()).await.is_err() {
                    return;
                }
            }
            debug!("classification script finished");
        });

        if let Some(previous) = self.player.lock().await.replace(player) {
            previous.abort();
        }
        Ok(rx)
    }

    async fn stop(&self) {
        if let Some(player) = self.player.lock().await.take() {
            player.abort();
        }
    }

    fn confidence_threshold(&self) -> f64 {
        self.threshold
    }
}
