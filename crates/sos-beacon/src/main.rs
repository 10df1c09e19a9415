//! SOS-Link beacon entry point.
//!
//! Wires the classifier, the listening service and the advertiser together
//! and runs until Ctrl-C.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config()               -- beacon.toml or defaults
//!  └─ ServiceAdvertiser::start()  -- TCP listener + UDP discovery responder
//!  └─ ListeningService::start()   -- classifier → evaluator → Detected
//!  └─ state pump                  -- Detected → AlertExporter::export()
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::time::Instant;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use sos_beacon::application::export::AlertExporter;
use sos_beacon::application::listen::ListeningService;
use sos_beacon::infrastructure::classifier::{ScriptedClassifier, SoundClassifier};
use sos_beacon::infrastructure::storage::config::{load_config, BeaconConfig};
use sos_core::{EvaluationError, EvaluatorState};
use sos_net::{AdvertiserStatus, PeerRegistry, ServiceAdvertiser};

/// Extra time a listening session gets past its configured maximum before the
/// watchdog restarts it.
const WATCHDOG_SLACK: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Configuration is loaded before logging so its level can seed the filter.
    let (config, config_error) = match load_config() {
        Ok(config) => (config, None),
        Err(e) => (BeaconConfig::default(), Some(e)),
    };

    // Initialise structured logging.  Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.beacon.log_level)),
        )
        .init();

    info!("SOS-Link beacon starting");
    if let Some(e) = config_error {
        warn!("using default configuration: {e}");
    }
    config.validate().context("invalid beacon configuration")?;

    // ── Advertiser ────────────────────────────────────────────────────────────
    let registry = PeerRegistry::spawn();
    let mut advertiser = ServiceAdvertiser::new(
        config.network.advertiser_config()?,
        config.network.session_config(),
        registry.clone(),
    );
    advertiser.start().await;
    if let AdvertiserStatus::Failed(reason) = advertiser.status() {
        anyhow::bail!("cannot advertise the alert service: {reason}");
    }

    // ── Classifier and listening service ─────────────────────────────────────
    let classifier: Arc<dyn SoundClassifier> = match &config.classifier.script {
        Some(path) => Arc::new(
            ScriptedClassifier::from_file(path)
                .with_context(|| format!("loading classifier script {}", path.display()))?
                .with_threshold(config.classifier.confidence_threshold),
        ),
        None => {
            warn!("no classifier script configured; listening sessions will hear nothing");
            Arc::new(
                ScriptedClassifier::new(Vec::new())
                    .with_threshold(config.classifier.confidence_threshold),
            )
        }
    };
    let mut listener = ListeningService::new(config.evaluator.clone(), classifier)
        .context("invalid evaluator configuration")?;

    let mut exporter = AlertExporter::new(registry.clone(), config.profile.clone());
    if let Some(location) = config.location {
        exporter.update_location(location);
    }

    // ── State pump ────────────────────────────────────────────────────────────
    let mut states = listener.subscribe();
    listener.start().await;
    info!("SOS-Link beacon ready.  Press Ctrl-C to exit.");

    // A session that outlives grace + window plus slack is stuck; restart it.
    let session_limit = config.max_session_length() + WATCHDOG_SLACK;
    let watchdog = tokio::time::sleep(session_limit);
    tokio::pin!(watchdog);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
            _ = &mut watchdog, if listener.state().is_listening() => {
                warn!("listening session ran past {session_limit:?}; restarting it");
                listener.start().await;
                watchdog.as_mut().reset(Instant::now() + session_limit);
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = states.borrow_and_update().clone();
                // Sessions that never ran their window are not re-armed.
                let rearm = match state {
                    EvaluatorState::Detected(result) => {
                        if let Err(e) = exporter.export(&result).await {
                            error!("failed to export alert: {e}");
                        }
                        true
                    }
                    EvaluatorState::Errored(reason) => {
                        warn!("listening session ended: {reason}");
                        reason == EvaluationError::NoDetection.to_string()
                    }
                    EvaluatorState::Idle | EvaluatorState::Listening => false,
                };
                if rearm && config.beacon.continuous {
                    listener.start().await;
                }
                watchdog.as_mut().reset(Instant::now() + session_limit);
            }
        }
    }

    listener.stop().await;
    advertiser.stop().await;
    registry.shutdown().await;
    info!("SOS-Link beacon stopped");
    Ok(())
}
