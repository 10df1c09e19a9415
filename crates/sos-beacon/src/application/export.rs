//! AlertExporter: turns a finished detection into an alert on the wire.
//!
//! The alert carries the ranked sounds, the user's profile if one is
//! configured, the last valid location fix and the time of export.  Delivery
//! is left to the [`PeerRegistry`], which fans the frame out to every ready
//! viewer or keeps it until the first one connects.

use chrono::{DateTime, Utc};
use sos_core::{DetectionResult, ExportPayload, Location, PayloadError, UserProfile};
use sos_net::{BroadcastOutcome, PeerRegistry};
use thiserror::Error;
use tracing::{debug, info};

/// Error type for the export use case.
#[derive(Debug, Error)]
pub enum ExportError {
    /// The result has no entries, so there is nothing to report.
    #[error("detection result is empty")]
    EmptyResult,

    #[error(transparent)]
    Payload(#[from] PayloadError),
}

/// Builds alert documents and broadcasts them.
pub struct AlertExporter {
    registry: PeerRegistry,
    profile: Option<UserProfile>,
    last_location: Option<Location>,
}

impl AlertExporter {
    pub fn new(registry: PeerRegistry, profile: Option<UserProfile>) -> Self {
        Self {
            registry,
            profile,
            last_location: None,
        }
    }

    pub fn last_location(&self) -> Option<Location> {
        self.last_location
    }

    /// Records a location fix.  Invalid fixes are ignored so a momentary
    /// `(0, 0)` does not replace a good position.
    pub fn update_location(&mut self, location: Location) {
        if location.is_valid() {
            self.last_location = Some(location);
        } else {
            debug!(
                latitude = location.latitude,
                longitude = location.longitude,
                "ignoring invalid location fix"
            );
        }
    }

    /// Assembles the alert document for `result` stamped with `timestamp`.
    pub fn build_payload(&self, result: &DetectionResult, timestamp: DateTime<Utc>) -> ExportPayload {
        ExportPayload::from_result(result, self.profile.clone(), self.last_location, timestamp)
    }

    /// Serializes and broadcasts the alert for `result`.
    ///
    /// # Errors
    ///
    /// - [`ExportError::EmptyResult`] for a result with no entries.
    /// - [`ExportError::Payload`] if serialization fails.
    pub async fn export(&self, result: &DetectionResult) -> Result<BroadcastOutcome, ExportError> {
        let Some(top) = result.top() else {
            return Err(ExportError::EmptyResult);
        };
        let bytes = self.build_payload(result, Utc::now()).to_json_bytes()?;
        let outcome = self.registry.broadcast(bytes).await;
        match outcome {
            BroadcastOutcome::Delivered(peers) => {
                info!(sound = %top.label, peers, "alert delivered");
            }
            BroadcastOutcome::Pending => {
                info!(sound = %top.label, "no viewer connected; alert held until one connects");
            }
        }
        Ok(outcome)
    }
}
