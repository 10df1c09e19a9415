//! The alert document carried inside every frame.
//!
//! The payload is UTF-8 JSON with camelCase keys.  Emitted documents have
//! their object keys sorted and timestamps rendered as ISO-8601 UTC strings
//! with whole-second precision (`2026-01-30T12:00:00Z`).  Decoding is lenient:
//! optional fields may be absent or `null`, and a missing `createdAt` on the
//! profile defaults to the time of decoding.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::evaluator::DetectionResult;

/// Errors raised while converting between [`ExportPayload`] and JSON bytes.
#[derive(Debug, Error)]
pub enum PayloadError {
    /// The frame body is not valid UTF-8.
    #[error("payload is not valid UTF-8: {0}")]
    NotUtf8(#[from] std::str::Utf8Error),

    /// The body is UTF-8 but not a valid alert document.
    #[error("failed to parse alert JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A detection entry carries an out-of-range rank or confidence.
    #[error("invalid detection entry: {0}")]
    InvalidDetection(String),
}

/// One ranked sound in an alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Classifier label, e.g. `"fire_crackle"`.
    pub sound: String,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// 1-based rank, 1 being the most likely sound.
    pub rank: u32,
}

/// A saved postal address of the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub label: String,
    pub address_line: String,
    pub district: String,
    pub city: String,
}

impl Address {
    /// Single-line rendering used by the viewer.
    pub fn formatted(&self) -> String {
        [
            self.address_line.as_str(),
            self.district.as_str(),
            self.city.as_str(),
        ]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
    }
}

/// Personal details the user chose to share with responders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub first_name: String,
    pub last_name: String,
    #[serde(with = "iso8601")]
    pub birth_date: DateTime<Utc>,
    pub blood_type: String,
    #[serde(default)]
    pub addresses: Vec<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(with = "iso8601", default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl UserProfile {
    /// `"First Last"`, trimmed when either part is empty.
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }

    /// Age in whole years on `on`.
    ///
    /// Returns 0 when `on` precedes the birth date.
    pub fn age_on(&self, on: NaiveDate) -> u32 {
        on.years_since(self.birth_date.date_naive()).unwrap_or(0)
    }
}

/// A GPS fix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    /// A fix is usable when it is inside the WGS-84 ranges and not the
    /// `(0, 0)` placeholder that location services report before a lock.
    pub fn is_valid(&self) -> bool {
        let in_range = (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude);
        let is_placeholder = self.latitude == 0.0 && self.longitude == 0.0;
        in_range && !is_placeholder
    }
}

/// The complete alert document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportPayload {
    pub detections: Vec<Detection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<UserProfile>,
    #[serde(with = "iso8601")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

impl ExportPayload {
    /// Builds a payload from a finished detection window.
    pub fn from_result(
        result: &DetectionResult,
        profile: Option<UserProfile>,
        location: Option<Location>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let detections = result
            .entries
            .iter()
            .map(|entry| Detection {
                sound: entry.label.clone(),
                confidence: entry.confidence,
                rank: entry.rank,
            })
            .collect();
        Self {
            detections,
            profile,
            timestamp,
            location,
        }
    }

    /// Serializes to compact JSON with object keys in sorted order.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::Json`] if a float is not finite.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, PayloadError> {
        // serde_json::Value keeps object keys in a BTreeMap.
        let value = serde_json::to_value(self)?;
        Ok(serde_json::to_vec(&value)?)
    }

    /// Parses a frame body.
    ///
    /// # Errors
    ///
    /// - [`PayloadError::NotUtf8`] when the bytes are not UTF-8.
    /// - [`PayloadError::Json`] when the text is not an alert document.
    /// - [`PayloadError::InvalidDetection`] for a rank of 0 or a confidence
    ///   outside `[0, 1]`.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, PayloadError> {
        let text = std::str::from_utf8(bytes)?;
        let payload: Self = serde_json::from_str(text)?;
        for detection in &payload.detections {
            if detection.rank == 0 {
                return Err(PayloadError::InvalidDetection(format!(
                    "{}: rank must be at least 1",
                    detection.sound
                )));
            }
            if !(0.0..=1.0).contains(&detection.confidence) {
                return Err(PayloadError::InvalidDetection(format!(
                    "{}: confidence {} outside [0, 1]",
                    detection.sound, detection.confidence
                )));
            }
        }
        Ok(payload)
    }

    /// The rank-1 detection, if any.
    pub fn primary(&self) -> Option<&Detection> {
        self.detections.iter().min_by_key(|d| d.rank)
    }
}

/// Serde adapter for ISO-8601 UTC timestamps with whole-second precision.
///
/// Decoding also accepts fractional seconds and numeric offsets.
pub mod iso8601 {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Secs, true))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
