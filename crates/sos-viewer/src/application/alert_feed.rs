//! AlertFeed: the viewer's in-memory list of received alerts.
//!
//! Every frame body that arrives on the alert stream is decoded into an
//! [`AlertRecord`].  The wire format carries no identifiers, so the feed mints
//! a fresh UUID for the alert, each detection, the profile and each address;
//! the UI keys its rows on them.
//!
//! Records are kept newest first by the alert's own timestamp.  A frame that
//! does not decode leaves the list untouched and is remembered as the last
//! error until the next alert decodes.
//!
//! The feed holds at most `max_alerts` records.  When it is full, the oldest
//! stored alert makes room for the one just received.

use chrono::{DateTime, NaiveDate, Utc};
use sos_core::{Address, ExportPayload, Location, PayloadError, UserProfile};
use thiserror::Error;
use uuid::Uuid;

/// How many alerts a feed keeps unless told otherwise.
pub const DEFAULT_MAX_ALERTS: usize = 500;

/// Error type for feed ingestion.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("failed to decode alert: {0}")]
    ParseFailed(#[from] PayloadError),
}

/// One ranked sound of a received alert.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionRecord {
    pub id: Uuid,
    pub sound: String,
    pub confidence: f64,
    pub rank: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AddressRecord {
    pub id: Uuid,
    pub address: Address,
}

/// The sender's profile as received with an alert.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileRecord {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub birth_date: DateTime<Utc>,
    pub blood_type: String,
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
    pub addresses: Vec<AddressRecord>,
}

impl ProfileRecord {
    fn mint(profile: UserProfile) -> Self {
        Self {
            id: Uuid::new_v4(),
            addresses: profile
                .addresses
                .iter()
                .cloned()
                .map(|address| AddressRecord {
                    id: Uuid::new_v4(),
                    address,
                })
                .collect(),
            first_name: profile.first_name,
            last_name: profile.last_name,
            birth_date: profile.birth_date,
            blood_type: profile.blood_type,
            phone: profile.phone,
            created_at: profile.created_at,
        }
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }

    /// Age in whole years on `on`; 0 before the birth date.
    pub fn age_on(&self, on: NaiveDate) -> u32 {
        on.years_since(self.birth_date.date_naive()).unwrap_or(0)
    }
}

/// A decoded alert as shown by the viewer.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertRecord {
    pub id: Uuid,
    /// When the sender produced the alert.
    pub timestamp: DateTime<Utc>,
    /// When this viewer decoded it.
    pub received_at: DateTime<Utc>,
    /// Ordered by rank.
    pub detections: Vec<DetectionRecord>,
    pub profile: Option<ProfileRecord>,
    pub location: Option<Location>,
}

impl AlertRecord {
    fn mint(payload: ExportPayload, received_at: DateTime<Utc>) -> Self {
        let mut detections: Vec<DetectionRecord> = payload
            .detections
            .into_iter()
            .map(|d| DetectionRecord {
                id: Uuid::new_v4(),
                sound: d.sound,
                confidence: d.confidence,
                rank: d.rank,
            })
            .collect();
        detections.sort_by_key(|d| d.rank);
        Self {
            id: Uuid::new_v4(),
            timestamp: payload.timestamp,
            received_at,
            detections,
            profile: payload.profile.map(ProfileRecord::mint),
            location: payload.location,
        }
    }

    /// The rank-1 detection.
    pub fn primary(&self) -> Option<&DetectionRecord> {
        self.detections.first()
    }

    /// The location, if it is a usable fix.
    pub fn valid_location(&self) -> Option<Location> {
        self.location.filter(Location::is_valid)
    }
}

/// Received alerts, newest first.
#[derive(Debug)]
pub struct AlertFeed {
    alerts: Vec<AlertRecord>,
    last_error: Option<String>,
    max_alerts: usize,
}

impl Default for AlertFeed {
    fn default() -> Self {
        Self::with_max_alerts(DEFAULT_MAX_ALERTS)
    }
}

impl AlertFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// A feed keeping at most `max_alerts` records (at least one).
    pub fn with_max_alerts(max_alerts: usize) -> Self {
        Self {
            alerts: Vec::new(),
            last_error: None,
            max_alerts: max_alerts.max(1),
        }
    }

    pub fn max_alerts(&self) -> usize {
        self.max_alerts
    }

    /// Decodes one frame body and inserts it in timestamp order.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::ParseFailed`] if the body is not an alert.  The
    /// message is kept as [`AlertFeed::last_error`].
    pub fn ingest(
        &mut self,
        payload: &[u8],
        received_at: DateTime<Utc>,
    ) -> Result<&AlertRecord, FeedError> {
        let decoded = match ExportPayload::from_json_bytes(payload) {
            Ok(decoded) => decoded,
            Err(e) => {
                let err = FeedError::from(e);
                self.last_error = Some(err.to_string());
                return Err(err);
            }
        };
        self.last_error = None;

        let record = AlertRecord::mint(decoded, received_at);
        if self.alerts.len() >= self.max_alerts {
            self.alerts.truncate(self.max_alerts - 1);
        }
        // Among equal timestamps the latest arrival goes first.
        let at = self
            .alerts
            .partition_point(|existing| existing.timestamp > record.timestamp);
        self.alerts.insert(at, record);
        Ok(&self.alerts[at])
    }

    pub fn alerts(&self) -> &[AlertRecord] {
        &self.alerts
    }

    pub fn latest(&self) -> Option<&AlertRecord> {
        self.alerts.first()
    }

    pub fn get(&self, id: Uuid) -> Option<&AlertRecord> {
        self.alerts.iter().find(|a| a.id == id)
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Forgets every alert and the last error.
    pub fn clear_all(&mut self) {
        self.alerts.clear();
        self.last_error = None;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 12, hour, minute, 0).unwrap()
    }

    fn alert_json(sound: &str, timestamp: &str) -> Vec<u8> {
        format!(
            r#"{{"detections":[{{"confidence":0.6,"rank":2,"sound":"speech"}},{{"confidence":0.9,"rank":1,"sound":"{sound}"}}],"timestamp":"{timestamp}"}}"#
        )
        .into_bytes()
    }

    const WITH_PROFILE: &str = r#"{
        "detections": [{"sound": "scream", "confidence": 0.88, "rank": 1}],
        "profile": {
            "firstName": "Mehmet",
            "lastName": "Kaya",
            "birthDate": "1985-09-03T00:00:00Z",
            "bloodType": "0-",
            "addresses": [
                {"label": "Home", "addressLine": "Ataturk Cd. 12", "district": "Cankaya", "city": "Ankara"},
                {"label": "Work", "addressLine": "Kizilay Sk. 4", "district": "", "city": "Ankara"}
            ],
            "phone": null,
            "createdAt": "2026-01-01T08:00:00.250Z"
        },
        "timestamp": "2026-04-12T10:00:00Z",
        "location": null
    }"#;

    #[test]
    fn test_ingest_orders_detections_by_rank() {
        // Arrange
        let mut feed = AlertFeed::new();

        // Act
        let record = feed
            .ingest(&alert_json("fire_alarm", "2026-04-12T10:00:00Z"), at(10, 1))
            .unwrap();

        // Assert
        assert_eq!(record.primary().unwrap().sound, "fire_alarm");
        assert_eq!(record.detections[1].rank, 2);
        assert_eq!(record.received_at, at(10, 1));
    }

    #[test]
    fn test_alerts_are_kept_newest_first() {
        let mut feed = AlertFeed::new();

        feed.ingest(&alert_json("a", "2026-04-12T10:00:00Z"), at(12, 0)).unwrap();
        feed.ingest(&alert_json("c", "2026-04-12T11:00:00Z"), at(12, 0)).unwrap();
        feed.ingest(&alert_json("b", "2026-04-12T10:30:00Z"), at(12, 0)).unwrap();

        let order: Vec<&str> = feed
            .alerts()
            .iter()
            .map(|a| a.primary().unwrap().sound.as_str())
            .collect();
        assert_eq!(order, ["c", "b", "a"]);
        assert_eq!(feed.latest().unwrap().primary().unwrap().sound, "c");
    }

    #[test]
    fn test_equal_timestamps_put_latest_arrival_first() {
        let mut feed = AlertFeed::new();

        feed.ingest(&alert_json("first", "2026-04-12T10:00:00Z"), at(10, 0)).unwrap();
        feed.ingest(&alert_json("second", "2026-04-12T10:00:00Z"), at(10, 0)).unwrap();

        assert_eq!(feed.latest().unwrap().primary().unwrap().sound, "second");
    }

    #[test]
    fn test_every_entity_gets_its_own_id() {
        let mut feed = AlertFeed::new();

        let record = feed.ingest(WITH_PROFILE.as_bytes(), at(10, 0)).unwrap().clone();

        let profile = record.profile.as_ref().unwrap();
        let mut ids = vec![record.id, record.detections[0].id, profile.id];
        ids.extend(profile.addresses.iter().map(|a| a.id));
        let unique: std::collections::HashSet<Uuid> = ids.iter().copied().collect();
        assert_eq!(unique.len(), 5);
        assert_eq!(feed.get(record.id), Some(&record));
    }

    #[test]
    fn test_profile_details_survive_decoding() {
        let mut feed = AlertFeed::new();

        let record = feed.ingest(WITH_PROFILE.as_bytes(), at(10, 0)).unwrap();

        let profile = record.profile.as_ref().unwrap();
        assert_eq!(profile.full_name(), "Mehmet Kaya");
        assert_eq!(profile.age_on(NaiveDate::from_ymd_opt(2026, 4, 12).unwrap()), 40);
        assert_eq!(profile.phone, None);
        assert_eq!(profile.addresses[1].address.formatted(), "Kizilay Sk. 4, Ankara");
        assert_eq!(record.location, None);
    }

    #[test]
    fn test_placeholder_location_is_not_valid() {
        let mut feed = AlertFeed::new();
        let body = br#"{"detections":[],"timestamp":"2026-04-12T10:00:00Z","location":{"latitude":0.0,"longitude":0.0}}"#;

        let record = feed.ingest(body, at(10, 0)).unwrap();

        assert!(record.location.is_some());
        assert_eq!(record.valid_location(), None);
    }

    #[test]
    fn test_undecodable_frame_sets_last_error_and_keeps_alerts() {
        // Arrange
        let mut feed = AlertFeed::new();
        feed.ingest(&alert_json("fire_alarm", "2026-04-12T10:00:00Z"), at(10, 0))
            .unwrap();

        // Act
        let err = feed.ingest(b"{\"detections\": 5}", at(10, 1)).unwrap_err();

        // Assert
        assert!(matches!(err, FeedError::ParseFailed(PayloadError::Json(_))));
        assert_eq!(feed.len(), 1);
        assert!(feed.last_error().unwrap().starts_with("failed to decode alert"));
    }

    #[test]
    fn test_successful_ingest_clears_last_error() {
        let mut feed = AlertFeed::new();
        let _ = feed.ingest(&[0xff, 0xfe], at(10, 0));
        assert!(feed.last_error().is_some());

        feed.ingest(&alert_json("scream", "2026-04-12T10:00:00Z"), at(10, 1))
            .unwrap();

        assert_eq!(feed.last_error(), None);
    }

    #[test]
    fn test_full_feed_drops_the_oldest_alert() {
        // Arrange
        let mut feed = AlertFeed::with_max_alerts(2);
        feed.ingest(&alert_json("a", "2026-04-12T10:00:00Z"), at(12, 0)).unwrap();
        feed.ingest(&alert_json("b", "2026-04-12T11:00:00Z"), at(12, 0)).unwrap();

        // Act
        feed.ingest(&alert_json("c", "2026-04-12T10:30:00Z"), at(12, 1)).unwrap();

        // Assert
        let order: Vec<&str> = feed
            .alerts()
            .iter()
            .map(|a| a.primary().unwrap().sound.as_str())
            .collect();
        assert_eq!(order, ["b", "c"]);
    }

    #[test]
    fn test_alert_older_than_a_full_feed_is_still_kept() {
        let mut feed = AlertFeed::with_max_alerts(1);
        feed.ingest(&alert_json("new", "2026-04-12T11:00:00Z"), at(12, 0)).unwrap();

        let record = feed
            .ingest(&alert_json("old", "2026-04-12T09:00:00Z"), at(12, 1))
            .unwrap();

        assert_eq!(record.primary().unwrap().sound, "old");
        assert_eq!(feed.len(), 1);
    }

    #[test]
    fn test_default_feed_is_bounded() {
        assert_eq!(AlertFeed::new().max_alerts(), DEFAULT_MAX_ALERTS);
        assert_eq!(AlertFeed::with_max_alerts(0).max_alerts(), 1);
    }

    #[test]
    fn test_clear_all_empties_the_feed() {
        let mut feed = AlertFeed::new();
        feed.ingest(&alert_json("scream", "2026-04-12T10:00:00Z"), at(10, 0))
            .unwrap();
        let _ = feed.ingest(b"nope", at(10, 1));

        feed.clear_all();

        assert!(feed.is_empty());
        assert_eq!(feed.last_error(), None);
    }
}
