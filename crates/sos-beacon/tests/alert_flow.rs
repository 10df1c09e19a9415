//! End-to-end beacon flow over loopback: scripted classifier → listening
//! service → exporter → advertiser → a viewer session decoding the alert.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use sos_beacon::application::export::AlertExporter;
use sos_beacon::application::listen::ListeningService;
use sos_beacon::infrastructure::classifier::{ScriptStep, ScriptedClassifier};
use sos_core::{EvaluatorConfig, EvaluatorState, ExportPayload, Location};
use sos_net::{
    connect, AdvertiserConfig, BroadcastOutcome, PeerRegistry, ServiceAdvertiser, SessionConfig,
    SessionEvent,
};
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn short_window() -> EvaluatorConfig {
    EvaluatorConfig {
        window_ms: 300,
        grace_ms: 200,
        lock_duration_ms: 100,
        ..EvaluatorConfig::default()
    }
}

async fn detect(steps: Vec<ScriptStep>) -> EvaluatorState {
    let classifier = Arc::new(ScriptedClassifier::new(steps));
    let mut listener = ListeningService::new(short_window(), classifier).unwrap();
    let mut states = listener.subscribe();
    listener.start().await;
    let state = timeout(
        WAIT,
        states.wait_for(|s| matches!(s, EvaluatorState::Detected(_) | EvaluatorState::Errored(_))),
    )
    .await
    .expect("window must close in time")
    .unwrap()
    .clone();
    state
}

async fn next_payload(events: &mut mpsc::Receiver<SessionEvent>) -> Vec<u8> {
    timeout(WAIT, async {
        loop {
            match events.recv().await {
                Some(SessionEvent::PayloadReceived { payload, .. }) => return payload,
                Some(_) => continue,
                None => panic!("session ended before a payload arrived"),
            }
        }
    })
    .await
    .expect("alert must arrive in time")
}

#[tokio::test]
async fn test_detection_reaches_a_viewer_that_connects_later() {
    // Arrange
    let registry = PeerRegistry::spawn();
    let mut advertiser = ServiceAdvertiser::new(
        AdvertiserConfig {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            discovery_port: 0,
            ..AdvertiserConfig::default()
        },
        SessionConfig::default(),
        registry.clone(),
    );
    advertiser.start().await;
    let mut exporter = AlertExporter::new(registry.clone(), None);
    exporter.update_location(Location {
        latitude: 40.19,
        longitude: 29.06,
    });

    // Act
    let state = detect(vec![
        ScriptStep::new(20, &[("fire_alarm", 0.95), ("scream", 0.80)]),
        ScriptStep::new(20, &[("fire_alarm", 0.90)]),
        ScriptStep::new(150, &[("scream", 0.85), ("fire_alarm", 0.78)]),
    ])
    .await;
    let EvaluatorState::Detected(result) = state else {
        panic!("expected a detection, got {state:?}");
    };
    let outcome = exporter.export(&result).await.unwrap();

    let (tx, mut events) = mpsc::channel(16);
    let _viewer = connect(advertiser.stream_addr().unwrap(), tx, SessionConfig::default());
    let alert = ExportPayload::from_json_bytes(&next_payload(&mut events).await).unwrap();

    // Assert
    assert_eq!(outcome, BroadcastOutcome::Pending);
    assert_eq!(alert.primary().unwrap().sound, "fire_alarm");
    assert_eq!(alert.detections.len(), result.entries.len());
    assert_eq!(alert.location.unwrap().longitude, 29.06);

    advertiser.stop().await;
}

#[tokio::test]
async fn test_silent_session_produces_no_alert() {
    let state = detect(vec![ScriptStep::new(20, &[("speech", 0.2)])]).await;

    assert_eq!(
        state,
        EvaluatorState::Errored("no detection in window".to_string())
    );
}
