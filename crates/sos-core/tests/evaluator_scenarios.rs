//! End-to-end scenarios for the detection evaluator driven through its public
//! API with a synthetic clock.

use std::time::{Duration, Instant};

use sos_core::evaluator::ScoringConfig;
use sos_core::{
    Classification, DetectionEvaluator, EvaluationError, EvaluatorConfig, EvaluatorState,
    ExportPayload,
};

fn batch(pairs: &[(&str, f64)]) -> Vec<Classification> {
    pairs.iter().map(|(l, c)| Classification::new(*l, *c)).collect()
}

/// Runs `batches` spaced 500 ms apart and closes the window.
fn run_session(
    config: EvaluatorConfig,
    batches: &[Vec<Classification>],
) -> Result<sos_core::DetectionResult, EvaluationError> {
    let mut eval = DetectionEvaluator::new(config).expect("config must be valid");
    let t0 = Instant::now();
    eval.start(t0);
    for (i, b) in batches.iter().enumerate() {
        eval.ingest(b, t0 + Duration::from_millis(500 * i as u64))
            .expect("session must be listening");
    }
    eval.finish()
}

#[test]
fn test_same_samples_always_rank_the_same() {
    let batches = vec![
        batch(&[("fire", 0.62), ("scream", 0.6), ("dog", 0.2)]),
        batch(&[("scream", 0.66), ("fire", 0.64)]),
        batch(&[("fire", 0.69), ("dog", 0.3)]),
    ];

    let first = run_session(EvaluatorConfig::default(), &batches).unwrap();
    for _ in 0..10 {
        assert_eq!(run_session(EvaluatorConfig::default(), &batches).unwrap(), first);
    }
}

#[test]
fn test_fire_outranks_single_louder_scream() {
    // Lock threshold raised so all three samples reach the window.
    let config = EvaluatorConfig {
        lock_threshold: 0.99,
        ..EvaluatorConfig::default()
    };
    let result = run_session(
        config,
        &[
            batch(&[("fire", 0.9)]),
            batch(&[("fire", 0.85)]),
            batch(&[("scream", 0.95)]),
        ],
    )
    .unwrap();

    // fire: (0.5 * 0.875 + 0.6 * 0.9) * min(2 / 2, 2) = 0.9775 and passes the
    // standard gate; scream has one sample and is only backfilled.
    let labels: Vec<_> = result.entries.iter().map(|e| e.label.as_str()).collect();
    assert_eq!(labels, vec!["fire", "scream"]);
    assert!((result.entries[0].score - 0.9775).abs() < 1e-9);
}

#[test]
fn test_lock_keeps_a_louder_label_out_of_the_window() {
    let result = run_session(
        EvaluatorConfig::default(),
        &[batch(&[("fire", 0.80)]), batch(&[("scream", 0.95)])],
    )
    .unwrap();

    let labels: Vec<_> = result.entries.iter().map(|e| e.label.as_str()).collect();
    assert_eq!(labels, vec!["fire"]);
}

#[test]
fn test_priority_tier_leads_the_result() {
    let config = EvaluatorConfig {
        lock_threshold: 0.99,
        scoring: ScoringConfig {
            priority_labels: vec!["siren".to_string()],
            ..ScoringConfig::default()
        },
        ..EvaluatorConfig::default()
    };
    let result = run_session(
        config,
        &[
            batch(&[("music", 0.9), ("siren", 0.55)]),
            batch(&[("music", 0.92)]),
        ],
    )
    .unwrap();

    assert_eq!(result.top().unwrap().label, "siren");
    assert_eq!(result.entries[1].label, "music");
}

#[test]
fn test_silent_window_reports_no_detection() {
    let mut eval = DetectionEvaluator::new(EvaluatorConfig::default()).unwrap();
    let t0 = Instant::now();
    eval.start(t0);
    eval.ingest(&[], t0 + Duration::from_secs(1)).unwrap();

    assert!(eval.is_expired(t0 + Duration::from_secs(12)));
    assert_eq!(eval.finish(), Err(EvaluationError::NoDetection));
    assert!(matches!(eval.state(), EvaluatorState::Errored(_)));
}

#[test]
fn test_result_converts_to_wire_payload() {
    let result = run_session(
        EvaluatorConfig::default(),
        &[batch(&[("glass_break", 0.72), ("fire", 0.1)])],
    )
    .unwrap();

    let payload = ExportPayload::from_result(&result, None, None, chrono::Utc::now());

    assert_eq!(payload.detections[0].sound, "glass_break");
    assert_eq!(payload.detections[0].rank, 1);
}

#[test]
fn test_default_config_ranks_an_alarm_ahead_of_louder_noise() {
    let result = run_session(
        EvaluatorConfig::default(),
        &[
            batch(&[("music", 0.9), ("siren", 0.55)]),
            batch(&[("music", 0.92)]),
        ],
    )
    .unwrap();

    let labels: Vec<_> = result.entries.iter().map(|e| e.label.as_str()).collect();
    assert_eq!(labels, vec!["siren", "music"]);
}
