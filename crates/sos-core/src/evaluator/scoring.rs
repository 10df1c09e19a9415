//! Window aggregation and ranking.
//!
//! Ranking is a pure function of the window contents and the
//! [`ScoringConfig`], so the same samples always produce the same order.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use super::config::ScoringConfig;
use super::{ClassificationSample, RankedDetection};

/// Per-label statistics over a window.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelStats {
    pub label: String,
    pub count: usize,
    pub max_confidence: f64,
    pub mean_confidence: f64,
}

impl LabelStats {
    /// `(w_mean * mean + w_max * max) * min(count / divisor, cap)`, times the
    /// priority bonus for priority labels.
    pub fn score(&self, scoring: &ScoringConfig) -> f64 {
        let frequency =
            (self.count as f64 / scoring.frequency_divisor).min(scoring.frequency_cap);
        let base = scoring.mean_weight * self.mean_confidence
            + scoring.max_weight * self.max_confidence;
        let bonus = if scoring.is_priority(&self.label) {
            scoring.priority_bonus
        } else {
            1.0
        };
        base * frequency * bonus
    }
}

/// Groups samples by label, returned in ascending label order.
pub fn aggregate(window: &[ClassificationSample]) -> Vec<LabelStats> {
    let mut groups: BTreeMap<&str, (usize, f64, f64)> = BTreeMap::new();
    for sample in window {
        let entry = groups
            .entry(sample.label.as_str())
            .or_insert((0, f64::NEG_INFINITY, 0.0));
        entry.0 += 1;
        entry.1 = entry.1.max(sample.confidence);
        entry.2 += sample.confidence;
    }

    groups
        .into_iter()
        .map(|(label, (count, max, sum))| LabelStats {
            label: label.to_string(),
            count,
            max_confidence: max,
            mean_confidence: sum / count as f64,
        })
        .collect()
}

/// Ranks the window into at most `limit` distinct labels.
///
/// Labels are taken in three tiers: priority labels that pass the priority
/// gate, then other labels that pass the standard gate, each ordered by
/// score.  Remaining slots are backfilled with every other label by peak
/// confidence.  Ties fall back to peak confidence and then to the label in
/// ascending order.
pub fn rank(
    window: &[ClassificationSample],
    scoring: &ScoringConfig,
    limit: usize,
) -> Vec<RankedDetection> {
    let mut priority = Vec::new();
    let mut standard = Vec::new();
    let mut rest = Vec::new();

    for stats in aggregate(window) {
        let score = stats.score(scoring);
        let admitted = scoring
            .gate_for(&stats.label)
            .admits(stats.max_confidence, stats.count);
        match (admitted, scoring.is_priority(&stats.label)) {
            (true, true) => priority.push((stats, score)),
            (true, false) => standard.push((stats, score)),
            (false, _) => rest.push((stats, score)),
        }
    }

    priority.sort_by(by_score);
    standard.sort_by(by_score);
    rest.sort_by(|(a, _), (b, _)| by_peak_then_label(a, b));

    priority
        .into_iter()
        .chain(standard)
        .chain(rest)
        .take(limit)
        .enumerate()
        .map(|(i, (stats, score))| RankedDetection {
            label: stats.label,
            confidence: stats.max_confidence,
            rank: i as u32 + 1,
            score,
        })
        .collect()
}

fn by_score((a, a_score): &(LabelStats, f64), (b, b_score): &(LabelStats, f64)) -> Ordering {
    b_score
        .total_cmp(a_score)
        .then_with(|| by_peak_then_label(a, b))
}

fn by_peak_then_label(a: &LabelStats, b: &LabelStats) -> Ordering {
    b.max_confidence
        .total_cmp(&a.max_confidence)
        .then_with(|| a.label.cmp(&b.label))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn samples(pairs: &[(&str, f64)]) -> Vec<ClassificationSample> {
        let now = Instant::now();
        pairs
            .iter()
            .map(|(label, confidence)| ClassificationSample {
                label: label.to_string(),
                confidence: *confidence,
                timestamp: now,
            })
            .collect()
    }

    #[test]
    fn test_aggregate_computes_count_max_and_mean() {
        let stats = aggregate(&samples(&[("fire", 0.9), ("fire", 0.85), ("scream", 0.95)]));
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].label, "fire");
        assert_eq!(stats[0].count, 2);
        assert!((stats[0].max_confidence - 0.9).abs() < 1e-9);
        assert!((stats[0].mean_confidence - 0.875).abs() < 1e-9);
    }

    #[test]
    fn test_score_formula() {
        let stats = LabelStats {
            label: "fire".to_string(),
            count: 2,
            max_confidence: 0.9,
            mean_confidence: 0.875,
        };
        // (0.5 * 0.875 + 0.6 * 0.9) * min(2 / 2, 2)
        assert!((stats.score(&ScoringConfig::default()) - 0.9775).abs() < 1e-9);
    }

    #[test]
    fn test_frequency_multiplier_is_capped() {
        let stats = LabelStats {
            label: "x".to_string(),
            count: 40,
            max_confidence: 1.0,
            mean_confidence: 1.0,
        };
        assert!((stats.score(&ScoringConfig::default()) - 2.2).abs() < 1e-9);
    }

    #[test]
    fn test_frequent_label_outranks_single_higher_peak() {
        let ranked = rank(
            &samples(&[("fire", 0.9), ("fire", 0.85), ("scream", 0.95)]),
            &ScoringConfig::default(),
            3,
        );
        let labels: Vec<_> = ranked.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, vec!["fire", "scream"]);
        assert_eq!(ranked[0].rank, 1);
        assert_eq!(ranked[1].rank, 2);
    }

    #[test]
    fn test_priority_label_is_ranked_ahead_of_higher_scores() {
        let scoring = ScoringConfig {
            priority_labels: vec!["scream".to_string()],
            ..ScoringConfig::default()
        };
        // scream: (0.475 + 0.57) * 0.5 * 1.2 = 0.627, below fire's 0.9775,
        // but the priority tier comes first.
        let ranked = rank(
            &samples(&[("fire", 0.9), ("fire", 0.85), ("scream", 0.95)]),
            &scoring,
            3,
        );
        assert_eq!(ranked[0].label, "scream");
        assert!((ranked[0].score - 0.627).abs() < 1e-9);
        assert_eq!(ranked[1].label, "fire");
    }

    #[test]
    fn test_priority_label_failing_its_gate_is_backfilled() {
        let scoring = ScoringConfig {
            priority_labels: vec!["siren".to_string()],
            ..ScoringConfig::default()
        };
        let ranked = rank(
            &samples(&[("siren", 0.45), ("glass", 0.7), ("glass", 0.7)]),
            &scoring,
            3,
        );
        let labels: Vec<_> = ranked.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, vec!["glass", "siren"]);
    }

    #[test]
    fn test_backfill_when_nothing_qualifies() {
        let ranked = rank(
            &samples(&[("dog", 0.4), ("cat", 0.6), ("bird", 0.6)]),
            &ScoringConfig::default(),
            2,
        );
        let labels: Vec<_> = ranked.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, vec!["bird", "cat"]);
    }

    #[test]
    fn test_result_is_truncated_and_unique() {
        let ranked = rank(
            &samples(&[
                ("a", 0.9),
                ("a", 0.9),
                ("b", 0.8),
                ("b", 0.8),
                ("c", 0.7),
                ("c", 0.7),
                ("d", 0.66),
                ("d", 0.66),
            ]),
            &ScoringConfig::default(),
            3,
        );
        let labels: Vec<_> = ranked.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_empty_window_ranks_nothing() {
        assert!(rank(&[], &ScoringConfig::default(), 3).is_empty());
    }
}
