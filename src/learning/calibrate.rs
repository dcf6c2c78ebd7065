/*!
 * Threshold Calibration Module
 *
 * DESIGN DECISION: Periodic recalibration that proposes, never applies directly
 * WHY: Observed precision drifts as the corpus grows, but a calibration
 * output must not be able to bypass the control-surface invariants
 *
 * REASONING CHAIN:
 * 1. Summarize a rolling window: method distribution, top-1 acceptance,
 *    override rate, disagreement-by-method, confidence histogram
 * 2. Auto-accept proposal: the smallest threshold whose prefix reaches the
 *    target precision with sufficient sample
 * 3. Review proposal: the balanced-F1 threshold at a lower target precision
 * 4. Proposals go through ResolverConfig::apply_proposal, which re-validates
 *    the invariants and reverts on violation
 */

use crate::config::{ResolverConfig, ThresholdProposal};
use crate::error::Result;
use crate::store::{DecisionQuery, DecisionRecord, SqliteStore};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;

/// One bucket of the confidence histogram.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfidenceBin {
    pub label: &'static str,
    pub count: usize,
}

/// Summary statistics over a window of decisions.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionStatistics {
    pub total_decisions: usize,
    pub validated_count: usize,
    pub validation_rate: f64,
    pub method_distribution: BTreeMap<String, usize>,
    pub acceptance_rate_top1: Option<f64>,
    pub override_rate: Option<f64>,
    pub unknown_rate: Option<f64>,
    pub disagreement_by_method: BTreeMap<String, f64>,
    pub confidence_histogram: Vec<ConfidenceBin>,
    pub ingested_count: usize,
}

/// Threshold calibrator.
#[derive(Debug, Clone)]
pub struct ThresholdCalibrator {
    target_precision: f64,
    review_target_precision: f64,
    review_target_recall: f64,
    min_samples: usize,
}

impl ThresholdCalibrator {
    pub fn new(target_precision: f64, review_target_precision: f64, min_samples: usize) -> Self {
        Self {
            target_precision,
            review_target_precision,
            review_target_recall: 0.90,
            min_samples,
        }
    }

    pub fn from_config(config: &ResolverConfig) -> Self {
        Self::new(
            config.learning.target_precision,
            config.learning.review_target_precision,
            config.learning.min_decisions_for_calibration,
        )
    }

    /// Summarize decisions from the trailing window.
    pub fn analyze(
        &self,
        store: &SqliteStore,
        window_days: i64,
        now: DateTime<Utc>,
    ) -> Result<DecisionStatistics> {
        let since = now - Duration::days(window_days);
        let decisions = store.decisions(&DecisionQuery {
            since: Some(since),
            ..DecisionQuery::default()
        })?;
        Ok(self.compute_statistics(&decisions))
    }

    fn compute_statistics(&self, decisions: &[DecisionRecord]) -> DecisionStatistics {
        let total = decisions.len();
        let validated: Vec<&DecisionRecord> =
            decisions.iter().filter(|d| d.human_validated).collect();

        let mut method_distribution: BTreeMap<String, usize> = BTreeMap::new();
        for decision in decisions {
            *method_distribution
                .entry(decision.method.as_str().to_string())
                .or_insert(0) += 1;
        }

        let (acceptance, overrides, unknown, disagreement_by_method) = if validated.is_empty() {
            (None, None, None, BTreeMap::new())
        } else {
            let n = validated.len() as f64;
            let accepted = validated.iter().filter(|d| d.matched_analyte_id.is_some()).count();
            let overridden = validated.iter().filter(|d| d.disagreement_flag).count();
            let unmatched = validated.iter().filter(|d| d.matched_analyte_id.is_none()).count();

            let mut per_method: BTreeMap<String, (usize, usize)> = BTreeMap::new();
            for decision in &validated {
                let entry = per_method
                    .entry(decision.method.as_str().to_string())
                    .or_insert((0, 0));
                entry.0 += 1;
                if decision.disagreement_flag {
                    entry.1 += 1;
                }
            }
            let rates = per_method
                .into_iter()
                .map(|(method, (count, disagreements))| {
                    (method, disagreements as f64 / count as f64)
                })
                .collect();

            (
                Some(accepted as f64 / n),
                Some(overridden as f64 / n),
                Some(unmatched as f64 / n),
                rates,
            )
        };

        DecisionStatistics {
            total_decisions: total,
            validated_count: validated.len(),
            validation_rate: if total > 0 {
                validated.len() as f64 / total as f64
            } else {
                0.0
            },
            method_distribution,
            acceptance_rate_top1: acceptance,
            override_rate: overrides,
            unknown_rate: unknown,
            disagreement_by_method,
            confidence_histogram: histogram(decisions),
            ingested_count: validated.iter().filter(|d| d.ingested).count(),
        }
    }

    /// Propose thresholds from validated decisions. `None` when the sample
    /// is too small to calibrate on.
    pub fn propose(&self, decisions: &[DecisionRecord]) -> Option<ThresholdProposal> {
        let mut validated: Vec<&DecisionRecord> =
            decisions.iter().filter(|d| d.human_validated).collect();
        if validated.len() < self.min_samples {
            tracing::info!(
                sample = validated.len(),
                required = self.min_samples,
                "calibration skipped: insufficient validated sample"
            );
            return None;
        }
        validated.sort_by(|a, b| {
            b.confidence_score
                .partial_cmp(&a.confidence_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let auto_accept = self.find_precision_threshold(&validated);
        let review = self.find_balanced_threshold(&validated);
        Some(ThresholdProposal {
            auto_accept,
            review,
            disagreement_cap: auto_accept - 0.05,
            sample_size: validated.len(),
        })
    }

    /// Smallest threshold whose prefix (all decisions at or above it)
    /// reaches the target precision with at least ten samples.
    fn find_precision_threshold(&self, sorted: &[&DecisionRecord]) -> f64 {
        let mut best = 0.95;
        let mut correct = 0usize;
        for (i, decision) in sorted.iter().enumerate() {
            if decision.matched_analyte_id.is_some() && !decision.disagreement_flag {
                correct += 1;
            }
            let total = i + 1;
            let precision = correct as f64 / total as f64;
            if precision >= self.target_precision && total >= 10 {
                best = decision.confidence_score;
            }
        }
        best
    }

    /// Threshold maximizing F1 while meeting the review-band precision and
    /// recall targets.
    fn find_balanced_threshold(&self, sorted: &[&DecisionRecord]) -> f64 {
        let total_positives = sorted
            .iter()
            .filter(|d| d.matched_analyte_id.is_some() && !d.disagreement_flag)
            .count();
        if total_positives == 0 {
            return 0.75;
        }

        let mut best_threshold = 0.75;
        let mut best_f1 = 0.0;
        let mut true_positives = 0usize;
        for (i, decision) in sorted.iter().enumerate() {
            if decision.matched_analyte_id.is_some() && !decision.disagreement_flag {
                true_positives += 1;
            }
            let predicted = i + 1;
            let precision = true_positives as f64 / predicted as f64;
            let recall = true_positives as f64 / total_positives as f64;
            if precision + recall == 0.0 {
                continue;
            }
            let f1 = 2.0 * precision * recall / (precision + recall);
            if precision >= self.review_target_precision
                && recall >= self.review_target_recall
                && f1 > best_f1
            {
                best_f1 = f1;
                best_threshold = decision.confidence_score;
            }
        }
        best_threshold
    }
}

fn histogram(decisions: &[DecisionRecord]) -> Vec<ConfidenceBin> {
    let labels = ["0.0-0.5", "0.5-0.7", "0.7-0.8", "0.8-0.9", "0.9-0.95", "0.95-1.0"];
    let mut counts = [0usize; 6];
    for decision in decisions {
        let score = decision.confidence_score;
        let idx = if score < 0.5 {
            0
        } else if score < 0.7 {
            1
        } else if score < 0.8 {
            2
        } else if score < 0.9 {
            3
        } else if score < 0.95 {
            4
        } else {
            5
        };
        counts[idx] += 1;
    }
    labels
        .iter()
        .zip(counts)
        .map(|(label, count)| ConfidenceBin { label, count })
        .collect()
}
