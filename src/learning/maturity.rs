/*!
 * Corpus Maturity Module
 *
 * DESIGN DECISION: Advisory retraining flag requiring at least two triggers
 * WHY: Any single signal (a plateau, a validated-data pile-up) fires too
 * easily on noise; retraining is expensive and stays a human call
 *
 * REASONING CHAIN:
 * 1. Track match-method distribution, weekly unknown-rate buckets, and
 *    synonym growth over a trailing window
 * 2. Triggers: validated data threshold, unknown-rate plateau (flat
 *    least-squares slope), semantic reliance above its bound, new
 *    chemical groups in the window
 * 3. Two or more active triggers recommend retraining; the recommendation
 *    is advisory and the runtime model only ever grows incrementally
 */

use crate::config::LearningConfig;
use crate::error::Result;
use crate::store::{DecisionQuery, SqliteStore};
use chrono::{DateTime, Duration, Utc};

/// Snapshot of corpus and decision health over a trailing window.
#[derive(Debug, Clone, PartialEq)]
pub struct MaturityMetrics {
    pub exact_match_rate: f64,
    pub fuzzy_match_rate: f64,
    /// Share of recent decisions where the semantic signal fired.
    pub semantic_reliance: f64,
    pub unknown_rate: f64,
    pub total_analytes: usize,
    pub total_synonyms: usize,
    pub avg_synonyms_per_analyte: f64,
    /// Weekly unknown-rate buckets, oldest first.
    pub unknown_rate_trend: Vec<f64>,
    /// Weekly new-synonym counts, oldest first.
    pub new_synonyms_per_week: Vec<usize>,
    pub synonyms_added_30d: usize,
    /// Chemical groups whose first analyte appeared inside the window.
    pub new_chemical_groups: usize,
}

/// Advisory retraining assessment.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrainAssessment {
    pub recommended: bool,
    pub active_triggers: Vec<String>,
    pub min_triggers_required: usize,
}

/// Compute maturity metrics over the trailing `history_days`.
pub fn corpus_maturity(
    store: &SqliteStore,
    now: DateTime<Utc>,
    history_days: i64,
) -> Result<MaturityMetrics> {
    let total_analytes = store.analyte_count()?;
    let total_synonyms = store.synonym_count()?;
    let avg = if total_analytes > 0 {
        total_synonyms as f64 / total_analytes as f64
    } else {
        0.0
    };

    // Method distribution over the last 30 days.
    let cutoff_30d = now - Duration::days(30);
    let recent = store.decisions(&DecisionQuery {
        since: Some(cutoff_30d),
        ..DecisionQuery::default()
    })?;
    let (mut exact, mut fuzzy, mut semantic, mut unknown) = (0usize, 0usize, 0usize, 0usize);
    for decision in &recent {
        let signals = &decision.signals_used;
        if signals.exact || signals.cas_extracted {
            exact += 1;
        } else if signals.fuzzy {
            fuzzy += 1;
        }
        if signals.semantic {
            semantic += 1;
        }
        if decision.matched_analyte_id.is_none() {
            unknown += 1;
        }
    }
    let total_recent = recent.len().max(1) as f64;
    let has_recent = !recent.is_empty();
    let rate = |count: usize| if has_recent { count as f64 / total_recent } else { 0.0 };

    // Weekly trend buckets, up to twelve weeks.
    let weeks = (history_days / 7).clamp(0, 12);
    let mut unknown_rate_trend = Vec::new();
    let mut new_synonyms_per_week = Vec::new();
    for week in 0..weeks {
        let week_start = now - Duration::days((week + 1) * 7);
        let week_end = now - Duration::days(week * 7);
        let bucket = store.decisions(&DecisionQuery {
            since: Some(week_start),
            ..DecisionQuery::default()
        })?;
        let in_window: Vec<_> = bucket
            .iter()
            .filter(|d| d.decided_at < week_end)
            .collect();
        let bucket_unknown = in_window
            .iter()
            .filter(|d| d.matched_analyte_id.is_none())
            .count();
        unknown_rate_trend.push(if in_window.is_empty() {
            0.0
        } else {
            bucket_unknown as f64 / in_window.len() as f64
        });
        new_synonyms_per_week.push(synonyms_created_between(store, week_start, week_end)?);
    }
    unknown_rate_trend.reverse();
    new_synonyms_per_week.reverse();

    let synonyms_added_30d = synonyms_created_between(store, cutoff_30d, now)?;
    let new_chemical_groups = chemical_groups_added_since(store, cutoff_30d)?;

    Ok(MaturityMetrics {
        exact_match_rate: rate(exact),
        fuzzy_match_rate: rate(fuzzy),
        semantic_reliance: rate(semantic),
        unknown_rate: rate(unknown),
        total_analytes,
        total_synonyms,
        avg_synonyms_per_analyte: avg,
        unknown_rate_trend,
        new_synonyms_per_week,
        synonyms_added_30d,
        new_chemical_groups,
    })
}

fn synonyms_created_between(
    store: &SqliteStore,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<usize> {
    let count: i64 = store.conn().query_row(
        "SELECT COUNT(*) FROM synonyms WHERE created_at >= ?1 AND created_at < ?2",
        rusqlite::params![start.to_rfc3339(), end.to_rfc3339()],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

fn chemical_groups_added_since(store: &SqliteStore, cutoff: DateTime<Utc>) -> Result<usize> {
    let count: i64 = store.conn().query_row(
        "SELECT COUNT(*) FROM (
             SELECT chemical_group, MIN(created_at) AS first_seen FROM analytes
             WHERE chemical_group IS NOT NULL GROUP BY chemical_group
         ) WHERE first_seen >= ?1",
        rusqlite::params![cutoff.to_rfc3339()],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

/// Count of human-validated, ingested decisions; the proxy for validated
/// data accumulated since the last training run.
pub fn validated_ingested_count(store: &SqliteStore) -> Result<usize> {
    let decisions = store.decisions(&DecisionQuery {
        human_validated: Some(true),
        ingested: Some(true),
        ..DecisionQuery::default()
    })?;
    Ok(decisions.len())
}

/// Least-squares slope of a series against its index.
pub fn least_squares_slope(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let n_f = n as f64;
    let mean_x = (n_f - 1.0) / 2.0;
    let mean_y = values.iter().sum::<f64>() / n_f;
    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - mean_x;
        numerator += dx * (y - mean_y);
        denominator += dx * dx;
    }
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

/// A metric has plateaued when the slope over the recent window is flat.
pub fn detect_plateau(history: &[f64], window: usize, threshold: f64) -> bool {
    if history.len() < window || window < 2 {
        return false;
    }
    let recent = &history[history.len() - window..];
    least_squares_slope(recent).abs() < threshold
}

/// Retraining is recommended only when at least two triggers hold.
pub fn assess_retraining(
    metrics: &MaturityMetrics,
    validated_since_last_train: usize,
    config: &LearningConfig,
) -> RetrainAssessment {
    let mut active = Vec::new();

    if validated_since_last_train >= config.retraining_trigger_count {
        active.push("validated_data_threshold".to_string());
    }
    if detect_plateau(&metrics.unknown_rate_trend, 4, config.plateau_slope_threshold) {
        active.push("unknown_rate_plateau".to_string());
    }
    if metrics.semantic_reliance > config.semantic_reliance_max {
        active.push("high_semantic_reliance".to_string());
    }
    if metrics.new_chemical_groups > 0 {
        active.push("new_chemical_groups".to_string());
    }

    let min_required = 2;
    let recommended = active.len() >= min_required;
    if recommended {
        tracing::warn!(triggers = ?active, "retraining recommended");
    }
    RetrainAssessment {
        recommended,
        active_triggers: active,
        min_triggers_required: min_required,
    }
}
