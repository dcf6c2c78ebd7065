/*!
 * Learning Loop Module
 *
 * DESIGN DECISION: Three memories with deliberately different inertia
 * WHY: Vendor-local truth must never pollute global structural memory;
 * the channels between them are the dual gate and the daily cap, nothing
 * else
 *
 * REASONING CHAIN:
 * 1. The vendor cache updates on every validation event (fast, lossy,
 *    decay-prone prior)
 * 2. The global synonym graph grows only through the dual gate and the
 *    per-day promotion cap (high-inertia structural memory)
 * 3. The semantic index grows incrementally as promotions land
 * 4. Periodic jobs recalibrate thresholds, cluster unknown terms for batch
 *    review, and emit an advisory retraining recommendation
 */

mod calibrate;
mod clustering;
mod ingest;
mod maturity;

pub use calibrate::{ConfidenceBin, DecisionStatistics, ThresholdCalibrator};
pub use clustering::{AnalyteSuggestion, UnknownCluster, VariantClusterer};
pub use ingest::{IngestStats, LearningLoop, ValidatedObservation};
pub use maturity::{
    assess_retraining, corpus_maturity, detect_plateau, least_squares_slope,
    validated_ingested_count, MaturityMetrics, RetrainAssessment,
};
