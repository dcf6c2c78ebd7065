/*!
 * Configuration Module
 *
 * DESIGN DECISION: One versioned config object validated at load, failing closed
 * WHY: The thresholds are a control surface; a config that breaks the
 * ordering between them would silently destabilize the whole gate
 *
 * REASONING CHAIN:
 * 1. ResolverConfig is the sole source for gate and vendor-cache constants
 * 2. YAML surface with unknown keys tolerated; hardcoded fallbacks are
 *    identical to the shipped config/learning_config.yaml
 * 3. Three control-surface invariants checked at load:
 *    vendor_boost < margin_threshold (boost can tiebreak, never flip),
 *    decay_floor < auto_accept (stale memory cannot auto-accept alone),
 *    margin_threshold < dual_gate_margin (promotion is stricter than
 *    acceptance)
 * 4. Calibration proposals apply only through apply_proposal, which
 *    re-validates and reverts on violation
 */

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Score thresholds for the decision gate bands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub auto_accept: f64,
    pub review: f64,
    pub disagreement_cap: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            auto_accept: 0.93,
            review: 0.75,
            disagreement_cap: 0.84,
        }
    }
}

/// Second-axis (margin) and out-of-distribution gate parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionGate {
    pub margin_threshold: f64,
    pub ood_threshold: f64,
}

impl Default for DecisionGate {
    fn default() -> Self {
        Self {
            margin_threshold: 0.05,
            ood_threshold: 0.50,
        }
    }
}

/// Vendor-cache subsystem constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VendorConfig {
    pub enable_vendor_cache: bool,
    pub vendor_boost: f64,
    pub decay_window_days: i64,
    pub decay_lambda: f64,
    pub decay_floor: f64,
    pub min_confirmations: i64,
    pub max_collision_count: i64,
    pub unstable_cooldown_days: i64,
    pub dual_gate_margin: f64,
    pub max_global_synonyms_per_day: i64,
}

impl Default for VendorConfig {
    fn default() -> Self {
        Self {
            enable_vendor_cache: true,
            vendor_boost: 0.02,
            decay_window_days: 180,
            decay_lambda: 0.10,
            decay_floor: 0.90,
            min_confirmations: 3,
            max_collision_count: 2,
            unstable_cooldown_days: 7,
            dual_gate_margin: 0.06,
            max_global_synonyms_per_day: 20,
        }
    }
}

/// Learning-loop parameters (calibration windows, retraining triggers,
/// incremental index persistence).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    /// Persist the semantic index after this many incremental additions.
    pub save_frequency: usize,
    pub calibration_window_days: i64,
    pub min_decisions_for_calibration: usize,
    pub target_precision: f64,
    pub review_target_precision: f64,
    pub retraining_trigger_count: usize,
    pub semantic_reliance_max: f64,
    pub plateau_slope_threshold: f64,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            save_frequency: 100,
            calibration_window_days: 30,
            min_decisions_for_calibration: 100,
            target_precision: 0.98,
            review_target_precision: 0.90,
            retraining_trigger_count: 2000,
            semantic_reliance_max: 0.30,
            plateau_slope_threshold: 0.02,
        }
    }
}

/// Unknown-term clustering parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    pub similarity_threshold: f64,
    pub suggestion_top_k: usize,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
            suggestion_top_k: 3,
        }
    }
}

/// The complete resolver configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub thresholds: Thresholds,
    pub decision: DecisionGate,
    pub vendor: VendorConfig,
    pub learning: LearningConfig,
    pub clustering: ClusteringConfig,
}

/// Threshold proposal produced by the calibrator. Applied only through
/// [`ResolverConfig::apply_proposal`], which re-validates the invariants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdProposal {
    pub auto_accept: f64,
    pub review: f64,
    pub disagreement_cap: f64,
    pub sample_size: usize,
}

impl ResolverConfig {
    /// Load and validate a YAML config file. Fails closed on invariant
    /// violations.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("{}: {e}", path.as_ref().display())))?;
        Self::from_yaml(&text)
    }

    /// Parse and validate a YAML config string.
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: ResolverConfig = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize back to YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Check every range and the three control-surface invariants.
    pub fn validate(&self) -> Result<()> {
        let unit_fields = [
            ("thresholds.auto_accept", self.thresholds.auto_accept),
            ("thresholds.review", self.thresholds.review),
            ("thresholds.disagreement_cap", self.thresholds.disagreement_cap),
            ("decision.margin_threshold", self.decision.margin_threshold),
            ("decision.ood_threshold", self.decision.ood_threshold),
            ("vendor.vendor_boost", self.vendor.vendor_boost),
            ("vendor.decay_lambda", self.vendor.decay_lambda),
            ("vendor.decay_floor", self.vendor.decay_floor),
            ("vendor.dual_gate_margin", self.vendor.dual_gate_margin),
            ("learning.target_precision", self.learning.target_precision),
            ("learning.review_target_precision", self.learning.review_target_precision),
            ("clustering.similarity_threshold", self.clustering.similarity_threshold),
        ];
        for (name, value) in unit_fields {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::ConfigInvariant(format!(
                    "{name} must be in [0.0, 1.0], got {value}"
                )));
            }
        }

        if self.vendor.vendor_boost >= self.decision.margin_threshold {
            return Err(Error::ConfigInvariant(format!(
                "vendor_boost ({}) must be strictly below margin_threshold ({})",
                self.vendor.vendor_boost, self.decision.margin_threshold
            )));
        }
        if self.vendor.decay_floor >= self.thresholds.auto_accept {
            return Err(Error::ConfigInvariant(format!(
                "decay_floor ({}) must be strictly below auto_accept ({})",
                self.vendor.decay_floor, self.thresholds.auto_accept
            )));
        }
        if self.decision.margin_threshold >= self.vendor.dual_gate_margin {
            return Err(Error::ConfigInvariant(format!(
                "margin_threshold ({}) must be strictly below dual_gate_margin ({})",
                self.decision.margin_threshold, self.vendor.dual_gate_margin
            )));
        }

        // Band ordering: OOD <= review < disagreement_cap < auto_accept.
        if self.decision.ood_threshold > self.thresholds.review {
            return Err(Error::ConfigInvariant(format!(
                "ood_threshold ({}) must not exceed review ({})",
                self.decision.ood_threshold, self.thresholds.review
            )));
        }
        if self.thresholds.review >= self.thresholds.disagreement_cap {
            return Err(Error::ConfigInvariant(format!(
                "review ({}) must be strictly below disagreement_cap ({})",
                self.thresholds.review, self.thresholds.disagreement_cap
            )));
        }
        if self.thresholds.disagreement_cap >= self.thresholds.auto_accept {
            return Err(Error::ConfigInvariant(format!(
                "disagreement_cap ({}) must be strictly below auto_accept ({})",
                self.thresholds.disagreement_cap, self.thresholds.auto_accept
            )));
        }

        if self.vendor.min_confirmations < 1 {
            return Err(Error::ConfigInvariant(
                "min_confirmations must be at least 1".into(),
            ));
        }
        if self.vendor.max_collision_count < 0
            || self.vendor.unstable_cooldown_days < 0
            || self.vendor.decay_window_days < 1
            || self.vendor.max_global_synonyms_per_day < 0
        {
            return Err(Error::ConfigInvariant(
                "vendor counters must be non-negative (decay window at least 1 day)".into(),
            ));
        }

        Ok(())
    }

    /// Apply a calibration proposal. The proposal never bypasses the
    /// invariants: if the resulting config is invalid, the previous values
    /// are kept and the error returned.
    pub fn apply_proposal(&mut self, proposal: &ThresholdProposal) -> Result<()> {
        let previous = self.thresholds.clone();
        self.thresholds.auto_accept = proposal.auto_accept;
        self.thresholds.review = proposal.review;
        self.thresholds.disagreement_cap = proposal.disagreement_cap;
        if let Err(e) = self.validate() {
            self.thresholds = previous;
            return Err(e);
        }
        tracing::info!(
            auto_accept = proposal.auto_accept,
            review = proposal.review,
            disagreement_cap = proposal.disagreement_cap,
            sample_size = proposal.sample_size,
            "applied calibrated thresholds"
        );
        Ok(())
    }

    /// Write the config to a YAML file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = self.to_yaml()?;
        fs::write(path.as_ref(), yaml)
            .map_err(|e| Error::Io(format!("{}: {e}", path.as_ref().display())))?;
        Ok(())
    }
}
