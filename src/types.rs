/*!
 * Domain Types Module
 *
 * DESIGN DECISION: Small owned structs with validated constructors
 * WHY: Every candidate crossing a component boundary must already satisfy
 * the range invariants the gate reasons about
 *
 * REASONING CHAIN:
 * 1. Analyte: canonical entity, stable id assigned at corpus creation
 * 2. Synonym: one surface form mapping to exactly one analyte
 * 3. Match: one candidate from one method; confidence validated into [0, 1]
 *    at construction so downstream arithmetic never re-checks
 * 4. ResolutionResult: the full output of one cascade resolve
 * 5. Enum string forms are the stable vocabulary persisted in decision logs
 */

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Classification of a canonical analyte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyteKind {
    SingleSubstance,
    FractionOrGroup,
    Suite,
    Parameter,
}

impl AnalyteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalyteKind::SingleSubstance => "single_substance",
            AnalyteKind::FractionOrGroup => "fraction_or_group",
            AnalyteKind::Suite => "suite",
            AnalyteKind::Parameter => "parameter",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "single_substance" => Ok(AnalyteKind::SingleSubstance),
            "fraction_or_group" => Ok(AnalyteKind::FractionOrGroup),
            "suite" => Ok(AnalyteKind::Suite),
            "parameter" => Ok(AnalyteKind::Parameter),
            other => Err(Error::InvalidInput(format!("unknown analyte kind: {other}"))),
        }
    }
}

/// A canonical analyte row. The `analyte_id` is assigned at corpus creation
/// and is never mutated by the runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analyte {
    pub analyte_id: String,
    pub preferred_name: String,
    pub kind: AnalyteKind,
    pub cas_number: Option<String>,
    /// Regulatory grouping (Metals, VOCs, PAHs, ...), when known.
    pub chemical_group: Option<String>,
    /// Parent suite/group id; the parent links form a forest.
    pub parent_analyte_id: Option<String>,
}

impl Analyte {
    pub fn new(analyte_id: impl Into<String>, preferred_name: impl Into<String>, kind: AnalyteKind) -> Self {
        Self {
            analyte_id: analyte_id.into(),
            preferred_name: preferred_name.into(),
            kind,
            cas_number: None,
            chemical_group: None,
            parent_analyte_id: None,
        }
    }

    pub fn with_cas(mut self, cas: impl Into<String>) -> Self {
        self.cas_number = Some(cas.into());
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.chemical_group = Some(group.into());
        self
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent_analyte_id = Some(parent.into());
        self
    }
}

/// Classification of a synonym surface form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynonymKind {
    Iupac,
    Common,
    Abbreviation,
    LabVariant,
    Trade,
    FractionNotation,
}

impl SynonymKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SynonymKind::Iupac => "iupac",
            SynonymKind::Common => "common",
            SynonymKind::Abbreviation => "abbreviation",
            SynonymKind::LabVariant => "lab_variant",
            SynonymKind::Trade => "trade",
            SynonymKind::FractionNotation => "fraction_notation",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "iupac" => Ok(SynonymKind::Iupac),
            "common" => Ok(SynonymKind::Common),
            "abbreviation" => Ok(SynonymKind::Abbreviation),
            "lab_variant" => Ok(SynonymKind::LabVariant),
            "trade" => Ok(SynonymKind::Trade),
            "fraction_notation" => Ok(SynonymKind::FractionNotation),
            other => Err(Error::InvalidInput(format!("unknown synonym kind: {other}"))),
        }
    }
}

/// A stored synonym. `(analyte_id, normalized)` is unique, and `normalized`
/// equals the normalizer output for `raw` under `normalization_version`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Synonym {
    pub id: i64,
    pub analyte_id: String,
    pub raw: String,
    pub normalized: String,
    pub kind: SynonymKind,
    pub harvest_source: String,
    pub confidence: f64,
    pub lab_vendor: Option<String>,
    pub normalization_version: i64,
}

/// Stable method tag vocabulary emitted in decision logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodTag {
    Exact,
    CasExtracted,
    Fuzzy,
    Semantic,
    Hybrid,
    VendorCache,
    VendorCacheStale,
    Unknown,
}

impl MethodTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            MethodTag::Exact => "exact",
            MethodTag::CasExtracted => "cas_extracted",
            MethodTag::Fuzzy => "fuzzy",
            MethodTag::Semantic => "semantic",
            MethodTag::Hybrid => "hybrid",
            MethodTag::VendorCache => "vendor_cache",
            MethodTag::VendorCacheStale => "vendor_cache_stale",
            MethodTag::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "exact" => Ok(MethodTag::Exact),
            "cas_extracted" => Ok(MethodTag::CasExtracted),
            "fuzzy" => Ok(MethodTag::Fuzzy),
            "semantic" => Ok(MethodTag::Semantic),
            "hybrid" => Ok(MethodTag::Hybrid),
            "vendor_cache" => Ok(MethodTag::VendorCache),
            "vendor_cache_stale" => Ok(MethodTag::VendorCacheStale),
            "unknown" => Ok(MethodTag::Unknown),
            other => Err(Error::InvalidInput(format!("unknown method tag: {other}"))),
        }
    }
}

/// One candidate produced by a matching method.
///
/// `score` is the raw similarity from the producing algorithm; `confidence`
/// is the calibrated value the decision gate reasons about. Both are raw
/// (never binned) so the top-1/top-2 margin keeps its geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub analyte_id: String,
    pub preferred_name: String,
    pub confidence: f64,
    pub method: MethodTag,
    pub score: f64,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Match {
    pub fn new(
        analyte_id: impl Into<String>,
        preferred_name: impl Into<String>,
        confidence: f64,
        method: MethodTag,
        score: f64,
    ) -> Result<Self> {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(Error::InvalidConfidence(confidence));
        }
        Ok(Self {
            analyte_id: analyte_id.into(),
            preferred_name: preferred_name.into(),
            confidence,
            method,
            score,
            metadata: serde_json::Map::new(),
        })
    }

    pub fn with_meta(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

/// Confidence band assigned by the two-axis decision gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfidenceBand {
    AutoAccept,
    Review,
    Unknown,
    NovelCompound,
}

impl ConfidenceBand {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceBand::AutoAccept => "AUTO_ACCEPT",
            ConfidenceBand::Review => "REVIEW",
            ConfidenceBand::Unknown => "UNKNOWN",
            ConfidenceBand::NovelCompound => "NOVEL_COMPOUND",
        }
    }
}

/// Which signals fired during one resolve.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalsUsed {
    pub exact: bool,
    pub cas_extracted: bool,
    pub fuzzy: bool,
    pub semantic: bool,
    pub vendor_cache: bool,
    pub cross_method_conflict: bool,
    pub vendor: Option<String>,
}

/// Complete output of one cascade resolve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionResult {
    pub input_text: String,
    pub best_match: Option<Match>,
    pub all_candidates: Vec<Match>,
    pub signals_used: SignalsUsed,
    pub disagreement_flag: bool,
    pub confidence_band: ConfidenceBand,
    pub resolution_time_ms: f64,
    /// Top-1 minus top-2 candidate score; 1.0 with a single candidate,
    /// 0.0 with none.
    pub margin: f64,
}

impl ResolutionResult {
    pub fn is_resolved(&self) -> bool {
        self.best_match.is_some()
    }

    pub fn requires_review(&self) -> bool {
        self.confidence_band == ConfidenceBand::Review || self.disagreement_flag
    }

    pub fn is_novel(&self) -> bool {
        self.confidence_band == ConfidenceBand::NovelCompound
    }

    pub fn confidence(&self) -> f64 {
        self.best_match.as_ref().map(|m| m.confidence).unwrap_or(0.0)
    }
}

/// Validation-confidence grade recorded on a lab variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationGrade {
    High,
    Medium,
    Low,
    Unknown,
    Unstable,
}

impl ValidationGrade {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationGrade::High => "HIGH",
            ValidationGrade::Medium => "MEDIUM",
            ValidationGrade::Low => "LOW",
            ValidationGrade::Unknown => "UNKNOWN",
            ValidationGrade::Unstable => "UNSTABLE",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "HIGH" => Ok(ValidationGrade::High),
            "MEDIUM" => Ok(ValidationGrade::Medium),
            "LOW" => Ok(ValidationGrade::Low),
            "UNKNOWN" => Ok(ValidationGrade::Unknown),
            "UNSTABLE" => Ok(ValidationGrade::Unstable),
            other => Err(Error::InvalidInput(format!("unknown validation grade: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_rejects_out_of_range_confidence() {
        let err = Match::new("REG153_001", "Benzene", 1.2, MethodTag::Exact, 1.0);
        assert!(matches!(err, Err(Error::InvalidConfidence(_))));
    }

    #[test]
    fn method_tags_round_trip() {
        for tag in [
            MethodTag::Exact,
            MethodTag::CasExtracted,
            MethodTag::Fuzzy,
            MethodTag::Semantic,
            MethodTag::Hybrid,
            MethodTag::VendorCache,
            MethodTag::VendorCacheStale,
            MethodTag::Unknown,
        ] {
            assert_eq!(MethodTag::parse(tag.as_str()).unwrap(), tag);
        }
    }

    #[test]
    fn band_strings_are_stable() {
        assert_eq!(ConfidenceBand::AutoAccept.as_str(), "AUTO_ACCEPT");
        assert_eq!(ConfidenceBand::NovelCompound.as_str(), "NOVEL_COMPOUND");
    }

    #[test]
    fn resolution_result_accessors() {
        let m = Match::new("REG153_001", "Benzene", 0.97, MethodTag::Fuzzy, 0.97).unwrap();
        let result = ResolutionResult {
            input_text: "benzene".into(),
            best_match: Some(m),
            all_candidates: vec![],
            signals_used: SignalsUsed::default(),
            disagreement_flag: false,
            confidence_band: ConfidenceBand::AutoAccept,
            resolution_time_ms: 0.3,
            margin: 1.0,
        };
        assert!(result.is_resolved());
        assert!(!result.requires_review());
        assert!((result.confidence() - 0.97).abs() < 1e-9);
    }
}
