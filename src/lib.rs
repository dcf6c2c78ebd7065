/*!
 * Chemical-Name Resolution Core
 *
 * DESIGN DECISION: Three tightly coupled subsystems behind one library surface
 * WHY: Resolution quality comes from the interplay of the cascade, the
 * vendor memory, and the learning loop; separating them into modules keeps
 * each independently testable while the invariants bind them together
 *
 * REASONING CHAIN:
 * 1. The cascade resolver combines exact-synonym, CAS-number, fuzzy, and
 *    semantic-vector signals under a score + margin gate with
 *    out-of-distribution and cross-method-conflict detection
 * 2. The vendor cache is a bounded per-vendor behavioral memory with
 *    consensus, collision, decay, and cooldown invariants
 * 3. The learning loop promotes validated tokens into the global synonym
 *    graph through a dual gate and a daily cap, grows the semantic index
 *    incrementally, recalibrates thresholds, and clusters unknown terms
 * 4. Maps free-form lab names (variants, truncations, misspellings,
 *    vendor-idiosyncratic notations) onto a canonical analyte corpus with
 *    a calibrated confidence and a full audit trail
 *
 * # Example
 *
 * ```
 * use analyte_resolve::{
 *     Analyte, AnalyteKind, ConfidenceBand, NewSynonym, Normalizer, Resolver, ResolverConfig,
 *     SqliteStore, SynonymKind, NORMALIZATION_VERSION,
 * };
 *
 * let store = SqliteStore::open_in_memory().unwrap();
 * store
 *     .insert_analyte(
 *         &Analyte::new("REG153_001", "Benzene", AnalyteKind::SingleSubstance)
 *             .with_cas("71-43-2"),
 *     )
 *     .unwrap();
 * store
 *     .insert_synonym(&NewSynonym {
 *         analyte_id: "REG153_001".into(),
 *         raw: "Benzene".into(),
 *         normalized: Normalizer::new().normalize("Benzene"),
 *         kind: SynonymKind::Iupac,
 *         harvest_source: "bootstrap".into(),
 *         confidence: 1.0,
 *         lab_vendor: None,
 *         normalization_version: NORMALIZATION_VERSION,
 *     })
 *     .unwrap();
 *
 * let resolver = Resolver::new(store, ResolverConfig::default()).unwrap();
 * let result = resolver.resolve("Benzene", 0.75, None).unwrap();
 * assert_eq!(result.confidence_band, ConfidenceBand::AutoAccept);
 * assert_eq!(result.best_match.unwrap().analyte_id, "REG153_001");
 * ```
 */

pub mod cas;
pub mod config;
pub mod error;
pub mod fuzzy;
pub mod learning;
pub mod normalize;
pub mod ontario;
pub mod resolver;
pub mod semantic;
pub mod store;
pub mod types;
pub mod vendor_cache;

pub use cas::CasExtractor;
pub use config::{
    ClusteringConfig, DecisionGate, LearningConfig, ResolverConfig, ThresholdProposal, Thresholds,
    VendorConfig,
};
pub use error::{Error, Result};
pub use fuzzy::{FuzzyMatcher, FuzzyOptions};
pub use learning::{
    assess_retraining, corpus_maturity, detect_plateau, validated_ingested_count,
    AnalyteSuggestion, ConfidenceBin, DecisionStatistics, IngestStats, LearningLoop,
    MaturityMetrics, RetrainAssessment, ThresholdCalibrator, UnknownCluster, ValidatedObservation,
    VariantClusterer,
};
pub use normalize::{Normalizer, NORMALIZATION_VERSION};
pub use ontario::OntarioLayer;
pub use resolver::{
    compute_margin, decide_band, dedupe_candidates, ResolveContext, Resolver,
    DEFAULT_CONFIDENCE_THRESHOLD,
};
pub use semantic::{
    IndexPaths, NgramHashEncoder, SemanticHit, SemanticIndex, TextEncoder, VectorMeta,
    EMBEDDING_DIM,
};
pub use store::{
    CandidateRecord, CorpusIssue, DecisionQuery, DecisionRecord, EmbeddingMetaRow, NewDecision,
    NewSynonym, PromotionOutcome, SnapshotRow, SqliteStore,
};
pub use types::{
    Analyte, AnalyteKind, ConfidenceBand, Match, MethodTag, ResolutionResult, SignalsUsed, Synonym,
    SynonymKind, ValidationGrade,
};
pub use vendor_cache::{Confirmation, LabVariantRow, VariantState, VendorCache};
