/*!
 * Cascade Resolver & Decision Gate Module
 *
 * DESIGN DECISION: Fixed-order signal cascade with a two-axis (score + margin) gate
 * WHY: Score alone is unsafe near isomer families; a high score with a narrow
 * margin means the corpus has a close competitor and a human must look
 *
 * REASONING CHAIN:
 * 1. Signals run cheapest-first: vendor cache, exact/CAS, fuzzy, semantic
 * 2. Later signals supersede earlier ones only through the explicit combine step
 * 3. Combine keeps the best score per analyte, sorted, truncated to five
 * 4. Margin (top-1 minus top-2) is the second gate axis; auto-accept needs both
 * 5. Cross-method conflict (fuzzy and semantic disagree above review) caps
 *    confidence at disagreement_cap and forces review
 * 6. Every resolve appends one decision row pinned to corpus + model hashes
 *
 * RELATED: vendor_cache.rs (step 0), fuzzy.rs, semantic/ (steps 2-3)
 * FUTURE: Context-conditioned thresholds per (vendor, method, matrix)
 */

use crate::cas::CasExtractor;
use crate::config::ResolverConfig;
use crate::error::{Error, Result};
use crate::fuzzy::{FuzzyMatcher, FuzzyOptions};
use crate::normalize::Normalizer;
use crate::semantic::SemanticIndex;
use crate::store::{CandidateRecord, CorpusIssue, NewDecision, SqliteStore};
use crate::types::{ConfidenceBand, Match, MethodTag, ResolutionResult, SignalsUsed};
use crate::vendor_cache::VendorCache;
use chrono::NaiveDate;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Default minimum confidence for candidates, matching the review band.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.75;

/// Request context recorded alongside a decision.
#[derive(Debug, Clone, Default)]
pub struct ResolveContext {
    pub vendor: Option<String>,
    pub method: Option<String>,
    pub matrix: Option<String>,
}

/**
 * Thread-safe cascade resolver
 *
 * DESIGN DECISION: Immutable resolver shared by reference across threads
 * WHY: The hot path is synchronous on the caller's thread and must be safe
 * to invoke concurrently against one shared instance
 *
 * REASONING CHAIN:
 * 1. All per-resolve state is local to `resolve_on`; the struct holds only
 *    configuration and shared handles
 * 2. The store serializes its own access; the semantic index hands out read
 *    views; the vendor cache writes transactionally
 * 3. `resolve` therefore takes `&self` and needs no external locking
 * 4. The one process-wide mutable bit (absence-logged flag) is an AtomicBool
 *
 * RELATED: SqliteStore, SemanticIndex, VendorCache
 */
pub struct Resolver {
    store: SqliteStore,
    config: ResolverConfig,
    normalizer: Normalizer,
    cas: CasExtractor,
    fuzzy: FuzzyMatcher,
    semantic: Option<Arc<SemanticIndex>>,
    vendor_cache: VendorCache,
    corpus_hash: String,
    model_hash: String,
    log_decisions: bool,
    semantic_absence_logged: AtomicBool,
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("config", &self.config)
            .field("corpus_hash", &self.corpus_hash)
            .field("model_hash", &self.model_hash)
            .field("log_decisions", &self.log_decisions)
            .finish()
    }
}

impl Resolver {
    /// Build a resolver over a validated corpus. Parent cycles and
    /// duplicate CAS numbers fail construction; orphan synonyms are
    /// reported and skipped at resolve time.
    pub fn new(store: SqliteStore, config: ResolverConfig) -> Result<Self> {
        config.validate()?;

        for issue in store.validate_corpus()? {
            match issue {
                CorpusIssue::ParentCycle { analyte_id } => {
                    return Err(Error::CorpusInconsistency(format!(
                        "analyte parent links must form a forest; cycle through {analyte_id}"
                    )));
                }
                CorpusIssue::DuplicateCas { cas_number, analyte_ids } => {
                    return Err(Error::CorpusInconsistency(format!(
                        "CAS {cas_number} is assigned to multiple analytes: {analyte_ids:?}"
                    )));
                }
                CorpusIssue::OrphanSynonym { synonym_id, analyte_id } => {
                    tracing::warn!(
                        synonym_id,
                        analyte_id,
                        "synonym references a missing analyte; it will be skipped"
                    );
                }
            }
        }

        let corpus_hash = store.corpus_hash()?;
        let vendor_cache = VendorCache::new(store.clone(), &config);
        Ok(Self {
            store,
            config,
            normalizer: Normalizer::new(),
            cas: CasExtractor::new(),
            fuzzy: FuzzyMatcher::new(),
            semantic: None,
            vendor_cache,
            corpus_hash,
            model_hash: "none".to_string(),
            log_decisions: true,
            semantic_absence_logged: AtomicBool::new(false),
        })
    }

    /// Attach a semantic index; its model hash is pinned into decisions.
    pub fn with_semantic_index(mut self, index: Arc<SemanticIndex>) -> Self {
        self.model_hash = index.model_hash().to_string();
        self.semantic = Some(index);
        self
    }

    /// Disable decision logging (benchmarks, dry runs).
    pub fn with_decision_logging(mut self, enabled: bool) -> Self {
        self.log_decisions = enabled;
        self
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn corpus_hash(&self) -> &str {
        &self.corpus_hash
    }

    pub fn vendor_cache(&self) -> &VendorCache {
        &self.vendor_cache
    }

    /// Resolve one chemical name. See the module docs for the sequence.
    pub fn resolve(
        &self,
        input_text: &str,
        confidence_threshold: f64,
        vendor: Option<&str>,
    ) -> Result<ResolutionResult> {
        let context = ResolveContext {
            vendor: vendor.map(str::to_string),
            ..ResolveContext::default()
        };
        self.resolve_on(input_text, confidence_threshold, &context, chrono::Utc::now().date_naive())
    }

    /// Resolve with full request context.
    pub fn resolve_with_context(
        &self,
        input_text: &str,
        confidence_threshold: f64,
        context: &ResolveContext,
    ) -> Result<ResolutionResult> {
        self.resolve_on(input_text, confidence_threshold, context, chrono::Utc::now().date_naive())
    }

    /**
     * Resolve as of an explicit date
     *
     * DESIGN DECISION: The clock is a parameter, not an ambient read
     * WHY: Vendor-cache decay and cooldown arithmetic must be reproducible
     * in tests and when replaying logged decisions
     *
     * REASONING CHAIN:
     * 1. Empty-after-normalization input downgrades to UNKNOWN, never raises
     * 2. A fresh vendor-cache hit short-circuits the cascade; a stale one
     *    only seeds the candidate list
     * 3. Fuzzy and semantic run only while the best candidate is still
     *    below auto-accept
     * 4. Corpus inconsistencies found mid-resolve are skipped and reported
     *    through the decision log, not surfaced as errors
     */
    pub fn resolve_on(
        &self,
        input_text: &str,
        confidence_threshold: f64,
        context: &ResolveContext,
        today: NaiveDate,
    ) -> Result<ResolutionResult> {
        let start = Instant::now();
        let vendor = context.vendor.as_deref();

        let mut signals = SignalsUsed {
            vendor: vendor.map(str::to_string),
            ..SignalsUsed::default()
        };
        let mut candidates: Vec<Match> = Vec::new();
        let mut best: Option<Match> = None;
        let mut disagreement = false;
        let mut notes: Option<String> = None;

        let normalized = self.normalizer.normalize(input_text);
        if normalized.is_empty() {
            // Input rejected: empty after normalization. Not an error.
            let result = ResolutionResult {
                input_text: input_text.to_string(),
                best_match: None,
                all_candidates: Vec::new(),
                signals_used: signals,
                disagreement_flag: false,
                confidence_band: ConfidenceBand::Unknown,
                resolution_time_ms: elapsed_ms(start),
                margin: 0.0,
            };
            self.log_decision(&result, context, Some("input empty after normalization"))?;
            return Ok(result);
        }

        // Step 0: vendor cache. Every vendor resolve is also an observation.
        let mut short_circuit = false;
        if let Some(vendor) = vendor {
            if self.config.vendor.enable_vendor_cache {
                self.vendor_cache.observe(vendor, &normalized, today)?;
                if let Some(hit) = self.vendor_cache.probe(vendor, &normalized, today)? {
                    signals.vendor_cache = true;
                    // A fresh hit short-circuits the cascade; a stale one
                    // (confidence below auto-accept) only seeds it.
                    short_circuit = hit.method == MethodTag::VendorCache;
                    tracing::debug!(
                        input = input_text,
                        analyte = hit.analyte_id.as_str(),
                        confidence = hit.confidence,
                        stale = !short_circuit,
                        "vendor cache hit"
                    );
                    candidates.push(hit.clone());
                    best = Some(hit);
                }
            }
        }

        if !short_circuit {
            // Step 1: exact (CAS extraction, then normalized synonym).
            match self.exact_match(input_text, &normalized)? {
                ExactOutcome::Hit(exact) => {
                    if exact.method == MethodTag::CasExtracted {
                        signals.cas_extracted = true;
                    } else {
                        signals.exact = true;
                    }
                    candidates.push(exact.clone());
                    best = Some(exact);
                }
                ExactOutcome::Inconsistent(reason) => {
                    tracing::warn!(input = input_text, reason = reason.as_str(), "corpus inconsistency");
                    notes = Some(reason);
                }
                ExactOutcome::Miss => {}
            }

            // Step 2: fuzzy, with vendor tiebreak.
            if below_auto_accept(&best, self.config.thresholds.auto_accept) {
                let options = FuzzyOptions {
                    threshold: confidence_threshold,
                    top_k: 5,
                    vendor: vendor.map(str::to_string),
                    vendor_boost: if vendor.is_some() {
                        self.config.vendor.vendor_boost
                    } else {
                        0.0
                    },
                };
                let fuzzy_results = self.fuzzy.match_text(input_text, &self.store, &options)?;
                if !fuzzy_results.is_empty() {
                    signals.fuzzy = true;
                    disagreement = FuzzyMatcher::internal_disagreement(&fuzzy_results);
                    if best.is_none() {
                        best = Some(fuzzy_results[0].clone());
                    }
                    candidates.extend(fuzzy_results);
                }
            }

            // Step 3: semantic.
            if below_auto_accept(&best, self.config.thresholds.auto_accept) {
                match &self.semantic {
                    Some(index) => {
                        let semantic_results =
                            index.search_matches(&normalized, 5, confidence_threshold);
                        if !semantic_results.is_empty() {
                            signals.semantic = true;
                            if best
                                .as_ref()
                                .map(|b| semantic_results[0].confidence > b.confidence)
                                .unwrap_or(true)
                            {
                                best = Some(semantic_results[0].clone());
                            }
                            candidates.extend(semantic_results);
                        }
                    }
                    None => {
                        if !self.semantic_absence_logged.swap(true, Ordering::Relaxed) {
                            tracing::warn!(
                                "semantic index unavailable; resolving without semantic signal"
                            );
                        }
                    }
                }
            }

            // Fuzzy-internal disagreement caps confidence.
            if disagreement {
                if let Some(current) = best.take() {
                    best = Some(self.cap_confidence(current, "disagreement_penalty"));
                }
            }
        }

        // Step 4: combine and dedupe, best score per analyte, top 5.
        candidates.retain(|c| c.confidence >= confidence_threshold);
        let candidates = dedupe_candidates(candidates);

        // Step 5: margin.
        let margin = compute_margin(&candidates);

        // Step 5b: cross-method conflict.
        let mut cross_method_conflict = false;
        if signals.fuzzy && signals.semantic {
            if let Some((fuzzy_best, semantic_best)) = best_per_method(&candidates) {
                if fuzzy_best.analyte_id != semantic_best.analyte_id
                    && fuzzy_best.confidence > self.config.thresholds.review
                    && semantic_best.confidence > self.config.thresholds.review
                {
                    cross_method_conflict = true;
                    disagreement = true;
                    tracing::info!(
                        input = input_text,
                        fuzzy = fuzzy_best.analyte_id.as_str(),
                        semantic = semantic_best.analyte_id.as_str(),
                        "cross-method conflict"
                    );
                    if let Some(current) = best.take() {
                        best = Some(self.cap_confidence(current, "cross_method_conflict"));
                    }
                }
            }
        }
        signals.cross_method_conflict = cross_method_conflict;

        // Step 6: two-axis gate.
        let band = match &best {
            Some(top) => decide_band(top.confidence, margin, cross_method_conflict, &self.config),
            None => {
                if candidates.is_empty() {
                    ConfidenceBand::Unknown
                } else {
                    ConfidenceBand::NovelCompound
                }
            }
        };
        if matches!(band, ConfidenceBand::Unknown | ConfidenceBand::NovelCompound) {
            best = None;
        }

        let result = ResolutionResult {
            input_text: input_text.to_string(),
            best_match: best,
            all_candidates: candidates,
            signals_used: signals,
            disagreement_flag: disagreement,
            confidence_band: band,
            resolution_time_ms: elapsed_ms(start),
            margin,
        };
        self.log_decision(&result, context, notes.as_deref())?;
        Ok(result)
    }

    /// Resolve a batch in stable order.
    pub fn resolve_batch(
        &self,
        input_texts: &[String],
        confidence_threshold: f64,
        vendor: Option<&str>,
    ) -> Result<Vec<ResolutionResult>> {
        input_texts
            .iter()
            .map(|text| self.resolve(text, confidence_threshold, vendor))
            .collect()
    }

    fn exact_match(&self, input_text: &str, normalized: &str) -> Result<ExactOutcome> {
        // CAS extraction has top priority.
        if let Some(cas_number) = self.cas.extract_cas(input_text) {
            if let Some(analyte) = self.store.analyte_by_cas(&cas_number)? {
                let m = Match::new(
                    analyte.analyte_id,
                    analyte.preferred_name,
                    1.0,
                    MethodTag::CasExtracted,
                    1.0,
                )?
                .with_meta("cas_number", json!(cas_number));
                return Ok(ExactOutcome::Hit(m));
            }
        }

        if let Some(synonym) = self.store.synonym_by_normalized(normalized)? {
            let Some(analyte) = self.store.analyte(&synonym.analyte_id)? else {
                return Ok(ExactOutcome::Inconsistent(format!(
                    "synonym {} references missing analyte {}",
                    synonym.id, synonym.analyte_id
                )));
            };
            let m = Match::new(
                analyte.analyte_id,
                analyte.preferred_name,
                1.0,
                MethodTag::Exact,
                1.0,
            )?
            .with_meta("synonym_raw", json!(synonym.raw))
            .with_meta("synonym_norm", json!(synonym.normalized))
            .with_meta("normalized_input", json!(normalized));
            return Ok(ExactOutcome::Hit(m));
        }

        Ok(ExactOutcome::Miss)
    }

    fn cap_confidence(&self, m: Match, reason: &str) -> Match {
        let cap = self.config.thresholds.disagreement_cap;
        if m.confidence <= cap {
            return m;
        }
        let original = m.confidence;
        let mut capped = m;
        capped.confidence = cap;
        capped
            .metadata
            .insert(reason.to_string(), json!(true));
        capped
            .metadata
            .insert("original_confidence".to_string(), json!(original));
        capped
    }

    fn log_decision(
        &self,
        result: &ResolutionResult,
        context: &ResolveContext,
        notes: Option<&str>,
    ) -> Result<()> {
        if !self.log_decisions {
            return Ok(());
        }
        let decision = NewDecision {
            input_text: result.input_text.clone(),
            matched_analyte_id: result.best_match.as_ref().map(|m| m.analyte_id.clone()),
            method: result
                .best_match
                .as_ref()
                .map(|m| m.method)
                .unwrap_or(MethodTag::Unknown),
            confidence_score: result.confidence(),
            top_k_candidates: result
                .all_candidates
                .iter()
                .map(|c| CandidateRecord {
                    analyte_id: c.analyte_id.clone(),
                    score: c.score,
                    method: c.method,
                })
                .collect(),
            signals_used: result.signals_used.clone(),
            margin: result.margin,
            cross_method_conflict: result.signals_used.cross_method_conflict,
            disagreement_flag: result.disagreement_flag,
            corpus_snapshot_hash: self.corpus_hash.clone(),
            model_hash: self.model_hash.clone(),
            lab_vendor: context.vendor.clone(),
            method_context: context.method.clone(),
            matrix: context.matrix.clone(),
            validation_notes: notes.map(str::to_string),
        };
        self.store.record_decision(&decision)?;
        Ok(())
    }
}

enum ExactOutcome {
    Hit(Match),
    Miss,
    Inconsistent(String),
}

fn below_auto_accept(best: &Option<Match>, auto_accept: f64) -> bool {
    best.as_ref().map(|b| b.confidence < auto_accept).unwrap_or(true)
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

/// Merge candidates: keep the highest-scoring entry per analyte, sort
/// descending by confidence, truncate to five.
pub fn dedupe_candidates(mut candidates: Vec<Match>) -> Vec<Match> {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut seen = std::collections::HashSet::new();
    candidates.retain(|c| seen.insert(c.analyte_id.clone()));
    candidates.truncate(5);
    candidates
}

/// Top-1 minus top-2 score; 1.0 with a single candidate, 0.0 with none.
pub fn compute_margin(candidates: &[Match]) -> f64 {
    match candidates {
        [] => 0.0,
        [_] => 1.0,
        [first, second, ..] => first.confidence - second.confidence,
    }
}

/**
 * The two-axis decision gate
 *
 * DESIGN DECISION: Band assignment is a pure function of (score, margin, conflict)
 * WHY: The gate is the control surface the calibrator tunes; keeping it free
 * of hidden state makes its implications property-testable
 *
 * REASONING CHAIN:
 * 1. Below ood_threshold no candidate is credible: NOVEL_COMPOUND
 * 2. Auto-accept requires score AND margin AND no cross-method conflict
 * 3. Anything at or above review lands in REVIEW for a human
 * 4. The remainder is UNKNOWN and the best match is cleared by the caller
 */
pub fn decide_band(
    score: f64,
    margin: f64,
    cross_method_conflict: bool,
    config: &ResolverConfig,
) -> ConfidenceBand {
    if score < config.decision.ood_threshold {
        ConfidenceBand::NovelCompound
    } else if score >= config.thresholds.auto_accept
        && margin >= config.decision.margin_threshold
        && !cross_method_conflict
    {
        ConfidenceBand::AutoAccept
    } else if score >= config.thresholds.review {
        ConfidenceBand::Review
    } else {
        ConfidenceBand::Unknown
    }
}

fn best_per_method(candidates: &[Match]) -> Option<(&Match, &Match)> {
    let fuzzy_best = candidates
        .iter()
        .filter(|c| c.method == MethodTag::Fuzzy)
        .max_by(|a, b| {
            a.confidence
                .partial_cmp(&b.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    let semantic_best = candidates
        .iter()
        .filter(|c| c.method == MethodTag::Semantic)
        .max_by(|a, b| {
            a.confidence
                .partial_cmp(&b.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    match (fuzzy_best, semantic_best) {
        (Some(f), Some(s)) => Some((f, s)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::NORMALIZATION_VERSION;
    use crate::store::NewSynonym;
    use crate::types::{Analyte, AnalyteKind, SynonymKind};

    fn seeded_store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .insert_analyte(
                &Analyte::new("REG153_001", "Benzene", AnalyteKind::SingleSubstance)
                    .with_cas("71-43-2"),
            )
            .unwrap();
        store
            .insert_analyte(
                &Analyte::new("REG153_002", "Toluene", AnalyteKind::SingleSubstance)
                    .with_cas("108-88-3"),
            )
            .unwrap();
        for (analyte, normalized) in [
            ("REG153_001", "benzene"),
            ("REG153_001", "benzol"),
            ("REG153_002", "toluene"),
            ("REG153_002", "methylbenzene"),
            ("REG153_002", "toluol"),
        ] {
            store
                .insert_synonym(&NewSynonym {
                    analyte_id: analyte.into(),
                    raw: normalized.into(),
                    normalized: normalized.into(),
                    kind: SynonymKind::Common,
                    harvest_source: "bootstrap".into(),
                    confidence: 1.0,
                    lab_vendor: None,
                    normalization_version: NORMALIZATION_VERSION,
                })
                .unwrap();
        }
        store
    }

    fn resolver() -> Resolver {
        Resolver::new(seeded_store(), ResolverConfig::default()).unwrap()
    }

    #[test]
    fn exact_match_auto_accepts() {
        let r = resolver();
        let result = r.resolve("Benzene", 0.75, None).unwrap();
        assert_eq!(result.confidence_band, ConfidenceBand::AutoAccept);
        let best = result.best_match.unwrap();
        assert_eq!(best.analyte_id, "REG153_001");
        assert_eq!(best.method, MethodTag::Exact);
        assert!((best.confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn cas_lookup_wins() {
        let r = resolver();
        let result = r.resolve("71-43-2", 0.75, None).unwrap();
        let best = result.best_match.unwrap();
        assert_eq!(best.method, MethodTag::CasExtracted);
        assert_eq!(best.analyte_id, "REG153_001");
    }

    #[test]
    fn unknown_input_clears_best() {
        let r = resolver();
        let result = r.resolve("completely unrelated words", 0.75, None).unwrap();
        assert!(result.best_match.is_none());
        assert!(matches!(
            result.confidence_band,
            ConfidenceBand::Unknown | ConfidenceBand::NovelCompound
        ));
        assert!(result.all_candidates.is_empty());
    }

    #[test]
    fn empty_input_is_unknown_not_error() {
        let r = resolver();
        let result = r.resolve("   ", 0.75, None).unwrap();
        assert_eq!(result.confidence_band, ConfidenceBand::Unknown);
        assert!(result.all_candidates.is_empty());
        assert!((result.margin - 0.0).abs() < 1e-9);
    }

    #[test]
    fn every_resolve_logs_a_decision() {
        let r = resolver();
        r.resolve("Benzene", 0.75, None).unwrap();
        r.resolve("garbage input", 0.75, None).unwrap();
        let decisions = r.store.decisions(&Default::default()).unwrap();
        assert_eq!(decisions.len(), 2);
        assert!(!decisions[0].corpus_snapshot_hash.is_empty());
    }

    #[test]
    fn margin_matches_top_two() {
        let a = Match::new("A", "A", 0.9, MethodTag::Fuzzy, 0.9).unwrap();
        let b = Match::new("B", "B", 0.8, MethodTag::Fuzzy, 0.8).unwrap();
        assert!((compute_margin(&[a.clone(), b]) - 0.1).abs() < 1e-9);
        assert!((compute_margin(&[a]) - 1.0).abs() < 1e-9);
        assert!((compute_margin(&[]) - 0.0).abs() < 1e-9);
    }

    #[test]
    fn dedupe_keeps_best_per_analyte() {
        let a_low = Match::new("A", "A", 0.8, MethodTag::Fuzzy, 0.8).unwrap();
        let a_high = Match::new("A", "A", 0.95, MethodTag::Semantic, 0.95).unwrap();
        let b = Match::new("B", "B", 0.85, MethodTag::Fuzzy, 0.85).unwrap();
        let deduped = dedupe_candidates(vec![a_low, b, a_high]);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].analyte_id, "A");
        assert!((deduped[0].confidence - 0.95).abs() < 1e-9);
        assert_eq!(deduped[1].analyte_id, "B");
    }

    #[test]
    fn gate_bands() {
        let cfg = ResolverConfig::default();
        assert_eq!(decide_band(0.3, 1.0, false, &cfg), ConfidenceBand::NovelCompound);
        assert_eq!(decide_band(0.95, 0.2, false, &cfg), ConfidenceBand::AutoAccept);
        // High score, narrow margin: review.
        assert_eq!(decide_band(0.95, 0.01, false, &cfg), ConfidenceBand::Review);
        // High score, wide margin, but conflicting methods: review.
        assert_eq!(decide_band(0.95, 0.2, true, &cfg), ConfidenceBand::Review);
        assert_eq!(decide_band(0.80, 0.2, false, &cfg), ConfidenceBand::Review);
        assert_eq!(decide_band(0.60, 0.2, false, &cfg), ConfidenceBand::Unknown);
    }

    #[test]
    fn batch_preserves_order() {
        let r = resolver();
        let inputs = vec!["Benzene".to_string(), "Toluene".to_string()];
        let results = r.resolve_batch(&inputs, 0.75, None).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].best_match.as_ref().unwrap().analyte_id, "REG153_001");
        assert_eq!(results[1].best_match.as_ref().unwrap().analyte_id, "REG153_002");
    }

    #[test]
    fn duplicate_cas_fails_construction() {
        let store = seeded_store();
        store
            .insert_analyte(
                &Analyte::new("REG153_900", "Shadow", AnalyteKind::SingleSubstance)
                    .with_cas("71-43-2"),
            )
            .unwrap();
        let err = Resolver::new(store, ResolverConfig::default()).unwrap_err();
        assert!(matches!(err, Error::CorpusInconsistency(_)));
    }
}
