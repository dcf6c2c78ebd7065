/*!
 * Validation Ingestion Module
 *
 * DESIGN DECISION: Dual-gated promotion; cache writes unconditional
 * WHY: A lab asserting a mapping often enough must not be able to write
 * global truth on repetition alone
 *
 * REASONING CHAIN:
 * 1. Every event updates the vendor cache, gate outcome notwithstanding
 * 2. A global synonym is created only when the cascade independently
 *    confirmed the same mapping AND the cascade margin clears
 *    dual_gate_margin
 * 3. The per-day promotion cap across validated_runtime* sources bounds
 *    structural-memory velocity
 * 4. Gate failures and duplicates return false, never raise; only storage
 *    failures are errors
 * 5. Promotions feed the semantic index incrementally with a mirrored
 *    metadata row
 */

use crate::config::ResolverConfig;
use crate::error::{Error, Result};
use crate::normalize::{Normalizer, NORMALIZATION_VERSION};
use crate::semantic::SemanticIndex;
use crate::store::{EmbeddingMetaRow, NewSynonym, PromotionOutcome, SqliteStore};
use crate::types::SynonymKind;
use crate::vendor_cache::VendorCache;
use chrono::NaiveDate;
use std::sync::Arc;

/// One human-validated mapping of a raw lab token to an analyte.
#[derive(Debug, Clone)]
pub struct ValidatedObservation {
    pub raw_text: String,
    pub analyte_id: String,
    pub vendor: Option<String>,
    /// Distinct submission that produced this validation. Consensus counts
    /// distinct submissions; without one the vendor cache only records an
    /// observation, not a confirmation.
    pub submission_id: Option<i64>,
    /// True when the cascade (not just the vendor cache) matched the same
    /// analyte on this event.
    pub cascade_confirmed: bool,
    /// Top-1 minus top-2 margin from the cascade resolution.
    pub cascade_margin: f64,
    pub confidence: f64,
    pub kind: SynonymKind,
}

impl ValidatedObservation {
    pub fn new(raw_text: impl Into<String>, analyte_id: impl Into<String>) -> Self {
        Self {
            raw_text: raw_text.into(),
            analyte_id: analyte_id.into(),
            vendor: None,
            submission_id: None,
            cascade_confirmed: false,
            cascade_margin: 0.0,
            confidence: 1.0,
            kind: SynonymKind::LabVariant,
        }
    }

    pub fn from_vendor(mut self, vendor: impl Into<String>, submission_id: i64) -> Self {
        self.vendor = Some(vendor.into());
        self.submission_id = Some(submission_id);
        self
    }

    pub fn cascade(mut self, confirmed: bool, margin: f64) -> Self {
        self.cascade_confirmed = confirmed;
        self.cascade_margin = margin;
        self
    }
}

/// Batch ingestion statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub processed: usize,
    pub promoted: usize,
    pub skipped: usize,
    pub errors: usize,
}

/// Learning-loop entry point.
pub struct LearningLoop {
    store: SqliteStore,
    config: ResolverConfig,
    normalizer: Normalizer,
    vendor_cache: VendorCache,
    semantic: Option<Arc<SemanticIndex>>,
}

impl LearningLoop {
    pub fn new(store: SqliteStore, config: ResolverConfig) -> Result<Self> {
        config.validate()?;
        let vendor_cache = VendorCache::new(store.clone(), &config);
        Ok(Self {
            store,
            config,
            normalizer: Normalizer::new(),
            vendor_cache,
            semantic: None,
        })
    }

    pub fn with_semantic_index(mut self, index: Arc<SemanticIndex>) -> Self {
        self.semantic = Some(index);
        self
    }

    pub fn vendor_cache(&self) -> &VendorCache {
        &self.vendor_cache
    }

    /**
     * Apply one validation event
     *
     * DESIGN DECISION: Returns whether a new global synonym was created;
     * vendor cache and confirmation writes happen regardless
     * WHY: Callers batching validations need the promotion outcome, and the
     * vendor cache must learn even from events the dual gate rejects
     *
     * REASONING CHAIN:
     * 1. Vendor present with a submission id: record a confirmation and
     *    drive the state machine; without one, record the observation only
     * 2. Dual gate leg one: the cascade must have confirmed independently
     * 3. Dual gate leg two: cascade margin at or above dual_gate_margin
     * 4. Promotion runs as a transactional count-and-insert under the cap
     * 5. On promotion, the synonym is encoded into the semantic index
     */
    pub fn ingest_validated(&self, event: &ValidatedObservation, today: NaiveDate) -> Result<bool> {
        if !(0.0..=1.0).contains(&event.confidence) {
            return Err(Error::InvalidConfidence(event.confidence));
        }
        let normalized = self.normalizer.normalize(&event.raw_text);
        if normalized.is_empty() {
            tracing::warn!(raw = event.raw_text.as_str(), "validation with empty normalized text");
            return Ok(false);
        }

        // Vendor cache update: always, independent of the dual gate.
        if let Some(vendor) = event.vendor.as_deref() {
            match event.submission_id {
                Some(submission_id) => {
                    self.vendor_cache.record_validation(
                        vendor,
                        &normalized,
                        &event.analyte_id,
                        submission_id,
                        today,
                    )?;
                }
                None => self.vendor_cache.observe(vendor, &normalized, today)?,
            }
        }

        // Dual gate, leg one: cascade must have confirmed independently.
        if !event.cascade_confirmed {
            tracing::info!(
                text = normalized.as_str(),
                analyte = event.analyte_id.as_str(),
                "dual gate blocked promotion: vendor-only confirmation"
            );
            return Ok(false);
        }
        // Dual gate, leg two: cascade margin.
        if event.cascade_margin < self.config.vendor.dual_gate_margin {
            tracing::info!(
                text = normalized.as_str(),
                margin = event.cascade_margin,
                required = self.config.vendor.dual_gate_margin,
                "dual gate blocked promotion: insufficient cascade margin"
            );
            return Ok(false);
        }

        let harvest_source = match event.vendor.as_deref() {
            Some(vendor) => format!("validated_runtime:{vendor}"),
            None => "validated_runtime".to_string(),
        };
        let synonym = NewSynonym {
            analyte_id: event.analyte_id.clone(),
            raw: event.raw_text.clone(),
            normalized: normalized.clone(),
            kind: event.kind,
            harvest_source,
            confidence: event.confidence,
            lab_vendor: event.vendor.clone(),
            normalization_version: NORMALIZATION_VERSION,
        };

        let outcome = self.store.try_promote_synonym(
            &synonym,
            today,
            self.config.vendor.max_global_synonyms_per_day,
        )?;
        let synonym_id = match outcome {
            PromotionOutcome::Promoted(id) => id,
            PromotionOutcome::Duplicate => {
                tracing::debug!(text = normalized.as_str(), "synonym already known");
                return Ok(false);
            }
            PromotionOutcome::Capped => {
                tracing::warn!(
                    cap = self.config.vendor.max_global_synonyms_per_day,
                    text = normalized.as_str(),
                    "daily global synonym cap reached; promotion rejected"
                );
                return Ok(false);
            }
        };
        tracing::info!(
            text = normalized.as_str(),
            analyte = event.analyte_id.as_str(),
            "promoted global synonym"
        );

        // Incremental semantic add for the new synonym.
        if let Some(index) = &self.semantic {
            if let Some(analyte) = self.store.analyte(&event.analyte_id)? {
                let position = index.add(
                    &normalized,
                    &analyte.analyte_id,
                    &analyte.preferred_name,
                    analyte.cas_number.as_deref(),
                    Some(synonym_id),
                )?;
                self.store.insert_embedding_metadata(&EmbeddingMetaRow {
                    analyte_id: None,
                    synonym_id: Some(synonym_id),
                    text_content: normalized,
                    position: position as i64,
                    model_name: index.model_name().to_string(),
                    model_hash: index.model_hash().to_string(),
                })?;
            }
        }

        Ok(true)
    }

    /// Ingest a batch, one transaction per event. Event-level gate failures
    /// count as skipped; only storage failures count as errors, and they do
    /// not abort the rest of the batch.
    pub fn ingest_batch(&self, events: &[ValidatedObservation], today: NaiveDate) -> IngestStats {
        let mut stats = IngestStats::default();
        for event in events {
            stats.processed += 1;
            match self.ingest_validated(event, today) {
                Ok(true) => stats.promoted += 1,
                Ok(false) => stats.skipped += 1,
                Err(e) => {
                    tracing::error!(raw = event.raw_text.as_str(), error = %e, "ingestion failed");
                    stats.errors += 1;
                }
            }
        }
        tracing::info!(
            processed = stats.processed,
            promoted = stats.promoted,
            skipped = stats.skipped,
            errors = stats.errors,
            "batch ingestion complete"
        );
        stats
    }

    /// Validate a logged decision and ingest it. The cascade is considered
    /// to have confirmed the mapping when the logged method was a cascade
    /// signal (not a vendor-cache short-circuit) and the logged top-1 is
    /// the validated analyte.
    pub fn ingest_decision(&self, decision_id: i64, analyte_id: &str, today: NaiveDate) -> Result<bool> {
        let Some(decision) = self.store.decision(decision_id)? else {
            return Err(Error::InvalidInput(format!("decision {decision_id} does not exist")));
        };
        let cascade_confirmed = decision.matched_analyte_id.as_deref() == Some(analyte_id)
            && !matches!(
                decision.method,
                crate::types::MethodTag::VendorCache | crate::types::MethodTag::VendorCacheStale
            );
        let event = ValidatedObservation {
            raw_text: decision.input_text.clone(),
            analyte_id: analyte_id.to_string(),
            vendor: decision.lab_vendor.clone(),
            submission_id: None,
            cascade_confirmed,
            cascade_margin: decision.margin,
            confidence: 1.0,
            kind: SynonymKind::LabVariant,
        };
        self.store.mark_validated(decision_id, None)?;
        let promoted = self.ingest_validated(&event, today)?;
        self.store.mark_ingested(decision_id)?;
        Ok(promoted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::NgramHashEncoder;
    use crate::types::{Analyte, AnalyteKind};

    fn setup() -> (SqliteStore, LearningLoop, NaiveDate) {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .insert_analyte(
                &Analyte::new("REG153_001", "Benzene", AnalyteKind::SingleSubstance)
                    .with_cas("71-43-2"),
            )
            .unwrap();
        let learning = LearningLoop::new(store.clone(), ResolverConfig::default()).unwrap();
        (store, learning, NaiveDate::from_ymd_opt(2026, 8, 1).unwrap())
    }

    #[test]
    fn confirmed_event_with_margin_promotes() {
        let (store, learning, today) = setup();
        let event = ValidatedObservation::new("Benzol", "REG153_001").cascade(true, 0.5);
        assert!(learning.ingest_validated(&event, today).unwrap());
        assert!(store.has_synonym("REG153_001", "benzol").unwrap());

        // Repeat is a duplicate no-op.
        assert!(!learning.ingest_validated(&event, today).unwrap());
    }

    #[test]
    fn vendor_only_confirmation_never_promotes() {
        let (store, learning, today) = setup();
        let event = ValidatedObservation::new("Benzol", "REG153_001")
            .from_vendor("LabA", 1)
            .cascade(false, 0.5);
        for submission in 1..=5 {
            let mut e = event.clone();
            e.submission_id = Some(submission);
            assert!(!learning.ingest_validated(&e, today).unwrap());
        }
        assert!(!store.has_synonym("REG153_001", "benzol").unwrap());
        // Vendor cache writes proceeded regardless.
        let variant = learning.vendor_cache().variant("LabA", "benzol").unwrap().unwrap();
        assert_eq!(variant.frequency_count, 5);
        assert_eq!(learning.vendor_cache().confirmations(variant.id).unwrap().len(), 5);
    }

    #[test]
    fn thin_margin_is_blocked() {
        let (store, learning, today) = setup();
        let event = ValidatedObservation::new("Benzol", "REG153_001").cascade(true, 0.05);
        assert!(!learning.ingest_validated(&event, today).unwrap());
        assert!(!store.has_synonym("REG153_001", "benzol").unwrap());
    }

    #[test]
    fn daily_cap_blocks_promotion_but_not_cache_writes() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .insert_analyte(&Analyte::new("REG153_001", "Benzene", AnalyteKind::SingleSubstance))
            .unwrap();
        let mut config = ResolverConfig::default();
        config.vendor.max_global_synonyms_per_day = 2;
        let learning = LearningLoop::new(store.clone(), config).unwrap();
        let today = NaiveDate::from_ymd_opt(2026, 8, 1).unwrap();

        for (i, text) in ["Benzol", "Benzole"].iter().enumerate() {
            let event = ValidatedObservation::new(*text, "REG153_001")
                .from_vendor("LabA", i as i64 + 1)
                .cascade(true, 0.5);
            assert!(learning.ingest_validated(&event, today).unwrap());
        }

        let capped = ValidatedObservation::new("Phenyl hydride", "REG153_001")
            .from_vendor("LabA", 3)
            .cascade(true, 0.5);
        assert!(!learning.ingest_validated(&capped, today).unwrap());
        assert!(!store.has_synonym("REG153_001", "phenyl hydride").unwrap());
        // The vendor observation still landed.
        assert!(learning
            .vendor_cache()
            .variant("LabA", "phenyl hydride")
            .unwrap()
            .is_some());
    }

    #[test]
    fn promotion_feeds_semantic_index_and_metadata() {
        let (store, learning, today) = setup();
        let index = Arc::new(SemanticIndex::new(Arc::new(NgramHashEncoder::new())));
        let learning = learning.with_semantic_index(index.clone());

        let event = ValidatedObservation::new("Benzol", "REG153_001").cascade(true, 0.5);
        assert!(learning.ingest_validated(&event, today).unwrap());

        assert_eq!(index.len(), 1);
        assert_eq!(store.embedding_count().unwrap(), 1);
        assert_eq!(store.embedding_positions().unwrap(), vec![0]);
    }

    #[test]
    fn batch_counts_outcomes() {
        let (_store, learning, today) = setup();
        let events = vec![
            ValidatedObservation::new("Benzol", "REG153_001").cascade(true, 0.5),
            ValidatedObservation::new("Benzol", "REG153_001").cascade(true, 0.5),
            ValidatedObservation::new("Benzine", "REG153_999").cascade(true, 0.5),
        ];
        let stats = learning.ingest_batch(&events, today);
        assert_eq!(stats.processed, 3);
        assert_eq!(stats.promoted, 1);
        assert_eq!(stats.skipped, 1);
        // Unknown analyte violates the synonym FK: a storage error, counted
        // without aborting the batch.
        assert_eq!(stats.errors, 1);
    }

    #[test]
    fn out_of_range_confidence_is_an_error() {
        let (_store, learning, today) = setup();
        let mut event = ValidatedObservation::new("Benzol", "REG153_001").cascade(true, 0.5);
        event.confidence = 1.5;
        assert!(matches!(
            learning.ingest_validated(&event, today),
            Err(Error::InvalidConfidence(_))
        ));
    }
}
