//! End-to-end resolution scenarios over a small seeded corpus.
//!
//! Corpus: Benzene (REG153_001, CAS 71-43-2, synonyms "benzene"/"benzol")
//! and Toluene (REG153_002, CAS 108-88-3, synonyms "toluene"/
//! "methylbenzene"/"toluol"), thresholds at defaults.

use analyte_resolve::{
    Analyte, AnalyteKind, ConfidenceBand, LearningLoop, MethodTag, NewSynonym, NgramHashEncoder,
    Normalizer, Resolver, ResolverConfig, SemanticIndex, SqliteStore, SynonymKind,
    ValidatedObservation, VariantState, NORMALIZATION_VERSION,
};
use chrono::Utc;
use std::sync::Arc;

fn seeded_store() -> SqliteStore {
    let store = SqliteStore::open_in_memory().unwrap();
    store
        .insert_analyte(
            &Analyte::new("REG153_001", "Benzene", AnalyteKind::SingleSubstance).with_cas("71-43-2"),
        )
        .unwrap();
    store
        .insert_analyte(
            &Analyte::new("REG153_002", "Toluene", AnalyteKind::SingleSubstance).with_cas("108-88-3"),
        )
        .unwrap();

    let normalizer = Normalizer::new();
    for (analyte_id, raw) in [
        ("REG153_001", "benzene"),
        ("REG153_001", "benzol"),
        ("REG153_002", "toluene"),
        ("REG153_002", "methylbenzene"),
        ("REG153_002", "toluol"),
    ] {
        store
            .insert_synonym(&NewSynonym {
                analyte_id: analyte_id.into(),
                raw: raw.into(),
                normalized: normalizer.normalize(raw),
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

fn resolver(store: &SqliteStore) -> Resolver {
    Resolver::new(store.clone(), ResolverConfig::default()).unwrap()
}

// Exact synonym match.
#[test]
fn exact_synonym_auto_accepts() {
    let store = seeded_store();
    let result = resolver(&store).resolve("Benzene", 0.75, None).unwrap();

    assert_eq!(result.confidence_band, ConfidenceBand::AutoAccept);
    let best = result.best_match.unwrap();
    assert_eq!(best.analyte_id, "REG153_001");
    assert_eq!(best.method, MethodTag::Exact);
    assert!((best.confidence - 1.0).abs() < 1e-9);
    assert!(result.margin >= 0.05);
}

// CAS number lookup.
#[test]
fn cas_number_auto_accepts() {
    let store = seeded_store();
    let result = resolver(&store).resolve("71-43-2", 0.75, None).unwrap();

    assert_eq!(result.confidence_band, ConfidenceBand::AutoAccept);
    let best = result.best_match.unwrap();
    assert_eq!(best.analyte_id, "REG153_001");
    assert_eq!(best.method, MethodTag::CasExtracted);
    assert!((best.confidence - 1.0).abs() < 1e-9);
}

// A typo falls through to fuzzy matching.
#[test]
fn typo_resolves_via_fuzzy() {
    let store = seeded_store();
    let result = resolver(&store).resolve("Benzen", 0.75, None).unwrap();

    assert!(matches!(
        result.confidence_band,
        ConfidenceBand::AutoAccept | ConfidenceBand::Review
    ));
    let best = result.best_match.unwrap();
    assert_eq!(best.analyte_id, "REG153_001");
    assert_eq!(best.method, MethodTag::Fuzzy);
    assert!(result.margin > 0.0);
}

// Out-of-corpus input.
#[test]
fn unknown_chemical_clears_best_match() {
    let store = seeded_store();
    let result = resolver(&store)
        .resolve("unknown chemical xyz", 0.75, None)
        .unwrap();

    assert!(matches!(
        result.confidence_band,
        ConfidenceBand::Unknown | ConfidenceBand::NovelCompound
    ));
    assert!(result.best_match.is_none());
    let cfg = ResolverConfig::default();
    assert!(result
        .all_candidates
        .iter()
        .all(|c| c.score < cfg.decision.ood_threshold));
}

// Vendor cold path behaves like the no-vendor path and records the
// observation.
#[test]
fn vendor_cold_path() {
    let store = seeded_store();
    let r = resolver(&store);

    let without_vendor = r.resolve("Benzene", 0.75, None).unwrap();
    let with_vendor = r.resolve("Benzene", 0.75, Some("LabA")).unwrap();

    assert_eq!(with_vendor.confidence_band, without_vendor.confidence_band);
    assert_eq!(
        with_vendor.best_match.as_ref().map(|m| m.analyte_id.as_str()),
        without_vendor.best_match.as_ref().map(|m| m.analyte_id.as_str())
    );
    assert!(!with_vendor.signals_used.vendor_cache);

    let variant = r.vendor_cache().variant("LabA", "benzene").unwrap().unwrap();
    assert_eq!(variant.frequency_count, 1);
    assert_eq!(variant.collision_count, 0);
    assert!(r.vendor_cache().confirmations(variant.id).unwrap().is_empty());
}

// Three distinct confirmed submissions make the cache hit.
#[test]
fn vendor_consensus_enables_cache_hit() {
    let store = seeded_store();
    let learning = LearningLoop::new(store.clone(), ResolverConfig::default()).unwrap();
    let today = Utc::now().date_naive();

    for submission in 1..=3 {
        learning
            .ingest_validated(
                &ValidatedObservation::new("Benzene (X method)", "REG153_001")
                    .from_vendor("LabA", submission)
                    .cascade(true, 0.5),
                today,
            )
            .unwrap();
    }

    let result = resolver(&store)
        .resolve("Benzene (X method)", 0.75, Some("LabA"))
        .unwrap();
    let best = result.best_match.unwrap();
    assert_eq!(best.method, MethodTag::VendorCache);
    assert_eq!(best.analyte_id, "REG153_001");
    assert!(best.confidence >= ResolverConfig::default().vendor.decay_floor);
    assert!(result.signals_used.vendor_cache);
}

// Collisions invalidate consensus and eventually arm the cooldown.
#[test]
fn collisions_push_variant_unstable() {
    let store = seeded_store();
    let learning = LearningLoop::new(store.clone(), ResolverConfig::default()).unwrap();
    let cache = learning.vendor_cache();
    let today = Utc::now().date_naive();
    let token = "Benzene (X method)";
    let normalized = Normalizer::new().normalize(token);

    for submission in 1..=3 {
        learning
            .ingest_validated(
                &ValidatedObservation::new(token, "REG153_001")
                    .from_vendor("LabA", submission)
                    .cascade(true, 0.5),
                today,
            )
            .unwrap();
    }
    assert!(cache.probe("LabA", &normalized, today).unwrap().is_some());

    // First collision: REG153_002 asserted for the same token.
    learning
        .ingest_validated(
            &ValidatedObservation::new(token, "REG153_002")
                .from_vendor("LabA", 4)
                .cascade(true, 0.5),
            today,
        )
        .unwrap();
    let variant = cache.variant("LabA", &normalized).unwrap().unwrap();
    assert_eq!(variant.collision_count, 1);
    let invalidated = cache
        .confirmations(variant.id)
        .unwrap()
        .iter()
        .filter(|c| !c.valid_for_consensus)
        .count();
    assert_eq!(invalidated, 3);
    assert!(cache.probe("LabA", &normalized, today).unwrap().is_none());

    // Two more alternating collisions exceed max_collision_count = 2.
    for (submission, analyte) in [(5, "REG153_001"), (6, "REG153_002")] {
        learning
            .ingest_validated(
                &ValidatedObservation::new(token, analyte)
                    .from_vendor("LabA", submission)
                    .cascade(true, 0.5),
                today,
            )
            .unwrap();
    }
    assert_eq!(cache.state("LabA", &normalized, today).unwrap(), VariantState::Unstable);

    // Probes miss throughout the cooldown window.
    for offset in 0..7 {
        let day = today + chrono::Duration::days(offset);
        assert!(cache.probe("LabA", &normalized, day).unwrap().is_none());
    }
}

// A vendor-only-confirmed mapping never creates a global synonym.
#[test]
fn dual_gate_blocks_vendor_only_truth() {
    let store = seeded_store();
    let learning = LearningLoop::new(store.clone(), ResolverConfig::default()).unwrap();
    let today = Utc::now().date_naive();

    for submission in 1..=10 {
        let promoted = learning
            .ingest_validated(
                &ValidatedObservation::new("Benzene LabA style", "REG153_001")
                    .from_vendor("LabA", submission)
                    .cascade(false, 0.9),
                today,
            )
            .unwrap();
        assert!(!promoted);
    }
    assert!(!store.has_synonym("REG153_001", "benzene laba style").unwrap());
    // The vendor cache learned it regardless.
    let variant = learning
        .vendor_cache()
        .variant("LabA", "benzene laba style")
        .unwrap()
        .unwrap();
    assert_eq!(variant.frequency_count, 10);
}

// The daily cap blocks further promotions but not cache writes.
#[test]
fn daily_cap_blocks_promotion() {
    let store = seeded_store();
    let mut config = ResolverConfig::default();
    config.vendor.max_global_synonyms_per_day = 3;
    let learning = LearningLoop::new(store.clone(), config).unwrap();
    let today = Utc::now().date_naive();

    for (i, token) in ["Variant one", "Variant two", "Variant three"].iter().enumerate() {
        let promoted = learning
            .ingest_validated(
                &ValidatedObservation::new(*token, "REG153_001")
                    .from_vendor("LabA", i as i64 + 1)
                    .cascade(true, 0.5),
                today,
            )
            .unwrap();
        assert!(promoted);
    }

    let over_cap = learning
        .ingest_validated(
            &ValidatedObservation::new("Variant four", "REG153_001")
                .from_vendor("LabA", 4)
                .cascade(true, 0.5),
            today,
        )
        .unwrap();
    assert!(!over_cap);
    assert!(!store.has_synonym("REG153_001", "variant four").unwrap());
    assert!(learning
        .vendor_cache()
        .variant("LabA", "variant four")
        .unwrap()
        .is_some());
}

// The semantic signal participates in the cascade when an index is attached.
#[test]
fn semantic_signal_feeds_cascade() {
    let store = seeded_store();
    let index = Arc::new(SemanticIndex::new(Arc::new(NgramHashEncoder::new())));
    index.build_from_corpus(&store).unwrap();

    let r = Resolver::new(store.clone(), ResolverConfig::default())
        .unwrap()
        .with_semantic_index(index);

    // A heavier typo than fuzzy alone likes at 0.75 still reaches the
    // candidates through one of the two approximate signals.
    let result = r.resolve("benzeene", 0.60, None).unwrap();
    assert!(result
        .all_candidates
        .iter()
        .any(|c| c.analyte_id == "REG153_001"));
}

// Degraded mode: no semantic index, resolution still works.
#[test]
fn missing_semantic_index_degrades_gracefully() {
    let store = seeded_store();
    let r = resolver(&store);
    let result = r.resolve("Toluene", 0.75, None).unwrap();
    assert_eq!(result.confidence_band, ConfidenceBand::AutoAccept);
    assert!(!result.signals_used.semantic);
}
