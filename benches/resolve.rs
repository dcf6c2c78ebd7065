//! Resolve hot-path benchmark over a synthetic corpus.

use analyte_resolve::{
    Analyte, AnalyteKind, NewSynonym, Normalizer, Resolver, ResolverConfig, SqliteStore,
    SynonymKind, NORMALIZATION_VERSION,
};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

const STEMS: [&str; 10] = [
    "chloro", "bromo", "fluoro", "methyl", "ethyl", "nitro", "amino", "hydroxy", "phenyl", "vinyl",
];
const BASES: [&str; 8] = [
    "benzene", "toluene", "phenol", "ethane", "propane", "butane", "hexane", "naphthalene",
];

fn synthetic_store(analytes: usize) -> SqliteStore {
    let store = SqliteStore::open_in_memory().unwrap();
    let normalizer = Normalizer::new();
    for i in 0..analytes {
        let name = format!(
            "{}-{}{}",
            (i % 3) + 1,
            STEMS[i % STEMS.len()],
            BASES[i % BASES.len()]
        );
        let id = format!("REG153_{i:03}");
        store
            .insert_analyte(&Analyte::new(&id, &name, AnalyteKind::SingleSubstance))
            .unwrap();
        for suffix in ["", " total", " dissolved"] {
            let raw = format!("{name}{suffix}");
            store
                .insert_synonym(&NewSynonym {
                    analyte_id: id.clone(),
                    raw: raw.clone(),
                    normalized: normalizer.normalize(&raw),
                    kind: SynonymKind::LabVariant,
                    harvest_source: "bootstrap".into(),
                    confidence: 1.0,
                    lab_vendor: None,
                    normalization_version: NORMALIZATION_VERSION,
                })
                .unwrap();
        }
    }
    store
}

fn bench_resolve(c: &mut Criterion) {
    let store = synthetic_store(150);
    let resolver = Resolver::new(store, ResolverConfig::default())
        .unwrap()
        .with_decision_logging(false);

    c.bench_function("resolve_exact", |b| {
        b.iter(|| {
            resolver
                .resolve(black_box("1-chlorobenzene"), 0.75, None)
                .unwrap()
        })
    });

    c.bench_function("resolve_fuzzy_typo", |b| {
        b.iter(|| {
            resolver
                .resolve(black_box("1-chlorobenzen"), 0.75, None)
                .unwrap()
        })
    });

    c.bench_function("resolve_unknown", |b| {
        b.iter(|| {
            resolver
                .resolve(black_box("entirely novel compound"), 0.75, None)
                .unwrap()
        })
    });
}

criterion_group!(benches, bench_resolve);
criterion_main!(benches);
