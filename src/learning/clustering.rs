/*!
 * Unknown-Term Clustering Module
 *
 * DESIGN DECISION: Anchor-based agglomerative clustering, strictly read-only
 * WHY: Unknown inputs arrive in families (one lab's systematic variant of
 * one name); adjudicating a cluster at a time is how reviewers keep up
 *
 * REASONING CHAIN:
 * 1. Each unassigned term anchors a cluster and absorbs later terms whose
 *    similarity to the anchor clears the threshold
 * 2. Clusters are enriched with the closest analytes by preferred-name
 *    similarity to pre-fill the reviewer's shortlist
 * 3. Clustering surfaces work but never writes corpus data; validated
 *    outcomes come back through the ingestion gate
 */

use crate::error::{Error, Result};
use crate::fuzzy::similarity;
use crate::normalize::Normalizer;
use crate::store::SqliteStore;
use chrono::{DateTime, Utc};

/// A suggested canonical target for a cluster anchor.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyteSuggestion {
    pub analyte_id: String,
    pub preferred_name: String,
    pub similarity: f64,
}

/// One cluster of similar unknown terms.
#[derive(Debug, Clone, PartialEq)]
pub struct UnknownCluster {
    pub anchor: String,
    pub anchor_normalized: String,
    /// Other members with their similarity to the anchor, best first.
    pub members: Vec<(String, f64)>,
    pub size: usize,
    pub avg_similarity: f64,
    pub suggestions: Vec<AnalyteSuggestion>,
}

/// Agglomerative clusterer over unknown variants.
#[derive(Debug)]
pub struct VariantClusterer {
    threshold: f64,
    normalizer: Normalizer,
}

impl VariantClusterer {
    pub fn new(threshold: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(Error::InvalidInput(format!(
                "similarity threshold must be in [0, 1], got {threshold}"
            )));
        }
        Ok(Self {
            threshold,
            normalizer: Normalizer::new(),
        })
    }

    /// Cluster terms around anchors: each unassigned term starts a cluster
    /// and absorbs every later term whose similarity to the anchor clears
    /// the threshold. Clusters come back largest first.
    pub fn cluster(&self, terms: &[String]) -> Vec<UnknownCluster> {
        if terms.is_empty() {
            return Vec::new();
        }
        let normalized: Vec<String> = terms.iter().map(|t| self.normalizer.normalize(t)).collect();

        let n = terms.len();
        let mut assigned = vec![false; n];
        let mut clusters = Vec::new();

        for anchor_idx in 0..n {
            if assigned[anchor_idx] {
                continue;
            }
            assigned[anchor_idx] = true;

            let mut members = Vec::new();
            for candidate_idx in (anchor_idx + 1)..n {
                if assigned[candidate_idx] {
                    continue;
                }
                let score = similarity(&normalized[anchor_idx], &normalized[candidate_idx]);
                if score >= self.threshold {
                    assigned[candidate_idx] = true;
                    members.push((terms[candidate_idx].clone(), score));
                }
            }
            members.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

            let avg_similarity = if members.is_empty() {
                1.0
            } else {
                members.iter().map(|(_, s)| s).sum::<f64>() / members.len() as f64
            };
            clusters.push(UnknownCluster {
                anchor: terms[anchor_idx].clone(),
                anchor_normalized: normalized[anchor_idx].clone(),
                size: members.len() + 1,
                members,
                avg_similarity,
                suggestions: Vec::new(),
            });
        }

        clusters.sort_by(|a, b| b.size.cmp(&a.size));
        clusters
    }

    /// Closest analytes to a term by preferred-name similarity.
    pub fn closest_analytes(
        &self,
        term: &str,
        store: &SqliteStore,
        top_k: usize,
    ) -> Result<Vec<AnalyteSuggestion>> {
        let normalized = self.normalizer.normalize(term);
        let mut suggestions: Vec<AnalyteSuggestion> = store
            .all_analytes()?
            .into_iter()
            .map(|analyte| {
                let name_norm = self.normalizer.normalize(&analyte.preferred_name);
                AnalyteSuggestion {
                    similarity: similarity(&normalized, &name_norm),
                    analyte_id: analyte.analyte_id,
                    preferred_name: analyte.preferred_name,
                }
            })
            .collect();
        suggestions.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        suggestions.truncate(top_k);
        Ok(suggestions)
    }

    /// Fill each cluster's suggestions from the corpus.
    pub fn enrich(
        &self,
        clusters: &mut [UnknownCluster],
        store: &SqliteStore,
        top_k: usize,
    ) -> Result<()> {
        for cluster in clusters.iter_mut() {
            cluster.suggestions = self.closest_analytes(&cluster.anchor, store, top_k)?;
        }
        Ok(())
    }

    /// End-to-end periodic job: pull unknown inputs from the decision log,
    /// cluster them, and enrich with suggestions.
    pub fn cluster_unknowns_from_log(
        &self,
        store: &SqliteStore,
        since: DateTime<Utc>,
        limit: usize,
        top_k: usize,
    ) -> Result<Vec<UnknownCluster>> {
        let unknowns = store.unknown_inputs(since, limit)?;
        let mut clusters = self.cluster(&unknowns);
        self.enrich(&mut clusters, store, top_k)?;
        Ok(clusters)
    }
}
