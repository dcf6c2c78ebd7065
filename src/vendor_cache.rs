/*!
 * Vendor-Conditioned Adaptive Memory Module
 *
 * DESIGN DECISION: Bounded per-vendor behavioral cache gated by five invariants
 * WHY: Fast-path tokens a lab uses consistently without letting one noisy
 * lab corrupt the global synonym graph
 *
 * REASONING CHAIN:
 * 1. Uniqueness: (vendor, normalized_text) maps to at most one live row
 * 2. Consensus: distinct valid confirmations minus collisions must reach
 *    min_confirmations before the cache may short-circuit the cascade
 * 3. Collision bound: collision_count above max_collision_count marks the
 *    row UNSTABLE
 * 4. Cooldown: an UNSTABLE row stays ineligible for unstable_cooldown_days
 *    from its last collision; probes miss and the cascade re-evaluates
 * 5. Temporal decay: hit confidence is
 *    max(decay_floor, 1 - lambda * min(1, age_days / window)), and the
 *    floor sits strictly below auto-accept
 *
 * State machine: NEW -> PROVISIONAL -> STABLE <-> UNSTABLE, driven only by
 * observation/validation events plus the passage of time; no transition can
 * be shortcut from outside this component.
 *
 * RELATED: resolver.rs (probe is cascade step 0), learning/ingest.rs
 */

use crate::config::{ResolverConfig, VendorConfig};
use crate::error::{Error, Result};
use crate::store::SqliteStore;
use crate::types::{Match, MethodTag, ValidationGrade};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::json;

/// Lifecycle state of a lab variant, derived from its row and the clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantState {
    New,
    Provisional,
    Stable,
    Unstable,
}

/// One `(vendor, observed_text)` row.
#[derive(Debug, Clone, PartialEq)]
pub struct LabVariantRow {
    pub id: i64,
    pub vendor: String,
    pub observed_text: String,
    pub frequency_count: i64,
    pub first_seen_date: Option<NaiveDate>,
    pub last_seen_date: Option<NaiveDate>,
    pub collision_count: i64,
    pub last_collision_date: Option<NaiveDate>,
    pub normalization_version: i64,
    pub validated_match_id: Option<String>,
    pub grade: Option<ValidationGrade>,
    pub quarantined: bool,
}

/// One distinct-submission confirmation of a variant mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct Confirmation {
    pub id: i64,
    pub variant_id: i64,
    pub submission_id: i64,
    pub confirmed_analyte_id: Option<String>,
    pub valid_for_consensus: bool,
}

/**
 * The vendor cache component
 *
 * DESIGN DECISION: A thin component over the shared store, not its own table owner
 * WHY: Collision updates must invalidate confirmation children atomically;
 * sharing the store's connection keeps those writes in one transaction
 *
 * REASONING CHAIN:
 * 1. Probe/observe/record_validation are the only entry points; the state
 *    machine cannot be driven from outside them
 * 2. Vendor constants are copied from config at construction so the cache
 *    and the gate always agree on auto_accept and the decay floor
 * 3. Internal helpers take &Connection: one lock per public call, no
 *    re-entrant locking
 */
#[derive(Clone)]
pub struct VendorCache {
    store: SqliteStore,
    cfg: VendorConfig,
    auto_accept: f64,
    normalization_version: i64,
}

impl VendorCache {
    pub fn new(store: SqliteStore, config: &ResolverConfig) -> Self {
        Self {
            store,
            cfg: config.vendor.clone(),
            auto_accept: config.thresholds.auto_accept,
            normalization_version: crate::normalize::NORMALIZATION_VERSION,
        }
    }

    /**
     * Cache probe
     *
     * DESIGN DECISION: A miss is silent; only a fully-gated hit is emitted
     * WHY: Every invariant failure must fall through to the cascade, never
     * degrade into a low-confidence guess
     *
     * REASONING CHAIN:
     * 1. No live row, or no validated target: miss
     * 2. Collision bound exceeded and cooldown still running: miss
     * 3. Cooldown elapsed: eligibility returns only through consensus below
     * 4. Effective consensus (valid distinct confirmations minus collisions)
     *    under min_confirmations: miss
     * 5. Hit confidence is the decayed value; below auto-accept the method
     *    tag becomes vendor_cache_stale and the cascade still runs
     */
    pub fn probe(&self, vendor: &str, normalized_text: &str, today: NaiveDate) -> Result<Option<Match>> {
        if !self.cfg.enable_vendor_cache {
            return Ok(None);
        }
        let conn = self.store.conn();
        let Some(variant) = resolve_variant(&conn, vendor, normalized_text)? else {
            return Ok(None);
        };
        let Some(ref match_id) = variant.validated_match_id else {
            return Ok(None);
        };

        // Collision bound and cooldown.
        if variant.collision_count > self.cfg.max_collision_count {
            match variant.last_collision_date {
                Some(last_collision) => {
                    let days_since = (today - last_collision).num_days();
                    if days_since < self.cfg.unstable_cooldown_days {
                        tracing::debug!(
                            vendor,
                            text = normalized_text,
                            days_since,
                            cooldown = self.cfg.unstable_cooldown_days,
                            "vendor cache UNSTABLE, in cooldown"
                        );
                        return Ok(None);
                    }
                    // Cooldown elapsed: eligibility returns only through the
                    // consensus gate below, on fresh confirmations.
                }
                None => return Ok(None),
            }
        }

        // Consensus: distinct valid confirmations minus collisions.
        let confirmations = valid_confirmation_count(&conn, variant.id)?;
        let effective = confirmations - variant.collision_count;
        if effective < self.cfg.min_confirmations {
            tracing::debug!(
                vendor,
                text = normalized_text,
                effective,
                required = self.cfg.min_confirmations,
                "vendor cache consensus not reached"
            );
            return Ok(None);
        }

        // Temporal decay.
        let confidence = self.decayed_confidence(variant.last_seen_date, today);
        let method = if confidence >= self.auto_accept {
            MethodTag::VendorCache
        } else {
            MethodTag::VendorCacheStale
        };

        let analyte: Option<(String, String)> = conn
            .query_row(
                "SELECT analyte_id, preferred_name FROM analytes WHERE analyte_id = ?1",
                params![match_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((analyte_id, preferred_name)) = analyte else {
            return Ok(None);
        };

        let age_days = variant
            .last_seen_date
            .map(|seen| (today - seen).num_days())
            .unwrap_or(self.cfg.decay_window_days);
        let m = Match::new(analyte_id, preferred_name, confidence, method, confidence)?
            .with_meta("vendor", json!(vendor))
            .with_meta("confirmations", json!(confirmations))
            .with_meta("effective_confirmations", json!(effective))
            .with_meta("collision_count", json!(variant.collision_count))
            .with_meta("frequency_count", json!(variant.frequency_count))
            .with_meta("age_days", json!(age_days));
        Ok(Some(m))
    }

    /// Record one observation of `(vendor, text)`: upsert the row and
    /// increment its frequency. Called on every vendor resolve and as part
    /// of every validation event.
    pub fn observe(&self, vendor: &str, normalized_text: &str, today: NaiveDate) -> Result<()> {
        if normalized_text.is_empty() {
            return Err(Error::InvalidInput("empty observed text".into()));
        }
        let mut conn = self.store.conn();
        let tx = conn.transaction().map_err(Error::from)?;
        self.upsert_observation(&tx, vendor, normalized_text, today)?;
        tx.commit()?;
        Ok(())
    }

    /**
     * Apply a validation event
     *
     * DESIGN DECISION: Confirmation insert, collision update, and grade
     * recompute share one transaction
     * WHY: A partial collision update that leaves consensus mis-counted
     * must never be observable
     *
     * REASONING CHAIN:
     * 1. Upsert the observation (frequency, first/last seen)
     * 2. Insert the confirmation, unique per (variant, submission); a
     *    duplicate submission is a pure no-op for consensus
     * 3. Agreement with the current mapping reinforces consensus
     * 4. Disagreement increments collision_count, stamps the collision
     *    date, re-points the mapping, and invalidates confirmations
     *    covering the superseded analyte (rows are kept for audit)
     * 5. Grade and state are recomputed from the updated row before commit
     */
    pub fn record_validation(
        &self,
        vendor: &str,
        normalized_text: &str,
        analyte_id: &str,
        submission_id: i64,
        today: NaiveDate,
    ) -> Result<VariantState> {
        if normalized_text.is_empty() {
            return Err(Error::InvalidInput("empty observed text".into()));
        }
        let mut conn = self.store.conn();
        let tx = conn.transaction().map_err(Error::from)?;

        let variant = self.upsert_observation(&tx, vendor, normalized_text, today)?;

        let inserted = tx.execute(
            "INSERT OR IGNORE INTO lab_variant_confirmations
                 (variant_id, submission_id, confirmed_analyte_id, confirmed_at, valid_for_consensus)
             VALUES (?1, ?2, ?3, ?4, 1)",
            params![
                variant.id,
                submission_id,
                analyte_id,
                chrono::Utc::now().to_rfc3339()
            ],
        )?;

        if inserted > 0 {
            match variant.validated_match_id.as_deref() {
                None => {
                    tx.execute(
                        "UPDATE lab_variants SET validated_match_id = ?2 WHERE id = ?1",
                        params![variant.id, analyte_id],
                    )?;
                }
                Some(current) if current == analyte_id => {
                    // Reinforces the existing mapping; consensus grows.
                }
                Some(current) => {
                    // Collision: the vendor asserted a different analyte for
                    // the same token. Older confirmations covering the
                    // superseded mapping stop counting toward consensus but
                    // stay on record.
                    let new_collision_count = variant.collision_count + 1;
                    tx.execute(
                        "UPDATE lab_variants
                         SET collision_count = ?2, last_collision_date = ?3, validated_match_id = ?4
                         WHERE id = ?1",
                        params![
                            variant.id,
                            new_collision_count,
                            today.format("%Y-%m-%d").to_string(),
                            analyte_id,
                        ],
                    )?;
                    tx.execute(
                        "UPDATE lab_variant_confirmations
                         SET valid_for_consensus = 0
                         WHERE variant_id = ?1 AND confirmed_analyte_id = ?2",
                        params![variant.id, current],
                    )?;
                    tracing::warn!(
                        vendor,
                        text = normalized_text,
                        superseded = current,
                        asserted = analyte_id,
                        collision_count = new_collision_count,
                        "vendor cache collision"
                    );
                }
            }
        }

        // Recompute grade and state from the updated row.
        let refreshed = fetch_variant_by_id(&tx, variant.id)?.ok_or_else(|| {
            Error::Storage(format!("lab variant {} vanished mid-transaction", variant.id))
        })?;
        let confirmations = valid_confirmation_count(&tx, refreshed.id)?;
        let effective = confirmations - refreshed.collision_count;
        let grade = if refreshed.collision_count > self.cfg.max_collision_count {
            ValidationGrade::Unstable
        } else if effective >= self.cfg.min_confirmations {
            ValidationGrade::High
        } else if confirmations > 0 {
            ValidationGrade::Medium
        } else {
            ValidationGrade::Unknown
        };
        tx.execute(
            "UPDATE lab_variants SET grade = ?2 WHERE id = ?1",
            params![refreshed.id, grade.as_str()],
        )?;

        let state = derive_state(
            &refreshed,
            confirmations,
            today,
            self.cfg.min_confirmations,
            self.cfg.max_collision_count,
            self.cfg.unstable_cooldown_days,
        );
        tx.commit()?;
        Ok(state)
    }

    /// Current state of a variant; `New` when no row exists.
    pub fn state(&self, vendor: &str, normalized_text: &str, today: NaiveDate) -> Result<VariantState> {
        let conn = self.store.conn();
        let Some(variant) = resolve_variant(&conn, vendor, normalized_text)? else {
            return Ok(VariantState::New);
        };
        let confirmations = valid_confirmation_count(&conn, variant.id)?;
        Ok(derive_state(
            &variant,
            confirmations,
            today,
            self.cfg.min_confirmations,
            self.cfg.max_collision_count,
            self.cfg.unstable_cooldown_days,
        ))
    }

    pub fn variant(&self, vendor: &str, normalized_text: &str) -> Result<Option<LabVariantRow>> {
        let conn = self.store.conn();
        resolve_variant(&conn, vendor, normalized_text)
    }

    pub fn confirmations(&self, variant_id: i64) -> Result<Vec<Confirmation>> {
        let conn = self.store.conn();
        let mut stmt = conn.prepare(
            "SELECT id, variant_id, submission_id, confirmed_analyte_id, valid_for_consensus
             FROM lab_variant_confirmations WHERE variant_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![variant_id], |row| {
            Ok(Confirmation {
                id: row.get(0)?,
                variant_id: row.get(1)?,
                submission_id: row.get(2)?,
                confirmed_analyte_id: row.get(3)?,
                valid_for_consensus: row.get(4)?,
            })
        })?;
        let mut confirmations = Vec::new();
        for row in rows {
            confirmations.push(row?);
        }
        Ok(confirmations)
    }

    /// Smooth temporal decay of a cache hit's confidence. The floor sits
    /// strictly below the auto-accept threshold, so a stale hit can never
    /// auto-accept on memory alone.
    pub fn decayed_confidence(&self, last_seen: Option<NaiveDate>, today: NaiveDate) -> f64 {
        let Some(seen) = last_seen else {
            return self.cfg.decay_floor;
        };
        let age_days = (today - seen).num_days().max(0) as f64;
        let window = self.cfg.decay_window_days.max(1) as f64;
        let age_ratio = (age_days / window).min(1.0);
        (1.0 - self.cfg.decay_lambda * age_ratio).max(self.cfg.decay_floor)
    }

    fn upsert_observation(
        &self,
        conn: &Connection,
        vendor: &str,
        normalized_text: &str,
        today: NaiveDate,
    ) -> Result<LabVariantRow> {
        let date = today.format("%Y-%m-%d").to_string();
        match resolve_variant(conn, vendor, normalized_text)? {
            Some(variant) => {
                conn.execute(
                    "UPDATE lab_variants
                     SET frequency_count = frequency_count + 1,
                         last_seen_date = ?2,
                         first_seen_date = COALESCE(first_seen_date, ?2)
                     WHERE id = ?1",
                    params![variant.id, date],
                )?;
                fetch_variant_by_id(conn, variant.id)?
                    .ok_or_else(|| Error::Storage("lab variant vanished during upsert".into()))
            }
            None => {
                conn.execute(
                    "INSERT INTO lab_variants
                         (vendor, observed_text, frequency_count, first_seen_date, last_seen_date,
                          collision_count, normalization_version, grade, created_at)
                     VALUES (?1, ?2, 1, ?3, ?3, 0, ?4, ?5, ?6)",
                    params![
                        vendor,
                        normalized_text,
                        date,
                        self.normalization_version,
                        ValidationGrade::Unknown.as_str(),
                        chrono::Utc::now().to_rfc3339(),
                    ],
                )?;
                fetch_variant_by_id(conn, conn.last_insert_rowid())?
                    .ok_or_else(|| Error::Storage("lab variant vanished after insert".into()))
            }
        }
    }
}

fn derive_state(
    variant: &LabVariantRow,
    valid_confirmations: i64,
    today: NaiveDate,
    min_confirmations: i64,
    max_collision_count: i64,
    cooldown_days: i64,
) -> VariantState {
    if variant.collision_count > max_collision_count {
        if let Some(last_collision) = variant.last_collision_date {
            if (today - last_collision).num_days() < cooldown_days {
                return VariantState::Unstable;
            }
        } else {
            return VariantState::Unstable;
        }
    }
    let effective = valid_confirmations - variant.collision_count;
    if effective >= min_confirmations && variant.validated_match_id.is_some() {
        VariantState::Stable
    } else if valid_confirmations > 0 {
        VariantState::Provisional
    } else {
        VariantState::New
    }
}

/// Fetch the single live row for `(vendor, text)`. If duplicates are found
/// (legacy data inserted before uniqueness was enforced), the oldest row is
/// kept and the rest are quarantined; the event is logged, not raised.
fn resolve_variant(conn: &Connection, vendor: &str, text: &str) -> Result<Option<LabVariantRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, vendor, observed_text, frequency_count, first_seen_date, last_seen_date,
                collision_count, last_collision_date, normalization_version, validated_match_id,
                grade, quarantined
         FROM lab_variants
         WHERE vendor = ?1 AND observed_text = ?2 AND quarantined = 0
         ORDER BY id",
    )?;
    let rows = stmt.query_map(params![vendor, text], map_variant)?;
    let mut variants = Vec::new();
    for row in rows {
        variants.push(row?);
    }
    drop(stmt);

    match variants.len() {
        0 => Ok(None),
        1 => Ok(Some(variants.remove(0))),
        _ => {
            let kept = variants.remove(0);
            let quarantine_ids: Vec<i64> = variants.iter().map(|v| v.id).collect();
            for id in &quarantine_ids {
                conn.execute(
                    "UPDATE lab_variants SET quarantined = 1 WHERE id = ?1",
                    params![id],
                )?;
            }
            let conflict = Error::VendorCacheConflict(format!(
                "duplicate rows for ({vendor}, {text}); kept {}, quarantined {:?}",
                kept.id, quarantine_ids
            ));
            tracing::warn!(error = %conflict, "vendor cache self-healed");
            Ok(Some(kept))
        }
    }
}

fn fetch_variant_by_id(conn: &Connection, id: i64) -> Result<Option<LabVariantRow>> {
    conn.query_row(
        "SELECT id, vendor, observed_text, frequency_count, first_seen_date, last_seen_date,
                collision_count, last_collision_date, normalization_version, validated_match_id,
                grade, quarantined
         FROM lab_variants WHERE id = ?1",
        params![id],
        map_variant,
    )
    .optional()
    .map_err(Error::from)
}

fn valid_confirmation_count(conn: &Connection, variant_id: i64) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(DISTINCT submission_id) FROM lab_variant_confirmations
         WHERE variant_id = ?1 AND valid_for_consensus = 1",
        params![variant_id],
        |row| row.get(0),
    )
    .map_err(Error::from)
}

fn map_variant(row: &rusqlite::Row<'_>) -> rusqlite::Result<LabVariantRow> {
    let parse_date = |value: Option<String>| {
        value.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok())
    };
    let grade: Option<String> = row.get(10)?;
    Ok(LabVariantRow {
        id: row.get(0)?,
        vendor: row.get(1)?,
        observed_text: row.get(2)?,
        frequency_count: row.get(3)?,
        first_seen_date: parse_date(row.get(4)?),
        last_seen_date: parse_date(row.get(5)?),
        collision_count: row.get(6)?,
        last_collision_date: parse_date(row.get(7)?),
        normalization_version: row.get(8)?,
        validated_match_id: row.get(9)?,
        grade: grade.and_then(|g| ValidationGrade::parse(&g).ok()),
        quarantined: row.get(11)?,
    })
}
