/*!
 * Decision Log Module
 *
 * DESIGN DECISION: Append-only audit rows, corrections as new rows
 * WHY: A decision must stay reconstructable under the exact corpus and
 * model hashes recorded when it was made
 *
 * REASONING CHAIN:
 * 1. Every resolve writes one match_decisions row pinned to the hashes in
 *    force at decision time
 * 2. Rows are never mutated in place; a human correction creates a new row
 *    whose correction_of points at the original
 * 3. The only permitted touch on the predecessor is flipping is_corrected
 * 4. Validation and ingestion state ride on flags queried by the learning
 *    loop, never on destructive updates
 */

use super::SqliteStore;
use crate::error::{Error, Result};
use crate::types::{MethodTag, SignalsUsed};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

/// One candidate as persisted in the decision log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub analyte_id: String,
    pub score: f64,
    pub method: MethodTag,
}

/// Input for a new decision row.
#[derive(Debug, Clone)]
pub struct NewDecision {
    pub input_text: String,
    pub matched_analyte_id: Option<String>,
    pub method: MethodTag,
    pub confidence_score: f64,
    pub top_k_candidates: Vec<CandidateRecord>,
    pub signals_used: SignalsUsed,
    pub margin: f64,
    pub cross_method_conflict: bool,
    pub disagreement_flag: bool,
    pub corpus_snapshot_hash: String,
    pub model_hash: String,
    pub lab_vendor: Option<String>,
    pub method_context: Option<String>,
    pub matrix: Option<String>,
    pub validation_notes: Option<String>,
}

/// A persisted decision row.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionRecord {
    pub id: i64,
    pub input_text: String,
    pub matched_analyte_id: Option<String>,
    pub method: MethodTag,
    pub confidence_score: f64,
    pub top_k_candidates: Vec<CandidateRecord>,
    pub signals_used: SignalsUsed,
    pub margin: f64,
    pub cross_method_conflict: bool,
    pub disagreement_flag: bool,
    pub corpus_snapshot_hash: String,
    pub model_hash: String,
    pub lab_vendor: Option<String>,
    pub method_context: Option<String>,
    pub matrix: Option<String>,
    pub decided_at: DateTime<Utc>,
    pub human_validated: bool,
    pub validation_notes: Option<String>,
    pub ingested: bool,
    pub correction_of: Option<i64>,
    pub is_corrected: bool,
}

/// Filters for decision-log queries.
#[derive(Debug, Clone, Default)]
pub struct DecisionQuery {
    pub since: Option<DateTime<Utc>>,
    pub human_validated: Option<bool>,
    pub ingested: Option<bool>,
    pub limit: Option<usize>,
}

const SELECT_COLUMNS: &str = "id, input_text, matched_analyte_id, method, confidence_score,
    top_k_candidates, signals_used, margin, cross_method_conflict, disagreement_flag,
    corpus_snapshot_hash, model_hash, lab_vendor, method_context, matrix, decided_at,
    human_validated, validation_notes, ingested, correction_of, is_corrected";

impl SqliteStore {
    /// Append one decision row.
    pub fn record_decision(&self, decision: &NewDecision) -> Result<i64> {
        if !(0.0..=1.0).contains(&decision.confidence_score) {
            return Err(Error::InvalidConfidence(decision.confidence_score));
        }
        let candidates = serde_json::to_string(&decision.top_k_candidates)?;
        let signals = serde_json::to_string(&decision.signals_used)?;
        let conn = self.conn();
        conn.execute(
            "INSERT INTO match_decisions
                 (input_text, matched_analyte_id, method, confidence_score, top_k_candidates,
                  signals_used, margin, cross_method_conflict, disagreement_flag,
                  corpus_snapshot_hash, model_hash, lab_vendor, method_context, matrix,
                  decided_at, validation_notes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                decision.input_text,
                decision.matched_analyte_id,
                decision.method.as_str(),
                decision.confidence_score,
                candidates,
                signals,
                decision.margin,
                decision.cross_method_conflict,
                decision.disagreement_flag,
                decision.corpus_snapshot_hash,
                decision.model_hash,
                decision.lab_vendor,
                decision.method_context,
                decision.matrix,
                Utc::now().to_rfc3339(),
                decision.validation_notes,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Append a correction for an earlier decision. The original row keeps
    /// all of its content; only `is_corrected` flips.
    pub fn record_correction(&self, original_id: i64, corrected: &NewDecision) -> Result<i64> {
        if !(0.0..=1.0).contains(&corrected.confidence_score) {
            return Err(Error::InvalidConfidence(corrected.confidence_score));
        }
        let candidates = serde_json::to_string(&corrected.top_k_candidates)?;
        let signals = serde_json::to_string(&corrected.signals_used)?;
        let mut conn = self.conn();
        let tx = conn.transaction().map_err(Error::from)?;
        let exists: i64 = tx.query_row(
            "SELECT COUNT(*) FROM match_decisions WHERE id = ?1",
            params![original_id],
            |row| row.get(0),
        )?;
        if exists == 0 {
            tx.rollback()?;
            return Err(Error::InvalidInput(format!(
                "decision {original_id} does not exist"
            )));
        }
        tx.execute(
            "INSERT INTO match_decisions
                 (input_text, matched_analyte_id, method, confidence_score, top_k_candidates,
                  signals_used, margin, cross_method_conflict, disagreement_flag,
                  corpus_snapshot_hash, model_hash, lab_vendor, method_context, matrix,
                  decided_at, validation_notes, human_validated, correction_of)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, 1, ?17)",
            params![
                corrected.input_text,
                corrected.matched_analyte_id,
                corrected.method.as_str(),
                corrected.confidence_score,
                candidates,
                signals,
                corrected.margin,
                corrected.cross_method_conflict,
                corrected.disagreement_flag,
                corrected.corpus_snapshot_hash,
                corrected.model_hash,
                corrected.lab_vendor,
                corrected.method_context,
                corrected.matrix,
                Utc::now().to_rfc3339(),
                corrected.validation_notes,
                original_id,
            ],
        )?;
        let new_id = tx.last_insert_rowid();
        tx.execute(
            "UPDATE match_decisions SET is_corrected = 1 WHERE id = ?1",
            params![original_id],
        )?;
        tx.commit()?;
        Ok(new_id)
    }

    pub fn decision(&self, id: i64) -> Result<Option<DecisionRecord>> {
        let conn = self.conn();
        let sql = format!("SELECT {SELECT_COLUMNS} FROM match_decisions WHERE id = ?1");
        let row = conn
            .query_row(&sql, params![id], map_decision)
            .optional()?;
        Ok(row)
    }

    /// Query the log with optional filters, newest first.
    pub fn decisions(&self, query: &DecisionQuery) -> Result<Vec<DecisionRecord>> {
        let mut sql = format!("SELECT {SELECT_COLUMNS} FROM match_decisions WHERE 1=1");
        let mut args: Vec<String> = Vec::new();
        if let Some(since) = query.since {
            sql.push_str(" AND decided_at >= ?");
            args.push(since.to_rfc3339());
        }
        if let Some(validated) = query.human_validated {
            sql.push_str(&format!(" AND human_validated = {}", i32::from(validated)));
        }
        if let Some(ingested) = query.ingested {
            sql.push_str(&format!(" AND ingested = {}", i32::from(ingested)));
        }
        sql.push_str(" ORDER BY id DESC");
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), map_decision)?;
        let mut decisions = Vec::new();
        for row in rows {
            decisions.push(row?);
        }
        Ok(decisions)
    }

    /// Distinct unknown inputs (no matched analyte) for clustering, newest
    /// first.
    pub fn unknown_inputs(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT input_text FROM match_decisions
             WHERE matched_analyte_id IS NULL AND decided_at >= ?1
             ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![since.to_rfc3339(), limit as i64], |row| {
            row.get::<_, String>(0)
        })?;
        let mut inputs = Vec::new();
        for row in rows {
            inputs.push(row?);
        }
        Ok(inputs)
    }

    pub fn mark_validated(&self, id: i64, notes: Option<&str>) -> Result<()> {
        let changed = self.conn().execute(
            "UPDATE match_decisions SET human_validated = 1, validation_notes = COALESCE(?2, validation_notes)
             WHERE id = ?1",
            params![id, notes],
        )?;
        if changed == 0 {
            return Err(Error::InvalidInput(format!("decision {id} does not exist")));
        }
        Ok(())
    }

    pub fn mark_ingested(&self, id: i64) -> Result<()> {
        self.conn().execute(
            "UPDATE match_decisions SET ingested = 1 WHERE id = ?1",
            params![id],
        )?;
        Ok(())
    }
}

fn map_decision(row: &Row<'_>) -> rusqlite::Result<DecisionRecord> {
    let method: String = row.get(3)?;
    let candidates_json: String = row.get(5)?;
    let signals_json: String = row.get(6)?;
    let decided_at: String = row.get(15)?;
    Ok(DecisionRecord {
        id: row.get(0)?,
        input_text: row.get(1)?,
        matched_analyte_id: row.get(2)?,
        method: MethodTag::parse(&method).unwrap_or(MethodTag::Unknown),
        confidence_score: row.get(4)?,
        top_k_candidates: serde_json::from_str(&candidates_json).unwrap_or_default(),
        signals_used: serde_json::from_str(&signals_json).unwrap_or_default(),
        margin: row.get(7)?,
        cross_method_conflict: row.get(8)?,
        disagreement_flag: row.get(9)?,
        corpus_snapshot_hash: row.get(10)?,
        model_hash: row.get(11)?,
        lab_vendor: row.get(12)?,
        method_context: row.get(13)?,
        matrix: row.get(14)?,
        decided_at: DateTime::parse_from_rfc3339(&decided_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        human_validated: row.get(16)?,
        validation_notes: row.get(17)?,
        ingested: row.get(18)?,
        correction_of: row.get(19)?,
        is_corrected: row.get(20)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_decision(input: &str, matched: Option<&str>) -> NewDecision {
        NewDecision {
            input_text: input.into(),
            matched_analyte_id: matched.map(str::to_string),
            method: MethodTag::Fuzzy,
            confidence_score: 0.88,
            top_k_candidates: vec![CandidateRecord {
                analyte_id: "REG153_001".into(),
                score: 0.88,
                method: MethodTag::Fuzzy,
            }],
            signals_used: SignalsUsed {
                fuzzy: true,
                ..SignalsUsed::default()
            },
            margin: 1.0,
            cross_method_conflict: false,
            disagreement_flag: false,
            corpus_snapshot_hash: "corpus".into(),
            model_hash: "model".into(),
            lab_vendor: None,
            method_context: None,
            matrix: None,
            validation_notes: None,
        }
    }

    #[test]
    fn record_and_read_back() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = store
            .record_decision(&sample_decision("Benzen", Some("REG153_001")))
            .unwrap();

        let row = store.decision(id).unwrap().unwrap();
        assert_eq!(row.input_text, "Benzen");
        assert_eq!(row.method, MethodTag::Fuzzy);
        assert_eq!(row.top_k_candidates.len(), 1);
        assert!(row.signals_used.fuzzy);
        assert!(!row.is_corrected);
    }

    #[test]
    fn correction_creates_new_row_and_flags_original() {
        let store = SqliteStore::open_in_memory().unwrap();
        let original_id = store
            .record_decision(&sample_decision("Benzol", Some("REG153_002")))
            .unwrap();

        let mut corrected = sample_decision("Benzol", Some("REG153_001"));
        corrected.validation_notes = Some("reviewer fix".into());
        let new_id = store.record_correction(original_id, &corrected).unwrap();
        assert_ne!(new_id, original_id);

        let original = store.decision(original_id).unwrap().unwrap();
        assert!(original.is_corrected);
        // Content of the original row is untouched.
        assert_eq!(original.matched_analyte_id.as_deref(), Some("REG153_002"));
        assert_eq!(original.correction_of, None);

        let correction = store.decision(new_id).unwrap().unwrap();
        assert_eq!(correction.correction_of, Some(original_id));
        assert!(correction.human_validated);
    }

    #[test]
    fn correction_of_missing_row_fails() {
        let store = SqliteStore::open_in_memory().unwrap();
        let err = store.record_correction(42, &sample_decision("x", None));
        assert!(err.is_err());
    }

    #[test]
    fn query_filters() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id1 = store.record_decision(&sample_decision("one", Some("A"))).unwrap();
        store.record_decision(&sample_decision("two", None)).unwrap();
        store.mark_validated(id1, Some("ok")).unwrap();

        let validated = store
            .decisions(&DecisionQuery {
                human_validated: Some(true),
                ..DecisionQuery::default()
            })
            .unwrap();
        assert_eq!(validated.len(), 1);
        assert_eq!(validated[0].input_text, "one");

        let all = store.decisions(&DecisionQuery::default()).unwrap();
        assert_eq!(all.len(), 2);
        // Newest first.
        assert_eq!(all[0].input_text, "two");
    }

    #[test]
    fn unknown_inputs_are_distinct() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.record_decision(&sample_decision("mystery", None)).unwrap();
        store.record_decision(&sample_decision("mystery", None)).unwrap();
        store.record_decision(&sample_decision("other", None)).unwrap();

        let since = Utc::now() - chrono::Duration::days(1);
        let unknowns = store.unknown_inputs(since, 10).unwrap();
        assert_eq!(unknowns.len(), 2);
    }
}
