/*!
 * SQLite Persistence Module
 *
 * DESIGN DECISION: One SQLite database behind a single shared handle
 * WHY: Embedded, zero-configuration, ACID; the whole corpus plus its audit
 * trail travels as one file
 *
 * REASONING CHAIN:
 * 1. The corpus, vendor cache, decision log, embeddings metadata, and
 *    snapshot registry are relational and mutually referential
 * 2. One schema under one handle keeps cross-table transactions trivial
 *    (collision updates, count-and-insert promotion caps)
 * 3. SQLite connections are not thread-safe: Arc<Mutex<Connection>> gives
 *    one serialized connection shared across resolver threads
 * 4. Reads are ms-scale and writes are rare, so lock contention is minimal
 * 5. WAL mode keeps readers unblocked while the learning loop writes
 *
 * RELATED: store/decisions.rs (append-only log), vendor_cache.rs
 * FUTURE: Connection pool if resolve concurrency ever saturates the mutex
 */

mod decisions;

pub use decisions::{CandidateRecord, DecisionQuery, DecisionRecord, NewDecision};

use crate::error::{Error, Result};
use crate::types::{Analyte, AnalyteKind, Synonym, SynonymKind};
use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/**
 * Shared handle over the SQLite database
 *
 * DESIGN DECISION: Arc<Mutex<Connection>> rather than per-thread connections
 * WHY: Same-thread read-your-writes is required after a validation commits,
 * and one connection makes that unconditional
 *
 * REASONING CHAIN:
 * 1. Clone is cheap (Arc bump) so every component holds the same handle
 * 2. The mutex serializes statements; transactions compose on top of it
 * 3. A poisoned lock is recovered rather than propagated: the connection
 *    itself stays consistent across a panicked holder
 */
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

/// Input row for a new synonym.
#[derive(Debug, Clone)]
pub struct NewSynonym {
    pub analyte_id: String,
    pub raw: String,
    pub normalized: String,
    pub kind: SynonymKind,
    pub harvest_source: String,
    pub confidence: f64,
    pub lab_vendor: Option<String>,
    pub normalization_version: i64,
}

/// Outcome of a dual-gated global synonym promotion attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromotionOutcome {
    /// A new synonym row was created.
    Promoted(i64),
    /// `(analyte_id, normalized)` already exists; no-op.
    Duplicate,
    /// The daily promotion cap was reached; no row written.
    Capped,
}

/// One row of embeddings metadata; exactly one of `analyte_id` /
/// `synonym_id` is set.
#[derive(Debug, Clone)]
pub struct EmbeddingMetaRow {
    pub analyte_id: Option<String>,
    pub synonym_id: Option<i64>,
    pub text_content: String,
    pub position: i64,
    pub model_name: String,
    pub model_hash: String,
}

/// A registered corpus/model snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotRow {
    pub id: i64,
    pub version: String,
    pub corpus_hash: String,
    pub model_hash: Option<String>,
    pub index_hash: Option<String>,
    pub notes: Option<String>,
}

/// Structural problems found by [`SqliteStore::validate_corpus`].
#[derive(Debug, Clone, PartialEq)]
pub enum CorpusIssue {
    DuplicateCas { cas_number: String, analyte_ids: Vec<String> },
    OrphanSynonym { synonym_id: i64, analyte_id: String },
    ParentCycle { analyte_id: String },
}

impl SqliteStore {
    /// Open (or create) a database file and initialize the schema.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| Error::Io(format!("creating {}: {e}", parent.display())))?;
            }
        }
        let conn = Connection::open(path.as_ref())?;
        // WAL keeps readers unblocked while the learning loop writes.
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;
        Self::from_connection(conn)
    }

    /// In-memory database, used by tests and short-lived tools.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON")?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Lock the underlying connection. Recovers from a poisoned lock since
    /// the connection itself stays consistent across a panicked holder.
    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /**
     * DESIGN DECISION: Idempotent schema creation at open time
     * WHY: Self-contained startup, no external migration step required
     *
     * SCHEMA:
     * - analytes: canonical truth, stable string primary key, parent forest
     * - synonyms: unique (analyte_id, normalized), cascade with analyte
     * - lab_variants + lab_variant_confirmations: vendor behavioral memory
     * - match_decisions: append-only audit rows (weak analyte reference)
     * - embeddings_metadata: one row per vector position, XOR source check
     * - snapshot_registry: corpus/model hash pins
     */
    fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS analytes (
                analyte_id        TEXT PRIMARY KEY,
                preferred_name    TEXT NOT NULL,
                kind              TEXT NOT NULL,
                cas_number        TEXT,
                chemical_group    TEXT,
                parent_analyte_id TEXT REFERENCES analytes(analyte_id) ON DELETE CASCADE,
                created_at        TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS ix_analytes_cas ON analytes(cas_number);
            CREATE INDEX IF NOT EXISTS ix_analytes_group ON analytes(chemical_group);
            CREATE INDEX IF NOT EXISTS ix_analytes_parent ON analytes(parent_analyte_id);

            CREATE TABLE IF NOT EXISTS synonyms (
                id                    INTEGER PRIMARY KEY AUTOINCREMENT,
                analyte_id            TEXT NOT NULL REFERENCES analytes(analyte_id) ON DELETE CASCADE,
                raw                   TEXT NOT NULL,
                normalized            TEXT NOT NULL,
                kind                  TEXT NOT NULL,
                harvest_source        TEXT NOT NULL,
                confidence            REAL NOT NULL CHECK (confidence >= 0.0 AND confidence <= 1.0),
                lab_vendor            TEXT,
                normalization_version INTEGER NOT NULL,
                created_at            TEXT NOT NULL,
                UNIQUE (analyte_id, normalized)
            );
            CREATE INDEX IF NOT EXISTS ix_synonyms_normalized ON synonyms(normalized);
            CREATE INDEX IF NOT EXISTS ix_synonyms_vendor_norm ON synonyms(lab_vendor, normalized);
            CREATE INDEX IF NOT EXISTS ix_synonyms_source_created ON synonyms(harvest_source, created_at);

            CREATE TABLE IF NOT EXISTS lab_variants (
                id                    INTEGER PRIMARY KEY AUTOINCREMENT,
                vendor                TEXT NOT NULL,
                observed_text         TEXT NOT NULL CHECK (length(observed_text) > 0),
                frequency_count       INTEGER NOT NULL DEFAULT 1,
                first_seen_date       TEXT,
                last_seen_date        TEXT,
                collision_count       INTEGER NOT NULL DEFAULT 0,
                last_collision_date   TEXT,
                normalization_version INTEGER NOT NULL,
                validated_match_id    TEXT REFERENCES analytes(analyte_id) ON DELETE SET NULL,
                grade                 TEXT,
                quarantined           INTEGER NOT NULL DEFAULT 0,
                created_at            TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS ix_lab_variants_vendor_text ON lab_variants(vendor, observed_text);
            CREATE INDEX IF NOT EXISTS ix_lab_variants_match ON lab_variants(validated_match_id);

            CREATE TABLE IF NOT EXISTS lab_variant_confirmations (
                id                   INTEGER PRIMARY KEY AUTOINCREMENT,
                variant_id           INTEGER NOT NULL REFERENCES lab_variants(id) ON DELETE CASCADE,
                submission_id        INTEGER NOT NULL,
                confirmed_analyte_id TEXT REFERENCES analytes(analyte_id) ON DELETE SET NULL,
                confirmed_at         TEXT NOT NULL,
                valid_for_consensus  INTEGER NOT NULL DEFAULT 1,
                UNIQUE (variant_id, submission_id)
            );
            CREATE INDEX IF NOT EXISTS ix_confirmations_variant ON lab_variant_confirmations(variant_id, confirmed_analyte_id);

            CREATE TABLE IF NOT EXISTS match_decisions (
                id                   INTEGER PRIMARY KEY AUTOINCREMENT,
                input_text           TEXT NOT NULL,
                matched_analyte_id   TEXT,
                method               TEXT NOT NULL,
                confidence_score     REAL NOT NULL CHECK (confidence_score >= 0.0 AND confidence_score <= 1.0),
                top_k_candidates     TEXT NOT NULL,
                signals_used         TEXT NOT NULL,
                margin               REAL NOT NULL,
                cross_method_conflict INTEGER NOT NULL DEFAULT 0,
                disagreement_flag    INTEGER NOT NULL DEFAULT 0,
                corpus_snapshot_hash TEXT NOT NULL,
                model_hash           TEXT NOT NULL,
                lab_vendor           TEXT,
                method_context       TEXT,
                matrix               TEXT,
                decided_at           TEXT NOT NULL,
                human_validated      INTEGER NOT NULL DEFAULT 0,
                validation_notes     TEXT,
                ingested             INTEGER NOT NULL DEFAULT 0,
                correction_of        INTEGER REFERENCES match_decisions(id) ON DELETE SET NULL,
                is_corrected         INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS ix_decisions_input ON match_decisions(input_text);
            CREATE INDEX IF NOT EXISTS ix_decisions_decided_at ON match_decisions(decided_at);
            CREATE INDEX IF NOT EXISTS ix_decisions_validation ON match_decisions(human_validated, ingested);

            CREATE TABLE IF NOT EXISTS embeddings_metadata (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                analyte_id   TEXT,
                synonym_id   INTEGER,
                text_content TEXT NOT NULL,
                position     INTEGER NOT NULL UNIQUE,
                model_name   TEXT NOT NULL,
                model_hash   TEXT NOT NULL,
                created_at   TEXT NOT NULL,
                CHECK ((analyte_id IS NOT NULL AND synonym_id IS NULL)
                    OR (analyte_id IS NULL AND synonym_id IS NOT NULL))
            );
            CREATE INDEX IF NOT EXISTS ix_embeddings_model ON embeddings_metadata(model_name, model_hash);

            CREATE TABLE IF NOT EXISTS snapshot_registry (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                version     TEXT NOT NULL,
                corpus_hash TEXT NOT NULL,
                model_hash  TEXT,
                index_hash  TEXT,
                created_at  TEXT NOT NULL,
                notes       TEXT
            );",
        )?;
        Ok(())
    }

    // ── Analytes ─────────────────────────────────────────────────────────

    pub fn insert_analyte(&self, analyte: &Analyte) -> Result<()> {
        self.conn().execute(
            "INSERT INTO analytes
                 (analyte_id, preferred_name, kind, cas_number, chemical_group, parent_analyte_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                analyte.analyte_id,
                analyte.preferred_name,
                analyte.kind.as_str(),
                analyte.cas_number,
                analyte.chemical_group,
                analyte.parent_analyte_id,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn analyte(&self, analyte_id: &str) -> Result<Option<Analyte>> {
        self.conn()
            .query_row(
                "SELECT analyte_id, preferred_name, kind, cas_number, chemical_group, parent_analyte_id
                 FROM analytes WHERE analyte_id = ?1",
                params![analyte_id],
                map_analyte,
            )
            .optional()
            .map_err(Error::from)
    }

    pub fn analyte_by_cas(&self, cas_number: &str) -> Result<Option<Analyte>> {
        self.conn()
            .query_row(
                "SELECT analyte_id, preferred_name, kind, cas_number, chemical_group, parent_analyte_id
                 FROM analytes WHERE cas_number = ?1 LIMIT 1",
                params![cas_number],
                map_analyte,
            )
            .optional()
            .map_err(Error::from)
    }

    pub fn all_analytes(&self) -> Result<Vec<Analyte>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT analyte_id, preferred_name, kind, cas_number, chemical_group, parent_analyte_id
             FROM analytes ORDER BY analyte_id",
        )?;
        let rows = stmt.query_map([], map_analyte)?;
        let mut analytes = Vec::new();
        for row in rows {
            analytes.push(row?);
        }
        Ok(analytes)
    }

    pub fn analyte_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM analytes", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Curation-only removal. Synonyms and child analytes cascade; decision
    /// rows survive because they hold only a weak reference.
    pub fn delete_analyte(&self, analyte_id: &str) -> Result<()> {
        self.conn()
            .execute("DELETE FROM analytes WHERE analyte_id = ?1", params![analyte_id])?;
        Ok(())
    }

    // ── Synonyms ─────────────────────────────────────────────────────────

    pub fn insert_synonym(&self, synonym: &NewSynonym) -> Result<i64> {
        if !(0.0..=1.0).contains(&synonym.confidence) {
            return Err(Error::InvalidConfidence(synonym.confidence));
        }
        let conn = self.conn();
        conn.execute(
            "INSERT INTO synonyms
                 (analyte_id, raw, normalized, kind, harvest_source, confidence, lab_vendor, normalization_version, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                synonym.analyte_id,
                synonym.raw,
                synonym.normalized,
                synonym.kind.as_str(),
                synonym.harvest_source,
                synonym.confidence,
                synonym.lab_vendor,
                synonym.normalization_version,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn has_synonym(&self, analyte_id: &str, normalized: &str) -> Result<bool> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM synonyms WHERE analyte_id = ?1 AND normalized = ?2",
            params![analyte_id, normalized],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Exact-match lookup by normalized text.
    pub fn synonym_by_normalized(&self, normalized: &str) -> Result<Option<Synonym>> {
        self.conn()
            .query_row(
                "SELECT id, analyte_id, raw, normalized, kind, harvest_source, confidence, lab_vendor, normalization_version
                 FROM synonyms WHERE normalized = ?1 ORDER BY id LIMIT 1",
                params![normalized],
                map_synonym,
            )
            .optional()
            .map_err(Error::from)
    }

    pub fn all_synonyms(&self) -> Result<Vec<Synonym>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, analyte_id, raw, normalized, kind, harvest_source, confidence, lab_vendor, normalization_version
             FROM synonyms ORDER BY id",
        )?;
        let rows = stmt.query_map([], map_synonym)?;
        let mut synonyms = Vec::new();
        for row in rows {
            synonyms.push(row?);
        }
        Ok(synonyms)
    }

    pub fn synonyms_for_analyte(&self, analyte_id: &str) -> Result<Vec<Synonym>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, analyte_id, raw, normalized, kind, harvest_source, confidence, lab_vendor, normalization_version
             FROM synonyms WHERE analyte_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![analyte_id], map_synonym)?;
        let mut synonyms = Vec::new();
        for row in rows {
            synonyms.push(row?);
        }
        Ok(synonyms)
    }

    pub fn synonym_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM synonyms", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Synonyms created since the given date (inclusive), counted across
    /// `validated_runtime*` harvest sources. Drives the daily promotion cap.
    pub fn runtime_promotions_on(&self, day: NaiveDate) -> Result<i64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM synonyms
             WHERE harvest_source LIKE 'validated_runtime%' AND created_at >= ?1",
            params![day.format("%Y-%m-%d").to_string()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /**
     * Transactional count-and-insert for a global synonym promotion
     *
     * DESIGN DECISION: Cap check, dedup check, and insert share one transaction
     * WHY: The daily cap bounds structural-memory velocity; a check-then-insert
     * race would let concurrent promotions overshoot it
     *
     * REASONING CHAIN:
     * 1. Count today's `validated_runtime*` rows inside the transaction
     * 2. At or past the cap: roll back, report Capped, write nothing
     * 3. Existing (analyte_id, normalized): roll back, report Duplicate
     * 4. Otherwise insert and commit; the row id feeds the semantic add
     */
    pub fn try_promote_synonym(
        &self,
        synonym: &NewSynonym,
        day: NaiveDate,
        daily_cap: i64,
    ) -> Result<PromotionOutcome> {
        if !(0.0..=1.0).contains(&synonym.confidence) {
            return Err(Error::InvalidConfidence(synonym.confidence));
        }
        let mut conn = self.conn();
        let tx = conn.transaction().map_err(Error::from)?;

        let today_count: i64 = tx.query_row(
            "SELECT COUNT(*) FROM synonyms
             WHERE harvest_source LIKE 'validated_runtime%' AND created_at >= ?1",
            params![day.format("%Y-%m-%d").to_string()],
            |row| row.get(0),
        )?;
        if today_count >= daily_cap {
            tx.rollback()?;
            return Ok(PromotionOutcome::Capped);
        }

        let duplicate: i64 = tx.query_row(
            "SELECT COUNT(*) FROM synonyms WHERE analyte_id = ?1 AND normalized = ?2",
            params![synonym.analyte_id, synonym.normalized],
            |row| row.get(0),
        )?;
        if duplicate > 0 {
            tx.rollback()?;
            return Ok(PromotionOutcome::Duplicate);
        }

        tx.execute(
            "INSERT INTO synonyms
                 (analyte_id, raw, normalized, kind, harvest_source, confidence, lab_vendor, normalization_version, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                synonym.analyte_id,
                synonym.raw,
                synonym.normalized,
                synonym.kind.as_str(),
                synonym.harvest_source,
                synonym.confidence,
                synonym.lab_vendor,
                synonym.normalization_version,
                Utc::now().to_rfc3339(),
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(PromotionOutcome::Promoted(id))
    }

    // ── Embeddings metadata ──────────────────────────────────────────────

    pub fn insert_embedding_metadata(&self, row: &EmbeddingMetaRow) -> Result<i64> {
        if row.analyte_id.is_some() == row.synonym_id.is_some() {
            return Err(Error::InvalidInput(
                "embedding metadata must reference exactly one of analyte or synonym".into(),
            ));
        }
        let conn = self.conn();
        conn.execute(
            "INSERT INTO embeddings_metadata
                 (analyte_id, synonym_id, text_content, position, model_name, model_hash, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                row.analyte_id,
                row.synonym_id,
                row.text_content,
                row.position,
                row.model_name,
                row.model_hash,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn embedding_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM embeddings_metadata", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// All stored vector positions, ascending. Completeness requires the
    /// positions to form `[0, N)` with no gaps.
    pub fn embedding_positions(&self) -> Result<Vec<i64>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT position FROM embeddings_metadata ORDER BY position")?;
        let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
        let mut positions = Vec::new();
        for row in rows {
            positions.push(row?);
        }
        Ok(positions)
    }

    // ── Snapshot registry ────────────────────────────────────────────────

    pub fn register_snapshot(
        &self,
        version: &str,
        corpus_hash: &str,
        model_hash: Option<&str>,
        index_hash: Option<&str>,
        notes: Option<&str>,
    ) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO snapshot_registry (version, corpus_hash, model_hash, index_hash, created_at, notes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![version, corpus_hash, model_hash, index_hash, Utc::now().to_rfc3339(), notes],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn latest_snapshot(&self) -> Result<Option<SnapshotRow>> {
        self.conn()
            .query_row(
                "SELECT id, version, corpus_hash, model_hash, index_hash, notes
                 FROM snapshot_registry ORDER BY id DESC LIMIT 1",
                [],
                |row| {
                    Ok(SnapshotRow {
                        id: row.get(0)?,
                        version: row.get(1)?,
                        corpus_hash: row.get(2)?,
                        model_hash: row.get(3)?,
                        index_hash: row.get(4)?,
                        notes: row.get(5)?,
                    })
                },
            )
            .optional()
            .map_err(Error::from)
    }

    // ── Corpus integrity ─────────────────────────────────────────────────

    /// Deterministic hash over the full corpus (analytes + synonym keys),
    /// pinned into every decision row.
    pub fn corpus_hash(&self) -> Result<String> {
        let mut hasher = Sha256::new();
        for analyte in self.all_analytes()? {
            hasher.update(analyte.analyte_id.as_bytes());
            hasher.update(b"\x1f");
            hasher.update(analyte.preferred_name.as_bytes());
            hasher.update(b"\x1f");
            hasher.update(analyte.cas_number.as_deref().unwrap_or("").as_bytes());
            hasher.update(b"\x1e");
        }
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT analyte_id, normalized FROM synonyms ORDER BY analyte_id, normalized")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (analyte_id, normalized) = row?;
            hasher.update(analyte_id.as_bytes());
            hasher.update(b"\x1f");
            hasher.update(normalized.as_bytes());
            hasher.update(b"\x1e");
        }
        Ok(hex::encode(hasher.finalize()))
    }

    /// Structural corpus checks: CAS uniqueness across analytes, synonym
    /// referential integrity, and parent-forest acyclicity.
    pub fn validate_corpus(&self) -> Result<Vec<CorpusIssue>> {
        let mut issues = Vec::new();
        let conn = self.conn();

        let mut stmt = conn.prepare(
            "SELECT cas_number, GROUP_CONCAT(analyte_id) FROM analytes
             WHERE cas_number IS NOT NULL
             GROUP BY cas_number HAVING COUNT(*) > 1",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (cas_number, ids) = row?;
            issues.push(CorpusIssue::DuplicateCas {
                cas_number,
                analyte_ids: ids.split(',').map(str::to_string).collect(),
            });
        }

        let mut stmt = conn.prepare(
            "SELECT s.id, s.analyte_id FROM synonyms s
             LEFT JOIN analytes a ON a.analyte_id = s.analyte_id
             WHERE a.analyte_id IS NULL",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (synonym_id, analyte_id) = row?;
            issues.push(CorpusIssue::OrphanSynonym { synonym_id, analyte_id });
        }

        let mut stmt = conn.prepare("SELECT analyte_id, parent_analyte_id FROM analytes")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
        })?;
        let mut parents = std::collections::HashMap::new();
        for row in rows {
            let (id, parent) = row?;
            parents.insert(id, parent);
        }
        for start in parents.keys() {
            let mut seen = std::collections::HashSet::new();
            let mut current = Some(start.clone());
            while let Some(id) = current {
                if !seen.insert(id.clone()) {
                    if &id == start {
                        issues.push(CorpusIssue::ParentCycle { analyte_id: start.clone() });
                    }
                    break;
                }
                current = parents.get(&id).cloned().flatten();
            }
        }

        Ok(issues)
    }
}

fn map_analyte(row: &Row<'_>) -> rusqlite::Result<Analyte> {
    let kind: String = row.get(2)?;
    Ok(Analyte {
        analyte_id: row.get(0)?,
        preferred_name: row.get(1)?,
        kind: AnalyteKind::parse(&kind).unwrap_or(AnalyteKind::SingleSubstance),
        cas_number: row.get(3)?,
        chemical_group: row.get(4)?,
        parent_analyte_id: row.get(5)?,
    })
}

fn map_synonym(row: &Row<'_>) -> rusqlite::Result<Synonym> {
    let kind: String = row.get(4)?;
    Ok(Synonym {
        id: row.get(0)?,
        analyte_id: row.get(1)?,
        raw: row.get(2)?,
        normalized: row.get(3)?,
        kind: SynonymKind::parse(&kind).unwrap_or(SynonymKind::Common),
        harvest_source: row.get(5)?,
        confidence: row.get(6)?,
        lab_vendor: row.get(7)?,
        normalization_version: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::NORMALIZATION_VERSION;

    fn benzene() -> Analyte {
        Analyte::new("REG153_001", "Benzene", AnalyteKind::SingleSubstance).with_cas("71-43-2")
    }

    fn new_synonym(analyte_id: &str, normalized: &str) -> NewSynonym {
        NewSynonym {
            analyte_id: analyte_id.into(),
            raw: normalized.into(),
            normalized: normalized.into(),
            kind: SynonymKind::Common,
            harvest_source: "bootstrap".into(),
            confidence: 1.0,
            lab_vendor: None,
            normalization_version: NORMALIZATION_VERSION,
        }
    }

    #[test]
    fn insert_and_lookup_analyte() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_analyte(&benzene()).unwrap();

        let found = store.analyte("REG153_001").unwrap().unwrap();
        assert_eq!(found.preferred_name, "Benzene");

        let by_cas = store.analyte_by_cas("71-43-2").unwrap().unwrap();
        assert_eq!(by_cas.analyte_id, "REG153_001");

        assert!(store.analyte("REG153_999").unwrap().is_none());
    }

    #[test]
    fn synonym_lookup_and_uniqueness() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_analyte(&benzene()).unwrap();
        store.insert_synonym(&new_synonym("REG153_001", "benzene")).unwrap();

        let found = store.synonym_by_normalized("benzene").unwrap().unwrap();
        assert_eq!(found.analyte_id, "REG153_001");
        assert!(store.has_synonym("REG153_001", "benzene").unwrap());

        // (analyte_id, normalized) is unique.
        assert!(store.insert_synonym(&new_synonym("REG153_001", "benzene")).is_err());
    }

    #[test]
    fn deleting_analyte_cascades_synonyms() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_analyte(&benzene()).unwrap();
        store.insert_synonym(&new_synonym("REG153_001", "benzene")).unwrap();
        assert_eq!(store.synonym_count().unwrap(), 1);

        store.delete_analyte("REG153_001").unwrap();
        assert_eq!(store.synonym_count().unwrap(), 0);
    }

    #[test]
    fn promotion_cap_is_transactional() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_analyte(&benzene()).unwrap();
        let today = Utc::now().date_naive();

        let mut synonym = new_synonym("REG153_001", "benzol");
        synonym.harvest_source = "validated_runtime".into();
        assert!(matches!(
            store.try_promote_synonym(&synonym, today, 2).unwrap(),
            PromotionOutcome::Promoted(_)
        ));
        assert_eq!(
            store.try_promote_synonym(&synonym, today, 2).unwrap(),
            PromotionOutcome::Duplicate
        );

        let mut second = new_synonym("REG153_001", "benzole");
        second.harvest_source = "validated_runtime:LabA".into();
        assert!(matches!(
            store.try_promote_synonym(&second, today, 2).unwrap(),
            PromotionOutcome::Promoted(_)
        ));

        let mut third = new_synonym("REG153_001", "phenyl hydride");
        third.harvest_source = "validated_runtime".into();
        assert_eq!(
            store.try_promote_synonym(&third, today, 2).unwrap(),
            PromotionOutcome::Capped
        );
        assert!(!store.has_synonym("REG153_001", "phenyl hydride").unwrap());
    }

    #[test]
    fn duplicate_cas_detected() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_analyte(&benzene()).unwrap();
        store
            .insert_analyte(
                &Analyte::new("REG153_900", "Benzene copy", AnalyteKind::SingleSubstance)
                    .with_cas("71-43-2"),
            )
            .unwrap();

        let issues = store.validate_corpus().unwrap();
        assert!(issues
            .iter()
            .any(|i| matches!(i, CorpusIssue::DuplicateCas { cas_number, .. } if cas_number == "71-43-2")));
    }

    #[test]
    fn parent_cycle_detected() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .insert_analyte(&Analyte::new("A", "Suite A", AnalyteKind::Suite))
            .unwrap();
        store
            .insert_analyte(&Analyte::new("B", "Suite B", AnalyteKind::Suite).with_parent("A"))
            .unwrap();
        // Close the loop by curation mistake.
        store
            .conn()
            .execute("UPDATE analytes SET parent_analyte_id = 'B' WHERE analyte_id = 'A'", [])
            .unwrap();

        let issues = store.validate_corpus().unwrap();
        assert!(issues.iter().any(|i| matches!(i, CorpusIssue::ParentCycle { .. })));
    }

    #[test]
    fn corpus_hash_tracks_content() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_analyte(&benzene()).unwrap();
        let h1 = store.corpus_hash().unwrap();
        let h1_again = store.corpus_hash().unwrap();
        assert_eq!(h1, h1_again);

        store.insert_synonym(&new_synonym("REG153_001", "benzol")).unwrap();
        let h2 = store.corpus_hash().unwrap();
        assert_ne!(h1, h2);
    }

    #[test]
    fn embedding_metadata_requires_exactly_one_source() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_analyte(&benzene()).unwrap();
        let id = store.insert_synonym(&new_synonym("REG153_001", "benzene")).unwrap();

        let row = EmbeddingMetaRow {
            analyte_id: None,
            synonym_id: Some(id),
            text_content: "benzene".into(),
            position: 0,
            model_name: "test".into(),
            model_hash: "abc".into(),
        };
        store.insert_embedding_metadata(&row).unwrap();

        let both = EmbeddingMetaRow {
            analyte_id: Some("REG153_001".into()),
            synonym_id: Some(id),
            ..row.clone()
        };
        assert!(store.insert_embedding_metadata(&both).is_err());
    }

    #[test]
    fn snapshot_registry_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let hash = store.corpus_hash().unwrap();
        store
            .register_snapshot("v1.0", &hash, Some("model"), None, Some("bootstrap"))
            .unwrap();
        let snapshot = store.latest_snapshot().unwrap().unwrap();
        assert_eq!(snapshot.version, "v1.0");
        assert_eq!(snapshot.corpus_hash, hash);
    }
}
