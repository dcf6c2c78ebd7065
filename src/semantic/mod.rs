/*!
 * Semantic Index Module
 *
 * DESIGN DECISION: Flat inner-product index over L2-normalized vectors
 * WHY: With unit vectors, cosine similarity reduces to a dot product; a
 * brute-force scan is well inside the ms-scale resolve budget for a
 * synonym-corpus-sized index
 *
 * REASONING CHAIN:
 * 1. The index is append-only at runtime: the model never retrains, new
 *    vectors only land at the tail
 * 2. Resolves take a read view; the learning loop's incremental additions
 *    hold the write lock briefly
 * 3. On disk: dense little-endian f32 vector file + small JSON header
 *    (dimension, count, model identity) + JSON metadata side-file mapping
 *    each position to its synonym/analyte attributes for read-time joins
 * 4. Scores are raw inner products clamped to [0, 1]; binning would
 *    collapse neighboring isomers into identical confidences and break the
 *    margin gate
 * 5. A header written under a different model hash refuses to load: a
 *    model change means a full rebuild
 *
 * RELATED: semantic/encoder.rs (TextEncoder seam), resolver.rs step 3
 * FUTURE: ANN structure (HNSW) if the corpus outgrows brute force
 */

mod encoder;

pub use encoder::{NgramHashEncoder, TextEncoder, EMBEDDING_DIM};

use crate::error::{Error, Result};
use crate::store::{EmbeddingMetaRow, SqliteStore};
use crate::types::{Match, MethodTag};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

/// Attributes joined to each vector position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMeta {
    pub position: usize,
    pub text: String,
    pub analyte_id: String,
    pub preferred_name: String,
    pub cas_number: Option<String>,
    pub synonym_id: Option<i64>,
    pub model_name: String,
    pub model_hash: String,
}

/// One nearest-neighbor hit.
#[derive(Debug, Clone, PartialEq)]
pub struct SemanticHit {
    pub position: usize,
    pub score: f32,
    pub meta: VectorMeta,
}

/// On-disk locations for the index triple.
#[derive(Debug, Clone)]
pub struct IndexPaths {
    pub vectors: PathBuf,
    pub header: PathBuf,
    pub metadata: PathBuf,
}

impl IndexPaths {
    /// Conventional layout inside a directory: `synonym_vectors.bin`,
    /// `index_header.json`, `index_metadata.json`.
    pub fn in_dir<P: Into<PathBuf>>(dir: P) -> Self {
        let dir = dir.into();
        Self {
            vectors: dir.join("synonym_vectors.bin"),
            header: dir.join("index_header.json"),
            metadata: dir.join("index_metadata.json"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexHeader {
    dim: usize,
    count: usize,
    model_name: String,
    model_hash: String,
}

struct IndexInner {
    /// Row-major `count * dim` matrix.
    vectors: Vec<f32>,
    meta: Vec<VectorMeta>,
    additions_since_save: usize,
}

/**
 * Append-only semantic index with a pluggable encoder
 *
 * DESIGN DECISION: RwLock around one flat vector matrix plus its metadata
 * WHY: Readers must never block on writers for long; appends are rare and
 * short while searches dominate
 *
 * REASONING CHAIN:
 * 1. Vectors live row-major in one Vec<f32>; position i is rows [i*dim, (i+1)*dim)
 * 2. Metadata is position-indexed and grows in lockstep with the matrix
 * 3. additions_since_save drives persistence every save_frequency appends
 * 4. The encoder sits behind a trait so a real embedding model can replace
 *    the shipped hashing projection without touching the index
 */
pub struct SemanticIndex {
    encoder: Arc<dyn TextEncoder>,
    dim: usize,
    inner: RwLock<IndexInner>,
    paths: Option<IndexPaths>,
    save_frequency: usize,
}

impl std::fmt::Debug for SemanticIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticIndex")
            .field("dim", &self.dim)
            .field("model_name", &self.encoder.model_name())
            .field("model_hash", &self.encoder.model_hash())
            .field("save_frequency", &self.save_frequency)
            .finish()
    }
}

impl SemanticIndex {
    /// Empty in-memory index.
    pub fn new(encoder: Arc<dyn TextEncoder>) -> Self {
        let dim = encoder.dim();
        Self {
            encoder,
            dim,
            inner: RwLock::new(IndexInner {
                vectors: Vec::new(),
                meta: Vec::new(),
                additions_since_save: 0,
            }),
            paths: None,
            save_frequency: 100,
        }
    }

    /// Open an index backed by disk files, loading them when present.
    /// A vector file written under a different model hash is refused: a
    /// model change means a full rebuild.
    pub fn open(
        encoder: Arc<dyn TextEncoder>,
        paths: IndexPaths,
        save_frequency: usize,
    ) -> Result<Self> {
        let mut index = Self::new(encoder);
        index.save_frequency = save_frequency.max(1);
        if paths.header.exists() {
            index.load(&paths)?;
        }
        index.paths = Some(paths);
        Ok(index)
    }

    fn load(&mut self, paths: &IndexPaths) -> Result<()> {
        let header_text = std::fs::read_to_string(&paths.header)
            .map_err(|e| Error::IndexUnavailable(format!("{}: {e}", paths.header.display())))?;
        let header: IndexHeader = serde_json::from_str(&header_text)
            .map_err(|e| Error::IndexUnavailable(format!("bad index header: {e}")))?;

        if header.model_hash != self.encoder.model_hash() {
            return Err(Error::IndexUnavailable(format!(
                "index was built with model {} ({}), active model is {} ({}); rebuild required",
                header.model_name,
                header.model_hash,
                self.encoder.model_name(),
                self.encoder.model_hash()
            )));
        }
        if header.dim != self.dim {
            return Err(Error::EncoderDimMismatch {
                expected: self.dim,
                actual: header.dim,
            });
        }

        let bytes = std::fs::read(&paths.vectors)
            .map_err(|e| Error::IndexUnavailable(format!("{}: {e}", paths.vectors.display())))?;
        let expected_len = header.count * header.dim * 4;
        if bytes.len() != expected_len {
            return Err(Error::IndexUnavailable(format!(
                "vector file holds {} bytes, header expects {expected_len}",
                bytes.len()
            )));
        }
        let vectors: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();

        let meta_text = std::fs::read_to_string(&paths.metadata)
            .map_err(|e| Error::IndexUnavailable(format!("{}: {e}", paths.metadata.display())))?;
        let meta: Vec<VectorMeta> = serde_json::from_str(&meta_text)
            .map_err(|e| Error::IndexUnavailable(format!("bad index metadata: {e}")))?;
        if meta.len() != header.count {
            return Err(Error::IndexUnavailable(format!(
                "metadata holds {} rows, header expects {}",
                meta.len(),
                header.count
            )));
        }

        let mut inner = self.inner.write().unwrap_or_else(|p| p.into_inner());
        inner.vectors = vectors;
        inner.meta = meta;
        inner.additions_since_save = 0;
        tracing::info!(
            count = header.count,
            model = header.model_name,
            "loaded semantic index"
        );
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|p| p.into_inner()).meta.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn model_name(&self) -> &str {
        self.encoder.model_name()
    }

    pub fn model_hash(&self) -> &str {
        self.encoder.model_hash()
    }

    pub fn encoder(&self) -> &Arc<dyn TextEncoder> {
        &self.encoder
    }

    /**
     * Append one text, returning the assigned position
     *
     * DESIGN DECISION: Positions are assigned densely in arrival order
     * WHY: Embeddings metadata completeness requires positions to form
     * [0, N) with no gaps, mirrored one-to-one in the store
     *
     * REASONING CHAIN:
     * 1. Encode outside the lock; verify dimensionality against the index
     * 2. Under the write lock: extend the matrix, push the metadata row
     * 3. Persist every save_frequency additions when disk paths exist;
     *    the lock is released first, so persist re-acquires cleanly
     */
    pub fn add(
        &self,
        text: &str,
        analyte_id: &str,
        preferred_name: &str,
        cas_number: Option<&str>,
        synonym_id: Option<i64>,
    ) -> Result<usize> {
        let vector = self.encoder.encode(text);
        if vector.len() != self.dim {
            return Err(Error::EncoderDimMismatch {
                expected: self.dim,
                actual: vector.len(),
            });
        }

        let position;
        let should_save;
        {
            let mut inner = self.inner.write().unwrap_or_else(|p| p.into_inner());
            position = inner.meta.len();
            inner.vectors.extend_from_slice(&vector);
            let meta = VectorMeta {
                position,
                text: text.to_string(),
                analyte_id: analyte_id.to_string(),
                preferred_name: preferred_name.to_string(),
                cas_number: cas_number.map(str::to_string),
                synonym_id,
                model_name: self.encoder.model_name().to_string(),
                model_hash: self.encoder.model_hash().to_string(),
            };
            inner.meta.push(meta);
            inner.additions_since_save += 1;
            should_save = self.paths.is_some() && inner.additions_since_save >= self.save_frequency;
        }

        if should_save {
            self.persist()?;
        }
        Ok(position)
    }

    /**
     * Nearest neighbors of `query_text` above `threshold`, best first
     *
     * DESIGN DECISION: Score every row, sort, truncate, then threshold
     * WHY: Thresholding after truncation keeps the hit list identical to
     * what a top-k ANN index would return for the same query
     *
     * REASONING CHAIN:
     * 1. Encode the (already normalized) query with the index's own encoder
     * 2. Dot products against every row under the read lock
     * 3. Clamp to [0, 1] to guard against floating-point overshoot
     * 4. Empty query or empty index: no hits, never an error
     */
    pub fn search(&self, query_text: &str, top_k: usize, threshold: f64) -> Vec<SemanticHit> {
        if query_text.is_empty() || top_k == 0 {
            return Vec::new();
        }
        let query = self.encoder.encode(query_text);
        let inner = self.inner.read().unwrap_or_else(|p| p.into_inner());
        if inner.meta.is_empty() {
            return Vec::new();
        }

        let mut hits: Vec<(f32, usize)> = inner
            .vectors
            .chunks_exact(self.dim)
            .enumerate()
            .map(|(position, row)| {
                let score: f32 = row.iter().zip(&query).map(|(a, b)| a * b).sum();
                (score, position)
            })
            .collect();
        hits.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);

        hits.into_iter()
            .filter_map(|(score, position)| {
                let clamped = score.clamp(0.0, 1.0);
                if f64::from(clamped) < threshold {
                    return None;
                }
                Some(SemanticHit {
                    position,
                    score: clamped,
                    meta: inner.meta[position].clone(),
                })
            })
            .collect()
    }

    /// Search and convert hits into cascade candidates.
    pub fn search_matches(&self, query_text: &str, top_k: usize, threshold: f64) -> Vec<Match> {
        self.search(query_text, top_k, threshold)
            .into_iter()
            .filter_map(|hit| {
                Match::new(
                    hit.meta.analyte_id.clone(),
                    hit.meta.preferred_name.clone(),
                    f64::from(hit.score),
                    MethodTag::Semantic,
                    f64::from(hit.score),
                )
                .ok()
                .map(|m| {
                    m.with_meta("cosine_similarity", json!(hit.score))
                        .with_meta("position", json!(hit.position))
                        .with_meta("synonym_norm", json!(hit.meta.text))
                })
            })
            .collect()
    }

    /// Write the vector file, header, and metadata side-file.
    pub fn persist(&self) -> Result<()> {
        let Some(paths) = &self.paths else {
            return Err(Error::IndexUnavailable(
                "index has no configured disk paths".into(),
            ));
        };
        let mut inner = self.inner.write().unwrap_or_else(|p| p.into_inner());

        for path in [&paths.vectors, &paths.header, &paths.metadata] {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| Error::Io(format!("creating {}: {e}", parent.display())))?;
                }
            }
        }

        let mut bytes = Vec::with_capacity(inner.vectors.len() * 4);
        for value in &inner.vectors {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        std::fs::write(&paths.vectors, &bytes)
            .map_err(|e| Error::Io(format!("{}: {e}", paths.vectors.display())))?;

        let header = IndexHeader {
            dim: self.dim,
            count: inner.meta.len(),
            model_name: self.encoder.model_name().to_string(),
            model_hash: self.encoder.model_hash().to_string(),
        };
        std::fs::write(&paths.header, serde_json::to_string_pretty(&header)?)
            .map_err(|e| Error::Io(format!("{}: {e}", paths.header.display())))?;
        std::fs::write(&paths.metadata, serde_json::to_string(&inner.meta)?)
            .map_err(|e| Error::Io(format!("{}: {e}", paths.metadata.display())))?;

        inner.additions_since_save = 0;
        tracing::debug!(count = inner.meta.len(), "persisted semantic index");
        Ok(())
    }

    /// Encode every synonym in the store into a fresh index and mirror each
    /// position into `embeddings_metadata`. Bootstrap-time operation.
    pub fn build_from_corpus(&self, store: &SqliteStore) -> Result<usize> {
        let synonyms = store.all_synonyms()?;
        let mut added = 0;
        for synonym in synonyms {
            let Some(analyte) = store.analyte(&synonym.analyte_id)? else {
                continue;
            };
            let position = self.add(
                &synonym.normalized,
                &analyte.analyte_id,
                &analyte.preferred_name,
                analyte.cas_number.as_deref(),
                Some(synonym.id),
            )?;
            store.insert_embedding_metadata(&EmbeddingMetaRow {
                analyte_id: None,
                synonym_id: Some(synonym.id),
                text_content: synonym.normalized.clone(),
                position: position as i64,
                model_name: self.encoder.model_name().to_string(),
                model_hash: self.encoder.model_hash().to_string(),
            })?;
            added += 1;
        }
        Ok(added)
    }
}
