/*!
 * Text Encoder Module
 *
 * DESIGN DECISION: A trait seam with a deterministic hashing projection shipped
 * WHY: The crate performs no model training; the index, its persistence
 * format, and the incremental-learning path must still run end to end
 * without an external embedding model
 *
 * REASONING CHAIN:
 * 1. TextEncoder is where a real sentence-embedding model plugs in
 * 2. Implementations must be pure: same text, same vector, across
 *    processes and platforms
 * 3. NgramHashEncoder hashes character n-grams with FNV-1a into a fixed
 *    dimension with a sign bit, then L2-normalizes
 * 4. Similar surface forms share most n-grams and land close under inner
 *    product, which is all the cascade's semantic signal requires
 *
 * RELATED: semantic/mod.rs (index), resolver.rs step 3
 */

use sha2::{Digest, Sha256};

/// Dimensionality of the shipped encoder.
pub const EMBEDDING_DIM: usize = 384;

/// A deterministic text-to-vector encoder. Implementations must be pure:
/// the same text always encodes to the same vector, across processes and
/// platforms, and the output is L2-normalized (or all zeros for degenerate
/// input).
pub trait TextEncoder: Send + Sync {
    fn encode(&self, text: &str) -> Vec<f32>;
    fn dim(&self) -> usize;
    fn model_name(&self) -> &str;
    /// Stable hash identifying the model; pinned in every decision row and
    /// metadata row. A changed hash means a full index rebuild.
    fn model_hash(&self) -> &str;
}

/// Character n-gram feature-hashing encoder.
///
/// Each 2-, 3-, and 4-gram of the padded, lowercased text is hashed with
/// FNV-1a; the hash selects a dimension and a sign, and the accumulated
/// vector is L2-normalized. Similar surface forms share most n-grams and
/// land close under inner product.
#[derive(Debug, Clone)]
pub struct NgramHashEncoder {
    dim: usize,
    name: String,
    hash: String,
}

impl NgramHashEncoder {
    pub fn new() -> Self {
        Self::with_dim(EMBEDDING_DIM)
    }

    pub fn with_dim(dim: usize) -> Self {
        let name = "char-ngram-hash-v1".to_string();
        let mut hasher = Sha256::new();
        hasher.update(name.as_bytes());
        hasher.update(dim.to_le_bytes());
        let hash = hex::encode(hasher.finalize())[..16].to_string();
        Self { dim, name, hash }
    }
}

impl Default for NgramHashEncoder {
    fn default() -> Self {
        Self::new()
    }
}

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

impl TextEncoder for NgramHashEncoder {
    fn encode(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dim];
        let lowered = text.to_lowercase();
        if lowered.trim().is_empty() {
            return vector;
        }
        let padded: Vec<char> = std::iter::once(' ')
            .chain(lowered.chars())
            .chain(std::iter::once(' '))
            .collect();

        for n in 2..=4 {
            if padded.len() < n {
                continue;
            }
            for window in padded.windows(n) {
                let gram: String = window.iter().collect();
                let h = fnv1a(gram.as_bytes());
                let idx = (h % self.dim as u64) as usize;
                let sign = if (h >> 63) & 1 == 0 { 1.0 } else { -1.0 };
                vector[idx] += sign;
            }
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn model_name(&self) -> &str {
        &self.name
    }

    fn model_hash(&self) -> &str {
        &self.hash
    }
}
