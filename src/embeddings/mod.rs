//! Embedding capability (spec.md §1, SPEC_FULL.md E): the retrieval core
//! depends on a normalized-vector embedder but does not bundle one — no
//! model loading, no ONNX/tokenizers runtime. A host wires in a concrete
//! `Embedder` the way the teacher wires in its `ModelRouter`, just swapped
//! for a trait narrow enough to fake in tests.

use async_trait::async_trait;

use crate::error::Result;

/// Produces L2-normalized embedding vectors for a batch of texts, one
/// vector per input in the same order. Implementations are expected to
/// return unit vectors so that `VectorStoreAdapter::query`'s cosine
/// similarity from stored distance is meaningful (spec.md §4.6).
#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimension(&self) -> usize;

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed(&[text.to_string()]).await?.remove(0))
    }
}

/// Deterministic test fake: hashes each text to a unit vector on the unit
/// sphere in `dimension` dimensions. Never loads a model; exists purely so
/// `search::hybrid` and `processor` tests can exercise the pipeline without
/// the ambient stack's real embedding runtime.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn hash_vector(&self, text: &str) -> Vec<f32> {
        use sha2::{Digest, Sha256};
        let mut vector = vec![0.0f32; self.dimension];
        let mut seed = text.as_bytes().to_vec();

        let mut i = 0;
        while i < self.dimension {
            let digest = Sha256::digest(&seed);
            for chunk in digest.chunks(4) {
                if i >= self.dimension {
                    break;
                }
                let mut bytes = [0u8; 4];
                bytes[..chunk.len()].copy_from_slice(chunk);
                let raw = u32::from_le_bytes(bytes);
                vector[i] = (raw as f64 / u32::MAX as f64) as f32 - 0.5;
                i += 1;
            }
            seed = digest.to_vec();
        }

        let norm = vector.iter().map(|v| (*v as f64).powi(2)).sum::<f64>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v = (*v as f64 / norm) as f32;
            }
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.hash_vector(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn embeddings_are_deterministic_and_unit_length() {
        let embedder = HashEmbedder::new(16);
        let a = embedder.embed_one("hello world").await.unwrap();
        let b = embedder.embed_one("hello world").await.unwrap();
        assert_eq!(a, b);

        let norm: f64 = a.iter().map(|v| (*v as f64).powi(2)).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn distinct_texts_embed_differently() {
        let embedder = HashEmbedder::new(16);
        let a = embedder.embed_one("alpha").await.unwrap();
        let b = embedder.embed_one("beta").await.unwrap();
        assert_ne!(a, b);
    }
}
