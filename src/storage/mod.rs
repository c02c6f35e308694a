//! Vector store adapter (spec.md §4.6, Design Notes §9): a capability trait
//! over an external cosine-space ANN store, one production implementation
//! (`LanceVectorStore`, wrapping `lancedb`) and one in-memory fake used by
//! tests and hosts that don't need persistence.

pub mod vector_store;

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::Result;
use crate::types::ChunkMetadata;

pub use vector_store::LanceVectorStore;

/// One record stored alongside its embedding (spec.md §3 "Dense collection").
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
    pub vector: Vec<f32>,
}

/// A single ANN match: cosine similarity already converted from distance
/// (`similarity = 1 - distance`, spec.md §4.6).
#[derive(Debug, Clone)]
pub struct VectorMatch {
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
    pub similarity: f64,
}

/// Collection name for a subject: `"sentinel_" + subject_id` with `-`
/// substituted for `_` (spec.md §4.6).
pub fn collection_name(subject_id: &str) -> String {
    format!("sentinel_{}", subject_id.replace('-', "_"))
}

#[async_trait]
pub trait VectorStoreAdapter: Send + Sync {
    /// Adds records to a subject's collection, creating it on first use.
    /// `ids` must be unique within the collection.
    async fn add(&self, subject_id: &str, records: Vec<VectorRecord>) -> Result<()>;

    /// Cosine kNN, `k` nearest by similarity descending.
    async fn query(&self, subject_id: &str, vector: &[f32], k: usize) -> Result<Vec<VectorMatch>>;

    /// All records whose metadata carries the given `document_id`.
    async fn get_by_document(&self, subject_id: &str, document_id: &str) -> Result<Vec<VectorRecord>>;

    /// Every record in a subject's collection, in id order. Used to rebuild
    /// the BM25 index from the dense store on startup (spec.md §5).
    async fn list_chunks(&self, subject_id: &str) -> Result<Vec<VectorRecord>>;

    /// Deletes the given ids from a subject's collection. Missing ids are tolerated.
    async fn delete(&self, subject_id: &str, ids: &[String]) -> Result<()>;

    /// Number of records currently stored for a subject.
    async fn count(&self, subject_id: &str) -> Result<usize>;

    /// All subjects with at least one collection created.
    async fn list_subjects(&self) -> Result<Vec<String>>;
}

/// Brute-force cosine kNN over an in-process map, keyed by subject. Used by
/// tests and by hosts that don't want a LanceDB dependency (SPEC_FULL.md E).
#[derive(Default)]
pub struct InMemoryVectorStore {
    subjects: RwLock<HashMap<String, HashMap<String, VectorRecord>>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| *x as f64 * *y as f64).sum();
    let norm_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[async_trait]
impl VectorStoreAdapter for InMemoryVectorStore {
    async fn add(&self, subject_id: &str, records: Vec<VectorRecord>) -> Result<()> {
        let mut subjects = self.subjects.write();
        let collection = subjects.entry(subject_id.to_string()).or_default();
        for record in records {
            collection.insert(record.id.clone(), record);
        }
        Ok(())
    }

    async fn query(&self, subject_id: &str, vector: &[f32], k: usize) -> Result<Vec<VectorMatch>> {
        let subjects = self.subjects.read();
        let Some(collection) = subjects.get(subject_id) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<(f64, &VectorRecord)> = collection
            .values()
            .map(|r| (cosine_similarity(vector, &r.vector), r))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(similarity, r)| VectorMatch {
                id: r.id.clone(),
                text: r.text.clone(),
                metadata: r.metadata.clone(),
                similarity: similarity.clamp(-1.0, 1.0),
            })
            .collect())
    }

    async fn get_by_document(&self, subject_id: &str, document_id: &str) -> Result<Vec<VectorRecord>> {
        let subjects = self.subjects.read();
        let Some(collection) = subjects.get(subject_id) else {
            return Ok(Vec::new());
        };
        Ok(collection
            .values()
            .filter(|r| r.metadata.get("document_id").map(String::as_str) == Some(document_id))
            .cloned()
            .collect())
    }

    async fn list_chunks(&self, subject_id: &str) -> Result<Vec<VectorRecord>> {
        let subjects = self.subjects.read();
        let Some(collection) = subjects.get(subject_id) else {
            return Ok(Vec::new());
        };
        let mut records: Vec<VectorRecord> = collection.values().cloned().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }

    async fn delete(&self, subject_id: &str, ids: &[String]) -> Result<()> {
        let mut subjects = self.subjects.write();
        if let Some(collection) = subjects.get_mut(subject_id) {
            for id in ids {
                collection.remove(id);
            }
        }
        Ok(())
    }

    async fn count(&self, subject_id: &str) -> Result<usize> {
        Ok(self.subjects.read().get(subject_id).map(|c| c.len()).unwrap_or(0))
    }

    async fn list_subjects(&self) -> Result<Vec<String>> {
        Ok(self.subjects.read().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, vector: Vec<f32>, document_id: &str) -> VectorRecord {
        let mut metadata = HashMap::new();
        metadata.insert("document_id".to_string(), document_id.to_string());
        VectorRecord { id: id.to_string(), text: format!("text-{id}"), metadata, vector }
    }

    #[tokio::test]
    async fn query_ranks_by_cosine_similarity() {
        let store = InMemoryVectorStore::new();
        store
            .add(
                "networks",
                vec![
                    record("a", vec![1.0, 0.0], "doc1"),
                    record("b", vec![0.0, 1.0], "doc1"),
                ],
            )
            .await
            .unwrap();

        let results = store.query("networks", &[1.0, 0.0], 2).await.unwrap();
        assert_eq!(results[0].id, "a");
        assert!(results[0].similarity > results[1].similarity);
    }

    #[tokio::test]
    async fn delete_by_document_removes_all_its_chunks() {
        let store = InMemoryVectorStore::new();
        store
            .add(
                "networks",
                vec![record("a", vec![1.0, 0.0], "doc1"), record("b", vec![0.0, 1.0], "doc2")],
            )
            .await
            .unwrap();

        let doc1_ids: Vec<String> = store
            .get_by_document("networks", "doc1")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        store.delete("networks", &doc1_ids).await.unwrap();

        assert_eq!(store.count("networks").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unknown_subject_queries_return_empty() {
        let store = InMemoryVectorStore::new();
        assert!(store.query("ghost", &[1.0], 5).await.unwrap().is_empty());
    }
}
