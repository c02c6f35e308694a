//! Top-level orchestrator (spec.md §4.8): ties PDF extraction, chunking,
//! embedding, and the two indices together behind a per-subject registry.
//!
//! Concurrency model (spec.md §5, Design Notes §9): each subject owns an
//! exclusive-write/shared-read lock around its `Bm25Index`; the dense store
//! is a single shared, internally-synchronized client (`Arc<dyn
//! VectorStoreAdapter>`). This replaces the teacher's single global
//! `Mutex`-guarded map (`space.rs`) with one lock per subject, since BM25
//! writes for unrelated subjects must not contend.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use crate::config::RetrievalConfig;
use crate::embeddings::Embedder;
use crate::error::{RetrievalError, Result};
use crate::processing;
use crate::reranking::CrossEncoder;
use crate::search::{self, Bm25Index};
use crate::storage::{VectorRecord, VectorStoreAdapter};
use crate::types::{Chunk, DocumentSummary, ProcessingStats, SearchResponse};

struct Subject {
    bm25: RwLock<Bm25Index>,
}

impl Subject {
    fn new() -> Self {
        Self { bm25: RwLock::new(Bm25Index::new()) }
    }
}

/// Owns the per-subject BM25 registry and coordinates it with the shared
/// dense store, embedder, and optional reranker.
pub struct Processor {
    vector_store: Arc<dyn VectorStoreAdapter>,
    embedder: Arc<dyn Embedder>,
    cross_encoder: Option<Arc<dyn CrossEncoder>>,
    config: RetrievalConfig,
    subjects: RwLock<HashMap<String, Arc<Subject>>>,
}

impl Processor {
    pub fn new(
        vector_store: Arc<dyn VectorStoreAdapter>,
        embedder: Arc<dyn Embedder>,
        cross_encoder: Option<Arc<dyn CrossEncoder>>,
        config: RetrievalConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            vector_store,
            embedder,
            cross_encoder,
            config,
            subjects: RwLock::new(HashMap::new()),
        })
    }

    /// Rebuilds every subject's BM25 index from the dense store's metadata
    /// on startup (spec.md §5, Design Notes §9 — BM25 holds no persistent
    /// state of its own, so it must be reconstructed from the source of
    /// truth before any search is served).
    pub async fn rebuild_bm25_indices(&self) -> Result<()> {
        let subject_ids = self.vector_store.list_subjects().await?;
        for subject_id in subject_ids {
            let records = self.vector_store.list_chunks(&subject_id).await?;
            let subject = self.subject_for(&subject_id).await;
            let mut bm25 = subject.bm25.write().await;
            bm25.clear();
            for record in records {
                bm25.add_document(&record.id, &record.text, record.metadata);
            }
        }
        Ok(())
    }

    async fn subject_for(&self, subject_id: &str) -> Arc<Subject> {
        if let Some(subject) = self.subjects.read().await.get(subject_id) {
            return subject.clone();
        }
        let mut subjects = self.subjects.write().await;
        subjects
            .entry(subject_id.to_string())
            .or_insert_with(|| Arc::new(Subject::new()))
            .clone()
    }

    /// Extracts, chunks, embeds, and atomically indexes one document
    /// (spec.md §4.8). Chunk ids are `"{document_id}_{i}"` in page-then-
    /// positional traversal order.
    pub async fn process_document(
        &self,
        content: &[u8],
        filename: &str,
        document_id: &str,
        subject_id: &str,
    ) -> Result<ProcessingStats> {
        if subject_id.trim().is_empty() {
            return Err(RetrievalError::validation("subject_id must not be empty"));
        }
        if document_id.trim().is_empty() {
            return Err(RetrievalError::validation("document_id must not be empty"));
        }

        let (chunks, stats) = processing::process_bytes(content, filename, &self.config.chunking)?;
        if chunks.is_empty() {
            return Ok(stats);
        }

        let ids: Vec<String> = (0..chunks.len()).map(|i| format!("{document_id}_{i}")).collect();
        let embed_texts: Vec<String> = chunks.iter().map(embed_text).collect();
        let embeddings = self.embedder.embed(&embed_texts).await?;

        let records: Vec<VectorRecord> = ids
            .iter()
            .zip(&chunks)
            .zip(embeddings)
            .map(|((id, chunk), vector)| VectorRecord {
                id: id.clone(),
                text: chunk.text.clone(),
                metadata: chunk_metadata(chunk, document_id),
                vector,
            })
            .collect();

        // Hold the subject's BM25 write lock across both writes so a
        // concurrent search (which takes the same lock for its read) never
        // observes the dense store's new chunks before BM25 knows them too
        // (spec.md §5 — a search sees all of a document's chunks or none).
        let subject = self.subject_for(subject_id).await;
        let mut bm25 = subject.bm25.write().await;

        self.vector_store.add(subject_id, records).await?;

        for (id, chunk) in ids.iter().zip(&chunks) {
            bm25.add_document(id, &chunk.text, chunk_metadata(chunk, document_id));
        }
        drop(bm25);

        info!(subject_id, document_id, chunks = chunks.len(), "document indexed");
        Ok(stats)
    }

    /// Removes every chunk belonging to `document_id` from both indices,
    /// returning the number of ids deleted (spec.md §6 — `{deleted_ids:
    /// int}`). Compensates by re-adding to BM25 if the dense delete fails
    /// after BM25 removal already happened, and is a no-op if the document
    /// has no chunks in this subject.
    pub async fn delete_document(&self, subject_id: &str, document_id: &str) -> Result<usize> {
        let records = self.vector_store.get_by_document(subject_id, document_id).await?;
        if records.is_empty() {
            return Ok(0);
        }
        let ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
        let deleted_count = ids.len();

        let subject = self.subject_for(subject_id).await;
        let mut bm25 = subject.bm25.write().await;

        let mut removed = Vec::with_capacity(ids.len());
        for record in &records {
            bm25.remove_document(&record.id)?;
            removed.push(record);
        }

        match self.vector_store.delete(subject_id, &ids).await {
            Ok(()) => Ok(deleted_count),
            Err(e) => {
                for record in removed {
                    bm25.add_document(&record.id, &record.text, record.metadata.clone());
                }
                Err(e)
            }
        }
    }

    /// Unique documents in a subject with per-document chunk counts and the
    /// distinct chunk types seen (spec.md §4.8, mirroring the reference
    /// `list_documents`'s group-by over stored metadata).
    pub async fn list_documents(&self, subject_id: &str) -> Result<Vec<DocumentSummary>> {
        let records = self.vector_store.list_chunks(subject_id).await?;

        let mut by_document: HashMap<String, DocumentSummary> = HashMap::new();
        let mut type_seen: HashMap<String, std::collections::BTreeSet<String>> = HashMap::new();

        for record in records {
            let document_id = record
                .metadata
                .get("document_id")
                .cloned()
                .unwrap_or_else(|| "unknown".to_string());
            let filename = record.metadata.get("filename").cloned().unwrap_or_else(|| "unknown".to_string());
            let chunk_type = record.metadata.get("chunk_type").cloned().unwrap_or_else(|| "paragraph".to_string());

            let summary = by_document.entry(document_id.clone()).or_insert_with(|| DocumentSummary {
                document_id: document_id.clone(),
                filename,
                chunk_count: 0,
                chunk_types: Vec::new(),
            });
            summary.chunk_count += 1;
            type_seen.entry(document_id).or_default().insert(chunk_type);
        }

        let mut summaries: Vec<DocumentSummary> = by_document.into_values().collect();
        for summary in &mut summaries {
            summary.chunk_types = type_seen
                .get(&summary.document_id)
                .into_iter()
                .flatten()
                .filter_map(|t| match t.as_str() {
                    "code" => Some(crate::types::ChunkType::Code),
                    "table" => Some(crate::types::ChunkType::Table),
                    "semantic" => Some(crate::types::ChunkType::Semantic),
                    _ => Some(crate::types::ChunkType::Paragraph),
                })
                .collect();
        }
        Ok(summaries)
    }

    pub async fn search(
        &self,
        subject_id: &str,
        query: &str,
        limit: usize,
        use_expansion: bool,
        use_reranking: bool,
    ) -> Result<SearchResponse> {
        if query.trim().is_empty() {
            return Err(RetrievalError::validation("query must not be empty"));
        }
        let limit = limit.clamp(1, self.config.search.max_results_per_search);

        let total_chunks = self.vector_store.count(subject_id).await?;
        let subject = self.subject_for(subject_id).await;
        let bm25 = subject.bm25.read().await;

        search::search(
            subject_id,
            query,
            limit,
            use_expansion,
            use_reranking,
            total_chunks,
            &bm25,
            self.vector_store.as_ref(),
            self.embedder.as_ref(),
            self.cross_encoder.as_deref(),
            &self.config.search,
        )
        .await
    }
}

fn embed_text(chunk: &Chunk) -> String {
    let prefix = chunk.context_prefix();
    if prefix.is_empty() {
        chunk.text.clone()
    } else {
        format!("{prefix}: {}", chunk.text)
    }
}

fn chunk_metadata(chunk: &Chunk, document_id: &str) -> HashMap<String, String> {
    let mut metadata = HashMap::new();
    metadata.insert("document_id".to_string(), document_id.to_string());
    metadata.insert("page".to_string(), chunk.page.to_string());
    metadata.insert("filename".to_string(), chunk.filename.clone());
    metadata.insert("header".to_string(), chunk.header.clone().unwrap_or_default());
    metadata.insert("parent_header".to_string(), chunk.parent_header.clone().unwrap_or_default());
    metadata.insert("chunk_type".to_string(), chunk.chunk_type.as_str().to_string());
    metadata.insert("importance".to_string(), chunk.importance_score.to_string());
    metadata.insert("sentence_count".to_string(), chunk.sentence_count.to_string());
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashEmbedder;
    use crate::storage::InMemoryVectorStore;
    use proptest::prelude::*;

    fn tiny_pdf_bytes(text: &str) -> Vec<u8> {
        // Minimal content-stream-bearing PDF good enough for the manual
        // Tj/ET walk in `processing::pdf`.
        format!(
            "%PDF-1.4\n1 0 obj<</Type/Catalog/Pages 2 0 R>>endobj\n2 0 obj<</Type/Pages/Kids[3 0 R]/Count 1>>endobj\n3 0 obj<</Type/Page/Parent 2 0 R/Contents 4 0 R/Resources<</Font<</F1 5 0 R>>>>>>endobj\n4 0 obj<</Length 100>>stream\nBT\n/F1 12 Tf\n({text}) Tj\nET\nendstream\nendobj\n5 0 obj<</Type/Font/BaseFont/Helvetica>>endobj\ntrailer<</Root 1 0 R>>\n"
        )
        .into_bytes()
    }

    fn processor() -> Processor {
        Processor::new(
            Arc::new(InMemoryVectorStore::new()),
            Arc::new(HashEmbedder::new(16)),
            None,
            RetrievalConfig { embedding_dimension: 16, ..RetrievalConfig::default() },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn process_document_indexes_into_both_stores() {
        let processor = processor();
        let bytes = tiny_pdf_bytes("Packet routing across layered networks is fundamental.");

        let stats = processor
            .process_document(&bytes, "doc.pdf", "doc-1", "networks")
            .await
            .unwrap();
        assert_eq!(stats.page_count, 1);
        assert!(stats.chunk_count > 0);

        let dense_count = processor.vector_store.count("networks").await.unwrap();
        assert_eq!(dense_count, stats.chunk_count);
    }

    #[tokio::test]
    async fn delete_document_removes_from_both_indices() {
        let processor = processor();
        let bytes = tiny_pdf_bytes("Packet routing across layered networks is fundamental.");
        let stats = processor.process_document(&bytes, "doc.pdf", "doc-1", "networks").await.unwrap();

        let deleted = processor.delete_document("networks", "doc-1").await.unwrap();
        assert_eq!(deleted, stats.chunk_count);
        assert_eq!(processor.vector_store.count("networks").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_document_with_no_chunks_returns_zero() {
        let processor = processor();
        let deleted = processor.delete_document("networks", "ghost-doc").await.unwrap();
        assert_eq!(deleted, 0);
    }

    #[tokio::test]
    async fn search_rejects_empty_query() {
        let processor = processor();
        let err = processor.search("networks", "   ", 5, true, false).await.unwrap_err();
        assert!(matches!(err, RetrievalError::Validation(_)));
    }

    #[tokio::test]
    async fn search_returns_empty_for_unindexed_subject() {
        let processor = processor();
        let response = processor.search("ghost", "routing", 5, true, false).await.unwrap();
        assert_eq!(response.search_method, "none");
        assert!(response.matches.is_empty());
    }

    proptest! {
        /// `process_document` then `delete_document` returns the subject to
        /// its prior (empty) state id-wise, for arbitrary document bodies
        /// long enough to yield at least one chunk (spec.md §8).
        #[test]
        fn process_then_delete_restores_prior_state(
            body in "[a-zA-Z ]{120,400}",
        ) -> std::result::Result<(), TestCaseError> {
            futures::executor::block_on(async {
                let processor = processor();
                let bytes = tiny_pdf_bytes(&body);

                let stats = processor
                    .process_document(&bytes, "doc.pdf", "doc-1", "networks")
                    .await
                    .unwrap();
                let before_count = processor.vector_store.count("networks").await.unwrap();
                prop_assert_eq!(before_count, stats.chunk_count);

                processor.delete_document("networks", "doc-1").await.unwrap();
                let after_count = processor.vector_store.count("networks").await.unwrap();
                prop_assert_eq!(after_count, 0);
                Ok(())
            })
        }
    }
}
