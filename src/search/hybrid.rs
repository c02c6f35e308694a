//! Hybrid retrieval engine (spec.md §4.7): expansion, parallel dense+sparse
//! search, Reciprocal Rank Fusion, importance weighting, and optional
//! cross-encoder rerank with graceful fallback. Grounded in the reference
//! `VectorStore.search` pipeline, restructured around the capability traits
//! (`VectorStoreAdapter`, `Embedder`, `CrossEncoder`) instead of bundled
//! ChromaDB/sentence-transformers clients.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::config::SearchConfig;
use crate::embeddings::Embedder;
use crate::error::Result;
use crate::reranking::CrossEncoder;
use crate::storage::{VectorStoreAdapter, VectorMatch};
use crate::types::{ChunkType, SearchMatch, SearchResponse};

use super::bm25::Bm25Index;
use super::expander;

struct Candidate {
    id: String,
    text: String,
    metadata: HashMap<String, String>,
    vector_score: f64,
    rrf_score: f64,
    importance: f64,
    score: f64,
}

/// RRF Score = Σ weight / (rrf_k + rank), rank 1-based (spec.md §4.7).
fn reciprocal_rank_fusion(
    vector_results: &[(String, f64)],
    bm25_results: &[(String, f64)],
    vector_weight: f64,
    bm25_weight: f64,
    rrf_k: f64,
) -> HashMap<String, f64> {
    let mut fused: HashMap<String, f64> = HashMap::new();

    for (rank, (id, _)) in vector_results.iter().enumerate() {
        *fused.entry(id.clone()).or_insert(0.0) += vector_weight / (rrf_k + (rank + 1) as f64);
    }
    for (rank, (id, _)) in bm25_results.iter().enumerate() {
        *fused.entry(id.clone()).or_insert(0.0) += bm25_weight / (rrf_k + (rank + 1) as f64);
    }

    fused
}

fn parse_importance(metadata: &HashMap<String, String>) -> f64 {
    metadata
        .get("importance")
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(1.0)
}

fn parse_chunk_type(metadata: &HashMap<String, String>) -> Option<ChunkType> {
    match metadata.get("chunk_type").map(String::as_str) {
        Some("code") => Some(ChunkType::Code),
        Some("table") => Some(ChunkType::Table),
        Some("semantic") => Some(ChunkType::Semantic),
        Some("paragraph") => Some(ChunkType::Paragraph),
        _ => None,
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Runs the full pipeline for one subject. `total_chunks` is the dense
/// store's current count for the subject; callers get it from
/// `VectorStoreAdapter::count` before calling.
#[allow(clippy::too_many_arguments)]
pub async fn search(
    subject_id: &str,
    query: &str,
    limit: usize,
    use_expansion: bool,
    use_reranking: bool,
    total_chunks: usize,
    bm25: &Bm25Index,
    vector_store: &dyn VectorStoreAdapter,
    embedder: &dyn Embedder,
    cross_encoder: Option<&dyn CrossEncoder>,
    config: &SearchConfig,
) -> Result<SearchResponse> {
    if total_chunks == 0 {
        return Ok(SearchResponse {
            matches: Vec::new(),
            total_searched: 0,
            search_method: "none".to_string(),
            query_expanded: false,
        });
    }

    let search_query = if use_expansion {
        expander::expand(query, Some(subject_id))
    } else {
        query.to_string()
    };
    let query_expanded = search_query != query;

    let candidate_count = (limit * 4).min(total_chunks).min(20).max(1);

    let query_embedding = embedder.embed_one(&search_query).await?;
    let vector_matches = vector_store.query(subject_id, &query_embedding, candidate_count).await?;

    let mut vector_ranked: Vec<(String, f64)> = Vec::with_capacity(vector_matches.len());
    let mut docs: HashMap<String, VectorMatch> = HashMap::new();
    for m in vector_matches {
        vector_ranked.push((m.id.clone(), m.similarity));
        docs.insert(m.id.clone(), m);
    }

    let bm25_ranked = bm25.search(&search_query, candidate_count);
    for (doc_id, _) in &bm25_ranked {
        if !docs.contains_key(doc_id) {
            if let Some(text) = bm25.doc_text(doc_id) {
                docs.insert(
                    doc_id.clone(),
                    VectorMatch {
                        id: doc_id.clone(),
                        text: text.to_string(),
                        metadata: bm25.metadata(doc_id).cloned().unwrap_or_default(),
                        similarity: 0.0,
                    },
                );
            }
        }
    }

    let fused = reciprocal_rank_fusion(
        &vector_ranked,
        &bm25_ranked,
        config.vector_weight as f64,
        config.bm25_weight as f64,
        config.rrf_k as f64,
    );
    let mut fused_ranked: Vec<(String, f64)> = fused.into_iter().collect();
    fused_ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.0.cmp(&b.0))
    });
    fused_ranked.truncate(candidate_count);

    let mut candidates: Vec<Candidate> = Vec::with_capacity(fused_ranked.len());
    for (doc_id, rrf_score) in fused_ranked {
        let Some(doc) = docs.get(&doc_id) else { continue };
        let importance = parse_importance(&doc.metadata);
        let rrf_score = round_to(rrf_score, 6);
        candidates.push(Candidate {
            id: doc_id,
            text: doc.text.clone(),
            metadata: doc.metadata.clone(),
            vector_score: round_to(doc.similarity, 4),
            rrf_score,
            importance,
            score: round_to(rrf_score * importance, 6),
        });
    }

    let (final_candidates, search_method) = if use_reranking && candidates.len() > 1 {
        if let Some(cross_encoder) = cross_encoder {
            let texts: Vec<String> =
                candidates.iter().map(|c| c.text.chars().take(512).collect()).collect();

            match cross_encoder.score(query, &texts).await {
                Ok(scores) => {
                    let mut scored: Vec<(Candidate, f64)> =
                        candidates.into_iter().zip(scores).collect();
                    scored.sort_by(|a, b| {
                        b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal)
                    });
                    scored.truncate(limit);
                    let reranked: Vec<Candidate> = scored
                        .into_iter()
                        .map(|(mut c, rerank_score)| {
                            c.score = rerank_score;
                            c
                        })
                        .collect();
                    (reranked, "hybrid+rerank")
                }
                Err(e) => {
                    warn!(error = %e, "reranking failed, falling back to fused ranking");
                    candidates.truncate(limit);
                    (candidates, "hybrid")
                }
            }
        } else {
            candidates.truncate(limit);
            (candidates, "hybrid")
        }
    } else {
        candidates.truncate(limit);
        (candidates, "hybrid")
    };

    let matches: Vec<SearchMatch> = final_candidates
        .into_iter()
        .map(|c| SearchMatch {
            text: c.text,
            page: c.metadata.get("page").and_then(|p| p.parse().ok()).unwrap_or(0),
            filename: c.metadata.get("filename").cloned().unwrap_or_default(),
            score: round_to(c.score, 4),
            header: c.metadata.get("header").filter(|h| !h.is_empty()).cloned(),
            chunk_type: parse_chunk_type(&c.metadata),
            vector_score: Some(c.vector_score),
            rrf_score: Some(c.rrf_score),
        })
        .collect();

    debug!(
        subject_id,
        search_method,
        matches = matches.len(),
        total_chunks,
        "hybrid search completed"
    );

    Ok(SearchResponse {
        matches,
        total_searched: total_chunks,
        search_method: search_method.to_string(),
        query_expanded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    #[test]
    fn rrf_combines_both_lists_additively() {
        let vector = vec![("a".to_string(), 0.9), ("b".to_string(), 0.5)];
        let bm25 = vec![("b".to_string(), 3.0), ("a".to_string(), 1.0)];
        let fused = reciprocal_rank_fusion(&vector, &bm25, 0.6, 0.4, 60.0);

        assert!(fused.contains_key("a"));
        assert!(fused.contains_key("b"));
        // a is rank 1 in vector and rank 2 in bm25; b is rank 2 in vector and rank 1 in bm25.
        let expected_a = 0.6 / 61.0 + 0.4 / 62.0;
        assert!((fused["a"] - expected_a).abs() < 1e-9);
    }

    #[test]
    fn rounding_matches_documented_precision() {
        assert_eq!(round_to(0.123456789, 4), 0.1235);
        assert_eq!(round_to(0.123456789, 6), 0.123457);
    }

    struct FixedScoreReranker(f64);

    #[async_trait]
    impl CrossEncoder for FixedScoreReranker {
        async fn score(&self, _query: &str, candidates: &[String]) -> Result<Vec<f64>> {
            Ok(vec![self.0; candidates.len()])
        }
    }

    /// spec.md §4.7 step 9: the final returned `score` is the reranker's
    /// score when reranking ran, not the stale pre-rerank `rrf * importance`
    /// value.
    #[tokio::test]
    async fn reranked_score_is_the_cross_encoder_score_not_the_fused_score() {
        use crate::embeddings::{Embedder, HashEmbedder};
        use crate::storage::{InMemoryVectorStore, VectorRecord, VectorStoreAdapter};
        use std::collections::HashMap;

        let store = InMemoryVectorStore::new();
        let embedder = HashEmbedder::new(8);

        let mut records = Vec::new();
        for (id, text) in [("chunk-1", "alpha beta"), ("chunk-2", "gamma delta")] {
            let mut metadata = HashMap::new();
            metadata.insert("document_id".to_string(), "doc-1".to_string());
            metadata.insert("importance".to_string(), "1.0".to_string());
            records.push(VectorRecord {
                id: id.to_string(),
                text: text.to_string(),
                metadata,
                vector: embedder.embed_one(text).await.unwrap(),
            });
        }
        store.add("s", records).await.unwrap();

        let bm25 = Bm25Index::new();
        let reranker = FixedScoreReranker(9.5);
        let config = SearchConfig {
            max_results_per_search: 10,
            rrf_k: 60,
            vector_weight: 0.6,
            bm25_weight: 0.4,
        };

        let response = search(
            "s",
            "alpha beta",
            5,
            false,
            true,
            2,
            &bm25,
            &store,
            &embedder,
            Some(&reranker),
            &config,
        )
        .await
        .unwrap();

        assert_eq!(response.search_method, "hybrid+rerank");
        assert!(!response.matches.is_empty());
        for m in &response.matches {
            // 9.5 rounded to 4dp is still 9.5; the stale rrf*importance
            // fused score for either candidate is always < 1.0.
            assert_eq!(m.score, 9.5);
        }
    }
}
