//! Cross-encoder reranking capability (spec.md §4.7 step 4, SPEC_FULL.md E):
//! an external scorer over `(query, candidate_text)` pairs. No bundled
//! model — hosts wire in a real cross-encoder; `search::hybrid` falls back
//! to the pre-rerank RRF ordering if this returns an error or is absent,
//! mirroring the reference `_rerank`'s try/except-and-keep-going behavior.

use async_trait::async_trait;

use crate::error::Result;

#[async_trait]
pub trait CrossEncoder: Send + Sync {
    /// Scores each `(query, text)` pair, returning one score per candidate
    /// in the same order. Higher is more relevant; scores are not assumed
    /// to be bounded or comparable across calls.
    async fn score(&self, query: &str, candidates: &[String]) -> Result<Vec<f64>>;
}

/// Deterministic test fake: scores a candidate by the fraction of query
/// tokens it contains, case-insensitively. Not a real cross-encoder — just
/// enough signal for tests to assert reranking actually reorders results.
pub struct LexicalOverlapReranker;

#[async_trait]
impl CrossEncoder for LexicalOverlapReranker {
    async fn score(&self, query: &str, candidates: &[String]) -> Result<Vec<f64>> {
        let query_tokens: Vec<String> = query
            .split_whitespace()
            .map(|t| t.to_lowercase())
            .collect();

        if query_tokens.is_empty() {
            return Ok(vec![0.0; candidates.len()]);
        }

        Ok(candidates
            .iter()
            .map(|text| {
                let lower = text.to_lowercase();
                let hits = query_tokens.iter().filter(|t| lower.contains(t.as_str())).count();
                hits as f64 / query_tokens.len() as f64
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scores_by_token_overlap() {
        let reranker = LexicalOverlapReranker;
        let candidates = vec![
            "binary search tree traversal".to_string(),
            "unrelated cooking recipe".to_string(),
        ];
        let scores = reranker.score("binary search tree", &candidates).await.unwrap();
        assert!(scores[0] > scores[1]);
    }

    #[tokio::test]
    async fn empty_query_scores_zero() {
        let reranker = LexicalOverlapReranker;
        let scores = reranker.score("", &["anything".to_string()]).await.unwrap();
        assert_eq!(scores, vec![0.0]);
    }
}
