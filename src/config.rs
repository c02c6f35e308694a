//! Retrieval core configuration (spec.md §6).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{RetrievalError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub chunking: ChunkingConfig,
    pub search: SearchConfig,
    pub embedding_dimension: usize,
    pub persist_directory: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub min_chunk_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub max_results_per_search: usize,
    pub rrf_k: usize,
    pub vector_weight: f32,
    pub bm25_weight: f32,
}

impl RetrievalConfig {
    pub fn validate(&self) -> Result<()> {
        if !(100..=2000).contains(&self.chunking.chunk_size) {
            return Err(RetrievalError::validation(
                "chunk_size must be in [100, 2000]",
            ));
        }
        if !(0..=300).contains(&self.chunking.chunk_overlap) {
            return Err(RetrievalError::validation(
                "chunk_overlap must be in [0, 300]",
            ));
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(RetrievalError::validation(
                "chunk_overlap must be < chunk_size",
            ));
        }
        if !(1..=50).contains(&self.search.max_results_per_search) {
            return Err(RetrievalError::validation(
                "max_results_per_search must be in [1, 50]",
            ));
        }
        if self.embedding_dimension == 0 {
            return Err(RetrievalError::validation(
                "embedding_dimension must be > 0",
            ));
        }
        Ok(())
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig {
                chunk_size: 600,
                chunk_overlap: 80,
                min_chunk_size: 50,
            },
            search: SearchConfig {
                max_results_per_search: 10,
                rrf_k: 60,
                vector_weight: 0.6,
                bm25_weight: 0.4,
            },
            embedding_dimension: 384,
            persist_directory: PathBuf::from("./data"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(RetrievalConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_chunk_size_out_of_bounds() {
        let mut cfg = RetrievalConfig::default();
        cfg.chunking.chunk_size = 50;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_overlap_ge_chunk_size() {
        let mut cfg = RetrievalConfig::default();
        cfg.chunking.chunk_overlap = cfg.chunking.chunk_size;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_limit_out_of_bounds() {
        let mut cfg = RetrievalConfig::default();
        cfg.search.max_results_per_search = 100;
        assert!(cfg.validate().is_err());
    }
}
