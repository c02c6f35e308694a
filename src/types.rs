//! Core data model (spec.md §3): the immutable `Chunk` and the shapes used
//! at the spec.md §6 operation boundary.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChunkType {
    Paragraph,
    Code,
    Table,
    Semantic,
}

impl ChunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkType::Paragraph => "paragraph",
            ChunkType::Code => "code",
            ChunkType::Table => "table",
            ChunkType::Semantic => "semantic",
        }
    }
}

impl fmt::Display for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable, provenance-rich retrieval unit (spec.md §3).
///
/// Constructed only by the chunker and inserted once by the processor;
/// never mutated after emission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub page: usize,
    pub filename: String,
    pub header: Option<String>,
    pub parent_header: Option<String>,
    pub chunk_type: ChunkType,
    pub char_start: usize,
    pub char_end: usize,
    pub sentence_count: usize,
    pub importance_score: f64,
}

impl Chunk {
    /// Deterministic id: `"{filename}_{page}_{char_start}_{hash8(text[:200])}"`.
    /// Two ingests of identical bytes under the same filename yield the same id.
    pub fn id(&self) -> String {
        let prefix: String = self.text.chars().take(200).collect();
        let digest = Sha256::digest(prefix.as_bytes());
        let hash8 = hex_prefix(&digest, 8);
        format!("{}_{}_{}_{}", self.filename, self.page, self.char_start, hash8)
    }

    /// Hierarchical context prefix used to build the embedding text
    /// (spec.md §4.8, §SPEC_FULL.md F.1): joins `parent_header` and `header`
    /// with `" > "`, skipping the header when it duplicates the parent.
    pub fn context_prefix(&self) -> String {
        let mut parts = Vec::new();
        if let Some(p) = &self.parent_header {
            parts.push(p.as_str());
        }
        if let Some(h) = &self.header {
            if self.parent_header.as_deref() != Some(h.as_str()) {
                parts.push(h.as_str());
            }
        }
        parts.join(" > ")
    }
}

fn hex_prefix(bytes: &[u8], nibbles: usize) -> String {
    let mut s = String::with_capacity(nibbles);
    for b in bytes {
        if s.len() >= nibbles {
            break;
        }
        s.push_str(&format!("{:02x}", b));
    }
    s.truncate(nibbles);
    s
}

/// Output of `process_document` (spec.md §6).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ProcessingStats {
    pub page_count: usize,
    pub chunk_count: usize,
    pub total_chars: usize,
    pub headers_found: usize,
    pub code_blocks_found: usize,
    pub tables_found: usize,
}

/// A single scored match returned by `search` (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchMatch {
    pub text: String,
    pub page: usize,
    pub filename: String,
    pub score: f64,
    pub header: Option<String>,
    pub chunk_type: Option<ChunkType>,
    pub vector_score: Option<f64>,
    pub rrf_score: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub matches: Vec<SearchMatch>,
    pub total_searched: usize,
    pub search_method: String,
    pub query_expanded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub document_id: String,
    pub filename: String,
    pub chunk_count: usize,
    pub chunk_types: Vec<ChunkType>,
}

/// Metadata carried alongside a chunk in both indices, keyed the way
/// spec.md §4.6/§4.8 describe (`document_id`, `page`, `filename`, ...).
pub type ChunkMetadata = HashMap<String, String>;

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample() -> Chunk {
        Chunk {
            text: "## Overview\n\nFoo bar. Baz qux.".to_string(),
            page: 1,
            filename: "doc.pdf".to_string(),
            header: Some("Overview".to_string()),
            parent_header: None,
            chunk_type: ChunkType::Paragraph,
            char_start: 0,
            char_end: 30,
            sentence_count: 2,
            importance_score: 1.3,
        }
    }

    #[test]
    fn id_is_deterministic() {
        let a = sample();
        let b = sample();
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn id_changes_with_char_start() {
        let a = sample();
        let mut b = sample();
        b.char_start = 10;
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn context_prefix_skips_duplicate_header() {
        let mut c = sample();
        c.parent_header = Some("Overview".to_string());
        assert_eq!(c.context_prefix(), "Overview");
    }

    #[test]
    fn context_prefix_joins_distinct_levels() {
        let mut c = sample();
        c.parent_header = Some("Chapter 1".to_string());
        assert_eq!(c.context_prefix(), "Chapter 1 > Overview");
    }

    #[test]
    fn context_prefix_empty_without_headers() {
        let mut c = sample();
        c.header = None;
        c.parent_header = None;
        assert_eq!(c.context_prefix(), "");
    }

    proptest! {
        /// Same bytes, same filename → same id (spec.md §3, §8); changing
        /// any field the id formula reads over changes the id.
        #[test]
        fn id_is_deterministic_for_arbitrary_fields(
            text in ".{0,300}",
            page in 1usize..500,
            filename in "[a-zA-Z0-9._\\-]{1,20}",
            char_start in 0usize..1000,
        ) {
            let build = || Chunk {
                text: text.clone(),
                page,
                filename: filename.clone(),
                header: None,
                parent_header: None,
                chunk_type: ChunkType::Paragraph,
                char_start,
                char_end: char_start + text.chars().count(),
                sentence_count: 0,
                importance_score: 1.0,
            };
            prop_assert_eq!(build().id(), build().id());
        }
    }
}
