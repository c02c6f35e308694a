//! PDF ingestion: byte extraction (spec.md §4.2) feeding the hierarchical
//! chunker (spec.md §4.1).

pub mod chunker;
pub mod pdf;

use crate::config::ChunkingConfig;
use crate::error::Result;
use crate::types::{Chunk, ProcessingStats};
use chunker::SemanticChunker;

/// Extracts and chunks a whole document, page by page, in page order.
pub fn process_bytes(
    content: &[u8],
    filename: &str,
    chunking: &ChunkingConfig,
) -> Result<(Vec<Chunk>, ProcessingStats)> {
    let pages = pdf::extract_pages(content)?;
    let chunker = SemanticChunker::from_config(chunking);

    let mut all_chunks = Vec::new();
    let mut stats = ProcessingStats {
        page_count: pages.len(),
        ..Default::default()
    };

    for (page_num, page_text) in &pages {
        stats.total_chars += page_text.chars().count();
        let chunks = chunker.chunk_text(page_text, *page_num, filename);

        for chunk in &chunks {
            if chunk.header.is_some() {
                stats.headers_found += 1;
            }
            match chunk.chunk_type {
                crate::types::ChunkType::Code => stats.code_blocks_found += 1,
                crate::types::ChunkType::Table => stats.tables_found += 1,
                _ => {}
            }
        }

        all_chunks.extend(chunks);
    }

    stats.chunk_count = all_chunks.len();
    Ok((all_chunks, stats))
}
