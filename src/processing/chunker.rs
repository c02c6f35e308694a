//! Hierarchical semantic chunker (spec.md §4.1, §4.3).
//!
//! Walks page text line by line, tracking a 3-deep header stack, code-fence
//! and table state, and a sentence-boundary-aware split when the buffer
//! overruns `chunk_size`. The hierarchical chunker is the only one carried
//! into this crate — Design Notes §9 singles it out as authoritative over
//! the flat variant in the reference implementation.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::ChunkingConfig;
use crate::types::{Chunk, ChunkType};

struct HeaderPattern {
    regex: Regex,
    level: u8,
}

static HEADER_PATTERNS: Lazy<Vec<HeaderPattern>> = Lazy::new(|| {
    let specs: &[(&str, u8)] = &[
        (r"^#{1}\s+(.+)", 1),
        (r"^#{2}\s+(.+)", 2),
        (r"^#{3,6}\s+(.+)", 3),
        (r"^([A-Z][A-Z\s]{2,}):?\s*$", 1),
        (r"^(\d+)\.\s+([A-Z].+)", 2),
        (r"^(\d+\.\d+)\s+(.+)", 3),
        (r"^([IVXLCDM]+)\.\s+(.+)", 2),
        (r"^Chapter\s+(\d+)\s*[:\-]?\s*(.*)", 1),
        (r"^Section\s+(\d+)\s*[:\-]?\s*(.*)", 2),
    ];
    specs
        .iter()
        .map(|(p, level)| HeaderPattern {
            regex: Regex::new(p).unwrap(),
            level: *level,
        })
        .collect()
});

static TABLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:\|.*\|.*\||\+[-=]+\+)").unwrap());

static HEADER_STRIP_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[#\d.\s\-:]+").unwrap());

static DEFINITION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^([A-Z][\w\s\-]+)\s*[:\x{2013}\x{2014}]\s+(.{20,})").unwrap());

static TECH_MARKERS: &[&str] = &[
    "example", "important", "note", "warning", "definition", "algorithm", "protocol", "syntax",
    "command", "function",
];

fn detect_header(line: &str) -> Option<(String, u8)> {
    let stripped = line.trim();
    for pattern in HEADER_PATTERNS.iter() {
        if let Some(caps) = pattern.regex.captures(stripped) {
            let raw = caps
                .get(caps.len() - 1)
                .map(|m| m.as_str())
                .unwrap_or(stripped);
            let cleaned = HEADER_STRIP_RE.replace(raw, "");
            let cleaned = cleaned.trim();
            if !cleaned.is_empty() {
                return Some((cleaned.to_string(), pattern.level));
            }
        }
    }
    None
}

fn is_code_fence(line: &str) -> bool {
    line.trim().starts_with("```")
}

fn is_table_line(line: &str) -> bool {
    TABLE_RE.is_match(line.trim())
}

/// Returns char offsets (start of the whitespace run) for every sentence
/// boundary: punctuation in `.!?` followed by whitespace followed by an
/// uppercase letter. Rust's `regex` crate has no lookaround, so this walks
/// the char stream directly instead of porting `SENTENCE_END` as a pattern.
fn sentence_boundaries(chars: &[char]) -> Vec<usize> {
    let n = chars.len();
    let mut boundaries = Vec::new();
    let mut i = 0;
    while i < n {
        if matches!(chars[i], '.' | '!' | '?') {
            let mut j = i + 1;
            while j < n && chars[j].is_whitespace() {
                j += 1;
            }
            if j > i + 1 && j < n && chars[j].is_ascii_uppercase() {
                boundaries.push(i + 1);
                i = j;
                continue;
            }
        }
        i += 1;
    }
    boundaries
}

fn count_sentences(text: &str) -> usize {
    let chars: Vec<char> = text.chars().collect();
    sentence_boundaries(&chars).len() + 1
}

fn compute_importance(chunk_text: &str, chunk_type: ChunkType, has_header: bool) -> f64 {
    let mut score = 1.0_f64;

    if has_header {
        score *= 1.3;
    }
    if DEFINITION_RE.is_match(chunk_text) {
        score *= 1.4;
    }
    if chunk_type == ChunkType::Code {
        score *= 1.2;
    }

    let lower = chunk_text.to_lowercase();
    if TECH_MARKERS.iter().any(|m| lower.contains(m)) {
        score *= 1.1;
    }

    if chunk_text.chars().count() < 100 {
        score *= 0.7;
    }

    (score.min(2.0) * 100.0).round() / 100.0
}

/// Splits `text` near `target_size` (in chars) at the nearest sentence
/// boundary strictly past `min_chunk_size`. Mirrors `chunker.py`'s
/// `_split_at_sentence_boundary` exactly, including its unstripped
/// short-circuit for text already at or under `target_size`.
fn split_at_sentence_boundary(text: &str, target_size: usize, min_chunk_size: usize) -> (String, String) {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= target_size {
        return (text.to_string(), String::new());
    }

    let mut boundaries = vec![0usize];
    boundaries.extend(sentence_boundaries(&chars));
    boundaries.push(chars.len());

    let mut best_split = target_size;
    let mut min_diff = i64::MAX;

    for &b in &boundaries {
        let diff = (b as i64 - target_size as i64).abs();
        if diff < min_diff && b > min_chunk_size {
            min_diff = diff;
            best_split = b;
        }
    }

    let first: String = chars[..best_split].iter().collect::<String>().trim().to_string();
    let rest: String = chars[best_split..].iter().collect::<String>().trim().to_string();
    (first, rest)
}

pub struct SemanticChunker {
    chunk_size: usize,
    chunk_overlap: usize,
    min_chunk_size: usize,
}

impl SemanticChunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize, min_chunk_size: usize) -> Self {
        Self { chunk_size, chunk_overlap, min_chunk_size }
    }

    pub fn from_config(cfg: &ChunkingConfig) -> Self {
        Self::new(cfg.chunk_size, cfg.chunk_overlap, cfg.min_chunk_size)
    }

    /// Pure: `chunk_text(text, page, filename) -> ordered list<Chunk>` (spec.md §4.1).
    pub fn chunk_text(&self, text: &str, page: usize, filename: &str) -> Vec<Chunk> {
        if text.trim().chars().count() < 30 {
            return Vec::new();
        }

        let mut state = State {
            cfg: self,
            header_stack: [None, None, None],
            current_content: Vec::new(),
            current_size: 0,
            char_pos: 0,
            chunk_start: 0,
            chunks: Vec::new(),
            page,
            filename: filename.to_string(),
        };

        let mut in_code_block = false;
        let mut in_table = false;

        for line in text.split('\n') {
            let line_len = line.chars().count() + 1;
            let stripped = line.trim();

            if is_code_fence(line) {
                if in_code_block {
                    state.current_content.push(line.to_string());
                    state.current_size += line_len;
                    in_code_block = false;
                    state.flush_chunk(ChunkType::Code);
                } else {
                    state.flush_chunk(ChunkType::Paragraph);
                    state.current_content.push(line.to_string());
                    state.current_size += line_len;
                    in_code_block = true;
                }
                state.char_pos += line_len;
                continue;
            }

            if in_code_block {
                state.current_content.push(line.to_string());
                state.current_size += line_len;
                state.char_pos += line_len;
                continue;
            }

            if is_table_line(line) {
                if !in_table {
                    state.flush_chunk(ChunkType::Paragraph);
                    in_table = true;
                }
                state.current_content.push(line.to_string());
                state.current_size += line_len;
                state.char_pos += line_len;
                continue;
            } else if in_table {
                in_table = false;
                state.flush_chunk(ChunkType::Table);
            }

            if let Some((header_text, level)) = detect_header(line) {
                state.flush_chunk(ChunkType::Paragraph);
                let idx = ((level - 1) as usize).min(2);
                state.header_stack[idx] = Some(header_text);
                for slot in state.header_stack.iter_mut().skip(idx + 1) {
                    *slot = None;
                }
                state.chunk_start = state.char_pos;
                state.char_pos += line_len;
                continue;
            }

            if !stripped.is_empty() {
                if state.current_size + line_len > self.chunk_size && !state.current_content.is_empty() {
                    let mut full_text = state.current_content.join("\n");
                    full_text.push('\n');
                    full_text.push_str(line);

                    let (first_part, remainder) =
                        split_at_sentence_boundary(&full_text, self.chunk_size, self.min_chunk_size);

                    state.current_content = vec![first_part.clone()];
                    state.current_size = first_part.chars().count();
                    state.flush_chunk(ChunkType::Paragraph);

                    if !remainder.is_empty() {
                        let overlap_text = if self.chunk_overlap > 0 {
                            let chars: Vec<char> = first_part.chars().collect();
                            let start = chars.len().saturating_sub(self.chunk_overlap);
                            chars[start..].iter().collect::<String>()
                        } else {
                            String::new()
                        };
                        if !overlap_text.is_empty() {
                            state.current_size = overlap_text.chars().count() + remainder.chars().count();
                            state.current_content = vec![overlap_text, remainder];
                        } else {
                            state.current_size = remainder.chars().count();
                            state.current_content = vec![remainder];
                        }
                    }
                } else {
                    state.current_content.push(line.to_string());
                    state.current_size += line_len;
                }
            }
            state.char_pos += line_len;
        }

        if in_code_block {
            state.flush_chunk(ChunkType::Code);
        } else if in_table {
            state.flush_chunk(ChunkType::Table);
        } else {
            state.flush_chunk(ChunkType::Paragraph);
        }

        state.chunks
    }
}

struct State<'a> {
    cfg: &'a SemanticChunker,
    header_stack: [Option<String>; 3],
    current_content: Vec<String>,
    current_size: usize,
    char_pos: usize,
    chunk_start: usize,
    chunks: Vec<Chunk>,
    page: usize,
    filename: String,
}

impl<'a> State<'a> {
    fn parent_header(&self) -> Option<String> {
        self.header_stack.iter().flatten().next().cloned()
    }

    fn current_header(&self) -> Option<String> {
        self.header_stack.iter().rev().flatten().next().cloned()
    }

    fn flush_chunk(&mut self, chunk_type: ChunkType) {
        if self.current_content.is_empty() {
            return;
        }

        let joined = self.current_content.join("\n");
        let text = joined.trim();

        if text.chars().count() < self.cfg.min_chunk_size {
            return;
        }

        let header = self.current_header();
        let parent = self.parent_header();

        let display_text = match &header {
            Some(h) => format!("## {}\n\n{}", h, text),
            None => text.to_string(),
        };

        let importance = compute_importance(text, chunk_type, header.is_some());

        self.chunks.push(Chunk {
            text: display_text,
            page: self.page,
            filename: self.filename.clone(),
            parent_header: if parent != header { parent } else { None },
            header,
            chunk_type,
            char_start: self.chunk_start,
            char_end: self.char_pos,
            sentence_count: count_sentences(text),
            importance_score: importance,
        });

        self.current_content.clear();
        self.current_size = 0;
        self.chunk_start = self.char_pos;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker() -> SemanticChunker {
        SemanticChunker::new(600, 80, 50)
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        assert!(chunker().chunk_text("short", 1, "doc.pdf").is_empty());
    }

    #[test]
    fn two_headers_yield_two_chunks() {
        let text = "## Overview\n\nFoo bar. Baz qux sentence long enough to pass the minimum chunk size threshold here.\n\n## Details\n\nA detail sentence that is also long enough to clear the minimum chunk size bound easily.";
        let chunks = chunker().chunk_text(text, 1, "doc.pdf");
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].header.as_deref(), Some("Overview"));
        assert!(chunks[0].text.starts_with("## Overview\n\n"));
        assert_eq!(chunks[0].chunk_type, ChunkType::Paragraph);
        assert_eq!(chunks[1].header.as_deref(), Some("Details"));
    }

    #[test]
    fn code_fence_is_isolated_and_not_split() {
        let code_body = "x".repeat(300);
        let text = format!(
            "Some prose before the code block that is long enough to be its own paragraph chunk here.\n\n```\n{}\n```\n\nSome prose after the code block that is also long enough to form its own paragraph chunk here.",
            code_body
        );
        let chunks = chunker().chunk_text(&text, 1, "doc.pdf");
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].chunk_type, ChunkType::Code);
        assert!(chunks[1].importance_score >= 1.2);
        assert!(chunks[1].text.contains(&code_body));
    }

    #[test]
    fn table_lines_are_grouped_into_one_chunk() {
        let text = "Intro paragraph with enough characters to clear the minimum chunk size on its own.\n\n| a | b | c |\n| d | e | f |\n| g | h | i |\n\nOutro paragraph with enough characters to clear the minimum chunk size on its own.";
        let chunks = chunker().chunk_text(text, 1, "doc.pdf");
        let table_chunk = chunks.iter().find(|c| c.chunk_type == ChunkType::Table);
        assert!(table_chunk.is_some());
    }

    #[test]
    fn chunk_id_is_deterministic() {
        let text = "## Overview\n\nFoo bar. Baz qux sentence long enough to pass the minimum chunk size threshold here.";
        let a = chunker().chunk_text(text, 1, "doc.pdf");
        let b = chunker().chunk_text(text, 1, "doc.pdf");
        assert_eq!(a[0].id(), b[0].id());
    }
}
