//! Okapi BM25 inverted index (spec.md §4.4).
//!
//! `k1 = 1.5`, `b = 0.75`: parameters tuned for academic/technical prose in
//! the reference implementation, kept as the defaults here.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};

use crate::error::{RetrievalError, Result};

const K1: f64 = 1.5;
const B: f64 = 0.75;

/// Fixed ~80-word English stop list, carried verbatim from the reference
/// implementation (SPEC_FULL.md F.5). Frozen — changing it invalidates any
/// index built under the old list (Design Notes §9).
static STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
    "from", "as", "is", "was", "are", "were", "been", "be", "have", "has", "had", "do", "does",
    "did", "will", "would", "could", "should", "may", "might", "must", "shall", "can", "need",
    "this", "that", "these", "those", "it", "its", "they", "them", "their", "what", "which",
    "who", "whom", "when", "where", "why", "how", "all", "each", "every", "both", "few", "more",
    "most", "other", "some", "such", "no", "nor", "not", "only", "own", "same", "so", "than",
    "too", "very", "just", "also", "now", "here", "there", "about", "into", "over", "after",
    "below", "between", "under", "again", "then", "once", "during", "while", "before", "above",
    "being", "through", "further", "because", "until",
];

static STOP_WORD_SET: Lazy<HashSet<&'static str>> =
    Lazy::new(|| STOP_WORDS.iter().copied().collect());

static TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[a-zA-Z0-9][\w\-.]*[a-zA-Z0-9]\b|\b\w\b").unwrap());

pub fn tokenize(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    TOKEN_RE
        .find_iter(&lower)
        .map(|m| m.as_str().to_string())
        .filter(|t| t.len() > 1 && !STOP_WORD_SET.contains(t.as_str()))
        .collect()
}

/// Per-subject Okapi BM25 index (spec.md §3, §4.4).
#[derive(Debug, Default)]
pub struct Bm25Index {
    pub doc_count: usize,
    pub avgdl: f64,
    doc_lengths: HashMap<String, usize>,
    doc_freqs: HashMap<String, usize>,
    inverted_index: HashMap<String, HashMap<String, usize>>,
    doc_texts: HashMap<String, String>,
    doc_metadata: HashMap<String, HashMap<String, String>>,
}

impl Bm25Index {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn doc_text(&self, id: &str) -> Option<&str> {
        self.doc_texts.get(id).map(String::as_str)
    }

    pub fn metadata(&self, id: &str) -> Option<&HashMap<String, String>> {
        self.doc_metadata.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.doc_texts.contains_key(id)
    }

    fn recompute_avgdl(&mut self) {
        self.avgdl = if self.doc_count == 0 {
            0.0
        } else {
            self.doc_lengths.values().sum::<usize>() as f64 / self.doc_count as f64
        };
    }

    /// Adds one document. Idempotent replacement is not supported: adding an
    /// id that is already present is a caller bug (mirrors the reference,
    /// which simply overwrites — we keep that behavior rather than erroring,
    /// since the processor never re-adds an id within a subject's lifetime).
    pub fn add_document(&mut self, id: &str, text: &str, metadata: HashMap<String, String>) {
        let tokens = tokenize(text);
        self.doc_texts.insert(id.to_string(), text.to_string());
        self.doc_metadata.insert(id.to_string(), metadata);
        self.doc_lengths.insert(id.to_string(), tokens.len());

        let mut term_counts: HashMap<&str, usize> = HashMap::new();
        for t in &tokens {
            *term_counts.entry(t.as_str()).or_insert(0) += 1;
        }

        for (term, freq) in term_counts {
            self.inverted_index
                .entry(term.to_string())
                .or_default()
                .insert(id.to_string(), freq);
            *self.doc_freqs.entry(term.to_string()).or_insert(0) += 1;
        }

        self.doc_count += 1;
        self.recompute_avgdl();
    }

    /// Removes a document. Missing ids are tolerated (spec.md §7 — idempotent).
    pub fn remove_document(&mut self, id: &str) -> Result<()> {
        let Some(text) = self.doc_texts.remove(id) else {
            return Ok(());
        };

        let mut seen = HashSet::new();
        for token in tokenize(&text) {
            if !seen.insert(token.clone()) {
                continue;
            }
            if let Some(postings) = self.inverted_index.get_mut(&token) {
                if postings.remove(id).is_some() {
                    let df = self
                        .doc_freqs
                        .get_mut(&token)
                        .ok_or_else(|| RetrievalError::index("doc_freqs missing for posted term"))?;
                    if *df == 0 {
                        return Err(RetrievalError::index("doc_freqs underflow"));
                    }
                    *df -= 1;
                    if postings.is_empty() {
                        self.inverted_index.remove(&token);
                        self.doc_freqs.remove(&token);
                    }
                }
            }
        }

        self.doc_lengths.remove(id);
        self.doc_metadata.remove(id);
        self.doc_count = self.doc_count.saturating_sub(1);
        self.recompute_avgdl();
        Ok(())
    }

    /// BM25-ranked `(id, score)` pairs, descending by score, ties broken by
    /// id ascending, truncated to `limit`.
    pub fn search(&self, query: &str, limit: usize) -> Vec<(String, f64)> {
        if self.doc_count == 0 {
            return Vec::new();
        }

        let n = self.doc_count as f64;
        let mut scores: HashMap<String, f64> = HashMap::new();

        for term in tokenize(query) {
            let Some(postings) = self.inverted_index.get(&term) else {
                continue;
            };
            let df = *self.doc_freqs.get(&term).unwrap_or(&0) as f64;
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();

            for (doc_id, &tf) in postings {
                let dl = *self.doc_lengths.get(doc_id).unwrap_or(&0) as f64;
                let tf = tf as f64;
                let denom = tf + K1 * (1.0 - B + B * dl / self.avgdl.max(f64::EPSILON));
                let tf_norm = tf * (K1 + 1.0) / denom;
                *scores.entry(doc_id.clone()).or_insert(0.0) += idf * tf_norm;
            }
        }

        let mut ranked: Vec<(String, f64)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked.truncate(limit);
        ranked
    }

    pub fn clear(&mut self) {
        self.doc_count = 0;
        self.avgdl = 0.0;
        self.doc_lengths.clear();
        self.doc_freqs.clear();
        self.inverted_index.clear();
        self.doc_texts.clear();
        self.doc_metadata.clear();
    }

    /// `term ∈ inverted_index ⇔ term ∈ doc_freqs ⇔ doc_freqs[term] > 0` (spec.md §3).
    #[cfg(test)]
    fn check_invariants(&self) {
        for term in self.inverted_index.keys() {
            assert!(self.doc_freqs.get(term).copied().unwrap_or(0) > 0);
        }
        for (term, &df) in &self.doc_freqs {
            assert_eq!(df > 0, self.inverted_index.contains_key(term));
        }
        let expected_avgdl = if self.doc_count == 0 {
            0.0
        } else {
            self.doc_lengths.values().sum::<usize>() as f64 / self.doc_count as f64
        };
        assert!((self.avgdl - expected_avgdl).abs() < 1e-9);
    }
}
