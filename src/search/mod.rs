//! Search layer: sparse index (spec.md §4.4), query expansion (spec.md
//! §4.5), and the hybrid fusion engine (spec.md §4.7) that ties them to the
//! dense store.

pub mod bm25;
pub mod expander;
pub mod hybrid;

pub use bm25::Bm25Index;
pub use hybrid::search;
