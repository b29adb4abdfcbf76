//! # Carrel
//!
//! An inverted-index core for full-text and metadata search: a binary
//! postings format, a batch build pipeline with in-process external
//! sort-merge, multiple index encodings, a sorted result-set combination
//! algebra and pluggable relevance ranking.
//!
//! ## Features
//!
//! - Pure Rust implementation
//! - Standard, proximity, range, bitmap and vector index variants
//! - Batch builds with spill-to-disk external sorting and atomic commit
//! - Merge-join AND/OR/NOT and positional ADJ/PROX/WINDOW combination
//! - TF-IDF, CORI, Okapi BM-25 and logistic-regression ranking

pub mod cache;
pub mod error;
pub mod index;
pub mod postings;
pub mod query;
pub mod rank;
pub mod result;
pub mod store;
pub mod util;

pub mod prelude {
    pub use crate::error::{CarrelError, Result};
    pub use crate::index::{Index, IndexConfig, IndexVariant};
    pub use crate::postings::{DocKey, PostingEntry, PostingsRecord, Position};
    pub use crate::query::{BooleanOp, Clause, QueryNode, Relation, Triple};
    pub use crate::result::{ResultItem, ResultSet};
    pub use crate::store::{MemoryPostingStore, PostingStore};
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
