//! Postings data model and codecs.
//!
//! A postings record is the unit of storage under one term key: identity,
//! aggregate counts and a sorted list of per-document entries. Codecs turn
//! records into bytes and back, and merge incoming entries into existing
//! records; they never touch the store themselves.

pub mod bitmap;
pub mod codec;
pub mod proximity;
pub mod standard;
pub mod vector;
pub mod verbose;

pub use bitmap::BitmapCodec;
pub use codec::{MergeOp, PostingsCodec, merge_entries};
pub use proximity::ProximityCodec;
pub use standard::StandardCodec;
pub use vector::VectorCodec;
pub use verbose::VerboseCodec;

use serde::{Deserialize, Serialize};

/// Identity of a document: record id within a store, plus the store id.
/// Ordered by `(doc_id, store_id)`, which is the order postings and result
/// sets are kept in.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct DocKey {
    /// Record identifier within its store.
    pub doc_id: u64,
    /// Identifier of the owning record store.
    pub store_id: u32,
}

impl DocKey {
    /// Construct a key.
    pub fn new(doc_id: u64, store_id: u32) -> Self {
        DocKey { doc_id, store_id }
    }
}

/// One occurrence location inside a document.
///
/// `char_offset` is only present for proximity indexes configured with
/// three position integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    /// Ordinal of the containing element (field, XPath hit, sentence).
    pub element: u32,
    /// Word ordinal within the element.
    pub word: u32,
    /// Character offset, when the index records it.
    pub char_offset: Option<u32>,
}

impl Position {
    /// A two-integer position (element, word).
    pub fn new(element: u32, word: u32) -> Self {
        Position {
            element,
            word,
            char_offset: None,
        }
    }

    /// A three-integer position (element, word, character offset).
    pub fn with_offset(element: u32, word: u32, char_offset: u32) -> Self {
        Position {
            element,
            word,
            char_offset: Some(char_offset),
        }
    }
}

/// Postings for one term in one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingEntry {
    /// Document identity.
    pub key: DocKey,
    /// Number of occurrences of the term in this document.
    pub occurrences: u32,
    /// Occurrence positions; empty for non-proximity variants.
    pub positions: Vec<Position>,
}

impl PostingEntry {
    /// An entry without position data.
    pub fn new(key: DocKey, occurrences: u32) -> Self {
        PostingEntry {
            key,
            occurrences,
            positions: Vec::new(),
        }
    }

    /// An entry carrying positions; occurrence count is the position count.
    pub fn with_positions(key: DocKey, positions: Vec<Position>) -> Self {
        PostingEntry {
            key,
            occurrences: positions.len() as u32,
            positions,
        }
    }
}

/// The full postings record stored under one term key.
///
/// Entries are strictly ordered by [`DocKey`] with no duplicates, and the
/// totals are always consistent with the entry list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingsRecord {
    /// Stable numeric identity of the term within its index.
    pub term_id: u64,
    /// Number of documents containing the term.
    pub total_docs: u64,
    /// Total occurrences of the term across those documents.
    pub total_occs: u64,
    /// Per-document entries, sorted by `(doc_id, store_id)`.
    pub entries: Vec<PostingEntry>,
}

impl PostingsRecord {
    /// An empty record for `term_id`.
    pub fn new(term_id: u64) -> Self {
        PostingsRecord {
            term_id,
            total_docs: 0,
            total_occs: 0,
            entries: Vec::new(),
        }
    }

    /// Build a record from entries, sorting them and computing totals.
    pub fn from_entries(term_id: u64, mut entries: Vec<PostingEntry>) -> Self {
        entries.sort_by_key(|e| e.key);
        let mut record = PostingsRecord {
            term_id,
            total_docs: 0,
            total_occs: 0,
            entries,
        };
        record.recompute_totals();
        record
    }

    /// Recompute `total_docs`/`total_occs` from the entry list.
    pub fn recompute_totals(&mut self) {
        self.total_docs = self.entries.len() as u64;
        self.total_occs = self.entries.iter().map(|e| u64::from(e.occurrences)).sum();
    }

    /// Whether entries are strictly ordered by doc key.
    pub fn is_sorted(&self) -> bool {
        self.entries.windows(2).all(|w| w[0].key < w[1].key)
    }

    /// The aggregate view of this record.
    pub fn summary(&self) -> RecordSummary {
        RecordSummary {
            term_id: self.term_id,
            total_docs: self.total_docs,
            total_occs: self.total_occs,
        }
    }
}

/// Aggregate counts for a term, decodable without touching the entry list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSummary {
    /// Stable numeric identity of the term.
    pub term_id: u64,
    /// Number of documents containing the term.
    pub total_docs: u64,
    /// Total occurrences across those documents.
    pub total_occs: u64,
}
