//! Result sets: the evaluated form of a query term or subtree.
//!
//! A result set is an ordered list of document items, carrying enough
//! aggregate and per-item state (occurrences, positions, weights) for the
//! combination algebra and the rankers to work without going back to the
//! index.

pub mod combine;

pub use combine::{CombineOp, CombineSpec, combine};

use bit_vec::BitVec;

use crate::postings::{DocKey, PostingsRecord, Position};

/// Identity handle tying an item back to the set that produced it within
/// one evaluation. Not an owning reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SetRef(pub u32);

/// One occurrence location inside a matched document, tagged with the term
/// that produced it once sets have been combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxHit {
    /// Occurrence position.
    pub position: Position,
    /// Term that matched here; `None` until tagged during combination.
    pub term_id: Option<u64>,
}

impl ProxHit {
    /// An untagged hit.
    pub fn new(position: Position) -> Self {
        ProxHit {
            position,
            term_id: None,
        }
    }
}

/// A matched sequence of hits. Single-term sets hold one hit per group;
/// proximity combination extends groups left to right.
pub type ProxGroup = Vec<ProxHit>;

/// One matched document.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultItem {
    /// Document identity.
    pub key: DocKey,
    /// Occurrences of the producing term in this document.
    pub occurrences: u32,
    /// Relevance weight; 0.5 until a ranker assigns one.
    pub weight: f64,
    /// Weight scaled into `[0, 1]` by [`ResultSet::scale_weights`].
    pub scaled_weight: f64,
    /// Proximity groups surviving positional combination.
    pub prox: Vec<ProxGroup>,
    /// The set this item currently belongs to.
    pub set: SetRef,
}

impl ResultItem {
    /// An item with the default (unranked) weight.
    pub fn new(key: DocKey, occurrences: u32) -> Self {
        ResultItem {
            key,
            occurrences,
            weight: 0.5,
            scaled_weight: 0.0,
            prox: Vec::new(),
            set: SetRef::default(),
        }
    }
}

/// An ordered set of matched documents for one term or one combined
/// subtree. Items are always sorted by doc key.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultSet {
    /// Identity of this set within the evaluation.
    pub id: SetRef,
    /// Matched documents in `(doc_id, store_id)` order.
    pub items: Vec<ResultItem>,
    /// Term id, for single-term sets from an index.
    pub term_id: Option<u64>,
    /// Documents the producing term appears in (collection-wide).
    pub total_docs: u64,
    /// Occurrences of the producing term (collection-wide).
    pub total_occs: u64,
    /// The canonical query term that produced this set.
    pub query_term: String,
    /// Times the term appears in the whole query.
    pub query_freq: u32,
    /// Query positions the term occupies (for phrase evaluation).
    pub query_positions: Vec<u32>,
    /// Whether items carry assigned relevance weights.
    pub relevancy: bool,
    /// Smallest assigned weight.
    pub min_weight: f64,
    /// Largest assigned weight.
    pub max_weight: f64,
    /// Inverse document frequency, set by rankers that need it later.
    pub idf: f64,
    /// Bit-set form, present when the set came from a bitmap index:
    /// the configured store id and one bit per doc id.
    pub bitmap: Option<(u32, BitVec)>,
}

impl ResultSet {
    /// An empty set.
    pub fn empty(id: SetRef) -> Self {
        ResultSet {
            id,
            query_freq: 1,
            ..ResultSet::default()
        }
    }

    /// Build a set from a decoded postings record. Each occurrence position
    /// becomes its own proximity group.
    pub fn from_record(id: SetRef, record: &PostingsRecord, query_term: &str) -> Self {
        let items = record
            .entries
            .iter()
            .map(|entry| {
                let mut item = ResultItem::new(entry.key, entry.occurrences);
                item.set = id;
                item.prox = entry
                    .positions
                    .iter()
                    .map(|p| {
                        vec![ProxHit {
                            position: *p,
                            term_id: Some(record.term_id),
                        }]
                    })
                    .collect();
                item
            })
            .collect();
        ResultSet {
            id,
            items,
            term_id: Some(record.term_id),
            total_docs: record.total_docs,
            total_occs: record.total_occs,
            query_term: query_term.to_string(),
            query_freq: 1,
            query_positions: Vec::new(),
            relevancy: false,
            min_weight: 0.0,
            max_weight: 0.0,
            idf: 0.0,
            bitmap: None,
        }
    }

    /// Number of matched documents.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether no documents matched.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Record an assigned weight in the set's min/max tracking.
    pub fn track_weight(&mut self, weight: f64) {
        if !self.relevancy {
            self.relevancy = true;
            self.min_weight = weight;
            self.max_weight = weight;
        } else {
            if weight < self.min_weight {
                self.min_weight = weight;
            }
            if weight > self.max_weight {
                self.max_weight = weight;
            }
        }
    }

    /// Scale raw weights into `scaled_weight` relative to the set's range.
    /// A degenerate range (all weights equal) scales by 1, leaving every
    /// item at zero distance from the minimum.
    pub fn scale_weights(&mut self) {
        let range = self.max_weight - self.min_weight;
        let factor = if range != 0.0 { 1.0 / range } else { 1.0 };
        for item in &mut self.items {
            item.scaled_weight = (item.weight - self.min_weight) * factor;
        }
    }

    /// Re-sort items by doc key (after deserialization or external edits).
    pub fn sort_items(&mut self) {
        self.items.sort_by_key(|item| item.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::postings::{PostingEntry, PostingsRecord};

    fn record() -> PostingsRecord {
        PostingsRecord::from_entries(
            7,
            vec![
                PostingEntry::with_positions(
                    DocKey::new(1, 0),
                    vec![Position::new(0, 2), Position::new(0, 9)],
                ),
                PostingEntry::new(DocKey::new(4, 0), 1),
            ],
        )
    }

    #[test]
    fn test_from_record() {
        let set = ResultSet::from_record(SetRef(1), &record(), "fox");
        assert_eq!(set.len(), 2);
        assert_eq!(set.term_id, Some(7));
        assert_eq!(set.total_occs, 3);
        assert_eq!(set.items[0].prox.len(), 2);
        assert_eq!(set.items[0].prox[0][0].term_id, Some(7));
        assert_eq!(set.items[0].weight, 0.5);
    }

    #[test]
    fn test_scale_weights() {
        let mut set = ResultSet::from_record(SetRef(0), &record(), "fox");
        set.items[0].weight = 2.0;
        set.items[1].weight = 6.0;
        set.track_weight(2.0);
        set.track_weight(6.0);
        set.scale_weights();
        assert_eq!(set.items[0].scaled_weight, 0.0);
        assert_eq!(set.items[1].scaled_weight, 1.0);
    }

    #[test]
    fn test_scale_weights_degenerate() {
        let mut set = ResultSet::from_record(SetRef(0), &record(), "fox");
        set.items[0].weight = 3.0;
        set.items[1].weight = 3.0;
        set.track_weight(3.0);
        set.track_weight(3.0);
        set.scale_weights();
        assert!(set.items.iter().all(|i| i.scaled_weight == 0.0));
    }

    #[test]
    fn test_track_weight() {
        let mut set = ResultSet::empty(SetRef(0));
        set.track_weight(1.5);
        set.track_weight(0.25);
        set.track_weight(0.75);
        assert_eq!(set.min_weight, 0.25);
        assert_eq!(set.max_weight, 1.5);
    }
}
