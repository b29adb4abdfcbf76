//! Query evaluation: one clause becomes point lookups, prefix/range scans
//! and wildcard filters against the postings store; clause trees combine
//! through the result-set algebra. Also answers term-enumeration (`scan`)
//! requests from summary-only decodes.

use log::debug;
use regex::Regex;

use crate::error::{CarrelError, Result};
use crate::index::{Index, IndexVariant};
use crate::postings::PostingsRecord;
use crate::query::{BooleanOp, BooleanValue, Clause, QueryNode, RelationValue};
use crate::result::{CombineOp, CombineSpec, ResultSet, SetRef, combine};
use crate::store::{PostingStore, ScanDirection};
use crate::util::{CancelToken, increment_key};

const SCAN_CANCEL_STRIDE: usize = 256;

/// Marker on the final [`ScanEntry`] when the walk hit the store edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanEdge {
    /// The walk reached the first term in the store.
    First,
    /// The walk reached the last term in the store.
    Last,
}

/// One term returned by [`Index::scan`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanEntry {
    /// The stored term.
    pub term: String,
    /// Documents containing it.
    pub total_docs: u64,
    /// Total occurrences.
    pub total_occs: u64,
    /// Present on the final entry when the store edge was reached.
    pub edge: Option<ScanEdge>,
}

/// Allocator for operand set identities within one evaluation.
struct SetIds(u32);

impl SetIds {
    fn next(&mut self) -> SetRef {
        let id = SetRef(self.0);
        self.0 += 1;
        id
    }
}

impl Index {
    /// Evaluate a query tree against this index.
    pub fn search(&self, node: &QueryNode, cancel: &CancelToken) -> Result<ResultSet> {
        match node {
            QueryNode::Clause(clause) => self.search_clause(clause, cancel),
            QueryNode::Triple(triple) => {
                let left = self.search(&triple.left, cancel)?;
                let right = self.search(&triple.right, cancel)?;
                let spec = CombineSpec::from_boolean(&triple.op, &self.config.rank)?;
                combine(vec![left, right], &spec, Some(self), cancel)
            }
        }
    }

    /// Evaluate one leaf clause.
    pub fn search_clause(&self, clause: &Clause, cancel: &CancelToken) -> Result<ResultSet> {
        let mut ids = SetIds(0);
        match clause.relation.value {
            RelationValue::Exact
            | RelationValue::Any
            | RelationValue::All
            | RelationValue::Phrase
            | RelationValue::Window => self.term_search(clause, &mut ids, cancel),
            RelationValue::Less
            | RelationValue::LessOrEqual
            | RelationValue::Greater
            | RelationValue::GreaterOrEqual => self.ordering_search(clause, &mut ids, cancel),
            RelationValue::Within => {
                if self.config.variant == IndexVariant::Range {
                    self.range_search(clause, &mut ids, cancel, false)
                } else {
                    self.between_search(clause, &mut ids, cancel)
                }
            }
            RelationValue::Encloses => {
                if self.config.variant == IndexVariant::Range {
                    self.range_search(clause, &mut ids, cancel, true)
                } else {
                    Err(CarrelError::unsupported_relation(
                        clause.relation.value.as_str(),
                        clause.term.clone(),
                    ))
                }
            }
        }
    }

    /// Enumerate `n` stored terms from the clause's term in `direction`,
    /// decoding summaries only. The final entry is marked when the walk
    /// reaches the store edge.
    pub fn scan(
        &self,
        clause: &Clause,
        n: usize,
        direction: ScanDirection,
    ) -> Result<Vec<ScanEntry>> {
        let store = self.postings_snapshot();
        let start_term = unescape(&clause.term);
        let start = if start_term.is_empty() {
            None
        } else {
            Some(start_term.as_bytes())
        };
        let skip_equal = matches!(
            clause.relation.value,
            RelationValue::Less | RelationValue::Greater
        );

        let mut cursor = store.cursor(start, direction)?;
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            let Some((key, value)) = cursor.next_entry()? else {
                break;
            };
            if skip_equal && out.is_empty() && key == start_term.as_bytes() {
                continue;
            }
            let summary = self.codec.decode_summary(&value)?;
            out.push(ScanEntry {
                term: String::from_utf8(key)
                    .map_err(|_| CarrelError::store("stored term key is not UTF-8"))?,
                total_docs: summary.total_docs,
                total_occs: summary.total_occs,
                edge: None,
            });
        }

        let exhausted = out.len() < n || cursor.next_entry()?.is_none();
        if exhausted && let Some(last) = out.last_mut() {
            last.edge = Some(match direction {
                ScanDirection::Forward => ScanEdge::Last,
                ScanDirection::Backward => ScanEdge::First,
            });
        }
        Ok(out)
    }

    /// `exact` / `any` / `all` / phrase / window evaluation over one or
    /// more query terms, each possibly masked.
    fn term_search(
        &self,
        clause: &Clause,
        ids: &mut SetIds,
        cancel: &CancelToken,
    ) -> Result<ResultSet> {
        let terms: Vec<&str> = match clause.relation.value {
            RelationValue::Exact => vec![clause.term.as_str()],
            _ => clause.term.split_whitespace().collect(),
        };
        if terms.is_empty() {
            return Ok(ResultSet::empty(ids.next()));
        }

        let mut spec = CombineSpec::from_relation(&clause.relation, &self.config.rank)?;
        if matches!(spec.op, CombineOp::Adjacent | CombineOp::Window) && self.prox.is_none() {
            // Positional operators need positions; other variants degrade
            // to intersection.
            debug!(
                "{}: {:?} variant cannot evaluate '{}' positionally, using AND",
                self.config.name,
                self.config.variant,
                clause.relation.value.as_str()
            );
            spec.op = CombineOp::And;
        }

        let mut operands = Vec::with_capacity(terms.len());
        for (position, term) in terms.iter().enumerate() {
            let mut operand = self.term_operand(term, ids, cancel)?;
            operand.query_freq = terms.iter().filter(|t| *t == term).count() as u32;
            operand.query_positions = vec![position as u32];
            operands.push(operand);
        }
        combine(operands, &spec, Some(self), cancel)
    }

    /// One query term as one operand set: a point lookup, or for masked
    /// terms the union of every stored term matching the pattern.
    fn term_operand(
        &self,
        term: &str,
        ids: &mut SetIds,
        cancel: &CancelToken,
    ) -> Result<ResultSet> {
        let Some(mask_pos) = first_mask(term) else {
            let literal = unescape(term);
            return match self.fetch_term(&literal)? {
                Some(record) => Ok(self.record_set(ids.next(), &record, &literal)),
                None => Ok(ResultSet::empty(ids.next())),
            };
        };
        if mask_pos == 0 {
            // A leading mask cannot bound a prefix scan.
            debug!(
                "{}: mask at position 0 in '{term}' is unsupported, returning no matches",
                self.config.name
            );
            return Ok(ResultSet::empty(ids.next()));
        }

        let prefix = unescape(&term[..mask_pos]);
        let pattern = compile_mask(term)?;
        let upper = increment_key(prefix.as_bytes());
        let store = self.postings_snapshot();
        let mut cursor = store.cursor(Some(prefix.as_bytes()), ScanDirection::Forward)?;

        let mut matches = Vec::new();
        let mut steps = 0usize;
        while let Some((key, value)) = cursor.next_entry()? {
            steps += 1;
            if steps % SCAN_CANCEL_STRIDE == 0 {
                cancel.check("wildcard scan")?;
            }
            if let Some(upper) = &upper
                && key.as_slice() >= upper.as_slice()
            {
                break;
            }
            let stored = std::str::from_utf8(&key)
                .map_err(|_| CarrelError::store("stored term key is not UTF-8"))?;
            if pattern.is_match(stored) {
                let record = self.codec.decode(&value)?;
                matches.push(self.record_set(ids.next(), &record, stored));
            }
        }

        let or = CombineSpec::from_boolean(&BooleanOp::new(BooleanValue::Or), &self.config.rank)?;
        let mut merged = combine(matches, &or, None, cancel)?;
        merged.query_term = term.to_string();
        Ok(merged)
    }

    /// `<` / `<=` / `>` / `>=`: a single-bound directional walk whose
    /// matching records union into one set.
    fn ordering_search(
        &self,
        clause: &Clause,
        ids: &mut SetIds,
        cancel: &CancelToken,
    ) -> Result<ResultSet> {
        let term = unescape(&clause.term);
        let (direction, skip_equal) = match clause.relation.value {
            RelationValue::Less => (ScanDirection::Backward, true),
            RelationValue::LessOrEqual => (ScanDirection::Backward, false),
            RelationValue::Greater => (ScanDirection::Forward, true),
            RelationValue::GreaterOrEqual => (ScanDirection::Forward, false),
            _ => unreachable!("ordering_search only sees ordering relations"),
        };

        let store = self.postings_snapshot();
        let mut cursor = store.cursor(Some(term.as_bytes()), direction)?;
        let mut operands = Vec::new();
        let mut steps = 0usize;
        while let Some((key, value)) = cursor.next_entry()? {
            steps += 1;
            if steps % SCAN_CANCEL_STRIDE == 0 {
                cancel.check("ordering scan")?;
            }
            if skip_equal && key == term.as_bytes() {
                continue;
            }
            let stored = std::str::from_utf8(&key)
                .map_err(|_| CarrelError::store("stored term key is not UTF-8"))?;
            let record = self.codec.decode(&value)?;
            operands.push(self.record_set(ids.next(), &record, stored));
        }
        self.union_with_modifiers(clause, operands, cancel)
    }

    /// `within` on non-range variants: a two-bound forward walk.
    fn between_search(
        &self,
        clause: &Clause,
        ids: &mut SetIds,
        cancel: &CancelToken,
    ) -> Result<ResultSet> {
        let bounds: Vec<&str> = clause.term.split_whitespace().collect();
        let [low, high] = bounds.as_slice() else {
            return Err(CarrelError::query(format!(
                "'within' takes two bounding values, got '{}'",
                clause.term
            )));
        };
        let low = unescape(low);
        let high = unescape(high);

        let store = self.postings_snapshot();
        let mut cursor = store.cursor(Some(low.as_bytes()), ScanDirection::Forward)?;
        let mut operands = Vec::new();
        let mut steps = 0usize;
        while let Some((key, value)) = cursor.next_entry()? {
            steps += 1;
            if steps % SCAN_CANCEL_STRIDE == 0 {
                cancel.check("bounded scan")?;
            }
            if key.as_slice() > high.as_bytes() {
                break;
            }
            let stored = std::str::from_utf8(&key)
                .map_err(|_| CarrelError::store("stored term key is not UTF-8"))?;
            let record = self.codec.decode(&value)?;
            operands.push(self.record_set(ids.next(), &record, stored));
        }
        self.union_with_modifiers(clause, operands, cancel)
    }

    /// `within` / `encloses` on the range variant: keys are `start\tend`
    /// compounds; candidates come from a bounded scan on the first
    /// component and are filtered linearly on the second.
    fn range_search(
        &self,
        clause: &Clause,
        ids: &mut SetIds,
        cancel: &CancelToken,
        encloses: bool,
    ) -> Result<ResultSet> {
        let (q_start, q_end) = split_range(&clause.term).ok_or_else(|| {
            CarrelError::unsupported_relation(
                clause.relation.value.as_str(),
                clause.term.clone(),
            )
        })?;

        let store = self.postings_snapshot();
        let start = if encloses { None } else { Some(q_start.as_bytes()) };
        let mut cursor = store.cursor(start, ScanDirection::Forward)?;
        let mut operands = Vec::new();
        let mut steps = 0usize;
        while let Some((key, value)) = cursor.next_entry()? {
            steps += 1;
            if steps % SCAN_CANCEL_STRIDE == 0 {
                cancel.check("range scan")?;
            }
            let stored = std::str::from_utf8(&key)
                .map_err(|_| CarrelError::store("stored term key is not UTF-8"))?;
            let Some((s_start, s_end)) = split_range(stored) else {
                continue;
            };
            // Candidate window ends once stored starts pass the bound.
            let start_bound = if encloses { q_start } else { q_end };
            if s_start > start_bound {
                break;
            }
            let keep = if encloses {
                s_end >= q_end
            } else {
                s_end <= q_end
            };
            if keep {
                let record = self.codec.decode(&value)?;
                operands.push(self.record_set(ids.next(), &record, stored));
            }
        }
        self.union_with_modifiers(clause, operands, cancel)
    }

    /// Union operand sets under the clause's modifiers (so `relevant` and
    /// friends survive scan-style relations).
    fn union_with_modifiers(
        &self,
        clause: &Clause,
        operands: Vec<ResultSet>,
        cancel: &CancelToken,
    ) -> Result<ResultSet> {
        let mut op = BooleanOp::new(BooleanValue::Or);
        op.modifiers = clause.relation.modifiers.clone();
        let spec = CombineSpec::from_boolean(&op, &self.config.rank)?;
        combine(operands, &spec, Some(self), cancel)
    }

    /// A decoded record as a result set, with the bit-set attached for
    /// bitmap indexes so boolean combination can stay bitwise.
    fn record_set(&self, id: SetRef, record: &PostingsRecord, term: &str) -> ResultSet {
        let mut set = ResultSet::from_record(id, record, term);
        if let Some(codec) = &self.bitmap {
            let store = self.postings_snapshot();
            if let Ok(Some(bytes)) = store.get(term.as_bytes())
                && let Ok((_, bits)) = codec.decode_bits(&bytes)
            {
                set.bitmap = Some((self.config.store_id, bits));
            }
        }
        set
    }
}

/// Position of the first unescaped mask character, if any.
fn first_mask(term: &str) -> Option<usize> {
    let bytes = term.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'*' | b'?' | b'^' => return Some(i),
            _ => i += 1,
        }
    }
    None
}

/// Strip mask escapes, keeping the escaped characters.
fn unescape(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    let mut chars = term.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(escaped) = chars.next() {
                out.push(escaped);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Compile a masked term into an anchored pattern: `?` matches one
/// character, `*` any run, `^` anchors and is dropped.
fn compile_mask(term: &str) -> Result<Regex> {
    let mut pattern = String::with_capacity(term.len() + 8);
    pattern.push('^');
    let mut chars = term.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    pattern.push_str(&regex::escape(&escaped.to_string()));
                }
            }
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            '^' => {}
            other => pattern.push_str(&regex::escape(&other.to_string())),
        }
    }
    pattern.push('$');
    Regex::new(&pattern).map_err(|e| CarrelError::query(format!("bad mask '{term}': {e}")))
}

/// Split a range-variant key or query term into its `start`/`end`
/// components (tab-separated in stored keys, whitespace accepted in query
/// terms).
fn split_range(term: &str) -> Option<(&str, &str)> {
    if let Some((start, end)) = term.split_once('\t') {
        return Some((start, end));
    }
    let mut parts = term.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(start), Some(end), None) => Some((start, end)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::index::{CommitOptions, IndexConfig, TermEmission, TermEmissions};
    use crate::postings::DocKey;
    use crate::query::Relation;
    use crate::store::MemoryStoreFactory;

    fn build(config: IndexConfig, docs: &[(u64, &[(&str, u32, &[u32])])]) -> Index {
        let index = Index::new(config, Arc::new(MemoryStoreFactory)).unwrap();
        index.begin_indexing().unwrap();
        for (doc, terms) in docs {
            let emissions: TermEmissions = terms
                .iter()
                .map(|(term, occ, positions)| {
                    (
                        term.to_string(),
                        TermEmission {
                            occurrences: *occ,
                            positions: positions.to_vec(),
                            sort_value: None,
                        },
                    )
                })
                .collect();
            index.index_record(DocKey::new(*doc, 0), &emissions).unwrap();
        }
        index.commit_indexing(CommitOptions::default()).unwrap();
        index
    }

    fn words_index() -> Index {
        build(
            IndexConfig::new("words", IndexVariant::Standard),
            &[
                (1, &[("car", 1, &[]), ("cat", 2, &[])]),
                (2, &[("cart", 1, &[]), ("cat", 1, &[])]),
                (3, &[("dog", 1, &[])]),
            ],
        )
    }

    fn clause(relation: RelationValue, term: &str) -> Clause {
        Clause::new("words", Relation::new(relation), term)
    }

    fn doc_ids(set: &ResultSet) -> Vec<u64> {
        set.items.iter().map(|i| i.key.doc_id).collect()
    }

    #[test]
    fn test_exact_lookup() {
        let index = words_index();
        let out = index
            .search_clause(&clause(RelationValue::Exact, "cat"), &CancelToken::new())
            .unwrap();
        assert_eq!(doc_ids(&out), vec![1, 2]);

        let missing = index
            .search_clause(&clause(RelationValue::Exact, "fish"), &CancelToken::new())
            .unwrap();
        assert!(missing.is_empty());
    }

    #[test]
    fn test_wildcard_masks() {
        let index = words_index();
        let star = index
            .search_clause(&clause(RelationValue::Exact, "ca*"), &CancelToken::new())
            .unwrap();
        // car, cat, cart across docs 1 and 2.
        assert_eq!(doc_ids(&star), vec![1, 2]);

        let question = index
            .search_clause(&clause(RelationValue::Exact, "c?t"), &CancelToken::new())
            .unwrap();
        assert_eq!(doc_ids(&question), vec![1, 2]);
        assert_eq!(question.total_docs, 2);

        let leading = index
            .search_clause(&clause(RelationValue::Exact, "*at"), &CancelToken::new())
            .unwrap();
        assert!(leading.is_empty());
    }

    #[test]
    fn test_any_and_all() {
        let index = words_index();
        let any = index
            .search_clause(&clause(RelationValue::Any, "cat dog"), &CancelToken::new())
            .unwrap();
        assert_eq!(doc_ids(&any), vec![1, 2, 3]);

        let all = index
            .search_clause(&clause(RelationValue::All, "cat cart"), &CancelToken::new())
            .unwrap();
        assert_eq!(doc_ids(&all), vec![2]);
    }

    #[test]
    fn test_triple_combination() {
        let index = words_index();
        let node = QueryNode::triple(
            QueryNode::clause(clause(RelationValue::Exact, "cat")),
            BooleanOp::new(BooleanValue::Not),
            QueryNode::clause(clause(RelationValue::Exact, "cart")),
        );
        let out = index.search(&node, &CancelToken::new()).unwrap();
        assert_eq!(doc_ids(&out), vec![1]);
    }

    #[test]
    fn test_phrase_on_proximity_index() {
        let index = build(
            IndexConfig::new("text", IndexVariant::Proximity),
            &[
                (1, &[("fox", 2, &[0, 1, 0, 5]), ("jumps", 1, &[0, 2])]),
                (2, &[("fox", 1, &[0, 0])]),
            ],
        );
        let out = index
            .search_clause(
                &Clause::new("text", Relation::new(RelationValue::Phrase), "fox jumps"),
                &CancelToken::new(),
            )
            .unwrap();
        assert_eq!(doc_ids(&out), vec![1]);
        let group = &out.items[0].prox[0];
        assert_eq!(group[0].position.word, 1);
        assert_eq!(group[1].position.word, 2);
    }

    #[test]
    fn test_phrase_downgrades_without_positions() {
        let index = words_index();
        let out = index
            .search_clause(&clause(RelationValue::Phrase, "cat cart"), &CancelToken::new())
            .unwrap();
        // Standard variant intersects instead of failing.
        assert_eq!(doc_ids(&out), vec![2]);
    }

    #[test]
    fn test_ordering_relations() {
        let index = words_index();
        let ge = index
            .search_clause(&clause(RelationValue::GreaterOrEqual, "cat"), &CancelToken::new())
            .unwrap();
        // Byte order is car < cart < cat < dog, so >= cat unions cat and dog.
        assert_eq!(doc_ids(&ge), vec![1, 2, 3]);

        let lt = index
            .search_clause(&clause(RelationValue::Less, "cart"), &CancelToken::new())
            .unwrap();
        // Only "car".
        assert_eq!(doc_ids(&lt), vec![1]);
    }

    #[test]
    fn test_within_bounds() {
        let index = words_index();
        let out = index
            .search_clause(&clause(RelationValue::Within, "car cat"), &CancelToken::new())
            .unwrap();
        // car, cart, cat.
        assert_eq!(doc_ids(&out), vec![1, 2]);
    }

    #[test]
    fn test_range_variant() {
        let index = build(
            IndexConfig::new("spans", IndexVariant::Range),
            &[
                (1, &[("1900\t1950", 1, &[])]),
                (2, &[("1920\t1930", 1, &[])]),
                (3, &[("1940\t1990", 1, &[])]),
            ],
        );
        let within = index
            .search_clause(
                &Clause::new("spans", Relation::new(RelationValue::Within), "1910 1935"),
                &CancelToken::new(),
            )
            .unwrap();
        assert_eq!(doc_ids(&within), vec![2]);

        let encloses = index
            .search_clause(
                &Clause::new("spans", Relation::new(RelationValue::Encloses), "1925 1928"),
                &CancelToken::new(),
            )
            .unwrap();
        assert_eq!(doc_ids(&encloses), vec![1, 2]);
    }

    #[test]
    fn test_encloses_unsupported_elsewhere() {
        let index = words_index();
        match index.search_clause(&clause(RelationValue::Encloses, "a b"), &CancelToken::new()) {
            Err(CarrelError::UnsupportedRelation { relation, .. }) => {
                assert_eq!(relation, "encloses");
            }
            other => panic!("expected unsupported relation, got {other:?}"),
        }
    }

    #[test]
    fn test_scan_summaries_and_edges() {
        let index = words_index();
        let out = index
            .scan(&clause(RelationValue::GreaterOrEqual, "cat"), 10, ScanDirection::Forward)
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].term, "cat");
        assert_eq!(out[0].total_docs, 2);
        assert_eq!(out[0].total_occs, 3);
        assert_eq!(out[1].term, "dog");
        assert_eq!(out[1].edge, Some(ScanEdge::Last));

        let back = index
            .scan(&clause(RelationValue::LessOrEqual, "cart"), 2, ScanDirection::Backward)
            .unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back[0].term, "cart");
        assert_eq!(back[1].term, "car");
        assert_eq!(back[1].edge, Some(ScanEdge::First));

        let bounded = index
            .scan(&clause(RelationValue::GreaterOrEqual, "car"), 2, ScanDirection::Forward)
            .unwrap();
        assert_eq!(bounded.len(), 2);
        assert_eq!(bounded[1].edge, None);
    }

    #[test]
    fn test_bitmap_search_carries_bits() {
        let index = build(
            IndexConfig::new("flags", IndexVariant::Bitmap),
            &[
                (1, &[("red", 1, &[])]),
                (2, &[("red", 1, &[]), ("blue", 1, &[])]),
            ],
        );
        let out = index
            .search_clause(
                &Clause::new("flags", Relation::new(RelationValue::Exact), "red"),
                &CancelToken::new(),
            )
            .unwrap();
        assert_eq!(doc_ids(&out), vec![1, 2]);
        let (_, bits) = out.bitmap.as_ref().unwrap();
        assert_eq!(bits.get(1), Some(true));
        assert_eq!(bits.get(2), Some(true));
    }

    #[test]
    fn test_mask_helpers() {
        assert_eq!(first_mask("ca*"), Some(2));
        assert_eq!(first_mask("c\\*a*"), Some(4));
        assert_eq!(first_mask("cat"), None);
        assert_eq!(unescape("c\\*at"), "c*at");

        let pattern = compile_mask("ca*t^").unwrap();
        assert!(pattern.is_match("cat"));
        assert!(pattern.is_match("carrot"));
        assert!(!pattern.is_match("car"));
    }

    #[test]
    fn test_split_range() {
        assert_eq!(split_range("1900\t1950"), Some(("1900", "1950")));
        assert_eq!(split_range("1900 1950"), Some(("1900", "1950")));
        assert_eq!(split_range("1900"), None);
    }
}
