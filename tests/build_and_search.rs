//! End-to-end scenarios: batch-build an index over in-memory stores, then
//! search and scan it.

use std::sync::Arc;

use carrel::index::{
    CommitOptions, Index, IndexConfig, IndexVariant, ScanEdge, TermEmission, TermEmissions,
};
use carrel::postings::DocKey;
use carrel::query::{Clause, Relation, RelationValue};
use carrel::store::{MemoryStoreFactory, ScanDirection};
use carrel::util::CancelToken;

/// Word-split a text into emissions with `(element, word)` positions.
fn emissions(text: &str) -> TermEmissions {
    let mut out = TermEmissions::new();
    for (word, term) in text.split_whitespace().enumerate() {
        let entry = out.entry(term.to_string()).or_insert_with(|| TermEmission {
            occurrences: 0,
            positions: Vec::new(),
            sort_value: None,
        });
        entry.occurrences += 1;
        entry.positions.extend([0, word as u32]);
    }
    out
}

fn build(name: &str, docs: &[(u64, &str)]) -> Index {
    let config = IndexConfig::new(name, IndexVariant::Proximity);
    let index = Index::new(config, Arc::new(MemoryStoreFactory)).unwrap();
    index.begin_indexing().unwrap();
    for (doc_id, text) in docs {
        index
            .index_record(DocKey::new(*doc_id, 0), &emissions(text))
            .unwrap();
    }
    index.commit_indexing(CommitOptions::default()).unwrap();
    index
}

fn corpus() -> Index {
    build(
        "words",
        &[
            (1, "a fox jumps high a fox"),
            (2, "lazy dog and a fox"),
            (3, "the dog sleeps"),
        ],
    )
}

fn exact(term: &str) -> Clause {
    Clause::new("words", Relation::new(RelationValue::Exact), term)
}

#[test]
fn test_exact_search_after_build() {
    let index = corpus();
    let cancel = CancelToken::new();

    let fox = index.search_clause(&exact("fox"), &cancel).unwrap();
    let docs: Vec<u64> = fox.items.iter().map(|i| i.key.doc_id).collect();
    assert_eq!(docs, vec![1, 2]);
    assert_eq!(fox.items[0].occurrences, 2);
    assert_eq!(fox.items[1].occurrences, 1);

    assert!(index.search_clause(&exact("cat"), &cancel).unwrap().is_empty());
}

#[test]
fn test_scan_statistics() {
    let index = corpus();
    let entries = index
        .scan(
            &Clause::new("words", Relation::new(RelationValue::GreaterOrEqual), "fox"),
            1,
            ScanDirection::Forward,
        )
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].term, "fox");
    assert_eq!(entries[0].total_docs, 2);
    assert_eq!(entries[0].total_occs, 3);
}

#[test]
fn test_scan_to_store_edges() {
    let index = corpus();
    // Terms: a, and, dog, fox, high, jumps, lazy, sleeps, the.
    let forward = index
        .scan(
            &Clause::new("words", Relation::new(RelationValue::GreaterOrEqual), "sleeps"),
            5,
            ScanDirection::Forward,
        )
        .unwrap();
    assert_eq!(forward.len(), 2);
    assert_eq!(forward[1].term, "the");
    assert_eq!(forward[1].edge, Some(ScanEdge::Last));

    let backward = index
        .scan(
            &Clause::new("words", Relation::new(RelationValue::LessOrEqual), "and"),
            5,
            ScanDirection::Backward,
        )
        .unwrap();
    assert_eq!(backward.len(), 2);
    assert_eq!(backward[1].term, "a");
    assert_eq!(backward[1].edge, Some(ScanEdge::First));
}

#[test]
fn test_incremental_commits_match_single_commit() {
    let docs = [(1u64, "a fox jumps high a fox"), (2, "lazy dog and a fox")];
    let whole = build("whole", &docs);

    let config = IndexConfig::new("steps", IndexVariant::Proximity);
    let steps = Index::new(config, Arc::new(MemoryStoreFactory)).unwrap();
    for (doc_id, text) in &docs {
        steps.begin_indexing().unwrap();
        steps
            .index_record(DocKey::new(*doc_id, 0), &emissions(text))
            .unwrap();
        steps.commit_indexing(CommitOptions::default()).unwrap();
    }

    for term in ["a", "fox", "jumps", "dog"] {
        let a = whole.fetch_term(term).unwrap().unwrap();
        let b = steps.fetch_term(term).unwrap().unwrap();
        assert_eq!(a.entries, b.entries, "postings diverge for '{term}'");
        assert_eq!(a.total_docs, b.total_docs);
        assert_eq!(a.total_occs, b.total_occs);
    }

    let a = whole.summary();
    let b = steps.summary();
    assert_eq!(a.terms, b.terms);
    assert_eq!(a.total_postings, b.total_postings);
    assert_eq!(a.total_occurrences, b.total_occurrences);
    assert_eq!(a.doc_count, b.doc_count);
    assert_eq!(a.total_words, b.total_words);
}

#[test]
fn test_delete_after_commit() {
    let index = corpus();
    let cancel = CancelToken::new();

    index
        .delete_record(DocKey::new(2, 0), &emissions("lazy dog and a fox"))
        .unwrap();

    let fox = index.search_clause(&exact("fox"), &cancel).unwrap();
    let docs: Vec<u64> = fox.items.iter().map(|i| i.key.doc_id).collect();
    assert_eq!(docs, vec![1]);

    // "lazy" only appeared in doc 2 and is gone entirely.
    assert!(index.fetch_term("lazy").unwrap().is_none());
    assert_eq!(index.summary().doc_count, 2);
}

#[test]
fn test_wildcard_search() {
    let index = build("words", &[(1, "jam jar joke"), (2, "jar dog")]);
    let cancel = CancelToken::new();

    let out = index.search_clause(&exact("ja*"), &cancel).unwrap();
    let docs: Vec<u64> = out.items.iter().map(|i| i.key.doc_id).collect();
    assert_eq!(docs, vec![1, 2]);

    let one = index.search_clause(&exact("j?m"), &cancel).unwrap();
    let docs: Vec<u64> = one.items.iter().map(|i| i.key.doc_id).collect();
    assert_eq!(docs, vec![1]);
}

#[test]
fn test_second_batch_extends_postings() {
    let index = corpus();
    index.begin_indexing().unwrap();
    index
        .index_record(DocKey::new(9, 0), &emissions("fox den"))
        .unwrap();
    index.commit_indexing(CommitOptions::default()).unwrap();

    let fox = index.fetch_term("fox").unwrap().unwrap();
    assert_eq!(fox.total_docs, 3);
    assert_eq!(fox.total_occs, 4);
    let last = fox.entries.last().unwrap();
    assert_eq!(last.key.doc_id, 9);
}
