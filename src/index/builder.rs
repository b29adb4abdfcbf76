//! The batch commit pipeline: grouping sorted spool lines by term and
//! merging them with the previously committed postings into a fresh store.
//!
//! The merge pass is a two-way walk: the old store's terms stream in key
//! order from a cursor while new term groups stream from the external
//! sorter. Terms present only on the old side are copied forward, terms
//! only on the new side are created (subject to the minimum-support
//! filter), and terms on both sides are merged with an `add` operation and
//! pre-counted totals.

use std::collections::BTreeMap;

use log::{debug, warn};

use crate::error::{CarrelError, Result};
use crate::index::IndexSummary;
use crate::index::sort::SortedLines;
use crate::index::spool::SpoolRecord;
use crate::postings::codec::{MergeHints, MergeOp};
use crate::postings::{DocKey, PostingEntry, PostingsCodec, ProximityCodec};
use crate::store::{PostingStore, ScanDirection};
use crate::util::CancelToken;

const GROUP_CANCEL_STRIDE: u64 = 1024;

/// One term emitted by extraction for one document.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TermEmission {
    /// Occurrences of the term in the document.
    pub occurrences: u32,
    /// Flat position integers, `prox_ints` per occurrence.
    pub positions: Vec<u32>,
    /// Normalized sortable form; when present it replaces the term as the
    /// stored key (zero-padded numbers, `start\tend` range keys).
    pub sort_value: Option<String>,
}

/// The canonical term-emission map for one document, ordered by term.
pub type TermEmissions = BTreeMap<String, TermEmission>;

/// Options controlling a batch commit.
#[derive(Debug, Clone, Default)]
pub struct CommitOptions {
    /// Skip terms whose merge fails instead of aborting the commit.
    pub best_effort: bool,
    /// Cancellation/deadline token checked throughout the commit.
    pub cancel: CancelToken,
}

/// Counters reported by a successful commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitStats {
    /// Terms written to the fresh store.
    pub terms: u64,
    /// Terms that did not exist before this commit.
    pub new_terms: u64,
    /// Postings written (documents across all terms).
    pub postings: u64,
    /// Terms skipped (below minimum support, or failed under best-effort).
    pub skipped_terms: u64,
}

/// All postings of one term gathered from the sorted spool stream.
#[derive(Debug)]
pub(crate) struct TermGroup {
    pub term: String,
    pub entries: Vec<PostingEntry>,
    pub occs: u64,
}

/// Streams sorted spool lines and yields one [`TermGroup`] per term.
pub(crate) struct GroupReader {
    lines: SortedLines,
    pending: Option<SpoolRecord>,
}

impl GroupReader {
    pub(crate) fn new(lines: SortedLines) -> Self {
        GroupReader {
            lines,
            pending: None,
        }
    }

    fn next_record(&mut self) -> Result<Option<SpoolRecord>> {
        if let Some(record) = self.pending.take() {
            return Ok(Some(record));
        }
        match self.lines.next_line()? {
            Some(line) => Ok(Some(SpoolRecord::decode(&line)?)),
            None => Ok(None),
        }
    }

    /// Gather the next term's entries. Duplicate doc emissions for one term
    /// fold together; positions are grouped per the proximity width when
    /// one is configured.
    pub(crate) fn next_group(&mut self, prox: Option<&ProximityCodec>) -> Result<Option<TermGroup>> {
        let Some(first) = self.next_record()? else {
            return Ok(None);
        };
        let term = first.term.clone();
        let mut entries: Vec<PostingEntry> = Vec::new();
        let mut occs = 0u64;

        let mut record = first;
        loop {
            let entry = entry_from(&record, prox)?;
            occs += u64::from(entry.occurrences);
            match entries.last_mut() {
                Some(last) if last.key == entry.key => {
                    last.occurrences += entry.occurrences;
                    last.positions.extend(entry.positions);
                }
                _ => entries.push(entry),
            }

            match self.next_record()? {
                Some(next) if next.term == term => record = next,
                Some(next) => {
                    self.pending = Some(next);
                    break;
                }
                None => break,
            }
        }
        Ok(Some(TermGroup { term, entries, occs }))
    }
}

fn entry_from(record: &SpoolRecord, prox: Option<&ProximityCodec>) -> Result<PostingEntry> {
    let mut entry = PostingEntry::new(record.key, record.occurrences);
    if let Some(prox) = prox {
        entry.positions = prox.group_positions(&record.positions)?;
        if entry.positions.len() != record.occurrences as usize {
            return Err(CarrelError::sort_or_merge(format!(
                "doc {} spooled {} occurrences of '{}' but {} positions",
                record.key.doc_id,
                record.occurrences,
                record.term,
                entry.positions.len()
            )));
        }
    }
    Ok(entry)
}

/// Inputs to the merge pass.
pub(crate) struct MergeContext<'a> {
    pub codec: &'a dyn PostingsCodec,
    pub prox: Option<&'a ProximityCodec>,
    pub old: &'a dyn PostingStore,
    pub fresh: &'a dyn PostingStore,
    pub minimum_support: u64,
    pub best_effort: bool,
    pub track_vectors: bool,
    pub track_freq: bool,
    pub cancel: &'a CancelToken,
}

/// One written term's frequency totals, for the frequency-ranked lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TermFreq {
    pub term: String,
    pub term_id: u64,
    pub docs: u64,
    pub occs: u64,
}

/// Everything the merge pass produced besides the fresh store's contents.
pub(crate) struct MergeOutcome {
    /// Rebuilt term-level statistics for the fresh store.
    pub summary: IndexSummary,
    /// Next free term id after assignment.
    pub next_term_id: u64,
    /// Commit counters.
    pub stats: CommitStats,
    /// New term ids assigned this pass: `(term_id, term)`.
    pub new_term_ids: Vec<(u64, String)>,
    /// Per-document additions: term id and occurrence count per new
    /// posting, for the vector and document-stats side structures.
    pub doc_additions: BTreeMap<DocKey, Vec<(u64, u32)>>,
    /// Frequency totals per written term, for the frequency-ranked lists.
    pub freq_entries: Vec<TermFreq>,
}

/// Run the merge pass: old store contents plus sorted new groups into the
/// fresh store.
pub(crate) fn merge_pass(
    ctx: &MergeContext<'_>,
    lines: SortedLines,
    mut next_term_id: u64,
) -> Result<MergeOutcome> {
    let mut reader = GroupReader::new(lines);
    let mut old_cursor = ctx.old.cursor(None, ScanDirection::Forward)?;
    let mut old_next = old_cursor.next_entry()?;
    let mut group = reader.next_group(ctx.prox)?;

    let mut outcome = MergeOutcome {
        summary: IndexSummary::default(),
        next_term_id,
        stats: CommitStats::default(),
        new_term_ids: Vec::new(),
        doc_additions: BTreeMap::new(),
        freq_entries: Vec::new(),
    };
    let mut processed = 0u64;

    loop {
        processed += 1;
        if processed % GROUP_CANCEL_STRIDE == 0 {
            ctx.cancel.check("commit merge pass")?;
        }

        enum Side {
            OldOnly,
            NewOnly,
            Both,
        }
        let side = match (&old_next, &group) {
            (None, None) => break,
            (Some(_), None) => Side::OldOnly,
            (None, Some(_)) => Side::NewOnly,
            (Some((okey, _)), Some(g)) => match okey.as_slice().cmp(g.term.as_bytes()) {
                std::cmp::Ordering::Less => Side::OldOnly,
                std::cmp::Ordering::Greater => Side::NewOnly,
                std::cmp::Ordering::Equal => Side::Both,
            },
        };

        match side {
            Side::OldOnly => {
                let (okey, oval) = old_next.take().ok_or_else(|| {
                    CarrelError::sort_or_merge("old-side cursor lost its entry")
                })?;
                let term = std::str::from_utf8(&okey)
                    .map_err(|_| CarrelError::sort_or_merge("stored term key is not UTF-8"))?;
                let summary = ctx.codec.decode_summary(&oval)?;
                ctx.fresh.put(&okey, &oval)?;
                record_written(&mut outcome, term, &summary, ctx.track_freq);
                old_next = old_cursor.next_entry()?;
            }
            Side::NewOnly => {
                let g = group.take().ok_or_else(|| {
                    CarrelError::sort_or_merge("group reader lost its group")
                })?;
                if (g.entries.len() as u64) < ctx.minimum_support {
                    debug!(
                        "skipping term '{}' below minimum support ({} < {})",
                        g.term,
                        g.entries.len(),
                        ctx.minimum_support
                    );
                    outcome.stats.skipped_terms += 1;
                } else {
                    let term_id = next_term_id;
                    match write_group(ctx, &mut outcome, &g, None, term_id) {
                        Ok(()) => {
                            next_term_id += 1;
                            outcome.stats.new_terms += 1;
                            outcome.new_term_ids.push((term_id, g.term.clone()));
                        }
                        Err(e) if ctx.best_effort => {
                            warn!("skipping term '{}' after merge failure: {e}", g.term);
                            outcome.stats.skipped_terms += 1;
                        }
                        Err(e) => return Err(e),
                    }
                }
                group = reader.next_group(ctx.prox)?;
            }
            Side::Both => {
                let (okey, oval) = old_next.take().ok_or_else(|| {
                    CarrelError::sort_or_merge("old-side cursor lost its entry")
                })?;
                let g = group.take().ok_or_else(|| {
                    CarrelError::sort_or_merge("group reader lost its group")
                })?;
                let merged = ctx
                    .codec
                    .decode(&oval)
                    .and_then(|old| write_group(ctx, &mut outcome, &g, Some(old), 0));
                match merged {
                    Ok(()) => {}
                    Err(e) if ctx.best_effort => {
                        warn!(
                            "keeping previous postings for term '{}' after merge failure: {e}",
                            g.term
                        );
                        ctx.fresh.put(&okey, &oval)?;
                        let summary = ctx.codec.decode_summary(&oval)?;
                        record_written(&mut outcome, &g.term, &summary, ctx.track_freq);
                        outcome.stats.skipped_terms += 1;
                    }
                    Err(e) => return Err(e),
                }
                old_next = old_cursor.next_entry()?;
                group = reader.next_group(ctx.prox)?;
            }
        }
    }

    outcome.next_term_id = next_term_id;
    Ok(outcome)
}

/// Merge one group into the fresh store (against `old` when the term
/// existed) and record its side-structure contributions.
fn write_group(
    ctx: &MergeContext<'_>,
    outcome: &mut MergeOutcome,
    group: &TermGroup,
    old: Option<crate::postings::PostingsRecord>,
    new_term_id: u64,
) -> Result<()> {
    let term_id = old.as_ref().map(|r| r.term_id).unwrap_or(new_term_id);
    let hints = MergeHints {
        docs: group.entries.len() as u64,
        occs: group.occs,
    };
    let merged = ctx.codec.merge(
        old,
        term_id,
        &group.entries,
        MergeOp::Add,
        Some(hints),
    )?;
    let bytes = ctx.codec.encode(&merged)?;
    ctx.fresh.put(group.term.as_bytes(), &bytes)?;
    record_written(outcome, &group.term, &merged.summary(), ctx.track_freq);

    if ctx.track_vectors {
        for entry in &group.entries {
            outcome
                .doc_additions
                .entry(entry.key)
                .or_default()
                .push((term_id, entry.occurrences));
        }
    }
    Ok(())
}

fn record_written(
    outcome: &mut MergeOutcome,
    term: &str,
    summary: &crate::postings::RecordSummary,
    track_freq: bool,
) {
    let s = &mut outcome.summary;
    s.terms += 1;
    s.total_postings += summary.total_docs;
    s.total_occurrences += summary.total_occs;
    s.max_term_docs = s.max_term_docs.max(summary.total_docs);
    s.max_term_occs = s.max_term_occs.max(summary.total_occs);
    s.total_term_chars += term.len() as u64;
    s.max_term_id = s.max_term_id.max(summary.term_id);
    outcome.stats.terms += 1;
    outcome.stats.postings += summary.total_docs;
    if track_freq {
        outcome.freq_entries.push(TermFreq {
            term: term.to_string(),
            term_id: summary.term_id,
            docs: summary.total_docs,
            occs: summary.total_occs,
        });
    }
}
