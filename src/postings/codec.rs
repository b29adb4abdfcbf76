//! The codec seam between records and stored bytes.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{CarrelError, Result};
use crate::postings::{PostingEntry, PostingsRecord, RecordSummary};

/// Fixed-width codecs lead with this header: term id, total docs, total
/// occurrences, all little-endian u64. Summaries decode from the header
/// alone.
pub const HEADER_LEN: usize = 24;

/// How incoming entries combine with an existing record.
///
/// `Replace` and `Delete` locate targets by binary search over the sorted
/// entry list; `Add` is an append when the incoming entries all sort after
/// the existing ones (the batch-commit case), otherwise a sorted merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOp {
    /// New documents for this term; incoming keys win on collision.
    Add,
    /// Re-indexed documents; incoming entries overwrite by doc key.
    Replace,
    /// Deleted documents; incoming keys are removed, absent keys ignored.
    Delete,
}

/// Pre-computed totals for an `Add` merge, letting the caller skip the
/// rescan when it already counted the incoming group.
#[derive(Debug, Clone, Copy)]
pub struct MergeHints {
    /// Documents added.
    pub docs: u64,
    /// Occurrences added.
    pub occs: u64,
}

/// Encoding, decoding and merge strategy for one index variant.
///
/// Codecs are pure: they never read or write a store.
pub trait PostingsCodec: Send + Sync + std::fmt::Debug {
    /// Encode a record to its stored byte form.
    fn encode(&self, record: &PostingsRecord) -> Result<Vec<u8>>;

    /// Decode a stored byte form back into a record.
    fn decode(&self, bytes: &[u8]) -> Result<PostingsRecord>;

    /// Decode only the aggregate counts.
    fn decode_summary(&self, bytes: &[u8]) -> Result<RecordSummary>;

    /// Merge incoming entries into an existing record (or start a fresh
    /// record when `existing` is `None`).
    fn merge(
        &self,
        existing: Option<PostingsRecord>,
        term_id: u64,
        incoming: &[PostingEntry],
        op: MergeOp,
        hints: Option<MergeHints>,
    ) -> Result<PostingsRecord> {
        merge_entries(existing, term_id, incoming, op, hints)
    }
}

/// Write the fixed-width record header.
pub(crate) fn encode_header(out: &mut Vec<u8>, summary: &RecordSummary) {
    let mut buf = [0u8; HEADER_LEN];
    LittleEndian::write_u64(&mut buf[0..8], summary.term_id);
    LittleEndian::write_u64(&mut buf[8..16], summary.total_docs);
    LittleEndian::write_u64(&mut buf[16..24], summary.total_occs);
    out.extend_from_slice(&buf);
}

/// Read the fixed-width record header.
pub(crate) fn decode_header(bytes: &[u8]) -> Result<RecordSummary> {
    if bytes.len() < HEADER_LEN {
        return Err(CarrelError::store(format!(
            "postings record truncated: {} bytes, header needs {HEADER_LEN}",
            bytes.len()
        )));
    }
    Ok(RecordSummary {
        term_id: LittleEndian::read_u64(&bytes[0..8]),
        total_docs: LittleEndian::read_u64(&bytes[8..16]),
        total_occs: LittleEndian::read_u64(&bytes[16..24]),
    })
}

/// Entry-list merge shared by all entry-based codecs.
pub fn merge_entries(
    existing: Option<PostingsRecord>,
    term_id: u64,
    incoming: &[PostingEntry],
    op: MergeOp,
    hints: Option<MergeHints>,
) -> Result<PostingsRecord> {
    let mut record = match existing {
        Some(record) => record,
        None => PostingsRecord::new(term_id),
    };

    match op {
        MergeOp::Add => {
            let disjoint_tail = match (record.entries.last(), incoming.first()) {
                (Some(last), Some(first)) => last.key < first.key,
                _ => true,
            };
            if disjoint_tail {
                record.entries.extend_from_slice(incoming);
                if let Some(hints) = hints {
                    record.total_docs += hints.docs;
                    record.total_occs += hints.occs;
                    return Ok(record);
                }
            } else {
                for entry in incoming {
                    upsert(&mut record.entries, entry);
                }
            }
        }
        MergeOp::Replace => {
            for entry in incoming {
                upsert(&mut record.entries, entry);
            }
        }
        MergeOp::Delete => {
            for entry in incoming {
                if let Ok(pos) = record.entries.binary_search_by_key(&entry.key, |e| e.key) {
                    record.entries.remove(pos);
                }
            }
        }
    }

    record.recompute_totals();
    Ok(record)
}

fn upsert(entries: &mut Vec<PostingEntry>, entry: &PostingEntry) {
    match entries.binary_search_by_key(&entry.key, |e| e.key) {
        Ok(pos) => entries[pos] = entry.clone(),
        Err(pos) => entries.insert(pos, entry.clone()),
    }
}
