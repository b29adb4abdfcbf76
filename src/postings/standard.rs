//! Dense fixed-width codec for the standard index variant.
//!
//! Layout: the 24-byte header, then one 16-byte entry per document
//! (doc id u64, store id u32, occurrences u32), all little-endian.
//! Positions are never stored.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{CarrelError, Result};
use crate::postings::codec::{HEADER_LEN, PostingsCodec, decode_header, encode_header};
use crate::postings::{DocKey, PostingEntry, PostingsRecord, RecordSummary};

pub(crate) const ENTRY_LEN: usize = 16;

/// Codec for plain docid/frequency postings.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardCodec;

impl PostingsCodec for StandardCodec {
    fn encode(&self, record: &PostingsRecord) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(HEADER_LEN + record.entries.len() * ENTRY_LEN);
        encode_header(&mut out, &record.summary());
        for entry in &record.entries {
            encode_entry(&mut out, entry);
        }
        Ok(out)
    }

    fn decode(&self, bytes: &[u8]) -> Result<PostingsRecord> {
        let summary = decode_header(bytes)?;
        let body = &bytes[HEADER_LEN..];
        if body.len() % ENTRY_LEN != 0 {
            return Err(CarrelError::store(format!(
                "standard postings body is {} bytes, not a multiple of {ENTRY_LEN}",
                body.len()
            )));
        }
        let entries = body.chunks_exact(ENTRY_LEN).map(decode_entry).collect();
        Ok(PostingsRecord {
            term_id: summary.term_id,
            total_docs: summary.total_docs,
            total_occs: summary.total_occs,
            entries,
        })
    }

    fn decode_summary(&self, bytes: &[u8]) -> Result<RecordSummary> {
        decode_header(bytes)
    }
}

pub(crate) fn encode_entry(out: &mut Vec<u8>, entry: &PostingEntry) {
    let mut buf = [0u8; ENTRY_LEN];
    LittleEndian::write_u64(&mut buf[0..8], entry.key.doc_id);
    LittleEndian::write_u32(&mut buf[8..12], entry.key.store_id);
    LittleEndian::write_u32(&mut buf[12..16], entry.occurrences);
    out.extend_from_slice(&buf);
}

pub(crate) fn decode_entry(chunk: &[u8]) -> PostingEntry {
    PostingEntry::new(
        DocKey::new(
            LittleEndian::read_u64(&chunk[0..8]),
            LittleEndian::read_u32(&chunk[8..12]),
        ),
        LittleEndian::read_u32(&chunk[12..16]),
    )
}
