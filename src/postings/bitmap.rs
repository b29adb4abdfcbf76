//! Bit-set codec for high-frequency terms.
//!
//! Postings collapse to one bit per document ordinal: occurrence counts and
//! positions are not kept, and every document belongs to the single store
//! the index is configured with. Layout: the 24-byte header, a u64 bit
//! count, then the bit-set bytes (MSB-first within each byte).

use bit_vec::BitVec;
use byteorder::{ByteOrder, LittleEndian};

use crate::error::{CarrelError, Result};
use crate::postings::codec::{
    HEADER_LEN, MergeHints, MergeOp, PostingsCodec, decode_header, encode_header,
};
use crate::postings::{DocKey, PostingEntry, PostingsRecord, RecordSummary};

/// Codec storing postings as a bit-set over doc id.
#[derive(Debug, Clone, Copy, Default)]
pub struct BitmapCodec {
    store_id: u32,
}

impl BitmapCodec {
    /// Create a codec whose documents all live in `store_id`.
    pub fn new(store_id: u32) -> Self {
        BitmapCodec { store_id }
    }

    /// Decode straight to the bit-set, for bitwise combination.
    pub fn decode_bits(&self, bytes: &[u8]) -> Result<(RecordSummary, BitVec)> {
        let summary = decode_header(bytes)?;
        let body = &bytes[HEADER_LEN..];
        if body.len() < 8 {
            return Err(CarrelError::store("bitmap postings missing bit count"));
        }
        let nbits = LittleEndian::read_u64(&body[0..8]) as usize;
        let mut bits = BitVec::from_bytes(&body[8..]);
        if nbits > bits.len() {
            return Err(CarrelError::store(format!(
                "bitmap declares {nbits} bits but carries {}",
                bits.len()
            )));
        }
        bits.truncate(nbits);
        Ok((summary, bits))
    }

    /// Encode a bit-set under the given identity.
    pub fn encode_bits(&self, term_id: u64, bits: &BitVec) -> Result<Vec<u8>> {
        let ones = bits.iter().filter(|b| *b).count() as u64;
        let mut out = Vec::with_capacity(HEADER_LEN + 8 + bits.len() / 8 + 1);
        encode_header(
            &mut out,
            &RecordSummary {
                term_id,
                total_docs: ones,
                total_occs: ones,
            },
        );
        let mut len_buf = [0u8; 8];
        LittleEndian::write_u64(&mut len_buf, bits.len() as u64);
        out.extend_from_slice(&len_buf);
        out.extend_from_slice(&bits.to_bytes());
        Ok(out)
    }

    fn record_to_bits(&self, record: &PostingsRecord) -> Result<BitVec> {
        let max = record.entries.last().map(|e| e.key.doc_id + 1).unwrap_or(0);
        let mut bits = BitVec::from_elem(max as usize, false);
        for entry in &record.entries {
            if entry.key.store_id != self.store_id {
                return Err(CarrelError::store(format!(
                    "bitmap index is bound to store {}, got doc in store {}",
                    self.store_id, entry.key.store_id
                )));
            }
            bits.set(entry.key.doc_id as usize, true);
        }
        Ok(bits)
    }

    fn bits_to_record(&self, summary: RecordSummary, bits: &BitVec) -> PostingsRecord {
        let entries: Vec<PostingEntry> = bits
            .iter()
            .enumerate()
            .filter(|(_, set)| *set)
            .map(|(doc, _)| PostingEntry::new(DocKey::new(doc as u64, self.store_id), 1))
            .collect();
        let mut record = PostingsRecord {
            term_id: summary.term_id,
            total_docs: summary.total_docs,
            total_occs: summary.total_occs,
            entries,
        };
        record.recompute_totals();
        record
    }
}

impl PostingsCodec for BitmapCodec {
    fn encode(&self, record: &PostingsRecord) -> Result<Vec<u8>> {
        let bits = self.record_to_bits(record)?;
        self.encode_bits(record.term_id, &bits)
    }

    fn decode(&self, bytes: &[u8]) -> Result<PostingsRecord> {
        let (summary, bits) = self.decode_bits(bytes)?;
        Ok(self.bits_to_record(summary, &bits))
    }

    fn decode_summary(&self, bytes: &[u8]) -> Result<RecordSummary> {
        decode_header(bytes)
    }

    fn merge(
        &self,
        existing: Option<PostingsRecord>,
        term_id: u64,
        incoming: &[PostingEntry],
        op: MergeOp,
        _hints: Option<MergeHints>,
    ) -> Result<PostingsRecord> {
        let mut bits = match &existing {
            Some(record) => self.record_to_bits(record)?,
            None => BitVec::new(),
        };
        let set_to = !matches!(op, MergeOp::Delete);
        for entry in incoming {
            if entry.key.store_id != self.store_id {
                return Err(CarrelError::store(format!(
                    "bitmap index is bound to store {}, got doc in store {}",
                    self.store_id, entry.key.store_id
                )));
            }
            let doc = entry.key.doc_id as usize;
            if doc >= bits.len() {
                if !set_to {
                    continue;
                }
                bits.grow(doc + 1 - bits.len(), false);
            }
            bits.set(doc, set_to);
        }
        let summary = RecordSummary {
            term_id,
            total_docs: 0,
            total_occs: 0,
        };
        Ok(self.bits_to_record(summary, &bits))
    }
}
