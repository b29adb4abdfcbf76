//! Codec for the vector variant: standard layout plus bulk array decode.
//!
//! Stored bytes are identical to [`StandardCodec`]; the variant exists for
//! consumers that want the postings as a flat `(doc_id, frequency)` array
//! for feature export without building entry structs.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{CarrelError, Result};
use crate::postings::codec::{HEADER_LEN, PostingsCodec, decode_header};
use crate::postings::standard::{ENTRY_LEN, StandardCodec};
use crate::postings::{PostingsRecord, RecordSummary};

/// Codec exposing postings as doc-id/frequency arrays.
#[derive(Debug, Clone, Copy, Default)]
pub struct VectorCodec;

impl VectorCodec {
    /// Decode to a flat `(doc_id, occurrences)` array, skipping entry
    /// construction.
    pub fn decode_array(&self, bytes: &[u8]) -> Result<(RecordSummary, Vec<(u64, u32)>)> {
        let summary = decode_header(bytes)?;
        let body = &bytes[HEADER_LEN..];
        if body.len() % ENTRY_LEN != 0 {
            return Err(CarrelError::store(format!(
                "vector postings body is {} bytes, not a multiple of {ENTRY_LEN}",
                body.len()
            )));
        }
        let pairs = body
            .chunks_exact(ENTRY_LEN)
            .map(|chunk| {
                (
                    LittleEndian::read_u64(&chunk[0..8]),
                    LittleEndian::read_u32(&chunk[12..16]),
                )
            })
            .collect();
        Ok((summary, pairs))
    }
}

impl PostingsCodec for VectorCodec {
    fn encode(&self, record: &PostingsRecord) -> Result<Vec<u8>> {
        StandardCodec.encode(record)
    }

    fn decode(&self, bytes: &[u8]) -> Result<PostingsRecord> {
        StandardCodec.decode(bytes)
    }

    fn decode_summary(&self, bytes: &[u8]) -> Result<RecordSummary> {
        decode_header(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::postings::{DocKey, PostingEntry};

    #[test]
    fn test_decode_array_matches_entries() {
        let record = PostingsRecord::from_entries(
            11,
            vec![
                PostingEntry::new(DocKey::new(2, 0), 4),
                PostingEntry::new(DocKey::new(8, 0), 1),
            ],
        );
        let codec = VectorCodec;
        let bytes = codec.encode(&record).unwrap();

        let (summary, pairs) = codec.decode_array(&bytes).unwrap();
        assert_eq!(summary.term_id, 11);
        assert_eq!(pairs, vec![(2, 4), (8, 1)]);
        assert_eq!(codec.decode(&bytes).unwrap(), record);
    }
}
