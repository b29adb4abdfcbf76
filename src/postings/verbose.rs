//! Structured JSON codec.
//!
//! The verbose alternative to the fixed-width encodings: records serialize
//! through `serde_json`, so they stay inspectable with external tooling and
//! have no fixed-width limits. Used where record sizes are extreme or
//! postings need to be read outside the engine.

use crate::error::Result;
use crate::postings::codec::PostingsCodec;
use crate::postings::{PostingsRecord, RecordSummary};

/// Codec storing records as JSON documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct VerboseCodec;

impl PostingsCodec for VerboseCodec {
    fn encode(&self, record: &PostingsRecord) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(record)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<PostingsRecord> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn decode_summary(&self, bytes: &[u8]) -> Result<RecordSummary> {
        let record: PostingsRecord = serde_json::from_slice(bytes)?;
        Ok(record.summary())
    }
}
