//! Fixed-width codec carrying occurrence positions.
//!
//! Layout: the 24-byte header, then per document a 16-byte entry prefix
//! (doc id u64, store id u32, occurrences u32) followed by `prox_ints`
//! little-endian u32s per occurrence. `prox_ints` is 2 (element, word) or
//! 3 (element, word, character offset) and is fixed per index.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{CarrelError, Result};
use crate::postings::codec::{HEADER_LEN, PostingsCodec, decode_header, encode_header};
use crate::postings::standard::{ENTRY_LEN, decode_entry, encode_entry};
use crate::postings::{PostingsRecord, Position, RecordSummary};

/// Codec for positional postings.
#[derive(Debug, Clone, Copy)]
pub struct ProximityCodec {
    prox_ints: u8,
}

impl ProximityCodec {
    /// Create a codec recording `prox_ints` integers per occurrence.
    pub fn new(prox_ints: u8) -> Result<Self> {
        if prox_ints != 2 && prox_ints != 3 {
            return Err(CarrelError::config(format!(
                "prox_ints must be 2 or 3, got {prox_ints}"
            )));
        }
        Ok(ProximityCodec { prox_ints })
    }

    /// Integers recorded per occurrence.
    pub fn prox_ints(&self) -> u8 {
        self.prox_ints
    }

    /// Group a flat position-integer list (as emitted by extraction) into
    /// [`Position`] values per this codec's width.
    pub fn group_positions(&self, flat: &[u32]) -> Result<Vec<Position>> {
        let width = self.prox_ints as usize;
        if flat.len() % width != 0 {
            return Err(CarrelError::config(format!(
                "{} position integers do not divide into groups of {width}",
                flat.len()
            )));
        }
        Ok(flat
            .chunks_exact(width)
            .map(|chunk| {
                if width == 3 {
                    Position::with_offset(chunk[0], chunk[1], chunk[2])
                } else {
                    Position::new(chunk[0], chunk[1])
                }
            })
            .collect())
    }
}

impl PostingsCodec for ProximityCodec {
    fn encode(&self, record: &PostingsRecord) -> Result<Vec<u8>> {
        let width = self.prox_ints as usize;
        let mut out = Vec::with_capacity(HEADER_LEN + record.entries.len() * ENTRY_LEN);
        encode_header(&mut out, &record.summary());
        for entry in &record.entries {
            if entry.positions.len() != entry.occurrences as usize {
                return Err(CarrelError::store(format!(
                    "doc {} has {} occurrences but {} positions",
                    entry.key.doc_id,
                    entry.occurrences,
                    entry.positions.len()
                )));
            }
            encode_entry(&mut out, entry);
            for position in &entry.positions {
                let mut buf = [0u8; 12];
                LittleEndian::write_u32(&mut buf[0..4], position.element);
                LittleEndian::write_u32(&mut buf[4..8], position.word);
                if width == 3 {
                    let offset = position.char_offset.ok_or_else(|| {
                        CarrelError::store(format!(
                            "doc {} position lacks the configured character offset",
                            entry.key.doc_id
                        ))
                    })?;
                    LittleEndian::write_u32(&mut buf[8..12], offset);
                }
                out.extend_from_slice(&buf[..width * 4]);
            }
        }
        Ok(out)
    }

    fn decode(&self, bytes: &[u8]) -> Result<PostingsRecord> {
        let width = self.prox_ints as usize;
        let summary = decode_header(bytes)?;
        let mut body = &bytes[HEADER_LEN..];
        let mut entries = Vec::new();
        while !body.is_empty() {
            if body.len() < ENTRY_LEN {
                return Err(CarrelError::store("proximity postings entry truncated"));
            }
            let mut entry = decode_entry(&body[..ENTRY_LEN]);
            body = &body[ENTRY_LEN..];

            let prox_len = entry.occurrences as usize * width * 4;
            if body.len() < prox_len {
                return Err(CarrelError::store(format!(
                    "doc {} positions truncated",
                    entry.key.doc_id
                )));
            }
            entry.positions = body[..prox_len]
                .chunks_exact(width * 4)
                .map(|chunk| {
                    let element = LittleEndian::read_u32(&chunk[0..4]);
                    let word = LittleEndian::read_u32(&chunk[4..8]);
                    if width == 3 {
                        Position::with_offset(element, word, LittleEndian::read_u32(&chunk[8..12]))
                    } else {
                        Position::new(element, word)
                    }
                })
                .collect();
            body = &body[prox_len..];
            entries.push(entry);
        }
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
