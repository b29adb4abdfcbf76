//! Batch spool records.
//!
//! During a batch epoch every term emission is appended to a spool file as
//! one line. Fields are joined by a delimiter that cannot occur in a
//! canonical term, and numeric fields are zero-padded so that sorting
//! lines as raw bytes orders them by term, then doc id, then store id.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{CarrelError, Result};
use crate::postings::DocKey;

/// Field delimiter: a NUL byte plus a tab. Canonical terms never contain
/// NUL, so the delimiter sorts below any term continuation byte.
pub const DELIM: &[u8] = b"\x00\t";

/// One spooled term emission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpoolRecord {
    /// Canonical term.
    pub term: String,
    /// Emitting document.
    pub key: DocKey,
    /// Occurrences of the term in the document.
    pub occurrences: u32,
    /// Flat position integers, grouped later by the index's prox width.
    pub positions: Vec<u32>,
}

impl SpoolRecord {
    /// Encode to one spool line (without the trailing newline).
    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.term.bytes().any(|b| b == 0 || b == b'\n') {
            return Err(CarrelError::config(format!(
                "term {:?} contains bytes reserved for the spool format",
                self.term
            )));
        }
        let mut line = Vec::with_capacity(self.term.len() + 48 + self.positions.len() * 8);
        line.extend_from_slice(self.term.as_bytes());
        line.extend_from_slice(DELIM);
        line.extend_from_slice(format!("{:020}", self.key.doc_id).as_bytes());
        line.extend_from_slice(DELIM);
        line.extend_from_slice(format!("{:010}", self.key.store_id).as_bytes());
        line.extend_from_slice(DELIM);
        line.extend_from_slice(self.occurrences.to_string().as_bytes());
        line.extend_from_slice(DELIM);
        let mut first = true;
        for p in &self.positions {
            if !first {
                line.push(b' ');
            }
            line.extend_from_slice(p.to_string().as_bytes());
            first = false;
        }
        Ok(line)
    }

    /// Decode one spool line.
    pub fn decode(line: &[u8]) -> Result<SpoolRecord> {
        let mut fields = Vec::with_capacity(5);
        let mut rest = line;
        while let Some(pos) = find_delim(rest) {
            fields.push(&rest[..pos]);
            rest = &rest[pos + DELIM.len()..];
        }
        fields.push(rest);
        if fields.len() != 5 {
            return Err(CarrelError::sort_or_merge(format!(
                "spool line has {} fields, expected 5",
                fields.len()
            )));
        }
        let term = std::str::from_utf8(fields[0])
            .map_err(|_| CarrelError::sort_or_merge("spool term is not UTF-8"))?
            .to_string();
        let doc_id = parse_int::<u64>(fields[1], "doc id")?;
        let store_id = parse_int::<u32>(fields[2], "store id")?;
        let occurrences = parse_int::<u32>(fields[3], "occurrence count")?;
        let positions = if fields[4].is_empty() {
            Vec::new()
        } else {
            fields[4]
                .split(|b| *b == b' ')
                .map(|f| parse_int::<u32>(f, "position"))
                .collect::<Result<Vec<u32>>>()?
        };
        Ok(SpoolRecord {
            term,
            key: DocKey::new(doc_id, store_id),
            occurrences,
            positions,
        })
    }
}

fn find_delim(haystack: &[u8]) -> Option<usize> {
    haystack
        .windows(DELIM.len())
        .position(|window| window == DELIM)
}

fn parse_int<T: std::str::FromStr>(field: &[u8], what: &str) -> Result<T> {
    std::str::from_utf8(field)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| {
            CarrelError::sort_or_merge(format!(
                "bad {what} field {:?} in spool line",
                String::from_utf8_lossy(field)
            ))
        })
}

/// Append-only writer for a batch epoch's spool file.
#[derive(Debug)]
pub struct SpoolWriter {
    writer: BufWriter<File>,
    path: PathBuf,
    records: u64,
}

impl SpoolWriter {
    /// Open a spool file at `path` (created or truncated).
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        Ok(SpoolWriter {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            records: 0,
        })
    }

    /// Append one record.
    pub fn append(&mut self, record: &SpoolRecord) -> Result<()> {
        let line = record.encode()?;
        self.writer.write_all(&line)?;
        self.writer.write_all(b"\n")?;
        self.records += 1;
        Ok(())
    }

    /// Records appended so far.
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Path of the spool file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush buffered lines to disk.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufRead;

    fn record(term: &str, doc: u64, positions: Vec<u32>) -> SpoolRecord {
        SpoolRecord {
            term: term.to_string(),
            key: DocKey::new(doc, 1),
            occurrences: (positions.len() as u32).max(1),
            positions,
        }
    }

    #[test]
    fn test_round_trip() {
        let original = record("fox", 42, vec![0, 3, 0, 9]);
        let line = original.encode().unwrap();
        assert_eq!(SpoolRecord::decode(&line).unwrap(), original);
    }

    #[test]
    fn test_round_trip_no_positions() {
        let original = record("dog", 7, vec![]);
        let line = original.encode().unwrap();
        assert_eq!(SpoolRecord::decode(&line).unwrap(), original);
    }

    #[test]
    fn test_byte_sort_orders_term_then_doc() {
        let lines = vec![
            record("cat", 100, vec![]).encode().unwrap(),
            record("cat", 9, vec![]).encode().unwrap(),
            record("cats", 1, vec![]).encode().unwrap(),
            record("car", 1, vec![]).encode().unwrap(),
        ];
        let mut sorted = lines.clone();
        sorted.sort();
        let decoded: Vec<(String, u64)> = sorted
            .iter()
            .map(|l| {
                let r = SpoolRecord::decode(l).unwrap();
                (r.term, r.key.doc_id)
            })
            .collect();
        assert_eq!(
            decoded,
            vec![
                ("car".to_string(), 1),
                ("cat".to_string(), 9),
                ("cat".to_string(), 100),
                ("cats".to_string(), 1),
            ]
        );
    }

    #[test]
    fn test_reserved_bytes_rejected() {
        let bad = record("fo\0x", 1, vec![]);
        assert!(bad.encode().is_err());
    }

    #[test]
    fn test_writer_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spool");
        let mut writer = SpoolWriter::create(&path).unwrap();
        writer.append(&record("fox", 1, vec![0, 1])).unwrap();
        writer.append(&record("dog", 2, vec![])).unwrap();
        writer.flush().unwrap();
        assert_eq!(writer.records(), 2);

        let file = std::fs::File::open(&path).unwrap();
        let lines: Vec<Vec<u8>> = std::io::BufReader::new(file)
            .split(b'\n')
            .map(|l| l.unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(SpoolRecord::decode(&lines[0]).unwrap().term, "fox");
    }
}
