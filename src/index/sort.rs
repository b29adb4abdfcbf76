//! In-process external merge-sort for spool lines.
//!
//! Lines accumulate in memory and are sorted per run with rayon; runs over
//! the spill threshold go to temp files. Finishing yields one globally
//! sorted stream via a k-way heap merge over the spilled runs plus the
//! final in-memory run. The cancellation token is checked between runs and
//! periodically inside the merge.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};

use log::debug;
use rayon::slice::ParallelSliceMut;
use tempfile::TempDir;

use crate::error::Result;
use crate::util::CancelToken;

const MERGE_CANCEL_STRIDE: usize = 4096;

/// External sorter over byte lines.
#[derive(Debug)]
pub struct ExternalSorter {
    buffer: Vec<Vec<u8>>,
    buffered_bytes: usize,
    spill_threshold: usize,
    runs: Vec<File>,
    scratch: TempDir,
    cancel: CancelToken,
    total_lines: u64,
}

impl ExternalSorter {
    /// Create a sorter spilling runs beyond `spill_threshold` bytes.
    pub fn new(spill_threshold: usize, cancel: CancelToken) -> Result<Self> {
        Ok(ExternalSorter {
            buffer: Vec::new(),
            buffered_bytes: 0,
            spill_threshold: spill_threshold.max(1),
            runs: Vec::new(),
            scratch: tempfile::tempdir()?,
            cancel,
            total_lines: 0,
        })
    }

    /// Add one line (without trailing newline).
    pub fn push(&mut self, line: Vec<u8>) -> Result<()> {
        self.buffered_bytes += line.len();
        self.buffer.push(line);
        self.total_lines += 1;
        if self.buffered_bytes >= self.spill_threshold {
            self.spill()?;
        }
        Ok(())
    }

    /// Lines pushed so far.
    pub fn len(&self) -> u64 {
        self.total_lines
    }

    /// Whether nothing was pushed.
    pub fn is_empty(&self) -> bool {
        self.total_lines == 0
    }

    fn spill(&mut self) -> Result<()> {
        self.cancel.check("external sort run")?;
        self.buffer.par_sort_unstable();

        let path = self.scratch.path().join(format!("run-{}", self.runs.len()));
        let mut writer = BufWriter::new(File::create(&path)?);
        for line in &self.buffer {
            writer.write_all(line)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        debug!(
            "spilled sort run {} ({} lines, {} bytes)",
            self.runs.len(),
            self.buffer.len(),
            self.buffered_bytes
        );

        self.runs.push(File::open(&path)?);
        self.buffer.clear();
        self.buffered_bytes = 0;
        Ok(())
    }

    /// Sort what remains and return the merged, globally sorted stream.
    pub fn finish(mut self) -> Result<SortedLines> {
        self.cancel.check("external sort finish")?;
        self.buffer.par_sort_unstable();

        let mut sources: Vec<RunSource> = self
            .runs
            .into_iter()
            .map(|file| RunSource::File(BufReader::new(file)))
            .collect();
        if !self.buffer.is_empty() {
            sources.push(RunSource::Memory(self.buffer.into_iter()));
        }

        let mut heap = BinaryHeap::with_capacity(sources.len());
        for (i, source) in sources.iter_mut().enumerate() {
            if let Some(line) = source.next_line()? {
                heap.push(Reverse((line, i)));
            }
        }

        Ok(SortedLines {
            sources,
            heap,
            cancel: self.cancel,
            steps: 0,
            _scratch: self.scratch,
        })
    }
}

enum RunSource {
    File(BufReader<File>),
    Memory(std::vec::IntoIter<Vec<u8>>),
}

impl RunSource {
    fn next_line(&mut self) -> Result<Option<Vec<u8>>> {
        match self {
            RunSource::File(reader) => {
                let mut line = Vec::new();
                let n = reader.read_until(b'\n', &mut line)?;
                if n == 0 {
                    return Ok(None);
                }
                if line.last() == Some(&b'\n') {
                    line.pop();
                }
                Ok(Some(line))
            }
            RunSource::Memory(iter) => Ok(iter.next()),
        }
    }
}

/// Globally sorted stream produced by [`ExternalSorter::finish`].
pub struct SortedLines {
    sources: Vec<RunSource>,
    heap: BinaryHeap<Reverse<(Vec<u8>, usize)>>,
    cancel: CancelToken,
    steps: usize,
    _scratch: TempDir,
}

impl SortedLines {
    /// Pop the next line in sorted order.
    pub fn next_line(&mut self) -> Result<Option<Vec<u8>>> {
        self.steps += 1;
        if self.steps % MERGE_CANCEL_STRIDE == 0 {
            self.cancel.check("sorted-run merge")?;
        }
        let Some(Reverse((line, source))) = self.heap.pop() else {
            return Ok(None);
        };
        if let Some(next) = self.sources[source].next_line()? {
            self.heap.push(Reverse((next, source)));
        }
        Ok(Some(line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(mut lines: SortedLines) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(line) = lines.next_line().unwrap() {
            out.push(line);
        }
        out
    }

    #[test]
    fn test_in_memory_sort() {
        let mut sorter = ExternalSorter::new(1 << 20, CancelToken::new()).unwrap();
        for line in [b"dog".to_vec(), b"cat".to_vec(), b"fox".to_vec()] {
            sorter.push(line).unwrap();
        }
        let out = drain(sorter.finish().unwrap());
        assert_eq!(out, vec![b"cat".to_vec(), b"dog".to_vec(), b"fox".to_vec()]);
    }

    #[test]
    fn test_spilled_runs_merge() {
        // Tiny threshold forces a spill on nearly every push.
        let mut sorter = ExternalSorter::new(8, CancelToken::new()).unwrap();
        let mut expected = Vec::new();
        for i in (0..200).rev() {
            let line = format!("key-{i:05}").into_bytes();
            expected.push(line.clone());
            sorter.push(line).unwrap();
        }
        expected.sort();
        assert_eq!(sorter.len(), 200);

        let out = drain(sorter.finish().unwrap());
        assert_eq!(out, expected);
    }

    #[test]
    fn test_duplicates_survive() {
        let mut sorter = ExternalSorter::new(4, CancelToken::new()).unwrap();
        for _ in 0..10 {
            sorter.push(b"same".to_vec()).unwrap();
        }
        let out = drain(sorter.finish().unwrap());
        assert_eq!(out.len(), 10);
    }

    #[test]
    fn test_cancelled_sort_aborts() {
        let token = CancelToken::new();
        let mut sorter = ExternalSorter::new(4, token.clone()).unwrap();
        sorter.push(b"a".to_vec()).unwrap();
        token.cancel();
        assert!(sorter.push(b"b".to_vec()).is_err() || sorter.finish().is_err());
    }

    #[test]
    fn test_empty_sorter() {
        let sorter = ExternalSorter::new(16, CancelToken::new()).unwrap();
        assert!(sorter.is_empty());
        let out = drain(sorter.finish().unwrap());
        assert!(out.is_empty());
    }
}
