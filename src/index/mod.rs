//! The index engine: one [`Index`] ties a variant, a codec, a posting
//! store, side stores and summary statistics together.
//!
//! Batch writes go through an epoch (`begin_indexing` / `index_record` /
//! `commit_indexing`): emissions spool to a scratch file, commit sorts them
//! externally and merges into a fresh store that is swapped in atomically.
//! A failed commit leaves the previous store untouched and retains the
//! spool for diagnosis. Outside an epoch, `index_record` / `delete_record`
//! mutate records in place under the index write lock.

pub mod builder;
pub mod search;
pub mod sort;
pub mod spool;

pub use builder::{CommitOptions, CommitStats, TermEmission, TermEmissions};
pub use search::{ScanEdge, ScanEntry};

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashMap;
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use log::{debug, error};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;

use crate::cache::TermInfoCache;
use crate::error::{CarrelError, Result};
use crate::index::builder::{MergeContext, merge_pass};
use crate::index::sort::ExternalSorter;
use crate::index::spool::{SpoolRecord, SpoolWriter};
use crate::postings::codec::MergeOp;
use crate::postings::{
    BitmapCodec, DocKey, PostingEntry, PostingsCodec, PostingsRecord, ProximityCodec,
    RecordSummary, StandardCodec, VectorCodec, VerboseCodec,
};
use crate::query::QueryNode;
use crate::rank::{DocStats, RankParams};
use crate::result::ResultSet;
use crate::store::{PostingStore, StoreFactory};
use crate::util::CancelToken;

const META_KEY: &[u8] = b"meta";

/// The index encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexVariant {
    /// Occurrence counts only.
    Standard,
    /// Occurrence positions for phrase/proximity queries.
    Proximity,
    /// Interval data under `start\tend` compound keys.
    Range,
    /// Bit-set over document ordinal; no frequencies, no relevance.
    Bitmap,
    /// Doc-id/frequency array decode for bulk scans and feature export.
    Vector,
}

/// Which frequency-ranked term lists a commit builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FreqListMode {
    /// None (the default).
    #[default]
    Off,
    /// Ranked by document frequency.
    Docs,
    /// Ranked by total occurrences.
    Occs,
    /// Both lists.
    Both,
}

impl FreqListMode {
    fn by_docs(&self) -> bool {
        matches!(self, FreqListMode::Docs | FreqListMode::Both)
    }

    fn by_occs(&self) -> bool {
        matches!(self, FreqListMode::Occs | FreqListMode::Both)
    }

    fn enabled(&self) -> bool {
        *self != FreqListMode::Off
    }
}

/// Ordering key for [`Index::frequent_terms`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreqOrder {
    /// Most documents first.
    Docs,
    /// Most total occurrences first.
    Occs,
}

/// Per-index configuration.
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Index name; store names derive from it.
    pub name: String,
    /// Encoding variant.
    pub variant: IndexVariant,
    /// Position integers per occurrence for the proximity variant (2 or 3).
    pub prox_ints: u8,
    /// Use the verbose structured encoding instead of fixed-width binary.
    pub verbose: bool,
    /// Record store the bitmap variant is bound to.
    pub store_id: u32,
    /// Maintain the term-id reverse map.
    pub term_ids: bool,
    /// Maintain per-document term vectors.
    pub vectors: bool,
    /// Frequency-ranked term lists rebuilt at commit.
    pub freq_lists: FreqListMode,
    /// Terms in fewer documents than this are dropped at commit.
    pub minimum_support: u64,
    /// Term-summary cache capacity (0 disables).
    pub cache_capacity: usize,
    /// External-sort spill threshold in bytes.
    pub spill_threshold: usize,
    /// Ranking constants for this index.
    pub rank: RankParams,
}

impl Default for IndexConfig {
    fn default() -> Self {
        IndexConfig {
            name: "index".to_string(),
            variant: IndexVariant::Standard,
            prox_ints: 2,
            verbose: false,
            store_id: 0,
            term_ids: false,
            vectors: false,
            freq_lists: FreqListMode::Off,
            minimum_support: 0,
            cache_capacity: 512,
            spill_threshold: 64 << 20,
            rank: RankParams::default(),
        }
    }
}

impl IndexConfig {
    /// A config named `name` for `variant`, defaults elsewhere.
    pub fn new<S: Into<String>>(name: S, variant: IndexVariant) -> Self {
        IndexConfig {
            name: name.into(),
            variant,
            ..IndexConfig::default()
        }
    }
}

/// Aggregate statistics for one index, persisted in the meta store at
/// commit and kept current through the direct mutation path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IndexSummary {
    /// Distinct terms.
    pub terms: u64,
    /// Postings (term-document pairs).
    pub total_postings: u64,
    /// Total term occurrences.
    pub total_occurrences: u64,
    /// Largest per-term document count.
    pub max_term_docs: u64,
    /// Largest per-term occurrence count.
    pub max_term_occs: u64,
    /// Summed length of all term keys, for mean-term-length stats.
    pub total_term_chars: u64,
    /// Highest term id currently stored.
    pub max_term_id: u64,
    /// Next term id the allocator will hand out.
    #[serde(default)]
    pub next_term_id: u64,
    /// Documents known to the index.
    pub doc_count: u64,
    /// Summed document lengths in words.
    pub total_words: u64,
}

/// The persisted meta record: the summary together with the postings
/// generation it describes, written as one value so a reopened index
/// never pairs one commit's summary with another commit's postings.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
struct MetaRecord {
    summary: IndexSummary,
    generation: u64,
}

/// State of one open batch epoch.
#[derive(Debug)]
struct BatchEpoch {
    scratch: TempDir,
    writer: SpoolWriter,
    doc_words: BTreeMap<DocKey, u64>,
}

/// One index over one postings store.
#[derive(Debug)]
pub struct Index {
    config: IndexConfig,
    codec: Box<dyn PostingsCodec>,
    prox: Option<ProximityCodec>,
    bitmap: Option<BitmapCodec>,
    factory: Arc<dyn StoreFactory>,
    postings: RwLock<Arc<dyn PostingStore>>,
    term_ids: Option<Arc<dyn PostingStore>>,
    vectors: Option<Arc<dyn PostingStore>>,
    freq_docs: RwLock<Option<Arc<dyn PostingStore>>>,
    freq_occs: RwLock<Option<Arc<dyn PostingStore>>>,
    doc_stats: Arc<dyn PostingStore>,
    meta: Arc<dyn PostingStore>,
    cache: Mutex<TermInfoCache>,
    epoch: Mutex<Option<BatchEpoch>>,
    summary: RwLock<IndexSummary>,
    generation: AtomicU64,
}

impl Index {
    /// Create (or reopen) an index over stores from `factory`.
    pub fn new(config: IndexConfig, factory: Arc<dyn StoreFactory>) -> Result<Index> {
        let mut prox = None;
        let mut bitmap = None;
        let codec: Box<dyn PostingsCodec> = match (config.variant, config.verbose) {
            (IndexVariant::Bitmap, true) | (IndexVariant::Vector, true) => {
                return Err(CarrelError::config(format!(
                    "the verbose encoding does not apply to the {:?} variant",
                    config.variant
                )));
            }
            (IndexVariant::Bitmap, false) => {
                let codec = BitmapCodec::new(config.store_id);
                bitmap = Some(codec);
                Box::new(codec)
            }
            (IndexVariant::Vector, false) => Box::new(VectorCodec),
            (IndexVariant::Proximity, verbose) => {
                let codec = ProximityCodec::new(config.prox_ints)?;
                prox = Some(codec);
                if verbose {
                    Box::new(VerboseCodec)
                } else {
                    Box::new(codec)
                }
            }
            (IndexVariant::Standard | IndexVariant::Range, true) => Box::new(VerboseCodec),
            (IndexVariant::Standard | IndexVariant::Range, false) => Box::new(StandardCodec),
        };

        let name = &config.name;
        let meta = factory.create(&format!("{name}.meta"))?;
        // The meta record names the postings generation of the last
        // successful commit, so a reopen attaches to that store rather
        // than starting a generation 0 that shadows it.
        let state = match meta.get(META_KEY)? {
            Some(bytes) => serde_json::from_slice::<MetaRecord>(&bytes)?,
            None => MetaRecord::default(),
        };

        let postings = factory.create(&format!("{name}.postings.{}", state.generation))?;
        let term_ids = if config.term_ids {
            Some(factory.create(&format!("{name}.terms"))?)
        } else {
            None
        };
        let vectors = if config.vectors {
            Some(factory.create(&format!("{name}.vectors"))?)
        } else {
            None
        };
        let doc_stats = factory.create(&format!("{name}.docs"))?;
        let freq_docs = if config.freq_lists.by_docs() && state.generation > 0 {
            Some(factory.create(&format!("{name}.freq-docs.{}", state.generation))?)
        } else {
            None
        };
        let freq_occs = if config.freq_lists.by_occs() && state.generation > 0 {
            Some(factory.create(&format!("{name}.freq-occs.{}", state.generation))?)
        } else {
            None
        };

        Ok(Index {
            cache: Mutex::new(TermInfoCache::new(config.cache_capacity)),
            config,
            codec,
            prox,
            bitmap,
            factory,
            postings: RwLock::new(postings),
            term_ids,
            vectors,
            freq_docs: RwLock::new(freq_docs),
            freq_occs: RwLock::new(freq_occs),
            doc_stats,
            meta,
            epoch: Mutex::new(None),
            summary: RwLock::new(state.summary),
            generation: AtomicU64::new(state.generation),
        })
    }

    /// The index name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// The index configuration.
    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// The encoding variant.
    pub fn variant(&self) -> IndexVariant {
        self.config.variant
    }

    /// Current aggregate statistics.
    pub fn summary(&self) -> IndexSummary {
        *self.summary.read()
    }

    /// Snapshot of the current postings store.
    pub(crate) fn postings_snapshot(&self) -> Arc<dyn PostingStore> {
        Arc::clone(&self.postings.read())
    }

    /// Open a batch epoch. Fails if one is already open.
    pub fn begin_indexing(&self) -> Result<()> {
        let mut epoch = self.epoch.lock();
        if epoch.is_some() {
            return Err(CarrelError::invalid_operation(format!(
                "index '{}' already has an open batch epoch",
                self.config.name
            )));
        }
        let scratch = tempfile::tempdir()?;
        let writer = SpoolWriter::create(&scratch.path().join("spool"))?;
        *epoch = Some(BatchEpoch {
            scratch,
            writer,
            doc_words: BTreeMap::new(),
        });
        debug!("{}: batch epoch opened", self.config.name);
        Ok(())
    }

    /// Index one document's term emissions.
    ///
    /// During a batch epoch the emissions spool for the commit merge pass;
    /// otherwise each term's record is read, merged with `replace`
    /// semantics and written back in place.
    pub fn index_record(&self, key: DocKey, emissions: &TermEmissions) -> Result<()> {
        let mut epoch = self.epoch.lock();
        if let Some(epoch) = epoch.as_mut() {
            for (term, emission) in emissions {
                let stored = emission.sort_value.as_deref().unwrap_or(term);
                epoch.writer.append(&SpoolRecord {
                    term: stored.to_string(),
                    key,
                    occurrences: emission.occurrences,
                    positions: emission.positions.clone(),
                })?;
            }
            *epoch.doc_words.entry(key).or_insert(0) += words_of(emissions);
            return Ok(());
        }
        drop(epoch);
        self.apply_direct(key, emissions, MergeOp::Replace)
    }

    /// Remove one document's term emissions from committed records.
    ///
    /// Only valid outside a batch epoch. Records whose entry list becomes
    /// empty are removed entirely.
    pub fn delete_record(&self, key: DocKey, emissions: &TermEmissions) -> Result<()> {
        if self.epoch.lock().is_some() {
            return Err(CarrelError::invalid_operation(format!(
                "index '{}' cannot delete records during a batch epoch",
                self.config.name
            )));
        }
        self.apply_direct(key, emissions, MergeOp::Delete)
    }

    /// The in-place read-modify-write path. Holds the postings write lock
    /// for the whole pass so direct writers are serialized.
    fn apply_direct(&self, key: DocKey, emissions: &TermEmissions, op: MergeOp) -> Result<()> {
        let store_guard = self.postings.write();
        let store = Arc::clone(&store_guard);
        let mut summary = self.summary.write();
        let mut cache = self.cache.lock();
        let mut doc_pairs: Vec<(u64, u32)> = Vec::new();

        for (term, emission) in emissions {
            let stored = emission.sort_value.as_deref().unwrap_or(term);
            let existing = store
                .get(stored.as_bytes())?
                .map(|bytes| self.codec.decode(&bytes))
                .transpose()?;

            let term_id = match &existing {
                Some(record) => record.term_id,
                None => {
                    if op == MergeOp::Delete {
                        continue;
                    }
                    let id = summary.next_term_id;
                    summary.next_term_id += 1;
                    if let Some(term_ids) = &self.term_ids {
                        term_ids.put(&term_id_key(id), stored.as_bytes())?;
                    }
                    id
                }
            };

            let mut entry = PostingEntry::new(key, emission.occurrences);
            if let Some(prox) = &self.prox {
                entry.positions = prox.group_positions(&emission.positions)?;
            }

            let was = existing.as_ref().map(PostingsRecord::summary);
            let was_new = existing.is_none();
            let merged = self.codec.merge(existing, term_id, &[entry], op, None)?;
            let now = merged.summary();

            if merged.entries.is_empty() {
                store.delete(stored.as_bytes())?;
                summary.terms = summary.terms.saturating_sub(1);
                summary.total_term_chars =
                    summary.total_term_chars.saturating_sub(stored.len() as u64);
            } else {
                store.put(stored.as_bytes(), &self.codec.encode(&merged)?)?;
                if was_new {
                    summary.terms += 1;
                    summary.total_term_chars += stored.len() as u64;
                }
                summary.max_term_docs = summary.max_term_docs.max(now.total_docs);
                summary.max_term_occs = summary.max_term_occs.max(now.total_occs);
                summary.max_term_id = summary.max_term_id.max(term_id);
            }
            let (was_docs, was_occs) = was.map(|s| (s.total_docs, s.total_occs)).unwrap_or((0, 0));
            summary.total_postings = summary.total_postings + now.total_docs - was_docs;
            summary.total_occurrences = summary.total_occurrences + now.total_occs - was_occs;

            cache.invalidate(stored);
            if op != MergeOp::Delete {
                doc_pairs.push((term_id, emission.occurrences));
            }
        }

        let words = words_of(emissions);
        let doc_key = doc_key_bytes(&key);
        match op {
            MergeOp::Delete => {
                if self.doc_stats.delete(&doc_key)? {
                    summary.doc_count = summary.doc_count.saturating_sub(1);
                    summary.total_words = summary.total_words.saturating_sub(words);
                }
                if let Some(vectors) = &self.vectors {
                    vectors.delete(&doc_key)?;
                }
            }
            _ => {
                if self.doc_stats.get(&doc_key)?.is_none() {
                    summary.doc_count += 1;
                }
                summary.total_words += words;
                let mut buf = [0u8; 8];
                LittleEndian::write_u64(&mut buf, words);
                self.doc_stats.put(&doc_key, &buf)?;
                if let Some(vectors) = &self.vectors {
                    doc_pairs.sort_by_key(|(id, _)| *id);
                    vectors.put(&doc_key, &encode_vector(&doc_pairs))?;
                }
            }
        }

        self.persist_meta(&summary)?;
        Ok(())
    }

    /// Sort the spooled emissions, merge them with the committed postings
    /// into a fresh store and swap it in. On failure the previous store
    /// stays queryable and the spool file is retained for diagnosis.
    ///
    /// Write ordering: the fresh postings store and the side structures
    /// land first, then the meta record naming the new generation as the
    /// single durable commit point; the in-memory swap after it cannot
    /// fail. A crash mid-commit therefore reopens on the previous
    /// generation, at worst with orphaned term-id and vector entries from
    /// the abandoned pass, which the next successful commit overwrites.
    pub fn commit_indexing(&self, options: CommitOptions) -> Result<CommitStats> {
        let epoch = self.epoch.lock().take().ok_or_else(|| {
            CarrelError::invalid_operation(format!(
                "index '{}' has no open batch epoch",
                self.config.name
            ))
        })?;
        let BatchEpoch {
            scratch,
            mut writer,
            doc_words,
        } = epoch;
        writer.flush()?;
        let spool_path = writer.path().to_path_buf();
        drop(writer);

        match self.commit_inner(&spool_path, doc_words, &options) {
            Ok(stats) => {
                debug!(
                    "{}: committed {} terms ({} new, {} skipped, {} postings)",
                    self.config.name,
                    stats.terms,
                    stats.new_terms,
                    stats.skipped_terms,
                    stats.postings
                );
                Ok(stats)
            }
            Err(e) => {
                let retained = scratch.keep();
                error!(
                    "{}: commit aborted ({e}); spool retained at {}",
                    self.config.name,
                    retained.display()
                );
                Err(e)
            }
        }
    }

    fn commit_inner(
        &self,
        spool_path: &std::path::Path,
        doc_words: BTreeMap<DocKey, u64>,
        options: &CommitOptions,
    ) -> Result<CommitStats> {
        let mut sorter = ExternalSorter::new(self.config.spill_threshold, options.cancel.clone())?;
        let mut reader = BufReader::new(File::open(spool_path)?);
        let mut line = Vec::new();
        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line)? == 0 {
                break;
            }
            if line.last() == Some(&b'\n') {
                line.pop();
            }
            if !line.is_empty() {
                sorter.push(line.clone())?;
            }
        }
        let sorted = sorter.finish()?;

        let old = self.postings_snapshot();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let fresh = self
            .factory
            .create(&format!("{}.postings.{generation}", self.config.name))?;

        let next_term_id = self.summary.read().next_term_id;
        let ctx = MergeContext {
            codec: &*self.codec,
            prox: self.prox.as_ref(),
            old: &*old,
            fresh: &*fresh,
            minimum_support: self.config.minimum_support,
            best_effort: options.best_effort,
            track_vectors: self.vectors.is_some(),
            track_freq: self.config.freq_lists.enabled(),
            cancel: &options.cancel,
        };
        let outcome = merge_pass(&ctx, sorted, next_term_id)?;

        if let Some(term_ids) = &self.term_ids {
            for (id, term) in &outcome.new_term_ids {
                term_ids.put(&term_id_key(*id), term.as_bytes())?;
            }
        }
        if let Some(vectors) = &self.vectors {
            for (key, pairs) in &outcome.doc_additions {
                let doc_key = doc_key_bytes(key);
                let mut merged = match vectors.get(&doc_key)? {
                    Some(bytes) => decode_vector(&bytes)?,
                    None => Vec::new(),
                };
                merged.extend(pairs.iter().copied());
                merged.sort_by_key(|(id, _)| *id);
                merged.dedup_by_key(|(id, _)| *id);
                vectors.put(&doc_key, &encode_vector(&merged))?;
            }
        }
        if self.config.freq_lists.by_docs() {
            let store = self
                .factory
                .create(&format!("{}.freq-docs.{generation}", self.config.name))?;
            for f in &outcome.freq_entries {
                store.put(&freq_key(f.docs, f.term_id), f.term.as_bytes())?;
            }
            *self.freq_docs.write() = Some(store);
        }
        if self.config.freq_lists.by_occs() {
            let store = self
                .factory
                .create(&format!("{}.freq-occs.{generation}", self.config.name))?;
            for f in &outcome.freq_entries {
                store.put(&freq_key(f.occs, f.term_id), f.term.as_bytes())?;
            }
            *self.freq_occs.write() = Some(store);
        }

        let mut summary = self.summary.write();
        let mut new_docs = 0u64;
        let mut new_words = 0u64;
        for (key, words) in &doc_words {
            let doc_key = doc_key_bytes(key);
            let previous = self
                .doc_stats
                .get(&doc_key)?
                .map(|bytes| LittleEndian::read_u64(&bytes))
                .unwrap_or(0);
            if previous == 0 {
                new_docs += 1;
            }
            new_words += words;
            let mut buf = [0u8; 8];
            LittleEndian::write_u64(&mut buf, previous + words);
            self.doc_stats.put(&doc_key, &buf)?;
        }

        let doc_count = summary.doc_count + new_docs;
        let total_words = summary.total_words + new_words;
        *summary = outcome.summary;
        summary.next_term_id = outcome.next_term_id;
        summary.doc_count = doc_count;
        summary.total_words = total_words;
        let record = MetaRecord {
            summary: *summary,
            generation,
        };
        self.meta.put(META_KEY, &serde_json::to_vec(&record)?)?;
        drop(summary);

        *self.postings.write() = fresh;
        self.cache.lock().clear();
        Ok(outcome.stats)
    }

    /// Write the meta record for the current generation.
    fn persist_meta(&self, summary: &IndexSummary) -> Result<()> {
        let record = MetaRecord {
            summary: *summary,
            generation: self.generation.load(Ordering::SeqCst),
        };
        self.meta.put(META_KEY, &serde_json::to_vec(&record)?)?;
        Ok(())
    }

    /// Aggregate counts for one term, through the bounded cache.
    pub fn term_summary(&self, term: &str) -> Result<Option<RecordSummary>> {
        if let Some(summary) = self.cache.lock().get(term) {
            return Ok(Some(*summary));
        }
        let store = self.postings_snapshot();
        let Some(bytes) = store.get(term.as_bytes())? else {
            return Ok(None);
        };
        let summary = self.codec.decode_summary(&bytes)?;
        self.cache.lock().put(term.to_string(), summary);
        Ok(Some(summary))
    }

    /// The full postings record for one term.
    pub fn fetch_term(&self, term: &str) -> Result<Option<PostingsRecord>> {
        let store = self.postings_snapshot();
        store
            .get(term.as_bytes())?
            .map(|bytes| self.codec.decode(&bytes))
            .transpose()
    }

    /// Reverse-map a term id to its term. Requires the `term_ids` side
    /// store.
    pub fn term_for_id(&self, term_id: u64) -> Result<Option<String>> {
        let store = self.term_ids.as_ref().ok_or_else(|| {
            CarrelError::config(format!(
                "index '{}' has no term-id map",
                self.config.name
            ))
        })?;
        store
            .get(&term_id_key(term_id))?
            .map(|bytes| {
                String::from_utf8(bytes)
                    .map_err(|_| CarrelError::store("term-id map entry is not UTF-8"))
            })
            .transpose()
    }

    /// One document's `(term_id, frequency)` vector. Requires the
    /// `vectors` side store.
    pub fn vector(&self, key: &DocKey) -> Result<Option<Vec<(u64, u32)>>> {
        let store = self.vectors.as_ref().ok_or_else(|| {
            CarrelError::config(format!(
                "index '{}' has no document vectors",
                self.config.name
            ))
        })?;
        store
            .get(&doc_key_bytes(key))?
            .map(|bytes| decode_vector(&bytes))
            .transpose()
    }

    /// The `n` highest-frequency terms with their frequency, from the
    /// ranked lists built at the last commit.
    pub fn frequent_terms(&self, n: usize, order: FreqOrder) -> Result<Vec<(String, u64)>> {
        let guard = match order {
            FreqOrder::Docs => self.freq_docs.read(),
            FreqOrder::Occs => self.freq_occs.read(),
        };
        let store = guard.as_ref().ok_or_else(|| {
            CarrelError::config(format!(
                "index '{}' has no committed frequency list for {order:?}",
                self.config.name
            ))
        })?;
        let mut cursor = store.cursor(None, crate::store::ScanDirection::Backward)?;
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            let Some((key, value)) = cursor.next_entry()? else {
                break;
            };
            if key.len() != 16 {
                return Err(CarrelError::store("malformed frequency-list key"));
            }
            let freq = BigEndian::read_u64(&key[0..8]);
            let term = String::from_utf8(value)
                .map_err(|_| CarrelError::store("frequency-list entry is not UTF-8"))?;
            out.push((term, freq));
        }
        Ok(out)
    }
}

impl DocStats for Index {
    fn total_docs(&self) -> u64 {
        self.summary.read().doc_count
    }

    fn mean_doc_len(&self) -> f64 {
        let summary = self.summary.read();
        if summary.doc_count == 0 {
            0.0
        } else {
            summary.total_words as f64 / summary.doc_count as f64
        }
    }

    fn doc_len(&self, key: &DocKey) -> Option<u64> {
        self.doc_stats
            .get(&doc_key_bytes(key))
            .ok()
            .flatten()
            .map(|bytes| LittleEndian::read_u64(&bytes))
    }
}

fn words_of(emissions: &TermEmissions) -> u64 {
    emissions
        .values()
        .map(|e| u64::from(e.occurrences))
        .sum()
}

/// Sortable byte key for a document: big-endian doc id then store id.
pub(crate) fn doc_key_bytes(key: &DocKey) -> [u8; 12] {
    let mut out = [0u8; 12];
    BigEndian::write_u64(&mut out[0..8], key.doc_id);
    BigEndian::write_u32(&mut out[8..12], key.store_id);
    out
}

fn term_id_key(term_id: u64) -> [u8; 8] {
    let mut out = [0u8; 8];
    BigEndian::write_u64(&mut out, term_id);
    out
}

/// Frequency-list key: big-endian frequency then term id, so a backward
/// walk yields highest-frequency terms first.
fn freq_key(freq: u64, term_id: u64) -> [u8; 16] {
    let mut out = [0u8; 16];
    BigEndian::write_u64(&mut out[0..8], freq);
    BigEndian::write_u64(&mut out[8..16], term_id);
    out
}

fn encode_vector(pairs: &[(u64, u32)]) -> Vec<u8> {
    let mut out = Vec::with_capacity(pairs.len() * 12);
    for (term_id, freq) in pairs {
        let mut buf = [0u8; 12];
        LittleEndian::write_u64(&mut buf[0..8], *term_id);
        LittleEndian::write_u32(&mut buf[8..12], *freq);
        out.extend_from_slice(&buf);
    }
    out
}

fn decode_vector(bytes: &[u8]) -> Result<Vec<(u64, u32)>> {
    if bytes.len() % 12 != 0 {
        return Err(CarrelError::store(format!(
            "document vector is {} bytes, not a multiple of 12",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(12)
        .map(|chunk| {
            (
                LittleEndian::read_u64(&chunk[0..8]),
                LittleEndian::read_u32(&chunk[8..12]),
            )
        })
        .collect())
}

/// A named set of indexes routing query trees by clause index name.
#[derive(Debug, Default)]
pub struct Catalog {
    indexes: AHashMap<String, Arc<Index>>,
}

impl Catalog {
    /// An empty catalog.
    pub fn new() -> Self {
        Catalog {
            indexes: AHashMap::new(),
        }
    }

    /// Register an index under its configured name.
    pub fn register(&mut self, index: Arc<Index>) -> Result<()> {
        let name = index.name().to_string();
        if self.indexes.contains_key(&name) {
            return Err(CarrelError::duplicate(format!(
                "an index named '{name}' is already registered"
            )));
        }
        self.indexes.insert(name, index);
        Ok(())
    }

    /// Look up a registered index.
    pub fn get(&self, name: &str) -> Result<&Arc<Index>> {
        self.indexes
            .get(name)
            .ok_or_else(|| CarrelError::config(format!("unknown index '{name}'")))
    }

    /// Evaluate a query tree, routing each leaf clause to its index. The
    /// leftmost index supplies ranking constants and collection statistics
    /// for boolean combination.
    pub fn search(&self, node: &QueryNode, cancel: &CancelToken) -> Result<ResultSet> {
        match node {
            QueryNode::Clause(clause) => self.get(&clause.index)?.search_clause(clause, cancel),
            QueryNode::Triple(triple) => {
                let left = self.search(&triple.left, cancel)?;
                let right = self.search(&triple.right, cancel)?;
                let anchor = self.get(&leftmost_index(node)?)?;
                let spec =
                    crate::result::CombineSpec::from_boolean(&triple.op, &anchor.config.rank)?;
                crate::result::combine(vec![left, right], &spec, Some(&**anchor), cancel)
            }
        }
    }
}

fn leftmost_index(node: &QueryNode) -> Result<String> {
    match node {
        QueryNode::Clause(clause) => Ok(clause.index.clone()),
        QueryNode::Triple(triple) => leftmost_index(&triple.left),
    }
}
