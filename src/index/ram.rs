use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use roaring::RoaringBitmap;
use tracing::debug;

use super::{IndexDoc, PendingWrite, SearchIndex};
use crate::error::Result;
use crate::segment::{ContentStore, SegmentReader, Uid, Version};
use crate::tokenizer::SharedAnalyzer;

struct RamState {
    content: Arc<ContentStore>,
    deleted: RoaringBitmap,
    /// Every uid deleted or replaced since this segment was created
    modified: HashSet<Uid>,
    generation: u64,
    writer: Option<PendingWrite<()>>,
}

/// Single in-memory segment.
///
/// Commits publish a fresh reader; readers already handed out keep seeing
/// the content they were opened on.
pub struct RamSearchIndex {
    name: String,
    analyzer: SharedAnalyzer,
    version: AtomicU64,
    event_count: AtomicU64,
    state: Mutex<RamState>,
    current: ArcSwap<SegmentReader>,
    writer_opens: AtomicU64,
}

impl RamSearchIndex {
    /// Create an empty memory segment starting at `version`
    pub fn new(name: impl Into<String>, version: Version, analyzer: SharedAnalyzer) -> Self {
        let name = name.into();
        Self {
            current: ArcSwap::from_pointee(SegmentReader::empty(name.clone())),
            name,
            analyzer,
            version: AtomicU64::new(version),
            event_count: AtomicU64::new(0),
            state: Mutex::new(RamState {
                content: Arc::new(ContentStore::new()),
                deleted: RoaringBitmap::new(),
                modified: HashSet::new(),
                generation: 0,
                writer: None,
            }),
            writer_opens: AtomicU64::new(0),
        }
    }

    /// Open the pending writer; returns false if one is already open
    pub fn open_writer(&self) -> bool {
        let mut state = self.state.lock();
        self.open_writer_locked(&mut state)
    }

    fn open_writer_locked(&self, state: &mut RamState) -> bool {
        if state.writer.is_some() {
            return false;
        }
        state.writer = Some(PendingWrite::new());
        self.writer_opens.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// How many times a writer was actually created
    pub fn writer_opens(&self) -> u64 {
        self.writer_opens.load(Ordering::Relaxed)
    }

    /// Snapshot of the latest commit
    pub fn open_reader(&self) -> SegmentReader {
        self.current.load().as_ref().clone()
    }

    /// Uids deleted or replaced in this segment so far
    pub fn modified_uids(&self) -> Arc<HashSet<Uid>> {
        self.current.load().modified_uids().clone()
    }

    /// Apply the pending writer, if any, and publish a new reader
    pub fn commit(&self) {
        let mut state = self.state.lock();
        self.commit_locked(&mut state);
    }

    fn delete_locked(&self, state: &mut RamState, uids: &HashSet<Uid>) {
        if uids.is_empty() {
            return;
        }
        self.open_writer_locked(state);
        let reader = self.current.load();
        if let Some(writer) = state.writer.as_mut() {
            for &uid in uids {
                for docno in reader.doc_ids(uid) {
                    writer.delete((), docno.as_u32());
                }
            }
        }
        state.modified.extend(uids.iter().copied());
    }

    fn commit_locked(&self, state: &mut RamState) {
        let pending = match state.writer.take() {
            Some(pending) => pending,
            None => return,
        };
        if pending.is_empty() && state.modified.len() == self.current.load().modified_uids().len() {
            return;
        }

        for deleted in pending.deletes.values() {
            state.deleted |= deleted;
        }
        if !pending.docs.is_empty() || !pending.segments.is_empty() {
            let appended = pending.build_content(self.analyzer.as_ref());
            Arc::make_mut(&mut state.content).append(appended);
        }

        state.generation += 1;
        let reader = SegmentReader::open(
            self.name.clone(),
            state.generation,
            state.content.clone(),
            state.deleted.clone(),
            Arc::new(state.modified.clone()),
        );
        debug!(
            index = %self.name,
            generation = state.generation,
            docs = reader.num_docs(),
            "published memory reader"
        );
        self.current.store(Arc::new(reader));
    }
}

impl SearchIndex for RamSearchIndex {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> Version {
        self.version.load(Ordering::SeqCst)
    }

    fn set_version(&self, version: Version) -> Result<()> {
        self.version.fetch_max(version, Ordering::SeqCst);
        Ok(())
    }

    fn event_count(&self) -> u64 {
        self.event_count.load(Ordering::SeqCst)
    }

    fn increment_event_count(&self, count: u64) {
        self.event_count.fetch_add(count, Ordering::SeqCst);
    }

    fn update_index(&self, del_uids: &HashSet<Uid>, docs: Vec<IndexDoc>) -> Result<()> {
        let mut state = self.state.lock();
        self.open_writer_locked(&mut state);
        self.delete_locked(&mut state, del_uids);
        if let Some(writer) = state.writer.as_mut() {
            writer.docs.extend(docs);
        }
        self.commit_locked(&mut state);
        Ok(())
    }

    fn num_docs(&self) -> u64 {
        self.current.load().num_docs() as u64
    }

    fn size_bytes(&self) -> u64 {
        self.current.load().content().size_bytes() as u64
    }
}

impl fmt::Debug for RamSearchIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RamSearchIndex")
            .field("name", &self.name)
            .field("version", &self.version())
            .field("num_docs", &self.num_docs())
            .finish()
    }
}
