//! Immutable, reference-counted segment snapshots
//!
//! A `SegmentReader` is a cheap handle over shared parts: the content store,
//! the physical delete set at open time, the dense uid array and its
//! `DocIdMapper`. Readers handed to queries may additionally carry a delete
//! overlay, a set of uids that newer segments have superseded. The overlay is
//! attached per snapshot and never mutates the shared parts.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use roaring::RoaringBitmap;

use super::content::{term_key, ContentStore, StoredDocument};
use super::docid_mapper::DocIdMapper;
use super::types::{DocNo, Uid, DELETED_UID};

/// Uids to treat as absent in one reader snapshot
pub type DeleteOverlay = Arc<HashSet<Uid>>;

/// Counts readers that are still held somewhere
#[derive(Clone, Debug, Default)]
pub struct OpenReaderCounter(Arc<AtomicUsize>);

impl OpenReaderCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of reader generations not yet released
    pub fn open(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn register(&self) -> OpenToken {
        self.0.fetch_add(1, Ordering::SeqCst);
        OpenToken(self.0.clone())
    }
}

#[derive(Debug)]
struct OpenToken(Arc<AtomicUsize>);

impl Drop for OpenToken {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct ReaderCore {
    name: String,
    generation: u64,
    content: Arc<ContentStore>,
    deleted: RoaringBitmap,
    uids: Vec<Uid>,
    mapper: DocIdMapper,
    modified: Arc<HashSet<Uid>>,
    _token: Option<OpenToken>,
}

/// Read-only snapshot of one segment
#[derive(Clone)]
pub struct SegmentReader {
    core: Arc<ReaderCore>,
    overlay: Option<DeleteOverlay>,
}

impl SegmentReader {
    /// Open a snapshot, scanning the content once to rebuild the uid mapping
    pub fn open(
        name: impl Into<String>,
        generation: u64,
        content: Arc<ContentStore>,
        deleted: RoaringBitmap,
        modified: Arc<HashSet<Uid>>,
    ) -> Self {
        let uids = content.scan_uids();
        let mapper = DocIdMapper::build(&uids, &deleted);
        Self {
            core: Arc::new(ReaderCore {
                name: name.into(),
                generation,
                content,
                deleted,
                uids,
                mapper,
                modified,
                _token: None,
            }),
            overlay: None,
        }
    }

    /// Like `open`, registering the reader with a counter until its last clone drops
    pub fn open_tracked(
        name: impl Into<String>,
        generation: u64,
        content: Arc<ContentStore>,
        deleted: RoaringBitmap,
        modified: Arc<HashSet<Uid>>,
        counter: &OpenReaderCounter,
    ) -> Self {
        let mut reader = Self::open(name, generation, content, deleted, modified);
        if let Some(core) = Arc::get_mut(&mut reader.core) {
            core._token = Some(counter.register());
        }
        reader
    }

    /// Reader over no documents
    pub fn empty(name: impl Into<String>) -> Self {
        Self::open(
            name,
            0,
            Arc::new(ContentStore::new()),
            RoaringBitmap::new(),
            Arc::new(HashSet::new()),
        )
    }

    /// Same snapshot with `overlay` layered over physical deletes
    pub fn with_overlay(&self, overlay: DeleteOverlay) -> Self {
        Self {
            core: self.core.clone(),
            overlay: if overlay.is_empty() { None } else { Some(overlay) },
        }
    }

    /// Same snapshot without any overlay
    pub fn without_overlay(&self) -> Self {
        Self {
            core: self.core.clone(),
            overlay: None,
        }
    }

    pub fn overlay(&self) -> Option<&DeleteOverlay> {
        self.overlay.as_ref()
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn generation(&self) -> u64 {
        self.core.generation
    }

    /// True if both handles share the same underlying snapshot
    pub fn same_snapshot(&self, other: &SegmentReader) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }

    /// Number of document slots, deleted or not
    pub fn max_doc(&self) -> u32 {
        self.core.uids.len() as u32
    }

    /// Uid stamped on the document, `DELETED_UID` for gaps and out-of-range ordinals
    pub fn uid(&self, docno: DocNo) -> Uid {
        self.core
            .uids
            .get(docno.as_usize())
            .copied()
            .unwrap_or(DELETED_UID)
    }

    pub fn uids(&self) -> &[Uid] {
        &self.core.uids
    }

    pub fn is_physically_deleted(&self, docno: DocNo) -> bool {
        self.core.deleted.contains(docno.as_u32())
    }

    /// Physically deleted, a gap, or superseded through the overlay
    pub fn is_deleted(&self, docno: DocNo) -> bool {
        if docno.as_u32() >= self.max_doc() || self.is_physically_deleted(docno) {
            return true;
        }
        let uid = self.uid(docno);
        if uid == DELETED_UID {
            return true;
        }
        match &self.overlay {
            Some(overlay) => overlay.contains(&uid),
            None => false,
        }
    }

    /// Live document for `uid` in this view
    pub fn doc_id(&self, uid: Uid) -> Option<DocNo> {
        if let Some(overlay) = &self.overlay {
            if overlay.contains(&uid) {
                return None;
            }
        }
        self.core.mapper.doc_id(uid)
    }

    /// Every live document owned by `uid` in this view
    pub fn doc_ids(&self, uid: Uid) -> impl Iterator<Item = DocNo> + '_ {
        let hidden = self.overlay.as_ref().map_or(false, |o| o.contains(&uid));
        self.core.mapper.doc_ids(uid).filter(move |_| !hidden)
    }

    pub fn mapper(&self) -> &DocIdMapper {
        &self.core.mapper
    }

    /// Live documents in this view
    pub fn num_docs(&self) -> u32 {
        let mapper = &self.core.mapper;
        let hidden = match &self.overlay {
            None => 0,
            Some(overlay) if overlay.len() < mapper.len() => overlay
                .iter()
                .map(|&uid| mapper.doc_ids(uid).count())
                .sum::<usize>(),
            Some(overlay) => mapper
                .iter()
                .filter(|(uid, _)| overlay.contains(uid))
                .count(),
        };
        (mapper.len() - hidden) as u32
    }

    /// Physically deleted slots
    pub fn num_deleted(&self) -> u32 {
        self.core.deleted.len() as u32
    }

    pub fn delete_ratio(&self) -> f64 {
        if self.max_doc() == 0 {
            0.0
        } else {
            self.num_deleted() as f64 / self.max_doc() as f64
        }
    }

    /// Uids deleted or replaced in this segment as of the snapshot
    pub fn modified_uids(&self) -> &Arc<HashSet<Uid>> {
        &self.core.modified
    }

    pub fn document(&self, docno: DocNo) -> Option<&StoredDocument> {
        self.core.content.document(docno)
    }

    pub fn content(&self) -> &Arc<ContentStore> {
        &self.core.content
    }

    pub fn deleted_docs(&self) -> &RoaringBitmap {
        &self.core.deleted
    }

    /// Live documents containing `term` in `field`
    pub fn term_docs(&self, field: &str, term: &str) -> Vec<DocNo> {
        match self.core.content.postings(&term_key(field, term)) {
            Some(bitmap) => bitmap
                .iter()
                .map(DocNo::new)
                .filter(|docno| !self.is_deleted(*docno))
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn term_doc_count(&self, field: &str, term: &str) -> u32 {
        self.term_docs(field, term).len() as u32
    }

    /// Iterate live ordinals in this view
    pub fn live_docs(&self) -> impl Iterator<Item = DocNo> + '_ {
        (0..self.max_doc())
            .map(DocNo::new)
            .filter(move |docno| !self.is_deleted(*docno))
    }
}

impl fmt::Debug for SegmentReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentReader")
            .field("name", &self.core.name)
            .field("generation", &self.core.generation)
            .field("max_doc", &self.max_doc())
            .field("num_deleted", &self.num_deleted())
            .field("overlay", &self.overlay.as_ref().map(|o| o.len()))
            .finish()
    }
}
