//! Search indexes the manager stages writes through
//!
//! Two implementations share the `SearchIndex` contract:
//!
//! - `RamSearchIndex`: a single in-memory segment, republished after each commit
//! - `DiskSearchIndex`: persistent sub-segments plus a versioned signature
//!
//! Every write goes through a pending writer. Opening it twice before a commit
//! reuses the same writer, and a commit applies deletes before inserts.

mod ram;
mod disk;

pub use ram::*;
pub use disk::*;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use roaring::RoaringBitmap;

use crate::error::Result;
use crate::models::IndexingReq;
use crate::segment::{ContentStore, Uid, Version};

/// A document bound for insertion under `uid`
#[derive(Clone, Debug)]
pub struct IndexDoc {
    pub uid: Uid,
    pub req: IndexingReq,
}

impl IndexDoc {
    pub fn new(uid: Uid, req: IndexingReq) -> Self {
        Self { uid, req }
    }
}

/// Operations shared by memory and disk indexes
pub trait SearchIndex: Send + Sync {
    /// Short label used in logs and reader names
    fn name(&self) -> &str;

    /// Highest version applied so far
    fn version(&self) -> Version;

    /// Raise the version; lower values are ignored
    fn set_version(&self, version: Version) -> Result<()>;

    fn event_count(&self) -> u64;

    fn increment_event_count(&self, count: u64);

    /// Delete every live document of `del_uids`, then insert `docs`, as one commit
    fn update_index(&self, del_uids: &HashSet<Uid>, docs: Vec<IndexDoc>) -> Result<()>;

    /// Delete the live documents of `uids` in their own commit
    fn delete_by_uid(&self, uids: &HashSet<Uid>) -> Result<()> {
        self.update_index(uids, Vec::new())
    }

    /// Live document count of the latest commit
    fn num_docs(&self) -> u64;

    /// Approximate size of the committed content in bytes
    fn size_bytes(&self) -> u64;
}

/// Uncommitted work of an index writer
pub(crate) struct PendingWrite<K> {
    /// Docnos to delete, per target segment
    pub deletes: HashMap<K, RoaringBitmap>,
    /// Whole segments to append, minus their deleted docnos
    pub segments: Vec<(Arc<ContentStore>, RoaringBitmap)>,
    pub docs: Vec<IndexDoc>,
}

impl<K: std::hash::Hash + Eq> PendingWrite<K> {
    pub fn new() -> Self {
        Self {
            deletes: HashMap::new(),
            segments: Vec::new(),
            docs: Vec::new(),
        }
    }

    pub fn delete(&mut self, key: K, docno: u32) {
        self.deletes.entry(key).or_default().insert(docno);
    }

    pub fn is_empty(&self) -> bool {
        self.deletes.values().all(|d| d.is_empty()) && self.segments.is_empty() && self.docs.is_empty()
    }

    /// Content appended by this write, segments first, then documents
    pub fn build_content(&self, default_analyzer: &dyn crate::tokenizer::Analyzer) -> ContentStore {
        let mut content = ContentStore::new();
        for (segment, deleted) in &self.segments {
            content.append_live(segment, deleted);
        }
        for doc in &self.docs {
            let analyzer = doc.req.analyzer.as_deref().unwrap_or(default_analyzer);
            content.add_document(&doc.req.document, doc.uid, analyzer);
        }
        content
    }
}
