use std::fmt;

use super::document::Document;
use crate::error::Result;
use crate::segment::Uid;
use crate::tokenizer::SharedAnalyzer;

/// One unit of content to insert for a uid, optionally with its own analyzer
#[derive(Clone)]
pub struct IndexingReq {
    pub document: Document,
    pub analyzer: Option<SharedAnalyzer>,
}

impl IndexingReq {
    pub fn new(document: Document) -> Self {
        Self {
            document,
            analyzer: None,
        }
    }

    pub fn with_analyzer(mut self, analyzer: SharedAnalyzer) -> Self {
        self.analyzer = Some(analyzer);
        self
    }
}

impl fmt::Debug for IndexingReq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexingReq")
            .field("document", &self.document)
            .field("custom_analyzer", &self.analyzer.is_some())
            .finish()
    }
}

/// The index-facing view of one interpreted payload.
///
/// A non-deleted indexable that builds no requests is treated as a delete.
pub trait Indexable: Send {
    fn uid(&self) -> Uid;

    fn is_deleted(&self) -> bool;

    /// Skipped records neither delete nor insert anything
    fn is_skip(&self) -> bool {
        false
    }

    fn build_indexing_reqs(&self) -> Vec<IndexingReq>;
}

pub type BoxedIndexable = Box<dyn Indexable>;

/// Converts caller payloads into indexables
pub trait IndexableInterpreter<V>: Send + Sync {
    fn interpret(&self, payload: &V) -> Result<BoxedIndexable>;
}

impl<V, F> IndexableInterpreter<V> for F
where
    F: Fn(&V) -> Result<BoxedIndexable> + Send + Sync,
{
    fn interpret(&self, payload: &V) -> Result<BoxedIndexable> {
        self(payload)
    }
}

/// Ready-made indexable carrying its requests
#[derive(Clone, Debug)]
pub struct IndexableDocument {
    uid: Uid,
    deleted: bool,
    skip: bool,
    reqs: Vec<IndexingReq>,
}

impl IndexableDocument {
    /// Insert or replace `uid` with a single document
    pub fn new(uid: Uid, document: Document) -> Self {
        Self::with_reqs(uid, vec![IndexingReq::new(document)])
    }

    pub fn with_reqs(uid: Uid, reqs: Vec<IndexingReq>) -> Self {
        Self {
            uid,
            deleted: false,
            skip: false,
            reqs,
        }
    }

    /// Tombstone for `uid`
    pub fn delete(uid: Uid) -> Self {
        Self {
            uid,
            deleted: true,
            skip: false,
            reqs: Vec::new(),
        }
    }

    pub fn skip(uid: Uid) -> Self {
        Self {
            uid,
            deleted: false,
            skip: true,
            reqs: Vec::new(),
        }
    }

    pub fn boxed(self) -> BoxedIndexable {
        Box::new(self)
    }
}

impl Indexable for IndexableDocument {
    fn uid(&self) -> Uid {
        self.uid
    }

    fn is_deleted(&self) -> bool {
        self.deleted
    }

    fn is_skip(&self) -> bool {
        self.skip
    }

    fn build_indexing_reqs(&self) -> Vec<IndexingReq> {
        self.reqs.clone()
    }
}
