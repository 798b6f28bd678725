//! A single document-id space over several segment readers

use std::fmt;

use super::content::StoredDocument;
use super::reader::SegmentReader;
use super::types::{DocNo, Uid, DELETED_UID};

/// Global document ordinal across a composite view
pub type GlobalDocNo = u32;

/// Read-only view spanning multiple segment readers
#[derive(Clone, Default)]
pub struct CompositeReader {
    readers: Vec<SegmentReader>,
    /// starts[i] is the first global ordinal of readers[i]
    starts: Vec<u32>,
    max_doc: u32,
}

impl CompositeReader {
    pub fn new(readers: Vec<SegmentReader>) -> Self {
        let mut starts = Vec::with_capacity(readers.len());
        let mut max_doc = 0u32;
        for reader in &readers {
            starts.push(max_doc);
            max_doc += reader.max_doc();
        }
        Self {
            readers,
            starts,
            max_doc,
        }
    }

    pub fn sub_readers(&self) -> &[SegmentReader] {
        &self.readers
    }

    pub fn max_doc(&self) -> u32 {
        self.max_doc
    }

    /// Index of the sub-reader owning `global`
    pub fn sub_reader_index(&self, global: GlobalDocNo) -> Option<usize> {
        if global >= self.max_doc {
            return None;
        }
        // Empty sub-readers share their start with the next one; take the last match.
        let idx = self.starts.partition_point(|&start| start <= global);
        Some(idx - 1)
    }

    /// Translate a global ordinal to (sub-reader index, local ordinal)
    pub fn locate(&self, global: GlobalDocNo) -> Option<(usize, DocNo)> {
        let idx = self.sub_reader_index(global)?;
        Some((idx, DocNo::new(global - self.starts[idx])))
    }

    /// Global ordinal of a local ordinal in sub-reader `idx`
    pub fn global(&self, idx: usize, docno: DocNo) -> Option<GlobalDocNo> {
        let reader = self.readers.get(idx)?;
        if docno.as_u32() >= reader.max_doc() {
            return None;
        }
        Some(self.starts[idx] + docno.as_u32())
    }

    pub fn uid(&self, global: GlobalDocNo) -> Uid {
        match self.locate(global) {
            Some((idx, local)) => self.readers[idx].uid(local),
            None => DELETED_UID,
        }
    }

    pub fn is_deleted(&self, global: GlobalDocNo) -> bool {
        match self.locate(global) {
            Some((idx, local)) => self.readers[idx].is_deleted(local),
            None => true,
        }
    }

    pub fn document(&self, global: GlobalDocNo) -> Option<&StoredDocument> {
        let (idx, local) = self.locate(global)?;
        self.readers[idx].document(local)
    }

    /// Global ordinal of the live document for `uid`, searching newest readers first
    pub fn doc_id(&self, uid: Uid) -> Option<GlobalDocNo> {
        self.readers
            .iter()
            .enumerate()
            .find_map(|(idx, reader)| reader.doc_id(uid).and_then(|d| self.global(idx, d)))
    }

    /// Live documents across all sub-readers
    pub fn num_docs(&self) -> u32 {
        self.readers.iter().map(SegmentReader::num_docs).sum()
    }

    /// Live global ordinals containing `term` in `field`
    pub fn term_docs(&self, field: &str, term: &str) -> Vec<GlobalDocNo> {
        self.readers
            .iter()
            .enumerate()
            .flat_map(|(idx, reader)| {
                reader
                    .term_docs(field, term)
                    .into_iter()
                    .filter_map(move |d| self.global(idx, d))
            })
            .collect()
    }

    pub fn term_doc_count(&self, field: &str, term: &str) -> u32 {
        self.readers
            .iter()
            .map(|r| r.term_doc_count(field, term))
            .sum()
    }

    /// Uids of live documents containing `term` in `field`
    pub fn term_uids(&self, field: &str, term: &str) -> Vec<Uid> {
        self.term_docs(field, term)
            .into_iter()
            .map(|global| self.uid(global))
            .collect()
    }
}

impl fmt::Debug for CompositeReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeReader")
            .field("readers", &self.readers)
            .field("starts", &self.starts)
            .field("max_doc", &self.max_doc)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Document;
    use crate::segment::ContentStore;
    use crate::tokenizer::WhitespaceAnalyzer;
    use roaring::RoaringBitmap;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn reader(name: &str, uids: &[Uid]) -> SegmentReader {
        let mut content = ContentStore::new();
        for &uid in uids {
            content.add_document(
                &Document::new().with_text("body", "common"),
                uid,
                &WhitespaceAnalyzer,
            );
        }
        SegmentReader::open(
            name,
            1,
            Arc::new(content),
            RoaringBitmap::new(),
            Arc::new(HashSet::new()),
        )
    }

    #[test]
    fn test_empty_composite() {
        let composite = CompositeReader::new(Vec::new());
        assert_eq!(composite.max_doc(), 0);
        assert_eq!(composite.num_docs(), 0);
        assert_eq!(composite.locate(0), None);
        assert_eq!(composite.uid(0), DELETED_UID);
        assert!(composite.is_deleted(0));
        assert_eq!(composite.term_doc_count("body", "common"), 0);
    }

    #[test]
    fn test_routing_skips_empty_sub_readers() {
        let composite = CompositeReader::new(vec![
            reader("a", &[10, 11]),
            reader("empty", &[]),
            reader("b", &[20, 21, 22]),
        ]);

        assert_eq!(composite.max_doc(), 5);
        assert_eq!(composite.locate(0), Some((0, DocNo(0))));
        assert_eq!(composite.locate(1), Some((0, DocNo(1))));
        assert_eq!(composite.locate(2), Some((2, DocNo(0))));
        assert_eq!(composite.locate(4), Some((2, DocNo(2))));
        assert_eq!(composite.locate(5), None);

        assert_eq!(composite.uid(3), 21);
        assert_eq!(composite.doc_id(22), Some(4));
        assert_eq!(composite.doc_id(99), None);
        assert_eq!(composite.term_doc_count("body", "common"), 5);

        assert_eq!(composite.global(2, DocNo(1)), Some(3));
        assert_eq!(composite.global(0, DocNo(2)), None);
        assert_eq!(composite.global(1, DocNo(0)), None);
        assert_eq!(composite.global(3, DocNo(0)), None);
    }

    #[test]
    fn test_overlay_suppresses_older_copy() {
        let newer = reader("ram", &[7]);
        let older = reader("disk", &[7, 8])
            .with_overlay(Arc::new([7].into_iter().collect()));
        let composite = CompositeReader::new(vec![newer, older]);

        assert_eq!(composite.num_docs(), 2);
        assert_eq!(composite.doc_id(7), Some(0));
        assert!(composite.is_deleted(1));
        let mut uids = composite.term_uids("body", "common");
        uids.sort();
        assert_eq!(uids, vec![7, 8]);
    }
}
