//! Uid to local document ordinal lookup
//!
//! Built once per reader snapshot from the dense uid array of a segment:
//! - slots holding `DELETED_UID` are gaps and never match
//! - physically deleted slots are skipped
//! - a uid indexed from several requests owns several ordinals; all of them
//!   are kept, and `doc_id` answers with the highest, the most recent insert

use roaring::RoaringBitmap;

use super::types::{DocNo, Uid, DELETED_UID};

/// Immutable table of (uid, docno) pairs sorted by uid then docno
#[derive(Clone, Debug, Default)]
pub struct DocIdMapper {
    uids: Vec<Uid>,
    docnos: Vec<u32>,
}

impl DocIdMapper {
    /// Build from a uid array in physical order
    pub fn build(uid_array: &[Uid], deleted: &RoaringBitmap) -> Self {
        let mut pairs: Vec<(Uid, u32)> = uid_array
            .iter()
            .enumerate()
            .filter(|&(i, &uid)| uid != DELETED_UID && !deleted.contains(i as u32))
            .map(|(i, &uid)| (uid, i as u32))
            .collect();
        pairs.sort_unstable();
        let (uids, docnos) = pairs.into_iter().unzip();
        Self { uids, docnos }
    }

    fn range(&self, uid: Uid) -> std::ops::Range<usize> {
        let lo = self.uids.partition_point(|&u| u < uid);
        let hi = lo + self.uids[lo..].partition_point(|&u| u == uid);
        lo..hi
    }

    /// Newest live document for `uid`
    pub fn doc_id(&self, uid: Uid) -> Option<DocNo> {
        let range = self.range(uid);
        self.docnos[range].last().map(|&d| DocNo::new(d))
    }

    /// Every live document owned by `uid`, oldest first
    pub fn doc_ids(&self, uid: Uid) -> impl Iterator<Item = DocNo> + '_ {
        let range = self.range(uid);
        self.docnos[range].iter().map(|&d| DocNo::new(d))
    }

    pub fn contains(&self, uid: Uid) -> bool {
        self.uids.binary_search(&uid).is_ok()
    }

    /// Number of mapped documents
    pub fn len(&self) -> usize {
        self.uids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uids.is_empty()
    }

    /// Iterate (uid, docno) pairs in uid order
    pub fn iter(&self) -> impl Iterator<Item = (Uid, DocNo)> + '_ {
        self.uids
            .iter()
            .zip(self.docnos.iter())
            .map(|(&uid, &docno)| (uid, DocNo::new(docno)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        let uids = vec![300, 100, 200];
        let mapper = DocIdMapper::build(&uids, &RoaringBitmap::new());

        assert_eq!(mapper.doc_id(100), Some(DocNo(1)));
        assert_eq!(mapper.doc_id(200), Some(DocNo(2)));
        assert_eq!(mapper.doc_id(300), Some(DocNo(0)));
        assert_eq!(mapper.doc_id(400), None);
        assert_eq!(mapper.len(), 3);
    }

    #[test]
    fn test_gaps_and_deletes_miss() {
        let uids = vec![10, DELETED_UID, 30, 40];
        let mut deleted = RoaringBitmap::new();
        deleted.insert(3);
        let mapper = DocIdMapper::build(&uids, &deleted);

        assert_eq!(mapper.doc_id(10), Some(DocNo(0)));
        assert_eq!(mapper.doc_id(DELETED_UID), None);
        assert_eq!(mapper.doc_id(40), None);
        assert_eq!(mapper.len(), 2);
    }

    #[test]
    fn test_reinserted_uid_maps_to_newest() {
        let uids = vec![5, 6, 5];
        let mapper = DocIdMapper::build(&uids, &RoaringBitmap::new());
        assert_eq!(mapper.doc_id(5), Some(DocNo(2)));

        let mut deleted = RoaringBitmap::new();
        deleted.insert(2);
        let mapper = DocIdMapper::build(&uids, &deleted);
        assert_eq!(mapper.doc_id(5), Some(DocNo(0)));
    }

    #[test]
    fn test_uid_with_several_documents() {
        let uids = vec![7, 3, 7, 7, 9];
        let mut deleted = RoaringBitmap::new();
        deleted.insert(2);
        let mapper = DocIdMapper::build(&uids, &deleted);

        assert_eq!(mapper.doc_ids(7).collect::<Vec<_>>(), vec![DocNo(0), DocNo(3)]);
        assert_eq!(mapper.doc_id(7), Some(DocNo(3)));
        assert_eq!(mapper.doc_ids(3).count(), 1);
        assert_eq!(mapper.doc_ids(8).count(), 0);
        assert_eq!(mapper.len(), 4);
    }

    #[test]
    fn test_empty() {
        let mapper = DocIdMapper::build(&[], &RoaringBitmap::new());
        assert!(mapper.is_empty());
        assert_eq!(mapper.doc_id(1), None);
        assert_eq!(mapper.iter().count(), 0);
    }
}
