use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, error};

use super::manager::IndexManager;
use crate::error::Result;
use crate::index::{IndexDoc, SearchIndex};
use crate::models::{max_version, BoxedIndexable, UpdateEvent};
use crate::segment::Uid;

/// Which segment a `BatchLoader` writes to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadTarget {
    /// The currently writable memory segment
    Memory,
    /// The disk index
    Disk,
}

/// Outcome of applying one batch
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub events: usize,
    /// Uids whose previous documents were removed
    pub touched: usize,
    pub inserted: usize,
}

/// Applies batches of interpreted events to one target segment.
///
/// The target is resolved per batch so that rotations and purges are picked up.
pub struct BatchLoader {
    manager: Arc<IndexManager>,
    target: LoadTarget,
}

impl BatchLoader {
    pub fn new(manager: Arc<IndexManager>, target: LoadTarget) -> Self {
        Self { manager, target }
    }

    pub fn target(&self) -> LoadTarget {
        self.target
    }

    pub fn consume(&self, events: &[UpdateEvent<BoxedIndexable>]) -> Result<LoadStats> {
        if events.is_empty() {
            return Ok(LoadStats::default());
        }
        let index: Arc<dyn SearchIndex> = match self.target {
            LoadTarget::Memory => self.manager.current_writable_mem(),
            LoadTarget::Disk => self.manager.disk_index(),
        };
        load_into(index.as_ref(), events)
    }
}

/// Apply `events` to `index` as one delete-then-insert commit.
///
/// Within the batch the last event per uid wins and skip markers are
/// ignored. The version and event counter only advance once the commit
/// succeeded.
pub fn load_into(index: &dyn SearchIndex, events: &[UpdateEvent<BoxedIndexable>]) -> Result<LoadStats> {
    let mut latest: HashMap<Uid, &UpdateEvent<BoxedIndexable>> = HashMap::with_capacity(events.len());
    for event in events {
        if event.payload.is_skip() {
            continue;
        }
        let uid = event.payload.uid();
        match latest.get(&uid) {
            Some(seen) if seen.version > event.version => {}
            _ => {
                latest.insert(uid, event);
            }
        }
    }

    let mut survivors: Vec<(&Uid, &&UpdateEvent<BoxedIndexable>)> = latest.iter().collect();
    survivors.sort_unstable_by_key(|(uid, _)| **uid);

    let mut del_uids = HashSet::with_capacity(survivors.len());
    let mut docs = Vec::new();
    for (&uid, event) in survivors {
        del_uids.insert(uid);
        if event.payload.is_deleted() {
            continue;
        }
        docs.extend(
            event
                .payload
                .build_indexing_reqs()
                .into_iter()
                .map(|req| IndexDoc::new(uid, req)),
        );
    }

    let stats = LoadStats {
        events: events.len(),
        touched: del_uids.len(),
        inserted: docs.len(),
    };
    if let Err(e) = index.update_index(&del_uids, docs) {
        error!(index = index.name(), events = events.len(), error = %e, "batch update failed");
        return Err(e);
    }
    if let Some(version) = max_version(events) {
        index.set_version(version)?;
    }
    index.increment_event_count(events.len() as u64);
    debug!(
        index = index.name(),
        events = stats.events,
        touched = stats.touched,
        inserted = stats.inserted,
        version = index.version(),
        "batch applied"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexConfig;
    use crate::index::RamSearchIndex;
    use crate::models::{Document, IndexableDocument};
    use crate::tokenizer::WhitespaceAnalyzer;
    use tempfile::TempDir;

    fn ram() -> RamSearchIndex {
        RamSearchIndex::new("mem-test", 0, Arc::new(WhitespaceAnalyzer))
    }

    fn put(version: u64, uid: Uid, body: &str) -> UpdateEvent<BoxedIndexable> {
        UpdateEvent::new(
            version,
            IndexableDocument::new(uid, Document::new().with_text("body", body)).boxed(),
        )
    }

    fn delete(version: u64, uid: Uid) -> UpdateEvent<BoxedIndexable> {
        UpdateEvent::new(version, IndexableDocument::delete(uid).boxed())
    }

    fn skip(version: u64, uid: Uid) -> UpdateEvent<BoxedIndexable> {
        UpdateEvent::new(version, IndexableDocument::skip(uid).boxed())
    }

    #[test]
    fn test_last_write_wins_within_batch() {
        let index = ram();
        let stats = load_into(&index, &[put(1, 5, "first"), put(2, 5, "second")]).unwrap();
        assert_eq!(stats.inserted, 1);

        let reader = index.open_reader();
        assert_eq!(reader.num_docs(), 1);
        assert_eq!(reader.term_doc_count("body", "first"), 0);
        assert_eq!(reader.term_doc_count("body", "second"), 1);
        assert_eq!(index.version(), 2);
        assert_eq!(index.event_count(), 2);
    }

    #[test]
    fn test_later_delete_wins() {
        let index = ram();
        load_into(&index, &[put(1, 5, "x"), delete(2, 5)]).unwrap();
        assert_eq!(index.num_docs(), 0);
        assert_eq!(index.version(), 2);
    }

    #[test]
    fn test_skip_touches_nothing() {
        let index = ram();
        load_into(&index, &[put(1, 5, "x")]).unwrap();
        load_into(&index, &[skip(2, 5)]).unwrap();
        assert_eq!(index.num_docs(), 1);
        assert_eq!(index.version(), 2);
        assert_eq!(index.event_count(), 2);
    }

    #[test]
    fn test_empty_requests_delete() {
        let index = ram();
        load_into(&index, &[put(1, 5, "x")]).unwrap();
        let empty = IndexableDocument::with_reqs(5, Vec::new()).boxed();
        load_into(&index, &[UpdateEvent::new(2, empty)]).unwrap();
        assert_eq!(index.num_docs(), 0);
    }

    #[test]
    fn test_batch_loader_follows_rotation() {
        let tmp = TempDir::new().unwrap();
        let manager = Arc::new(
            IndexManager::open(&IndexConfig::new(tmp.path()), Arc::new(WhitespaceAnalyzer))
                .unwrap(),
        );
        let loader = BatchLoader::new(manager.clone(), LoadTarget::Memory);

        loader.consume(&[put(1, 1, "a")]).unwrap();
        assert_eq!(manager.mem_a().num_docs(), 1);

        manager
            .set_status(crate::indexing::IndexStatus::Working)
            .unwrap();
        loader.consume(&[put(2, 2, "b")]).unwrap();
        assert_eq!(manager.mem_a().num_docs(), 1);
        assert_eq!(manager.mem_b().map(|b| b.num_docs()), Some(1));

        let disk = BatchLoader::new(manager.clone(), LoadTarget::Disk);
        disk.consume(&[put(3, 3, "c")]).unwrap();
        assert_eq!(manager.disk_index().num_docs(), 1);
        assert_eq!(manager.disk_index().version(), 3);
    }
}
