use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use super::consumer::DataConsumer;
use super::disk_loader::DiskLoader;
use super::loader::{BatchLoader, LoadTarget};
use super::manager::IndexManager;
use crate::error::Result;
use crate::models::{BoxedIndexable, IndexableDocument, IndexableInterpreter, UpdateEvent};

/// Interprets raw payloads and routes them to the memory segment and the
/// disk loader.
///
/// A payload that fails to interpret is replaced by a skip marker so its
/// version still counts as seen.
pub struct IndexPipeline<V> {
    manager: Arc<IndexManager>,
    interpreter: Arc<dyn IndexableInterpreter<V>>,
    ram_loader: BatchLoader,
    disk_loader: Arc<DiskLoader>,
    interpret_errors: AtomicU64,
}

impl<V> IndexPipeline<V> {
    pub fn new(
        manager: Arc<IndexManager>,
        interpreter: Arc<dyn IndexableInterpreter<V>>,
        disk_loader: Arc<DiskLoader>,
    ) -> Self {
        Self {
            ram_loader: BatchLoader::new(manager.clone(), LoadTarget::Memory),
            manager,
            interpreter,
            disk_loader,
            interpret_errors: AtomicU64::new(0),
        }
    }

    /// Records dropped because the interpreter rejected them
    pub fn interpret_errors(&self) -> u64 {
        self.interpret_errors.load(Ordering::Relaxed)
    }

    fn interpret(&self, events: Vec<UpdateEvent<V>>) -> Vec<UpdateEvent<BoxedIndexable>> {
        events
            .into_iter()
            .map(|event| {
                let version = event.version;
                match self.interpreter.interpret(&event.payload) {
                    Ok(indexable) => UpdateEvent::new(version, indexable),
                    Err(e) => {
                        self.interpret_errors.fetch_add(1, Ordering::Relaxed);
                        warn!(version, error = %e, "skipping record");
                        UpdateEvent::new(version, IndexableDocument::skip(0).boxed())
                    }
                }
            })
            .collect()
    }
}

impl<V: Send + Sync> DataConsumer<V> for IndexPipeline<V> {
    fn consume(&self, events: Vec<UpdateEvent<V>>) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        let interpreted = self.interpret(events);

        if !self.manager.is_realtime() {
            return self.disk_loader.consume(interpreted);
        }

        self.disk_loader.wait_for_capacity()?;
        let _handoff = self.manager.handoff_lock();
        let stats = self.ram_loader.consume(&interpreted)?;
        self.disk_loader.add_count(interpreted.len());
        debug!(events = stats.events, inserted = stats.inserted, "batch staged in memory");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::SearchIndex;
    use crate::config::IndexConfig;
    use crate::error::RtIndexError;
    use crate::models::Document;
    use crate::segment::CompositeReader;
    use crate::tokenizer::WhitespaceAnalyzer;
    use std::time::Duration;
    use tempfile::TempDir;

    fn interpreter() -> Arc<dyn IndexableInterpreter<String>> {
        Arc::new(|payload: &String| -> Result<BoxedIndexable> {
            let (uid, body) = payload
                .split_once(':')
                .ok_or_else(|| RtIndexError::interpret(None, "missing uid"))?;
            let uid = uid
                .parse()
                .map_err(|_| RtIndexError::interpret(None, "bad uid"))?;
            Ok(IndexableDocument::new(uid, Document::new().with_text("body", body)).boxed())
        })
    }

    fn pipeline(dir: &std::path::Path, realtime: bool) -> (Arc<IndexManager>, Arc<DiskLoader>, IndexPipeline<String>) {
        let config = IndexConfig::new(dir)
            .with_realtime(realtime)
            .with_batch_delay(Duration::from_secs(60));
        let manager = Arc::new(IndexManager::open(&config, Arc::new(WhitespaceAnalyzer)).unwrap());
        let disk_loader = Arc::new(DiskLoader::new(manager.clone(), &config));
        let pipeline = IndexPipeline::new(manager.clone(), interpreter(), disk_loader.clone());
        (manager, disk_loader, pipeline)
    }

    fn events(payloads: &[&str]) -> Vec<UpdateEvent<String>> {
        payloads
            .iter()
            .enumerate()
            .map(|(v, p)| UpdateEvent::new(v as u64, p.to_string()))
            .collect()
    }

    #[test]
    fn test_realtime_writes_are_searchable_immediately() {
        let tmp = TempDir::new().unwrap();
        let (manager, disk_loader, pipeline) = pipeline(tmp.path(), true);
        disk_loader.start().unwrap();

        pipeline.consume(events(&["1:zoie", "2:zoie"])).unwrap();
        let view = CompositeReader::new(manager.acquire_readers());
        assert_eq!(view.term_doc_count("body", "zoie"), 2);
        assert_eq!(disk_loader.pending_count(), 2);
        assert_eq!(manager.mem_a().version(), 1);
        disk_loader.shutdown();
    }

    #[test]
    fn test_bad_record_is_skipped_but_counted() {
        let tmp = TempDir::new().unwrap();
        let (manager, disk_loader, pipeline) = pipeline(tmp.path(), true);
        disk_loader.start().unwrap();

        pipeline.consume(events(&["1:ok", "garbage", "3:ok"])).unwrap();
        assert_eq!(pipeline.interpret_errors(), 1);
        assert_eq!(manager.mem_a().num_docs(), 2);
        assert_eq!(manager.mem_a().version(), 2);
        assert_eq!(disk_loader.pending_count(), 3);
        disk_loader.shutdown();
    }

    #[test]
    fn test_non_realtime_goes_to_disk_only() {
        let tmp = TempDir::new().unwrap();
        let (manager, disk_loader, pipeline) = pipeline(tmp.path(), false);
        disk_loader.start().unwrap();

        pipeline.consume(events(&["1:zoie"])).unwrap();
        assert_eq!(manager.mem_a().num_docs(), 0);
        disk_loader.flush_events(Duration::from_secs(10)).unwrap();
        assert_eq!(manager.disk_index().num_docs(), 1);
        let view = CompositeReader::new(manager.acquire_readers());
        assert_eq!(view.term_doc_count("body", "zoie"), 1);
        disk_loader.shutdown();
    }
}
