//! Top-level index system
//!
//! Wires the front-door consumer, the interpretation pipeline, the memory
//! segments, the disk loader and reader decoration into one handle.

use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::admin::IndexAdmin;
use crate::config::IndexConfig;
use crate::decorator::{DecoratorCache, IdentityDecorator, ReaderDecorator};
use crate::error::Result;
use crate::index::SearchIndex;
use crate::indexing::{AsyncConsumer, DataConsumer, DiskLoader, IndexManager, IndexPipeline};
use crate::models::{IndexableInterpreter, UpdateEvent};
use crate::segment::{CompositeReader, SegmentReader, Uid, Version};
use crate::tokenizer::Tokenizer;

/// Readers acquired in one call, newest segment first
pub struct ReaderSnapshot<R> {
    decorated: Vec<R>,
    composite: CompositeReader,
}

impl<R> ReaderSnapshot<R> {
    /// Decorated values, one per reader
    pub fn decorated(&self) -> &[R] {
        &self.decorated
    }

    pub fn readers(&self) -> &[SegmentReader] {
        self.composite.sub_readers()
    }

    pub fn composite(&self) -> &CompositeReader {
        &self.composite
    }

    pub fn num_docs(&self) -> u32 {
        self.composite.num_docs()
    }

    pub fn term_doc_count(&self, field: &str, term: &str) -> u32 {
        self.composite.term_doc_count(field, term)
    }

    pub fn term_uids(&self, field: &str, term: &str) -> Vec<Uid> {
        self.composite.term_uids(field, term)
    }

    pub fn into_decorated(self) -> Vec<R> {
        self.decorated
    }
}

/// A searchable index fed by a stream of versioned events.
///
/// Writes become searchable once the consumer has delivered them, which
/// `sync_to_version` waits for. Disk persistence happens in the background.
pub struct IndexSystem<V: Send + 'static, R> {
    consumer: Arc<AsyncConsumer<V>>,
    disk_loader: Arc<DiskLoader>,
    manager: Arc<IndexManager>,
    admin: IndexAdmin,
    cache: DecoratorCache<R>,
    config: IndexConfig,
}

impl<V: Send + Sync + 'static> IndexSystem<V, SegmentReader> {
    /// System handing out undecorated readers
    pub fn open(config: IndexConfig, interpreter: Arc<dyn IndexableInterpreter<V>>) -> Result<Self> {
        Self::new(config, interpreter, Arc::new(IdentityDecorator))
    }
}

impl<V: Send + Sync + 'static, R: Clone> IndexSystem<V, R> {
    pub fn new(
        config: IndexConfig,
        interpreter: Arc<dyn IndexableInterpreter<V>>,
        decorator: Arc<dyn ReaderDecorator<R>>,
    ) -> Result<Self> {
        let config = config.validate()?;
        let analyzer = Tokenizer::shared(&config.analyzer);
        let manager = Arc::new(IndexManager::open(&config, analyzer)?);
        let disk_loader = Arc::new(DiskLoader::new(manager.clone(), &config));
        let pipeline: Arc<dyn DataConsumer<V>> = Arc::new(IndexPipeline::new(
            manager.clone(),
            interpreter,
            disk_loader.clone(),
        ));

        let disk_version = manager.disk_index().version();
        let initial = if disk_version > 0 { Some(disk_version) } else { None };
        let consumer = Arc::new(AsyncConsumer::new(
            pipeline,
            config.consumer_batch_size,
            initial,
        ));
        let admin = IndexAdmin::new(manager.clone(), disk_loader.clone(), consumer.clone());

        Ok(Self {
            consumer,
            disk_loader,
            manager,
            admin,
            cache: DecoratorCache::new(decorator),
            config,
        })
    }

    /// Start the disk loader and the consumer
    pub fn start(&self) -> Result<()> {
        self.disk_loader.start()?;
        self.consumer.start()?;
        info!(
            home = %self.config.index_dir.display(),
            realtime = self.config.realtime,
            version = self.manager.disk_index().version(),
            "index system started"
        );
        Ok(())
    }

    /// Deliver buffered events, flush them to disk and stop both workers
    pub fn shutdown(&self) {
        self.consumer.stop();
        self.disk_loader.shutdown();
        info!(home = %self.config.index_dir.display(), "index system stopped");
    }

    pub fn consume(&self, events: Vec<UpdateEvent<V>>) -> Result<()> {
        self.consumer.consume(events)
    }

    /// Wait until events through `version` are searchable
    pub fn sync_to_version(&self, timeout: Duration, version: Version) -> Result<()> {
        self.consumer.sync_to_version(timeout, version)
    }

    /// Wait until every accepted event reached the disk index
    pub fn flush_events(&self, timeout: Duration) -> Result<()> {
        self.admin.flush_to_disk_index(timeout)
    }

    /// Highest version delivered to the index
    pub fn current_version(&self) -> Option<Version> {
        self.consumer.current_version()
    }

    pub fn current_disk_version(&self) -> Version {
        self.manager.disk_index().version()
    }

    pub fn acquire_readers(&self) -> ReaderSnapshot<R> {
        let readers = self.manager.acquire_readers();
        let decorated = self.cache.decorate_all(&readers);
        ReaderSnapshot {
            decorated,
            composite: CompositeReader::new(readers),
        }
    }

    pub fn release_readers(&self, snapshot: ReaderSnapshot<R>) {
        let ReaderSnapshot { decorated, composite } = snapshot;
        drop(decorated);
        self.manager
            .release_readers(composite.sub_readers().to_vec());
    }

    /// Published disk readers, without any delete overlay
    pub fn disk_readers(&self) -> Vec<SegmentReader> {
        self.manager.disk_readers()
    }

    pub fn refresh_disk_reader(&self) -> Result<()> {
        self.manager.refresh_disk_reader()
    }

    pub fn purge_index(&self) -> Result<()> {
        self.admin.purge_index()?;
        self.cache.clear();
        Ok(())
    }

    /// Write the committed disk index to `out`; returns the number of files
    pub fn export_snapshot<W: Write>(&self, out: W) -> Result<usize> {
        let _maintenance = self.manager.maintenance_lock();
        self.manager.disk_index().export_snapshot(out)
    }

    /// Replace all indexed data with a snapshot
    pub fn import_snapshot<Rd: Read>(&self, input: Rd) -> Result<Version> {
        let version = self.manager.import_snapshot(input)?;
        self.disk_loader.reset();
        self.cache.clear();
        Ok(version)
    }

    pub fn admin(&self) -> &IndexAdmin {
        &self.admin
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn manager(&self) -> &Arc<IndexManager> {
        &self.manager
    }
}

impl<V: Send + 'static, R> Drop for IndexSystem<V, R> {
    fn drop(&mut self) {
        self.consumer.stop();
        self.disk_loader.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalyzerConfig;
    use crate::models::{BoxedIndexable, Document, IndexableDocument};
    use tempfile::TempDir;

    fn interpreter() -> Arc<dyn IndexableInterpreter<(Uid, String)>> {
        Arc::new(|payload: &(Uid, String)| -> Result<BoxedIndexable> {
            Ok(IndexableDocument::new(payload.0, Document::new().with_text("body", payload.1.clone())).boxed())
        })
    }

    fn config(dir: &std::path::Path) -> IndexConfig {
        IndexConfig::new(dir)
            .with_analyzer(AnalyzerConfig::plain())
            .with_batch_delay(Duration::from_secs(60))
    }

    #[test]
    fn test_synced_writes_are_visible() {
        let tmp = TempDir::new().unwrap();
        let system = IndexSystem::open(config(tmp.path()), interpreter()).unwrap();
        system.start().unwrap();

        system
            .consume(vec![
                UpdateEvent::new(1, (1, "hello world".to_string())),
                UpdateEvent::new(2, (2, "hello there".to_string())),
            ])
            .unwrap();
        system.sync_to_version(Duration::from_secs(10), 2).unwrap();

        let snapshot = system.acquire_readers();
        assert_eq!(snapshot.term_doc_count("body", "hello"), 2);
        assert_eq!(snapshot.decorated().len(), snapshot.readers().len());
        system.release_readers(snapshot);
        system.shutdown();
    }

    #[test]
    fn test_custom_decorator() {
        let tmp = TempDir::new().unwrap();
        let decorator: Arc<dyn ReaderDecorator<u32>> =
            Arc::new(|reader: &SegmentReader| reader.num_docs());
        let system = IndexSystem::new(config(tmp.path()), interpreter(), decorator).unwrap();
        system.start().unwrap();
        system
            .consume(vec![UpdateEvent::new(1, (1, "x".to_string()))])
            .unwrap();
        system.sync_to_version(Duration::from_secs(10), 1).unwrap();

        let counts = system.acquire_readers().into_decorated();
        assert_eq!(counts.iter().sum::<u32>(), 1);
        system.shutdown();
    }

    #[test]
    fn test_snapshot_export_import() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        let mut archive = Vec::new();
        {
            let system = IndexSystem::open(config(src.path()), interpreter()).unwrap();
            system.start().unwrap();
            system
                .consume((1..=5).map(|i| UpdateEvent::new(i, (i, "snap".to_string()))).collect())
                .unwrap();
            system.flush_events(Duration::from_secs(10)).unwrap();
            assert!(system.export_snapshot(&mut archive).unwrap() >= 1);
        }

        let system = IndexSystem::open(config(dst.path()), interpreter()).unwrap();
        system.start().unwrap();
        assert_eq!(system.import_snapshot(archive.as_slice()).unwrap(), 5);
        assert_eq!(system.current_disk_version(), 5);
        assert_eq!(system.acquire_readers().term_doc_count("body", "snap"), 5);
        system.shutdown();
    }
}
