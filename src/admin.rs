//! Administrative counters and control calls
//!
//! Every call is safe while indexing is running. Control calls take the same
//! locks as the background workers and therefore wait for an in-flight flush.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Result;
use crate::index::SearchIndex;
use crate::indexing::{ConsumerControl, DiskLoader, IndexManager, IndexStatus};
use crate::segment::Version;

/// How long a purge waits for pending events before discarding them
const PURGE_FLUSH_TIMEOUT: Duration = Duration::from_secs(20);

/// Point-in-time view of the admin counters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdminStats {
    pub index_dir: String,
    pub realtime: bool,
    pub status: IndexStatus,
    pub disk_version: Version,
    pub disk_index_size: u64,
    pub disk_size_bytes: u64,
    pub disk_segment_count: usize,
    /// Unix seconds of the last disk commit
    pub last_disk_modified: u64,
    /// Unix milliseconds of the last optimize call or of opening
    pub last_optimized_ms: u64,
    pub ram_a_version: Version,
    pub ram_a_size: u64,
    pub ram_b_version: Option<Version>,
    pub ram_b_size: Option<u64>,
    pub batch_size: usize,
    pub max_batch_size: usize,
    pub batch_delay_ms: u64,
    pub current_mem_batch_size: usize,
    pub current_disk_batch_size: usize,
    pub disk_flushes: u64,
    /// Consumer batches lost to indexing failures
    pub dropped_batches: u64,
    pub dropped_events: u64,
}

/// Handle for inspecting and steering a running index system
#[derive(Clone)]
pub struct IndexAdmin {
    manager: Arc<IndexManager>,
    disk_loader: Arc<DiskLoader>,
    consumer: Arc<dyn ConsumerControl>,
}

impl IndexAdmin {
    pub fn new(
        manager: Arc<IndexManager>,
        disk_loader: Arc<DiskLoader>,
        consumer: Arc<dyn ConsumerControl>,
    ) -> Self {
        Self {
            manager,
            disk_loader,
            consumer,
        }
    }

    pub fn index_dir(&self) -> &Path {
        self.manager.home()
    }

    pub fn is_realtime(&self) -> bool {
        self.manager.is_realtime()
    }

    pub fn status(&self) -> IndexStatus {
        self.manager.status()
    }

    /// Live documents on disk
    pub fn disk_index_size(&self) -> u64 {
        self.manager.disk_index().num_docs()
    }

    pub fn disk_version(&self) -> Version {
        self.manager.disk_index().version()
    }

    pub fn disk_segment_count(&self) -> usize {
        self.manager.disk_index().segment_count()
    }

    /// Unix seconds of the last disk commit, 0 if there was none
    pub fn last_disk_modified(&self) -> u64 {
        self.manager.disk_index().last_modified()
    }

    pub fn last_optimized(&self) -> SystemTime {
        self.manager.disk_index().last_optimized()
    }

    pub fn ram_a_size(&self) -> u64 {
        self.manager.mem_a().num_docs()
    }

    pub fn ram_a_version(&self) -> Version {
        self.manager.mem_a().version()
    }

    /// `None` unless the disk loader is merging
    pub fn ram_b_size(&self) -> Option<u64> {
        self.manager.mem_b().map(|b| b.num_docs())
    }

    pub fn ram_b_version(&self) -> Option<Version> {
        self.manager.mem_b().map(|b| b.version())
    }

    pub fn batch_size(&self) -> usize {
        self.disk_loader.batch_size()
    }

    pub fn set_batch_size(&self, batch_size: usize) {
        self.disk_loader.set_batch_size(batch_size);
        info!(batch_size = self.disk_loader.batch_size(), "batch size changed");
    }

    pub fn max_batch_size(&self) -> usize {
        self.disk_loader.max_batch_size()
    }

    pub fn set_max_batch_size(&self, max_batch_size: usize) {
        self.disk_loader.set_max_batch_size(max_batch_size);
        info!(max_batch_size = self.disk_loader.max_batch_size(), "max batch size changed");
    }

    pub fn batch_delay(&self) -> Duration {
        self.disk_loader.batch_delay()
    }

    pub fn set_batch_delay(&self, delay: Duration) {
        self.disk_loader.set_batch_delay(delay);
        info!(delay_ms = delay.as_millis() as u64, "batch delay changed");
    }

    /// Events buffered by the front-door consumer
    pub fn current_mem_batch_size(&self) -> usize {
        self.consumer.pending_len()
    }

    /// Consumer batches the index rejected and dropped
    pub fn dropped_batches(&self) -> u64 {
        self.consumer.dropped_batches()
    }

    pub fn dropped_events(&self) -> u64 {
        self.consumer.dropped_events()
    }

    /// Events accepted but not yet on disk
    pub fn current_disk_batch_size(&self) -> usize {
        self.disk_loader.pending_count()
    }

    /// Push everything accepted so far onto disk within `timeout`
    pub fn flush_to_disk_index(&self, timeout: Duration) -> Result<()> {
        info!(timeout_ms = timeout.as_millis() as u64, "flushing to disk");
        let deadline = Instant::now() + timeout;
        self.consumer.flush(timeout)?;
        let remaining = deadline.saturating_duration_since(Instant::now());
        self.disk_loader.flush_events(remaining)?;
        info!("all events flushed to disk");
        Ok(())
    }

    /// Merge the disk index down to at most `max_segments` sub-segments
    pub fn optimize(&self, max_segments: usize) -> Result<bool> {
        let _maintenance = self.manager.maintenance_lock();
        let merged = self.manager.disk_index().optimize(max_segments.max(1))?;
        if merged {
            self.manager.refresh_disk_reader()?;
        }
        Ok(merged)
    }

    pub fn expunge_deletes(&self) -> Result<usize> {
        let _maintenance = self.manager.maintenance_lock();
        let rewritten = self.manager.disk_index().expunge_deletes()?;
        if rewritten > 0 {
            self.manager.refresh_disk_reader()?;
        }
        Ok(rewritten)
    }

    /// Flush what can be flushed, then discard all indexed data
    pub fn purge_index(&self) -> Result<()> {
        if let Err(e) = self.flush_to_disk_index(PURGE_FLUSH_TIMEOUT) {
            warn!(error = %e, "flush before purge failed");
        }
        self.manager.purge()?;
        self.disk_loader.reset();
        Ok(())
    }

    pub fn refresh_disk_reader(&self) -> Result<()> {
        self.manager.refresh_disk_reader()
    }

    pub fn stats(&self) -> AdminStats {
        let disk = self.manager.disk_index();
        let mem_a = self.manager.mem_a();
        let mem_b = self.manager.mem_b();
        let last_optimized_ms = disk
            .last_optimized()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        AdminStats {
            index_dir: self.index_dir().display().to_string(),
            realtime: self.is_realtime(),
            status: self.status(),
            disk_version: disk.version(),
            disk_index_size: disk.num_docs(),
            disk_size_bytes: disk.size_bytes(),
            disk_segment_count: disk.segment_count(),
            last_disk_modified: disk.last_modified(),
            last_optimized_ms,
            ram_a_version: mem_a.version(),
            ram_a_size: mem_a.num_docs(),
            ram_b_version: mem_b.as_ref().map(|b| b.version()),
            ram_b_size: mem_b.as_ref().map(|b| b.num_docs()),
            batch_size: self.batch_size(),
            max_batch_size: self.max_batch_size(),
            batch_delay_ms: self.batch_delay().as_millis() as u64,
            current_mem_batch_size: self.current_mem_batch_size(),
            current_disk_batch_size: self.current_disk_batch_size(),
            disk_flushes: self.disk_loader.flush_count(),
            dropped_batches: self.dropped_batches(),
            dropped_events: self.dropped_events(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexConfig;
    use crate::indexing::{AsyncConsumer, DataConsumer, IndexPipeline};
    use crate::models::{BoxedIndexable, Document, IndexableDocument, IndexableInterpreter, UpdateEvent};
    use crate::tokenizer::WhitespaceAnalyzer;
    use tempfile::TempDir;

    struct Fixture {
        admin: IndexAdmin,
        consumer: Arc<AsyncConsumer<u64>>,
        disk_loader: Arc<DiskLoader>,
    }

    fn fixture(dir: &Path) -> Fixture {
        let config = IndexConfig::new(dir).with_batch_delay(Duration::from_secs(60));
        let manager = Arc::new(IndexManager::open(&config, Arc::new(WhitespaceAnalyzer)).unwrap());
        let disk_loader = Arc::new(DiskLoader::new(manager.clone(), &config));
        let interpreter: Arc<dyn IndexableInterpreter<u64>> =
            Arc::new(|uid: &u64| -> Result<BoxedIndexable> {
                Ok(IndexableDocument::new(*uid, Document::new().with_text("body", "zoie")).boxed())
            });
        let pipeline: Arc<dyn DataConsumer<u64>> =
            Arc::new(IndexPipeline::new(manager.clone(), interpreter, disk_loader.clone()));
        let consumer = Arc::new(AsyncConsumer::new(pipeline, 100, None));
        disk_loader.start().unwrap();
        consumer.start().unwrap();
        Fixture {
            admin: IndexAdmin::new(manager, disk_loader.clone(), consumer.clone()),
            consumer,
            disk_loader,
        }
    }

    fn feed(consumer: &AsyncConsumer<u64>, uids: std::ops::Range<u64>) {
        consumer
            .consume(uids.map(|uid| UpdateEvent::new(uid, uid)).collect())
            .unwrap();
    }

    #[test]
    fn test_flush_moves_memory_to_disk() {
        let tmp = TempDir::new().unwrap();
        let f = fixture(tmp.path());
        feed(&f.consumer, 0..10);

        f.admin.flush_to_disk_index(Duration::from_secs(10)).unwrap();
        let stats = f.admin.stats();
        assert_eq!(stats.disk_index_size, 10);
        assert_eq!(stats.disk_version, 9);
        assert_eq!(stats.ram_a_size, 0);
        assert_eq!(stats.ram_b_size, None);
        assert_eq!(stats.status, IndexStatus::Sleeping);
        assert_eq!(stats.current_disk_batch_size, 0);
        assert!(stats.disk_flushes >= 1);
        assert_eq!(stats.dropped_batches, 0);
        assert!(stats.last_disk_modified > 0);

        f.consumer.stop();
        f.disk_loader.shutdown();
    }

    #[test]
    fn test_settings_round_trip() {
        let tmp = TempDir::new().unwrap();
        let f = fixture(tmp.path());
        f.admin.set_batch_size(50);
        f.admin.set_max_batch_size(200);
        f.admin.set_batch_delay(Duration::from_millis(500));
        assert_eq!(f.admin.batch_size(), 50);
        assert_eq!(f.admin.max_batch_size(), 200);
        assert_eq!(f.admin.batch_delay(), Duration::from_millis(500));
        assert!(f.admin.is_realtime());
        assert_eq!(f.admin.index_dir(), tmp.path());

        let json = serde_json::to_string(&f.admin.stats()).unwrap();
        assert!(json.contains("\"batch_size\":50"));
        f.consumer.stop();
        f.disk_loader.shutdown();
    }

    #[test]
    fn test_optimize_and_purge() {
        let tmp = TempDir::new().unwrap();
        let f = fixture(tmp.path());
        for round in 0..3u64 {
            feed(&f.consumer, round * 10..round * 10 + 10);
            f.admin.flush_to_disk_index(Duration::from_secs(10)).unwrap();
        }
        assert_eq!(f.admin.disk_index_size(), 30);

        f.admin.optimize(1).unwrap();
        assert_eq!(f.admin.disk_segment_count(), 1);
        assert_eq!(f.admin.disk_index_size(), 30);
        assert_eq!(f.admin.expunge_deletes().unwrap(), 0);

        f.admin.purge_index().unwrap();
        assert_eq!(f.admin.disk_index_size(), 0);
        assert_eq!(f.admin.disk_version(), 0);
        assert_eq!(f.admin.disk_segment_count(), 0);
        f.consumer.stop();
        f.disk_loader.shutdown();
    }
}
