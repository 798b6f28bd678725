use std::collections::HashSet;
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::IndexConfig;
use crate::error::Result;
use crate::index::{DiskSearchIndex, RamSearchIndex, SearchIndex};
use crate::segment::{MergePolicyConfig, SegmentReader, Uid, Version};
use crate::tokenizer::SharedAnalyzer;

/// State of the disk indexer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexStatus {
    /// Memory segment A takes writes, nothing is being merged
    Sleeping,
    /// A is frozen and being merged into disk, B takes writes
    Working,
}

impl fmt::Display for IndexStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexStatus::Sleeping => write!(f, "sleeping"),
            IndexStatus::Working => write!(f, "working"),
        }
    }
}

struct Slots {
    mem_a: Arc<RamSearchIndex>,
    mem_b: Option<Arc<RamSearchIndex>>,
    disk: Arc<DiskSearchIndex>,
    disk_readers: Vec<SegmentReader>,
    status: IndexStatus,
}

/// Owns the memory and disk segments and hands out consistent reader views.
///
/// The slot lock only guards pointer swaps. Segment opens, merges and
/// mapper rebuilds always happen before it is taken.
pub struct IndexManager {
    home: PathBuf,
    analyzer: SharedAnalyzer,
    merge: MergePolicyConfig,
    realtime: bool,
    slots: RwLock<Slots>,
    /// Held by the memory loader while applying a batch and by the disk
    /// loader while it freezes segment A
    handoff: Mutex<()>,
    /// Serializes disk flushes with purge and snapshot import
    maintenance: Mutex<()>,
    mem_ids: AtomicU64,
}

impl IndexManager {
    pub fn open(config: &IndexConfig, analyzer: SharedAnalyzer) -> Result<Self> {
        let disk = Arc::new(DiskSearchIndex::open(
            &config.index_dir,
            analyzer.clone(),
            config.merge.clone(),
        )?);
        let disk_readers = disk.open_readers()?;
        let mem_ids = AtomicU64::new(0);
        let mem_a = Arc::new(RamSearchIndex::new(
            mem_name(&mem_ids),
            disk.version(),
            analyzer.clone(),
        ));
        info!(
            home = %config.index_dir.display(),
            realtime = config.realtime,
            version = disk.version(),
            "index manager ready"
        );

        Ok(Self {
            home: config.index_dir.clone(),
            analyzer,
            merge: config.merge.clone(),
            realtime: config.realtime,
            slots: RwLock::new(Slots {
                mem_a,
                mem_b: None,
                disk,
                disk_readers,
                status: IndexStatus::Sleeping,
            }),
            handoff: Mutex::new(()),
            maintenance: Mutex::new(()),
            mem_ids,
        })
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn is_realtime(&self) -> bool {
        self.realtime
    }

    pub fn analyzer(&self) -> &SharedAnalyzer {
        &self.analyzer
    }

    pub fn handoff_lock(&self) -> MutexGuard<'_, ()> {
        self.handoff.lock()
    }

    pub fn maintenance_lock(&self) -> MutexGuard<'_, ()> {
        self.maintenance.lock()
    }

    pub fn status(&self) -> IndexStatus {
        self.slots.read().status
    }

    pub fn disk_index(&self) -> Arc<DiskSearchIndex> {
        self.slots.read().disk.clone()
    }

    pub fn mem_a(&self) -> Arc<RamSearchIndex> {
        self.slots.read().mem_a.clone()
    }

    pub fn mem_b(&self) -> Option<Arc<RamSearchIndex>> {
        self.slots.read().mem_b.clone()
    }

    /// The memory segment new writes go to: B while working, A otherwise
    pub fn current_writable_mem(&self) -> Arc<RamSearchIndex> {
        let slots = self.slots.read();
        match &slots.mem_b {
            Some(b) => b.clone(),
            None => slots.mem_a.clone(),
        }
    }

    /// Disk readers currently published to queries
    pub fn disk_readers(&self) -> Vec<SegmentReader> {
        self.slots.read().disk_readers.clone()
    }

    /// Move between sleeping and working.
    ///
    /// Entering `Working` freezes A and opens an empty B. Returning to
    /// `Sleeping` expects A to have been merged into disk: disk readers are
    /// refreshed first, then B replaces A. A failed refresh leaves the
    /// manager working with its previous readers.
    pub fn set_status(&self, status: IndexStatus) -> Result<()> {
        if self.status() == status {
            return Ok(());
        }
        match status {
            IndexStatus::Working => {
                let mut slots = self.slots.write();
                if slots.status == IndexStatus::Working {
                    return Ok(());
                }
                let mem_b = RamSearchIndex::new(
                    mem_name(&self.mem_ids),
                    slots.mem_a.version(),
                    self.analyzer.clone(),
                );
                debug!(frozen = slots.mem_a.name(), writable = mem_b.name(), "memory segment frozen");
                slots.mem_b = Some(Arc::new(mem_b));
                slots.status = IndexStatus::Working;
            }
            IndexStatus::Sleeping => {
                let disk = self.disk_index();
                let disk_readers = disk.open_readers()?;

                let mut slots = self.slots.write();
                if slots.status == IndexStatus::Sleeping {
                    return Ok(());
                }
                let next = match slots.mem_b.take() {
                    Some(b) => b,
                    None => Arc::new(RamSearchIndex::new(
                        mem_name(&self.mem_ids),
                        disk.version(),
                        self.analyzer.clone(),
                    )),
                };
                debug!(retired = slots.mem_a.name(), current = next.name(), "memory segments rotated");
                slots.mem_a = next;
                slots.disk_readers = disk_readers;
                slots.status = IndexStatus::Sleeping;
            }
        }
        Ok(())
    }

    /// Readers over B, A and disk, newest first.
    ///
    /// Each reader carries an overlay of the uids that newer segments
    /// deleted or replaced, so every uid resolves to at most one live document.
    pub fn acquire_readers(&self) -> Vec<SegmentReader> {
        let slots = self.slots.read();
        let mut readers = Vec::with_capacity(slots.disk_readers.len() + 2);
        let mut superseded: HashSet<Uid> = HashSet::new();

        if let Some(mem_b) = &slots.mem_b {
            let reader = mem_b.open_reader();
            superseded.extend(reader.modified_uids().iter().copied());
            readers.push(reader);
        }

        let mem_a = slots.mem_a.open_reader();
        readers.push(mem_a.with_overlay(Arc::new(superseded.clone())));
        superseded.extend(mem_a.modified_uids().iter().copied());

        let overlay = Arc::new(superseded);
        readers.extend(
            slots
                .disk_readers
                .iter()
                .map(|reader| reader.with_overlay(overlay.clone())),
        );
        readers
    }

    /// Hand readers back; the last holder of a snapshot releases it
    pub fn release_readers(&self, readers: Vec<SegmentReader>) {
        drop(readers);
    }

    /// Reopen the disk readers and publish them
    pub fn refresh_disk_reader(&self) -> Result<()> {
        let disk = self.disk_index();
        let readers = disk.open_readers()?;
        self.slots.write().disk_readers = readers;
        Ok(())
    }

    /// Discard all indexed data and restart from version 0.
    ///
    /// Readers handed out before the purge keep serving their old content.
    pub fn purge(&self) -> Result<()> {
        let _maintenance = self.maintenance.lock();
        let _handoff = self.handoff.lock();

        DiskSearchIndex::purge(&self.home)?;
        self.reopen_disk()?;
        info!(home = %self.home.display(), "index purged");
        Ok(())
    }

    /// Replace all data with a snapshot written by `DiskSearchIndex::export_snapshot`
    pub fn import_snapshot<R: Read>(&self, input: R) -> Result<Version> {
        let _maintenance = self.maintenance.lock();
        let _handoff = self.handoff.lock();

        DiskSearchIndex::purge(&self.home)?;
        let version = DiskSearchIndex::import_snapshot(&self.home, input)?;
        self.reopen_disk()?;
        Ok(version)
    }

    fn reopen_disk(&self) -> Result<()> {
        let disk = Arc::new(DiskSearchIndex::open(
            &self.home,
            self.analyzer.clone(),
            self.merge.clone(),
        )?);
        let disk_readers = disk.open_readers()?;
        let mem_a = Arc::new(RamSearchIndex::new(
            mem_name(&self.mem_ids),
            disk.version(),
            self.analyzer.clone(),
        ));

        let mut slots = self.slots.write();
        slots.disk = disk;
        slots.disk_readers = disk_readers;
        slots.mem_a = mem_a;
        slots.mem_b = None;
        slots.status = IndexStatus::Sleeping;
        Ok(())
    }
}

impl fmt::Debug for IndexManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexManager")
            .field("home", &self.home)
            .field("realtime", &self.realtime)
            .field("status", &self.status())
            .finish()
    }
}

fn mem_name(ids: &AtomicU64) -> String {
    format!("mem-{}", ids.fetch_add(1, Ordering::Relaxed))
}
