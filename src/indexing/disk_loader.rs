use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{error, info, warn};

use super::loader::load_into;
use super::manager::{IndexManager, IndexStatus};
use crate::config::{IndexConfig, MAX_BATCH_SIZE};
use crate::error::{Result, RtIndexError};
use crate::index::SearchIndex;
use crate::models::{BoxedIndexable, UpdateEvent};

/// Bounded wait used by blocked producers before rechecking the loader thread
const CAPACITY_POLL: Duration = Duration::from_secs(1);

struct LoaderState {
    /// Queued events, only used when the index is not realtime
    pending: Vec<UpdateEvent<BoxedIndexable>>,
    /// Events accepted but not yet on disk
    count: usize,
    flush_requested: bool,
    stop: bool,
    last_flush: Instant,
}

struct LoaderShared {
    manager: Arc<IndexManager>,
    state: Mutex<LoaderState>,
    /// Wakes the loader thread
    work_cv: Condvar,
    /// Wakes producers and flush waiters after each flush attempt
    done_cv: Condvar,
    batch_size: AtomicUsize,
    max_batch_size: AtomicUsize,
    batch_delay_ms: AtomicU64,
    alive: AtomicBool,
    flushes: AtomicU64,
}

/// Clears the liveness flag however the loader thread exits
struct AliveGuard(Arc<LoaderShared>);

impl Drop for AliveGuard {
    fn drop(&mut self) {
        self.0.alive.store(false, Ordering::SeqCst);
        let _state = self.0.state.lock();
        self.0.done_cv.notify_all();
    }
}

/// Background thread moving accepted events onto the disk index.
///
/// In realtime mode events already live in memory segment A and only their
/// count is tracked here; a flush freezes A, merges it into disk and rotates.
/// Otherwise events are queued here and applied to disk directly.
pub struct DiskLoader {
    shared: Arc<LoaderShared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DiskLoader {
    pub fn new(manager: Arc<IndexManager>, config: &IndexConfig) -> Self {
        let batch_size = config.batch_size.clamp(1, MAX_BATCH_SIZE);
        let max_batch_size = config.max_batch_size.clamp(batch_size, MAX_BATCH_SIZE);
        Self {
            shared: Arc::new(LoaderShared {
                manager,
                state: Mutex::new(LoaderState {
                    pending: Vec::new(),
                    count: 0,
                    flush_requested: false,
                    stop: false,
                    last_flush: Instant::now(),
                }),
                work_cv: Condvar::new(),
                done_cv: Condvar::new(),
                batch_size: AtomicUsize::new(batch_size),
                max_batch_size: AtomicUsize::new(max_batch_size),
                batch_delay_ms: AtomicU64::new(config.batch_delay.as_millis() as u64),
                alive: AtomicBool::new(false),
                flushes: AtomicU64::new(0),
            }),
            handle: Mutex::new(None),
        }
    }

    /// Spawn the loader thread; a no-op if it is already running
    pub fn start(&self) -> Result<()> {
        let mut handle = self.handle.lock();
        if handle.is_some() && self.is_alive() {
            return Ok(());
        }
        {
            let mut state = self.shared.state.lock();
            state.stop = false;
            state.last_flush = Instant::now();
        }
        self.shared.alive.store(true, Ordering::SeqCst);
        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name("rtindex-disk-loader".to_string())
            .spawn(move || run(shared));
        match spawned {
            Ok(join) => {
                *handle = Some(join);
                info!(
                    batch_size = self.batch_size(),
                    delay_ms = self.batch_delay().as_millis() as u64,
                    "disk loader started"
                );
                Ok(())
            }
            Err(e) => {
                self.shared.alive.store(false, Ordering::SeqCst);
                Err(e.into())
            }
        }
    }

    /// Stop the loader thread after one last flush attempt
    pub fn shutdown(&self) {
        let join = self.handle.lock().take();
        {
            let mut state = self.shared.state.lock();
            state.stop = true;
            self.shared.work_cv.notify_all();
        }
        if let Some(join) = join {
            if join.join().is_err() {
                error!("disk loader thread panicked");
            }
            info!("disk loader stopped");
        }
    }

    pub fn is_alive(&self) -> bool {
        self.shared.alive.load(Ordering::SeqCst)
    }

    /// Queue interpreted events for a direct disk update
    pub fn consume(&self, events: Vec<UpdateEvent<BoxedIndexable>>) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        let mut state = self.shared.state.lock();
        self.wait_for_capacity_locked(&mut state)?;
        state.count += events.len();
        state.pending.extend(events);
        self.shared.work_cv.notify_all();
        Ok(())
    }

    /// Record `count` events that were written to the memory segment
    pub fn add_count(&self, count: usize) {
        if count == 0 {
            return;
        }
        let mut state = self.shared.state.lock();
        state.count += count;
        self.shared.work_cv.notify_all();
    }

    /// Block while the backlog is at `max_batch_size`
    pub fn wait_for_capacity(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        self.wait_for_capacity_locked(&mut state)
    }

    fn wait_for_capacity_locked(&self, state: &mut MutexGuard<'_, LoaderState>) -> Result<()> {
        while state.count >= self.max_batch_size() {
            if !self.is_alive() {
                return Err(RtIndexError::BackendUnavailable(
                    "disk loader is not running".to_string(),
                ));
            }
            self.shared.work_cv.notify_all();
            self.shared.done_cv.wait_for(state, CAPACITY_POLL);
        }
        Ok(())
    }

    /// Request an immediate flush and wait until nothing is pending
    pub fn flush_events(&self, timeout: Duration) -> Result<()> {
        let started = Instant::now();
        let deadline = started + timeout;
        let mut state = self.shared.state.lock();
        while state.count > 0 {
            if !self.is_alive() {
                return Err(RtIndexError::BackendUnavailable(
                    "disk loader is not running".to_string(),
                ));
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(RtIndexError::Timeout {
                    what: format!("{} pending events to reach disk", state.count),
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
            state.flush_requested = true;
            self.shared.work_cv.notify_all();
            self.shared.done_cv.wait_for(&mut state, deadline - now);
        }
        Ok(())
    }

    /// Drop the backlog, used after the index was purged
    pub fn reset(&self) {
        let mut state = self.shared.state.lock();
        state.pending.clear();
        state.count = 0;
        self.shared.done_cv.notify_all();
    }

    /// Events accepted but not yet flushed
    pub fn pending_count(&self) -> usize {
        self.shared.state.lock().count
    }

    /// Successful flushes since creation
    pub fn flush_count(&self) -> u64 {
        self.shared.flushes.load(Ordering::SeqCst)
    }

    pub fn batch_size(&self) -> usize {
        self.shared.batch_size.load(Ordering::SeqCst)
    }

    /// Set the flush threshold, raising the backlog cap if needed
    pub fn set_batch_size(&self, batch_size: usize) {
        let batch_size = batch_size.clamp(1, MAX_BATCH_SIZE);
        self.shared.batch_size.store(batch_size, Ordering::SeqCst);
        self.shared
            .max_batch_size
            .fetch_max(batch_size, Ordering::SeqCst);
        self.wake();
    }

    pub fn max_batch_size(&self) -> usize {
        self.shared.max_batch_size.load(Ordering::SeqCst)
    }

    /// Set the backlog cap; kept between the batch size and `MAX_BATCH_SIZE`
    pub fn set_max_batch_size(&self, max_batch_size: usize) {
        let max_batch_size = max_batch_size.clamp(self.batch_size(), MAX_BATCH_SIZE);
        self.shared
            .max_batch_size
            .store(max_batch_size, Ordering::SeqCst);
        self.wake();
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.shared.batch_delay_ms.load(Ordering::SeqCst))
    }

    pub fn set_batch_delay(&self, delay: Duration) {
        self.shared
            .batch_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
        self.wake();
    }

    fn wake(&self) {
        let _state = self.shared.state.lock();
        self.shared.work_cv.notify_all();
        self.shared.done_cv.notify_all();
    }
}

impl Drop for DiskLoader {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(shared: Arc<LoaderShared>) {
    let _alive = AliveGuard(shared.clone());
    loop {
        let stopping = {
            let mut state = shared.state.lock();
            loop {
                if state.stop {
                    break;
                }
                let batch_size = shared.batch_size.load(Ordering::SeqCst);
                let delay = Duration::from_millis(shared.batch_delay_ms.load(Ordering::SeqCst));
                if state.count >= batch_size || state.flush_requested {
                    break;
                }
                let since = state.last_flush.elapsed();
                if state.count > 0 && since >= delay {
                    break;
                }
                let wait = if state.count > 0 { delay - since } else { delay };
                shared
                    .work_cv
                    .wait_for(&mut state, wait.max(Duration::from_millis(1)));
            }
            state.flush_requested = false;
            if state.count == 0 {
                state.last_flush = Instant::now();
            }
            state.stop
        };

        let failed = match shared.flush() {
            Ok(_) => false,
            Err(e) => {
                error!(error = %e, "disk flush failed, will retry");
                true
            }
        };

        let mut state = shared.state.lock();
        shared.done_cv.notify_all();
        if stopping {
            break;
        }
        if failed && !state.stop {
            let delay = Duration::from_millis(shared.batch_delay_ms.load(Ordering::SeqCst));
            shared
                .work_cv
                .wait_for(&mut state, delay.max(Duration::from_millis(10)));
        }
    }
}

impl LoaderShared {
    /// Move everything pending onto disk; returns the number of events flushed
    fn flush(&self) -> Result<usize> {
        let _maintenance = self.manager.maintenance_lock();
        if self.manager.is_realtime() {
            self.flush_memory()
        } else {
            self.flush_queued()
        }
    }

    fn flush_memory(&self) -> Result<usize> {
        let frozen = {
            let _handoff = self.manager.handoff_lock();
            let state = self.state.lock();
            if state.count == 0 && self.manager.status() == IndexStatus::Sleeping {
                return Ok(0);
            }
            drop(state);
            self.manager.set_status(IndexStatus::Working)?;
            self.manager.mem_a()
        };

        let started = Instant::now();
        let flushed = frozen.event_count() as usize;
        let disk = self.manager.disk_index();
        disk.load_from_index(&frozen)?;
        self.manager.set_status(IndexStatus::Sleeping)?;
        disk.increment_event_count(flushed as u64);

        {
            let mut state = self.state.lock();
            state.count = state.count.saturating_sub(flushed);
            state.last_flush = Instant::now();
        }
        self.flushes.fetch_add(1, Ordering::SeqCst);
        info!(
            events = flushed,
            version = disk.version(),
            docs = disk.num_docs(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "flushed batch of {} events",
            flushed
        );
        Ok(flushed)
    }

    fn flush_queued(&self) -> Result<usize> {
        let events = {
            let mut state = self.state.lock();
            mem::take(&mut state.pending)
        };
        if events.is_empty() {
            return Ok(0);
        }

        let started = Instant::now();
        let disk = self.manager.disk_index();
        let applied = load_into(disk.as_ref(), &events).and_then(|_| self.manager.refresh_disk_reader());
        if let Err(e) = applied {
            let mut state = self.state.lock();
            let newer = mem::replace(&mut state.pending, events);
            state.pending.extend(newer);
            warn!(events = state.pending.len(), "requeued events after failed flush");
            return Err(e);
        }

        let flushed = events.len();
        {
            let mut state = self.state.lock();
            state.count = state.count.saturating_sub(flushed);
            state.last_flush = Instant::now();
        }
        self.flushes.fetch_add(1, Ordering::SeqCst);
        info!(
            events = flushed,
            version = disk.version(),
            docs = disk.num_docs(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "flushed batch of {} events",
            flushed
        );
        Ok(flushed)
    }
}
