use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{error, info};

use crate::error::{Result, RtIndexError};
use crate::models::{max_version, UpdateEvent};
use crate::segment::Version;

/// Bounded wait used by blocked producers before rechecking the worker
const BACKPRESSURE_POLL: Duration = Duration::from_secs(1);

/// Receives batches of events
pub trait DataConsumer<V>: Send + Sync {
    fn consume(&self, events: Vec<UpdateEvent<V>>) -> Result<()>;
}

impl<V, F> DataConsumer<V> for F
where
    F: Fn(Vec<UpdateEvent<V>>) -> Result<()> + Send + Sync,
{
    fn consume(&self, events: Vec<UpdateEvent<V>>) -> Result<()> {
        self(events)
    }
}

struct ConsumerState<V> {
    pending: Vec<UpdateEvent<V>>,
    /// Highest version handed to `consume`
    buffered_version: Option<Version>,
    /// Highest version delivered downstream
    current_version: Option<Version>,
    running: bool,
    stop: bool,
    /// The worker died by panicking
    crashed: bool,
}

struct ConsumerShared<V> {
    downstream: Arc<dyn DataConsumer<V>>,
    batch_size: usize,
    state: Mutex<ConsumerState<V>>,
    /// Wakes the worker
    work_cv: Condvar,
    /// Wakes producers and version waiters
    progress_cv: Condvar,
    dropped_batches: AtomicU64,
    dropped_events: AtomicU64,
}

struct RunningGuard<V>(Arc<ConsumerShared<V>>);

impl<V> Drop for RunningGuard<V> {
    fn drop(&mut self) {
        let mut state = self.0.state.lock();
        state.running = false;
        state.crashed = thread::panicking();
        self.0.progress_cv.notify_all();
    }
}

/// Coalesces incoming events and delivers them downstream on a worker thread.
///
/// `consume` blocks while `batch_size` events are already buffered.
/// Waiters in `sync_to_version` are woken after every delivered batch.
pub struct AsyncConsumer<V> {
    shared: Arc<ConsumerShared<V>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<V: Send + 'static> AsyncConsumer<V> {
    /// `initial_version` is the version already reflected downstream, if any
    pub fn new(
        downstream: Arc<dyn DataConsumer<V>>,
        batch_size: usize,
        initial_version: Option<Version>,
    ) -> Self {
        Self {
            shared: Arc::new(ConsumerShared {
                downstream,
                batch_size: batch_size.max(1),
                state: Mutex::new(ConsumerState {
                    pending: Vec::new(),
                    buffered_version: initial_version,
                    current_version: initial_version,
                    running: false,
                    stop: false,
                    crashed: false,
                }),
                work_cv: Condvar::new(),
                progress_cv: Condvar::new(),
                dropped_batches: AtomicU64::new(0),
                dropped_events: AtomicU64::new(0),
            }),
            handle: Mutex::new(None),
        }
    }

    /// Spawn the worker; a no-op if it is already running
    pub fn start(&self) -> Result<()> {
        let mut handle = self.handle.lock();
        {
            let mut state = self.shared.state.lock();
            if state.running {
                return Ok(());
            }
            state.running = true;
            state.stop = false;
            state.crashed = false;
        }
        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name("rtindex-consumer".to_string())
            .spawn(move || run(shared));
        match spawned {
            Ok(join) => {
                *handle = Some(join);
                info!(batch_size = self.shared.batch_size, "consumer started");
                Ok(())
            }
            Err(e) => {
                self.shared.state.lock().running = false;
                Err(e.into())
            }
        }
    }

    /// Deliver what is buffered, then stop the worker
    pub fn stop(&self) {
        let join = self.handle.lock().take();
        {
            let mut state = self.shared.state.lock();
            state.stop = true;
            self.shared.work_cv.notify_all();
        }
        if let Some(join) = join {
            if join.join().is_err() {
                error!("consumer thread panicked");
            }
            info!("consumer stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.lock().running
    }

    /// Buffer events for delivery, blocking while the buffer is full
    pub fn consume(&self, events: Vec<UpdateEvent<V>>) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        let mut state = self.shared.state.lock();
        loop {
            if state.crashed {
                return Err(RtIndexError::BackendUnavailable(
                    "consumer worker died".to_string(),
                ));
            }
            if !state.running || state.stop {
                return Err(RtIndexError::NotRunning);
            }
            if state.pending.len() < self.shared.batch_size {
                break;
            }
            self.shared.work_cv.notify_all();
            self.shared
                .progress_cv
                .wait_for(&mut state, BACKPRESSURE_POLL);
        }

        if let Some(version) = max_version(&events) {
            state.buffered_version = Some(state.buffered_version.map_or(version, |v| v.max(version)));
        }
        state.pending.extend(events);
        self.shared.work_cv.notify_all();
        Ok(())
    }

    /// Block until everything up to `version` was delivered downstream
    pub fn sync_to_version(&self, timeout: Duration, version: Version) -> Result<()> {
        let started = Instant::now();
        let deadline = started + timeout;
        let mut state = self.shared.state.lock();
        loop {
            if state.current_version.map_or(false, |v| v >= version) {
                return Ok(());
            }
            if !state.running {
                return Err(RtIndexError::NotRunning);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(RtIndexError::Timeout {
                    what: format!("version {}", version),
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
            self.shared.progress_cv.wait_for(&mut state, deadline - now);
        }
    }

    /// Wait until every event buffered so far was delivered
    pub fn flush(&self, timeout: Duration) -> Result<()> {
        let target = self.shared.state.lock().buffered_version;
        match target {
            Some(version) => self.sync_to_version(timeout, version),
            None => Ok(()),
        }
    }

    pub fn current_version(&self) -> Option<Version> {
        self.shared.state.lock().current_version
    }

    pub fn buffered_version(&self) -> Option<Version> {
        self.shared.state.lock().buffered_version
    }

    pub fn pending_len(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    pub fn batch_size(&self) -> usize {
        self.shared.batch_size
    }

    /// Batches the downstream rejected; their versions still count as delivered
    pub fn dropped_batches(&self) -> u64 {
        self.shared.dropped_batches.load(Ordering::SeqCst)
    }

    pub fn dropped_events(&self) -> u64 {
        self.shared.dropped_events.load(Ordering::SeqCst)
    }
}

/// Type-erased control surface of an `AsyncConsumer`
pub trait ConsumerControl: Send + Sync {
    fn flush(&self, timeout: Duration) -> Result<()>;

    fn pending_len(&self) -> usize;

    fn current_version(&self) -> Option<Version>;

    fn dropped_batches(&self) -> u64;

    fn dropped_events(&self) -> u64;
}

impl<V: Send + 'static> ConsumerControl for AsyncConsumer<V> {
    fn flush(&self, timeout: Duration) -> Result<()> {
        AsyncConsumer::flush(self, timeout)
    }

    fn pending_len(&self) -> usize {
        AsyncConsumer::pending_len(self)
    }

    fn current_version(&self) -> Option<Version> {
        AsyncConsumer::current_version(self)
    }

    fn dropped_batches(&self) -> u64 {
        AsyncConsumer::dropped_batches(self)
    }

    fn dropped_events(&self) -> u64 {
        AsyncConsumer::dropped_events(self)
    }
}

impl<V> Drop for AsyncConsumer<V> {
    fn drop(&mut self) {
        let join = self.handle.get_mut().take();
        {
            let mut state = self.shared.state.lock();
            state.stop = true;
            self.shared.work_cv.notify_all();
        }
        if let Some(join) = join {
            let _ = join.join();
        }
    }
}

fn run<V>(shared: Arc<ConsumerShared<V>>) {
    let _running = RunningGuard(shared.clone());
    loop {
        let batch = {
            let mut state = shared.state.lock();
            while state.pending.is_empty() && !state.stop {
                shared.work_cv.wait(&mut state);
            }
            if state.pending.is_empty() {
                break;
            }
            let batch = mem::take(&mut state.pending);
            shared.progress_cv.notify_all();
            batch
        };

        let delivered = max_version(&batch);
        let size = batch.len();
        if let Err(e) = shared.downstream.consume(batch) {
            shared.dropped_batches.fetch_add(1, Ordering::SeqCst);
            shared.dropped_events.fetch_add(size as u64, Ordering::SeqCst);
            error!(events = size, error = %e, "downstream consumer failed, batch dropped");
        }

        let mut state = shared.state.lock();
        if let Some(version) = delivered {
            state.current_version = Some(state.current_version.map_or(version, |v| v.max(version)));
        }
        shared.progress_cv.notify_all();
    }
}
