//! Write path: batching, memory staging and disk migration
//!
//! Events enter through an `AsyncConsumer`, are interpreted once by the
//! `IndexPipeline`, land in the writable memory segment and are later moved
//! to disk by the `DiskLoader`. The `IndexManager` owns every segment and
//! hands out reader snapshots.

mod manager;
mod loader;
mod disk_loader;
mod consumer;
mod pipeline;

pub use manager::{IndexManager, IndexStatus};
pub use loader::{load_into, BatchLoader, LoadStats, LoadTarget};
pub use disk_loader::DiskLoader;
pub use consumer::{AsyncConsumer, ConsumerControl, DataConsumer};
pub use pipeline::IndexPipeline;
