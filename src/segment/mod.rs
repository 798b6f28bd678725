//! Segment building blocks
//!
//! A segment is an append-only `ContentStore` plus a physical delete set.
//! Readers are immutable, reference-counted snapshots of one segment and can
//! be combined into a `CompositeReader` presenting one document-id space.
//!
//! # Architecture
//!
//! - `ContentStore`: stored documents with embedded uids and term postings
//! - `DocIdMapper`: uid -> local ordinal lookup rebuilt per snapshot
//! - `SegmentReader`: snapshot with an optional per-view delete overlay
//! - `CompositeReader`: prefix-sum routing over several readers
//! - `SegmentStore` / `SegmentManifest`: on-disk sub-segments with atomic manifest
//! - `IndexSignature`: `path@version` pointer of a disk index

mod types;
mod content;
mod docid_mapper;
mod reader;
mod composite;
mod manifest;
mod store;
mod signature;
mod merge;

pub use types::*;
pub use content::*;
pub use docid_mapper::*;
pub use reader::*;
pub use composite::*;
pub use manifest::*;
pub use store::*;
pub use signature::*;
pub use merge::*;
