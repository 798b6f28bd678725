//! Core types shared by segments, readers and the index manager

use serde::{Deserialize, Serialize};
use std::fmt;

/// Caller-assigned logical identity of a document
pub type Uid = u64;

/// Marks "no document" in dense uid arrays
pub const DELETED_UID: Uid = u64::MAX;

/// Reserved stored field carrying the 8-byte little-endian uid of a document
pub const UID_FIELD: &str = "_uid";

/// Monotonic sequence number of the update stream
pub type Version = u64;

/// Sub-segment identifier (monotonically increasing per disk index)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SegmentId(pub u64);

impl SegmentId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seg_{}", self.0)
    }
}

/// Dense local document ordinal within one segment (0..max_doc)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocNo(pub u32);

impl DocNo {
    pub fn new(n: u32) -> Self {
        Self(n)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// Encode a uid the way it is embedded in stored documents
pub fn encode_uid(uid: Uid) -> Vec<u8> {
    uid.to_le_bytes().to_vec()
}

/// Decode an embedded uid, `None` if the payload is not 8 bytes
pub fn decode_uid(bytes: &[u8]) -> Option<Uid> {
    let raw: [u8; 8] = bytes.try_into().ok()?;
    Some(u64::from_le_bytes(raw))
}
