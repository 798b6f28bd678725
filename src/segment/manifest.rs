//! Manifest of the live sub-segments of a disk index
//!
//! The manifest is the commit point of the disk index: content files and
//! delete generations it does not name are garbage, and a delete generation
//! it names is never overwritten in place.

use std::io;

use serde::{Deserialize, Serialize};

use super::types::SegmentId;

/// Manifest entry for one sub-segment
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub id: SegmentId,
    /// Document slots in the content file
    pub max_doc: u32,
    /// Physically deleted slots as of the last commit
    pub num_deleted: u32,
    /// Size of the content file in bytes
    pub size_bytes: u64,
    /// CRC32 of the content file
    pub checksum: u64,
    /// Bumped each time the delete file is rewritten
    pub del_generation: u64,
    pub created_at: u64,
}

impl ManifestEntry {
    pub fn live_docs(&self) -> u32 {
        self.max_doc.saturating_sub(self.num_deleted)
    }

    pub fn delete_ratio(&self) -> f64 {
        if self.max_doc == 0 {
            0.0
        } else {
            self.num_deleted as f64 / self.max_doc as f64
        }
    }
}

/// Live sub-segments, oldest first
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SegmentManifest {
    /// Manifest format version
    pub format: u32,
    /// Bumped by every `touch`
    pub generation: u64,
    pub next_segment_id: SegmentId,
    pub segments: Vec<ManifestEntry>,
    pub updated_at: u64,
}

impl SegmentManifest {
    /// Current manifest format version
    pub const FORMAT: u32 = 1;

    pub fn new() -> Self {
        Self {
            format: Self::FORMAT,
            generation: 0,
            next_segment_id: SegmentId::new(0),
            segments: Vec::new(),
            updated_at: 0,
        }
    }

    pub fn allocate_segment_id(&mut self) -> SegmentId {
        let id = self.next_segment_id;
        self.next_segment_id = id.next();
        id
    }

    pub fn add_segment(&mut self, entry: ManifestEntry) {
        self.segments.push(entry);
        self.touch();
    }

    /// Remove a sub-segment (after merge)
    pub fn remove_segment(&mut self, id: SegmentId) -> Option<ManifestEntry> {
        let pos = self.segments.iter().position(|e| e.id == id)?;
        self.touch();
        Some(self.segments.remove(pos))
    }

    pub fn entry(&self, id: SegmentId) -> Option<&ManifestEntry> {
        self.segments.iter().find(|e| e.id == id)
    }

    pub fn entry_mut(&mut self, id: SegmentId) -> Option<&mut ManifestEntry> {
        self.segments.iter_mut().find(|e| e.id == id)
    }

    /// Mark the manifest as changed
    pub fn touch(&mut self) {
        self.generation += 1;
        self.updated_at = current_timestamp();
    }

    /// Delete generations in use, keyed by sub-segment
    pub fn del_generations(&self) -> impl Iterator<Item = (SegmentId, u64)> + '_ {
        self.segments
            .iter()
            .filter(|e| e.del_generation > 0)
            .map(|e| (e.id, e.del_generation))
    }

    pub fn total_live_docs(&self) -> u64 {
        self.segments.iter().map(|e| e.live_docs() as u64).sum()
    }

    pub fn total_size_bytes(&self) -> u64 {
        self.segments.iter().map(|e| e.size_bytes).sum()
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.segments.iter()
    }

    pub fn to_json(&self) -> io::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    pub fn from_json(data: &[u8]) -> io::Result<Self> {
        serde_json::from_slice(data).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

impl Default for SegmentManifest {
    fn default() -> Self {
        Self::new()
    }
}

/// Current Unix timestamp in seconds
pub fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
