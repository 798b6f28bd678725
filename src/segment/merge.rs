//! Merge planning for disk sub-segments
//!
//! - commits append at most one sub-segment, so counts grow with every flush
//! - past `max_segments` the smallest sub-segments are merged down to
//!   `target_segments`
//! - sub-segments whose delete ratio exceeds the threshold are rewritten
//! - a full optimize can also be scheduled on an interval

use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use super::manifest::ManifestEntry;
use super::types::SegmentId;

/// Configuration for the disk merge policy
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MergePolicyConfig {
    /// Sub-segment count that triggers a merge after a commit
    pub max_segments: usize,
    /// Sub-segment count a triggered merge reduces to
    pub target_segments: usize,
    /// Delete ratio above which a sub-segment is rewritten
    pub delete_ratio_threshold: f64,
    /// Interval after which a scheduled optimize runs regardless of count
    pub optimize_interval: Duration,
}

impl Default for MergePolicyConfig {
    fn default() -> Self {
        Self {
            max_segments: 20,
            target_segments: 15,
            delete_ratio_threshold: 0.15,
            optimize_interval: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Reason why sub-segments should be merged
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeReason {
    /// Too many sub-segments after a commit
    SegmentOverflow,
    /// The optimize interval elapsed
    Scheduled,
    /// High delete ratio
    HighDeleteRatio,
    /// Explicit optimize or expunge request
    Forced,
}

/// A planned merge: all listed sub-segments become one
#[derive(Clone, Debug, PartialEq)]
pub struct MergeCandidate {
    pub segment_ids: Vec<SegmentId>,
    /// Live documents the merged sub-segment will hold
    pub estimated_docs: u64,
    pub reason: MergeReason,
}

impl MergeCandidate {
    fn from_entries(entries: &[&ManifestEntry], reason: MergeReason) -> Self {
        Self {
            segment_ids: entries.iter().map(|e| e.id).collect(),
            estimated_docs: entries.iter().map(|e| e.live_docs() as u64).sum(),
            reason,
        }
    }
}

pub struct MergePolicy {
    config: MergePolicyConfig,
}

impl MergePolicy {
    pub fn new(config: MergePolicyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MergePolicyConfig {
        &self.config
    }

    /// Merge the smallest sub-segments so that at most `max_segments` remain.
    ///
    /// With a single remaining target, a sub-segment holding deletes is still
    /// rewritten so that a full optimize leaves no deleted documents behind.
    pub fn plan_optimize(
        &self,
        entries: &[ManifestEntry],
        max_segments: usize,
        reason: MergeReason,
    ) -> Option<MergeCandidate> {
        let max_segments = max_segments.max(1);
        if entries.len() <= max_segments {
            if max_segments == 1 && entries.len() == 1 && entries[0].num_deleted > 0 {
                return Some(MergeCandidate::from_entries(&[&entries[0]], reason));
            }
            return None;
        }

        let mut by_size: Vec<&ManifestEntry> = entries.iter().collect();
        by_size.sort_by_key(|e| (e.live_docs(), e.id));
        let take = entries.len() - max_segments + 1;
        let mut chosen: Vec<&ManifestEntry> = by_size.into_iter().take(take).collect();
        chosen.sort_by_key(|e| e.id);
        Some(MergeCandidate::from_entries(&chosen, reason))
    }

    /// Sub-segments that should have their deletes expunged.
    ///
    /// `force` selects every sub-segment with at least one delete.
    pub fn plan_expunge(&self, entries: &[ManifestEntry], force: bool) -> Vec<SegmentId> {
        entries
            .iter()
            .filter(|e| {
                e.num_deleted > 0
                    && (force || e.delete_ratio() > self.config.delete_ratio_threshold)
            })
            .map(|e| e.id)
            .collect()
    }

    /// Merge to run after a commit, if any
    pub fn after_commit(
        &self,
        entries: &[ManifestEntry],
        last_optimized: SystemTime,
    ) -> Option<MergeCandidate> {
        if entries.len() > self.config.max_segments {
            return self.plan_optimize(
                entries,
                self.config.target_segments,
                MergeReason::SegmentOverflow,
            );
        }
        let elapsed = SystemTime::now()
            .duration_since(last_optimized)
            .unwrap_or_default();
        if elapsed > self.config.optimize_interval {
            return self.plan_optimize(
                entries,
                self.config.target_segments,
                MergeReason::Scheduled,
            );
        }
        None
    }
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self::new(MergePolicyConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: u64, max_doc: u32, num_deleted: u32) -> ManifestEntry {
        ManifestEntry {
            id: SegmentId::new(id),
            max_doc,
            num_deleted,
            size_bytes: 0,
            checksum: 0,
            del_generation: 0,
            created_at: 0,
        }
    }

    #[test]
    fn test_plan_optimize_picks_smallest() {
        let policy = MergePolicy::default();
        let entries = vec![entry(0, 100, 0), entry(1, 5, 0), entry(2, 50, 0), entry(3, 1, 0)];

        let plan = policy
            .plan_optimize(&entries, 2, MergeReason::Forced)
            .unwrap();
        assert_eq!(plan.segment_ids, vec![SegmentId(1), SegmentId(2), SegmentId(3)]);
        assert_eq!(plan.estimated_docs, 56);
        assert_eq!(plan.reason, MergeReason::Forced);

        assert!(policy.plan_optimize(&entries, 4, MergeReason::Forced).is_none());
    }

    #[test]
    fn test_single_segment_with_deletes_is_rewritten() {
        let policy = MergePolicy::default();
        let clean = vec![entry(0, 10, 0)];
        assert!(policy.plan_optimize(&clean, 1, MergeReason::Forced).is_none());

        let dirty = vec![entry(0, 10, 3)];
        let plan = policy.plan_optimize(&dirty, 0, MergeReason::Forced).unwrap();
        assert_eq!(plan.segment_ids, vec![SegmentId(0)]);
        assert_eq!(plan.estimated_docs, 7);
    }

    #[test]
    fn test_plan_expunge() {
        let policy = MergePolicy::default();
        let entries = vec![entry(0, 100, 50), entry(1, 100, 1), entry(2, 100, 0)];

        assert_eq!(policy.plan_expunge(&entries, false), vec![SegmentId(0)]);
        assert_eq!(
            policy.plan_expunge(&entries, true),
            vec![SegmentId(0), SegmentId(1)]
        );
    }

    #[test]
    fn test_after_commit_triggers() {
        let policy = MergePolicy::new(MergePolicyConfig {
            max_segments: 3,
            target_segments: 2,
            ..Default::default()
        });
        let few = vec![entry(0, 1, 0), entry(1, 1, 0)];
        assert!(policy.after_commit(&few, SystemTime::now()).is_none());

        let many = vec![entry(0, 1, 0), entry(1, 1, 0), entry(2, 1, 0), entry(3, 1, 0)];
        let plan = policy.after_commit(&many, SystemTime::now()).unwrap();
        assert_eq!(plan.reason, MergeReason::SegmentOverflow);
        assert_eq!(plan.segment_ids.len(), 3);

        let long_ago = SystemTime::now() - Duration::from_secs(2 * 24 * 60 * 60);
        let three = vec![entry(0, 1, 0), entry(1, 1, 0), entry(2, 1, 0)];
        let plan = policy.after_commit(&three, long_ago).unwrap();
        assert_eq!(plan.reason, MergeReason::Scheduled);
    }
}
