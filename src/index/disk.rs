use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::{IndexDoc, PendingWrite, SearchIndex};
use crate::error::{Result, RtIndexError};
use crate::segment::{
    current_timestamp, with_io_retries, ContentStore, IndexSignature, ManifestEntry, MergeCandidate,
    MergePolicy, MergePolicyConfig, MergeReason, OpenReaderCounter, SegmentId, SegmentManifest,
    SegmentReader, SegmentStore, Uid, Version, DEFAULT_INDEX_PATH,
};
use crate::tokenizer::SharedAnalyzer;

use super::RamSearchIndex;

const SNAPSHOT_FORMAT: u32 = 1;

/// Portable copy of a committed disk index
#[derive(Serialize, Deserialize)]
struct SnapshotArchive {
    format: u32,
    signature: String,
    manifest: Vec<u8>,
    files: Vec<(String, Vec<u8>)>,
}

struct DiskState {
    store: SegmentStore,
    index_path: String,
    manifest: SegmentManifest,
    /// Open sub-segment readers, reused while their delete generation is unchanged
    readers: HashMap<SegmentId, SegmentReader>,
    writer: Option<PendingWrite<SegmentId>>,
    last_optimized: SystemTime,
}

/// Persistent index made of immutable sub-segments.
///
/// A commit writes at most one new content file plus new delete
/// generations for touched sub-segments, then swaps the manifest. The
/// signature carrying the version is rewritten only after that.
pub struct DiskSearchIndex {
    home: PathBuf,
    analyzer: SharedAnalyzer,
    policy: MergePolicy,
    version: AtomicU64,
    event_count: AtomicU64,
    state: Mutex<DiskState>,
    open_readers: OpenReaderCounter,
    writer_opens: AtomicU64,
}

impl DiskSearchIndex {
    /// Open the index rooted at `home`, creating it if needed.
    ///
    /// A home without a signature starts at version 0.
    pub fn open(home: impl AsRef<Path>, analyzer: SharedAnalyzer, merge: MergePolicyConfig) -> Result<Self> {
        let home = home.as_ref().to_path_buf();
        fs::create_dir_all(&home)?;

        let signature = match IndexSignature::load(&home)? {
            Some(signature) => signature,
            None => {
                info!(home = %home.display(), "no index signature, starting at version 0");
                IndexSignature::new(DEFAULT_INDEX_PATH, 0)
            }
        };
        let store = SegmentStore::open(home.join(&signature.path))?;
        let manifest = with_io_retries("load manifest", || store.load_manifest())?;
        info!(
            home = %home.display(),
            version = signature.version,
            segments = manifest.segment_count(),
            docs = manifest.total_live_docs(),
            "opened disk index"
        );

        Ok(Self {
            home,
            analyzer,
            policy: MergePolicy::new(merge),
            version: AtomicU64::new(signature.version),
            event_count: AtomicU64::new(0),
            state: Mutex::new(DiskState {
                store,
                index_path: signature.path,
                manifest,
                readers: HashMap::new(),
                writer: None,
                last_optimized: SystemTime::now(),
            }),
            open_readers: OpenReaderCounter::new(),
            writer_opens: AtomicU64::new(0),
        })
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Open the pending writer; returns false if one is already open
    pub fn open_writer(&self) -> bool {
        let mut state = self.state.lock();
        self.open_writer_locked(&mut state)
    }

    fn open_writer_locked(&self, state: &mut DiskState) -> bool {
        if state.writer.is_some() {
            return false;
        }
        state.writer = Some(PendingWrite::new());
        self.writer_opens.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// How many times a writer was actually created
    pub fn writer_opens(&self) -> u64 {
        self.writer_opens.load(Ordering::Relaxed)
    }

    /// Readers over every committed sub-segment, oldest first.
    ///
    /// Unchanged sub-segments keep their reader; files are opened with
    /// bounded retries.
    pub fn open_readers(&self) -> Result<Vec<SegmentReader>> {
        let mut state = self.state.lock();
        self.refresh_readers_locked(&mut state)
    }

    fn refresh_readers_locked(&self, state: &mut DiskState) -> Result<Vec<SegmentReader>> {
        let mut readers = Vec::with_capacity(state.manifest.segment_count());
        let mut fresh = HashMap::with_capacity(state.manifest.segment_count());
        for entry in state.manifest.iter() {
            let reader = match state.readers.get(&entry.id) {
                Some(reader) if reader.generation() == entry.del_generation => reader.clone(),
                _ => {
                    let content =
                        with_io_retries("open segment content", || state.store.read_content(entry))?;
                    let deleted = with_io_retries("open segment deletes", || {
                        state.store.read_deletes(entry.id, entry.del_generation)
                    })?;
                    SegmentReader::open_tracked(
                        format!("disk/{}", entry.id),
                        entry.del_generation,
                        content,
                        deleted,
                        Arc::new(HashSet::new()),
                        &self.open_readers,
                    )
                }
            };
            fresh.insert(entry.id, reader.clone());
            readers.push(reader);
        }
        state.readers = fresh;
        Ok(readers)
    }

    /// Reader snapshots still held anywhere, including the reuse cache
    pub fn open_reader_count(&self) -> usize {
        self.open_readers.open()
    }

    /// Commit the pending writer, then run any merge the policy asks for
    pub fn commit(&self) -> Result<bool> {
        let mut state = self.state.lock();
        self.commit_and_merge_locked(&mut state)
    }

    /// Fold a memory segment into this index.
    ///
    /// Every uid the segment deleted or replaced is removed from disk, then
    /// its live documents are appended. Running it twice for the same
    /// segment leaves the same result, so failed attempts can be retried.
    pub fn load_from_index(&self, ram: &RamSearchIndex) -> Result<()> {
        let reader = ram.open_reader();
        {
            let mut state = self.state.lock();
            let staged = self.stage_locked(&mut state, reader.modified_uids(), |writer| {
                writer
                    .segments
                    .push((reader.content().clone(), reader.deleted_docs().clone()));
            });
            if let Err(e) = staged {
                state.writer = None;
                return Err(e);
            }
            self.commit_and_merge_locked(&mut state)?;
        }
        self.set_version(ram.version())
    }

    fn stage_locked(
        &self,
        state: &mut DiskState,
        del_uids: &HashSet<Uid>,
        add: impl FnOnce(&mut PendingWrite<SegmentId>),
    ) -> Result<()> {
        self.open_writer_locked(state);
        if !del_uids.is_empty() {
            let readers = self.refresh_readers_locked(state)?;
            let ids: Vec<SegmentId> = state.manifest.iter().map(|e| e.id).collect();
            if let Some(writer) = state.writer.as_mut() {
                for (id, reader) in ids.into_iter().zip(readers.iter()) {
                    for &uid in del_uids {
                        for docno in reader.doc_ids(uid) {
                            writer.delete(id, docno.as_u32());
                        }
                    }
                }
            }
        }
        if let Some(writer) = state.writer.as_mut() {
            add(writer);
        }
        Ok(())
    }

    fn commit_and_merge_locked(&self, state: &mut DiskState) -> Result<bool> {
        if !self.commit_locked(state)? {
            return Ok(false);
        }
        if let Some(candidate) = self
            .policy
            .after_commit(&state.manifest.segments, state.last_optimized)
        {
            match self.merge_locked(state, &candidate) {
                Ok(()) => {
                    if candidate.reason == MergeReason::Scheduled {
                        state.last_optimized = SystemTime::now();
                    }
                }
                Err(e) => warn!(error = %e, reason = ?candidate.reason, "post-commit merge failed"),
            }
        }
        Ok(true)
    }

    fn commit_locked(&self, state: &mut DiskState) -> Result<bool> {
        let pending = match state.writer.take() {
            Some(pending) => pending,
            None => return Ok(false),
        };
        if pending.is_empty() {
            return Ok(false);
        }

        let mut manifest = state.manifest.clone();
        let mut written = 0usize;
        match self.write_commit(state, &mut manifest, &pending, &mut written) {
            Ok(None) => Ok(false),
            Ok(Some(superseded)) => {
                state.manifest = manifest;
                for (id, generation) in superseded {
                    state.store.remove_deletes(id, generation);
                }
                Ok(true)
            }
            Err(e) if written == 0 => Err(e),
            Err(e) => {
                error!(
                    home = %self.home.display(),
                    files_written = written,
                    error = %e,
                    "commit failed after partial write, possible index corruption"
                );
                Err(RtIndexError::CorruptionSuspected(format!(
                    "commit to {} failed after {} files: {}",
                    self.home.display(),
                    written,
                    e
                )))
            }
        }
    }

    /// Write the files of one commit; returns superseded delete generations
    fn write_commit(
        &self,
        state: &DiskState,
        manifest: &mut SegmentManifest,
        pending: &PendingWrite<SegmentId>,
        written: &mut usize,
    ) -> Result<Option<Vec<(SegmentId, u64)>>> {
        let mut superseded = Vec::new();

        let content = pending.build_content(self.analyzer.as_ref());
        if !content.is_empty() {
            let id = manifest.allocate_segment_id();
            self.write_segment(state, manifest, id, content)?;
            *written += 1;
        }

        for (id, docs) in &pending.deletes {
            let reader = match state.readers.get(id) {
                Some(reader) => reader,
                None => continue,
            };
            let mut deleted = reader.deleted_docs().clone();
            let before = deleted.len();
            deleted |= docs;
            if deleted.len() == before {
                continue;
            }
            let entry = match manifest.entry_mut(*id) {
                Some(entry) => entry,
                None => continue,
            };
            let generation = entry.del_generation + 1;
            state.store.write_deletes(*id, generation, &deleted)?;
            *written += 1;
            superseded.push((*id, entry.del_generation));
            entry.del_generation = generation;
            entry.num_deleted = deleted.len() as u32;
        }

        if *written == 0 {
            return Ok(None);
        }
        manifest.touch();
        state.store.save_manifest(manifest)?;
        Ok(Some(superseded))
    }

    fn write_segment(
        &self,
        state: &DiskState,
        manifest: &mut SegmentManifest,
        id: SegmentId,
        content: ContentStore,
    ) -> Result<()> {
        let max_doc = content.max_doc();
        let (size_bytes, checksum) = state.store.write_content(id, content)?;
        manifest.add_segment(ManifestEntry {
            id,
            max_doc,
            num_deleted: 0,
            size_bytes,
            checksum,
            del_generation: 0,
            created_at: current_timestamp(),
        });
        Ok(())
    }

    /// Replace the candidate sub-segments with one holding their live documents
    fn merge_locked(&self, state: &mut DiskState, candidate: &MergeCandidate) -> Result<()> {
        self.refresh_readers_locked(state)?;

        let mut merged = ContentStore::new();
        let mut removed = Vec::with_capacity(candidate.segment_ids.len());
        for id in &candidate.segment_ids {
            let (reader, entry) = match (state.readers.get(id), state.manifest.entry(*id)) {
                (Some(reader), Some(entry)) => (reader, entry),
                _ => continue,
            };
            merged.append_live(reader.content(), reader.deleted_docs());
            removed.push(entry.clone());
        }
        if removed.is_empty() {
            return Ok(());
        }

        let mut manifest = state.manifest.clone();
        for entry in &removed {
            manifest.remove_segment(entry.id);
        }
        let docs = merged.max_doc();
        if !merged.is_empty() {
            let id = manifest.allocate_segment_id();
            self.write_segment(state, &mut manifest, id, merged)?;
        }
        state.store.save_manifest(&manifest)?;
        state.manifest = manifest;
        for entry in &removed {
            state.store.remove_segment(entry);
        }
        info!(
            segments = removed.len(),
            docs,
            reason = ?candidate.reason,
            "merged disk segments"
        );
        Ok(())
    }

    /// Merge down to at most `max_segments` sub-segments.
    ///
    /// Returns false when the index was already small enough.
    pub fn optimize(&self, max_segments: usize) -> Result<bool> {
        let mut state = self.state.lock();
        self.commit_locked(&mut state)?;
        let candidate = self.policy.plan_optimize(
            &state.manifest.segments,
            max_segments,
            MergeReason::Forced,
        );
        let merged = match candidate {
            Some(candidate) => {
                self.merge_locked(&mut state, &candidate)?;
                true
            }
            None => false,
        };
        state.last_optimized = SystemTime::now();
        Ok(merged)
    }

    /// Rewrite every sub-segment holding deleted documents; returns how many were rewritten
    pub fn expunge_deletes(&self) -> Result<usize> {
        let mut state = self.state.lock();
        self.commit_locked(&mut state)?;
        let ids = self.policy.plan_expunge(&state.manifest.segments, true);
        for id in &ids {
            let candidate = MergeCandidate {
                segment_ids: vec![*id],
                estimated_docs: 0,
                reason: MergeReason::Forced,
            };
            self.merge_locked(&mut state, &candidate)?;
        }
        Ok(ids.len())
    }

    pub fn last_optimized(&self) -> SystemTime {
        self.state.lock().last_optimized
    }

    /// Unix seconds of the last manifest change, 0 if never committed
    pub fn last_modified(&self) -> u64 {
        self.state.lock().manifest.updated_at
    }

    pub fn segment_count(&self) -> usize {
        self.state.lock().manifest.segment_count()
    }

    /// Write a self-contained copy of the committed index to `out`.
    ///
    /// Returns the number of segment files included.
    pub fn export_snapshot<W: Write>(&self, out: W) -> Result<usize> {
        let state = self.state.lock();
        let signature = IndexSignature::new(state.index_path.clone(), self.version());
        let archive = SnapshotArchive {
            format: SNAPSHOT_FORMAT,
            signature: signature.encode(),
            manifest: state.manifest.to_json()?,
            files: state.store.referenced_files(&state.manifest)?,
        };
        bincode::serialize_into(out, &archive)?;
        Ok(archive.files.len())
    }

    /// Unpack a snapshot written by `export_snapshot` into an empty `home`
    pub fn import_snapshot<R: Read>(home: impl AsRef<Path>, input: R) -> Result<Version> {
        let home = home.as_ref();
        let archive: SnapshotArchive = bincode::deserialize_from(input)?;
        if archive.format != SNAPSHOT_FORMAT {
            return Err(RtIndexError::CorruptionSuspected(format!(
                "unsupported snapshot format {}",
                archive.format
            )));
        }
        let signature = IndexSignature::parse(&archive.signature)?;
        let manifest = SegmentManifest::from_json(&archive.manifest)
            .map_err(|e| RtIndexError::CorruptionSuspected(format!("snapshot manifest: {}", e)))?;

        fs::create_dir_all(home)?;
        let store = SegmentStore::open(home.join(&signature.path))?;
        for (name, data) in &archive.files {
            store.write_raw(name, data)?;
        }
        store.save_manifest(&manifest)?;
        signature.save(home)?;
        info!(
            home = %home.display(),
            version = signature.version,
            files = archive.files.len(),
            "imported index snapshot"
        );
        Ok(signature.version)
    }

    /// Discard all content of the index rooted at `home`.
    ///
    /// The content directory is first renamed aside so that a half-finished
    /// removal never looks like a valid index.
    pub fn purge(home: impl AsRef<Path>) -> Result<()> {
        let home = home.as_ref();
        let path = IndexSignature::load(home)
            .ok()
            .flatten()
            .map(|s| s.path)
            .unwrap_or_else(|| DEFAULT_INDEX_PATH.to_string());
        let dir = home.join(&path);
        if dir.exists() {
            let nanos = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or(0);
            let aside = home.join(format!("{}.purged-{}", path, nanos));
            fs::rename(&dir, &aside)?;
            if let Err(e) = fs::remove_dir_all(&aside) {
                warn!(path = %aside.display(), error = %e, "failed to remove purged index files");
            }
        }
        IndexSignature::remove(home)?;
        info!(home = %home.display(), "purged disk index");
        Ok(())
    }
}

impl SearchIndex for DiskSearchIndex {
    fn name(&self) -> &str {
        "disk"
    }

    fn version(&self) -> Version {
        self.version.load(Ordering::SeqCst)
    }

    /// Persists the signature when the version grows
    fn set_version(&self, version: Version) -> Result<()> {
        let state = self.state.lock();
        if version <= self.version() {
            return Ok(());
        }
        IndexSignature::new(state.index_path.clone(), version).save(&self.home)?;
        self.version.store(version, Ordering::SeqCst);
        Ok(())
    }

    fn event_count(&self) -> u64 {
        self.event_count.load(Ordering::SeqCst)
    }

    fn increment_event_count(&self, count: u64) {
        self.event_count.fetch_add(count, Ordering::SeqCst);
    }

    fn update_index(&self, del_uids: &HashSet<Uid>, docs: Vec<IndexDoc>) -> Result<()> {
        let mut state = self.state.lock();
        if let Err(e) = self.stage_locked(&mut state, del_uids, |writer| writer.docs.extend(docs)) {
            state.writer = None;
            return Err(e);
        }
        self.commit_and_merge_locked(&mut state)?;
        Ok(())
    }

    fn num_docs(&self) -> u64 {
        self.state.lock().manifest.total_live_docs()
    }

    fn size_bytes(&self) -> u64 {
        self.state.lock().manifest.total_size_bytes()
    }
}

impl fmt::Debug for DiskSearchIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiskSearchIndex")
            .field("home", &self.home)
            .field("version", &self.version())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Document, IndexingReq};
    use crate::tokenizer::WhitespaceAnalyzer;
    use tempfile::TempDir;

    fn analyzer() -> SharedAnalyzer {
        Arc::new(WhitespaceAnalyzer)
    }

    fn open(dir: &Path) -> DiskSearchIndex {
        DiskSearchIndex::open(dir, analyzer(), MergePolicyConfig::default()).unwrap()
    }

    fn doc(uid: Uid, body: &str) -> IndexDoc {
        IndexDoc::new(uid, IndexingReq::new(Document::new().with_text("body", body)))
    }

    fn uids(list: &[Uid]) -> HashSet<Uid> {
        list.iter().copied().collect()
    }

    fn live_uids(index: &DiskSearchIndex) -> Vec<Uid> {
        let mut out: Vec<Uid> = index
            .open_readers()
            .unwrap()
            .iter()
            .flat_map(|r| r.mapper().iter().map(|(uid, _)| uid).collect::<Vec<_>>())
            .collect();
        out.sort_unstable();
        out
    }

    #[test]
    fn test_fresh_home_is_version_zero() {
        let tmp = TempDir::new().unwrap();
        let disk = open(tmp.path());
        assert_eq!(disk.version(), 0);
        assert_eq!(disk.num_docs(), 0);
        assert!(disk.open_readers().unwrap().is_empty());
    }

    #[test]
    fn test_updates_persist_across_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let disk = open(tmp.path());
            disk.update_index(&uids(&[1, 2, 3]), vec![doc(1, "a"), doc(2, "b"), doc(3, "c")])
                .unwrap();
            disk.update_index(&uids(&[2]), vec![doc(2, "bb")]).unwrap();
            disk.delete_by_uid(&uids(&[3])).unwrap();
            disk.set_version(7).unwrap();
            assert_eq!(disk.segment_count(), 2);
        }

        let disk = open(tmp.path());
        assert_eq!(disk.version(), 7);
        assert_eq!(disk.num_docs(), 2);
        assert_eq!(live_uids(&disk), vec![1, 2]);
        let readers = disk.open_readers().unwrap();
        let hits: u32 = readers.iter().map(|r| r.term_doc_count("body", "bb")).sum();
        assert_eq!(hits, 1);
    }

    #[test]
    fn test_uid_with_several_documents_across_sub_segments() {
        let tmp = TempDir::new().unwrap();
        let disk = open(tmp.path());
        disk.update_index(&uids(&[7]), vec![doc(7, "zoie first"), doc(7, "zoie second")])
            .unwrap();
        disk.update_index(&uids(&[9]), vec![doc(9, "zoie other")]).unwrap();
        assert_eq!(disk.num_docs(), 3);

        disk.update_index(&uids(&[7]), vec![doc(7, "replaced")]).unwrap();
        let count = |term: &str| -> u32 {
            disk.open_readers()
                .unwrap()
                .iter()
                .map(|r| r.term_doc_count("body", term))
                .sum()
        };
        assert_eq!(disk.num_docs(), 2);
        assert_eq!(count("zoie"), 1);
        assert_eq!(count("replaced"), 1);

        disk.update_index(&uids(&[9]), vec![doc(9, "zoie a"), doc(9, "zoie b")])
            .unwrap();
        disk.delete_by_uid(&uids(&[9])).unwrap();
        assert_eq!(count("zoie"), 0);
        assert_eq!(disk.num_docs(), 1);
        assert_eq!(live_uids(&disk), vec![7]);
    }

    #[test]
    fn test_readers_reused_until_deletes_change() {
        let tmp = TempDir::new().unwrap();
        let disk = open(tmp.path());
        disk.update_index(&uids(&[1, 2]), vec![doc(1, "a"), doc(2, "b")])
            .unwrap();

        let first = disk.open_readers().unwrap();
        let second = disk.open_readers().unwrap();
        assert!(first[0].same_snapshot(&second[0]));
        assert_eq!(disk.open_reader_count(), 1);

        disk.delete_by_uid(&uids(&[1])).unwrap();
        let third = disk.open_readers().unwrap();
        assert!(!third[0].same_snapshot(&first[0]));
        assert_eq!(third[0].num_docs(), 1);

        drop(first);
        drop(second);
        assert_eq!(disk.open_reader_count(), 1);
    }

    #[test]
    fn test_old_delete_generations_are_removed() {
        let tmp = TempDir::new().unwrap();
        let disk = open(tmp.path());
        disk.update_index(&uids(&[1, 2, 3]), vec![doc(1, "a"), doc(2, "b"), doc(3, "c")])
            .unwrap();
        disk.delete_by_uid(&uids(&[1])).unwrap();
        disk.delete_by_uid(&uids(&[2])).unwrap();

        let dir = tmp.path().join(DEFAULT_INDEX_PATH);
        assert!(!dir.join("seg_0_1.del").exists());
        assert!(dir.join("seg_0_2.del").exists());
    }

    #[test]
    fn test_open_writer_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let disk = open(tmp.path());
        assert!(disk.open_writer());
        assert!(!disk.open_writer());
        assert_eq!(disk.writer_opens(), 1);
        assert!(!disk.commit().unwrap());
    }

    #[test]
    fn test_load_from_index_is_repeatable() {
        let tmp = TempDir::new().unwrap();
        let disk = open(tmp.path());
        disk.update_index(&uids(&[1, 2]), vec![doc(1, "old"), doc(2, "keep")])
            .unwrap();

        let ram = RamSearchIndex::new("mem-1", 0, analyzer());
        ram.update_index(&uids(&[1, 3]), vec![doc(1, "new"), doc(3, "fresh")])
            .unwrap();
        ram.set_version(12).unwrap();

        disk.load_from_index(&ram).unwrap();
        disk.load_from_index(&ram).unwrap();

        assert_eq!(disk.version(), 12);
        assert_eq!(live_uids(&disk), vec![1, 2, 3]);
        let readers = disk.open_readers().unwrap();
        let old: u32 = readers.iter().map(|r| r.term_doc_count("body", "old")).sum();
        let new: u32 = readers.iter().map(|r| r.term_doc_count("body", "new")).sum();
        assert_eq!((old, new), (0, 1));
    }

    #[test]
    fn test_optimize_and_expunge() {
        let tmp = TempDir::new().unwrap();
        let disk = open(tmp.path());
        for uid in 0..4 {
            disk.update_index(&uids(&[uid]), vec![doc(uid, "x")]).unwrap();
        }
        disk.delete_by_uid(&uids(&[0])).unwrap();
        assert_eq!(disk.segment_count(), 4);

        assert_eq!(disk.expunge_deletes().unwrap(), 1);
        assert_eq!(disk.segment_count(), 3);

        assert!(disk.optimize(1).unwrap());
        assert_eq!(disk.segment_count(), 1);
        assert!(!disk.optimize(1).unwrap());
        assert_eq!(live_uids(&disk), vec![1, 2, 3]);

        let reopened = open(tmp.path());
        assert_eq!(live_uids(&reopened), vec![1, 2, 3]);
    }

    #[test]
    fn test_commit_triggers_merge_past_max_segments() {
        let tmp = TempDir::new().unwrap();
        let merge = MergePolicyConfig {
            max_segments: 3,
            target_segments: 2,
            ..Default::default()
        };
        let disk = DiskSearchIndex::open(tmp.path(), analyzer(), merge).unwrap();
        for uid in 0..4 {
            disk.update_index(&uids(&[uid]), vec![doc(uid, "x")]).unwrap();
        }
        assert!(disk.segment_count() <= 3);
        assert_eq!(disk.num_docs(), 4);
    }

    #[test]
    fn test_purge_and_snapshot() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("source");
        let target = tmp.path().join("target");

        let mut archive = Vec::new();
        {
            let disk = open(&source);
            disk.update_index(&uids(&[1, 2]), vec![doc(1, "a"), doc(2, "b")])
                .unwrap();
            disk.delete_by_uid(&uids(&[2])).unwrap();
            disk.set_version(5).unwrap();
            assert_eq!(disk.export_snapshot(&mut archive).unwrap(), 2);
        }

        assert_eq!(DiskSearchIndex::import_snapshot(&target, &archive[..]).unwrap(), 5);
        let imported = open(&target);
        assert_eq!(imported.version(), 5);
        assert_eq!(live_uids(&imported), vec![1]);

        DiskSearchIndex::purge(&source).unwrap();
        let purged = open(&source);
        assert_eq!(purged.version(), 0);
        assert_eq!(purged.num_docs(), 0);
    }
}
