use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crc32fast::Hasher;
use parking_lot::Mutex;
use roaring::RoaringBitmap;
use tracing::warn;

use super::content::ContentStore;
use super::manifest::{ManifestEntry, SegmentManifest};
use super::types::SegmentId;
use crate::error::{Result, RtIndexError};

const MANIFEST_FILE: &str = "segments.manifest";

/// Attempts made by `with_io_retries` before giving up
pub const OPEN_RETRIES: u32 = 5;
/// Sleep between attempts
pub const OPEN_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Run `op`, retrying plain IO failures a bounded number of times.
///
/// Exhausted retries surface as `TransientIo`; other errors return at once.
pub fn with_io_retries<T>(what: &str, mut op: impl FnMut() -> Result<T>) -> Result<T> {
    let mut attempt = 1;
    loop {
        match op() {
            Err(RtIndexError::Io(source)) => {
                if attempt >= OPEN_RETRIES {
                    return Err(RtIndexError::TransientIo {
                        attempts: attempt,
                        source,
                    });
                }
                warn!(what, attempt, error = %source, "retrying after IO failure");
                thread::sleep(OPEN_RETRY_DELAY);
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// CRC32 checksum used for content files
pub fn checksum(data: &[u8]) -> u64 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize() as u64
}

/// Write `data` next to `path` and rename it into place
pub fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);
    {
        let mut file = File::create(&tmp)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)
}

fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove segment file");
        }
    }
}

/// Persistent storage for sub-segment files and the manifest.
///
/// Content files never change once written, so loaded content is cached by id.
pub struct SegmentStore {
    base_dir: PathBuf,
    cache: Mutex<HashMap<SegmentId, Arc<ContentStore>>>,
}

impl SegmentStore {
    pub fn open<P: AsRef<Path>>(base_dir: P) -> io::Result<Self> {
        fs::create_dir_all(&base_dir)?;
        Ok(Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.base_dir
    }

    fn content_path(&self, id: SegmentId) -> PathBuf {
        self.base_dir.join(format!("{}.bin", id))
    }

    fn deletes_path(&self, id: SegmentId, generation: u64) -> PathBuf {
        self.base_dir.join(format!("{}_{}.del", id, generation))
    }

    /// Write a new sub-segment, returning (size in bytes, checksum)
    pub fn write_content(&self, id: SegmentId, content: ContentStore) -> Result<(u64, u64)> {
        let bytes = content.to_bytes()?;
        write_atomic(&self.content_path(id), &bytes)?;
        self.cache.lock().insert(id, Arc::new(content));
        Ok((bytes.len() as u64, checksum(&bytes)))
    }

    /// Load sub-segment content, verifying the manifest checksum on first load
    pub fn read_content(&self, entry: &ManifestEntry) -> Result<Arc<ContentStore>> {
        if let Some(content) = self.cache.lock().get(&entry.id) {
            return Ok(content.clone());
        }

        let bytes = fs::read(self.content_path(entry.id))?;
        let actual = checksum(&bytes);
        if actual != entry.checksum {
            return Err(RtIndexError::CorruptionSuspected(format!(
                "{} checksum mismatch: manifest {:#x}, file {:#x}",
                entry.id, entry.checksum, actual
            )));
        }
        let content = Arc::new(ContentStore::from_bytes(&bytes)?);
        if content.max_doc() != entry.max_doc {
            return Err(RtIndexError::CorruptionSuspected(format!(
                "{} holds {} documents, manifest says {}",
                entry.id,
                content.max_doc(),
                entry.max_doc
            )));
        }
        self.cache.lock().insert(entry.id, content.clone());
        Ok(content)
    }

    /// Write the delete set of a sub-segment under a new generation.
    ///
    /// The file only takes effect once a manifest referencing `generation` is saved.
    pub fn write_deletes(&self, id: SegmentId, generation: u64, deleted: &RoaringBitmap) -> Result<()> {
        let mut bytes = Vec::with_capacity(deleted.serialized_size());
        deleted.serialize_into(&mut bytes)?;
        write_atomic(&self.deletes_path(id, generation), &bytes)?;
        Ok(())
    }

    /// Delete set of a sub-segment at `generation`; generation 0 has no deletes
    pub fn read_deletes(&self, id: SegmentId, generation: u64) -> Result<RoaringBitmap> {
        if generation == 0 {
            return Ok(RoaringBitmap::new());
        }
        let bytes = fs::read(self.deletes_path(id, generation))?;
        RoaringBitmap::deserialize_from(&bytes[..]).map_err(|e| {
            RtIndexError::CorruptionSuspected(format!("{} delete file unreadable: {}", id, e))
        })
    }

    /// Best-effort removal of a superseded delete generation
    pub fn remove_deletes(&self, id: SegmentId, generation: u64) {
        if generation > 0 {
            remove_quietly(&self.deletes_path(id, generation));
        }
    }

    /// Best-effort removal of a merged-away sub-segment
    pub fn remove_segment(&self, entry: &ManifestEntry) {
        self.cache.lock().remove(&entry.id);
        remove_quietly(&self.content_path(entry.id));
        self.remove_deletes(entry.id, entry.del_generation);
    }

    /// Raw bytes of every file referenced by `manifest`, keyed by file name
    pub fn referenced_files(&self, manifest: &SegmentManifest) -> Result<Vec<(String, Vec<u8>)>> {
        let paths = manifest
            .iter()
            .map(|entry| self.content_path(entry.id))
            .chain(
                manifest
                    .del_generations()
                    .map(|(id, generation)| self.deletes_path(id, generation)),
            );
        let mut files = Vec::new();
        for path in paths {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            files.push((name, fs::read(&path)?));
        }
        Ok(files)
    }

    /// Write a file by bare name, as produced by `referenced_files`
    pub fn write_raw(&self, name: &str, data: &[u8]) -> Result<()> {
        if name.is_empty() || name.contains(&['/', '\\'][..]) || name.starts_with('.') {
            return Err(RtIndexError::CorruptionSuspected(format!(
                "refusing to write segment file {:?}",
                name
            )));
        }
        write_atomic(&self.base_dir.join(name), data)?;
        Ok(())
    }

    pub fn save_manifest(&self, manifest: &SegmentManifest) -> Result<()> {
        let bytes = manifest.to_json()?;
        write_atomic(&self.base_dir.join(MANIFEST_FILE), &bytes)?;
        Ok(())
    }

    pub fn load_manifest(&self) -> Result<SegmentManifest> {
        let path = self.base_dir.join(MANIFEST_FILE);
        if !path.exists() {
            return Ok(SegmentManifest::new());
        }
        let bytes = fs::read(path)?;
        SegmentManifest::from_json(&bytes)
            .map_err(|e| RtIndexError::CorruptionSuspected(format!("manifest unreadable: {}", e)))
    }

    /// Number of cached content stores
    pub fn cached_segments(&self) -> usize {
        self.cache.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Document;
    use crate::tokenizer::WhitespaceAnalyzer;
    use std::cell::Cell;
    use tempfile::TempDir;

    fn content(n: u64) -> ContentStore {
        let mut store = ContentStore::new();
        for uid in 0..n {
            store.add_document(
                &Document::new().with_text("body", "x y"),
                uid,
                &WhitespaceAnalyzer,
            );
        }
        store
    }

    fn entry_for(id: SegmentId, max_doc: u32, size: u64, crc: u64) -> ManifestEntry {
        ManifestEntry {
            id,
            max_doc,
            num_deleted: 0,
            size_bytes: size,
            checksum: crc,
            del_generation: 0,
            created_at: 0,
        }
    }

    #[test]
    fn test_content_roundtrip_through_disk() {
        let tmp = TempDir::new().unwrap();
        let store = SegmentStore::open(tmp.path()).unwrap();
        let id = SegmentId::new(3);
        let (size, crc) = store.write_content(id, content(4)).unwrap();
        assert!(tmp.path().join("seg_3.bin").exists());

        // A fresh store has no cache and must read the file.
        let reopened = SegmentStore::open(tmp.path()).unwrap();
        let loaded = reopened.read_content(&entry_for(id, 4, size, crc)).unwrap();
        assert_eq!(loaded.scan_uids(), vec![0, 1, 2, 3]);
        assert_eq!(reopened.cached_segments(), 1);
    }

    #[test]
    fn test_checksum_mismatch_is_corruption() {
        let tmp = TempDir::new().unwrap();
        let store = SegmentStore::open(tmp.path()).unwrap();
        let id = SegmentId::new(0);
        let (size, crc) = store.write_content(id, content(2)).unwrap();

        let reopened = SegmentStore::open(tmp.path()).unwrap();
        let result = reopened.read_content(&entry_for(id, 2, size, crc ^ 1));
        assert!(matches!(result, Err(RtIndexError::CorruptionSuspected(_))));
    }

    #[test]
    fn test_deletes_and_manifest() {
        let tmp = TempDir::new().unwrap();
        let store = SegmentStore::open(tmp.path()).unwrap();
        let id = SegmentId::new(1);

        assert!(store.read_deletes(id, 0).unwrap().is_empty());
        let deleted: RoaringBitmap = [1u32, 5].into_iter().collect();
        store.write_deletes(id, 1, &deleted).unwrap();
        assert_eq!(store.read_deletes(id, 1).unwrap(), deleted);
        assert!(tmp.path().join("seg_1_1.del").exists());

        let mut manifest = SegmentManifest::new();
        let mut entry = entry_for(id, 6, 2, 0);
        entry.del_generation = 1;
        manifest.add_segment(entry.clone());
        store.save_manifest(&manifest).unwrap();
        assert_eq!(store.load_manifest().unwrap(), manifest);

        store.remove_segment(&entry);
        assert!(!tmp.path().join("seg_1_1.del").exists());
        assert!(store.read_deletes(id, 1).is_err());
    }

    #[test]
    fn test_write_raw_rejects_paths() {
        let tmp = TempDir::new().unwrap();
        let store = SegmentStore::open(tmp.path()).unwrap();
        store.write_raw("seg_0.bin", b"abc").unwrap();
        assert!(tmp.path().join("seg_0.bin").exists());
        assert!(store.write_raw("../escape", b"x").is_err());
        assert!(store.write_raw("..", b"x").is_err());
    }

    #[test]
    fn test_io_retries_then_transient() {
        let calls = Cell::new(0);
        let result: Result<()> = with_io_retries("test", || {
            calls.set(calls.get() + 1);
            Err(io::Error::new(io::ErrorKind::Other, "busy").into())
        });
        assert_eq!(calls.get(), OPEN_RETRIES);
        assert!(matches!(
            result,
            Err(RtIndexError::TransientIo { attempts: 5, .. })
        ));

        let calls = Cell::new(0);
        let result = with_io_retries("test", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(io::Error::new(io::ErrorKind::Other, "busy").into())
            } else {
                Ok(7)
            }
        });
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.get(), 3);
    }
}
