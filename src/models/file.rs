use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use super::document::Document;
use super::indexable::{BoxedIndexable, IndexableDocument, IndexableInterpreter};
use crate::error::{Result, RtIndexError};
use crate::segment::Uid;

/// Field holding the file path
pub const PATH_FIELD: &str = "path";
/// Field holding the analyzed file body
pub const CONTENT_FIELD: &str = "content";

/// Interprets file paths into documents.
///
/// Uids come from a counter owned by the interpreter instance.
#[derive(Debug)]
pub struct FileInterpreter {
    next_uid: AtomicU64,
}

impl FileInterpreter {
    pub fn new(first_uid: Uid) -> Self {
        Self {
            next_uid: AtomicU64::new(first_uid),
        }
    }

    /// Uid that the next interpreted file will receive
    pub fn peek_uid(&self) -> Uid {
        self.next_uid.load(Ordering::SeqCst)
    }
}

impl Default for FileInterpreter {
    fn default() -> Self {
        Self::new(0)
    }
}

impl IndexableInterpreter<PathBuf> for FileInterpreter {
    fn interpret(&self, path: &PathBuf) -> Result<BoxedIndexable> {
        let uid = self.next_uid.fetch_add(1, Ordering::SeqCst);
        if !path.is_file() {
            return Ok(IndexableDocument::skip(uid).boxed());
        }
        let content = fs::read_to_string(path).map_err(|e| {
            RtIndexError::interpret(Some(uid), format!("{}: {}", path.display(), e))
        })?;
        let doc = Document::new()
            .with_keyword(PATH_FIELD, path.to_string_lossy())
            .with_text(CONTENT_FIELD, content);
        Ok(IndexableDocument::new(uid, doc).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Indexable;
    use tempfile::TempDir;

    #[test]
    fn test_interprets_files_with_sequential_uids() {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("a.txt");
        let b = tmp.path().join("b.txt");
        fs::write(&a, "alpha text").unwrap();
        fs::write(&b, "beta text").unwrap();

        let interpreter = FileInterpreter::new(10);
        let first = interpreter.interpret(&a).unwrap();
        let second = interpreter.interpret(&b).unwrap();

        assert_eq!(first.uid(), 10);
        assert_eq!(second.uid(), 11);
        let reqs = second.build_indexing_reqs();
        assert_eq!(reqs[0].document.get(CONTENT_FIELD), Some("beta text"));
        assert_eq!(interpreter.peek_uid(), 12);
    }

    #[test]
    fn test_directories_are_skipped() {
        let tmp = TempDir::new().unwrap();
        let interpreter = FileInterpreter::default();
        let indexable = interpreter.interpret(&tmp.path().to_path_buf()).unwrap();
        assert!(indexable.is_skip());
    }

    #[test]
    fn test_binary_file_is_interpret_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("blob.bin");
        fs::write(&path, [0xff, 0xfe, 0x00, 0xc3]).unwrap();

        let interpreter = FileInterpreter::default();
        let err = interpreter.interpret(&path).err().unwrap();
        assert!(matches!(err, RtIndexError::RecordInterpret { uid: Some(0), .. }));
    }
}
