//! Versioned pointer from an index home to its content directory
//!
//! Stored as a single UTF-8 line `path@version` in `index.directory`.
//! Replacement writes `index.directory.new`, moves the old file to
//! `index.directory.tmp`, renames the new file into place and finally
//! removes the old copy, so a crash leaves at least one readable file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;

use super::types::Version;
use crate::error::{Result, RtIndexError};

pub const SIGNATURE_FILE: &str = "index.directory";

/// Default content directory name inside an index home
pub const DEFAULT_INDEX_PATH: &str = "segments";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexSignature {
    /// Content directory relative to the index home
    pub path: String,
    pub version: Version,
}

impl IndexSignature {
    pub fn new(path: impl Into<String>, version: Version) -> Self {
        Self {
            path: path.into(),
            version,
        }
    }

    pub fn encode(&self) -> String {
        format!("{}@{}", self.path, self.version)
    }

    /// Parse `path@version`; a malformed version reads as 0
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim_end_matches(&['\r', '\n'][..]);
        match line.rfind('@') {
            Some(at) if at > 0 => {
                let path = &line[..at];
                let version = line[at + 1..].trim().parse::<Version>().unwrap_or_else(|e| {
                    warn!(line, error = %e, "unparsable signature version, using 0");
                    0
                });
                Ok(Self::new(path, version))
            }
            _ => Err(RtIndexError::InvalidSignature(line.to_string())),
        }
    }

    fn file(home: &Path, suffix: &str) -> PathBuf {
        home.join(format!("{}{}", SIGNATURE_FILE, suffix))
    }

    /// Read the signature of an index home, `None` if the home has never been committed
    pub fn load(home: &Path) -> Result<Option<Self>> {
        for suffix in ["", ".new", ".tmp"] {
            let path = Self::file(home, suffix);
            match fs::read_to_string(&path) {
                Ok(text) => {
                    if !suffix.is_empty() {
                        warn!(path = %path.display(), "recovering index signature from leftover file");
                    }
                    let first = text.lines().next().unwrap_or_default();
                    return Self::parse(first).map(Some);
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }

    /// Remove every signature file of `home`, leaving it uncommitted
    pub fn remove(home: &Path) -> Result<()> {
        for suffix in ["", ".new", ".tmp"] {
            match fs::remove_file(Self::file(home, suffix)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Atomically replace the signature file of `home`
    pub fn save(&self, home: &Path) -> Result<()> {
        let current = Self::file(home, "");
        let new = Self::file(home, ".new");
        let old = Self::file(home, ".tmp");

        fs::write(&new, self.encode())?;
        if current.exists() {
            fs::rename(&current, &old)?;
        }
        fs::rename(&new, &current)?;
        if old.exists() {
            if let Err(e) = fs::remove_file(&old) {
                warn!(path = %old.display(), error = %e, "failed to remove old signature");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_encode_parse() {
        let sig = IndexSignature::new("segments", 1234);
        assert_eq!(sig.encode(), "segments@1234");
        assert_eq!(IndexSignature::parse("segments@1234\n").unwrap(), sig);

        // The last '@' separates the version.
        let sig = IndexSignature::parse("odd@name@7").unwrap();
        assert_eq!(sig.path, "odd@name");
        assert_eq!(sig.version, 7);
    }

    #[test]
    fn test_bad_version_reads_as_zero() {
        let sig = IndexSignature::parse("segments@notanumber").unwrap();
        assert_eq!(sig.version, 0);
        assert!(matches!(
            IndexSignature::parse("no-separator"),
            Err(RtIndexError::InvalidSignature(_))
        ));
    }

    #[test]
    fn test_save_load_replace() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(IndexSignature::load(tmp.path()).unwrap(), None);

        IndexSignature::new("segments", 1).save(tmp.path()).unwrap();
        IndexSignature::new("segments", 2).save(tmp.path()).unwrap();

        let loaded = IndexSignature::load(tmp.path()).unwrap().unwrap();
        assert_eq!(loaded.version, 2);
        assert!(!tmp.path().join("index.directory.new").exists());
        assert!(!tmp.path().join("index.directory.tmp").exists());

        IndexSignature::remove(tmp.path()).unwrap();
        assert_eq!(IndexSignature::load(tmp.path()).unwrap(), None);
    }

    #[test]
    fn test_recovers_from_interrupted_swap() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("index.directory.new"), "segments@9").unwrap();
        fs::write(tmp.path().join("index.directory.tmp"), "segments@8").unwrap();

        let loaded = IndexSignature::load(tmp.path()).unwrap().unwrap();
        assert_eq!(loaded.version, 9);
    }
}
