//! Temp files with consume-or-drop ownership.
//!
//! Every temp file allocated while an item is processed is either deleted on
//! drop (any error path) or consumed into the hashing pipeline's record
//! (success paths). [`TempFile::into_path`] is the explicit handoff that
//! disarms deletion.

use std::fs::File;
use std::io::{self, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::NamedTempFile;

use crate::error::{EngineError, Result};

/// A writable temp file that deletes itself on drop unless consumed.
#[derive(Debug)]
pub struct TempFile {
    inner: NamedTempFile,
}

impl TempFile {
    pub fn file(&mut self) -> &mut File {
        self.inner.as_file_mut()
    }

    pub fn path(&self) -> &Path {
        self.inner.path()
    }

    pub fn len(&self) -> io::Result<u64> {
        Ok(self.inner.as_file().metadata()?.len())
    }

    pub fn is_empty(&self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn rewind(&mut self) -> io::Result<()> {
        self.inner.as_file_mut().seek(SeekFrom::Start(0)).map(|_| ())
    }

    /// Duplicate the underlying handle for the transport's look-ahead. The
    /// clone shares the file offset with this handle.
    pub fn try_clone_handle(&self) -> io::Result<File> {
        self.inner.as_file().try_clone()
    }

    /// Consume the temp file, disarming deletion, and return its path. The
    /// handle is closed; the file on disk now belongs to the caller.
    pub fn into_path(self) -> io::Result<PathBuf> {
        match self.inner.keep() {
            Ok((file, path)) => {
                drop(file);
                Ok(path)
            }
            Err(e) => Err(e.error),
        }
    }
}

/// Factory for [`TempFile`]s.
pub trait TempStore: Send + Sync {
    fn create(&self) -> Result<TempFile>;
}

/// Allocates temp files in a fixed directory, retrying briefly on transient
/// failures (the server may be at its fd limit while other jobs run).
#[derive(Debug, Clone)]
pub struct DirTempStore {
    dir: PathBuf,
    attempts: u32,
    retry_delay: Duration,
}

impl DirTempStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            attempts: 5,
            retry_delay: Duration::from_millis(100),
        }
    }
}

impl TempStore for DirTempStore {
    fn create(&self) -> Result<TempFile> {
        let mut last_err = None;
        for attempt in 0..self.attempts {
            if attempt > 0 {
                std::thread::sleep(self.retry_delay);
            }
            match NamedTempFile::new_in(&self.dir) {
                Ok(inner) => return Ok(TempFile { inner }),
                Err(e) => last_err = Some(e),
            }
        }
        Err(EngineError::TempFile(format!(
            "in {}: {}",
            self.dir.display(),
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    #[test]
    fn deleted_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirTempStore::new(dir.path());
        let path = {
            let mut t = store.create().unwrap();
            t.file().write_all(b"scratch").unwrap();
            t.path().to_owned()
        };
        assert!(!path.exists(), "temp must be deleted on drop");
    }

    #[test]
    fn into_path_disarms_deletion() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirTempStore::new(dir.path());
        let mut t = store.create().unwrap();
        t.file().write_all(b"keep me").unwrap();
        let path = t.into_path().unwrap();
        assert!(path.exists());
        assert_eq!(std::fs::read(&path).unwrap(), b"keep me");
    }

    #[test]
    fn cloned_handle_shares_offset() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirTempStore::new(dir.path());
        let mut t = store.create().unwrap();
        let mut clone = t.try_clone_handle().unwrap();
        clone.write_all(b"via clone").unwrap();

        // The owner's handle sees the write and the shared offset.
        assert_eq!(t.len().unwrap(), 9);
        t.rewind().unwrap();
        let mut body = String::new();
        t.file().read_to_string(&mut body).unwrap();
        assert_eq!(body, "via clone");
    }

    #[test]
    fn missing_dir_reports_temp_file_error() {
        let store = DirTempStore {
            dir: PathBuf::from("/nonexistent/skua-test"),
            attempts: 1,
            retry_delay: Duration::ZERO,
        };
        match store.create() {
            Err(EngineError::TempFile(msg)) => assert!(msg.contains("/nonexistent/skua-test")),
            other => panic!("expected TempFile error, got {other:?}"),
        }
    }
}
