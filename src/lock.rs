//! Exclusive run guard for a working directory.
//!
//! Pipeline artifacts and the log directory are shared by every run in a
//! working directory, so at most one run may be active there at a time. The
//! guard holds an advisory exclusive lock on `.conductor.lock` for as long as
//! it lives.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::errors::OrchestratorError;

pub const LOCK_FILE: &str = ".conductor.lock";

#[derive(Debug)]
pub struct RunGuard {
    file: File,
    path: PathBuf,
}

impl RunGuard {
    /// Take the run lock for `work_dir`, failing fast if another run holds it.
    pub fn acquire(work_dir: &Path) -> Result<Self, OrchestratorError> {
        let path = work_dir.join(LOCK_FILE);
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|source| OrchestratorError::LockFailed {
                path: path.clone(),
                source,
            })?;

        if let Err(e) = FileExt::try_lock_exclusive(&file) {
            if e.kind() == fs2::lock_contended_error().kind() {
                return Err(OrchestratorError::AlreadyRunning { lock_path: path });
            }
            return Err(OrchestratorError::LockFailed { path, source: e });
        }

        // Owner pid is informational only
        let _ = file.set_len(0);
        let _ = writeln!(file, "{}", std::process::id());

        Ok(Self { file, path })
    }

    /// Whether a run currently holds the lock for `work_dir`.
    ///
    /// Opens the lock file read-only and never creates or rewrites it.
    pub fn is_held(work_dir: &Path) -> Result<bool, OrchestratorError> {
        let path = work_dir.join(LOCK_FILE);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(source) => return Err(OrchestratorError::LockFailed { path, source }),
        };

        match FileExt::try_lock_shared(&file) {
            Ok(()) => {
                let _ = FileExt::unlock(&file);
                Ok(false)
            }
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(true),
            Err(source) => Err(OrchestratorError::LockFailed { path, source }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
