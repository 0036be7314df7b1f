//! Environment preparation: resets pipeline artifacts before a fresh run.
//!
//! Cleanup is best-effort. A permission-denied failure triggers exactly one
//! retry after clearing protective permission bits on the whole subtree; any
//! other failure is logged as a warning and the artifact is left in place.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::artifacts::{Artifact, ArtifactRegistry};

/// A path the preparator could not remove.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedPath {
    pub path: PathBuf,
    pub reason: String,
}

/// Outcome of one preparation pass.
#[derive(Debug, Clone, Default)]
pub struct CleanupReport {
    pub removed: Vec<PathBuf>,
    pub skipped: Vec<SkippedPath>,
    /// Whether the generated-source directory exists after the pass
    pub source_ready: bool,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty() && self.source_ready
    }
}

/// Delete every artifact of a previous run, then recreate the source directory.
///
/// Calling this on an already-clean working directory removes nothing.
pub fn prepare_environment(registry: &ArtifactRegistry) -> CleanupReport {
    let mut report = CleanupReport::default();

    for artifact in Artifact::previous_run_outputs() {
        let path = registry.path(artifact);
        if fs::symlink_metadata(&path).is_err() {
            continue;
        }
        // An empty source directory is already the clean state
        if artifact == Artifact::Source && is_empty_dir(&path) {
            continue;
        }
        match remove_with_retry(&path) {
            Ok(()) => {
                debug!("Removed {}", path.display());
                report.removed.push(path);
            }
            Err(e) => {
                warn!("Could not remove {}: {}", path.display(), e);
                report.skipped.push(SkippedPath {
                    path,
                    reason: e.to_string(),
                });
            }
        }
    }

    let source_dir = registry.path(Artifact::Source);
    match fs::create_dir_all(&source_dir) {
        Ok(()) => report.source_ready = true,
        Err(e) => warn!(
            "Could not create output directory {}: {}",
            source_dir.display(),
            e
        ),
    }

    report
}

fn is_empty_dir(path: &Path) -> bool {
    fs::read_dir(path)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false)
}

fn remove_with_retry(path: &Path) -> io::Result<()> {
    match remove_path(path) {
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            debug!(
                "Permission error on {}, clearing read-only flag and retrying...",
                path.display()
            );
            clear_protection(path);
            remove_path(path)
        }
        other => other,
    }
}

fn remove_path(path: &Path) -> io::Result<()> {
    let meta = fs::symlink_metadata(path)?;
    if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// Make `path` and everything below it writable by the owner.
///
/// Directories are fixed up before they are descended into, so nested
/// read-only directories become traversable during the same walk.
fn clear_protection(path: &Path) {
    for entry in WalkDir::new(path).follow_links(false) {
        match entry {
            Ok(entry) => {
                if let Err(e) = make_writable(entry.path()) {
                    debug!("Could not unprotect {}: {}", entry.path().display(), e);
                }
            }
            Err(e) => debug!("Skipping unreadable entry during cleanup: {}", e),
        }
    }
}

#[cfg(unix)]
fn make_writable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let meta = fs::symlink_metadata(path)?;
    if meta.file_type().is_symlink() {
        return Ok(());
    }
    let mut perms = meta.permissions();
    let extra = if meta.is_dir() { 0o700 } else { 0o600 };
    perms.set_mode(perms.mode() | extra);
    fs::set_permissions(path, perms)
}

#[cfg(not(unix))]
fn make_writable(path: &Path) -> io::Result<()> {
    let meta = fs::symlink_metadata(path)?;
    let mut perms = meta.permissions();
    perms.set_readonly(false);
    fs::set_permissions(path, perms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn seed_previous_run(root: &Path) {
        fs::create_dir_all(root.join("specs")).unwrap();
        fs::write(root.join("specs/SPEC.md"), "# Spec").unwrap();
        fs::write(root.join("deliverable.zip"), b"PK").unwrap();
        fs::write(root.join("deliverable_fixed.zip"), b"PK").unwrap();
        fs::write(root.join("VALIDATION.md"), "# Report").unwrap();
        fs::create_dir_all(root.join("generated_project/src")).unwrap();
        fs::write(root.join("generated_project/src/main.py"), "print()").unwrap();
        fs::create_dir_all(root.join("validation_workspace")).unwrap();
    }

    #[test]
    fn test_prepare_removes_previous_run_outputs() {
        let dir = tempdir().unwrap();
        seed_previous_run(dir.path());
        let registry = ArtifactRegistry::new(dir.path());

        let report = prepare_environment(&registry);

        assert_eq!(report.removed.len(), 6);
        assert!(report.skipped.is_empty());
        assert!(!registry.is_present(Artifact::Spec));
        assert!(!registry.is_present(Artifact::Deliverable));
        assert!(!registry.is_present(Artifact::FixedDeliverable));
        assert!(!registry.is_present(Artifact::Validation));
        assert!(!registry.is_present(Artifact::ValidationWorkspace));
    }

    #[test]
    fn test_prepare_recreates_empty_source_dir() {
        let dir = tempdir().unwrap();
        seed_previous_run(dir.path());
        let registry = ArtifactRegistry::new(dir.path());

        let report = prepare_environment(&registry);

        assert!(report.source_ready);
        let source = registry.path(Artifact::Source);
        assert!(source.is_dir());
        assert_eq!(fs::read_dir(&source).unwrap().count(), 0);
    }

    #[test]
    fn test_prepare_is_idempotent() {
        let dir = tempdir().unwrap();
        seed_previous_run(dir.path());
        let registry = ArtifactRegistry::new(dir.path());

        prepare_environment(&registry);
        let second = prepare_environment(&registry);

        assert!(second.removed.is_empty());
        assert!(second.skipped.is_empty());
        assert!(second.source_ready);
    }

    #[test]
    fn test_prepare_on_empty_dir_removes_nothing() {
        let dir = tempdir().unwrap();
        let registry = ArtifactRegistry::new(dir.path());

        let report = prepare_environment(&registry);

        assert!(report.removed.is_empty());
        assert!(report.is_clean());
    }

    #[test]
    fn test_prepare_leaves_unrelated_files_alone() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("README.md"), "keep me").unwrap();
        fs::create_dir_all(dir.path().join("logs")).unwrap();
        let registry = ArtifactRegistry::new(dir.path());

        prepare_environment(&registry);

        assert!(dir.path().join("README.md").exists());
        assert!(dir.path().join("logs").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_prepare_clears_read_only_directories() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let locked = dir.path().join("validation_workspace/locked");
        fs::create_dir_all(&locked).unwrap();
        fs::write(locked.join("report.txt"), "data").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o500)).unwrap();

        let registry = ArtifactRegistry::new(dir.path());
        let report = prepare_environment(&registry);

        assert!(report.skipped.is_empty(), "skipped: {:?}", report.skipped);
        assert!(!registry.is_present(Artifact::ValidationWorkspace));
    }

    #[cfg(unix)]
    #[test]
    fn test_prepare_removes_read_only_file() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let zip = dir.path().join("deliverable.zip");
        fs::write(&zip, b"PK").unwrap();
        fs::set_permissions(&zip, fs::Permissions::from_mode(0o400)).unwrap();

        let registry = ArtifactRegistry::new(dir.path());
        let report = prepare_environment(&registry);

        assert_eq!(report.removed, vec![zip.clone()]);
        assert!(!zip.exists());
    }
}
