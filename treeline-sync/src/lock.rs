//! Per-project run lock.
//!
//! `<home>/.treeline/projects/<project>/sync.lock`, held with an exclusive
//! non-blocking `flock` for the whole run. The lock is released when the
//! guard (and with it the file handle) is dropped.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use treeline_core::snapshot;
use treeline_core::types::ProjectName;

use crate::error::{io_err, SyncError};

pub fn lock_path_at(home: &Path, project: &ProjectName) -> PathBuf {
    snapshot::project_path_at(home, project).join("sync.lock")
}

#[derive(Debug)]
pub struct ProjectLock {
    path: PathBuf,
    _file: File,
}

impl ProjectLock {
    /// Take the lock or fail with [`SyncError::Locked`] when another run
    /// holds it.
    pub fn acquire_at(home: &Path, project: &ProjectName) -> Result<Self, SyncError> {
        snapshot::project_dir_at(home, project)?;
        let path = lock_path_at(home, project);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| io_err(&path, e))?;
        if file.try_lock_exclusive().is_err() {
            return Err(SyncError::Locked {
                project: project.clone(),
                path,
            });
        }
        tracing::debug!(path = %path.display(), "project lock acquired");
        Ok(Self { path, _file: file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn second_acquire_fails_until_release() {
        let home = TempDir::new().unwrap();
        let project = ProjectName::from("show");
        let first = ProjectLock::acquire_at(home.path(), &project).unwrap();
        assert!(first.path().ends_with("sync.lock"));

        let second = ProjectLock::acquire_at(home.path(), &project);
        assert!(matches!(second, Err(SyncError::Locked { .. })));

        drop(first);
        assert!(ProjectLock::acquire_at(home.path(), &project).is_ok());
    }

    #[test]
    fn projects_lock_independently() {
        let home = TempDir::new().unwrap();
        let _a = ProjectLock::acquire_at(home.path(), &ProjectName::from("a")).unwrap();
        assert!(ProjectLock::acquire_at(home.path(), &ProjectName::from("b")).is_ok());
    }
}
