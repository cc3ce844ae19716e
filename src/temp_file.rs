use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use crate::utils::is_partial_artifact;

/// Shared scratch directory for downloads.
#[derive(Clone)]
pub struct WorkDir {
    path: PathBuf,
    active_jobs: Arc<AtomicUsize>,
}

impl WorkDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            active_jobs: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn job(&self) -> TempJob {
        self.active_jobs.fetch_add(1, Ordering::SeqCst);
        TempJob {
            dir: self.path.clone(),
            stem: uuid::Uuid::new_v4().simple().to_string(),
            active_jobs: self.active_jobs.clone(),
        }
    }
}

/// Scratch space of a single download. On drop every file whose name starts
/// with the job stem is removed. The last job to finish also sweeps partial
/// downloads left over by anyone else.
pub struct TempJob {
    dir: PathBuf,
    stem: String,
    active_jobs: Arc<AtomicUsize>,
}

impl TempJob {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Unique file name prefix handed to the downloader
    pub fn stem(&self) -> &str {
        &self.stem
    }

    fn remove_matching(&self, matches: impl Fn(&str) -> bool) {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return;
        };

        for entry in entries.flatten() {
            if !matches(&entry.file_name().to_string_lossy()) {
                continue;
            }
            if let Err(e) = fs::remove_file(entry.path()) {
                if e.kind() != io::ErrorKind::NotFound {
                    log::warn!("Failed to remove file {:?}: {}", entry.path(), e);
                }
            }
        }
    }
}

impl Drop for TempJob {
    fn drop(&mut self) {
        self.remove_matching(|name| name.starts_with(&self.stem));

        // Partials of a running job must survive, so only sweep when idle
        if self.active_jobs.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.remove_matching(is_partial_artifact);
        }
    }
}
