//! Uniquely named temporary audio files that are deleted exactly once.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

/// A temporary audio file owned by one request.
///
/// The file is removed by the first of [`remove`](Self::remove) or `Drop`;
/// later calls are no-ops. Share it behind an `Arc` when several cleanup
/// paths (stream end, client disconnect, error unwinding) may race.
#[derive(Debug)]
pub struct TempAudioFile {
    path: PathBuf,
    removed: AtomicBool,
}

/// Build a unique file name such as `tts_20240101_120000_3f2a9c1b.mp3`.
pub fn unique_name(prefix: &str, ext: &str) -> String {
    let ts = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{prefix}_{ts}_{id}.{ext}")
}

impl TempAudioFile {
    /// Claim a fresh path under `dir` without touching the filesystem.
    pub fn reserve(dir: &Path, prefix: &str, ext: &str) -> Self {
        Self {
            path: dir.join(unique_name(prefix, ext)),
            removed: AtomicBool::new(false),
        }
    }

    /// Create the file under `dir` and write `data` to it.
    pub async fn create(dir: &Path, prefix: &str, ext: &str, data: &[u8]) -> io::Result<Self> {
        tokio::fs::create_dir_all(dir).await?;
        let file = Self::reserve(dir, prefix, ext);
        tokio::fs::write(&file.path, data).await?;
        debug!(path = %file.path.display(), bytes = data.len(), "Temp audio file written");
        Ok(file)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }

    /// Delete the file. Returns `true` only for the call that performed the deletion.
    ///
    /// The unlink is synchronous, also when reached from `Drop` on a runtime
    /// worker: the file is gone by the time this returns. Only the directory
    /// entry is touched, never the file's contents.
    pub fn remove(&self) -> bool {
        if self
            .removed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Temp audio file removed"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), %e, "Failed to remove temp audio file"),
        }
        true
    }
}

impl Drop for TempAudioFile {
    fn drop(&mut self) {
        self.remove();
    }
}
