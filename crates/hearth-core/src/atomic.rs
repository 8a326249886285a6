//! Durable write-then-replace for files holding mutable state
//!
//! A write lands in a uniquely named sibling temp file, is fsynced, and is then
//! renamed over the target, so readers observe either the previous content or
//! the complete new content. Renames that fail transiently (exclusive locks held
//! by scanners or concurrent readers on some platforms) are retried with a short
//! linear backoff before degrading to copy-then-delete, which is NOT atomic.

use crate::{Result, TransferError};
use serde::Serialize;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Rename attempts before falling back to copy
pub const DEFAULT_RENAME_ATTEMPTS: u32 = 5;

/// Base delay between rename attempts, multiplied by the attempt number
pub const DEFAULT_RENAME_BACKOFF: Duration = Duration::from_millis(20);

#[derive(Debug, Clone)]
pub struct AtomicWriter {
    attempts: u32,
    backoff: Duration,
}

impl Default for AtomicWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl AtomicWriter {
    pub fn new() -> Self {
        Self {
            attempts: DEFAULT_RENAME_ATTEMPTS,
            backoff: DEFAULT_RENAME_BACKOFF,
        }
    }

    pub fn with_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.backoff = backoff;
        self
    }

    /// Replace `path` with `bytes`, or leave it untouched on error.
    ///
    /// The parent directory must already exist; it is never created here so
    /// that writes into a removed session directory fail instead of
    /// resurrecting it.
    pub async fn write(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        self.stage(path, bytes).await?.commit().await
    }

    /// Serialize `value` as pretty JSON and [`write`](Self::write) it.
    pub async fn write_json<T: Serialize + ?Sized>(&self, path: &Path, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write(path, &bytes).await
    }

    /// Write `bytes` to a fresh temp file next to `path` without touching `path`.
    pub async fn stage(&self, path: &Path, bytes: &[u8]) -> Result<StagedWrite> {
        let tmp = temp_sibling(path, "tmp")?;

        let written = async {
            let mut file = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&tmp)
                .await?;
            file.write_all(bytes).await?;
            file.sync_all().await
        }
        .await;

        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        Ok(StagedWrite {
            tmp: Some(tmp),
            target: path.to_path_buf(),
            writer: self.clone(),
        })
    }

    /// Move a fully written temp file over `target`.
    pub async fn replace(&self, tmp: &Path, target: &Path) -> Result<()> {
        replace_with(tmp, target, self.attempts, self.backoff, |from, to| async move {
            tokio::fs::rename(from, to).await
        })
        .await
    }
}

/// A temp file waiting to be renamed over its target.
///
/// Dropping it without [`commit`](Self::commit) removes the temp file and
/// leaves the target as it was.
#[derive(Debug)]
pub struct StagedWrite {
    tmp: Option<PathBuf>,
    target: PathBuf,
    writer: AtomicWriter,
}

impl StagedWrite {
    pub fn temp_path(&self) -> Option<&Path> {
        self.tmp.as_deref()
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub async fn commit(mut self) -> Result<()> {
        match self.tmp.take() {
            Some(tmp) => self.writer.replace(&tmp, &self.target).await,
            None => Ok(()),
        }
    }
}

impl Drop for StagedWrite {
    fn drop(&mut self) {
        if let Some(tmp) = self.tmp.take() {
            let _ = std::fs::remove_file(tmp);
        }
    }
}

/// Unique hidden sibling of `path`: `.<name>.<uuid>.<suffix>`
pub(crate) fn temp_sibling(path: &Path, suffix: &str) -> Result<PathBuf> {
    let name = path
        .file_name()
        .ok_or_else(|| TransferError::InvalidPath(format!("no file name: {}", path.display())))?;
    let tmp_name = format!(
        ".{}.{}.{}",
        name.to_string_lossy(),
        uuid::Uuid::new_v4().simple(),
        suffix
    );
    Ok(path.with_file_name(tmp_name))
}

pub(crate) async fn replace_with<F, Fut>(
    tmp: &Path,
    target: &Path,
    attempts: u32,
    backoff: Duration,
    mut rename: F,
) -> Result<()>
where
    F: FnMut(PathBuf, PathBuf) -> Fut,
    Fut: Future<Output = io::Result<()>>,
{
    let attempts = attempts.max(1);
    let mut last_err = None;

    for attempt in 1..=attempts {
        match rename(tmp.to_path_buf(), target.to_path_buf()).await {
            Ok(()) => {
                sync_parent(target).await;
                return Ok(());
            }
            Err(e) => {
                debug!(
                    "Rename {} -> {} failed (attempt {}/{}): {}",
                    tmp.display(),
                    target.display(),
                    attempt,
                    attempts,
                    e
                );
                last_err = Some(e);
                if attempt < attempts {
                    tokio::time::sleep(backoff * attempt).await;
                }
            }
        }
    }

    warn!(
        "Rename into {} failed after {} attempts ({}), falling back to non-atomic copy",
        target.display(),
        attempts,
        last_err.map(|e| e.to_string()).unwrap_or_default()
    );

    let copied = async {
        tokio::fs::copy(tmp, target).await?;
        tokio::fs::File::open(target).await?.sync_all().await
    }
    .await;

    if let Err(e) = tokio::fs::remove_file(tmp).await {
        debug!("Failed to remove temp file {}: {}", tmp.display(), e);
    }

    copied.map_err(TransferError::from)
}

#[cfg(unix)]
async fn sync_parent(target: &Path) {
    if let Some(parent) = target.parent() {
        if let Ok(dir) = tokio::fs::File::open(parent).await {
            let _ = dir.sync_all().await;
        }
    }
}

#[cfg(not(unix))]
async fn sync_parent(_target: &Path) {}
