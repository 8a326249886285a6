//! Chunk store for resumable uploads
//!
//! Every upload session owns one directory under the store root:
//!
//! ```text
//! <root>/<upload_id>/meta.json
//! <root>/<upload_id>/0.chunk
//! <root>/<upload_id>/1.chunk
//! ```
//!
//! Chunks may arrive in any order and any number of times; the last write of
//! an index wins. Completion merges chunks in index order into a temp file
//! next to the destination and renames it into place before the session
//! directory is removed, so a failed or interrupted merge can be retried.

use crate::atomic::{temp_sibling, AtomicWriter};
use crate::paths::sanitize_file_name;
use crate::{Result, TransferError};
use dashmap::DashSet;
use hearth_types::{now_millis, UploadMeta};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Metadata sidecar inside each session directory
pub const META_FILE: &str = "meta.json";

const CHUNK_EXT: &str = "chunk";

/// Default chunk size: 2 MiB
pub const DEFAULT_CHUNK_SIZE: u64 = 2 * 1024 * 1024;

/// Largest chunk size a client may negotiate: 32 MiB
pub const MAX_CHUNK_SIZE: u64 = 32 * 1024 * 1024;

/// Parameters of a new upload session
#[derive(Debug, Clone)]
pub struct BeginUpload {
    pub file_name: String,
    pub size: u64,
    pub mime: String,
    /// `None` selects the store default
    pub chunk_size: Option<u64>,
    pub sender: String,
    /// Client-chosen key identifying the same file across retries
    pub file_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UploadTicket {
    pub meta: UploadMeta,
    /// Chunk indices already stored, ascending
    pub uploaded: Vec<u64>,
    pub resumed: bool,
}

#[derive(Debug, Clone)]
pub struct CompletedUpload {
    /// Final location of the merged artifact
    pub path: PathBuf,
    pub artifact_name: String,
    /// Bytes actually merged
    pub size: u64,
    pub meta: UploadMeta,
}

pub struct ChunkStore {
    root: PathBuf,
    writer: AtomicWriter,
    default_chunk_size: u64,
    max_chunk_size: u64,
    /// Sessions with a merge in flight
    completing: DashSet<String>,
}

impl ChunkStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            writer: AtomicWriter::new(),
            default_chunk_size: DEFAULT_CHUNK_SIZE,
            max_chunk_size: MAX_CHUNK_SIZE,
            completing: DashSet::new(),
        })
    }

    pub fn with_chunk_limits(mut self, default_chunk_size: u64, max_chunk_size: u64) -> Self {
        self.max_chunk_size = max_chunk_size.max(1);
        self.default_chunk_size = default_chunk_size.clamp(1, self.max_chunk_size);
        self
    }

    pub fn with_writer(mut self, writer: AtomicWriter) -> Self {
        self.writer = writer;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_chunk_size(&self) -> u64 {
        self.max_chunk_size
    }

    /// Allocate a session directory and persist its metadata, or resume a
    /// matching in-flight session when `file_key` is given.
    pub async fn begin_upload(&self, req: BeginUpload) -> Result<UploadTicket> {
        if req.file_name.trim().is_empty() {
            return Err(TransferError::Validation("fileName is required".into()));
        }
        let chunk_size = match req.chunk_size {
            None => self.default_chunk_size,
            Some(0) => {
                return Err(TransferError::Validation(
                    "chunkSize must be greater than zero".into(),
                ))
            }
            Some(n) => n.min(self.max_chunk_size),
        };
        let file_key = req.file_key.filter(|k| !k.is_empty());

        if let Some(key) = file_key.as_deref() {
            if let Some(meta) = self
                .find_resumable(key, &req.sender, req.size, chunk_size)
                .await?
            {
                let uploaded = self.uploaded_chunks(&meta.upload_id).await?;
                info!(
                    "Resuming upload {} ({}): {}/{} chunks present",
                    meta.upload_id,
                    meta.file_name,
                    uploaded.len(),
                    meta.total_chunks()
                );
                return Ok(UploadTicket {
                    meta,
                    uploaded,
                    resumed: true,
                });
            }
        }

        let meta = UploadMeta {
            upload_id: uuid::Uuid::new_v4().to_string(),
            file_name: req.file_name,
            size: req.size,
            mime: req.mime,
            chunk_size,
            sender: req.sender,
            start_time: now_millis(),
            file_key,
        };

        let dir = self.root.join(&meta.upload_id);
        tokio::fs::create_dir(&dir).await?;
        if let Err(e) = self.writer.write_json(&dir.join(META_FILE), &meta).await {
            let _ = tokio::fs::remove_dir_all(&dir).await;
            return Err(e);
        }

        info!(
            "Upload {} started: name={}, size={}, chunks={}x{}, sender={}",
            meta.upload_id,
            meta.file_name,
            meta.size,
            meta.total_chunks(),
            meta.chunk_size,
            meta.sender
        );

        Ok(UploadTicket {
            meta,
            uploaded: Vec::new(),
            resumed: false,
        })
    }

    /// Metadata of an in-flight session.
    pub async fn meta(&self, upload_id: &str) -> Result<UploadMeta> {
        let dir = self.session_dir(upload_id)?;
        read_meta(&dir)
            .await?
            .ok_or_else(|| TransferError::SessionNotFound(upload_id.to_string()))
    }

    /// Store chunk `index`, replacing any earlier copy.
    pub async fn put_chunk(&self, upload_id: &str, index: u64, bytes: &[u8]) -> Result<()> {
        let meta = self.meta(upload_id).await?;
        let total = meta.total_chunks();
        if index >= total {
            return Err(TransferError::Validation(format!(
                "chunk index {index} out of range (total {total})"
            )));
        }

        let path = chunk_path(&self.session_dir(upload_id)?, index);
        match self.writer.write(&path, bytes).await {
            Ok(()) => {
                debug!(
                    "Upload {}: stored chunk {}/{} ({} bytes)",
                    upload_id,
                    index + 1,
                    total,
                    bytes.len()
                );
                Ok(())
            }
            // Directory removed under us by a completion or sweep
            Err(TransferError::Io(e)) if e.kind() == ErrorKind::NotFound => {
                Err(TransferError::SessionNotFound(upload_id.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    /// Indices of the chunks currently on disk, ascending.
    pub async fn uploaded_chunks(&self, upload_id: &str) -> Result<Vec<u64>> {
        let dir = self.session_dir(upload_id)?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(TransferError::SessionNotFound(upload_id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let mut indices = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if let Some(index) = parse_chunk_name(&name.to_string_lossy()) {
                indices.push(index);
            }
        }
        indices.sort_unstable();
        Ok(indices)
    }

    /// Merge and clean up in one step.
    pub async fn complete(&self, upload_id: &str, dest_dir: &Path) -> Result<CompletedUpload> {
        Ok(self.merge(upload_id, dest_dir).await?.finish().await)
    }

    /// Verify every chunk is present and merge them in index order into
    /// `dest_dir`. The session directory stays until the returned
    /// [`MergedUpload`] is finished; the session is busy until then.
    pub async fn merge(&self, upload_id: &str, dest_dir: &Path) -> Result<MergedUpload<'_>> {
        let dir = self.session_dir(upload_id)?;
        let guard = CompletionGuard::acquire(&self.completing, upload_id)?;

        let meta = self.meta(upload_id).await?;
        let total = meta.total_chunks();

        for index in 0..total {
            match tokio::fs::metadata(chunk_path(&dir, index)).await {
                Ok(m) if m.is_file() => {}
                Ok(_) => return Err(TransferError::MissingChunk(index)),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    return Err(TransferError::MissingChunk(index))
                }
                Err(e) => return Err(e.into()),
            }
        }

        let artifact_name = format!("{}_{}", meta.upload_id, sanitize_file_name(&meta.file_name));
        let dest = dest_dir.join(&artifact_name);
        let tmp = temp_sibling(&dest, "partial")?;

        let size = match merge_chunks(&dir, total, &tmp).await {
            Ok(size) => size,
            Err(e) => {
                let _ = tokio::fs::remove_file(&tmp).await;
                warn!("Upload {}: merge failed, chunks kept: {}", upload_id, e);
                return Err(e);
            }
        };
        self.writer.replace(&tmp, &dest).await?;

        if size != meta.size {
            warn!(
                "Upload {}: declared size {} but merged {} bytes",
                upload_id, meta.size, size
            );
        }
        debug!("Upload {}: merged {} chunks into {}", upload_id, total, dest.display());

        Ok(MergedUpload {
            upload: CompletedUpload {
                path: dest,
                artifact_name,
                size,
                meta,
            },
            session_dir: dir,
            _guard: guard,
        })
    }

    /// Drop an in-flight session. Returns `false` if it did not exist.
    pub async fn abandon(&self, upload_id: &str) -> Result<bool> {
        let dir = self.session_dir(upload_id)?;
        let _guard = CompletionGuard::acquire(&self.completing, upload_id)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                info!("Upload {} abandoned", upload_id);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove sessions started more than `max_age` ago. Returns how many.
    pub async fn sweep_expired(&self, max_age: Duration) -> Result<usize> {
        let cutoff = now_millis() - i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX);
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        let mut removed = 0;

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let upload_id = entry.file_name().to_string_lossy().into_owned();
            // Held until the directory is gone; a merge in flight wins
            let Ok(_guard) = CompletionGuard::acquire(&self.completing, &upload_id) else {
                debug!("Skipping sweep of busy upload session {}", upload_id);
                continue;
            };

            let started = match read_meta(&entry.path()).await {
                Ok(Some(meta)) => meta.start_time,
                // No readable metadata: fall back to the directory mtime
                _ => dir_mtime_millis(&entry.path()).await.unwrap_or(i64::MIN),
            };
            if started >= cutoff {
                continue;
            }

            match tokio::fs::remove_dir_all(entry.path()).await {
                Ok(()) => {
                    info!("Swept expired upload session {}", upload_id);
                    removed += 1;
                }
                Err(e) => warn!("Failed to sweep upload session {}: {}", upload_id, e),
            }
        }

        Ok(removed)
    }

    async fn find_resumable(
        &self,
        file_key: &str,
        sender: &str,
        size: u64,
        chunk_size: u64,
    ) -> Result<Option<UploadMeta>> {
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        let mut best: Option<UploadMeta> = None;

        while let Some(entry) = entries.next_entry().await? {
            let Ok(Some(meta)) = read_meta(&entry.path()).await else {
                continue;
            };
            let matches = meta.file_key.as_deref() == Some(file_key)
                && meta.sender == sender
                && meta.size == size
                && meta.chunk_size == chunk_size;
            if matches && best.as_ref().map_or(true, |b| meta.start_time > b.start_time) {
                best = Some(meta);
            }
        }

        Ok(best)
    }

    fn session_dir(&self, upload_id: &str) -> Result<PathBuf> {
        // Upload ids are always UUIDs; anything else cannot name a session
        uuid::Uuid::parse_str(upload_id)
            .map_err(|_| TransferError::SessionNotFound(upload_id.to_string()))?;
        Ok(self.root.join(upload_id))
    }
}

/// A merged artifact whose session directory is still on disk
pub struct MergedUpload<'a> {
    upload: CompletedUpload,
    session_dir: PathBuf,
    _guard: CompletionGuard<'a>,
}

impl MergedUpload<'_> {
    pub fn upload(&self) -> &CompletedUpload {
        &self.upload
    }

    /// Remove the session directory; the merge is final.
    pub async fn finish(self) -> CompletedUpload {
        let upload_id = &self.upload.meta.upload_id;
        if let Err(e) = tokio::fs::remove_dir_all(&self.session_dir).await {
            warn!(
                "Upload {}: merged but failed to remove session dir {}: {}",
                upload_id,
                self.session_dir.display(),
                e
            );
        }
        info!(
            "Upload {} complete: {} ({} bytes, {} chunks)",
            upload_id,
            self.upload.path.display(),
            self.upload.size,
            self.upload.meta.total_chunks()
        );
        self.upload
    }

    /// Drop the merged artifact and keep the chunks, so the session can be
    /// completed again.
    pub async fn discard(self) {
        match tokio::fs::remove_file(&self.upload.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Upload {}: failed to remove discarded artifact {}: {}",
                self.upload.meta.upload_id,
                self.upload.path.display(),
                e
            ),
        }
        info!(
            "Upload {}: merge discarded, chunks kept",
            self.upload.meta.upload_id
        );
    }
}

/// Marks a session as busy for the duration of a merge or removal
struct CompletionGuard<'a> {
    set: &'a DashSet<String>,
    upload_id: String,
}

impl<'a> CompletionGuard<'a> {
    fn acquire(set: &'a DashSet<String>, upload_id: &str) -> Result<Self> {
        if !set.insert(upload_id.to_string()) {
            return Err(TransferError::Conflict(format!(
                "upload {upload_id} is already being completed"
            )));
        }
        Ok(Self {
            set,
            upload_id: upload_id.to_string(),
        })
    }
}

impl Drop for CompletionGuard<'_> {
    fn drop(&mut self) {
        self.set.remove(&self.upload_id);
    }
}

fn chunk_path(dir: &Path, index: u64) -> PathBuf {
    dir.join(format!("{index}.{CHUNK_EXT}"))
}

fn parse_chunk_name(name: &str) -> Option<u64> {
    name.strip_suffix(CHUNK_EXT)?
        .strip_suffix('.')?
        .parse()
        .ok()
}

async fn read_meta(dir: &Path) -> Result<Option<UploadMeta>> {
    match tokio::fs::read(dir.join(META_FILE)).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn dir_mtime_millis(dir: &Path) -> Option<i64> {
    let modified = tokio::fs::metadata(dir).await.ok()?.modified().ok()?;
    let since_epoch = modified.duration_since(std::time::UNIX_EPOCH).ok()?;
    i64::try_from(since_epoch.as_millis()).ok()
}

/// Append chunks `0..total` of `dir` to a new file at `dest`, fsync it, and
/// return the number of bytes written.
async fn merge_chunks(dir: &Path, total: u64, dest: &Path) -> Result<u64> {
    let mut out = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(dest)
        .await?;

    let mut written = 0;
    for index in 0..total {
        let mut chunk = tokio::fs::File::open(chunk_path(dir, index)).await?;
        written += tokio::io::copy(&mut chunk, &mut out).await?;
    }
    out.flush().await?;
    out.sync_all().await?;
    Ok(written)
}
