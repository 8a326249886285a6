//! Transfer service: the operations exposed to the HTTP layer
//!
//! Every mutation goes through [`TransferIndex`] first and is only published
//! once the index write has returned successfully.

use crate::chunks::{BeginUpload, ChunkStore};
use crate::index::{Appended, TransferIndex, INDEX_FILE};
use crate::paths::safe_join;
use crate::ports::EventPublisher;
use crate::{Result, TransferError};
use bytes::Bytes;
use hearth_types::{
    now_millis, InitUploadRequest, InitUploadResponse, ListFilter, TransferEvent, TransferItem,
    UploadStatusResponse,
};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Session directories live under `<data_dir>/chunks`
pub const CHUNKS_DIR: &str = "chunks";

/// Merged artifacts live under `<data_dir>/uploads`
pub const UPLOADS_DIR: &str = "uploads";

/// Public path prefix under which artifacts are served
pub const DEFAULT_FILE_URL_PREFIX: &str = "/api/v1/transfer/file";

const FALLBACK_MIME: &str = "application/octet-stream";

pub struct TransferService {
    chunks: ChunkStore,
    index: TransferIndex,
    uploads_dir: PathBuf,
    publisher: Arc<dyn EventPublisher>,
    file_url_prefix: String,
}

impl TransferService {
    pub async fn new(
        chunks: ChunkStore,
        index: TransferIndex,
        uploads_dir: impl Into<PathBuf>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Result<Self> {
        let uploads_dir = uploads_dir.into();
        tokio::fs::create_dir_all(&uploads_dir).await?;
        Ok(Self {
            chunks,
            index,
            uploads_dir,
            publisher,
            file_url_prefix: DEFAULT_FILE_URL_PREFIX.to_string(),
        })
    }

    /// Service with the default layout and limits under `data_dir`.
    pub async fn open(data_dir: &Path, publisher: Arc<dyn EventPublisher>) -> Result<Self> {
        let chunks = ChunkStore::open(data_dir.join(CHUNKS_DIR)).await?;
        let index = TransferIndex::open_json(data_dir.join(INDEX_FILE));
        Self::new(chunks, index, data_dir.join(UPLOADS_DIR), publisher).await
    }

    pub fn with_file_url_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.file_url_prefix = prefix.into().trim_end_matches('/').to_string();
        self
    }

    pub fn chunks(&self) -> &ChunkStore {
        &self.chunks
    }

    pub fn index(&self) -> &TransferIndex {
        &self.index
    }

    pub fn uploads_dir(&self) -> &Path {
        &self.uploads_dir
    }

    /// Record a pasted text.
    pub async fn submit_text(&self, sender: &str, text: &str) -> Result<TransferItem> {
        if text.trim().is_empty() {
            return Err(TransferError::Validation("text must not be empty".into()));
        }
        let item = TransferItem::text(sender, text, now_millis());
        self.commit(item).await
    }

    pub async fn upload_init(
        &self,
        sender: &str,
        req: InitUploadRequest,
    ) -> Result<InitUploadResponse> {
        let ticket = self
            .chunks
            .begin_upload(BeginUpload {
                file_name: req.file_name,
                size: req.size,
                mime: req.mime,
                chunk_size: req.chunk_size,
                sender: sender.to_string(),
                file_key: req.file_key,
            })
            .await?;

        Ok(InitUploadResponse {
            total_chunks: ticket.meta.total_chunks(),
            upload_id: ticket.meta.upload_id,
            chunk_size: ticket.meta.chunk_size,
            uploaded: ticket.uploaded,
        })
    }

    pub async fn upload_status(&self, upload_id: &str) -> Result<UploadStatusResponse> {
        let uploaded = self.chunks.uploaded_chunks(upload_id).await?;
        Ok(UploadStatusResponse {
            upload_id: upload_id.to_string(),
            uploaded,
        })
    }

    pub async fn put_chunk(&self, upload_id: &str, index: u64, bytes: Bytes) -> Result<()> {
        self.chunks.put_chunk(upload_id, index, &bytes).await
    }

    /// Merge a finished upload and record it as a file item. The chunks are
    /// only removed once the item is in the index.
    pub async fn upload_complete(&self, upload_id: &str) -> Result<TransferItem> {
        let merged = self.chunks.merge(upload_id, &self.uploads_dir).await?;
        let done = merged.upload();

        let mime = if done.meta.mime.trim().is_empty() {
            FALLBACK_MIME.to_string()
        } else {
            done.meta.mime.clone()
        };
        let url = format!("{}/{}", self.file_url_prefix, done.artifact_name);
        let item = TransferItem::file(
            done.meta.sender.as_str(),
            done.meta.file_name.as_str(),
            done.size,
            mime,
            url,
            now_millis(),
        );

        match self.commit(item).await {
            Ok(item) => {
                merged.finish().await;
                Ok(item)
            }
            Err(e) => {
                warn!("Upload {}: index write failed, chunks kept: {}", upload_id, e);
                merged.discard().await;
                Err(e)
            }
        }
    }

    /// Drop an in-flight upload. Unknown sessions are not an error.
    pub async fn abandon_upload(&self, upload_id: &str) -> Result<bool> {
        self.chunks.abandon(upload_id).await
    }

    pub async fn list(&self, filter: ListFilter, limit: Option<usize>) -> Result<Vec<TransferItem>> {
        self.index.list(filter, limit).await
    }

    /// Remove an item; repeated or unknown ids succeed with `None`.
    pub async fn delete_item(&self, id: &str) -> Result<Option<TransferItem>> {
        let Some(removed) = self.index.remove(id).await? else {
            return Ok(None);
        };

        info!("Transfer item {} deleted", id);
        self.publisher.publish(TransferEvent::Delete {
            id: removed.id.clone(),
        });
        self.unlink_artifact(&removed).await;
        Ok(Some(removed))
    }

    /// Path of a served artifact, validated before any filesystem access.
    pub async fn resolve_file(&self, file_name: &str) -> Result<PathBuf> {
        let path = safe_join(&self.uploads_dir, file_name)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            Ok(_) => Err(TransferError::FileNotFound(file_name.to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(TransferError::FileNotFound(file_name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remove upload sessions older than `ttl`.
    pub async fn sweep_expired(&self, ttl: Duration) -> Result<usize> {
        self.chunks.sweep_expired(ttl).await
    }

    /// Append, then publish. Evicted items are cleaned up and announced.
    async fn commit(&self, item: TransferItem) -> Result<TransferItem> {
        let Appended { item, evicted } = self.index.append(item).await?;

        self.publisher.publish(TransferEvent::Add { item: item.clone() });
        for old in evicted {
            self.publisher.publish(TransferEvent::Delete { id: old.id.clone() });
            self.unlink_artifact(&old).await;
        }
        Ok(item)
    }

    async fn unlink_artifact(&self, item: &TransferItem) {
        let Some(name) = item.artifact_name() else {
            return;
        };
        let path = match safe_join(&self.uploads_dir, name) {
            Ok(path) => path,
            Err(e) => {
                warn!("Item {} references an invalid artifact: {}", item.id, e);
                return;
            }
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!("Removed artifact {}", path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Artifact {} already gone", path.display())
            }
            Err(e) => warn!("Failed to remove artifact {}: {}", path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::IndexStore;
    use async_trait::async_trait;
    use hearth_types::TransferPayload;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;
    use tokio_test::{assert_err, assert_ok};

    #[derive(Default)]
    struct RecordingPublisher {
        events: Mutex<Vec<TransferEvent>>,
    }

    impl RecordingPublisher {
        fn take(&self) -> Vec<TransferEvent> {
            std::mem::take(&mut *self.events.lock().unwrap())
        }
    }

    impl EventPublisher for RecordingPublisher {
        fn publish(&self, event: TransferEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl IndexStore for BrokenStore {
        async fn load(&self) -> Result<Vec<TransferItem>> {
            Ok(Vec::new())
        }

        async fn save(&self, _items: &[TransferItem]) -> Result<()> {
            Err(TransferError::Io(std::io::Error::new(
                ErrorKind::PermissionDenied,
                "read-only filesystem",
            )))
        }
    }

    /// Fails every save until switched back on
    #[derive(Default)]
    struct SwitchableStore {
        failing: AtomicBool,
        items: Mutex<Vec<TransferItem>>,
    }

    #[async_trait]
    impl IndexStore for SwitchableStore {
        async fn load(&self) -> Result<Vec<TransferItem>> {
            Ok(self.items.lock().unwrap().clone())
        }

        async fn save(&self, items: &[TransferItem]) -> Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(TransferError::Io(std::io::Error::new(
                    ErrorKind::PermissionDenied,
                    "read-only filesystem",
                )));
            }
            *self.items.lock().unwrap() = items.to_vec();
            Ok(())
        }
    }

    async fn setup() -> (TempDir, TransferService, Arc<RecordingPublisher>) {
        let temp_dir = TempDir::new().unwrap();
        let publisher = Arc::new(RecordingPublisher::default());
        let service = TransferService::open(temp_dir.path(), publisher.clone())
            .await
            .unwrap();
        (temp_dir, service, publisher)
    }

    fn init(name: &str, size: u64, mime: &str, chunk_size: u64) -> InitUploadRequest {
        InitUploadRequest {
            file_name: name.to_string(),
            size,
            mime: mime.to_string(),
            file_key: None,
            chunk_size: Some(chunk_size),
        }
    }

    async fn upload(service: &TransferService, name: &str, mime: &str, data: &[u8]) -> TransferItem {
        let resp = service
            .upload_init("alice", init(name, data.len() as u64, mime, 4))
            .await
            .unwrap();
        for (i, chunk) in data.chunks(4).enumerate() {
            service
                .put_chunk(&resp.upload_id, i as u64, Bytes::copy_from_slice(chunk))
                .await
                .unwrap();
        }
        service.upload_complete(&resp.upload_id).await.unwrap()
    }

    #[tokio::test]
    async fn test_text_submit_list_delete() {
        let (_dir, service, publisher) = setup().await;
        let older = service.submit_text("bob", "earlier note").await.unwrap();
        let hello = service.submit_text("alice", "hello").await.unwrap();

        let items = service.list(ListFilter::All, None).await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, hello.id);
        assert_eq!(
            items[0].payload,
            TransferPayload::Text {
                content: "hello".into()
            }
        );
        assert_eq!(items[1].id, older.id);

        let removed = service.delete_item(&hello.id).await.unwrap();
        assert_eq!(removed.map(|i| i.id), Some(hello.id.clone()));
        let items = service.list(ListFilter::All, None).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, older.id);

        let events = publisher.take();
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[2], TransferEvent::Delete { id } if *id == hello.id));
    }

    #[tokio::test]
    async fn test_blank_text_rejected_without_side_effects() {
        let (_dir, service, publisher) = setup().await;
        let result = service.submit_text("alice", "  \n\t ").await;
        assert!(matches!(result, Err(TransferError::Validation(_))));
        assert!(publisher.take().is_empty());
        assert_eq!(service.index().len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_upload_becomes_file_item() {
        let (_dir, service, publisher) = setup().await;
        let item = upload(&service, "holiday photo.jpg", "image/jpeg", b"0123456789").await;

        let TransferPayload::File {
            name,
            size,
            mime,
            url,
        } = &item.payload
        else {
            panic!("expected a file item");
        };
        assert_eq!(name, "holiday photo.jpg");
        assert_eq!(*size, 10);
        assert_eq!(mime, "image/jpeg");
        assert!(url.starts_with("/api/v1/transfer/file/"));
        assert!(url.ends_with("_holiday_photo.jpg"));

        let artifact = item.artifact_name().unwrap();
        let path = service.resolve_file(artifact).await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"0123456789");

        assert_eq!(service.list(ListFilter::Photo, None).await.unwrap().len(), 1);
        assert!(matches!(
            publisher.take().as_slice(),
            [TransferEvent::Add { item: added }] if added.id == item.id
        ));
    }

    #[tokio::test]
    async fn test_missing_mime_defaults_to_octet_stream() {
        let (_dir, service, _publisher) = setup().await;
        let item = upload(&service, "blob", "", b"abc").await;
        assert!(matches!(
            &item.payload,
            TransferPayload::File { mime, .. } if mime == FALLBACK_MIME
        ));
    }

    #[tokio::test]
    async fn test_incomplete_upload_publishes_nothing() {
        let (_dir, service, publisher) = setup().await;
        let resp = service
            .upload_init("alice", init("a.bin", 12, "", 4))
            .await
            .unwrap();
        assert_eq!(resp.total_chunks, 3);
        service
            .put_chunk(&resp.upload_id, 0, Bytes::from_static(b"aaaa"))
            .await
            .unwrap();
        service
            .put_chunk(&resp.upload_id, 2, Bytes::from_static(b"cccc"))
            .await
            .unwrap();

        let result = service.upload_complete(&resp.upload_id).await;
        assert!(matches!(result, Err(TransferError::MissingChunk(1))));
        assert!(publisher.take().is_empty());

        let status = service.upload_status(&resp.upload_id).await.unwrap();
        assert_eq!(status.uploaded, vec![0, 2]);
    }

    #[tokio::test]
    async fn test_delete_file_item_unlinks_artifact() {
        let (_dir, service, _publisher) = setup().await;
        let item = upload(&service, "doc.pdf", "application/pdf", b"%PDF-1.7").await;
        let path = service.resolve_file(item.artifact_name().unwrap()).await.unwrap();

        assert_ok!(service.delete_item(&item.id).await);
        assert!(!path.exists());

        let again = service.delete_item(&item.id).await.unwrap();
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn test_eviction_cleans_up_and_announces() {
        let temp_dir = TempDir::new().unwrap();
        let publisher = Arc::new(RecordingPublisher::default());
        let chunks = ChunkStore::open(temp_dir.path().join(CHUNKS_DIR)).await.unwrap();
        let index = TransferIndex::open_json(temp_dir.path().join(INDEX_FILE)).with_capacity(1);
        let service = TransferService::new(
            chunks,
            index,
            temp_dir.path().join(UPLOADS_DIR),
            publisher.clone(),
        )
        .await
        .unwrap();

        let file = upload(&service, "old.txt", "text/plain", b"old").await;
        let path = service.resolve_file(file.artifact_name().unwrap()).await.unwrap();
        publisher.take();

        let text = service.submit_text("alice", "newer").await.unwrap();
        assert!(!path.exists());

        let events = publisher.take();
        assert!(matches!(&events[0], TransferEvent::Add { item } if item.id == text.id));
        assert!(matches!(&events[1], TransferEvent::Delete { id } if *id == file.id));
    }

    #[tokio::test]
    async fn test_failed_index_write_publishes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let publisher = Arc::new(RecordingPublisher::default());
        let chunks = ChunkStore::open(temp_dir.path().join(CHUNKS_DIR)).await.unwrap();
        let service = TransferService::new(
            chunks,
            TransferIndex::new(Arc::new(BrokenStore)),
            temp_dir.path().join(UPLOADS_DIR),
            publisher.clone(),
        )
        .await
        .unwrap();

        assert_err!(service.submit_text("alice", "hello").await);

        let resp = service
            .upload_init("alice", init("x.bin", 2, "", 4))
            .await
            .unwrap();
        service
            .put_chunk(&resp.upload_id, 0, Bytes::from_static(b"xy"))
            .await
            .unwrap();
        assert_err!(service.upload_complete(&resp.upload_id).await);

        assert!(publisher.take().is_empty());
        let leftovers = std::fs::read_dir(service.uploads_dir()).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_complete_retries_after_index_write_failure() {
        let temp_dir = TempDir::new().unwrap();
        let publisher = Arc::new(RecordingPublisher::default());
        let store = Arc::new(SwitchableStore::default());
        store.failing.store(true, Ordering::SeqCst);
        let chunks = ChunkStore::open(temp_dir.path().join(CHUNKS_DIR)).await.unwrap();
        let service = TransferService::new(
            chunks,
            TransferIndex::new(store.clone()),
            temp_dir.path().join(UPLOADS_DIR),
            publisher.clone(),
        )
        .await
        .unwrap();

        let resp = service
            .upload_init("alice", init("notes.txt", 6, "text/plain", 4))
            .await
            .unwrap();
        service
            .put_chunk(&resp.upload_id, 0, Bytes::from_static(b"abcd"))
            .await
            .unwrap();
        service
            .put_chunk(&resp.upload_id, 1, Bytes::from_static(b"ef"))
            .await
            .unwrap();

        let result = service.upload_complete(&resp.upload_id).await;
        assert!(matches!(result, Err(TransferError::Io(_))));
        assert!(publisher.take().is_empty());
        assert_eq!(std::fs::read_dir(service.uploads_dir()).unwrap().count(), 0);

        // Chunks survive, so the client can simply retry
        let status = service.upload_status(&resp.upload_id).await.unwrap();
        assert_eq!(status.uploaded, vec![0, 1]);

        store.failing.store(false, Ordering::SeqCst);
        let item = assert_ok!(service.upload_complete(&resp.upload_id).await);
        let path = service.resolve_file(item.artifact_name().unwrap()).await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"abcdef");
        assert_eq!(store.items.lock().unwrap().len(), 1);
        assert!(matches!(
            publisher.take().as_slice(),
            [TransferEvent::Add { item: added }] if added.id == item.id
        ));

        assert!(matches!(
            service.upload_status(&resp.upload_id).await,
            Err(TransferError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_resolve_file_validation() {
        let (_dir, service, _publisher) = setup().await;
        assert!(matches!(
            service.resolve_file("../transfer_index.json").await,
            Err(TransferError::InvalidPath(_))
        ));
        assert!(matches!(
            service.resolve_file("..").await,
            Err(TransferError::InvalidPath(_))
        ));
        assert!(matches!(
            service.resolve_file("missing.bin").await,
            Err(TransferError::FileNotFound(_))
        ));

        std::fs::create_dir(service.uploads_dir().join("subdir")).unwrap();
        assert!(matches!(
            service.resolve_file("subdir").await,
            Err(TransferError::FileNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_custom_url_prefix() {
        let (_dir, service, _publisher) = setup().await;
        let service = service.with_file_url_prefix("/files/");
        let item = upload(&service, "a.txt", "text/plain", b"a").await;
        let TransferPayload::File { url, .. } = &item.payload else {
            panic!("expected a file item");
        };
        assert!(url.starts_with("/files/"));
        assert!(!url.starts_with("/files//"));
    }
}
