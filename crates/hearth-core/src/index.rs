//! Transfer index: the ordered, capacity-bounded list of text and file events
//!
//! The collection is one JSON document, read lazily on first access and
//! rewritten wholesale on every mutation. Mutations are serialized by a mutex
//! and the in-memory copy is only replaced after the new document has been
//! written, so a failed write leaves both at the previous state. The document
//! is owned by this process: concurrent writers from other processes would
//! overwrite each other.

use crate::atomic::AtomicWriter;
use crate::ports::IndexStore;
use crate::Result;
use async_trait::async_trait;
use hearth_types::{ListFilter, TransferItem};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Maximum number of items retained
pub const DEFAULT_CAPACITY: usize = 1000;

/// File name of the index document inside the data directory
pub const INDEX_FILE: &str = "transfer_index.json";

/// [`IndexStore`] backed by a JSON file written through [`AtomicWriter`]
pub struct JsonIndexStore {
    path: PathBuf,
    writer: AtomicWriter,
}

impl JsonIndexStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: AtomicWriter::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl IndexStore for JsonIndexStore {
    async fn load(&self) -> Result<Vec<TransferItem>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(Vec::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, items: &[TransferItem]) -> Result<()> {
        self.writer.write_json(&self.path, items).await
    }
}

/// Result of [`TransferIndex::append`]
#[derive(Debug, Clone)]
pub struct Appended {
    /// The item as stored (its timestamp may have been raised to keep order)
    pub item: TransferItem,
    /// Oldest items dropped to stay within capacity
    pub evicted: Vec<TransferItem>,
}

pub struct TransferIndex {
    store: Arc<dyn IndexStore>,
    capacity: usize,
    /// `None` until first access
    items: Mutex<Option<Vec<TransferItem>>>,
}

impl TransferIndex {
    pub fn new(store: Arc<dyn IndexStore>) -> Self {
        Self {
            store,
            capacity: DEFAULT_CAPACITY,
            items: Mutex::new(None),
        }
    }

    /// Index persisted as JSON at `path`
    pub fn open_json(path: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(JsonIndexStore::new(path)))
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Items matching `filter`, newest first, truncated to `limit`.
    pub async fn list(&self, filter: ListFilter, limit: Option<usize>) -> Result<Vec<TransferItem>> {
        let mut guard = self.items.lock().await;
        let current = self.loaded(&mut guard).await?;

        let mut items: Vec<TransferItem> = current
            .iter()
            .filter(|item| filter.matches(item))
            .cloned()
            .collect();
        sort_newest_first(&mut items);
        if let Some(limit) = limit {
            items.truncate(limit);
        }
        Ok(items)
    }

    pub async fn get(&self, id: &str) -> Result<Option<TransferItem>> {
        let mut guard = self.items.lock().await;
        let current = self.loaded(&mut guard).await?;
        Ok(current.iter().find(|item| item.id == id).cloned())
    }

    pub async fn len(&self) -> Result<usize> {
        let mut guard = self.items.lock().await;
        Ok(self.loaded(&mut guard).await?.len())
    }

    /// Insert `item` at the head and evict from the tail while over capacity.
    pub async fn append(&self, mut item: TransferItem) -> Result<Appended> {
        let mut guard = self.items.lock().await;
        let mut next = self.loaded(&mut guard).await?.to_vec();

        if let Some(head) = next.first() {
            if item.timestamp < head.timestamp {
                item.timestamp = head.timestamp;
            }
        }
        next.insert(0, item.clone());
        let evicted = if next.len() > self.capacity {
            next.split_off(self.capacity)
        } else {
            Vec::new()
        };

        self.store.save(&next).await?;
        *guard = Some(next);

        if !evicted.is_empty() {
            info!("Transfer index at capacity, evicted {} item(s)", evicted.len());
        }
        debug!("Appended transfer item {} ({:?})", item.id, item.kind());
        Ok(Appended { item, evicted })
    }

    /// Remove the item with `id`. Removing an unknown id is not an error.
    pub async fn remove(&self, id: &str) -> Result<Option<TransferItem>> {
        let mut guard = self.items.lock().await;
        let current = self.loaded(&mut guard).await?;

        let Some(pos) = current.iter().position(|item| item.id == id) else {
            debug!("Remove of unknown transfer item {} ignored", id);
            return Ok(None);
        };

        let mut next = current.to_vec();
        let removed = next.remove(pos);
        self.store.save(&next).await?;
        *guard = Some(next);

        debug!("Removed transfer item {}", id);
        Ok(Some(removed))
    }

    async fn loaded<'a>(&self, slot: &'a mut Option<Vec<TransferItem>>) -> Result<&'a [TransferItem]> {
        if slot.is_none() {
            let mut items = self.store.load().await?;
            sort_newest_first(&mut items);
            items.truncate(self.capacity);
            info!("Transfer index loaded: {} item(s)", items.len());
            *slot = Some(items);
        }
        Ok(slot.as_deref().unwrap_or_default())
    }
}

/// Stable, so equal timestamps keep their stored order
fn sort_newest_first(items: &mut [TransferItem]) {
    items.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
}
