//! Storage traits for persistence

use crate::Result;
use async_trait::async_trait;
use hearth_types::TransferItem;

/// Whole-document persistence for the transfer index
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Load the persisted collection, newest first. A missing document is empty.
    async fn load(&self) -> Result<Vec<TransferItem>>;

    /// Replace the persisted collection with `items`.
    async fn save(&self, items: &[TransferItem]) -> Result<()>;
}
