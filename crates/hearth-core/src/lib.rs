//! Hearth transfer engine
//!
//! Resumable chunked uploads, a capacity-bounded transfer index persisted with
//! durable write-then-replace, and fan-out of index changes to live viewers.

// Re-export pure types from hearth-types
pub use hearth_types::*;

pub mod atomic;
pub mod broadcast;
pub mod chunks;
pub mod error;
pub mod index;
pub mod paths;
pub mod ports;
pub mod service;

pub use atomic::AtomicWriter;
pub use broadcast::{Broadcaster, Subscription};
pub use chunks::ChunkStore;
pub use error::{Result, TransferError};
pub use index::{JsonIndexStore, TransferIndex};
pub use service::TransferService;
