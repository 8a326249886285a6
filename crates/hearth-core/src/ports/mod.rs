//! Port traits (interfaces) for dependency injection

pub mod events;
pub mod storage;

pub use events::EventPublisher;
pub use storage::IndexStore;
