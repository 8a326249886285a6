//! Hearth Types - Pure type definitions shared by the transfer engine and server
//!
//! This crate contains only serde data types with no async runtime dependencies.

pub mod item;
pub mod message;
pub mod upload;

pub use item::*;
pub use message::*;
pub use upload::*;

/// Current time as milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
