//! HTTP handlers

pub mod health;
pub mod transfer;
pub mod ws;

pub use health::health;
