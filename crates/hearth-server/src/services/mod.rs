//! Server-side services

pub mod auth;
pub mod reaper;

pub use auth::AuthService;
