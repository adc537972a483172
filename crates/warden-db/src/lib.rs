//! Warden Persistence Layer
//!
//! This crate holds the data model shared by the authentication core,
//! the store traits the core consumes, and two implementations of them:
//! a SQLite-backed [`Database`] (via sqlx) and an in-process [`MemoryStore`].

pub mod error;
pub mod memory;
pub mod models;
pub mod repository;
pub mod store;
pub mod utils;

pub use error::DbError;
pub use memory::MemoryStore;
pub use models::*;
pub use repository::Database;
pub use store::{AuditSink, PasswordResetStore, RefreshTokenStore, RoleStore, UserStore};

/// Re-export sqlx types for convenience
pub use sqlx::SqlitePool;
