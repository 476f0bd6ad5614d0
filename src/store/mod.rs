//! Storage ports consumed by the auth service.
//!
//! The service never talks to a database directly. It reads tenants through
//! [`AppProvider`], reads users through [`UserProvider`] and writes them
//! through [`UserSaver`]. Two implementations ship with the crate:
//!
//! - [`MemoryStore`]: DashMap-backed, for tests and local development
//! - `PostgresStore` (feature `postgres`): the production backend

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{App, OpaqueUserId, User};

mod memory;
#[cfg(feature = "postgres")]
mod postgres;

pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::{PostgresStore, SCHEMA};

/// Errors reported by store implementations.
///
/// `NotFound` and `AlreadyExists` are semantic outcomes the service maps to
/// client-visible errors; `Backend` is always a server fault.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Record not found")]
    NotFound,

    #[error("Record already exists")]
    AlreadyExists,

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Read access to local user records.
#[async_trait]
pub trait UserProvider: Send + Sync {
    /// Fetch the user keyed by `id`.
    async fn lookup(&self, id: &OpaqueUserId) -> StoreResult<User>;

    /// Whether the user keyed by `id` is an administrator.
    async fn is_admin(&self, id: &OpaqueUserId) -> StoreResult<bool>;
}

/// Write access to local user records.
#[async_trait]
pub trait UserSaver: Send + Sync {
    /// Insert a new user. Fails with `AlreadyExists` if `id` is taken.
    async fn save(&self, id: &OpaqueUserId, user: &User) -> StoreResult<()>;

    /// Stamp a successful login.
    async fn record_login(&self, id: &OpaqueUserId, at: DateTime<Utc>) -> StoreResult<()>;
}

/// Read access to registered tenants.
#[async_trait]
pub trait AppProvider: Send + Sync {
    /// Fetch the tenant with numeric id `service_id`.
    async fn get_app(&self, service_id: i64) -> StoreResult<App>;
}
