//! In-memory store backed by DashMap.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{AppProvider, StoreError, StoreResult, UserProvider, UserSaver};
use crate::types::{App, OpaqueUserId, User};

/// Thread-safe store keeping users and tenants in memory.
///
/// Implements every storage port. Data is lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    users: DashMap<OpaqueUserId, User>,
    apps: DashMap<i64, App>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with tenants.
    pub fn with_apps(apps: impl IntoIterator<Item = App>) -> Self {
        let store = Self::new();
        for app in apps {
            store.insert_app(app);
        }
        store
    }

    /// Register or replace a tenant.
    pub fn insert_app(&self, app: App) {
        self.apps.insert(app.id, app);
    }

    /// Apply `f` to a stored user. Returns `NotFound` if absent.
    pub fn update_user(&self, id: &OpaqueUserId, f: impl FnOnce(&mut User)) -> StoreResult<()> {
        let mut user = self.users.get_mut(id).ok_or(StoreError::NotFound)?;
        f(user.value_mut());
        Ok(())
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn app_count(&self) -> usize {
        self.apps.len()
    }
}

#[async_trait]
impl UserProvider for MemoryStore {
    async fn lookup(&self, id: &OpaqueUserId) -> StoreResult<User> {
        self.users
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or(StoreError::NotFound)
    }

    async fn is_admin(&self, id: &OpaqueUserId) -> StoreResult<bool> {
        self.users
            .get(id)
            .map(|entry| entry.is_admin)
            .ok_or(StoreError::NotFound)
    }
}

#[async_trait]
impl UserSaver for MemoryStore {
    async fn save(&self, id: &OpaqueUserId, user: &User) -> StoreResult<()> {
        match self.users.entry(id.clone()) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists),
            Entry::Vacant(slot) => {
                slot.insert(user.clone());
                Ok(())
            }
        }
    }

    async fn record_login(&self, id: &OpaqueUserId, at: DateTime<Utc>) -> StoreResult<()> {
        self.update_user(id, |user| user.last_login = at)
    }
}

#[async_trait]
impl AppProvider for MemoryStore {
    async fn get_app(&self, service_id: i64) -> StoreResult<App> {
        self.apps
            .get(&service_id)
            .map(|entry| entry.value().clone())
            .ok_or(StoreError::NotFound)
    }
}
