//! PostgreSQL store.
//!
//! Users are keyed by their opaque id in the `tgid` column, which carries a
//! unique constraint; a duplicate insert surfaces as SQLSTATE 23505 and is
//! reported as [`StoreError::AlreadyExists`]. Tenants live in `apps` and are
//! provisioned outside this service.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, NoTls, Row};

use super::{AppProvider, StoreError, StoreResult, UserProvider, UserSaver};
use crate::types::{App, OpaqueUserId, User};

/// Tables required by [`PostgresStore`].
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS apps (
    id      BIGINT PRIMARY KEY,
    name    TEXT NOT NULL,
    secret  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS users (
    id               BIGSERIAL PRIMARY KEY,
    tgid             TEXT NOT NULL UNIQUE,
    first_name       TEXT NOT NULL DEFAULT '',
    last_name        TEXT NOT NULL DEFAULT '',
    user_name        TEXT NOT NULL DEFAULT '',
    user_name_locale TEXT NOT NULL,
    last_login       TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    photo_url        TEXT NOT NULL DEFAULT '',
    is_admin         BOOLEAN NOT NULL DEFAULT FALSE,
    is_banned        BOOLEAN NOT NULL DEFAULT FALSE
);
"#;

const SELECT_USER: &str = "SELECT tgid, first_name, last_name, user_name, user_name_locale, \
     photo_url, is_admin, is_banned, last_login FROM users WHERE tgid = $1";

/// Store backed by a single PostgreSQL connection.
pub struct PostgresStore {
    client: Client,
}

impl PostgresStore {
    /// Connect to `database_url` and drive the connection on the runtime.
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let (client, connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .map_err(backend)?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!("PostgreSQL connection closed: {}", e);
            }
        });

        tracing::info!("Connected to PostgreSQL");
        Ok(Self { client })
    }

    /// Create the tables if they do not exist.
    pub async fn migrate(&self) -> StoreResult<()> {
        self.client.batch_execute(SCHEMA).await.map_err(backend)
    }
}

#[async_trait]
impl UserProvider for PostgresStore {
    async fn lookup(&self, id: &OpaqueUserId) -> StoreResult<User> {
        let row = self
            .client
            .query_opt(SELECT_USER, &[&id.as_str()])
            .await
            .map_err(backend)?
            .ok_or(StoreError::NotFound)?;

        user_from_row(&row)
    }

    async fn is_admin(&self, id: &OpaqueUserId) -> StoreResult<bool> {
        let row = self
            .client
            .query_opt("SELECT is_admin FROM users WHERE tgid = $1", &[&id.as_str()])
            .await
            .map_err(backend)?
            .ok_or(StoreError::NotFound)?;

        row.try_get("is_admin").map_err(backend)
    }
}

#[async_trait]
impl UserSaver for PostgresStore {
    async fn save(&self, id: &OpaqueUserId, user: &User) -> StoreResult<()> {
        let result = self
            .client
            .execute(
                "INSERT INTO users (tgid, first_name, last_name, user_name, user_name_locale, \
                 last_login, photo_url, is_admin, is_banned) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
                &[
                    &id.as_str(),
                    &user.first_name,
                    &user.last_name,
                    &user.username,
                    &user.user_name_locale,
                    &user.last_login,
                    &user.photo_url,
                    &user.is_admin,
                    &user.is_banned,
                ],
            )
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if e.code() == Some(&SqlState::UNIQUE_VIOLATION) => Err(StoreError::AlreadyExists),
            Err(e) => Err(backend(e)),
        }
    }

    async fn record_login(&self, id: &OpaqueUserId, at: DateTime<Utc>) -> StoreResult<()> {
        let updated = self
            .client
            .execute(
                "UPDATE users SET last_login = $2 WHERE tgid = $1",
                &[&id.as_str(), &at],
            )
            .await
            .map_err(backend)?;

        if updated == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

#[async_trait]
impl AppProvider for PostgresStore {
    async fn get_app(&self, service_id: i64) -> StoreResult<App> {
        let row = self
            .client
            .query_opt("SELECT id, name, secret FROM apps WHERE id = $1", &[&service_id])
            .await
            .map_err(backend)?
            .ok_or(StoreError::NotFound)?;

        Ok(App {
            id: row.try_get("id").map_err(backend)?,
            name: row.try_get("name").map_err(backend)?,
            secret: row.try_get("secret").map_err(backend)?,
        })
    }
}

fn user_from_row(row: &Row) -> StoreResult<User> {
    let tgid: String = row.try_get("tgid").map_err(backend)?;
    Ok(User {
        id: OpaqueUserId::new(tgid),
        first_name: row.try_get("first_name").map_err(backend)?,
        last_name: row.try_get("last_name").map_err(backend)?,
        username: row.try_get("user_name").map_err(backend)?,
        user_name_locale: row.try_get("user_name_locale").map_err(backend)?,
        photo_url: row.try_get("photo_url").map_err(backend)?,
        is_admin: row.try_get("is_admin").map_err(backend)?,
        is_banned: row.try_get("is_banned").map_err(backend)?,
        last_login: row.try_get("last_login").map_err(backend)?,
    })
}

fn backend(err: tokio_postgres::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}
