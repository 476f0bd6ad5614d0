//! Core types for the SSO pipeline.
//!
//! This module defines the records that flow between the verifier, the
//! identity cipher, the stores and the token issuer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pseudonymous user identifier.
///
/// Hex-encoded ciphertext of the platform user id. It is deterministic for a
/// given identity secret, which is what lets it serve as the lookup key for
/// local user records.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpaqueUserId(String);

impl OpaqueUserId {
    /// Wrap an already-derived identifier.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for OpaqueUserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for OpaqueUserId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// User record as delivered by the platform inside init data.
///
/// Only `id` is mandatory; the platform omits empty profile fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformUser {
    /// Numeric platform user id
    pub id: i64,

    #[serde(default)]
    pub first_name: String,

    #[serde(default)]
    pub last_name: String,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub photo_url: String,

    /// IETF language tag of the user's client, if sent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_code: Option<String>,
}

/// Local user record, keyed by [`OpaqueUserId`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: OpaqueUserId,
    pub first_name: String,
    pub last_name: String,
    pub username: String,

    /// Display name chosen by the user inside the service
    pub user_name_locale: String,

    pub photo_url: String,
    pub is_admin: bool,
    pub is_banned: bool,
    pub last_login: DateTime<Utc>,
}

impl User {
    /// Build a fresh, non-admin record from platform fields.
    pub fn register(
        id: OpaqueUserId,
        platform: &PlatformUser,
        user_name_locale: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            first_name: platform.first_name.clone(),
            last_name: platform.last_name.clone(),
            username: platform.username.clone(),
            user_name_locale: user_name_locale.into(),
            photo_url: platform.photo_url.clone(),
            is_admin: false,
            is_banned: false,
            last_login: now,
        }
    }

    /// Public view of this record.
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.id.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            username: self.username.clone(),
            user_name_locale: self.user_name_locale.clone(),
            photo_url: self.photo_url.clone(),
            is_banned: self.is_banned,
        }
    }
}

/// User data returned to clients after login.
///
/// Deliberately omits the admin flag and last-login timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: OpaqueUserId,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub user_name_locale: String,
    pub photo_url: String,
    pub is_banned: bool,
}

/// A client service (tenant) registered with its own signing secret.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct App {
    /// Numeric service id
    pub id: i64,

    pub name: String,

    /// HMAC key for this tenant's session tokens
    pub secret: String,
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("secret", &"<redacted>")
            .finish()
    }
}
