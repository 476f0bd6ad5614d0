//! # miniapp-sso
//!
//! Single sign-on for mini-apps embedded in a messaging platform.
//!
//! The platform hands every mini-app a signed *init data* string describing
//! the user. This crate turns that assertion into a session token scoped to
//! one tenant service:
//!
//! 1. **Verify** the init data signature and freshness ([`init_data`])
//! 2. **Pseudonymize** the platform user id so tenants never see it ([`cipher`])
//! 3. **Look up or register** the local user through storage ports ([`store`])
//! 4. **Mint** a token signed with the tenant's own secret ([`token`])
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use miniapp_sso::prelude::*;
//!
//! let store = Arc::new(MemoryStore::with_apps([App {
//!     id: 1,
//!     name: "shop".into(),
//!     secret: "tenant-secret".into(),
//! }]));
//!
//! let service = AuthService::with_store(
//!     store,
//!     IdentityCipher::new("identity-secret"),
//!     InitDataVerifier::new("123456:bot-token")?,
//!     AuthConfig::default(),
//! );
//!
//! let token = service.register_user(init_data, "en", 1).await?;
//! let login = service.validate_user(init_data, 1).await?;
//! ```
//!
//! ## Features
//!
//! - `http` (default): axum transport and the `sso` binary
//! - `postgres`: PostgreSQL store

pub mod cipher;
pub mod config;
pub mod error;
#[cfg(feature = "http")]
pub mod http;
pub mod init_data;
pub mod service;
pub mod store;
pub mod telemetry;
pub mod token;
pub mod types;

pub use cipher::IdentityCipher;
pub use config::{Config, ConfigError, Environment};
pub use error::{AuthError, AuthResult, ErrorKind};
pub use init_data::{sign_init_data, InitData, InitDataVerifier};
pub use service::{AuthConfig, AuthService, LoginOutcome};
pub use store::{AppProvider, MemoryStore, StoreError, StoreResult, UserProvider, UserSaver};
pub use token::{SessionClaims, TokenIssuer};
pub use types::{App, OpaqueUserId, PlatformUser, User, UserProfile};

#[cfg(feature = "http")]
pub use http::HttpServer;
#[cfg(feature = "postgres")]
pub use store::PostgresStore;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::cipher::IdentityCipher;
    pub use crate::error::{AuthError, AuthResult};
    pub use crate::init_data::{sign_init_data, InitDataVerifier};
    pub use crate::service::{AuthConfig, AuthService, LoginOutcome};
    pub use crate::store::{AppProvider, MemoryStore, UserProvider, UserSaver};
    pub use crate::token::{SessionClaims, TokenIssuer};
    pub use crate::types::{App, OpaqueUserId, PlatformUser, User, UserProfile};
}
