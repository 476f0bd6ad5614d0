//! Auth service: the login, registration and admin-check flows.
//!
//! Each operation is a single linear pipeline with no state carried between
//! calls:
//!
//! ```text
//! init data ─▶ verify signature + freshness ─▶ platform user
//!           ─▶ encrypt id (opaque id) ─▶ user store ─▶ mint tenant token
//! ```
//!
//! Every step returns a typed error and the pipeline stops at the first
//! failure; nothing is retried.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::cipher::IdentityCipher;
use crate::error::{AuthError, AuthResult};
use crate::init_data::{InitDataVerifier, DEFAULT_MAX_AGE_SECONDS};
use crate::store::{AppProvider, StoreError, UserProvider, UserSaver};
use crate::token::{SessionClaims, TokenIssuer, DEFAULT_TOKEN_TTL_SECONDS};
use crate::types::{App, OpaqueUserId, PlatformUser, User, UserProfile};

/// Tunables for the auth service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Session token TTL in seconds (default: 18000 = 5 hours)
    pub token_ttl_seconds: i64,

    /// Maximum init data age in seconds (default: 86400 = 24 hours)
    pub max_init_data_age_seconds: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_ttl_seconds: DEFAULT_TOKEN_TTL_SECONDS,
            max_init_data_age_seconds: DEFAULT_MAX_AGE_SECONDS,
        }
    }
}

impl AuthConfig {
    pub fn token_ttl(&self) -> AuthResult<Duration> {
        seconds("token_ttl_seconds", self.token_ttl_seconds)
    }

    pub fn max_init_data_age(&self) -> AuthResult<Duration> {
        seconds("max_init_data_age_seconds", self.max_init_data_age_seconds)
    }
}

fn seconds(key: &str, value: i64) -> AuthResult<Duration> {
    Duration::try_seconds(value)
        .ok_or_else(|| AuthError::Internal(format!("{} out of range: {}", key, value)))
}

/// Result of a successful login.
#[derive(Debug, Clone, Serialize)]
pub struct LoginOutcome {
    pub token: String,
    pub user: UserProfile,
}

/// Coordinates verification, pseudonymization, storage and token issuance.
///
/// Holds only immutable state after construction. Share it behind an `Arc`.
pub struct AuthService {
    users: Arc<dyn UserProvider>,
    saver: Arc<dyn UserSaver>,
    apps: Arc<dyn AppProvider>,
    cipher: IdentityCipher,
    verifier: InitDataVerifier,
    issuer: TokenIssuer,
    config: AuthConfig,
}

impl AuthService {
    /// Create a service over three separate ports.
    pub fn new(
        users: Arc<dyn UserProvider>,
        saver: Arc<dyn UserSaver>,
        apps: Arc<dyn AppProvider>,
        cipher: IdentityCipher,
        verifier: InitDataVerifier,
        config: AuthConfig,
    ) -> Self {
        Self {
            users,
            saver,
            apps,
            cipher,
            verifier,
            issuer: TokenIssuer::new(),
            config,
        }
    }

    /// Create a service over a single store implementing every port.
    pub fn with_store<S>(
        store: Arc<S>,
        cipher: IdentityCipher,
        verifier: InitDataVerifier,
        config: AuthConfig,
    ) -> Self
    where
        S: UserProvider + UserSaver + AppProvider + 'static,
    {
        Self::new(store.clone(), store.clone(), store, cipher, verifier, config)
    }

    /// Get the configuration.
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Log in an existing user for `service_id`.
    ///
    /// Stamps the last-login time and returns the user's profile with a
    /// token scoped to the tenant.
    pub async fn validate_user(&self, init_data: &str, service_id: i64) -> AuthResult<LoginOutcome> {
        const OP: &str = "auth.validate_user";
        require_present(init_data, "init data")?;
        require_service_id(service_id)?;
        let ttl = self.config.token_ttl()?;

        let platform_user = self.verify(init_data, OP)?;
        let app = self.app(service_id, OP).await?;
        let opaque_id = self.cipher.encrypt(platform_user.id);

        let user = match self.users.lookup(&opaque_id).await {
            Ok(user) => user,
            Err(StoreError::NotFound) => {
                tracing::info!(op = OP, service_id, "user not registered");
                return Err(AuthError::UserNotFound);
            }
            Err(e) => return Err(internal(OP, e)),
        };

        if user.is_banned {
            tracing::warn!(op = OP, service_id, user = %opaque_id, "banned user attempted login");
            return Err(AuthError::UserBanned);
        }

        match self.saver.record_login(&opaque_id, Utc::now()).await {
            Ok(()) => {}
            Err(StoreError::NotFound) => return Err(AuthError::UserNotFound),
            Err(e) => return Err(internal(OP, e)),
        }

        let token = self.issuer.mint(&opaque_id, &app, ttl)?;
        tracing::info!(op = OP, service_id, user = %opaque_id, "user logged in");

        Ok(LoginOutcome {
            token,
            user: user.profile(),
        })
    }

    /// Register a new user and return a token scoped to `service_id`.
    pub async fn register_user(
        &self,
        init_data: &str,
        user_name_locale: &str,
        service_id: i64,
    ) -> AuthResult<String> {
        const OP: &str = "auth.register_user";
        require_present(init_data, "init data")?;
        require_present(user_name_locale, "user name locale")?;
        require_service_id(service_id)?;
        let ttl = self.config.token_ttl()?;

        let platform_user = self.verify(init_data, OP)?;
        let opaque_id = self.cipher.encrypt(platform_user.id);
        let user = User::register(opaque_id.clone(), &platform_user, user_name_locale, Utc::now());

        match self.saver.save(&opaque_id, &user).await {
            Ok(()) => {}
            Err(StoreError::AlreadyExists) => {
                tracing::info!(op = OP, service_id, user = %opaque_id, "user already registered");
                return Err(AuthError::UserAlreadyExists);
            }
            Err(e) => return Err(internal(OP, e)),
        }
        tracing::info!(op = OP, service_id, user = %opaque_id, "user registered");

        let app = self.app(service_id, OP).await?;
        self.issuer.mint(&opaque_id, &app, ttl)
    }

    /// Whether the user behind `init_data` is an administrator.
    pub async fn is_admin(&self, init_data: &str) -> AuthResult<bool> {
        const OP: &str = "auth.is_admin";
        require_present(init_data, "init data")?;

        let platform_user = self.verify(init_data, OP)?;
        let opaque_id = self.cipher.encrypt(platform_user.id);

        match self.users.is_admin(&opaque_id).await {
            Ok(is_admin) => Ok(is_admin),
            Err(StoreError::NotFound) => {
                tracing::info!(op = OP, "user not registered");
                Err(AuthError::UserNotFound)
            }
            Err(e) => Err(internal(OP, e)),
        }
    }

    /// Check a session token on behalf of tenant `service_id`.
    pub async fn validate_token(&self, token: &str, service_id: i64) -> AuthResult<SessionClaims> {
        const OP: &str = "auth.validate_token";
        require_present(token, "token")?;
        require_service_id(service_id)?;

        let app = self.app(service_id, OP).await?;
        self.issuer.validate_for_tenant(token, &app)
    }

    /// Opaque id the service derives for a platform user.
    pub fn opaque_id(&self, platform_id: i64) -> OpaqueUserId {
        self.cipher.encrypt(platform_id)
    }

    fn verify(&self, init_data: &str, op: &'static str) -> AuthResult<PlatformUser> {
        let user = self
            .config
            .max_init_data_age()
            .and_then(|max_age| self.verifier.validate(init_data, max_age))
            .and_then(|data| data.user());

        match &user {
            Err(e) if e.is_verification_failure() => {
                tracing::warn!(op, code = e.code(), "init data rejected: {}", e);
            }
            Err(e) => tracing::error!(op, code = e.code(), "init data check failed: {}", e),
            Ok(_) => {}
        }
        user
    }

    async fn app(&self, service_id: i64, op: &'static str) -> AuthResult<App> {
        match self.apps.get_app(service_id).await {
            Ok(app) => Ok(app),
            Err(StoreError::NotFound) => {
                tracing::warn!(op, service_id, "unknown service");
                Err(AuthError::UnknownTenant(service_id))
            }
            Err(e) => Err(internal(op, e)),
        }
    }
}

fn require_present(value: &str, name: &str) -> AuthResult<()> {
    if value.trim().is_empty() {
        return Err(AuthError::InvalidArgument(format!("{} is required", name)));
    }
    Ok(())
}

fn require_service_id(service_id: i64) -> AuthResult<()> {
    if service_id <= 0 {
        return Err(AuthError::InvalidArgument(format!(
            "unknown service id {}",
            service_id
        )));
    }
    Ok(())
}

fn internal(op: &'static str, err: StoreError) -> AuthError {
    tracing::error!(op, "store failure: {}", err);
    AuthError::Internal(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::init_data::sign_init_data;
    use crate::store::{MemoryStore, StoreResult};
    use async_trait::async_trait;
    use chrono::DateTime;

    const BOT_TOKEN: &str = "7000000000:unit-test-bot";

    fn init_data(platform_id: i64) -> String {
        let user = format!(r#"{{"id":{},"first_name":"Ada","username":"ada"}}"#, platform_id);
        let auth_date = Utc::now().timestamp().to_string();
        sign_init_data(&[("user", user.as_str()), ("auth_date", auth_date.as_str())], BOT_TOKEN).unwrap()
    }

    fn app() -> App {
        App {
            id: 1,
            name: "shop".to_string(),
            secret: "tenant-secret".to_string(),
        }
    }

    fn service_over(store: Arc<MemoryStore>) -> AuthService {
        AuthService::with_store(
            store,
            IdentityCipher::new("identity-secret"),
            InitDataVerifier::new(BOT_TOKEN).unwrap(),
            AuthConfig::default(),
        )
    }

    /// Store whose every call fails with a backend error.
    struct BrokenStore;

    #[async_trait]
    impl UserProvider for BrokenStore {
        async fn lookup(&self, _id: &OpaqueUserId) -> StoreResult<User> {
            Err(StoreError::Backend("connection reset".to_string()))
        }

        async fn is_admin(&self, _id: &OpaqueUserId) -> StoreResult<bool> {
            Err(StoreError::Backend("connection reset".to_string()))
        }
    }

    #[async_trait]
    impl UserSaver for BrokenStore {
        async fn save(&self, _id: &OpaqueUserId, _user: &User) -> StoreResult<()> {
            Err(StoreError::Backend("connection reset".to_string()))
        }

        async fn record_login(&self, _id: &OpaqueUserId, _at: DateTime<Utc>) -> StoreResult<()> {
            Err(StoreError::Backend("connection reset".to_string()))
        }
    }

    #[test]
    fn test_default_config() {
        let config = AuthConfig::default();
        assert_eq!(config.token_ttl().unwrap(), Duration::hours(5));
        assert_eq!(config.max_init_data_age().unwrap(), Duration::hours(24));
    }

    #[test]
    fn test_service_keeps_config() {
        let service = AuthService::with_store(
            Arc::new(MemoryStore::new()),
            IdentityCipher::new("identity-secret"),
            InitDataVerifier::new(BOT_TOKEN).unwrap(),
            AuthConfig {
                token_ttl_seconds: 60,
                max_init_data_age_seconds: 120,
            },
        );
        assert_eq!(service.config().token_ttl_seconds, 60);
        assert_eq!(service.config().max_init_data_age().unwrap(), Duration::minutes(2));
    }

    #[tokio::test]
    async fn test_out_of_range_ttl_is_internal() {
        for token_ttl_seconds in [10_000_000_000_000, i64::MAX] {
            let service = AuthService::with_store(
                Arc::new(MemoryStore::with_apps([app()])),
                IdentityCipher::new("identity-secret"),
                InitDataVerifier::new(BOT_TOKEN).unwrap(),
                AuthConfig {
                    token_ttl_seconds,
                    ..AuthConfig::default()
                },
            );

            let result = service.register_user(&init_data(5), "Ada", 1).await;
            assert!(matches!(result, Err(AuthError::Internal(_))));

            let result = service.validate_user(&init_data(5), 1).await;
            assert!(matches!(result, Err(AuthError::Internal(_))));
        }
    }

    #[tokio::test]
    async fn test_out_of_range_max_age_is_internal() {
        let service = AuthService::with_store(
            Arc::new(MemoryStore::with_apps([app()])),
            IdentityCipher::new("identity-secret"),
            InitDataVerifier::new(BOT_TOKEN).unwrap(),
            AuthConfig {
                max_init_data_age_seconds: i64::MAX,
                ..AuthConfig::default()
            },
        );

        let result = service.is_admin(&init_data(5)).await;
        assert!(matches!(result, Err(AuthError::Internal(_))));
    }

    #[tokio::test]
    async fn test_rejects_empty_arguments() {
        let service = service_over(Arc::new(MemoryStore::with_apps([app()])));

        let result = service.validate_user("", 1).await;
        assert!(matches!(result, Err(AuthError::InvalidArgument(_))));

        let result = service.validate_user(&init_data(1), 0).await;
        assert!(matches!(result, Err(AuthError::InvalidArgument(_))));

        let result = service.register_user(&init_data(1), "  ", 1).await;
        assert!(matches!(result, Err(AuthError::InvalidArgument(_))));

        let result = service.is_admin("").await;
        assert!(matches!(result, Err(AuthError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_backend_failures_are_internal() {
        let store = Arc::new(BrokenStore);
        let apps = Arc::new(MemoryStore::with_apps([app()]));
        let service = AuthService::new(
            store.clone(),
            store,
            apps,
            IdentityCipher::new("identity-secret"),
            InitDataVerifier::new(BOT_TOKEN).unwrap(),
            AuthConfig::default(),
        );

        let result = service.validate_user(&init_data(1), 1).await;
        assert!(matches!(result, Err(AuthError::Internal(_))));

        let result = service.register_user(&init_data(1), "Ada", 1).await;
        assert!(matches!(result, Err(AuthError::Internal(_))));

        let result = service.is_admin(&init_data(1)).await;
        assert!(matches!(result, Err(AuthError::Internal(_))));
    }

    #[tokio::test]
    async fn test_unknown_tenant_on_register_keeps_user() {
        let store = Arc::new(MemoryStore::new());
        let service = service_over(store.clone());

        let result = service.register_user(&init_data(5), "Ada", 9).await;
        assert!(matches!(result, Err(AuthError::UnknownTenant(9))));
        assert_eq!(store.user_count(), 1);
    }

    #[tokio::test]
    async fn test_validate_token_for_tenant() {
        let store = Arc::new(MemoryStore::with_apps([app()]));
        let service = service_over(store);

        let token = service.register_user(&init_data(5), "Ada", 1).await.unwrap();
        let claims = service.validate_token(&token, 1).await.unwrap();
        assert_eq!(claims.subject(), service.opaque_id(5));
        assert_eq!(claims.service_id, 1);

        let result = service.validate_token(&token, 2).await;
        assert!(matches!(result, Err(AuthError::UnknownTenant(2))));
    }
}
