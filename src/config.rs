//! Service configuration.
//!
//! Loaded from a TOML file, then overlaid with environment variables:
//!
//! | Variable              | Overrides                 |
//! |-----------------------|---------------------------|
//! | `SSO_BOT_TOKEN`       | `telegram.bot_token`      |
//! | `SSO_IDENTITY_SECRET` | `telegram.identity_secret`|
//! | `DATABASE_URL`        | `storage.database_url`    |
//! | `SSO_HTTP_PORT`       | `http.port`               |
//!
//! ```toml
//! env = "prod"
//!
//! [http]
//! bind = "0.0.0.0"
//! port = 8080
//!
//! [auth]
//! token_ttl_seconds = 18000
//! max_init_data_age_seconds = 86400
//!
//! [telegram]
//! bot_token = "123456:ABC"
//! identity_secret = "change-me"
//!
//! [storage]
//! backend = "memory"
//!
//! [[storage.apps]]
//! id = 1
//! name = "shop"
//! secret = "tenant-secret"
//! ```

use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::service::AuthConfig;
use crate::types::App;

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Deployment environment. Selects the log format and default verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Local,
    Dev,
    Prod,
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Local => write!(f, "local"),
            Environment::Dev => write!(f, "dev"),
            Environment::Prod => write!(f, "prod"),
        }
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Environment::Local),
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            other => Err(ConfigError::invalid(
                "env",
                format!("expected local, dev or prod, got {:?}", other),
            )),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub env: Environment,

    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub telegram: TelegramConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

/// HTTP listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl HttpConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.bind, self.port)
            .parse()
            .map_err(|e| ConfigError::invalid("http.bind", format!("{}", e)))
    }
}

/// Platform credentials.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Bot token the platform signs init data with
    pub bot_token: String,

    /// Secret the identity cipher key is derived from
    pub identity_secret: String,
}

impl fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_token", &"<redacted>")
            .field("identity_secret", &"<redacted>")
            .finish()
    }
}

/// Which store backs the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Postgres,
}

/// Storage selection and memory-backend seed data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,

    /// Connection string for the postgres backend
    pub database_url: Option<String>,

    /// Tenants preloaded into the memory backend
    pub apps: Vec<App>,
}

impl Config {
    /// Read `path`, apply environment overrides and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        let mut config = Self::from_toml(&content)?;
        config.merge_with_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document without overrides or validation.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Overlay values from the process environment.
    pub fn merge_with_env(&mut self) -> Result<(), ConfigError> {
        self.merge_with(|key| std::env::var(key).ok())
    }

    /// Overlay values from `lookup`, keyed by environment variable name.
    pub fn merge_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup("SSO_BOT_TOKEN") {
            self.telegram.bot_token = token;
        }
        if let Some(secret) = lookup("SSO_IDENTITY_SECRET") {
            self.telegram.identity_secret = secret;
        }
        if let Some(url) = lookup("DATABASE_URL") {
            self.storage.database_url = Some(url);
        }
        if let Some(port) = lookup("SSO_HTTP_PORT") {
            self.http.port = port
                .parse()
                .map_err(|_| ConfigError::invalid("SSO_HTTP_PORT", format!("not a port: {:?}", port)))?;
        }
        Ok(())
    }

    /// Reject configurations the service cannot start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.telegram.bot_token.trim().is_empty() {
            return Err(ConfigError::invalid("telegram.bot_token", "must be set"));
        }
        if self.telegram.identity_secret.trim().is_empty() {
            return Err(ConfigError::invalid("telegram.identity_secret", "must be set"));
        }
        check_duration("auth.token_ttl_seconds", self.auth.token_ttl_seconds)?;
        check_duration(
            "auth.max_init_data_age_seconds",
            self.auth.max_init_data_age_seconds,
        )?;
        if self.storage.backend == StorageBackend::Postgres
            && self.storage.database_url.as_deref().is_none_or(|url| url.is_empty())
        {
            return Err(ConfigError::invalid(
                "storage.database_url",
                "required for the postgres backend",
            ));
        }
        for app in &self.storage.apps {
            if app.id <= 0 {
                return Err(ConfigError::invalid("storage.apps", format!("invalid id {}", app.id)));
            }
            if app.secret.is_empty() {
                return Err(ConfigError::invalid(
                    "storage.apps",
                    format!("app {} has an empty secret", app.id),
                ));
            }
        }
        self.http.socket_addr()?;
        Ok(())
    }
}

/// Upper bound for every configured duration: ten years.
pub const MAX_DURATION_SECONDS: i64 = 10 * 365 * 86_400;

fn check_duration(key: &'static str, seconds: i64) -> Result<(), ConfigError> {
    if seconds <= 0 {
        return Err(ConfigError::invalid(key, "must be positive"));
    }
    if seconds > MAX_DURATION_SECONDS {
        return Err(ConfigError::invalid(
            key,
            format!("must be at most {} seconds", MAX_DURATION_SECONDS),
        ));
    }
    Ok(())
}
