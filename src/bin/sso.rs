/// sso - mini-app single sign-on service
///
/// Usage:
///   sso serve --config sso.toml           - Start the HTTP API
///   sso encrypt <platform-id>             - Derive an opaque user id
///   sso decrypt <opaque-id>               - Recover a platform user id
///   sso sign-init-data --user-id <id>     - Produce signed init data for testing
///   sso check-config --config sso.toml    - Validate a config file
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use colored::*;
use miniapp_sso::config::{Config, StorageBackend};
use miniapp_sso::http::HttpServer;
use miniapp_sso::store::{AppProvider, MemoryStore, UserProvider, UserSaver};
use miniapp_sso::{sign_init_data, telemetry, AuthService, IdentityCipher, InitDataVerifier};
use tokio::signal;

/// Mini-app SSO
///
/// Verifies platform init data and issues tenant-scoped session tokens.
#[derive(Parser)]
#[command(name = "sso")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long, global = true, env = "CONFIG_PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve,

    /// Derive the opaque id for a platform user id
    ///
    /// Examples:
    ///   sso encrypt 12345 --secret my-identity-secret
    Encrypt {
        /// Platform user id
        platform_id: i64,

        /// Identity secret (falls back to the config file)
        #[arg(short, long, env = "SSO_IDENTITY_SECRET", hide_env_values = true)]
        secret: Option<String>,
    },

    /// Recover the platform user id behind an opaque id
    Decrypt {
        /// Opaque id (hex)
        opaque_id: String,

        /// Identity secret (falls back to the config file)
        #[arg(short, long, env = "SSO_IDENTITY_SECRET", hide_env_values = true)]
        secret: Option<String>,
    },

    /// Produce signed init data for local testing
    ///
    /// Examples:
    ///   sso sign-init-data --user-id 12345 --first-name Ada --bot-token 123:abc
    #[command(name = "sign-init-data")]
    SignInitData {
        /// Platform user id
        #[arg(long)]
        user_id: i64,

        #[arg(long, default_value = "")]
        first_name: String,

        #[arg(long, default_value = "")]
        last_name: String,

        #[arg(long, default_value = "")]
        username: String,

        /// Issue time as unix seconds (default: now)
        #[arg(long)]
        auth_date: Option<i64>,

        /// Bot token (falls back to the config file)
        #[arg(short, long, env = "SSO_BOT_TOKEN", hide_env_values = true)]
        bot_token: Option<String>,
    },

    /// Validate a config file
    #[command(name = "check-config")]
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve => {
            let config = load_config(cli.config.as_deref())?;
            run_http_server(config).await
        }

        Commands::Encrypt {
            platform_id,
            secret,
        } => {
            let secret = identity_secret(secret, cli.config.as_deref())?;
            let opaque_id = IdentityCipher::new(&secret).encrypt(platform_id);
            println!("{}", opaque_id);
            Ok(())
        }

        Commands::Decrypt { opaque_id, secret } => {
            let secret = identity_secret(secret, cli.config.as_deref())?;
            match IdentityCipher::new(&secret).decrypt(&opaque_id) {
                Ok(platform_id) => {
                    println!("{}", platform_id);
                    Ok(())
                }
                Err(e) => {
                    eprintln!("{}", "Error".red().bold());
                    eprintln!("  {}", e);
                    std::process::exit(1);
                }
            }
        }

        Commands::SignInitData {
            user_id,
            first_name,
            last_name,
            username,
            auth_date,
            bot_token,
        } => {
            let bot_token = match bot_token {
                Some(token) => token,
                None => load_config(cli.config.as_deref())?.telegram.bot_token,
            };
            let user = serde_json::json!({
                "id": user_id,
                "first_name": first_name,
                "last_name": last_name,
                "username": username,
            })
            .to_string();
            let auth_date = auth_date.unwrap_or_else(|| Utc::now().timestamp()).to_string();

            let init_data = sign_init_data(
                &[("user", user.as_str()), ("auth_date", auth_date.as_str())],
                &bot_token,
            )?;
            println!("{}", init_data);
            Ok(())
        }

        Commands::CheckConfig => {
            let config = load_config(cli.config.as_deref())?;

            println!("{}", "OK".green().bold());
            println!("  {} {}", "Env:".bright_white(), config.env);
            println!(
                "  {} {}:{}",
                "HTTP:".bright_white(),
                config.http.bind,
                config.http.port
            );
            println!("  {} {:?}", "Storage:".bright_white(), config.storage.backend);
            println!("  {} {}", "Apps:".bright_white(), config.storage.apps.len());
            println!(
                "  {} {}s",
                "Token TTL:".bright_white(),
                config.auth.token_ttl_seconds
            );
            Ok(())
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.context("No config file given (use --config or CONFIG_PATH)")?;
    Config::load(path).with_context(|| format!("Failed to load config from {}", path.display()))
}

fn identity_secret(secret: Option<String>, config: Option<&Path>) -> Result<String> {
    match secret {
        Some(secret) if !secret.is_empty() => Ok(secret),
        _ => Ok(load_config(config)?.telegram.identity_secret),
    }
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    println!();
    println!("{}", "Shutting down...".yellow());
}

type Ports = (Arc<dyn UserProvider>, Arc<dyn UserSaver>, Arc<dyn AppProvider>);

fn ports<S>(store: Arc<S>) -> Ports
where
    S: UserProvider + UserSaver + AppProvider + 'static,
{
    let users: Arc<dyn UserProvider> = store.clone();
    let saver: Arc<dyn UserSaver> = store.clone();
    let apps: Arc<dyn AppProvider> = store;
    (users, saver, apps)
}

async fn open_store(config: &Config) -> Result<Ports> {
    match config.storage.backend {
        StorageBackend::Memory => {
            let store = Arc::new(MemoryStore::with_apps(config.storage.apps.iter().cloned()));
            tracing::info!(apps = store.app_count(), "Using in-memory store");
            Ok(ports(store))
        }

        #[cfg(feature = "postgres")]
        StorageBackend::Postgres => {
            let url = config
                .storage
                .database_url
                .as_deref()
                .context("storage.database_url is required for the postgres backend")?;
            let store = miniapp_sso::store::PostgresStore::connect(url)
                .await
                .context("Failed to connect to PostgreSQL")?;
            store.migrate().await.context("Failed to create schema")?;
            Ok(ports(Arc::new(store)))
        }

        #[cfg(not(feature = "postgres"))]
        StorageBackend::Postgres => {
            anyhow::bail!("This build does not include the postgres backend (enable the `postgres` feature)")
        }
    }
}

/// Run the HTTP API server
async fn run_http_server(config: Config) -> Result<()> {
    telemetry::init(config.env).context("Failed to initialize logging")?;

    let addr = config.http.socket_addr()?;
    let (users, saver, apps) = open_store(&config).await?;
    let service = AuthService::new(
        users,
        saver,
        apps,
        IdentityCipher::new(&config.telegram.identity_secret),
        InitDataVerifier::new(&config.telegram.bot_token)?,
        config.auth.clone(),
    );

    println!("{}", "Starting SSO HTTP server...".bold().cyan());
    println!();
    println!("  {} {}", "Bind:".bright_white(), addr);
    println!("  {} {}", "Env:".bright_white(), config.env);
    println!(
        "  {} {}s",
        "Token TTL:".bright_white(),
        service.config().token_ttl_seconds
    );
    println!(
        "  {} {}s",
        "Max init data age:".bright_white(),
        service.config().max_init_data_age_seconds
    );
    println!();
    println!("  {}", "Endpoints:".bright_black());
    println!("    POST   /api/v1/auth/login           - Log in");
    println!("    POST   /api/v1/auth/register        - Register");
    println!("    POST   /api/v1/auth/is-admin        - Admin check");
    println!("    POST   /api/v1/auth/token/validate  - Validate token");
    println!("    GET    /health                      - Health");
    println!();
    println!("{}", "Server is running. Press Ctrl+C to stop.".green());
    println!();

    let server = HttpServer::new(Arc::new(service));
    if let Err(e) = server.bind(addr, shutdown_signal()).await {
        eprintln!("{} {}", "Server error:".red(), e);
        return Err(e.into());
    }

    println!("{}", "Server stopped.".green());
    Ok(())
}
