//! Logging setup.
//!
//! `RUST_LOG` always wins. Without it the level and format follow the
//! deployment environment:
//!
//! | env     | default level | format |
//! |---------|---------------|--------|
//! | `local` | debug         | pretty |
//! | `dev`   | info          | text   |
//! | `prod`  | info          | JSON   |

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::Environment;

/// Default filter directive for `env`.
pub fn default_directive(env: Environment) -> &'static str {
    match env {
        Environment::Local => "miniapp_sso=debug,sso=debug,tower=info,info",
        Environment::Dev | Environment::Prod => "info",
    }
}

/// Install the global subscriber.
///
/// Returns an error if a subscriber is already installed.
pub fn init(env: Environment) -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(env)));
    let registry = tracing_subscriber::registry().with(filter);

    match env {
        Environment::Local => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init(),
        Environment::Dev => registry.with(tracing_subscriber::fmt::layer()).try_init(),
        Environment::Prod => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .try_init(),
    }
}
