//! HTTP API for the auth service.
//!
//! # Example
//!
//! ```ignore
//! use miniapp_sso::http::HttpServer;
//!
//! let server = HttpServer::new(Arc::new(service));
//! server.bind("0.0.0.0:8080", shutdown_signal()).await?;
//! ```
//!
//! # API Endpoints
//!
//! - `POST /api/v1/auth/login` - Log in an existing user
//! - `POST /api/v1/auth/register` - Register a new user
//! - `POST /api/v1/auth/is-admin` - Check the admin flag
//! - `POST /api/v1/auth/token/validate` - Check a session token for a tenant
//! - `GET /health` - Liveness probe
//!
//! Failures are returned as `{"error": "...", "code": "..."}` with the status
//! of the error's kind.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, ErrorKind};
use crate::service::{AuthService, LoginOutcome};

/// HTTP server wrapping an [`AuthService`].
pub struct HttpServer {
    service: Arc<AuthService>,
}

impl HttpServer {
    pub fn new(service: Arc<AuthService>) -> Self {
        Self { service }
    }

    /// Bind `addr` and serve until `shutdown` resolves.
    pub async fn bind<F>(self, addr: SocketAddr, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already-bound listener until `shutdown` resolves.
    ///
    /// In-flight requests are allowed to finish before this returns.
    pub async fn serve<F>(self, listener: tokio::net::TcpListener, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tracing::info!("HTTP server listening on {}", listener.local_addr()?);
        axum::serve(listener, create_router(self.service))
            .with_graceful_shutdown(shutdown)
            .await
    }
}

/// Create the router with all routes.
pub fn create_router(service: Arc<AuthService>) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/api/v1/auth/login", post(handle_login))
        .route("/api/v1/auth/register", post(handle_register))
        .route("/api/v1/auth/is-admin", post(handle_is_admin))
        .route("/api/v1/auth/token/validate", post(handle_validate_token))
        .with_state(service)
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request to log in.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// Raw init data query string
    #[serde(alias = "initData")]
    pub init_data: String,
    #[serde(alias = "serviceId")]
    pub service_id: i64,
}

/// Request to register a new user.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(alias = "initData")]
    pub init_data: String,
    #[serde(alias = "userNameLocale")]
    pub user_name_locale: String,
    #[serde(alias = "serviceId")]
    pub service_id: i64,
}

/// Response with a freshly minted token.
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
}

/// Request to check the admin flag.
#[derive(Debug, Deserialize)]
pub struct IsAdminRequest {
    #[serde(alias = "initData")]
    pub init_data: String,
}

#[derive(Debug, Serialize)]
pub struct IsAdminResponse {
    pub is_admin: bool,
}

/// Request to validate a session token.
#[derive(Debug, Deserialize)]
pub struct ValidateTokenRequest {
    pub token: String,
    #[serde(alias = "serviceId")]
    pub service_id: i64,
}

/// Response for token validation.
#[derive(Debug, Serialize)]
pub struct ValidateTokenResponse {
    pub valid: bool,
    pub subject: String,
    pub service_id: i64,
    pub expires_at: Option<String>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

// ============================================================================
// Handlers
// ============================================================================

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn handle_login(
    State(service): State<Arc<AuthService>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginOutcome>, ApiError> {
    let request = json_body(payload)?;
    let outcome = service
        .validate_user(&request.init_data, request.service_id)
        .await
        .map_err(api_error)?;

    Ok(Json(outcome))
}

async fn handle_register(
    State(service): State<Arc<AuthService>>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<TokenResponse>), ApiError> {
    let request = json_body(payload)?;
    let token = service
        .register_user(&request.init_data, &request.user_name_locale, request.service_id)
        .await
        .map_err(api_error)?;

    Ok((StatusCode::CREATED, Json(TokenResponse { token })))
}

async fn handle_is_admin(
    State(service): State<Arc<AuthService>>,
    payload: Result<Json<IsAdminRequest>, JsonRejection>,
) -> Result<Json<IsAdminResponse>, ApiError> {
    let request = json_body(payload)?;
    let is_admin = service
        .is_admin(&request.init_data)
        .await
        .map_err(api_error)?;

    Ok(Json(IsAdminResponse { is_admin }))
}

async fn handle_validate_token(
    State(service): State<Arc<AuthService>>,
    payload: Result<Json<ValidateTokenRequest>, JsonRejection>,
) -> Result<Json<ValidateTokenResponse>, ApiError> {
    let request = json_body(payload)?;
    let claims = service
        .validate_token(&request.token, request.service_id)
        .await
        .map_err(api_error)?;

    Ok(Json(ValidateTokenResponse {
        valid: true,
        expires_at: claims.expires_at().map(|at| at.to_rfc3339()),
        subject: claims.sub,
        service_id: claims.service_id,
    }))
}

// ============================================================================
// Helpers
// ============================================================================

/// Unwrap a JSON body, reporting any rejection as an invalid argument.
fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    match payload {
        Ok(Json(request)) => Ok(request),
        Err(rejection) => Err(api_error(AuthError::InvalidArgument(rejection.body_text()))),
    }
}

/// Convert an AuthError to an HTTP response.
fn api_error(err: AuthError) -> ApiError {
    let kind = err.kind();
    let status =
        StatusCode::from_u16(kind.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    // Backend details stay in the logs.
    let error = match kind {
        ErrorKind::Internal => "Internal error".to_string(),
        _ => err.to_string(),
    };

    (
        status,
        Json(ErrorResponse {
            error,
            code: err.code().to_string(),
        }),
    )
}
