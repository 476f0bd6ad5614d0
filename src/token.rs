//! Tenant-scoped session tokens.
//!
//! Tokens are compact JWS strings (`header.claims.signature`) signed with
//! HMAC-SHA256 under the tenant's own secret. They are stateless: validity is
//! entirely a function of the signature and the `exp` claim.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind as JwtErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, AuthResult};
use crate::types::{App, OpaqueUserId};

/// Default token TTL: 5 hours.
pub const DEFAULT_TOKEN_TTL_SECONDS: i64 = 5 * 3600;

/// Claims carried by every session token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Opaque user id
    pub sub: String,

    /// Tenant the token was minted for
    #[serde(rename = "serviceID")]
    pub service_id: i64,

    /// Expiry (unix seconds)
    pub exp: i64,
}

impl SessionClaims {
    pub fn subject(&self) -> OpaqueUserId {
        OpaqueUserId::new(self.sub.clone())
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }
}

/// Mints and validates session tokens.
///
/// Holds no secrets; the tenant secret is supplied per call.
#[derive(Debug, Clone)]
pub struct TokenIssuer {
    validation: Validation,
}

impl TokenIssuer {
    pub fn new() -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self { validation }
    }

    /// Mint a token for `subject` scoped to `app`, valid for `ttl`.
    pub fn mint(&self, subject: &OpaqueUserId, app: &App, ttl: Duration) -> AuthResult<String> {
        self.mint_at(subject, app, ttl, Utc::now())
    }

    /// Mint a token as if issued at `issued_at`.
    pub fn mint_at(
        &self,
        subject: &OpaqueUserId,
        app: &App,
        ttl: Duration,
        issued_at: DateTime<Utc>,
    ) -> AuthResult<String> {
        let expires_at = issued_at
            .checked_add_signed(ttl)
            .ok_or_else(|| AuthError::Internal(format!("token ttl out of range: {}", ttl)))?;
        let claims = SessionClaims {
            sub: subject.as_str().to_string(),
            service_id: app.id,
            exp: expires_at.timestamp(),
        };

        jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(app.secret.as_bytes()),
        )
        .map_err(|e| AuthError::Internal(format!("failed to sign token: {}", e)))
    }

    /// Verify `token` against `tenant_secret` and return its subject.
    pub fn validate(&self, token: &str, tenant_secret: &str) -> AuthResult<OpaqueUserId> {
        self.decode(token, tenant_secret).map(|claims| claims.subject())
    }

    /// Verify `token` and return the full claim set.
    pub fn decode(&self, token: &str, tenant_secret: &str) -> AuthResult<SessionClaims> {
        let data = jsonwebtoken::decode::<SessionClaims>(
            token,
            &DecodingKey::from_secret(tenant_secret.as_bytes()),
            &self.validation,
        )
        .map_err(|e| match e.kind() {
            JwtErrorKind::ExpiredSignature => AuthError::ExpiredToken,
            _ => AuthError::InvalidToken(e.to_string()),
        })?;

        Ok(data.claims)
    }

    /// Verify `token` for `app`, rejecting tokens minted for another tenant.
    pub fn validate_for_tenant(&self, token: &str, app: &App) -> AuthResult<SessionClaims> {
        let claims = self.decode(token, &app.secret)?;
        if claims.service_id != app.id {
            return Err(AuthError::InvalidToken(format!(
                "token issued for service {}, not {}",
                claims.service_id, app.id
            )));
        }
        Ok(claims)
    }
}

impl Default for TokenIssuer {
    fn default() -> Self {
        Self::new()
    }
}
