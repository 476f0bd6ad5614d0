/// Error types for the SSO core.
///
/// Every failure in the verification and issuance pipeline is a distinct
/// variant of [`AuthError`], so callers (and transports) can tell a forged
/// assertion apart from an unknown tenant or a database outage.
use thiserror::Error;

/// The main error type for SSO operations.
///
/// All fallible operations return `Result<T, AuthError>`.
#[derive(Error, Debug)]
pub enum AuthError {
    // ------------------------------------------------------------------------
    // Init data verification
    // ------------------------------------------------------------------------
    /// The assertion carries no `hash` field
    #[error("Init data is not signed: hash field missing")]
    MissingSignature,

    /// The `hash` field does not match the recomputed signature
    #[error("Init data signature mismatch")]
    SignatureMismatch,

    /// `auth_date` is absent or not a unix timestamp
    #[error("Init data auth_date is missing or malformed")]
    MalformedTimestamp,

    /// The assertion is older than the accepted window
    #[error("Init data is stale: issued {age_seconds}s ago, max {max_age_seconds}s")]
    StaleAssertion {
        /// Seconds elapsed since `auth_date`
        age_seconds: i64,
        /// Accepted window in seconds
        max_age_seconds: i64,
    },

    /// The assertion could not be decoded as a query string
    #[error("Init data is malformed: {0}")]
    MalformedAssertion(String),

    /// The assertion has no `user` record
    #[error("Init data has no user record")]
    MissingUser,

    /// The `user` record is not valid JSON for a platform user
    #[error("Init data user record is malformed: {0}")]
    MalformedUser(String),

    // ------------------------------------------------------------------------
    // Identity cipher
    // ------------------------------------------------------------------------
    /// Opaque id is not valid hex, has corrupt padding, or is not a number
    #[error("Opaque user id is malformed: {0}")]
    Format(String),

    // ------------------------------------------------------------------------
    // Session tokens
    // ------------------------------------------------------------------------
    #[error("Session token expired")]
    ExpiredToken,

    #[error("Invalid session token: {0}")]
    InvalidToken(String),

    // ------------------------------------------------------------------------
    // Orchestration and storage
    // ------------------------------------------------------------------------
    /// A required request field is empty or zero
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unknown service: {0}")]
    UnknownTenant(i64),

    #[error("User not found")]
    UserNotFound,

    #[error("User is banned")]
    UserBanned,

    #[error("User already exists")]
    UserAlreadyExists,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Transport-level class of an [`AuthError`].
///
/// These are the outcomes a client can observe, independent of wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    Unauthenticated,
    NotFound,
    PermissionDenied,
    AlreadyExists,
    Internal,
}

impl ErrorKind {
    /// HTTP status code for this kind.
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::InvalidArgument => 400,
            ErrorKind::Unauthenticated => 401,
            ErrorKind::PermissionDenied => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::AlreadyExists => 409,
            ErrorKind::Internal => 500,
        }
    }
}

impl AuthError {
    /// Classify the error for the transport layer.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::MissingSignature
            | AuthError::SignatureMismatch
            | AuthError::MalformedTimestamp
            | AuthError::StaleAssertion { .. }
            | AuthError::ExpiredToken
            | AuthError::InvalidToken(_) => ErrorKind::Unauthenticated,

            AuthError::MalformedAssertion(_)
            | AuthError::MissingUser
            | AuthError::MalformedUser(_)
            | AuthError::Format(_)
            | AuthError::InvalidArgument(_) => ErrorKind::InvalidArgument,

            AuthError::UnknownTenant(_) | AuthError::UserNotFound => ErrorKind::NotFound,
            AuthError::UserBanned => ErrorKind::PermissionDenied,
            AuthError::UserAlreadyExists => ErrorKind::AlreadyExists,
            AuthError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Stable error code for clients.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::MissingSignature => "MISSING_SIGNATURE",
            AuthError::SignatureMismatch => "SIGNATURE_MISMATCH",
            AuthError::MalformedTimestamp => "MALFORMED_TIMESTAMP",
            AuthError::StaleAssertion { .. } => "STALE_ASSERTION",
            AuthError::MalformedAssertion(_) => "MALFORMED_ASSERTION",
            AuthError::MissingUser => "MISSING_USER",
            AuthError::MalformedUser(_) => "MALFORMED_USER",
            AuthError::Format(_) => "FORMAT_ERROR",
            AuthError::ExpiredToken => "EXPIRED_TOKEN",
            AuthError::InvalidToken(_) => "INVALID_TOKEN",
            AuthError::InvalidArgument(_) => "INVALID_ARGUMENT",
            AuthError::UnknownTenant(_) => "UNKNOWN_TENANT",
            AuthError::UserNotFound => "USER_NOT_FOUND",
            AuthError::UserBanned => "USER_BANNED",
            AuthError::UserAlreadyExists => "USER_ALREADY_EXISTS",
            AuthError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// True for errors produced by init data verification.
    pub fn is_verification_failure(&self) -> bool {
        matches!(
            self,
            AuthError::MissingSignature
                | AuthError::SignatureMismatch
                | AuthError::MalformedTimestamp
                | AuthError::StaleAssertion { .. }
                | AuthError::MalformedAssertion(_)
                | AuthError::MissingUser
                | AuthError::MalformedUser(_)
        )
    }
}

/// Result type alias for SSO operations.
pub type AuthResult<T> = Result<T, AuthError>;
