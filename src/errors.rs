use crate::models::ErrorBody;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::fmt;

/// Application-specific error types.
#[derive(Debug)]
pub enum AppError {
    /// Database-related errors.
    DatabaseError(sqlx::Error),
    /// Resource not found error.
    NotFound(String),
    /// Bad request error (invalid input).
    BadRequest(String),
    /// The company has no quota ledger row.
    QuotaNotConfigured(i64),
    /// The company has used its whole unlock quota.
    QuotaExceeded(i64),
    /// Missing or invalid credentials. The message is the public error code.
    Unauthorized(String),
    /// Authenticated but not allowed. The message is the public error code.
    Forbidden(String),
    /// The caller's deadline elapsed before the operation finished.
    Timeout(String),
    /// Internal server error.
    InternalError(String),
    /// Error with context chain for better debugging.
    WithContext {
        /// The underlying source of the error.
        source: Box<AppError>,
        /// Additional context message.
        context: String,
    },
}

impl AppError {
    /// Returns the innermost error, skipping context wrappers.
    pub fn root(&self) -> &AppError {
        match self {
            AppError::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether a caller may retry the same request (with backoff) and expect a
    /// different outcome.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.root(),
            AppError::DatabaseError(_) | AppError::InternalError(_) | AppError::Timeout(_)
        )
    }
}

impl fmt::Display for AppError {
    /// Formats the error for display.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::DatabaseError(e) => write!(f, "Database error: {}", e),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::QuotaNotConfigured(company_id) => {
                write!(f, "Quota not configured for company {}", company_id)
            }
            AppError::QuotaExceeded(company_id) => {
                write!(f, "Unlock quota exceeded for company {}", company_id)
            }
            AppError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            AppError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            AppError::Timeout(msg) => write!(f, "Deadline exceeded: {}", msg),
            AppError::InternalError(msg) => write!(f, "Internal error: {}", msg),
            AppError::WithContext { source, context } => {
                write!(f, "{}: {}", context, source)
            }
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    /// Converts the error into an HTTP response.
    ///
    /// Maps each error variant to an appropriate HTTP status code and a JSON body
    /// carrying a stable error code. Logs errors based on their severity.
    fn into_response(self) -> Response {
        let (status, error_code) = match &self {
            AppError::DatabaseError(e) => {
                tracing::error!("Database error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal".to_string())
            }
            AppError::NotFound(msg) => {
                tracing::debug!("Not found: {}", msg);
                (StatusCode::NOT_FOUND, "not_found".to_string())
            }
            AppError::BadRequest(msg) => {
                tracing::debug!("Bad request: {}", msg);
                (StatusCode::BAD_REQUEST, "bad_request".to_string())
            }
            AppError::QuotaNotConfigured(company_id) => {
                tracing::warn!("Unlock attempted without quota row, company_id={}", company_id);
                (StatusCode::CONFLICT, "quota_not_configured".to_string())
            }
            AppError::QuotaExceeded(_) => {
                (StatusCode::PAYMENT_REQUIRED, "quota_exceeded".to_string())
            }
            AppError::Unauthorized(code) => {
                tracing::warn!("Unauthorized access: {}", code);
                (StatusCode::UNAUTHORIZED, code.clone())
            }
            AppError::Forbidden(code) => (StatusCode::FORBIDDEN, code.clone()),
            AppError::Timeout(msg) => {
                tracing::error!("Deadline exceeded: {}", msg);
                (StatusCode::GATEWAY_TIMEOUT, "timeout".to_string())
            }
            AppError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal".to_string())
            }
            AppError::WithContext { source, context } => {
                // Log full context chain for debugging
                tracing::error!("Error with context: {} -> {}", context, source);
                // Delegate to underlying error's response
                return source.clone().into_response();
            }
        };

        (status, Json(ErrorBody { error: error_code })).into_response()
    }
}

// Make AppError cloneable for WithContext variant
impl Clone for AppError {
    /// Clones the error.
    ///
    /// Note: `sqlx::Error` is not cloneable, so `DatabaseError` is rendered into an
    /// `InternalError` carrying the original message.
    fn clone(&self) -> Self {
        match self {
            AppError::DatabaseError(e) => AppError::InternalError(e.to_string()),
            AppError::NotFound(msg) => AppError::NotFound(msg.clone()),
            AppError::BadRequest(msg) => AppError::BadRequest(msg.clone()),
            AppError::QuotaNotConfigured(id) => AppError::QuotaNotConfigured(*id),
            AppError::QuotaExceeded(id) => AppError::QuotaExceeded(*id),
            AppError::Unauthorized(msg) => AppError::Unauthorized(msg.clone()),
            AppError::Forbidden(msg) => AppError::Forbidden(msg.clone()),
            AppError::Timeout(msg) => AppError::Timeout(msg.clone()),
            AppError::InternalError(msg) => AppError::InternalError(msg.clone()),
            AppError::WithContext { source, context } => AppError::WithContext {
                source: source.clone(),
                context: context.clone(),
            },
        }
    }
}

impl From<sqlx::Error> for AppError {
    /// Converts a `sqlx::Error` into an `AppError`.
    fn from(err: sqlx::Error) -> Self {
        AppError::DatabaseError(err)
    }
}

/// Extension trait for adding context to errors.
/// Similar to `anyhow::Context` but for our `AppError` type.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, context: impl Into<String>) -> Result<T, AppError>;
}

impl<T> ResultExt<T> for Result<T, AppError> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: context.into(),
        })
    }
}

/// Extension for sqlx::Error to add context
impl<T> ResultExt<T> for Result<T, sqlx::Error> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(AppError::DatabaseError(e)),
            context: context.into(),
        })
    }
}
