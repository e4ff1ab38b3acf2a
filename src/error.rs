//! # Error Handling
//!
//! Two layers live here. [`ServiceError`] is the domain taxonomy returned by the
//! services (OAuth flow, ingestion, response lifecycle, posting). [`ApiError`] is
//! the problem+json envelope every HTTP handler answers with; each
//! `ServiceError` variant maps onto exactly one status and code.

use axum::{
    extract::rejection::JsonRejection,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use utoipa::ToSchema;

use crate::telemetry;

/// Problem+json error envelope returned by every endpoint.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiError {
    /// HTTP status code for the response
    #[serde(skip_serializing, skip_deserializing)]
    pub status: StatusCode,
    /// Stable machine-readable code (SCREAMING_SNAKE_CASE)
    pub code: Box<str>,
    /// Message suitable for display to the end user
    pub message: Box<str>,
    /// Additional error details (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Box<serde_json::Value>>,
    /// Suggested retry delay in seconds (optional)
    pub retry_after: Option<u64>,
    /// Correlation id echoed from the request's trace context
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<Box<str>>,
}

impl ApiError {
    pub fn new<S: Into<String>>(status: StatusCode, code: S, message: S) -> Self {
        Self {
            status,
            code: code.into().into_boxed_str(),
            message: message.into().into_boxed_str(),
            details: None,
            retry_after: None,
            trace_id: Self::current_trace_id(),
        }
    }

    pub fn with_details<V: Into<serde_json::Value>>(mut self, details: V) -> Self {
        self.details = Some(Box::new(details.into()));
        self
    }

    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }

    fn current_trace_id() -> Option<Box<str>> {
        telemetry::current_trace_id()
            .map(|trace_id| trace_id.into_boxed_str())
            .or_else(|| {
                Some(format!("corr-{}", &uuid::Uuid::new_v4().to_string()[..8]).into_boxed_str())
            })
    }
}

/// Returns true when the database rejected a write because of a unique index.
///
/// Ingestion and analysis rely on this to turn a lost insert race into
/// "already present" instead of a server error.
pub fn is_unique_violation(error: &sea_orm::DbErr) -> bool {
    use sea_orm::RuntimeErr;

    const PG_UNIQUE: &str = "23505";
    const SQLITE_DUPLICATE_CODES: &[&str] = &["1555", "2067"];

    let runtime_err = match error {
        sea_orm::DbErr::Query(RuntimeErr::SqlxError(sqlx_err))
        | sea_orm::DbErr::Exec(RuntimeErr::SqlxError(sqlx_err)) => sqlx_err,
        _ => return false,
    };

    let Some(db_error) = runtime_err.as_database_error() else {
        return false;
    };

    if db_error.is_unique_violation() {
        return true;
    }

    db_error
        .code()
        .map(|code| {
            let code: &str = &code;
            code == PG_UNIQUE || SQLITE_DUPLICATE_CODES.contains(&code)
        })
        .unwrap_or(false)
}

/// Domain failures surfaced by the review services.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Authentication required")]
    AuthenticationRequired,
    #[error("{0}")]
    AccessDenied(String),
    #[error("{message}")]
    InvalidInput {
        message: String,
        fields: serde_json::Value,
    },
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("Authorization link is invalid or has expired. Please try connecting again.")]
    InvalidOrExpiredState,
    #[error("Authorization was not completed: {0}")]
    MissingAuthCode(String),
    #[error("{0}")]
    NotConnected(String),
    #[error("{0}")]
    LocationNotConfigured(String),
    #[error("{0} does not support review sync yet")]
    SourceUnsupported(String),
    #[error("{0} does not support posting replies")]
    PostingUnsupported(String),
    #[error("This review was entered manually and cannot be posted to a platform")]
    NotExternallySourced,
    #[error("{0}")]
    InvalidTransition(String),
    #[error("{0}")]
    Conflict(String),
    #[error("Access token expired. Please reconnect the source.")]
    TokenExpired,
    #[error("Could not refresh the access token: {0}")]
    TokenRefreshFailed(String),
    #[error("Rate limit exceeded. Please try again later.")]
    RateLimited { retry_after: Option<u64> },
    #[error("AI credits exhausted. Please add credits to continue.")]
    QuotaExhausted,
    #[error("{0}")]
    Configuration(String),
    #[error("{provider} returned status {status}")]
    Provider {
        provider: String,
        status: u16,
        body: Option<String>,
    },
    #[error(transparent)]
    Database(#[from] sea_orm::DbErr),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn invalid_input(field: &str, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self::InvalidInput {
            message: format!("Invalid {field}: {reason}"),
            fields: json!({ field: reason }),
        }
    }

    pub fn access_denied() -> Self {
        Self::AccessDenied("You do not have access to this business".to_string())
    }

    /// The stable code clients match on.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::AuthenticationRequired => "UNAUTHORIZED",
            ServiceError::AccessDenied(_) => "FORBIDDEN",
            ServiceError::InvalidInput { .. } => "VALIDATION_FAILED",
            ServiceError::NotFound(_) => "NOT_FOUND",
            ServiceError::InvalidOrExpiredState => "INVALID_OR_EXPIRED_STATE",
            ServiceError::MissingAuthCode(_) => "MISSING_AUTH_CODE",
            ServiceError::NotConnected(_) => "NOT_CONNECTED",
            ServiceError::LocationNotConfigured(_) => "LOCATION_NOT_CONFIGURED",
            ServiceError::SourceUnsupported(_) => "SOURCE_UNSUPPORTED",
            ServiceError::PostingUnsupported(_) => "POSTING_UNSUPPORTED",
            ServiceError::NotExternallySourced => "NOT_EXTERNALLY_SOURCED",
            ServiceError::InvalidTransition(_) => "INVALID_TRANSITION",
            ServiceError::Conflict(_) => "CONFLICT",
            ServiceError::TokenExpired => "TOKEN_EXPIRED",
            ServiceError::TokenRefreshFailed(_) => "TOKEN_REFRESH_FAILED",
            ServiceError::RateLimited { .. } => "RATE_LIMITED",
            ServiceError::QuotaExhausted => "QUOTA_EXHAUSTED",
            ServiceError::Configuration(_) => "CONFIGURATION_ERROR",
            ServiceError::Provider { .. } => "PROVIDER_ERROR",
            ServiceError::Database(err) if is_unique_violation(err) => "CONFLICT",
            ServiceError::Database(_) | ServiceError::Unexpected(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::AuthenticationRequired
            | ServiceError::TokenExpired
            | ServiceError::TokenRefreshFailed(_) => StatusCode::UNAUTHORIZED,
            ServiceError::AccessDenied(_) => StatusCode::FORBIDDEN,
            ServiceError::InvalidInput { .. }
            | ServiceError::InvalidOrExpiredState
            | ServiceError::MissingAuthCode(_)
            | ServiceError::SourceUnsupported(_)
            | ServiceError::PostingUnsupported(_) => StatusCode::BAD_REQUEST,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::NotConnected(_)
            | ServiceError::LocationNotConfigured(_)
            | ServiceError::NotExternallySourced
            | ServiceError::InvalidTransition(_)
            | ServiceError::Conflict(_) => StatusCode::CONFLICT,
            ServiceError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ServiceError::QuotaExhausted => StatusCode::PAYMENT_REQUIRED,
            ServiceError::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Provider { .. } => StatusCode::BAD_GATEWAY,
            ServiceError::Database(err) if is_unique_violation(err) => StatusCode::CONFLICT,
            ServiceError::Database(_) | ServiceError::Unexpected(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Upstream provider error information
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProviderError {
    /// Provider identifier (e.g., "google_business")
    pub provider: String,
    /// HTTP status code from upstream
    pub status: u16,
    /// Response body snippet from upstream (truncated)
    pub body_snippet: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-type",
            HeaderValue::from_static("application/problem+json"),
        );

        if let Some(retry_after) = self.retry_after
            && let Ok(header_value) = HeaderValue::from_str(&retry_after.to_string())
        {
            headers.insert("retry-after", header_value);
        }

        (self.status, headers, axum::Json(self)).into_response()
    }
}

impl From<ServiceError> for ApiError {
    fn from(error: ServiceError) -> Self {
        match error {
            ServiceError::Provider {
                provider,
                status,
                body,
            } => provider_error(provider, status, body),
            ServiceError::InvalidInput { message, fields } => validation_error(&message, fields),
            ServiceError::RateLimited { retry_after } => {
                let api_error = ApiError::new(
                    StatusCode::TOO_MANY_REQUESTS,
                    "RATE_LIMITED",
                    "Rate limit exceeded. Please try again later.",
                );
                match retry_after {
                    Some(seconds) => api_error.with_retry_after(seconds),
                    None => api_error,
                }
            }
            ServiceError::Database(db_err) => db_err.into(),
            ServiceError::Unexpected(err) => err.into(),
            other => ApiError::new(other.status_code(), other.code(), &other.to_string()),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        tracing::error!("Internal error: {:?}", error);

        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            "An internal error occurred",
        )
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let message = match rejection {
            JsonRejection::JsonDataError(err) => format!("Invalid JSON: {}", err),
            JsonRejection::JsonSyntaxError(err) => format!("JSON syntax error: {}", err),
            JsonRejection::MissingJsonContentType(_) => {
                "Missing 'Content-Type: application/json' header".to_string()
            }
            _ => "Invalid request body".to_string(),
        };

        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", &message)
    }
}

impl From<sea_orm::DbErr> for ApiError {
    fn from(error: sea_orm::DbErr) -> Self {
        if is_unique_violation(&error) {
            tracing::debug!(?error, "Unique constraint violation detected");
            return Self::new(StatusCode::CONFLICT, "CONFLICT", "Resource already exists");
        }

        match error {
            sea_orm::DbErr::RecordNotFound(record) => Self::new(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                &format!("Record not found: {}", record),
            ),
            sea_orm::DbErr::Conn(connection_err) => {
                tracing::error!("Database connection error: {:?}", connection_err);
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "Database service unavailable",
                )
            }
            other => {
                tracing::error!("Database error: {:?}", other);
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "Database error occurred",
                )
            }
        }
    }
}

/// Create a provider upstream error (always 502 PROVIDER_ERROR)
pub fn provider_error(provider: String, status: u16, body: Option<String>) -> ApiError {
    let provider_error = ProviderError {
        provider: provider.clone(),
        status,
        body_snippet: body.map(|b| {
            if b.chars().count() > 200 {
                let truncated: String = b.chars().take(200).collect();
                format!("{}...", truncated)
            } else {
                b
            }
        }),
    };

    ApiError::new(
        StatusCode::BAD_GATEWAY,
        "PROVIDER_ERROR",
        &format!("Provider {} returned error status {}", provider, status),
    )
    .with_details(json!(provider_error))
}

/// Create an unauthorized error (401)
pub fn unauthorized(message: Option<&str>) -> ApiError {
    let msg = message.unwrap_or("Authentication required");
    ApiError::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg)
}

/// Create a forbidden error (403)
pub fn forbidden(message: Option<&str>) -> ApiError {
    let msg = message.unwrap_or("Insufficient permissions");
    ApiError::new(StatusCode::FORBIDDEN, "FORBIDDEN", msg)
}

/// Create a validation error with field details
pub fn validation_error(message: &str, field_errors: serde_json::Value) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message).with_details(field_errors)
}
