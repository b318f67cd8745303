//! Typed error handling for the API
//!
//! This module provides the error hierarchy surfaced by the repositories and
//! by the governance pipeline. Every variant knows its HTTP status and a
//! stable error code, so handlers can simply `?` into [`ApiError`].
//!
//! # Error Categories
//!
//! - [`EntityError`]: Entity lookups that came back empty
//! - [`ValidationError`]: Bad input, detected before any I/O
//! - [`StorageError`]: Backing store failures (timeouts are retryable)
//! - [`QuotaExceededError`]: Rate limit hit, reported with a retry hint
//! - [`UnsupportedVersionError`]: Requested API version is not served
//! - [`RequestError`]: Malformed paths, ids and failed preconditions
//! - [`ConfigError`]: Startup configuration problems
//!
//! # Example
//!
//! ```rust,ignore
//! async fn get_company(repos: &RepositoryManager, id: Uuid) -> ApiResult<Company> {
//!     repos
//!         .company()
//!         .get_company(id, false)
//!         .await?
//!         .map(EntityEntry::into_inner)
//!         .ok_or_else(|| EntityError::not_found::<Company>(id).into())
//! }
//! ```

use crate::core::entity::Entity;
use crate::core::headers::{API_SUPPORTED_VERSIONS, X_RATE_LIMIT_REMAINING};
use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// The main error type of the API
#[derive(Debug)]
pub enum ApiError {
    /// Entity lookups
    Entity(EntityError),

    /// Validation errors
    Validation(ValidationError),

    /// Storage backend errors
    Storage(StorageError),

    /// Rate limit exceeded
    QuotaExceeded(QuotaExceededError),

    /// Requested API version is not registered
    UnsupportedVersion(UnsupportedVersionError),

    /// HTTP/Request errors
    Request(RequestError),

    /// Configuration errors
    Config(ConfigError),

    /// Internal errors (should not happen in normal operation)
    Internal(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Entity(e) => write!(f, "{}", e),
            ApiError::Validation(e) => write!(f, "{}", e),
            ApiError::Storage(e) => write!(f, "{}", e),
            ApiError::QuotaExceeded(e) => write!(f, "{}", e),
            ApiError::UnsupportedVersion(e) => write!(f, "{}", e),
            ApiError::Request(e) => write!(f, "{}", e),
            ApiError::Config(e) => write!(f, "{}", e),
            ApiError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ApiError::Entity(e) => Some(e),
            ApiError::Validation(e) => Some(e),
            ApiError::Storage(e) => Some(e),
            ApiError::QuotaExceeded(e) => Some(e),
            ApiError::UnsupportedVersion(e) => Some(e),
            ApiError::Request(e) => Some(e),
            ApiError::Config(e) => Some(e),
            ApiError::Internal(_) => None,
        }
    }
}

/// Error response structure for HTTP responses
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Optional additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Entity(e) => e.status_code(),
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Storage(e) => e.status_code(),
            ApiError::QuotaExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::UnsupportedVersion(_) => StatusCode::BAD_REQUEST,
            ApiError::Request(e) => e.status_code(),
            ApiError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::Entity(e) => e.error_code(),
            ApiError::Validation(_) => "VALIDATION_ERROR",
            ApiError::Storage(e) => e.error_code(),
            ApiError::QuotaExceeded(_) => "QUOTA_EXCEEDED",
            ApiError::UnsupportedVersion(_) => "UNSUPPORTED_API_VERSION",
            ApiError::Request(e) => e.error_code(),
            ApiError::Config(_) => "CONFIG_ERROR",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Convert to an error response
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            code: self.error_code().to_string(),
            message: self.to_string(),
            details: self.details(),
        }
    }

    /// Get additional details for the error
    fn details(&self) -> Option<serde_json::Value> {
        match self {
            ApiError::Entity(EntityError::NotFound { entity_type, id }) => {
                Some(serde_json::json!({
                    "entity_type": entity_type,
                    "id": id.to_string()
                }))
            }
            ApiError::Validation(ValidationError::FieldErrors(errors)) => {
                Some(serde_json::json!({ "fields": errors }))
            }
            ApiError::QuotaExceeded(e) => Some(serde_json::json!({
                "endpoint": e.endpoint,
                "limit": e.limit,
                "period": e.period,
                "retry_after_seconds": e.retry_after_secs()
            })),
            ApiError::UnsupportedVersion(e) => Some(serde_json::json!({
                "requested": e.requested,
                "supported": e.supported
            })),
            ApiError::Storage(e) => Some(serde_json::json!({ "retryable": e.is_retryable() })),
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.error_code(), error = %self, "request failed");
        } else {
            tracing::debug!(code = self.error_code(), error = %self, "request rejected");
        }

        let body = Json(self.to_response());
        let mut response = (status, body).into_response();
        let headers = response.headers_mut();

        match &self {
            ApiError::QuotaExceeded(e) => {
                headers.insert(header::RETRY_AFTER, HeaderValue::from(e.retry_after_secs()));
                headers.insert(X_RATE_LIMIT_REMAINING, HeaderValue::from_static("0"));
            }
            ApiError::UnsupportedVersion(e) => {
                if let Ok(value) = HeaderValue::from_str(&e.supported.join(", ")) {
                    headers.insert(API_SUPPORTED_VERSIONS, value);
                }
            }
            _ => {}
        }

        response
    }
}

// =============================================================================
// Entity Errors
// =============================================================================

/// Errors related to entity lookups
#[derive(Debug)]
pub enum EntityError {
    /// Entity was not found
    NotFound { entity_type: String, id: Uuid },
}

impl EntityError {
    /// Shorthand for a missing entity of type `T`
    pub fn not_found<T: Entity>(id: Uuid) -> Self {
        EntityError::NotFound {
            entity_type: T::resource_name_singular().to_string(),
            id,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            EntityError::NotFound { .. } => StatusCode::NOT_FOUND,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            EntityError::NotFound { .. } => "ENTITY_NOT_FOUND",
        }
    }
}

impl fmt::Display for EntityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityError::NotFound { entity_type, id } => {
                write!(f, "{} with id '{}' not found", entity_type, id)
            }
        }
    }
}

impl std::error::Error for EntityError {}

impl From<EntityError> for ApiError {
    fn from(err: EntityError) -> Self {
        ApiError::Entity(err)
    }
}

// =============================================================================
// Validation Errors
// =============================================================================

/// Errors related to input validation
#[derive(Debug)]
pub enum ValidationError {
    /// Single field validation error
    FieldError { field: String, message: String },

    /// Multiple field validation errors
    FieldErrors(Vec<FieldValidationError>),

    /// Payload could not be (de)serialized
    InvalidJson { message: String },
}

/// A single field validation error
#[derive(Debug, Clone, Serialize)]
pub struct FieldValidationError {
    pub field: String,
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::FieldError { field, message } => {
                write!(f, "Validation error for field '{}': {}", field, message)
            }
            ValidationError::FieldErrors(errors) => {
                let msgs: Vec<String> = errors
                    .iter()
                    .map(|e| format!("{}: {}", e.field, e.message))
                    .collect();
                write!(f, "Validation errors: {}", msgs.join(", "))
            }
            ValidationError::InvalidJson { message } => {
                write!(f, "Invalid JSON: {}", message)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Flatten nested validator errors into `path: message` pairs
fn flatten_validation_errors(
    prefix: &str,
    errors: &validator::ValidationErrors,
    out: &mut Vec<FieldValidationError>,
) {
    use validator::ValidationErrorsKind;

    for (field, kind) in errors.errors() {
        let path = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{}.{}", prefix, field)
        };
        match kind {
            ValidationErrorsKind::Field(errs) => {
                out.extend(errs.iter().map(|e| FieldValidationError {
                    field: path.clone(),
                    message: e
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| e.code.to_string()),
                }));
            }
            ValidationErrorsKind::Struct(inner) => flatten_validation_errors(&path, inner, out),
            ValidationErrorsKind::List(items) => {
                for (index, inner) in items {
                    flatten_validation_errors(&format!("{}[{}]", path, index), inner, out);
                }
            }
        }
    }
}

impl From<validator::ValidationErrors> for ValidationError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields = Vec::new();
        flatten_validation_errors("", &errors, &mut fields);
        // HashMap iteration order is arbitrary
        fields.sort_by(|a, b| a.field.cmp(&b.field));
        ValidationError::FieldErrors(fields)
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::Validation(err)
    }
}

// =============================================================================
// Storage Errors
// =============================================================================

/// Errors related to the entity store
#[derive(Debug)]
pub enum StorageError {
    /// The store did not answer within the caller's deadline
    Timeout { operation: String, after: Duration },

    /// A constraint rejected the batch (duplicate key, missing row)
    Constraint { message: String },

    /// Stored data could not be decoded
    Corruption { message: String },

    /// Backend not available
    Unavailable { backend: String, message: String },
}

impl StorageError {
    /// Whether the caller may retry the operation (with backoff)
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Timeout { .. })
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            StorageError::Timeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
            StorageError::Constraint { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            StorageError::Corruption { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            StorageError::Unavailable { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            StorageError::Timeout { .. } => "STORAGE_TIMEOUT",
            StorageError::Constraint { .. } => "STORAGE_CONSTRAINT",
            StorageError::Corruption { .. } => "STORAGE_CORRUPTION",
            StorageError::Unavailable { .. } => "STORAGE_UNAVAILABLE",
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Timeout { operation, after } => {
                write!(f, "Storage {} timed out after {}ms", operation, after.as_millis())
            }
            StorageError::Constraint { message } => {
                write!(f, "Storage constraint violated: {}", message)
            }
            StorageError::Corruption { message } => {
                write!(f, "Stored data is corrupt: {}", message)
            }
            StorageError::Unavailable { backend, message } => {
                write!(f, "Storage backend '{}' is unavailable: {}", backend, message)
            }
        }
    }
}

impl std::error::Error for StorageError {}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        ApiError::Storage(err)
    }
}

// =============================================================================
// Quota Errors
// =============================================================================

/// A client exhausted the quota of a rate-limit rule
#[derive(Debug, Clone)]
pub struct QuotaExceededError {
    pub client_key: String,
    pub endpoint: String,
    pub limit: u64,
    /// Period as configured (e.g. "5m")
    pub period: String,
    /// Time left until the window admits requests again
    pub retry_after: Duration,
}

impl QuotaExceededError {
    /// Retry hint in whole seconds, rounded up and never zero
    pub fn retry_after_secs(&self) -> u64 {
        let millis = self.retry_after.as_millis() as u64;
        millis.div_ceil(1000).max(1)
    }
}

impl fmt::Display for QuotaExceededError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "API calls quota exceeded for '{}': maximum admitted {} per {}",
            self.endpoint, self.limit, self.period
        )
    }
}

impl std::error::Error for QuotaExceededError {}

impl From<QuotaExceededError> for ApiError {
    fn from(err: QuotaExceededError) -> Self {
        ApiError::QuotaExceeded(err)
    }
}

// =============================================================================
// Version Errors
// =============================================================================

/// The client asked for a version no handler is registered for
#[derive(Debug, Clone)]
pub struct UnsupportedVersionError {
    pub requested: String,
    pub supported: Vec<String>,
}

impl fmt::Display for UnsupportedVersionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "API version '{}' is not supported (supported: {})",
            self.requested,
            self.supported.join(", ")
        )
    }
}

impl std::error::Error for UnsupportedVersionError {}

impl From<UnsupportedVersionError> for ApiError {
    fn from(err: UnsupportedVersionError) -> Self {
        ApiError::UnsupportedVersion(err)
    }
}

// =============================================================================
// Request Errors
// =============================================================================

/// Errors related to HTTP requests
#[derive(Debug)]
pub enum RequestError {
    /// Invalid path format
    InvalidPath { path: String, message: String },

    /// Invalid entity ID format
    InvalidEntityId { id: String },

    /// Invalid request body
    InvalidBody { message: String },

    /// `If-Match` / `If-Unmodified-Since` did not hold
    PreconditionFailed { resource: String },
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestError::InvalidPath { path, message } => {
                write!(f, "Invalid path '{}': {}", path, message)
            }
            RequestError::InvalidEntityId { id } => {
                write!(f, "Invalid entity ID format: '{}'", id)
            }
            RequestError::InvalidBody { message } => {
                write!(f, "Invalid request body: {}", message)
            }
            RequestError::PreconditionFailed { resource } => {
                write!(f, "Precondition failed for '{}'", resource)
            }
        }
    }
}

impl std::error::Error for RequestError {}

impl RequestError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RequestError::InvalidPath { .. } => StatusCode::BAD_REQUEST,
            RequestError::InvalidEntityId { .. } => StatusCode::BAD_REQUEST,
            RequestError::InvalidBody { .. } => StatusCode::BAD_REQUEST,
            RequestError::PreconditionFailed { .. } => StatusCode::PRECONDITION_FAILED,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            RequestError::InvalidPath { .. } => "INVALID_PATH",
            RequestError::InvalidEntityId { .. } => "INVALID_ENTITY_ID",
            RequestError::InvalidBody { .. } => "INVALID_BODY",
            RequestError::PreconditionFailed { .. } => "PRECONDITION_FAILED",
        }
    }
}

impl From<RequestError> for ApiError {
    fn from(err: RequestError) -> Self {
        ApiError::Request(err)
    }
}

// =============================================================================
// Config Errors
// =============================================================================

/// Errors related to configuration
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to parse configuration file
    ParseError {
        file: Option<String>,
        message: String,
    },

    /// Invalid value in configuration
    InvalidValue {
        field: String,
        value: String,
        message: String,
    },

    /// Configuration file not found
    FileNotFound { path: String },

    /// IO error while reading configuration
    IoError { message: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ParseError { file, message } => {
                if let Some(file) = file {
                    write!(f, "Failed to parse config file '{}': {}", file, message)
                } else {
                    write!(f, "Failed to parse config: {}", message)
                }
            }
            ConfigError::InvalidValue {
                field,
                value,
                message,
            } => {
                write!(
                    f,
                    "Invalid value '{}' for field '{}': {}",
                    value, field, message
                )
            }
            ConfigError::FileNotFound { path } => {
                write!(f, "Configuration file not found: {}", path)
            }
            ConfigError::IoError { message } => {
                write!(f, "IO error: {}", message)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        ApiError::Config(err)
    }
}

// =============================================================================
// Conversions from external errors
// =============================================================================

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Validation(ValidationError::InvalidJson {
            message: err.to_string(),
        })
    }
}

impl From<uuid::Error> for ApiError {
    fn from(err: uuid::Error) -> Self {
        ApiError::Request(RequestError::InvalidEntityId {
            id: err.to_string(),
        })
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}

// =============================================================================
// Result type alias
// =============================================================================

/// A specialized Result type for handler-level operations
pub type ApiResult<T> = Result<T, ApiError>;
