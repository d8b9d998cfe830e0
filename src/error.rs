//! Application-wide error type.
//!
//! Every layer has its own `thiserror` enum; they all convert into
//! [`AppError`], which knows its HTTP status, machine-readable code and the
//! message that is safe to show to a client.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for programmatic handling by clients
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Domain errors (4xx)
    BookingNotFound,
    BookingNotPayable,
    PaymentNotFound,
    DuplicateReference,

    // Infrastructure errors (5xx)
    DatabaseError,
    ConfigurationError,

    // External errors (502, 503)
    GatewayUnavailable,
    GatewayRejected,

    // Generic
    Unauthorized,
    InternalError,
    ValidationError,
}

/// Business rule violations
#[derive(Debug, Clone)]
pub enum DomainError {
    /// Booking does not exist or belongs to someone else
    BookingNotFound { booking_id: String },
    /// Booking is past the point where it accepts payments
    BookingNotPayable { booking_id: String, status: String },
    /// No payment with this reference is visible to the caller
    PaymentNotFound { tx_ref: String },
    /// Generated reference collided with an existing payment
    DuplicateReference { tx_ref: String },
}

/// Infrastructure-level errors (database, configuration)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    Database { message: String, is_retryable: bool },
    Configuration { message: String },
}

/// Payment gateway errors
#[derive(Debug, Clone)]
pub enum ExternalError {
    /// Gateway could not be reached or gave no usable answer
    GatewayUnavailable { gateway: String, message: String },
    /// Gateway answered and refused the request
    GatewayRejected { gateway: String, message: String },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    MissingField { field: String },
    InvalidField { field: String, reason: String },
    MalformedBody { reason: String },
    /// Caller identity or webhook signature could not be established
    Unauthenticated { reason: String },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Validation(ValidationError::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }))
    }

    pub fn unauthenticated(reason: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Validation(ValidationError::Unauthenticated {
            reason: reason.into(),
        }))
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                // A booking the caller cannot pay is an input problem, not a lookup miss.
                DomainError::BookingNotFound { .. } => 400,
                DomainError::BookingNotPayable { .. } => 400,
                DomainError::PaymentNotFound { .. } => 404,
                DomainError::DuplicateReference { .. } => 409,
            },
            AppErrorKind::Infrastructure(_) => 500,
            AppErrorKind::External(err) => match err {
                ExternalError::GatewayUnavailable { .. } => 503,
                ExternalError::GatewayRejected { .. } => 502,
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::Unauthenticated { .. } => 401,
                _ => 400,
            },
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::BookingNotFound { .. } => ErrorCode::BookingNotFound,
                DomainError::BookingNotPayable { .. } => ErrorCode::BookingNotPayable,
                DomainError::PaymentNotFound { .. } => ErrorCode::PaymentNotFound,
                DomainError::DuplicateReference { .. } => ErrorCode::DuplicateReference,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::GatewayUnavailable { .. } => ErrorCode::GatewayUnavailable,
                ExternalError::GatewayRejected { .. } => ErrorCode::GatewayRejected,
            },
            AppErrorKind::Validation(ValidationError::Unauthenticated { .. }) => {
                ErrorCode::Unauthorized
            }
            AppErrorKind::Validation(_) => ErrorCode::ValidationError,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::BookingNotFound { booking_id } => {
                    format!("Booking '{}' not found", booking_id)
                }
                DomainError::BookingNotPayable { booking_id, status } => format!(
                    "Booking '{}' is {} and cannot be paid for",
                    booking_id, status
                ),
                DomainError::PaymentNotFound { tx_ref } => {
                    format!("Payment '{}' not found", tx_ref)
                }
                DomainError::DuplicateReference { tx_ref } => format!(
                    "Payment reference '{}' already exists. Please try again",
                    tx_ref
                ),
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::External(err) => match err {
                ExternalError::GatewayUnavailable { gateway, .. } => format!(
                    "Payment gateway ({}) is temporarily unavailable. Please try again",
                    gateway
                ),
                ExternalError::GatewayRejected { message, .. } => {
                    format!("Payment was rejected by the gateway: {}", message)
                }
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
                ValidationError::InvalidField { field, reason } => {
                    format!("Invalid value for '{}': {}", field, reason)
                }
                ValidationError::MalformedBody { reason } => {
                    format!("Malformed request body: {}", reason)
                }
                ValidationError::Unauthenticated { reason } => {
                    format!("Authentication required: {}", reason)
                }
            },
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(DomainError::DuplicateReference { .. }) => true,
            AppErrorKind::Domain(_) => false,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Configuration { .. } => false,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::GatewayUnavailable { .. } => true,
                ExternalError::GatewayRejected { .. } => false,
            },
            AppErrorKind::Validation(_) => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

// From<DatabaseError> lives in database/error.rs, From<GatewayError> in payments/error.rs.

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;
