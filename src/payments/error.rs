use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Failure reported by the payment gateway adapter.
///
/// `Transport` covers everything where the gateway never gave a usable answer
/// (timeouts, refused connections, 5xx, undecodable bodies). `Business` is a
/// well-formed response in which the gateway explicitly refused the request.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("Gateway transport error: {message}")]
    Transport {
        message: String,
        http_status: Option<u16>,
    },

    #[error("Gateway rejected request: {message}")]
    Business {
        message: String,
        http_status: Option<u16>,
    },

    #[error("Gateway configuration error: {message}")]
    Configuration { message: String },
}

impl GatewayError {
    pub fn transport(message: impl Into<String>) -> Self {
        GatewayError::Transport {
            message: message.into(),
            http_status: None,
        }
    }

    pub fn business(message: impl Into<String>) -> Self {
        GatewayError::Business {
            message: message.into(),
            http_status: None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Transport { .. } => true,
            GatewayError::Business { .. } => false,
            GatewayError::Configuration { .. } => false,
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, GatewayError::Transport { .. })
    }

    /// Message as reported by the gateway, without the variant prefix.
    pub fn gateway_message(&self) -> &str {
        match self {
            GatewayError::Transport { message, .. }
            | GatewayError::Business { message, .. }
            | GatewayError::Configuration { message } => message,
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            GatewayError::Transport { .. } => 503,
            GatewayError::Business { .. } => 502,
            GatewayError::Configuration { .. } => 500,
        }
    }
}

impl From<GatewayError> for crate::error::AppError {
    fn from(err: GatewayError) -> Self {
        use crate::error::{AppError, AppErrorKind, ExternalError, InfrastructureError};

        let kind = match err {
            GatewayError::Transport { message, .. } => {
                AppErrorKind::External(ExternalError::GatewayUnavailable {
                    gateway: "chapa".to_string(),
                    message,
                })
            }
            GatewayError::Business { message, .. } => {
                AppErrorKind::External(ExternalError::GatewayRejected {
                    gateway: "chapa".to_string(),
                    message,
                })
            }
            GatewayError::Configuration { message } => {
                AppErrorKind::Infrastructure(InfrastructureError::Configuration { message })
            }
        };
        AppError::new(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_are_retryable_business_errors_are_not() {
        assert!(GatewayError::transport("timeout").is_retryable());
        assert!(!GatewayError::business("invalid amount").is_retryable());
        assert!(!GatewayError::Configuration {
            message: "missing key".to_string()
        }
        .is_retryable());
    }

    #[test]
    fn gateway_message_strips_prefix() {
        let err = GatewayError::business("Invalid currency");
        assert_eq!(err.gateway_message(), "Invalid currency");
        assert_eq!(err.to_string(), "Gateway rejected request: Invalid currency");
    }

    #[test]
    fn http_status_mapping_is_correct() {
        assert_eq!(GatewayError::transport("down").http_status_code(), 503);
        assert_eq!(GatewayError::business("no").http_status_code(), 502);
    }
}
