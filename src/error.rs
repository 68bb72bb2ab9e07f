use axum::http::StatusCode;
use thiserror::Error;

/// Failure taxonomy for the request-authorization pipeline.
///
/// Everything the caller can see maps to a stable status code and a
/// human-readable message; internal variants are collapsed to a generic
/// "Internal server error" at the HTTP edge while the full detail is logged
/// server-side.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{reason}")]
    Unauthenticated { reason: String },
    #[error(
        "Rate limit exceeded. Your plan allows {limit} requests per {window}. Upgrade your plan to raise the limit."
    )]
    RateLimited { limit: u32, window: &'static str },
    #[error("Insufficient credits. Required: {required}, Available: {available}.")]
    InsufficientCredits { required: u32, available: u32 },
    #[error("Invalid input for field `{field}`: {reason}")]
    InvalidInput { field: String, reason: String },
    #[error(
        "Input contains content that violates our usage policy. This service does not support harmful, explicit, or malicious content."
    )]
    PolicyViolation { category: &'static str },
    #[error("Unknown operation: {slug}")]
    UnknownOperation { slug: String },
    #[error("upstream provider error: {message}")]
    UpstreamFailure { message: String },
    #[error("usage log write failed after debit: {message}")]
    LedgerWriteFailure { message: String },
    #[error("Invalid webhook signature")]
    WebhookAuthFailure,
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl GatewayError {
    pub fn unauthenticated(reason: impl Into<String>) -> Self {
        Self::Unauthenticated {
            reason: reason.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::InsufficientCredits { .. } => StatusCode::PAYMENT_REQUIRED,
            Self::InvalidInput { .. } | Self::PolicyViolation { .. } => StatusCode::BAD_REQUEST,
            Self::UnknownOperation { .. } => StatusCode::NOT_FOUND,
            Self::WebhookAuthFailure => StatusCode::UNAUTHORIZED,
            Self::UpstreamFailure { .. } | Self::LedgerWriteFailure { .. } | Self::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable machine-readable code for the REST error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthenticated { .. } => "unauthenticated",
            Self::RateLimited { .. } => "rate_limited",
            Self::InsufficientCredits { .. } => "insufficient_credits",
            Self::InvalidInput { .. } => "invalid_input",
            Self::PolicyViolation { .. } => "policy_violation",
            Self::UnknownOperation { .. } => "unknown_operation",
            Self::UpstreamFailure { .. } => "upstream_error",
            Self::WebhookAuthFailure => "webhook_auth_failure",
            Self::LedgerWriteFailure { .. } | Self::Internal { .. } => "internal_error",
        }
    }

    /// Message safe to return to the caller. Internal detail never leaks.
    pub fn public_message(&self) -> String {
        match self {
            Self::UpstreamFailure { .. } => "Upstream provider error".to_string(),
            Self::LedgerWriteFailure { .. } | Self::Internal { .. } => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<crate::store::StoreError> for GatewayError {
    fn from(err: crate::store::StoreError) -> Self {
        Self::Internal {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_the_rest_contract() {
        assert_eq!(
            GatewayError::unauthenticated("x").status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            GatewayError::InsufficientCredits {
                required: 5,
                available: 2
            }
            .status_code(),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            GatewayError::RateLimited {
                limit: 5,
                window: "minute"
            }
            .status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            GatewayError::PolicyViolation { category: "malware" }.status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn internal_detail_does_not_leak() {
        let err = GatewayError::UpstreamFailure {
            message: "connect error to 10.0.0.5".to_string(),
        };
        assert_eq!(err.public_message(), "Upstream provider error");

        let err = GatewayError::internal("sqlite disk I/O error");
        assert_eq!(err.public_message(), "Internal server error");
    }
}
