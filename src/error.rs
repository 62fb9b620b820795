//! API error taxonomy.
//!
//! Every handler maps collaborator failures into one of these variants at its
//! boundary; nothing else crosses into an HTTP response. 5xx detail is logged
//! server-side and the client receives a generic message.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    /// Account belongs to an external identity provider; the attempted
    /// password-style flow does not apply.
    #[error("Please login with Google")]
    ProviderMismatch,

    #[error("{message}")]
    RateLimited {
        message: String,
        retry_after_minutes: u64,
    },

    /// Email delivery failed; any pending credential state has been rolled back.
    #[error("{0}")]
    Delivery(String),

    #[error("An error occurred. Please try again.")]
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err)
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::Internal(err.into())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::ProviderMismatch => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Delivery(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        let body = match &self {
            ApiError::ProviderMismatch => json!({
                "message": self.to_string(),
                "provider": "google",
            }),
            ApiError::RateLimited {
                message,
                retry_after_minutes,
            } => json!({
                "error": message,
                "retryAfter": retry_after_minutes,
                "timestamp": OffsetDateTime::now_utc()
                    .format(&Rfc3339)
                    .unwrap_or_default(),
            }),
            ApiError::Internal(source) => {
                error!(error = %source, "internal error");
                json!({ "message": self.to_string() })
            }
            _ => json!({ "message": self.to_string() }),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_taxonomy() {
        assert_eq!(
            ApiError::Validation("bad".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Unauthorized("no".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::NotFound("missing".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Conflict("dup".into()).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::RateLimited {
                message: "slow down".into(),
                retry_after_minutes: 1
            }
            .status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ApiError::Internal(anyhow::anyhow!("boom")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn internal_message_is_generic() {
        let err = ApiError::Internal(anyhow::anyhow!("connection refused to 10.0.0.3"));
        let msg = err.to_string();
        assert!(!msg.contains("10.0.0.3"));
    }

    #[test]
    fn provider_mismatch_carries_hint() {
        assert_eq!(
            ApiError::ProviderMismatch.to_string(),
            "Please login with Google"
        );
    }
}
