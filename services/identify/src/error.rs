use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

/// Errors surfaced by the identify service to HTTP clients
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Missing or malformed input (payload fields, query params, filenames)
    #[error("{0}")]
    InvalidArgument(String),

    /// Missing or rejected bearer credential
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Classifier, blob store, record store or verifier failure
    #[error(transparent)]
    Upstream(#[from] anyhow::Error),
}

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ServiceError {
    pub fn invalid(message: impl Into<String>) -> Self {
        ServiceError::InvalidArgument(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            ServiceError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            error!(error = ?self, status = status.as_u16(), "Request failed");
        } else {
            warn!(error = %self, status = status.as_u16(), "Request rejected");
        }

        let message = match &self {
            // Keep the full context chain, clients show it verbatim
            ServiceError::Upstream(e) => format!("{:#}", e),
            other => other.to_string(),
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ServiceError::invalid("bad").status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ServiceError::Unauthorized("no token".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ServiceError::NotFound("x.png".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::from(anyhow!("boom")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_invalid_argument_message_is_verbatim() {
        let err = ServiceError::invalid("Missing required fields: mimeType, imageData");
        assert_eq!(err.to_string(), "Missing required fields: mimeType, imageData");
    }

    #[tokio::test]
    async fn test_upstream_body_keeps_context() {
        let err = ServiceError::from(anyhow!("connection refused").context("Failed to reach classifier"));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            body["error"],
            "Failed to reach classifier: connection refused"
        );
    }
}
