use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use ecobites_shared::{ItemId, ThreadId, ValidationError};
use ecobites_store::StoreError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Thread not found: {0}")]
    ThreadNotFound(ThreadId),

    #[error("Item not found: {0}")]
    ItemNotFound(ItemId),

    #[error("Missing or invalid bearer token")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::Validation(_) => StatusCode::BAD_REQUEST,
            ServerError::ThreadNotFound(_) | ServerError::ItemNotFound(_) => StatusCode::NOT_FOUND,
            ServerError::Storage(StoreError::NotFound) => StatusCode::NOT_FOUND,
            ServerError::Unauthorized => StatusCode::UNAUTHORIZED,
            ServerError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServerError::Storage(_) | ServerError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ServerError::Storage(StoreError::NotFound) => "Record not found".to_string(),
            ServerError::Storage(e) => {
                tracing::error!(error = %e, "storage failure");
                "Storage error".to_string()
            }
            ServerError::Internal(e) => {
                tracing::error!(error = %e, "internal failure");
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ServerError::Validation(ValidationError::SelfChat).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServerError::ThreadNotFound(ThreadId::new()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServerError::Storage(StoreError::Migration("x".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(ServerError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
    }
}
