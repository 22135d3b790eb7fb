use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{context}")]
    Storage {
        context: &'static str,
        cause: anyhow::Error,
    },
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("admin privileges are required for this operation")]
    Forbidden,
}

impl ApiError {
    pub fn storage(context: &'static str) -> impl FnOnce(anyhow::Error) -> Self {
        move |cause| ApiError::Storage { context, cause }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::Storage { context, cause } => {
                tracing::error!(error = %format!("{cause:#}"), "{context}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse {
                        error: context.to_string(),
                        message: format!("{cause:#}"),
                    },
                )
            }
            ApiError::InvalidParameter(message) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    error: "invalid parameter".to_string(),
                    message: message.clone(),
                },
            ),
            ApiError::Forbidden => (
                StatusCode::FORBIDDEN,
                ErrorResponse {
                    error: "forbidden".to_string(),
                    message: self.to_string(),
                },
            ),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Context};

    #[tokio::test]
    async fn test_storage_error_body_carries_cause_chain() {
        let cause = Err::<(), _>(anyhow!("database is locked"))
            .context("failed to insert visit")
            .unwrap_err();
        let response = ApiError::storage("failed to record visit")(cause).into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "failed to record visit");
        assert_eq!(json["message"], "failed to insert visit: database is locked");
    }
}
