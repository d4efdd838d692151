use axum::Json;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::utils::{ApiResponse, error_codes};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    TripUnavailable(String),
    #[error("该行程已有未处理的预订")]
    DuplicateBooking,
    #[error("{0}")]
    InvalidTransition(String),
    #[error("{0}")]
    Validation(String),
    #[error("地址无法解析: {0}")]
    AddressNotFound(String),
    #[error("{0}")]
    Upstream(String),
    #[error("内部服务器错误")]
    Internal(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Cache(#[from] redis::RedisError),
}

impl ServiceError {
    fn status_and_code(&self) -> (StatusCode, i32) {
        match self {
            ServiceError::NotFound(_) => (StatusCode::NOT_FOUND, error_codes::NOT_FOUND),
            ServiceError::TripUnavailable(_) => {
                (StatusCode::CONFLICT, error_codes::TRIP_UNAVAILABLE)
            }
            ServiceError::DuplicateBooking => {
                (StatusCode::CONFLICT, error_codes::DUPLICATE_BOOKING)
            }
            ServiceError::InvalidTransition(_) => {
                (StatusCode::CONFLICT, error_codes::INVALID_TRANSITION)
            }
            ServiceError::Validation(_) => (StatusCode::BAD_REQUEST, error_codes::VALIDATION_ERROR),
            ServiceError::AddressNotFound(_) => {
                (StatusCode::NOT_FOUND, error_codes::ADDRESS_NOT_FOUND)
            }
            ServiceError::Upstream(_) => (StatusCode::BAD_GATEWAY, error_codes::UPSTREAM_ERROR),
            ServiceError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, error_codes::INTERNAL_ERROR)
            }
            ServiceError::Database(_) | ServiceError::Cache(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, error_codes::INTERNAL_ERROR)
            }
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        // 内部错误不向客户端透露细节
        let msg = match &self {
            ServiceError::Database(e) => {
                tracing::error!("Database error: {}", e);
                "内部服务器错误".to_string()
            }
            ServiceError::Cache(e) => {
                tracing::error!("Redis error: {}", e);
                "内部服务器错误".to_string()
            }
            ServiceError::Internal(detail) => {
                tracing::error!("Internal error: {}", detail);
                "内部服务器错误".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(ApiResponse::<()> {
            code,
            msg,
            resp_data: None,
        });

        (status, body).into_response()
    }
}
