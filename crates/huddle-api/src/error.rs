use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use huddle_core::auth::AuthError;
use huddle_core::error::CoreError;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found")]
    NotFound,
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("service unavailable")]
    Unavailable,
    #[error("internal server error")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(err) => {
                tracing::error!("API internal error: {err:#}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let message = self.to_string();
        (status, Json(json!({ "error": message, "message": message }))).into_response()
    }
}

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::Auth(AuthError::InvalidCredentials | AuthError::InvalidToken) => {
                ApiError::Unauthorized
            }
            CoreError::Auth(AuthError::RegistrationDisabled) => ApiError::Forbidden,
            CoreError::Auth(AuthError::Internal(msg)) | CoreError::Internal(msg) => {
                ApiError::Internal(anyhow::anyhow!(msg))
            }
            CoreError::Forbidden => ApiError::Forbidden,
            CoreError::EmptyMessage => ApiError::BadRequest("message content is empty".into()),
            CoreError::Validation(msg) => ApiError::BadRequest(msg),
            CoreError::NotFound => ApiError::NotFound,
            CoreError::Conflict(msg) => ApiError::Conflict(msg),
            CoreError::StoreUnavailable(msg) => {
                tracing::warn!("store unavailable: {msg}");
                ApiError::Unavailable
            }
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        CoreError::from(e).into()
    }
}

impl From<huddle_db::DbError> for ApiError {
    fn from(e: huddle_db::DbError) -> Self {
        match e {
            huddle_db::DbError::NotFound => ApiError::NotFound,
            huddle_db::DbError::Sqlx(_) => ApiError::Internal(anyhow::anyhow!("database error")),
        }
    }
}
