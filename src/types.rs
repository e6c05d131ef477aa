//! HTTP-facing error and response types.

use serde::Serialize;

use crate::callback::CallbackError;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status_code(&self) -> axum::http::StatusCode {
        match self {
            AppError::BadRequest(_) => axum::http::StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => axum::http::StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => axum::http::StatusCode::FORBIDDEN,
            AppError::Internal(_) => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<CallbackError> for AppError {
    fn from(e: CallbackError) -> Self {
        match e {
            CallbackError::Malformed(_) => AppError::BadRequest(e.to_string()),
            CallbackError::Unauthenticated(_) => AppError::Unauthorized(e.to_string()),
            CallbackError::Submission(_) => AppError::Internal(e.to_string()),
        }
    }
}

#[derive(Serialize, Debug)]
pub struct ErrorBody {
    pub error: String,
}

pub type ApiResult<T> = Result<axum::Json<T>, (axum::http::StatusCode, axum::Json<ErrorBody>)>;

pub fn api_err<T>(e: AppError) -> ApiResult<T> {
    Err((
        e.status_code(),
        axum::Json(ErrorBody {
            error: e.to_string(),
        }),
    ))
}

#[derive(Serialize, Debug)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    /// RFC 3339.
    pub timestamp: String,
}

#[derive(Serialize, Debug)]
pub struct ReadyResponse {
    pub ready: bool,
    pub callback_authority: String,
}
