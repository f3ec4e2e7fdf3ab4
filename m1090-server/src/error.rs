//! `ApiError`/`ErrorResponse` pair, matching the teacher's split between an
//! internal error enum and the JSON body it serializes to.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::command::ChannelClosed;

#[derive(Debug, thiserror::Error, Serialize)]
#[error("api error")]
#[serde(rename_all = "snake_case")]
pub enum ApiError {
    #[error("the receiver task is shutting down")]
    ShuttingDown,
    #[error("invalid query parameter: {0}")]
    BadRequest(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<ChannelClosed> for ApiError {
    fn from(_: ChannelClosed) -> Self {
        Self::ShuttingDown
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    error: ErrorResponseInner,
}

#[derive(Debug, Serialize)]
struct ErrorResponseInner {
    message: String,
    error: ApiError,
}

impl From<ApiError> for ErrorResponse {
    fn from(value: ApiError) -> Self {
        Self { error: ErrorResponseInner { message: value.to_string(), error: value } }
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        (self.error.error.status_code(), Json(self)).into_response()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        ErrorResponse::from(self).into_response()
    }
}
