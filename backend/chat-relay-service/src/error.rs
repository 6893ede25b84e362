use crate::store::StoreError;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    /// Ingress body missing, malformed or blank. Never enqueued.
    #[error("Invalid message format")]
    InvalidMessage,

    /// Snapshot read failed.
    #[error("Failed to fetch messages: {0}")]
    FetchMessages(#[source] StoreError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("internal server error")]
    Internal,
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

impl AppError {
    /// Text placed in the `error` field of the response body.
    /// Store details stay in the logs.
    fn public_message(&self) -> &str {
        match self {
            AppError::InvalidMessage => "Invalid message format",
            AppError::FetchMessages(_) => "Failed to fetch messages",
            AppError::ServiceUnavailable(reason) => reason,
            _ => "internal server error",
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidMessage => StatusCode::BAD_REQUEST,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if self.status_code().is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        HttpResponse::build(self.status_code()).json(ErrorBody {
            error: self.public_message(),
        })
    }
}
