//! Error types for the application

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unauthorized client")]
    Unauthorized,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Image processing error: {0}")]
    ImageProcessing(String),

    #[error("Quote error: {0}")]
    Quote(String),

    #[error("Font error: {0}")]
    Font(String),

    #[error("External API error: {0}")]
    ExternalApi(String),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::ImageProcessing(_)
            | AppError::Quote(_)
            | AppError::Font(_)
            | AppError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::ExternalApi(_) | AppError::HttpClient(_) => StatusCode::BAD_GATEWAY,
        };

        (status, self.to_string()).into_response()
    }
}
