use std::io;

use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Failed to export GPIO{line}: {source}")]
    Export {
        line: u32,
        #[source]
        source: io::Error,
    },
    #[error("Failed to unexport GPIO{line}: {source}")]
    Unexport {
        line: u32,
        #[source]
        source: io::Error,
    },
    #[error("Failed to access direction of GPIO{line}: {source}")]
    Direction {
        line: u32,
        #[source]
        source: io::Error,
    },
    #[error("Failed to access value of GPIO{line}: {source}")]
    Value {
        line: u32,
        #[source]
        source: io::Error,
    },
    #[error("Failed to access edge of GPIO{line}: {source}")]
    Edge {
        line: u32,
        #[source]
        source: io::Error,
    },
    #[error("Invalid content {content:?} in {path}")]
    Parse { path: String, content: String },
    #[error("Readiness wait failed {attempts} consecutive times: {source}")]
    Watch {
        attempts: u32,
        #[source]
        source: io::Error,
    },
    #[error("Pin not found: {0}")]
    NotFoundPin(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Invalid value: {0}")]
    InvalidValue(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl AppError {
    pub fn exit_code(&self) -> u8 {
        match self {
            AppError::Config(_) => 2,
            AppError::Export { .. } => 3,
            AppError::Direction { .. } => 4,
            AppError::Value { .. } => 5,
            AppError::Edge { .. } => 6,
            AppError::Parse { .. } => 7,
            AppError::Watch { .. } => 8,
            _ => 1,
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFoundPin(_) => StatusCode::NOT_FOUND,
            AppError::InvalidState(_) | AppError::InvalidValue(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({ "error": self.to_string() }))
    }
}
