use std::error::Error as StdError;

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::{
    application::repos::StoreError, cache::CacheError, domain::error::DomainError,
    infra::error::InfraError,
};

/// Seconds a client should wait before retrying a 503.
const RETRY_AFTER_SECS: &str = "1";

/// Full error chain, attached to responses for the request logger.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = vec![error.to_string()];
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorMessage,
}

#[derive(Debug, Serialize)]
pub struct ErrorMessage {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("resource not found")]
    NotFound,
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound | AppError::Store(StoreError::NotFound) => StatusCode::NOT_FOUND,
            AppError::Domain(_)
            | AppError::Validation(_)
            | AppError::Store(StoreError::InvalidInput { .. })
            | AppError::Cache(CacheError::UnknownNamespace(_)) => StatusCode::BAD_REQUEST,
            AppError::Store(err) if err.is_retryable() => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Infra(InfraError::Database { .. } | InfraError::Redis(_)) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::Store(_)
            | AppError::Cache(_)
            | AppError::Infra(_)
            | AppError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self.status_code() {
            StatusCode::NOT_FOUND => "not_found",
            StatusCode::BAD_REQUEST => "bad_request",
            StatusCode::SERVICE_UNAVAILABLE => "unavailable",
            _ => "internal",
        }
    }

    /// Client-facing message. Validation details are echoed; internal
    /// failures are not.
    fn presentation_message(&self) -> String {
        match self.status_code() {
            StatusCode::NOT_FOUND => "Resource not found".to_string(),
            StatusCode::BAD_REQUEST => self.to_string(),
            StatusCode::SERVICE_UNAVAILABLE => "Service temporarily unavailable".to_string(),
            _ => "Unexpected error occurred".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorBody {
            error: ErrorMessage {
                code: self.code(),
                message: self.presentation_message(),
            },
        };
        let report = ErrorReport::from_error("application::error::AppError", status, &self);
        let mut response = (status, Json(body)).into_response();
        if status == StatusCode::SERVICE_UNAVAILABLE {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from_static(RETRY_AFTER_SECS));
        }
        report.attach(&mut response);
        response
    }
}
