//! Service error taxonomy and its HTTP mapping.
//!
//! Domain modules return [`ServiceResult`]; the command layer converts a
//! [`ServiceError`] into a JSON body `{ "message": ..., "code"?: ... }`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::error;

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Malformed or out-of-range input.
    #[error("{0}")]
    Validation(String),

    /// A write referenced a category/customer that does not exist.
    #[error("{0}")]
    MissingReference(String),

    /// The addressed resource does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Business rule rejection carrying a stable machine-readable code.
    #[error("{message}")]
    Rejected { code: &'static str, message: String },

    #[error("Code space exhausted for prefix {0}")]
    CodeSpaceExhausted(String),

    #[error("{context}: {source}")]
    Database {
        context: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("{0}")]
    Internal(String),
}

impl ServiceError {
    pub fn rejected(code: &'static str, message: impl Into<String>) -> Self {
        ServiceError::Rejected {
            code,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::Validation(_)
            | ServiceError::MissingReference(_)
            | ServiceError::Rejected { .. } => StatusCode::BAD_REQUEST,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::CodeSpaceExhausted(_) => StatusCode::CONFLICT,
            ServiceError::Database { .. } | ServiceError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable error code for rejections, `None` for everything else.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            ServiceError::Rejected { code, .. } => Some(code),
            ServiceError::CodeSpaceExhausted(_) => Some("CODE_SPACE_EXHAUSTED"),
            _ => None,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() {
            error!(error = %self, "Request failed");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };
        let body = match self.code() {
            Some(code) => serde_json::json!({ "message": message, "code": code }),
            None => serde_json::json!({ "message": message }),
        };
        (status, Json(body)).into_response()
    }
}

/// Attach a short context string to a rusqlite error.
pub(crate) trait DbContext<T> {
    fn ctx(self, context: &'static str) -> ServiceResult<T>;
}

impl<T> DbContext<T> for rusqlite::Result<T> {
    fn ctx(self, context: &'static str) -> ServiceResult<T> {
        self.map_err(|source| ServiceError::Database { context, source })
    }
}
