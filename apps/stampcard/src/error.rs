//! # Application Errors
//!
//! `AppError` wraps ledger errors with the failures that only exist at the
//! edge of the system: configuration, I/O, tokens and login policy. It maps
//! onto HTTP responses with a stable `kind` and a readable `message`.

use crate::api::ErrorResponse;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use stampcard_core::LedgerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Missing, malformed or expired session or identity token.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Verified identity that is not allowed to log in.
    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A token could not be issued.
    #[error("token error: {0}")]
    Token(String),

    /// A blocking ledger task did not complete.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Ledger(e) => match e {
                LedgerError::PermissionDenied { .. } => StatusCode::FORBIDDEN,
                LedgerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                LedgerError::LimitExceeded { .. } | LedgerError::AllSlotsTaken { .. } => {
                    StatusCode::CONFLICT
                }
                LedgerError::TargetNotFound(_) => StatusCode::NOT_FOUND,
                LedgerError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                LedgerError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Config(_) | Self::Io(_) | Self::Token(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ledger(e) => e.kind(),
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::Config(_) | Self::Io(_) | Self::Token(_) | Self::Internal(_) => "internal",
        }
    }

    /// Message safe to show to the caller.
    ///
    /// Storage and internal failures are reported generically; the details go
    /// to the log.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::Ledger(LedgerError::StorageUnavailable(_)) => {
                "storage is temporarily unavailable, please retry".to_string()
            }
            Self::Ledger(LedgerError::Serialization(_)) => {
                "stored data could not be read".to_string()
            }
            Self::Ledger(e) => e.to_string(),
            Self::Unauthorized(_) | Self::Forbidden(_) => self.to_string(),
            Self::Config(_) | Self::Io(_) | Self::Token(_) | Self::Internal(_) => {
                "internal server error".to_string()
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(kind = self.kind(), error = %self, "request failed");
        } else {
            tracing::debug!(kind = self.kind(), error = %self, "request rejected");
        }

        let body = ErrorResponse {
            kind: self.kind().to_string(),
            message: self.public_message(),
        };
        (status, Json(body)).into_response()
    }
}

// =============================================================================
// TESTS
// =============================================================================
