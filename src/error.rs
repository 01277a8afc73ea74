//! Error types for the lending server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Stable numeric error codes returned to API clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    Failure = 1,
    NotAuthorized = 2,
    DbFailure = 3,
    NotFound = 4,
    BadValue = 5,
    Busy = 6,
    InventoryExhausted = 10,
    DuplicateActiveLoan = 11,
    MaxLoansReached = 12,
    MaxRenewalsReached = 13,
    AlreadyReturned = 14,
    OverdueRenewalForbidden = 15,
    LoanNotActive = 16,
    UserInactive = 17,
    FineAlreadyPaid = 18,
    NoFineDue = 19,
}

/// Business-rule violations. Never retried automatically.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LendingConflict {
    #[error("Book has no copy available for lending")]
    InventoryExhausted,

    #[error("User already has an active loan for this book")]
    DuplicateActiveLoan,

    #[error("Maximum number of active loans reached")]
    MaxLoansReached,

    #[error("Maximum number of renewals reached")]
    MaxRenewalsReached,

    #[error("Loan already returned")]
    AlreadyReturned,

    #[error("Overdue loans must be renewed by a librarian")]
    OverdueRenewalForbidden,

    #[error("Loan is not active")]
    LoanNotActive,

    #[error("User account is inactive")]
    UserInactive,

    #[error("Fine already paid")]
    FineAlreadyPaid,

    #[error("No fine is due on this loan")]
    NoFineDue,
}

impl LendingConflict {
    pub fn code(&self) -> ErrorCode {
        match self {
            LendingConflict::InventoryExhausted => ErrorCode::InventoryExhausted,
            LendingConflict::DuplicateActiveLoan => ErrorCode::DuplicateActiveLoan,
            LendingConflict::MaxLoansReached => ErrorCode::MaxLoansReached,
            LendingConflict::MaxRenewalsReached => ErrorCode::MaxRenewalsReached,
            LendingConflict::AlreadyReturned => ErrorCode::AlreadyReturned,
            LendingConflict::OverdueRenewalForbidden => ErrorCode::OverdueRenewalForbidden,
            LendingConflict::LoanNotActive => ErrorCode::LoanNotActive,
            LendingConflict::UserInactive => ErrorCode::UserInactive,
            LendingConflict::FineAlreadyPaid => ErrorCode::FineAlreadyPaid,
            LendingConflict::NoFineDue => ErrorCode::NoFineDue,
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            LendingConflict::UserInactive | LendingConflict::OverdueRenewalForbidden => {
                StatusCode::FORBIDDEN
            }
            _ => StatusCode::CONFLICT,
        }
    }
}

/// Main application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Authorization failed: {0}")]
    Authorization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(#[from] LendingConflict),

    /// A book or loan lock could not be acquired in time
    #[error("Resource busy: {0}")]
    Busy(String),

    #[error("Reservation counter of book {0} is already zero")]
    InventoryUnderflow(i32),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether the caller may retry the same request with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Busy(_))
    }

    /// The business conflict carried by this error, if any
    pub fn conflict(&self) -> Option<LendingConflict> {
        match self {
            AppError::Conflict(c) => Some(*c),
            _ => None,
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Validation(errors.to_string())
    }
}

/// Error response body
#[derive(Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub code: u32,
    pub error: String,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Authentication(msg) => {
                (StatusCode::UNAUTHORIZED, ErrorCode::NotAuthorized, msg.clone())
            }
            AppError::Authorization(msg) => {
                (StatusCode::FORBIDDEN, ErrorCode::NotAuthorized, msg.clone())
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, ErrorCode::NotFound, msg.clone()),
            AppError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, ErrorCode::BadValue, msg.clone())
            }
            AppError::Conflict(conflict) => (conflict.status(), conflict.code(), conflict.to_string()),
            AppError::Busy(msg) => (StatusCode::SERVICE_UNAVAILABLE, ErrorCode::Busy, msg.clone()),
            AppError::InventoryUnderflow(book_id) => {
                tracing::error!(book_id, "Reservation counter underflow");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorCode::Failure,
                    "Internal server error".to_string(),
                )
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorCode::DbFailure,
                    "Database error".to_string(),
                )
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorCode::Failure,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(ErrorResponse {
            code: code as u32,
            error: format!("{:?}", code),
            message,
        });

        (status, body).into_response()
    }
}

/// Result type alias for application operations
pub type AppResult<T> = Result<T, AppError>;
