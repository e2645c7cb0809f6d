//! Error types for the campus library server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

/// Stable error codes reported in every error body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    Failure = 1,
    NotAuthorized = 2,
    DbFailure = 3,
    NoSuchData = 4,
    BookNotAvailable = 5,
    Duplicate = 6,
    MaxBorrowsReached = 7,
    LoanAlreadyReturned = 8,
    MaxRenewalsReached = 9,
    OutstandingFine = 10,
    FineAlreadyPaid = 11,
    NoFineDue = 12,
    BadValue = 13,
}

/// Rejections raised by the loan ledger.
///
/// Every variant is a deterministic precondition failure: retrying without
/// changing something (paying, returning a book, waiting for a copy) fails
/// the same way.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("No copies of book {book_id} are available")]
    Unavailable { book_id: i32 },

    #[error("Borrower {borrower_id} already has book {book_id} on loan")]
    DuplicateLoan { book_id: i32, borrower_id: i32 },

    #[error("Borrower {borrower_id} has reached the loan limit ({active}/{max})")]
    LimitExceeded { borrower_id: i32, active: i64, max: u32 },

    #[error("Loan {loan_id} has already been returned")]
    AlreadyReturned { loan_id: i32 },

    #[error("Loan {loan_id} has reached the maximum number of renewals ({max})")]
    RenewalLimitExceeded { loan_id: i32, max: i16 },

    #[error("Loan {loan_id} has an unpaid fine of {amount}")]
    OutstandingFine { loan_id: i32, amount: Decimal },

    #[error("Fine for loan {loan_id} has already been paid")]
    AlreadyPaid { loan_id: i32 },

    #[error("Not authorized: {0}")]
    Unauthorized(String),

    #[error("Loan {loan_id} has no fine to pay")]
    NothingToPay { loan_id: i32 },
}

impl LedgerError {
    fn status_and_code(&self) -> (StatusCode, ErrorCode) {
        match self {
            LedgerError::NotFound(_) => (StatusCode::NOT_FOUND, ErrorCode::NoSuchData),
            LedgerError::Unavailable { .. } => (StatusCode::CONFLICT, ErrorCode::BookNotAvailable),
            LedgerError::DuplicateLoan { .. } => (StatusCode::CONFLICT, ErrorCode::Duplicate),
            LedgerError::LimitExceeded { .. } => (StatusCode::CONFLICT, ErrorCode::MaxBorrowsReached),
            LedgerError::AlreadyReturned { .. } => {
                (StatusCode::CONFLICT, ErrorCode::LoanAlreadyReturned)
            }
            LedgerError::RenewalLimitExceeded { .. } => {
                (StatusCode::CONFLICT, ErrorCode::MaxRenewalsReached)
            }
            LedgerError::OutstandingFine { .. } => (StatusCode::CONFLICT, ErrorCode::OutstandingFine),
            LedgerError::AlreadyPaid { .. } => (StatusCode::CONFLICT, ErrorCode::FineAlreadyPaid),
            LedgerError::Unauthorized(_) => (StatusCode::FORBIDDEN, ErrorCode::NotAuthorized),
            LedgerError::NothingToPay { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, ErrorCode::NoFineDue)
            }
        }
    }
}

/// Main application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// The ledger rejection behind this error, if any
    pub fn ledger(&self) -> Option<&LedgerError> {
        match self {
            AppError::Ledger(e) => Some(e),
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
            AppError::Ledger(e) => {
                let (status, code) = e.status_and_code();
                (status, code, e.to_string())
            }
            AppError::Authentication(msg) => {
                (StatusCode::UNAUTHORIZED, ErrorCode::NotAuthorized, msg.clone())
            }
            AppError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, ErrorCode::BadValue, msg.clone())
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorCode::DbFailure,
                    "Database error".to_string(),
                )
            }
            AppError::Conflict(msg) => {
                (StatusCode::CONFLICT, ErrorCode::Duplicate, msg.clone())
            }
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, ErrorCode::BadValue, msg.clone())
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_errors_map_to_conflict_or_forbidden() {
        let resp = AppError::from(LedgerError::Unavailable { book_id: 3 }).into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let resp = AppError::from(LedgerError::Unauthorized("nope".into())).into_response();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let resp = AppError::from(LedgerError::NotFound("Loan 9".into())).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn database_errors_are_masked() {
        let resp = AppError::from(sqlx::Error::RowNotFound).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
