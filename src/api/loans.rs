//! Loan management endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};

use crate::{
    error::AppResult,
    models::{
        loan::{Loan, LoanFilter},
        user::BorrowerType,
    },
};

use super::AuthenticatedUser;

/// Borrow request
#[derive(Deserialize, ToSchema)]
pub struct BorrowRequest {
    /// Book ID
    pub book_id: i32,
    /// Borrower (staff only; students and faculty borrow for themselves)
    pub borrower_id: Option<i32>,
    /// Borrower type (staff only)
    pub borrower_type: Option<BorrowerType>,
}

/// "My books" query
#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct MyLoansQuery {
    /// Include returned loans
    pub include_returned: Option<bool>,
}

/// Borrow a book
#[utoipa::path(
    post,
    path = "/loans",
    tag = "loans",
    security(("bearer_auth" = [])),
    request_body = BorrowRequest,
    responses(
        (status = 201, description = "Loan created", body = Loan),
        (status = 403, description = "Not allowed to borrow for this user"),
        (status = 404, description = "Book not found"),
        (status = 409, description = "No copy available, already borrowed, or loan limit reached")
    )
)]
pub async fn create_loan(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Json(request): Json<BorrowRequest>,
) -> AppResult<(StatusCode, Json<Loan>)> {
    let (borrower_id, borrower_type) =
        claims.resolve_borrower(request.borrower_id, request.borrower_type)?;

    let loan = state
        .services
        .loans
        .borrow(request.book_id, borrower_id, borrower_type, claims.user_id, Utc::now())
        .await?;

    Ok((StatusCode::CREATED, Json(loan)))
}

/// List all borrows (library staff)
#[utoipa::path(
    get,
    path = "/loans",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(LoanFilter),
    responses(
        (status = 200, description = "Loans, refreshed", body = Vec<Loan>),
        (status = 403, description = "Library staff only")
    )
)]
pub async fn list_loans(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Query(filter): Query<LoanFilter>,
) -> AppResult<Json<Vec<Loan>>> {
    claims.require_library_staff()?;

    let loans = state.services.loans.list_loans(&filter, Utc::now()).await?;
    Ok(Json(loans))
}

/// List the caller's own loans
#[utoipa::path(
    get,
    path = "/loans/mine",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(MyLoansQuery),
    responses(
        (status = 200, description = "Caller's loans, refreshed", body = Vec<Loan>)
    )
)]
pub async fn my_loans(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Query(query): Query<MyLoansQuery>,
) -> AppResult<Json<Vec<Loan>>> {
    let loans = state
        .services
        .loans
        .list_borrower_loans(claims.user_id, query.include_returned.unwrap_or(false), Utc::now())
        .await?;
    Ok(Json(loans))
}

/// Get one loan
#[utoipa::path(
    get,
    path = "/loans/{id}",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "Loan ID")
    ),
    responses(
        (status = 200, description = "Loan, refreshed", body = Loan),
        (status = 403, description = "Not the borrower"),
        (status = 404, description = "Loan not found")
    )
)]
pub async fn get_loan(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(loan_id): Path<i32>,
) -> AppResult<Json<Loan>> {
    let loan = state.services.loans.get_loan(loan_id, &claims, Utc::now()).await?;
    Ok(Json(loan))
}

/// Return a borrowed book
#[utoipa::path(
    post,
    path = "/loans/{id}/return",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "Loan ID")
    ),
    responses(
        (status = 200, description = "Book returned", body = Loan),
        (status = 403, description = "Not the borrower"),
        (status = 404, description = "Loan not found"),
        (status = 409, description = "Already returned")
    )
)]
pub async fn return_loan(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(loan_id): Path<i32>,
) -> AppResult<Json<Loan>> {
    let loan = state.services.loans.return_loan(loan_id, &claims, Utc::now()).await?;
    Ok(Json(loan))
}

/// Renew a loan
#[utoipa::path(
    post,
    path = "/loans/{id}/renew",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "Loan ID")
    ),
    responses(
        (status = 200, description = "Loan renewed", body = Loan),
        (status = 403, description = "Not the borrower"),
        (status = 404, description = "Loan not found"),
        (status = 409, description = "Already returned, max renewals reached, or unpaid fine")
    )
)]
pub async fn renew_loan(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(loan_id): Path<i32>,
) -> AppResult<Json<Loan>> {
    let loan = state.services.loans.renew(loan_id, &claims, Utc::now()).await?;
    Ok(Json(loan))
}

/// Pay the fine on a loan
#[utoipa::path(
    post,
    path = "/loans/{id}/pay-fine",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "Loan ID")
    ),
    responses(
        (status = 200, description = "Fine paid", body = Loan),
        (status = 403, description = "Not the borrower"),
        (status = 404, description = "Loan not found"),
        (status = 409, description = "Fine already paid"),
        (status = 422, description = "No fine due")
    )
)]
pub async fn pay_fine(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(loan_id): Path<i32>,
) -> AppResult<Json<Loan>> {
    let loan = state.services.loans.pay_fine(loan_id, &claims, Utc::now()).await?;
    Ok(Json(loan))
}
