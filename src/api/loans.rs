//! Loan management endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::{
    error::AppResult,
    models::loan::{
        BorrowRequest, Loan, LoanDetails, LoanFilter, LoanStatus, ReadingProgress,
        UpdateProgressRequest,
    },
    AppState,
};

use super::AuthenticatedUser;

/// Query for the caller's own loans
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct MyLoansQuery {
    /// Restrict to one lifecycle status
    pub status: Option<LoanStatus>,
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
        (status = 403, description = "Account inactive"),
        (status = 404, description = "Book not found"),
        (status = 409, description = "No copy available, duplicate loan or loan cap reached"),
        (status = 503, description = "Book busy, retry later")
    )
)]
pub async fn borrow_book(
    State(state): State<AppState>,
    AuthenticatedUser(principal): AuthenticatedUser,
    Json(request): Json<BorrowRequest>,
) -> AppResult<(StatusCode, Json<Loan>)> {
    let loan = state.services.lending.borrow(&principal, request.book_id).await?;
    Ok((StatusCode::CREATED, Json(loan)))
}

/// List loans (librarian or admin)
#[utoipa::path(
    get,
    path = "/loans",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(LoanFilter),
    responses(
        (status = 200, description = "Matching loans", body = Vec<LoanDetails>),
        (status = 403, description = "Staff role required")
    )
)]
pub async fn list_loans(
    State(state): State<AppState>,
    AuthenticatedUser(principal): AuthenticatedUser,
    Query(filter): Query<LoanFilter>,
) -> AppResult<Json<Vec<LoanDetails>>> {
    let loans = state.services.lending.list_loans(&principal, &filter).await?;
    Ok(Json(loans))
}

/// List the caller's loans
#[utoipa::path(
    get,
    path = "/loans/mine",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(MyLoansQuery),
    responses(
        (status = 200, description = "Caller's loans", body = Vec<LoanDetails>)
    )
)]
pub async fn list_my_loans(
    State(state): State<AppState>,
    AuthenticatedUser(principal): AuthenticatedUser,
    Query(query): Query<MyLoansQuery>,
) -> AppResult<Json<Vec<LoanDetails>>> {
    let loans = state
        .services
        .lending
        .list_my_loans(&principal, query.status)
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
        (status = 200, description = "Loan details", body = LoanDetails),
        (status = 403, description = "Not the borrower"),
        (status = 404, description = "Loan not found")
    )
)]
pub async fn get_loan(
    State(state): State<AppState>,
    AuthenticatedUser(principal): AuthenticatedUser,
    Path(loan_id): Path<i32>,
) -> AppResult<Json<LoanDetails>> {
    let loan = state.services.lending.get_loan(&principal, loan_id).await?;
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
        (status = 200, description = "Book returned, fine fixed", body = Loan),
        (status = 403, description = "Not the borrower"),
        (status = 404, description = "Loan not found"),
        (status = 409, description = "Already returned")
    )
)]
pub async fn return_loan(
    State(state): State<AppState>,
    AuthenticatedUser(principal): AuthenticatedUser,
    Path(loan_id): Path<i32>,
) -> AppResult<Json<Loan>> {
    let loan = state.services.lending.return_loan(&principal, loan_id).await?;
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
        (status = 403, description = "Not the borrower, or overdue"),
        (status = 404, description = "Loan not found"),
        (status = 409, description = "Renewal limit reached or already returned")
    )
)]
pub async fn renew_loan(
    State(state): State<AppState>,
    AuthenticatedUser(principal): AuthenticatedUser,
    Path(loan_id): Path<i32>,
) -> AppResult<Json<Loan>> {
    let loan = state.services.lending.renew(&principal, loan_id).await?;
    Ok(Json(loan))
}

/// Report reading progress
#[utoipa::path(
    put,
    path = "/loans/{id}/progress",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "Loan ID")
    ),
    request_body = UpdateProgressRequest,
    responses(
        (status = 200, description = "Current progress", body = ReadingProgress),
        (status = 400, description = "Page past the end or invalid duration"),
        (status = 403, description = "Not the borrower"),
        (status = 409, description = "Loan not active")
    )
)]
pub async fn update_progress(
    State(state): State<AppState>,
    AuthenticatedUser(principal): AuthenticatedUser,
    Path(loan_id): Path<i32>,
    Json(request): Json<UpdateProgressRequest>,
) -> AppResult<Json<ReadingProgress>> {
    let progress = state
        .services
        .lending
        .update_progress(&principal, loan_id, request)
        .await?;
    Ok(Json(progress))
}

/// Mark a fine as paid (librarian or admin)
#[utoipa::path(
    post,
    path = "/loans/{id}/fine/pay",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "Loan ID")
    ),
    responses(
        (status = 200, description = "Fine paid", body = Loan),
        (status = 403, description = "Staff role required"),
        (status = 404, description = "Loan not found"),
        (status = 409, description = "No fine due or already paid")
    )
)]
pub async fn pay_fine(
    State(state): State<AppState>,
    AuthenticatedUser(principal): AuthenticatedUser,
    Path(loan_id): Path<i32>,
) -> AppResult<Json<Loan>> {
    let loan = state.services.lending.pay_fine(&principal, loan_id).await?;
    Ok(Json(loan))
}
