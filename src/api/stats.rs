//! Statistics endpoints

use axum::{extract::State, Json};

use crate::{error::AppResult, models::loan::LoanCounts, AppState};

use super::AuthenticatedUser;

/// Loan counters (librarian or admin)
#[utoipa::path(
    get,
    path = "/stats/loans",
    tag = "stats",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Loan statistics", body = LoanCounts),
        (status = 403, description = "Staff role required")
    )
)]
pub async fn get_loan_stats(
    State(state): State<AppState>,
    AuthenticatedUser(principal): AuthenticatedUser,
) -> AppResult<Json<LoanCounts>> {
    let stats = state.services.lending.loan_stats(&principal).await?;
    Ok(Json(stats))
}
