//! Book availability endpoint

use axum::{
    extract::{Path, State},
    Json,
};

use crate::{error::AppResult, models::book::BookAvailability, AppState};

use super::AuthenticatedUser;

/// Current lending capacity of a book
#[utoipa::path(
    get,
    path = "/books/{id}/availability",
    tag = "books",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "Book ID")
    ),
    responses(
        (status = 200, description = "Availability", body = BookAvailability),
        (status = 404, description = "Book not found")
    )
)]
pub async fn get_availability(
    State(state): State<AppState>,
    AuthenticatedUser(_principal): AuthenticatedUser,
    Path(book_id): Path<i32>,
) -> AppResult<Json<BookAvailability>> {
    let availability = state.services.lending.availability(book_id).await?;
    Ok(Json(availability))
}
