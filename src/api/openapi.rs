//! OpenAPI documentation

use axum::Router;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::api::{books, health, loans, stats};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Lending API",
        version = "1.0.0",
        description = "Book lending, returns, renewals, reading progress and fines"
    ),
    servers(
        (url = "/api/v1", description = "API v1")
    ),
    paths(
        // Health
        health::health_check,
        health::readiness_check,
        // Books
        books::get_availability,
        // Loans
        loans::borrow_book,
        loans::list_loans,
        loans::list_my_loans,
        loans::get_loan,
        loans::return_loan,
        loans::renew_loan,
        loans::update_progress,
        loans::pay_fine,
        // Stats
        stats::get_loan_stats,
    ),
    components(
        schemas(
            crate::models::book::BookAvailability,
            crate::models::loan::Loan,
            crate::models::loan::LoanStatus,
            crate::models::loan::ReadingSession,
            crate::models::loan::Fine,
            crate::models::loan::LoanDetails,
            crate::models::loan::LoanCounts,
            crate::models::loan::BorrowRequest,
            crate::models::loan::UpdateProgressRequest,
            crate::models::loan::ReadingProgress,
            health::HealthResponse,
            crate::error::ErrorResponse,
        )
    ),
    modifiers(&BearerAuth),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "books", description = "Book availability"),
        (name = "loans", description = "Loan management"),
        (name = "stats", description = "Statistics")
    )
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// Create the OpenAPI documentation router
pub fn create_openapi_router() -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}
