//! In-process HTTP tests of the router

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use tower::ServiceExt;

use lending_engine::{
    api,
    clock::ManualClock,
    config::AppConfig,
    models::{
        book::Book,
        user::{Role, UserClaims},
    },
    repository::MemoryLendingStore,
    services::Services,
    AppState,
};

struct TestApp {
    router: Router,
    store: Arc<MemoryLendingStore>,
    clock: ManualClock,
    secret: String,
}

impl TestApp {
    fn new() -> Self {
        let config = AppConfig::default();
        let store = Arc::new(MemoryLendingStore::with_books([
            Book {
                id: 1,
                title: "Dune".to_string(),
                capacity: 1,
                reserved: 0,
                total_loan_count: 0,
                total_pages: 400,
            },
            Book {
                id: 2,
                title: "Solaris".to_string(),
                capacity: 2,
                reserved: 0,
                total_loan_count: 0,
                total_pages: 200,
            },
        ]));
        let clock = ManualClock::new(Utc::now());
        let services = Services::new(store.clone(), &config.lending, Arc::new(clock.clone()));
        let secret = config.auth.jwt_secret.clone();

        let router = api::router(AppState {
            config: Arc::new(config),
            services: Arc::new(services),
        });

        Self {
            router,
            store,
            clock,
            secret,
        }
    }

    fn token(&self, user_id: i32, role: Role, is_active: bool) -> String {
        let now = Utc::now();
        UserClaims {
            sub: format!("user-{}", user_id),
            user_id,
            role,
            is_active,
            max_books_allowed: 3,
            exp: (now + Duration::hours(1)).timestamp(),
            iat: now.timestamp(),
        }
        .create_token(&self.secret)
        .unwrap()
    }

    async fn call(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }
}

#[tokio::test]
async fn test_health_and_readiness() {
    let app = TestApp::new();

    let (status, body) = app.call(Method::GET, "/api/v1/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, body) = app.call(Method::GET, "/api/v1/ready", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");
}

#[tokio::test]
async fn test_missing_or_bad_token_is_unauthorized() {
    let app = TestApp::new();

    let (status, body) = app
        .call(Method::POST, "/api/v1/loans", None, Some(json!({ "book_id": 1 })))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], 2);

    let (status, _) = app
        .call(Method::GET, "/api/v1/loans/mine", Some("not-a-jwt"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_borrow_then_conflicts() {
    let app = TestApp::new();
    let alice = app.token(1, Role::User, true);
    let bob = app.token(2, Role::User, true);

    let (status, loan) = app
        .call(Method::POST, "/api/v1/loans", Some(&alice), Some(json!({ "book_id": 1 })))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(loan["book_id"], 1);
    assert_eq!(loan["user_id"], 1);
    assert_eq!(loan["status"], "active");
    assert_eq!(loan["renewal_count"], 0);

    let (status, body) = app
        .call(Method::POST, "/api/v1/loans", Some(&alice), Some(json!({ "book_id": 1 })))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "DuplicateActiveLoan");

    let (status, body) = app
        .call(Method::POST, "/api/v1/loans", Some(&bob), Some(json!({ "book_id": 1 })))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "InventoryExhausted");

    let (status, availability) = app
        .call(Method::GET, "/api/v1/books/1/availability", Some(&bob), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(availability["available"], 0);
    assert_eq!(availability["reserved"], 1);
}

#[tokio::test]
async fn test_inactive_account_is_forbidden() {
    let app = TestApp::new();
    let token = app.token(3, Role::User, false);

    let (status, body) = app
        .call(Method::POST, "/api/v1/loans", Some(&token), Some(json!({ "book_id": 2 })))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "UserInactive");
    assert_eq!(app.store.book(2).unwrap().reserved, 0);
}

#[tokio::test]
async fn test_unknown_book_is_not_found() {
    let app = TestApp::new();
    let token = app.token(1, Role::User, true);

    let (status, _) = app
        .call(Method::POST, "/api/v1/loans", Some(&token), Some(json!({ "book_id": 99 })))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_progress_and_return_flow() {
    let app = TestApp::new();
    let alice = app.token(1, Role::User, true);
    let librarian = app.token(50, Role::Librarian, true);

    let (_, loan) = app
        .call(Method::POST, "/api/v1/loans", Some(&alice), Some(json!({ "book_id": 2 })))
        .await;
    let id = loan["id"].as_i64().unwrap();

    let (status, progress) = app
        .call(
            Method::PUT,
            &format!("/api/v1/loans/{}/progress", id),
            Some(&alice),
            Some(json!({ "page_number": 100, "session_duration": 600 })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(progress["last_read_page"], 100);
    assert_eq!(progress["progress_percent"], 50);

    let (status, body) = app
        .call(
            Method::PUT,
            &format!("/api/v1/loans/{}/progress", id),
            Some(&alice),
            Some(json!({ "page_number": 201 })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "BadValue");

    let (status, _) = app
        .call(
            Method::PUT,
            &format!("/api/v1/loans/{}/progress", id),
            Some(&librarian),
            Some(json!({ "page_number": 150 })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, details) = app
        .call(Method::GET, &format!("/api/v1/loans/{}", id), Some(&alice), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(details["book_title"], "Solaris");
    assert_eq!(details["reading_progress"], 50);
    assert_eq!(details["is_overdue"], false);

    app.clock.advance(Duration::days(23));

    let (status, returned) = app
        .call(Method::POST, &format!("/api/v1/loans/{}/return", id), Some(&alice), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(returned["status"], "returned");
    assert_eq!(returned["fine"]["amount"], "2");
    assert_eq!(returned["fine"]["paid"], false);

    let (status, body) = app
        .call(Method::POST, &format!("/api/v1/loans/{}/return", id), Some(&alice), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "AlreadyReturned");
    assert_eq!(app.store.book(2).unwrap().reserved, 0);

    let (status, _) = app
        .call(Method::POST, &format!("/api/v1/loans/{}/fine/pay", id), Some(&alice), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, paid) = app
        .call(Method::POST, &format!("/api/v1/loans/{}/fine/pay", id), Some(&librarian), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(paid["fine"]["paid"], true);
}

#[tokio::test]
async fn test_overdue_renewal_by_role() {
    let app = TestApp::new();
    let alice = app.token(1, Role::User, true);
    let admin = app.token(60, Role::Admin, true);

    let (_, loan) = app
        .call(Method::POST, "/api/v1/loans", Some(&alice), Some(json!({ "book_id": 2 })))
        .await;
    let id = loan["id"].as_i64().unwrap();

    app.clock.advance(Duration::days(22));

    let (status, body) = app
        .call(Method::POST, &format!("/api/v1/loans/{}/renew", id), Some(&alice), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "OverdueRenewalForbidden");

    let (status, renewed) = app
        .call(Method::POST, &format!("/api/v1/loans/{}/renew", id), Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(renewed["renewal_count"], 1);
}

#[tokio::test]
async fn test_staff_listing_and_stats() {
    let app = TestApp::new();
    let alice = app.token(1, Role::User, true);
    let bob = app.token(2, Role::User, true);
    let librarian = app.token(50, Role::Librarian, true);

    app.call(Method::POST, "/api/v1/loans", Some(&alice), Some(json!({ "book_id": 1 })))
        .await;
    app.call(Method::POST, "/api/v1/loans", Some(&alice), Some(json!({ "book_id": 2 })))
        .await;
    app.call(Method::POST, "/api/v1/loans", Some(&bob), Some(json!({ "book_id": 2 })))
        .await;

    let (status, mine) = app
        .call(Method::GET, "/api/v1/loans/mine", Some(&bob), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(mine.as_array().unwrap().len(), 1);

    let (status, _) = app.call(Method::GET, "/api/v1/loans", Some(&bob), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, loans) = app
        .call(Method::GET, "/api/v1/loans?user_id=1", Some(&librarian), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(loans.as_array().unwrap().len(), 2);

    app.clock.advance(Duration::days(30));

    let (_, overdue) = app
        .call(Method::GET, "/api/v1/loans?overdue=true", Some(&librarian), None)
        .await;
    assert_eq!(overdue.as_array().unwrap().len(), 3);

    let (status, stats) = app
        .call(Method::GET, "/api/v1/stats/loans", Some(&librarian), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["active"], 3);
    assert_eq!(stats["overdue"], 3);
    assert_eq!(stats["returned"], 0);

    let (status, _) = app
        .call(Method::GET, "/api/v1/stats/loans", Some(&alice), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}
