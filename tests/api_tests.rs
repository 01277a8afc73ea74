//! API integration tests against a running server.
//!
//! Expects the server on localhost:8080 with a database holding at least one
//! book with free capacity (`TEST_BOOK_ID`, default 1). Tokens are signed with
//! `JWT_SECRET` or the default development secret.

use chrono::{Duration, Utc};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

use lending_engine::{
    config::AuthConfig,
    models::user::{Role, UserClaims},
};

const BASE_URL: &str = "http://localhost:8080/api/v1";

fn token(user_id: i32, role: Role) -> String {
    let secret = std::env::var("JWT_SECRET").unwrap_or_else(|_| AuthConfig::default().jwt_secret);
    let now = Utc::now();
    UserClaims {
        sub: format!("live-{}", user_id),
        user_id,
        role,
        is_active: true,
        max_books_allowed: 5,
        exp: (now + Duration::minutes(10)).timestamp(),
        iat: now.timestamp(),
    }
    .create_token(&secret)
    .expect("Failed to sign token")
}

fn test_book_id() -> i32 {
    std::env::var("TEST_BOOK_ID")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(1)
}

#[tokio::test]
#[ignore] // Run with: cargo test -- --ignored
async fn test_health_check() {
    let client = Client::new();

    let response = client
        .get(format!("{}/health", BASE_URL))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());

    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
#[ignore]
async fn test_readiness_reaches_database() {
    let client = Client::new();

    let response = client
        .get(format!("{}/ready", BASE_URL))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
#[ignore]
async fn test_unauthenticated_borrow_rejected() {
    let client = Client::new();

    let response = client
        .post(format!("{}/loans", BASE_URL))
        .json(&json!({ "book_id": test_book_id() }))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
#[ignore]
async fn test_borrow_and_return_round_trip() {
    let client = Client::new();
    // Unique user so reruns do not collide with an earlier active loan
    let user_id = 100_000 + (Utc::now().timestamp_subsec_micros() % 100_000) as i32;
    let reader = token(user_id, Role::User);

    let response = client
        .post(format!("{}/loans", BASE_URL))
        .bearer_auth(&reader)
        .json(&json!({ "book_id": test_book_id() }))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), StatusCode::CREATED);

    let loan: Value = response.json().await.expect("Failed to parse response");
    let loan_id = loan["id"].as_i64().expect("No loan id");
    assert_eq!(loan["status"], "active");

    let response = client
        .get(format!("{}/loans/mine", BASE_URL))
        .bearer_auth(&reader)
        .send()
        .await
        .expect("Failed to send request");
    let mine: Value = response.json().await.expect("Failed to parse response");
    assert!(mine
        .as_array()
        .expect("Expected an array")
        .iter()
        .any(|l| l["id"].as_i64() == Some(loan_id)));

    let response = client
        .post(format!("{}/loans/{}/return", BASE_URL, loan_id))
        .bearer_auth(&reader)
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), StatusCode::OK);

    let returned: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(returned["status"], "returned");

    let response = client
        .post(format!("{}/loans/{}/return", BASE_URL, loan_id))
        .bearer_auth(&reader)
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
#[ignore]
async fn test_loan_stats_requires_staff() {
    let client = Client::new();

    let response = client
        .get(format!("{}/stats/loans", BASE_URL))
        .bearer_auth(token(7, Role::User))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = client
        .get(format!("{}/stats/loans", BASE_URL))
        .bearer_auth(token(1, Role::Admin))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), StatusCode::OK);

    let stats: Value = response.json().await.expect("Failed to parse response");
    assert!(stats["active"].is_i64());
}
