//! Repository tests against a real Postgres.
//!
//! Needs `DATABASE_URL` pointing at a scratch database; migrations are applied
//! on connect. Every test creates its own book so runs do not interfere.

use chrono::{DateTime, Duration, TimeZone, Utc};
use sqlx::postgres::PgPoolOptions;

use lending_engine::{
    error::{AppError, LendingConflict},
    models::loan::{Fine, Loan, LoanStatus, NewLoan, ReadingSession},
    repository::{LendingStore, Repository},
};

fn issued() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

async fn repository() -> Repository {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = PgPoolOptions::new()
        .max_connections(4)
        .connect(&url)
        .await
        .expect("Failed to connect to database");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run database migrations");
    Repository::new(pool)
}

async fn insert_book(repo: &Repository, capacity: i32) -> i32 {
    sqlx::query_scalar::<_, i32>(
        "INSERT INTO books (title, capacity, total_pages) VALUES ('Kindred', $1, 300) RETURNING id",
    )
    .bind(capacity)
    .fetch_one(&repo.pool)
    .await
    .expect("Failed to insert book")
}

async fn open_loan(repo: &Repository, book_id: i32, user_id: i32) -> Loan {
    repo.try_reserve(book_id)
        .await
        .unwrap()
        .expect("book should have room");
    repo.insert_loan(&NewLoan {
        book_id,
        user_id,
        issue_date: issued(),
        due_date: issued() + Duration::days(21),
    })
    .await
    .unwrap()
}

#[tokio::test]
#[ignore] // Run with: cargo test -- --ignored
async fn test_reserve_refused_at_capacity() {
    let repo = repository().await;
    let book_id = insert_book(&repo, 1).await;

    let first = repo.try_reserve(book_id).await.unwrap().unwrap();
    assert_eq!(first.reserved, 1);
    assert_eq!(first.total_loan_count, 1);

    assert!(repo.try_reserve(book_id).await.unwrap().is_none());
    let book = repo.get_book(book_id).await.unwrap();
    assert_eq!(book.reserved, 1);
    assert_eq!(book.total_loan_count, 1);
}

#[tokio::test]
#[ignore]
async fn test_second_commit_return_is_refused_and_releases_once() {
    let repo = repository().await;
    let book_id = insert_book(&repo, 1).await;
    let mut loan = open_loan(&repo, book_id, 41).await;

    loan.return_date = Some(issued() + Duration::days(23));
    loan.status = LoanStatus::Returned;
    loan.fine = Some(Fine {
        amount: "1.00".parse().unwrap(),
        paid: false,
        paid_at: None,
    });

    let book = repo.commit_return(&loan).await.unwrap();
    assert_eq!(book.reserved, 0);

    let err = repo.commit_return(&loan).await.unwrap_err();
    assert_eq!(err.conflict(), Some(LendingConflict::AlreadyReturned));
    assert_eq!(repo.get_book(book_id).await.unwrap().reserved, 0);

    let stored = repo.get_loan(loan.id).await.unwrap();
    assert_eq!(stored.status, LoanStatus::Returned);
    assert!(!stored.is_active());
}

#[tokio::test]
#[ignore]
async fn test_duplicate_active_loan_hits_unique_index() {
    let repo = repository().await;
    let book_id = insert_book(&repo, 2).await;
    open_loan(&repo, book_id, 42).await;

    let err = repo
        .insert_loan(&NewLoan {
            book_id,
            user_id: 42,
            issue_date: issued(),
            due_date: issued() + Duration::days(21),
        })
        .await
        .unwrap_err();
    assert_eq!(err.conflict(), Some(LendingConflict::DuplicateActiveLoan));
}

#[tokio::test]
#[ignore]
async fn test_renewal_guard_rejects_stale_count() {
    let repo = repository().await;
    let book_id = insert_book(&repo, 1).await;
    let loan = open_loan(&repo, book_id, 43).await;
    let due = loan.due_date + Duration::days(14);

    let renewed = repo.store_renewal(loan.id, 0, due).await.unwrap().unwrap();
    assert_eq!(renewed.renewal_count, 1);
    assert_eq!(renewed.due_date, due);

    let stale = repo
        .store_renewal(loan.id, 0, due + Duration::days(14))
        .await
        .unwrap();
    assert!(stale.is_none());
    assert_eq!(repo.get_loan(loan.id).await.unwrap().due_date, due);
}

#[tokio::test]
#[ignore]
async fn test_progress_guard_appends_and_rejects_stale_page() {
    let repo = repository().await;
    let book_id = insert_book(&repo, 1).await;
    let loan = open_loan(&repo, book_id, 44).await;
    let session = ReadingSession {
        start_time: issued(),
        end_time: issued() + Duration::minutes(20),
        pages_read: 29,
    };

    let moved = repo
        .store_progress(loan.id, 1, 30, &session)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(moved.last_read_page, 30);
    assert_eq!(moved.reading_sessions, vec![session.clone()]);

    assert!(repo.store_progress(loan.id, 1, 10, &session).await.unwrap().is_none());
    // A renewal in between leaves progress untouched
    repo.store_renewal(loan.id, 0, loan.due_date + Duration::days(14))
        .await
        .unwrap()
        .unwrap();
    let stored = repo.get_loan(loan.id).await.unwrap();
    assert_eq!(stored.last_read_page, 30);
    assert_eq!(stored.reading_sessions.len(), 1);
    assert_eq!(stored.renewal_count, 1);
}

#[tokio::test]
#[ignore]
async fn test_missing_loan_is_not_found() {
    let repo = repository().await;
    let err = repo.get_loan(i32::MAX).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}
