//! Repository layer for database operations

pub mod books;
pub mod loans;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};

use crate::{
    error::{AppError, AppResult, LendingConflict},
    models::{
        book::Book,
        loan::{Loan, LoanCounts, LoanFilter, NewLoan, ReadingSession},
    },
};

pub use memory::MemoryLendingStore;

/// Persistence contract required by the lending engine.
///
/// Every method is atomic on its own. `try_reserve` and `try_release` are
/// single conditional updates of the book counter, `insert_loan` is backed by
/// a uniqueness constraint on unreturned `(user_id, book_id)` pairs, and
/// `commit_return` stores the returned loan and releases its reservation as
/// one unit of work.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LendingStore: Send + Sync {
    /// Cheap round trip used by readiness probes
    async fn ping(&self) -> AppResult<()>;

    async fn get_book(&self, book_id: i32) -> AppResult<Book>;

    /// `reserved += 1` and `total_loan_count += 1` if `reserved < capacity`.
    /// `None` when the book is at capacity.
    async fn try_reserve(&self, book_id: i32) -> AppResult<Option<Book>>;

    /// `reserved -= 1` if `reserved > 0`. `None` when already zero.
    async fn try_release(&self, book_id: i32) -> AppResult<Option<Book>>;

    async fn get_loan(&self, loan_id: i32) -> AppResult<Loan>;

    async fn find_active_loan(&self, user_id: i32, book_id: i32) -> AppResult<Option<Loan>>;

    async fn count_active_loans(&self, user_id: i32) -> AppResult<i64>;

    /// Fails with `DuplicateActiveLoan` if the pair already has an unreturned loan
    async fn insert_loan(&self, loan: &NewLoan) -> AppResult<Loan>;

    /// Records one renewal, moving the due date to `due_date`, if the loan is
    /// unreturned and still has `previous_count` renewals. `None` when the
    /// stored loan no longer matches.
    async fn store_renewal(
        &self,
        loan_id: i32,
        previous_count: i16,
        due_date: DateTime<Utc>,
    ) -> AppResult<Option<Loan>>;

    /// Moves `last_read_page` from `previous_page` to `page` and appends
    /// `session`, if the loan is unreturned and still at `previous_page`.
    /// `None` when the stored loan no longer matches.
    async fn store_progress(
        &self,
        loan_id: i32,
        previous_page: i32,
        page: i32,
        session: &ReadingSession,
    ) -> AppResult<Option<Loan>>;

    /// Stores the return fields of `loan` and decrements its book's counter
    /// together. Nothing is written if either step fails.
    async fn commit_return(&self, loan: &Loan) -> AppResult<Book>;

    async fn mark_fine_paid(&self, loan_id: i32, paid_at: DateTime<Utc>) -> AppResult<Loan>;

    async fn list_loans(&self, filter: &LoanFilter, now: DateTime<Utc>) -> AppResult<Vec<Loan>>;

    async fn loan_counts(&self, now: DateTime<Utc>) -> AppResult<LoanCounts>;
}

/// Postgres-backed store holding the connection pool
#[derive(Clone)]
pub struct Repository {
    pub pool: Pool<Postgres>,
    pub books: books::BooksRepository,
    pub loans: loans::LoansRepository,
}

impl Repository {
    /// Create a new repository with the given database pool
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            books: books::BooksRepository::new(pool.clone()),
            loans: loans::LoansRepository::new(pool.clone()),
            pool,
        }
    }
}

#[async_trait]
impl LendingStore for Repository {
    async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn get_book(&self, book_id: i32) -> AppResult<Book> {
        self.books.get_by_id(book_id).await
    }

    async fn try_reserve(&self, book_id: i32) -> AppResult<Option<Book>> {
        self.books.try_reserve(book_id).await
    }

    async fn try_release(&self, book_id: i32) -> AppResult<Option<Book>> {
        self.books.try_release(book_id).await
    }

    async fn get_loan(&self, loan_id: i32) -> AppResult<Loan> {
        self.loans.get_by_id(loan_id).await
    }

    async fn find_active_loan(&self, user_id: i32, book_id: i32) -> AppResult<Option<Loan>> {
        self.loans.find_active(user_id, book_id).await
    }

    async fn count_active_loans(&self, user_id: i32) -> AppResult<i64> {
        self.loans.count_active_for_user(user_id).await
    }

    async fn insert_loan(&self, loan: &NewLoan) -> AppResult<Loan> {
        self.loans.create(loan).await
    }

    async fn store_renewal(
        &self,
        loan_id: i32,
        previous_count: i16,
        due_date: DateTime<Utc>,
    ) -> AppResult<Option<Loan>> {
        self.loans.store_renewal(loan_id, previous_count, due_date).await
    }

    async fn store_progress(
        &self,
        loan_id: i32,
        previous_page: i32,
        page: i32,
        session: &ReadingSession,
    ) -> AppResult<Option<Loan>> {
        self.loans
            .store_progress(loan_id, previous_page, page, session)
            .await
    }

    async fn commit_return(&self, loan: &Loan) -> AppResult<Book> {
        let mut tx = self.pool.begin().await?;

        if loans::LoansRepository::store_return(&mut tx, loan).await?.is_none() {
            // Either gone or returned concurrently; report which
            tx.rollback().await?;
            self.loans.get_by_id(loan.id).await?;
            return Err(LendingConflict::AlreadyReturned.into());
        }

        let Some(book) = books::BooksRepository::release_in(&mut tx, loan.book_id).await? else {
            tx.rollback().await?;
            return Err(AppError::InventoryUnderflow(loan.book_id));
        };

        tx.commit().await?;
        Ok(book)
    }

    async fn mark_fine_paid(&self, loan_id: i32, paid_at: DateTime<Utc>) -> AppResult<Loan> {
        self.loans.mark_fine_paid(loan_id, paid_at).await
    }

    async fn list_loans(&self, filter: &LoanFilter, now: DateTime<Utc>) -> AppResult<Vec<Loan>> {
        self.loans.list(filter, now).await
    }

    async fn loan_counts(&self, now: DateTime<Utc>) -> AppResult<LoanCounts> {
        self.loans.counts(now).await
    }
}
