//! Loans repository for database operations

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{types::Json, PgConnection, Pool, Postgres, QueryBuilder, Row};

use crate::{
    error::{AppError, AppResult, LendingConflict},
    models::loan::{Loan, LoanCounts, LoanFilter, LoanRow, NewLoan, ReadingSession},
};

/// Partial unique index on unreturned `(user_id, book_id)` pairs
const ONE_ACTIVE_LOAN_INDEX: &str = "loans_one_active_per_user_book";

#[derive(Clone)]
pub struct LoansRepository {
    pool: Pool<Postgres>,
}

impl LoansRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Get loan by ID
    pub async fn get_by_id(&self, id: i32) -> AppResult<Loan> {
        sqlx::query_as::<_, LoanRow>("SELECT * FROM loans WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Loan::from)
            .ok_or_else(|| AppError::NotFound(format!("Loan with id {} not found", id)))
    }

    /// Unreturned loan of a user for a book
    pub async fn find_active(&self, user_id: i32, book_id: i32) -> AppResult<Option<Loan>> {
        let row = sqlx::query_as::<_, LoanRow>(
            "SELECT * FROM loans WHERE user_id = $1 AND book_id = $2 AND return_date IS NULL",
        )
        .bind(user_id)
        .bind(book_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Loan::from))
    }

    /// Count unreturned loans of a user
    pub async fn count_active_for_user(&self, user_id: i32) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM loans WHERE user_id = $1 AND return_date IS NULL",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Insert a new active loan
    pub async fn create(&self, loan: &NewLoan) -> AppResult<Loan> {
        let row = sqlx::query_as::<_, LoanRow>(
            r#"
            INSERT INTO loans (book_id, user_id, issue_date, due_date, status, renewal_count, last_read_page)
            VALUES ($1, $2, $3, $4, 'active', 0, 1)
            RETURNING *
            "#,
        )
        .bind(loan.book_id)
        .bind(loan.user_id)
        .bind(loan.issue_date)
        .bind(loan.due_date)
        .fetch_one(&self.pool)
        .await
        .map_err(map_unique_violation)?;

        Ok(row.into())
    }

    /// Apply one renewal to an unreturned loan still at `previous_count`
    pub async fn store_renewal(
        &self,
        id: i32,
        previous_count: i16,
        due_date: DateTime<Utc>,
    ) -> AppResult<Option<Loan>> {
        let row = sqlx::query_as::<_, LoanRow>(
            r#"
            UPDATE loans
            SET due_date = $3, renewal_count = renewal_count + 1
            WHERE id = $1 AND return_date IS NULL AND renewal_count = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(previous_count)
        .bind(due_date)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Loan::from))
    }

    /// Advance the reading position of an unreturned loan still at `previous_page`
    pub async fn store_progress(
        &self,
        id: i32,
        previous_page: i32,
        page: i32,
        session: &ReadingSession,
    ) -> AppResult<Option<Loan>> {
        let row = sqlx::query_as::<_, LoanRow>(
            r#"
            UPDATE loans
            SET last_read_page = $3, reading_sessions = reading_sessions || $4
            WHERE id = $1 AND return_date IS NULL AND last_read_page = $2 AND $3 > $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(previous_page)
        .bind(page)
        .bind(Json([session]))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Loan::from))
    }

    /// Write the return fields of a loan still marked unreturned.
    /// `None` if the loan is missing or was already returned.
    pub async fn store_return(conn: &mut PgConnection, loan: &Loan) -> AppResult<Option<Loan>> {
        let fine_amount = loan.fine.as_ref().map(|f| f.amount);

        let row = sqlx::query_as::<_, LoanRow>(
            r#"
            UPDATE loans
            SET return_date = $2, status = $3, fine_amount = $4, fine_paid = FALSE, fine_paid_at = NULL
            WHERE id = $1 AND return_date IS NULL
            RETURNING *
            "#,
        )
        .bind(loan.id)
        .bind(loan.return_date)
        .bind(loan.status)
        .bind(fine_amount)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(row.map(Loan::from))
    }

    /// Mark the fine of a loan as paid
    pub async fn mark_fine_paid(&self, id: i32, paid_at: DateTime<Utc>) -> AppResult<Loan> {
        let row = sqlx::query_as::<_, LoanRow>(
            r#"
            UPDATE loans
            SET fine_paid = TRUE, fine_paid_at = $2
            WHERE id = $1 AND fine_amount > 0 AND fine_paid = FALSE
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(paid_at)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return Ok(row.into());
        }

        let loan = self.get_by_id(id).await?;
        match loan.fine {
            Some(fine) if fine.paid => Err(LendingConflict::FineAlreadyPaid.into()),
            _ => Err(LendingConflict::NoFineDue.into()),
        }
    }

    /// List loans matching a filter, most recent first
    pub async fn list(&self, filter: &LoanFilter, now: DateTime<Utc>) -> AppResult<Vec<Loan>> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT * FROM loans WHERE TRUE");

        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status);
        }
        if let Some(user_id) = filter.user_id {
            builder.push(" AND user_id = ").push_bind(user_id);
        }
        if let Some(book_id) = filter.book_id {
            builder.push(" AND book_id = ").push_bind(book_id);
        }
        if filter.overdue {
            builder
                .push(" AND return_date IS NULL AND due_date < ")
                .push_bind(now);
        }
        builder.push(" ORDER BY issue_date DESC, id DESC");

        let rows = builder
            .build_query_as::<LoanRow>()
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Loan::from).collect())
    }

    /// Active, overdue and returned counts plus the unpaid fine total
    pub async fn counts(&self, now: DateTime<Utc>) -> AppResult<LoanCounts> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE return_date IS NULL) AS active,
                COUNT(*) FILTER (WHERE return_date IS NULL AND due_date < $1) AS overdue,
                COUNT(*) FILTER (WHERE return_date IS NOT NULL) AS returned,
                COALESCE(SUM(fine_amount) FILTER (WHERE fine_paid = FALSE), 0) AS unpaid_fines
            FROM loans
            "#,
        )
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(LoanCounts {
            active: row.get("active"),
            overdue: row.get("overdue"),
            returned: row.get("returned"),
            unpaid_fines: row.get::<Decimal, _>("unpaid_fines"),
        })
    }
}

fn map_unique_violation(e: sqlx::Error) -> AppError {
    match &e {
        sqlx::Error::Database(db) if db.constraint() == Some(ONE_ACTIVE_LOAN_INDEX) => {
            LendingConflict::DuplicateActiveLoan.into()
        }
        _ => e.into(),
    }
}
