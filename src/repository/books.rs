//! Books repository: lending capacity counters

use sqlx::{PgConnection, Pool, Postgres};

use crate::{
    error::{AppError, AppResult},
    models::book::Book,
};

const BOOK_COLUMNS: &str = "id, title, capacity, reserved, total_loan_count, total_pages";

#[derive(Clone)]
pub struct BooksRepository {
    pool: Pool<Postgres>,
}

impl BooksRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Get book by ID
    pub async fn get_by_id(&self, id: i32) -> AppResult<Book> {
        sqlx::query_as::<_, Book>(&format!("SELECT {} FROM books WHERE id = $1", BOOK_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", id)))
    }

    /// Take one reservation if the book is below capacity.
    ///
    /// The check and the increment happen in one statement, so concurrent
    /// callers racing for the last slot see exactly one winner.
    pub async fn try_reserve(&self, id: i32) -> AppResult<Option<Book>> {
        let book = sqlx::query_as::<_, Book>(&format!(
            r#"
            UPDATE books
            SET reserved = reserved + 1, total_loan_count = total_loan_count + 1
            WHERE id = $1 AND reserved < capacity
            RETURNING {}
            "#,
            BOOK_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        if book.is_none() {
            // Distinguish a full book from a missing one
            self.get_by_id(id).await?;
        }
        Ok(book)
    }

    /// Give back one reservation; `None` if the counter is already zero
    pub async fn try_release(&self, id: i32) -> AppResult<Option<Book>> {
        let mut conn = self.pool.acquire().await?;
        let book = Self::release_in(&mut conn, id).await?;

        if book.is_none() {
            self.get_by_id(id).await?;
        }
        Ok(book)
    }

    /// Conditional decrement on an existing connection or transaction
    pub async fn release_in(conn: &mut PgConnection, id: i32) -> AppResult<Option<Book>> {
        let book = sqlx::query_as::<_, Book>(&format!(
            r#"
            UPDATE books
            SET reserved = reserved - 1
            WHERE id = $1 AND reserved > 0
            RETURNING {}
            "#,
            BOOK_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(book)
    }
}
