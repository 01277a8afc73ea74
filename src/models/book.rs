//! Book lending record

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// Subset of a book relevant to lending
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Book {
    pub id: i32,
    pub title: String,
    /// Maximum simultaneous active loans
    pub capacity: i32,
    /// Active loans currently held against this book
    pub reserved: i32,
    /// Loans ever issued, used for popularity ranking
    pub total_loan_count: i64,
    pub total_pages: i32,
}

impl Book {
    pub fn available(&self) -> i32 {
        (self.capacity - self.reserved).max(0)
    }
}

/// Public view of a book's lending capacity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct BookAvailability {
    pub book_id: i32,
    pub title: String,
    pub capacity: i32,
    pub reserved: i32,
    pub available: i32,
    pub total_loan_count: i64,
}

impl From<Book> for BookAvailability {
    fn from(book: Book) -> Self {
        Self {
            book_id: book.id,
            available: book.available(),
            title: book.title,
            capacity: book.capacity,
            reserved: book.reserved,
            total_loan_count: book.total_loan_count,
        }
    }
}

/// `round(page / total_pages * 100)` capped at 100
pub fn progress_percent(page: i32, total_pages: i32) -> u8 {
    if total_pages <= 0 || page <= 0 {
        return 0;
    }
    let page = i64::from(page.min(total_pages));
    let total = i64::from(total_pages);
    // Half-up rounding in integer arithmetic
    let percent = (page * 200 + total) / (2 * total);
    percent.min(100) as u8
}
