//! Inventory ledger: sole writer of a book's reservation counter

use std::sync::Arc;

use uuid::Uuid;

use crate::{
    error::{AppError, AppResult, LendingConflict},
    models::{
        book::{Book, BookAvailability},
        loan::Loan,
    },
    repository::LendingStore,
};

/// Proof that one unit of a book's capacity is held.
///
/// Not `Clone`: it is consumed either by turning into a loan or by
/// [`InventoryLedger::cancel`], so a slot is given back at most once.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a reservation must become a loan or be cancelled"]
pub struct Reservation {
    pub token: Uuid,
    pub book_id: i32,
    /// Book state right after the increment
    pub book: Book,
}

#[derive(Clone)]
pub struct InventoryLedger {
    store: Arc<dyn LendingStore>,
}

impl InventoryLedger {
    pub fn new(store: Arc<dyn LendingStore>) -> Self {
        Self { store }
    }

    /// Take one slot of `book_id`, or fail with `InventoryExhausted` without side effects
    pub async fn reserve(&self, book_id: i32) -> AppResult<Reservation> {
        match self.store.try_reserve(book_id).await? {
            Some(book) => {
                tracing::debug!(book_id, reserved = book.reserved, capacity = book.capacity, "Reserved");
                Ok(Reservation {
                    token: Uuid::new_v4(),
                    book_id,
                    book,
                })
            }
            None => Err(LendingConflict::InventoryExhausted.into()),
        }
    }

    /// Give back one slot of `book_id`. Refuses to go below zero.
    pub async fn release(&self, book_id: i32) -> AppResult<Book> {
        match self.store.try_release(book_id).await? {
            Some(book) => {
                tracing::debug!(book_id, reserved = book.reserved, "Released");
                Ok(book)
            }
            None => {
                tracing::error!(book_id, "Release requested on a book with no reservation");
                Err(AppError::InventoryUnderflow(book_id))
            }
        }
    }

    /// Compensate a reservation that will not become a loan
    pub async fn cancel(&self, reservation: Reservation) -> AppResult<Book> {
        tracing::warn!(
            book_id = reservation.book_id,
            token = %reservation.token,
            "Cancelling reservation"
        );
        self.release(reservation.book_id).await
    }

    /// Persist a returned loan and release its slot in one unit of work
    pub async fn settle_return(&self, returned: &Loan) -> AppResult<Book> {
        self.store.commit_return(returned).await
    }

    pub async fn availability(&self, book_id: i32) -> AppResult<BookAvailability> {
        self.store.get_book(book_id).await.map(BookAvailability::from)
    }
}
