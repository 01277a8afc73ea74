//! In-process lending store.
//!
//! All state sits behind one mutex that is never held across an await, so
//! each call is atomic with respect to every other call. Used by the test
//! suites and for running the engine without a database.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use super::LendingStore;
use crate::{
    error::{AppError, AppResult, LendingConflict},
    models::{
        book::Book,
        loan::{Fine, Loan, LoanCounts, LoanFilter, LoanStatus, NewLoan, ReadingSession},
    },
};

#[derive(Debug, Default)]
struct MemoryState {
    books: BTreeMap<i32, Book>,
    loans: BTreeMap<i32, Loan>,
    next_loan_id: i32,
}

impl MemoryState {
    fn book_mut(&mut self, id: i32) -> AppResult<&mut Book> {
        self.books
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", id)))
    }

    fn loan(&self, id: i32) -> AppResult<&Loan> {
        self.loans
            .get(&id)
            .ok_or_else(|| AppError::NotFound(format!("Loan with id {} not found", id)))
    }
}

#[derive(Debug, Default)]
pub struct MemoryLendingStore {
    state: Mutex<MemoryState>,
}

impl MemoryLendingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_books(books: impl IntoIterator<Item = Book>) -> Self {
        let store = Self::new();
        for book in books {
            store.insert_book(book);
        }
        store
    }

    /// Add or replace a book record
    pub fn insert_book(&self, book: Book) {
        self.lock().books.insert(book.id, book);
    }

    /// Snapshot of a book
    pub fn book(&self, id: i32) -> Option<Book> {
        self.lock().books.get(&id).cloned()
    }

    /// Snapshot of every loan, ordered by id
    pub fn loans(&self) -> Vec<Loan> {
        self.lock().loans.values().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl LendingStore for MemoryLendingStore {
    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }

    async fn get_book(&self, book_id: i32) -> AppResult<Book> {
        let mut state = self.lock();
        state.book_mut(book_id).map(|b| b.clone())
    }

    async fn try_reserve(&self, book_id: i32) -> AppResult<Option<Book>> {
        let mut state = self.lock();
        let book = state.book_mut(book_id)?;
        if book.reserved >= book.capacity {
            return Ok(None);
        }
        book.reserved += 1;
        book.total_loan_count += 1;
        Ok(Some(book.clone()))
    }

    async fn try_release(&self, book_id: i32) -> AppResult<Option<Book>> {
        let mut state = self.lock();
        let book = state.book_mut(book_id)?;
        if book.reserved <= 0 {
            return Ok(None);
        }
        book.reserved -= 1;
        Ok(Some(book.clone()))
    }

    async fn get_loan(&self, loan_id: i32) -> AppResult<Loan> {
        self.lock().loan(loan_id).cloned()
    }

    async fn find_active_loan(&self, user_id: i32, book_id: i32) -> AppResult<Option<Loan>> {
        Ok(self
            .lock()
            .loans
            .values()
            .find(|l| l.user_id == user_id && l.book_id == book_id && l.return_date.is_none())
            .cloned())
    }

    async fn count_active_loans(&self, user_id: i32) -> AppResult<i64> {
        Ok(self
            .lock()
            .loans
            .values()
            .filter(|l| l.user_id == user_id && l.return_date.is_none())
            .count() as i64)
    }

    async fn insert_loan(&self, new: &NewLoan) -> AppResult<Loan> {
        let mut state = self.lock();

        if !state.books.contains_key(&new.book_id) {
            return Err(AppError::NotFound(format!("Book with id {} not found", new.book_id)));
        }
        let duplicate = state.loans.values().any(|l| {
            l.user_id == new.user_id && l.book_id == new.book_id && l.return_date.is_none()
        });
        if duplicate {
            return Err(LendingConflict::DuplicateActiveLoan.into());
        }

        state.next_loan_id += 1;
        let loan = Loan {
            id: state.next_loan_id,
            book_id: new.book_id,
            user_id: new.user_id,
            issue_date: new.issue_date,
            due_date: new.due_date,
            return_date: None,
            status: LoanStatus::Active,
            renewal_count: 0,
            last_read_page: 1,
            reading_sessions: Vec::new(),
            fine: None,
        };
        state.loans.insert(loan.id, loan.clone());
        Ok(loan)
    }

    async fn store_renewal(
        &self,
        loan_id: i32,
        previous_count: i16,
        due_date: DateTime<Utc>,
    ) -> AppResult<Option<Loan>> {
        let mut state = self.lock();
        let Some(stored) = state.loans.get_mut(&loan_id) else {
            return Ok(None);
        };

        if stored.return_date.is_some() || stored.renewal_count != previous_count {
            return Ok(None);
        }
        stored.due_date = due_date;
        stored.renewal_count += 1;
        Ok(Some(stored.clone()))
    }

    async fn store_progress(
        &self,
        loan_id: i32,
        previous_page: i32,
        page: i32,
        session: &ReadingSession,
    ) -> AppResult<Option<Loan>> {
        let mut state = self.lock();
        let Some(stored) = state.loans.get_mut(&loan_id) else {
            return Ok(None);
        };

        if stored.return_date.is_some()
            || stored.last_read_page != previous_page
            || page <= previous_page
        {
            return Ok(None);
        }
        stored.last_read_page = page;
        stored.reading_sessions.push(session.clone());
        Ok(Some(stored.clone()))
    }

    async fn commit_return(&self, loan: &Loan) -> AppResult<Book> {
        let mut state = self.lock();

        // Validate both writes before applying either
        if state.loan(loan.id)?.return_date.is_some() {
            return Err(LendingConflict::AlreadyReturned.into());
        }
        if state.book_mut(loan.book_id)?.reserved <= 0 {
            return Err(AppError::InventoryUnderflow(loan.book_id));
        }

        if let Some(stored) = state.loans.get_mut(&loan.id) {
            stored.return_date = loan.return_date;
            stored.status = loan.status;
            stored.fine = loan.fine.as_ref().map(|f| Fine {
                amount: f.amount,
                paid: false,
                paid_at: None,
            });
        }

        let book = state.book_mut(loan.book_id)?;
        book.reserved -= 1;
        Ok(book.clone())
    }

    async fn mark_fine_paid(&self, loan_id: i32, paid_at: DateTime<Utc>) -> AppResult<Loan> {
        let mut state = self.lock();
        let loan = state
            .loans
            .get_mut(&loan_id)
            .ok_or_else(|| AppError::NotFound(format!("Loan with id {} not found", loan_id)))?;

        match loan.fine.as_mut() {
            Some(fine) if fine.paid => Err(LendingConflict::FineAlreadyPaid.into()),
            Some(fine) if fine.amount > Decimal::ZERO => {
                fine.paid = true;
                fine.paid_at = Some(paid_at);
                Ok(loan.clone())
            }
            _ => Err(LendingConflict::NoFineDue.into()),
        }
    }

    async fn list_loans(&self, filter: &LoanFilter, now: DateTime<Utc>) -> AppResult<Vec<Loan>> {
        let mut loans: Vec<Loan> = self
            .lock()
            .loans
            .values()
            .filter(|l| filter.matches(l, now))
            .cloned()
            .collect();
        loans.sort_by(|a, b| b.issue_date.cmp(&a.issue_date).then(b.id.cmp(&a.id)));
        Ok(loans)
    }

    async fn loan_counts(&self, now: DateTime<Utc>) -> AppResult<LoanCounts> {
        let state = self.lock();
        let mut counts = LoanCounts::default();

        for loan in state.loans.values() {
            if loan.return_date.is_none() {
                counts.active += 1;
                if loan.is_overdue(now) {
                    counts.overdue += 1;
                }
            } else {
                counts.returned += 1;
            }
            if let Some(fine) = loan.fine.as_ref().filter(|f| !f.paid) {
                counts.unpaid_fines += fine.amount;
            }
        }
        Ok(counts)
    }
}
