//! Lending use cases: borrow, return, renew, reading progress and fines
//!
//! Locks are always taken in the order user -> loan -> book, so two use cases
//! can never wait on each other in a cycle.

use std::collections::HashMap;
use std::sync::Arc;

use validator::Validate;

use crate::{
    clock::Clock,
    config::LendingConfig,
    error::{AppError, AppResult, LendingConflict},
    models::{
        book::{Book, BookAvailability},
        loan::{
            Loan, LoanCounts, LoanDetails, LoanFilter, LoanStatus, ReadingProgress,
            UpdateProgressRequest,
        },
        user::Principal,
    },
    repository::LendingStore,
    services::{
        inventory::InventoryLedger, locks::KeyedLocks, loan_state::LoanStateMachine,
        progress::ReadingProgressTracker,
    },
};

/// Reloads allowed when a guarded write finds the loan changed by another instance
const GUARDED_WRITE_ATTEMPTS: usize = 3;

#[derive(Clone)]
pub struct LendingService {
    store: Arc<dyn LendingStore>,
    ledger: InventoryLedger,
    machine: LoanStateMachine,
    tracker: ReadingProgressTracker,
    clock: Arc<dyn Clock>,
    user_locks: Arc<KeyedLocks<i32>>,
    loan_locks: Arc<KeyedLocks<i32>>,
    book_locks: Arc<KeyedLocks<i32>>,
    default_session_seconds: i64,
}

impl LendingService {
    pub fn new(store: Arc<dyn LendingStore>, config: &LendingConfig, clock: Arc<dyn Clock>) -> Self {
        let timeout = config.lock_timeout();
        Self {
            ledger: InventoryLedger::new(store.clone()),
            machine: LoanStateMachine::new(config),
            tracker: ReadingProgressTracker::new(),
            clock,
            user_locks: Arc::new(KeyedLocks::new("user", timeout)),
            loan_locks: Arc::new(KeyedLocks::new("loan", timeout)),
            book_locks: Arc::new(KeyedLocks::new("book", timeout)),
            default_session_seconds: config.default_session_seconds,
            store,
        }
    }

    /// Borrow a book for the calling user
    pub async fn borrow(&self, actor: &Principal, book_id: i32) -> AppResult<Loan> {
        if !actor.is_active {
            tracing::warn!(user_id = actor.user_id, book_id, "Borrow refused: inactive account");
            return Err(LendingConflict::UserInactive.into());
        }

        // The user lock keeps the per-account cap exact across different books
        let _user_guard = self.user_locks.acquire(actor.user_id).await?;
        let _book_guard = self.book_locks.acquire(book_id).await?;

        if self.store.find_active_loan(actor.user_id, book_id).await?.is_some() {
            return Err(LendingConflict::DuplicateActiveLoan.into());
        }

        let active = self.store.count_active_loans(actor.user_id).await?;
        if active >= actor.max_books_allowed {
            tracing::warn!(
                user_id = actor.user_id,
                active,
                max = actor.max_books_allowed,
                "Borrow refused: loan cap reached"
            );
            return Err(LendingConflict::MaxLoansReached.into());
        }

        let reservation = self.ledger.reserve(book_id).await?;
        let now = self.clock.now();
        let new_loan = self.machine.create(
            &reservation,
            actor.user_id,
            self.machine.due_date_from(now),
            now,
        );

        match self.store.insert_loan(&new_loan).await {
            Ok(loan) => {
                tracing::info!(
                    loan_id = loan.id,
                    user_id = loan.user_id,
                    book_id,
                    due_date = %loan.due_date,
                    "Loan created"
                );
                Ok(loan)
            }
            Err(err) => {
                // Give the slot back; the caller still sees the insert error
                if let Err(release_err) = self.ledger.cancel(reservation).await {
                    tracing::error!(
                        book_id,
                        error = %release_err,
                        "Failed to release reservation after loan creation failure"
                    );
                }
                Err(err)
            }
        }
    }

    /// Return a loan. Staff may return any loan, users only their own.
    pub async fn return_loan(&self, actor: &Principal, loan_id: i32) -> AppResult<Loan> {
        let _loan_guard = self.loan_locks.acquire(loan_id).await?;
        let mut loan = self.store.get_loan(loan_id).await?;

        if !actor.can_act_for(loan.user_id) {
            return Err(AppError::Authorization(
                "Not authorized to return this loan".to_string(),
            ));
        }

        let _book_guard = self.book_locks.acquire(loan.book_id).await?;

        let now = self.clock.now();
        self.machine.return_book(&mut loan, now)?;
        let book = self.ledger.settle_return(&loan).await?;

        tracing::info!(
            loan_id,
            book_id = book.id,
            reserved = book.reserved,
            fine = %loan.fine.as_ref().map(|f| f.amount).unwrap_or_default(),
            "Loan returned"
        );
        Ok(loan)
    }

    /// Renew a loan by the configured period.
    ///
    /// Self-service users may not renew an overdue loan; staff may.
    pub async fn renew(&self, actor: &Principal, loan_id: i32) -> AppResult<Loan> {
        let _loan_guard = self.loan_locks.acquire(loan_id).await?;

        for _ in 0..GUARDED_WRITE_ATTEMPTS {
            let mut loan = self.store.get_loan(loan_id).await?;

            if !actor.can_act_for(loan.user_id) {
                return Err(AppError::Authorization(
                    "Not authorized to renew this loan".to_string(),
                ));
            }

            if loan.is_overdue(self.clock.now()) && !actor.is_staff() {
                tracing::warn!(loan_id, user_id = actor.user_id, "Renewal refused: loan overdue");
                return Err(LendingConflict::OverdueRenewalForbidden.into());
            }

            let previous_count = loan.renewal_count;
            self.machine.renew(&mut loan)?;

            if let Some(loan) = self
                .store
                .store_renewal(loan_id, previous_count, loan.due_date)
                .await?
            {
                tracing::info!(
                    loan_id,
                    renewal_count = loan.renewal_count,
                    due_date = %loan.due_date,
                    "Loan renewed"
                );
                return Ok(loan);
            }
            tracing::debug!(loan_id, "Loan changed during renewal, reloading");
        }

        Err(AppError::Busy(format!("loan {} kept changing during renewal", loan_id)))
    }

    /// Report reading progress on the caller's own active loan
    pub async fn update_progress(
        &self,
        actor: &Principal,
        loan_id: i32,
        request: UpdateProgressRequest,
    ) -> AppResult<ReadingProgress> {
        request.validate()?;

        let _loan_guard = self.loan_locks.acquire(loan_id).await?;
        let session_seconds = request
            .session_duration
            .unwrap_or(self.default_session_seconds);

        for _ in 0..GUARDED_WRITE_ATTEMPTS {
            let mut loan = self.store.get_loan(loan_id).await?;

            if loan.user_id != actor.user_id {
                return Err(AppError::Authorization(
                    "Only the borrower can update reading progress".to_string(),
                ));
            }
            if !loan.is_active() {
                return Err(LendingConflict::LoanNotActive.into());
            }

            let book = self.store.get_book(loan.book_id).await?;
            let previous_page = loan.last_read_page;
            let update = self.tracker.update(
                &mut loan,
                book.total_pages,
                request.page_number,
                session_seconds,
                self.clock.now(),
            )?;

            let Some(session) = update.advanced.then(|| loan.reading_sessions.last()).flatten() else {
                return Ok(update.progress);
            };

            if self
                .store
                .store_progress(loan_id, previous_page, loan.last_read_page, session)
                .await?
                .is_some()
            {
                tracing::debug!(loan_id, page = loan.last_read_page, "Reading progress saved");
                return Ok(update.progress);
            }
            tracing::debug!(loan_id, "Loan changed during progress update, reloading");
        }

        Err(AppError::Busy(format!(
            "loan {} kept changing during progress update",
            loan_id
        )))
    }

    /// Record payment of a returned loan's fine (staff only)
    pub async fn pay_fine(&self, actor: &Principal, loan_id: i32) -> AppResult<Loan> {
        actor.require_staff()?;

        let _loan_guard = self.loan_locks.acquire(loan_id).await?;
        let mut loan = self.store.get_loan(loan_id).await?;

        let now = self.clock.now();
        self.machine.pay_fine(&mut loan, now)?;
        let loan = self.store.mark_fine_paid(loan_id, now).await?;

        tracing::info!(loan_id, "Fine paid");
        Ok(loan)
    }

    /// Single loan, visible to its borrower and to staff
    pub async fn get_loan(&self, actor: &Principal, loan_id: i32) -> AppResult<LoanDetails> {
        let loan = self.store.get_loan(loan_id).await?;
        if !actor.can_act_for(loan.user_id) {
            return Err(AppError::Authorization(
                "Not authorized to access this loan".to_string(),
            ));
        }

        let book = self.store.get_book(loan.book_id).await?;
        Ok(LoanDetails::new(loan, &book, self.clock.now()))
    }

    /// The caller's own loans
    pub async fn list_my_loans(
        &self,
        actor: &Principal,
        status: Option<LoanStatus>,
    ) -> AppResult<Vec<LoanDetails>> {
        let filter = LoanFilter {
            status,
            user_id: Some(actor.user_id),
            ..LoanFilter::default()
        };
        self.details(&filter).await
    }

    /// Any loans matching `filter` (staff only)
    pub async fn list_loans(
        &self,
        actor: &Principal,
        filter: &LoanFilter,
    ) -> AppResult<Vec<LoanDetails>> {
        actor.require_staff()?;
        self.details(filter).await
    }

    /// Loan counters (staff only)
    pub async fn loan_stats(&self, actor: &Principal) -> AppResult<LoanCounts> {
        actor.require_staff()?;
        self.store.loan_counts(self.clock.now()).await
    }

    /// Whether the backing store answers
    pub async fn ping(&self) -> AppResult<()> {
        self.store.ping().await
    }

    pub async fn availability(&self, book_id: i32) -> AppResult<BookAvailability> {
        self.ledger.availability(book_id).await
    }

    async fn details(&self, filter: &LoanFilter) -> AppResult<Vec<LoanDetails>> {
        let now = self.clock.now();
        let loans = self.store.list_loans(filter, now).await?;

        let mut books: HashMap<i32, Book> = HashMap::new();
        let mut result = Vec::with_capacity(loans.len());
        for loan in loans {
            if !books.contains_key(&loan.book_id) {
                let book = self.store.get_book(loan.book_id).await?;
                books.insert(loan.book_id, book);
            }
            let book = &books[&loan.book_id];
            result.push(LoanDetails::new(loan, book, now));
        }
        Ok(result)
    }
}
