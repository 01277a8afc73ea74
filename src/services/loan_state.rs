//! Loan lifecycle: Active -> Returned, with renewal and fines inside Active

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

use crate::{
    config::LendingConfig,
    error::{AppResult, LendingConflict},
    models::loan::{days_overdue, Fine, Loan, LoanStatus, NewLoan},
    services::inventory::Reservation,
};

/// Upper bound on renewals of a single loan
pub const MAX_RENEWALS: i16 = 2;

#[derive(Debug, Clone)]
pub struct LoanStateMachine {
    loan_period: Duration,
    renewal_period: Duration,
    fine_per_day: Decimal,
}

impl LoanStateMachine {
    pub fn new(config: &LendingConfig) -> Self {
        Self {
            loan_period: Duration::days(config.loan_period_days),
            renewal_period: Duration::days(config.renewal_days),
            fine_per_day: config.fine_per_day,
        }
    }

    /// Default due date for a loan issued at `now`
    pub fn due_date_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self.loan_period
    }

    /// Loan to insert for a successful reservation
    pub fn create(
        &self,
        reservation: &Reservation,
        user_id: i32,
        due_date: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> NewLoan {
        NewLoan {
            book_id: reservation.book_id,
            user_id,
            issue_date: now,
            due_date,
        }
    }

    /// Renew by the configured renewal period
    pub fn renew(&self, loan: &mut Loan) -> AppResult<()> {
        self.renew_by(loan, self.renewal_period)
    }

    /// Push the due date back by `days_to_add`
    pub fn renew_by(&self, loan: &mut Loan, days_to_add: Duration) -> AppResult<()> {
        if loan.status != LoanStatus::Active {
            return Err(LendingConflict::AlreadyReturned.into());
        }
        if loan.renewal_count >= MAX_RENEWALS {
            return Err(LendingConflict::MaxRenewalsReached.into());
        }

        loan.due_date += days_to_add;
        loan.renewal_count += 1;
        Ok(())
    }

    /// Close the loan at `now` and fix its fine from the stored due date
    pub fn return_book(&self, loan: &mut Loan, now: DateTime<Utc>) -> AppResult<()> {
        if loan.return_date.is_some() || loan.status != LoanStatus::Active {
            return Err(LendingConflict::AlreadyReturned.into());
        }

        loan.return_date = Some(now);
        loan.status = LoanStatus::Returned;
        loan.fine = Some(Fine {
            amount: self.fine_for(loan.due_date, now),
            paid: false,
            paid_at: None,
        });
        Ok(())
    }

    /// `days_overdue * fine_per_day`, zero when returned on time
    pub fn fine_for(&self, due_date: DateTime<Utc>, returned_at: DateTime<Utc>) -> Decimal {
        Decimal::from(days_overdue(due_date, returned_at)) * self.fine_per_day
    }

    pub fn pay_fine(&self, loan: &mut Loan, now: DateTime<Utc>) -> AppResult<()> {
        match loan.fine.as_mut() {
            Some(fine) if fine.paid => Err(LendingConflict::FineAlreadyPaid.into()),
            Some(fine) if fine.amount > Decimal::ZERO => {
                fine.paid = true;
                fine.paid_at = Some(now);
                Ok(())
            }
            _ => Err(LendingConflict::NoFineDue.into()),
        }
    }
}
