//! Loan model and related types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{types::Json, Decode, Encode, FromRow, Postgres};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use super::book::{progress_percent, Book};

const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Stored lifecycle status. Overdue is derived, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum LoanStatus {
    Active,
    Returned,
}

impl LoanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Active => "active",
            LoanStatus::Returned => "returned",
        }
    }
}

impl std::fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for LoanStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(LoanStatus::Active),
            "returned" => Ok(LoanStatus::Returned),
            _ => Err(format!("Invalid loan status: {}", s)),
        }
    }
}

// SQLx conversion for LoanStatus
impl sqlx::Type<Postgres> for LoanStatus {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<Postgres>>::type_info()
    }
}

impl<'r> Decode<'r, Postgres> for LoanStatus {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s: String = Decode::<Postgres>::decode(value)?;
        s.parse().map_err(|e: String| e.into())
    }
}

impl Encode<'_, Postgres> for LoanStatus {
    fn encode_by_ref(&self, buf: &mut sqlx::postgres::PgArgumentBuffer) -> sqlx::encode::IsNull {
        <&str as Encode<Postgres>>::encode(self.as_str(), buf)
    }
}

/// One contiguous reading interval. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ReadingSession {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub pages_read: i32,
}

/// Fine fixed at return time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Fine {
    #[schema(value_type = String)]
    pub amount: Decimal,
    pub paid: bool,
    pub paid_at: Option<DateTime<Utc>>,
}

/// Loan as held by the lending engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Loan {
    pub id: i32,
    pub book_id: i32,
    pub user_id: i32,
    pub issue_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub return_date: Option<DateTime<Utc>>,
    pub status: LoanStatus,
    pub renewal_count: i16,
    pub last_read_page: i32,
    pub reading_sessions: Vec<ReadingSession>,
    pub fine: Option<Fine>,
}

impl Loan {
    pub fn is_active(&self) -> bool {
        self.status == LoanStatus::Active
    }

    /// Active and past its due date at `now`
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && now > self.due_date
    }

    /// Started days past due at `now`; 0 unless overdue
    pub fn days_overdue(&self, now: DateTime<Utc>) -> i64 {
        if !self.is_overdue(now) {
            return 0;
        }
        days_overdue(self.due_date, now)
    }
}

/// Started days between `due_date` and `at`, 0 when `at` is not after the due date
pub fn days_overdue(due_date: DateTime<Utc>, at: DateTime<Utc>) -> i64 {
    let late_ms = (at - due_date).num_milliseconds();
    if late_ms <= 0 {
        0
    } else {
        (late_ms + MILLIS_PER_DAY - 1) / MILLIS_PER_DAY
    }
}

/// Loan about to be inserted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLoan {
    pub book_id: i32,
    pub user_id: i32,
    pub issue_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
}

/// Loan row from database
#[derive(Debug, Clone, FromRow)]
pub struct LoanRow {
    pub id: i32,
    pub book_id: i32,
    pub user_id: i32,
    pub issue_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub return_date: Option<DateTime<Utc>>,
    pub status: LoanStatus,
    pub renewal_count: i16,
    pub last_read_page: i32,
    pub reading_sessions: Json<Vec<ReadingSession>>,
    pub fine_amount: Option<Decimal>,
    pub fine_paid: bool,
    pub fine_paid_at: Option<DateTime<Utc>>,
}

impl From<LoanRow> for Loan {
    fn from(row: LoanRow) -> Self {
        let fine = row.fine_amount.map(|amount| Fine {
            amount,
            paid: row.fine_paid,
            paid_at: row.fine_paid_at,
        });

        Loan {
            id: row.id,
            book_id: row.book_id,
            user_id: row.user_id,
            issue_date: row.issue_date,
            due_date: row.due_date,
            return_date: row.return_date,
            status: row.status,
            renewal_count: row.renewal_count,
            last_read_page: row.last_read_page,
            reading_sessions: row.reading_sessions.0,
            fine,
        }
    }
}

/// Loan with derived fields for display
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoanDetails {
    #[serde(flatten)]
    pub loan: Loan,
    pub book_title: String,
    pub total_pages: i32,
    pub is_overdue: bool,
    pub days_overdue: i64,
    /// Reading progress in percent (0-100)
    pub reading_progress: u8,
}

impl LoanDetails {
    pub fn new(loan: Loan, book: &Book, now: DateTime<Utc>) -> Self {
        Self {
            is_overdue: loan.is_overdue(now),
            days_overdue: loan.days_overdue(now),
            reading_progress: progress_percent(loan.last_read_page, book.total_pages),
            book_title: book.title.clone(),
            total_pages: book.total_pages,
            loan,
        }
    }
}

/// Loan listing filter
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LoanFilter {
    pub status: Option<LoanStatus>,
    pub user_id: Option<i32>,
    pub book_id: Option<i32>,
    /// Only active loans past their due date
    #[serde(default)]
    pub overdue: bool,
}

impl LoanFilter {
    pub fn matches(&self, loan: &Loan, now: DateTime<Utc>) -> bool {
        self.status.map_or(true, |s| loan.status == s)
            && self.user_id.map_or(true, |u| loan.user_id == u)
            && self.book_id.map_or(true, |b| loan.book_id == b)
            && (!self.overdue || loan.is_overdue(now))
    }
}

/// Aggregate loan counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct LoanCounts {
    pub active: i64,
    pub overdue: i64,
    pub returned: i64,
    /// Sum of fines not yet paid
    #[schema(value_type = String)]
    pub unpaid_fines: Decimal,
}

/// Borrow request
#[derive(Debug, Deserialize, ToSchema)]
pub struct BorrowRequest {
    pub book_id: i32,
}

/// Reading progress update request
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateProgressRequest {
    /// Page reached; must not exceed the book's page count
    pub page_number: i32,
    /// Length of the reading session in seconds
    #[validate(range(min = 0, max = 86400, message = "Session duration must be between 0 and 86400 seconds"))]
    pub session_duration: Option<i64>,
}

/// Progress after an update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ReadingProgress {
    pub last_read_page: i32,
    pub progress_percent: u8,
}
