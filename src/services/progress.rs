//! Reading progress: a forward-only page ratchet with a session log

use chrono::{DateTime, Duration, Utc};

use crate::{
    error::{AppError, AppResult},
    models::{
        book::progress_percent,
        loan::{Loan, ReadingProgress, ReadingSession},
    },
};

#[derive(Debug, Clone, Copy, Default)]
pub struct ReadingProgressTracker;

/// Outcome of one progress report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub progress: ReadingProgress,
    /// Whether the loan was changed and needs saving
    pub advanced: bool,
}

impl ReadingProgressTracker {
    pub fn new() -> Self {
        Self
    }

    /// Record that the reader reached `page_number` after a session of
    /// `session_seconds`.
    ///
    /// Pages past the end are rejected, pages below 1 count as page 1, and
    /// a page at or before `last_read_page` changes nothing.
    pub fn update(
        &self,
        loan: &mut Loan,
        total_pages: i32,
        page_number: i32,
        session_seconds: i64,
        now: DateTime<Utc>,
    ) -> AppResult<ProgressUpdate> {
        if page_number > total_pages {
            return Err(AppError::Validation(format!(
                "Page number cannot exceed total pages ({})",
                total_pages
            )));
        }
        if session_seconds < 0 {
            return Err(AppError::Validation(
                "Session duration cannot be negative".to_string(),
            ));
        }

        let page = page_number.max(1);
        let advanced = page > loan.last_read_page;

        if advanced {
            loan.reading_sessions.push(ReadingSession {
                start_time: now - Duration::seconds(session_seconds),
                end_time: now,
                pages_read: page - loan.last_read_page,
            });
            loan.last_read_page = page;
        }

        Ok(ProgressUpdate {
            progress: ReadingProgress {
                last_read_page: loan.last_read_page,
                progress_percent: progress_percent(loan.last_read_page, total_pages),
            },
            advanced,
        })
    }
}
