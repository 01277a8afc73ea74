//! Data models for the lending engine

pub mod book;
pub mod loan;
pub mod user;

// Re-export commonly used types
pub use book::{Book, BookAvailability};
pub use loan::{Fine, Loan, LoanDetails, LoanFilter, LoanStatus, NewLoan, ReadingSession};
pub use user::{Principal, Role, UserClaims};
