//! Data models for the campus library

pub mod book;
pub mod loan;
pub mod user;

// Re-export commonly used types
pub use book::{Book, BookQuery, CreateBook};
pub use loan::{Fine, Loan, LoanFilter, LoanStatus, NewLoan};
pub use user::{BorrowerType, Role, UserClaims};
