//! Repository layer for database operations

pub mod books;
pub mod loans;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};

use crate::{
    error::AppResult,
    models::{
        book::{Book, BookQuery, CreateBook},
        loan::{Loan, LoanFilter, NewLoan},
    },
};

pub use memory::MemoryStore;

/// Persistence used by the loan ledger and the catalog.
///
/// Loan writes are optimistic: they only apply when the stored `version`
/// still equals the one on the loan passed in, and report `false` when
/// another request got there first.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Cheap round trip used by the readiness probe
    async fn ping(&self) -> AppResult<()>;

    async fn book_by_id(&self, id: i32) -> AppResult<Option<Book>>;

    /// Fails with `Conflict` when the ISBN is already catalogued
    async fn create_book(&self, book: &CreateBook, now: DateTime<Utc>) -> AppResult<Book>;

    async fn list_books(&self, query: &BookQuery) -> AppResult<Vec<Book>>;

    async fn loan_by_id(&self, id: i32) -> AppResult<Option<Loan>>;

    async fn list_loans(&self, filter: &LoanFilter) -> AppResult<Vec<Loan>>;

    async fn has_active_loan(&self, book_id: i32, borrower_id: i32) -> AppResult<bool>;

    async fn count_active_loans(&self, borrower_id: i32) -> AppResult<i64>;

    /// Create the loan and take one copy off the shelf in one transaction.
    ///
    /// Copy availability, duplicate loans and the borrower's loan cap are
    /// checked again inside the transaction, in that order.
    async fn insert_loan_taking_copy(&self, loan: &NewLoan, max_active: u32) -> AppResult<Loan>;

    /// Mark the loan returned and put its copy back in one transaction
    async fn close_loan_releasing_copy(&self, loan: &Loan) -> AppResult<bool>;

    /// Write back due date, status, fine and renewal count
    async fn save_loan(&self, loan: &Loan) -> AppResult<bool>;
}

/// PostgreSQL-backed repository
#[derive(Clone)]
pub struct Repository {
    pub pool: Pool<Postgres>,
}

impl Repository {
    /// Create a new repository with the given database pool
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerStore for Repository {
    async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn book_by_id(&self, id: i32) -> AppResult<Option<Book>> {
        self.books_get_by_id(id).await
    }

    async fn create_book(&self, book: &CreateBook, now: DateTime<Utc>) -> AppResult<Book> {
        self.books_create(book, now).await
    }

    async fn list_books(&self, query: &BookQuery) -> AppResult<Vec<Book>> {
        self.books_list(query).await
    }

    async fn loan_by_id(&self, id: i32) -> AppResult<Option<Loan>> {
        self.loans_get_by_id(id).await
    }

    async fn list_loans(&self, filter: &LoanFilter) -> AppResult<Vec<Loan>> {
        self.loans_list(filter).await
    }

    async fn has_active_loan(&self, book_id: i32, borrower_id: i32) -> AppResult<bool> {
        self.loans_has_active(book_id, borrower_id).await
    }

    async fn count_active_loans(&self, borrower_id: i32) -> AppResult<i64> {
        self.loans_count_active(borrower_id).await
    }

    async fn insert_loan_taking_copy(&self, loan: &NewLoan, max_active: u32) -> AppResult<Loan> {
        self.loans_create(loan, max_active).await
    }

    async fn close_loan_releasing_copy(&self, loan: &Loan) -> AppResult<bool> {
        self.loans_close(loan).await
    }

    async fn save_loan(&self, loan: &Loan) -> AppResult<bool> {
        self.loans_update(loan).await
    }
}
