//! In-process store, selected with `database.url = "memory://"`.
//!
//! One async mutex guards the whole state, so every store call is atomic.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::LedgerStore;
use crate::{
    error::{AppError, AppResult, LedgerError},
    models::{
        book::{Book, BookQuery, CreateBook},
        loan::{Loan, LoanFilter, NewLoan},
    },
};

#[derive(Default)]
struct MemoryState {
    books: BTreeMap<i32, Book>,
    loans: BTreeMap<i32, Loan>,
    next_book_id: i32,
    next_loan_id: i32,
}

impl MemoryState {
    fn active_loans(&self, borrower_id: i32) -> impl Iterator<Item = &Loan> {
        self.loans
            .values()
            .filter(move |l| l.borrower_id == borrower_id && l.return_date.is_none())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }

    async fn book_by_id(&self, id: i32) -> AppResult<Option<Book>> {
        Ok(self.state.lock().await.books.get(&id).cloned())
    }

    async fn create_book(&self, data: &CreateBook, now: DateTime<Utc>) -> AppResult<Book> {
        let mut state = self.state.lock().await;
        let isbn = data.isbn.trim();
        if state.books.values().any(|b| b.isbn == isbn) {
            return Err(AppError::Conflict(format!(
                "A book with ISBN {} already exists",
                isbn
            )));
        }

        state.next_book_id += 1;
        let book = Book {
            id: state.next_book_id,
            isbn: isbn.to_string(),
            title: data.title.clone(),
            author: data.author.clone(),
            total_copies: data.total_copies,
            available_copies: data.total_copies,
            created_at: now,
        };
        state.books.insert(book.id, book.clone());
        Ok(book)
    }

    async fn list_books(&self, query: &BookQuery) -> AppResult<Vec<Book>> {
        let state = self.state.lock().await;
        let mut books: Vec<Book> = state
            .books
            .values()
            .filter(|b| query.matches(b))
            .cloned()
            .collect();
        books.sort_by(|a, b| a.title.cmp(&b.title).then(a.id.cmp(&b.id)));
        Ok(books)
    }

    async fn loan_by_id(&self, id: i32) -> AppResult<Option<Loan>> {
        Ok(self.state.lock().await.loans.get(&id).cloned())
    }

    async fn list_loans(&self, filter: &LoanFilter) -> AppResult<Vec<Loan>> {
        let state = self.state.lock().await;
        let mut loans: Vec<Loan> = state
            .loans
            .values()
            .filter(|l| filter.matches(l))
            .cloned()
            .collect();
        loans.sort_by(|a, b| a.due_date.cmp(&b.due_date).then(a.id.cmp(&b.id)));
        Ok(loans)
    }

    async fn has_active_loan(&self, book_id: i32, borrower_id: i32) -> AppResult<bool> {
        let state = self.state.lock().await;
        let found = state.active_loans(borrower_id).any(|l| l.book_id == book_id);
        Ok(found)
    }

    async fn count_active_loans(&self, borrower_id: i32) -> AppResult<i64> {
        let state = self.state.lock().await;
        let count = state.active_loans(borrower_id).count();
        Ok(count as i64)
    }

    async fn insert_loan_taking_copy(&self, loan: &NewLoan, max_active: u32) -> AppResult<Loan> {
        let mut state = self.state.lock().await;

        match state.books.get(&loan.book_id) {
            None => return Err(LedgerError::NotFound(format!("Book {}", loan.book_id)).into()),
            Some(book) if book.available_copies <= 0 => {
                return Err(LedgerError::Unavailable { book_id: loan.book_id }.into())
            }
            Some(_) => {}
        }

        if state
            .active_loans(loan.borrower_id)
            .any(|l| l.book_id == loan.book_id)
        {
            return Err(LedgerError::DuplicateLoan {
                book_id: loan.book_id,
                borrower_id: loan.borrower_id,
            }
            .into());
        }

        let active = state.active_loans(loan.borrower_id).count() as i64;
        if active >= i64::from(max_active) {
            return Err(LedgerError::LimitExceeded {
                borrower_id: loan.borrower_id,
                active,
                max: max_active,
            }
            .into());
        }

        if let Some(book) = state.books.get_mut(&loan.book_id) {
            book.available_copies -= 1;
        }
        state.next_loan_id += 1;
        let created = loan.clone().into_loan(state.next_loan_id);
        state.loans.insert(created.id, created.clone());
        Ok(created)
    }

    async fn close_loan_releasing_copy(&self, loan: &Loan) -> AppResult<bool> {
        let mut state = self.state.lock().await;

        match state.loans.get(&loan.id) {
            Some(stored) if stored.version == loan.version && stored.return_date.is_none() => {}
            _ => return Ok(false),
        }

        match state.books.get_mut(&loan.book_id) {
            Some(book) if book.available_copies < book.total_copies => {
                book.available_copies += 1;
            }
            _ => {
                return Err(AppError::Internal(format!(
                    "Book {} has no lent copy to release for loan {}",
                    loan.book_id, loan.id
                )))
            }
        }

        let mut closed = loan.clone();
        closed.version += 1;
        state.loans.insert(closed.id, closed);
        Ok(true)
    }

    async fn save_loan(&self, loan: &Loan) -> AppResult<bool> {
        let mut state = self.state.lock().await;
        match state.loans.get_mut(&loan.id) {
            Some(stored) if stored.version == loan.version => {
                let return_date = stored.return_date;
                *stored = loan.clone();
                stored.return_date = return_date;
                stored.version += 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
