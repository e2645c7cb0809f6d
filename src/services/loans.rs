//! Loan ledger: borrowing, returns, renewals and fine payments.
//!
//! Fines are computed lazily. Every operation that reads a loan refreshes
//! its status and fine for `now` and writes the result back before
//! handing it out.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::{
    config::LoanPolicy,
    error::{AppError, AppResult, LedgerError},
    models::{
        loan::{Loan, LoanFilter, LoanStatus, NewLoan},
        user::{BorrowerType, UserClaims},
    },
    repository::LedgerStore,
};

#[derive(Clone)]
pub struct LoanLedger {
    store: Arc<dyn LedgerStore>,
    policy: Arc<LoanPolicy>,
}

impl LoanLedger {
    pub fn new(store: Arc<dyn LedgerStore>, policy: Arc<LoanPolicy>) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &LoanPolicy {
        &self.policy
    }

    /// Lend one copy of a book.
    ///
    /// Rejections come in a fixed order: unknown book, no copy left,
    /// borrower already holds the book, borrower at their loan cap.
    pub async fn borrow(
        &self,
        book_id: i32,
        borrower_id: i32,
        borrower_type: BorrowerType,
        issued_by: i32,
        now: DateTime<Utc>,
    ) -> AppResult<Loan> {
        let book = self
            .store
            .book_by_id(book_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("Book {}", book_id)))?;

        if book.available_copies <= 0 {
            tracing::warn!(book_id, borrower_id, "Borrow rejected: no copies available");
            return Err(LedgerError::Unavailable { book_id }.into());
        }

        if self.store.has_active_loan(book_id, borrower_id).await? {
            tracing::warn!(book_id, borrower_id, "Borrow rejected: book already on loan to borrower");
            return Err(LedgerError::DuplicateLoan { book_id, borrower_id }.into());
        }

        let max = self.policy.for_borrower(borrower_type).max_active_loans;
        let active = self.store.count_active_loans(borrower_id).await?;
        if active >= i64::from(max) {
            tracing::warn!(borrower_id, active, max, "Borrow rejected: loan limit reached");
            return Err(LedgerError::LimitExceeded { borrower_id, active, max }.into());
        }

        let new_loan = NewLoan::new(book_id, borrower_id, borrower_type, issued_by, now, &self.policy);
        let loan = self.store.insert_loan_taking_copy(&new_loan, max).await?;

        tracing::info!(
            loan_id = loan.id,
            book_id,
            borrower_id,
            borrower_type = %borrower_type,
            due_date = %loan.due_date,
            "Book borrowed"
        );
        Ok(loan)
    }

    /// Fetch one loan, refreshed for `now`
    pub async fn get_loan(&self, loan_id: i32, caller: &UserClaims, now: DateTime<Utc>) -> AppResult<Loan> {
        let loan = self.load(loan_id).await?;
        caller.require_borrower_or_staff(loan.borrower_id)?;
        self.refresh(loan, now).await
    }

    /// Return the book, finalizing the fine
    pub async fn return_loan(&self, loan_id: i32, caller: &UserClaims, now: DateTime<Utc>) -> AppResult<Loan> {
        let mut loan = self.load(loan_id).await?;
        caller.require_borrower_or_staff(loan.borrower_id)?;

        loan.close(now, &self.policy)?;
        if !self.store.close_loan_releasing_copy(&loan).await? {
            return Err(self.concurrent_write(loan_id).await);
        }
        loan.version += 1;

        tracing::info!(
            loan_id,
            book_id = loan.book_id,
            borrower_id = loan.borrower_id,
            fine = %loan.fine.total_amount,
            "Book returned"
        );
        Ok(loan)
    }

    /// Push the due date out by one loan period
    pub async fn renew(&self, loan_id: i32, caller: &UserClaims, now: DateTime<Utc>) -> AppResult<Loan> {
        let mut loan = self.load(loan_id).await?;
        caller.require_borrower_or_staff(loan.borrower_id)?;

        // Pick up any fine accrued since the loan was last touched
        loan.refresh_status(now, &self.policy);
        if let Err(e) = loan.renew(&self.policy) {
            tracing::warn!(loan_id, error = %e, "Renewal rejected");
            return Err(e.into());
        }

        // Stored as renewed; later reads pick up any new accrual
        self.write(&mut loan).await?;
        tracing::info!(
            loan_id,
            renewal_count = loan.renewal_count,
            due_date = %loan.due_date,
            "Loan renewed"
        );
        Ok(loan)
    }

    /// Settle the fine as of `now`
    pub async fn pay_fine(&self, loan_id: i32, caller: &UserClaims, now: DateTime<Utc>) -> AppResult<Loan> {
        let mut loan = self.load(loan_id).await?;
        caller.require_borrower_or_staff(loan.borrower_id)?;

        loan.refresh_status(now, &self.policy);
        let paid = match loan.pay_fine(now, &self.policy) {
            Ok(paid) => paid,
            Err(e) => {
                tracing::warn!(loan_id, error = %e, "Fine payment rejected");
                return Err(e.into());
            }
        };

        self.write(&mut loan).await?;
        tracing::info!(loan_id, amount = %paid, "Fine paid");
        Ok(loan)
    }

    /// A borrower's loans ("my books")
    pub async fn list_borrower_loans(
        &self,
        borrower_id: i32,
        include_returned: bool,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<Loan>> {
        let filter = LoanFilter {
            borrower_id: Some(borrower_id),
            include_returned: Some(include_returned),
            ..Default::default()
        };
        self.list_loans(&filter, now).await
    }

    /// Loans matching `filter`, each refreshed for `now`.
    ///
    /// Borrowed/overdue filters apply to the refreshed status, so loans
    /// that fell overdue since they were last touched are included.
    pub async fn list_loans(&self, filter: &LoanFilter, now: DateTime<Utc>) -> AppResult<Vec<Loan>> {
        let mut query = filter.clone();
        if matches!(filter.status, Some(LoanStatus::Borrowed | LoanStatus::Overdue)) {
            query.status = None;
        }

        let stored = self.store.list_loans(&query).await?;
        let mut loans = Vec::with_capacity(stored.len());
        for loan in stored {
            let loan = self.refresh(loan, now).await?;
            if filter.matches(&loan) {
                loans.push(loan);
            }
        }
        Ok(loans)
    }

    async fn load(&self, loan_id: i32) -> AppResult<Loan> {
        self.store
            .loan_by_id(loan_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("Loan {}", loan_id)).into())
    }

    /// Recompute status and fine, persisting only when something changed
    async fn refresh(&self, mut loan: Loan, now: DateTime<Utc>) -> AppResult<Loan> {
        if loan.is_returned() {
            return Ok(loan);
        }

        let before = loan.clone();
        loan.refresh_status(now, &self.policy);
        if loan == before {
            return Ok(loan);
        }

        if self.store.save_loan(&loan).await? {
            loan.version += 1;
            tracing::debug!(
                loan_id = loan.id,
                status = %loan.status,
                fine = %loan.fine.total_amount,
                "Loan refreshed"
            );
            return Ok(loan);
        }

        // Someone else wrote first; show their version, refreshed
        tracing::debug!(loan_id = loan.id, "Loan changed during refresh, reloading");
        let mut current = self.load(loan.id).await?;
        current.refresh_status(now, &self.policy);
        Ok(current)
    }

    async fn write(&self, loan: &mut Loan) -> AppResult<()> {
        if self.store.save_loan(loan).await? {
            loan.version += 1;
            Ok(())
        } else {
            Err(self.concurrent_write(loan.id).await)
        }
    }

    /// Explain why an optimistic write lost
    async fn concurrent_write(&self, loan_id: i32) -> AppError {
        match self.load(loan_id).await {
            Ok(current) if current.is_returned() => LedgerError::AlreadyReturned { loan_id }.into(),
            Ok(_) => AppError::Conflict(format!(
                "Loan {} was modified by another request, please retry",
                loan_id
            )),
            Err(e) => e,
        }
    }
}
