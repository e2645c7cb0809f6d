//! Loan domain methods on Repository

use super::Repository;
use crate::{
    error::{AppError, AppResult, LedgerError},
    models::loan::{Loan, LoanFilter, LoanRow, LoanStatus, NewLoan},
};

impl Repository {
    /// Get loan by ID
    pub async fn loans_get_by_id(&self, id: i32) -> AppResult<Option<Loan>> {
        let row = sqlx::query_as::<_, LoanRow>("SELECT * FROM loans WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Loan::from))
    }

    /// List loans matching the filter, soonest due first
    pub async fn loans_list(&self, filter: &LoanFilter) -> AppResult<Vec<Loan>> {
        let rows = sqlx::query_as::<_, LoanRow>(
            r#"
            SELECT * FROM loans
            WHERE ($1::int IS NULL OR borrower_id = $1)
              AND ($2::int IS NULL OR book_id = $2)
              AND ($3::text IS NULL OR status = $3)
              AND ($4 OR return_date IS NULL OR COALESCE($3::text = 'returned', FALSE))
            ORDER BY due_date, id
            "#,
        )
        .bind(filter.borrower_id)
        .bind(filter.book_id)
        .bind(filter.status)
        .bind(filter.include_returned.unwrap_or(false))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Loan::from).collect())
    }

    /// Whether the borrower currently holds this book
    pub async fn loans_has_active(&self, book_id: i32, borrower_id: i32) -> AppResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM loans WHERE book_id = $1 AND borrower_id = $2 AND return_date IS NULL)",
        )
        .bind(book_id)
        .bind(borrower_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    /// Count the borrower's open loans
    pub async fn loans_count_active(&self, borrower_id: i32) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM loans WHERE borrower_id = $1 AND return_date IS NULL",
        )
        .bind(borrower_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Create a loan, taking a copy with a conditional decrement
    pub async fn loans_create(&self, loan: &NewLoan, max_active: u32) -> AppResult<Loan> {
        let mut tx = self.pool.begin().await?;

        // Serializes concurrent borrows by the same borrower for the cap check
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(i64::from(loan.borrower_id))
            .execute(&mut *tx)
            .await?;

        let taken = sqlx::query(
            "UPDATE books SET available_copies = available_copies - 1 WHERE id = $1 AND available_copies > 0",
        )
        .bind(loan.book_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if taken == 0 {
            let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM books WHERE id = $1)")
                .bind(loan.book_id)
                .fetch_one(&mut *tx)
                .await?;
            return Err(if exists {
                LedgerError::Unavailable { book_id: loan.book_id }.into()
            } else {
                LedgerError::NotFound(format!("Book {}", loan.book_id)).into()
            });
        }

        let duplicate: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM loans WHERE book_id = $1 AND borrower_id = $2 AND return_date IS NULL)",
        )
        .bind(loan.book_id)
        .bind(loan.borrower_id)
        .fetch_one(&mut *tx)
        .await?;
        if duplicate {
            return Err(LedgerError::DuplicateLoan {
                book_id: loan.book_id,
                borrower_id: loan.borrower_id,
            }
            .into());
        }

        let active: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM loans WHERE borrower_id = $1 AND return_date IS NULL",
        )
        .bind(loan.borrower_id)
        .fetch_one(&mut *tx)
        .await?;
        if active >= i64::from(max_active) {
            return Err(LedgerError::LimitExceeded {
                borrower_id: loan.borrower_id,
                active,
                max: max_active,
            }
            .into());
        }

        let row = sqlx::query_as::<_, LoanRow>(
            r#"
            INSERT INTO loans (book_id, borrower_id, borrower_type, borrow_date, due_date, status, issued_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(loan.book_id)
        .bind(loan.borrower_id)
        .bind(loan.borrower_type)
        .bind(loan.borrow_date)
        .bind(loan.due_date)
        .bind(LoanStatus::Borrowed)
        .bind(loan.issued_by)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                AppError::from(LedgerError::DuplicateLoan {
                    book_id: loan.book_id,
                    borrower_id: loan.borrower_id,
                })
            }
            other => other.into(),
        })?;

        tx.commit().await?;
        Ok(row.into())
    }

    /// Close a loan and release its copy
    pub async fn loans_close(&self, loan: &Loan) -> AppResult<bool> {
        let mut tx = self.pool.begin().await?;

        let closed = sqlx::query(
            r#"
            UPDATE loans
            SET return_date = $3, status = $4,
                fine_amount = $5, late_fee_amount = $6, fine_total = $7, late_fee_applied = $8,
                version = version + 1
            WHERE id = $1 AND version = $2 AND return_date IS NULL
            "#,
        )
        .bind(loan.id)
        .bind(loan.version)
        .bind(loan.return_date)
        .bind(loan.status)
        .bind(loan.fine.amount)
        .bind(loan.fine.late_fee_amount)
        .bind(loan.fine.total_amount)
        .bind(loan.fine.late_fee_applied)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if closed == 0 {
            return Ok(false);
        }

        let released = sqlx::query(
            "UPDATE books SET available_copies = available_copies + 1 WHERE id = $1 AND available_copies < total_copies",
        )
        .bind(loan.book_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if released == 0 {
            return Err(AppError::Internal(format!(
                "Book {} has no lent copy to release for loan {}",
                loan.book_id, loan.id
            )));
        }

        tx.commit().await?;
        Ok(true)
    }

    /// Optimistic write of the mutable loan fields
    pub async fn loans_update(&self, loan: &Loan) -> AppResult<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE loans
            SET due_date = $3, status = $4,
                fine_amount = $5, late_fee_amount = $6, fine_total = $7,
                fine_paid = $8, fine_paid_at = $9, late_fee_applied = $10,
                renewal_count = $11, version = version + 1
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(loan.id)
        .bind(loan.version)
        .bind(loan.due_date)
        .bind(loan.status)
        .bind(loan.fine.amount)
        .bind(loan.fine.late_fee_amount)
        .bind(loan.fine.total_amount)
        .bind(loan.fine.is_paid)
        .bind(loan.fine.paid_at)
        .bind(loan.fine.late_fee_applied)
        .bind(loan.renewal_count)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(updated == 1)
    }
}
