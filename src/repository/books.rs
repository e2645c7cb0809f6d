//! Book domain methods on Repository

use chrono::{DateTime, Utc};

use super::Repository;
use crate::{
    error::{AppError, AppResult},
    models::book::{Book, BookQuery, CreateBook},
};

impl Repository {
    /// Get book by ID
    pub async fn books_get_by_id(&self, id: i32) -> AppResult<Option<Book>> {
        let book = sqlx::query_as::<_, Book>("SELECT * FROM books WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(book)
    }

    /// Create a book with every copy on the shelf
    pub async fn books_create(&self, data: &CreateBook, now: DateTime<Utc>) -> AppResult<Book> {
        sqlx::query_as::<_, Book>(
            r#"
            INSERT INTO books (isbn, title, author, total_copies, available_copies, created_at)
            VALUES ($1, $2, $3, $4, $4, $5)
            RETURNING *
            "#,
        )
        .bind(data.isbn.trim())
        .bind(&data.title)
        .bind(&data.author)
        .bind(data.total_copies)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                AppError::Conflict(format!("A book with ISBN {} already exists", data.isbn.trim()))
            }
            other => other.into(),
        })
    }

    /// Search books by title/author
    pub async fn books_list(&self, query: &BookQuery) -> AppResult<Vec<Book>> {
        let pattern = query
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| format!("%{}%", s));

        let books = sqlx::query_as::<_, Book>(
            r#"
            SELECT * FROM books
            WHERE ($1::text IS NULL OR title ILIKE $1 OR author ILIKE $1)
              AND ($2 = FALSE OR available_copies > 0)
            ORDER BY title, id
            "#,
        )
        .bind(pattern)
        .bind(query.available_only.unwrap_or(false))
        .fetch_all(&self.pool)
        .await?;

        Ok(books)
    }
}
