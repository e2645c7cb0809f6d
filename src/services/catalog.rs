//! Catalog service for books

use std::sync::Arc;

use chrono::{DateTime, Utc};
use validator::Validate;

use crate::{
    error::{AppResult, LedgerError},
    models::book::{Book, BookQuery, CreateBook},
    repository::LedgerStore,
};

#[derive(Clone)]
pub struct CatalogService {
    store: Arc<dyn LedgerStore>,
}

impl CatalogService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Get a book by ID
    pub async fn get_book(&self, id: i32) -> AppResult<Book> {
        self.store
            .book_by_id(id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("Book {}", id)).into())
    }

    /// Search the catalog
    pub async fn list_books(&self, query: &BookQuery) -> AppResult<Vec<Book>> {
        self.store.list_books(query).await
    }

    /// Add a book with all its copies on the shelf
    pub async fn create_book(&self, book: CreateBook, now: DateTime<Utc>) -> AppResult<Book> {
        book.validate()?;
        let created = self.store.create_book(&book, now).await?;
        tracing::info!(book_id = created.id, isbn = %created.isbn, copies = created.total_copies, "Book added to catalog");
        Ok(created)
    }
}
