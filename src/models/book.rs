//! Book model and related types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

/// Catalog book with its copy counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Book {
    pub id: i32,
    pub isbn: String,
    pub title: String,
    pub author: Option<String>,
    pub total_copies: i32,
    /// Copies not currently on loan, always within `0..=total_copies`
    pub available_copies: i32,
    pub created_at: DateTime<Utc>,
}

impl Book {
    pub fn on_loan(&self) -> i32 {
        self.total_copies - self.available_copies
    }
}

/// Create book request
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateBook {
    #[validate(length(min = 10, max = 17, message = "ISBN must be 10 to 17 characters"))]
    pub isbn: String,
    #[validate(length(min = 1, max = 512))]
    pub title: String,
    pub author: Option<String>,
    #[validate(range(min = 1, max = 10000))]
    pub total_copies: i32,
}

/// Book search query
#[derive(Debug, Clone, Default, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct BookQuery {
    /// Case-insensitive substring of title or author
    pub search: Option<String>,
    /// Only books with at least one copy on the shelf
    pub available_only: Option<bool>,
}

impl BookQuery {
    pub fn matches(&self, book: &Book) -> bool {
        if self.available_only.unwrap_or(false) && book.available_copies <= 0 {
            return false;
        }
        match self.search.as_deref().map(str::trim) {
            Some(term) if !term.is_empty() => {
                let term = term.to_lowercase();
                book.title.to_lowercase().contains(&term)
                    || book
                        .author
                        .as_deref()
                        .map_or(false, |a| a.to_lowercase().contains(&term))
            }
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book(title: &str, author: Option<&str>, available: i32) -> Book {
        Book {
            id: 1,
            isbn: "9780000000001".to_string(),
            title: title.to_string(),
            author: author.map(str::to_string),
            total_copies: 2,
            available_copies: available,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn query_matches_title_or_author() {
        let q = BookQuery {
            search: Some("rust".to_string()),
            available_only: None,
        };
        assert!(q.matches(&book("Programming Rust", None, 1)));
        assert!(q.matches(&book("Systems", Some("A. Rustacean"), 1)));
        assert!(!q.matches(&book("Compilers", Some("Aho"), 1)));
    }

    #[test]
    fn available_only_skips_lent_out_books() {
        let q = BookQuery {
            search: None,
            available_only: Some(true),
        };
        assert!(!q.matches(&book("Compilers", None, 0)));
        assert_eq!(book("Compilers", None, 0).on_loan(), 2);
    }

    #[test]
    fn create_book_validation() {
        let ok = CreateBook {
            isbn: "978-3-16-148410-0".to_string(),
            title: "Operating Systems".to_string(),
            author: None,
            total_copies: 3,
        };
        assert!(ok.validate().is_ok());

        let bad = CreateBook {
            total_copies: 0,
            isbn: "123".to_string(),
            ..ok
        };
        assert!(bad.validate().is_err());
    }
}
