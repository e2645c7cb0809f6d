//! Campus Library loan ledger
//!
//! REST JSON API for lending library books on campus: borrowing against
//! per-role loan limits, returns, renewals, and lazily computed overdue
//! fines with a one-time late fee.

use std::sync::Arc;

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod repository;
pub mod services;

pub use config::AppConfig;
pub use error::{AppError, AppResult, LedgerError};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub services: Arc<services::Services>,
}

impl AppState {
    /// Build the state on top of an already opened store
    pub fn new(config: AppConfig, store: Arc<dyn repository::LedgerStore>) -> Self {
        let services = services::Services::new(store, config.library.clone());
        Self {
            config: Arc::new(config),
            services: Arc::new(services),
        }
    }
}
