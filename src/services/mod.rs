//! Business logic services

pub mod catalog;
pub mod loans;

use std::sync::Arc;

use crate::{config::LoanPolicy, error::AppResult, repository::LedgerStore};

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub catalog: catalog::CatalogService,
    pub loans: loans::LoanLedger,
    store: Arc<dyn LedgerStore>,
}

impl Services {
    /// Create all services on top of the given store
    pub fn new(store: Arc<dyn LedgerStore>, policy: LoanPolicy) -> Self {
        Self {
            catalog: catalog::CatalogService::new(store.clone()),
            loans: loans::LoanLedger::new(store.clone(), Arc::new(policy)),
            store,
        }
    }

    /// Whether the backing store answers
    pub async fn check_store(&self) -> AppResult<()> {
        self.store.ping().await
    }
}
