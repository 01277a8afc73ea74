//! Business logic services

pub mod inventory;
pub mod lending;
pub mod loan_state;
pub mod locks;
pub mod progress;

use std::sync::Arc;

use crate::{clock::Clock, config::LendingConfig, repository::LendingStore};

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub lending: lending::LendingService,
}

impl Services {
    /// Create all services on top of the given store
    pub fn new(store: Arc<dyn LendingStore>, config: &LendingConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            lending: lending::LendingService::new(store, config, clock),
        }
    }
}
