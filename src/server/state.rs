//! State shared by the request handlers

use crate::core::clock::{Clock, SystemClock};
use crate::entities::RepositoryManager;
use crate::storage::EntityStore;
use std::sync::Arc;
use std::time::Duration;

/// Handler state: the store, the deadline of its calls and the clock
/// stamping entity timestamps
///
/// Repositories are never shared between requests; every handler opens its
/// own [`RepositoryManager`] (one unit of work) through [`AppState::repositories`].
#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn EntityStore>,
    deadline: Duration,
    clock: Arc<dyn Clock>,
}

impl AppState {
    pub fn new(store: Arc<dyn EntityStore>, deadline: Duration) -> Self {
        Self {
            store,
            deadline,
            clock: Arc::new(SystemClock::new()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Fresh repositories over a new unit of work
    pub fn repositories(&self) -> RepositoryManager {
        RepositoryManager::with_clock(self.store.clone(), self.deadline, self.clock.clone())
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }
}
