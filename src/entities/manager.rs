//! Per-request façade over every concrete repository

use crate::entities::company::CompanyRepository;
use crate::entities::employee::EmployeeRepository;
use crate::core::clock::{Clock, SystemClock};
use crate::storage::{EntityStore, StorageResult, UnitOfWork};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Bundles the concrete repositories of one request over a shared
/// [`UnitOfWork`]
///
/// Whatever the repositories stage is persisted by a single
/// [`RepositoryManager::save`], all together or not at all.
pub struct RepositoryManager {
    uow: Arc<UnitOfWork>,
    company: CompanyRepository,
    employee: EmployeeRepository,
}

impl RepositoryManager {
    pub fn new(store: Arc<dyn EntityStore>, deadline: Duration) -> Self {
        Self::with_clock(store, deadline, Arc::new(SystemClock::new()))
    }

    /// Repositories whose timestamps come from `clock`
    pub fn with_clock(store: Arc<dyn EntityStore>, deadline: Duration, clock: Arc<dyn Clock>) -> Self {
        let uow = Arc::new(UnitOfWork::new(store, deadline).with_clock(clock));
        Self {
            company: CompanyRepository::new(uow.clone()),
            employee: EmployeeRepository::new(uow.clone()),
            uow,
        }
    }

    pub fn company(&self) -> &CompanyRepository {
        &self.company
    }

    pub fn employee(&self) -> &EmployeeRepository {
        &self.employee
    }

    /// Commit everything staged by any repository of this manager
    pub async fn save(&self) -> StorageResult<usize> {
        self.uow.save().await
    }

    pub fn unit_of_work(&self) -> &Arc<UnitOfWork> {
        &self.uow
    }

    /// Timestamp for entities created or modified by this request
    pub fn now(&self) -> DateTime<Utc> {
        self.uow.now()
    }
}
