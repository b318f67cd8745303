//! # company-api
//!
//! A REST backend serving companies and their employees, with request
//! governance in front of the controllers.
//!
//! ## Features
//!
//! - **Generic repositories**: `Repository<T>` over a request-scoped unit of
//!   work, tracked and untracked queries, one atomic commit per save
//! - **Rate limiting**: per-client quotas with fixed or rolling windows,
//!   client overrides, exempt clients and hot reload
//! - **Conditional caching**: strong entity tags, `Last-Modified`, 304 and
//!   412 handling, cache profiles per resource class
//! - **Header versioning**: `api-version` selects the router of a version
//! - **YAML configuration** with defaults for every field
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use company_api::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = AppConfig::from_yaml_file("config.yaml")?;
//!     let addr = config.server.address();
//!     ServerBuilder::new()
//!         .with_config(config)
//!         .with_store(InMemoryEntityStore::new())
//!         .serve(&addr)
//!         .await
//! }
//! ```

pub mod config;
pub mod core;
pub mod entities;
pub mod governance;
pub mod server;
pub mod storage;

/// Re-exports of commonly used types and traits
pub mod prelude {
    // === Core ===
    pub use crate::core::{
        clock::{Clock, ManualClock, SystemClock},
        entity::Entity,
        error::{ApiError, ApiResult, EntityError, StorageError, ValidationError},
        query::{PagedList, PaginationMeta, QueryParams},
    };

    // === Entities ===
    pub use crate::entities::{
        Company, CompanyDto, CompanyForCreation, CompanyForUpdate, CompanyNameDto, CompanyRepository, Employee,
        EmployeeDto, EmployeeForCreation, EmployeeForUpdate, EmployeeQuery, EmployeeRepository, RepositoryManager,
    };

    // === Storage ===
    pub use crate::storage::{EntityEntry, EntityStore, InMemoryEntityStore, Mutation, Repository, UnitOfWork};

    // === Governance ===
    pub use crate::governance::{
        ApiVersion, CacheProfile, CacheValidator, ContentionPolicy, GovernancePipeline, RateLimitProcessor,
        RateLimitRule, VersionRouter, WindowKind,
    };

    // === Config ===
    pub use crate::config::AppConfig;

    // === Server ===
    pub use crate::server::{AppState, ServerBuilder, ServerHost};

    // === External dependencies ===
    pub use anyhow::Result;
    pub use async_trait::async_trait;
    pub use chrono::{DateTime, Utc};
    pub use serde::{Deserialize, Serialize};
    pub use uuid::Uuid;
}
