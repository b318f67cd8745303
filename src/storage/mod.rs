//! Data-access layer: store contract, unit of work and repositories

pub mod in_memory;
pub mod repository;
pub mod store;
pub mod unit_of_work;

pub use in_memory::InMemoryEntityStore;
pub use repository::Repository;
pub use store::{EntityStore, Mutation, RowPredicate, StorageResult};
pub use unit_of_work::{EntityEntry, UnitOfWork};
