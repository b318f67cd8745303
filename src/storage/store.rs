//! Entity store contract
//!
//! The store is the leaf of the data-access layer. It knows nothing about
//! entity types: rows travel as JSON values keyed by table name and primary
//! key. Staging lives in the request-scoped [`UnitOfWork`](super::UnitOfWork),
//! so the store only has to answer queries and apply a whole batch atomically.

use crate::core::error::StorageError;
use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

/// Result type of store operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Row filter pushed down to the store
pub type RowPredicate<'a> = dyn Fn(&Value) -> bool + Send + Sync + 'a;

/// A single staged change
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Add a new row; fails if the key already exists
    Insert {
        table: &'static str,
        id: Uuid,
        row: Value,
    },

    /// Replace an existing row; fails if the key is missing
    Update {
        table: &'static str,
        id: Uuid,
        row: Value,
    },

    /// Remove an existing row; fails if the key is missing
    Delete { table: &'static str, id: Uuid },
}

impl Mutation {
    pub fn table(&self) -> &'static str {
        match self {
            Mutation::Insert { table, .. }
            | Mutation::Update { table, .. }
            | Mutation::Delete { table, .. } => table,
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            Mutation::Insert { id, .. } | Mutation::Update { id, .. } | Mutation::Delete { id, .. } => {
                *id
            }
        }
    }

    /// Short label used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Mutation::Insert { .. } => "insert",
            Mutation::Update { .. } => "update",
            Mutation::Delete { .. } => "delete",
        }
    }
}

/// Persistence engine behind the repositories
///
/// Implementations must apply [`EntityStore::commit`] atomically: either every
/// mutation of the batch becomes visible or none does.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Return every row of `table` accepted by `predicate`, in storage order
    async fn query(&self, table: &str, predicate: &RowPredicate<'_>) -> StorageResult<Vec<Value>>;

    /// Apply a batch of mutations as one transaction
    async fn commit(&self, batch: Vec<Mutation>) -> StorageResult<()>;
}
