//! In-memory implementation of EntityStore for testing and development

use super::store::{EntityStore, Mutation, RowPredicate, StorageResult};
use crate::core::error::StorageError;
use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use uuid::Uuid;

type Table = IndexMap<Uuid, Value>;

/// In-memory entity store
///
/// Tables keep insertion order, so unordered listings are stable. Uses RwLock
/// for thread-safe access; a commit holds the write lock for the whole batch.
#[derive(Clone, Default)]
pub struct InMemoryEntityStore {
    tables: Arc<RwLock<HashMap<String, Table>>>,
    latency: Option<Duration>,
}

impl InMemoryEntityStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every operation, to exercise caller deadlines
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Number of rows currently stored in `table`
    pub fn row_count(&self, table: &str) -> usize {
        self.tables
            .read()
            .map(|tables| tables.get(table).map_or(0, IndexMap::len))
            .unwrap_or(0)
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn apply(tables: &mut HashMap<String, Table>, mutation: Mutation) -> StorageResult<()> {
        match mutation {
            Mutation::Insert { table, id, row } => {
                let rows = tables.entry(table.to_string()).or_default();
                if rows.contains_key(&id) {
                    return Err(StorageError::Constraint {
                        message: format!("duplicate key {} in {}", id, table),
                    });
                }
                rows.insert(id, row);
            }
            Mutation::Update { table, id, row } => {
                let slot = tables
                    .get_mut(table)
                    .and_then(|rows| rows.get_mut(&id))
                    .ok_or_else(|| StorageError::Constraint {
                        message: format!("cannot update missing row {} in {}", id, table),
                    })?;
                *slot = row;
            }
            Mutation::Delete { table, id } => {
                tables
                    .get_mut(table)
                    .and_then(|rows| rows.shift_remove(&id))
                    .ok_or_else(|| StorageError::Constraint {
                        message: format!("cannot delete missing row {} in {}", id, table),
                    })?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn query(&self, table: &str, predicate: &RowPredicate<'_>) -> StorageResult<Vec<Value>> {
        self.simulate_latency().await;

        let tables = self.tables.read().map_err(|e| StorageError::Unavailable {
            backend: "in-memory".to_string(),
            message: format!("Failed to acquire read lock: {}", e),
        })?;

        Ok(tables
            .get(table)
            .map(|rows| rows.values().filter(|row| predicate(row)).cloned().collect())
            .unwrap_or_default())
    }

    async fn commit(&self, batch: Vec<Mutation>) -> StorageResult<()> {
        self.simulate_latency().await;

        let mut tables = self.tables.write().map_err(|e| StorageError::Unavailable {
            backend: "in-memory".to_string(),
            message: format!("Failed to acquire write lock: {}", e),
        })?;

        // Work on copies of the touched tables so a failing mutation leaves
        // the live tables untouched.
        let mut scratch: HashMap<String, Table> = HashMap::new();
        for mutation in &batch {
            let table = mutation.table();
            if !scratch.contains_key(table) {
                scratch.insert(
                    table.to_string(),
                    tables.get(table).cloned().unwrap_or_default(),
                );
            }
        }

        for mutation in batch {
            Self::apply(&mut scratch, mutation)?;
        }

        tables.extend(scratch);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn insert(id: Uuid, name: &str) -> Mutation {
        Mutation::Insert {
            table: "companies",
            id,
            row: json!({ "id": id, "name": name }),
        }
    }

    #[tokio::test]
    async fn test_commit_then_query() {
        let store = InMemoryEntityStore::new();
        let id = Uuid::new_v4();

        store.commit(vec![insert(id, "Acme")]).await.unwrap();

        let rows = store.query("companies", &|_| true).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], "Acme");
    }

    #[tokio::test]
    async fn test_query_applies_predicate() {
        let store = InMemoryEntityStore::new();
        store
            .commit(vec![
                insert(Uuid::new_v4(), "Acme"),
                insert(Uuid::new_v4(), "Globex"),
            ])
            .await
            .unwrap();

        let rows = store
            .query("companies", &|row| row["name"] == "Globex")
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_query_unknown_table_is_empty() {
        let store = InMemoryEntityStore::new();
        let rows = store.query("nothing", &|_| true).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_failed_batch_applies_nothing() {
        let store = InMemoryEntityStore::new();
        let result = store
            .commit(vec![
                insert(Uuid::new_v4(), "Acme"),
                Mutation::Delete {
                    table: "companies",
                    id: Uuid::new_v4(),
                },
            ])
            .await;

        assert!(matches!(result, Err(StorageError::Constraint { .. })));
        assert_eq!(store.row_count("companies"), 0);
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_rejected() {
        let store = InMemoryEntityStore::new();
        let id = Uuid::new_v4();
        store.commit(vec![insert(id, "Acme")]).await.unwrap();

        let result = store.commit(vec![insert(id, "Acme again")]).await;
        assert!(matches!(result, Err(StorageError::Constraint { .. })));
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let store = InMemoryEntityStore::new();
        let id = Uuid::new_v4();
        store.commit(vec![insert(id, "Acme")]).await.unwrap();

        store
            .commit(vec![Mutation::Update {
                table: "companies",
                id,
                row: json!({ "id": id, "name": "Acme Corp" }),
            }])
            .await
            .unwrap();
        let rows = store.query("companies", &|_| true).await.unwrap();
        assert_eq!(rows[0]["name"], "Acme Corp");

        store
            .commit(vec![Mutation::Delete {
                table: "companies",
                id,
            }])
            .await
            .unwrap();
        assert_eq!(store.row_count("companies"), 0);
    }
}
