//! Generic repository over a unit of work

use super::store::{Mutation, StorageResult};
use super::unit_of_work::{EntityEntry, UnitOfWork};
use crate::core::entity::Entity;
use crate::core::error::ValidationError;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;

/// CRUD access to the entities of type `T`
///
/// Queries go to the store immediately. Mutations are only staged on the
/// shared [`UnitOfWork`] and reach the store when it is saved. The base
/// contract imposes no ordering on query results; concrete repositories add
/// ordered and filtered queries on top of it.
pub struct Repository<T: Entity> {
    uow: Arc<UnitOfWork>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> Clone for Repository<T> {
    fn clone(&self) -> Self {
        Self {
            uow: self.uow.clone(),
            _entity: PhantomData,
        }
    }
}

impl<T: Entity> Repository<T> {
    pub fn new(uow: Arc<UnitOfWork>) -> Self {
        Self {
            uow,
            _entity: PhantomData,
        }
    }

    /// Every stored `T`
    pub async fn find_all(&self, track: bool) -> StorageResult<Vec<EntityEntry<T>>> {
        self.uow.query(|_: &T| true, track).await
    }

    /// Every stored `T` accepted by `predicate`
    pub async fn find_by_condition<P>(&self, predicate: P, track: bool) -> StorageResult<Vec<EntityEntry<T>>>
    where
        P: Fn(&T) -> bool + Send + Sync,
    {
        self.uow.query(predicate, track).await
    }

    /// Stage the insertion of `entity`
    pub fn create(&self, entity: &T) -> Result<(), ValidationError> {
        let row = Self::to_row(entity)?;
        self.uow.stage(Mutation::Insert {
            table: T::resource_name(),
            id: entity.id(),
            row,
        });
        Ok(())
    }

    /// Stage the replacement of `entity`'s stored row
    pub fn update(&self, entity: &T) -> Result<(), ValidationError> {
        let row = Self::to_row(entity)?;
        self.uow.stage(Mutation::Update {
            table: T::resource_name(),
            id: entity.id(),
            row,
        });
        Ok(())
    }

    /// Stage the removal of `entity`
    pub fn delete(&self, entity: &T) {
        self.uow.stage(Mutation::Delete {
            table: T::resource_name(),
            id: entity.id(),
        });
    }

    /// The unit of work this repository stages into
    pub fn unit_of_work(&self) -> &Arc<UnitOfWork> {
        &self.uow
    }

    fn to_row(entity: &T) -> Result<Value, ValidationError> {
        entity.validate()?;
        serde_json::to_value(entity).map_err(|e| ValidationError::InvalidJson {
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::Company;
    use crate::storage::InMemoryEntityStore;
    use std::time::Duration;

    fn repository(store: &InMemoryEntityStore) -> Repository<Company> {
        let uow = UnitOfWork::new(Arc::new(store.clone()), Duration::from_secs(1));
        Repository::new(Arc::new(uow))
    }

    #[tokio::test]
    async fn test_create_is_staged_until_save() {
        let store = InMemoryEntityStore::new();
        let repo = repository(&store);
        let company = Company::new("Acme", "1 Road", None);

        repo.create(&company).unwrap();
        assert!(repo.find_all(false).await.unwrap().is_empty());

        repo.unit_of_work().save().await.unwrap();
        let all = repo.find_all(false).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].get().id, company.id);
    }

    #[tokio::test]
    async fn test_invalid_entity_is_rejected_before_staging() {
        let store = InMemoryEntityStore::new();
        let repo = repository(&store);
        let company = Company::new("", "1 Road", None);

        let err = repo.create(&company).unwrap_err();
        assert!(matches!(err, ValidationError::FieldErrors(_)));
        assert_eq!(repo.unit_of_work().pending(), 0);
    }

    #[tokio::test]
    async fn test_find_by_condition_filters() {
        let store = InMemoryEntityStore::new();
        let repo = repository(&store);
        repo.create(&Company::new("Acme", "1 Road", None)).unwrap();
        repo.create(&Company::new("Globex", "2 Road", Some("USA")))
            .unwrap();
        repo.unit_of_work().save().await.unwrap();

        let found = repo
            .find_by_condition(|c: &Company| c.country.is_some(), false)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].get().name, "Globex");
    }

    #[tokio::test]
    async fn test_delete_then_save_removes_row() {
        let store = InMemoryEntityStore::new();
        let repo = repository(&store);
        let company = Company::new("Acme", "1 Road", None);
        repo.create(&company).unwrap();
        repo.unit_of_work().save().await.unwrap();

        repo.delete(&company);
        repo.unit_of_work().save().await.unwrap();
        assert_eq!(store.row_count("companies"), 0);
    }
}
