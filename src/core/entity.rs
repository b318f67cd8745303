//! Entity trait defining the minimal capability every persisted record has

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;
use validator::Validate;

/// Base trait for all entities stored through a repository.
///
/// An entity has:
/// - id: Primary key
/// - created_at / updated_at: Timestamps (updated_at feeds `Last-Modified`)
/// - a table name under which the store keeps its rows
///
/// Entities are plain values. They travel through the store as JSON rows, so
/// they must round-trip through serde, and they carry their own pre-flight
/// validation rules through `validator`.
pub trait Entity: Clone + Serialize + DeserializeOwned + Validate + Send + Sync + 'static {
    /// The plural resource name, also used as the store table (e.g., "companies")
    fn resource_name() -> &'static str;

    /// The singular resource name (e.g., "company")
    fn resource_name_singular() -> &'static str;

    /// Get the primary key of this entity instance
    fn id(&self) -> Uuid;

    /// Get the creation timestamp
    fn created_at(&self) -> DateTime<Utc>;

    /// Get the last update timestamp
    fn updated_at(&self) -> DateTime<Utc>;

    /// Mark the entity as modified at `at`
    fn touch(&mut self, at: DateTime<Utc>);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Clone, Debug, Serialize, Deserialize, Validate)]
    struct TestEntity {
        id: Uuid,
        #[validate(length(min = 1))]
        name: String,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    }

    impl Entity for TestEntity {
        fn resource_name() -> &'static str {
            "test_entities"
        }

        fn resource_name_singular() -> &'static str {
            "test_entity"
        }

        fn id(&self) -> Uuid {
            self.id
        }

        fn created_at(&self) -> DateTime<Utc> {
            self.created_at
        }

        fn updated_at(&self) -> DateTime<Utc> {
            self.updated_at
        }

        fn touch(&mut self, at: DateTime<Utc>) {
            self.updated_at = at;
        }
    }

    #[test]
    fn test_entity_metadata() {
        assert_eq!(TestEntity::resource_name(), "test_entities");
        assert_eq!(TestEntity::resource_name_singular(), "test_entity");
    }

    #[test]
    fn test_touch_moves_updated_at() {
        let past = Utc::now() - chrono::Duration::hours(1);
        let mut entity = TestEntity {
            id: Uuid::new_v4(),
            name: "x".to_string(),
            created_at: past,
            updated_at: past,
        };

        let now = past + chrono::Duration::minutes(5);
        entity.touch(now);
        assert_eq!(entity.updated_at(), now);
        assert_eq!(entity.created_at(), past);
    }

    #[test]
    fn test_validation_rules_travel_with_entity() {
        let now = Utc::now();
        let entity = TestEntity {
            id: Uuid::new_v4(),
            name: String::new(),
            created_at: now,
            updated_at: now,
        };
        assert!(entity.validate().is_err());
    }
}
