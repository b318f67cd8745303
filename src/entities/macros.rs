//! Macros for reducing boilerplate when defining entities

/// Implement [`Entity`](crate::core::entity::Entity) for a struct carrying
/// the base fields `id`, `created_at` and `updated_at`
///
/// # Example
///
/// ```rust,ignore
/// #[derive(Debug, Clone, Serialize, Deserialize, Validate)]
/// pub struct Company {
///     pub id: Uuid,
///     #[validate(length(min = 1, max = 60))]
///     pub name: String,
///     pub created_at: DateTime<Utc>,
///     pub updated_at: DateTime<Utc>,
/// }
///
/// impl_entity!(Company, "company", "companies");
/// ```
#[macro_export]
macro_rules! impl_entity {
    ($type:ident, $singular:expr, $plural:expr $(,)?) => {
        impl $crate::core::entity::Entity for $type {
            fn resource_name() -> &'static str {
                $plural
            }

            fn resource_name_singular() -> &'static str {
                $singular
            }

            fn id(&self) -> ::uuid::Uuid {
                self.id
            }

            fn created_at(&self) -> ::chrono::DateTime<::chrono::Utc> {
                self.created_at
            }

            fn updated_at(&self) -> ::chrono::DateTime<::chrono::Utc> {
                self.updated_at
            }

            fn touch(&mut self, at: ::chrono::DateTime<::chrono::Utc>) {
                self.updated_at = at;
            }
        }
    };
}

/// Expose a concrete repository's base [`Repository`](crate::storage::Repository)
/// through `Deref`, so the generic operations stay available on it
#[macro_export]
macro_rules! impl_repository_base {
    ($repo:ident, $entity:ty) => {
        impl ::std::ops::Deref for $repo {
            type Target = $crate::storage::Repository<$entity>;

            fn deref(&self) -> &Self::Target {
                &self.base
            }
        }
    };
}
