//! Company entity, its transfer objects and repository

use crate::entities::employee::EmployeeForCreation;
use crate::impl_entity;
use crate::impl_repository_base;
use crate::storage::{EntityEntry, Repository, StorageResult, UnitOfWork};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Company {
    pub id: Uuid,

    #[validate(length(min = 1, max = 60, message = "Company name is required (max 60 characters)"))]
    pub name: String,

    #[validate(length(min = 1, max = 60, message = "Company address is required (max 60 characters)"))]
    pub address: String,

    #[validate(length(max = 40, message = "Country is limited to 40 characters"))]
    pub country: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl_entity!(Company, "company", "companies");

impl Company {
    pub fn new(name: &str, address: &str, country: Option<&str>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            address: address.to_string(),
            country: country.map(str::to_string),
            created_at: now,
            updated_at: now,
        }
    }

    /// Overwrite the editable fields
    pub fn apply(&mut self, update: CompanyForUpdate) {
        self.name = update.name;
        self.address = update.address;
        self.country = update.country;
    }
}

/// Company as returned by version 1.0
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyDto {
    pub id: Uuid,
    pub name: String,
    pub full_address: String,
}

impl From<&Company> for CompanyDto {
    fn from(company: &Company) -> Self {
        let full_address = match &company.country {
            Some(country) => format!("{} {}", company.address, country),
            None => company.address.clone(),
        };
        Self {
            id: company.id,
            name: company.name.clone(),
            full_address,
        }
    }
}

/// Reduced listing served by version 2.0
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyNameDto {
    pub id: Uuid,
    pub name: String,
}

impl From<&Company> for CompanyNameDto {
    fn from(company: &Company) -> Self {
        Self {
            id: company.id,
            name: company.name.clone(),
        }
    }
}

/// Payload of `POST /api/companies`, optionally with initial employees
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CompanyForCreation {
    #[validate(length(min = 1, max = 60, message = "Company name is required (max 60 characters)"))]
    pub name: String,

    #[validate(length(min = 1, max = 60, message = "Company address is required (max 60 characters)"))]
    pub address: String,

    #[validate(length(max = 40, message = "Country is limited to 40 characters"))]
    pub country: Option<String>,

    #[serde(default)]
    #[validate(nested)]
    pub employees: Vec<EmployeeForCreation>,
}

impl CompanyForCreation {
    /// New company created at `at`
    pub fn to_company(&self, at: DateTime<Utc>) -> Company {
        let mut company = Company::new(&self.name, &self.address, self.country.as_deref());
        company.created_at = at;
        company.updated_at = at;
        company
    }
}

/// Payload of `PUT /api/companies/{id}`
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CompanyForUpdate {
    #[validate(length(min = 1, max = 60, message = "Company name is required (max 60 characters)"))]
    pub name: String,

    #[validate(length(min = 1, max = 60, message = "Company address is required (max 60 characters)"))]
    pub address: String,

    #[validate(length(max = 40, message = "Country is limited to 40 characters"))]
    pub country: Option<String>,
}

/// Company queries on top of the generic repository
#[derive(Clone)]
pub struct CompanyRepository {
    base: Repository<Company>,
}

impl_repository_base!(CompanyRepository, Company);

impl CompanyRepository {
    pub fn new(uow: Arc<UnitOfWork>) -> Self {
        Self {
            base: Repository::new(uow),
        }
    }

    /// Every company, ordered by name
    pub async fn get_all_companies(&self, track: bool) -> StorageResult<Vec<EntityEntry<Company>>> {
        let mut companies = self.find_all(track).await?;
        sort_by_name(&mut companies);
        Ok(companies)
    }

    pub async fn get_company(&self, id: Uuid, track: bool) -> StorageResult<Option<EntityEntry<Company>>> {
        let found = self.find_by_condition(move |c: &Company| c.id == id, track).await?;
        Ok(found.into_iter().next())
    }

    /// The companies among `ids` that exist, ordered by name
    pub async fn get_by_ids(&self, ids: &[Uuid], track: bool) -> StorageResult<Vec<EntityEntry<Company>>> {
        let wanted: HashSet<Uuid> = ids.iter().copied().collect();
        let mut companies = self
            .find_by_condition(move |c: &Company| wanted.contains(&c.id), track)
            .await?;
        sort_by_name(&mut companies);
        Ok(companies)
    }
}

fn sort_by_name(companies: &mut [EntityEntry<Company>]) {
    companies.sort_by_cached_key(|entry| entry.read(|c| c.name.clone()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_length_is_enforced() {
        let company = Company::new(&"x".repeat(61), "1 Road", None);
        assert!(company.validate().is_err());

        let company = Company::new(&"x".repeat(60), "1 Road", None);
        assert!(company.validate().is_ok());
    }

    #[test]
    fn test_country_is_optional_but_bounded() {
        assert!(Company::new("Acme", "1 Road", None).validate().is_ok());
        assert!(
            Company::new("Acme", "1 Road", Some(&"c".repeat(41)))
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_dto_joins_address_and_country() {
        let company = Company::new("Acme", "1 Road", Some("France"));
        assert_eq!(CompanyDto::from(&company).full_address, "1 Road France");

        let company = Company::new("Acme", "1 Road", None);
        assert_eq!(CompanyDto::from(&company).full_address, "1 Road");
    }

    #[test]
    fn test_creation_payload_validates_employees() {
        let payload: CompanyForCreation = serde_json::from_value(serde_json::json!({
            "name": "Acme",
            "address": "1 Road",
            "employees": [{ "name": "Kid", "age": 12, "position": "Intern" }]
        }))
        .unwrap();
        assert!(payload.validate().is_err());
    }
}
