//! Employee entity, its transfer objects and repository

use crate::core::error::ValidationError;
use crate::core::query::{PagedList, QueryParams};
use crate::impl_entity;
use crate::impl_repository_base;
use crate::storage::{EntityEntry, Repository, StorageResult, UnitOfWork};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Employee {
    pub id: Uuid,
    pub company_id: Uuid,

    #[validate(length(min = 1, max = 30, message = "Employee name is required (max 30 characters)"))]
    pub name: String,

    #[validate(range(min = 18, max = 130, message = "Age must be between 18 and 130"))]
    pub age: u32,

    #[validate(length(min = 1, max = 20, message = "Position is required (max 20 characters)"))]
    pub position: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl_entity!(Employee, "employee", "employees");

impl Employee {
    pub fn new(company_id: Uuid, name: &str, age: u32, position: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            company_id,
            name: name.to_string(),
            age,
            position: position.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Overwrite the editable fields
    pub fn apply(&mut self, update: EmployeeForUpdate) {
        self.name = update.name;
        self.age = update.age;
        self.position = update.position;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmployeeDto {
    pub id: Uuid,
    pub name: String,
    pub age: u32,
    pub position: String,
}

impl From<&Employee> for EmployeeDto {
    fn from(employee: &Employee) -> Self {
        Self {
            id: employee.id,
            name: employee.name.clone(),
            age: employee.age,
            position: employee.position.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct EmployeeForCreation {
    #[validate(length(min = 1, max = 30, message = "Employee name is required (max 30 characters)"))]
    pub name: String,

    #[validate(range(min = 18, max = 130, message = "Age must be between 18 and 130"))]
    pub age: u32,

    #[validate(length(min = 1, max = 20, message = "Position is required (max 20 characters)"))]
    pub position: String,
}

impl EmployeeForCreation {
    /// New employee of `company_id` created at `at`
    pub fn to_employee(&self, company_id: Uuid, at: DateTime<Utc>) -> Employee {
        let mut employee = Employee::new(company_id, &self.name, self.age, &self.position);
        employee.created_at = at;
        employee.updated_at = at;
        employee
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct EmployeeForUpdate {
    #[validate(length(min = 1, max = 30, message = "Employee name is required (max 30 characters)"))]
    pub name: String,

    #[validate(range(min = 18, max = 130, message = "Age must be between 18 and 130"))]
    pub age: u32,

    #[validate(length(min = 1, max = 20, message = "Position is required (max 20 characters)"))]
    pub position: String,
}

/// Filters and paging of the employee listing
///
/// ```text
/// GET /api/companies/{company_id}/employees?min_age=20&max_age=40&search=ann&page=2&limit=10
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EmployeeQuery {
    pub page: Option<usize>,
    pub limit: Option<usize>,
    pub min_age: Option<u32>,
    pub max_age: Option<u32>,
    /// Case-insensitive substring of the name
    pub search: Option<String>,
}

impl EmployeeQuery {
    pub fn paging(&self) -> QueryParams {
        let defaults = QueryParams::default();
        QueryParams::new(
            self.page.unwrap_or(defaults.page),
            self.limit.unwrap_or(defaults.limit),
        )
    }

    /// Reject an inverted age range
    pub fn validate_range(&self) -> Result<(), ValidationError> {
        match (self.min_age, self.max_age) {
            (Some(min), Some(max)) if max < min => Err(ValidationError::FieldError {
                field: "max_age".to_string(),
                message: "Max age can't be less than min age".to_string(),
            }),
            _ => Ok(()),
        }
    }

    fn matches(&self, employee: &Employee) -> bool {
        let min = self.min_age.unwrap_or(0);
        let max = self.max_age.unwrap_or(u32::MAX);
        if employee.age < min || employee.age > max {
            return false;
        }
        match self.search.as_deref().map(str::trim) {
            Some(term) if !term.is_empty() => employee
                .name
                .to_lowercase()
                .contains(&term.to_lowercase()),
            _ => true,
        }
    }
}

/// Employee queries on top of the generic repository
#[derive(Clone)]
pub struct EmployeeRepository {
    base: Repository<Employee>,
}

impl_repository_base!(EmployeeRepository, Employee);

impl EmployeeRepository {
    pub fn new(uow: Arc<UnitOfWork>) -> Self {
        Self {
            base: Repository::new(uow),
        }
    }

    /// Employees of a company matching `query`, ordered by name and paged
    pub async fn get_employees(
        &self,
        company_id: Uuid,
        query: &EmployeeQuery,
        track: bool,
    ) -> StorageResult<PagedList<EntityEntry<Employee>>> {
        let mut employees = self
            .find_by_condition(
                |e: &Employee| e.company_id == company_id && query.matches(e),
                track,
            )
            .await?;
        employees.sort_by_cached_key(|entry| entry.read(|e| e.name.clone()));
        Ok(PagedList::paginate(employees, &query.paging()))
    }

    pub async fn get_employee(
        &self,
        company_id: Uuid,
        id: Uuid,
        track: bool,
    ) -> StorageResult<Option<EntityEntry<Employee>>> {
        let found = self
            .find_by_condition(
                move |e: &Employee| e.company_id == company_id && e.id == id,
                track,
            )
            .await?;
        Ok(found.into_iter().next())
    }
}
