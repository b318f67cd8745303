//! Domain entities and their repositories

pub mod company;
pub mod employee;
pub mod macros;
pub mod manager;

pub use company::{
    Company, CompanyDto, CompanyForCreation, CompanyForUpdate, CompanyNameDto, CompanyRepository,
};
pub use employee::{
    Employee, EmployeeDto, EmployeeForCreation, EmployeeForUpdate, EmployeeQuery,
    EmployeeRepository,
};
pub use manager::RepositoryManager;
