//! Employee endpoints, nested under their company
//!
//! - `GET    /api/companies/{company_id}/employees?page=&limit=&min_age=&max_age=&search=`
//! - `POST   /api/companies/{company_id}/employees`
//! - `GET    /api/companies/{company_id}/employees/{id}`
//! - `PUT    /api/companies/{company_id}/employees/{id}`
//! - `DELETE /api/companies/{company_id}/employees/{id}`

use super::{created, json_body, ok_with_last_modified, parse_id, query_params};
use crate::core::error::{ApiResult, EntityError, ValidationError};
use crate::core::headers::X_PAGINATION;
use crate::entities::{
    Company, Employee, EmployeeDto, EmployeeForCreation, EmployeeForUpdate, EmployeeQuery, RepositoryManager,
};
use crate::server::state::AppState;
use crate::storage::EntityEntry;
use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use uuid::Uuid;
use validator::Validate;

/// One page of a company's employees; paging metadata goes to `X-Pagination`
pub async fn list_employees(
    State(state): State<AppState>,
    Path(company_id): Path<String>,
    query: Result<Query<EmployeeQuery>, QueryRejection>,
) -> ApiResult<Response> {
    let company_id = parse_id(&company_id)?;
    let query = query_params(query)?;
    query.validate_range()?;

    let repos = state.repositories();
    ensure_company(&repos, company_id).await?;

    let page = repos
        .employee()
        .get_employees(company_id, &query, false)
        .await?
        .map(EntityEntry::into_inner);

    let body: Vec<EmployeeDto> = page.items.iter().map(EmployeeDto::from).collect();
    let mut response = ok_with_last_modified(Json(body), page.items.iter().map(|e| e.updated_at));
    if let Ok(value) = HeaderValue::from_str(&page.meta.header_value()) {
        response.headers_mut().insert(X_PAGINATION, value);
    }
    Ok(response)
}

pub async fn get_employee(
    State(state): State<AppState>,
    Path((company_id, id)): Path<(String, String)>,
) -> ApiResult<Response> {
    let company_id = parse_id(&company_id)?;
    let id = parse_id(&id)?;

    let repos = state.repositories();
    ensure_company(&repos, company_id).await?;
    let employee = repos
        .employee()
        .get_employee(company_id, id, false)
        .await?
        .map(EntityEntry::into_inner)
        .ok_or_else(|| EntityError::not_found::<Employee>(id))?;

    Ok(ok_with_last_modified(Json(EmployeeDto::from(&employee)), [employee.updated_at]))
}

pub async fn create_employee(
    State(state): State<AppState>,
    Path(company_id): Path<String>,
    payload: Result<Json<EmployeeForCreation>, JsonRejection>,
) -> ApiResult<Response> {
    let company_id = parse_id(&company_id)?;
    let payload = json_body(payload)?;
    payload.validate().map_err(ValidationError::from)?;

    let repos = state.repositories();
    ensure_company(&repos, company_id).await?;

    let employee = payload.to_employee(company_id, repos.now());
    repos.employee().create(&employee)?;
    repos.save().await?;

    tracing::info!(%company_id, employee_id = %employee.id, "employee created");
    Ok(created(
        format!("/api/companies/{}/employees/{}", company_id, employee.id),
        Json(EmployeeDto::from(&employee)),
    ))
}

pub async fn update_employee(
    State(state): State<AppState>,
    Path((company_id, id)): Path<(String, String)>,
    payload: Result<Json<EmployeeForUpdate>, JsonRejection>,
) -> ApiResult<Response> {
    let company_id = parse_id(&company_id)?;
    let id = parse_id(&id)?;
    let payload = json_body(payload)?;
    payload.validate().map_err(ValidationError::from)?;

    let repos = state.repositories();
    ensure_company(&repos, company_id).await?;
    let entry = repos
        .employee()
        .get_employee(company_id, id, true)
        .await?
        .ok_or_else(|| EntityError::not_found::<Employee>(id))?;
    entry.modify(|employee| employee.apply(payload));
    repos.save().await?;

    Ok(StatusCode::NO_CONTENT.into_response())
}

pub async fn delete_employee(
    State(state): State<AppState>,
    Path((company_id, id)): Path<(String, String)>,
) -> ApiResult<Response> {
    let company_id = parse_id(&company_id)?;
    let id = parse_id(&id)?;

    let repos = state.repositories();
    ensure_company(&repos, company_id).await?;
    let employee = repos
        .employee()
        .get_employee(company_id, id, false)
        .await?
        .map(EntityEntry::into_inner)
        .ok_or_else(|| EntityError::not_found::<Employee>(id))?;
    repos.employee().delete(&employee);
    repos.save().await?;

    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn ensure_company(repos: &RepositoryManager, company_id: Uuid) -> ApiResult<()> {
    match repos.company().get_company(company_id, false).await? {
        Some(_) => Ok(()),
        None => Err(EntityError::not_found::<Company>(company_id).into()),
    }
}
