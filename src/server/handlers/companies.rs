//! Company endpoints
//!
//! Version 1.0:
//! - `GET    /api/companies`
//! - `POST   /api/companies`
//! - `GET    /api/companies/collection/({ids})`
//! - `GET    /api/companies/{company_id}`
//! - `PUT    /api/companies/{company_id}`
//! - `DELETE /api/companies/{company_id}`
//!
//! Version 2.0 only lists companies, names only.

use super::{created, json_body, ok_with_last_modified, parse_id};
use crate::core::error::{ApiResult, EntityError, RequestError, ValidationError};
use crate::entities::{Company, CompanyDto, CompanyForCreation, CompanyForUpdate, CompanyNameDto, Employee};
use crate::server::state::AppState;
use crate::storage::EntityEntry;
use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use uuid::Uuid;
use validator::Validate;

pub async fn list_companies(State(state): State<AppState>) -> ApiResult<Response> {
    let companies = load_all(&state).await?;
    let body: Vec<CompanyDto> = companies.iter().map(CompanyDto::from).collect();
    Ok(ok_with_last_modified(Json(body), companies.iter().map(|c| c.updated_at)))
}

/// Version 2.0 listing
pub async fn list_company_names(State(state): State<AppState>) -> ApiResult<Response> {
    let companies = load_all(&state).await?;
    let body: Vec<CompanyNameDto> = companies.iter().map(CompanyNameDto::from).collect();
    Ok(ok_with_last_modified(Json(body), companies.iter().map(|c| c.updated_at)))
}

pub async fn get_company(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Response> {
    let id = parse_id(&id)?;
    let company = state
        .repositories()
        .company()
        .get_company(id, false)
        .await?
        .map(EntityEntry::into_inner)
        .ok_or_else(|| EntityError::not_found::<Company>(id))?;

    Ok(ok_with_last_modified(Json(CompanyDto::from(&company)), [company.updated_at]))
}

/// `GET /api/companies/collection/(id1,id2,...)`
///
/// Every listed id must exist.
pub async fn get_company_collection(State(state): State<AppState>, Path(ids): Path<String>) -> ApiResult<Response> {
    let ids = parse_id_list(&ids)?;
    let companies: Vec<Company> = state
        .repositories()
        .company()
        .get_by_ids(&ids, false)
        .await?
        .into_iter()
        .map(EntityEntry::into_inner)
        .collect();

    if let Some(missing) = ids.iter().find(|id| !companies.iter().any(|c| c.id == **id)) {
        return Err(EntityError::not_found::<Company>(*missing).into());
    }

    let body: Vec<CompanyDto> = companies.iter().map(CompanyDto::from).collect();
    Ok(ok_with_last_modified(Json(body), companies.iter().map(|c| c.updated_at)))
}

/// Create a company together with its initial employees
pub async fn create_company(
    State(state): State<AppState>,
    payload: Result<Json<CompanyForCreation>, JsonRejection>,
) -> ApiResult<Response> {
    let payload = json_body(payload)?;
    payload.validate().map_err(ValidationError::from)?;

    let repos = state.repositories();
    let now = repos.now();
    let company = payload.to_company(now);
    repos.company().create(&company)?;
    for employee in &payload.employees {
        repos.employee().create(&employee.to_employee(company.id, now))?;
    }
    repos.save().await?;

    tracing::info!(company_id = %company.id, employees = payload.employees.len(), "company created");
    Ok(created(
        format!("/api/companies/{}", company.id),
        Json(CompanyDto::from(&company)),
    ))
}

/// Update through change tracking: the loaded entry is modified in place and
/// the save detects the difference.
pub async fn update_company(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<CompanyForUpdate>, JsonRejection>,
) -> ApiResult<Response> {
    let id = parse_id(&id)?;
    let payload = json_body(payload)?;
    payload.validate().map_err(ValidationError::from)?;

    let repos = state.repositories();
    let entry = repos
        .company()
        .get_company(id, true)
        .await?
        .ok_or_else(|| EntityError::not_found::<Company>(id))?;
    entry.modify(|company| company.apply(payload));
    repos.save().await?;

    Ok(StatusCode::NO_CONTENT.into_response())
}

/// Delete a company and its employees
pub async fn delete_company(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Response> {
    let id = parse_id(&id)?;

    let repos = state.repositories();
    let company = repos
        .company()
        .get_company(id, false)
        .await?
        .map(EntityEntry::into_inner)
        .ok_or_else(|| EntityError::not_found::<Company>(id))?;
    let employees = repos
        .employee()
        .find_by_condition(move |e: &Employee| e.company_id == id, false)
        .await?;

    for employee in &employees {
        repos.employee().delete(&employee.get());
    }
    repos.company().delete(&company);
    repos.save().await?;

    tracing::info!(company_id = %id, employees = employees.len(), "company deleted");
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn load_all(state: &AppState) -> ApiResult<Vec<Company>> {
    Ok(state
        .repositories()
        .company()
        .get_all_companies(false)
        .await?
        .into_iter()
        .map(EntityEntry::into_inner)
        .collect())
}

/// Parse `(id1,id2,...)`; the parentheses are optional
fn parse_id_list(raw: &str) -> Result<Vec<Uuid>, RequestError> {
    let inner = raw.trim();
    let inner = inner
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .unwrap_or(inner);

    let mut ids = Vec::new();
    for part in inner.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let id = parse_id(part)?;
        if !ids.contains(&id) {
            ids.push(id);
        }
    }

    if ids.is_empty() {
        return Err(RequestError::InvalidPath {
            path: raw.to_string(),
            message: "expected a parenthesized, comma-separated list of ids".to_string(),
        });
    }
    Ok(ids)
}
