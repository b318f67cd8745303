//! Routes of each API version

use super::handlers::{companies, employees};
use super::state::AppState;
use crate::governance::{ApiVersion, VersionRouter};
use axum::Router;
use axum::routing::get;

pub const V1: ApiVersion = ApiVersion::new(1, 0);
pub const V2: ApiVersion = ApiVersion::new(2, 0);

/// Full company and employee API
pub fn build_v1_routes(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/companies",
            get(companies::list_companies).post(companies::create_company),
        )
        .route(
            "/api/companies/collection/{ids}",
            get(companies::get_company_collection),
        )
        .route(
            "/api/companies/{company_id}",
            get(companies::get_company)
                .put(companies::update_company)
                .delete(companies::delete_company),
        )
        .route(
            "/api/companies/{company_id}/employees",
            get(employees::list_employees).post(employees::create_employee),
        )
        .route(
            "/api/companies/{company_id}/employees/{id}",
            get(employees::get_employee)
                .put(employees::update_employee)
                .delete(employees::delete_employee),
        )
        .with_state(state)
}

/// Reduced company listing
pub fn build_v2_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/companies", get(companies::list_company_names))
        .with_state(state)
}

/// Bind every served version to its routes
pub fn build_version_router(state: AppState) -> VersionRouter<Router> {
    VersionRouter::new()
        .register(V1, build_v1_routes(state.clone()))
        .register(V2, build_v2_routes(state))
}
