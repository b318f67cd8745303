//! HTTP handlers of the company API
//!
//! Handlers stay thin: they parse the request, call the repositories of a
//! fresh [`RepositoryManager`](crate::entities::RepositoryManager) and map
//! entities to transfer objects. Every write ends with exactly one `save`.

pub mod companies;
pub mod employees;

use crate::core::error::{RequestError, ValidationError};
use crate::governance::LastModified;
use axum::Json;
use axum::extract::Query;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Parse an id path segment
pub(crate) fn parse_id(raw: &str) -> Result<Uuid, RequestError> {
    Uuid::parse_str(raw.trim()).map_err(|_| RequestError::InvalidEntityId { id: raw.to_string() })
}

/// Unwrap a JSON body, reporting malformed payloads as validation errors
pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ValidationError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ValidationError::InvalidJson {
            message: rejection.body_text(),
        })
}

pub(crate) fn query_params<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, RequestError> {
    query
        .map(|Query(params)| params)
        .map_err(|rejection| RequestError::InvalidPath {
            path: "query".to_string(),
            message: rejection.body_text(),
        })
}

/// `200 OK` carrying the newest modification time of the rendered entities
pub(crate) fn ok_with_last_modified(
    body: impl IntoResponse,
    stamps: impl IntoIterator<Item = DateTime<Utc>>,
) -> Response {
    let mut response = body.into_response();
    if let Some(latest) = stamps.into_iter().max() {
        response.extensions_mut().insert(LastModified(latest));
    }
    response
}

/// `201 Created` with a `Location` header
pub(crate) fn created(location: String, body: impl IntoResponse) -> Response {
    let mut response = (StatusCode::CREATED, body).into_response();
    if let Ok(value) = HeaderValue::from_str(&location) {
        response.headers_mut().insert(header::LOCATION, value);
    }
    response
}
