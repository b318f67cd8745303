//! The governance chain in front of the controllers
//!
//! ```text
//! request ─► version_stage ─► rate_limit_stage ─► cache_stage ─► dispatch ─► v1 / v2 router
//!                 │ 400              │ 429               │ 304 / 412
//!                 ▼                  ▼                   ▼
//!              response           response            response
//! ```
//!
//! Each stage is an axum middleware that may answer early. `dispatch` hands
//! the request to the router bound to the resolved version.

use super::cache::{CacheDecision, CacheValidationToken, CacheValidator, Conditions, LastModified, write_scope};
use super::rate_limit::{ClientKeyResolver, RateLimitDecision, RateLimitProcessor};
use super::version::{ResolvedVersion, VersionRouter};
use crate::core::error::{ApiError, RequestError};
use crate::core::headers::{
    API_SUPPORTED_VERSIONS, DEFAULT_VERSION_HEADER, X_RATE_LIMIT_LIMIT,
    X_RATE_LIMIT_REMAINING, X_RATE_LIMIT_RESET,
};
use axum::Router;
use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderName, HeaderValue, Method, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceExt;

/// Largest response body the cache stage buffers to compute an entity tag
const MAX_CACHED_BODY: usize = 8 * 1024 * 1024;

/// Shared state of the pipeline stages
#[derive(Clone)]
pub struct GovernanceState {
    versions: Arc<VersionRouter<Router>>,
    version_header: HeaderName,
    supported_versions: HeaderValue,
    rate_limiter: Option<Arc<RateLimitProcessor>>,
    client_keys: ClientKeyResolver,
    cache: Option<Arc<CacheValidator>>,
    vary: HeaderValue,
}

/// Builder of the governed router
pub struct GovernancePipeline {
    state: GovernanceState,
}

impl GovernancePipeline {
    /// Pipeline over `versions`, with rate limiting and caching off
    pub fn new(versions: VersionRouter<Router>) -> Self {
        let supported_versions =
            HeaderValue::from_str(&versions.supported().join(", ")).unwrap_or(HeaderValue::from_static(""));
        let version_header = HeaderName::from_static(DEFAULT_VERSION_HEADER);
        Self {
            state: GovernanceState {
                versions: Arc::new(versions),
                vary: vary_value(&version_header),
                version_header,
                supported_versions,
                rate_limiter: None,
                client_keys: ClientKeyResolver::new(),
                cache: None,
            },
        }
    }

    /// Read the requested version from `name` instead of `api-version`
    pub fn with_version_header(mut self, name: HeaderName) -> Self {
        self.state.vary = vary_value(&name);
        self.state.version_header = name;
        self
    }

    pub fn with_rate_limiter(mut self, processor: Arc<RateLimitProcessor>, client_keys: ClientKeyResolver) -> Self {
        self.state.rate_limiter = Some(processor);
        self.state.client_keys = client_keys;
        self
    }

    pub fn with_cache(mut self, validator: Arc<CacheValidator>) -> Self {
        self.state.cache = Some(validator);
        self
    }

    /// Assemble the stages; the last layer added runs first
    pub fn into_router(self) -> Router {
        let state = self.state;
        Router::new()
            .fallback(dispatch)
            .layer(middleware::from_fn_with_state(state.clone(), cache_stage))
            .layer(middleware::from_fn_with_state(state.clone(), rate_limit_stage))
            .layer(middleware::from_fn_with_state(state.clone(), version_stage))
            .with_state(state)
    }
}

fn vary_value(version_header: &HeaderName) -> HeaderValue {
    HeaderValue::from_str(&format!("Accept, {}", version_header.as_str()))
        .unwrap_or(HeaderValue::from_static("Accept"))
}

/// Resolve the API version and report the supported ones
pub async fn version_stage(State(state): State<GovernanceState>, mut request: Request, next: Next) -> Response {
    let requested = match request.headers().get(&state.version_header) {
        Some(value) => match value.to_str() {
            Ok(text) => Some(text.to_string()),
            Err(_) => Some(String::from_utf8_lossy(value.as_bytes()).into_owned()),
        },
        None => None,
    };

    let mut response = match state.versions.resolve(requested.as_deref()) {
        Ok((version, _)) => {
            tracing::trace!(%version, "api version resolved");
            request.extensions_mut().insert(ResolvedVersion(version));
            next.run(request).await
        }
        Err(err) => {
            tracing::info!(requested = %err.requested, "unsupported api version requested");
            ApiError::from(err).into_response()
        }
    };

    response
        .headers_mut()
        .insert(API_SUPPORTED_VERSIONS, state.supported_versions.clone());
    response
}

/// Count the request against its client's quota
pub async fn rate_limit_stage(State(state): State<GovernanceState>, request: Request, next: Next) -> Response {
    let Some(processor) = state.rate_limiter.as_ref() else {
        return next.run(request).await;
    };

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client_key = state.client_keys.resolve(request.headers(), peer);

    let decision = processor.check(&client_key, request.method().as_str(), request.uri().path());
    match decision {
        RateLimitDecision::Denied(error) => ApiError::from(error).into_response(),
        RateLimitDecision::Allowed(status) => {
            let mut response = next.run(request).await;
            if let Some(status) = status {
                let headers = response.headers_mut();
                headers.insert(X_RATE_LIMIT_LIMIT, HeaderValue::from(status.limit));
                headers.insert(X_RATE_LIMIT_REMAINING, HeaderValue::from(status.remaining));
                if let Ok(reset) = HeaderValue::from_str(&status.reset.to_rfc3339()) {
                    headers.insert(X_RATE_LIMIT_RESET, reset);
                }
            }
            response
        }
    }
}

/// Answer conditional requests and attach validators
pub async fn cache_stage(State(state): State<GovernanceState>, request: Request, next: Next) -> Response {
    let Some(cache) = state.cache.clone() else {
        return next.run(request).await;
    };

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let key = resource_key(&request);
    let conditions = Conditions::from_headers(request.headers());

    match method {
        Method::GET => {
            if conditions.is_conditional_read() {
                if let CacheDecision::NotModified(token) = cache.evaluate(&key, &conditions) {
                    return not_modified(token, &state.vary);
                }
            }

            let response = next.run(request).await;
            if response.status() != StatusCode::OK {
                return response;
            }

            let (mut parts, body) = response.into_parts();
            let bytes = match axum::body::to_bytes(body, MAX_CACHED_BODY).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    return ApiError::Internal(format!("failed to buffer response body: {}", e)).into_response();
                }
            };

            let last_modified = parts.extensions.get::<LastModified>().map(|lm| lm.0);
            let token = cache.issue(&key, &path, &bytes, last_modified);
            if let CacheDecision::NotModified(token) = CacheValidator::evaluate_token(token.clone(), &conditions) {
                return not_modified(token, &state.vary);
            }

            token.apply_headers(&mut parts.headers, &state.vary);
            Response::from_parts(parts, Body::from(bytes))
        }
        Method::HEAD => {
            let stored = cache.lookup(&key);
            if let Some(token) = stored.clone() {
                if let CacheDecision::NotModified(token) = CacheValidator::evaluate_token(token, &conditions) {
                    return not_modified(token, &state.vary);
                }
            }
            let mut response = next.run(request).await;
            if let (Some(token), StatusCode::OK) = (stored, response.status()) {
                token.apply_headers(response.headers_mut(), &state.vary);
            }
            response
        }
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE => {
            if conditions.has_write_preconditions() {
                let current = match cache.lookup(&key) {
                    Some(token) => Some(token),
                    None => match read_back(&state, &request) {
                        Some((router, read_back)) => current_representation(router, read_back, &cache, &key, &path).await,
                        None => None,
                    },
                };
                if CacheValidator::evaluate_write(current.as_ref(), &conditions) == CacheDecision::PreconditionFailed {
                    tracing::info!(path = %path, method = %method, "write precondition failed");
                    return ApiError::from(RequestError::PreconditionFailed { resource: path }).into_response();
                }
            }

            let response = next.run(request).await;
            if response.status().is_success() {
                cache.invalidate(write_scope(&path));
            }
            response
        }
        _ => next.run(request).await,
    }
}

/// Route the request into the router of its version
pub async fn dispatch(State(state): State<GovernanceState>, request: Request) -> Response {
    let Some(ResolvedVersion(version)) = request.extensions().get::<ResolvedVersion>().copied() else {
        return ApiError::Internal("request reached dispatch without a resolved version".to_string())
            .into_response();
    };

    match state.versions.handler(version) {
        Some(router) => match router.clone().oneshot(request).await {
            Ok(response) => response,
            Err(never) => match never {},
        },
        None => ApiError::Internal(format!("no router bound to api version {}", version)).into_response(),
    }
}

fn resource_key(request: &Request) -> String {
    let version = request
        .extensions()
        .get::<ResolvedVersion>()
        .map(|ResolvedVersion(v)| v.to_string())
        .unwrap_or_default();
    let target = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| request.uri().path());
    format!("{}|{}", version, target)
}

fn not_modified(token: CacheValidationToken, vary: &HeaderValue) -> Response {
    tracing::debug!(resource = %token.resource_key, etag = %token.etag, "not modified");
    let mut response = StatusCode::NOT_MODIFIED.into_response();
    token.apply_headers(response.headers_mut(), vary);
    response
}

/// GET request rendering the current representation of a write target,
/// with the router serving it
fn read_back(state: &GovernanceState, request: &Request) -> Option<(Router, Request)> {
    let ResolvedVersion(version) = request.extensions().get::<ResolvedVersion>().copied()?;
    let router = state.versions.handler(version)?.clone();

    let mut read_back = Request::builder().method(Method::GET).uri(request.uri().clone());
    for (name, value) in request.headers() {
        if !is_conditional_header(name) && name != header::CONTENT_TYPE && name != header::CONTENT_LENGTH {
            read_back = read_back.header(name, value);
        }
    }
    let mut read_back = read_back.body(Body::empty()).ok()?;
    read_back.extensions_mut().insert(ResolvedVersion(version));
    Some((router, read_back))
}

/// Learn the validator of a write target when none is stored yet
async fn current_representation(
    router: Router,
    read_back: Request,
    cache: &CacheValidator,
    key: &str,
    path: &str,
) -> Option<CacheValidationToken> {
    let response = match router.oneshot(read_back).await {
        Ok(response) => response,
        Err(never) => match never {},
    };
    if response.status() != StatusCode::OK {
        return None;
    }

    let (parts, body) = response.into_parts();
    let bytes = axum::body::to_bytes(body, MAX_CACHED_BODY).await.ok()?;
    let last_modified = parts.extensions.get::<LastModified>().map(|lm| lm.0);
    Some(cache.issue(key, path, &bytes, last_modified))
}

fn is_conditional_header(name: &HeaderName) -> bool {
    [
        header::IF_MATCH,
        header::IF_NONE_MATCH,
        header::IF_MODIFIED_SINCE,
        header::IF_UNMODIFIED_SINCE,
    ]
    .contains(name)
}
