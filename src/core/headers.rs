//! Header names written or read by the governance layer

/// Pagination metadata of list responses (JSON-encoded `PaginationMeta`)
pub const X_PAGINATION: &str = "x-pagination";

/// Request limit of the rule that governed the request
pub const X_RATE_LIMIT_LIMIT: &str = "x-rate-limit-limit";

/// Requests left in the current window
pub const X_RATE_LIMIT_REMAINING: &str = "x-rate-limit-remaining";

/// RFC 3339 instant at which the current window ends
pub const X_RATE_LIMIT_RESET: &str = "x-rate-limit-reset";

/// Versions the API can serve, reported on every governed response
pub const API_SUPPORTED_VERSIONS: &str = "api-supported-versions";

/// Default request header carrying the requested API version
pub const DEFAULT_VERSION_HEADER: &str = "api-version";

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_REAL_IP: &str = "x-real-ip";
