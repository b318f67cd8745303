//! Query parameters and pagination utilities

use serde::{Deserialize, Serialize};

/// Query parameters for pagination
///
/// Extracted from URL query strings. All parameters have sensible defaults.
///
/// # Example
/// ```rust,ignore
/// // In handler:
/// pub async fn list_employees(
///     Query(params): Query<EmployeeQuery>,
/// ) -> ApiResult<Response> {
///     // params.paging.page defaults to 1
///     // params.paging.limit defaults to 20
/// }
///
/// // Usage:
/// GET /api/companies/{id}/employees?page=2&limit=10
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueryParams {
    /// Page number (starts at 1)
    #[serde(default = "default_page")]
    pub page: usize,

    /// Number of items per page
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_page() -> usize {
    1
}

fn default_limit() -> usize {
    20
}

impl Default for QueryParams {
    fn default() -> Self {
        Self {
            page: default_page(),
            limit: default_limit(),
        }
    }
}

impl QueryParams {
    pub fn new(page: usize, limit: usize) -> Self {
        Self { page, limit }
    }

    /// Get page number, ensuring minimum of 1
    pub fn page(&self) -> usize {
        self.page.max(1)
    }

    /// Get limit, ensuring it doesn't exceed the maximum
    pub fn limit(&self) -> usize {
        self.limit.clamp(1, 100) // Maximum 100 per page, minimum 1
    }
}

/// One page of an ordered result set plus its metadata
#[derive(Debug)]
pub struct PagedList<T> {
    pub items: Vec<T>,
    pub meta: PaginationMeta,
}

impl<T> PagedList<T> {
    /// Slice an already ordered collection into the requested page
    pub fn paginate(all: Vec<T>, params: &QueryParams) -> Self {
        let page = params.page();
        let limit = params.limit();
        let meta = PaginationMeta::new(page, limit, all.len());

        let items = all
            .into_iter()
            .skip((page - 1).saturating_mul(limit))
            .take(limit)
            .collect();

        Self { items, meta }
    }

    /// Transform the items, keeping the metadata
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> PagedList<U> {
        PagedList {
            items: self.items.into_iter().map(f).collect(),
            meta: self.meta,
        }
    }
}

/// Pagination metadata
///
/// Sent to clients JSON-encoded in the `X-Pagination` header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationMeta {
    /// Current page number (starts at 1)
    pub page: usize,

    /// Number of items per page
    pub limit: usize,

    /// Total number of items (after filters)
    pub total: usize,

    /// Total number of pages
    pub total_pages: usize,

    /// Whether there is a next page
    pub has_next: bool,

    /// Whether there is a previous page
    pub has_prev: bool,
}

impl PaginationMeta {
    /// Create pagination metadata from calculation
    pub fn new(page: usize, limit: usize, total: usize) -> Self {
        // Ensure limit is at least 1 to avoid division by zero
        let limit = limit.max(1);
        let page = page.max(1);
        let total_pages = if total == 0 { 0 } else { total.div_ceil(limit) }; // Ceiling division
        let start = (page - 1).saturating_mul(limit);

        Self {
            page,
            limit,
            total,
            total_pages,
            has_next: start.saturating_add(limit) < total,
            has_prev: page > 1,
        }
    }

    /// Value for the `X-Pagination` header
    pub fn header_value(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_params_defaults() {
        let params: QueryParams = serde_json::from_str("{}").unwrap();
        assert_eq!(params.page(), 1);
        assert_eq!(params.limit(), 20);
    }

    #[test]
    fn test_pagination_meta() {
        let meta = PaginationMeta::new(1, 20, 145);
        assert_eq!(meta.total, 145);
        assert_eq!(meta.total_pages, 8);
        assert!(!meta.has_prev);
        assert!(meta.has_next);
    }

    #[test]
    fn test_paginate_slices_requested_page() {
        let page = PagedList::paginate((1..=7).collect::<Vec<_>>(), &QueryParams::new(2, 3));
        assert_eq!(page.items, vec![4, 5, 6]);
        assert!(page.meta.has_prev);
        assert!(page.meta.has_next);

        let last = PagedList::paginate((1..=7).collect::<Vec<_>>(), &QueryParams::new(3, 3));
        assert_eq!(last.items, vec![7]);
        assert!(!last.meta.has_next);
    }

    #[test]
    fn test_huge_page_is_empty() {
        let page = PagedList::paginate((1..=7).collect::<Vec<_>>(), &QueryParams::new(usize::MAX / 2, 100));
        assert!(page.items.is_empty());
        assert!(!page.meta.has_next);
        assert!(page.meta.has_prev);
        assert_eq!(page.meta.total, 7);
    }

    #[test]
    fn test_header_value_is_json() {
        let meta = PaginationMeta::new(2, 10, 25);
        let parsed: PaginationMeta = serde_json::from_str(&meta.header_value()).unwrap();
        assert_eq!(parsed, meta);
    }
}
