//! Shared Data Transfer Objects (DTOs) for API handlers.
//!
//! List endpoints return `{ "items": [...], "pagination": {...} }` with the
//! pagination built from a [`PaginationQuery`] whose `per_page` is capped by
//! configuration.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Pagination metadata for list responses.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Pagination {
    /// Current page number (1-indexed)
    pub page: u32,
    /// Number of items per page
    pub per_page: u32,
    /// Total number of items across all pages
    pub total: i64,
    /// Total number of pages
    pub total_pages: u32,
}

impl Pagination {
    /// Create pagination from query parameters and total count.
    pub fn from_query_and_total(query: &PaginationQuery, max_per_page: u32, total: i64) -> Self {
        let page = query.page();
        let per_page = query.per_page(max_per_page);
        let total_pages = if total <= 0 {
            0
        } else {
            ((total as f64) / (per_page as f64)).ceil() as u32
        };

        Self {
            page,
            per_page,
            total,
            total_pages,
        }
    }
}

/// Query parameters for paginated list requests.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct PaginationQuery {
    /// Requested page number (default: 1)
    pub page: Option<u32>,
    /// Requested items per page (default: 20)
    pub per_page: Option<u32>,
}

impl PaginationQuery {
    /// Get the page number, defaulting to 1 if not specified.
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    /// Get the per_page value, defaulting to 20 and capped at `max`.
    pub fn per_page(&self, max: u32) -> u32 {
        self.per_page.unwrap_or(20).clamp(1, max.max(1))
    }

    /// SQL `(LIMIT, OFFSET)` for this page.
    pub fn limit_offset(&self, max: u32) -> (i64, i64) {
        let per_page = i64::from(self.per_page(max));
        (per_page, i64::from(self.page() - 1) * per_page)
    }
}
