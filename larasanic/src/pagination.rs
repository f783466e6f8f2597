//! Page-based pagination for list endpoints.
//!
//! [`Pagination`] is the query-string side (`?page=2&per_page=50`), [`PaginatedResult`]
//! wraps one page of items together with the metadata clients need to render pagers.

use serde::{Deserialize, Serialize, Serializer, ser::SerializeStruct};

/// Default number of items to return per page.
pub const DEFAULT_PER_PAGE: u64 = 20;

/// Maximum number of items that can be requested per page.
pub const MAX_PER_PAGE: u64 = 100;

/// Standard pagination query parameters.
///
/// - `page`: 1-based page number (default: 1)
/// - `per_page`: items per page (default: 20, max: 100)
#[derive(Debug, Default, Clone, Deserialize)]
pub struct Pagination {
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

impl Pagination {
    /// Get the page, never below 1.
    #[inline]
    pub fn page(&self) -> u64 {
        self.page.unwrap_or(1).max(1)
    }

    /// Get the page size, clamped between 1 and MAX_PER_PAGE.
    #[inline]
    pub fn per_page(&self) -> u64 {
        self.per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE)
    }

    /// Number of items to skip for the current page.
    #[inline]
    pub fn offset(&self) -> u64 {
        (self.page() - 1) * self.per_page()
    }

    /// Slice an in-memory collection into the requested page.
    pub fn paginate<T: Clone>(&self, items: &[T]) -> PaginatedResult<T> {
        let start = (self.offset() as usize).min(items.len());
        let end = (start + self.per_page() as usize).min(items.len());
        PaginatedResult::new(items[start..end].to_vec(), items.len() as u64, self.page(), self.per_page())
    }
}

/// One page of items with its pagination metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct PaginatedResult<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

impl<T> PaginatedResult<T> {
    pub fn new(items: Vec<T>, total: u64, page: u64, per_page: u64) -> Self {
        Self {
            items,
            total,
            page: page.max(1),
            per_page: per_page.max(1),
        }
    }

    pub fn total_pages(&self) -> u64 {
        self.total.div_ceil(self.per_page)
    }

    pub fn has_next(&self) -> bool {
        self.page < self.total_pages()
    }

    pub fn has_prev(&self) -> bool {
        self.page > 1
    }

    pub fn next_page(&self) -> Option<u64> {
        self.has_next().then(|| self.page + 1)
    }

    pub fn prev_page(&self) -> Option<u64> {
        self.has_prev().then(|| self.page - 1)
    }

    /// 1-based index of the first item on this page, 0 when there are no items
    pub fn start_index(&self) -> u64 {
        if self.total == 0 {
            0
        } else {
            (self.page - 1) * self.per_page + 1
        }
    }

    pub fn end_index(&self) -> u64 {
        (self.page * self.per_page).min(self.total)
    }

    /// Convert every item, keeping the metadata.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> PaginatedResult<U> {
        PaginatedResult {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            per_page: self.per_page,
        }
    }

    pub fn meta(&self) -> PaginationMeta {
        PaginationMeta {
            total_items: self.total,
            total_pages: self.total_pages(),
            current_page: self.page,
            per_page: self.per_page,
            has_next: self.has_next(),
            has_prev: self.has_prev(),
            next_page: self.next_page(),
            prev_page: self.prev_page(),
            start_index: self.start_index(),
            end_index: self.end_index(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaginationMeta {
    pub total_items: u64,
    pub total_pages: u64,
    pub current_page: u64,
    pub per_page: u64,
    pub has_next: bool,
    pub has_prev: bool,
    pub next_page: Option<u64>,
    pub prev_page: Option<u64>,
    pub start_index: u64,
    pub end_index: u64,
}

impl<T: Serialize> Serialize for PaginatedResult<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("PaginatedResult", 2)?;
        state.serialize_field("items", &self.items)?;
        state.serialize_field("pagination", &self.meta())?;
        state.end()
    }
}
