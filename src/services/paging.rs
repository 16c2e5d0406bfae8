//! Offset paging over ordered id lists

use serde::{Deserialize, Serialize};

use super::queries::QueryError;

fn default_limit() -> u32 {
    100
}

/// Page request. `page` starts at 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paging {
    #[serde(default)]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

impl Default for Paging {
    fn default() -> Self {
        Self {
            page: 0,
            limit: default_limit(),
        }
    }
}

impl Paging {
    pub fn new(page: u32, limit: u32) -> Self {
        Self { page, limit }
    }

    pub fn validate(&self, max_limit: u32) -> Result<(), QueryError> {
        if self.limit == 0 || self.limit > max_limit {
            return Err(QueryError::InvalidLimit {
                limit: self.limit,
                max: max_limit,
            });
        }
        Ok(())
    }

    /// The `[page * limit, page * limit + limit)` slice of `items`, clamped.
    pub fn get_page<'a, T>(&self, items: &'a [T]) -> &'a [T] {
        let start = (self.page as usize).saturating_mul(self.limit as usize).min(items.len());
        let end = start.saturating_add(self.limit as usize).min(items.len());
        &items[start..end]
    }
}

/// One page of results plus totals
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PagedResponse<T> {
    pub items: Vec<T>,
    /// Items on this page
    pub count: usize,
    /// Items across all pages
    pub total: usize,
    pub page: u32,
    pub total_pages: usize,
}

impl<T> PagedResponse<T> {
    pub fn new(items: Vec<T>, total: usize, paging: &Paging) -> Self {
        let limit = paging.limit.max(1) as usize;
        Self {
            count: items.len(),
            items,
            total,
            page: paging.page,
            total_pages: total.div_ceil(limit),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_pages_partition_items() {
        let items: Vec<u32> = (0..25).collect();
        let mut seen = Vec::new();
        for page in 0..4 {
            seen.extend_from_slice(Paging::new(page, 10).get_page(&items));
        }
        assert_eq!(seen, items);
        assert!(Paging::new(3, 10).get_page(&items).is_empty());
        assert!(Paging::new(u32::MAX, u32::MAX).get_page(&items).is_empty());
    }

    #[test]
    fn test_limit_bounds() {
        assert!(Paging::default().validate(100).is_ok());
        assert_matches!(Paging::new(0, 0).validate(100), Err(QueryError::InvalidLimit { limit: 0, .. }));
        assert_matches!(Paging::new(0, 101).validate(100), Err(QueryError::InvalidLimit { max: 100, .. }));
    }

    #[test]
    fn test_paged_response_totals() {
        let paging = Paging::new(2, 10);
        let response = PagedResponse::new(vec!["a", "b"], 22, &paging);
        assert_eq!(response.count, 2);
        assert_eq!(response.total_pages, 3);
        assert_eq!(response.page, 2);

        let empty = PagedResponse::<u8>::new(Vec::new(), 0, &paging);
        assert_eq!(empty.total_pages, 0);
    }
}
