//! Pagination for defect record listings (100 records per page)

/// Records per page
pub const PAGE_SIZE: i64 = 100;

/// Page window derived from a result count and a requested page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    /// Current page number (1-indexed), clamped to `[1, total_pages]`
    pub page: i64,
    pub total_pages: i64,
    /// Offset for SQL `LIMIT/OFFSET`
    pub offset: i64,
}

impl Pagination {
    /// Clamp `requested_page` into range for `total_results`
    ///
    /// ```
    /// use aoi_review::pagination::Pagination;
    ///
    /// let p = Pagination::new(250, 99);
    /// assert_eq!(p.page, 3);
    /// assert_eq!(p.offset, 200);
    /// ```
    pub fn new(total_results: i64, requested_page: i64) -> Self {
        let total_pages = (total_results.max(0) + PAGE_SIZE - 1) / PAGE_SIZE;
        let page = requested_page.clamp(1, total_pages.max(1));
        Self {
            page,
            total_pages,
            offset: (page - 1) * PAGE_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_middle_page() {
        let p = Pagination::new(250, 2);
        assert_eq!((p.page, p.total_pages, p.offset), (2, 3, 100));
    }

    #[test]
    fn test_out_of_bounds_clamped() {
        assert_eq!(Pagination::new(150, 99).page, 2);
        assert_eq!(Pagination::new(150, 0).page, 1);
        assert_eq!(Pagination::new(150, -4).offset, 0);
    }

    #[test]
    fn test_empty_result() {
        let p = Pagination::new(0, 1);
        assert_eq!((p.page, p.total_pages, p.offset), (1, 0, 0));
    }

    #[test]
    fn test_exact_boundary() {
        let p = Pagination::new(200, 2);
        assert_eq!((p.page, p.total_pages, p.offset), (2, 2, 100));
    }
}
