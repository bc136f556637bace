//! Pagination and result types for managing query results.
//!
//! This module provides pagination support for large result sets,
//! including the [`Page`] struct for result pages and [`PaginationParams`]
//! for specifying pagination parameters, plus the [`QueryStatistics`] a store
//! reports alongside every query answer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single page of paginated results.
///
/// This struct represents a subset of results from a larger dataset,
/// along with metadata for navigating through the pages.
///
/// # Type Parameters
///
/// * `T` - The type of items contained in this page
///
/// # Example
///
/// ```ignore
/// use docsession::page::Page;
///
/// let page: Page<String> = Page::builder(vec!["Characters/1".to_string()])
///     .with_count(100)
///     .with_next_page(Some(2))
///     .build();
///
/// assert_eq!(page.items.len(), 1);
/// assert_eq!(page.count, 100);
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Page<T> {
    /// The items contained in this page.
    pub items: Vec<T>,
    /// Total count of items across all pages.
    pub count: usize,
    /// The next page number (if more pages exist).
    pub next_page: Option<usize>,
    /// The previous page number (if this is not the first page).
    pub previous_page: Option<usize>,
}

impl<T> Page<T> {
    /// Creates a new builder for constructing a page with custom settings.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let page = Page::builder(vec![1, 2, 3])
    ///     .with_count(10)
    ///     .with_next_page(Some(2))
    ///     .build();
    /// ```
    pub fn builder(items: Vec<T>) -> PageBuilder<T> {
        PageBuilder::new(items)
    }
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            count: 0,
            next_page: None,
            previous_page: None,
        }
    }
}

/// Builder for constructing [`Page`] instances with fluent API.
///
/// This builder allows incremental construction of a page with
/// pagination metadata.
pub struct PageBuilder<T> {
    items: Vec<T>,
    count: usize,
    next_page: Option<usize>,
    previous_page: Option<usize>,
}

impl<T> PageBuilder<T> {
    /// Creates a new builder with the given items.
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items,
            count: 0,
            next_page: None,
            previous_page: None,
        }
    }

    /// Sets the total count of items across all pages.
    pub fn with_count(mut self, count: usize) -> Self {
        self.count = count;
        self
    }

    /// Sets the next page number (or `None` if this is the last page).
    pub fn with_next_page(mut self, next_page: Option<usize>) -> Self {
        self.next_page = next_page;
        self
    }

    /// Sets the previous page number (or `None` if this is the first page).
    pub fn with_previous_page(mut self, previous_page: Option<usize>) -> Self {
        self.previous_page = previous_page;
        self
    }

    /// Builds and returns the final [`Page`] instance.
    pub fn build(self) -> Page<T> {
        Page {
            items: self.items,
            count: self.count,
            next_page: self.next_page,
            previous_page: self.previous_page,
        }
    }
}

/// Parameters for paginating through large result sets.
///
/// This struct specifies which page to retrieve and how many items per page.
/// Pages are 1-indexed (page 1 is the first page).
///
/// # Example
///
/// ```ignore
/// use docsession::page::PaginationParams;
///
/// let params = PaginationParams::new(2, 50);
/// // Retrieves page 2 with 50 items per page
/// // Offset is (2-1) * 50 = 50
/// assert_eq!(params.offset(), 50);
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PaginationParams {
    /// The page number (1-indexed).
    pub page: usize,
    /// Number of items per page.
    pub per_page: usize,
}

impl PaginationParams {
    pub fn new(page: usize, per_page: usize) -> Self {
        Self { page, per_page }
    }

    /// Number of results to skip before this page.
    pub fn offset(&self) -> usize {
        self.page.saturating_sub(1) * self.per_page
    }

    /// Builds the page for these parameters from one window of results and the total
    /// number of results across all pages.
    pub fn page_of<T>(&self, items: Vec<T>, total: usize) -> Page<T> {
        let end = self.offset() + items.len();

        Page::builder(items)
            .with_count(total)
            .with_next_page(if end < total { Some(self.page + 1) } else { None })
            .with_previous_page(if self.page > 1 { Some(self.page - 1) } else { None })
            .build()
    }
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self { page: 1, per_page: 10 }
    }
}

/// Metadata a store reports with every query answer.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueryStatistics {
    /// Number of results matching the filter, before skip and take.
    pub total_results: usize,
    /// `true` if the index had not processed every write when the query ran.
    pub is_stale: bool,
    /// The index that answered, including automatic ones.
    pub index_name: String,
    /// When the index last caught up with a write.
    pub index_timestamp: DateTime<Utc>,
}

/// Results of a session query, in store order, with the statistics of the answer.
#[derive(Debug, Clone)]
pub struct QueryResults<T> {
    pub items: Vec<T>,
    pub statistics: QueryStatistics,
}

impl<T> QueryResults<T> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_stale(&self) -> bool {
        self.statistics.is_stale
    }

    pub fn into_items(self) -> Vec<T> {
        self.items
    }
}

impl<T> IntoIterator for QueryResults<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_is_zero_based_on_one_indexed_pages() {
        assert_eq!(PaginationParams::new(1, 20).offset(), 0);
        assert_eq!(PaginationParams::new(3, 20).offset(), 40);
        assert_eq!(PaginationParams::new(0, 20).offset(), 0);
    }

    #[test]
    fn page_of_links_neighbours() {
        let params = PaginationParams::new(2, 10);

        let page = params.page_of((11..=20).collect::<Vec<_>>(), 25);

        assert_eq!(page.count, 25);
        assert_eq!(page.next_page, Some(3));
        assert_eq!(page.previous_page, Some(1));

        let last = PaginationParams::new(3, 10).page_of(vec![21, 22, 23, 24, 25], 25);
        assert_eq!(last.next_page, None);
    }
}
