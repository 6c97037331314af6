//! Result window computation
//!
//! Ranges are half-open index pairs `[start, end)` into an ordered id list.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Pagination {
    /// Number of pages to skip.
    pub skip: usize,
    /// Page size; `0` means unbounded.
    pub limit: usize,
}

impl Pagination {
    pub fn new(skip: usize, limit: usize) -> Self {
        Self { skip, limit }
    }

    pub fn is_unbounded(&self) -> bool {
        self.limit == 0
    }

    pub fn range(&self, total_count: usize) -> PageRange {
        compute_range(total_count, self.skip, self.limit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRange {
    pub start: usize,
    pub end: usize,
}

impl PageRange {
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Computes the page window for `total_count` items.
///
/// A zero `limit` yields the whole range whatever `skip` is. Otherwise the
/// window starts at `skip * limit`; both ends are clamped to `total_count`,
/// and the start is pulled back onto the last index when it runs past it.
pub fn compute_range(total_count: usize, skip: usize, limit: usize) -> PageRange {
    if limit == 0 {
        return PageRange {
            start: 0,
            end: total_count,
        };
    }

    let start = skip.saturating_mul(limit);
    let end = start.saturating_add(limit).min(total_count);
    let start = start.min(total_count).min(total_count.saturating_sub(1));

    PageRange { start, end }
}

/// Returns the part of `list` covered by `range`, never indexing out of bounds.
pub fn slice<T>(list: &[T], range: PageRange) -> &[T] {
    if range.start >= list.len() {
        return &[];
    }
    let end = range.end.min(list.len());
    if end <= range.start {
        return &[];
    }
    &list[range.start..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbounded_limit_covers_everything() {
        assert_eq!(compute_range(10, 0, 0), PageRange { start: 0, end: 10 });
        assert_eq!(compute_range(10, 4, 0), PageRange { start: 0, end: 10 });
    }

    #[test]
    fn skip_counts_pages() {
        assert_eq!(compute_range(10, 2, 3), PageRange { start: 6, end: 9 });
        assert_eq!(compute_range(10, 3, 3), PageRange { start: 9, end: 10 });
    }

    #[test]
    fn start_past_the_end_clamps_to_last_index() {
        let range = compute_range(5, 10, 1);
        assert_eq!(range.start, 4);
        assert_eq!(range.end, 5);
    }

    #[test]
    fn empty_total_does_not_underflow() {
        assert_eq!(compute_range(0, 3, 5), PageRange { start: 0, end: 0 });
        assert!(compute_range(0, 0, 5).is_empty());
    }

    #[test]
    fn slice_beyond_list_is_empty() {
        let list = ["a", "b", "c", "d", "e"];
        assert!(slice(&list, PageRange { start: 6, end: 9 }).is_empty());
        assert!(slice(&list, PageRange { start: usize::MAX, end: usize::MAX }).is_empty());
    }

    #[test]
    fn slice_clamps_to_list_length() {
        let list = ["a", "b", "c", "d", "e"];
        assert_eq!(slice(&list, PageRange { start: 3, end: 9 }), &["d", "e"]);
        assert_eq!(slice(&list, compute_range(5, 1, 2)), &["c", "d"]);
    }

    #[test]
    fn pagination_deserializes_with_defaults() {
        let p: Pagination = serde_json::from_str(r#"{"limit": 10}"#).unwrap();
        assert_eq!(p, Pagination::new(0, 10));
    }
}
