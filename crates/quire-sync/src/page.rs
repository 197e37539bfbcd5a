//! Read options and pagination

use serde::{Deserialize, Serialize};

/// Options for [`SyncLayer::read_all`](crate::SyncLayer::read_all)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadOptions {
    /// Zero-based page index; ignored without `page_size`
    pub page: Option<usize>,
    /// Items per page; `None` returns everything
    pub page_size: Option<usize>,
    /// Skip the cached result (still joins an in-flight read)
    pub force_refresh: bool,
}

impl ReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, page: usize, page_size: usize) -> Self {
        self.page = Some(page);
        self.page_size = Some(page_size);
        self
    }

    pub fn with_force_refresh(mut self, force_refresh: bool) -> Self {
        self.force_refresh = force_refresh;
        self
    }
}

/// One page of a merged read
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Items across all pages
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
    pub has_more: bool,
}

impl<T: Clone> Page<T> {
    /// Cut the requested page out of `all`
    pub fn slice(all: &[T], options: &ReadOptions) -> Self {
        let total = all.len();
        let Some(page_size) = options.page_size.filter(|size| *size > 0) else {
            return Self {
                items: all.to_vec(),
                total,
                page: 0,
                page_size: total,
                has_more: false,
            };
        };

        let page = options.page.unwrap_or(0);
        let start = page.saturating_mul(page_size).min(total);
        let end = start.saturating_add(page_size).min(total);
        Self {
            items: all[start..end].to_vec(),
            total,
            page,
            page_size,
            has_more: end < total,
        }
    }
}
