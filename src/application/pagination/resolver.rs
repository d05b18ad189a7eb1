//! Picks offset or keyset mode for a page request and runs it.
//!
//! - `after` present: forward keyset page (wins over `before`).
//! - `before` present: backward keyset page.
//! - Otherwise, or when the cursor is invalid or belongs to another
//!   listing: offset page (`page`, default 1), with an exact total.
//!
//! Keyset pages fetch one row more than requested to learn whether another
//! page exists in the direction of travel, then drop it.

use std::sync::Arc;
use std::time::Instant;

use metrics::histogram;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::application::repos::{ArticleStore, RangeWindow, StoreError};
use crate::cache::CacheStatus;
use crate::domain::articles::{Article, ArticleFilter, SortSpec};

use super::cursor::{Cursor, CursorError, filter_fingerprint};

const METRIC_PAGINATE_MS: &str = "newsdeck_paginate_ms";
const DEFAULT_LIMIT: u32 = 20;
const MAX_LIMIT: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaginationMode {
    Offset,
    Cursor,
}

impl PaginationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            PaginationMode::Offset => "offset",
            PaginationMode::Cursor => "cursor",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub limit: Option<u32>,
    pub page: Option<u32>,
    pub after: Option<String>,
    pub before: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLimits {
    pub default_limit: u32,
    pub max_limit: u32,
}

impl Default for PageLimits {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_LIMIT,
            max_limit: MAX_LIMIT,
        }
    }
}

impl PageLimits {
    /// Missing or zero falls back to the default; the result never exceeds
    /// the maximum.
    pub fn clamp(&self, requested: Option<u32>) -> u32 {
        let max = self.max_limit.max(1);
        match requested {
            Some(0) | None => self.default_limit.clamp(1, max),
            Some(limit) => limit.min(max),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    pub has_next_page: bool,
    pub has_previous_page: bool,
    pub start_cursor: Option<String>,
    pub end_cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMeta {
    pub mode: PaginationMode,
    pub limit: u32,
    /// Set for offset pages.
    pub page: Option<u32>,
    pub cache: CacheStatus,
    /// A cursor was supplied but could not be used.
    #[serde(default)]
    pub cursor_rejected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageResponse<T> {
    pub items: Vec<T>,
    pub page_info: PageInfo,
    /// Exact count of matching items; offset mode only.
    pub total: Option<u64>,
    pub meta: PageMeta,
}

enum PagePlan {
    Offset { page: u32, cursor_rejected: bool },
    Forward(Cursor),
    Backward(Cursor),
}

pub struct PaginationResolver {
    store: Arc<dyn ArticleStore>,
    limits: PageLimits,
}

impl PaginationResolver {
    pub fn new(store: Arc<dyn ArticleStore>, limits: PageLimits) -> Self {
        Self { store, limits }
    }

    pub fn limits(&self) -> PageLimits {
        self.limits
    }

    /// Canonical form of a request: the limit clamped, blank cursors
    /// dropped, `before` dropped when `after` is present, and `page` kept
    /// only in offset mode.
    pub fn normalize(&self, request: PageRequest) -> PageRequest {
        let after = request.after.filter(|c| !c.trim().is_empty());
        let before = match after {
            Some(_) => None,
            None => request.before.filter(|c| !c.trim().is_empty()),
        };
        let page = match (&after, &before) {
            (None, None) => Some(request.page.unwrap_or(1).max(1)),
            _ => None,
        };
        PageRequest {
            limit: Some(self.limits.clamp(request.limit)),
            page,
            after,
            before,
        }
    }

    pub async fn paginate(
        &self,
        filter: &ArticleFilter,
        sort: SortSpec,
        request: &PageRequest,
    ) -> Result<PageResponse<Article>, StoreError> {
        let started = Instant::now();
        let limit = self.limits.clamp(request.limit);
        let fingerprint = filter_fingerprint(filter, sort);

        let response = match self.plan(request, &fingerprint, sort) {
            PagePlan::Offset {
                page,
                cursor_rejected,
            } => {
                self.offset_page(filter, sort, &fingerprint, page, limit, cursor_rejected)
                    .await?
            }
            PagePlan::Forward(cursor) => {
                self.keyset_page(filter, sort, &fingerprint, &cursor, limit, false)
                    .await?
            }
            PagePlan::Backward(cursor) => {
                self.keyset_page(filter, sort, &fingerprint, &cursor, limit, true)
                    .await?
            }
        };

        histogram!(METRIC_PAGINATE_MS, "mode" => response.meta.mode.as_str())
            .record(started.elapsed().as_secs_f64() * 1000.0);
        debug!(
            mode = response.meta.mode.as_str(),
            items = response.items.len(),
            has_next = response.page_info.has_next_page,
            has_previous = response.page_info.has_previous_page,
            "Resolved article page"
        );
        Ok(response)
    }

    fn plan(&self, request: &PageRequest, fingerprint: &str, sort: SortSpec) -> PagePlan {
        let (token, backward) = match (&request.after, &request.before) {
            (Some(after), _) if !after.trim().is_empty() => (after, false),
            (_, Some(before)) if !before.trim().is_empty() => (before, true),
            _ => {
                return PagePlan::Offset {
                    page: request.page.unwrap_or(1).max(1),
                    cursor_rejected: false,
                };
            }
        };

        let decoded = Cursor::decode(token)
            .and_then(|cursor| cursor.ensure_matches(fingerprint, sort).map(|()| cursor));
        match decoded {
            Ok(cursor) if backward => PagePlan::Backward(cursor),
            Ok(cursor) => PagePlan::Forward(cursor),
            Err(err) => {
                log_rejected(&err);
                PagePlan::Offset {
                    page: 1,
                    cursor_rejected: true,
                }
            }
        }
    }

    async fn offset_page(
        &self,
        filter: &ArticleFilter,
        sort: SortSpec,
        fingerprint: &str,
        page: u32,
        limit: u32,
        cursor_rejected: bool,
    ) -> Result<PageResponse<Article>, StoreError> {
        let skip = u64::from(page - 1) * u64::from(limit);
        let window = RangeWindow::Offset(skip);
        let (total, items) = tokio::try_join!(
            self.store.count(filter),
            self.store.find_range(filter, sort, &window, limit),
        )?;

        let page_info = PageInfo {
            has_next_page: skip + u64::from(limit) < total,
            has_previous_page: page > 1,
            start_cursor: items.first().map(|a| mint(a, sort, fingerprint)),
            end_cursor: items.last().map(|a| mint(a, sort, fingerprint)),
        };
        Ok(PageResponse {
            items,
            page_info,
            total: Some(total),
            meta: PageMeta {
                mode: PaginationMode::Offset,
                limit,
                page: Some(page),
                cache: CacheStatus::Bypass,
                cursor_rejected,
            },
        })
    }

    async fn keyset_page(
        &self,
        filter: &ArticleFilter,
        sort: SortSpec,
        fingerprint: &str,
        cursor: &Cursor,
        limit: u32,
        backward: bool,
    ) -> Result<PageResponse<Article>, StoreError> {
        // Walking backward reads the reversed order from the cursor, then
        // flips the rows back into the requested order.
        let seek = if backward { sort.reversed() } else { sort };
        let window = RangeWindow::After(cursor.position().clone());
        let mut items = self
            .store
            .find_range(filter, seek, &window, limit.saturating_add(1))
            .await?;

        let has_more = items.len() > limit as usize;
        items.truncate(limit as usize);
        if backward {
            items.reverse();
        }

        let page_info = PageInfo {
            has_next_page: if backward { true } else { has_more },
            has_previous_page: if backward { has_more } else { true },
            start_cursor: items.first().map(|a| mint(a, sort, fingerprint)),
            end_cursor: items.last().map(|a| mint(a, sort, fingerprint)),
        };
        Ok(PageResponse {
            items,
            page_info,
            total: None,
            meta: PageMeta {
                mode: PaginationMode::Cursor,
                limit,
                page: None,
                cache: CacheStatus::Bypass,
                cursor_rejected: false,
            },
        })
    }
}

fn mint(article: &Article, sort: SortSpec, fingerprint: &str) -> String {
    Cursor::for_article(article, sort, fingerprint).encode()
}

fn log_rejected(err: &CursorError) {
    match err {
        CursorError::Mismatch => {
            debug!(error = %err, "Cursor belongs to another listing; restarting at page 1")
        }
        _ => warn!(error = %err, "Rejected pagination cursor; restarting at page 1"),
    }
}
