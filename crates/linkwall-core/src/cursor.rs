//! Pagination state and the primary → fallback source policy.
//!
//! One [`CursorManager`] exists per active filter term set. Changing the term
//! set (or refreshing) resets the cursor and bumps the generation so results
//! of fetches started under the old generation can be recognized and dropped.

use crate::mention::normalize_terms;
use serde::Serialize;

/// Paging position for one filter term set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationCursor {
    /// Primary-source offset.
    pub offset: usize,
    /// Opaque "search-after" token from the fallback source.
    pub fallback_cursor: Option<String>,
    /// A fallback page has been received for this term set.
    pub fallback_started: bool,
    pub using_fallback: bool,
    pub has_more: bool,
    /// Epoch millis before which the fallback source must not be called.
    pub rate_limited_until: Option<i64>,
}

impl Default for PaginationCursor {
    fn default() -> Self {
        Self {
            offset: 0,
            fallback_cursor: None,
            fallback_started: false,
            using_fallback: false,
            has_more: true,
            rate_limited_until: None,
        }
    }
}

/// What the next fetch should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchPlan {
    /// Query the mentions source once per term, in parallel.
    Primary {
        terms: Vec<String>,
        offset: usize,
        size: usize,
    },
    /// Query the full-text source for all terms at once.
    Fallback {
        terms: Vec<String>,
        cursor: Option<String>,
        size: usize,
    },
    /// No further pages until a full refresh.
    Exhausted,
    /// The fallback source asked us to back off.
    RateLimited { retry_at: i64 },
}

/// Result of recording a primary fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimaryOutcome {
    Continue,
    /// The initial primary fetch found nothing; the fallback source takes
    /// over for the rest of this term set.
    EngageFallback,
}

#[derive(Debug, Clone)]
pub struct CursorManager {
    terms: Vec<String>,
    page_size: usize,
    cursor: PaginationCursor,
    generation: u64,
}

impl CursorManager {
    pub fn new(terms: &[String], page_size: usize) -> Self {
        Self {
            terms: normalize_terms(terms),
            page_size: page_size.max(1),
            cursor: PaginationCursor::default(),
            generation: 0,
        }
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn cursor(&self) -> &PaginationCursor {
        &self.cursor
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn has_more(&self) -> bool {
        self.cursor.has_more
    }

    /// Switch to a new term set. Returns the new generation.
    pub fn reset(&mut self, terms: &[String]) -> u64 {
        self.terms = normalize_terms(terms);
        self.restart()
    }

    /// Forget all paging state for the current term set (full refresh).
    pub fn restart(&mut self) -> u64 {
        self.cursor = PaginationCursor::default();
        self.generation += 1;
        self.generation
    }

    /// Decide the next fetch. `append` is true for "load more".
    pub fn plan(&self, append: bool, now_ms: i64) -> FetchPlan {
        if append && !self.cursor.has_more {
            return FetchPlan::Exhausted;
        }
        if self.terms.is_empty() || self.cursor.using_fallback {
            return self.plan_fallback(append, now_ms);
        }
        FetchPlan::Primary {
            terms: self.terms.clone(),
            offset: if append { self.cursor.offset } else { 0 },
            size: self.page_size,
        }
    }

    fn plan_fallback(&self, append: bool, now_ms: i64) -> FetchPlan {
        if let Some(until) = self.cursor.rate_limited_until {
            if until > now_ms {
                return FetchPlan::RateLimited { retry_at: until };
            }
        }
        // Until the first page lands, "load more" retries the first page.
        let cursor = if append && self.cursor.fallback_started {
            match &self.cursor.fallback_cursor {
                Some(token) => Some(token.clone()),
                None => return FetchPlan::Exhausted,
            }
        } else {
            None
        };
        FetchPlan::Fallback {
            terms: self.terms.clone(),
            cursor,
            size: self.page_size,
        }
    }

    /// Record a primary fetch cycle.
    ///
    /// `page_lengths` holds the raw page length each term returned (failed
    /// terms count as zero); `unique_results` is the number of distinct
    /// messages across all terms.
    pub fn record_primary(
        &mut self,
        append: bool,
        page_lengths: &[usize],
        unique_results: usize,
    ) -> PrimaryOutcome {
        if !append && unique_results == 0 {
            self.cursor.using_fallback = true;
            self.cursor.has_more = true;
            return PrimaryOutcome::EngageFallback;
        }

        // Advance by the longest page, not by newly merged records, so terms
        // that overlap heavily cannot stall pagination.
        let longest = page_lengths.iter().copied().max().unwrap_or(0);
        self.cursor.offset += longest;
        self.cursor.has_more = page_lengths.iter().any(|&n| n >= self.page_size);
        PrimaryOutcome::Continue
    }

    /// Record a successful fallback page.
    pub fn record_fallback(&mut self, next_cursor: Option<String>, has_more: bool) {
        self.cursor.rate_limited_until = None;
        self.cursor.fallback_started = true;
        self.cursor.has_more = has_more && next_cursor.is_some();
        if next_cursor.is_some() {
            self.cursor.fallback_cursor = next_cursor;
        }
    }

    /// Suspend fallback calls until `now_ms + retry_after_ms`. Returns the
    /// retry timestamp.
    pub fn record_rate_limit(&mut self, retry_after_ms: u64, now_ms: i64) -> i64 {
        let retry_at = now_ms.saturating_add(retry_after_ms.min(i64::MAX as u64) as i64);
        self.cursor.rate_limited_until = Some(retry_at);
        retry_at
    }
}
