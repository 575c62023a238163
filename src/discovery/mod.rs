//! Topic discovery: paginated search with relevance filtering and
//! early-stop heuristics.

pub mod api;
pub mod filter;
pub mod manifest;

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::pacing::{Pacer, RequestClass, RetryPolicy, with_retries};
use crate::session::{SessionClient, SessionError};
pub use api::{SearchDialect, SearchPage, SearchResult, make_dialect};
pub use manifest::{BookRef, ManifestError, TopicManifest};

/// Page-budget floor: always willing to look at a handful of pages.
pub const MIN_PAGE_BUDGET: usize = 5;

/// Page-budget ceiling before the configured hard cap applies.
pub const MAX_PAGE_BUDGET: usize = 200;

/// Consecutive pages without an accepted book before giving up on a topic.
const EMPTY_PAGE_STREAK: u32 = 3;

/// One user-selected topic, optionally with an expected-count hint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    pub name: String,
    #[serde(default)]
    pub expected_count: Option<u64>,
}

/// Why discovery stopped for a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The expected count (or configured cap) was reached.
    LimitReached,
    /// Three consecutive pages produced zero accepted books.
    EmptyStreak,
    /// The API reported no further pages.
    Exhausted,
    /// The page budget ran out.
    BudgetExhausted,
}

/// Result of discovering one topic.
#[derive(Debug)]
pub struct DiscoveryOutcome {
    pub manifest: TopicManifest,
    pub pages_fetched: usize,
    pub stop: StopReason,
}

/// Computes the page budget for a topic.
///
/// `ceil(expected / page_size) + 2`, clamped to `[5, 200]`. Topics without
/// a usable hint get the ceiling: early-stop and the configured hard cap
/// govern instead. Oversized hints (> 500) are not a reason to skip a
/// topic; the clamp plus early-stop handle them.
#[must_use]
pub fn page_budget(expected: Option<u64>, page_size: usize) -> usize {
    match expected {
        Some(count) if count > 0 => {
            let pages = (count as usize).div_ceil(page_size.max(1)) + 2;
            pages.clamp(MIN_PAGE_BUDGET, MAX_PAGE_BUDGET)
        }
        _ => MAX_PAGE_BUDGET,
    }
}

/// Paginates the search API per topic, filters candidates, and produces a
/// [`TopicManifest`].
pub struct DiscoveryEngine {
    session: Arc<SessionClient>,
    dialect: Box<dyn SearchDialect>,
    pacer: Arc<Pacer>,
    retry: RetryPolicy,
    max_books_per_skill: Option<u64>,
    max_pages_per_skill: usize,
}

impl DiscoveryEngine {
    /// Creates an engine over a session, dialect and pacer.
    #[must_use]
    pub fn new(
        session: Arc<SessionClient>,
        dialect: Box<dyn SearchDialect>,
        pacer: Arc<Pacer>,
        max_books_per_skill: Option<u64>,
        max_pages_per_skill: usize,
    ) -> Self {
        Self {
            session,
            dialect,
            pacer,
            retry: RetryPolicy::default(),
            max_books_per_skill,
            max_pages_per_skill,
        }
    }

    /// Discovers all relevant books for one topic.
    ///
    /// Fetching continues until any terminal condition holds: the expected
    /// count (or configured cap) is reached, three consecutive pages yield
    /// zero accepted books, the API reports no further pages, or the page
    /// budget is exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] on unrecoverable fetch failure; auth
    /// failures abort the whole job upstream.
    #[instrument(skip(self), fields(topic = %topic.name))]
    pub async fn discover_topic(&self, topic: &Topic) -> Result<DiscoveryOutcome, SessionError> {
        let budget = page_budget(topic.expected_count, self.dialect.page_size())
            .min(self.max_pages_per_skill);
        let limit = self.accept_limit(topic);

        let mut accepted: Vec<BookRef> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut empty_streak = 0u32;
        let mut pages_fetched = 0usize;
        let mut page = self.dialect.first_page();

        let stop = loop {
            if pages_fetched >= budget {
                break StopReason::BudgetExhausted;
            }

            self.pacer.wait(RequestClass::Discovery).await;
            let fetched = with_retries(&self.retry, "search page", || {
                self.dialect.fetch_page(&self.session, &topic.name, page)
            })
            .await?;
            pages_fetched += 1;

            let mut accepted_this_page = 0usize;
            for result in &fetched.results {
                if limit.is_some_and(|cap| accepted.len() as u64 >= cap) {
                    break;
                }
                if !filter::accept(result, &topic.name) {
                    continue;
                }
                let Some(id) = result.book_id() else {
                    continue;
                };
                if !seen.insert(id.to_string()) {
                    continue;
                }
                accepted.push(BookRef {
                    title: result.title.clone(),
                    id: id.to_string(),
                    url: result.url.clone().unwrap_or_default(),
                    isbn: result.isbn.clone(),
                    format: result.format.clone().unwrap_or_default(),
                });
                accepted_this_page += 1;
            }

            if limit.is_some_and(|cap| accepted.len() as u64 >= cap) {
                break StopReason::LimitReached;
            }

            if accepted_this_page == 0 {
                empty_streak += 1;
                if empty_streak >= EMPTY_PAGE_STREAK {
                    break StopReason::EmptyStreak;
                }
            } else {
                empty_streak = 0;
            }

            if fetched.last_page {
                break StopReason::Exhausted;
            }

            page += 1;
        };

        info!(
            topic = %topic.name,
            dialect = self.dialect.name(),
            accepted = accepted.len(),
            pages = pages_fetched,
            stop = ?stop,
            "discover: topic finished"
        );

        Ok(DiscoveryOutcome {
            manifest: TopicManifest::new(topic.name.clone(), accepted),
            pages_fetched,
            stop,
        })
    }

    /// The smaller of the expected count and the configured per-topic cap.
    fn accept_limit(&self, topic: &Topic) -> Option<u64> {
        match (
            topic.expected_count.filter(|c| *c > 0),
            self.max_books_per_skill,
        ) {
            (Some(expected), Some(cap)) => Some(expected.min(cap)),
            (Some(expected), None) => Some(expected),
            (None, cap) => cap,
        }
    }
}

/// Sorts topics by ascending expected count; topics without a hint go last.
pub fn order_topics(topics: &mut [Topic]) {
    topics.sort_by_key(|t| t.expected_count.unwrap_or(u64::MAX));
}
